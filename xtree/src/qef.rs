//! Quadratic error functions for positioning subspace vertices
use crate::types::NeighborIndex;
use nalgebra::{Matrix4, Vector3, Vector4, Vector5};
use ordered_float::OrderedFloat;

/// Default relative cutoff below which eigenvalues are discarded
///
/// This is very much a tuned value.  If it is too small, then we pick
/// high-rank solutions in near-degenerate situations, which shoots vertices
/// far from their mass point; if it is too large, then we are less likely to
/// snap to sharp features.
pub const EIGENVALUE_CUTOFF_RELATIVE: f64 = 1e-3;

/// Quadratic error function over position and field value
///
/// Each sample is a linear constraint of the form `n · (x - p) = w - v`, where
/// `p` is the sample position, `v` is its value, `n` is its gradient, and
/// `[x, w]` is the unknown vertex position and value.  Samples are always
/// accumulated in 3D; lower-dimensional trees use a zero gradient on unused
/// axes and pin those axes during solving.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Qef {
    /// A^T A term, over `[x, y, z, w]`
    ata: Matrix4<f64>,

    /// A^T B term
    atb: Vector4<f64>,

    /// B^T B term
    btb: f64,

    /// Mass point is stored as `[x, y, z, value] * W` followed by `W`, so
    /// that summing works
    mass_point: Vector5<f64>,
}

/// Result of solving a [`Qef`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct QefSolution {
    /// Vertex position
    pub position: Vector3<f64>,
    /// Estimated field value at the vertex
    pub value: f64,
    /// Residual error at the solution (always non-negative)
    pub error: f64,
    /// Number of eigenvalues that were kept when solving
    pub rank: usize,
}

impl std::ops::AddAssign for Qef {
    fn add_assign(&mut self, rhs: Self) {
        self.ata += rhs.ata;
        self.atb += rhs.atb;
        self.btb += rhs.btb;
        self.mass_point += rhs.mass_point;
    }
}

impl std::ops::Add for Qef {
    type Output = Self;
    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl Qef {
    /// Builds an empty QEF
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of samples accumulated into this QEF
    pub fn count(&self) -> usize {
        self.mass_point[4] as usize
    }

    /// Adds a new sample to the QEF
    ///
    /// `pos` is the position of the sample and is accumulated in the mass
    /// point; `normal` is the (not necessarily normalized) gradient there, and
    /// `value` is the field value.
    pub fn insert(
        &mut self,
        pos: Vector3<f64>,
        normal: Vector3<f64>,
        value: f64,
    ) {
        let row = Vector4::new(normal.x, normal.y, normal.z, -1.0);
        let b = normal.dot(&pos) - value;
        self.ata += row * row.transpose();
        self.atb += row * b;
        self.btb += b * b;
        self.mass_point += Vector5::new(pos.x, pos.y, pos.z, value, 1.0);
    }

    /// Evaluates the residual error at the given position and value
    pub fn error(&self, position: &Vector3<f64>, value: f64) -> f64 {
        let x = Vector4::new(position.x, position.y, position.z, value);
        ((x.transpose() * self.ata * x)[0] - 2.0 * x.dot(&self.atb)
            + self.btb)
            .max(0.0)
    }

    /// Solves the QEF, minimizing towards the mass point
    ///
    /// Axes with bits set in `floating` are free; the remaining axes are
    /// pinned to the matching value in `pinned`.  If the QEF is empty, then
    /// `fallback` is used as the center for floating axes.
    ///
    /// Eigenvalues which are below `cutoff` (relative to the largest
    /// eigenvalue) are discarded, leaving the solution at the mass point along
    /// their directions.
    pub fn solve(
        &self,
        floating: u8,
        pinned: &Vector3<f64>,
        fallback: &Vector3<f64>,
        cutoff: f64,
    ) -> QefSolution {
        // See https://www.mattkeeter.com/projects/qef for a walkthrough of
        // QEF math and references to primary sources.
        let count = self.mass_point[4];
        let mut center = if count > 0.0 {
            self.mass_point.fixed_rows::<4>(0) / count
        } else {
            Vector4::new(fallback.x, fallback.y, fallback.z, 0.0)
        };
        let mut mask = Vector4::new(0.0, 0.0, 0.0, 1.0);
        for i in 0..3 {
            if floating & (1 << i) != 0 {
                mask[i] = 1.0;
            } else {
                center[i] = pinned[i];
            }
        }

        // Zero out rows and columns of pinned axes, so they can't move
        let m = Matrix4::from_diagonal(&mask);
        let ata = m * self.ata * m;
        let atb = m * (self.atb - self.ata * center);

        let svd = nalgebra::linalg::SVD::new(ata, true, true);

        // nalgebra doesn't always actually order singular values
        let mut singular_values =
            svd.singular_values.data.0[0].map(OrderedFloat);
        singular_values.sort();
        singular_values.reverse();
        let singular_values = singular_values.map(|o| o.0);

        let threshold = singular_values[0].abs() * cutoff;
        let rank = if singular_values[0] == 0.0 {
            0
        } else {
            (0..4)
                .find(|i| singular_values[*i].abs() < threshold)
                .unwrap_or(4)
        };

        let epsilon = singular_values.get(rank).cloned().unwrap_or(0.0);
        let mut sol = match (rank, svd.solve(&atb, epsilon)) {
            (0, _) | (_, Err(_)) => center,
            (_, Ok(d)) => center + d,
        };
        for i in 0..3 {
            if floating & (1 << i) == 0 {
                sol[i] = pinned[i];
            }
        }

        let position = sol.xyz();
        QefSolution {
            position,
            value: sol.w,
            error: self.error(&position, sol.w),
            rank,
        }
    }

    /// Solves the QEF, constraining the result to lie within a box
    ///
    /// Axes on which `lower == upper` are pinned.  If the unconstrained
    /// solution escapes the box, then we search the box's boundary, from the
    /// highest-dimension faces down to its corners, and pick the lowest-error
    /// solution from the first dimension that produces any in-bounds result.
    pub fn solve_bounded(
        &self,
        lower: &Vector3<f64>,
        upper: &Vector3<f64>,
        cutoff: f64,
    ) -> QefSolution {
        let floating = (0..3)
            .filter(|i| lower[*i] < upper[*i])
            .fold(0u8, |acc, i| acc | (1 << i));
        let center = (lower + upper) / 2.0;

        let sol = self.solve(floating, lower, &center, cutoff);
        if in_bounds(&sol.position, lower, upper) {
            return sol;
        }

        for dim in (0..floating.count_ones()).rev() {
            let best = NeighborIndex::<3>::iter()
                .filter(|n| {
                    n.fixed() & !floating == 0
                        && (n.floating() & floating).count_ones() == dim
                })
                .map(|n| {
                    let mut pin = *lower;
                    for i in 0..3 {
                        if n.pos() & (1 << i) != 0 {
                            pin[i] = upper[i];
                        }
                    }
                    self.solve(n.floating() & floating, &pin, &center, cutoff)
                })
                .filter(|s| in_bounds(&s.position, lower, upper))
                .min_by_key(|s| OrderedFloat(s.error));
            if let Some(best) = best {
                return best;
            }
        }

        // Corners are always in bounds, so this is only reachable with
        // non-finite inputs; clamp and carry on.
        let position = sol.position.zip_zip_map(lower, upper, |p, lo, hi| {
            if p.is_finite() { p.clamp(lo, hi) } else { lo }
        });
        QefSolution {
            position,
            error: self.error(&position, sol.value),
            ..sol
        }
    }
}

fn in_bounds(
    p: &Vector3<f64>,
    lower: &Vector3<f64>,
    upper: &Vector3<f64>,
) -> bool {
    (0..3).all(|i| p[i] >= lower[i] && p[i] <= upper[i])
}
