//! Axis-aligned regions of `N`-dimensional space
use crate::{
    Error,
    types::{CornerIndex, MAX_CORNERS, NeighborIndex},
};
use arrayvec::ArrayVec;
use nalgebra::{SVector, Vector3};

/// An axis-aligned box in `N` dimensions, embedded in 3D space
///
/// Shapes are always evaluated in 3D; axes at or above `N` are pinned to the
/// coordinates in `perp`.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Region<const N: usize> {
    /// Lower bound on each axis
    pub lower: SVector<f64, N>,
    /// Upper bound on each axis
    pub upper: SVector<f64, N>,
    /// Coordinates used for the axes beyond `N`
    ///
    /// Only `perp[N..]` is meaningful; the first `N` values are ignored.
    pub perp: Vector3<f64>,
}

impl<const N: usize> Region<N> {
    /// Builds a new region, checking that it is well-formed
    ///
    /// Shapes are evaluated in single precision, so every bound must also be
    /// finite when converted to `f32`.
    pub fn new(lower: [f64; N], upper: [f64; N]) -> Result<Self, Error> {
        for (lo, hi) in lower.iter().zip(upper.iter()) {
            if !(*lo as f32).is_finite() || !(*hi as f32).is_finite() {
                return Err(Error::NonFiniteRegion);
            } else if lo > hi {
                return Err(Error::BadRegion(*lo, *hi));
            }
        }
        Ok(Self {
            lower: SVector::from(lower),
            upper: SVector::from(upper),
            perp: Vector3::zeros(),
        })
    }

    /// Returns a copy of this region with new perpendicular coordinates
    pub fn with_perp(self, perp: Vector3<f64>) -> Self {
        Self { perp, ..self }
    }

    /// Embeds an `N`-dimensional point into 3D space
    pub fn embed(&self, p: &SVector<f64, N>) -> Vector3<f64> {
        let mut out = self.perp;
        for i in 0..N {
            out[i] = p[i];
        }
        out
    }

    /// Projects a 3D point back down into `N` dimensions
    pub fn project(&self, p: &Vector3<f64>) -> SVector<f64, N> {
        SVector::from_fn(|i, _| p[i])
    }

    /// Lower bound, embedded in 3D space
    pub fn lower3(&self) -> Vector3<f64> {
        self.embed(&self.lower)
    }

    /// Upper bound, embedded in 3D space
    pub fn upper3(&self) -> Vector3<f64> {
        self.embed(&self.upper)
    }

    /// Returns the center of the region
    pub fn center(&self) -> SVector<f64, N> {
        (self.lower + self.upper) / 2.0
    }

    /// Returns the size of the region on each axis
    pub fn size(&self) -> SVector<f64, N> {
        self.upper - self.lower
    }

    /// Returns the position of the given corner
    pub fn corner(&self, c: CornerIndex<N>) -> SVector<f64, N> {
        SVector::from_fn(|i, _| {
            if c.is_high(i) {
                self.upper[i]
            } else {
                self.lower[i]
            }
        })
    }

    /// Returns the position of the given corner, embedded in 3D space
    pub fn corner3(&self, c: CornerIndex<N>) -> Vector3<f64> {
        self.embed(&self.corner(c))
    }

    /// Returns the child region touching the given corner
    pub fn child(&self, c: CornerIndex<N>) -> Self {
        let center = self.center();
        let mut out = *self;
        for i in 0..N {
            if c.is_high(i) {
                out.lower[i] = center[i];
            } else {
                out.upper[i] = center[i];
            }
        }
        out
    }

    /// Splits the region into `2**N` children, indexed by [`CornerIndex`]
    pub fn subdivide(&self) -> ArrayVec<Self, MAX_CORNERS> {
        CornerIndex::<N>::iter().map(|c| self.child(c)).collect()
    }

    /// Checks whether the region is large enough to subdivide further
    pub fn can_subdivide(&self, min_feature: f64) -> bool {
        self.size().iter().any(|s| *s > min_feature)
    }

    /// Returns 3D bounds on the given subspace
    ///
    /// Fixed axes (and every axis beyond `N`) have equal lower and upper
    /// bounds; floating axes span the region.
    pub fn subspace_bounds(
        &self,
        n: NeighborIndex<N>,
    ) -> (Vector3<f64>, Vector3<f64>) {
        let mut lower = self.lower3();
        let mut upper = self.upper3();
        let fixed = n.fixed();
        let pos = n.pos();
        for i in 0..N {
            if fixed & (1 << i) != 0 {
                let v = if pos & (1 << i) != 0 {
                    self.upper[i]
                } else {
                    self.lower[i]
                };
                lower[i] = v;
                upper[i] = v;
            }
        }
        (lower, upper)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn region_new() {
        assert!(Region::<2>::new([0.0, 0.0], [1.0, 1.0]).is_ok());
        assert!(matches!(
            Region::<2>::new([0.0, 2.0], [1.0, 1.0]),
            Err(Error::BadRegion(..))
        ));
        assert!(matches!(
            Region::<1>::new([f64::NAN], [1.0]),
            Err(Error::NonFiniteRegion)
        ));
        assert!(matches!(
            Region::<2>::new([-1e200, 0.0], [0.0, 1.0]),
            Err(Error::NonFiniteRegion)
        ));
        assert!(matches!(
            Region::<1>::new([0.0], [f64::MAX]),
            Err(Error::NonFiniteRegion)
        ));
        assert!(Region::<1>::new([-1e30], [1e30]).is_ok());
    }

    #[test]
    fn region_subdivide() {
        let r = Region::<3>::new([-1.0, 0.0, 2.0], [1.0, 4.0, 3.0]).unwrap();
        let cs = r.subdivide();
        assert_eq!(cs.len(), 8);
        for (i, c) in cs.iter().enumerate() {
            let corner = CornerIndex::<3>::new(i as u8);
            // Each child shares the matching corner with its parent
            assert_eq!(c.corner(corner), r.corner(corner));
            assert_eq!(c.size(), r.size() / 2.0);
        }
        assert_eq!(cs[0].upper, r.center());
        assert_eq!(cs[7].lower, r.center());
    }

    #[test]
    fn region_embed() {
        let r = Region::<2>::new([0.0, 1.0], [2.0, 3.0])
            .unwrap()
            .with_perp(Vector3::new(9.0, 9.0, 0.5));
        assert_eq!(r.lower3(), Vector3::new(0.0, 1.0, 0.5));
        assert_eq!(r.upper3(), Vector3::new(2.0, 3.0, 0.5));
        assert_eq!(
            r.corner3(CornerIndex::new(0b01)),
            Vector3::new(2.0, 1.0, 0.5)
        );
        let p = r.embed(&r.center());
        assert_eq!(r.project(&p), r.center());
    }

    #[test]
    fn region_subspace_bounds() {
        let r = Region::<2>::new([0.0, 1.0], [2.0, 3.0]).unwrap();

        let (lo, hi) = r.subspace_bounds(NeighborIndex::interior());
        assert_eq!(lo, r.lower3());
        assert_eq!(hi, r.upper3());

        // High-X edge: X pinned to 2, Y spans the region
        let edge = NeighborIndex::from_pos_and_floating(0b01, 0b10);
        let (lo, hi) = r.subspace_bounds(edge);
        assert_eq!(lo, Vector3::new(2.0, 1.0, 0.0));
        assert_eq!(hi, Vector3::new(2.0, 3.0, 0.0));

        let (lo, hi) = r.subspace_bounds(CornerIndex::new(0b10).neighbor());
        assert_eq!(lo, hi);
        assert_eq!(lo, Vector3::new(0.0, 3.0, 0.0));
    }

    #[test]
    fn region_can_subdivide() {
        let r = Region::<2>::new([0.0, 0.0], [0.1, 1.0]).unwrap();
        assert!(r.can_subdivide(0.5));
        assert!(!r.can_subdivide(1.0));
    }
}
