//! Closed-form shapes, used for testing and benchmarking
//!
//! A [`Sdf`] is a small expression tree of primitives and CSG operations.
//! It implements [`Shape`](crate::eval::Shape) directly (as an
//! `Arc<Sdf>`), using the tree itself as its tape: interval evaluation prunes
//! `min` and `max` branches which are never taken within a region.
//!
//! ```
//! use xtree::shapes::Sdf;
//! use nalgebra::Vector3;
//!
//! let s = Sdf::union(
//!     Sdf::sphere(Vector3::new(-0.5, 0.0, 0.0), 0.25),
//!     Sdf::sphere(Vector3::new(0.5, 0.0, 0.0), 0.25),
//! );
//! assert_eq!(s.value(Vector3::new(0.5, 0.0, 0.0)), -0.25);
//! ```
use crate::eval::{Choice, Grad, Interval, Shape};
use nalgebra::Vector3;
use std::sync::Arc;

mod eval;
pub use eval::SdfEval;

/// Expression tree for a signed distance field (or something like one)
#[derive(Debug)]
pub enum Sdf {
    /// Constant value everywhere
    Constant(f32),
    /// Sphere (or circle, when building a 2D tree)
    Sphere {
        /// Center of the sphere
        center: Vector3<f32>,
        /// Radius of the sphere
        radius: f32,
    },
    /// Half-space, with value `normal · p - offset`
    Plane {
        /// Plane normal, pointing outwards
        normal: Vector3<f32>,
        /// Offset along the normal
        offset: f32,
    },
    /// Minimum of two children (a union)
    Min(Arc<Sdf>, Arc<Sdf>),
    /// Maximum of two children (an intersection)
    Max(Arc<Sdf>, Arc<Sdf>),
    /// Negation (an inversion)
    Neg(Arc<Sdf>),
}

impl Sdf {
    /// Builds a constant field
    pub fn constant(v: f32) -> Arc<Self> {
        Arc::new(Self::Constant(v))
    }

    /// Builds a sphere
    pub fn sphere(center: Vector3<f32>, radius: f32) -> Arc<Self> {
        Arc::new(Self::Sphere { center, radius })
    }

    /// Builds a half-space
    pub fn plane(normal: Vector3<f32>, offset: f32) -> Arc<Self> {
        Arc::new(Self::Plane { normal, offset })
    }

    /// Builds the union of two shapes
    pub fn union(a: Arc<Self>, b: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Min(a, b))
    }

    /// Builds the intersection of two shapes
    pub fn intersection(a: Arc<Self>, b: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Max(a, b))
    }

    /// Builds the inverse of a shape
    pub fn inverse(a: Arc<Self>) -> Arc<Self> {
        Arc::new(Self::Neg(a))
    }

    /// Subtracts `b` from `a`
    pub fn difference(a: Arc<Self>, b: Arc<Self>) -> Arc<Self> {
        Self::intersection(a, Self::inverse(b))
    }

    /// Builds an axis-aligned box
    pub fn cube(lower: Vector3<f32>, upper: Vector3<f32>) -> Arc<Self> {
        let mut out: Option<Arc<Self>> = None;
        for i in 0..3 {
            let mut n = Vector3::zeros();
            n[i] = 1.0;
            let hi = Self::plane(n, upper[i]);
            let lo = Self::plane(-n, -lower[i]);
            let side = Self::intersection(hi, lo);
            out = Some(match out {
                Some(prev) => Self::intersection(prev, side),
                None => side,
            });
        }
        out.unwrap_or_else(|| Self::constant(f32::INFINITY))
    }

    /// Evaluates the field at a point
    pub fn value(&self, p: Vector3<f32>) -> f32 {
        match self {
            Self::Constant(v) => *v,
            Self::Sphere { center, radius } => (p - center).norm() - radius,
            Self::Plane { normal, offset } => normal.dot(&p) - offset,
            Self::Min(a, b) => a.value(p).min(b.value(p)),
            Self::Max(a, b) => a.value(p).max(b.value(p)),
            Self::Neg(a) => -a.value(p),
        }
    }

    /// Evaluates the field and its partial derivatives at a point
    pub fn grad(&self, p: Vector3<f32>) -> Grad {
        match self {
            Self::Constant(v) => Grad::from(*v),
            Self::Sphere { center, radius } => {
                let x = Grad::new(p.x - center.x, 1.0, 0.0, 0.0);
                let y = Grad::new(p.y - center.y, 0.0, 1.0, 0.0);
                let z = Grad::new(p.z - center.z, 0.0, 0.0, 1.0);
                (x.square() + y.square() + z.square()).sqrt()
                    - Grad::from(*radius)
            }
            Self::Plane { normal, offset } => Grad::new(
                normal.dot(&p) - offset,
                normal.x,
                normal.y,
                normal.z,
            ),
            Self::Min(a, b) => a.grad(p).min(b.grad(p)),
            Self::Max(a, b) => a.grad(p).max(b.grad(p)),
            Self::Neg(a) => -a.grad(p),
        }
    }

    /// Checks whether the point is exactly on a `min` or `max` branch
    pub fn is_ambiguous(&self, p: Vector3<f32>) -> bool {
        match self {
            Self::Constant(..) | Self::Sphere { .. } | Self::Plane { .. } => {
                false
            }
            Self::Min(a, b) | Self::Max(a, b) => {
                let (va, vb) = (a.value(p), b.value(p));
                if va == vb {
                    true
                } else if (va < vb) == matches!(self, Self::Min(..)) {
                    a.is_ambiguous(p)
                } else {
                    b.is_ambiguous(p)
                }
            }
            Self::Neg(a) => a.is_ambiguous(p),
        }
    }

    /// Returns every distinct derivative at the given point
    pub fn features(&self, p: Vector3<f32>) -> Vec<Grad> {
        match self {
            Self::Constant(..) | Self::Sphere { .. } | Self::Plane { .. } => {
                vec![self.grad(p)]
            }
            Self::Min(a, b) | Self::Max(a, b) => {
                let (va, vb) = (a.value(p), b.value(p));
                if va == vb {
                    let mut out = a.features(p);
                    for f in b.features(p) {
                        if !out.contains(&f) {
                            out.push(f);
                        }
                    }
                    out
                } else if (va < vb) == matches!(self, Self::Min(..)) {
                    a.features(p)
                } else {
                    b.features(p)
                }
            }
            Self::Neg(a) => a.features(p).into_iter().map(|g| -g).collect(),
        }
    }

    /// Evaluates over a box, returning bounds and a simplified tree
    ///
    /// The simplified tree has every `min` and `max` pruned whose choice is
    /// unambiguous within the box.  If nothing was pruned, then the returned
    /// tree is `self`.
    pub fn interval(
        self: &Arc<Self>,
        x: Interval,
        y: Interval,
        z: Interval,
    ) -> (Interval, Arc<Self>) {
        match self.as_ref() {
            Self::Constant(v) => (Interval::from(*v), self.clone()),
            Self::Sphere { center, radius } => {
                let d = ((x - center.x.into()).square()
                    + (y - center.y.into()).square()
                    + (z - center.z.into()).square())
                .sqrt()
                    - Interval::from(*radius);
                (d, self.clone())
            }
            Self::Plane { normal, offset } => {
                let d = x * normal.x + y * normal.y + z * normal.z
                    - Interval::from(*offset);
                (d, self.clone())
            }
            Self::Min(a, b) | Self::Max(a, b) => {
                let (ia, ta) = a.interval(x, y, z);
                let (ib, tb) = b.interval(x, y, z);
                let is_min = matches!(self.as_ref(), Self::Min(..));
                let (out, choice) = if is_min {
                    ia.min_choice(ib)
                } else {
                    ia.max_choice(ib)
                };
                let tape = match choice {
                    Choice::Left => ta,
                    Choice::Right => tb,
                    Choice::Both
                        if Arc::ptr_eq(a, &ta) && Arc::ptr_eq(b, &tb) =>
                    {
                        self.clone()
                    }
                    Choice::Both if is_min => Self::union(ta, tb),
                    Choice::Both => Self::intersection(ta, tb),
                };
                (out, tape)
            }
            Self::Neg(a) => {
                let (i, t) = a.interval(x, y, z);
                let tape = if Arc::ptr_eq(a, &t) {
                    self.clone()
                } else {
                    Self::inverse(t)
                };
                (-i, tape)
            }
        }
    }

    /// Counts the number of nodes in this expression tree
    pub fn size(&self) -> usize {
        match self {
            Self::Constant(..) | Self::Sphere { .. } | Self::Plane { .. } => 1,
            Self::Min(a, b) | Self::Max(a, b) => 1 + a.size() + b.size(),
            Self::Neg(a) => 1 + a.size(),
        }
    }
}

impl Shape for Arc<Sdf> {
    type Tape = Arc<Sdf>;
    type Eval = SdfEval;

    fn tape(&self) -> Self::Tape {
        self.clone()
    }

    fn new_eval(&self) -> Self::Eval {
        SdfEval::default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn interval3(lo: [f32; 3], hi: [f32; 3]) -> [Interval; 3] {
        [0, 1, 2].map(|i| Interval::new(lo[i], hi[i]))
    }

    #[test]
    fn sphere_interval() {
        let s = Sdf::sphere(Vector3::zeros(), 0.5);
        let [x, y, z] = interval3([-1.0; 3], [1.0; 3]);
        let (i, t) = s.interval(x, y, z);
        assert!(i.contains(-0.5));
        assert!(i.contains(1.0));
        assert!(Arc::ptr_eq(&s, &t));

        let [x, y, z] = interval3([2.0; 3], [3.0; 3]);
        let (i, _) = s.interval(x, y, z);
        assert!(i.lower() > 0.0);
    }

    #[test]
    fn union_pruning() {
        let a = Sdf::sphere(Vector3::new(-0.5, 0.0, 0.0), 0.25);
        let b = Sdf::sphere(Vector3::new(0.5, 0.0, 0.0), 0.25);
        let s = Sdf::union(a.clone(), b.clone());
        assert_eq!(s.size(), 3);

        // Near the left sphere, only the left sphere matters
        let [x, y, z] = interval3([-0.75, -0.1, -0.1], [-0.5, 0.1, 0.1]);
        let (_, t) = s.interval(x, y, z);
        assert!(Arc::ptr_eq(&t, &a));

        // In the middle, both are kept
        let [x, y, z] = interval3([-1.0; 3], [1.0; 3]);
        let (_, t) = s.interval(x, y, z);
        assert!(Arc::ptr_eq(&t, &s));
    }

    #[test]
    fn crease_features() {
        // Intersection of two half-spaces, with a crease along x = y = 0
        let s = Sdf::intersection(
            Sdf::plane(Vector3::new(1.0, 0.0, 0.0), 0.0),
            Sdf::plane(Vector3::new(0.0, 1.0, 0.0), 0.0),
        );
        let p = Vector3::new(0.0, 0.0, 0.5);
        assert!(s.is_ambiguous(p));
        assert_eq!(s.features(p).len(), 2);

        let p = Vector3::new(-0.5, 0.0, 0.5);
        assert!(!s.is_ambiguous(p));
        let fs = s.features(p);
        assert_eq!(fs.len(), 1);
        assert_eq!(fs[0].gradient(), Vector3::new(0.0, 1.0, 0.0));
    }

    #[test]
    fn cube() {
        let c = Sdf::cube(
            Vector3::new(-1.0, -1.0, -1.0),
            Vector3::new(1.0, 2.0, 3.0),
        );
        assert_eq!(c.value(Vector3::zeros()), -1.0);
        assert_eq!(c.value(Vector3::new(0.0, 0.0, 4.0)), 1.0);
        assert_eq!(
            c.grad(Vector3::new(0.0, 1.5, 0.0)).gradient(),
            Vector3::new(0.0, 1.0, 0.0)
        );
    }
}
