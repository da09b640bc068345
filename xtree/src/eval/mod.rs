//! Traits and data structures for evaluation
//!
//! Tree construction is agnostic to how shapes are represented; it only
//! requires a [`Shape`], which builds a root tape and per-thread
//! [`Evaluator`] objects.
//!
//! Evaluators work on 3D points and intervals, even when building
//! lower-dimensional trees.
use crate::Error;
use nalgebra::Vector3;

pub mod types;

pub use types::{Choice, Grad, Interval};

/// Maximum number of points in a single batched evaluation
///
/// Leaf evaluation never needs more than `3**N` points at once, so this is
/// comfortably larger than any batch issued during tree construction.
pub const BATCH_SIZE: usize = 256;

/// Result of evaluating a shape over an interval region
#[derive(Clone, Debug)]
pub struct IntervalOutput<T> {
    /// Conservative bounds on the field within the region
    ///
    /// If the bounds contain `NaN`, then the result is not safe to use for
    /// classification.
    pub bounds: Interval,

    /// A simplified tape which is valid within the region, if one was found
    pub tape: Option<T>,
}

/// A function which can be evaluated over points and intervals
///
/// Points are loaded into numbered slots with [`Evaluator::set`], then
/// evaluated in bulk.  Results are stored in the evaluator and returned as
/// borrowed slices, so they are only valid until the next evaluation.
pub trait Evaluator {
    /// Tape type used by this evaluator
    type Tape;

    /// Evaluates over an axis-aligned box, optionally simplifying the tape
    fn interval(
        &mut self,
        lower: Vector3<f32>,
        upper: Vector3<f32>,
        tape: &Self::Tape,
    ) -> Result<IntervalOutput<Self::Tape>, Error>;

    /// Stores a point in the given slot, for later batch evaluation
    ///
    /// Returns [`Error::BatchTooLarge`] if `slot >= BATCH_SIZE`
    fn set(&mut self, p: Vector3<f32>, slot: usize) -> Result<(), Error>;

    /// Evaluates values in the first `count` slots
    fn values(
        &mut self,
        count: usize,
        tape: &Self::Tape,
    ) -> Result<&[f32], Error>;

    /// Evaluates values and partial derivatives in the first `count` slots
    fn derivs(
        &mut self,
        count: usize,
        tape: &Self::Tape,
    ) -> Result<&[Grad], Error>;

    /// Checks whether each of the first `count` slots is ambiguous
    ///
    /// A point is ambiguous if it sits exactly on a branch of a `min` or `max`
    /// (or similar), so that it has more than one valid derivative.  This
    /// must be called after [`Evaluator::derivs`] with the same `count`.
    fn ambiguous(
        &mut self,
        count: usize,
        tape: &Self::Tape,
    ) -> Result<&[bool], Error>;

    /// Returns every distinct gradient at an (ambiguous) point
    fn features(
        &mut self,
        p: Vector3<f32>,
        tape: &Self::Tape,
    ) -> Result<Vec<Vector3<f32>>, Error>;

    /// Checks whether a point is inside the shape
    ///
    /// This is only interesting for points where the field is exactly zero,
    /// which must be resolved by looking at nearby values.
    fn is_inside(
        &mut self,
        p: Vector3<f32>,
        tape: &Self::Tape,
    ) -> Result<bool, Error>;
}

/// A shape which can be used to build a tree
pub trait Shape: Send + Sync {
    /// Tape type, which is cloned into every task during construction
    type Tape: Clone + Send + Sync;

    /// Evaluator type; one is built per worker
    type Eval: Evaluator<Tape = Self::Tape> + Send;

    /// Returns the root tape of the shape
    fn tape(&self) -> Self::Tape;

    /// Builds a new evaluator
    fn new_eval(&self) -> Self::Eval;
}
