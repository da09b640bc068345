//! Module containing the universal error type
use thiserror::Error;

/// Universal error type for tree construction
#[derive(Error, Debug)]
pub enum Error {
    /// A batch exceeds the evaluator's capacity
    #[error("batch of {0} points exceeds the evaluator batch size ({1})")]
    BatchTooLarge(usize, usize),

    /// Region has a lower bound above its upper bound
    #[error("invalid region: lower bound {0} exceeds upper bound {1}")]
    BadRegion(f64, f64),

    /// Region has a bound which is infinite or `NaN`, or too large to
    /// represent as an `f32`
    #[error("region bounds must be finite in single precision")]
    NonFiniteRegion,

    /// Trees must have between 1 and 3 dimensions
    #[error("cannot build a tree with {0} dimensions")]
    BadDimension(usize),

    /// Tree construction was cancelled by the caller
    #[error("tree construction was cancelled")]
    Cancelled,
}
