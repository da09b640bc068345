//! Settings for tree construction
use crate::qef::EIGENVALUE_CUTOFF_RELATIVE;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Pool on which cells of a tree are evaluated in parallel
pub enum ThreadPool {
    /// Caller-provided pool, e.g. to cap the number of workers
    Custom(rayon::ThreadPool),
    /// Global Rayon pool
    Global,
}

impl ThreadPool {
    /// Runs a tree build (or any other closure) inside this pool
    pub fn run<F: FnOnce() -> V + Send, V: Send>(&self, f: F) -> V {
        match self {
            ThreadPool::Custom(p) => p.install(f),
            ThreadPool::Global => f(),
        }
    }
}

/// Token to stop a tree build early
///
/// Clones share the same flag, so a token can be cancelled from another
/// thread while [`SimplexTree::build`](crate::simplex::SimplexTree::build)
/// is running; the build then returns
/// [`Error::Cancelled`](crate::Error::Cancelled).
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Builds a new token, initialized as "not cancelled"
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks this token (and every clone) as cancelled
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Checks whether the token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Settings when building a simplex tree
pub struct Settings<'a> {
    /// Maximum depth to recurse in the tree
    pub max_depth: u8,

    /// Minimum feature size
    ///
    /// Cells are not subdivided once every side is at or below this size.
    pub min_feature: f64,

    /// Relative cutoff for discarding eigenvalues when solving QEFs
    pub eigenvalue_cutoff: f64,

    /// Maximum QEF error for collapsing a branch into a single leaf
    pub max_err: f64,

    /// Enables error-based collapse of branches into leafs
    ///
    /// When this is `false`, branches are only collapsed when every child is
    /// uniformly empty or filled.
    pub collapse: bool,

    /// Thread pool to use for construction
    ///
    /// If this is `None`, then construction is done in a single thread;
    /// otherwise, the provided pool is used.
    pub threads: Option<&'a ThreadPool>,

    /// Token to cancel construction
    pub cancel: CancelToken,
}

impl Default for Settings<'_> {
    fn default() -> Self {
        Self {
            max_depth: 6,
            min_feature: 0.0,
            eigenvalue_cutoff: EIGENVALUE_CUTOFF_RELATIVE,
            max_err: 1e-8,
            collapse: false,
            threads: Some(&ThreadPool::Global),
            cancel: CancelToken::new(),
        }
    }
}
