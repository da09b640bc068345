//! Thread-safe object pools
//!
//! Pools recycle heap allocations (tree nodes, leafs, and subspaces) between
//! builds.  Objects are reset to a canonical state before being handed out
//! again, so a recycled object is indistinguishable from a fresh one.
use crossbeam_deque::{Injector, Steal};
use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

/// An object which can be reset to its default state for reuse
pub trait Reset {
    /// Clears the object's state
    fn reset(&mut self);
}

/// An owning pointer which can be stored in an [`ObjectPool`]
pub trait Pooled: Sized {
    /// Type of the pointed-to object
    type Target: Default + Reset;

    /// Wraps a freshly built object
    fn wrap(t: Self::Target) -> Self;

    /// Returns a mutable reference, if this is the only handle to the object
    fn try_get_mut(&mut self) -> Option<&mut Self::Target>;
}

impl<T: Default + Reset> Pooled for Box<T> {
    type Target = T;
    fn wrap(t: T) -> Self {
        Box::new(t)
    }
    fn try_get_mut(&mut self) -> Option<&mut T> {
        Some(self.as_mut())
    }
}

impl<T: Default + Reset> Pooled for Arc<T> {
    type Target = T;
    fn wrap(t: T) -> Self {
        Arc::new(t)
    }
    fn try_get_mut(&mut self) -> Option<&mut T> {
        Arc::get_mut(self)
    }
}

/// Lock-free pool of reusable objects
///
/// Objects which are still shared when pulled from the pool (e.g. an `Arc`
/// with a stale clone held elsewhere) are never handed out; they are returned
/// to the back of the free list and a fresh object is allocated instead.
pub struct ObjectPool<P> {
    free: Injector<P>,
    allocated: AtomicUsize,
}

impl<P: Pooled> Default for ObjectPool<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Pooled> ObjectPool<P> {
    /// Builds a new empty pool
    pub fn new() -> Self {
        Self {
            free: Injector::new(),
            allocated: AtomicUsize::new(0),
        }
    }

    /// Gets an object from the pool, in its reset state
    pub fn get(&self) -> P {
        self.get_with(|_| ())
    }

    /// Gets an object from the pool, initializing it with the given function
    ///
    /// The function is called with exclusive access before the object is
    /// returned, so it can be used to initialize objects that are shared
    /// immutably afterwards.
    pub fn get_with<F: FnOnce(&mut P::Target)>(&self, f: F) -> P {
        loop {
            match self.free.steal() {
                Steal::Success(mut p) => {
                    if let Some(t) = p.try_get_mut() {
                        t.reset();
                        f(t);
                        return p;
                    }
                    self.free.push(p);
                    break;
                }
                Steal::Empty => break,
                Steal::Retry => continue,
            }
        }
        self.allocated.fetch_add(1, Ordering::Relaxed);
        let mut t = P::Target::default();
        f(&mut t);
        P::wrap(t)
    }

    /// Returns an object to the pool
    pub fn put(&self, p: P) {
        self.free.push(p);
    }

    /// Total number of objects allocated by this pool
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Relaxed)
    }

    /// Number of objects waiting in the free list
    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Number of objects which have been handed out and not yet returned
    pub fn in_use(&self) -> usize {
        self.allocated().saturating_sub(self.available())
    }
}
