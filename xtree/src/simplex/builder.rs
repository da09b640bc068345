//! Task-parallel tree construction
//!
//! Construction proceeds top-down: each task classifies one cell, then either
//! subdivides it (spawning one task per child) or builds a leaf.  When a task
//! finishes, it walks back up its chain of parent tasks, and the last child of
//! each branch to finish is responsible for collecting that branch.
use super::{
    TreePool,
    neighbors::SimplexNeighbors,
    tree::{CellType, SimplexLeaf, SimplexTree},
};
use crate::{
    Error, Settings,
    eval::Shape,
    region::Region,
    types::{CornerIndex, MAX_CORNERS, MAX_DIMENSION},
};
use arrayvec::ArrayVec;
use crossbeam_deque::{Injector, Steal};
use log::{debug, trace, warn};
use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

/// Statistics collected while building a tree
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct BuildStats {
    /// Number of cells classified with interval arithmetic
    pub cells: usize,
    /// Number of cells which were subdivided
    pub branches: usize,
    /// Number of leafs which were built, including those later discarded
    pub leafs: usize,
    /// Number of subspaces borrowed from neighbors instead of being solved
    pub borrowed: usize,
}

#[derive(Default)]
struct StatCounters {
    cells: AtomicUsize,
    branches: AtomicUsize,
    leafs: AtomicUsize,
    borrowed: AtomicUsize,
}

impl StatCounters {
    fn get(&self) -> BuildStats {
        BuildStats {
            cells: self.cells.load(Ordering::Relaxed),
            branches: self.branches.load(Ordering::Relaxed),
            leafs: self.leafs.load(Ordering::Relaxed),
            borrowed: self.borrowed.load(Ordering::Relaxed),
        }
    }
}

/// A single cell to evaluate
///
/// Tasks hold a pointer to their parent task, so the chain of tasks mirrors
/// the path from the root to the cell.
struct Task<T, const N: usize> {
    data: Arc<TaskData<T, N>>,
}

impl<T, const N: usize> Clone for Task<T, N> {
    fn clone(&self) -> Self {
        Self {
            data: self.data.clone(),
        }
    }
}

impl<T, const N: usize> std::ops::Deref for Task<T, N> {
    type Target = TaskData<T, N>;
    fn deref(&self) -> &Self::Target {
        &self.data
    }
}

struct TaskData<T, const N: usize> {
    node: Arc<SimplexTree<T, N>>,
    region: Region<N>,

    /// Tape to use within this cell, already simplified by the parent
    tape: T,

    depth: u8,
    neighbors: SimplexNeighbors<T, N>,
    parent: Option<Task<T, N>>,
}

impl<T, const N: usize> Task<T, N> {
    /// Builds a new root task
    fn new(node: Arc<SimplexTree<T, N>>, region: Region<N>, tape: T) -> Self {
        Self {
            data: Arc::new(TaskData {
                node,
                region,
                tape,
                depth: 0,
                neighbors: SimplexNeighbors::new(),
                parent: None,
            }),
        }
    }

    fn child(
        &self,
        corner: CornerIndex<N>,
        siblings: &[Arc<SimplexTree<T, N>>],
        region: Region<N>,
        tape: T,
    ) -> Self {
        Self {
            data: Arc::new(TaskData {
                node: siblings[corner.index()].clone(),
                region,
                tape,
                depth: self.depth + 1,
                neighbors: self.neighbors.push(corner, siblings),
                parent: Some(self.clone()),
            }),
        }
    }
}

struct BuildContext<'a, S: Shape, const N: usize> {
    shape: &'a S,
    pool: &'a TreePool<S::Tape, N>,
    settings: &'a Settings<'a>,

    /// Evaluators which aren't currently in use by a worker
    evals: Injector<S::Eval>,

    /// First error encountered during construction
    error: Mutex<Option<Error>>,
    failed: AtomicBool,

    stats: StatCounters,
}

impl<'a, S: Shape, const N: usize> BuildContext<'a, S, N> {
    fn take_eval(&self) -> S::Eval {
        loop {
            match self.evals.steal() {
                Steal::Success(e) => return e,
                Steal::Empty => return self.shape.new_eval(),
                Steal::Retry => continue,
            }
        }
    }

    fn fail(&self, e: Error) {
        self.failed.store(true, Ordering::Relaxed);
        let mut err = self.error.lock().unwrap();
        if err.is_none() {
            warn!("aborting tree construction: {e}");
            *err = Some(e);
        }
    }

    /// Evaluates a single task, returning child tasks
    fn step(
        &self,
        task: Task<S::Tape, N>,
    ) -> Result<ArrayVec<Task<S::Tape, N>, MAX_CORNERS>, Error> {
        if self.failed.load(Ordering::Relaxed) {
            return Ok(ArrayVec::new());
        } else if self.settings.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let mut eval = self.take_eval();
        let out = self.step_with(&mut eval, task);
        self.evals.push(eval);
        out
    }

    fn step_with(
        &self,
        eval: &mut S::Eval,
        task: Task<S::Tape, N>,
    ) -> Result<ArrayVec<Task<S::Tape, N>, MAX_CORNERS>, Error> {
        let tape = task.node.eval_interval(eval, &task.region, &task.tape)?;
        self.stats.cells.fetch_add(1, Ordering::Relaxed);

        if task.node.cell_type() == CellType::Ambiguous {
            if task.depth < self.settings.max_depth
                && task.region.can_subdivide(self.settings.min_feature)
            {
                self.stats.branches.fetch_add(1, Ordering::Relaxed);
                let children = task.node.subdivide(self.pool);
                return Ok(task
                    .region
                    .subdivide()
                    .into_iter()
                    .enumerate()
                    .map(|(i, r)| {
                        let c = CornerIndex::new(i as u8);
                        task.child(c, &children, r, tape.clone())
                    })
                    .collect());
            }
            let borrowed = task.node.eval_leaf(
                eval,
                &task.neighbors,
                &task.region,
                tape,
                self.pool,
                self.settings,
            )?;
            self.stats.leafs.fetch_add(1, Ordering::Relaxed);
            self.stats.borrowed.fetch_add(borrowed, Ordering::Relaxed);
        }
        self.finish(eval, task)?;
        Ok(ArrayVec::new())
    }

    /// Walks up the task chain, collecting every branch that is now complete
    fn finish(
        &self,
        eval: &mut S::Eval,
        task: Task<S::Tape, N>,
    ) -> Result<(), Error> {
        let mut task = task;
        while let Some(parent) = task.parent.clone() {
            // The child's tape is the parent's simplified tape
            let done = parent.node.collect_children(
                eval,
                &task.tape,
                &parent.region,
                self.pool,
                self.settings,
            )?;
            if !done {
                break;
            }
            trace!("collected branch at depth {}", parent.depth);
            task = parent;
        }
        Ok(())
    }

    /// Runs every task in the current thread, depth-first
    fn run_serial(&self, root: Task<S::Tape, N>) {
        let mut todo = vec![root];
        while let Some(task) = todo.pop() {
            match self.step(task) {
                // Reverse order so that children are handled in order
                Ok(children) => todo.extend(children.into_iter().rev()),
                Err(e) => {
                    self.fail(e);
                    break;
                }
            }
        }
    }

    /// Runs a task, spawning its children into the scope
    fn spawn<'s>(&'s self, scope: &rayon::Scope<'s>, task: Task<S::Tape, N>) {
        match self.step(task) {
            Ok(children) => {
                for c in children {
                    scope.spawn(move |s| self.spawn(s, c));
                }
            }
            Err(e) => self.fail(e),
        }
    }
}

impl<T: Clone + Send + Sync, const N: usize> SimplexTree<T, N> {
    /// Builds a tree over the given region
    ///
    /// Nodes, leafs, and subspaces are taken from `pool`; call
    /// [`Root::release_to`] to return them when the tree is no longer needed.
    ///
    /// If construction fails or is cancelled, every partially-built object is
    /// returned to the pool before the error is returned.
    pub fn build<S: Shape<Tape = T>>(
        shape: &S,
        region: Region<N>,
        settings: &Settings,
        pool: &TreePool<T, N>,
    ) -> Result<Root<T, N>, Error> {
        if N == 0 || N > MAX_DIMENSION {
            return Err(Error::BadDimension(N));
        }
        let root = pool.trees.get();
        let ctx = BuildContext {
            shape,
            pool,
            settings,
            evals: Injector::new(),
            error: Mutex::new(None),
            failed: AtomicBool::new(false),
            stats: StatCounters::default(),
        };
        let task = Task::new(root.clone(), region, shape.tape());
        match settings.threads {
            None => ctx.run_serial(task),
            Some(p) => {
                let ctx = &ctx;
                p.run(|| rayon::scope(|s| ctx.spawn(s, task)))
            }
        }

        let stats = ctx.stats.get();
        if let Some(e) = ctx.error.into_inner().unwrap() {
            root.release_to(pool);
            return Err(e);
        }
        debug!(
            "built {N}D tree: {} cells, {} branches, {} leafs, {} borrowed",
            stats.cells, stats.branches, stats.leafs, stats.borrowed,
        );
        debug!(
            "pool usage: {} trees, {} leafs, {} subspaces",
            pool.trees.in_use(),
            pool.leafs.in_use(),
            pool.subspaces.in_use(),
        );
        Ok(Root {
            tree: root,
            region,
            stats,
        })
    }
}

/// A fully constructed tree, along with the region that it covers
pub struct Root<T, const N: usize> {
    tree: Arc<SimplexTree<T, N>>,
    region: Region<N>,
    stats: BuildStats,
}

impl<T, const N: usize> Root<T, N> {
    /// Returns the root node of the tree
    pub fn tree(&self) -> &SimplexTree<T, N> {
        &self.tree
    }

    /// Returns the region covered by the tree
    pub fn region(&self) -> &Region<N> {
        &self.region
    }

    /// Returns statistics from construction
    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    /// Returns the classification of the root cell
    pub fn cell_type(&self) -> CellType {
        self.tree.cell_type()
    }

    /// Assigns indices to every subspace; see [`SimplexTree::assign_indices`]
    pub fn assign_indices(&self) -> u64 {
        self.tree.assign_indices()
    }

    /// Calls `f` on every terminal node
    pub fn walk<F: FnMut(&Region<N>, &SimplexTree<T, N>)>(&self, mut f: F) {
        self.tree.walk(&self.region, &mut f)
    }

    /// Calls `f` on every leaf
    pub fn walk_leafs<F: FnMut(&Region<N>, &SimplexLeaf<T, N>)>(
        &self,
        mut f: F,
    ) {
        self.tree.walk_leafs(&self.region, &mut f)
    }

    /// Returns every node, leaf, and subspace to the pool
    pub fn release_to(self, pool: &TreePool<T, N>) {
        self.tree.release_to(pool)
    }
}
