//! Adaptive simplex trees
//!
//! A simplex tree is a `2**N`-ary tree (binary tree, quadtree, or octree)
//! over an implicit surface.  Each cell is classified as empty, filled, or
//! ambiguous; ambiguous cells at the bottom of the tree store a
//! [`SimplexLeaf`] with one [`LeafSubspace`] per corner, edge, face, and
//! interior.  Every subspace has a vertex positioned by solving a QEF within
//! the subspace's bounds.
//!
//! Subspaces on the boundary between two leafs of the same size are shared,
//! so each physical subspace is solved once; after construction,
//! [`SimplexTree::assign_indices`] gives each one a unique index.
//!
//! ```
//! use nalgebra::Vector3;
//! use xtree::{
//!     Region, Settings,
//!     shapes::Sdf,
//!     simplex::{CellType, SimplexTree, TreePool},
//! };
//!
//! let shape = Sdf::sphere(Vector3::zeros(), 0.5);
//! let region = Region::<3>::new([-1.0; 3], [1.0; 3])?;
//! let settings = Settings {
//!     max_depth: 3,
//!     ..Default::default()
//! };
//! let pool = TreePool::new();
//!
//! let root = SimplexTree::build(&shape, region, &settings, &pool)?;
//! assert_eq!(root.cell_type(), CellType::Ambiguous);
//! assert!(root.tree().is_branch());
//!
//! let count = root.assign_indices();
//! assert!(count > 0);
//!
//! root.release_to(&pool);
//! assert_eq!(pool.trees.in_use(), 0);
//! # Ok::<(), xtree::Error>(())
//! ```
use crate::pool::ObjectPool;
use std::sync::Arc;

mod builder;
mod neighbors;
mod tree;

pub use builder::{BuildStats, Root};
pub use tree::{
    CellType, LEAF_LEVEL_INVALID, LeafSubspace, SimplexLeaf, SimplexTree,
};

/// Pools of tree nodes, leafs, and subspaces
///
/// A single pool can be shared by many trees, including trees being built
/// concurrently.
pub struct TreePool<T, const N: usize> {
    /// Pool of tree nodes
    pub trees: ObjectPool<Arc<SimplexTree<T, N>>>,
    /// Pool of leafs
    pub leafs: ObjectPool<Box<SimplexLeaf<T, N>>>,
    /// Pool of leaf subspaces
    pub subspaces: ObjectPool<Arc<LeafSubspace<N>>>,
}

impl<T, const N: usize> Default for TreePool<T, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, const N: usize> TreePool<T, N> {
    /// Builds a new set of empty pools
    pub fn new() -> Self {
        Self {
            trees: ObjectPool::new(),
            leafs: ObjectPool::new(),
            subspaces: ObjectPool::new(),
        }
    }
}
