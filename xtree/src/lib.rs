//! `xtree` builds adaptive simplex trees over implicit surfaces.
//!
//! An **implicit surface** is a function `f(x, y, z)`.  By convention, if
//! `f(x, y, z) < 0`, then that position is **inside** the shape; if it's `> 0`,
//! then that position is **outside** the shape; otherwise, it's on the
//! boundary of the shape.
//!
//! A **simplex tree** is a spatial subdivision of a region (in 1, 2, or 3
//! dimensions) which is refined wherever the surface may be present.  Cells at
//! the bottom of the tree store a vertex for every corner, edge, face, and
//! interior, positioned to capture sharp features of the surface.  The
//! resulting tree is the input to simplex-based meshing.
//!
//! # Evaluation
//! Tree construction is agnostic to how shapes are represented.  It requires a
//! type implementing [`Shape`](crate::eval::Shape), which builds a root
//! **tape** and per-thread **evaluators**; evaluators classify cells with
//! interval arithmetic (possibly producing a simplified tape) and evaluate
//! values and gradients at batches of points.
//!
//! The [`shapes`] module provides a small closed-form implementation which is
//! useful for testing.
//!
//! # Building a tree
//! Trees are built by
//! [`SimplexTree::build`](crate::simplex::SimplexTree::build), which takes a
//! shape, a [`Region`], and [`Settings`]:
//! ```
//! use nalgebra::Vector3;
//! use xtree::{
//!     Region, Settings, ThreadPool,
//!     shapes::Sdf,
//!     simplex::{SimplexTree, TreePool},
//! };
//!
//! let shape = Sdf::union(
//!     Sdf::sphere(Vector3::new(-0.3, 0.0, 0.0), 0.4),
//!     Sdf::sphere(Vector3::new(0.3, 0.0, 0.0), 0.4),
//! );
//! let region = Region::<2>::new([-1.0, -1.0], [1.0, 1.0])?;
//! let settings = Settings {
//!     max_depth: 4,
//!     threads: Some(&ThreadPool::Global),
//!     ..Default::default()
//! };
//!
//! let pool = TreePool::new();
//! let root = SimplexTree::build(&shape, region, &settings, &pool)?;
//!
//! let mut leafs = 0;
//! root.walk_leafs(|_region, _leaf| leafs += 1);
//! assert!(leafs > 0);
//! root.release_to(&pool);
//! # Ok::<(), xtree::Error>(())
//! ```
//!
//! Trees are built from pooled objects; returning a tree to its
//! [`TreePool`](crate::simplex::TreePool) makes those objects available for
//! the next build.
//!
//! # Feature flags
#![doc = document_features::document_features!()]
#![warn(missing_docs)]

mod config;
mod error;

pub mod eval;
pub mod pool;
pub mod qef;
pub mod region;
pub mod simplex;
pub mod types;

#[cfg(feature = "shapes")]
pub mod shapes;

pub use config::{CancelToken, Settings, ThreadPool};
pub use error::Error;
pub use region::Region;
