//! Same-size neighbor tracking during tree traversal
use super::tree::{LeafSubspace, SimplexTree};
use crate::types::{CornerIndex, MAX_NEIGHBORS, NeighborIndex};
use std::sync::Arc;

/// The neighbors of a cell, indexed by the [`NeighborIndex`] pointing at them
///
/// Only neighbors at the same depth are tracked; a slot is `None` if that
/// neighbor is outside of the root region or if the tree was not subdivided
/// that far in that direction.
pub(crate) struct SimplexNeighbors<T, const N: usize> {
    neighbors: [Option<Arc<SimplexTree<T, N>>>; MAX_NEIGHBORS],
}

impl<T, const N: usize> SimplexNeighbors<T, N> {
    /// Builds an empty set of neighbors, for the root of a tree
    pub fn new() -> Self {
        Self {
            neighbors: std::array::from_fn(|_| None),
        }
    }

    /// Finds the neighbors of a child cell
    ///
    /// `children` are the siblings of the child (including the child itself),
    /// and `self` holds the neighbors of their parent.
    pub fn push(
        &self,
        child: CornerIndex<N>,
        children: &[Arc<SimplexTree<T, N>>],
    ) -> Self {
        let mut out = Self::new();
        for n in NeighborIndex::<N>::iter() {
            if n == NeighborIndex::interior() {
                continue;
            }
            let fixed = n.fixed();

            // Axes along which the neighbor is outside of the parent
            let outward = fixed & !(n.pos() ^ child.bits());
            let target = CornerIndex::<N>::new(child.bits() ^ fixed);

            out.neighbors[n.index()] = if outward == 0 {
                children.get(target.index()).cloned()
            } else {
                let up = NeighborIndex::<N>::from_pos_and_floating(
                    n.pos() & outward,
                    NeighborIndex::<N>::MASK & !outward,
                );
                self.neighbors[up.index()]
                    .as_ref()
                    .and_then(|p| p.child(target))
            };
        }
        out
    }

    /// Looks for an already-solved copy of the given subspace
    ///
    /// If a neighbor has a leaf which shares this subspace, then the subspace
    /// is returned with its refcount incremented on the caller's behalf.
    pub fn check(&self, i: NeighborIndex<N>) -> Option<Arc<LeafSubspace<N>>> {
        for (dir, remapped) in i.neighbors() {
            let Some(n) = &self.neighbors[dir.index()] else {
                continue;
            };
            // The refcount is incremented while the leaf is locked, so the
            // neighbor can't release the subspace out from under us
            let leaf = n.leaf();
            if let Some(s) =
                leaf.as_ref().and_then(|l| l.sub.get(remapped.index()))
            {
                s.acquire();
                return Some(s.clone());
            }
        }
        None
    }

    /// Returns the index already assigned to a shared subspace, or 0
    pub fn get_index(&self, i: NeighborIndex<N>) -> u64 {
        for (dir, remapped) in i.neighbors() {
            let Some(n) = &self.neighbors[dir.index()] else {
                continue;
            };
            let leaf = n.leaf();
            if let Some(s) =
                leaf.as_ref().and_then(|l| l.sub.get(remapped.index()))
            {
                let index = s.index();
                if index != 0 {
                    return index;
                }
            }
        }
        0
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::simplex::TreePool;

    #[test]
    fn push_siblings() {
        let pool = TreePool::<(), 2>::new();
        let root = SimplexTree::<(), 2>::new();
        let cs = root.subdivide(&pool);
        let top = SimplexNeighbors::new();

        // The low-low child has siblings in the +x, +y, and +x+y directions
        let n = top.push(CornerIndex::new(0), &cs);
        let mut found = 0;
        for i in NeighborIndex::<2>::iter() {
            if i == NeighborIndex::interior() {
                continue;
            }
            let Some(t) = &n.neighbors[i.index()] else {
                continue;
            };
            found += 1;
            let c = i.corner().map(|c| c.bits()).unwrap_or_else(|| {
                // Edge neighbors: floating axes match the child
                i.pos()
            });
            assert_eq!(t.corner().bits(), c, "{i:?}");
        }
        assert_eq!(found, 3);
    }

    #[test]
    fn push_cousins() {
        let pool = TreePool::<(), 1>::new();
        let root = SimplexTree::<(), 1>::new();
        let cs = root.subdivide(&pool);
        let left = cs[0].subdivide(&pool);
        let right = cs[1].subdivide(&pool);

        let top = SimplexNeighbors::new();
        let n_left = top.push(CornerIndex::new(0), &cs);
        let n_right = top.push(CornerIndex::new(1), &cs);

        // The high child of the left half neighbors the low child of the
        // right half
        let n = n_left.push(CornerIndex::new(1), &left);
        let high = NeighborIndex::<1>::from_pos_and_floating(1, 0);
        let low = NeighborIndex::<1>::from_pos_and_floating(0, 0);
        assert!(Arc::ptr_eq(
            n.neighbors[high.index()].as_ref().unwrap(),
            &right[0]
        ));
        assert!(Arc::ptr_eq(
            n.neighbors[low.index()].as_ref().unwrap(),
            &left[0]
        ));

        // The low child of the left half has nothing to its left
        let n = n_left.push(CornerIndex::new(0), &left);
        assert!(n.neighbors[low.index()].is_none());

        let n = n_right.push(CornerIndex::new(0), &right);
        assert!(Arc::ptr_eq(
            n.neighbors[low.index()].as_ref().unwrap(),
            &left[1]
        ));
    }
}
