//! Strongly-typed indexes into the subspaces of an `N`-dimensional cell
//!
//! A cell has `2**N` corners and `3**N` subspaces (corners, edges, faces, and
//! so on up to the cell's interior).  On each axis, a subspace is either fixed
//! to the cell's lower bound, fixed to its upper bound, or floating.
//!
//! Everything in this module is exact integer arithmetic, and is shared
//! between top-down evaluation and bottom-up collapse.

/// Largest dimension supported by the fixed-capacity arrays in this crate
pub const MAX_DIMENSION: usize = 3;

/// Number of corners in a cell of dimension [`MAX_DIMENSION`]
pub const MAX_CORNERS: usize = 1 << MAX_DIMENSION;

/// Number of subspaces in a cell of dimension [`MAX_DIMENSION`]
pub const MAX_SUBSPACES: usize = ipow3(MAX_DIMENSION);

/// Number of neighbors of a cell of dimension [`MAX_DIMENSION`]
///
/// This is one fewer than the number of subspaces, because the interior
/// subspace is never shared.
pub const MAX_NEIGHBORS: usize = MAX_SUBSPACES - 1;

static_assertions::const_assert!(MAX_SUBSPACES <= u8::MAX as usize);

/// Computes `3**n`
pub const fn ipow3(n: usize) -> usize {
    let mut out = 1;
    let mut i = 0;
    while i < n {
        out *= 3;
        i += 1;
    }
    out
}

/// Strongly-typed cell corner, in the `[0, 2**N)` range
///
/// Bit `i` is set if the corner is on the upper bound of axis `i`.  Children
/// of a cell are numbered equivalently, based on the corner that they touch.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CornerIndex<const N: usize>(u8);

impl<const N: usize> CornerIndex<N> {
    /// Number of corners in an `N`-dimensional cell
    pub const COUNT: usize = 1 << N;

    /// Builds a new corner
    ///
    /// # Panics
    /// If `i >= 2**N`, which is not a valid corner index
    pub const fn new(i: u8) -> Self {
        assert!(N >= 1 && N <= MAX_DIMENSION);
        assert!((i as usize) < (1 << N));
        Self(i)
    }

    /// Returns the value of this corner as an index
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the corner as a bitmask of axes on their upper bound
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Checks whether the corner is on the upper bound of the given axis
    pub fn is_high(self, axis: usize) -> bool {
        self.0 & (1 << axis) != 0
    }

    /// Iterates over all corners
    pub fn iter() -> impl Iterator<Item = Self> {
        (0..Self::COUNT as u8).map(Self)
    }

    /// Returns the subspace which is exactly this corner
    pub const fn neighbor(self) -> NeighborIndex<N> {
        NeighborIndex::from_pos_and_floating(self.0, 0)
    }
}

/// Strongly-typed subspace of a cell, in the `[0, 3**N)` range
///
/// The index is packed as base-3 digits, one per axis: `0` means the axis is
/// fixed to its lower bound, `1` means it is fixed to its upper bound, and `2`
/// means it is floating.  The last index (all axes floating) is the interior
/// of the cell.
///
/// The same type is used to name the neighbors of a cell: the fixed axes of a
/// neighbor index give the direction (down or up) in which to step, and
/// floating axes are left unchanged.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct NeighborIndex<const N: usize>(u8);

impl<const N: usize> NeighborIndex<N> {
    /// Number of subspaces in an `N`-dimensional cell
    pub const COUNT: usize = ipow3(N);

    /// Bitmask with one bit set for each of the `N` axes
    pub const MASK: u8 = ((1u16 << N) - 1) as u8;

    /// Builds a new subspace index
    ///
    /// # Panics
    /// If `i >= 3**N`
    pub const fn new(i: u8) -> Self {
        assert!(N >= 1 && N <= MAX_DIMENSION);
        assert!((i as usize) < ipow3(N));
        Self(i)
    }

    /// Returns the subspace representing the cell's interior
    pub const fn interior() -> Self {
        Self::new((ipow3(N) - 1) as u8)
    }

    /// Builds a subspace from a pair of bitmasks
    ///
    /// `floating` marks floating axes; `pos` marks fixed axes which are on
    /// their upper bound (bits in `pos` for floating axes are ignored).
    pub const fn from_pos_and_floating(pos: u8, floating: u8) -> Self {
        let mut out = 0;
        let mut scale = 1;
        let mut i = 0;
        while i < N {
            let digit = if floating & (1 << i) != 0 {
                2
            } else if pos & (1 << i) != 0 {
                1
            } else {
                0
            };
            out += digit * scale;
            scale *= 3;
            i += 1;
        }
        Self::new(out as u8)
    }

    /// Returns the value of this subspace as an index
    pub fn index(self) -> usize {
        self.0 as usize
    }

    /// Iterates over every subspace of the cell
    pub fn iter() -> impl Iterator<Item = Self> {
        (0..Self::COUNT as u8).map(Self)
    }

    /// Returns the base-3 digit for the given axis
    const fn digit(self, axis: usize) -> u8 {
        let mut v = self.0;
        let mut i = 0;
        while i < axis {
            v /= 3;
            i += 1;
        }
        v % 3
    }

    /// Bitmask of floating axes
    pub const fn floating(self) -> u8 {
        let mut out = 0;
        let mut i = 0;
        while i < N {
            if self.digit(i) == 2 {
                out |= 1 << i;
            }
            i += 1;
        }
        out
    }

    /// Bitmask of fixed axes
    pub const fn fixed(self) -> u8 {
        !self.floating() & Self::MASK
    }

    /// Bitmask of fixed axes which are on their upper bound
    pub const fn pos(self) -> u8 {
        let mut out = 0;
        let mut i = 0;
        while i < N {
            if self.digit(i) == 1 {
                out |= 1 << i;
            }
            i += 1;
        }
        out
    }

    /// Number of floating axes
    ///
    /// Corners are 0-dimensional, edges are 1-dimensional, and so on.
    pub const fn dimension(self) -> usize {
        self.floating().count_ones() as usize
    }

    /// Returns the corner represented by this subspace, if it is a corner
    pub fn corner(self) -> Option<CornerIndex<N>> {
        (self.floating() == 0).then(|| CornerIndex::new(self.pos()))
    }

    /// Checks whether `other` is a subspace of (or equal to) this subspace
    ///
    /// This is true if `other` can be reached by fixing more of our floating
    /// axes, while agreeing with us on every axis that we already fix.
    pub const fn contains(self, other: Self) -> bool {
        let floating = self.floating();
        (other.floating() & !floating) == 0
            && (self.pos() & !floating) == (other.pos() & !floating)
    }

    /// Maps a subspace of a child cell into the parent cell
    ///
    /// `child` is the child's position within the parent.  Each physical
    /// subspace is credited to exactly one child: a fixed axis is kept only if
    /// the subspace is on the axis's upper bound, or the child is on the low
    /// side of the parent (so that faces shared by two children are counted by
    /// the lower child).  Returns `None` if this subspace is credited to a
    /// different child.
    ///
    /// Fixed axes which touch the parent's boundary remain fixed; fixed axes
    /// on the parent's interior dividing planes become floating.
    pub fn parent_subspace(self, child: CornerIndex<N>) -> Option<Self> {
        let fixed = self.fixed();
        let pos = self.pos();
        let c = child.bits();
        if fixed & !pos & c != 0 {
            return None;
        }
        let interior = fixed & (pos ^ c);
        Some(Self::from_pos_and_floating(
            pos & !interior,
            self.floating() | interior,
        ))
    }

    /// Returns every neighbor which shares this subspace
    ///
    /// Each item is a `(direction, remapped)` pair, where `direction` is the
    /// neighbor's position relative to this cell and `remapped` is the same
    /// physical subspace in the neighbor's frame.  The interior subspace has
    /// no neighbors.
    pub fn neighbors(
        self,
    ) -> impl Iterator<Item = (NeighborIndex<N>, NeighborIndex<N>)> {
        let fixed = self.fixed();
        let pos = self.pos();
        let floating = self.floating();

        // Iterate over every non-empty subset of the fixed axes
        let mut out =
            arrayvec::ArrayVec::<_, { (1 << MAX_DIMENSION) - 1 }>::new();
        let mut axes = fixed;
        while axes != 0 {
            let direction =
                Self::from_pos_and_floating(pos & axes, Self::MASK & !axes);
            let remapped = Self::from_pos_and_floating(pos ^ axes, floating);
            out.push((direction, remapped));
            axes = (axes - 1) & fixed;
        }
        out.into_iter()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn subspace_counts() {
        assert_eq!(NeighborIndex::<1>::COUNT, 3);
        assert_eq!(NeighborIndex::<2>::COUNT, 9);
        assert_eq!(NeighborIndex::<3>::COUNT, 27);
        assert_eq!(CornerIndex::<3>::COUNT, 8);

        let mut dims = [0; 4];
        for n in NeighborIndex::<3>::iter() {
            dims[n.dimension()] += 1;
        }
        // 8 corners, 12 edges, 6 faces, 1 interior
        assert_eq!(dims, [8, 12, 6, 1]);
        assert_eq!(NeighborIndex::<3>::interior().floating(), 0b111);
    }

    #[test]
    fn corner_neighbors() {
        for c in CornerIndex::<3>::iter() {
            let n = c.neighbor();
            assert_eq!(n.dimension(), 0);
            assert_eq!(n.pos(), c.bits());
            assert_eq!(n.corner(), Some(c));
        }
        let n = NeighborIndex::<2>::from_pos_and_floating(0b01, 0b10);
        assert_eq!(n.pos(), 0b01);
        assert_eq!(n.floating(), 0b10);
        assert_eq!(n.fixed(), 0b01);
        assert_eq!(n.corner(), None);
    }

    #[test]
    fn contains() {
        let interior = NeighborIndex::<3>::interior();
        for n in NeighborIndex::<3>::iter() {
            assert!(interior.contains(n));
            assert!(n.contains(n));
        }

        // The low-X face contains its four corners and nothing at high X
        let face = NeighborIndex::<3>::from_pos_and_floating(0, 0b110);
        let inner: Vec<_> =
            NeighborIndex::<3>::iter().filter(|n| face.contains(*n)).collect();
        assert_eq!(inner.len(), 9);
        assert!(inner.iter().all(|n| n.fixed() & 1 == 1 && n.pos() & 1 == 0));

        // A corner contains only itself
        let c = CornerIndex::<3>::new(0b101).neighbor();
        assert_eq!(
            NeighborIndex::<3>::iter().filter(|n| c.contains(*n)).count(),
            1
        );
    }

    /// Position of a child's subspace on a grid where the parent spans 0-4
    fn key<const N: usize>(c: CornerIndex<N>, n: NeighborIndex<N>) -> Vec<u8> {
        (0..N)
            .map(|d| {
                let base = if c.is_high(d) { 2 } else { 0 };
                if n.floating() & (1 << d) != 0 {
                    base + 1
                } else if n.pos() & (1 << d) != 0 {
                    base + 2
                } else {
                    base
                }
            })
            .collect()
    }

    fn check_parent_credit<const N: usize>() {
        let mut credits: HashMap<Vec<u8>, usize> = HashMap::new();
        for c in CornerIndex::<N>::iter() {
            for n in NeighborIndex::<N>::iter() {
                let k = key(c, n);
                let e = credits.entry(k.clone()).or_default();
                let Some(p) = n.parent_subspace(c) else {
                    continue;
                };
                *e += 1;

                // The parent subspace must geometrically contain the child's
                for (d, v) in k.iter().enumerate() {
                    if p.floating() & (1 << d) != 0 {
                        assert!(
                            (1..=3).contains(v),
                            "{n:?} in child {c:?} maps to {p:?}"
                        );
                    } else if p.pos() & (1 << d) != 0 {
                        assert_eq!(*v, 4);
                    } else {
                        assert_eq!(*v, 0);
                    }
                }
            }
        }
        assert_eq!(credits.len(), 5usize.pow(N as u32));
        for (k, v) in credits {
            assert_eq!(v, 1, "subspace at {k:?} credited {v} times");
        }
    }

    #[test]
    fn parent_credit_is_exactly_once() {
        check_parent_credit::<1>();
        check_parent_credit::<2>();
        check_parent_credit::<3>();
    }

    #[test]
    fn neighbor_remap() {
        // The high-X edge of a square is shared with the +X neighbor only
        let edge = NeighborIndex::<2>::from_pos_and_floating(0b01, 0b10);
        let ns: Vec<_> = edge.neighbors().collect();
        assert_eq!(ns.len(), 1);
        let (dir, remapped) = ns[0];
        assert_eq!(dir.fixed(), 0b01);
        assert_eq!(dir.pos(), 0b01);
        assert_eq!(remapped.pos(), 0);
        assert_eq!(remapped.floating(), 0b10);

        // A corner of a cube is shared with seven neighbors
        let corner = CornerIndex::<3>::new(0b011).neighbor();
        let ns: Vec<_> = corner.neighbors().collect();
        assert_eq!(ns.len(), 7);
        for (dir, remapped) in ns {
            assert_eq!(dir.pos() & dir.fixed(), 0b011 & dir.fixed());
            assert_eq!(remapped.pos(), 0b011 ^ dir.fixed());
            assert_eq!(remapped.dimension(), 0);
        }

        assert_eq!(NeighborIndex::<3>::interior().neighbors().count(), 0);
    }
}
