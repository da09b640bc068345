//! Tree nodes, leafs, and leaf subspaces
use super::{TreePool, neighbors::SimplexNeighbors};
use crate::{
    Error, Settings,
    eval::{Evaluator, Grad, Interval},
    pool::Reset,
    qef::Qef,
    region::Region,
    types::{CornerIndex, MAX_CORNERS, MAX_SUBSPACES, NeighborIndex},
};
use arrayvec::ArrayVec;
use log::trace;
use nalgebra::{SVector, Vector3};
use std::sync::{
    Arc, RwLock, RwLockReadGuard,
    atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering},
};

/// Level reported by [`SimplexTree::leaf_level`] for cells without a leaf
pub const LEAF_LEVEL_INVALID: u32 = u32::MAX;

/// Classification of a cell
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
#[repr(u8)]
pub enum CellType {
    /// Not yet evaluated
    Unknown = 0,
    /// Entirely outside the shape
    Empty = 1,
    /// Entirely inside the shape
    Filled = 2,
    /// Contains (or may contain) the shape's surface
    Ambiguous = 3,
}

impl CellType {
    /// Classifies a cell based on interval bounds of the field
    ///
    /// Bounds which contain `NaN` can't be trusted, so they always produce an
    /// ambiguous cell.
    pub fn from_interval(i: Interval) -> Self {
        if i.has_nan() {
            Self::Ambiguous
        } else if i.upper() < 0.0 {
            Self::Filled
        } else if i.lower() > 0.0 {
            Self::Empty
        } else {
            Self::Ambiguous
        }
    }

    fn from_u8(i: u8) -> Self {
        match i {
            1 => Self::Empty,
            2 => Self::Filled,
            3 => Self::Ambiguous,
            _ => Self::Unknown,
        }
    }
}

/// A single subspace (corner, edge, face, ..., or interior) of a leaf
///
/// Subspaces on the boundary of a cell may be shared with neighboring leafs,
/// so they are reference-counted explicitly: `refcount` is the number of
/// leafs which hold this subspace.
#[derive(Debug)]
pub struct LeafSubspace<const N: usize> {
    /// Accumulated samples for this subspace and every subspace it contains
    pub qef: Qef,

    /// Vertex position, within the subspace's bounds
    pub vert: SVector<f64, N>,

    /// Whether `vert` is inside the shape
    pub inside: bool,

    /// Global index, assigned by [`SimplexTree::assign_indices`] (0 if unset)
    index: AtomicU64,

    /// Number of leafs holding this subspace
    refcount: AtomicUsize,
}

impl<const N: usize> Default for LeafSubspace<N> {
    fn default() -> Self {
        Self {
            qef: Qef::new(),
            vert: SVector::zeros(),
            inside: false,
            index: AtomicU64::new(0),
            refcount: AtomicUsize::new(0),
        }
    }
}

impl<const N: usize> Reset for LeafSubspace<N> {
    fn reset(&mut self) {
        *self = Self::default();
    }
}

impl<const N: usize> LeafSubspace<N> {
    /// Returns the global index of this subspace
    pub fn index(&self) -> u64 {
        self.index.load(Ordering::Relaxed)
    }

    fn set_index(&self, i: u64) {
        self.index.store(i, Ordering::Relaxed);
    }

    /// Returns the number of leafs which hold this subspace
    pub fn refcount(&self) -> usize {
        self.refcount.load(Ordering::Acquire)
    }

    /// Records a new holder of this subspace
    pub(crate) fn acquire(&self) {
        self.refcount.fetch_add(1, Ordering::Relaxed);
    }

    /// Releases one holder, returning the subspace to the pool if it was the
    /// last one
    pub(crate) fn release_to<T>(
        self: Arc<Self>,
        pool: &TreePool<T, N>,
    ) {
        if self.refcount.fetch_sub(1, Ordering::AcqRel) == 1 {
            pool.subspaces.put(self);
        }
    }
}

/// Data stored in an ambiguous terminal cell
pub struct SimplexLeaf<T, const N: usize> {
    /// Topological level: 0 for leafs built directly from samples, one more
    /// than the highest child for leafs built by collapsing a branch
    pub level: u32,

    /// Tape which is valid within this leaf
    pub tape: Option<T>,

    /// Surface fragments within this leaf, as triples of subspace indices
    ///
    /// This is left empty during construction, for use by downstream meshing.
    pub surface: Vec<[u64; 3]>,

    /// One subspace per [`NeighborIndex`]
    pub sub: ArrayVec<Arc<LeafSubspace<N>>, MAX_SUBSPACES>,
}

impl<T, const N: usize> Default for SimplexLeaf<T, N> {
    fn default() -> Self {
        Self {
            level: 0,
            tape: None,
            surface: vec![],
            sub: ArrayVec::new(),
        }
    }
}

impl<T, const N: usize> Reset for SimplexLeaf<T, N> {
    fn reset(&mut self) {
        debug_assert!(self.sub.is_empty(), "subspaces were not released");
        self.level = 0;
        self.tape = None;
        self.surface.clear();
        self.sub.clear();
    }
}

impl<T, const N: usize> SimplexLeaf<T, N> {
    /// Releases every subspace, then returns the leaf itself to the pool
    pub fn release_to(mut self: Box<Self>, pool: &TreePool<T, N>) {
        for s in self.sub.drain(..) {
            s.release_to(pool);
        }
        self.tape = None;
        pool.leafs.put(self);
    }
}

/// A node in a simplex tree
///
/// Each node is either a branch (with `2**N` children), a terminal ambiguous
/// cell (with a [`SimplexLeaf`]), or a terminal empty / filled cell (with
/// neither).
pub struct SimplexTree<T, const N: usize> {
    kind: AtomicU8,

    /// Join counter, decremented as each child finishes
    pending: AtomicUsize,

    /// Position within the parent's children array
    index: u8,

    children: RwLock<ArrayVec<Arc<Self>, MAX_CORNERS>>,
    leaf: RwLock<Option<Box<SimplexLeaf<T, N>>>>,
}

impl<T, const N: usize> Default for SimplexTree<T, N> {
    fn default() -> Self {
        Self {
            kind: AtomicU8::new(CellType::Unknown as u8),
            pending: AtomicUsize::new(0),
            index: 0,
            children: RwLock::new(ArrayVec::new()),
            leaf: RwLock::new(None),
        }
    }
}

impl<T, const N: usize> Reset for SimplexTree<T, N> {
    fn reset(&mut self) {
        *self.kind.get_mut() = CellType::Unknown as u8;
        *self.pending.get_mut() = 0;
        self.index = 0;
        self.children.get_mut().unwrap().clear();
        *self.leaf.get_mut().unwrap() = None;
    }
}

impl<T, const N: usize> SimplexTree<T, N> {
    /// Builds a new, unevaluated node
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a standalone empty node
    pub fn empty() -> Self {
        let out = Self::default();
        out.set_type(CellType::Empty);
        out
    }

    /// Returns the classification of this cell
    pub fn cell_type(&self) -> CellType {
        CellType::from_u8(self.kind.load(Ordering::Acquire))
    }

    fn set_type(&self, t: CellType) {
        self.kind.store(t as u8, Ordering::Release);
    }

    /// Returns this node's position within its parent
    pub fn corner(&self) -> CornerIndex<N> {
        CornerIndex::new(self.index)
    }

    /// Checks whether this node has children
    pub fn is_branch(&self) -> bool {
        !self.children.read().unwrap().is_empty()
    }

    /// Returns the child at the given corner, if this is a branch
    pub fn child(&self, i: CornerIndex<N>) -> Option<Arc<Self>> {
        self.children.read().unwrap().get(i.index()).cloned()
    }

    /// Returns a snapshot of this node's children
    pub fn children(&self) -> ArrayVec<Arc<Self>, MAX_CORNERS> {
        self.children.read().unwrap().clone()
    }

    /// Locks and returns this node's leaf
    pub fn leaf(&self) -> RwLockReadGuard<'_, Option<Box<SimplexLeaf<T, N>>>> {
        self.leaf.read().unwrap()
    }

    /// Returns the topological level of a terminal node
    ///
    /// Empty and filled cells are at level 0.
    pub fn level(&self) -> u32 {
        debug_assert!(!self.is_branch());
        match self.cell_type() {
            CellType::Ambiguous => {
                self.leaf().as_ref().map(|l| l.level).unwrap_or(0)
            }
            CellType::Empty | CellType::Filled => 0,
            CellType::Unknown => {
                debug_assert!(false, "level of an unevaluated cell");
                0
            }
        }
    }

    /// Returns the level of this node's leaf
    ///
    /// Returns [`LEAF_LEVEL_INVALID`] for cells which do not have a leaf.
    pub fn leaf_level(&self) -> u32 {
        debug_assert!(!self.is_branch());
        self.leaf()
            .as_ref()
            .map(|l| l.level)
            .unwrap_or(LEAF_LEVEL_INVALID)
    }

    /// Splits this node, returning its new children
    ///
    /// Children are taken from the pool, and the join counter is reset to
    /// wait for every one of them.
    pub(crate) fn subdivide(
        &self,
        pool: &TreePool<T, N>,
    ) -> ArrayVec<Arc<Self>, MAX_CORNERS> {
        let cs: ArrayVec<Arc<Self>, MAX_CORNERS> = CornerIndex::<N>::iter()
            .map(|c| pool.trees.get_with(|t| t.index = c.bits()))
            .collect();
        self.pending.store(cs.len(), Ordering::Release);
        let mut w = self.children.write().unwrap();
        debug_assert!(w.is_empty());
        *w = cs.clone();
        cs
    }

    fn release_children(&self, pool: &TreePool<T, N>) {
        let cs = std::mem::take(&mut *self.children.write().unwrap());
        for c in cs {
            c.release_to(pool);
        }
    }

    /// Recursively returns this node, its children, and its leaf to the pool
    pub fn release_to(self: Arc<Self>, pool: &TreePool<T, N>) {
        let leaf = self.leaf.write().unwrap().take();
        if let Some(leaf) = leaf {
            leaf.release_to(pool);
        }
        self.release_children(pool);
        pool.trees.put(self);
    }

    /// Assigns a globally unique index to every distinct subspace
    ///
    /// Subspaces which are shared between neighboring leafs get a single
    /// index.  Indices are dense and start at 1; returns the number of
    /// indices assigned.
    ///
    /// This must only be called once, on a fully constructed tree; indices
    /// from a previous call would be picked up by neighbors.
    pub fn assign_indices(&self) -> u64 {
        let mut index = 1;
        self.assign_indices_with(&mut index, &SimplexNeighbors::new());
        index - 1
    }

    fn assign_indices_with(
        &self,
        index: &mut u64,
        neighbors: &SimplexNeighbors<T, N>,
    ) {
        let cs = self.children();
        if !cs.is_empty() {
            for (i, c) in cs.iter().enumerate() {
                let n = neighbors.push(CornerIndex::new(i as u8), &cs);
                c.assign_indices_with(index, &n);
            }
        } else if let Some(leaf) = self.leaf().as_ref() {
            for (i, s) in NeighborIndex::<N>::iter().zip(&leaf.sub) {
                match neighbors.get_index(i) {
                    0 => {
                        s.set_index(*index);
                        *index += 1;
                    }
                    n => s.set_index(n),
                }
            }
        }
    }

    /// Calls `f` on every terminal node, along with its region
    pub fn walk<F: FnMut(&Region<N>, &Self)>(
        &self,
        region: &Region<N>,
        f: &mut F,
    ) {
        let cs = self.children();
        if cs.is_empty() {
            f(region, self)
        } else {
            for (c, r) in cs.iter().zip(region.subdivide()) {
                c.walk(&r, f);
            }
        }
    }

    /// Calls `f` on every leaf, along with its region
    pub fn walk_leafs<F: FnMut(&Region<N>, &SimplexLeaf<T, N>)>(
        &self,
        region: &Region<N>,
        f: &mut F,
    ) {
        self.walk(region, &mut |r, t| {
            if let Some(leaf) = t.leaf().as_ref() {
                f(r, leaf)
            }
        })
    }
}

/// Solved data for every subspace of a cell
struct Solved<const N: usize> {
    qefs: [Qef; MAX_SUBSPACES],
    verts: [SVector<f64, N>; MAX_SUBSPACES],
    inside: [bool; MAX_SUBSPACES],
    solved: [bool; MAX_SUBSPACES],
}

impl<const N: usize> Solved<N> {
    fn new() -> Self {
        Self {
            qefs: [Qef::new(); MAX_SUBSPACES],
            verts: [SVector::zeros(); MAX_SUBSPACES],
            inside: [false; MAX_SUBSPACES],
            solved: [false; MAX_SUBSPACES],
        }
    }

    /// Positions a vertex in every unsolved subspace
    ///
    /// Each subspace's QEF is the sum of the QEFs of every subspace that it
    /// contains, solved within the subspace's bounds.  Returns the largest
    /// error of any solution.
    fn position_vertices(&mut self, region: &Region<N>, cutoff: f64) -> f64 {
        let mut err: f64 = 0.0;
        for i in NeighborIndex::<N>::iter() {
            if self.solved[i.index()] {
                continue;
            }
            let mut qef = Qef::new();
            for j in NeighborIndex::<N>::iter().filter(|j| i.contains(*j)) {
                qef += self.qefs[j.index()];
            }
            let (lower, upper) = region.subspace_bounds(i);
            let sol = qef.solve_bounded(&lower, &upper, cutoff);
            err = err.max(sol.error);
            self.verts[i.index()] = region.project(&sol.position);
        }
        err
    }

    /// Evaluates whether each unsolved vertex is inside the shape
    fn vertex_signs<E: Evaluator>(
        &mut self,
        eval: &mut E,
        tape: &E::Tape,
        region: &Region<N>,
    ) -> Result<(), Error> {
        let todo: ArrayVec<NeighborIndex<N>, MAX_SUBSPACES> =
            NeighborIndex::<N>::iter()
                .filter(|i| !self.solved[i.index()])
                .collect();
        for (slot, i) in todo.iter().enumerate() {
            eval.set(region.embed(&self.verts[i.index()]).cast(), slot)?;
        }
        let values: ArrayVec<f32, MAX_SUBSPACES> =
            eval.values(todo.len(), tape)?.iter().copied().collect();
        for (i, v) in todo.iter().zip(values) {
            self.inside[i.index()] = if v == 0.0 {
                let p = region.embed(&self.verts[i.index()]).cast();
                eval.is_inside(p, tape)?
            } else {
                v < 0.0
            };
        }
        Ok(())
    }
}

/// Inserts a sample into a QEF, discarding gradients on unused axes
fn insert_sample<const N: usize>(
    qef: &mut Qef,
    pos: Vector3<f64>,
    grad: Vector3<f32>,
    value: f32,
) {
    if !value.is_finite() {
        return;
    }
    let mut normal = Vector3::zeros();
    for i in 0..N {
        normal[i] = grad[i] as f64;
    }
    // Non-finite gradients carry no directional information
    if !normal.iter().all(|v| v.is_finite()) {
        normal = Vector3::zeros();
    }
    qef.insert(pos, normal, value as f64);
}

impl<T: Clone, const N: usize> SimplexTree<T, N> {
    /// Classifies this cell with interval arithmetic
    ///
    /// Returns the tape to use within this cell: the simplified tape if
    /// evaluation was safe, otherwise the original tape.
    pub(crate) fn eval_interval<E: Evaluator<Tape = T>>(
        &self,
        eval: &mut E,
        region: &Region<N>,
        tape: &T,
    ) -> Result<T, Error> {
        let out = eval.interval(
            region.lower3().cast(),
            region.upper3().cast(),
            tape,
        )?;
        let kind = CellType::from_interval(out.bounds);
        trace!("interval {} at {:?}: {kind:?}", out.bounds, region.lower);
        self.set_type(kind);
        Ok(if out.bounds.has_nan() {
            tape.clone()
        } else {
            out.tape.unwrap_or_else(|| tape.clone())
        })
    }

    /// Builds a leaf for an ambiguous terminal cell
    ///
    /// Subspaces are borrowed from neighbors where possible; the remaining
    /// corners are sampled, and every other subspace is solved from the
    /// corners that it contains.  The cell is then reclassified based on the
    /// signs of its vertices, and the leaf is only kept if the cell is still
    /// ambiguous.
    ///
    /// Returns the number of subspaces borrowed from neighbors.
    pub(crate) fn eval_leaf<E: Evaluator<Tape = T>>(
        &self,
        eval: &mut E,
        neighbors: &SimplexNeighbors<T, N>,
        region: &Region<N>,
        tape: T,
        pool: &TreePool<T, N>,
        settings: &Settings,
    ) -> Result<usize, Error> {
        let borrowed: ArrayVec<Option<Arc<LeafSubspace<N>>>, MAX_SUBSPACES> =
            NeighborIndex::<N>::iter().map(|i| neighbors.check(i)).collect();
        let borrow_count = borrowed.iter().flatten().count();

        let mut solved = Solved::new();
        for (i, s) in borrowed.iter().enumerate() {
            if let Some(s) = s {
                solved.qefs[i] = s.qef;
                solved.verts[i] = s.vert;
                solved.inside[i] = s.inside;
                solved.solved[i] = true;
            }
        }
        if let Err(e) =
            Self::solve_leaf(&mut solved, eval, region, &tape, settings)
        {
            for s in borrowed.into_iter().flatten() {
                s.release_to(pool);
            }
            return Err(e);
        }

        let mut leaf = pool.leafs.get();
        for (i, s) in borrowed.into_iter().enumerate() {
            let s = s.unwrap_or_else(|| {
                pool.subspaces.get_with(|s| {
                    s.qef = solved.qefs[i];
                    s.vert = solved.verts[i];
                    s.inside = solved.inside[i];
                    *s.refcount.get_mut() = 1;
                })
            });
            leaf.sub.push(s);
        }

        let kind = if leaf.sub.iter().all(|s| s.inside) {
            CellType::Filled
        } else if leaf.sub.iter().all(|s| !s.inside) {
            CellType::Empty
        } else {
            CellType::Ambiguous
        };
        if kind == CellType::Ambiguous {
            leaf.tape = Some(tape);
            *self.leaf.write().unwrap() = Some(leaf);
        } else {
            leaf.release_to(pool);
        }
        self.set_type(kind);
        trace!("leaf at {:?}: {kind:?}, {borrow_count} borrowed", region.lower);
        Ok(borrow_count)
    }

    fn solve_leaf<E: Evaluator<Tape = T>>(
        solved: &mut Solved<N>,
        eval: &mut E,
        region: &Region<N>,
        tape: &T,
        settings: &Settings,
    ) -> Result<(), Error> {
        // Sample every corner which wasn't borrowed
        let corners: ArrayVec<CornerIndex<N>, MAX_CORNERS> =
            CornerIndex::<N>::iter()
                .filter(|c| !solved.solved[c.neighbor().index()])
                .collect();
        for (slot, c) in corners.iter().enumerate() {
            eval.set(region.corner3(*c).cast(), slot)?;
        }
        if !corners.is_empty() {
            let ds: ArrayVec<Grad, MAX_CORNERS> =
                eval.derivs(corners.len(), tape)?.iter().copied().collect();
            let ambiguous: ArrayVec<bool, MAX_CORNERS> =
                eval.ambiguous(corners.len(), tape)?.iter().copied().collect();
            for ((c, d), a) in corners.iter().zip(ds).zip(ambiguous) {
                let pos = region.corner3(*c);
                let qef = &mut solved.qefs[c.neighbor().index()];
                if a {
                    // Each feature is an independent constraint
                    for g in eval.features(pos.cast(), tape)? {
                        insert_sample::<N>(qef, pos, g, d.v);
                    }
                } else {
                    insert_sample::<N>(qef, pos, d.gradient(), d.v);
                }
            }
        }

        solved.position_vertices(region, settings.eigenvalue_cutoff);
        solved.vertex_signs(eval, tape, region)
    }

    /// Called when a child finishes evaluation
    ///
    /// Returns `false` if other children are still pending.  Otherwise, this
    /// call is the last child to finish: it merges or collapses the children
    /// as appropriate, then returns `true` so that the caller can continue
    /// up the tree.
    pub(crate) fn collect_children<E: Evaluator<Tape = T>>(
        &self,
        eval: &mut E,
        tape: &T,
        region: &Region<N>,
        pool: &TreePool<T, N>,
        settings: &Settings,
    ) -> Result<bool, Error> {
        if self.pending.fetch_sub(1, Ordering::AcqRel) != 1 {
            return Ok(false);
        }

        let cs = self.children();
        debug_assert_eq!(cs.len(), CornerIndex::<N>::COUNT);

        // If any children are branches, then we can't collapse
        if cs.iter().any(|c| c.is_branch()) {
            return Ok(true);
        }

        let all_empty = cs.iter().all(|c| c.cell_type() == CellType::Empty);
        let all_full = cs.iter().all(|c| c.cell_type() == CellType::Filled);
        if all_empty || all_full {
            self.set_type(if all_empty {
                CellType::Empty
            } else {
                CellType::Filled
            });
            drop(cs);
            self.release_children(pool);
            return Ok(true);
        }
        self.set_type(CellType::Ambiguous);

        // Merge child QEFs into the parent, crediting each physical subspace
        // to exactly one child.  Empty and filled children have discarded
        // their QEFs, so they're skipped.
        let mut solved = Solved::<N>::new();
        for (i, c) in cs.iter().enumerate() {
            if c.cell_type() != CellType::Ambiguous {
                continue;
            }
            let leaf = c.leaf();
            let Some(leaf) = leaf.as_ref() else {
                debug_assert!(false, "ambiguous terminal cell without a leaf");
                continue;
            };
            let corner = CornerIndex::new(i as u8);
            for (j, s) in NeighborIndex::<N>::iter().zip(&leaf.sub) {
                if let Some(target) = j.parent_subspace(corner) {
                    solved.qefs[target.index()] += s.qef;
                }
            }
        }
        let err = solved.position_vertices(region, settings.eigenvalue_cutoff);

        if settings.collapse && err < settings.max_err {
            solved.vertex_signs(eval, tape, region)?;
            let level = cs.iter().map(|c| c.level()).max().unwrap_or(0) + 1;

            let mut leaf = pool.leafs.get();
            leaf.level = level;
            leaf.tape = Some(tape.clone());
            for i in 0..NeighborIndex::<N>::COUNT {
                leaf.sub.push(pool.subspaces.get_with(|s| {
                    s.qef = solved.qefs[i];
                    s.vert = solved.verts[i];
                    s.inside = solved.inside[i];
                    *s.refcount.get_mut() = 1;
                }));
            }
            trace!("collapsed branch at {:?} (err = {err})", region.lower);
            drop(cs);
            self.release_children(pool);
            *self.leaf.write().unwrap() = Some(leaf);
        }
        Ok(true)
    }
}

#[cfg(all(test, feature = "shapes"))]
mod test {
    use super::*;
    use crate::{eval::Shape, shapes::Sdf};

    fn settings() -> Settings<'static> {
        Settings {
            threads: None,
            ..Default::default()
        }
    }

    #[test]
    fn cell_type_from_interval() {
        use CellType::*;
        assert_eq!(CellType::from_interval([-2.0, -1.0].into()), Filled);
        assert_eq!(CellType::from_interval([1.0, 2.0].into()), Empty);
        assert_eq!(CellType::from_interval([-1.0, 1.0].into()), Ambiguous);
        assert_eq!(CellType::from_interval([0.0, 1.0].into()), Ambiguous);
        assert_eq!(CellType::from_interval(f32::NAN.into()), Ambiguous);
    }

    #[test]
    fn empty_tree() {
        let t = SimplexTree::<(), 2>::empty();
        assert_eq!(t.cell_type(), CellType::Empty);
        assert!(!t.is_branch());
        assert!(t.leaf().is_none());
        assert_eq!(t.level(), 0);
        assert_eq!(t.leaf_level(), LEAF_LEVEL_INVALID);
    }

    #[test]
    fn eval_leaf_plane() {
        // Plane at x = 0.3, crossing the cell
        let shape = Sdf::plane(Vector3::new(1.0, 0.0, 0.0), 0.3);
        let mut eval = shape.new_eval();
        let pool = TreePool::new();
        let region = Region::<2>::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        let t = SimplexTree::new();

        let tape = t.eval_interval(&mut eval, &region, &shape).unwrap();
        assert_eq!(t.cell_type(), CellType::Ambiguous);

        let borrowed = t
            .eval_leaf(
                &mut eval,
                &SimplexNeighbors::new(),
                &region,
                tape,
                &pool,
                &settings(),
            )
            .unwrap();
        assert_eq!(borrowed, 0);
        assert_eq!(t.cell_type(), CellType::Ambiguous);
        assert_eq!(t.leaf_level(), 0);

        let leaf = t.leaf();
        let leaf = leaf.as_ref().unwrap();
        assert_eq!(leaf.sub.len(), 9);
        for (i, s) in NeighborIndex::<2>::iter().zip(&leaf.sub) {
            assert_eq!(s.refcount(), 1);
            // Vertices are within the subspace's bounds
            let (lo, hi) = region.subspace_bounds(i);
            for d in 0..2 {
                assert!(s.vert[d] >= lo[d] && s.vert[d] <= hi[d]);
            }
            if (s.vert.x - 0.3).abs() > 1e-6 {
                assert_eq!(s.inside, s.vert.x < 0.3, "{i:?}: {:?}", s.vert);
            }
        }
        assert_eq!(pool.subspaces.in_use(), 9);
        assert_eq!(pool.leafs.in_use(), 1);
    }

    #[test]
    fn eval_leaf_reclassify() {
        // Interval arithmetic can't prove that this intersection is empty,
        // but every vertex ends up outside of the shape
        let shape = Sdf::intersection(
            Sdf::sphere(Vector3::new(-0.6, 0.0, 0.0), 0.5),
            Sdf::sphere(Vector3::new(0.6, 0.0, 0.0), 0.5),
        );
        let mut eval = shape.new_eval();
        let pool = TreePool::new();
        let region = Region::<2>::new([-0.2, -0.2], [0.2, 0.2]).unwrap();
        let t = SimplexTree::new();
        let tape = t.eval_interval(&mut eval, &region, &shape).unwrap();
        assert_eq!(t.cell_type(), CellType::Ambiguous);
        t.eval_leaf(
            &mut eval,
            &SimplexNeighbors::new(),
            &region,
            tape,
            &pool,
            &settings(),
        )
        .unwrap();
        assert_eq!(t.cell_type(), CellType::Empty);
        assert!(t.leaf().is_none());
        assert_eq!(pool.subspaces.in_use(), 0);
        assert_eq!(pool.leafs.in_use(), 0);
    }

    #[test]
    fn eval_leaf_crease() {
        // Both planes meet at the (0, 0) and (1, 1) corners
        let shape = Sdf::intersection(
            Sdf::plane(Vector3::new(1.0, 0.0, 0.0), 0.5),
            Sdf::plane(Vector3::new(0.0, 1.0, 0.0), 0.5),
        );
        let mut eval = shape.new_eval();
        let pool = TreePool::new();
        let region = Region::<2>::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        let t = SimplexTree::new();
        let tape = t.eval_interval(&mut eval, &region, &shape).unwrap();
        assert_eq!(t.cell_type(), CellType::Ambiguous);
        t.eval_leaf(
            &mut eval,
            &SimplexNeighbors::new(),
            &region,
            tape,
            &pool,
            &settings(),
        )
        .unwrap();

        let leaf = t.leaf();
        let leaf = leaf.as_ref().unwrap();
        for pos in [0b00, 0b11] {
            let i = NeighborIndex::<2>::from_pos_and_floating(pos, 0);
            assert_eq!(leaf.sub[i.index()].qef.count(), 2, "{i:?}");
        }
        for pos in [0b01, 0b10] {
            let i = NeighborIndex::<2>::from_pos_and_floating(pos, 0);
            assert_eq!(leaf.sub[i.index()].qef.count(), 1, "{i:?}");
        }

        // The interior vertex is on the diagonal through the crease
        let v = leaf.sub[NeighborIndex::<2>::interior().index()].vert;
        assert!((v.x - v.y).abs() < 1e-6, "{v:?}");
    }

    #[test]
    fn vertex_on_surface() {
        let region = Region::<2>::new([-1.0, -1.0], [1.0, 1.0]).unwrap();
        let plane = Sdf::plane(Vector3::new(1.0, 0.0, 0.0), 0.0);
        let flat = Sdf::constant(0.0);
        let mut eval = plane.new_eval();

        let mut solved = Solved::<2>::new();
        for (k, i) in NeighborIndex::<2>::iter().enumerate() {
            solved.verts[i.index()] = SVector::from([0.0, k as f64 / 10.0]);
        }
        let a = NeighborIndex::<2>::from_pos_and_floating(0b00, 0);
        let b = NeighborIndex::<2>::from_pos_and_floating(0b01, 0);
        solved.verts[a.index()] = SVector::from([-0.5, -1.0]);
        solved.verts[b.index()] = SVector::from([0.5, -1.0]);

        // Zero-valued vertices are inside if the field has a gradient
        solved.vertex_signs(&mut eval, &plane, &region).unwrap();
        for i in NeighborIndex::<2>::iter() {
            let p = region.embed(&solved.verts[i.index()]).cast();
            assert_eq!(
                solved.inside[i.index()],
                eval.is_inside(p, &plane).unwrap()
            );
            assert_eq!(solved.inside[i.index()], i != b, "{i:?}");
        }

        // A flat field has no direction in which to be inside
        solved.vertex_signs(&mut eval, &flat, &region).unwrap();
        assert!(solved.inside.iter().all(|v| !v));
    }

    #[test]
    fn nan_gradient() {
        // The gradient at the center of a sphere is undefined
        let shape = Sdf::sphere(Vector3::new(0.0, 0.0, 0.0), 0.5);
        let mut eval = shape.new_eval();
        let pool = TreePool::new();
        let region = Region::<2>::new([0.0, 0.0], [1.0, 1.0]).unwrap();
        let t = SimplexTree::new();
        let tape = t.eval_interval(&mut eval, &region, &shape).unwrap();
        t.eval_leaf(
            &mut eval,
            &SimplexNeighbors::new(),
            &region,
            tape,
            &pool,
            &settings(),
        )
        .unwrap();
        let leaf = t.leaf();
        let leaf = leaf.as_ref().unwrap();
        for s in &leaf.sub {
            assert!(s.vert.iter().all(|v| v.is_finite()));
        }
    }
}
