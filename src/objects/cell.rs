use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

use crate::{errors::RefinementError, grid::{validate_bounds, volume}};
use super::{ObjectState, Refinable, RefineOutcome, RefinementContext};

///
/// Identity of a cell: the bit patterns of its start and end coordinates.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CellKey(Vec<u64>);

impl CellKey
{
    pub fn new(start: &[f64], end: &[f64]) -> Self
    {
        Self(start.iter().chain(end).map(|x| x.to_bits()).collect())
    }
}

///
/// Dyadic lattice the cells live on. A cell on level `l` in dimension `d`
/// has width `(b[d] - a[d]) / 2^l`.
///
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellLattice
{
    pub a: Vec<f64>,
    pub b: Vec<f64>,
    pub lmin: Vec<u32>,
    /// Weight errors of active cells by their volume.
    pub punish_depth: bool,
}

impl CellLattice
{
    pub fn new(a: &[f64], b: &[f64], lmin: &[u32]) -> Result<Self, RefinementError>
    {
        validate_bounds(a, b)?;
        if lmin.len() != a.len()
        {
            return Err(RefinementError::DimensionMismatch { expected: a.len(), found: lmin.len() });
        }
        Ok(Self { a: a.to_owned(), b: b.to_owned(), lmin: lmin.to_owned(), punish_depth: false })
    }

    pub fn with_punish_depth(mut self, punish_depth: bool) -> Self
    {
        self.punish_depth = punish_depth;
        self
    }

    #[inline]
    pub fn ndim(&self) -> usize
    {
        self.a.len()
    }

    ///
    /// Coordinate of lattice position `position` on `level`. Computed from
    /// integers only, so every route to the same point yields the same bits.
    ///
    #[inline]
    pub fn coordinate(&self, dim: usize, position: u64, level: u32) -> f64
    {
        self.a[dim] + (self.b[dim] - self.a[dim]) * (position as f64 / 2.0_f64.powi(level as i32))
    }

    pub fn bounds(&self, cell: &LatticeCell) -> (Vec<f64>, Vec<f64>)
    {
        let start = (0..self.ndim()).map(|d| self.coordinate(d, cell.index[d], cell.levelvec[d])).collect();
        let end = (0..self.ndim()).map(|d| self.coordinate(d, cell.index[d] + 1, cell.levelvec[d])).collect();
        (start, end)
    }

    pub fn key(&self, cell: &LatticeCell) -> CellKey
    {
        let (start, end) = self.bounds(cell);
        CellKey::new(&start, &end)
    }
}

///
/// Level vector and per-dimension position of a cell on the lattice.
///
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LatticeCell
{
    pub levelvec: Vec<u32>,
    pub index: Vec<u64>,
}

///
/// The two halves of `cell` along `d`, upper half first.
///
pub fn children_cell_arbitrary_dim(d: usize, cell: &LatticeCell) -> [LatticeCell; 2]
{
    let mut upper = cell.clone();
    upper.levelvec[d] += 1;
    upper.index[d] = 2 * cell.index[d] + 1;
    let mut lower = upper.clone();
    lower.index[d] = 2 * cell.index[d];
    [upper, lower]
}

///
/// Parent of `cell` in dimension `d`, or `None` if `cell` is already on `lmin[d]`.
///
pub fn parent_cell_arbitrary_dim(d: usize, cell: &LatticeCell, lattice: &CellLattice) -> Option<LatticeCell>
{
    if cell.levelvec[d] <= lattice.lmin[d]
    {
        return None;
    }
    let mut parent = cell.clone();
    parent.levelvec[d] -= 1;
    let position = cell.index[d];
    parent.index[d] = if position % 2 == 1
    {
        // upper half: the parent starts one cell width further down
        (position - 1) / 2
    }
    else
    {
        // lower half: the parent ends one cell width further up
        position / 2
    };
    Some(parent)
}

///
/// Dimension-wise parents of `cell`.
///
pub fn get_parents(cell: &LatticeCell, lattice: &CellLattice) -> Vec<LatticeCell>
{
    (0..lattice.ndim()).filter_map(|d| parent_cell_arbitrary_dim(d, cell, lattice)).collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CellEntry
{
    pub active: bool,
    /// Every cell that has this cell among its dimension-wise parents.
    pub children: Vec<CellKey>,
}

///
/// Registry of all cells created during one refinement run, in creation
/// order. Cells are never dropped from it; refined cells stay as inactive
/// ancestors that gate the creation of their descendants.
///
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct CellRegistry
{
    lattice: CellLattice,
    cells: IndexMap<CellKey, CellEntry, FxBuildHasher>,
}

impl CellRegistry
{
    pub fn new(lattice: CellLattice) -> Self
    {
        Self { lattice, cells: IndexMap::default() }
    }

    pub fn lattice(&self) -> &CellLattice
    {
        &self.lattice
    }

    pub fn contains(&self, key: &CellKey) -> bool
    {
        self.cells.contains_key(key)
    }

    pub fn is_active(&self, key: &CellKey) -> Option<bool>
    {
        self.cells.get(key).map(|entry| entry.active)
    }

    pub fn len(&self) -> usize
    {
        self.cells.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.cells.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &CellKey>
    {
        self.cells.keys()
    }

    ///
    /// Cells registered with `key` as one of their parents, in creation order.
    ///
    pub fn children(&self, key: &CellKey) -> &[CellKey]
    {
        self.cells.get(key).map(|entry| entry.children.as_slice()).unwrap_or_default()
    }

    fn register(&mut self, key: CellKey, parents: &[CellKey]) -> Result<(), RefinementError>
    {
        if self.cells.contains_key(&key)
        {
            return Err(RefinementError::DuplicateCell);
        }
        for parent in parents
        {
            if let Some(entry) = self.cells.get_mut(parent)
            {
                entry.children.push(key.clone());
            }
        }
        self.cells.insert(key, CellEntry { active: true, children: Vec::new() });
        Ok(())
    }

    fn deactivate(&mut self, key: &CellKey)
    {
        if let Some(entry) = self.cells.get_mut(key)
        {
            entry.active = false;
        }
    }

    ///
    /// Tile the domain with the cells of level vector `lmin` and register them.
    ///
    pub fn root_cells(&mut self) -> Result<Vec<RefinementObjectCell>, RefinementError>
    {
        let levelvec = self.lattice.lmin.clone();
        let counts: Vec<u64> = levelvec.iter().map(|&l| 1u64 << l).collect();
        let total: u64 = counts.iter().product();
        let mut roots = Vec::with_capacity(total as usize);
        for i in 0..total
        {
            // last dimension runs fastest
            let mut rest = i;
            let mut index = vec![0; counts.len()];
            for d in (0..counts.len()).rev()
            {
                index[d] = rest % counts[d];
                rest /= counts[d];
            }
            roots.push(RefinementObjectCell::new(&LatticeCell { levelvec: levelvec.clone(), index }, self)?);
        }
        Ok(roots)
    }
}

///
/// Cell of the dimension-wise refinement. Refining a cell halves it along
/// every dimension in which all parents of the resulting child are
/// already refined.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementObjectCell
{
    pub start: Vec<f64>,
    pub end: Vec<f64>,
    pub(crate) state: ObjectState,
    cell: LatticeCell,
    /// `sum(levelvec) - dim + 1`
    pub level: i64,
    active: bool,
    lattice: CellLattice,
    pub parents: Vec<CellKey>,
}

impl RefinementObjectCell
{
    ///
    /// Create the cell at `cell` and register it.
    ///
    pub fn new(cell: &LatticeCell, registry: &mut CellRegistry) -> Result<Self, RefinementError>
    {
        let lattice = registry.lattice();
        let ndim = lattice.ndim();
        for found in [cell.levelvec.len(), cell.index.len()]
        {
            if found != ndim
            {
                return Err(RefinementError::DimensionMismatch { expected: ndim, found });
            }
        }
        for d in 0..ndim
        {
            if cell.levelvec[d] < lattice.lmin[d]
            {
                return Err(RefinementError::BelowMinimumLevel { dim: d, level: cell.levelvec[d], lmin: lattice.lmin[d] });
            }
        }
        let (start, end) = lattice.bounds(cell);
        validate_bounds(&start, &end)?;
        if let Some(dim) = (0..ndim).find(|&d| end[d] > lattice.b[d])
        {
            return Err(RefinementError::InvalidRegion { dim, start: start[dim], end: end[dim] });
        }
        let parents: Vec<CellKey> = get_parents(cell, lattice).iter().map(|parent| lattice.key(parent)).collect();
        let level = cell.levelvec.iter().map(|&l| l as i64).sum::<i64>() - ndim as i64 + 1;
        let lattice = lattice.clone();
        registry.register(CellKey::new(&start, &end), &parents)?;
        Ok(Self { start, end, state: ObjectState::default(), cell: cell.clone(), level, active: true, lattice, parents })
    }

    pub fn key(&self) -> CellKey
    {
        CellKey::new(&self.start, &self.end)
    }

    pub fn levelvec(&self) -> &[u32]
    {
        &self.cell.levelvec
    }

    pub fn lattice_cell(&self) -> &LatticeCell
    {
        &self.cell
    }

    pub fn lattice(&self) -> &CellLattice
    {
        &self.lattice
    }

    ///
    /// Dimensions in which the cell lies above `lmin` and so has a parent.
    ///
    pub fn parent_dims(&self) -> Vec<usize>
    {
        (0..self.ndim()).filter(|&d| self.cell.levelvec[d] > self.lattice.lmin[d]).collect()
    }

    ///
    /// Ancestor reached by coarsening the cell once along each of `dims`,
    /// or `None` if one of them is already on `lmin`.
    ///
    pub fn ancestor(&self, dims: &[usize]) -> Option<LatticeCell>
    {
        dims.iter().try_fold(self.cell.clone(), |cell, &d| parent_cell_arbitrary_dim(d, &cell, &self.lattice))
    }

    #[inline]
    pub fn ndim(&self) -> usize
    {
        self.start.len()
    }

    pub fn is_active(&self) -> bool
    {
        self.active
    }

    pub fn volume(&self) -> f64
    {
        volume(&self.start, &self.end)
    }

    pub fn contains(&self, point: &[f64]) -> bool
    {
        (0..self.ndim()).all(|d| self.start[d] <= point[d] && point[d] <= self.end[d])
    }

    pub fn is_corner(&self, point: &[f64]) -> bool
    {
        (0..self.ndim()).all(|d| point[d] == self.start[d] || point[d] == self.end[d])
    }

    ///
    /// The `2^dim` corners of the cell.
    ///
    pub fn corner_points(&self) -> Vec<Vec<f64>>
    {
        let ndim = self.ndim();
        (0..1usize << ndim).map(|i|
        {
            (0..ndim).map(|d| if (i >> d) & 1 == 0 { self.start[d] } else { self.end[d] }).collect()
        }).collect()
    }

    ///
    /// Halve the cell along `d` without checking parents. Halves that
    /// already exist are skipped.
    ///
    pub fn split_cell_arbitrary_dim(&self, d: usize, registry: &mut CellRegistry) -> Result<Vec<Self>, RefinementError>
    {
        let mut halves = Vec::new();
        for child in children_cell_arbitrary_dim(d, &self.cell)
        {
            if !registry.contains(&registry.lattice().key(&child))
            {
                halves.push(Self::new(&child, registry)?);
            }
        }
        Ok(halves)
    }
}

impl Refinable for RefinementObjectCell
{
    fn state(&self) -> &ObjectState
    {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState
    {
        &mut self.state
    }

    fn refine(&mut self, context: &mut RefinementContext) -> Result<RefineOutcome, RefinementError>
    {
        if !self.active
        {
            return Err(RefinementError::PreconditionViolation("cell is already refined"));
        }
        let registry = &mut *context.cells;
        if registry.lattice().ndim() != self.ndim()
        {
            return Err(RefinementError::DimensionMismatch { expected: self.ndim(), found: registry.lattice().ndim() });
        }
        self.active = false;
        registry.deactivate(&self.key());
        let lattice = registry.lattice().clone();
        let mut new_objects = Vec::new();
        for d in 0..self.ndim()
        {
            for candidate in children_cell_arbitrary_dim(d, &self.cell)
            {
                if registry.contains(&lattice.key(&candidate))
                {
                    continue;
                }
                let parents_refined = get_parents(&candidate, &lattice).iter()
                    .all(|parent| registry.is_active(&lattice.key(parent)) == Some(false));
                if parents_refined
                {
                    new_objects.push(Self::new(&candidate, registry)?.into());
                }
            }
        }
        log::debug!("cell {:?}..{:?} refined into {} children", self.start, self.end, new_objects.len());
        Ok(RefineOutcome::children(new_objects))
    }

    fn set_error(&mut self, error: f64)
    {
        let error = if !self.active
        {
            0.0
        }
        else if self.lattice.punish_depth
        {
            error * self.volume()
        }
        else
        {
            error
        };
        self.state.error = Some(error);
    }

    fn is_refinable(&self) -> bool
    {
        self.active
    }

    fn is_removable(&self) -> bool
    {
        false
    }
}

#[cfg(test)]
use crate::{grid::EquidistantMidpoint, objects::{extend_split::SplitFamilies, RefinementObject}};

#[cfg(test)]
fn refine_cell(cell: &mut RefinementObjectCell, registry: &mut CellRegistry) -> Result<Vec<RefinementObjectCell>, RefinementError>
{
    let mut families = SplitFamilies::default();
    let mut context = RefinementContext { grid: &EquidistantMidpoint, cells: registry, families: &mut families };
    let outcome = cell.refine(&mut context)?;
    assert!(outcome.lmax_update.is_none() && outcome.ripple.is_none());
    Ok(outcome.new_objects.into_iter().map(|object| match object
    {
        RefinementObject::Cell(cell) => cell,
        _ => panic!("expected a cell"),
    }).collect())
}

#[test]
fn root_cells_tile_the_domain()
{
    let lattice = CellLattice::new(&[0.0, 0.0], &[1.0, 2.0], &[1, 0]).unwrap();
    let mut registry = CellRegistry::new(lattice);
    let roots = registry.root_cells().unwrap();
    assert_eq!(roots.len(), 2);
    assert_eq!((roots[0].start.clone(), roots[0].end.clone()), (vec![0.0, 0.0], vec![0.5, 2.0]));
    assert_eq!((roots[1].start.clone(), roots[1].end.clone()), (vec![0.5, 0.0], vec![1.0, 2.0]));
    assert_eq!(roots[0].level, 0);
    assert!(roots[0].parents.is_empty());
    assert_eq!(registry.len(), 2);
}

#[test]
fn parent_resolution_uses_parity()
{
    let lattice = CellLattice::new(&[0.0], &[1.0], &[0]).unwrap();
    let upper = LatticeCell { levelvec: vec![2], index: vec![3] };
    let parent = parent_cell_arbitrary_dim(0, &upper, &lattice).unwrap();
    assert_eq!(lattice.bounds(&parent), (vec![0.5], vec![1.0]));
    let lower = LatticeCell { levelvec: vec![2], index: vec![2] };
    assert_eq!(parent_cell_arbitrary_dim(0, &lower, &lattice), Some(parent));
    let root = LatticeCell { levelvec: vec![0], index: vec![0] };
    assert_eq!(parent_cell_arbitrary_dim(0, &root, &lattice), None);
}

#[test]
fn refinement_is_gated_by_parents()
{
    let lattice = CellLattice::new(&[0.0, 0.0], &[1.0, 1.0], &[0, 0]).unwrap();
    let mut registry = CellRegistry::new(lattice);
    let mut root = registry.root_cells().unwrap().remove(0);
    let mut children = refine_cell(&mut root, &mut registry).unwrap();
    // both halves in x and both halves in y
    assert_eq!(children.len(), 4);
    assert!(!root.is_active());
    assert_eq!(registry.children(&root.key()).len(), 4);

    // children[0] is the right half [0.5,1]x[0,1] with levelvec (1,0)
    assert_eq!(children[0].levelvec(), &[1, 0]);
    // its y-halves also need the still active (0,1) cells as parents, so only x-halves appear
    let grandchildren = refine_cell(&mut children[0], &mut registry).unwrap();
    assert_eq!(grandchildren.len(), 2);
    assert!(grandchildren.iter().all(|c| c.levelvec() == [2, 0]));

    // refine the upper y-half; now the (1,1) child of [0.5,1]x[0.5,1] may appear
    let upper_y = children.iter_mut().find(|c| c.levelvec() == [0, 1] && c.start[1] == 0.5).unwrap();
    let grandchildren = refine_cell(upper_y, &mut registry).unwrap();
    let keys: Vec<_> = grandchildren.iter().map(|c| (c.start.clone(), c.end.clone(), c.levelvec().to_vec())).collect();
    assert!(keys.contains(&(vec![0.5, 0.5], vec![1.0, 1.0], vec![1, 1])));
    for cell in &grandchildren
    {
        for parent in &cell.parents
        {
            assert_eq!(registry.is_active(parent), Some(false));
        }
    }
}

#[test]
fn inactive_cell_cannot_be_refined_and_reports_zero_error()
{
    let lattice = CellLattice::new(&[0.0], &[1.0], &[0]).unwrap().with_punish_depth(true);
    let mut registry = CellRegistry::new(lattice);
    let mut root = registry.root_cells().unwrap().remove(0);
    root.set_error(0.3);
    assert_eq!(root.error(), Some(0.3));
    let children = refine_cell(&mut root, &mut registry).unwrap();
    assert_eq!(children.len(), 2);
    root.set_error(0.3);
    assert_eq!(root.error(), Some(0.0));
    assert!(!root.is_refinable());
    assert_eq!(refine_cell(&mut root, &mut registry).unwrap_err(), RefinementError::PreconditionViolation("cell is already refined"));
}

#[test]
fn cells_below_lmin_and_duplicates_are_rejected()
{
    let lattice = CellLattice::new(&[0.0], &[1.0], &[1]).unwrap();
    let mut registry = CellRegistry::new(lattice);
    let below = LatticeCell { levelvec: vec![0], index: vec![0] };
    assert_eq!(RefinementObjectCell::new(&below, &mut registry).unwrap_err(),
        RefinementError::BelowMinimumLevel { dim: 0, level: 0, lmin: 1 });
    let cell = LatticeCell { levelvec: vec![1], index: vec![1] };
    let created = RefinementObjectCell::new(&cell, &mut registry).unwrap();
    assert!(created.contains(&[0.75]) && created.is_corner(&[1.0]) && !created.is_corner(&[0.75]));
    assert_eq!(created.corner_points(), vec![vec![0.5], vec![1.0]]);
    assert_eq!(RefinementObjectCell::new(&cell, &mut registry).unwrap_err(), RefinementError::DuplicateCell);
    let outside = LatticeCell { levelvec: vec![1], index: vec![2] };
    assert!(matches!(RefinementObjectCell::new(&outside, &mut registry), Err(RefinementError::InvalidRegion { .. })));
}

#[test]
fn split_along_one_dimension()
{
    let lattice = CellLattice::new(&[0.0, 0.0], &[1.0, 1.0], &[0, 0]).unwrap();
    let mut registry = CellRegistry::new(lattice);
    let root = registry.root_cells().unwrap().remove(0);
    let halves = root.split_cell_arbitrary_dim(1, &mut registry).unwrap();
    assert_eq!(halves.len(), 2);
    assert!(root.split_cell_arbitrary_dim(1, &mut registry).unwrap().is_empty());
}

#[test]
fn children_are_linked_to_every_parent()
{
    let lattice = CellLattice::new(&[0.0, 0.0], &[1.0, 1.0], &[0, 0]).unwrap();
    let mut registry = CellRegistry::new(lattice);
    let mut root = registry.root_cells().unwrap().remove(0);
    let mut children = refine_cell(&mut root, &mut registry).unwrap();
    let (x_halves, y_halves): (Vec<_>, Vec<_>) = children.iter_mut().partition(|c| c.levelvec() == [1, 0]);
    let right = x_halves.into_iter().find(|c| c.start[0] == 0.5).unwrap();
    let top = y_halves.into_iter().find(|c| c.start[1] == 0.5).unwrap();
    refine_cell(right, &mut registry).unwrap();
    let grandchildren = refine_cell(top, &mut registry).unwrap();
    let corner = grandchildren.iter().find(|c| c.levelvec() == [1, 1] && c.start == vec![0.5, 0.5]).unwrap();
    // created by refining the top half, also recorded at the right half
    assert_eq!(corner.parents.len(), 2);
    assert!(registry.children(&right.key()).contains(&corner.key()));
    assert!(registry.children(&top.key()).contains(&corner.key()));
    assert!(registry.children(&corner.key()).is_empty());
}

#[test]
fn ancestors_follow_the_parent_dimensions()
{
    let lattice = CellLattice::new(&[0.0, 0.0], &[1.0, 1.0], &[0, 1]).unwrap();
    let mut registry = CellRegistry::new(lattice.clone());
    let cell = RefinementObjectCell::new(&LatticeCell { levelvec: vec![2, 2], index: vec![3, 0] }, &mut registry).unwrap();
    assert_eq!(cell.parent_dims(), vec![0, 1]);
    let ancestor = cell.ancestor(&[0, 1]).unwrap();
    assert_eq!(ancestor, LatticeCell { levelvec: vec![1, 1], index: vec![1, 0] });
    assert_eq!(lattice.bounds(&ancestor), (vec![0.5, 0.0], vec![1.0, 0.5]));
    let shallow = RefinementObjectCell::new(&LatticeCell { levelvec: vec![0, 1], index: vec![0, 1] }, &mut registry).unwrap();
    assert!(shallow.parent_dims().is_empty());
    assert_eq!(shallow.ancestor(&[1]), None);
}
