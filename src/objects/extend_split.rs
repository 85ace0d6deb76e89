use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::{errors::RefinementError, grid::{validate_bounds, volume}};
use super::{ObjectState, Refinable, RefineOutcome, RefinementContext, RippleIncrement};

///
/// Policy switches of the split/extend scheme.
///
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExtendSplitOptions
{
    /// Number of splits along a branch before it only extends (non-automatic policy).
    pub number_of_refinements_before_extend: u32,
    /// Decide between split and extend by comparing estimated gains.
    pub automatic_extend_split: bool,
    /// Weight errors by region volume and `2^coarsening_value`.
    pub punish_depth: bool,
}

impl Default for ExtendSplitOptions
{
    fn default() -> Self
    {
        Self { number_of_refinements_before_extend: 1, automatic_extend_split: false, punish_depth: false }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FamilyId(pub usize);

///
/// Integrals of the `2^dim` children produced by each split. Children and
/// their extend descendants refer to their family by id, so the data
/// survives the removal of the parent object from its container.
///
#[derive(Default, Debug, Clone, Serialize, Deserialize)]
pub struct SplitFamilies
{
    families: Vec<Vec<Option<f64>>>,
}

impl SplitFamilies
{
    pub fn create(&mut self, size: usize) -> FamilyId
    {
        self.families.push(vec![None; size]);
        FamilyId(self.families.len() - 1)
    }

    pub fn record(&mut self, family: FamilyId, slot: usize, integral: f64)
    {
        if let Some(slot) = self.families.get_mut(family.0).and_then(|f| f.get_mut(slot))
        {
            *slot = Some(integral);
        }
    }

    pub fn sibling_integrals(&self, family: FamilyId) -> Option<&[Option<f64>]>
    {
        self.families.get(family.0).map(|f| f.as_slice())
    }

    pub fn len(&self) -> usize
    {
        self.families.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.families.is_empty()
    }
}

///
/// Hyperrectangular region refined either by splitting it into `2^dim`
/// subregions or by extending the scheme (one more level in every
/// dimension) on the same region.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementObjectExtendSplit
{
    pub start: Vec<f64>,
    pub end: Vec<f64>,
    pub(crate) state: ObjectState,
    /// Number of scheme-wide lmax increases this region has not absorbed yet.
    pub coarsening_value: u32,
    /// Number of splits performed along this branch.
    pub need_extend_scheme: u32,
    pub options: ExtendSplitOptions,
    pub parent_integral: Option<f64>,
    pub extend_parent_integral: Option<f64>,
    pub split_parent_integral: Option<f64>,
    /// Fractional depth; extends add `0.5*sqrt(dim)`, splits add `0.25*sqrt(dim)`.
    pub depth: f64,
    /// `dim` for an extend child, 1 otherwise.
    pub factor: usize,
    /// Split family this object (or its extend ancestor) was created in.
    pub parent: Option<FamilyId>,
    pub(crate) sibling_slot: Option<usize>,
    /// Family of the children produced by splitting this object.
    pub children: Option<FamilyId>,
    error_extend: Option<f64>,
    error_split: Option<f64>,
    #[serde(skip)]
    levelvec_dict: FxHashMap<Vec<u32>, Vec<u32>>,
}

impl RefinementObjectExtendSplit
{
    ///
    /// Create a root region without refinement history.
    ///
    pub fn new(start: &[f64], end: &[f64], options: ExtendSplitOptions) -> Result<Self, RefinementError>
    {
        validate_bounds(start, end)?;
        Ok(Self
        {
            start: start.to_owned(),
            end: end.to_owned(),
            state: ObjectState::default(),
            coarsening_value: 0,
            need_extend_scheme: 0,
            options,
            parent_integral: None,
            extend_parent_integral: None,
            split_parent_integral: None,
            depth: 0.0,
            factor: 1,
            parent: None,
            sibling_slot: None,
            children: None,
            error_extend: None,
            error_split: None,
            levelvec_dict: FxHashMap::default(),
        })
    }

    pub fn with_coarsening_value(mut self, coarsening_value: u32) -> Self
    {
        self.coarsening_value = coarsening_value;
        self
    }

    #[inline]
    pub fn ndim(&self) -> usize
    {
        self.start.len()
    }

    pub fn volume(&self) -> f64
    {
        volume(&self.start, &self.end)
    }

    ///
    /// Fresh object on `start..end` inheriting the policy of `self`.
    ///
    fn derived(&self, start: Vec<f64>, end: Vec<f64>) -> Self
    {
        Self
        {
            start,
            end,
            state: ObjectState::default(),
            coarsening_value: self.coarsening_value,
            need_extend_scheme: self.need_extend_scheme,
            options: self.options,
            parent_integral: None,
            extend_parent_integral: None,
            split_parent_integral: None,
            depth: self.depth,
            factor: 1,
            parent: None,
            sibling_slot: None,
            children: None,
            error_extend: None,
            error_split: None,
            levelvec_dict: FxHashMap::default(),
        }
    }

    ///
    /// Estimated gains of extending and splitting, cached after the first call.
    /// A missing history on either side counts as an infinite gain.
    ///
    pub fn automatic_errors(&mut self, families: &SplitFamilies) -> Result<(f64, f64), RefinementError>
    {
        let ndim = self.ndim();
        let integral = self.integral().ok_or(RefinementError::PreconditionViolation("automatic extend/split requires the integral of the object"))?;
        let error_extend = match (self.error_extend, self.extend_parent_integral)
        {
            (Some(error), _) => error,
            (None, Some(extend_parent_integral)) => (extend_parent_integral - integral).abs() / ndim as f64,
            (None, None) => f64::INFINITY,
        };
        let error_split = match (self.error_split, self.parent)
        {
            (Some(error), _) => error,
            (None, Some(family)) =>
            {
                let siblings = families.sibling_integrals(family).ok_or(RefinementError::PreconditionViolation("unknown split family"))?;
                let num_children = 1usize << ndim;
                if siblings.len() != num_children || siblings.iter().any(Option::is_none)
                {
                    return Err(RefinementError::PreconditionViolation("all 2^dim split siblings need an integral"));
                }
                let sum_siblings: f64 = siblings.iter().flatten().sum();
                let split_parent_integral = self.split_parent_integral.ok_or(RefinementError::PreconditionViolation("split sibling without split parent integral"))?;
                (split_parent_integral - sum_siblings).abs() / (num_children as f64 * 2.0_f64.powf(self.depth * self.depth))
            },
            (None, None) => f64::INFINITY,
        };
        self.error_extend = Some(error_extend);
        self.error_split = Some(error_split);
        Ok((error_extend, error_split))
    }

    fn extend(&self) -> RefineOutcome
    {
        let ndim = self.ndim();
        let mut child = self.derived(self.start.clone(), self.end.clone());
        child.coarsening_value = self.coarsening_value.saturating_sub(1);
        child.parent_integral = self.integral();
        child.extend_parent_integral = self.integral();
        child.split_parent_integral = self.split_parent_integral;
        child.parent = self.parent;
        child.factor = ndim;
        child.depth = self.depth + 0.5 * (ndim as f64).sqrt();
        log::debug!("extend {:?}..{:?} (coarsening {})", self.start, self.end, self.coarsening_value);
        // at the resolution ceiling the whole scheme has to grow
        if self.coarsening_value == 0
        {
            RefineOutcome::with_ripple(vec![child.into()], ndim)
        }
        else
        {
            RefineOutcome::children(vec![child.into()])
        }
    }

    ///
    /// Bounds of the `2^dim` subregions around `midpoint`. Bit `d` of the
    /// child number selects the upper half in dimension `d`.
    ///
    fn sub_areas(&self, midpoint: &[f64]) -> Result<Vec<(Vec<f64>, Vec<f64>)>, RefinementError>
    {
        let ndim = self.ndim();
        (0..1usize << ndim).map(|i|
        {
            let mut start = vec![0.0; ndim];
            let mut end = vec![0.0; ndim];
            for d in 0..ndim
            {
                if (i >> d) & 1 == 0
                {
                    start[d] = self.start[d];
                    end[d] = midpoint[d];
                }
                else
                {
                    start[d] = midpoint[d];
                    end[d] = self.end[d];
                }
            }
            validate_bounds(&start, &end)?;
            Ok((start, end))
        }).collect()
    }

    ///
    /// Split the region into `2^dim` subregions at the grid's midpoints.
    ///
    pub fn split_area_arbitrary_dim(&mut self, context: &mut RefinementContext) -> Result<Vec<Self>, RefinementError>
    {
        let ndim = self.ndim();
        let midpoint = (0..ndim).map(|d| context.grid.mid_point(self.start[d], self.end[d], d)).collect::<Result<Vec<f64>, RefinementError>>()?;
        let sub_areas = self.sub_areas(&midpoint)?;
        let num_children = sub_areas.len();
        let family = context.families.create(num_children);
        self.children = Some(family);
        log::debug!("split {:?}..{:?} into {} children", self.start, self.end, num_children);
        Ok(sub_areas.into_iter().enumerate().map(|(slot, (start, end))|
        {
            let mut child = self.derived(start, end);
            child.parent_integral = self.integral().map(|integral| integral / num_children as f64);
            child.split_parent_integral = self.integral();
            child.parent = Some(family);
            child.sibling_slot = Some(slot);
            child.depth = self.depth + 0.25 * (ndim as f64).sqrt();
            child
        }).collect())
    }

    ///
    /// Remember that the component grid `levelvec` is evaluated on this
    /// region at the coarsened level `levelvec_coarsened`.
    ///
    pub fn add_level(&mut self, levelvec_coarsened: Vec<u32>, levelvec: Vec<u32>)
    {
        self.levelvec_dict.insert(levelvec_coarsened, levelvec);
    }

    ///
    /// True if `levelvec_coarsened` is already claimed by a component grid
    /// other than `levelvec`; its contribution must then be skipped.
    ///
    pub fn is_already_calculated(&self, levelvec_coarsened: &[u32], levelvec: &[u32]) -> bool
    {
        self.levelvec_dict.get(levelvec_coarsened).is_some_and(|full| full.as_slice() != levelvec)
    }

    pub fn clear_levels(&mut self)
    {
        self.levelvec_dict.clear();
    }
}

impl Refinable for RefinementObjectExtendSplit
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
        let extend = if self.options.automatic_extend_split
        {
            let (error_extend, error_split) = self.automatic_errors(context.families)?;
            log::trace!("extend error {error_extend}, split error {error_split}");
            error_extend > error_split
        }
        else
        {
            self.need_extend_scheme >= self.options.number_of_refinements_before_extend
        };
        if extend
        {
            return Ok(self.extend());
        }
        self.need_extend_scheme += 1;
        match self.split_area_arbitrary_dim(context)
        {
            Ok(children) => Ok(RefineOutcome::children(children.into_iter().map(Into::into).collect())),
            Err(error) =>
            {
                self.need_extend_scheme -= 1;
                Err(error)
            }
        }
    }

    fn set_error(&mut self, error: f64)
    {
        let error = if self.options.punish_depth
        {
            error * self.volume() * 2.0_f64.powi(self.coarsening_value as i32)
        }
        else
        {
            error
        };
        self.state.error = Some(error);
    }

    fn update(&mut self, ripple: RippleIncrement)
    {
        self.coarsening_value += ripple.0;
        self.levelvec_dict.clear();
    }
}

#[cfg(test)]
use crate::{grid::EquidistantMidpoint, objects::{cell::CellRegistry, RefinementObject}};

#[cfg(test)]
fn refine_with(object: &mut RefinementObjectExtendSplit, families: &mut SplitFamilies) -> Result<RefineOutcome, RefinementError>
{
    let mut cells = CellRegistry::default();
    let mut context = RefinementContext { grid: &EquidistantMidpoint, cells: &mut cells, families };
    object.refine(&mut context)
}

#[cfg(test)]
fn unwrap_extend_split(objects: Vec<RefinementObject>) -> Vec<RefinementObjectExtendSplit>
{
    objects.into_iter().map(|object| match object
    {
        RefinementObject::ExtendSplit(object) => object,
        _ => panic!("expected an extend/split object"),
    }).collect()
}

#[test]
fn split_then_extend_scenario()
{
    let mut families = SplitFamilies::default();
    let mut root = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], ExtendSplitOptions::default()).unwrap();
    root.set_integral(2.0);

    let outcome = refine_with(&mut root, &mut families).unwrap();
    assert!(outcome.lmax_update.is_none() && outcome.ripple.is_none());
    let children = unwrap_extend_split(outcome.new_objects);
    assert_eq!(children.len(), 4);
    assert_eq!(root.need_extend_scheme, 1);
    let bounds: Vec<_> = children.iter().map(|c| (c.start.clone(), c.end.clone())).collect();
    assert_eq!(bounds[0], (vec![0.0, 0.0], vec![0.5, 0.5]));
    assert_eq!(bounds[1], (vec![0.5, 0.0], vec![1.0, 0.5]));
    assert_eq!(bounds[2], (vec![0.0, 0.5], vec![0.5, 1.0]));
    assert_eq!(bounds[3], (vec![0.5, 0.5], vec![1.0, 1.0]));
    for child in &children
    {
        assert_eq!(child.parent_integral, Some(0.5));
        assert_eq!(child.split_parent_integral, Some(2.0));
        assert_eq!(child.coarsening_value, 0);
        assert_eq!(child.need_extend_scheme, 1);
        assert_eq!(child.parent, root.children);
    }

    let mut child = children[0].clone();
    child.set_integral(0.4);
    let outcome = refine_with(&mut child, &mut families).unwrap();
    assert_eq!(outcome.lmax_update, Some(vec![1, 1]));
    assert_eq!(outcome.ripple, Some(RippleIncrement(1)));
    let grandchildren = unwrap_extend_split(outcome.new_objects);
    assert_eq!(grandchildren.len(), 1);
    assert_eq!(grandchildren[0].start, child.start);
    assert_eq!(grandchildren[0].end, child.end);
    assert_eq!(grandchildren[0].coarsening_value, 0);
    assert_eq!(grandchildren[0].extend_parent_integral, Some(0.4));
    assert_eq!(grandchildren[0].factor, 2);
    assert!((grandchildren[0].depth - (0.25 + 0.5) * 2.0_f64.sqrt()).abs() < 1e-14);
}

#[test]
fn extend_below_ceiling_does_not_ripple()
{
    let mut families = SplitFamilies::default();
    let options = ExtendSplitOptions { number_of_refinements_before_extend: 0, ..Default::default() };
    let mut object = RefinementObjectExtendSplit::new(&[0.0], &[1.0], options).unwrap().with_coarsening_value(2);
    let outcome = refine_with(&mut object, &mut families).unwrap();
    assert!(outcome.lmax_update.is_none() && outcome.ripple.is_none());
    let children = unwrap_extend_split(outcome.new_objects);
    assert_eq!(children[0].coarsening_value, 1);
}

#[test]
fn automatic_policy_requires_all_sibling_integrals()
{
    let mut families = SplitFamilies::default();
    let options = ExtendSplitOptions { automatic_extend_split: true, ..Default::default() };
    let mut root = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], options).unwrap();
    root.set_integral(1.0);
    // no history at the root: split first
    let children = unwrap_extend_split(refine_with(&mut root, &mut families).unwrap().new_objects);
    assert_eq!(children.len(), 4);

    let mut first = children[0].clone();
    first.set_integral(0.25);
    families.record(first.parent.unwrap(), 0, 0.25);
    let result = refine_with(&mut first, &mut families);
    assert_eq!(result.unwrap_err(), RefinementError::PreconditionViolation("all 2^dim split siblings need an integral"));
    assert_eq!(first.need_extend_scheme, 1);
}

#[test]
fn automatic_policy_compares_extend_and_split_errors()
{
    let mut families = SplitFamilies::default();
    let options = ExtendSplitOptions { automatic_extend_split: true, ..Default::default() };
    let mut root = RefinementObjectExtendSplit::new(&[0.0], &[1.0], options).unwrap();
    root.set_integral(1.0);
    let children = unwrap_extend_split(refine_with(&mut root, &mut families).unwrap().new_objects);
    let family = children[0].parent.unwrap();
    families.record(family, 0, 0.6);
    families.record(family, 1, 0.6);

    // fresh split child has no extend history and extends
    let mut left = children[0].clone();
    left.set_integral(0.6);
    let outcome = refine_with(&mut left, &mut families).unwrap();
    assert_eq!(outcome.ripple, Some(RippleIncrement(1)));
    let mut extended = unwrap_extend_split(outcome.new_objects).remove(0);
    assert_eq!(extended.parent, Some(family));
    assert_eq!(extended.split_parent_integral, Some(1.0));

    // extend gain |0.6 - 0.61| / 1 = 0.01
    // split gain |1.0 - 1.2| / (2 * 2^(0.75^2)) ~ 0.068
    extended.set_integral(0.61);
    let (error_extend, error_split) = extended.automatic_errors(&families).unwrap();
    assert!((error_extend - 0.01).abs() < 1e-12);
    assert!((error_split - 0.2 / (2.0 * 2.0_f64.powf(0.5625))).abs() < 1e-12);
    let outcome = refine_with(&mut extended, &mut families).unwrap();
    assert_eq!(outcome.new_objects.len(), 2);
}

#[test]
fn punish_depth_weights_error()
{
    let options = ExtendSplitOptions { punish_depth: true, ..Default::default() };
    let mut object = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[0.5, 0.5], options).unwrap().with_coarsening_value(2);
    object.set_error(1.0);
    assert_eq!(object.error(), Some(1.0));
}

#[test]
fn update_clears_level_cache()
{
    let mut object = RefinementObjectExtendSplit::new(&[0.0], &[1.0], ExtendSplitOptions::default()).unwrap();
    object.add_level(vec![2], vec![3]);
    assert!(object.is_already_calculated(&[2], &[4]));
    assert!(!object.is_already_calculated(&[2], &[3]));
    object.update(RippleIncrement(1));
    assert_eq!(object.coarsening_value, 1);
    assert!(!object.is_already_calculated(&[2], &[4]));
}

#[test]
fn degenerate_region_is_rejected()
{
    let result = RefinementObjectExtendSplit::new(&[0.0, 1.0], &[1.0, 0.5], ExtendSplitOptions::default());
    assert!(matches!(result, Err(RefinementError::InvalidRegion { dim: 1, .. })));
}

#[cfg(test)]
proptest::proptest!
{
    #[test]
    fn split_partitions_parent(ndim in 1usize..4, lower in -10.0f64..10.0, width in 0.01f64..5.0)
    {
        let start = vec![lower; ndim];
        let end = vec![lower + width; ndim];
        let mut parent = RefinementObjectExtendSplit::new(&start, &end, ExtendSplitOptions::default()).unwrap();
        let mut families = SplitFamilies::default();
        let children = unwrap_extend_split(refine_with(&mut parent, &mut families).unwrap().new_objects);
        proptest::prop_assert_eq!(children.len(), 1 << ndim);
        let total: f64 = children.iter().map(|c| c.volume()).sum();
        proptest::prop_assert!((total - parent.volume()).abs() <= 1e-12 * parent.volume());
        for (i, a) in children.iter().enumerate()
        {
            for b in &children[i + 1..]
            {
                // disjoint interiors: separated in at least one dimension
                let separated = (0..ndim).any(|d| a.end[d] <= b.start[d] || b.end[d] <= a.start[d]);
                proptest::prop_assert!(separated);
            }
        }
    }
}

#[test]
fn split_without_a_midpoint_rule_fails_cleanly()
{
    use crate::grid::{MidpointRule, MixedMidpoint};
    let rules: Vec<Box<MidpointRule>> = vec![Box::new(|a, b| (a + b) / 2.0)];
    let grid = MixedMidpoint::new(rules);
    let mut cells = CellRegistry::default();
    let mut families = SplitFamilies::default();
    let mut context = RefinementContext { grid: &grid, cells: &mut cells, families: &mut families };
    let mut object = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], ExtendSplitOptions::default()).unwrap();
    assert_eq!(object.refine(&mut context).unwrap_err(), RefinementError::DimensionMismatch { expected: 2, found: 1 });
    assert_eq!(object.need_extend_scheme, 0);
}
