use rayon::iter::{IntoParallelIterator, ParallelIterator};

use crate::{combination::CombinationScheme, errors::RefinementError, grid::BoundingBox,
    objects::{cell::RefinementObjectCell, extend_split::RefinementObjectExtendSplit, RefinementObject}};
use super::refinement::Function;

///
/// Local integral of one refinement object and the number of function
/// evaluations spent on it.
///
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegionIntegral
{
    pub integral: f64,
    pub evaluations: usize,
}

///
/// Computes the local integral of a refinement object under the current
/// combination scheme. Takes the object mutably so implementations can
/// maintain its level cache.
///
pub trait RegionIntegrator: Send + Sync
{
    fn integrate(&self, function: &dyn Function, scheme: &dyn CombinationScheme, object: &mut RefinementObject) -> Result<RegionIntegral, RefinementError>;
}

///
/// Lower `level` `coarsening` times, each time in the dimension with the
/// largest level that is still above `lmin`.
///
pub fn coarsen_level(level: &[u32], lmin: &[u32], coarsening: u32) -> Vec<u32>
{
    let mut coarsened = level.to_owned();
    for _ in 0..coarsening
    {
        let candidate = (0..coarsened.len())
            .filter(|&d| coarsened[d] > lmin[d])
            .fold(None, |best: Option<usize>, d| match best
            {
                Some(b) if coarsened[b] >= coarsened[d] => Some(b),
                _ => Some(d),
            });
        match candidate
        {
            Some(d) => coarsened[d] -= 1,
            None => break,
        }
    }
    coarsened
}

///
/// Tensor trapezoidal rule with `2^level[d] + 1` points per axis on
/// `start..end`. Points are evaluated in parallel.
///
pub fn trapezoidal_tensor(function: &dyn Function, start: &[f64], end: &[f64], level: &[u32]) -> RegionIntegral
{
    let ndim = start.len();
    let counts: Vec<usize> = level.iter().map(|&l| (1usize << l) + 1).collect();
    let steps: Vec<f64> = (0..ndim).map(|d| (end[d] - start[d]) / (1u64 << level[d]) as f64).collect();
    let total: usize = counts.iter().product();
    let integral: f64 = (0..total).into_par_iter().map(|i|
    {
        let mut rest = i;
        let mut x = vec![0.0; ndim];
        let mut weight = 1.0;
        // last dimension runs fastest
        for d in (0..ndim).rev()
        {
            let position = rest % counts[d];
            rest /= counts[d];
            x[d] = if position + 1 == counts[d] { end[d] } else { start[d] + position as f64 * steps[d] };
            weight *= if position == 0 || position + 1 == counts[d] { 0.5 * steps[d] } else { steps[d] };
        }
        weight * function.eval(&x)
    }).sum();
    RegionIntegral { integral, evaluations: total }
}

///
/// Multilinear interpolant of `function` through the corners of `start..end`,
/// evaluated at `x`.
///
pub fn multilinear_at(function: &dyn Function, start: &[f64], end: &[f64], x: &[f64]) -> f64
{
    let ndim = start.len();
    (0..1usize << ndim).into_par_iter().map(|corner|
    {
        let mut point = vec![0.0; ndim];
        let mut weight = 1.0;
        for d in 0..ndim
        {
            let t = (x[d] - start[d]) / (end[d] - start[d]);
            if (corner >> d) & 1 == 0
            {
                point[d] = start[d];
                weight *= 1.0 - t;
            }
            else
            {
                point[d] = end[d];
                weight *= t;
            }
        }
        weight * function.eval(&point)
    }).sum()
}

///
/// Hierarchical surplus of a cell: the trapezoid over its corners minus the
/// inclusion-exclusion combination of the interpolants of its ancestors,
/// all integrated over the cell. Summed over every cell of a refinement,
/// active or not, this gives the trapezoidal integral over the refined cells.
///
pub fn cell_surplus(function: &dyn Function, cell: &RefinementObjectCell) -> Result<RegionIntegral, RefinementError>
{
    let parent_dims = cell.parent_dims();
    // a multilinear function integrates to its value at the centre
    let centre: Vec<f64> = cell.start.iter().zip(&cell.end).map(|(s, e)| 0.5 * (s + e)).collect();
    let mut value = 0.0;
    let mut evaluations = 0;
    for subset in 0..1usize << parent_dims.len()
    {
        let dims: Vec<usize> = parent_dims.iter().enumerate().filter(|(i, _)| (subset >> i) & 1 == 1).map(|(_, &d)| d).collect();
        let ancestor = cell.ancestor(&dims).ok_or(RefinementError::PreconditionViolation("cell ancestor below lmin"))?;
        let (start, end) = cell.lattice().bounds(&ancestor);
        let interpolated = multilinear_at(function, &start, &end, &centre);
        value += if dims.len() % 2 == 0 { interpolated } else { -interpolated };
        evaluations += 1 << cell.ndim();
    }
    Ok(RegionIntegral { integral: value * cell.volume(), evaluations })
}

///
/// Reference integrator: every component grid of the scheme is a full
/// trapezoidal grid, coarsened by the coarsening value of the object.
///
#[derive(Debug, Clone)]
pub struct TrapezoidalIntegrator
{
    domain: BoundingBox,
}

impl TrapezoidalIntegrator
{
    pub fn new(a: &[f64], b: &[f64]) -> Result<Self, RefinementError>
    {
        Ok(Self { domain: BoundingBox::new(a, b)? })
    }

    pub fn domain(&self) -> &BoundingBox
    {
        &self.domain
    }

    ///
    /// Coarsened component grids with their coefficients. A coarsened grid
    /// belongs to the first component grid that produces it and keeps that
    /// coefficient; later duplicates contribute nothing. With a level cache
    /// the claims are recorded on the region.
    ///
    fn coarsened_grids(scheme: &dyn CombinationScheme, coarsening: u32, mut cache: Option<&mut RefinementObjectExtendSplit>) -> Vec<(Vec<u32>, f64)>
    {
        let mut grids: Vec<(Vec<u32>, f64)> = Vec::new();
        for component in scheme.component_grids()
        {
            let coarsened = coarsen_level(&component.level, scheme.lmin(), coarsening);
            let claimed = match cache.as_deref_mut()
            {
                Some(object) if object.is_already_calculated(&coarsened, &component.level) => true,
                Some(object) =>
                {
                    object.add_level(coarsened.clone(), component.level.clone());
                    false
                },
                None => grids.iter().any(|(level, _)| *level == coarsened),
            };
            if claimed
            {
                log::trace!("{:?} coarsens onto the already claimed {:?}", component.level, coarsened);
                continue;
            }
            grids.push((coarsened, component.coefficient));
        }
        grids
    }

    fn combine(function: &dyn Function, start: &[f64], end: &[f64], grids: &[(Vec<u32>, f64)]) -> RegionIntegral
    {
        grids.iter().filter(|(_, coefficient)| *coefficient != 0.0).fold(RegionIntegral { integral: 0.0, evaluations: 0 }, |sum, (level, coefficient)|
        {
            let tensor = trapezoidal_tensor(function, start, end, level);
            RegionIntegral { integral: sum.integral + coefficient * tensor.integral, evaluations: sum.evaluations + tensor.evaluations }
        })
    }
}

impl RegionIntegrator for TrapezoidalIntegrator
{
    fn integrate(&self, function: &dyn Function, scheme: &dyn CombinationScheme, object: &mut RefinementObject) -> Result<RegionIntegral, RefinementError>
    {
        let ndim = self.domain.ndim();
        match object
        {
            RefinementObject::ExtendSplit(region) =>
            {
                if region.ndim() != scheme.ndim()
                {
                    return Err(RefinementError::DimensionMismatch { expected: scheme.ndim(), found: region.ndim() });
                }
                let grids = Self::coarsened_grids(scheme, region.coarsening_value, Some(&mut *region));
                Ok(Self::combine(function, &region.start, &region.end, &grids))
            },
            RefinementObject::Cell(cell) =>
            {
                if cell.ndim() != ndim
                {
                    return Err(RefinementError::DimensionMismatch { expected: ndim, found: cell.ndim() });
                }
                cell_surplus(function, cell)
            },
            RefinementObject::SingleDimension(interval) =>
            {
                if interval.ndim != ndim || scheme.ndim() != ndim
                {
                    return Err(RefinementError::DimensionMismatch { expected: ndim, found: interval.ndim });
                }
                let mut start = self.domain.lower.clone();
                let mut end = self.domain.upper.clone();
                start[interval.axis] = interval.start;
                end[interval.axis] = interval.end;
                let grids = Self::coarsened_grids(scheme, interval.coarsening_level, None);
                Ok(Self::combine(function, &start, &end, &grids))
            },
        }
    }
}

#[cfg(test)]
use crate::{combination::StandardScheme, grid::EquidistantMidpoint, objects::{cell::{CellLattice, CellRegistry},
    extend_split::{ExtendSplitOptions, SplitFamilies}, single_dimension::RefinementObjectSingleDimension, Refinable, RefinementContext, RippleIncrement}};

#[test]
fn coarsening_lowers_largest_component_first()
{
    assert_eq!(coarsen_level(&[3, 1], &[1, 1], 1), vec![2, 1]);
    assert_eq!(coarsen_level(&[2, 3], &[1, 1], 2), vec![1, 2]);
    assert_eq!(coarsen_level(&[2, 2], &[1, 1], 5), vec![1, 1]);
    assert_eq!(coarsen_level(&[2, 2], &[2, 1], 1), vec![2, 1]);
}

#[test]
fn trapezoidal_rule_is_exact_for_bilinear_functions()
{
    let f = |x: &[f64]| x[0] * x[1];
    let result = trapezoidal_tensor(&f, &[0.0, 0.0], &[1.0, 2.0], &[1, 2]);
    assert_eq!(result.evaluations, 15);
    assert!((result.integral - 1.0).abs() < 1e-14);
    let result = trapezoidal_tensor(&|x: &[f64]| x[0] * x[0], &[0.0], &[1.0], &[1]);
    assert!((result.integral - 0.375).abs() < 1e-15);
}

#[test]
fn extend_split_region_uses_the_combination()
{
    let integrator = TrapezoidalIntegrator::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let scheme = StandardScheme::new(&[1, 1], &[2, 2]).unwrap();
    let f = |x: &[f64]| x[0] * x[1];
    let mut object: RefinementObject = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], ExtendSplitOptions::default()).unwrap().into();
    let result = integrator.integrate(&f, &scheme, &mut object).unwrap();
    assert_eq!(result.evaluations, 9 + 15 + 15);
    assert!((result.integral - 0.25).abs() < 1e-14);

    // every component grid collapses onto lmin and the first one claims it
    let mut coarse: RefinementObject = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], ExtendSplitOptions::default()).unwrap()
        .with_coarsening_value(1).into();
    let result = integrator.integrate(&f, &scheme, &mut coarse).unwrap();
    assert_eq!(result.evaluations, 9);
    assert!((result.integral - 0.25).abs() < 1e-14);
    let region = coarse.as_extend_split().unwrap();
    assert!(!region.is_already_calculated(&[1, 1], &[1, 2]));
    assert!(region.is_already_calculated(&[1, 1], &[2, 1]));
    assert!(region.is_already_calculated(&[1, 1], &[1, 1]));
}

#[test]
fn ripple_leaves_the_local_integral_unchanged()
{
    let integrator = TrapezoidalIntegrator::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let f = |x: &[f64]| (3.0 * x[0]).exp() * (2.0 * x[1]).cos() + 4.0;
    let mut scheme = StandardScheme::new(&[1, 1], &[2, 2]).unwrap();
    let mut object: RefinementObject = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], ExtendSplitOptions::default()).unwrap().into();
    let before = integrator.integrate(&f, &scheme, &mut object).unwrap();

    scheme.update_lmax(&[1, 1]).unwrap();
    object.update(RippleIncrement(1));
    let after = integrator.integrate(&f, &scheme, &mut object).unwrap();
    assert!((after.integral - before.integral).abs() < 1e-12);
    assert_eq!(after.evaluations, before.evaluations);
}

#[test]
fn cell_surpluses_sum_to_the_refined_trapezoid()
{
    let f = |x: &[f64]| x[0] * x[0];
    let mut cells = CellRegistry::new(CellLattice::new(&[0.0], &[1.0], &[0]).unwrap());
    let mut root = cells.root_cells().unwrap().remove(0);
    let first = cell_surplus(&f, &root).unwrap();
    assert_eq!(first.integral, 0.5);
    let mut families = SplitFamilies::default();
    let mut context = RefinementContext { grid: &EquidistantMidpoint, cells: &mut cells, families: &mut families };
    let children = root.refine(&mut context).unwrap().new_objects;
    assert_eq!(children.len(), 2);
    let mut total = first.integral;
    for child in &children
    {
        let surplus = cell_surplus(&f, child.as_cell().unwrap()).unwrap();
        assert_eq!(surplus.integral, -0.0625);
        assert_eq!(surplus.evaluations, 4);
        total += surplus.integral;
    }
    // trapezoid of x^2 with step 1/2
    assert_eq!(total, 0.375);
}

#[test]
fn cells_and_slabs_integrate_their_region()
{
    let integrator = TrapezoidalIntegrator::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let scheme = StandardScheme::new(&[1, 1], &[1, 1]).unwrap();
    let one = |_: &[f64]| 1.0;

    let mut cells = CellRegistry::new(CellLattice::new(&[0.0, 0.0], &[1.0, 1.0], &[1, 1]).unwrap());
    let mut cell: RefinementObject = cells.root_cells().unwrap().remove(0).into();
    let result = integrator.integrate(&one, &scheme, &mut cell).unwrap();
    assert_eq!(result.evaluations, 4);
    assert!((result.integral - 0.25).abs() < 1e-15);

    let mut slab: RefinementObject = RefinementObjectSingleDimension::new(0.0, 0.5, 1, 2, 0).unwrap().into();
    let result = integrator.integrate(&one, &scheme, &mut slab).unwrap();
    assert_eq!(result.evaluations, 9);
    assert!((result.integral - 0.5).abs() < 1e-15);
}
