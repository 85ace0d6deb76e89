use serde::{Deserialize, Serialize};

use crate::{combination::CombinationScheme, containers::{meta_refinement_container::MetaRefinementContainer,
    refinement_container::RefinementContainer}, errors::RefinementError, objects::RefinementObject};
use super::{integration::RegionIntegrator, refinement::{CachedFunction, ErrorEstimator, Function, RefinementOptions}};

///
/// Summary of an adaptive run.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementReport
{
    /// Number of rounds in which at least one object was refined.
    pub iterations: usize,
    /// Distinct points at which the function was evaluated over the whole run.
    pub evaluations: usize,
    pub integral: f64,
    /// False if the run stopped on a budget.
    pub converged: bool,
}

///
/// Operations the driver loop needs from a container of refinement objects.
///
pub trait RefinementTarget
{
    type Position: Copy + std::fmt::Debug;

    fn integrate_new_objects(&mut self, integrate: &mut dyn FnMut(&mut RefinementObject) -> Result<(f64, usize), RefinementError>) -> Result<usize, RefinementError>;

    fn update_errors(&mut self, estimate: &dyn Fn(&RefinementObject) -> f64);

    fn next_candidate(&mut self, tolerance: f64) -> Option<Self::Position>;

    fn refine(&mut self, position: Self::Position) -> Result<Option<Vec<u32>>, RefinementError>;

    fn apply_remove(&mut self) -> Result<(), RefinementError>;

    fn reinit_new_objects(&mut self);

    fn refinement_postprocessing(&mut self);

    fn size(&self) -> usize;

    fn max_error(&self) -> f64;

    /// Current estimate of the integral over the whole domain.
    fn integral(&self) -> f64;
}

impl RefinementTarget for RefinementContainer
{
    type Position = usize;

    fn integrate_new_objects(&mut self, integrate: &mut dyn FnMut(&mut RefinementObject) -> Result<(f64, usize), RefinementError>) -> Result<usize, RefinementError>
    {
        RefinementContainer::integrate_new_objects(self, integrate)
    }

    fn update_errors(&mut self, estimate: &dyn Fn(&RefinementObject) -> f64)
    {
        RefinementContainer::update_errors(self, estimate);
    }

    fn next_candidate(&mut self, tolerance: f64) -> Option<usize>
    {
        self.get_next_object_for_refinement(tolerance).map(|(object_id, _)| object_id)
    }

    fn refine(&mut self, position: usize) -> Result<Option<Vec<u32>>, RefinementError>
    {
        RefinementContainer::refine(self, position)
    }

    fn apply_remove(&mut self) -> Result<(), RefinementError>
    {
        RefinementContainer::apply_remove(self)
    }

    fn reinit_new_objects(&mut self)
    {
        RefinementContainer::reinit_new_objects(self);
    }

    fn refinement_postprocessing(&mut self)
    {
        RefinementContainer::refinement_postprocessing(self);
    }

    fn size(&self) -> usize
    {
        RefinementContainer::size(self)
    }

    fn max_error(&self) -> f64
    {
        self.get_max_error()
    }

    fn integral(&self) -> f64
    {
        RefinementContainer::integral(self)
    }
}

impl RefinementTarget for MetaRefinementContainer
{
    type Position = (usize, usize);

    fn integrate_new_objects(&mut self, integrate: &mut dyn FnMut(&mut RefinementObject) -> Result<(f64, usize), RefinementError>) -> Result<usize, RefinementError>
    {
        MetaRefinementContainer::integrate_new_objects(self, integrate)
    }

    fn update_errors(&mut self, estimate: &dyn Fn(&RefinementObject) -> f64)
    {
        MetaRefinementContainer::update_errors(self, estimate);
    }

    fn next_candidate(&mut self, tolerance: f64) -> Option<(usize, usize)>
    {
        self.get_next_object_for_refinement(tolerance)
    }

    fn refine(&mut self, position: (usize, usize)) -> Result<Option<Vec<u32>>, RefinementError>
    {
        MetaRefinementContainer::refine(self, position)
    }

    fn apply_remove(&mut self) -> Result<(), RefinementError>
    {
        MetaRefinementContainer::apply_remove(self)
    }

    fn reinit_new_objects(&mut self)
    {
        MetaRefinementContainer::reinit_new_objects(self);
    }

    fn refinement_postprocessing(&mut self)
    {
        MetaRefinementContainer::refinement_postprocessing(self);
    }

    fn size(&self) -> usize
    {
        MetaRefinementContainer::size(self)
    }

    fn max_error(&self) -> f64
    {
        self.get_max_error()
    }

    /// Every dimension covers the whole domain, so the estimates are averaged.
    fn integral(&self) -> f64
    {
        match self.ndim()
        {
            0 => 0.0,
            ndim => MetaRefinementContainer::integral(self) / ndim as f64,
        }
    }
}

///
/// Reference driver loop: evaluate the objects of the last round, estimate
/// errors, refine every object at or above the tolerance (forwarding lmax
/// increases to the scheme) and remove the refined objects.
///
/// Function values are cached for the whole run, so each object is charged
/// only for the points it evaluated first.
///
pub struct SpatiallyAdaptiveDriver<'a>
{
    pub function: &'a dyn Function,
    pub estimator: &'a dyn ErrorEstimator,
    pub integrator: &'a dyn RegionIntegrator,
    pub options: RefinementOptions,
}

impl<'a> SpatiallyAdaptiveDriver<'a>
{
    pub fn new(function: &'a dyn Function, estimator: &'a dyn ErrorEstimator, integrator: &'a dyn RegionIntegrator, options: RefinementOptions) -> Self
    {
        Self { function, estimator, integrator, options }
    }

    pub fn run<C: RefinementTarget>(&self, container: &mut C, scheme: &mut dyn CombinationScheme) -> Result<RefinementReport, RefinementError>
    {
        let function = CachedFunction::new(self.function);
        let mut iterations = 0;
        let mut evaluations = 0;
        let converged = loop
        {
            let current_scheme: &dyn CombinationScheme = &*scheme;
            evaluations += container.integrate_new_objects(&mut |object|
            {
                let before = function.evaluations();
                let result = self.integrator.integrate(&function, current_scheme, object)?;
                Ok((result.integral, function.evaluations() - before))
            })?;
            container.update_errors(&|object| self.estimator.estimate(&function, object));
            log::info!("iteration {iterations}: {} objects, integral {}, max error {}", container.size(), container.integral(), container.max_error());

            if self.options.max_iterations.is_some_and(|max| iterations >= max)
            {
                log::warn!("stopping after {iterations} iterations without reaching tolerance {}", self.options.tolerance);
                break false;
            }
            if self.options.max_evaluations.is_some_and(|max| evaluations >= max)
            {
                log::warn!("stopping after {evaluations} evaluations without reaching tolerance {}", self.options.tolerance);
                break false;
            }

            container.reinit_new_objects();
            container.refinement_postprocessing();
            let mut refined = 0;
            while let Some(position) = container.next_candidate(self.options.tolerance)
            {
                if let Some(increase) = container.refine(position)?
                {
                    log::debug!("refining {position:?} raised lmax by {increase:?}");
                    scheme.update_lmax(&increase)?;
                }
                refined += 1;
            }
            if refined == 0
            {
                break true;
            }
            container.apply_remove()?;
            iterations += 1;
        };
        Ok(RefinementReport { iterations, evaluations, integral: container.integral(), converged })
    }
}

#[cfg(test)]
use crate::{combination::StandardScheme, containers::session::RefinementSession, objects::{cell::{CellLattice, CellRegistry},
    extend_split::{ExtendSplitOptions, RefinementObjectExtendSplit}}, refinement::surplus::SurplusEstimator, algorithms::integration::TrapezoidalIntegrator};

#[test]
fn bilinear_integrand_converges_after_split_and_extend()
{
    let f = |x: &[f64]| x[0] * x[1];
    let integrator = TrapezoidalIntegrator::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let driver = SpatiallyAdaptiveDriver::new(&f, &SurplusEstimator, &integrator, RefinementOptions::new(1e-2));
    let root = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], ExtendSplitOptions::default()).unwrap();
    let mut container = RefinementContainer::new(vec![root.into()], 2, RefinementSession::default()).unwrap();
    let mut scheme = StandardScheme::new(&[1, 1], &[1, 1]).unwrap();

    let report = driver.run(&mut container, &mut scheme).unwrap();
    assert!(report.converged);
    assert_eq!(report.iterations, 2);
    // 3x3 root, the 5x5 lattice of the four split children, then the
    // 9x5 and 5x9 grids of the extended regions minus their 5x5 overlap
    assert_eq!(report.evaluations, 9 + 16 + 40);
    assert_eq!(container.evaluations(), 40);
    assert!((report.integral - 0.25).abs() < 1e-14);
    assert_eq!(scheme.lmax(), &[2, 2]);
    assert_eq!(container.size(), 4);
    assert!(container.get_objects().iter().all(|o| o.as_extend_split().unwrap().coarsening_value == 0));
}

#[test]
fn iteration_budget_stops_the_run()
{
    let f = |x: &[f64]| (10.0 * x[0]).sin();
    let integrator = TrapezoidalIntegrator::new(&[0.0], &[1.0]).unwrap();
    let options = RefinementOptions { tolerance: 1e-12, max_iterations: Some(3), ..Default::default() };
    let driver = SpatiallyAdaptiveDriver::new(&f, &SurplusEstimator, &integrator, options);
    let root = RefinementObjectExtendSplit::new(&[0.0], &[1.0], ExtendSplitOptions::default()).unwrap();
    let mut container = RefinementContainer::new(vec![root.into()], 1, RefinementSession::default()).unwrap();
    let mut scheme = StandardScheme::new(&[1], &[1]).unwrap();
    let report = driver.run(&mut container, &mut scheme).unwrap();
    assert!(!report.converged);
    assert_eq!(report.iterations, 3);
}

#[test]
fn dimension_wise_run_averages_the_slabs()
{
    let f = |x: &[f64]| x[0] + x[1];
    let integrator = TrapezoidalIntegrator::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let options = RefinementOptions { tolerance: 0.3, ..Default::default() };
    let driver = SpatiallyAdaptiveDriver::new(&f, &SurplusEstimator, &integrator, options);
    let mut meta = MetaRefinementContainer::for_domain(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let mut scheme = StandardScheme::new(&[1, 1], &[1, 1]).unwrap();
    let report = driver.run(&mut meta, &mut scheme).unwrap();
    assert!(report.converged);
    assert!((report.integral - 1.0).abs() < 1e-14);
    assert!(meta.size() > 2);
}

#[test]
fn cell_run_counts_each_area_once()
{
    let one = |_: &[f64]| 1.0;
    let integrator = TrapezoidalIntegrator::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let options = RefinementOptions { tolerance: 0.0, max_iterations: Some(1), ..Default::default() };
    let driver = SpatiallyAdaptiveDriver::new(&one, &SurplusEstimator, &integrator, options);
    let mut cells = CellRegistry::new(CellLattice::new(&[0.0, 0.0], &[1.0, 1.0], &[0, 0]).unwrap());
    let roots: Vec<RefinementObject> = cells.root_cells().unwrap().into_iter().map(Into::into).collect();
    let mut container = RefinementContainer::new(roots, 2, RefinementSession::default().with_cells(cells)).unwrap();
    let mut scheme = StandardScheme::new(&[1, 1], &[1, 1]).unwrap();

    let report = driver.run(&mut container, &mut scheme).unwrap();
    assert!(!report.converged);
    assert_eq!(container.size(), 5);
    assert_eq!(report.integral, 1.0);
    // four root corners plus the four edge midpoints
    assert_eq!(report.evaluations, 8);
}

#[test]
fn adjacent_regions_share_their_edge_points()
{
    let calls = std::sync::atomic::AtomicUsize::new(0);
    let f = |x: &[f64]|
    {
        calls.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        x[0] * x[1]
    };
    let integrator = TrapezoidalIntegrator::new(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    let options = RefinementOptions { tolerance: 0.0, max_iterations: Some(0), ..Default::default() };
    let driver = SpatiallyAdaptiveDriver::new(&f, &SurplusEstimator, &integrator, options);
    let left = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[0.5, 1.0], ExtendSplitOptions::default()).unwrap();
    let right = RefinementObjectExtendSplit::new(&[0.5, 0.0], &[1.0, 1.0], ExtendSplitOptions::default()).unwrap();
    let mut container = RefinementContainer::new(vec![left.into(), right.into()], 2, RefinementSession::default()).unwrap();
    let mut scheme = StandardScheme::new(&[1, 1], &[1, 1]).unwrap();

    let report = driver.run(&mut container, &mut scheme).unwrap();
    // two 3x3 grids sharing the three points on x = 0.5
    assert_eq!(report.evaluations, 15);
    assert_eq!(calls.load(std::sync::atomic::Ordering::Relaxed), 15);
    assert_eq!(container.evaluations(), 15);
}
