use crate::{errors::RefinementError, grid::validate_bounds,
    objects::{single_dimension::RefinementObjectSingleDimension, RefinementObject, RippleIncrement}};
use super::{refinement_container::RefinementContainer, session::RefinementSession};

///
/// One [`RefinementContainer`] per dimension for dimension-wise refinement.
/// Objects are addressed by `(dimension, index)`.
///
pub struct MetaRefinementContainer
{
    refinement_containers: Vec<RefinementContainer>,
    search_dimension: usize,
}

impl MetaRefinementContainer
{
    pub fn new(refinement_containers: Vec<RefinementContainer>) -> Self
    {
        Self { refinement_containers, search_dimension: 0 }
    }

    ///
    /// One container per dimension, each holding the whole interval
    /// `a[d]..b[d]` at the resolution ceiling.
    ///
    pub fn for_domain(a: &[f64], b: &[f64]) -> Result<Self, RefinementError>
    {
        validate_bounds(a, b)?;
        let ndim = a.len();
        let containers = (0..ndim).map(|d|
        {
            let interval = RefinementObjectSingleDimension::new(a[d], b[d], d, ndim, 0)?;
            RefinementContainer::new(vec![interval.into()], ndim, RefinementSession::default())
        }).collect::<Result<Vec<_>, RefinementError>>()?;
        Ok(Self::new(containers))
    }

    pub fn get_containers(&self) -> &[RefinementContainer]
    {
        &self.refinement_containers
    }

    pub fn get_container(&self, dimension: usize) -> Result<&RefinementContainer, RefinementError>
    {
        self.refinement_containers.get(dimension).ok_or(RefinementError::InvalidIndex { index: dimension, len: self.ndim() })
    }

    pub fn get_container_mut(&mut self, dimension: usize) -> Result<&mut RefinementContainer, RefinementError>
    {
        let len = self.ndim();
        self.refinement_containers.get_mut(dimension).ok_or(RefinementError::InvalidIndex { index: dimension, len })
    }

    /// Number of dimensions, i.e. containers.
    pub fn ndim(&self) -> usize
    {
        self.refinement_containers.len()
    }

    /// Total number of objects over all dimensions.
    pub fn size(&self) -> usize
    {
        self.refinement_containers.iter().map(|c| c.size()).sum()
    }

    pub fn integral(&self) -> f64
    {
        self.refinement_containers.iter().map(|c| c.integral()).sum()
    }

    pub fn evaluations(&self) -> usize
    {
        self.refinement_containers.iter().map(|c| c.evaluations()).sum()
    }

    pub fn get_max_error(&self) -> f64
    {
        self.refinement_containers.iter().map(|c| c.get_max_error()).fold(0.0, f64::max)
    }

    pub fn get_total_error(&self) -> f64
    {
        self.refinement_containers.iter().map(|c| c.get_total_error()).sum()
    }

    pub fn set_error(&mut self, (dimension, object_id): (usize, usize), error: f64) -> Result<(), RefinementError>
    {
        self.get_container_mut(dimension)?.set_error(object_id, error)
    }

    pub fn set_integral(&mut self, (dimension, object_id): (usize, usize), integral: f64) -> Result<(), RefinementError>
    {
        self.get_container_mut(dimension)?.set_integral(object_id, integral)
    }

    pub fn set_evaluations(&mut self, (dimension, object_id): (usize, usize), evaluations: usize) -> Result<(), RefinementError>
    {
        self.get_container_mut(dimension)?.set_evaluations(object_id, evaluations)
    }

    pub fn integrate_new_objects<F>(&mut self, mut integrate: F) -> Result<usize, RefinementError>
    where F: FnMut(&mut RefinementObject) -> Result<(f64, usize), RefinementError>
    {
        let mut evaluations = 0;
        for container in &mut self.refinement_containers
        {
            evaluations += container.integrate_new_objects(&mut integrate)?;
        }
        Ok(evaluations)
    }

    pub fn update_errors<F: Fn(&RefinementObject) -> f64>(&mut self, estimate: F)
    {
        for container in &mut self.refinement_containers
        {
            container.update_errors(&estimate);
        }
    }

    ///
    /// Refine the object at `position`. An lmax increase raises the
    /// coarsening level of every object in the other dimensions as well.
    ///
    pub fn refine(&mut self, (dimension, object_id): (usize, usize)) -> Result<Option<Vec<u32>>, RefinementError>
    {
        let lmax_update = self.get_container_mut(dimension)?.refine(object_id)?;
        if lmax_update.is_some()
        {
            for (d, container) in self.refinement_containers.iter_mut().enumerate()
            {
                if d != dimension
                {
                    container.update_objects(RippleIncrement(1), None);
                }
            }
        }
        Ok(lmax_update)
    }

    ///
    /// Apply pending removals of every dimension. All containers are
    /// checked first, so on error no container is modified.
    ///
    pub fn apply_remove(&mut self) -> Result<(), RefinementError>
    {
        for container in &self.refinement_containers
        {
            container.validate_remove()?;
        }
        for container in &mut self.refinement_containers
        {
            container.apply_remove()?;
        }
        Ok(())
    }

    pub fn reinit_new_objects(&mut self)
    {
        self.refinement_containers.iter_mut().for_each(RefinementContainer::reinit_new_objects);
    }

    pub fn refinement_postprocessing(&mut self)
    {
        self.search_dimension = 0;
        self.refinement_containers.iter_mut().for_each(RefinementContainer::refinement_postprocessing);
    }

    ///
    /// Next candidate as `(dimension, index)`, scanning dimensions in order.
    ///
    pub fn get_next_object_for_refinement(&mut self, tolerance: f64) -> Option<(usize, usize)>
    {
        while self.search_dimension < self.ndim()
        {
            let dimension = self.search_dimension;
            if let Some((object_id, _)) = self.refinement_containers[dimension].get_next_object_for_refinement(tolerance)
            {
                return Some((dimension, object_id));
            }
            self.search_dimension += 1;
        }
        None
    }
}

#[cfg(test)]
fn coarsening_levels(meta: &MetaRefinementContainer, dimension: usize) -> Vec<u32>
{
    meta.get_container(dimension).unwrap().get_objects().iter()
        .map(|o| o.as_single_dimension().unwrap().coarsening_level).collect()
}

#[test]
fn ripple_crosses_dimensions()
{
    let mut meta = MetaRefinementContainer::for_domain(&[0.0, 0.0, 0.0], &[1.0, 2.0, 4.0]).unwrap();
    assert_eq!(meta.size(), 3);
    meta.set_error((1, 0), 1.0).unwrap();
    assert_eq!(meta.get_next_object_for_refinement(0.5), Some((1, 0)));
    assert_eq!(meta.get_next_object_for_refinement(0.5), None);

    let lmax = meta.refine((1, 0)).unwrap();
    assert_eq!(lmax, Some(vec![1, 1, 1]));
    meta.apply_remove().unwrap();
    assert_eq!(coarsening_levels(&meta, 0), vec![1]);
    assert_eq!(coarsening_levels(&meta, 1), vec![0, 0]);
    assert_eq!(coarsening_levels(&meta, 2), vec![1]);
    let halves: Vec<_> = meta.get_container(1).unwrap().get_objects().iter()
        .map(|o| o.as_single_dimension().unwrap()).map(|o| (o.start, o.end)).collect();
    assert_eq!(halves, vec![(0.0, 1.0), (1.0, 2.0)]);
    assert_eq!(meta.size(), 4);
}

#[test]
fn refining_below_ceiling_stays_local()
{
    let mut meta = MetaRefinementContainer::for_domain(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    meta.refine((0, 0)).unwrap();
    meta.apply_remove().unwrap();
    assert_eq!(coarsening_levels(&meta, 1), vec![1]);
    meta.reinit_new_objects();
    // the rippled interval is below the ceiling and halves quietly
    assert_eq!(meta.refine((1, 0)).unwrap(), None);
    meta.apply_remove().unwrap();
    assert_eq!(coarsening_levels(&meta, 0), vec![0, 0]);
    assert_eq!(coarsening_levels(&meta, 1), vec![0, 0]);
}

#[test]
fn aggregates_over_dimensions()
{
    let mut meta = MetaRefinementContainer::for_domain(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    meta.set_integral((0, 0), 0.5).unwrap();
    meta.set_integral((1, 0), 0.25).unwrap();
    meta.set_evaluations((0, 0), 3).unwrap();
    meta.set_error((0, 0), 0.1).unwrap();
    meta.set_error((1, 0), 0.3).unwrap();
    assert_eq!(meta.integral(), 0.75);
    assert_eq!(meta.evaluations(), 3);
    assert_eq!(meta.get_max_error(), 0.3);
    assert!((meta.get_total_error() - 0.4).abs() < 1e-15);
    assert_eq!(meta.set_error((2, 0), 1.0), Err(RefinementError::InvalidIndex { index: 2, len: 2 }));
}

#[test]
fn failed_removal_touches_no_dimension()
{
    let mut meta = MetaRefinementContainer::for_domain(&[0.0, 0.0], &[1.0, 1.0]).unwrap();
    meta.refine((0, 0)).unwrap();
    meta.get_container_mut(1).unwrap().prepare_remove(5);
    assert!(meta.apply_remove().is_err());
    assert_eq!(meta.get_container(0).unwrap().size(), 3);
}
