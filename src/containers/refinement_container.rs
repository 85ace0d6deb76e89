use crate::{checkpoint::ContainerSnapshot, errors::RefinementError, grid::MidpointProvider,
    objects::{Refinable, RefinementObject, RippleIncrement}};
use super::session::RefinementSession;

///
/// Ordered set of live refinement objects of one scheme together with the
/// global integral and evaluation accumulators.
///
/// Refinement happens in rounds. During a round, objects refined by
/// [`RefinementContainer::refine`] are only marked for removal and their
/// children are appended behind `start_new_objects`, so indices of the
/// objects present at the start of the round stay valid until
/// [`RefinementContainer::apply_remove`].
///
pub struct RefinementContainer
{
    refinement_objects: Vec<RefinementObject>,
    ndim: usize,
    evaluationstotal: usize,
    integral: f64,
    start_new_objects: usize,
    pop_array: Vec<usize>,
    search_position: usize,
    session: RefinementSession,
}

impl RefinementContainer
{
    ///
    /// Create a container from its initial objects. Integrals and
    /// evaluations already set on them are added to the accumulators.
    /// Objects of another dimension than `ndim` are rejected.
    ///
    pub fn new(initial_objects: Vec<RefinementObject>, ndim: usize, session: RefinementSession) -> Result<Self, RefinementError>
    {
        if let Some(object) = initial_objects.iter().find(|o| o.ndim() != ndim)
        {
            return Err(RefinementError::DimensionMismatch { expected: ndim, found: object.ndim() });
        }
        let integral = initial_objects.iter().map(|o| o.integral().unwrap_or(0.0)).sum();
        let evaluationstotal = initial_objects.iter().map(|o| o.evaluations()).sum();
        Ok(Self
        {
            refinement_objects: initial_objects,
            ndim,
            evaluationstotal,
            integral,
            start_new_objects: 0,
            pop_array: Vec::new(),
            search_position: 0,
            session,
        })
    }

    pub fn get_objects(&self) -> &[RefinementObject]
    {
        &self.refinement_objects
    }

    pub fn get_object(&self, object_id: usize) -> Result<&RefinementObject, RefinementError>
    {
        self.refinement_objects.get(object_id).ok_or(RefinementError::InvalidIndex { index: object_id, len: self.size() })
    }

    fn get_object_mut(&mut self, object_id: usize) -> Result<&mut RefinementObject, RefinementError>
    {
        let len = self.size();
        self.refinement_objects.get_mut(object_id).ok_or(RefinementError::InvalidIndex { index: object_id, len })
    }

    ///
    /// Objects appended since the current round started.
    ///
    pub fn get_new_objects(&self) -> &[RefinementObject]
    {
        &self.refinement_objects[self.start_new_objects.min(self.size())..]
    }

    pub fn size(&self) -> usize
    {
        self.refinement_objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.refinement_objects.is_empty()
    }

    pub fn ndim(&self) -> usize
    {
        self.ndim
    }

    pub fn integral(&self) -> f64
    {
        self.integral
    }

    pub fn evaluations(&self) -> usize
    {
        self.evaluationstotal
    }

    pub fn session(&self) -> &RefinementSession
    {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut RefinementSession
    {
        &mut self.session
    }

    pub fn get_error(&self, object_id: usize) -> Result<Option<f64>, RefinementError>
    {
        Ok(self.get_object(object_id)?.error())
    }

    pub fn set_error(&mut self, object_id: usize, error: f64) -> Result<(), RefinementError>
    {
        self.get_object_mut(object_id)?.set_error(error);
        Ok(())
    }

    ///
    /// Largest error of all objects; 0 if no error is set yet.
    ///
    pub fn get_max_error(&self) -> f64
    {
        self.refinement_objects.iter().filter_map(|o| o.error()).fold(0.0, f64::max)
    }

    pub fn get_total_error(&self) -> f64
    {
        self.refinement_objects.iter().filter_map(|o| o.error()).sum()
    }

    ///
    /// Set the local integral of an object. The global integral changes by
    /// the difference to the previous value.
    ///
    pub fn set_integral(&mut self, object_id: usize, integral: f64) -> Result<(), RefinementError>
    {
        let len = self.size();
        let object = self.refinement_objects.get_mut(object_id).ok_or(RefinementError::InvalidIndex { index: object_id, len })?;
        let previous = object.integral().unwrap_or(0.0);
        object.set_integral(integral);
        if let Some((family, slot)) = object.family_slot()
        {
            self.session.families.record(family, slot, integral);
        }
        self.integral += integral - previous;
        Ok(())
    }

    pub fn set_evaluations(&mut self, object_id: usize, evaluations: usize) -> Result<(), RefinementError>
    {
        let object = self.get_object_mut(object_id)?;
        let previous = object.evaluations();
        object.set_evaluations(evaluations);
        self.evaluationstotal = self.evaluationstotal + evaluations - previous;
        Ok(())
    }

    ///
    /// Run `integrate` on every object added since the current round
    /// started that has no integral yet, and store the returned integral and
    /// evaluation count. Returns the number of evaluations spent.
    ///
    pub fn integrate_new_objects<F>(&mut self, mut integrate: F) -> Result<usize, RefinementError>
    where F: FnMut(&mut RefinementObject) -> Result<(f64, usize), RefinementError>
    {
        let mut evaluations = 0;
        for object_id in self.start_new_objects.min(self.size())..self.size()
        {
            if self.refinement_objects[object_id].integral().is_some()
            {
                continue;
            }
            let (integral, count) = integrate(&mut self.refinement_objects[object_id])?;
            self.set_integral(object_id, integral)?;
            self.set_evaluations(object_id, count)?;
            evaluations += count;
        }
        Ok(evaluations)
    }

    ///
    /// Store `estimate(object)` as the error of every object.
    ///
    pub fn update_errors<F: Fn(&RefinementObject) -> f64>(&mut self, estimate: F)
    {
        for object in &mut self.refinement_objects
        {
            let error = estimate(object);
            object.set_error(error);
        }
    }

    ///
    /// Refine the object at `object_id`. Returns the lmax increase the
    /// caller has to forward to the combination scheme, if any.
    ///
    pub fn refine(&mut self, object_id: usize) -> Result<Option<Vec<u32>>, RefinementError>
    {
        let len = self.size();
        if self.pop_array.contains(&object_id)
        {
            return Err(RefinementError::PreconditionViolation("object was already refined in this round"));
        }
        let object = self.refinement_objects.get_mut(object_id).ok_or(RefinementError::InvalidIndex { index: object_id, len })?;
        let outcome = object.refine(&mut self.session.context())?;
        let removable = object.is_removable();
        if self.start_new_objects == 0
        {
            self.start_new_objects = len;
        }
        if let Some(ripple) = outcome.ripple
        {
            self.update_objects(ripple, Some(object_id));
        }
        if removable
        {
            self.prepare_remove(object_id);
        }
        log::debug!("object {object_id} refined into {} new objects", outcome.new_objects.len());
        self.add(outcome.new_objects);
        Ok(outcome.lmax_update)
    }

    ///
    /// Apply a ripple to every object except `except`.
    ///
    pub fn update_objects(&mut self, ripple: RippleIncrement, except: Option<usize>)
    {
        log::debug!("rippling coarsening increase {} to {} objects", ripple.0, self.size() - usize::from(except.is_some()));
        for (position, object) in self.refinement_objects.iter_mut().enumerate()
        {
            if Some(position) != except
            {
                object.update(ripple);
            }
        }
    }

    pub fn prepare_remove(&mut self, object_id: usize)
    {
        self.pop_array.push(object_id);
    }

    pub fn add(&mut self, new_objects: Vec<RefinementObject>)
    {
        for object in new_objects
        {
            self.integral += object.integral().unwrap_or(0.0);
            self.evaluationstotal += object.evaluations();
            self.refinement_objects.push(object);
        }
    }

    pub(crate) fn validate_remove(&self) -> Result<Vec<usize>, RefinementError>
    {
        let mut positions = self.pop_array.clone();
        positions.sort_unstable_by(|a, b| b.cmp(a));
        if positions.windows(2).any(|w| w[0] == w[1])
        {
            return Err(RefinementError::PreconditionViolation("object marked for removal twice"));
        }
        if let Some(&index) = positions.first().filter(|&&index| index >= self.size())
        {
            return Err(RefinementError::InvalidIndex { index, len: self.size() });
        }
        Ok(positions)
    }

    ///
    /// Remove all objects marked during the round. On error nothing is removed.
    ///
    pub fn apply_remove(&mut self) -> Result<(), RefinementError>
    {
        // descending, so that earlier positions stay valid
        for position in self.validate_remove()?
        {
            if position < self.start_new_objects
            {
                self.start_new_objects -= 1;
            }
            let removed = self.refinement_objects.remove(position);
            self.integral -= removed.integral().unwrap_or(0.0);
            self.evaluationstotal -= removed.evaluations();
        }
        self.pop_array.clear();
        Ok(())
    }

    pub fn reinit_new_objects(&mut self)
    {
        self.start_new_objects = 0;
    }

    pub fn clear_new_objects(&mut self)
    {
        self.start_new_objects = self.size();
    }

    ///
    /// Start a fresh scanning pass.
    ///
    pub fn refinement_postprocessing(&mut self)
    {
        self.search_position = 0;
    }

    ///
    /// Next object at or after the scan cursor whose error reaches
    /// `tolerance`. Objects added during the current round are not visited
    /// before the next round.
    ///
    pub fn get_next_object_for_refinement(&mut self, tolerance: f64) -> Option<(usize, &RefinementObject)>
    {
        let end = if self.start_new_objects == 0 { self.size() } else { self.start_new_objects };
        let position = (self.search_position..end).find(|&i|
        {
            let object = &self.refinement_objects[i];
            object.is_refinable() && object.error().is_some_and(|error| error >= tolerance)
        })?;
        self.search_position = position + 1;
        log::trace!("next candidate {position} with error {:?}", self.refinement_objects[position].error());
        Some((position, &self.refinement_objects[position]))
    }

    ///
    /// Capture the full state of the container except the midpoint provider.
    ///
    pub fn snapshot(&self) -> ContainerSnapshot
    {
        ContainerSnapshot
        {
            refinement_objects: self.refinement_objects.clone(),
            ndim: self.ndim,
            evaluationstotal: self.evaluationstotal,
            integral: self.integral,
            start_new_objects: self.start_new_objects,
            pop_array: self.pop_array.clone(),
            search_position: self.search_position,
            cells: self.session.cells.clone(),
            families: self.session.families.clone(),
        }
    }

    pub fn from_snapshot(snapshot: ContainerSnapshot, grid: Box<dyn MidpointProvider>) -> Self
    {
        Self
        {
            refinement_objects: snapshot.refinement_objects,
            ndim: snapshot.ndim,
            evaluationstotal: snapshot.evaluationstotal,
            integral: snapshot.integral,
            start_new_objects: snapshot.start_new_objects,
            pop_array: snapshot.pop_array,
            search_position: snapshot.search_position,
            session: RefinementSession::from_parts(grid, snapshot.cells, snapshot.families),
        }
    }
}

#[cfg(test)]
use crate::objects::{cell::{CellLattice, CellRegistry}, extend_split::{ExtendSplitOptions, RefinementObjectExtendSplit}};

#[cfg(test)]
fn unit_square_container(options: ExtendSplitOptions) -> RefinementContainer
{
    let root = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], options).unwrap();
    RefinementContainer::new(vec![root.into()], 2, RefinementSession::default()).unwrap()
}

#[cfg(test)]
fn live_integral(container: &RefinementContainer) -> f64
{
    container.get_objects().iter().map(|o| o.integral().unwrap_or(0.0)).sum()
}

#[test]
fn split_extend_round_trip_keeps_accumulators()
{
    let mut container = unit_square_container(ExtendSplitOptions::default());
    container.set_integral(0, 1.0).unwrap();
    container.set_evaluations(0, 9).unwrap();
    container.set_error(0, 1.0).unwrap();

    let (id, _) = container.get_next_object_for_refinement(0.5).unwrap();
    assert_eq!(container.refine(id).unwrap(), None);
    assert_eq!(container.size(), 5);
    assert_eq!(container.get_new_objects().len(), 4);
    // children are not candidates in the round they were created in
    assert!(container.get_next_object_for_refinement(0.0).is_none());
    container.apply_remove().unwrap();
    assert_eq!(container.size(), 4);
    assert_eq!(container.integral(), 0.0);
    assert_eq!(container.evaluations(), 0);

    for (i, value) in [0.2, 0.3, 0.25, 0.26].into_iter().enumerate()
    {
        container.set_integral(i, value).unwrap();
        container.set_evaluations(i, 9).unwrap();
    }
    assert!((container.integral() - live_integral(&container)).abs() < 1e-12);
    assert_eq!(container.evaluations(), 36);

    // first child now extends at the ceiling: lmax grows, siblings absorb the ripple
    container.reinit_new_objects();
    container.refinement_postprocessing();
    container.set_error(0, 1.0).unwrap();
    let lmax = container.refine(0).unwrap();
    assert_eq!(lmax, Some(vec![1, 1]));
    container.apply_remove().unwrap();
    let coarsening: Vec<u32> = container.get_objects().iter().map(|o| o.as_extend_split().unwrap().coarsening_value).collect();
    assert_eq!(coarsening, vec![1, 1, 1, 0]);
    assert!((container.integral() - live_integral(&container)).abs() < 1e-12);
    assert_eq!(container.evaluations(), 27);
}

#[test]
fn scan_visits_each_object_once_per_pass()
{
    let mut container = RefinementContainer::new(Vec::new(), 1, RefinementSession::default()).unwrap();
    let objects: Vec<RefinementObject> = (0..5).map(|i|
    {
        RefinementObjectExtendSplit::new(&[i as f64], &[i as f64 + 1.0], ExtendSplitOptions::default()).unwrap().into()
    }).collect();
    container.add(objects);
    for (i, error) in [0.5, 0.01, 0.7, 0.2, 0.9].into_iter().enumerate()
    {
        container.set_error(i, error).unwrap();
    }
    let mut visited = Vec::new();
    while let Some((position, object)) = container.get_next_object_for_refinement(0.3)
    {
        assert!(object.error().unwrap() >= 0.3);
        visited.push(position);
    }
    assert_eq!(visited, vec![0, 2, 4]);
    container.refinement_postprocessing();
    assert_eq!(container.get_next_object_for_refinement(0.3).map(|(p, _)| p), Some(0));
}

#[test]
fn removal_keeps_new_object_boundary()
{
    let mut container = RefinementContainer::new(Vec::new(), 1, RefinementSession::default()).unwrap();
    container.add((0..3).map(|i| RefinementObjectExtendSplit::new(&[i as f64], &[i as f64 + 1.0], ExtendSplitOptions::default()).unwrap().into()).collect());
    for i in 0..3
    {
        container.set_integral(i, 1.0).unwrap();
        container.set_error(i, 1.0).unwrap();
    }
    container.refine(2).unwrap();
    container.refine(0).unwrap();
    assert_eq!(container.size(), 7);
    container.apply_remove().unwrap();
    // one old object survives, followed by the four new ones
    assert_eq!(container.size(), 5);
    assert_eq!(container.get_new_objects().len(), 4);
    assert_eq!(container.get_objects()[0].as_extend_split().unwrap().start, vec![1.0]);
    assert_eq!(container.integral(), 1.0);
}

#[test]
fn failed_removal_leaves_accumulators_untouched()
{
    let mut container = unit_square_container(ExtendSplitOptions::default());
    container.set_integral(0, 1.0).unwrap();
    container.prepare_remove(0);
    container.prepare_remove(0);
    assert!(matches!(container.apply_remove(), Err(RefinementError::PreconditionViolation(_))));
    assert_eq!(container.integral(), 1.0);
    assert_eq!(container.size(), 1);

    let mut container = unit_square_container(ExtendSplitOptions::default());
    container.prepare_remove(3);
    assert_eq!(container.apply_remove(), Err(RefinementError::InvalidIndex { index: 3, len: 1 }));
}

#[test]
fn refining_twice_in_one_round_is_rejected()
{
    let mut container = unit_square_container(ExtendSplitOptions::default());
    container.set_integral(0, 1.0).unwrap();
    container.refine(0).unwrap();
    assert!(matches!(container.refine(0), Err(RefinementError::PreconditionViolation(_))));
    assert_eq!(container.refine(9), Err(RefinementError::InvalidIndex { index: 9, len: 5 }));
}

#[test]
fn cells_stay_in_the_container()
{
    let lattice = CellLattice::new(&[0.0], &[1.0], &[0]).unwrap();
    let mut cells = CellRegistry::new(lattice);
    let roots: Vec<RefinementObject> = cells.root_cells().unwrap().into_iter().map(Into::into).collect();
    let mut container = RefinementContainer::new(roots, 1, RefinementSession::default().with_cells(cells)).unwrap();
    container.set_error(0, 1.0).unwrap();
    container.refine(0).unwrap();
    container.apply_remove().unwrap();
    assert_eq!(container.size(), 3);
    assert!(!container.get_object(0).unwrap().is_refinable());
    assert_eq!(container.session().cells().len(), 3);

    // inactive cells are skipped even with zero tolerance
    container.reinit_new_objects();
    container.refinement_postprocessing();
    for i in 0..3
    {
        container.set_error(i, 0.0).unwrap();
    }
    assert_eq!(container.get_next_object_for_refinement(0.0).map(|(p, _)| p), Some(1));
}

#[cfg(test)]
proptest::proptest!
{
    #[test]
    fn accumulator_matches_live_objects(integrals in proptest::collection::vec(-10.0f64..10.0, 8), picks in proptest::collection::vec(0usize..4, 1..4))
    {
        let mut container = unit_square_container(ExtendSplitOptions::default());
        container.set_integral(0, integrals[0]).unwrap();
        container.refine(0).unwrap();
        container.apply_remove().unwrap();
        container.reinit_new_objects();
        for i in 0..container.size()
        {
            container.set_integral(i, integrals[i + 1]).unwrap();
        }
        let mut picks = picks;
        picks.sort_unstable();
        picks.dedup();
        for &pick in &picks
        {
            container.refine(pick).unwrap();
        }
        for i in 0..container.size()
        {
            if container.get_object(i).unwrap().integral().is_none()
            {
                container.set_integral(i, integrals[(i + 5) % 8]).unwrap();
            }
        }
        container.apply_remove().unwrap();
        proptest::prop_assert!((container.integral() - live_integral(&container)).abs() < 1e-9);
    }
}

#[test]
fn objects_of_another_dimension_are_rejected()
{
    let line = RefinementObjectExtendSplit::new(&[0.0], &[1.0], ExtendSplitOptions::default()).unwrap();
    let square = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], ExtendSplitOptions::default()).unwrap();
    assert_eq!(RefinementContainer::new(vec![line.into(), square.into()], 1, RefinementSession::default()).err(),
        Some(RefinementError::DimensionMismatch { expected: 1, found: 2 }));
}
