use serde::{Deserialize, Serialize};

use crate::errors::RefinementError;
use super::{ObjectState, Refinable, RefineOutcome, RefinementContext, RippleIncrement};

///
/// Interval along a single axis of the domain, used when every dimension
/// is refined independently.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementObjectSingleDimension
{
    pub start: f64,
    pub end: f64,
    /// Axis this interval lives on.
    pub axis: usize,
    /// Dimension of the whole domain.
    pub ndim: usize,
    pub coarsening_level: u32,
    pub(crate) state: ObjectState,
}

impl RefinementObjectSingleDimension
{
    pub fn new(start: f64, end: f64, axis: usize, ndim: usize, coarsening_level: u32) -> Result<Self, RefinementError>
    {
        if axis >= ndim
        {
            return Err(RefinementError::DimensionMismatch { expected: ndim, found: axis + 1 });
        }
        if !(start < end)
        {
            return Err(RefinementError::InvalidRegion { dim: axis, start, end });
        }
        Ok(Self { start, end, axis, ndim, coarsening_level, state: ObjectState::default() })
    }

    pub fn width(&self) -> f64
    {
        self.end - self.start
    }
}

impl Refinable for RefinementObjectSingleDimension
{
    fn state(&self) -> &ObjectState
    {
        &self.state
    }

    fn state_mut(&mut self) -> &mut ObjectState
    {
        &mut self.state
    }

    fn refine(&mut self, _context: &mut RefinementContext) -> Result<RefineOutcome, RefinementError>
    {
        let coarsening_level = self.coarsening_level.saturating_sub(1);
        let middle = self.start + self.width() / 2.0;
        let new_objects = vec![
            Self::new(self.start, middle, self.axis, self.ndim, coarsening_level)?.into(),
            Self::new(middle, self.end, self.axis, self.ndim, coarsening_level)?.into(),
        ];
        log::debug!("interval {}..{} in dimension {} halved (coarsening {})", self.start, self.end, self.axis, self.coarsening_level);
        // already at maximum refinement: the scheme grows in every dimension
        if self.coarsening_level == 0
        {
            Ok(RefineOutcome::with_ripple(new_objects, self.ndim))
        }
        else
        {
            Ok(RefineOutcome::children(new_objects))
        }
    }

    fn update(&mut self, ripple: RippleIncrement)
    {
        self.coarsening_level += ripple.0;
    }
}

#[cfg(test)]
fn refine_interval(interval: &mut RefinementObjectSingleDimension) -> RefineOutcome
{
    use crate::{grid::EquidistantMidpoint, objects::{cell::CellRegistry, extend_split::SplitFamilies}};
    let mut cells = CellRegistry::default();
    let mut families = SplitFamilies::default();
    let mut context = RefinementContext { grid: &EquidistantMidpoint, cells: &mut cells, families: &mut families };
    interval.refine(&mut context).unwrap()
}

#[test]
fn interval_at_ceiling_ripples()
{
    let mut interval = RefinementObjectSingleDimension::new(0.0, 1.0, 1, 3, 0).unwrap();
    let outcome = refine_interval(&mut interval);
    assert_eq!(outcome.lmax_update, Some(vec![1, 1, 1]));
    assert_eq!(outcome.ripple, Some(RippleIncrement(1)));
    let halves: Vec<_> = outcome.new_objects.iter().map(|o| o.as_single_dimension().unwrap()).map(|o| (o.start, o.end, o.coarsening_level, o.axis)).collect();
    assert_eq!(halves, vec![(0.0, 0.5, 0, 1), (0.5, 1.0, 0, 1)]);
}

#[test]
fn interval_below_ceiling_halves_quietly()
{
    let mut interval = RefinementObjectSingleDimension::new(0.5, 1.0, 0, 2, 2).unwrap();
    let outcome = refine_interval(&mut interval);
    assert!(outcome.lmax_update.is_none() && outcome.ripple.is_none());
    assert!(outcome.new_objects.iter().all(|o| o.as_single_dimension().unwrap().coarsening_level == 1));
    interval.update(RippleIncrement(1));
    assert_eq!(interval.coarsening_level, 3);
}

#[test]
fn invalid_intervals_are_rejected()
{
    assert!(matches!(RefinementObjectSingleDimension::new(1.0, 1.0, 0, 1, 0), Err(RefinementError::InvalidRegion { .. })));
    assert!(matches!(RefinementObjectSingleDimension::new(0.0, 1.0, 2, 2, 0), Err(RefinementError::DimensionMismatch { .. })));
}
