pub mod cell;
pub mod extend_split;
pub mod single_dimension;

use serde::{Deserialize, Serialize};

use crate::{errors::RefinementError, grid::MidpointProvider};
use cell::{CellRegistry, RefinementObjectCell};
use extend_split::{FamilyId, RefinementObjectExtendSplit, SplitFamilies};
use single_dimension::RefinementObjectSingleDimension;

///
/// Error, integral and evaluation count shared by every kind of refinement object.
///
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectState
{
    /// Set once per evaluation round by the error estimator.
    pub error: Option<f64>,
    /// Local quadrature contribution of the region.
    pub integral: Option<f64>,
    pub evaluations: usize,
}

///
/// Request to raise the coarsening value of every other object in the
/// container by the given amount. Returned by `refine`, applied by the
/// container.
///
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RippleIncrement(pub u32);

///
/// Result of refining one object.
///
#[derive(Debug, Default)]
pub struct RefineOutcome
{
    pub new_objects: Vec<RefinementObject>,
    /// Per-dimension lmax increase to forward to the combination scheme.
    pub lmax_update: Option<Vec<u32>>,
    pub ripple: Option<RippleIncrement>,
}

impl RefineOutcome
{
    pub(crate) fn children(new_objects: Vec<RefinementObject>) -> Self
    {
        Self { new_objects, lmax_update: None, ripple: None }
    }

    pub(crate) fn with_ripple(new_objects: Vec<RefinementObject>, ndim: usize) -> Self
    {
        Self { new_objects, lmax_update: Some(vec![1; ndim]), ripple: Some(RippleIncrement(1)) }
    }
}

///
/// Everything a refinement object may consult or extend while refining,
/// owned by the refinement session of the current run.
///
pub struct RefinementContext<'a>
{
    pub grid: &'a dyn MidpointProvider,
    pub cells: &'a mut CellRegistry,
    pub families: &'a mut SplitFamilies,
}

///
/// Operations common to all refinement objects.
///
pub trait Refinable
{
    fn state(&self) -> &ObjectState;

    fn state_mut(&mut self) -> &mut ObjectState;

    ///
    /// Refine this object and return the newly created objects together with
    /// an optional lmax update and ripple request.
    ///
    fn refine(&mut self, context: &mut RefinementContext) -> Result<RefineOutcome, RefinementError>;

    ///
    /// Store the estimated error. Implementations may weight it.
    ///
    fn set_error(&mut self, error: f64)
    {
        self.state_mut().error = Some(error);
    }

    ///
    /// Absorb a ripple emitted by another object.
    ///
    fn update(&mut self, _ripple: RippleIncrement) {}

    /// Whether `refine` may still be called.
    fn is_refinable(&self) -> bool
    {
        true
    }

    /// Whether the container drops this object once it has been refined.
    fn is_removable(&self) -> bool
    {
        true
    }

    fn error(&self) -> Option<f64>
    {
        self.state().error
    }

    fn integral(&self) -> Option<f64>
    {
        self.state().integral
    }

    fn set_integral(&mut self, integral: f64)
    {
        self.state_mut().integral = Some(integral);
    }

    fn evaluations(&self) -> usize
    {
        self.state().evaluations
    }

    fn set_evaluations(&mut self, evaluations: usize)
    {
        self.state_mut().evaluations = evaluations;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RefinementObject
{
    ExtendSplit(RefinementObjectExtendSplit),
    Cell(RefinementObjectCell),
    SingleDimension(RefinementObjectSingleDimension),
}

impl RefinementObject
{
    fn inner(&self) -> &dyn Refinable
    {
        match self
        {
            RefinementObject::ExtendSplit(object) => object,
            RefinementObject::Cell(object) => object,
            RefinementObject::SingleDimension(object) => object,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn Refinable
    {
        match self
        {
            RefinementObject::ExtendSplit(object) => object,
            RefinementObject::Cell(object) => object,
            RefinementObject::SingleDimension(object) => object,
        }
    }

    ///
    /// Dimension of the domain the object lives in.
    ///
    pub fn ndim(&self) -> usize
    {
        match self
        {
            RefinementObject::ExtendSplit(object) => object.ndim(),
            RefinementObject::Cell(object) => object.ndim(),
            RefinementObject::SingleDimension(object) => object.ndim,
        }
    }

    pub fn as_extend_split(&self) -> Option<&RefinementObjectExtendSplit>
    {
        match self
        {
            RefinementObject::ExtendSplit(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_extend_split_mut(&mut self) -> Option<&mut RefinementObjectExtendSplit>
    {
        match self
        {
            RefinementObject::ExtendSplit(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_cell(&self) -> Option<&RefinementObjectCell>
    {
        match self
        {
            RefinementObject::Cell(object) => Some(object),
            _ => None,
        }
    }

    pub fn as_single_dimension(&self) -> Option<&RefinementObjectSingleDimension>
    {
        match self
        {
            RefinementObject::SingleDimension(object) => Some(object),
            _ => None,
        }
    }

    ///
    /// Split family and slot of a direct split child, used to keep sibling
    /// integrals available after the parent has been removed.
    ///
    pub(crate) fn family_slot(&self) -> Option<(FamilyId, usize)>
    {
        match self
        {
            RefinementObject::ExtendSplit(object) => object.parent.zip(object.sibling_slot),
            _ => None,
        }
    }
}

impl Refinable for RefinementObject
{
    fn state(&self) -> &ObjectState
    {
        self.inner().state()
    }

    fn state_mut(&mut self) -> &mut ObjectState
    {
        self.inner_mut().state_mut()
    }

    fn refine(&mut self, context: &mut RefinementContext) -> Result<RefineOutcome, RefinementError>
    {
        self.inner_mut().refine(context)
    }

    fn set_error(&mut self, error: f64)
    {
        self.inner_mut().set_error(error);
    }

    fn update(&mut self, ripple: RippleIncrement)
    {
        self.inner_mut().update(ripple);
    }

    fn is_refinable(&self) -> bool
    {
        self.inner().is_refinable()
    }

    fn is_removable(&self) -> bool
    {
        self.inner().is_removable()
    }
}

impl From<RefinementObjectExtendSplit> for RefinementObject
{
    fn from(object: RefinementObjectExtendSplit) -> Self
    {
        RefinementObject::ExtendSplit(object)
    }
}

impl From<RefinementObjectCell> for RefinementObject
{
    fn from(object: RefinementObjectCell) -> Self
    {
        RefinementObject::Cell(object)
    }
}

impl From<RefinementObjectSingleDimension> for RefinementObject
{
    fn from(object: RefinementObjectSingleDimension) -> Self
    {
        RefinementObject::SingleDimension(object)
    }
}
