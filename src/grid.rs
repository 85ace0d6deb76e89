use serde::{Deserialize, Serialize};

use crate::errors::RefinementError;

///
/// Closed hyperrectangle `[lower, upper]`.
///
#[derive(Default, Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct BoundingBox
{
    pub lower: Vec<f64>,
    pub upper: Vec<f64>,
}

impl BoundingBox
{
    ///
    /// Create a box, rejecting mismatched or degenerate bounds.
    ///
    pub fn new(lower: &[f64], upper: &[f64]) -> Result<Self, RefinementError>
    {
        validate_bounds(lower, upper)?;
        Ok(Self { lower: lower.to_owned(), upper: upper.to_owned() })
    }

    #[inline]
    pub fn ndim(&self) -> usize
    {
        self.lower.len()
    }

    #[inline]
    pub fn width(&self, dim: usize) -> f64
    {
        self.upper[dim] - self.lower[dim]
    }

    ///
    /// Volume of hypercube (width(dim1)*...*width(dim_n))
    ///
    pub fn volume(&self) -> f64
    {
        volume(&self.lower, &self.upper)
    }

    pub fn contains(&self, point: &[f64]) -> bool
    {
        self.lower.iter().zip(&self.upper).zip(point).all(|((&l, &u), &x)| l <= x && x <= u)
    }
}

///
/// Checks that `start[d] < end[d]` in every dimension.
///
pub fn validate_bounds(start: &[f64], end: &[f64]) -> Result<(), RefinementError>
{
    if start.len() != end.len()
    {
        return Err(RefinementError::DimensionMismatch { expected: start.len(), found: end.len() });
    }
    for (dim, (&s, &e)) in start.iter().zip(end).enumerate()
    {
        // also rejects NaN
        if !(s < e)
        {
            return Err(RefinementError::InvalidRegion { dim, start: s, end: e });
        }
    }
    Ok(())
}

pub fn volume(start: &[f64], end: &[f64]) -> f64
{
    start.iter().zip(end).map(|(s, e)| e - s).product()
}

///
/// Supplies the point at which an interval is split in a given dimension.
/// Implementations must be deterministic so that repeated splits of the same
/// region produce identical children.
///
pub trait MidpointProvider : Send + Sync
{
    fn mid_point(&self, start: f64, end: f64, dim: usize) -> Result<f64, RefinementError>;
}

///
/// Splits every interval at its arithmetic center.
///
#[derive(Default, Debug, Clone, Copy)]
pub struct EquidistantMidpoint;

impl MidpointProvider for EquidistantMidpoint
{
    #[inline]
    fn mid_point(&self, start: f64, end: f64, _dim: usize) -> Result<f64, RefinementError>
    {
        Ok((start + end) / 2.0)
    }
}

pub type MidpointRule = dyn Fn(f64, f64) -> f64 + Send + Sync;

///
/// One midpoint rule per dimension, e.g. to split a normally distributed
/// axis at the median of the truncated distribution.
///
pub struct MixedMidpoint
{
    rules: Vec<Box<MidpointRule>>,
}

impl MixedMidpoint
{
    pub fn new(rules: Vec<Box<MidpointRule>>) -> Self
    {
        Self { rules }
    }
}

impl MidpointProvider for MixedMidpoint
{
    fn mid_point(&self, start: f64, end: f64, dim: usize) -> Result<f64, RefinementError>
    {
        match self.rules.get(dim)
        {
            Some(rule) => Ok(rule(start, end)),
            None => Err(RefinementError::DimensionMismatch { expected: dim + 1, found: self.rules.len() }),
        }
    }
}

#[test]
fn degenerate_box_is_rejected()
{
    assert_eq!(BoundingBox::new(&[0.0, 1.0], &[1.0, 1.0]),
        Err(RefinementError::InvalidRegion { dim: 1, start: 1.0, end: 1.0 }));
    assert_eq!(BoundingBox::new(&[0.0], &[1.0, 1.0]),
        Err(RefinementError::DimensionMismatch { expected: 1, found: 2 }));
}

#[test]
fn box_volume_and_containment()
{
    let bbox = BoundingBox::new(&[-1.0, 0.0], &[1.0, 0.5]).unwrap();
    assert_eq!(bbox.volume(), 1.0);
    assert!(bbox.contains(&[0.0, 0.5]));
    assert!(!bbox.contains(&[0.0, 0.6]));
}

#[test]
fn mixed_midpoint_dispatches_per_dimension()
{
    let rules: Vec<Box<MidpointRule>> = vec![Box::new(|a, b| (a + b) / 2.0), Box::new(|a, _b| a)];
    let grid = MixedMidpoint::new(rules);
    assert_eq!(grid.mid_point(0.0, 1.0, 0), Ok(0.5));
    assert_eq!(grid.mid_point(0.25, 1.0, 1), Ok(0.25));
    assert_eq!(EquidistantMidpoint.mid_point(0.0, 0.5, 3), Ok(0.25));
}

#[test]
fn missing_midpoint_rule_is_an_error()
{
    let rules: Vec<Box<MidpointRule>> = vec![Box::new(|a, b| (a + b) / 2.0)];
    let grid = MixedMidpoint::new(rules);
    assert_eq!(grid.mid_point(0.0, 1.0, 2), Err(RefinementError::DimensionMismatch { expected: 3, found: 1 }));
}
