use crate::{algorithms::refinement::{ErrorEstimator, Function}, objects::{Refinable, RefinementObject}};

///
/// Change of the local integral with respect to the parent region:
/// `|integral - parent_integral|` for extend/split regions with a parent,
/// `|integral|` otherwise.
///
#[derive(Default, Debug, Clone, Copy)]
pub struct SurplusEstimator;

impl ErrorEstimator for SurplusEstimator
{
    fn estimate(&self, _function: &dyn Function, object: &RefinementObject) -> f64
    {
        let integral = object.integral().unwrap_or(0.0);
        match object.as_extend_split().and_then(|region| region.parent_integral)
        {
            Some(parent_integral) => (integral - parent_integral).abs(),
            None => integral.abs(),
        }
    }
}

#[cfg(test)]
use crate::objects::{extend_split::{ExtendSplitOptions, RefinementObjectExtendSplit}, single_dimension::RefinementObjectSingleDimension};

#[test]
fn surplus_against_parent_integral()
{
    let f = |_: &[f64]| 0.0;
    let mut region = RefinementObjectExtendSplit::new(&[0.0], &[1.0], ExtendSplitOptions::default()).unwrap();
    region.set_integral(-0.5);
    let mut object: RefinementObject = region.clone().into();
    assert_eq!(SurplusEstimator.estimate(&f, &object), 0.5);
    region.parent_integral = Some(-0.25);
    object = region.into();
    assert_eq!(SurplusEstimator.estimate(&f, &object), 0.25);

    let mut interval = RefinementObjectSingleDimension::new(0.0, 1.0, 0, 1, 0).unwrap();
    interval.set_integral(-2.0);
    assert_eq!(SurplusEstimator.estimate(&f, &interval.into()), 2.0);
}
