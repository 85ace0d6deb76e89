use crate::{algorithms::refinement::{ErrorEstimator, Function}, objects::RefinementObject};

///
/// A function that defines the error of a refinement object.
///
/// # Arguments
/// - `function`: Integrand of the current run.
/// - `object`: Object whose error is estimated.
///
pub type UserErrorFunction = dyn Fn(&dyn Function, &RefinementObject) -> f64 + Send + Sync;

pub struct UserDefinedEstimator<'a>
{
    pub fun_eval: &'a UserErrorFunction,
}

impl ErrorEstimator for UserDefinedEstimator<'_>
{
    fn estimate(&self, function: &dyn Function, object: &RefinementObject) -> f64
    {
        (self.fun_eval)(function, object)
    }
}

#[test]
fn user_function_sees_object_and_integrand()
{
    use crate::objects::extend_split::{ExtendSplitOptions, RefinementObjectExtendSplit};
    let midpoint_value = |function: &dyn Function, object: &RefinementObject|
    {
        let midpoint = object.as_extend_split().map_or(0.5, |r| 0.5 * (r.start[0] + r.end[0]));
        function.eval(&[midpoint]).abs()
    };
    let estimator = UserDefinedEstimator { fun_eval: &midpoint_value };
    let object: RefinementObject = RefinementObjectExtendSplit::new(&[0.0], &[0.5], ExtendSplitOptions::default()).unwrap().into();
    let f = |x: &[f64]| -4.0 * x[0];
    assert_eq!(estimator.estimate(&f, &object), 1.0);
}
