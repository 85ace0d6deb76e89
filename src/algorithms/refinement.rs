use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};

use crate::objects::RefinementObject;

///
/// Scalar integrand `f: R^d -> R`. Implemented for every thread-safe closure.
///
pub trait Function: Send + Sync
{
    fn eval(&self, x: &[f64]) -> f64;
}

impl<F: Fn(&[f64]) -> f64 + Send + Sync> Function for F
{
    fn eval(&self, x: &[f64]) -> f64
    {
        self(x)
    }
}

///
/// Memoizes a [`Function`] by the bit pattern of its argument so that a point
/// shared by neighbouring regions or nested component grids is evaluated once.
/// Safe to query from rayon workers.
///
pub struct CachedFunction<'a>
{
    function: &'a dyn Function,
    values: DashMap<Vec<u64>, f64, FxBuildHasher>,
    evaluations: AtomicUsize,
}

impl<'a> CachedFunction<'a>
{
    pub fn new(function: &'a dyn Function) -> Self
    {
        Self { function, values: DashMap::with_hasher(FxBuildHasher), evaluations: AtomicUsize::new(0) }
    }

    ///
    /// Number of calls that reached the wrapped function.
    ///
    pub fn evaluations(&self) -> usize
    {
        self.evaluations.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize
    {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.values.is_empty()
    }

    ///
    /// Forget all stored values. The evaluation counter keeps running.
    ///
    pub fn clear(&self)
    {
        self.values.clear();
    }
}

impl Function for CachedFunction<'_>
{
    fn eval(&self, x: &[f64]) -> f64
    {
        let key: Vec<u64> = x.iter().map(|xi| xi.to_bits()).collect();
        if let Some(value) = self.values.get(&key)
        {
            return *value;
        }
        *self.values.entry(key).or_insert_with(||
        {
            self.evaluations.fetch_add(1, Ordering::Relaxed);
            self.function.eval(x)
        })
    }
}

///
/// Local error indicator of a refinement object. The returned value is
/// passed verbatim to `set_error` and must be non-negative.
///
pub trait ErrorEstimator: Send + Sync
{
    fn estimate(&self, function: &dyn Function, object: &RefinementObject) -> f64;
}

///
/// Stopping criteria of the adaptive driver loop.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefinementOptions
{
    /// Objects with an error at or above this value are refined.
    pub tolerance: f64,
    pub max_evaluations: Option<usize>,
    pub max_iterations: Option<usize>,
}

impl Default for RefinementOptions
{
    fn default() -> Self
    {
        Self { tolerance: 1e-2, max_evaluations: None, max_iterations: None }
    }
}

impl RefinementOptions
{
    pub fn new(tolerance: f64) -> Self
    {
        Self { tolerance, ..Default::default() }
    }
}

#[test]
fn cache_evaluates_each_point_once()
{
    let calls = AtomicUsize::new(0);
    let f = |x: &[f64]|
    {
        calls.fetch_add(1, Ordering::Relaxed);
        x[0] + 2.0 * x[1]
    };
    let cached = CachedFunction::new(&f);
    assert_eq!(cached.eval(&[0.5, 1.0]), 2.5);
    assert_eq!(cached.eval(&[0.5, 1.0]), 2.5);
    assert_eq!(cached.eval(&[1.0, 0.5]), 2.0);
    assert_eq!(cached.evaluations(), 2);
    assert_eq!(calls.load(Ordering::Relaxed), 2);
    assert_eq!(cached.len(), 2);
    cached.clear();
    assert!(cached.is_empty());
    assert_eq!(cached.eval(&[0.5, 1.0]), 2.5);
    assert_eq!(cached.evaluations(), 3);
}
