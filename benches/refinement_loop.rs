use criterion::{criterion_group, criterion_main, Criterion};
use sacombi::{algorithms::{adaptive::SpatiallyAdaptiveDriver, integration::TrapezoidalIntegrator, refinement::RefinementOptions},
    combination::StandardScheme, containers::{refinement_container::RefinementContainer, session::RefinementSession},
    objects::extend_split::{ExtendSplitOptions, RefinementObjectExtendSplit}, refinement::surplus::SurplusEstimator};

fn gaussian_peak(x: &[f64]) -> f64
{
    let r2: f64 = x.iter().map(|xi| (xi - 0.3) * (xi - 0.3)).sum();
    (-50.0 * r2).exp()
}

fn adaptive_run()
{
    let ndim = 2;
    let integrator = TrapezoidalIntegrator::new(&vec![0.0; ndim], &vec![1.0; ndim]).unwrap();
    let options = RefinementOptions { tolerance: 1e-4, max_iterations: Some(6), ..Default::default() };
    let driver = SpatiallyAdaptiveDriver::new(&gaussian_peak, &SurplusEstimator, &integrator, options);
    let root = RefinementObjectExtendSplit::new(&vec![0.0; ndim], &vec![1.0; ndim], ExtendSplitOptions::default()).unwrap();
    let mut container = RefinementContainer::new(vec![root.into()], ndim, RefinementSession::default()).unwrap();
    let mut scheme = StandardScheme::new(&vec![1; ndim], &vec![2; ndim]).unwrap();
    let _ = driver.run(&mut container, &mut scheme).unwrap();
}

fn run_case(c: &mut Criterion)
{
    c.bench_function("extend_split_2d", |b| b.iter(adaptive_run));
}

criterion_group!(benches, run_case);
criterion_main!(benches);
