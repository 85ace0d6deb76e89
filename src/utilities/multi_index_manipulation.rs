use rustc_hash::FxHashSet;

///
/// Enumerate the downward-closed level set `{l : lmin <= l, sum(l - lmin) <= bound}`
/// in lexicographic order.
///
pub fn downward_closed_levels(lmin: &[u32], bound: u32) -> Vec<Vec<u32>>
{
    let mut levels = Vec::new();
    let mut current = lmin.to_vec();
    push_levels(lmin, bound, 0, &mut current, &mut levels);
    levels
}

fn push_levels(lmin: &[u32], budget: u32, dim: usize, current: &mut Vec<u32>, levels: &mut Vec<Vec<u32>>)
{
    if dim == lmin.len()
    {
        levels.push(current.clone());
        return;
    }
    for extra in 0..=budget
    {
        current[dim] = lmin[dim] + extra;
        push_levels(lmin, budget - extra, dim + 1, current, levels);
    }
    current[dim] = lmin[dim];
}

///
/// Combination coefficients of a downward-closed level set, computed by
/// inclusion-exclusion over the unit hypercube of forward neighbours:
/// `c_l = sum over z in {0,1}^d with l + z in I of (-1)^|z|`.
/// Coefficients of a downward-closed set always sum to one.
///
pub fn combination_coefficients(levels: &[Vec<u32>]) -> Vec<f64>
{
    let set: FxHashSet<&[u32]> = levels.iter().map(|l| l.as_slice()).collect();
    levels.iter().map(|level|
    {
        let ndim = level.len();
        let mut coefficient = 0.0;
        let mut neighbour = level.clone();
        for z in 0..1usize << ndim
        {
            for d in 0..ndim
            {
                neighbour[d] = level[d] + ((z >> d) & 1) as u32;
            }
            if set.contains(neighbour.as_slice())
            {
                coefficient += if z.count_ones() % 2 == 0 { 1.0 } else { -1.0 };
            }
        }
        coefficient
    }).collect()
}

#[test]
fn standard_two_dimensional_scheme()
{
    let levels = downward_closed_levels(&[1, 1], 2);
    assert_eq!(levels, vec![vec![1, 1], vec![1, 2], vec![1, 3], vec![2, 1], vec![2, 2], vec![3, 1]]);
    let coefficients = combination_coefficients(&levels);
    assert_eq!(coefficients, vec![0.0, -1.0, 1.0, -1.0, 1.0, 1.0]);
}

#[test]
fn coefficients_sum_to_one()
{
    for ndim in 1..5
    {
        let levels = downward_closed_levels(&vec![1; ndim], 3);
        let sum: f64 = combination_coefficients(&levels).iter().sum();
        assert_eq!(sum, 1.0);
    }
}
