use serde::{Deserialize, Serialize};

use crate::{errors::RefinementError, utilities::multi_index_manipulation::{combination_coefficients, downward_closed_levels}};

///
/// A full tensor grid taking part in the combination with weight `coefficient`.
///
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentGrid
{
    pub level: Vec<u32>,
    pub coefficient: f64,
}

///
/// Bookkeeping of the active multi-index set. The refinement layer only
/// forwards lmax increases to it and reads back lmin/lmax and the
/// component grids.
///
pub trait CombinationScheme
{
    fn ndim(&self) -> usize
    {
        self.lmin().len()
    }

    fn lmin(&self) -> &[u32];

    fn lmax(&self) -> &[u32];

    ///
    /// Component grids with non-zero coefficient, finest diagonal first.
    ///
    fn component_grids(&self) -> &[ComponentGrid];

    ///
    /// Raise lmax by `increase` (one entry per dimension).
    ///
    fn update_lmax(&mut self, increase: &[u32]) -> Result<(), RefinementError>;
}

///
/// Classic combination scheme over `{l : lmin <= l <= lmax, sum(l - lmin) <= max(lmax - lmin)}`.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScheme
{
    lmin: Vec<u32>,
    lmax: Vec<u32>,
    grids: Vec<ComponentGrid>,
}

impl StandardScheme
{
    pub fn new(lmin: &[u32], lmax: &[u32]) -> Result<Self, RefinementError>
    {
        if lmin.len() != lmax.len()
        {
            return Err(RefinementError::DimensionMismatch { expected: lmin.len(), found: lmax.len() });
        }
        if let Some(dim) = (0..lmin.len()).find(|&d| lmax[d] < lmin[d])
        {
            return Err(RefinementError::BelowMinimumLevel { dim, level: lmax[dim], lmin: lmin[dim] });
        }
        let mut scheme = Self { lmin: lmin.to_owned(), lmax: lmax.to_owned(), grids: Vec::new() };
        scheme.rebuild();
        Ok(scheme)
    }

    fn rebuild(&mut self)
    {
        let bound = self.lmin.iter().zip(&self.lmax).map(|(lo, hi)| hi - lo).max().unwrap_or(0);
        let levels: Vec<Vec<u32>> = downward_closed_levels(&self.lmin, bound).into_iter()
            .filter(|level| level.iter().zip(&self.lmax).all(|(l, hi)| l <= hi))
            .collect();
        let coefficients = combination_coefficients(&levels);
        self.grids = levels.into_iter().zip(coefficients)
            .filter(|(_, coefficient)| *coefficient != 0.0)
            .map(|(level, coefficient)| ComponentGrid { level, coefficient })
            .collect();
        // finest diagonal first, so coarsened duplicates are claimed by a positive grid
        self.grids.sort_by_key(|grid| std::cmp::Reverse(grid.level.iter().sum::<u32>()));
    }
}

impl CombinationScheme for StandardScheme
{
    fn lmin(&self) -> &[u32]
    {
        &self.lmin
    }

    fn lmax(&self) -> &[u32]
    {
        &self.lmax
    }

    fn component_grids(&self) -> &[ComponentGrid]
    {
        &self.grids
    }

    fn update_lmax(&mut self, increase: &[u32]) -> Result<(), RefinementError>
    {
        if increase.len() != self.lmax.len()
        {
            return Err(RefinementError::DimensionMismatch { expected: self.lmax.len(), found: increase.len() });
        }
        for (lmax, inc) in self.lmax.iter_mut().zip(increase)
        {
            *lmax += inc;
        }
        log::debug!("lmax raised to {:?}", self.lmax);
        self.rebuild();
        Ok(())
    }
}

#[test]
fn standard_scheme_grows_with_lmax()
{
    let mut scheme = StandardScheme::new(&[1, 1], &[2, 2]).unwrap();
    let levels: Vec<_> = scheme.component_grids().iter().map(|g| (g.level.clone(), g.coefficient)).collect();
    assert_eq!(levels, vec![(vec![1, 2], 1.0), (vec![2, 1], 1.0), (vec![1, 1], -1.0)]);

    scheme.update_lmax(&[1, 1]).unwrap();
    assert_eq!(scheme.lmax(), &[3, 3]);
    assert_eq!(scheme.component_grids().len(), 5);
    let sum: f64 = scheme.component_grids().iter().map(|g| g.coefficient).sum();
    assert_eq!(sum, 1.0);
}

#[test]
fn lmax_below_lmin_is_rejected()
{
    assert!(matches!(StandardScheme::new(&[2], &[1]), Err(RefinementError::BelowMinimumLevel { dim: 0, .. })));
}
