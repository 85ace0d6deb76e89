use crate::{grid::{EquidistantMidpoint, MidpointProvider}, objects::{cell::CellRegistry, extend_split::SplitFamilies, RefinementContext}};

///
/// State shared by all refinement objects of one adaptive run: the midpoint
/// provider used for splits, the registry of cells and the integrals of
/// split families. Lives exactly as long as the run.
///
pub struct RefinementSession
{
    grid: Box<dyn MidpointProvider>,
    pub(crate) cells: CellRegistry,
    pub(crate) families: SplitFamilies,
}

impl Default for RefinementSession
{
    fn default() -> Self
    {
        Self::new(Box::new(EquidistantMidpoint))
    }
}

impl RefinementSession
{
    pub fn new(grid: Box<dyn MidpointProvider>) -> Self
    {
        Self { grid, cells: CellRegistry::default(), families: SplitFamilies::default() }
    }

    ///
    /// Session for dimension-wise cell refinement on `cells`.
    ///
    pub fn with_cells(mut self, cells: CellRegistry) -> Self
    {
        self.cells = cells;
        self
    }

    pub(crate) fn from_parts(grid: Box<dyn MidpointProvider>, cells: CellRegistry, families: SplitFamilies) -> Self
    {
        Self { grid, cells, families }
    }

    pub fn grid(&self) -> &dyn MidpointProvider
    {
        self.grid.as_ref()
    }

    pub fn cells(&self) -> &CellRegistry
    {
        &self.cells
    }

    pub fn cells_mut(&mut self) -> &mut CellRegistry
    {
        &mut self.cells
    }

    pub fn families(&self) -> &SplitFamilies
    {
        &self.families
    }

    pub(crate) fn context(&mut self) -> RefinementContext<'_>
    {
        RefinementContext { grid: self.grid.as_ref(), cells: &mut self.cells, families: &mut self.families }
    }
}
