use thiserror::Error;

///
/// Errors raised by refinement objects, containers and the driver loop.
/// None of them leave the global accumulators of a container half-updated.
///
#[derive(Copy, Clone, Debug, PartialEq, Error)]
pub enum RefinementError
{
    /// A programming contract was broken (e.g. refining an inactive cell).
    #[error("precondition violated: {0}")]
    PreconditionViolation(&'static str),
    /// Degenerate hyperrectangle.
    #[error("invalid region in dimension {dim}: start {start} must be smaller than end {end}")]
    InvalidRegion { dim: usize, start: f64, end: f64 },
    /// A cell was requested on a level coarser than the lattice allows.
    #[error("level {level} in dimension {dim} is below lmin {lmin}")]
    BelowMinimumLevel { dim: usize, level: u32, lmin: u32 },
    #[error("dimension mismatch: expected {expected}, found {found}")]
    DimensionMismatch { expected: usize, found: usize },
    #[error("index {index} is out of range for {len} refinement objects")]
    InvalidIndex { index: usize, len: usize },
    #[error("a cell with the same bounds is already registered")]
    DuplicateCell,
    #[error("serialization failed")]
    SerializationFailed,
    #[error("deserialization failed")]
    DeserializationFailed,
    #[error("lz4 decompression failed")]
    DecompressionFailed,
    #[error("reading or writing a checkpoint file failed")]
    FileIoFailed,
}
