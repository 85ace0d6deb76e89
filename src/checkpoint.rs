use std::io::Write;

use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::{containers::refinement_container::RefinementContainer, errors::RefinementError, grid::MidpointProvider,
    objects::{cell::CellRegistry, extend_split::SplitFamilies, RefinementObject}};

///
/// Binary layout of a checkpoint.
///
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CheckpointFormat
{
    /// Plain bincode.
    Bincode,
    /// bincode compressed with LZ4.
    #[default]
    BincodeLz4,
}

///
/// Complete state of a [`RefinementContainer`] apart from its midpoint
/// provider, which is supplied again on restore.
///
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerSnapshot
{
    pub(crate) refinement_objects: Vec<RefinementObject>,
    pub(crate) ndim: usize,
    pub(crate) evaluationstotal: usize,
    pub(crate) integral: f64,
    pub(crate) start_new_objects: usize,
    pub(crate) pop_array: Vec<usize>,
    pub(crate) search_position: usize,
    pub(crate) cells: CellRegistry,
    pub(crate) families: SplitFamilies,
}

impl ContainerSnapshot
{
    pub fn len(&self) -> usize
    {
        self.refinement_objects.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool
    {
        self.refinement_objects.is_empty()
    }
}

pub fn serialize<T: Serialize>(data: &T, format: CheckpointFormat) -> Result<Vec<u8>, RefinementError>
{
    let bytes = bincode::serde::encode_to_vec(data, bincode::config::standard()).map_err(|_| RefinementError::SerializationFailed)?;
    match format
    {
        CheckpointFormat::Bincode => Ok(bytes),
        CheckpointFormat::BincodeLz4 => Ok(lz4_flex::compress_prepend_size(&bytes)),
    }
}

pub fn deserialize<T: DeserializeOwned>(data: &[u8], format: CheckpointFormat) -> Result<T, RefinementError>
{
    let decompressed;
    let bytes: &[u8] = match format
    {
        CheckpointFormat::Bincode => data,
        CheckpointFormat::BincodeLz4 =>
        {
            decompressed = lz4_flex::decompress_size_prepended(data).map_err(|_| RefinementError::DecompressionFailed)?;
            decompressed.as_slice()
        },
    };
    bincode::serde::decode_from_slice(bytes, bincode::config::standard())
        .map(|(value, _)| value)
        .map_err(|_| RefinementError::DeserializationFailed)
}

impl RefinementContainer
{
    pub fn write_buffer(&self, format: CheckpointFormat) -> Result<Vec<u8>, RefinementError>
    {
        serialize(&self.snapshot(), format)
    }

    ///
    /// Restore a container written with [`RefinementContainer::write_buffer`].
    ///
    pub fn read_buffer(buffer: &[u8], format: CheckpointFormat, grid: Box<dyn MidpointProvider>) -> Result<Self, RefinementError>
    {
        let snapshot: ContainerSnapshot = deserialize(buffer, format)?;
        log::debug!("restored {} refinement objects", snapshot.len());
        Ok(Self::from_snapshot(snapshot, grid))
    }

    ///
    /// Saves the container to file...
    ///
    pub fn save(&self, path: &str, format: CheckpointFormat) -> Result<(), RefinementError>
    {
        let mut file = std::io::BufWriter::new(std::fs::File::create(path).map_err(|_| RefinementError::FileIoFailed)?);
        file.write_all(&self.write_buffer(format)?).map_err(|_| RefinementError::FileIoFailed)?;
        file.flush().map_err(|_| RefinementError::FileIoFailed)
    }

    pub fn read<Reader: std::io::Read>(mut reader: Reader, format: CheckpointFormat, grid: Box<dyn MidpointProvider>) -> Result<Self, RefinementError>
    {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes).map_err(|_| RefinementError::FileIoFailed)?;
        Self::read_buffer(&bytes, format, grid)
    }
}

#[cfg(test)]
use crate::{containers::session::RefinementSession, grid::EquidistantMidpoint,
    objects::{cell::CellLattice, extend_split::{ExtendSplitOptions, FamilyId, RefinementObjectExtendSplit}, Refinable}};

#[test]
fn restored_container_continues_the_round()
{
    let options = ExtendSplitOptions { automatic_extend_split: true, ..Default::default() };
    let root = RefinementObjectExtendSplit::new(&[0.0, 0.0], &[1.0, 1.0], options).unwrap();
    let mut container = RefinementContainer::new(vec![root.into()], 2, RefinementSession::default()).unwrap();
    container.set_integral(0, 1.0).unwrap();
    container.set_evaluations(0, 9).unwrap();
    container.refine(0).unwrap();
    container.apply_remove().unwrap();
    for (i, value) in [0.2, 0.3, 0.25, 0.26].into_iter().enumerate()
    {
        container.set_integral(i, value).unwrap();
    }

    for format in [CheckpointFormat::Bincode, CheckpointFormat::BincodeLz4]
    {
        let buffer = container.write_buffer(format).unwrap();
        let mut restored = RefinementContainer::read_buffer(&buffer, format, Box::new(EquidistantMidpoint)).unwrap();
        assert_eq!(restored.size(), 4);
        assert_eq!(restored.integral(), container.integral());
        assert_eq!(restored.evaluations(), 0);
        assert_eq!(restored.get_new_objects().len(), 4);
        assert_eq!(restored.session().families().sibling_integrals(FamilyId(0)),
            Some(&[Some(0.2), Some(0.3), Some(0.25), Some(0.26)][..]));
        // sibling integrals survived, so the automatic policy can decide
        restored.reinit_new_objects();
        restored.refine(0).unwrap();
        assert_eq!(restored.get_object(4).unwrap().as_extend_split().unwrap().start, vec![0.0, 0.0]);
        assert_eq!(restored.get_object(4).unwrap().as_extend_split().unwrap().end, vec![0.5, 0.5]);
    }
}

#[test]
fn cell_registry_is_part_of_the_checkpoint()
{
    let mut cells = CellRegistry::new(CellLattice::new(&[0.0], &[1.0], &[1]).unwrap());
    let roots: Vec<RefinementObject> = cells.root_cells().unwrap().into_iter().map(Into::into).collect();
    let mut container = RefinementContainer::new(roots, 1, RefinementSession::default().with_cells(cells)).unwrap();
    container.refine(1).unwrap();
    let restored = RefinementContainer::read_buffer(&container.write_buffer(CheckpointFormat::BincodeLz4).unwrap(),
        CheckpointFormat::BincodeLz4, Box::new(EquidistantMidpoint)).unwrap();
    assert_eq!(restored.session().cells().len(), 4);
    assert!(!restored.get_object(1).unwrap().is_refinable());
}

#[test]
fn corrupt_buffers_are_rejected()
{
    let garbage = [7u8, 1, 2];
    assert_eq!(deserialize::<ContainerSnapshot>(&garbage, CheckpointFormat::BincodeLz4).unwrap_err(), RefinementError::DecompressionFailed);
    assert_eq!(deserialize::<ContainerSnapshot>(&garbage, CheckpointFormat::Bincode).unwrap_err(), RefinementError::DeserializationFailed);
}
