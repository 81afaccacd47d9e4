use std::io::{Read, Seek, SeekFrom};

use nom::{multi::count, number::complete::le_u64, IResult};

use crate::area::DataArea;
use crate::error::{run_parser, Result, VhdxParseError, VhdxRsError};
use crate::MIB;

use super::metadata::FileParameters;

const MAX_SECTORS_PER_BLOCK: u64 = 1 << 23;

const PAYLOAD_BLOCK_FULLY_PRESENT: u8 = 6;
const PAYLOAD_BLOCK_PARTIALLY_PRESENT: u8 = 7;
const STATE_BIT_MASK: u64 = 0x07;

/// Derived quantities that govern how the BAT is laid out and iterated.
/// Everything here is computed, never read directly off the disk; see
/// `vhdxCalcBatEntries` in the format's own reference implementation.
#[derive(Debug, Clone, Copy)]
pub struct BatLayout {
    pub chunk_ratio: u64,
    pub sectors_per_block: u32,
    pub data_blocks_count: u64,
    pub total_entries: u64,
}

impl BatLayout {
    /// `has_parent_locator` must reflect whether a parent-locator object was
    /// actually accepted (HAS_PARENT set, entry present, `locator_type` the
    /// VHDX parent-locator GUID) — not just the file parameters' HAS_PARENT bit
    /// on its own, which an image can set without a usable locator to back it.
    pub fn derive(
        file_parameters: FileParameters,
        virtual_disk_size: u64,
        logical_sector_size: u32,
        has_parent_locator: bool,
    ) -> Result<Self> {
        let block_size = file_parameters.block_size as u64;

        let sectors_per_block = file_parameters.block_size / logical_sector_size;
        if !sectors_per_block.is_power_of_two() {
            return Err(VhdxRsError::Format("sectors_per_block is not a power of two".into()));
        }

        let chunk_ratio = (MAX_SECTORS_PER_BLOCK * logical_sector_size as u64) / block_size;
        if !chunk_ratio.is_power_of_two() {
            return Err(VhdxRsError::Format("chunk_ratio is not a power of two".into()));
        }

        let data_blocks_count = div_round_up(virtual_disk_size, block_size);
        let bitmap_blocks_count = div_round_up(data_blocks_count, chunk_ratio);

        let total_entries = if has_parent_locator {
            bitmap_blocks_count * (chunk_ratio + 1)
        } else {
            data_blocks_count + ((data_blocks_count - 1) >> chunk_ratio.trailing_zeros())
        };

        Ok(Self {
            chunk_ratio,
            sectors_per_block,
            data_blocks_count,
            total_entries,
        })
    }
}

fn div_round_up(n: u64, d: u64) -> u64 {
    (n + d - 1) / d
}

fn parse_entries(count_entries: usize) -> impl Fn(&[u8]) -> IResult<&[u8], Vec<u64>, VhdxParseError<&[u8]>> {
    move |i| count(le_u64, count_entries)(i)
}

/// The Block Allocation Table. Each entry is a little-endian `u64`; only its
/// low 3 state bits matter here (the upper 44 bits, the block's file offset,
/// are never consulted — this crate reports *where* data lives in the
/// virtual disk's address space, not where it physically sits in the file).
#[derive(Debug)]
pub struct Bat {
    entries: Vec<u64>,
}

impl Bat {
    pub fn read<T: Read + Seek>(reader: &mut T, file_offset: u64, region_length: u32, layout: &BatLayout) -> Result<Self> {
        if layout.total_entries > region_length as u64 / 8 {
            return Err(VhdxRsError::Format(
                "BAT region is too small for the number of entries its own metadata implies".into(),
            ));
        }

        let mut buffer = vec![0u8; layout.total_entries as usize * 8];
        reader.seek(SeekFrom::Start(file_offset))?;
        reader.read_exact(&mut buffer)?;
        let entries = run_parser(&buffer, parse_entries(layout.total_entries as usize))?;
        Ok(Self { entries })
    }

    /// Walks payload BAT entries in groups of `chunk_ratio`, skipping the
    /// sector-bitmap entry that follows each group, and emits one `DataArea`
    /// per fully- or partially-present payload block. `pbindex` (the payload
    /// block index used to compute each area's offset) only advances across
    /// payload entries, never across sector-bitmap entries.
    pub fn enumerate_areas(&self, layout: &BatLayout, block_size: u32) -> Vec<DataArea> {
        let mut areas = Vec::new();
        let mut payblocks = layout.chunk_ratio;
        let mut pbindex: u64 = 0;

        for &entry in &self.entries {
            if payblocks > 0 {
                payblocks -= 1;
                let state = (entry & STATE_BIT_MASK) as u8;
                if state == PAYLOAD_BLOCK_FULLY_PRESENT || state == PAYLOAD_BLOCK_PARTIALLY_PRESENT {
                    let offset = (pbindex * block_size as u64) / MIB;
                    areas.push(DataArea::new(offset as u32, block_size / MIB as u32));
                }
                pbindex += 1;
            } else {
                payblocks = layout.chunk_ratio;
            }
        }

        areas
    }
}
