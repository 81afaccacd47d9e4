use std::collections::HashMap;
use std::io::{Read, Seek, SeekFrom};

use nom::{bytes::complete::take, combinator::map, sequence::tuple, IResult};
use uuid::Uuid;

use crate::error::{run_parser, Result, VhdxParseError, VhdxRsError};

use super::parse_utils::{t_guid, t_u32};
use super::signatures::{
    sign_matches_metadata, Signature, FILE_PARAMETERS_GUID, LOCATOR_TYPE_VHDX_GUID,
    LOGICAL_SECTOR_SIZE_GUID, PAGE_83_GUID, PARENT_LOCATOR_GUID, PHYSICAL_SECTOR_SIZE_GUID,
    VIRTUAL_DISK_SIZE_GUID,
};

pub const HEADER_SIZE: usize = 32;
pub const ENTRY_SIZE: usize = 32;
pub const MAX_ENTRIES: u16 = 2047;
pub const PARENT_LOCATOR_HEADER_SIZE: usize = 20;

const IS_REQUIRED: u32 = 0x04;

const PARAMS_LEAVE_BLOCKS_ALLOCATED: u32 = 0x01;
const PARAMS_HAS_PARENT: u32 = 0x02;

pub const BLOCK_SIZE_MIN: u32 = 1024 * 1024;
pub const BLOCK_SIZE_MAX: u32 = 256 * 1024 * 1024;

#[derive(Debug, Clone, Copy)]
pub struct FileParameters {
    pub block_size: u32,
    pub leave_blocks_allocated: bool,
    pub has_parent: bool,
}

#[derive(Debug)]
pub struct MetadataTable {
    pub signature: Signature,
    pub entry_count: u16,
    pub file_parameters: FileParameters,
    pub virtual_disk_size: u64,
    pub logical_sector_size: u32,
    pub physical_sector_size: u32,
    /// True only once a parent-locator object has actually been accepted: the
    /// file parameters' HAS_PARENT bit is set, a parent-locator metadata entry
    /// is present, and its `locator_type` is the VHDX parent-locator GUID. A
    /// HAS_PARENT image with a missing or non-VHDX locator leaves this false,
    /// matching the reference parser's `parent_entries` staying null in that case.
    pub has_parent_locator: bool,
}

struct Entry {
    item_id: Uuid,
    offset: u32,
    data_bits: u32,
}

fn parse_table_header(buffer: &[u8]) -> IResult<&[u8], (Signature, u16), VhdxParseError<&[u8]>> {
    map(
        tuple((
            map(take(8usize), sign_matches_metadata),
            take(2usize), // reserved
            nom::number::complete::le_u16,
            take(20usize), // reserved2
        )),
        |(signature, _, entry_count, _)| (signature, entry_count),
    )(buffer)
}

fn parse_entry(buffer: &[u8]) -> IResult<&[u8], Entry, VhdxParseError<&[u8]>> {
    map(
        tuple((t_guid, t_u32, t_u32, t_u32, take(4usize))),
        |(item_id, offset, _length, data_bits, _)| Entry {
            item_id,
            offset,
            data_bits,
        },
    )(buffer)
}

fn parse_file_parameters(buffer: &[u8]) -> IResult<&[u8], FileParameters, VhdxParseError<&[u8]>> {
    map(tuple((t_u32, t_u32)), |(block_size, data_bits)| FileParameters {
        block_size,
        leave_blocks_allocated: data_bits & PARAMS_LEAVE_BLOCKS_ALLOCATED != 0,
        has_parent: data_bits & PARAMS_HAS_PARENT != 0,
    })(buffer)
}

fn parse_parent_locator_header(buffer: &[u8]) -> IResult<&[u8], Uuid, VhdxParseError<&[u8]>> {
    map(
        tuple((t_guid, take(2usize), nom::number::complete::le_u16)),
        |(locator_type, _reserved, _key_value_count)| locator_type,
    )(buffer)
}

impl MetadataTable {
    pub fn read<T: Read + Seek>(reader: &mut T, region_offset: u64) -> Result<Self> {
        reader.seek(SeekFrom::Start(region_offset))?;
        let mut header_buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_buf)?;
        let (signature, entry_count) = run_parser(&header_buf, parse_table_header)?;

        if signature != Signature::MetaData {
            return Err(VhdxRsError::Format("metadata table signature mismatch".into()));
        }
        if entry_count > MAX_ENTRIES {
            return Err(VhdxRsError::Format("metadata entry_count exceeds 2047".into()));
        }

        let mut by_guid: HashMap<Uuid, Entry> = HashMap::new();
        for _ in 0..entry_count {
            let mut entry_buf = [0u8; ENTRY_SIZE];
            reader.read_exact(&mut entry_buf)?;
            let entry = run_parser(&entry_buf, parse_entry)?;

            let known = [
                FILE_PARAMETERS_GUID,
                VIRTUAL_DISK_SIZE_GUID,
                PAGE_83_GUID,
                LOGICAL_SECTOR_SIZE_GUID,
                PHYSICAL_SECTOR_SIZE_GUID,
                PARENT_LOCATOR_GUID,
            ];

            if known.contains(&entry.item_id) {
                if by_guid.contains_key(&entry.item_id) {
                    return Err(VhdxRsError::Format(format!(
                        "duplicate metadata entry {}",
                        entry.item_id
                    )));
                }
                by_guid.insert(entry.item_id, entry);
            } else if entry.data_bits & IS_REQUIRED != 0 {
                return Err(VhdxRsError::Unsupported(format!(
                    "required metadata entry {} is not understood",
                    entry.item_id
                )));
            }
        }

        let read_item = |reader: &mut T, guid: &Uuid, size: usize| -> Result<Vec<u8>> {
            let entry = by_guid
                .get(guid)
                .ok_or_else(|| VhdxRsError::Format(format!("missing required metadata item {guid}")))?;
            let mut buf = vec![0u8; size];
            reader.seek(SeekFrom::Start(region_offset + entry.offset as u64))?;
            reader.read_exact(&mut buf)?;
            Ok(buf)
        };

        let fp_buf = read_item(reader, &FILE_PARAMETERS_GUID, 8)?;
        let file_parameters = run_parser(&fp_buf, parse_file_parameters)?;

        let has_parent_locator = if file_parameters.has_parent {
            match by_guid.get(&PARENT_LOCATOR_GUID) {
                Some(entry) => {
                    let mut header_buf = [0u8; PARENT_LOCATOR_HEADER_SIZE];
                    reader.seek(SeekFrom::Start(region_offset + entry.offset as u64))?;
                    reader.read_exact(&mut header_buf)?;
                    let locator_type = run_parser(&header_buf, parse_parent_locator_header)?;
                    locator_type == LOCATOR_TYPE_VHDX_GUID
                }
                None => false,
            }
        } else {
            false
        };

        let vds_buf = read_item(reader, &VIRTUAL_DISK_SIZE_GUID, 8)?;
        let virtual_disk_size = u64::from_le_bytes(vds_buf.try_into().unwrap());

        let lss_buf = read_item(reader, &LOGICAL_SECTOR_SIZE_GUID, 4)?;
        let logical_sector_size = u32::from_le_bytes(lss_buf.try_into().unwrap());

        let pss_buf = read_item(reader, &PHYSICAL_SECTOR_SIZE_GUID, 4)?;
        let physical_sector_size = u32::from_le_bytes(pss_buf.try_into().unwrap());

        if file_parameters.block_size < BLOCK_SIZE_MIN || file_parameters.block_size > BLOCK_SIZE_MAX {
            return Err(VhdxRsError::Format("block_size out of [1 MiB, 256 MiB] range".into()));
        }
        if logical_sector_size != 512 && logical_sector_size != 4096 {
            return Err(VhdxRsError::Format("logical sector size must be 512 or 4096".into()));
        }
        if !file_parameters.block_size.is_power_of_two() {
            return Err(VhdxRsError::Format("block_size is not a power of two".into()));
        }

        Ok(MetadataTable {
            signature,
            entry_count,
            file_parameters,
            virtual_disk_size,
            logical_sector_size,
            physical_sector_size,
            has_parent_locator,
        })
    }
}
