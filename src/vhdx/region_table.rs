use std::io::{Read, Seek, SeekFrom};

use nom::{bytes::complete::take, combinator::map, sequence::tuple, IResult};
use uuid::Uuid;

use crate::error::{run_parser, Result, VhdxParseError, VhdxRsError};

use super::parse_utils::{t_bool_u32, t_guid, t_u32, t_u64};
use super::signatures::{sign_matches_regi, Signature, BAT_GUID, METADATA_REGION_GUID};

pub const REGION_TABLE_OFFSET: u64 = 3 * 64 * 1024;
pub const HEADER_SIZE: usize = 16;
pub const ENTRY_SIZE: usize = 32;
pub const MAX_ENTRIES: u32 = 2047;

#[derive(Debug)]
pub struct RegionEntry {
    pub guid: Uuid,
    pub file_offset: u64,
    pub length: u32,
    pub required: bool,
}

fn parse_entry(buffer: &[u8]) -> IResult<&[u8], RegionEntry, VhdxParseError<&[u8]>> {
    map(
        tuple((t_guid, t_u64, t_u32, t_bool_u32)),
        |(guid, file_offset, length, required)| RegionEntry {
            guid,
            file_offset,
            length,
            required,
        },
    )(buffer)
}

fn parse_header_fields(buffer: &[u8]) -> IResult<&[u8], (Signature, u32, u32), VhdxParseError<&[u8]>> {
    map(
        tuple((
            map(take(4usize), sign_matches_regi),
            t_u32,
            t_u32,
            take(4usize), // reserved
        )),
        |(signature, checksum, entry_count, _)| (signature, checksum, entry_count),
    )(buffer)
}

/// The region table: a header followed by up to 2047 entries identifying the
/// BAT and metadata regions (and possibly others this crate does not
/// recognize). Only the first copy, at 192 KiB, is consulted — the source
/// parser never reads the redundant copy at 256 KiB either.
#[derive(Debug)]
pub struct RegionTable {
    pub signature: Signature,
    pub checksum: u32,
    pub bat: RegionEntry,
    pub metadata: RegionEntry,
    registered: Vec<(u64, u64)>,
}

impl RegionTable {
    fn register(&mut self, start: u64, length: u32) -> Result<()> {
        let end = start + length as u64;
        for &(existing_start, existing_end) in &self.registered {
            let disjoint = start >= existing_end || end <= existing_start;
            if !disjoint {
                return Err(VhdxRsError::Format(format!(
                    "region [{start}, {end}) overlaps an already-registered region"
                )));
            }
        }
        self.registered.push((start, end));
        Ok(())
    }

    pub fn read<T: Read + Seek>(reader: &mut T) -> Result<Self> {
        reader.seek(SeekFrom::Start(REGION_TABLE_OFFSET))?;
        let mut header_buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header_buf)?;
        let (signature, checksum, entry_count) = run_parser(&header_buf, parse_header_fields)?;

        if signature != Signature::Regi {
            return Err(VhdxRsError::Format("region table signature mismatch".into()));
        }
        if entry_count > MAX_ENTRIES {
            return Err(VhdxRsError::Format("region table entry_count exceeds 2047".into()));
        }

        let mut bat: Option<RegionEntry> = None;
        let mut metadata: Option<RegionEntry> = None;
        let mut table = RegionTable {
            signature,
            checksum,
            bat: RegionEntry {
                guid: Uuid::nil(),
                file_offset: 0,
                length: 0,
                required: false,
            },
            metadata: RegionEntry {
                guid: Uuid::nil(),
                file_offset: 0,
                length: 0,
                required: false,
            },
            registered: Vec::new(),
        };

        for _ in 0..entry_count {
            let mut entry_buf = [0u8; ENTRY_SIZE];
            reader.read_exact(&mut entry_buf)?;
            let entry = run_parser(&entry_buf, parse_entry)?;

            table.register(entry.file_offset, entry.length)?;

            if entry.guid == BAT_GUID {
                if bat.is_some() {
                    return Err(VhdxRsError::Format("duplicate BAT region entry".into()));
                }
                bat = Some(entry);
            } else if entry.guid == METADATA_REGION_GUID {
                if metadata.is_some() {
                    return Err(VhdxRsError::Format("duplicate metadata region entry".into()));
                }
                metadata = Some(entry);
            } else if entry.required {
                return Err(VhdxRsError::Unsupported(format!(
                    "required region table entry {} is not understood",
                    entry.guid
                )));
            }
        }

        table.bat = bat.ok_or_else(|| VhdxRsError::Format("no BAT region entry found".into()))?;
        table.metadata =
            metadata.ok_or_else(|| VhdxRsError::Format("no metadata region entry found".into()))?;

        Ok(table)
    }
}
