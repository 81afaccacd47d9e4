//! Legacy VHD image parsing: a single 512-byte footer (mirrored at offset 0 for
//! dynamic/differencing disks, present only at the end for fixed disks), an
//! optional dynamic disk header, and a flat Block Allocation Table.

mod bat;
mod dynamic_header;
mod footer;

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

use crate::area::{DataArea, DiskParser};
use crate::error::{Result, VhdxRsError};
use crate::MIB;

use bat::{BlockAllocationTable, UNALLOCATED};
use dynamic_header::{parse_dynamic_header, VhdDynamicHeader, HEADER_SIZE as DYNAMIC_HEADER_SIZE};
use footer::{parse_footer, VhdDiskType, VhdFooter, FOOTER_SIZE};

/// Whether the opened image behaves as a flat fixed-size disk or as a disk
/// backed by a Block Allocation Table. This collapses `DYNAMIC` and
/// `DIFFERENCING` into one on-disk shape, matching the source parser, which
/// never actually branches on the footer's `DiskType` field: it infers fixed
/// vs. dynamic purely from whether the footer is found at offset 0 or only at
/// the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VhdKind {
    Fixed,
    Dynamic,
}

pub struct VhdParser {
    file: File,
    kind: VhdKind,
    disk_type: VhdDiskType,
    cur_size: u64,
    dynamic: Option<(VhdDynamicHeader, BlockAllocationTable)>,
}

impl VhdParser {
    fn read_footer_at(file: &mut File, offset: u64) -> Result<VhdFooter> {
        let mut buffer = [0u8; FOOTER_SIZE];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        let (_, footer) = parse_footer(&buffer).map_err(|e| match e {
            nom::Err::Error(e) | nom::Err::Failure(e) => VhdxRsError::from(e),
            nom::Err::Incomplete(_) => VhdxRsError::Format("incomplete footer".into()),
        })?;
        Ok(footer)
    }

    fn read_dynamic_header_at(file: &mut File, offset: u64) -> Result<VhdDynamicHeader> {
        let mut buffer = [0u8; DYNAMIC_HEADER_SIZE];
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut buffer)?;
        let (_, header) = parse_dynamic_header(&buffer).map_err(|e| match e {
            nom::Err::Error(e) | nom::Err::Failure(e) => VhdxRsError::from(e),
            nom::Err::Incomplete(_) => VhdxRsError::Format("incomplete dynamic disk header".into()),
        })?;
        Ok(header)
    }
}

impl DiskParser for VhdParser {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();

        let (kind, footer) = match Self::read_footer_at(&mut file, 0) {
            Ok(footer) if footer.cookie_valid() => (VhdKind::Dynamic, footer),
            _ => {
                if file_size < FOOTER_SIZE as u64 {
                    return Err(VhdxRsError::Format("file too small for a VHD footer".into()));
                }
                let footer = Self::read_footer_at(&mut file, file_size - FOOTER_SIZE as u64)?;
                if !footer.cookie_valid() {
                    return Err(VhdxRsError::Format("missing VHD footer cookie".into()));
                }
                (VhdKind::Fixed, footer)
            }
        };

        let dynamic = match kind {
            VhdKind::Dynamic => {
                let header = Self::read_dynamic_header_at(&mut file, footer.data_offset)?;
                if !header.cookie_valid() {
                    return Err(VhdxRsError::Format("missing dynamic disk header cookie".into()));
                }
                let bat = BlockAllocationTable::read(
                    &mut file,
                    header.table_offset,
                    header.max_table_entries,
                )?;
                Some((header, bat))
            }
            VhdKind::Fixed => None,
        };

        Ok(Self {
            file,
            kind,
            disk_type: footer.disk_type,
            cur_size: footer.cur_size,
            dynamic,
        })
    }

    fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    fn enumerate_areas(&self) -> Result<Vec<DataArea>> {
        match (&self.kind, &self.dynamic) {
            (VhdKind::Dynamic, Some((header, bat))) => {
                let sectors_per_block = header.block_size / 512;
                let mut areas = Vec::new();
                for (i, &entry) in bat.entries.iter().enumerate() {
                    if entry == UNALLOCATED {
                        continue;
                    }
                    let offset = (i as u64 * sectors_per_block as u64 * 512) / MIB;
                    areas.push(DataArea::new(offset as u32, header.block_size / MIB as u32));
                }
                Ok(areas)
            }
            _ => Ok(vec![DataArea::new(0, (self.cur_size / MIB) as u32)]),
        }
    }
}

impl VhdParser {
    pub fn disk_type(&self) -> VhdDiskType {
        self.disk_type
    }
}
