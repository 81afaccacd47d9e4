//! Modern VHDX image parsing: a 1 MiB header section (file identifier plus two
//! redundant 4 KiB headers), a region table locating the Block Allocation
//! Table and metadata table, and a BAT whose entries are consulted only for
//! their low 3 state bits.

mod bat;
mod header;
mod metadata;
mod parse_utils;
mod region_table;
mod signatures;

use std::fs::File;
use std::path::Path;

use crate::area::{DataArea, DiskParser};
use crate::error::Result;

use bat::{Bat, BatLayout};
use header::{FileIdentifier, Header};
use metadata::MetadataTable;
use region_table::RegionTable;

pub use header::FILE_IDENTIFIER_SIZE;

pub struct VhdxParser {
    file: File,
    file_identifier: FileIdentifier,
    header: Header,
    region_table: RegionTable,
    metadata: MetadataTable,
    bat: Bat,
    layout: BatLayout,
}

impl DiskParser for VhdxParser {
    fn open(path: impl AsRef<Path>) -> Result<Self> {
        let mut file = File::open(path)?;

        let file_identifier = FileIdentifier::read(&mut file)?;
        let header = Header::read_current(&mut file)?;
        let region_table = RegionTable::read(&mut file)?;
        let metadata = MetadataTable::read(&mut file, region_table.metadata.file_offset)?;

        let layout = BatLayout::derive(
            metadata.file_parameters,
            metadata.virtual_disk_size,
            metadata.logical_sector_size,
            metadata.has_parent_locator,
        )?;

        let bat = Bat::read(&mut file, region_table.bat.file_offset, region_table.bat.length, &layout)?;

        Ok(Self {
            file,
            file_identifier,
            header,
            region_table,
            metadata,
            bat,
            layout,
        })
    }

    fn close(self) -> Result<()> {
        drop(self);
        Ok(())
    }

    fn enumerate_areas(&self) -> Result<Vec<DataArea>> {
        Ok(self
            .bat
            .enumerate_areas(&self.layout, self.metadata.file_parameters.block_size))
    }
}

impl VhdxParser {
    pub fn creator(&self) -> &str {
        &self.file_identifier.creator
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn region_table(&self) -> &RegionTable {
        &self.region_table
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;
    use uuid::Uuid;

    use signatures::{BAT_GUID, METADATA_REGION_GUID, FILE_PARAMETERS_GUID, LOGICAL_SECTOR_SIZE_GUID, PHYSICAL_SECTOR_SIZE_GUID, VIRTUAL_DISK_SIZE_GUID};

    fn region_entry_bytes(guid: Uuid, offset: u64, length: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(guid.to_bytes_le().as_ref());
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&1u32.to_le_bytes());
        buf
    }

    fn metadata_entry_bytes(guid: Uuid, offset: u32, length: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32);
        buf.extend_from_slice(guid.to_bytes_le().as_ref());
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&4u32.to_le_bytes()); // required
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf
    }

    fn header_bytes(seq: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4096);
        buf.extend_from_slice(b"head");
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&[0u8; 16]);
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.extend_from_slice(&1u16.to_le_bytes());
        buf.resize(4096, 0);
        buf
    }

    #[test]
    fn opens_a_small_dynamic_image_and_enumerates_areas() {
        let block_size: u32 = 1024 * 1024;
        let logical_sector_size: u32 = 512;
        let virtual_disk_size: u64 = 4 * block_size as u64;

        let region_table_offset = 3 * 64 * 1024usize;
        let metadata_offset = 4 * 1024 * 1024usize;
        let bat_offset = 5 * 1024 * 1024usize;

        let mut image = vec![0u8; bat_offset + 64 * 1024];

        image[0..8].copy_from_slice(b"vhdxfile");

        let h1 = header_bytes(1);
        image[64 * 1024..64 * 1024 + h1.len()].copy_from_slice(&h1);

        image[region_table_offset..region_table_offset + 4].copy_from_slice(b"regi");
        image[region_table_offset + 8..region_table_offset + 12].copy_from_slice(&2u32.to_le_bytes());
        let mut off = region_table_offset + 16;
        for bytes in [
            region_entry_bytes(BAT_GUID, bat_offset as u64, 64 * 1024),
            region_entry_bytes(METADATA_REGION_GUID, metadata_offset as u64, 64 * 1024),
        ] {
            image[off..off + bytes.len()].copy_from_slice(&bytes);
            off += bytes.len();
        }

        image[metadata_offset..metadata_offset + 8].copy_from_slice(b"metadata");
        image[metadata_offset + 10..metadata_offset + 12].copy_from_slice(&4u16.to_le_bytes());

        let fp_off = 32 + 32 * 4;
        let vds_off = fp_off + 64;
        let lss_off = vds_off + 64;
        let pss_off = lss_off + 64;

        let mut eoff = metadata_offset + 32;
        for (guid, o) in [
            (FILE_PARAMETERS_GUID, fp_off),
            (VIRTUAL_DISK_SIZE_GUID, vds_off),
            (LOGICAL_SECTOR_SIZE_GUID, lss_off),
            (PHYSICAL_SECTOR_SIZE_GUID, pss_off),
        ] {
            let bytes = metadata_entry_bytes(guid, o as u32, 8);
            image[eoff..eoff + bytes.len()].copy_from_slice(&bytes);
            eoff += 32;
        }

        image[metadata_offset + fp_off..metadata_offset + fp_off + 4].copy_from_slice(&block_size.to_le_bytes());
        image[metadata_offset + fp_off + 4..metadata_offset + fp_off + 8].copy_from_slice(&0u32.to_le_bytes());
        image[metadata_offset + vds_off..metadata_offset + vds_off + 8].copy_from_slice(&virtual_disk_size.to_le_bytes());
        image[metadata_offset + lss_off..metadata_offset + lss_off + 4].copy_from_slice(&logical_sector_size.to_le_bytes());
        image[metadata_offset + pss_off..metadata_offset + pss_off + 4].copy_from_slice(&512u32.to_le_bytes());

        // chunk_ratio = (1<<23)*512/1MiB = 4; data_blocks_count = 4; total_entries = 4 + (3>>2) = 4
        image[bat_offset..bat_offset + 8].copy_from_slice(&6u64.to_le_bytes());
        image[bat_offset + 8..bat_offset + 16].copy_from_slice(&0u64.to_le_bytes());
        image[bat_offset + 16..bat_offset + 24].copy_from_slice(&0u64.to_le_bytes());
        image[bat_offset + 24..bat_offset + 32].copy_from_slice(&7u64.to_le_bytes());

        let dir = std::env::temp_dir().join(format!("vhd-chain-areas-vhdx-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("dynamic.vhdx");
        {
            let mut file = File::create(&path).unwrap();
            file.write_all(&image).unwrap();
        }

        let parser = VhdxParser::open(&path).unwrap();
        let areas = parser.enumerate_areas().unwrap();
        assert_eq!(vec![DataArea::new(0, 1), DataArea::new(3, 1)], areas);
        parser.close().unwrap();

        std::fs::remove_file(&path).ok();
    }
}
