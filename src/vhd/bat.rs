use std::io::{Read, Seek, SeekFrom};

use nom::{multi::count, number::complete::be_u32, IResult};

use crate::error::{run_parser, Result, VhdxParseError};

pub const UNALLOCATED: u32 = 0xFFFF_FFFF;

/// The Block Allocation Table: one big-endian `u32` sector offset per block,
/// `UNALLOCATED` marking a block that has never been written.
#[derive(Debug)]
pub struct BlockAllocationTable {
    pub entries: Vec<u32>,
}

fn parse_bat(count_entries: usize) -> impl Fn(&[u8]) -> IResult<&[u8], Vec<u32>, VhdxParseError<&[u8]>> {
    move |i| count(be_u32, count_entries)(i)
}

impl BlockAllocationTable {
    pub fn read<T: Read + Seek>(reader: &mut T, table_offset: u64, max_table_entries: u32) -> Result<Self> {
        let mut buffer = vec![0u8; max_table_entries as usize * 4];
        reader.seek(SeekFrom::Start(table_offset))?;
        reader.read_exact(&mut buffer)?;
        let entries = run_parser(&buffer, parse_bat(max_table_entries as usize))?;
        Ok(Self { entries })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    #[test]
    fn reads_bat_with_sentinel() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0u32.to_be_bytes());
        buf.extend_from_slice(&UNALLOCATED.to_be_bytes());
        buf.extend_from_slice(&4096u32.to_be_bytes());

        let mut cursor = Cursor::new(buf);
        let bat = BlockAllocationTable::read(&mut cursor, 0, 3).unwrap();
        assert_eq!(vec![0, UNALLOCATED, 4096], bat.entries);
    }
}
