use nom::{
    bytes::complete::take,
    combinator::map,
    number::complete::{be_u32, be_u64},
    sequence::tuple,
    IResult,
};

use crate::error::VhdxParseError;

pub const FOOTER_SIZE: usize = 512;
pub const COOKIE: &[u8] = b"conectix";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VhdDiskType {
    Fixed,
    Dynamic,
    Differencing,
    Other(u32),
}

impl From<u32> for VhdDiskType {
    fn from(value: u32) -> Self {
        match value {
            2 => VhdDiskType::Fixed,
            3 => VhdDiskType::Dynamic,
            4 => VhdDiskType::Differencing,
            other => VhdDiskType::Other(other),
        }
    }
}

/// The hard disk footer, present at offset 0 for dynamic/differencing disks and
/// mirrored at `file_size - 512` for every disk type. Only the fields this crate
/// actually consults are kept; geometry, creator identity and the checksum are
/// read but not interpreted.
#[derive(Debug)]
pub struct VhdFooter {
    cookie_valid: bool,
    pub data_offset: u64,
    pub cur_size: u64,
    pub disk_type: VhdDiskType,
}

impl VhdFooter {
    pub fn cookie_valid(&self) -> bool {
        self.cookie_valid
    }
}

fn t_cookie(i: &[u8]) -> IResult<&[u8], bool, VhdxParseError<&[u8]>> {
    map(take(8usize), |bytes: &[u8]| bytes == COOKIE)(i)
}

pub fn parse_footer(i: &[u8]) -> IResult<&[u8], VhdFooter, VhdxParseError<&[u8]>> {
    map(
        tuple((
            t_cookie,
            take(8usize), // features + file format version
            be_u64,       // data offset
            take(16usize), // timestamp + creator app + creator version + creator host os
            take(8usize), // original size
            be_u64,       // current size
            take(4usize), // disk geometry
            be_u32,       // disk type
            take(4usize), // checksum
            take(444usize), // unique id + saved state + reserved
        )),
        |(cookie_valid, _, data_offset, _, _, cur_size, _, disk_type, _, _)| VhdFooter {
            cookie_valid,
            data_offset,
            cur_size,
            disk_type: VhdDiskType::from(disk_type),
        },
    )(i)
}
