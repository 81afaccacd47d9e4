use nom::{
    bytes::complete::take,
    combinator::map,
    number::complete::{be_u32, be_u64},
    sequence::tuple,
    IResult,
};

use crate::error::VhdxParseError;

pub const HEADER_SIZE: usize = 1024;
pub const COOKIE: &[u8] = b"cxsparse";

/// The dynamic disk header, read from the footer's `data_offset`. Only the
/// fields needed to locate and size the Block Allocation Table are kept; the
/// parent locator entries (used to resolve a differencing disk's parent chain)
/// are skipped wholesale.
#[derive(Debug)]
pub struct VhdDynamicHeader {
    cookie_valid: bool,
    pub table_offset: u64,
    pub max_table_entries: u32,
    pub block_size: u32,
}

impl VhdDynamicHeader {
    pub fn cookie_valid(&self) -> bool {
        self.cookie_valid
    }
}

fn t_cookie(i: &[u8]) -> IResult<&[u8], bool, VhdxParseError<&[u8]>> {
    map(take(8usize), |bytes: &[u8]| bytes == COOKIE)(i)
}

pub fn parse_dynamic_header(i: &[u8]) -> IResult<&[u8], VhdDynamicHeader, VhdxParseError<&[u8]>> {
    map(
        tuple((
            t_cookie,
            take(8usize), // data offset (reserved, always 0xFFFFFFFFFFFFFFFF)
            be_u64,       // table offset
            take(4usize), // header version
            be_u32,       // max table entries
            be_u32,       // block size
            take(988usize), // checksum + parent uuid + parent timestamp + reserved +
                             // parent unicode name + parent locator entries + reserved
        )),
        |(cookie_valid, _, table_offset, _, max_table_entries, block_size, _)| {
            VhdDynamicHeader {
                cookie_valid,
                table_offset,
                max_table_entries,
                block_size,
            }
        },
    )(i)
}
