use nom::{
    bytes::complete::take,
    combinator::{map, map_res},
    number::complete::{le_u16, le_u32, le_u64},
    IResult,
};
use uuid::{Builder, Uuid};

use crate::error::VhdxParseError;

pub fn t_guid(buffer: &[u8]) -> IResult<&[u8], Uuid, VhdxParseError<&[u8]>> {
    map_res(take(16usize), |bytes: &[u8]| {
        Builder::from_slice_le(bytes).map(Builder::into_uuid)
    })(buffer)
}

pub fn t_u16(buffer: &[u8]) -> IResult<&[u8], u16, VhdxParseError<&[u8]>> {
    le_u16(buffer)
}

pub fn t_u32(buffer: &[u8]) -> IResult<&[u8], u32, VhdxParseError<&[u8]>> {
    le_u32(buffer)
}

pub fn t_u64(buffer: &[u8]) -> IResult<&[u8], u64, VhdxParseError<&[u8]>> {
    le_u64(buffer)
}

pub fn t_bool_u32(buffer: &[u8]) -> IResult<&[u8], bool, VhdxParseError<&[u8]>> {
    map(le_u32, |value: u32| value > 0)(buffer)
}

pub fn t_creator(buffer: &[u8]) -> IResult<&[u8], String, VhdxParseError<&[u8]>> {
    map(take(512usize), |bytes: &[u8]| {
        let units: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|b: &[u8]| u16::from_le_bytes([b[0], b[1]]))
            .collect();
        String::from_utf16_lossy(&units)
            .trim_end_matches(char::from(0))
            .to_string()
    })(buffer)
}
