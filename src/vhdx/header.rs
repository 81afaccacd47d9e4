use std::io::{Read, Seek, SeekFrom};

use crc::{Crc, CRC_32_ISCSI};
use nom::{combinator::map, sequence::tuple, IResult};

use crate::error::{run_parser, Result, VhdxParseError, VhdxRsError};

use super::parse_utils::{t_creator, t_u16, t_u32, t_u64};
use super::signatures::{sign_matches_file, sign_matches_head, Signature};

pub const FILE_IDENTIFIER_SIZE: usize = 64 * 1024;
pub const HEADER1_OFFSET: u64 = 64 * 1024;
pub const HEADER2_OFFSET: u64 = 128 * 1024;
pub const HEADER_SIZE: usize = 4 * 1024;

#[derive(Debug)]
pub struct FileIdentifier {
    pub signature: Signature,
    pub creator: String,
}

fn parse_file_identifier(buffer: &[u8]) -> IResult<&[u8], FileIdentifier, VhdxParseError<&[u8]>> {
    map(
        tuple((
            nom::combinator::map(nom::bytes::complete::take(8usize), sign_matches_file),
            t_creator,
        )),
        |(signature, creator)| FileIdentifier { signature, creator },
    )(buffer)
}

impl FileIdentifier {
    pub fn read<T: Read + Seek>(reader: &mut T) -> Result<Self> {
        let mut buffer = [0u8; FILE_IDENTIFIER_SIZE];
        reader.seek(SeekFrom::Start(0))?;
        reader.read_exact(&mut buffer)?;
        let identifier = run_parser(&buffer, parse_file_identifier)?;
        if identifier.signature != Signature::Vhdxfile {
            return Err(VhdxRsError::Format("missing VHDX file identifier signature".into()));
        }
        Ok(identifier)
    }
}

/// One of the two redundant 4 KiB header structures. Only `signature`,
/// `sequence_number` and `version` decide current-header selection; `checksum`
/// is parsed and kept but never used as a validity gate (see the crate-level
/// docs on why this deliberately diverges from a CRC-verifying reader).
#[derive(Debug, Clone)]
pub struct Header {
    pub signature: Signature,
    pub checksum: u32,
    pub sequence_number: u64,
    pub version: u16,
    pub log_guid_is_zero: bool,
}

fn parse_header(buffer: &[u8]) -> IResult<&[u8], Header, VhdxParseError<&[u8]>> {
    map(
        tuple((
            nom::combinator::map(nom::bytes::complete::take(4usize), sign_matches_head),
            t_u32,
            t_u64,
            nom::bytes::complete::take(16usize), // file_write_guid
            nom::bytes::complete::take(16usize), // data_write_guid
            nom::bytes::complete::take(16usize), // log_guid
            t_u16,                               // log_version
            t_u16,                               // version
        )),
        |(signature, checksum, sequence_number, _, _, log_guid, _log_version, version)| Header {
            signature,
            checksum,
            sequence_number,
            version,
            log_guid_is_zero: log_guid.iter().all(|&b| b == 0),
        },
    )(buffer)
}

/// CRC-32C over a raw 4 KiB header blob, with the on-disk `checksum` field
/// (bytes 4..8) zeroed for the computation, per the format's own checksum
/// convention. Offered for callers that want it; this crate's own header
/// selection never consults it.
pub fn crc32(buffer: &[u8; HEADER_SIZE]) -> u32 {
    let mut zeroed = *buffer;
    zeroed[4..8].copy_from_slice(&[0u8; 4]);
    let crc = Crc::<u32>::new(&CRC_32_ISCSI);
    crc.checksum(&zeroed)
}

impl Header {
    pub fn is_valid(&self) -> bool {
        self.signature == Signature::Head && self.version == 1
    }

    fn read_at<T: Read + Seek>(reader: &mut T, offset: u64) -> Result<([u8; HEADER_SIZE], Self)> {
        let mut buffer = [0u8; HEADER_SIZE];
        reader.seek(SeekFrom::Start(offset))?;
        reader.read_exact(&mut buffer)?;
        let header = run_parser(&buffer, parse_header)?;
        Ok((buffer, header))
    }

    /// Reads both header copies and picks the current one. A header is valid
    /// if its signature and version check out (checksum is not consulted);
    /// current is whichever valid header has the higher sequence number, or
    /// the only valid one, or either one if both are valid, have equal
    /// sequence numbers, and their 4 KiB blobs are byte-identical.
    pub fn read_current<T: Read + Seek>(reader: &mut T) -> Result<Self> {
        let (buf1, h1) = Self::read_at(reader, HEADER1_OFFSET)?;
        let (buf2, h2) = Self::read_at(reader, HEADER2_OFFSET)?;

        let h1_valid = h1.is_valid();
        let h2_valid = h2.is_valid();

        match (h1_valid, h2_valid) {
            (true, false) => Ok(h1),
            (false, true) => Ok(h2),
            (false, false) => Err(VhdxRsError::Format("no valid VHDX header".into())),
            (true, true) => {
                if h1.sequence_number > h2.sequence_number {
                    Ok(h1)
                } else if h2.sequence_number > h1.sequence_number {
                    Ok(h2)
                } else if buf1 == buf2 {
                    Ok(h1)
                } else {
                    Err(VhdxRsError::Format(
                        "both VHDX headers valid with equal sequence numbers but differing contents".into(),
                    ))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Cursor;

    fn header_bytes(seq: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE);
        buf.extend_from_slice(b"head");
        buf.extend_from_slice(&0u32.to_le_bytes()); // checksum
        buf.extend_from_slice(&seq.to_le_bytes());
        buf.extend_from_slice(&[0u8; 16]); // file_write_guid
        buf.extend_from_slice(&[0u8; 16]); // data_write_guid
        buf.extend_from_slice(&[0u8; 16]); // log_guid
        buf.extend_from_slice(&0u16.to_le_bytes()); // log_version
        buf.extend_from_slice(&1u16.to_le_bytes()); // version
        buf.resize(HEADER_SIZE, 0);
        buf
    }

    #[test]
    fn picks_higher_sequence_number() {
        let mut image = vec![0u8; HEADER2_OFFSET as usize + HEADER_SIZE];
        let h1 = header_bytes(5);
        let h2 = header_bytes(7);
        image[HEADER1_OFFSET as usize..HEADER1_OFFSET as usize + HEADER_SIZE].copy_from_slice(&h1);
        image[HEADER2_OFFSET as usize..HEADER2_OFFSET as usize + HEADER_SIZE].copy_from_slice(&h2);

        let mut cursor = Cursor::new(image);
        let header = Header::read_current(&mut cursor).unwrap();
        assert_eq!(7, header.sequence_number);
    }

    #[test]
    fn identical_header_blobs_pick_either_without_error() {
        let mut image = vec![0u8; HEADER2_OFFSET as usize + HEADER_SIZE];
        let h = header_bytes(3);
        image[HEADER1_OFFSET as usize..HEADER1_OFFSET as usize + HEADER_SIZE].copy_from_slice(&h);
        image[HEADER2_OFFSET as usize..HEADER2_OFFSET as usize + HEADER_SIZE].copy_from_slice(&h);

        let mut cursor = Cursor::new(image);
        let header = Header::read_current(&mut cursor).unwrap();
        assert_eq!(3, header.sequence_number);
    }

    #[test]
    fn crc32_ignores_the_checksum_field_itself() {
        let mut buf: [u8; HEADER_SIZE] = [0; HEADER_SIZE];
        let bytes = header_bytes(1);
        buf.copy_from_slice(&bytes);
        let mut with_garbage_checksum = buf;
        with_garbage_checksum[4..8].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        assert_eq!(crc32(&buf), crc32(&with_garbage_checksum));
    }

    #[test]
    fn falls_back_to_only_valid_header() {
        let mut image = vec![0u8; HEADER2_OFFSET as usize + HEADER_SIZE];
        let h1 = header_bytes(4);
        image[HEADER1_OFFSET as usize..HEADER1_OFFSET as usize + HEADER_SIZE].copy_from_slice(&h1);
        // header2 left all-zero: invalid signature

        let mut cursor = Cursor::new(image);
        let header = Header::read_current(&mut cursor).unwrap();
        assert_eq!(4, header.sequence_number);
    }

    #[test]
    fn rejects_file_identifier_with_bad_signature() {
        let mut buffer = [0u8; FILE_IDENTIFIER_SIZE];
        buffer[0..8].copy_from_slice(b"notvhdx!");

        let mut cursor = Cursor::new(buffer.to_vec());
        let result = FileIdentifier::read(&mut cursor);
        assert!(result.is_err());
    }
}
