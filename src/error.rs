use nom::error::{ErrorKind as NomErrorKind, FromExternalError, ParseError};
use std::fmt::Debug;
use thiserror::Error;

/// Crate-wide result alias, matching every public operation that can fail.
pub type Result<T> = std::result::Result<T, VhdxRsError>;

#[derive(Debug, Error)]
pub enum VhdxRsError {
    /// A structural field (signature, size, bitfield) does not hold what the on-disk
    /// layout requires. Covers both VHD and VHDX footers/headers/tables.
    #[error("format error: {0}")]
    Format(String),

    /// A structurally valid file uses a feature this crate does not implement
    /// (differencing-parent chain resolution, non-power-of-two block size, etc).
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Mirrors the source's malloc-failure path. Safe Rust cannot normally trigger
    /// this short of a panicking allocator, but the variant is kept so every
    /// documented failure category has a corresponding arm.
    #[error("allocation error: {0}")]
    Alloc(String),
}

/// Backtracking parse error used as the `nom` error type throughout the crate's
/// binary-format grammars. Deliberately minimal: it records the innermost failure
/// and where it happened, nothing more.
#[derive(Debug)]
pub struct VhdxParseError<I> {
    pub input: I,
    pub kind: NomErrorKind,
}

impl<I> ParseError<I> for VhdxParseError<I> {
    fn from_error_kind(input: I, kind: NomErrorKind) -> Self {
        Self { input, kind }
    }

    fn append(_input: I, _kind: NomErrorKind, other: Self) -> Self {
        other
    }
}

impl<I, E> FromExternalError<I, E> for VhdxParseError<I> {
    fn from_external_error(input: I, kind: NomErrorKind, _e: E) -> Self {
        Self { input, kind }
    }
}

impl<I: Debug> From<VhdxParseError<I>> for VhdxRsError {
    fn from(e: VhdxParseError<I>) -> Self {
        VhdxRsError::Format(format!("{:?} while parsing near {:?}", e.kind, e.input))
    }
}

/// Runs a `nom` parser over a complete buffer and lifts both parse failure and
/// leftover-trailing-data into a single crate error. Used by every `deserialize`
/// impl instead of repeating `.finish()` bookkeeping at each call site.
pub fn run_parser<'a, O>(
    buffer: &'a [u8],
    parser: impl FnOnce(&'a [u8]) -> nom::IResult<&'a [u8], O, VhdxParseError<&'a [u8]>>,
) -> Result<O> {
    match parser(buffer) {
        Ok((_, value)) => Ok(value),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => Err(e.into()),
        Err(nom::Err::Incomplete(_)) => Err(VhdxRsError::Format("incomplete input".into())),
    }
}
