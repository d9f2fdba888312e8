use thiserror::Error;

/// Errors returned while decoding a Java serialization stream.
///
/// Every variant means "no object at this offset" to the scanner; the
/// distinction only matters for diagnostics and tests.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum JavaSerError {
    #[error("stream too short: need {needed} bytes, got {actual}")]
    TooShort { needed: usize, actual: usize },
    #[error("bad stream magic 0x{found:04x}")]
    BadMagic { found: u16 },
    #[error("unsupported stream version {found}")]
    BadVersion { found: u16 },
    #[error("unexpected type code 0x{code:02x} while reading {context}")]
    UnexpectedTypeCode { code: u8, context: &'static str },
    #[error("invalid back reference 0x{handle:08x}")]
    InvalidHandle { handle: u32 },
    #[error("invalid length {length} for {context}")]
    InvalidLength { length: i64, context: &'static str },
    #[error("nesting deeper than {limit} levels")]
    TooDeep { limit: usize },
    #[error("unsupported stream content: {0}")]
    Unsupported(&'static str),
}
