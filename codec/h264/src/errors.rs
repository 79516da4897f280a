use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum H264CodecError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("unknown nalu type: {0}")]
    UnknownNaluType(u8),
    #[error("invalid Exp-Golomb code: {0}")]
    InvalidExpGolombCode(String),
    #[error("syntax error: {0}")]
    SyntaxError(String),
    #[error("unsupported syntax: {0}")]
    UnsupportedSyntax(String),
    #[error("no sps/pps context: {0}")]
    MissingParameterSetContext(String),
}

pub type H264CodecResult<T> = Result<T, H264CodecError>;
