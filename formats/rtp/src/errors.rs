use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RtpError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("rtp packet has no payload")]
    EmptyPayload,
    #[error("bad padding size: {0}")]
    BadPaddingSize(usize),
    #[error("invalid rtp version: {0}")]
    InvalidVersion(u8),
    #[error("wrong payload type: {0}")]
    WrongPayloadType(String),
    #[error("rtcp packet length field too small: {0}")]
    BadRtcpLength(u16),
    #[error("too many report blocks")]
    TooManyReportBlocks,
}

pub type RtpResult<T> = Result<T, RtpError>;
