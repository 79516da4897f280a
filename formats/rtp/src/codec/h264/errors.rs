use std::io;

use codec_h264::errors::H264CodecError;
use thiserror::Error;

use crate::errors::RtpError;

#[derive(Debug, Error)]
pub enum RtpH264Error {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("rtp error: {0}")]
    RtpError(#[from] RtpError),
    #[error("h264 codec error: {0}")]
    H264CodecError(#[from] H264CodecError),
    #[error("invalid h264 rtp packet type: {0}")]
    InvalidH264PacketType(u8),
    #[error("invalid packet size limit: {0}")]
    InvalidPacketSizeLimit(usize),
    #[error("empty nal unit")]
    EmptyNalUnit,
}

pub type RtpH264Result<T> = Result<T, RtpH264Error>;
