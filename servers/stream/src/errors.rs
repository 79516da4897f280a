use codec_h264::errors::H264CodecError;
use rtp_formats::{codec::h264::errors::RtpH264Error, errors::RtpError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum StreamSessionError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("rtp format error: {0}")]
    RtpFormatError(#[from] RtpError),
    #[error("rtp h264 error: {0}")]
    RtpH264Error(#[from] RtpH264Error),
    #[error("h264 codec error: {0}")]
    H264CodecError(#[from] H264CodecError),
    #[error("command channel disconnected")]
    CommandChannelDisconnected,
    #[error("datagram channel closed")]
    DatagramChannelClosed,
    #[error("graceful exit")]
    GracefulExit,
}

pub type StreamSessionResult<T> = Result<T, StreamSessionError>;
