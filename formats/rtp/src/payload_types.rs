/// Dynamic payload type conventionally used for H.264 video.
pub const H264_RTP_PAYLOAD_TYPE: u8 = 96;

/// RTP clock rate for H.264, RFC 6184 section 8.2.1.
pub const H264_RTP_CLOCK_RATE: u32 = 90_000;
