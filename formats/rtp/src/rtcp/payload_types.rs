/// RTCP packet types, RFC 3550 section 12.1. Types this stack does not
/// model are carried as `Unknown` so a compound parser can skip them by
/// length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RtcpPayloadType {
    SenderReport,
    ReceiverReport,
    Unknown(u8),
}

impl Default for RtcpPayloadType {
    fn default() -> Self {
        Self::Unknown(0)
    }
}

impl From<u8> for RtcpPayloadType {
    fn from(value: u8) -> Self {
        match value {
            200 => Self::SenderReport,
            201 => Self::ReceiverReport,
            v => Self::Unknown(v),
        }
    }
}

impl From<RtcpPayloadType> for u8 {
    fn from(value: RtcpPayloadType) -> Self {
        match value {
            RtcpPayloadType::SenderReport => 200,
            RtcpPayloadType::ReceiverReport => 201,
            RtcpPayloadType::Unknown(v) => v,
        }
    }
}
