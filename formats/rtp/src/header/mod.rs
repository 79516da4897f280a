use tokio_util::bytes::Bytes;
use utils::traits::dynamic_sized_packet::DynamicSizedPacket;

pub mod reader;
pub mod writer;

pub const RTP_VERSION: u8 = 2;
pub const RTP_FIXED_HEADER_SIZE: usize = 12;

///! @see: RFC 3550 5.1 RTP Fixed Header Fields
#[derive(Debug, Clone)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
    pub csrc_list: Vec<u32>,
    pub header_extension: Option<RtpHeaderExtension>,
}

impl Default for RtpHeader {
    fn default() -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: false,
            payload_type: 0,
            sequence_number: 0,
            timestamp: 0,
            ssrc: 0,
            csrc_list: Vec::new(),
            header_extension: None,
        }
    }
}

impl RtpHeader {
    pub fn builder() -> RtpHeaderBuilder {
        Default::default()
    }
}

impl DynamicSizedPacket for RtpHeader {
    fn get_packet_bytes_count(&self) -> usize {
        RTP_FIXED_HEADER_SIZE
            + self.csrc_list.len() * 4
            + self
                .header_extension
                .as_ref()
                .map_or(0, |v| v.get_packet_bytes_count())
    }
}

///! @see: RFC 3550 5.3.1 RTP Header Extension
#[derive(Debug, Clone)]
pub struct RtpHeaderExtension {
    pub profile_defined: u16,
    /// length of `bytes` in 32-bit words
    pub word_count: u16,
    pub bytes: Bytes,
}

impl DynamicSizedPacket for RtpHeaderExtension {
    fn get_packet_bytes_count(&self) -> usize {
        4 + self.word_count as usize * 4
    }
}

#[derive(Debug, Default)]
pub struct RtpHeaderBuilder(RtpHeader);

impl RtpHeaderBuilder {
    pub fn new() -> Self {
        Default::default()
    }

    pub fn version(mut self, version: u8) -> Self {
        self.0.version = version;
        self
    }

    pub fn marker(mut self, marker: bool) -> Self {
        self.0.marker = marker;
        self
    }

    pub fn payload_type(mut self, payload_type: u8) -> Self {
        self.0.payload_type = payload_type & 0b0111_1111;
        self
    }

    pub fn sequence_number(mut self, sequence_number: u16) -> Self {
        self.0.sequence_number = sequence_number;
        self
    }

    pub fn timestamp(mut self, timestamp: u32) -> Self {
        self.0.timestamp = timestamp;
        self
    }

    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.0.ssrc = ssrc;
        self
    }

    pub fn build(mut self) -> RtpHeader {
        self.0.version = RTP_VERSION;
        self.0.csrc_count = self.0.csrc_list.len() as u8;
        self.0.extension = self.0.header_extension.is_some();
        self.0
    }
}
