pub mod aggregation;
pub mod depacketizer;
pub mod errors;
pub mod fragmented;
pub mod packetizer;

use std::io;

use aggregation::StapAPacket;
use byteorder::ReadBytesExt;
use codec_h264::{nalu::NalUnit, nalu_header::NaluHeader};
use errors::RtpH264Error;
use fragmented::{FuAPacket, FuIndicator};
use tokio_util::bytes::Bytes;
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket,
    reader::{ReadFrom, ReadRemainingFrom},
    writer::WriteTo,
};

pub const RTP_H264_PACKET_TYPE_STAPA: u8 = 24;
pub const RTP_H264_PACKET_TYPE_FUA: u8 = 28;

/// A NAL unit travelling through the stack, with the timing and ordering
/// metadata the filter and the resender act on. `nalu` holds the raw unit
/// (header byte plus payload), never a start code.
#[derive(Debug, Clone)]
pub struct NaluDescriptor {
    pub nalu: Bytes,
    /// media time of the carrying access unit, microseconds
    pub ntp_timestamp: u64,
    /// local receive (or production) time, microseconds
    pub arrival_timestamp: u64,
    /// drop-if-not-sent-by deadline, microseconds; zero means none
    pub timeout_timestamp: u64,
    pub rtp_timestamp: u32,
    /// the carrying packet had the marker bit set
    pub is_last_in_au: bool,
    /// packets were lost between the previous surfaced NAL unit and this
    /// one; synthesized NAL units set it to re-sync the sequence domain
    pub seq_num_forced_discontinuity: bool,
    pub missing_packets_before: u32,
    /// a fragmented unit was reassembled with fragments missing
    pub incomplete: bool,
    /// RTP header extension content of the carrying packet
    pub metadata: Option<Bytes>,
}

impl NaluDescriptor {
    pub fn new(nalu: Bytes, ntp_timestamp: u64, is_last_in_au: bool) -> Self {
        Self {
            nalu,
            ntp_timestamp,
            arrival_timestamp: 0,
            timeout_timestamp: 0,
            rtp_timestamp: 0,
            is_last_in_au,
            seq_num_forced_discontinuity: false,
            missing_packets_before: 0,
            incomplete: false,
            metadata: None,
        }
    }
}

/// @see: RFC 6184 5.2, payload structures: single NAL unit packets,
/// single-time aggregation packets (STAP-A) and fragmentation units (FU-A).
#[derive(Debug, Clone, Copy)]
pub enum PayloadStructureType {
    SingleNaluPacket(u8),
    AggregationPacket(u8),
    FragmentationUnit(FuIndicator),
}

impl TryFrom<u8> for PayloadStructureType {
    type Error = RtpH264Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & 0x1f {
            v if (1..=23).contains(&v) => Ok(Self::SingleNaluPacket(value)),
            RTP_H264_PACKET_TYPE_STAPA => Ok(Self::AggregationPacket(value)),
            RTP_H264_PACKET_TYPE_FUA => Ok(Self::FragmentationUnit(value.try_into()?)),
            v => Err(RtpH264Error::InvalidH264PacketType(v)),
        }
    }
}

#[derive(Debug)]
pub enum RtpH264Payload {
    /// @see: RFC 6184 5.6, a single NAL unit packet is the NAL unit
    /// itself: its one-byte header doubles as the payload header.
    SingleNalu(NalUnit),
    StapA(StapAPacket),
    FuA(FuAPacket),
}

impl<R: io::Read> ReadFrom<R> for RtpH264Payload {
    type Error = RtpH264Error;
    fn read_from(mut reader: R) -> Result<Self, Self::Error> {
        let first_byte = reader.read_u8()?;
        let payload_structure: PayloadStructureType = first_byte.try_into()?;
        Ok(match payload_structure {
            PayloadStructureType::SingleNaluPacket(header) => {
                let nal_header: NaluHeader = header.try_into()?;
                Self::SingleNalu(NalUnit::read_remaining_from(nal_header, reader)?)
            }
            PayloadStructureType::AggregationPacket(header) => {
                Self::StapA(StapAPacket::read_remaining_from(header, reader)?)
            }
            PayloadStructureType::FragmentationUnit(indicator) => {
                Self::FuA(FuAPacket::read_remaining_from(indicator, reader)?)
            }
        })
    }
}

impl<W: io::Write> WriteTo<W> for RtpH264Payload {
    type Error = RtpH264Error;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        match self {
            Self::SingleNalu(nalu) => nalu.write_to(writer).map_err(Into::into),
            Self::StapA(packet) => packet.write_to(writer),
            Self::FuA(packet) => packet.write_to(writer),
        }
    }
}

impl DynamicSizedPacket for RtpH264Payload {
    fn get_packet_bytes_count(&self) -> usize {
        match self {
            Self::SingleNalu(nalu) => nalu.get_packet_bytes_count(),
            Self::StapA(packet) => packet.get_packet_bytes_count(),
            Self::FuA(packet) => packet.get_packet_bytes_count(),
        }
    }
}
