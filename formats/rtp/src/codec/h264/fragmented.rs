use byteorder::{ReadBytesExt, WriteBytesExt};
use std::io;
use tokio_util::bytes::Bytes;
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket, fixed_packet::FixedPacket, reader::ReadRemainingFrom,
    writer::WriteTo,
};

use super::{RTP_H264_PACKET_TYPE_FUA, errors::RtpH264Error};

/// FU indicator: F and NRI copied from the fragmented NAL unit, type 28.
#[derive(Debug, Clone, Copy)]
pub struct FuIndicator {
    pub forbidden_zero_bit: bool,
    pub nal_ref_idc: u8,
}

impl From<FuIndicator> for u8 {
    fn from(value: FuIndicator) -> Self {
        ((value.forbidden_zero_bit as u8) << 7)
            | ((value.nal_ref_idc & 0b11) << 5)
            | RTP_H264_PACKET_TYPE_FUA
    }
}

impl TryFrom<u8> for FuIndicator {
    type Error = RtpH264Error;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value & 0x1f != RTP_H264_PACKET_TYPE_FUA {
            return Err(RtpH264Error::InvalidH264PacketType(value & 0x1f));
        }
        Ok(Self {
            forbidden_zero_bit: ((value >> 7) & 0b1) == 0b1,
            nal_ref_idc: (value >> 5) & 0b11,
        })
    }
}

impl FixedPacket for FuIndicator {
    fn bytes_count() -> usize {
        1
    }
}

///! @see: RFC 6184 5.8. Fragmentation Units (FUs)
/// +---------------+
/// |0|1|2|3|4|5|6|7|
/// +-+-+-+-+-+-+-+-+
/// |S|E|R|   Type  |
/// +---------------+
#[derive(Debug, Clone, Copy)]
pub struct FuHeader {
    pub start_bit: bool,
    pub end_bit: bool,
    pub nalu_type: u8,
}

impl From<FuHeader> for u8 {
    fn from(value: FuHeader) -> Self {
        ((value.start_bit as u8) << 7) | ((value.end_bit as u8) << 6) | (value.nalu_type & 0x1f)
    }
}

impl From<u8> for FuHeader {
    fn from(value: u8) -> Self {
        Self {
            start_bit: ((value >> 7) & 0b1) == 0b1,
            end_bit: ((value >> 6) & 0b1) == 0b1,
            nalu_type: value & 0x1f,
        }
    }
}

impl FixedPacket for FuHeader {
    fn bytes_count() -> usize {
        1
    }
}

///! FU-A
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// | FU indicator  |   FU header   |                               |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+                               |
/// |                                                               |
/// |                          FU payload                           |
/// |                                                               |
/// |                               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                               :...OPTIONAL RTP padding        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug)]
pub struct FuAPacket {
    pub indicator: FuIndicator,
    pub fu_header: FuHeader,
    pub payload: Bytes,
}

impl FuAPacket {
    /// The header byte of the original NAL unit this fragment belongs to:
    /// F and NRI from the indicator, type from the FU header.
    pub fn nalu_header_byte(&self) -> u8 {
        ((self.indicator.forbidden_zero_bit as u8) << 7)
            | ((self.indicator.nal_ref_idc & 0b11) << 5)
            | (self.fu_header.nalu_type & 0x1f)
    }
}

impl<R: io::Read> ReadRemainingFrom<FuIndicator, R> for FuAPacket {
    type Error = RtpH264Error;
    fn read_remaining_from(indicator: FuIndicator, mut reader: R) -> Result<Self, Self::Error> {
        let fu_header: FuHeader = reader.read_u8()?.into();
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Ok(Self {
            indicator,
            fu_header,
            payload: Bytes::from(bytes),
        })
    }
}

impl<W: io::Write> WriteTo<W> for FuAPacket {
    type Error = RtpH264Error;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        writer.write_u8(self.indicator.into())?;
        writer.write_u8(self.fu_header.into())?;
        writer.write_all(&self.payload)?;
        Ok(())
    }
}

impl DynamicSizedPacket for FuAPacket {
    fn get_packet_bytes_count(&self) -> usize {
        FuIndicator::bytes_count() + FuHeader::bytes_count() + self.payload.len()
    }
}
