use std::io::{self, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use codec_h264::nalu::NalUnit;
use tokio_util::bytes::Bytes;
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket, reader::ReadRemainingFrom, writer::WriteTo,
};

use super::{RTP_H264_PACKET_TYPE_STAPA, errors::RtpH264Error};

// @see: RFC 6184 5.7.1. Single-Time Aggregation Packet (STAP-A), Figure 7
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                         RTP Header                            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |STAP-A NAL HDR |        NALU 1 Size            |   NALU 1 HDR  |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        NALU 1 Data                            |
/// :                                                               :
/// +               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |               |            NALU 2 Size        |  NALU 2 HDR   |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                        NALU 2 Data                            |
/// :                                                               :
/// |                               +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |                               :...OPTIONAL RTP padding        |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
#[derive(Debug)]
pub struct StapAPacket {
    pub nal_units: Vec<NalUnit>,
}

impl StapAPacket {
    pub fn new(nal_units: Vec<NalUnit>) -> Self {
        Self { nal_units }
    }

    /// STAP-A NAL header byte: F zero, NRI the maximum of the aggregated
    /// units, type 24.
    pub fn header_byte(&self) -> u8 {
        let nal_ref_idc = self
            .nal_units
            .iter()
            .fold(0, |prev, nalu| prev.max(nalu.header.nal_ref_idc));
        ((nal_ref_idc & 0b11) << 5) | RTP_H264_PACKET_TYPE_STAPA
    }
}

impl<R: io::Read> ReadRemainingFrom<u8, R> for StapAPacket {
    type Error = RtpH264Error;
    fn read_remaining_from(_header: u8, mut reader: R) -> Result<Self, Self::Error> {
        let mut nal_units = Vec::new();
        let mut remaining = Vec::new();
        reader.read_to_end(&mut remaining)?;
        let mut cursor = io::Cursor::new(&remaining[..]);
        while (cursor.position() as usize) < remaining.len() {
            let nalu_size = cursor.read_u16::<BigEndian>()? as usize;
            if nalu_size == 0 {
                return Err(RtpH264Error::EmptyNalUnit);
            }
            let mut nalu_bytes = vec![0; nalu_size];
            cursor.read_exact(&mut nalu_bytes)?;
            nal_units.push(NalUnit::from_bytes(Bytes::from(nalu_bytes))?);
        }
        Ok(Self { nal_units })
    }
}

impl<W: io::Write> WriteTo<W> for StapAPacket {
    type Error = RtpH264Error;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        writer.write_u8(self.header_byte())?;
        for nalu in &self.nal_units {
            writer.write_u16::<BigEndian>(nalu.get_packet_bytes_count() as u16)?;
            nalu.write_to(writer)?;
        }
        Ok(())
    }
}

impl DynamicSizedPacket for StapAPacket {
    fn get_packet_bytes_count(&self) -> usize {
        1 // STAP-A NAL HDR
        + self.nal_units.iter().fold(
            0,
            |prev, cur|
                prev
                    + 2 // nalu size
                    + cur.get_packet_bytes_count()
        )
    }
}
