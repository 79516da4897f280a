use std::io::{self};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket,
    fixed_packet::FixedPacket,
    reader::{ReadFrom, ReadRemainingFrom},
    writer::WriteTo,
};

use crate::errors::{RtpError, RtpResult};

use super::{
    common_header::RtcpCommonHeader, payload_types::RtcpPayloadType, report_block::ReportBlock,
    simple_ntp::SimpleNtp,
};

// @see: RFC 3550 6.4.1 SR: Sender Report RTCP Packet
///         0                   1                   2                   3
///         0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// header |V=2|P|   RC    |   PT=SR=200   |             length            |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                           SSRC of sender                      |
///        +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// sender |             NTP timestamp, most significant word              |
/// info   +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |             NTP timestamp, least significant word             |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                         RTP timestamp                         |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                     sender's packet count                     |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
///        |                     sender's octet count                      |
///        +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
/// report |                           blocks                              |
///        +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

#[derive(Debug, Default, Clone)]
pub struct SenderInfo {
    pub ntp_timestamp: SimpleNtp,
    pub rtp_timestamp: u32,
    pub sender_packet_count: u32,
    pub sender_octet_count: u32,
}

impl FixedPacket for SenderInfo {
    fn bytes_count() -> usize {
        20
    }
}

impl<R: io::Read> ReadFrom<R> for SenderInfo {
    type Error = RtpError;
    fn read_from(mut reader: R) -> Result<Self, Self::Error> {
        let ntp_timestamp = reader.read_u64::<BigEndian>()?;
        let rtp_timestamp = reader.read_u32::<BigEndian>()?;
        let sender_packet_count = reader.read_u32::<BigEndian>()?;
        let sender_octet_count = reader.read_u32::<BigEndian>()?;
        Ok(Self {
            ntp_timestamp: ntp_timestamp.into(),
            rtp_timestamp,
            sender_packet_count,
            sender_octet_count,
        })
    }
}

impl<W: io::Write> WriteTo<W> for SenderInfo {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        writer.write_u64::<BigEndian>(self.ntp_timestamp.into())?;
        writer.write_u32::<BigEndian>(self.rtp_timestamp)?;
        writer.write_u32::<BigEndian>(self.sender_packet_count)?;
        writer.write_u32::<BigEndian>(self.sender_octet_count)?;
        Ok(())
    }
}

#[derive(Debug, Default, Clone)]
pub struct RtcpSenderReport {
    pub sender_ssrc: u32,
    pub sender_info: SenderInfo,
    pub report_blocks: Vec<ReportBlock>,
}

impl RtcpSenderReport {
    pub fn builder() -> RtcpSenderReportBuilder {
        RtcpSenderReportBuilder::default()
    }

    pub fn get_header(&self) -> RtcpCommonHeader {
        RtcpCommonHeader {
            version: 2,
            padding: false,
            count: self.report_blocks.len() as u8,
            payload_type: RtcpPayloadType::SenderReport,
            length: (self.get_packet_bytes_count() / 4 - 1) as u16,
        }
    }
}

impl DynamicSizedPacket for RtcpSenderReport {
    fn get_packet_bytes_count(&self) -> usize {
        RtcpCommonHeader::bytes_count() // header
            + 4 // ssrc
            + SenderInfo::bytes_count() // sender info
            + self.report_blocks.len() * ReportBlock::bytes_count() // blocks
    }
}

impl<R: io::Read> ReadRemainingFrom<RtcpCommonHeader, R> for RtcpSenderReport {
    type Error = RtpError;
    fn read_remaining_from(header: RtcpCommonHeader, mut reader: R) -> Result<Self, Self::Error> {
        if header.payload_type != RtcpPayloadType::SenderReport {
            return Err(RtpError::WrongPayloadType(format!(
                "expect sender report payload type, got {:?} instead",
                header.payload_type
            )));
        }
        if header.length < 6 {
            return Err(RtpError::BadRtcpLength(header.length));
        }

        let sender_ssrc = reader.read_u32::<BigEndian>()?;
        let sender_info = SenderInfo::read_from(reader.by_ref())?;

        let mut report_blocks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            report_blocks.push(ReportBlock::read_from(reader.by_ref())?);
        }

        // profile-specific extensions and anything else past the known
        // fields are skipped, not errored
        let mut trailing = Vec::new();
        reader.read_to_end(&mut trailing)?;

        Ok(Self {
            sender_ssrc,
            sender_info,
            report_blocks,
        })
    }
}

impl<W: io::Write> WriteTo<W> for RtcpSenderReport {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        self.get_header().write_to(writer)?;
        writer.write_u32::<BigEndian>(self.sender_ssrc)?;
        self.sender_info.write_to(writer)?;
        self.report_blocks
            .iter()
            .try_for_each(|block| block.write_to(writer))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RtcpSenderReportBuilder(RtcpSenderReport);

impl RtcpSenderReportBuilder {
    pub fn ssrc(mut self, ssrc: u32) -> Self {
        self.0.sender_ssrc = ssrc;
        self
    }

    pub fn ntp<T: Into<SimpleNtp>>(mut self, ntp: T) -> Self {
        self.0.sender_info.ntp_timestamp = ntp.into();
        self
    }

    pub fn rtp_timestamp(mut self, rtp_timestamp: u32) -> Self {
        self.0.sender_info.rtp_timestamp = rtp_timestamp;
        self
    }

    pub fn sender_packet_count(mut self, packet_count: u32) -> Self {
        self.0.sender_info.sender_packet_count = packet_count;
        self
    }

    pub fn sender_octet_count(mut self, octet_count: u32) -> Self {
        self.0.sender_info.sender_octet_count = octet_count;
        self
    }

    pub fn report_block(mut self, block: ReportBlock) -> Self {
        self.0.report_blocks.push(block);
        self
    }

    pub fn build(self) -> RtpResult<RtcpSenderReport> {
        if self.0.report_blocks.len() > 31 {
            return Err(RtpError::TooManyReportBlocks);
        }
        Ok(self.0)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;
    use utils::traits::reader::TryReadFrom;

    #[test]
    fn test_sender_report_round_trip() {
        let report = RtcpSenderReport::builder()
            .ssrc(0x4153_0001)
            .ntp(0x1234_5678_9abc_def0_u64)
            .rtp_timestamp(0x0001_0000)
            .sender_packet_count(42)
            .sender_octet_count(12_345)
            .build()
            .unwrap();

        let mut bytes = Vec::new();
        report.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), 28);
        assert_eq!(bytes[0], 0x80);
        assert_eq!(bytes[1], 200);

        let mut cursor = Cursor::new(&bytes);
        let header = RtcpCommonHeader::try_read_from(&mut cursor).unwrap().unwrap();
        assert_eq!(header.length, 6);
        let parsed = RtcpSenderReport::read_remaining_from(header, cursor).unwrap();
        assert_eq!(parsed.sender_ssrc, 0x4153_0001);
        assert_eq!(
            Into::<u64>::into(parsed.sender_info.ntp_timestamp),
            0x1234_5678_9abc_def0
        );
        assert_eq!(parsed.sender_info.rtp_timestamp, 0x0001_0000);
        assert_eq!(parsed.sender_info.sender_packet_count, 42);
        assert_eq!(parsed.sender_info.sender_octet_count, 12_345);
    }

    #[test]
    fn test_sender_report_rejects_short_length() {
        let report = RtcpSenderReport::builder().ssrc(1).build().unwrap();
        let mut bytes = Vec::new();
        report.write_to(&mut bytes).unwrap();
        // corrupt the length field down to 5
        bytes[3] = 5;

        let mut cursor = Cursor::new(&bytes);
        let header = RtcpCommonHeader::try_read_from(&mut cursor).unwrap().unwrap();
        assert!(matches!(
            RtcpSenderReport::read_remaining_from(header, cursor),
            Err(RtpError::BadRtcpLength(5))
        ));
    }
}
