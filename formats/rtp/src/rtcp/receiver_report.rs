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
};

// @see: RFC 3550 6.4.2 RR: Receiver Report RTCP Packet
#[derive(Debug, Default, Clone)]
pub struct RtcpReceiverReport {
    pub reporter_ssrc: u32,
    pub report_blocks: Vec<ReportBlock>,
}

impl RtcpReceiverReport {
    pub fn builder() -> RtcpReceiverReportBuilder {
        RtcpReceiverReportBuilder::default()
    }

    pub fn get_header(&self) -> RtcpCommonHeader {
        RtcpCommonHeader {
            version: 2,
            padding: false,
            count: self.report_blocks.len() as u8,
            payload_type: RtcpPayloadType::ReceiverReport,
            length: (self.get_packet_bytes_count() / 4 - 1) as u16,
        }
    }
}

impl DynamicSizedPacket for RtcpReceiverReport {
    fn get_packet_bytes_count(&self) -> usize {
        RtcpCommonHeader::bytes_count()
            + 4 // reporter ssrc
            + self.report_blocks.len() * ReportBlock::bytes_count()
    }
}

impl<R: io::Read> ReadRemainingFrom<RtcpCommonHeader, R> for RtcpReceiverReport {
    type Error = RtpError;
    fn read_remaining_from(header: RtcpCommonHeader, mut reader: R) -> Result<Self, Self::Error> {
        if header.payload_type != RtcpPayloadType::ReceiverReport {
            return Err(RtpError::WrongPayloadType(format!(
                "expect receiver report payload type, got {:?} instead",
                header.payload_type
            )));
        }

        let reporter_ssrc = reader.read_u32::<BigEndian>()?;
        let mut report_blocks = Vec::with_capacity(header.count as usize);
        for _ in 0..header.count {
            report_blocks.push(ReportBlock::read_from(reader.by_ref())?);
        }

        let mut trailing = Vec::new();
        reader.read_to_end(&mut trailing)?;

        Ok(Self {
            reporter_ssrc,
            report_blocks,
        })
    }
}

impl<W: io::Write> WriteTo<W> for RtcpReceiverReport {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        self.get_header().write_to(writer)?;
        writer.write_u32::<BigEndian>(self.reporter_ssrc)?;
        self.report_blocks
            .iter()
            .try_for_each(|block| block.write_to(writer))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RtcpReceiverReportBuilder(RtcpReceiverReport);

impl RtcpReceiverReportBuilder {
    pub fn reporter_ssrc(mut self, ssrc: u32) -> Self {
        self.0.reporter_ssrc = ssrc;
        self
    }

    pub fn report_block(mut self, block: ReportBlock) -> Self {
        self.0.report_blocks.push(block);
        self
    }

    pub fn report_blocks(mut self, mut blocks: Vec<ReportBlock>) -> Self {
        self.0.report_blocks.append(&mut blocks);
        self
    }

    pub fn build(self) -> RtpResult<RtcpReceiverReport> {
        if self.0.report_blocks.len() > 31 {
            return Err(RtpError::TooManyReportBlocks);
        }
        Ok(self.0)
    }
}
