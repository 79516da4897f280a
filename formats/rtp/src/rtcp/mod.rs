use std::io::{self, Cursor, Read};

use common_header::RtcpCommonHeader;
use payload_types::RtcpPayloadType;
use receiver_report::RtcpReceiverReport;
use sender_report::RtcpSenderReport;
use tokio_util::bytes::Buf;
use utils::traits::{
    fixed_packet::FixedPacket,
    reader::{ReadRemainingFrom, TryReadFrom, TryReadRemainingFrom},
    writer::WriteTo,
};

use crate::errors::{RtpError, RtpResult};

pub mod common_header;
pub mod payload_types;
pub mod receiver_report;
pub mod report_block;
pub mod sender_report;
pub mod simple_ntp;

#[derive(Debug, Clone)]
pub enum RtcpPacket {
    SenderReport(RtcpSenderReport),
    ReceiverReport(RtcpReceiverReport),
}

impl<R: AsRef<[u8]>> TryReadRemainingFrom<RtcpCommonHeader, R> for RtcpPacket {
    type Error = RtpError;
    fn try_read_remaining_from(
        header: RtcpCommonHeader,
        reader: &mut Cursor<R>,
    ) -> Result<Option<Self>, Self::Error> {
        let bytes_remaining = header.length as usize * 4;
        if reader.remaining() < bytes_remaining {
            return Ok(None);
        }

        let mut remaining_bytes = vec![0_u8; bytes_remaining];
        reader.read_exact(&mut remaining_bytes)?;

        // padding covers the last packet of a compound; drop it here
        if header.padding && !remaining_bytes.is_empty() {
            let padding_bytes = *remaining_bytes.last().expect("non-empty") as usize;
            if padding_bytes <= remaining_bytes.len() {
                remaining_bytes.truncate(remaining_bytes.len() - padding_bytes);
            }
        }

        let cursor = Cursor::new(&remaining_bytes);
        match header.payload_type {
            RtcpPayloadType::SenderReport => Ok(Some(Self::SenderReport(
                RtcpSenderReport::read_remaining_from(header, cursor)?,
            ))),
            RtcpPayloadType::ReceiverReport => Ok(Some(Self::ReceiverReport(
                RtcpReceiverReport::read_remaining_from(header, cursor)?,
            ))),
            // unknown packet types are skipped by length, never an error
            RtcpPayloadType::Unknown(_) => Ok(None),
        }
    }
}

impl<W: io::Write> WriteTo<W> for RtcpPacket {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        match self {
            RtcpPacket::SenderReport(packet) => packet.write_to(writer),
            RtcpPacket::ReceiverReport(packet) => packet.write_to(writer),
        }
    }
}

/// Parse every known packet out of a compound RTCP datagram, skipping
/// unknown packet types by their length field.
pub fn read_rtcp_compound(buffer: &[u8]) -> RtpResult<Vec<RtcpPacket>> {
    let mut cursor = Cursor::new(buffer);
    let mut packets = Vec::new();
    while cursor.remaining() >= RtcpCommonHeader::bytes_count() {
        let header = match RtcpCommonHeader::try_read_from(&mut cursor)? {
            Some(header) => header,
            None => break,
        };
        if header.version != 2 {
            return Err(RtpError::InvalidVersion(header.version));
        }
        if let RtcpPayloadType::Unknown(_) = header.payload_type {
            let skip = (header.length as usize * 4).min(cursor.remaining());
            cursor.advance(skip);
            continue;
        }
        match RtcpPacket::try_read_remaining_from(header, &mut cursor)? {
            Some(packet) => packets.push(packet),
            // truncated packet, nothing more to parse
            None => break,
        }
    }
    Ok(packets)
}
