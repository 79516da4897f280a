use std::io::{self, IoSlice, Read};

use tokio_util::bytes::{Buf, Bytes};
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket, reader::TryReadFrom, writer::WriteTo,
};

use crate::{
    errors::{RtpError, RtpResult},
    header::RtpHeader,
};

/// An RTP packet plus the sender-side deadlines that ride along in the
/// packet FIFO. `ntp_timestamp` is the local wall time at packetization and
/// `timeout_timestamp` the drop-if-not-sent-by time, both in microseconds;
/// neither goes on the wire.
#[derive(Debug, Clone)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
    pub ntp_timestamp: u64,
    pub timeout_timestamp: u64,
}

impl RtpPacket {
    pub fn new(header: RtpHeader, payload: Bytes) -> Self {
        Self {
            header,
            payload,
            ntp_timestamp: 0,
            timeout_timestamp: 0,
        }
    }

    pub fn with_deadlines(
        header: RtpHeader,
        payload: Bytes,
        ntp_timestamp: u64,
        timeout_timestamp: u64,
    ) -> Self {
        Self {
            header,
            payload,
            ntp_timestamp,
            timeout_timestamp,
        }
    }

    /// The three transmission segments: fixed header (+CSRC), header
    /// extension, payload. The header is serialized into `scratch`; the
    /// payload is referenced without copy, ready for vectored send.
    pub fn segments<'a>(&'a self, scratch: &'a mut Vec<u8>) -> RtpResult<[IoSlice<'a>; 3]> {
        scratch.clear();
        self.header.write_fixed_to(&mut *scratch)?;
        let split = scratch.len();
        if let Some(extension) = &self.header.header_extension {
            extension.write_to(&mut *scratch)?;
        }
        let (fixed, extension) = scratch.split_at(split);
        Ok([
            IoSlice::new(fixed),
            IoSlice::new(extension),
            IoSlice::new(&self.payload),
        ])
    }
}

impl DynamicSizedPacket for RtpPacket {
    fn get_packet_bytes_count(&self) -> usize {
        self.header.get_packet_bytes_count() + self.payload.len()
    }
}

impl<R: AsRef<[u8]>> TryReadFrom<R> for RtpPacket {
    type Error = RtpError;
    fn try_read_from(reader: &mut std::io::Cursor<R>) -> Result<Option<Self>, Self::Error> {
        let Some(header) = RtpHeader::try_read_from(reader.by_ref())? else {
            return Ok(None);
        };

        if !reader.has_remaining() {
            return Err(RtpError::EmptyPayload);
        }
        let payload_size = reader.remaining();
        let payload = reader.copy_to_bytes(payload_size);

        if header.padding {
            let padding_size = *payload.last().expect("payload is non-empty") as usize;
            if padding_size > payload_size {
                return Err(RtpError::BadPaddingSize(padding_size));
            }
            Ok(Some(Self::new(
                header,
                payload.slice(..payload_size - padding_size),
            )))
        } else {
            Ok(Some(Self::new(header, payload)))
        }
    }
}

impl<W: io::Write> WriteTo<W> for RtpPacket {
    type Error = RtpError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        self.header.write_to(writer.by_ref())?;
        writer.write_all(&self.payload)?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::header::RtpHeader;
    use std::io::Cursor;

    fn sample_packet() -> RtpPacket {
        RtpPacket::new(
            RtpHeader::builder()
                .payload_type(96)
                .marker(true)
                .sequence_number(4242)
                .timestamp(90_000)
                .ssrc(0xdead_beef)
                .build(),
            Bytes::from_static(&[0x65, 0x88, 0x80, 0x01]),
        )
    }

    #[test]
    fn test_packet_round_trip() {
        let packet = sample_packet();
        let mut bytes = Vec::new();
        packet.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len(), packet.get_packet_bytes_count());

        let parsed = RtpPacket::try_read_from(&mut Cursor::new(&bytes))
            .unwrap()
            .unwrap();
        assert_eq!(parsed.header.version, 2);
        assert!(parsed.header.marker);
        assert_eq!(parsed.header.payload_type, 96);
        assert_eq!(parsed.header.sequence_number, 4242);
        assert_eq!(parsed.header.timestamp, 90_000);
        assert_eq!(parsed.header.ssrc, 0xdead_beef);
        assert_eq!(parsed.payload, packet.payload);
    }

    #[test]
    fn test_segments_reference_payload() {
        let packet = sample_packet();
        let mut scratch = Vec::new();
        let segments = packet.segments(&mut scratch).unwrap();
        assert_eq!(segments[0].len(), 12);
        assert!(segments[1].is_empty());
        assert_eq!(&segments[2][..], &packet.payload[..]);
    }

    #[test]
    fn test_truncated_header_is_incomplete() {
        let packet = sample_packet();
        let mut bytes = Vec::new();
        packet.write_to(&mut bytes).unwrap();
        let parsed = RtpPacket::try_read_from(&mut Cursor::new(&bytes[..8])).unwrap();
        assert!(parsed.is_none());
    }
}
