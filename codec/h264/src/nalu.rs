use std::{fmt, io};

use byteorder::{ReadBytesExt, WriteBytesExt};
use tokio_util::bytes::Bytes;
use utils::traits::{
    dynamic_sized_packet::DynamicSizedPacket,
    fixed_packet::FixedPacket,
    reader::{ReadFrom, ReadRemainingFrom},
    writer::WriteTo,
};

use crate::{
    errors::{H264CodecError, H264CodecResult},
    nalu_header::NaluHeader,
};

pub const ANNEX_B_START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

#[derive(Clone)]
pub struct NalUnit {
    pub header: NaluHeader,
    // bytes in body does not include the header byte
    pub body: Bytes,
}

impl NalUnit {
    pub fn new(header: NaluHeader, body: Bytes) -> Self {
        Self { header, body }
    }

    /// Split a raw NAL unit (header byte followed by the payload, no start code).
    pub fn from_bytes(bytes: Bytes) -> H264CodecResult<Self> {
        if bytes.is_empty() {
            return Err(H264CodecError::SyntaxError("empty nal unit".to_string()));
        }
        Ok(Self {
            header: bytes[0].try_into()?,
            body: bytes.slice(1..),
        })
    }

    /// Raw bytes: header byte followed by the payload.
    pub fn to_bytes(&self) -> Bytes {
        let mut bytes = Vec::with_capacity(self.get_packet_bytes_count());
        bytes.push(self.header.into());
        bytes.extend_from_slice(&self.body);
        Bytes::from(bytes)
    }
}

impl fmt::Debug for NalUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "nal_header: {:?}, payload length: {}",
            self.header,
            self.body.len()
        )
    }
}

impl DynamicSizedPacket for NalUnit {
    fn get_packet_bytes_count(&self) -> usize {
        NaluHeader::bytes_count() + self.body.len()
    }
}

impl<R: io::Read> ReadFrom<R> for NalUnit {
    type Error = H264CodecError;
    fn read_from(mut reader: R) -> Result<Self, Self::Error> {
        let header: NaluHeader = reader.read_u8()?.try_into()?;
        Self::read_remaining_from(header, reader)
    }
}

impl<R: io::Read> ReadRemainingFrom<NaluHeader, R> for NalUnit {
    type Error = H264CodecError;
    fn read_remaining_from(header: NaluHeader, mut reader: R) -> Result<Self, Self::Error> {
        let mut body = Vec::new();
        reader.read_to_end(&mut body)?;
        Ok(Self {
            header,
            body: Bytes::from(body),
        })
    }
}

impl<W: io::Write> WriteTo<W> for NalUnit {
    type Error = H264CodecError;
    fn write_to(&self, writer: &mut W) -> Result<(), Self::Error> {
        writer.write_u8(self.header.into())?;
        writer.write_all(&self.body)?;
        Ok(())
    }
}
