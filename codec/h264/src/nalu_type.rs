use crate::errors::H264CodecError;

/// @see: Recommendation ITU-T H.264, Table 7-1 – NAL unit type codes
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NaluType {
    NonIdrSlice = 1,
    DataPartitionASlice = 2,
    DataPartitionBSlice = 3,
    DataPartitionCSlice = 4,
    IdrSlice = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    AccessUnitDelimiter = 9,
    EndOfSequence = 10,
    EndOfStream = 11,
    FillerData = 12,
    Unspecified(u8),
    Reserved(u8),
}

pub const H264_NALU_TYPE_U8_MASK: u8 = 0b11111;

impl From<NaluType> for u8 {
    fn from(value: NaluType) -> Self {
        match value {
            NaluType::NonIdrSlice => 1,
            NaluType::DataPartitionASlice => 2,
            NaluType::DataPartitionBSlice => 3,
            NaluType::DataPartitionCSlice => 4,
            NaluType::IdrSlice => 5,
            NaluType::Sei => 6,
            NaluType::Sps => 7,
            NaluType::Pps => 8,
            NaluType::AccessUnitDelimiter => 9,
            NaluType::EndOfSequence => 10,
            NaluType::EndOfStream => 11,
            NaluType::FillerData => 12,
            NaluType::Unspecified(v) | NaluType::Reserved(v) => v,
        }
    }
}

impl TryFrom<u8> for NaluType {
    type Error = H264CodecError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value & H264_NALU_TYPE_U8_MASK {
            1 => Ok(Self::NonIdrSlice),
            2 => Ok(Self::DataPartitionASlice),
            3 => Ok(Self::DataPartitionBSlice),
            4 => Ok(Self::DataPartitionCSlice),
            5 => Ok(Self::IdrSlice),
            6 => Ok(Self::Sei),
            7 => Ok(Self::Sps),
            8 => Ok(Self::Pps),
            9 => Ok(Self::AccessUnitDelimiter),
            10 => Ok(Self::EndOfSequence),
            11 => Ok(Self::EndOfStream),
            12 => Ok(Self::FillerData),
            v if v == 0 || (24..=31).contains(&v) => Ok(Self::Unspecified(v)),
            v if (13..=23).contains(&v) => Ok(Self::Reserved(v)),
            v => Err(H264CodecError::UnknownNaluType(v)),
        }
    }
}

impl NaluType {
    /// VCL NAL units carry (parts of) a coded picture.
    pub fn is_vcl(&self) -> bool {
        matches!(
            self,
            Self::NonIdrSlice
                | Self::DataPartitionASlice
                | Self::DataPartitionBSlice
                | Self::DataPartitionCSlice
                | Self::IdrSlice
        )
    }
}
