use bitstream_io::{BitRead, BitWrite};

use crate::errors::{H264CodecError, H264CodecResult};

pub fn read_ue<R: BitRead>(reader: &mut R) -> H264CodecResult<u64> {
    let leading_zero_bits = reader.read_unary::<1>()?;
    if leading_zero_bits > 31 {
        return Err(H264CodecError::InvalidExpGolombCode(format!(
            "got more than 31 leading zero bits: {}",
            leading_zero_bits
        )));
    }
    let suffix: u64 = reader.read_var(leading_zero_bits)?;
    Ok((1_u64 << leading_zero_bits) - 1 + suffix)
}

pub fn read_se<R: BitRead>(reader: &mut R) -> H264CodecResult<i64> {
    let code_num = read_ue(reader)?;
    let magnitude = code_num.div_ceil(2) as i64;
    Ok(if code_num & 0b1 == 0b1 {
        magnitude
    } else {
        -magnitude
    })
}

pub fn write_ue<W: BitWrite>(writer: &mut W, value: u32) -> H264CodecResult<()> {
    // codeNum + 1 carries its own stop bit as the most significant one
    let code = value as u64 + 1;
    let width = 64 - code.leading_zeros();
    writer.write_var(width - 1, 0_u64)?;
    writer.write_var(width, code)?;
    Ok(())
}

pub fn write_se<W: BitWrite>(writer: &mut W, value: i32) -> H264CodecResult<()> {
    let code = if value > 0 {
        (value as u32) * 2 - 1
    } else {
        (value.unsigned_abs()) * 2
    };
    write_ue(writer, code)
}

#[cfg(test)]
mod test {
    use super::*;
    use bitstream_io::{BigEndian, BitReader, BitWriter};

    #[test]
    fn test_ue_known_codes() {
        let mut writer = BitWriter::endian(Vec::new(), BigEndian);
        for v in [0_u32, 1, 2, 3, 4, 79, 44, 255] {
            write_ue(&mut writer, v).unwrap();
        }
        writer.byte_align().unwrap();
        let bytes = writer.into_writer();
        let mut reader = BitReader::endian(&bytes[..], BigEndian);
        for v in [0_u64, 1, 2, 3, 4, 79, 44, 255] {
            assert_eq!(read_ue(&mut reader).unwrap(), v);
        }
    }

    #[test]
    fn test_se_sign_mapping() {
        // @see: Table 9-3 – codeNum to signed value
        let mut writer = BitWriter::endian(Vec::new(), BigEndian);
        for v in [0_i32, 1, -1, 2, -2, 3] {
            write_se(&mut writer, v).unwrap();
        }
        writer.byte_align().unwrap();
        let bytes = writer.into_writer();
        let mut reader = BitReader::endian(&bytes[..], BigEndian);
        for v in [0_i64, 1, -1, 2, -2, 3] {
            assert_eq!(read_se(&mut reader).unwrap(), v);
        }
    }
}
