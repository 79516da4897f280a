use bitstream_io::{BigEndian, BitRead, BitReader};
use num::ToPrimitive;
use utils::traits::reader::BitwiseReadFrom;

use crate::{
    errors::{H264CodecError, H264CodecResult},
    exp_golomb::{read_se, read_ue},
    rbsp::rbsp_extract,
};

/// Parsed sequence parameter set, limited to the fields the streaming stack
/// reads: picture geometry, frame-num/POC wiring for slice synthesis, and
/// the chroma format.
#[derive(Debug, Clone)]
pub struct SpsContext {
    pub profile_idc: u8,
    pub constraint_flags: u8,
    pub level_idc: u8,
    pub seq_parameter_set_id: u8,
    pub chroma_format_idc: u8,
    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: Option<u8>,
    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_value_allowed_flag: bool,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    pub direct_8x8_inference_flag: bool,
}

const PROFILES_WITH_CHROMA_INFO: [u8; 12] = [100, 110, 122, 244, 44, 83, 86, 118, 128, 138, 139, 134];

impl SpsContext {
    /// Parse an SPS from its RBSP payload (the NAL unit body, header byte
    /// excluded; emulation prevention bytes are stripped here).
    pub fn parse(body: &[u8]) -> H264CodecResult<Self> {
        let rbsp = rbsp_extract(body);
        let mut reader = BitReader::endian(&rbsp[..], BigEndian);
        Self::read_from(&mut reader)
    }
}

impl<R: BitRead> BitwiseReadFrom<R> for SpsContext {
    type Error = H264CodecError;
    fn read_from(reader: &mut R) -> Result<Self, Self::Error> {
        let profile_idc: u8 = reader.read_var(8)?;
        let constraint_flags: u8 = reader.read_var(8)?;
        let level_idc: u8 = reader.read_var(8)?;
        let seq_parameter_set_id = read_ue(reader)?
            .to_u8()
            .ok_or_else(|| H264CodecError::SyntaxError("sps id out of range".to_string()))?;

        let chroma_format_idc = if PROFILES_WITH_CHROMA_INFO.contains(&profile_idc) {
            let chroma_format_idc = read_ue(reader)? as u8;
            if chroma_format_idc == 3 {
                let _separate_colour_plane_flag = reader.read_bit()?;
            }
            let _bit_depth_luma_minus8 = read_ue(reader)?;
            let _bit_depth_chroma_minus8 = read_ue(reader)?;
            let _qpprime_y_zero_transform_bypass_flag = reader.read_bit()?;
            if reader.read_bit()? {
                return Err(H264CodecError::UnsupportedSyntax(
                    "seq_scaling_matrix_present_flag".to_string(),
                ));
            }
            chroma_format_idc
        } else {
            1
        };

        let log2_max_frame_num_minus4 = read_ue(reader)? as u8;
        let pic_order_cnt_type = read_ue(reader)? as u8;
        let log2_max_pic_order_cnt_lsb_minus4 = match pic_order_cnt_type {
            0 => Some(read_ue(reader)? as u8),
            1 => {
                let _delta_pic_order_always_zero_flag = reader.read_bit()?;
                let _offset_for_non_ref_pic = read_se(reader)?;
                let _offset_for_top_to_bottom_field = read_se(reader)?;
                let num_ref_frames_in_pic_order_cnt_cycle = read_ue(reader)?;
                for _ in 0..num_ref_frames_in_pic_order_cnt_cycle {
                    let _offset_for_ref_frame = read_se(reader)?;
                }
                None
            }
            _ => None,
        };

        let max_num_ref_frames = read_ue(reader)? as u32;
        let gaps_in_frame_num_value_allowed_flag = reader.read_bit()?;
        let pic_width_in_mbs_minus1 = read_ue(reader)? as u32;
        let pic_height_in_map_units_minus1 = read_ue(reader)? as u32;
        let frame_mbs_only_flag = reader.read_bit()?;
        if !frame_mbs_only_flag {
            let _mb_adaptive_frame_field_flag = reader.read_bit()?;
        }
        let direct_8x8_inference_flag = reader.read_bit()?;
        // frame cropping and VUI do not affect this stack
        Ok(Self {
            profile_idc,
            constraint_flags,
            level_idc,
            seq_parameter_set_id,
            chroma_format_idc,
            log2_max_frame_num_minus4,
            pic_order_cnt_type,
            log2_max_pic_order_cnt_lsb_minus4,
            max_num_ref_frames,
            gaps_in_frame_num_value_allowed_flag,
            pic_width_in_mbs_minus1,
            pic_height_in_map_units_minus1,
            frame_mbs_only_flag,
            direct_8x8_inference_flag,
        })
    }
}

impl SpsContext {
    /// Picture dimensions in macroblocks.
    pub fn picture_mb_dims(&self) -> (u32, u32) {
        let mb_width = self.pic_width_in_mbs_minus1 + 1;
        let map_unit_height = self.pic_height_in_map_units_minus1 + 1;
        let mb_height = if self.frame_mbs_only_flag {
            map_unit_height
        } else {
            map_unit_height * 2
        };
        (mb_width, mb_height)
    }

    pub fn picture_mb_count(&self) -> u32 {
        let (w, h) = self.picture_mb_dims();
        w * h
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exp_golomb::write_ue;
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    // Baseline 1280x720 SPS assembled field by field.
    fn build_sps_rbsp() -> Vec<u8> {
        let mut writer = BitWriter::endian(Vec::new(), BigEndian);
        writer.write_var(8, 66_u8).unwrap(); // profile_idc: baseline
        writer.write_var(8, 0xc0_u8).unwrap(); // constraint flags
        writer.write_var(8, 31_u8).unwrap(); // level_idc
        write_ue(&mut writer, 0).unwrap(); // seq_parameter_set_id
        write_ue(&mut writer, 0).unwrap(); // log2_max_frame_num_minus4
        write_ue(&mut writer, 2).unwrap(); // pic_order_cnt_type
        write_ue(&mut writer, 1).unwrap(); // max_num_ref_frames
        writer.write_bit(false).unwrap(); // gaps_in_frame_num_value_allowed
        write_ue(&mut writer, 79).unwrap(); // pic_width_in_mbs_minus1
        write_ue(&mut writer, 44).unwrap(); // pic_height_in_map_units_minus1
        writer.write_bit(true).unwrap(); // frame_mbs_only_flag
        writer.write_bit(false).unwrap(); // direct_8x8_inference_flag
        writer.write_bit(false).unwrap(); // frame_cropping_flag
        writer.write_bit(false).unwrap(); // vui_parameters_present_flag
        writer.write_bit(true).unwrap(); // rbsp stop bit
        writer.byte_align().unwrap();
        writer.into_writer()
    }

    #[test]
    fn test_parse_baseline_sps() {
        let sps = SpsContext::parse(&build_sps_rbsp()).unwrap();
        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 31);
        assert_eq!(sps.seq_parameter_set_id, 0);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!(sps.pic_order_cnt_type, 2);
        assert_eq!(sps.picture_mb_dims(), (80, 45));
        assert_eq!(sps.picture_mb_count(), 3600);
    }

    #[test]
    fn test_parse_truncated_sps_is_error() {
        let rbsp = build_sps_rbsp();
        assert!(SpsContext::parse(&rbsp[..3]).is_err());
    }
}
