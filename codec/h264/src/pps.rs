use bitstream_io::{BigEndian, BitRead, BitReader};
use utils::traits::reader::BitwiseReadRemainingFrom;

use crate::{
    errors::{H264CodecError, H264CodecResult},
    exp_golomb::{read_se, read_ue},
    rbsp::rbsp_extract,
    sps::SpsContext,
};

/// Parsed picture parameter set, limited to what slice synthesis and the
/// access-unit filter depend on.
#[derive(Debug, Clone)]
pub struct PpsContext {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    /// CABAC when true; concealment slices can only be written for CAVLC.
    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,
    pub num_slice_groups_minus1: u32,
    pub num_ref_idx_l0_default_active_minus1: u32,
    pub num_ref_idx_l1_default_active_minus1: u32,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,
    pub pic_init_qp_minus26: i32,
    pub pic_init_qs_minus26: i32,
    pub chroma_qp_index_offset: i32,
    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,
}

impl PpsContext {
    /// Parse a PPS from its RBSP payload. The matching SPS must already be
    /// known; a PPS referencing another SPS id is rejected.
    pub fn parse(body: &[u8], sps: &SpsContext) -> H264CodecResult<Self> {
        let rbsp = rbsp_extract(body);
        let mut reader = BitReader::endian(&rbsp[..], BigEndian);
        Self::read_remaining_from(sps, &mut reader)
    }

    fn skip_slice_group_map<R: BitRead>(
        reader: &mut R,
        num_slice_groups_minus1: u32,
    ) -> H264CodecResult<()> {
        let slice_group_map_type = read_ue(reader)?;
        match slice_group_map_type {
            0 => {
                for _ in 0..=num_slice_groups_minus1 {
                    let _run_length_minus1 = read_ue(reader)?;
                }
            }
            2 => {
                for _ in 0..num_slice_groups_minus1 {
                    let _top_left = read_ue(reader)?;
                    let _bottom_right = read_ue(reader)?;
                }
            }
            3..=5 => {
                let _slice_group_change_direction_flag = reader.read_bit()?;
                let _slice_group_change_rate_minus1 = read_ue(reader)?;
            }
            6 => {
                let pic_size_in_map_units_minus1 = read_ue(reader)?;
                let id_bits = (32 - (num_slice_groups_minus1).leading_zeros()).max(1);
                for _ in 0..=pic_size_in_map_units_minus1 {
                    let _slice_group_id: u32 = reader.read_var(id_bits)?;
                }
            }
            v => {
                return Err(H264CodecError::SyntaxError(format!(
                    "slice_group_map_type {} out of range",
                    v
                )));
            }
        }
        Ok(())
    }
}

impl<R: BitRead> BitwiseReadRemainingFrom<&SpsContext, R> for PpsContext {
    type Error = H264CodecError;
    fn read_remaining_from(sps: &SpsContext, reader: &mut R) -> Result<Self, Self::Error> {
        let pic_parameter_set_id = read_ue(reader)? as u8;
        let seq_parameter_set_id = read_ue(reader)? as u8;
        if seq_parameter_set_id != sps.seq_parameter_set_id {
            return Err(H264CodecError::SyntaxError(format!(
                "pps references sps {} but sps {} is active",
                seq_parameter_set_id, sps.seq_parameter_set_id
            )));
        }
        let entropy_coding_mode_flag = reader.read_bit()?;
        let bottom_field_pic_order_in_frame_present_flag = reader.read_bit()?;
        let num_slice_groups_minus1 = read_ue(reader)? as u32;
        if num_slice_groups_minus1 > 0 {
            Self::skip_slice_group_map(reader, num_slice_groups_minus1)?;
        }
        let num_ref_idx_l0_default_active_minus1 = read_ue(reader)? as u32;
        let num_ref_idx_l1_default_active_minus1 = read_ue(reader)? as u32;
        let weighted_pred_flag = reader.read_bit()?;
        let weighted_bipred_idc: u8 = reader.read_var(2)?;
        let pic_init_qp_minus26 = read_se(reader)? as i32;
        let pic_init_qs_minus26 = read_se(reader)? as i32;
        let chroma_qp_index_offset = read_se(reader)? as i32;
        let deblocking_filter_control_present_flag = reader.read_bit()?;
        let constrained_intra_pred_flag = reader.read_bit()?;
        let redundant_pic_cnt_present_flag = reader.read_bit()?;
        // optional trailing fields (transform_8x8_mode and friends) are not read

        Ok(Self {
            pic_parameter_set_id,
            seq_parameter_set_id,
            entropy_coding_mode_flag,
            bottom_field_pic_order_in_frame_present_flag,
            num_slice_groups_minus1,
            num_ref_idx_l0_default_active_minus1,
            num_ref_idx_l1_default_active_minus1,
            weighted_pred_flag,
            weighted_bipred_idc,
            pic_init_qp_minus26,
            pic_init_qs_minus26,
            chroma_qp_index_offset,
            deblocking_filter_control_present_flag,
            constrained_intra_pred_flag,
            redundant_pic_cnt_present_flag,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::exp_golomb::{write_se, write_ue};
    use bitstream_io::{BigEndian, BitWrite, BitWriter};

    fn minimal_sps() -> SpsContext {
        SpsContext {
            profile_idc: 66,
            constraint_flags: 0xc0,
            level_idc: 31,
            seq_parameter_set_id: 0,
            chroma_format_idc: 1,
            log2_max_frame_num_minus4: 0,
            pic_order_cnt_type: 2,
            log2_max_pic_order_cnt_lsb_minus4: None,
            max_num_ref_frames: 1,
            gaps_in_frame_num_value_allowed_flag: false,
            pic_width_in_mbs_minus1: 79,
            pic_height_in_map_units_minus1: 44,
            frame_mbs_only_flag: true,
            direct_8x8_inference_flag: false,
        }
    }

    fn build_pps_rbsp() -> Vec<u8> {
        let mut writer = BitWriter::endian(Vec::new(), BigEndian);
        write_ue(&mut writer, 0).unwrap(); // pic_parameter_set_id
        write_ue(&mut writer, 0).unwrap(); // seq_parameter_set_id
        writer.write_bit(false).unwrap(); // entropy_coding_mode_flag: CAVLC
        writer.write_bit(false).unwrap(); // bottom_field_pic_order_in_frame_present
        write_ue(&mut writer, 0).unwrap(); // num_slice_groups_minus1
        write_ue(&mut writer, 0).unwrap(); // num_ref_idx_l0_default_active_minus1
        write_ue(&mut writer, 0).unwrap(); // num_ref_idx_l1_default_active_minus1
        writer.write_bit(false).unwrap(); // weighted_pred_flag
        writer.write_var(2, 0_u8).unwrap(); // weighted_bipred_idc
        write_se(&mut writer, 0).unwrap(); // pic_init_qp_minus26
        write_se(&mut writer, 0).unwrap(); // pic_init_qs_minus26
        write_se(&mut writer, 0).unwrap(); // chroma_qp_index_offset
        writer.write_bit(false).unwrap(); // deblocking_filter_control_present
        writer.write_bit(false).unwrap(); // constrained_intra_pred
        writer.write_bit(false).unwrap(); // redundant_pic_cnt_present
        writer.write_bit(true).unwrap(); // rbsp stop bit
        writer.byte_align().unwrap();
        writer.into_writer()
    }

    #[test]
    fn test_parse_minimal_pps() {
        let pps = PpsContext::parse(&build_pps_rbsp(), &minimal_sps()).unwrap();
        assert_eq!(pps.pic_parameter_set_id, 0);
        assert!(!pps.entropy_coding_mode_flag);
        assert_eq!(pps.num_slice_groups_minus1, 0);
        assert!(!pps.weighted_pred_flag);
    }

    #[test]
    fn test_parse_pps_with_wrong_sps_id() {
        let mut sps = minimal_sps();
        sps.seq_parameter_set_id = 3;
        assert!(PpsContext::parse(&build_pps_rbsp(), &sps).is_err());
    }
}
