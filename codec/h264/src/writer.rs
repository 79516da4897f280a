use bitstream_io::{BigEndian, BitWrite, BitWriter};
use tokio_util::bytes::Bytes;

use crate::{
    errors::{H264CodecError, H264CodecResult},
    exp_golomb::{write_se, write_ue},
    nalu::ANNEX_B_START_CODE,
    nalu_header::NaluHeader,
    nalu_type::NaluType,
    pps::PpsContext,
    rbsp::rbsp_escape,
    sps::SpsContext,
};

const SEI_PAYLOAD_TYPE_USER_DATA_UNREGISTERED: u32 = 5;
const SEI_PAYLOAD_TYPE_RECOVERY_POINT: u32 = 6;

// uuid_iso_iec_11578 identifying this writer's user data blobs
const USER_DATA_UNREGISTERED_UUID: [u8; 16] = [
    0x93, 0x1c, 0x6f, 0x2b, 0xa8, 0x57, 0x44, 0x26, 0xbe, 0x90, 0x4c, 0x12, 0x7f, 0x3e, 0x01, 0xa4,
];

/// Recovery point SEI syntax elements.
#[derive(Debug, Clone, Copy, Default)]
pub struct RecoveryPointSei {
    pub recovery_frame_cnt: u32,
    pub exact_match_flag: bool,
    pub broken_link_flag: bool,
    pub changing_slice_group_idc: u8,
}

/// Per-slice parameters the caller tracks across synthesized pictures.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceContext {
    pub frame_num: u32,
    pub idr_pic_id: u32,
    pub pic_order_cnt_lsb: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct SliceWriterConfig {
    /// Prefix every produced NAL unit with an Annex-B start code.
    pub insert_start_code: bool,
}

impl Default for SliceWriterConfig {
    fn default() -> Self {
        Self {
            insert_start_code: true,
        }
    }
}

/// Synthesizes concealment NAL units: entirely gray IDR slices, entirely
/// skipped P slices, and SEI messages. Only CAVLC single-slice-group
/// streams are supported; anything else is reported as unsupported and the
/// caller skips concealment.
#[derive(Debug, Default)]
pub struct SliceWriter {
    config: SliceWriterConfig,
    sps: Option<SpsContext>,
    pps: Option<PpsContext>,
}

impl SliceWriter {
    pub fn new(config: SliceWriterConfig) -> Self {
        Self {
            config,
            sps: None,
            pps: None,
        }
    }

    /// Import the parameter-set context from the parser.
    pub fn set_sps_pps_context(&mut self, sps: SpsContext, pps: PpsContext) {
        self.sps = Some(sps);
        self.pps = Some(pps);
    }

    fn writable_context(&self) -> H264CodecResult<(&SpsContext, &PpsContext)> {
        let (Some(sps), Some(pps)) = (self.sps.as_ref(), self.pps.as_ref()) else {
            return Err(H264CodecError::MissingParameterSetContext(
                "slice synthesis requires sps and pps".to_string(),
            ));
        };
        if pps.entropy_coding_mode_flag {
            return Err(H264CodecError::UnsupportedSyntax(
                "cannot synthesize CABAC slices".to_string(),
            ));
        }
        if pps.num_slice_groups_minus1 > 0 {
            return Err(H264CodecError::UnsupportedSyntax(
                "cannot synthesize slices with slice groups".to_string(),
            ));
        }
        if !sps.frame_mbs_only_flag {
            return Err(H264CodecError::UnsupportedSyntax(
                "cannot synthesize field-coded slices".to_string(),
            ));
        }
        if sps.pic_order_cnt_type == 1 {
            return Err(H264CodecError::UnsupportedSyntax(
                "cannot synthesize slices with pic_order_cnt_type 1".to_string(),
            ));
        }
        Ok((sps, pps))
    }

    /// Write an entirely gray IDR I-slice covering `slice_mb_count`
    /// macroblocks starting at `first_mb_in_slice`.
    pub fn write_gray_i_slice(
        &self,
        first_mb_in_slice: u32,
        slice_mb_count: u32,
        ctx: &SliceContext,
    ) -> H264CodecResult<Bytes> {
        let (sps, pps) = self.writable_context()?;
        let mut writer = BitWriter::endian(Vec::new(), BigEndian);

        write_ue(&mut writer, first_mb_in_slice)?;
        write_ue(&mut writer, 7)?; // slice_type: I, all slices of the picture
        write_ue(&mut writer, pps.pic_parameter_set_id as u32)?;
        let frame_num_bits = sps.log2_max_frame_num_minus4 as u32 + 4;
        writer.write_var(frame_num_bits, 0_u32)?; // frame_num, zero for IDR
        write_ue(&mut writer, ctx.idr_pic_id)?;
        if sps.pic_order_cnt_type == 0 {
            let poc_bits = sps.log2_max_pic_order_cnt_lsb_minus4.unwrap_or(0) as u32 + 4;
            writer.write_var(poc_bits, ctx.pic_order_cnt_lsb & ((1 << poc_bits) - 1))?;
            if pps.bottom_field_pic_order_in_frame_present_flag {
                write_se(&mut writer, 0)?; // delta_pic_order_cnt_bottom
            }
        }
        if pps.redundant_pic_cnt_present_flag {
            write_ue(&mut writer, 0)?; // redundant_pic_cnt
        }
        // dec_ref_pic_marking for IDR
        writer.write_bit(false)?; // no_output_of_prior_pics_flag
        writer.write_bit(false)?; // long_term_reference_flag
        write_se(&mut writer, 0)?; // slice_qp_delta
        self.write_deblocking_fields(&mut writer, pps)?;

        // Intra 16x16, DC prediction, no coded residual: neighbors default to
        // mid-gray so the reconstructed picture is uniformly gray.
        for _ in 0..slice_mb_count {
            write_ue(&mut writer, 3)?; // mb_type: I_16x16_2_0_0
            write_ue(&mut writer, 0)?; // intra_chroma_pred_mode: DC
            write_se(&mut writer, 0)?; // mb_qp_delta
            writer.write_bit(true)?; // luma DC coeff_token: TotalCoeff 0
        }
        Self::write_rbsp_trailing(&mut writer)?;

        Ok(self.finish_nalu(NaluHeader::new(3, NaluType::IdrSlice), writer.into_writer()))
    }

    /// Write an entirely skipped P-slice covering `slice_mb_count`
    /// macroblocks starting at `first_mb_in_slice`.
    pub fn write_skipped_p_slice(
        &self,
        first_mb_in_slice: u32,
        slice_mb_count: u32,
        ctx: &SliceContext,
    ) -> H264CodecResult<Bytes> {
        let (sps, pps) = self.writable_context()?;
        if pps.weighted_pred_flag {
            return Err(H264CodecError::UnsupportedSyntax(
                "cannot synthesize weighted-prediction P slices".to_string(),
            ));
        }
        let mut writer = BitWriter::endian(Vec::new(), BigEndian);

        write_ue(&mut writer, first_mb_in_slice)?;
        write_ue(&mut writer, 5)?; // slice_type: P, all slices of the picture
        write_ue(&mut writer, pps.pic_parameter_set_id as u32)?;
        let frame_num_bits = sps.log2_max_frame_num_minus4 as u32 + 4;
        writer.write_var(frame_num_bits, ctx.frame_num & ((1 << frame_num_bits) - 1))?;
        if sps.pic_order_cnt_type == 0 {
            let poc_bits = sps.log2_max_pic_order_cnt_lsb_minus4.unwrap_or(0) as u32 + 4;
            writer.write_var(poc_bits, ctx.pic_order_cnt_lsb & ((1 << poc_bits) - 1))?;
            if pps.bottom_field_pic_order_in_frame_present_flag {
                write_se(&mut writer, 0)?; // delta_pic_order_cnt_bottom
            }
        }
        if pps.redundant_pic_cnt_present_flag {
            write_ue(&mut writer, 0)?; // redundant_pic_cnt
        }
        writer.write_bit(false)?; // num_ref_idx_active_override_flag
        writer.write_bit(false)?; // ref_pic_list_modification_flag_l0
        // dec_ref_pic_marking for a reference non-IDR slice
        writer.write_bit(false)?; // adaptive_ref_pic_marking_mode_flag
        write_se(&mut writer, 0)?; // slice_qp_delta
        self.write_deblocking_fields(&mut writer, pps)?;

        write_ue(&mut writer, slice_mb_count)?; // mb_skip_run covers the slice
        Self::write_rbsp_trailing(&mut writer)?;

        Ok(self.finish_nalu(NaluHeader::new(2, NaluType::NonIdrSlice), writer.into_writer()))
    }

    /// Write an SEI NAL unit carrying an optional recovery point message and
    /// zero or more user-data-unregistered blobs.
    pub fn write_sei(
        &self,
        recovery_point: Option<&RecoveryPointSei>,
        user_data: &[&[u8]],
    ) -> H264CodecResult<Bytes> {
        if recovery_point.is_none() && user_data.is_empty() {
            return Err(H264CodecError::SyntaxError(
                "sei without any message".to_string(),
            ));
        }
        let mut writer = BitWriter::endian(Vec::new(), BigEndian);

        if let Some(recovery) = recovery_point {
            let mut payload = BitWriter::endian(Vec::new(), BigEndian);
            write_ue(&mut payload, recovery.recovery_frame_cnt)?;
            payload.write_bit(recovery.exact_match_flag)?;
            payload.write_bit(recovery.broken_link_flag)?;
            payload.write_var(2, recovery.changing_slice_group_idc & 0b11)?;
            payload.write_bit(true)?; // payload bit alignment
            payload.byte_align()?;
            Self::write_sei_message(
                &mut writer,
                SEI_PAYLOAD_TYPE_RECOVERY_POINT,
                &payload.into_writer(),
            )?;
        }

        for blob in user_data {
            let mut payload = Vec::with_capacity(16 + blob.len());
            payload.extend_from_slice(&USER_DATA_UNREGISTERED_UUID);
            payload.extend_from_slice(blob);
            Self::write_sei_message(
                &mut writer,
                SEI_PAYLOAD_TYPE_USER_DATA_UNREGISTERED,
                &payload,
            )?;
        }
        Self::write_rbsp_trailing(&mut writer)?;

        Ok(self.finish_nalu(NaluHeader::new(0, NaluType::Sei), writer.into_writer()))
    }

    fn write_sei_message<W: BitWrite>(
        writer: &mut W,
        payload_type: u32,
        payload: &[u8],
    ) -> H264CodecResult<()> {
        let mut remaining = payload_type;
        while remaining >= 255 {
            writer.write_var(8, 0xff_u8)?;
            remaining -= 255;
        }
        writer.write_var(8, remaining as u8)?;
        let mut remaining = payload.len();
        while remaining >= 255 {
            writer.write_var(8, 0xff_u8)?;
            remaining -= 255;
        }
        writer.write_var(8, remaining as u8)?;
        writer.write_bytes(payload)?;
        Ok(())
    }

    fn write_deblocking_fields<W: BitWrite>(
        &self,
        writer: &mut W,
        pps: &PpsContext,
    ) -> H264CodecResult<()> {
        if pps.deblocking_filter_control_present_flag {
            write_ue(writer, 0)?; // disable_deblocking_filter_idc
            write_se(writer, 0)?; // slice_alpha_c0_offset_div2
            write_se(writer, 0)?; // slice_beta_offset_div2
        }
        Ok(())
    }

    fn write_rbsp_trailing<W: BitWrite>(writer: &mut W) -> H264CodecResult<()> {
        writer.write_bit(true)?;
        writer.byte_align()?;
        Ok(())
    }

    fn finish_nalu(&self, header: NaluHeader, rbsp: Vec<u8>) -> Bytes {
        let escaped = rbsp_escape(&rbsp);
        let mut nalu = Vec::with_capacity(escaped.len() + 5);
        if self.config.insert_start_code {
            nalu.extend_from_slice(&ANNEX_B_START_CODE);
        }
        nalu.push(header.into());
        nalu.extend_from_slice(&escaped);
        Bytes::from(nalu)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn writer_with_context() -> SliceWriter {
        let sps = SpsContext {
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
        };
        let pps = PpsContext {
            pic_parameter_set_id: 0,
            seq_parameter_set_id: 0,
            entropy_coding_mode_flag: false,
            bottom_field_pic_order_in_frame_present_flag: false,
            num_slice_groups_minus1: 0,
            num_ref_idx_l0_default_active_minus1: 0,
            num_ref_idx_l1_default_active_minus1: 0,
            weighted_pred_flag: false,
            weighted_bipred_idc: 0,
            pic_init_qp_minus26: 0,
            pic_init_qs_minus26: 0,
            chroma_qp_index_offset: 0,
            deblocking_filter_control_present_flag: false,
            constrained_intra_pred_flag: false,
            redundant_pic_cnt_present_flag: false,
        };
        let mut writer = SliceWriter::new(SliceWriterConfig {
            insert_start_code: false,
        });
        writer.set_sps_pps_context(sps, pps);
        writer
    }

    #[test]
    fn test_gray_i_slice_header_byte() {
        let writer = writer_with_context();
        let nalu = writer
            .write_gray_i_slice(0, 3600, &SliceContext::default())
            .unwrap();
        // nal_ref_idc 3, type 5 (IDR)
        assert_eq!(nalu[0], 0x65);
        assert!(nalu.len() > 3600 / 8);
    }

    #[test]
    fn test_skipped_p_slice_is_compact() {
        let writer = writer_with_context();
        let ctx = SliceContext {
            frame_num: 4,
            ..Default::default()
        };
        let nalu = writer.write_skipped_p_slice(0, 3600, &ctx).unwrap();
        // nal_ref_idc 2, type 1 (non-IDR)
        assert_eq!(nalu[0], 0x41);
        // a fully skipped picture is a handful of bytes regardless of size
        assert!(nalu.len() < 16);
    }

    #[test]
    fn test_sei_recovery_point_layout() {
        let writer = writer_with_context();
        let nalu = writer
            .write_sei(Some(&RecoveryPointSei::default()), &[])
            .unwrap();
        assert_eq!(nalu[0], 0x06);
        assert_eq!(nalu[1], 0x06); // payload type: recovery point
        assert_eq!(nalu[2], 0x01); // payload size in bytes
    }

    #[test]
    fn test_sei_requires_a_message() {
        let writer = writer_with_context();
        assert!(writer.write_sei(None, &[]).is_err());
    }

    #[test]
    fn test_synthesis_requires_context() {
        let writer = SliceWriter::new(SliceWriterConfig::default());
        assert!(
            writer
                .write_gray_i_slice(0, 99, &SliceContext::default())
                .is_err()
        );
    }
}
