use codec_h264::nalu::NalUnit;
use tokio_util::bytes::Bytes;
use utils::{
    random::{random_u16, random_u32},
    traits::{dynamic_sized_packet::DynamicSizedPacket, writer::WriteTo},
};

use crate::{
    codec::h264::{
        NaluDescriptor, RtpH264Payload,
        aggregation::StapAPacket,
        errors::{RtpH264Error, RtpH264Result},
        fragmented::{FuAPacket, FuHeader, FuIndicator},
    },
    header::{RTP_FIXED_HEADER_SIZE, RtpHeader},
    packet::RtpPacket,
};

const FUA_PAYLOAD_OVERHEAD: usize = 2; // FU indicator + FU header

/// Map a wall-clock microsecond timestamp onto the RTP clock.
pub fn wallclock_to_rtp_timestamp(ntp_timestamp: u64, clock_rate: u32, offset: u32) -> u32 {
    let ticks = (ntp_timestamp as u128 * clock_rate as u128 + 500_000) / 1_000_000;
    offset.wrapping_add(ticks as u32)
}

#[derive(Debug, Clone)]
pub struct H264PacketizerConfig {
    pub ssrc: u32,
    pub payload_type: u8,
    pub clock_rate: u32,
    /// total packet budget, RTP header included
    pub max_packet_size: usize,
    /// when set, adjacent small NAL units of one access unit are folded
    /// into STAP-A packets no larger than this
    pub target_packet_size: Option<usize>,
}

/// Sender side of the H.264 payload format: turns NAL units into single
/// NAL unit packets, STAP-A aggregates or FU-A fragments with contiguous
/// sequence numbers and media-clock timestamps.
#[derive(Debug)]
pub struct H264Packetizer {
    config: H264PacketizerConfig,
    sequence_number: u16,
    rtp_timestamp_offset: u32,
    packet_count: u32,
    byte_count: u32,
}

impl H264Packetizer {
    pub fn new(config: H264PacketizerConfig) -> Self {
        // random bases so neither the sequence numbers nor the RTP
        // timestamps leak absolute session time
        Self::with_initial_state(config, random_u16(), random_u32())
    }

    pub fn with_initial_state(
        config: H264PacketizerConfig,
        sequence_number: u16,
        rtp_timestamp_offset: u32,
    ) -> Self {
        Self {
            config,
            sequence_number,
            rtp_timestamp_offset,
            packet_count: 0,
            byte_count: 0,
        }
    }

    pub fn ssrc(&self) -> u32 {
        self.config.ssrc
    }

    pub fn clock_rate(&self) -> u32 {
        self.config.clock_rate
    }

    pub fn packet_count(&self) -> u32 {
        self.packet_count
    }

    pub fn byte_count(&self) -> u32 {
        self.byte_count
    }

    pub fn rtp_timestamp_for(&self, ntp_timestamp: u64) -> u32 {
        wallclock_to_rtp_timestamp(
            ntp_timestamp,
            self.config.clock_rate,
            self.rtp_timestamp_offset,
        )
    }

    /// Packetize a run of NAL units, usually one access unit. The marker
    /// bit lands on the last packet of every NAL unit flagged
    /// `is_last_in_au`.
    pub fn packetize_nalus(&mut self, nalus: &[NaluDescriptor]) -> RtpH264Result<Vec<RtpPacket>> {
        let max_payload = self
            .config
            .max_packet_size
            .checked_sub(RTP_FIXED_HEADER_SIZE + FUA_PAYLOAD_OVERHEAD)
            .filter(|v| *v > 0)
            .ok_or(RtpH264Error::InvalidPacketSizeLimit(
                self.config.max_packet_size,
            ))?;

        let mut result = Vec::new();
        let mut idx = 0;
        while idx < nalus.len() {
            if let Some(run_len) = self.aggregation_run_length(&nalus[idx..]) {
                let run = &nalus[idx..idx + run_len];
                result.push(self.emit_stap_a(run)?);
                idx += run_len;
                continue;
            }

            let nalu = &nalus[idx];
            if nalu.nalu.is_empty() {
                return Err(RtpH264Error::EmptyNalUnit);
            }
            if nalu.nalu.len() + RTP_FIXED_HEADER_SIZE <= self.config.max_packet_size {
                result.push(self.emit_single(nalu)?);
            } else {
                self.emit_fua_fragments(nalu, max_payload, &mut result)?;
            }
            idx += 1;
        }
        Ok(result)
    }

    /// Length of an aggregation run starting at `nalus[0]`, if aggregating
    /// at least two units actually saves packets under the target size.
    fn aggregation_run_length(&self, nalus: &[NaluDescriptor]) -> Option<usize> {
        let target = self.config.target_packet_size?;
        let budget = target.checked_sub(RTP_FIXED_HEADER_SIZE)?;
        let mut size = 1; // STAP-A NAL HDR
        let mut len = 0;
        for nalu in nalus {
            if nalu.ntp_timestamp != nalus[0].ntp_timestamp {
                break;
            }
            let entry = 2 + nalu.nalu.len();
            if size + entry > budget {
                break;
            }
            size += entry;
            len += 1;
        }
        if len >= 2 { Some(len) } else { None }
    }

    fn next_header(&mut self, nalu: &NaluDescriptor, marker: bool) -> RtpHeader {
        let header = RtpHeader::builder()
            .payload_type(self.config.payload_type)
            .marker(marker)
            .sequence_number(self.sequence_number)
            .timestamp(self.rtp_timestamp_for(nalu.ntp_timestamp))
            .ssrc(self.config.ssrc)
            .build();
        self.sequence_number = self.sequence_number.wrapping_add(1);
        header
    }

    fn finish_packet(
        &mut self,
        nalu: &NaluDescriptor,
        marker: bool,
        payload: RtpH264Payload,
    ) -> RtpH264Result<RtpPacket> {
        let mut bytes = Vec::with_capacity(payload.get_packet_bytes_count());
        payload.write_to(&mut bytes)?;
        let packet = RtpPacket::with_deadlines(
            self.next_header(nalu, marker),
            Bytes::from(bytes),
            nalu.ntp_timestamp,
            nalu.timeout_timestamp,
        );
        self.packet_count = self.packet_count.wrapping_add(1);
        self.byte_count = self
            .byte_count
            .wrapping_add(packet.payload.len() as u32);
        Ok(packet)
    }

    fn emit_single(&mut self, nalu: &NaluDescriptor) -> RtpH264Result<RtpPacket> {
        let unit = NalUnit::from_bytes(nalu.nalu.clone())?;
        self.finish_packet(
            nalu,
            nalu.is_last_in_au,
            RtpH264Payload::SingleNalu(unit),
        )
    }

    fn emit_stap_a(&mut self, run: &[NaluDescriptor]) -> RtpH264Result<RtpPacket> {
        let units = run
            .iter()
            .map(|nalu| NalUnit::from_bytes(nalu.nalu.clone()))
            .collect::<Result<Vec<_>, _>>()?;
        let marker = run.last().is_some_and(|nalu| nalu.is_last_in_au);
        self.finish_packet(
            &run[0],
            marker,
            RtpH264Payload::StapA(StapAPacket::new(units)),
        )
    }

    fn emit_fua_fragments(
        &mut self,
        nalu: &NaluDescriptor,
        max_fragment_size: usize,
        result: &mut Vec<RtpPacket>,
    ) -> RtpH264Result<()> {
        let header_byte = nalu.nalu[0];
        let body = &nalu.nalu[1..];
        let indicator = FuIndicator {
            forbidden_zero_bit: (header_byte >> 7) & 0b1 == 0b1,
            nal_ref_idc: (header_byte >> 5) & 0b11,
        };

        let mut offset = 0;
        let mut start_bit = true;
        while offset < body.len() {
            let fragment_size = max_fragment_size.min(body.len() - offset);
            let end_bit = offset + fragment_size == body.len();
            let payload = RtpH264Payload::FuA(FuAPacket {
                indicator,
                fu_header: FuHeader {
                    start_bit,
                    end_bit,
                    nalu_type: header_byte & 0x1f,
                },
                payload: nalu.nalu.slice(1 + offset..1 + offset + fragment_size),
            });
            let marker = end_bit && nalu.is_last_in_au;
            result.push(self.finish_packet(nalu, marker, payload)?);
            start_bit = false;
            offset += fragment_size;
        }
        Ok(())
    }
}
