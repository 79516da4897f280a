use std::io::Cursor;

use tokio_util::bytes::{BufMut, Bytes, BytesMut};
use utils::traits::reader::ReadFrom;

use crate::{
    codec::h264::{NaluDescriptor, RtpH264Payload, errors::RtpH264Result, fragmented::FuAPacket},
    errors::RtpError,
    loss::{LossRecord, PacketLossBitmap},
    packet::RtpPacket,
    sequence_number::SequenceNumber,
};

const LOSS_BITMAP_WINDOW: usize = 1024;

#[derive(Debug, Default, Clone)]
pub struct DepacketizerCounters {
    pub packets_received: u64,
    pub packets_lost: u64,
    pub packets_duplicated: u64,
    pub packets_outdated: u64,
    pub errored_fragment_groups: u64,
    pub nalus_emitted: u64,
}

/// One FU-A reassembly in progress, keyed by the RTP timestamp of its
/// fragments.
#[derive(Debug)]
struct FragmentGroup {
    rtp_timestamp: u32,
    buffer: BytesMut,
    missing_fragment: bool,
    marker: bool,
    metadata: Option<Bytes>,
}

#[derive(Debug, Clone)]
pub struct H264DepacketizerConfig {
    pub payload_type: u8,
    pub clock_rate: u32,
}

/// Receiver side of the H.264 payload format: validates RTP headers,
/// tracks sequence continuity across wraps, splits STAP-A aggregates,
/// reassembles FU-A fragments and surfaces NAL units in arrival order
/// with loss flags.
#[derive(Debug)]
pub struct H264Depacketizer {
    config: H264DepacketizerConfig,
    highest_seq: Option<SequenceNumber>,
    pending_gap: u32,
    fragments: Option<FragmentGroup>,
    loss_bitmap: Option<PacketLossBitmap>,
    loss_records: Vec<LossRecord>,
    counters: DepacketizerCounters,
}

impl H264Depacketizer {
    pub fn new(config: H264DepacketizerConfig) -> Self {
        Self {
            config,
            highest_seq: None,
            pending_gap: 0,
            fragments: None,
            loss_bitmap: None,
            loss_records: Vec::new(),
            counters: DepacketizerCounters::default(),
        }
    }

    pub fn counters(&self) -> &DepacketizerCounters {
        &self.counters
    }

    /// Closed loss-bitmap windows accumulated since the last call.
    pub fn take_loss_records(&mut self) -> Vec<LossRecord> {
        std::mem::take(&mut self.loss_records)
    }

    /// Flush the open loss-bitmap window, e.g. when a report is due.
    pub fn flush_loss_record(&mut self) -> Option<LossRecord> {
        self.loss_bitmap.as_mut().and_then(|bitmap| bitmap.take_record())
    }

    /// Process one received datagram payload. Returns the NAL units the
    /// packet completed, in order.
    pub fn push_packet(
        &mut self,
        packet: &RtpPacket,
        arrival_timestamp: u64,
    ) -> RtpH264Result<Vec<NaluDescriptor>> {
        if packet.header.version != 2 {
            return Err(RtpError::InvalidVersion(packet.header.version).into());
        }
        if packet.header.payload_type != self.config.payload_type {
            return Err(RtpError::WrongPayloadType(format!(
                "expect payload type {}, got {}",
                self.config.payload_type, packet.header.payload_type
            ))
            .into());
        }

        let seq = match self.track_sequence(packet.header.sequence_number) {
            Some(seq) => seq,
            None => return Ok(Vec::new()),
        };
        self.counters.packets_received += 1;
        if let Some(record) = self
            .loss_bitmap
            .get_or_insert_with(|| PacketLossBitmap::new(seq, LOSS_BITMAP_WINDOW))
            .mark_received(seq)
        {
            self.loss_records.push(record);
        }

        let mut output = Vec::new();
        let payload = RtpH264Payload::read_from(Cursor::new(&packet.payload[..]))?;
        match payload {
            RtpH264Payload::SingleNalu(nalu) => {
                self.close_fragments_as_errored(&mut output, arrival_timestamp);
                output.push(self.make_descriptor(
                    nalu.to_bytes(),
                    packet,
                    arrival_timestamp,
                    packet.header.marker,
                    false,
                ));
            }
            RtpH264Payload::StapA(stap) => {
                self.close_fragments_as_errored(&mut output, arrival_timestamp);
                let count = stap.nal_units.len();
                for (idx, unit) in stap.nal_units.into_iter().enumerate() {
                    let marker = packet.header.marker && idx + 1 == count;
                    output.push(self.make_descriptor(
                        unit.to_bytes(),
                        packet,
                        arrival_timestamp,
                        marker,
                        false,
                    ));
                }
            }
            RtpH264Payload::FuA(fragment) => {
                self.push_fragment(fragment, packet, arrival_timestamp, &mut output);
            }
        }
        self.counters.nalus_emitted += output.len() as u64;
        Ok(output)
    }

    /// Extend the raw sequence number and classify it. Returns `None` for
    /// duplicates and for reordered packets older than the current head.
    fn track_sequence(&mut self, raw: u16) -> Option<SequenceNumber> {
        let Some(highest) = self.highest_seq else {
            let seq = SequenceNumber::from(raw);
            self.highest_seq = Some(seq);
            return Some(seq);
        };
        let seq = highest.extend_with(raw);
        if seq == highest {
            tracing::debug!("dropping duplicate packet, seq {}", raw);
            self.counters.packets_duplicated += 1;
            return None;
        }
        if seq < highest {
            tracing::debug!("dropping late reordered packet, seq {}", raw);
            self.counters.packets_outdated += 1;
            return None;
        }
        let gap = (seq - highest) as u32 - 1;
        if gap > 0 {
            self.counters.packets_lost += gap as u64;
            self.pending_gap += gap;
            if let Some(fragments) = self.fragments.as_mut() {
                fragments.missing_fragment = true;
            }
        }
        self.highest_seq = Some(seq);
        Some(seq)
    }

    fn push_fragment(
        &mut self,
        fragment: FuAPacket,
        packet: &RtpPacket,
        arrival_timestamp: u64,
        output: &mut Vec<NaluDescriptor>,
    ) {
        let timestamp_changed = self
            .fragments
            .as_ref()
            .is_some_and(|group| group.rtp_timestamp != packet.header.timestamp);
        if timestamp_changed || (fragment.fu_header.start_bit && self.fragments.is_some()) {
            self.close_fragments_as_errored(output, arrival_timestamp);
        }

        match self.fragments.as_mut() {
            None => {
                let mut buffer = BytesMut::with_capacity(fragment.payload.len() + 1);
                buffer.put_u8(fragment.nalu_header_byte());
                buffer.extend_from_slice(&fragment.payload);
                self.fragments = Some(FragmentGroup {
                    rtp_timestamp: packet.header.timestamp,
                    buffer,
                    // a group opened by a non-start fragment lost its head
                    missing_fragment: !fragment.fu_header.start_bit,
                    marker: packet.header.marker,
                    metadata: packet
                        .header
                        .header_extension
                        .as_ref()
                        .map(|ext| ext.bytes.clone()),
                });
            }
            Some(group) => {
                group.buffer.extend_from_slice(&fragment.payload);
                group.marker = packet.header.marker;
            }
        }

        if fragment.fu_header.end_bit {
            let group = self.fragments.take().expect("group was just ensured");
            if group.missing_fragment {
                self.counters.errored_fragment_groups += 1;
            }
            output.push(self.descriptor_from_group(group, arrival_timestamp));
        }
    }

    /// A non-FU arrival or a timestamp change closes any reassembly in
    /// progress; the partial NAL unit is surfaced flagged as errored.
    fn close_fragments_as_errored(
        &mut self,
        output: &mut Vec<NaluDescriptor>,
        arrival_timestamp: u64,
    ) {
        if let Some(mut group) = self.fragments.take() {
            tracing::warn!(
                "closing fragment group at timestamp {} with fragments missing",
                group.rtp_timestamp
            );
            group.missing_fragment = true;
            self.counters.errored_fragment_groups += 1;
            output.push(self.descriptor_from_group(group, arrival_timestamp));
        }
    }

    fn descriptor_from_group(
        &mut self,
        group: FragmentGroup,
        arrival_timestamp: u64,
    ) -> NaluDescriptor {
        let mut descriptor = NaluDescriptor::new(
            group.buffer.freeze(),
            self.media_timestamp(group.rtp_timestamp),
            group.marker,
        );
        descriptor.arrival_timestamp = arrival_timestamp;
        descriptor.rtp_timestamp = group.rtp_timestamp;
        descriptor.incomplete = group.missing_fragment;
        descriptor.metadata = group.metadata;
        self.apply_pending_gap(&mut descriptor);
        descriptor
    }

    fn make_descriptor(
        &mut self,
        nalu: Bytes,
        packet: &RtpPacket,
        arrival_timestamp: u64,
        is_last_in_au: bool,
        incomplete: bool,
    ) -> NaluDescriptor {
        let mut descriptor = NaluDescriptor::new(
            nalu,
            self.media_timestamp(packet.header.timestamp),
            is_last_in_au,
        );
        descriptor.arrival_timestamp = arrival_timestamp;
        descriptor.rtp_timestamp = packet.header.timestamp;
        descriptor.incomplete = incomplete;
        descriptor.metadata = packet
            .header
            .header_extension
            .as_ref()
            .map(|ext| ext.bytes.clone());
        self.apply_pending_gap(&mut descriptor);
        descriptor
    }

    fn apply_pending_gap(&mut self, descriptor: &mut NaluDescriptor) {
        if self.pending_gap > 0 {
            descriptor.seq_num_forced_discontinuity = true;
            descriptor.missing_packets_before = self.pending_gap;
            self.pending_gap = 0;
        }
    }

    /// Project the 90 kHz RTP timestamp onto the microsecond timeline the
    /// rest of the stack runs on. The base stays the sender's random
    /// offset; only differences are meaningful.
    fn media_timestamp(&self, rtp_timestamp: u32) -> u64 {
        rtp_timestamp as u64 * 1_000_000 / self.config.clock_rate as u64
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        codec::h264::packetizer::{H264Packetizer, H264PacketizerConfig},
        payload_types::{H264_RTP_CLOCK_RATE, H264_RTP_PAYLOAD_TYPE},
    };

    fn depacketizer() -> H264Depacketizer {
        H264Depacketizer::new(H264DepacketizerConfig {
            payload_type: H264_RTP_PAYLOAD_TYPE,
            clock_rate: H264_RTP_CLOCK_RATE,
        })
    }

    fn packetizer(initial_seq: u16) -> H264Packetizer {
        H264Packetizer::with_initial_state(
            H264PacketizerConfig {
                ssrc: 0x0042_4242,
                payload_type: H264_RTP_PAYLOAD_TYPE,
                clock_rate: H264_RTP_CLOCK_RATE,
                max_packet_size: 1400,
                target_packet_size: None,
            },
            initial_seq,
            0,
        )
    }

    fn nalu_of(size: usize, ntp: u64, last: bool) -> NaluDescriptor {
        let mut bytes = vec![0x41_u8];
        bytes.resize(size, 0x3c);
        NaluDescriptor::new(Bytes::from(bytes), ntp, last)
    }

    #[test]
    fn test_no_loss_round_trip_identity() {
        let mut packetizer = packetizer(1000);
        let mut depacketizer = depacketizer();
        let inputs = [
            nalu_of(500, 0, false),
            nalu_of(3000, 33_333, false),
            nalu_of(800, 66_666, true),
        ];
        let packets = packetizer.packetize_nalus(&inputs).unwrap();

        let mut outputs = Vec::new();
        for packet in &packets {
            outputs.extend(depacketizer.push_packet(packet, 0).unwrap());
        }
        assert_eq!(outputs.len(), 3);
        for (output, input) in outputs.iter().zip(inputs.iter()) {
            assert_eq!(output.nalu, input.nalu);
            assert!(!output.incomplete);
            assert!(!output.seq_num_forced_discontinuity);
        }
        assert!(outputs[2].is_last_in_au);
        assert!(!outputs[0].is_last_in_au);
    }

    #[test]
    fn test_fragmented_nalu_reassembles() {
        let mut packetizer = packetizer(7);
        let mut depacketizer = depacketizer();
        let input = nalu_of(4000, 0, true);
        let packets = packetizer.packetize_nalus(std::slice::from_ref(&input)).unwrap();
        assert_eq!(packets.len(), 3);

        let mut outputs = Vec::new();
        for packet in &packets {
            outputs.extend(depacketizer.push_packet(packet, 0).unwrap());
        }
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].nalu, input.nalu);
        assert!(outputs[0].is_last_in_au);
        assert!(!outputs[0].incomplete);
    }

    #[test]
    fn test_single_packet_loss_sets_discontinuity() {
        let mut packetizer = packetizer(100);
        let mut depacketizer = depacketizer();
        let inputs: Vec<_> = (0..10)
            .map(|i| nalu_of(200, i * 33_333, true))
            .collect();
        let packets = packetizer.packetize_nalus(&inputs).unwrap();

        let mut outputs = Vec::new();
        for packet in &packets {
            if packet.header.sequence_number == 104 {
                continue;
            }
            outputs.extend(depacketizer.push_packet(packet, 0).unwrap());
        }
        assert_eq!(outputs.len(), 9);
        assert!(outputs[..4].iter().all(|o| !o.seq_num_forced_discontinuity));
        assert!(outputs[4].seq_num_forced_discontinuity);
        assert_eq!(outputs[4].missing_packets_before, 1);
        assert!(outputs[5..].iter().all(|o| !o.seq_num_forced_discontinuity));
        assert_eq!(depacketizer.counters().packets_lost, 1);

        let record = depacketizer.flush_loss_record().unwrap();
        assert!(!record.is_received(SequenceNumber::from(104_u16)));
        assert!(record.is_received(SequenceNumber::from(103_u16)));
        assert_eq!(record.lost_count(), 1);
    }

    #[test]
    fn test_sequence_wrap_is_not_loss() {
        let mut packetizer = packetizer(65_534);
        let mut depacketizer = depacketizer();
        let inputs: Vec<_> = (0..4).map(|i| nalu_of(100, i * 1000, true)).collect();
        let packets = packetizer.packetize_nalus(&inputs).unwrap();

        for packet in &packets {
            depacketizer.push_packet(packet, 0).unwrap();
        }
        assert_eq!(depacketizer.counters().packets_lost, 0);
        assert_eq!(depacketizer.counters().packets_received, 4);
    }

    #[test]
    fn test_lost_final_fragment_flags_incomplete() {
        let mut packetizer = packetizer(1);
        let mut depacketizer = depacketizer();
        let fragmented = nalu_of(4000, 0, true);
        let trailing = nalu_of(100, 33_333, true);
        let mut packets = packetizer.packetize_nalus(&[fragmented, trailing]).unwrap();
        assert_eq!(packets.len(), 4);
        packets.remove(2); // drop the E=1 fragment

        let mut outputs = Vec::new();
        for packet in &packets {
            outputs.extend(depacketizer.push_packet(packet, 0).unwrap());
        }
        assert_eq!(outputs.len(), 2);
        assert!(outputs[0].incomplete);
        // the gap surfaced on the partial NAL unit closing the group
        assert!(outputs[0].seq_num_forced_discontinuity);
        assert!(!outputs[1].incomplete);
    }

    #[test]
    fn test_duplicate_packet_is_dropped() {
        let mut packetizer = packetizer(10);
        let mut depacketizer = depacketizer();
        let packets = packetizer
            .packetize_nalus(&[nalu_of(100, 0, true)])
            .unwrap();

        assert_eq!(depacketizer.push_packet(&packets[0], 0).unwrap().len(), 1);
        assert!(depacketizer.push_packet(&packets[0], 0).unwrap().is_empty());
        assert_eq!(depacketizer.counters().packets_duplicated, 1);
    }

    #[test]
    fn test_wrong_version_is_rejected() {
        let mut packetizer = packetizer(10);
        let mut depacketizer = depacketizer();
        let mut packets = packetizer.packetize_nalus(&[nalu_of(100, 0, true)]).unwrap();
        packets[0].header.version = 1;
        assert!(depacketizer.push_packet(&packets[0], 0).is_err());
    }
}
