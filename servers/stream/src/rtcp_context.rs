use num::ToPrimitive;
use rtp_formats::{
    errors::RtpResult,
    header::RtpHeader,
    rtcp::{
        receiver_report::RtcpReceiverReport,
        report_block::ReportBlock,
        sender_report::{RtcpSenderReport, SenderInfo},
        simple_ntp::{SimpleNtp, SimpleShortNtp},
    },
    sequence_number::SequenceNumber,
};

use crate::filter::DjbMetrics;

/// Peer-to-peer clock relation derived from the SR/RR exchange:
/// round-trip and one-way delays plus the estimated clock offset,
/// `((t2 - t1) + (t3 - t4)) / 2` over the report timestamps.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClockDelta {
    pub peer_clock_delta_us: i64,
    pub round_trip_delay_us: u64,
    pub peer2me_delay_us: u64,
    pub me2peer_delay_us: u64,
}

/// Build the 28-byte sender report for this session's sending side.
pub fn generate_sender_report(
    ssrc: u32,
    ntp_timestamp_us: u64,
    rtp_timestamp: u32,
    packet_count: u32,
    byte_count: u32,
) -> RtpResult<RtcpSenderReport> {
    RtcpSenderReport::builder()
        .ssrc(ssrc)
        .ntp(SimpleNtp::from_micros(ntp_timestamp_us))
        .rtp_timestamp(rtp_timestamp)
        .sender_packet_count(packet_count)
        .sender_octet_count(byte_count)
        .build()
}

/// Receiver-side RTCP state for a single remote sender: reception
/// statistics feeding report blocks (RFC 3550 6.4, A.8), last-SR
/// bookkeeping, round-trip and clock-delta estimation, and the de-jitter
/// buffer metrics sampled from the filter.
#[derive(Debug)]
pub struct RtcpReceiverContext {
    own_ssrc: u32,
    peer_ssrc: Option<u32>,
    clock_rate: u32,

    first_seq: Option<SequenceNumber>,
    highest_seq: Option<SequenceNumber>,
    packets_received: u64,
    bytes_received: u64,
    expected_prior: u64,
    received_prior: u64,

    jitter_ticks: f64,
    last_transit_ticks: Option<i64>,

    last_sr: Option<(SenderInfo, u64)>,
    clock_delta: Option<ClockDelta>,
    round_trip_us: Option<u64>,

    djb: DjbMetrics,
}

impl RtcpReceiverContext {
    pub fn new(own_ssrc: u32, clock_rate: u32) -> Self {
        Self {
            own_ssrc,
            peer_ssrc: None,
            clock_rate,
            first_seq: None,
            highest_seq: None,
            packets_received: 0,
            bytes_received: 0,
            expected_prior: 0,
            received_prior: 0,
            jitter_ticks: 0.0,
            last_transit_ticks: None,
            last_sr: None,
            clock_delta: None,
            round_trip_us: None,
            djb: DjbMetrics::default(),
        }
    }

    pub fn own_ssrc(&self) -> u32 {
        self.own_ssrc
    }

    pub fn peer_ssrc(&self) -> Option<u32> {
        self.peer_ssrc
    }

    pub fn packets_received(&self) -> u64 {
        self.packets_received
    }

    pub fn interarrival_jitter(&self) -> u32 {
        self.jitter_ticks.to_u32().unwrap_or(0)
    }

    pub fn round_trip_us(&self) -> Option<u64> {
        self.round_trip_us
    }

    pub fn clock_delta(&self) -> Option<ClockDelta> {
        self.clock_delta
    }

    pub fn set_djb_metrics(&mut self, djb: DjbMetrics) {
        self.djb = djb;
    }

    pub fn djb_metrics(&self) -> DjbMetrics {
        self.djb
    }

    /// Track one validated RTP packet: extended sequence, counts and the
    /// RFC 3550 interarrival jitter estimator.
    pub fn on_rtp_packet_received(
        &mut self,
        header: &RtpHeader,
        packet_bytes: usize,
        arrival_us: u64,
    ) {
        if self.peer_ssrc.is_none() {
            self.peer_ssrc = Some(header.ssrc);
        }
        let seq = match self.highest_seq {
            None => {
                let seq = SequenceNumber::from(header.sequence_number);
                self.first_seq = Some(seq);
                seq
            }
            Some(highest) => highest.extend_with(header.sequence_number),
        };
        self.highest_seq = Some(self.highest_seq.map_or(seq, |h| h.max(seq)));
        self.packets_received += 1;
        self.bytes_received += packet_bytes as u64;

        let arrival_ticks =
            (arrival_us as u128 * self.clock_rate as u128 / 1_000_000) as i64;
        let transit = arrival_ticks - header.timestamp as i64;
        if let Some(last_transit) = self.last_transit_ticks {
            let d = (transit - last_transit).abs() as f64;
            self.jitter_ticks += (d - self.jitter_ticks) / 16.0;
        }
        self.last_transit_ticks = Some(transit);
    }

    /// Record an incoming SR: last-SR bookkeeping for LSR/DLSR echoing
    /// and the t1/t2 pair of the clock-delta estimate.
    pub fn on_sender_report(&mut self, report: &RtcpSenderReport, arrival_us: u64) {
        if self.peer_ssrc.is_none() {
            self.peer_ssrc = Some(report.sender_ssrc);
        }
        self.last_sr = Some((report.sender_info.clone(), arrival_us));
        self.update_clock_delta();
    }

    /// Feed an RR answering one of our SRs (the sending/resending role).
    /// Round trip follows RFC 3550: now - LSR - DLSR in 1/65536 s units.
    pub fn on_receiver_report(&mut self, report: &RtcpReceiverReport, arrival_us: u64) {
        let Some(block) = report
            .report_blocks
            .iter()
            .find(|block| block.ssrc == self.own_ssrc)
        else {
            return;
        };
        let lsr: u32 = block.last_sender_report_timestamp.into();
        if lsr == 0 {
            return;
        }
        let now_middle = SimpleNtp::from_micros(arrival_us).middle_32();
        let rtt_units = now_middle
            .wrapping_sub(lsr)
            .wrapping_sub(block.delay_since_last_sender_report);
        // an implausibly large value means a stale or foreign echo
        if rtt_units >= 0x8000_0000 {
            return;
        }
        self.round_trip_us = Some(rtt_units as u64 * 1_000_000 / 65_536);
        self.update_clock_delta();
    }

    /// `peer_clock_delta = (t2 - t1) - rtt / 2`, which is the
    /// `((t2 - t1) + (t3 - t4)) / 2` form with a symmetric-path rtt.
    fn update_clock_delta(&mut self) {
        let (Some((sender_info, arrival_us)), Some(rtt)) = (&self.last_sr, self.round_trip_us)
        else {
            return;
        };
        let one_way = *arrival_us as i64 - sender_info.ntp_timestamp.as_micros() as i64;
        let delta = one_way - (rtt / 2) as i64;
        let peer2me = (one_way - delta).max(0) as u64;
        self.clock_delta = Some(ClockDelta {
            peer_clock_delta_us: delta,
            round_trip_delay_us: rtt,
            peer2me_delay_us: peer2me,
            me2peer_delay_us: rtt.saturating_sub(peer2me),
        });
    }

    fn expected(&self) -> u64 {
        match (self.first_seq, self.highest_seq) {
            (Some(first), Some(highest)) => highest - first + 1,
            _ => 0,
        }
    }

    pub fn cumulative_lost(&self) -> i64 {
        self.expected() as i64 - self.packets_received as i64
    }

    /// Losses over the interval since the previous report, as the 8-bit
    /// fixed-point fraction of RFC 3550 A.3. Advances the interval.
    fn fraction_lost_interval(&mut self) -> u8 {
        let expected = self.expected();
        let expected_interval = expected.saturating_sub(self.expected_prior);
        let received_interval = self.packets_received.saturating_sub(self.received_prior);
        self.expected_prior = expected;
        self.received_prior = self.packets_received;
        if expected_interval == 0 {
            return 0;
        }
        let lost_interval = expected_interval.saturating_sub(received_interval);
        ((lost_interval * 256) / expected_interval).min(255) as u8
    }

    /// The reception report block describing the remote sender, or `None`
    /// before any RTP packet arrived.
    pub fn generate_report_block(&mut self, now_us: u64) -> Option<ReportBlock> {
        let peer_ssrc = self.peer_ssrc?;
        let highest = self.highest_seq?;
        let (lsr, dlsr) = match &self.last_sr {
            Some((sender_info, arrival_us)) => (
                SimpleShortNtp::from(sender_info.ntp_timestamp),
                Into::<u32>::into(SimpleShortNtp::from_micros(
                    now_us.saturating_sub(*arrival_us),
                )),
            ),
            None => (SimpleShortNtp::default(), 0),
        };
        let cumulative = self
            .cumulative_lost()
            .clamp(-(1 << 23), (1 << 23) - 1) as i32;
        Some(
            ReportBlock::builder()
                .ssrc(peer_ssrc)
                .fraction_lost(self.fraction_lost_interval())
                .cumulative_packet_lost(cumulative)
                .highest_sequence_number_received(highest.number())
                .highest_sequence_number_cycles(highest.round())
                .interarrival_jitter(self.interarrival_jitter())
                .last_sr(lsr)
                .delay_since_last_sr(dlsr)
                .build(),
        )
    }

    pub fn generate_receiver_report(&mut self, now_us: u64) -> RtpResult<RtcpReceiverReport> {
        let mut builder = RtcpReceiverReport::builder().reporter_ssrc(self.own_ssrc);
        if let Some(block) = self.generate_report_block(now_us) {
            builder = builder.report_block(block);
        }
        builder.build()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use rtp_formats::header::RtpHeader;

    fn rtp_header(seq: u16, timestamp: u32, ssrc: u32) -> RtpHeader {
        RtpHeader::builder()
            .payload_type(96)
            .sequence_number(seq)
            .timestamp(timestamp)
            .ssrc(ssrc)
            .build()
    }

    #[test]
    fn test_last_sr_echo_and_dlsr() {
        let mut ctx = RtcpReceiverContext::new(0xaaaa, 90_000);
        ctx.on_rtp_packet_received(&rtp_header(100, 0, 0xbbbb), 1000, 5_000_000);

        let sr = RtcpSenderReport::builder()
            .ssrc(0xbbbb)
            .ntp(0x1234_5678_9abc_def0_u64)
            .rtp_timestamp(0x0001_0000)
            .sender_packet_count(42)
            .sender_octet_count(12_345)
            .build()
            .unwrap();
        ctx.on_sender_report(&sr, 5_000_000);

        // answer one second later
        let block = ctx.generate_report_block(6_000_000).unwrap();
        assert_eq!(
            Into::<u32>::into(block.last_sender_report_timestamp),
            0x5678_9abc
        );
        assert!(block.delay_since_last_sender_report.abs_diff(65_536) <= 1);
        assert_eq!(block.ssrc, 0xbbbb);
    }

    #[test]
    fn test_round_trip_close_to_zero() {
        // the sending role: our SR went out at local t1 = 1 s, the
        // answering RR held it for exactly one second and arrives at
        // t4 = 2 s, so the round trip collapses to zero
        let mut ctx = RtcpReceiverContext::new(0x5e5d, 90_000);
        let lsr = SimpleNtp::from_micros(1_000_000).middle_32();
        let rr = RtcpReceiverReport::builder()
            .reporter_ssrc(0xbbbb)
            .report_block(
                ReportBlock::builder()
                    .ssrc(0x5e5d)
                    .last_sr(lsr)
                    .delay_since_last_sr(65_536)
                    .build(),
            )
            .build()
            .unwrap();
        ctx.on_receiver_report(&rr, 2_000_000);
        assert!(ctx.round_trip_us().unwrap() < 2_000);
    }

    #[test]
    fn test_fraction_and_cumulative_lost() {
        let mut ctx = RtcpReceiverContext::new(1, 90_000);
        for seq in 100_u16..110 {
            if seq == 104 {
                continue;
            }
            ctx.on_rtp_packet_received(&rtp_header(seq, 0, 2), 100, 0);
        }
        assert_eq!(ctx.cumulative_lost(), 1);
        let block = ctx.generate_report_block(0).unwrap();
        // 1 lost of 10 expected: 256 / 10
        assert_eq!(block.fraction_lost, 25);
        assert_eq!(block.highest_sequence_number_received, 109);
        assert_eq!(block.sequence_number_cycles, 0);

        // nothing new in the next interval
        let block = ctx.generate_report_block(0).unwrap();
        assert_eq!(block.fraction_lost, 0);
    }

    #[test]
    fn test_jitter_of_evenly_spaced_stream_stays_zero() {
        let mut ctx = RtcpReceiverContext::new(1, 90_000);
        for i in 0_u64..20 {
            // 33.333 ms of media time, arriving perfectly on time
            ctx.on_rtp_packet_received(
                &rtp_header(i as u16, (i * 3000) as u32, 2),
                100,
                i * 33_333,
            );
        }
        assert!(ctx.interarrival_jitter() <= 1);

        // one packet held back 20 ms bumps the estimator
        ctx.on_rtp_packet_received(&rtp_header(20, 60_000, 2), 100, 20 * 33_333 + 20_000);
        assert!(ctx.interarrival_jitter() > 0);
    }

    #[test]
    fn test_sequence_cycles_reported() {
        let mut ctx = RtcpReceiverContext::new(1, 90_000);
        ctx.on_rtp_packet_received(&rtp_header(65_535, 0, 2), 100, 0);
        ctx.on_rtp_packet_received(&rtp_header(0, 3000, 2), 100, 33_333);
        let block = ctx.generate_report_block(0).unwrap();
        assert_eq!(block.sequence_number_cycles, 1);
        assert_eq!(block.highest_sequence_number_received, 0);
        assert_eq!(ctx.cumulative_lost(), 0);
    }
}
