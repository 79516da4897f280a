use std::fmt;

use rtp_formats::{codec::h264::depacketizer::DepacketizerCounters, loss::LossRecord};

use crate::filter::{DjbMetrics, FilterCounters};

const MAX_RETAINED_LOSS_RECORDS: usize = 256;

/// Aggregated receiver-path statistics: packet and NAL unit counters from
/// the depacketizer, access unit counters from the filter, RTCP exchange
/// counters, loss bitmaps and the latest de-jitter-buffer depths.
#[derive(Default)]
pub struct SessionStatistics {
    pub rtp_packets_received: u64,
    pub rtp_bytes_received: u64,
    pub rtp_packets_lost: u64,
    pub rtp_packets_duplicated: u64,
    pub rtp_packets_outdated: u64,
    pub malformed_datagrams: u64,
    pub nalus_received: u64,
    pub errored_fragment_groups: u64,
    pub nalu_fifo_drops: u64,
    pub resender_packet_drops: u64,
    pub aus_output: u64,
    pub aus_output_incomplete: u64,
    pub aus_discarded: u64,
    pub aus_synthesized: u64,
    pub sps_pps_updates: u64,
    pub rtcp_sender_reports_received: u64,
    pub rtcp_receiver_reports_sent: u64,
    loss_records: Vec<LossRecord>,
    pub djb: DjbMetrics,
}

impl SessionStatistics {
    pub fn new() -> Self {
        Default::default()
    }

    /// Mirror the depacketizer counters into the aggregate.
    pub fn sync_depacketizer(&mut self, counters: &DepacketizerCounters) {
        self.rtp_packets_received = counters.packets_received;
        self.rtp_packets_lost = counters.packets_lost;
        self.rtp_packets_duplicated = counters.packets_duplicated;
        self.rtp_packets_outdated = counters.packets_outdated;
        self.nalus_received = counters.nalus_emitted;
        self.errored_fragment_groups = counters.errored_fragment_groups;
    }

    /// Mirror the filter counters into the aggregate.
    pub fn sync_filter(&mut self, counters: &FilterCounters) {
        self.aus_output = counters.aus_output;
        self.aus_output_incomplete = counters.aus_output_incomplete;
        self.aus_discarded = counters.aus_discarded;
        self.aus_synthesized = counters.aus_synthesized;
        self.sps_pps_updates = counters.sps_pps_updates;
    }

    /// Keep a bounded history of closed loss windows; oldest drop first.
    pub fn record_loss(&mut self, record: LossRecord) {
        if self.loss_records.len() >= MAX_RETAINED_LOSS_RECORDS {
            self.loss_records.remove(0);
        }
        self.loss_records.push(record);
    }

    pub fn loss_records(&self) -> &[LossRecord] {
        &self.loss_records
    }
}

impl fmt::Debug for SessionStatistics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "rtp packets received: {}", self.rtp_packets_received)?;
        writeln!(f, "rtp bytes received: {}", self.rtp_bytes_received)?;
        writeln!(f, "rtp packets lost: {}", self.rtp_packets_lost)?;
        writeln!(f, "rtp packets duplicated: {}", self.rtp_packets_duplicated)?;
        writeln!(f, "rtp packets outdated: {}", self.rtp_packets_outdated)?;
        writeln!(f, "malformed datagrams: {}", self.malformed_datagrams)?;
        writeln!(f, "nal units received: {}", self.nalus_received)?;
        writeln!(
            f,
            "errored fragment groups: {}",
            self.errored_fragment_groups
        )?;
        writeln!(f, "nal unit fifo drops: {}", self.nalu_fifo_drops)?;
        writeln!(f, "resender packet drops: {}", self.resender_packet_drops)?;
        writeln!(f, "access units output: {}", self.aus_output)?;
        writeln!(
            f,
            "access units output incomplete: {}",
            self.aus_output_incomplete
        )?;
        writeln!(f, "access units discarded: {}", self.aus_discarded)?;
        writeln!(f, "access units synthesized: {}", self.aus_synthesized)?;
        writeln!(f, "sps/pps updates: {}", self.sps_pps_updates)?;
        writeln!(
            f,
            "rtcp sender reports received: {}",
            self.rtcp_sender_reports_received
        )?;
        writeln!(
            f,
            "rtcp receiver reports sent: {}",
            self.rtcp_receiver_reports_sent
        )?;
        writeln!(f, "loss records retained: {}", self.loss_records.len())?;
        writeln!(
            f,
            "djb depth us (nominal/max/high/low): {}/{}/{}/{}",
            self.djb.nominal_us, self.djb.max_us, self.djb.high_watermark_us, self.djb.low_watermark_us
        )?;
        Ok(())
    }
}

impl Drop for SessionStatistics {
    fn drop(&mut self) {
        tracing::info!("stream session statistics: \n{:?}", self);
    }
}
