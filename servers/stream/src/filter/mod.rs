pub mod sps_pps;

use std::{
    ops::Range,
    sync::{Arc, Mutex},
};

use codec_h264::{
    nalu::ANNEX_B_START_CODE,
    nalu_header::NaluHeader,
    nalu_type::NaluType,
    pps::PpsContext,
    sps::SpsContext,
    writer::{RecoveryPointSei, SliceContext, SliceWriter, SliceWriterConfig},
};
use rtp_formats::codec::h264::NaluDescriptor;
use tokio_util::bytes::{BufMut, Bytes, BytesMut};

use sps_pps::SpsPpsContext;

#[derive(Debug, Clone)]
pub struct FilterConfig {
    /// discard everything until the first SPS/PPS pair
    pub wait_for_sync: bool,
    /// emit access units with gaps, flagged, instead of dropping them
    pub output_incomplete_au: bool,
    pub filter_out_sps_pps: bool,
    pub filter_out_sei: bool,
    /// prefix NAL units with their 4-byte big-endian size instead of the
    /// Annex-B start code
    pub replace_start_codes_with_nalu_size: bool,
    pub generate_skipped_p_slices: bool,
    pub generate_first_gray_i_frame: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            wait_for_sync: true,
            output_incomplete_au: false,
            filter_out_sps_pps: false,
            filter_out_sei: false,
            replace_start_codes_with_nalu_size: false,
            generate_skipped_p_slices: false,
            generate_first_gray_i_frame: false,
        }
    }
}

/// A writable output buffer supplied by the consumer, handed back inside
/// the finished [`AccessUnit`] together with its opaque cookie.
#[derive(Debug)]
pub struct AuBuffer {
    pub buffer: BytesMut,
    pub cookie: u64,
}

/// A finished access unit. `nalu_ranges` locate each NAL unit inside
/// `buffer`, prefixes (start code or size field) excluded.
#[derive(Debug)]
pub struct AccessUnit {
    pub buffer: BytesMut,
    pub nalu_ranges: Vec<Range<usize>>,
    pub ntp_timestamp: u64,
    /// no gap was detected and the end-of-AU marker was seen
    pub complete: bool,
    /// a valid SPS/PPS pair preceded this AU
    pub sync: bool,
    pub cookie: u64,
}

/// The consumer side of the filter output contract. No filter lock is
/// held while any of these run.
pub trait AuConsumer: Send {
    /// Fired once per SPS or PPS change, with the raw parameter sets.
    fn on_sps_pps(&mut self, sps: &Bytes, pps: &Bytes);
    /// Supply the buffer the next access unit is assembled into. `None`
    /// makes the filter drop the unit in progress.
    fn get_au_buffer(&mut self) -> Option<AuBuffer>;
    /// Take delivery of a finished access unit.
    fn on_au_ready(&mut self, au: AccessUnit);
}

#[derive(Debug, Default, Clone)]
pub struct FilterCounters {
    pub nalus_processed: u64,
    pub nalus_discarded_waiting_sync: u64,
    pub nalus_dropped_unparseable: u64,
    pub aus_output: u64,
    pub aus_output_incomplete: u64,
    pub aus_discarded: u64,
    pub aus_synthesized: u64,
    pub sps_pps_updates: u64,
    pub au_buffer_unavailable: u64,
}

/// De-jitter-buffer depth statistics, microseconds. Sampled by the RTCP
/// engine for its DJB metrics report.
#[derive(Debug, Default, Clone, Copy)]
pub struct DjbMetrics {
    pub nominal_us: u64,
    pub max_us: u64,
    pub high_watermark_us: u64,
    pub low_watermark_us: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuState {
    WaitingForSync,
    Idle,
    Gathering,
}

struct AuInProgress {
    buffer: BytesMut,
    cookie: u64,
    nalu_ranges: Vec<Range<usize>>,
    rtp_timestamp: u32,
    ntp_timestamp: u64,
    first_arrival: u64,
    incomplete: bool,
    saw_vcl: bool,
    saw_non_idr_slice: bool,
}

/// Groups the depacketized NAL unit stream into access units, keeps the
/// SPS/PPS context, and conceals losses with synthesized slices.
pub struct H264Filter {
    config: FilterConfig,
    state: AuState,
    consumer: Option<Box<dyn AuConsumer>>,
    sps_pps: Arc<Mutex<SpsPpsContext>>,
    writer: SliceWriter,
    current: Option<AuInProgress>,
    paused: bool,
    gray_frame_emitted: bool,
    synthesized_frame_num: u32,
    counters: FilterCounters,
    djb: DjbMetrics,
}

impl H264Filter {
    pub fn new(config: FilterConfig) -> Self {
        let state = if config.wait_for_sync {
            AuState::WaitingForSync
        } else {
            AuState::Idle
        };
        Self {
            config,
            state,
            consumer: None,
            sps_pps: Arc::new(Mutex::new(SpsPpsContext::default())),
            writer: SliceWriter::new(SliceWriterConfig {
                insert_start_code: false,
            }),
            current: None,
            paused: true,
            gray_frame_emitted: false,
            synthesized_frame_num: 0,
            counters: FilterCounters::default(),
            djb: DjbMetrics::default(),
        }
    }

    /// Shared handle to the SPS/PPS context, readable from any thread.
    pub fn sps_pps_handle(&self) -> Arc<Mutex<SpsPpsContext>> {
        self.sps_pps.clone()
    }

    pub fn counters(&self) -> &FilterCounters {
        &self.counters
    }

    pub fn djb_metrics(&self) -> DjbMetrics {
        self.djb
    }

    /// Arm the consumer callbacks and start processing.
    pub fn start(&mut self, consumer: Box<dyn AuConsumer>) {
        self.consumer = Some(consumer);
        self.paused = false;
    }

    /// Stop processing without tearing the instance down. The access unit
    /// in progress is invalidated so the consumer buffer can be rebound.
    pub fn pause(&mut self) {
        self.paused = true;
        self.current = None;
    }

    /// Disarm the callbacks. Nothing fires after this returns.
    pub fn stop(&mut self) {
        self.paused = true;
        self.consumer = None;
        self.current = None;
    }

    fn synced(&self) -> bool {
        self.sps_pps.lock().expect("sps/pps mutex poisoned").synced()
    }

    /// Drive the state machine with the next NAL unit from the
    /// depacketizer FIFO. `now` is the local microsecond clock.
    pub fn process_nalu(&mut self, desc: NaluDescriptor, now: u64) {
        if self.paused || self.consumer.is_none() || desc.nalu.is_empty() {
            return;
        }
        self.counters.nalus_processed += 1;
        let header = match NaluHeader::try_from(desc.nalu[0]) {
            Ok(header) => header,
            Err(err) => {
                tracing::warn!("dropping unparseable nal unit: {}", err);
                self.counters.nalus_dropped_unparseable += 1;
                return;
            }
        };

        match header.nalu_type {
            NaluType::Sps => self.handle_sps(&desc),
            NaluType::Pps => self.handle_pps(&desc),
            _ => {}
        }

        let synced = self.synced();
        if self.state == AuState::WaitingForSync {
            if synced {
                self.state = AuState::Idle;
            } else if !matches!(header.nalu_type, NaluType::Sps | NaluType::Pps) {
                self.counters.nalus_discarded_waiting_sync += 1;
                return;
            }
        }

        // AU boundary: a different timestamp closes the unit in progress
        // without its marker; so does an AU-boundary starter, but only
        // once the unit already holds slice data
        if let Some(current) = &self.current {
            let starter = (current.saw_vcl
                && matches!(
                    header.nalu_type,
                    NaluType::AccessUnitDelimiter | NaluType::Sps | NaluType::Pps
                ))
                || (header.nalu_type == NaluType::IdrSlice && current.saw_non_idr_slice);
            if current.rtp_timestamp != desc.rtp_timestamp || starter {
                self.close_current_au(false, now);
            }
        }

        if desc.seq_num_forced_discontinuity
            && self.current.is_none()
            && synced
            && self.config.generate_skipped_p_slices
            && header.nalu_type == NaluType::NonIdrSlice
        {
            self.emit_skipped_p_frame(&desc, now);
        }

        if let Some(current) = self.current.as_mut()
            && (desc.incomplete || desc.seq_num_forced_discontinuity)
        {
            current.incomplete = true;
        }

        let filtered_out = match header.nalu_type {
            NaluType::Sps | NaluType::Pps => self.config.filter_out_sps_pps,
            NaluType::Sei => self.config.filter_out_sei,
            _ => false,
        };
        if !filtered_out {
            self.append_nalu(&desc, header, now);
        }

        if desc.is_last_in_au && self.current.is_some() {
            self.close_current_au(true, now);
        }
    }

    fn append_nalu(&mut self, desc: &NaluDescriptor, header: NaluHeader, _now: u64) {
        if self.current.is_none() {
            let Some(au_buffer) = self
                .consumer
                .as_mut()
                .and_then(|consumer| consumer.get_au_buffer())
            else {
                self.counters.au_buffer_unavailable += 1;
                return;
            };
            let mut buffer = au_buffer.buffer;
            buffer.clear();
            self.current = Some(AuInProgress {
                buffer,
                cookie: au_buffer.cookie,
                nalu_ranges: Vec::new(),
                rtp_timestamp: desc.rtp_timestamp,
                ntp_timestamp: desc.ntp_timestamp,
                first_arrival: desc.arrival_timestamp,
                incomplete: desc.incomplete || desc.seq_num_forced_discontinuity,
                saw_vcl: false,
                saw_non_idr_slice: false,
            });
            self.state = AuState::Gathering;
        }
        let avcc = self.config.replace_start_codes_with_nalu_size;
        let current = self.current.as_mut().expect("current au was just ensured");
        Self::push_prefixed(&mut current.buffer, &mut current.nalu_ranges, &desc.nalu, avcc);
        if desc.incomplete {
            current.incomplete = true;
        }
        if header.nalu_type.is_vcl() {
            current.saw_vcl = true;
        }
        if header.nalu_type == NaluType::NonIdrSlice {
            current.saw_non_idr_slice = true;
        }
    }

    fn push_prefixed(
        buffer: &mut BytesMut,
        ranges: &mut Vec<Range<usize>>,
        nalu: &[u8],
        avcc: bool,
    ) {
        if avcc {
            buffer.put_u32(nalu.len() as u32);
        } else {
            buffer.extend_from_slice(&ANNEX_B_START_CODE);
        }
        let start = buffer.len();
        buffer.extend_from_slice(nalu);
        ranges.push(start..buffer.len());
    }

    /// Close the unit in progress. `saw_marker` is true when the close was
    /// triggered by the end-of-AU marker rather than a boundary.
    fn close_current_au(&mut self, saw_marker: bool, now: u64) {
        let Some(au) = self.current.take() else {
            return;
        };
        self.state = AuState::Idle;
        if au.nalu_ranges.is_empty() {
            return;
        }
        let complete = saw_marker && !au.incomplete;
        if !complete && !self.config.output_incomplete_au {
            self.counters.aus_discarded += 1;
            return;
        }

        let depth = now.saturating_sub(au.first_arrival);
        self.update_djb(depth);

        self.counters.aus_output += 1;
        if !complete {
            self.counters.aus_output_incomplete += 1;
        }
        let record = AccessUnit {
            buffer: au.buffer,
            nalu_ranges: au.nalu_ranges,
            ntp_timestamp: au.ntp_timestamp,
            complete,
            sync: self.synced(),
            cookie: au.cookie,
        };
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.on_au_ready(record);
        }
    }

    fn handle_sps(&mut self, desc: &NaluDescriptor) {
        let parsed = match SpsContext::parse(&desc.nalu[1..]) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!("failed to parse sps: {}", err);
                return;
            }
        };
        let changed = self
            .sps_pps
            .lock()
            .expect("sps/pps mutex poisoned")
            .update_sps(desc.nalu.clone(), parsed);
        if changed {
            self.after_parameter_set_change(desc);
        }
    }

    fn handle_pps(&mut self, desc: &NaluDescriptor) {
        let sps = self
            .sps_pps
            .lock()
            .expect("sps/pps mutex poisoned")
            .parsed_sps()
            .cloned();
        let Some(sps) = sps else {
            tracing::warn!("pps received before any sps, ignoring");
            return;
        };
        let parsed = match PpsContext::parse(&desc.nalu[1..], &sps) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!("failed to parse pps: {}", err);
                return;
            }
        };
        let changed = self
            .sps_pps
            .lock()
            .expect("sps/pps mutex poisoned")
            .update_pps(desc.nalu.clone(), parsed);
        if changed {
            self.after_parameter_set_change(desc);
        }
    }

    /// A parameter set changed. When the pair is complete: refresh the
    /// writer context, notify the consumer (locks released first), and
    /// emit the initial gray IDR frame if configured.
    fn after_parameter_set_change(&mut self, desc: &NaluDescriptor) {
        let snapshot = {
            let context = self.sps_pps.lock().expect("sps/pps mutex poisoned");
            context.parsed().map(|(sps, pps)| (sps.clone(), pps.clone()))
        };
        let Some((sps, pps)) = snapshot else {
            return;
        };
        self.writer.set_sps_pps_context(sps, pps);
        self.counters.sps_pps_updates += 1;

        let bytes = self
            .sps_pps
            .lock()
            .expect("sps/pps mutex poisoned")
            .sps_pps_bytes();
        if let (Some((sps_bytes, pps_bytes)), Some(consumer)) = (bytes, self.consumer.as_mut()) {
            consumer.on_sps_pps(&sps_bytes, &pps_bytes);
        }

        if self.config.generate_first_gray_i_frame && !self.gray_frame_emitted {
            self.gray_frame_emitted = true;
            self.emit_gray_i_frame(desc);
        }
    }

    /// Synthesize the initial all-gray IDR picture: a recovery-point SEI
    /// followed by one I-slice covering the whole picture.
    fn emit_gray_i_frame(&mut self, desc: &NaluDescriptor) {
        let Some(mb_count) = self.picture_mb_count() else {
            return;
        };
        let slice_ctx = SliceContext::default();
        let sei = match self.writer.write_sei(
            Some(&RecoveryPointSei {
                recovery_frame_cnt: 0,
                exact_match_flag: false,
                broken_link_flag: false,
                changing_slice_group_idc: 0,
            }),
            &[],
        ) {
            Ok(sei) => sei,
            Err(err) => {
                tracing::warn!("skipping gray i-frame synthesis: {}", err);
                return;
            }
        };
        let slice = match self.writer.write_gray_i_slice(0, mb_count, &slice_ctx) {
            Ok(slice) => slice,
            Err(err) => {
                tracing::warn!("skipping gray i-frame synthesis: {}", err);
                return;
            }
        };
        self.emit_synthesized_au(&[sei, slice], desc.ntp_timestamp);
    }

    /// Conceal one lost predicted picture with an all-skipped P slice.
    fn emit_skipped_p_frame(&mut self, desc: &NaluDescriptor, _now: u64) {
        self.synthesized_frame_num = self.synthesized_frame_num.wrapping_add(1);
        let slice_ctx = SliceContext {
            frame_num: self.synthesized_frame_num,
            idr_pic_id: 0,
            pic_order_cnt_lsb: 0,
        };
        let Some(mb_count) = self.picture_mb_count() else {
            return;
        };
        let slice = match self.writer.write_skipped_p_slice(0, mb_count, &slice_ctx) {
            Ok(slice) => slice,
            // concealment is best-effort; unsupported streams go without
            Err(err) => {
                tracing::debug!("skipping p-slice concealment: {}", err);
                return;
            }
        };
        self.emit_synthesized_au(&[slice], desc.ntp_timestamp.saturating_sub(1));
    }

    fn emit_synthesized_au(&mut self, nalus: &[Bytes], ntp_timestamp: u64) {
        let Some(au_buffer) = self
            .consumer
            .as_mut()
            .and_then(|consumer| consumer.get_au_buffer())
        else {
            self.counters.au_buffer_unavailable += 1;
            return;
        };
        let mut buffer = au_buffer.buffer;
        buffer.clear();
        let mut ranges = Vec::with_capacity(nalus.len());
        for nalu in nalus {
            Self::push_prefixed(
                &mut buffer,
                &mut ranges,
                nalu,
                self.config.replace_start_codes_with_nalu_size,
            );
        }
        self.counters.aus_synthesized += 1;
        self.counters.aus_output += 1;
        let record = AccessUnit {
            buffer,
            nalu_ranges: ranges,
            ntp_timestamp,
            complete: true,
            sync: true,
            cookie: au_buffer.cookie,
        };
        if let Some(consumer) = self.consumer.as_mut() {
            consumer.on_au_ready(record);
        }
    }

    fn picture_mb_count(&self) -> Option<u32> {
        self.sps_pps
            .lock()
            .expect("sps/pps mutex poisoned")
            .parsed_sps()
            .map(|sps| sps.picture_mb_count())
    }

    fn update_djb(&mut self, depth_us: u64) {
        let djb = &mut self.djb;
        djb.max_us = djb.max_us.max(depth_us);
        djb.nominal_us = if djb.nominal_us == 0 {
            depth_us
        } else {
            (djb.nominal_us * 15 + depth_us) / 16
        };
        djb.high_watermark_us = djb.high_watermark_us.max(djb.nominal_us);
        djb.low_watermark_us = if djb.low_watermark_us == 0 {
            djb.nominal_us
        } else {
            djb.low_watermark_us.min(djb.nominal_us)
        };
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::sync::{Arc, Mutex as StdMutex};

    // baseline 1280x720 SPS and its matching CAVLC PPS
    const SPS: [u8; 9] = [0x67, 0x42, 0xc0, 0x1f, 0xda, 0x01, 0x40, 0x16, 0xc4];
    const PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];

    #[derive(Default)]
    struct Record {
        sps_pps: Vec<(Bytes, Bytes)>,
        aus: Vec<AccessUnit>,
    }

    #[derive(Clone, Default)]
    struct RecordingConsumer {
        record: Arc<StdMutex<Record>>,
    }

    impl AuConsumer for RecordingConsumer {
        fn on_sps_pps(&mut self, sps: &Bytes, pps: &Bytes) {
            self.record
                .lock()
                .unwrap()
                .sps_pps
                .push((sps.clone(), pps.clone()));
        }

        fn get_au_buffer(&mut self) -> Option<AuBuffer> {
            Some(AuBuffer {
                buffer: BytesMut::with_capacity(1 << 16),
                cookie: 7,
            })
        }

        fn on_au_ready(&mut self, au: AccessUnit) {
            self.record.lock().unwrap().aus.push(au);
        }
    }

    fn started_filter(config: FilterConfig) -> (H264Filter, Arc<StdMutex<Record>>) {
        let consumer = RecordingConsumer::default();
        let record = consumer.record.clone();
        let mut filter = H264Filter::new(config);
        filter.start(Box::new(consumer));
        (filter, record)
    }

    fn desc(nalu: &[u8], rtp_timestamp: u32, last: bool) -> NaluDescriptor {
        let mut desc = NaluDescriptor::new(
            Bytes::copy_from_slice(nalu),
            rtp_timestamp as u64 * 1_000_000 / 90_000,
            last,
        );
        desc.rtp_timestamp = rtp_timestamp;
        desc
    }

    fn slice(rtp_timestamp: u32, last: bool) -> NaluDescriptor {
        desc(&[0x41, 0x9a, 0x20, 0x30], rtp_timestamp, last)
    }

    fn first_byte_of(au: &AccessUnit, range_idx: usize) -> u8 {
        au.buffer[au.nalu_ranges[range_idx].start]
    }

    #[test]
    fn test_one_au_from_three_nalus() {
        let (mut filter, record) = started_filter(FilterConfig {
            wait_for_sync: false,
            ..Default::default()
        });
        filter.process_nalu(slice(3000, false), 0);
        filter.process_nalu(slice(3000, false), 0);
        filter.process_nalu(slice(3000, true), 0);

        let record = record.lock().unwrap();
        assert_eq!(record.aus.len(), 1);
        let au = &record.aus[0];
        assert!(au.complete);
        assert!(!au.sync);
        assert_eq!(au.nalu_ranges.len(), 3);
        // Annex-B output: start code before every NAL unit
        assert_eq!(&au.buffer[..4], &ANNEX_B_START_CODE);
        assert_eq!(au.buffer.len(), 3 * (4 + 4));
    }

    #[test]
    fn test_au_closes_on_timestamp_change() {
        let (mut filter, record) = started_filter(FilterConfig {
            wait_for_sync: false,
            output_incomplete_au: true,
            ..Default::default()
        });
        filter.process_nalu(slice(3000, false), 0);
        filter.process_nalu(slice(3000, false), 0);
        assert!(record.lock().unwrap().aus.is_empty());

        filter.process_nalu(slice(6000, true), 0);
        let record = record.lock().unwrap();
        assert_eq!(record.aus.len(), 2);
        // closed by timestamp change without its marker
        assert_eq!(record.aus[0].nalu_ranges.len(), 2);
        assert!(!record.aus[0].complete);
        assert!(record.aus[1].complete);
    }

    #[test]
    fn test_wait_for_sync_discards_until_sps_pps() {
        let (mut filter, record) = started_filter(FilterConfig::default());
        filter.process_nalu(slice(3000, true), 0);
        assert_eq!(filter.counters().nalus_discarded_waiting_sync, 1);

        filter.process_nalu(desc(&SPS, 6000, false), 0);
        filter.process_nalu(desc(&PPS, 6000, false), 0);
        filter.process_nalu(slice(6000, true), 0);

        let record = record.lock().unwrap();
        assert_eq!(record.sps_pps.len(), 1);
        assert_eq!(record.aus.len(), 1);
        assert!(record.aus[0].sync);
        assert!(record.aus[0].complete);
        // SPS, PPS and the slice all belong to the emitted unit
        assert_eq!(record.aus[0].nalu_ranges.len(), 3);
    }

    #[test]
    fn test_gray_i_frame_precedes_first_picture() {
        let (mut filter, record) = started_filter(FilterConfig {
            generate_first_gray_i_frame: true,
            ..Default::default()
        });
        filter.process_nalu(desc(&SPS, 0, false), 0);
        filter.process_nalu(desc(&PPS, 0, false), 0);

        {
            let record = record.lock().unwrap();
            assert_eq!(record.aus.len(), 1);
            let au = &record.aus[0];
            assert!(au.complete);
            assert!(au.sync);
            assert_eq!(au.nalu_ranges.len(), 2);
            assert_eq!(first_byte_of(au, 0) & 0x1f, 6); // recovery point SEI
            assert_eq!(first_byte_of(au, 1), 0x65); // gray IDR slice
        }
        assert_eq!(filter.counters().aus_synthesized, 1);

        filter.process_nalu(slice(3000, true), 0);
        let record = record.lock().unwrap();
        assert_eq!(record.aus.len(), 2);
        assert_eq!(first_byte_of(&record.aus[1], 0), 0x41);
    }

    #[test]
    fn test_skipped_p_concealment_on_gap() {
        let (mut filter, record) = started_filter(FilterConfig {
            generate_skipped_p_slices: true,
            ..Default::default()
        });
        filter.process_nalu(desc(&SPS, 0, false), 0);
        filter.process_nalu(desc(&PPS, 0, false), 0);
        filter.process_nalu(slice(3000, true), 0);

        let mut lossy = slice(6000, true);
        lossy.seq_num_forced_discontinuity = true;
        lossy.missing_packets_before = 2;
        filter.process_nalu(lossy, 0);

        let record = record.lock().unwrap();
        // real AU, synthesized skipped-P AU, then the post-gap AU was
        // discarded as incomplete (gap, output_incomplete_au off)
        assert_eq!(record.aus.len(), 2);
        assert_eq!(first_byte_of(&record.aus[1], 0), 0x41);
        assert!(record.aus[1].complete);
        assert_eq!(filter.counters().aus_synthesized, 1);
        assert_eq!(filter.counters().aus_discarded, 1);
    }

    #[test]
    fn test_filter_out_and_length_prefixes() {
        let (mut filter, record) = started_filter(FilterConfig {
            filter_out_sps_pps: true,
            replace_start_codes_with_nalu_size: true,
            ..Default::default()
        });
        filter.process_nalu(desc(&SPS, 0, false), 0);
        filter.process_nalu(desc(&PPS, 0, false), 0);
        filter.process_nalu(slice(0, true), 0);

        let record = record.lock().unwrap();
        assert_eq!(record.aus.len(), 1);
        let au = &record.aus[0];
        assert_eq!(au.nalu_ranges.len(), 1);
        // 4-byte big-endian length instead of a start code
        assert_eq!(&au.buffer[..4], &[0, 0, 0, 4]);
        assert_eq!(first_byte_of(au, 0), 0x41);
    }

    #[test]
    fn test_incomplete_au_is_dropped_by_default() {
        let (mut filter, record) = started_filter(FilterConfig {
            wait_for_sync: false,
            ..Default::default()
        });
        let mut broken = slice(3000, true);
        broken.incomplete = true;
        filter.process_nalu(broken, 0);

        assert!(record.lock().unwrap().aus.is_empty());
        assert_eq!(filter.counters().aus_discarded, 1);
    }

    #[test]
    fn test_no_callback_after_stop() {
        let (mut filter, record) = started_filter(FilterConfig {
            wait_for_sync: false,
            ..Default::default()
        });
        filter.process_nalu(slice(3000, false), 0);
        filter.stop();
        filter.process_nalu(slice(3000, true), 0);
        assert!(record.lock().unwrap().aus.is_empty());
    }

    #[test]
    fn test_pause_invalidates_unit_in_progress() {
        let (mut filter, record) = started_filter(FilterConfig {
            wait_for_sync: false,
            ..Default::default()
        });
        filter.process_nalu(slice(3000, false), 0);
        filter.pause(); // drops the unit in progress
        filter.start(Box::new(RecordingConsumer {
            record: record.clone(),
        }));
        filter.process_nalu(slice(6000, true), 0);

        let record = record.lock().unwrap();
        assert_eq!(record.aus.len(), 1);
        assert_eq!(record.aus[0].nalu_ranges.len(), 1);
    }
}
