use codec_h264::{pps::PpsContext, sps::SpsContext};
use tokio_util::bytes::Bytes;

/// The last successfully parsed SPS/PPS pair: raw bytes, parsed
/// parameters and a generation counter bumped on every change. Owned by
/// the filter, readable from other threads under its own mutex.
#[derive(Debug, Default)]
pub struct SpsPpsContext {
    sps_bytes: Option<Bytes>,
    pps_bytes: Option<Bytes>,
    sps: Option<SpsContext>,
    pps: Option<PpsContext>,
    generation: u64,
}

impl SpsPpsContext {
    /// True once a valid SPS and PPS have both been seen.
    pub fn synced(&self) -> bool {
        self.sps.is_some() && self.pps.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The raw SPS/PPS NAL units (header byte included, no start code).
    pub fn sps_pps_bytes(&self) -> Option<(Bytes, Bytes)> {
        match (&self.sps_bytes, &self.pps_bytes) {
            (Some(sps), Some(pps)) => Some((sps.clone(), pps.clone())),
            _ => None,
        }
    }

    pub fn parsed_sps(&self) -> Option<&SpsContext> {
        self.sps.as_ref()
    }

    pub fn parsed(&self) -> Option<(&SpsContext, &PpsContext)> {
        match (&self.sps, &self.pps) {
            (Some(sps), Some(pps)) => Some((sps, pps)),
            _ => None,
        }
    }

    /// Install a new SPS. Returns true when the bytes actually changed;
    /// the generation is bumped once the pair is complete.
    pub(crate) fn update_sps(&mut self, bytes: Bytes, parsed: SpsContext) -> bool {
        if self.sps_bytes.as_ref() == Some(&bytes) {
            return false;
        }
        self.sps_bytes = Some(bytes);
        self.sps = Some(parsed);
        if self.synced() {
            self.generation += 1;
        }
        true
    }

    pub(crate) fn update_pps(&mut self, bytes: Bytes, parsed: PpsContext) -> bool {
        if self.pps_bytes.as_ref() == Some(&bytes) {
            return false;
        }
        self.pps_bytes = Some(bytes);
        self.pps = Some(parsed);
        if self.synced() {
            self.generation += 1;
        }
        true
    }
}
