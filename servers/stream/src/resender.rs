use std::{pin::Pin, sync::Mutex};

use futures::{SinkExt, StreamExt};
use rtp_formats::{
    codec::h264::{
        NaluDescriptor,
        packetizer::{H264Packetizer, H264PacketizerConfig},
    },
    packet::RtpPacket,
    rtcp::{RtcpPacket, read_rtcp_compound},
};
use tokio_util::{bytes::Bytes, sync::CancellationToken};
use unified_io::DatagramIO;
use utils::{
    random::random_u32,
    system::time::get_timestamp_us,
    traits::{dynamic_sized_packet::DynamicSizedPacket, writer::WriteTo},
};

use crate::{
    errors::{StreamSessionError, StreamSessionResult},
    fifo::PooledFifo,
    rtcp_context::{RtcpReceiverContext, generate_sender_report},
};

#[derive(Debug, Clone)]
pub struct ResenderConfig {
    pub payload_type: u8,
    pub clock_rate: u32,
    pub max_packet_size: usize,
    pub target_packet_size: Option<usize>,
    /// packets not sent within this deadline are dropped before the wire
    pub max_network_latency_ms: u32,
    pub packet_fifo_capacity: usize,
    pub rtcp_interval_ms: u64,
}

impl Default for ResenderConfig {
    fn default() -> Self {
        Self {
            payload_type: rtp_formats::payload_types::H264_RTP_PAYLOAD_TYPE,
            clock_rate: rtp_formats::payload_types::H264_RTP_CLOCK_RATE,
            max_packet_size: 1400,
            target_packet_size: None,
            max_network_latency_ms: 200,
            packet_fifo_capacity: 512,
            rtcp_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct ResenderCounters {
    pub nalus_in: u64,
    pub packets_enqueued: u64,
    pub packets_dropped_fifo_full: u64,
    pub packets_dropped_timeout: u64,
    pub packets_sent: u64,
}

/// Fans the received NAL unit stream out to a second peer. Owns its own
/// sender identity (SSRC, sequence numbers, timestamp offset) and packet
/// FIFO; obsolete packets are cleaned out right before transmission.
pub struct Resender {
    config: ResenderConfig,
    packetizer: Mutex<H264Packetizer>,
    pending_au: Mutex<Vec<NaluDescriptor>>,
    fifo: PooledFifo<RtpPacket>,
    rtcp: Mutex<RtcpReceiverContext>,
    counters: Mutex<ResenderCounters>,
    cancel: CancellationToken,
}

impl Resender {
    pub fn new(config: ResenderConfig) -> Self {
        let ssrc = random_u32();
        let packetizer = H264Packetizer::new(H264PacketizerConfig {
            ssrc,
            payload_type: config.payload_type,
            clock_rate: config.clock_rate,
            max_packet_size: config.max_packet_size,
            target_packet_size: config.target_packet_size,
        });
        let fifo = PooledFifo::new(config.packet_fifo_capacity);
        let rtcp = RtcpReceiverContext::new(ssrc, config.clock_rate);
        Self {
            config,
            packetizer: Mutex::new(packetizer),
            pending_au: Mutex::new(Vec::new()),
            fifo,
            rtcp: Mutex::new(rtcp),
            counters: Mutex::new(ResenderCounters::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn counters(&self) -> ResenderCounters {
        self.counters
            .lock()
            .expect("counters mutex poisoned")
            .clone()
    }

    pub fn round_trip_us(&self) -> Option<u64> {
        self.rtcp.lock().expect("rtcp mutex poisoned").round_trip_us()
    }

    /// Stop the resender tasks. Idempotent.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    /// Tee one received NAL unit in. Units buffer up until the end of
    /// their access unit, then get re-packetized under this resender's
    /// own identity and deadline.
    pub fn push_nalu(&self, desc: &NaluDescriptor) {
        let mut copy = desc.clone();
        // the deadline runs on the local clock; arrival is where this
        // unit's media timestamp landed on it
        let deadline_base = if copy.arrival_timestamp != 0 {
            copy.arrival_timestamp
        } else {
            copy.ntp_timestamp
        };
        copy.timeout_timestamp =
            deadline_base.saturating_add(self.config.max_network_latency_ms as u64 * 1000);

        let flush = copy.is_last_in_au;
        let mut pending = self.pending_au.lock().expect("pending mutex poisoned");
        pending.push(copy);
        self.counters.lock().expect("counters mutex poisoned").nalus_in += 1;
        if !flush {
            return;
        }
        let au: Vec<_> = pending.drain(..).collect();
        drop(pending);

        let packets = {
            let mut packetizer = self.packetizer.lock().expect("packetizer mutex poisoned");
            match packetizer.packetize_nalus(&au) {
                Ok(packets) => packets,
                Err(err) => {
                    tracing::warn!("resender packetization failed: {}", err);
                    return;
                }
            }
        };
        let mut counters = self.counters.lock().expect("counters mutex poisoned");
        for packet in packets {
            match self.fifo.enqueue(packet) {
                Ok(()) => counters.packets_enqueued += 1,
                // bounded pool: prefer dropping the newest over blocking
                Err(_) => counters.packets_dropped_fifo_full += 1,
            }
        }
    }

    /// Drive both resender channels until stopped.
    pub async fn run(
        &self,
        stream_io: Pin<Box<dyn DatagramIO>>,
        control_io: Pin<Box<dyn DatagramIO>>,
    ) -> StreamSessionResult<()> {
        tokio::select! {
            result = self.run_stream(stream_io) => result,
            result = self.run_control(control_io) => result,
        }
    }

    async fn run_stream(&self, mut io: Pin<Box<dyn DatagramIO>>) -> StreamSessionResult<()> {
        loop {
            let Some(packet) = self.fifo.dequeue_or_wait(&self.cancel).await else {
                return Err(StreamSessionError::GracefulExit);
            };
            let now = get_timestamp_us().unwrap_or(0);
            let expired = self.fifo.clean_from_timeout(now);
            if expired > 0 {
                self.counters
                    .lock()
                    .expect("counters mutex poisoned")
                    .packets_dropped_timeout += expired as u64;
            }
            if packet.timeout_timestamp != 0 && packet.timeout_timestamp < now {
                self.counters
                    .lock()
                    .expect("counters mutex poisoned")
                    .packets_dropped_timeout += 1;
                continue;
            }

            let mut bytes = Vec::with_capacity(packet.get_packet_bytes_count());
            packet.write_to(&mut bytes)?;
            io.send(Bytes::from(bytes)).await?;
            self.counters
                .lock()
                .expect("counters mutex poisoned")
                .packets_sent += 1;
        }
    }

    async fn run_control(&self, mut io: Pin<Box<dyn DatagramIO>>) -> StreamSessionResult<()> {
        enum ControlEvent {
            Stopped,
            ReportDue,
            Incoming(Option<Result<Bytes, std::io::Error>>),
        }

        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(self.config.rtcp_interval_ms));
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => ControlEvent::Stopped,
                _ = interval.tick() => ControlEvent::ReportDue,
                datagram = io.next() => ControlEvent::Incoming(datagram),
            };
            let now = get_timestamp_us().unwrap_or(0);
            match event {
                ControlEvent::Stopped => return Err(StreamSessionError::GracefulExit),
                ControlEvent::ReportDue => {
                    let report = {
                        let packetizer = self.packetizer.lock().expect("packetizer mutex poisoned");
                        generate_sender_report(
                            packetizer.ssrc(),
                            now,
                            packetizer.rtp_timestamp_for(now),
                            packetizer.packet_count(),
                            packetizer.byte_count(),
                        )?
                    };
                    let mut bytes = Vec::with_capacity(report.get_packet_bytes_count());
                    report.write_to(&mut bytes)?;
                    io.send(Bytes::from(bytes)).await?;
                }
                ControlEvent::Incoming(datagram) => {
                    let Some(datagram) = datagram else {
                        return Err(StreamSessionError::DatagramChannelClosed);
                    };
                    let datagram = datagram?;
                    match read_rtcp_compound(&datagram) {
                        Ok(packets) => {
                            let mut rtcp = self.rtcp.lock().expect("rtcp mutex poisoned");
                            for packet in packets {
                                if let RtcpPacket::ReceiverReport(report) = packet {
                                    rtcp.on_receiver_report(&report, now);
                                }
                            }
                        }
                        Err(err) => tracing::warn!("dropping malformed rtcp datagram: {}", err),
                    }
                }
            }
        }
    }
}
