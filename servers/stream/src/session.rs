use std::{
    io::Cursor,
    pin::Pin,
    sync::{Arc, Mutex},
};

use futures::{SinkExt, StreamExt};
use rtp_formats::{
    codec::h264::depacketizer::{H264Depacketizer, H264DepacketizerConfig},
    packet::RtpPacket,
    payload_types::{H264_RTP_CLOCK_RATE, H264_RTP_PAYLOAD_TYPE},
    rtcp::{RtcpPacket, read_rtcp_compound},
};
use tokio::sync::{RwLock, mpsc};
use tokio_util::{bytes::Bytes, sync::CancellationToken};
use unified_io::DatagramIO;
use utils::{
    random::random_u32,
    system::time::get_timestamp_us,
    traits::{
        dynamic_sized_packet::DynamicSizedPacket, reader::TryReadFrom, writer::WriteTo,
    },
};

use crate::{
    errors::{StreamSessionError, StreamSessionResult},
    fifo::PooledFifo,
    filter::{AuConsumer, FilterConfig, H264Filter, sps_pps::SpsPpsContext},
    resender::Resender,
    rtcp_context::RtcpReceiverContext,
    statistics::SessionStatistics,
};

use rtp_formats::codec::h264::NaluDescriptor;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub payload_type: u8,
    pub clock_rate: u32,
    pub nalu_fifo_capacity: usize,
    pub filter: FilterConfig,
    pub rtcp_interval_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            payload_type: H264_RTP_PAYLOAD_TYPE,
            clock_rate: H264_RTP_CLOCK_RATE,
            nalu_fifo_capacity: 512,
            filter: FilterConfig::default(),
            rtcp_interval_ms: 1000,
        }
    }
}

pub enum SessionCommand {
    /// Arm the filter callbacks and begin emitting access units.
    Start(Box<dyn AuConsumer>),
    /// Keep draining, emit nothing; the consumer buffer is released.
    Pause,
    /// Wind the session down. Idempotent; no callback fires afterwards.
    Stop,
}

/// One receiver instance: the stream task feeds the depacketizer, the
/// control task runs the RTCP exchange, and the filter task drains the
/// NAL unit FIFO into the access-unit assembler. All three cooperate
/// until a stop command or the cancellation token ends them.
pub struct StreamSession {
    config: SessionConfig,
    command_rx: Arc<RwLock<mpsc::Receiver<SessionCommand>>>,
    nalu_fifo: Arc<PooledFifo<NaluDescriptor>>,
    filter: Arc<tokio::sync::Mutex<H264Filter>>,
    sps_pps: Arc<Mutex<SpsPpsContext>>,
    rtcp: Arc<Mutex<RtcpReceiverContext>>,
    statistics: Arc<Mutex<SessionStatistics>>,
    resenders: Vec<Arc<Resender>>,
    cancel: CancellationToken,
}

impl StreamSession {
    pub fn new(config: SessionConfig, command_rx: mpsc::Receiver<SessionCommand>) -> Self {
        let filter = H264Filter::new(config.filter.clone());
        let sps_pps = filter.sps_pps_handle();
        let rtcp = RtcpReceiverContext::new(random_u32(), config.clock_rate);
        let nalu_fifo = Arc::new(PooledFifo::new(config.nalu_fifo_capacity));
        Self {
            config,
            command_rx: Arc::new(RwLock::new(command_rx)),
            nalu_fifo,
            filter: Arc::new(tokio::sync::Mutex::new(filter)),
            sps_pps,
            rtcp: Arc::new(Mutex::new(rtcp)),
            statistics: Arc::new(Mutex::new(SessionStatistics::new())),
            resenders: Vec::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Tee the received NAL unit stream into an additional downstream
    /// peer. Must be called before `run`.
    pub fn add_resender(&mut self, resender: Arc<Resender>) {
        self.resenders.push(resender);
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn statistics(&self) -> Arc<Mutex<SessionStatistics>> {
        self.statistics.clone()
    }

    /// The current SPS/PPS pair, or `None` while not yet synchronized.
    pub fn get_sps_pps(&self) -> Option<(Bytes, Bytes)> {
        self.sps_pps
            .lock()
            .expect("sps/pps mutex poisoned")
            .sps_pps_bytes()
    }

    /// Drive the session until stopped. The three tasks run concurrently;
    /// whichever returns first takes the whole session down.
    pub async fn run(
        &mut self,
        stream_io: Pin<Box<dyn DatagramIO>>,
        control_io: Pin<Box<dyn DatagramIO>>,
    ) -> StreamSessionResult<()> {
        let result = tokio::select! {
            result = Self::run_stream(
                self.config.clone(),
                stream_io,
                self.nalu_fifo.clone(),
                self.rtcp.clone(),
                self.statistics.clone(),
                self.resenders.clone(),
                self.cancel.clone(),
            ) => {
                tracing::info!("session exiting with the stream task, {:?}", result);
                result
            }
            result = Self::run_control(
                self.config.clone(),
                control_io,
                self.rtcp.clone(),
                self.statistics.clone(),
                self.cancel.clone(),
            ) => {
                tracing::info!("session exiting with the control task, {:?}", result);
                result
            }
            result = Self::run_filter(
                self.nalu_fifo.clone(),
                self.filter.clone(),
                self.rtcp.clone(),
                self.statistics.clone(),
                self.cancel.clone(),
            ) => {
                tracing::info!("session exiting with the filter task, {:?}", result);
                result
            }
            result = Self::run_command(
                self.command_rx.clone(),
                self.filter.clone(),
                self.cancel.clone(),
            ) => {
                tracing::info!("session exiting with the command task, {:?}", result);
                result
            }
        };
        // whatever ended the select, unblock every other suspension point
        self.cancel.cancel();
        for resender in &self.resenders {
            resender.stop();
        }
        match result {
            Err(StreamSessionError::GracefulExit) => Ok(()),
            other => other,
        }
    }

    async fn run_stream(
        config: SessionConfig,
        mut io: Pin<Box<dyn DatagramIO>>,
        nalu_fifo: Arc<PooledFifo<NaluDescriptor>>,
        rtcp: Arc<Mutex<RtcpReceiverContext>>,
        statistics: Arc<Mutex<SessionStatistics>>,
        resenders: Vec<Arc<Resender>>,
        cancel: CancellationToken,
    ) -> StreamSessionResult<()> {
        let mut depacketizer = H264Depacketizer::new(H264DepacketizerConfig {
            payload_type: config.payload_type,
            clock_rate: config.clock_rate,
        });
        loop {
            let datagram = tokio::select! {
                _ = cancel.cancelled() => return Err(StreamSessionError::GracefulExit),
                datagram = io.next() => datagram,
            };
            let Some(datagram) = datagram else {
                return Err(StreamSessionError::DatagramChannelClosed);
            };
            let datagram = datagram?;
            let now = get_timestamp_us().unwrap_or(0);

            let packet = match RtpPacket::try_read_from(&mut Cursor::new(&datagram[..])) {
                Ok(Some(packet)) => packet,
                Ok(None) => {
                    statistics
                        .lock()
                        .expect("statistics mutex poisoned")
                        .malformed_datagrams += 1;
                    continue;
                }
                Err(err) => {
                    tracing::warn!("dropping malformed rtp datagram: {}", err);
                    statistics
                        .lock()
                        .expect("statistics mutex poisoned")
                        .malformed_datagrams += 1;
                    continue;
                }
            };

            match depacketizer.push_packet(&packet, now) {
                Ok(nalus) => {
                    rtcp.lock()
                        .expect("rtcp mutex poisoned")
                        .on_rtp_packet_received(&packet.header, datagram.len(), now);
                    let mut statistics =
                        statistics.lock().expect("statistics mutex poisoned");
                    statistics.rtp_bytes_received += datagram.len() as u64;
                    for record in depacketizer.take_loss_records() {
                        statistics.record_loss(record);
                    }
                    for desc in nalus {
                        for resender in &resenders {
                            resender.push_nalu(&desc);
                        }
                        if nalu_fifo.enqueue(desc).is_err() {
                            // drop the newest, never block the stream path
                            statistics.nalu_fifo_drops += 1;
                        }
                    }
                    statistics.sync_depacketizer(depacketizer.counters());
                }
                Err(err) => {
                    tracing::warn!("dropping undecodable rtp packet: {}", err);
                    statistics
                        .lock()
                        .expect("statistics mutex poisoned")
                        .malformed_datagrams += 1;
                }
            }
        }
    }

    async fn run_control(
        config: SessionConfig,
        mut io: Pin<Box<dyn DatagramIO>>,
        rtcp: Arc<Mutex<RtcpReceiverContext>>,
        statistics: Arc<Mutex<SessionStatistics>>,
        cancel: CancellationToken,
    ) -> StreamSessionResult<()> {
        enum ControlEvent {
            Stopped,
            ReportDue,
            Incoming(Option<Result<Bytes, std::io::Error>>),
        }

        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(config.rtcp_interval_ms));
        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => ControlEvent::Stopped,
                _ = interval.tick() => ControlEvent::ReportDue,
                datagram = io.next() => ControlEvent::Incoming(datagram),
            };
            let now = get_timestamp_us().unwrap_or(0);
            match event {
                ControlEvent::Stopped => return Err(StreamSessionError::GracefulExit),
                ControlEvent::ReportDue => {
                    let report = {
                        let mut rtcp = rtcp.lock().expect("rtcp mutex poisoned");
                        if rtcp.peer_ssrc().is_none() {
                            continue;
                        }
                        rtcp.generate_receiver_report(now)?
                    };
                    let mut bytes = Vec::with_capacity(report.get_packet_bytes_count());
                    report.write_to(&mut bytes)?;
                    io.send(Bytes::from(bytes)).await?;
                    statistics
                        .lock()
                        .expect("statistics mutex poisoned")
                        .rtcp_receiver_reports_sent += 1;
                }
                ControlEvent::Incoming(datagram) => {
                    let Some(datagram) = datagram else {
                        return Err(StreamSessionError::DatagramChannelClosed);
                    };
                    let datagram = datagram?;
                    match read_rtcp_compound(&datagram) {
                        Ok(packets) => {
                            for packet in packets {
                                if let RtcpPacket::SenderReport(report) = packet {
                                    rtcp.lock()
                                        .expect("rtcp mutex poisoned")
                                        .on_sender_report(&report, now);
                                    statistics
                                        .lock()
                                        .expect("statistics mutex poisoned")
                                        .rtcp_sender_reports_received += 1;
                                }
                            }
                        }
                        Err(err) => {
                            tracing::warn!("dropping malformed rtcp datagram: {}", err);
                        }
                    }
                }
            }
        }
    }

    async fn run_filter(
        nalu_fifo: Arc<PooledFifo<NaluDescriptor>>,
        filter: Arc<tokio::sync::Mutex<H264Filter>>,
        rtcp: Arc<Mutex<RtcpReceiverContext>>,
        statistics: Arc<Mutex<SessionStatistics>>,
        cancel: CancellationToken,
    ) -> StreamSessionResult<()> {
        loop {
            let Some(desc) = nalu_fifo.dequeue_or_wait(&cancel).await else {
                return Err(StreamSessionError::GracefulExit);
            };
            let now = get_timestamp_us().unwrap_or(0);
            let (djb, counters) = {
                let mut filter = filter.lock().await;
                filter.process_nalu(desc, now);
                (filter.djb_metrics(), filter.counters().clone())
            };
            rtcp.lock()
                .expect("rtcp mutex poisoned")
                .set_djb_metrics(djb);
            let mut statistics = statistics.lock().expect("statistics mutex poisoned");
            statistics.sync_filter(&counters);
            statistics.djb = djb;
        }
    }

    async fn run_command(
        command_rx: Arc<RwLock<mpsc::Receiver<SessionCommand>>>,
        filter: Arc<tokio::sync::Mutex<H264Filter>>,
        cancel: CancellationToken,
    ) -> StreamSessionResult<()> {
        loop {
            let command = command_rx.write().await.recv().await;
            match command {
                None => return Err(StreamSessionError::CommandChannelDisconnected),
                Some(SessionCommand::Start(consumer)) => {
                    filter.lock().await.start(consumer);
                }
                Some(SessionCommand::Pause) => {
                    filter.lock().await.pause();
                }
                Some(SessionCommand::Stop) => {
                    filter.lock().await.stop();
                    cancel.cancel();
                    return Err(StreamSessionError::GracefulExit);
                }
            }
        }
    }
}
