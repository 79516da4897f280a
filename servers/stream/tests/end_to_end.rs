use std::{
    io::Cursor,
    sync::{Arc, Mutex},
    time::Duration,
};

use futures::{SinkExt, StreamExt};
use rtp_formats::{
    codec::h264::{
        NaluDescriptor,
        packetizer::{H264Packetizer, H264PacketizerConfig},
    },
    packet::RtpPacket,
    payload_types::{H264_RTP_CLOCK_RATE, H264_RTP_PAYLOAD_TYPE},
    rtcp::{RtcpPacket, read_rtcp_compound, sender_report::RtcpSenderReport},
};
use stream_session::{
    filter::{AccessUnit, AuBuffer, AuConsumer},
    resender::{Resender, ResenderConfig},
    session::{SessionCommand, SessionConfig, StreamSession},
};
use tokio::{sync::mpsc, time::timeout};
use tokio_util::bytes::{Bytes, BytesMut};
use unified_io::channel::ChannelIo;
use utils::{system::time::get_timestamp_us, traits::{reader::TryReadFrom, writer::WriteTo}};

// baseline 1280x720 SPS and its matching CAVLC PPS
const SPS: [u8; 9] = [0x67, 0x42, 0xc0, 0x1f, 0xda, 0x01, 0x40, 0x16, 0xc4];
const PPS: [u8; 4] = [0x68, 0xce, 0x38, 0x80];
const SENDER_SSRC: u32 = 0x4153_0001;

#[derive(Default)]
struct Record {
    sps_pps_calls: usize,
    aus: Vec<AccessUnit>,
}

#[derive(Clone, Default)]
struct RecordingConsumer {
    record: Arc<Mutex<Record>>,
}

impl AuConsumer for RecordingConsumer {
    fn on_sps_pps(&mut self, _sps: &Bytes, _pps: &Bytes) {
        self.record.lock().unwrap().sps_pps_calls += 1;
    }

    fn get_au_buffer(&mut self) -> Option<AuBuffer> {
        Some(AuBuffer {
            buffer: BytesMut::with_capacity(1 << 20),
            cookie: 11,
        })
    }

    fn on_au_ready(&mut self, au: AccessUnit) {
        self.record.lock().unwrap().aus.push(au);
    }
}

fn sender_packetizer() -> H264Packetizer {
    H264Packetizer::with_initial_state(
        H264PacketizerConfig {
            ssrc: SENDER_SSRC,
            payload_type: H264_RTP_PAYLOAD_TYPE,
            clock_rate: H264_RTP_CLOCK_RATE,
            max_packet_size: 1400,
            target_packet_size: None,
        },
        4000,
        0,
    )
}

fn nalu(bytes: &[u8], ntp_us: u64, last: bool) -> NaluDescriptor {
    NaluDescriptor::new(Bytes::copy_from_slice(bytes), ntp_us, last)
}

fn idr_slice(size: usize) -> Vec<u8> {
    let mut bytes = vec![0x65_u8, 0x88, 0x80];
    bytes.resize(size, 0x5a);
    bytes
}

fn to_datagrams(packets: &[RtpPacket]) -> Vec<Bytes> {
    packets
        .iter()
        .map(|packet| {
            let mut bytes = Vec::new();
            packet.write_to(&mut bytes).unwrap();
            Bytes::from(bytes)
        })
        .collect()
}

#[tokio::test]
async fn test_session_assembles_access_units_and_answers_rtcp() {
    let (command_tx, command_rx) = mpsc::channel(8);
    let mut session = StreamSession::new(
        SessionConfig {
            rtcp_interval_ms: 100,
            ..Default::default()
        },
        command_rx,
    );
    assert!(session.get_sps_pps().is_none());

    let (stream_local, mut stream_remote) = ChannelIo::pair(64);
    let (control_local, mut control_remote) = ChannelIo::pair(64);
    let session_task = tokio::spawn(async move {
        let mut session = session;
        let result = session
            .run(Box::pin(stream_local), Box::pin(control_local))
            .await;
        (session, result)
    });

    let consumer = RecordingConsumer::default();
    let record = consumer.record.clone();
    command_tx
        .send(SessionCommand::Start(Box::new(consumer)))
        .await
        .unwrap();
    // let the command task arm the callbacks before data flows
    tokio::time::sleep(Duration::from_millis(50)).await;

    // one sync access unit, then a predicted picture 33 ms later
    let mut packetizer = sender_packetizer();
    let packets = packetizer
        .packetize_nalus(&[
            nalu(&SPS, 0, false),
            nalu(&PPS, 0, false),
            nalu(&idr_slice(2000), 0, true),
            nalu(&[0x41, 0x9a, 0x20, 0x30], 33_333, true),
        ])
        .unwrap();
    for datagram in to_datagrams(&packets) {
        stream_remote.send(datagram).await.unwrap();
    }

    // the sender report the receiver should echo in its next RR
    let sender_report = RtcpSenderReport::builder()
        .ssrc(SENDER_SSRC)
        .ntp(0x1234_5678_9abc_def0_u64)
        .rtp_timestamp(0x0001_0000)
        .sender_packet_count(4)
        .sender_octet_count(2100)
        .build()
        .unwrap();
    let mut sr_bytes = Vec::new();
    sender_report.write_to(&mut sr_bytes).unwrap();
    control_remote.send(Bytes::from(sr_bytes)).await.unwrap();

    // the receiver report comes back on the control channel
    let answer = timeout(Duration::from_secs(3), async {
        loop {
            let datagram = control_remote.next().await.unwrap().unwrap();
            let packets = read_rtcp_compound(&datagram).unwrap();
            if let Some(RtcpPacket::ReceiverReport(report)) = packets.into_iter().next() {
                if let Some(block) = report
                    .report_blocks
                    .iter()
                    .find(|block| block.ssrc == SENDER_SSRC)
                {
                    return block.clone();
                }
            }
        }
    })
    .await
    .expect("no receiver report arrived");
    assert_eq!(
        Into::<u32>::into(answer.last_sender_report_timestamp),
        0x5678_9abc
    );
    assert_eq!(answer.fraction_lost, 0);

    // both access units came out, in order, fully flagged
    timeout(Duration::from_secs(3), async {
        loop {
            if record.lock().unwrap().aus.len() >= 2 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("access units were not delivered");
    {
        let record = record.lock().unwrap();
        assert_eq!(record.sps_pps_calls, 1);
        let first = &record.aus[0];
        assert!(first.complete);
        assert!(first.sync);
        assert_eq!(first.nalu_ranges.len(), 3);
        // annex-b reconstruction: SPS is the first unit of the stream
        let sps_range = first.nalu_ranges[0].clone();
        assert_eq!(&first.buffer[sps_range], &SPS);
        let second = &record.aus[1];
        assert!(second.complete);
        assert_eq!(second.nalu_ranges.len(), 1);
    }

    command_tx.send(SessionCommand::Stop).await.unwrap();
    let (session, result) = session_task.await.unwrap();
    result.unwrap();
    assert!(session.get_sps_pps().is_some());
}

#[tokio::test]
async fn test_resender_reemits_under_its_own_identity() {
    let resender = Arc::new(Resender::new(ResenderConfig {
        max_network_latency_ms: 10_000,
        rtcp_interval_ms: 5_000,
        ..Default::default()
    }));

    let (stream_local, mut stream_remote) = ChannelIo::pair(64);
    let (control_local, _control_remote) = ChannelIo::pair(64);
    let runner = resender.clone();
    let task = tokio::spawn(async move {
        runner
            .run(Box::pin(stream_local), Box::pin(control_local))
            .await
    });

    let payload = [0x41_u8, 0x9a, 0x11, 0x22, 0x33];
    let mut desc = nalu(&payload, 1000, true);
    desc.arrival_timestamp = get_timestamp_us().unwrap();
    resender.push_nalu(&desc);

    let datagram = timeout(Duration::from_secs(3), stream_remote.next())
        .await
        .expect("resender did not forward")
        .unwrap()
        .unwrap();
    let packet = RtpPacket::try_read_from(&mut Cursor::new(&datagram[..]))
        .unwrap()
        .unwrap();
    assert_eq!(packet.header.version, 2);
    assert!(packet.header.marker);
    assert_ne!(packet.header.ssrc, SENDER_SSRC);
    assert_eq!(&packet.payload[..], &payload);

    let counters = resender.counters();
    assert_eq!(counters.nalus_in, 1);
    assert_eq!(counters.packets_sent, 1);
    assert_eq!(counters.packets_dropped_timeout, 0);

    resender.stop();
    // a second stop is a no-op
    resender.stop();
    let result = task.await.unwrap();
    assert!(result.is_err());
}

#[tokio::test]
async fn test_expired_packets_never_leave_the_resender() {
    let resender = Arc::new(Resender::new(ResenderConfig {
        max_network_latency_ms: 1,
        rtcp_interval_ms: 5_000,
        ..Default::default()
    }));

    let mut desc = nalu(&[0x41, 0x9a, 0x01], 1000, true);
    // arrived long ago: the 1 ms deadline has passed before sending
    desc.arrival_timestamp = get_timestamp_us().unwrap().saturating_sub(1_000_000);
    resender.push_nalu(&desc);

    let (stream_local, mut stream_remote) = ChannelIo::pair(64);
    let (control_local, _control_remote) = ChannelIo::pair(64);
    let runner = resender.clone();
    let task = tokio::spawn(async move {
        runner
            .run(Box::pin(stream_local), Box::pin(control_local))
            .await
    });

    let forwarded = timeout(Duration::from_millis(300), stream_remote.next()).await;
    assert!(forwarded.is_err(), "expired packet was forwarded");
    assert_eq!(resender.counters().packets_sent, 0);
    assert_eq!(resender.counters().packets_dropped_timeout, 1);

    resender.stop();
    let _ = task.await.unwrap();
}
