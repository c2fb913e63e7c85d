use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::crypto::TransportEncryptionHandler;
use crate::frame::{EncodedFrame, FrameId};
use crate::id::{Pt, Ssrc};
use crate::pacer::{PacedSender, PacerConfig, PacketSender};
use crate::rtcp::{CastMessage, MissingFramesAndPackets, ReceiverLog};
use crate::rtp::{RtpSender, RtpSenderConfig};
use crate::session::{RtcpConfig, RtcpEvent, RtcpSession, RttReport, SenderReportInput};

/// Everything needed to open one outgoing media stream.
#[derive(Debug, Clone)]
pub struct CastStreamConfig {
    pub ssrc: Ssrc,
    /// The receiver's SSRC for this stream.
    pub remote_ssrc: Ssrc,
    pub payload_type: Pt,
    /// RTP clock rate in Hz (typically 48000 for audio, 90000 for video).
    pub rtp_clock_rate: u32,
    pub cname: String,
    pub max_payload_length: usize,
    pub max_stored_frames: usize,
    pub rtcp_interval: Duration,
    /// How long after a resend the same packet is refused another resend.
    pub dedupe_window: Duration,
    /// AES-128 key and IV mask, or `None` for an unencrypted stream.
    pub aes_key_and_iv_mask: Option<(Vec<u8>, Vec<u8>)>,
}

impl CastStreamConfig {
    pub fn audio(ssrc: Ssrc, remote_ssrc: Ssrc) -> Self {
        CastStreamConfig {
            ssrc,
            remote_ssrc,
            payload_type: 127.into(),
            rtp_clock_rate: 48_000,
            ..Self::base()
        }
    }

    pub fn video(ssrc: Ssrc, remote_ssrc: Ssrc) -> Self {
        CastStreamConfig {
            ssrc,
            remote_ssrc,
            payload_type: 96.into(),
            rtp_clock_rate: 90_000,
            ..Self::base()
        }
    }

    fn base() -> Self {
        let rtp = RtpSenderConfig::default();
        CastStreamConfig {
            ssrc: 0.into(),
            remote_ssrc: 0.into(),
            payload_type: rtp.payload_type,
            rtp_clock_rate: 90_000,
            cname: String::new(),
            max_payload_length: rtp.max_payload_length,
            max_stored_frames: rtp.max_stored_frames,
            rtcp_interval: Duration::from_millis(500),
            dedupe_window: Duration::from_millis(100),
            aes_key_and_iv_mask: None,
        }
    }
}

/// Stream lifecycle notifications, polled via
/// [`CastTransportSender::poll_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastTransportStatus {
    AudioInitialized,
    VideoInitialized,
    AudioUninitialized,
    VideoUninitialized,
    InvalidCryptoConfig,
}

/// What incoming RTCP produced, for the layer above (congestion control,
/// logging, stats).
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// ACK/NACK feedback arrived; the matching resends are already queued.
    CastFeedback { is_audio: bool, message: CastMessage },
    ReceiverLog { is_audio: bool, log: ReceiverLog },
    Rtt { is_audio: bool, report: RttReport },
    /// Receiver bitrate estimate in bits per second.
    Remb(f32),
}

struct Stream {
    rtp: RtpSender,
    rtcp: RtcpSession,
    crypto: TransportEncryptionHandler,
    clock_rate: u32,
    dedupe_window: Duration,
    expected_frame_id: Option<FrameId>,
    /// RTP timestamp and wall clock of the latest frame, for extrapolating
    /// the timestamp pair in sender reports.
    last_frame_time: Option<(u32, Instant)>,
}

impl Stream {
    fn report_input(&self, now: Instant) -> SenderReportInput {
        let rtp_timestamp = match self.last_frame_time {
            Some((rtp, at)) => {
                let elapsed = now.saturating_duration_since(at);
                let ticks = (elapsed.as_secs_f64() * self.clock_rate as f64) as u32;
                rtp.wrapping_add(ticks)
            }
            None => 0,
        };
        SenderReportInput {
            rtp_timestamp,
            send_packet_count: self.rtp.send_packet_count(),
            send_octet_count: self.rtp.send_octet_count(),
        }
    }
}

/// The complete send side of a Cast session: up to one audio and one video
/// stream sharing a pacer, with RTCP reporting and NACK-driven
/// retransmission handled internally.
///
/// Sans-IO. The owner pumps wall-clock time through `now` parameters, sends
/// bytes via its [`PacketSender`], and drives timers with
/// [`CastTransportSender::poll_timeout`] /
/// [`CastTransportSender::handle_timeout`].
pub struct CastTransportSender {
    pacer: PacedSender,
    audio: Option<Stream>,
    video: Option<Stream>,
    status: VecDeque<CastTransportStatus>,
}

impl CastTransportSender {
    pub fn new(pacer_config: PacerConfig) -> Self {
        CastTransportSender {
            pacer: PacedSender::new(pacer_config),
            audio: None,
            video: None,
            status: VecDeque::new(),
        }
    }

    /// Next stream lifecycle notification, if any.
    pub fn poll_status(&mut self) -> Option<CastTransportStatus> {
        self.status.pop_front()
    }

    pub fn init_audio_stream(&mut self, config: CastStreamConfig, now: Instant) {
        self.audio = self.init_stream(config, now, true);
    }

    pub fn init_video_stream(&mut self, config: CastStreamConfig, now: Instant) {
        self.video = self.init_stream(config, now, false);
    }

    fn init_stream(
        &mut self,
        config: CastStreamConfig,
        now: Instant,
        is_audio: bool,
    ) -> Option<Stream> {
        use CastTransportStatus::*;

        let crypto = match &config.aes_key_and_iv_mask {
            Some((key, iv_mask)) => match TransportEncryptionHandler::new(key, iv_mask) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Rejecting crypto config: {}", e);
                    self.status.push_back(InvalidCryptoConfig);
                    return None;
                }
            },
            None => TransportEncryptionHandler::disabled(),
        };

        let rtp = match RtpSender::new(RtpSenderConfig {
            payload_type: config.payload_type,
            ssrc: config.ssrc,
            max_payload_length: config.max_payload_length,
            max_stored_frames: config.max_stored_frames,
        }) {
            Ok(v) => v,
            Err(e) => {
                warn!("Rejecting stream config: {}", e);
                self.status
                    .push_back(if is_audio { AudioUninitialized } else { VideoUninitialized });
                return None;
            }
        };

        let rtcp = RtcpSession::new(
            RtcpConfig {
                local_ssrc: config.ssrc,
                remote_ssrc: config.remote_ssrc,
                cname: config.cname.clone(),
                report_interval: config.rtcp_interval,
            },
            now,
        );

        self.status
            .push_back(if is_audio { AudioInitialized } else { VideoInitialized });

        Some(Stream {
            rtp,
            rtcp,
            crypto,
            clock_rate: config.rtp_clock_rate,
            dedupe_window: config.dedupe_window,
            expected_frame_id: None,
            last_frame_time: None,
        })
    }

    pub fn insert_coded_audio_frame(
        &mut self,
        frame: &EncodedFrame,
        now: Instant,
        transport: &mut dyn PacketSender,
    ) {
        Self::insert_frame(&mut self.audio, &mut self.pacer, frame, now, transport);
    }

    pub fn insert_coded_video_frame(
        &mut self,
        frame: &EncodedFrame,
        now: Instant,
        transport: &mut dyn PacketSender,
    ) {
        Self::insert_frame(&mut self.video, &mut self.pacer, frame, now, transport);
    }

    fn insert_frame(
        stream: &mut Option<Stream>,
        pacer: &mut PacedSender,
        frame: &EncodedFrame,
        now: Instant,
        transport: &mut dyn PacketSender,
    ) {
        let Some(stream) = stream.as_mut() else {
            debug_assert!(false, "frame inserted on uninitialized stream");
            return;
        };

        if let Some(expected) = stream.expected_frame_id {
            debug_assert_eq!(
                frame.frame_id, expected,
                "frame ids must increase by exactly 1"
            );
        }
        stream.expected_frame_id = Some(frame.frame_id.next());
        stream.last_frame_time = Some((frame.rtp_timestamp, frame.reference_time));

        if stream.crypto.is_activated() {
            let mut encrypted = frame.clone();
            encrypted.data = stream.crypto.encrypt(frame.frame_id, &frame.data);
            stream.rtp.send_frame(&encrypted, now, pacer, transport);
        } else {
            stream.rtp.send_frame(frame, now, pacer, transport);
        }
    }

    /// Resend explicitly, outside the NACK-driven path. Used when the layer
    /// above decides a frame must go again (e.g. a key frame after a
    /// decoder reset).
    pub fn resend_packets(
        &mut self,
        is_audio: bool,
        missing: &MissingFramesAndPackets,
        cancel_rtx_if_not_in_list: bool,
        now: Instant,
        transport: &mut dyn PacketSender,
    ) {
        let stream = if is_audio { &mut self.audio } else { &mut self.video };
        let Some(stream) = stream.as_mut() else {
            debug_assert!(false, "resend on uninitialized stream");
            return;
        };
        stream.rtp.resend_packets(
            missing,
            cancel_rtx_if_not_in_list,
            stream.dedupe_window,
            now,
            &mut self.pacer,
            transport,
        );
    }

    /// Send an RTCP report for one stream right now, outside the schedule.
    pub fn send_rtcp_from_rtp_sender(
        &mut self,
        is_audio: bool,
        now: Instant,
        transport: &mut dyn PacketSender,
    ) {
        let stream = if is_audio { &mut self.audio } else { &mut self.video };
        let Some(stream) = stream.as_mut() else {
            debug_assert!(false, "rtcp requested on uninitialized stream");
            return;
        };
        let input = stream.report_input(now);
        stream.rtcp.send_report(now, input, &mut self.pacer, transport);
    }

    /// Feed one incoming (compound) RTCP packet. NACKed packets are resent
    /// as a side effect; everything of interest to the layer above comes
    /// back as events.
    pub fn incoming_rtcp_packet(
        &mut self,
        buf: &[u8],
        now: Instant,
        transport: &mut dyn PacketSender,
    ) -> Vec<TransportEvent> {
        let mut events = Vec::new();

        for is_audio in [true, false] {
            let stream = if is_audio { &mut self.audio } else { &mut self.video };
            let Some(stream) = stream.as_mut() else {
                continue;
            };

            for event in stream.rtcp.handle_incoming(buf, now) {
                match event {
                    RtcpEvent::CastFeedback(message) => {
                        stream.rtp.resend_packets(
                            &message.missing_frames_and_packets,
                            true,
                            stream.dedupe_window,
                            now,
                            &mut self.pacer,
                            transport,
                        );
                        events.push(TransportEvent::CastFeedback { is_audio, message });
                    }
                    RtcpEvent::Nack(nack) => {
                        // Generic NACK names sequence numbers we can't map
                        // back to frame/packet ids; the Cast feedback path
                        // is authoritative. Log and move on.
                        debug!("Ignoring generic NACK with {} entries", nack.entries.len());
                    }
                    RtcpEvent::ReceiverLog(log) => {
                        events.push(TransportEvent::ReceiverLog { is_audio, log });
                    }
                    RtcpEvent::Rtt(report) => {
                        events.push(TransportEvent::Rtt { is_audio, report });
                    }
                    RtcpEvent::Remb(remb) => {
                        events.push(TransportEvent::Remb(remb.bitrate));
                    }
                }
            }
        }

        events
    }

    /// Round-trip statistics for one stream.
    pub fn rtt(&self, is_audio: bool) -> Option<RttReport> {
        let stream = if is_audio { &self.audio } else { &self.video };
        stream.as_ref().and_then(|s| s.rtcp.rtt())
    }

    /// The transport signalled writable again after blocking.
    pub fn transport_unblocked(&mut self, now: Instant, transport: &mut dyn PacketSender) {
        self.pacer.transport_unblocked(now, transport);
    }

    /// Soonest pending timer across the pacer and both RTCP schedules.
    pub fn poll_timeout(&self) -> Option<Instant> {
        let timers = [
            self.pacer.poll_timeout(),
            self.audio.as_ref().and_then(|s| s.rtcp.poll_timeout()),
            self.video.as_ref().and_then(|s| s.rtcp.poll_timeout()),
        ];
        timers.into_iter().flatten().min()
    }

    /// Drive all timers forward to `now`.
    pub fn handle_timeout(&mut self, now: Instant, transport: &mut dyn PacketSender) {
        self.pacer.handle_timeout(now, transport);

        for stream in [&mut self.audio, &mut self.video].into_iter().flatten() {
            let input = stream.report_input(now);
            stream.rtcp.handle_timeout(now, input, &mut self.pacer, transport);
        }
    }
}
