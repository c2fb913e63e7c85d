use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::id::Ssrc;
use crate::pacer::{PacedSender, PacketSender};
use crate::packet::PacketRef;
use crate::rtcp::{
    CastMessage, Dlrr, DlrrItem, ExtendedReport, Nack, ReceiverLog, Remb, Rtcp, Sdes,
    SenderReport, XrBlock, MAX_IP_PACKET_SIZE,
};
use crate::time::{duration_as_ntp_32, duration_from_ntp_32, InstantExt};

/// How many of our own sender reports we remember, for matching the
/// `last_sr` echo in incoming report blocks.
const SR_HISTORY: usize = 32;

#[derive(Debug, Clone)]
pub struct RtcpConfig {
    /// Our media SSRC, i.e. the stream the reports describe.
    pub local_ssrc: Ssrc,
    /// The receiver's SSRC. Feedback from other sources is ignored.
    pub remote_ssrc: Ssrc,
    /// CNAME carried in the SDES block of every report.
    pub cname: String,
    /// Base interval between reports. The actual spacing is jittered to
    /// avoid synchronizing with other senders on the network.
    pub report_interval: Duration,
}

impl Default for RtcpConfig {
    fn default() -> Self {
        RtcpConfig {
            local_ssrc: Ssrc::new(),
            remote_ssrc: 0.into(),
            cname: String::new(),
            report_interval: Duration::from_millis(500),
        }
    }
}

/// Snapshot of the send state that goes into a sender report.
#[derive(Debug, Clone, Copy)]
pub struct SenderReportInput {
    /// RTP timestamp corresponding to "now" in the stream's clock rate.
    pub rtp_timestamp: u32,
    pub send_packet_count: u32,
    pub send_octet_count: u32,
}

/// What an incoming compound packet contained, for the layer above.
#[derive(Debug, Clone, PartialEq)]
pub enum RtcpEvent {
    /// Cast ACK/NACK feedback for our stream.
    CastFeedback(CastMessage),
    /// Receiver event log for our stream.
    ReceiverLog(ReceiverLog),
    /// Receiver bitrate estimate.
    Remb(Remb),
    /// Generic NACK for our stream.
    Nack(Nack),
    /// A fresh round-trip measurement was folded into the running stats.
    Rtt(RttReport),
}

/// Round-trip time statistics over the session's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RttReport {
    /// Most recent measurement.
    pub rtt: Duration,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
}

/// The RTCP half of one media stream: periodically emits SR + SDES (plus a
/// DLRR echo when the receiver probes with RRTR), and digests incoming
/// feedback into [`RtcpEvent`]s.
///
/// Sans-IO like the rest of the crate: [`RtcpSession::poll_timeout`] says
/// when the next report is due, the owner calls
/// [`RtcpSession::handle_timeout`] at that time.
#[derive(Debug)]
pub struct RtcpSession {
    config: RtcpConfig,
    next_report: Instant,

    /// Truncated NTP timestamp and send time of our recent SRs.
    sr_history: VecDeque<(u32, Instant)>,

    /// Latest RRTR from the receiver, echoed as DLRR in the next report.
    pending_rrtr: Option<(u32, Instant)>,

    rtt: Option<RttReport>,
    rtt_sum: Duration,
    rtt_count: u32,
}

impl RtcpSession {
    pub fn new(config: RtcpConfig, now: Instant) -> Self {
        let next_report = now + jittered(config.report_interval);
        RtcpSession {
            config,
            next_report,
            sr_history: VecDeque::new(),
            pending_rrtr: None,
            rtt: None,
            rtt_sum: Duration::ZERO,
            rtt_count: 0,
        }
    }

    pub fn local_ssrc(&self) -> Ssrc {
        self.config.local_ssrc
    }

    /// Round-trip statistics, once at least one measurement exists.
    pub fn rtt(&self) -> Option<RttReport> {
        self.rtt
    }

    /// When [`RtcpSession::handle_timeout`] must be called next.
    pub fn poll_timeout(&self) -> Option<Instant> {
        Some(self.next_report)
    }

    /// Emit the periodic report if it is due and schedule the next one.
    pub fn handle_timeout(
        &mut self,
        now: Instant,
        input: SenderReportInput,
        pacer: &mut PacedSender,
        transport: &mut dyn PacketSender,
    ) {
        if now < self.next_report {
            return;
        }
        self.send_report(now, input, pacer, transport);
        self.next_report = now + jittered(self.config.report_interval);
    }

    /// Build and send one compound report right away, outside the schedule.
    /// Used for the report accompanying a key frame.
    pub fn send_report(
        &mut self,
        now: Instant,
        input: SenderReportInput,
        pacer: &mut PacedSender,
        transport: &mut dyn PacketSender,
    ) {
        let mut feedback = VecDeque::new();

        feedback.push_back(Rtcp::SenderReport(SenderReport {
            ssrc: self.config.local_ssrc,
            ntp_time: now,
            rtp_timestamp: input.rtp_timestamp,
            sender_packet_count: input.send_packet_count,
            sender_octet_count: input.send_octet_count,
            report: None,
        }));

        self.sr_history.push_back((now.as_ntp_32(), now));
        if self.sr_history.len() > SR_HISTORY {
            self.sr_history.pop_front();
        }

        feedback.push_back(Rtcp::SourceDescription(Sdes {
            ssrc: self.config.local_ssrc,
            cname: self.config.cname.clone(),
        }));

        if let Some((rrtr_ntp, received)) = self.pending_rrtr.take() {
            feedback.push_back(Rtcp::ExtendedReport(ExtendedReport {
                ssrc: self.config.local_ssrc,
                blocks: vec![XrBlock::Dlrr(Dlrr {
                    items: vec![DlrrItem {
                        ssrc: self.config.remote_ssrc,
                        last_rr_time: rrtr_ntp,
                        last_rr_delay: duration_as_ntp_32(
                            now.saturating_duration_since(received),
                        ),
                    }],
                })],
            }));
        }

        let mut buf = vec![0_u8; MAX_IP_PACKET_SIZE];
        let n = Rtcp::write_packet(&mut feedback, &mut buf);
        buf.truncate(n);

        pacer.send_rtcp_packet(self.config.local_ssrc, PacketRef::new(buf), transport);
    }

    /// Digest one incoming compound packet into events for the layer above.
    pub fn handle_incoming(&mut self, buf: &[u8], now: Instant) -> Vec<RtcpEvent> {
        let mut parsed = VecDeque::new();
        Rtcp::read_packet(buf, &mut parsed);

        let mut events = Vec::new();

        for packet in parsed {
            match packet {
                Rtcp::ReceiverReport(rr) => {
                    let Some(report) = rr.report else { continue };
                    if report.ssrc != self.config.local_ssrc || report.last_sr == 0 {
                        continue;
                    }
                    if let Some(rtt) = self.measure_rtt(report.last_sr, report.delay_since_last_sr, now) {
                        events.push(RtcpEvent::Rtt(rtt));
                    }
                }
                Rtcp::ExtendedReport(xr) => {
                    for block in xr.blocks {
                        match block {
                            XrBlock::Rrtr(rrtr) => {
                                self.pending_rrtr = Some((rrtr.ntp_time.as_ntp_32(), now));
                            }
                            XrBlock::Dlrr(dlrr) => {
                                for item in dlrr.items {
                                    if item.ssrc != self.config.local_ssrc {
                                        continue;
                                    }
                                    if let Some(rtt) = self.measure_rtt(
                                        item.last_rr_time,
                                        item.last_rr_delay,
                                        now,
                                    ) {
                                        events.push(RtcpEvent::Rtt(rtt));
                                    }
                                }
                            }
                        }
                    }
                }
                Rtcp::CastFeedback(cast) => {
                    if cast.media_ssrc != self.config.local_ssrc {
                        trace!("Cast feedback for foreign ssrc: {}", cast.media_ssrc);
                        continue;
                    }
                    events.push(RtcpEvent::CastFeedback(cast));
                }
                Rtcp::ReceiverLog(log) => {
                    if log.ssrc != self.config.local_ssrc {
                        continue;
                    }
                    events.push(RtcpEvent::ReceiverLog(log));
                }
                Rtcp::Remb(remb) => {
                    // An empty ssrc list means the estimate is session-wide.
                    if !remb.ssrcs.is_empty() && !remb.ssrcs.contains(&self.config.local_ssrc) {
                        continue;
                    }
                    events.push(RtcpEvent::Remb(remb));
                }
                Rtcp::Nack(nack) => {
                    if nack.ssrc != self.config.local_ssrc {
                        continue;
                    }
                    events.push(RtcpEvent::Nack(nack));
                }
                Rtcp::SenderReport(_) | Rtcp::SourceDescription(_) => {
                    // We only send media; reports about the remote side's
                    // sending are of no use here.
                }
            }
        }

        events
    }

    /// `echoed` is the truncated NTP timestamp of one of our reports, coming
    /// back with how long the receiver held it. The difference to now, less
    /// the hold time, is one round trip.
    fn measure_rtt(&mut self, echoed: u32, delay: u32, now: Instant) -> Option<RttReport> {
        let (_, sent) = self.sr_history.iter().find(|(ntp, _)| *ntp == echoed)?;

        let elapsed = now.saturating_duration_since(*sent);
        let rtt = elapsed.saturating_sub(duration_from_ntp_32(delay));

        self.rtt_sum += rtt;
        self.rtt_count += 1;

        let report = match self.rtt {
            Some(prev) => RttReport {
                rtt,
                avg: self.rtt_sum / self.rtt_count,
                min: prev.min.min(rtt),
                max: prev.max.max(rtt),
            },
            None => RttReport {
                rtt,
                avg: rtt,
                min: rtt,
                max: rtt,
            },
        };
        self.rtt = Some(report);

        debug!("RTT {:?} (avg {:?})", report.rtt, report.avg);
        Some(report)
    }
}

/// Uniformly random in [0.5, 1.5) times the base interval.
fn jittered(base: Duration) -> Duration {
    base.mul_f32(0.5 + fastrand::f32())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::pacer::{PacerConfig, SendOutcome};
    use crate::rtcp::{ReceiverReport, ReportBlock, Rrtr};

    #[derive(Default)]
    struct MockTransport {
        sent: Vec<PacketRef>,
    }

    impl PacketSender for MockTransport {
        fn send_packet(&mut self, packet: &PacketRef) -> SendOutcome {
            self.sent.push(packet.clone());
            SendOutcome::Sent
        }
    }

    fn config() -> RtcpConfig {
        RtcpConfig {
            local_ssrc: 11.into(),
            remote_ssrc: 12.into(),
            cname: "sender@host".into(),
            report_interval: Duration::from_millis(500),
        }
    }

    fn input() -> SenderReportInput {
        SenderReportInput {
            rtp_timestamp: 90_000,
            send_packet_count: 10,
            send_octet_count: 1000,
        }
    }

    #[test]
    fn report_schedule_is_jittered() {
        let now = Instant::now();
        let session = RtcpSession::new(config(), now);

        let due = session.poll_timeout().unwrap();
        assert!(due >= now + Duration::from_millis(250));
        assert!(due < now + Duration::from_millis(750));
    }

    #[test]
    fn report_contains_sr_and_sdes() {
        let now = Instant::now();
        let mut session = RtcpSession::new(config(), now);
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();

        let due = session.poll_timeout().unwrap();
        session.handle_timeout(due, input(), &mut pacer, &mut transport);

        assert_eq!(transport.sent.len(), 1);

        let mut parsed = VecDeque::new();
        Rtcp::read_packet(transport.sent[0].data(), &mut parsed);

        assert!(matches!(parsed[0], Rtcp::SenderReport(_)));
        assert!(matches!(parsed[1], Rtcp::SourceDescription(_)));

        // Schedule moved on.
        assert!(session.poll_timeout().unwrap() > due);
    }

    #[test]
    fn early_timeout_is_a_no_op() {
        let now = Instant::now();
        let mut session = RtcpSession::new(config(), now);
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();

        session.handle_timeout(now, input(), &mut pacer, &mut transport);
        assert!(transport.sent.is_empty());
    }

    #[test]
    fn rtt_from_report_block_echo() {
        let now = Instant::now();
        let mut session = RtcpSession::new(config(), now);
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();

        session.send_report(now, input(), &mut pacer, &mut transport);

        // The receiver echoes the SR after holding it 100ms; the answer
        // arrives 150ms after we sent. RTT = 50ms.
        let rr = ReceiverReport {
            sender_ssrc: 12.into(),
            report: Some(ReportBlock {
                ssrc: 11.into(),
                fraction_lost: 0,
                cumulative_lost: 0,
                extended_high_seq: 0,
                jitter: 0,
                last_sr: now.as_ntp_32(),
                delay_since_last_sr: duration_as_ntp_32(Duration::from_millis(100)),
            }),
        };

        let mut feedback = VecDeque::new();
        feedback.push_back(Rtcp::ReceiverReport(rr));
        let mut buf = vec![0_u8; MAX_IP_PACKET_SIZE];
        let n = Rtcp::write_packet(&mut feedback, &mut buf);

        let events = session.handle_incoming(&buf[..n], now + Duration::from_millis(150));

        let RtcpEvent::Rtt(report) = &events[0] else {
            panic!("expected rtt event");
        };

        let rtt_ms = report.rtt.as_millis();
        assert!((45..=55).contains(&rtt_ms), "rtt {rtt_ms}ms");
        assert_eq!(session.rtt().unwrap(), *report);
    }

    #[test]
    fn rrtr_is_echoed_as_dlrr() {
        let now = Instant::now();
        let mut session = RtcpSession::new(config(), now);
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();

        let rrtr_time = now;
        let mut feedback = VecDeque::new();
        feedback.push_back(Rtcp::ExtendedReport(ExtendedReport {
            ssrc: 12.into(),
            blocks: vec![XrBlock::Rrtr(Rrtr { ntp_time: rrtr_time })],
        }));
        let mut buf = vec![0_u8; MAX_IP_PACKET_SIZE];
        let n = Rtcp::write_packet(&mut feedback, &mut buf);

        session.handle_incoming(&buf[..n], now);
        session.send_report(now + Duration::from_millis(80), input(), &mut pacer, &mut transport);

        let mut parsed = VecDeque::new();
        Rtcp::read_packet(transport.sent[0].data(), &mut parsed);

        let dlrr = parsed.iter().find_map(|p| match p {
            Rtcp::ExtendedReport(xr) => xr.blocks.iter().find_map(|b| match b {
                XrBlock::Dlrr(d) => Some(d.clone()),
                _ => None,
            }),
            _ => None,
        });

        let dlrr = dlrr.expect("dlrr echo in report");
        assert_eq!(dlrr.items[0].ssrc, 12.into());
        assert_eq!(dlrr.items[0].last_rr_time, rrtr_time.as_ntp_32());

        let delay = duration_from_ntp_32(dlrr.items[0].last_rr_delay);
        assert!((delay.as_millis() as i64 - 80).abs() <= 2);

        // The echo is sent once.
        transport.sent.clear();
        session.send_report(now + Duration::from_millis(200), input(), &mut pacer, &mut transport);
        let mut parsed = VecDeque::new();
        Rtcp::read_packet(transport.sent[0].data(), &mut parsed);
        assert!(!parsed.iter().any(|p| matches!(p, Rtcp::ExtendedReport(_))));
    }

    #[test]
    fn cast_feedback_for_other_stream_is_dropped() {
        let now = Instant::now();
        let mut session = RtcpSession::new(config(), now);

        let mut feedback = VecDeque::new();
        feedback.push_back(Rtcp::CastFeedback(CastMessage::new(
            12.into(),
            99.into(), // not our ssrc
            5,
        )));
        let mut buf = vec![0_u8; MAX_IP_PACKET_SIZE];
        let n = Rtcp::write_packet(&mut feedback, &mut buf);

        let events = session.handle_incoming(&buf[..n], now);
        assert!(events.is_empty());
    }

    #[test]
    fn cast_feedback_surfaces_as_event() {
        let now = Instant::now();
        let mut session = RtcpSession::new(config(), now);

        let mut message = CastMessage::new(12.into(), 11.into(), 5);
        message
            .missing_frames_and_packets
            .insert(6, [1u16, 2].into_iter().collect());

        let mut feedback = VecDeque::new();
        feedback.push_back(Rtcp::CastFeedback(message.clone()));
        let mut buf = vec![0_u8; MAX_IP_PACKET_SIZE];
        let n = Rtcp::write_packet(&mut feedback, &mut buf);

        let events = session.handle_incoming(&buf[..n], now);
        assert_eq!(events, vec![RtcpEvent::CastFeedback(message)]);
    }
}
