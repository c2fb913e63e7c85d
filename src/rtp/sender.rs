use std::time::{Duration, Instant};

use crate::frame::EncodedFrame;
use crate::id::{Pt, Ssrc};
use crate::pacer::{PacedSender, PacketSender};
use crate::rtcp::{MissingFramesAndPackets, MissingShort};
use crate::rtcp::{RTCP_CAST_ALL_PACKETS_LOST, RTCP_CAST_LAST_PACKET};
use crate::storage::PacketStorage;
use crate::CastError;

use super::header::RtpHeader;
use super::packetizer::{RtpPacketizer, RtpPacketizerConfig};

#[derive(Debug, Clone)]
pub struct RtpSenderConfig {
    pub payload_type: Pt,
    pub ssrc: Ssrc,
    pub max_payload_length: usize,
    /// How many recent frames are kept for retransmission.
    pub max_stored_frames: usize,
}

impl Default for RtpSenderConfig {
    fn default() -> Self {
        let packetizer = RtpPacketizerConfig::default();
        RtpSenderConfig {
            payload_type: packetizer.payload_type,
            ssrc: packetizer.ssrc,
            max_payload_length: packetizer.max_payload_length,
            max_stored_frames: 32,
        }
    }
}

/// The send half of one media stream: packetizes frames, retains them for
/// retransmission, and answers Cast feedback by resending exactly what the
/// receiver still misses.
#[derive(Debug)]
pub struct RtpSender {
    packetizer: RtpPacketizer,
    storage: PacketStorage,
}

impl RtpSender {
    pub fn new(config: RtpSenderConfig) -> Result<Self, CastError> {
        let storage = PacketStorage::new(config.max_stored_frames);
        if !storage.is_valid() {
            return Err(CastError::InvalidConfiguration("max_stored_frames"));
        }

        let packetizer = RtpPacketizer::new(RtpPacketizerConfig {
            payload_type: config.payload_type,
            ssrc: config.ssrc,
            max_payload_length: config.max_payload_length,
        });

        Ok(RtpSender {
            packetizer,
            storage,
        })
    }

    pub fn ssrc(&self) -> Ssrc {
        self.packetizer.ssrc()
    }

    pub fn send_packet_count(&self) -> u32 {
        self.packetizer.send_packet_count()
    }

    pub fn send_octet_count(&self) -> u32 {
        self.packetizer.send_octet_count()
    }

    /// Packetize and enqueue one frame. The packets are also retained so a
    /// later NACK can be answered from storage.
    pub fn send_frame(
        &mut self,
        frame: &EncodedFrame,
        now: Instant,
        pacer: &mut PacedSender,
        transport: &mut dyn PacketSender,
    ) {
        let packets = self.packetizer.packetize_frame(frame);
        self.storage.store_frame(frame.frame_id, packets.clone());
        pacer.send_packets(packets, now, transport);
    }

    /// Resend what the receiver reports missing.
    ///
    /// Per frame entry, an empty packet set or the all-packets-lost sentinel
    /// means the whole frame. The last-packet sentinel names the final packet
    /// of the frame without the receiver knowing its id. Frames that have
    /// aged out of storage are skipped.
    ///
    /// When `cancel_rtx_if_not_in_list` is set, stored packets of a listed
    /// frame that are NOT missing are removed from the pacer queue: the
    /// receiver has them, sending them again is pure waste.
    pub fn resend_packets(
        &mut self,
        missing: &MissingFramesAndPackets,
        cancel_rtx_if_not_in_list: bool,
        dedupe_window: Duration,
        now: Instant,
        pacer: &mut PacedSender,
        transport: &mut dyn PacketSender,
    ) {
        debug!("Resend request: {}", MissingShort(missing));

        let mut resends = Vec::new();

        for (&frame_id, packet_ids) in missing {
            let Some(stored) = self.storage.get_frame8(frame_id) else {
                debug!("Missing frame {} no longer stored", frame_id);
                continue;
            };

            let whole_frame =
                packet_ids.is_empty() || packet_ids.contains(&RTCP_CAST_ALL_PACKETS_LOST);
            let last_packet_id = (stored.len() - 1) as u16;

            for (key, packet) in stored {
                let wanted = whole_frame
                    || packet_ids.contains(&key.packet_id)
                    || (key.packet_id == last_packet_id
                        && packet_ids.contains(&RTCP_CAST_LAST_PACKET));

                if wanted {
                    // Fresh sequence number, same packet identity.
                    let mut packet = packet.clone();
                    let seq = self.packetizer.next_sequence_number();
                    RtpHeader::rewrite_sequence_number(packet.to_mut(), seq);
                    resends.push((*key, packet));
                } else if cancel_rtx_if_not_in_list {
                    pacer.cancel_sending_packet(key);
                }
            }
        }

        pacer.resend_packets(resends, dedupe_window, now, transport);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::frame::{Dependency, FrameId};
    use crate::pacer::{PacerConfig, SendOutcome};
    use crate::packet::PacketRef;
    use crate::rtp::header::{CastHeader, RTP_HEADER_LEN};
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct MockTransport {
        sent: Vec<PacketRef>,
        blocked: bool,
    }

    impl PacketSender for MockTransport {
        fn send_packet(&mut self, packet: &PacketRef) -> SendOutcome {
            if self.blocked {
                self.sent.push(packet.clone());
                SendOutcome::Blocked
            } else {
                self.sent.push(packet.clone());
                SendOutcome::Sent
            }
        }
    }

    fn sender() -> RtpSender {
        RtpSender::new(RtpSenderConfig {
            payload_type: 96.into(),
            ssrc: 11.into(),
            max_payload_length: 4,
            max_stored_frames: 8,
        })
        .unwrap()
    }

    fn frame(frame_id: u32, bytes: usize) -> EncodedFrame {
        EncodedFrame {
            frame_id: frame_id.into(),
            referenced_frame_id: FrameId::from(frame_id.saturating_sub(1)),
            rtp_timestamp: frame_id * 3000,
            reference_time: Instant::now(),
            dependency: Dependency::Dependent,
            data: vec![frame_id as u8; bytes],
        }
    }

    fn cast_header(p: &PacketRef) -> CastHeader {
        CastHeader::parse(&p.data()[RTP_HEADER_LEN..]).unwrap()
    }

    #[test]
    fn rejects_invalid_storage_size() {
        let config = RtpSenderConfig {
            max_stored_frames: 0,
            ..Default::default()
        };
        assert!(RtpSender::new(config).is_err());
    }

    #[test]
    fn send_frame_reaches_transport() {
        let mut sender = sender();
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();
        let now = Instant::now();

        sender.send_frame(&frame(0, 10), now, &mut pacer, &mut transport);

        assert_eq!(transport.sent.len(), 3);
        assert_eq!(cast_header(&transport.sent[0]).frame_id, 0);
    }

    #[test]
    fn resend_specific_packets_with_new_sequence_numbers() {
        let mut sender = sender();
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();
        let now = Instant::now();

        sender.send_frame(&frame(0, 10), now, &mut pacer, &mut transport);
        let original_seq = RtpHeader::parse(transport.sent[1].data())
            .unwrap()
            .sequence_number;
        transport.sent.clear();

        let mut missing = MissingFramesAndPackets::new();
        missing.insert(0, BTreeSet::from([1u16]));

        sender.resend_packets(
            &missing,
            false,
            Duration::from_millis(0),
            now,
            &mut pacer,
            &mut transport,
        );

        assert_eq!(transport.sent.len(), 1);
        let resent = RtpHeader::parse(transport.sent[0].data()).unwrap();
        assert_ne!(resent.sequence_number, original_seq);
        assert_eq!(cast_header(&transport.sent[0]).packet_id, 1);
    }

    #[test]
    fn all_packets_lost_resends_whole_frame() {
        let mut sender = sender();
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();
        let now = Instant::now();

        sender.send_frame(&frame(0, 10), now, &mut pacer, &mut transport);
        transport.sent.clear();

        let mut missing = MissingFramesAndPackets::new();
        missing.insert(0, BTreeSet::from([RTCP_CAST_ALL_PACKETS_LOST]));

        sender.resend_packets(
            &missing,
            false,
            Duration::from_millis(0),
            now,
            &mut pacer,
            &mut transport,
        );

        assert_eq!(transport.sent.len(), 3);
    }

    #[test]
    fn last_packet_sentinel_targets_final_packet() {
        let mut sender = sender();
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();
        let now = Instant::now();

        sender.send_frame(&frame(0, 10), now, &mut pacer, &mut transport);
        transport.sent.clear();

        let mut missing = MissingFramesAndPackets::new();
        missing.insert(0, BTreeSet::from([RTCP_CAST_LAST_PACKET]));

        sender.resend_packets(
            &missing,
            false,
            Duration::from_millis(0),
            now,
            &mut pacer,
            &mut transport,
        );

        assert_eq!(transport.sent.len(), 1);
        assert_eq!(cast_header(&transport.sent[0]).packet_id, 2);
    }

    #[test]
    fn evicted_frame_is_skipped() {
        let mut sender = sender();
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();
        let now = Instant::now();

        // Capacity 8; frame 0 is evicted by frame 8.
        for id in 0..9 {
            sender.send_frame(&frame(id, 4), now, &mut pacer, &mut transport);
        }
        transport.sent.clear();

        let mut missing = MissingFramesAndPackets::new();
        missing.insert(0, BTreeSet::new());

        sender.resend_packets(
            &missing,
            false,
            Duration::from_millis(0),
            now,
            &mut pacer,
            &mut transport,
        );

        assert!(transport.sent.is_empty());
    }

    #[test]
    fn cancel_removes_untargeted_packets_from_queue() {
        let mut sender = sender();
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport {
            blocked: true,
            ..Default::default()
        };
        let now = Instant::now();

        // The transport blocks after the first packet, so packets 1 and 2
        // stay queued in the pacer.
        sender.send_frame(&frame(0, 10), now, &mut pacer, &mut transport);
        assert_eq!(transport.sent.len(), 1);
        assert_eq!(pacer.queue_len(), 2);

        // The receiver only misses packet 1, so the queued packet 2 is
        // dropped from the queue.
        let mut missing = MissingFramesAndPackets::new();
        missing.insert(0, BTreeSet::from([1u16]));

        sender.resend_packets(
            &missing,
            true,
            Duration::from_millis(0),
            now,
            &mut pacer,
            &mut transport,
        );

        // Packet 1 replaced its queued copy, packet 2 cancelled.
        assert_eq!(pacer.queue_len(), 1);
    }

    #[test]
    fn storage_shared_packets_stay_intact_after_resend_rewrite() {
        let mut sender = sender();
        let mut pacer = PacedSender::new(PacerConfig::default());
        let mut transport = MockTransport::default();
        let now = Instant::now();

        sender.send_frame(&frame(0, 4), now, &mut pacer, &mut transport);
        let original = transport.sent[0].clone();
        transport.sent.clear();

        let mut missing = MissingFramesAndPackets::new();
        missing.insert(0, BTreeSet::new());
        sender.resend_packets(
            &missing,
            false,
            Duration::from_millis(0),
            now,
            &mut pacer,
            &mut transport,
        );

        // The rewrite copied; the first transmission's bytes are unchanged.
        let first_seq = RtpHeader::parse(original.data()).unwrap().sequence_number;
        let resent_seq = RtpHeader::parse(transport.sent[0].data())
            .unwrap()
            .sequence_number;
        assert_ne!(first_seq, resent_seq);
    }
}
