use crate::frame::{Dependency, EncodedFrame};
use crate::id::{Pt, Ssrc};
use crate::packet::{PacketKey, PacketRef, SendPacketVec};
use crate::rtcp::MAX_IP_PACKET_SIZE;

use super::header::{CastHeader, RtpHeader, RTP_HEADER_LEN};

#[derive(Debug, Clone)]
pub struct RtpPacketizerConfig {
    pub payload_type: Pt,
    pub ssrc: Ssrc,
    /// Media bytes per packet. The default leaves room for the RTP and Cast
    /// headers within one UDP datagram.
    pub max_payload_length: usize,
}

impl Default for RtpPacketizerConfig {
    fn default() -> Self {
        RtpPacketizerConfig {
            payload_type: 96.into(),
            ssrc: Ssrc::new(),
            // 12 byte RTP header, 7 byte Cast header, margin for tunneling
            // overhead outside our control.
            max_payload_length: MAX_IP_PACKET_SIZE - 12 - 7 - 21,
        }
    }
}

/// Splits encoded frames into wire packets, each carrying the fixed RTP
/// header plus the Cast header.
///
/// The sequence number is a single increasing counter for the whole stream;
/// resent packets draw fresh numbers from the same counter.
#[derive(Debug)]
pub struct RtpPacketizer {
    config: RtpPacketizerConfig,
    sequence_number: u16,
    send_packet_count: u32,
    send_octet_count: u32,
}

impl RtpPacketizer {
    pub fn new(config: RtpPacketizerConfig) -> Self {
        RtpPacketizer {
            config,
            sequence_number: fastrand::u16(..),
            send_packet_count: 0,
            send_octet_count: 0,
        }
    }

    pub fn ssrc(&self) -> Ssrc {
        self.config.ssrc
    }

    /// Packets sent over the stream's lifetime, reported in sender reports.
    pub fn send_packet_count(&self) -> u32 {
        self.send_packet_count
    }

    /// Payload octets sent over the stream's lifetime.
    pub fn send_octet_count(&self) -> u32 {
        self.send_octet_count
    }

    /// Fresh sequence number for a resend.
    pub(crate) fn next_sequence_number(&mut self) -> u16 {
        let seq = self.sequence_number;
        self.sequence_number = self.sequence_number.wrapping_add(1);
        seq
    }

    /// Serialize one frame into its wire packets, in packet-id order. The
    /// marker bit is set on the last packet of the frame.
    pub fn packetize_frame(&mut self, frame: &EncodedFrame) -> SendPacketVec {
        let payload_len = self.config.max_payload_length;
        assert!(payload_len > 0);

        // An empty frame still yields one (empty) packet, so the receiver
        // learns the frame exists.
        let chunks = frame.data.chunks(payload_len);
        let num_packets = chunks.len().max(1);
        let max_packet_id = (num_packets - 1) as u16;

        let mut packets = SendPacketVec::with_capacity(num_packets);

        let mut emit = |packetizer: &mut Self, packet_id: u16, payload: &[u8]| {
            let rtp = RtpHeader {
                marker: packet_id == max_packet_id,
                payload_type: packetizer.config.payload_type,
                sequence_number: packetizer.next_sequence_number(),
                timestamp: frame.rtp_timestamp,
                ssrc: packetizer.config.ssrc,
            };
            let cast = CastHeader {
                is_key_frame: frame.dependency == Dependency::Key,
                is_reference: true,
                frame_id: frame.frame_id.lower_8(),
                packet_id,
                max_packet_id,
                referenced_frame_id: frame.referenced_frame_id.lower_8(),
            };

            let mut data = Vec::with_capacity(RTP_HEADER_LEN + cast.len() + payload.len());
            data.resize(RTP_HEADER_LEN + cast.len(), 0);
            rtp.write_to(&mut data);
            cast.write_to(&mut data[RTP_HEADER_LEN..]);
            data.extend_from_slice(payload);

            packetizer.send_packet_count += 1;
            packetizer.send_octet_count += payload.len() as u32;

            let key = PacketKey {
                capture_time: frame.reference_time,
                ssrc: packetizer.config.ssrc,
                packet_id,
            };
            packets.push((key, PacketRef::new(data)));
        };

        if frame.data.is_empty() {
            emit(self, 0, &[]);
        } else {
            for (packet_id, payload) in frame.data.chunks(payload_len).enumerate() {
                emit(self, packet_id as u16, payload);
            }
        }

        packets
    }
}
