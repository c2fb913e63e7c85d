#![allow(clippy::unusual_byte_groupings)]

use crate::id::{Pt, Ssrc};

/// Length of the fixed RTP header.
pub const RTP_HEADER_LEN: usize = 12;

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                           timestamp                           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                             SSRC                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

/// The fixed RTP header of an outgoing media packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpHeader {
    /// Set on the last packet of a frame.
    pub marker: bool,
    /// Payload type negotiated for the stream.
    pub payload_type: Pt,
    /// Sequence number, increasing by 1 per packet across the whole stream.
    pub sequence_number: u16,
    /// Media timestamp in the stream's clock rate.
    pub timestamp: u32,
    /// Sender source identifier.
    pub ssrc: Ssrc,
}

impl RtpHeader {
    pub fn write_to(&self, buf: &mut [u8]) -> usize {
        buf[0] = 0b10_0_0_0000;

        assert!(*self.payload_type <= 127);
        buf[1] = *self.payload_type & 0b0111_1111 | if self.marker { 1 << 7 } else { 0 };

        buf[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        buf[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());

        RTP_HEADER_LEN
    }

    pub fn parse(buf: &[u8]) -> Option<RtpHeader> {
        if buf.len() < RTP_HEADER_LEN {
            trace!("RTP header too short < 12: {}", buf.len());
            return None;
        }

        let version = (buf[0] & 0b1100_0000) >> 6;
        if version != 2 {
            trace!("RTP version is not 2");
            return None;
        }

        let marker = buf[1] & 0b1000_0000 > 0;
        let payload_type = (buf[1] & 0b0111_1111).into();
        let sequence_number = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]).into();

        Some(RtpHeader {
            marker,
            payload_type,
            sequence_number,
            timestamp,
            ssrc,
        })
    }

    /// Rewrite the sequence-number field of an already serialized packet.
    /// Used when resending, so the receiver can tell original from
    /// retransmission while the logical packet identity stays the same.
    pub fn rewrite_sequence_number(packet: &mut [u8], sequence_number: u16) {
        packet[2..4].copy_from_slice(&sequence_number.to_be_bytes());
    }
}

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |K|R|  unused   |   frame id    |           packet id           |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |         max packet id         | ref frame id (when R) |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

/// The Cast-specific header following the fixed RTP header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastHeader {
    /// The packet belongs to a key frame.
    pub is_key_frame: bool,
    /// `referenced_frame_id` is present.
    pub is_reference: bool,
    /// 8-bit wire id of the frame.
    pub frame_id: u8,
    /// Position of this packet within the frame.
    pub packet_id: u16,
    /// Id of the last packet in the frame.
    pub max_packet_id: u16,
    /// 8-bit wire id of the referenced frame, when `is_reference`.
    pub referenced_frame_id: u8,
}

impl CastHeader {
    pub fn len(&self) -> usize {
        if self.is_reference {
            7
        } else {
            6
        }
    }

    pub fn write_to(&self, buf: &mut [u8]) -> usize {
        buf[0] = if self.is_key_frame { 1 << 7 } else { 0 }
            | if self.is_reference { 1 << 6 } else { 0 };
        buf[1] = self.frame_id;
        buf[2..4].copy_from_slice(&self.packet_id.to_be_bytes());
        buf[4..6].copy_from_slice(&self.max_packet_id.to_be_bytes());

        if self.is_reference {
            buf[6] = self.referenced_frame_id;
        }

        self.len()
    }

    pub fn parse(buf: &[u8]) -> Option<CastHeader> {
        if buf.len() < 6 {
            trace!("Cast header too short < 6: {}", buf.len());
            return None;
        }

        let is_key_frame = buf[0] & 0b1000_0000 > 0;
        let is_reference = buf[0] & 0b0100_0000 > 0;
        let frame_id = buf[1];
        let packet_id = u16::from_be_bytes([buf[2], buf[3]]);
        let max_packet_id = u16::from_be_bytes([buf[4], buf[5]]);

        let referenced_frame_id = if is_reference {
            if buf.len() < 7 {
                trace!("Cast header missing referenced frame id");
                return None;
            }
            buf[6]
        } else {
            0
        };

        Some(CastHeader {
            is_key_frame,
            is_reference,
            frame_id,
            packet_id,
            max_packet_id,
            referenced_frame_id,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn rtp_header_roundtrip() {
        let h = RtpHeader {
            marker: true,
            payload_type: 96.into(),
            sequence_number: 0xfffe,
            timestamp: 0x0102_0304,
            ssrc: 0xdead_beef.into(),
        };

        let mut buf = [0; RTP_HEADER_LEN];
        assert_eq!(h.write_to(&mut buf), RTP_HEADER_LEN);

        let h2 = RtpHeader::parse(&buf).unwrap();
        assert_eq!(h, h2);
    }

    #[test]
    fn cast_header_roundtrip() {
        let c = CastHeader {
            is_key_frame: false,
            is_reference: true,
            frame_id: 250,
            packet_id: 3,
            max_packet_id: 7,
            referenced_frame_id: 249,
        };

        let mut buf = [0; 7];
        assert_eq!(c.write_to(&mut buf), 7);

        let c2 = CastHeader::parse(&buf).unwrap();
        assert_eq!(c, c2);
    }

    #[test]
    fn sequence_rewrite() {
        let h = RtpHeader {
            marker: false,
            payload_type: 96.into(),
            sequence_number: 1,
            timestamp: 0,
            ssrc: 1.into(),
        };

        let mut buf = [0; RTP_HEADER_LEN];
        h.write_to(&mut buf);

        RtpHeader::rewrite_sequence_number(&mut buf, 4711);
        assert_eq!(RtpHeader::parse(&buf).unwrap().sequence_number, 4711);
    }

    #[test]
    fn reject_wrong_version() {
        let buf = [0u8; RTP_HEADER_LEN];
        assert!(RtpHeader::parse(&buf).is_none());
    }
}
