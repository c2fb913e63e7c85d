use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use super::{FeedbackMessageType, PayloadType, RtcpHeader, RtcpPacket, RtcpType, Ssrc};
use super::CAST_MAGIC;

/// In a loss set, stands in for "every packet of this frame is lost".
pub const RTCP_CAST_ALL_PACKETS_LOST: u16 = 0xffff;

/// In a loss set, stands in for "the last packet of this frame is lost"
/// when the receiver does not know the frame's packet count yet.
pub const RTCP_CAST_LAST_PACKET: u16 = 0xfffe;

/// Ceiling on loss fields per message, keeping the serialized form well
/// under one UDP datagram.
pub(crate) const MAX_CAST_LOSS_FIELDS: usize = 100;

/// Missing packet ids per 8-bit wire frame id. An entry containing
/// [`RTCP_CAST_ALL_PACKETS_LOST`] means the whole frame is missing.
pub type MissingFramesAndPackets = BTreeMap<u8, BTreeSet<u16>>;

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |V=2|P|  FMT=15 |   PT=206      |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                  SSRC of packet sender                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                  SSRC of media source                         |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  'C'          |  'A'          |  'S'          |  'T'          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | ack frame id  | loss count    |       target delay (ms)       |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// | loss frame id |        packet id              | packet bitmask|
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+

/// Cast ACK/NACK feedback. The receiver acknowledges the latest frame it
/// can decode and lists every frame/packet it is still missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CastMessage {
    /// Sender of this feedback, i.e. the receiver of the media.
    pub sender_ssrc: Ssrc,
    /// The media stream the feedback concerns.
    pub media_ssrc: Ssrc,
    /// 8-bit wire id of the latest frame acknowledged.
    pub ack_frame_id: u8,
    /// Target playout delay in milliseconds.
    pub target_delay_ms: u16,
    /// Everything still missing at the receiver.
    pub missing_frames_and_packets: MissingFramesAndPackets,
}

impl RtcpPacket for CastMessage {
    fn header(&self) -> RtcpHeader {
        RtcpHeader {
            rtcp_type: RtcpType::PayloadSpecificFeedback,
            feedback_message_type: FeedbackMessageType::PayloadFeedback(
                PayloadType::ApplicationLayer,
            ),
            words_less_one: (self.length_words() - 1) as u16,
        }
    }

    fn length_words(&self) -> usize {
        // * header: 1
        // * sender ssrc + media ssrc: 2
        // * 'CAST': 1
        // * ack frame id, loss count, target delay: 1
        // * 1 word per loss field
        1 + 2 + 1 + 1 + self.loss_fields().len()
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);

        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&self.media_ssrc.to_be_bytes());
        buf[12..16].copy_from_slice(&CAST_MAGIC);

        let fields = self.loss_fields();

        buf[16] = self.ack_frame_id;
        buf[17] = fields.len() as u8;
        buf[18..20].copy_from_slice(&self.target_delay_ms.to_be_bytes());

        let mut buf = &mut buf[20..];
        for f in &fields {
            buf[0] = f.frame_id;
            buf[1..3].copy_from_slice(&f.packet_id.to_be_bytes());
            buf[3] = f.bitmask;
            buf = &mut buf[4..];
        }

        self.length_words() * 4
    }
}

/// One serialized loss field. `bitmask` bit `i` marks `packet_id + 1 + i`
/// as also missing.
#[derive(Debug, Clone, Copy)]
struct LossField {
    frame_id: u8,
    packet_id: u16,
    bitmask: u8,
}

impl CastMessage {
    pub fn new(sender_ssrc: Ssrc, media_ssrc: Ssrc, ack_frame_id: u8) -> Self {
        CastMessage {
            sender_ssrc,
            media_ssrc,
            ack_frame_id,
            target_delay_ms: 0,
            missing_frames_and_packets: MissingFramesAndPackets::new(),
        }
    }

    fn loss_fields(&self) -> Vec<LossField> {
        let mut fields = Vec::new();

        'frames: for (&frame_id, packets) in &self.missing_frames_and_packets {
            if packets.contains(&RTCP_CAST_ALL_PACKETS_LOST) {
                fields.push(LossField {
                    frame_id,
                    packet_id: RTCP_CAST_ALL_PACKETS_LOST,
                    bitmask: 0,
                });
                if fields.len() >= MAX_CAST_LOSS_FIELDS {
                    break 'frames;
                }
                continue;
            }

            let mut iter = packets.iter().peekable();
            while let Some(&packet_id) = iter.next() {
                let mut bitmask = 0_u8;
                while let Some(&&next) = iter.peek() {
                    let offset = next.wrapping_sub(packet_id);
                    if offset == 0 || offset > 8 {
                        break;
                    }
                    bitmask |= 1 << (offset - 1);
                    iter.next();
                }
                fields.push(LossField {
                    frame_id,
                    packet_id,
                    bitmask,
                });
                if fields.len() >= MAX_CAST_LOSS_FIELDS {
                    break 'frames;
                }
            }
        }

        fields
    }
}

impl<'a> TryFrom<&'a [u8]> for CastMessage {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 16 {
            return Err("Less than 16 bytes for CastMessage");
        }

        if buf[8..12] != CAST_MAGIC {
            return Err("Not a CAST feedback block");
        }

        let sender_ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();
        let media_ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]).into();

        let ack_frame_id = buf[12];
        let loss_count = buf[13] as usize;
        let target_delay_ms = u16::from_be_bytes([buf[14], buf[15]]);

        if buf.len() < 16 + loss_count * 4 {
            return Err("CastMessage loss fields exceed buffer");
        }

        let mut missing_frames_and_packets = MissingFramesAndPackets::new();

        let mut buf = &buf[16..];
        for _ in 0..loss_count {
            let frame_id = buf[0];
            let packet_id = u16::from_be_bytes([buf[1], buf[2]]);
            let bitmask = buf[3];

            let set = missing_frames_and_packets.entry(frame_id).or_default();
            set.insert(packet_id);
            for i in 0..8 {
                if bitmask & (1 << i) > 0 {
                    set.insert(packet_id.wrapping_add(1 + i));
                }
            }

            buf = &buf[4..];
        }

        Ok(CastMessage {
            sender_ssrc,
            media_ssrc,
            ack_frame_id,
            target_delay_ms,
            missing_frames_and_packets,
        })
    }
}

/// Compact loss listing for log lines: `23:3-6, 25:1,5-6, 30:*`, where `*`
/// is a whole frame missing.
pub struct MissingShort<'a>(pub &'a MissingFramesAndPackets);

impl fmt::Display for MissingShort<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first_frame = true;
        for (frame_id, packets) in self.0 {
            if !first_frame {
                write!(f, ", ")?;
            }
            first_frame = false;
            write!(f, "{}:", frame_id)?;

            if packets.contains(&RTCP_CAST_ALL_PACKETS_LOST) {
                write!(f, "*")?;
                continue;
            }

            let mut run_start: Option<(u16, u16)> = None;
            let mut first_run = true;

            let mut flush =
                |f: &mut fmt::Formatter<'_>, run: (u16, u16), first: &mut bool| -> fmt::Result {
                    if !*first {
                        write!(f, ",")?;
                    }
                    *first = false;
                    if run.0 == run.1 {
                        write!(f, "{}", run.0)
                    } else {
                        write!(f, "{}-{}", run.0, run.1)
                    }
                };

            for &p in packets {
                match run_start {
                    Some((start, end)) if p == end.wrapping_add(1) => {
                        run_start = Some((start, p));
                    }
                    Some(run) => {
                        flush(f, run, &mut first_run)?;
                        run_start = Some((p, p));
                    }
                    None => run_start = Some((p, p)),
                }
            }
            if let Some(run) = run_start {
                flush(f, run, &mut first_run)?;
            }
        }
        Ok(())
    }
}
