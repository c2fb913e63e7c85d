use std::collections::VecDeque;

use super::{FeedbackMessageType, RtcpHeader, RtcpPacket, RtcpType, Ssrc};
use super::CAST_MAGIC;

/// Ceiling on the serialized size of one receiver log packet. Log data is
/// best effort and must not crowd out media in the compound packet.
pub(crate) const MAX_RECEIVER_LOG_BYTES: usize = 400;

/// Event deltas are 12 bits of milliseconds on the wire.
const MAX_EVENT_DELTA_MS: u32 = 0xfff;

/// How many reports back a frame log is repeated, to survive RTCP loss.
const REDUNDANCY_OFFSETS: [usize; 2] = [10, 20];

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |V=2|P| subtype |   PT=APP=204  |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                             SSRC                              |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  'C'          |  'A'          |  'S'          |  'T'          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                        rtp timestamp                          |  per
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ frame
// |      event timestamp base (ms)                | event count-1 |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |          packet id            | event |     delta (ms)        |  per
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+ event

/// Receiver event log, sent from the receiver so the sender can correlate
/// network and playout events for analysis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverLog {
    /// The media stream the events concern.
    pub ssrc: Ssrc,
    pub frames: Vec<FrameLog>,
}

/// Events for one frame, deltas relative to a shared base timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameLog {
    pub rtp_timestamp: u32,
    /// Milliseconds, 24 bits on the wire. Wraps roughly every 4.6 hours.
    pub event_timestamp_base: u32,
    pub events: Vec<FrameEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameEvent {
    pub event_type: LogEventType,
    /// Milliseconds since `event_timestamp_base`, at most 4095.
    pub delta_ms: u16,
    /// Only meaningful for packet level events, zero otherwise.
    pub packet_id: u16,
}

/// Receiver side events worth reporting back. 4 bits on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogEventType {
    AckSent = 1,
    FrameDecoded = 2,
    FramePlayedOut = 3,
    PacketReceived = 4,
    PacketRetransmitReceived = 5,
}

impl TryFrom<u8> for LogEventType {
    type Error = &'static str;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        use LogEventType::*;
        match v {
            1 => Ok(AckSent),
            2 => Ok(FrameDecoded),
            3 => Ok(FramePlayedOut),
            4 => Ok(PacketReceived),
            5 => Ok(PacketRetransmitReceived),
            _ => Err("Unknown log event type"),
        }
    }
}

impl FrameLog {
    /// Build a frame log from (type, absolute ms timestamp, packet id)
    /// events. The base is chosen so the newest event fits in a 12 bit
    /// delta; events older than that are dropped.
    pub fn from_events(rtp_timestamp: u32, events: &[(LogEventType, u32, u16)]) -> FrameLog {
        let newest = events.iter().map(|e| e.1).max().unwrap_or(0);
        let oldest = events.iter().map(|e| e.1).min().unwrap_or(0);
        let event_timestamp_base = oldest.max(newest.saturating_sub(MAX_EVENT_DELTA_MS));

        let events = events
            .iter()
            .filter(|e| e.1 >= event_timestamp_base)
            .map(|&(event_type, ts, packet_id)| FrameEvent {
                event_type,
                delta_ms: (ts - event_timestamp_base) as u16,
                packet_id,
            })
            .collect();

        FrameLog {
            rtp_timestamp,
            event_timestamp_base,
            events,
        }
    }

    fn length_words(&self) -> usize {
        2 + self.events.len()
    }
}

impl RtcpPacket for ReceiverLog {
    fn header(&self) -> RtcpHeader {
        RtcpHeader {
            rtcp_type: RtcpType::ApplicationDefined,
            feedback_message_type: FeedbackMessageType::Subtype(0),
            words_less_one: (self.length_words() - 1) as u16,
        }
    }

    fn length_words(&self) -> usize {
        // * header: 1
        // * ssrc: 1
        // * 'CAST': 1
        // * 2 words per frame + 1 per event
        1 + 1 + 1 + self.frames.iter().map(|f| f.length_words()).sum::<usize>()
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);

        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&CAST_MAGIC);

        let mut buf = &mut buf[12..];
        for frame in &self.frames {
            assert!(!frame.events.is_empty(), "frame log without events");
            assert!(frame.events.len() <= 256, "at most 256 events per frame");

            buf[0..4].copy_from_slice(&frame.rtp_timestamp.to_be_bytes());
            buf[4..7].copy_from_slice(&frame.event_timestamp_base.to_be_bytes()[1..]);
            buf[7] = (frame.events.len() - 1) as u8;
            buf = &mut buf[8..];

            for e in &frame.events {
                buf[0..2].copy_from_slice(&e.packet_id.to_be_bytes());
                let type_delta = ((e.event_type as u16) << 12) | (e.delta_ms & 0xfff);
                buf[2..4].copy_from_slice(&type_delta.to_be_bytes());
                buf = &mut buf[4..];
            }
        }

        self.length_words() * 4
    }
}

impl<'a> TryFrom<&'a [u8]> for ReceiverLog {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 8 {
            return Err("Less than 8 bytes for ReceiverLog");
        }

        if buf[4..8] != CAST_MAGIC {
            return Err("Not a CAST receiver log");
        }

        let ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();

        let mut frames = Vec::new();
        let mut buf = &buf[8..];

        while buf.len() >= 8 {
            let rtp_timestamp = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
            let event_timestamp_base = u32::from_be_bytes([0, buf[4], buf[5], buf[6]]);
            let event_count = buf[7] as usize + 1;
            buf = &buf[8..];

            if buf.len() < event_count * 4 {
                return Err("ReceiverLog events exceed buffer");
            }

            let mut events = Vec::with_capacity(event_count);
            for _ in 0..event_count {
                let packet_id = u16::from_be_bytes([buf[0], buf[1]]);
                let type_delta = u16::from_be_bytes([buf[2], buf[3]]);
                let event_type = ((type_delta >> 12) as u8).try_into()?;
                let delta_ms = type_delta & 0xfff;
                events.push(FrameEvent {
                    event_type,
                    delta_ms,
                    packet_id,
                });
                buf = &buf[4..];
            }

            frames.push(FrameLog {
                rtp_timestamp,
                event_timestamp_base,
                events,
            });
        }

        Ok(ReceiverLog { ssrc, frames })
    }
}

/// Rolling history of per-report frame logs. RTCP is unacknowledged, so
/// each frame log is sent again a number of reports after its first
/// transmission.
#[derive(Debug, Default)]
pub struct ReceiverLogHistory {
    reports: VecDeque<Vec<FrameLog>>,
}

impl ReceiverLogHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the fresh frame logs for this report and return the payload
    /// to send: the fresh logs plus redundancy copies of older ones. The
    /// serialized size is kept under [`MAX_RECEIVER_LOG_BYTES`] by dropping
    /// redundancy copies first, then the oldest fresh logs.
    pub fn build(&mut self, fresh: Vec<FrameLog>) -> Vec<FrameLog> {
        self.reports.push_front(fresh.clone());
        if self.reports.len() > REDUNDANCY_OFFSETS[1] + 1 {
            self.reports.pop_back();
        }

        let mut payload = fresh;

        for offset in REDUNDANCY_OFFSETS {
            if let Some(old) = self.reports.get(offset) {
                payload.extend(old.iter().cloned());
            }
        }

        // 12 bytes of header/ssrc/magic, then the frame payloads.
        let mut bytes = 12;
        let mut kept = 0;
        for frame in &payload {
            let frame_bytes = frame.length_words() * 4;
            if bytes + frame_bytes > MAX_RECEIVER_LOG_BYTES {
                break;
            }
            bytes += frame_bytes;
            kept += 1;
        }
        if kept < payload.len() {
            trace!("receiver log truncated: {} of {} frames", kept, payload.len());
            payload.truncate(kept);
        }

        payload
    }
}
