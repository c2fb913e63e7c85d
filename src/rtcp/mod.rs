#![allow(clippy::unusual_byte_groupings)]

use std::collections::VecDeque;

mod header;
pub use header::{RtcpHeader, RtcpType};

mod sr;
pub use sr::SenderReport;

mod rr;
pub use rr::{ReceiverReport, ReportBlock};

mod sdes;
pub use sdes::Sdes;

mod nack;
pub use nack::{Nack, NackEntry};

mod xr;
pub use xr::{Dlrr, DlrrItem, ExtendedReport, Rrtr, XrBlock};

mod cast;
pub use cast::{CastMessage, MissingFramesAndPackets, MissingShort};
pub use cast::{RTCP_CAST_ALL_PACKETS_LOST, RTCP_CAST_LAST_PACKET};

mod receiver_log;
pub use receiver_log::{FrameEvent, FrameLog, LogEventType, ReceiverLog, ReceiverLogHistory};

mod remb;
pub use remb::Remb;

use crate::id::Ssrc;

/// Hard ceiling for any serialized RTCP compound packet. One UDP datagram.
pub const MAX_IP_PACKET_SIZE: usize = 1500;

/// Magic value identifying Cast application-defined RTCP blocks.
pub(crate) const CAST_MAGIC: [u8; 4] = [b'C', b'A', b'S', b'T'];

/// Number of _something_ in the RTCP packet; the packet type determines how
/// to interpret the 5-bit count field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedbackMessageType {
    /// For SenderReport/ReceiverReport: number of report blocks.
    ReceptionReport(u8),
    /// For SourceDescription/Goodbye: number of chunks.
    SourceCount(u8),
    /// For ApplicationDefined: application subtype.
    Subtype(u8),
    /// For TransportLayerFeedback.
    TransportFeedback(TransportType),
    /// For PayloadSpecificFeedback.
    PayloadFeedback(PayloadType),
    /// For ExtendedReport.
    NotUsed,
}

impl From<FeedbackMessageType> for u8 {
    fn from(val: FeedbackMessageType) -> Self {
        use FeedbackMessageType::*;
        match val {
            ReceptionReport(v) | SourceCount(v) | Subtype(v) => {
                assert!(v <= 31, "rtcp fmt when count must be <= 31");
                v
            }
            TransportFeedback(v) => v as u8,
            PayloadFeedback(v) => v as u8,
            NotUsed => 0,
        }
    }
}

/// Subtypes of [`FeedbackMessageType::TransportFeedback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportType {
    /// Generic NACK.
    ///
    /// Definition: <https://www.rfc-editor.org/rfc/rfc4585#section-6.2.1>
    Nack = 1,
}

/// Subtypes of [`FeedbackMessageType::PayloadFeedback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    /// Application specific type. Cast feedback and REMB both live here,
    /// told apart by their magic value.
    ///
    /// Definition: <https://www.rfc-editor.org/rfc/rfc4585#section-6.4>
    ApplicationLayer = 15,
}

/// One serializable/parseable RTCP packet.
pub trait RtcpPacket {
    fn header(&self) -> RtcpHeader;

    /// Length of entire RTCP packet (including header) in words (4 bytes).
    fn length_words(&self) -> usize;

    /// Write this packet to the buffer.
    ///
    /// Panics if the buffer doesn't have capacity to hold length_words * 4 bytes.
    fn write_to(&self, buf: &mut [u8]) -> usize;
}

/// RTCP packets handled by this crate.
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rtcp {
    /// Sender report (SR).
    SenderReport(SenderReport),
    /// Receiver report (RR).
    ReceiverReport(ReceiverReport),
    /// Extended report (XR), carrying RRTR/DLRR reference-time blocks.
    ExtendedReport(ExtendedReport),
    /// Source description (SDES), CNAME only.
    SourceDescription(Sdes),
    /// Generic NACK with missing sequence numbers.
    Nack(Nack),
    /// Cast ACK/NACK feedback.
    CastFeedback(CastMessage),
    /// Cast receiver event log.
    ReceiverLog(ReceiverLog),
    /// Receiver Estimated Maximum Bitrate.
    Remb(Remb),
}

impl Rtcp {
    /// Parse a compound packet, pushing every recognized packet to `feedback`.
    /// Malformed or unknown packets are skipped; RTCP is a best-effort side
    /// channel and parse failures must never take down the media pipeline.
    pub fn read_packet(buf: &[u8], feedback: &mut VecDeque<Rtcp>) {
        let mut buf = buf;
        loop {
            if buf.is_empty() {
                break;
            }

            let header: RtcpHeader = match buf.try_into() {
                Ok(v) => v,
                Err(e) => {
                    debug!("{}", e);
                    break;
                }
            };
            let has_padding = buf[0] & 0b00_1_00000 > 0;
            let full_length = header.length_words() * 4;

            if full_length > buf.len() {
                // this length is incorrect.
                break;
            }

            let unpadded_length = if has_padding {
                let pad = buf[full_length - 1] as usize;
                if full_length < pad {
                    debug!("buf.len() is less than padding: {} < {}", full_length, pad);
                    break;
                }
                full_length - pad
            } else {
                full_length
            };

            match (&buf[..unpadded_length]).try_into() {
                Ok(v) => feedback.push_back(v),
                Err(e) => debug!("{}", e),
            }

            buf = &buf[full_length..];
        }
    }

    /// Serialize the queued packets into `buf` as one compound packet.
    ///
    /// Stops before overflowing the buffer; packets that don't fit remain in
    /// the queue. `buf` must never be larger than [`MAX_IP_PACKET_SIZE`].
    pub fn write_packet(feedback: &mut VecDeque<Rtcp>, buf: &mut [u8]) -> usize {
        debug_assert!(buf.len() <= MAX_IP_PACKET_SIZE);

        if feedback.is_empty() {
            return 0;
        }

        // SR/RR first per RFC 3550 compound rules.
        feedback.make_contiguous().sort_by_key(Self::order_no);

        let total_len = buf.len();

        let mut offset = 0;
        while let Some(fb) = feedback.front() {
            let item_len = fb.length_words() * 4;

            let capacity = total_len - offset;
            if capacity < item_len {
                break;
            }

            let fb = feedback.pop_front().unwrap();
            let written = fb.write_to(&mut buf[offset..]);

            assert_eq!(
                written, item_len,
                "length_words equals write_to length: {fb:?}"
            );

            offset += item_len;
        }

        offset
    }

    fn order_no(&self) -> u8 {
        use Rtcp::*;
        match self {
            SenderReport(_) => 0,
            ReceiverReport(_) => 1,
            SourceDescription(_) => 2,
            Nack(_) => 3,
            CastFeedback(_) => 4,
            Remb(_) => 5,
            ExtendedReport(_) => 6,
            ReceiverLog(_) => 7,
        }
    }
}

impl RtcpPacket for Rtcp {
    fn header(&self) -> RtcpHeader {
        match self {
            Rtcp::SenderReport(v) => v.header(),
            Rtcp::ReceiverReport(v) => v.header(),
            Rtcp::ExtendedReport(v) => v.header(),
            Rtcp::SourceDescription(v) => v.header(),
            Rtcp::Nack(v) => v.header(),
            Rtcp::CastFeedback(v) => v.header(),
            Rtcp::ReceiverLog(v) => v.header(),
            Rtcp::Remb(v) => v.header(),
        }
    }

    fn length_words(&self) -> usize {
        match self {
            Rtcp::SenderReport(v) => v.length_words(),
            Rtcp::ReceiverReport(v) => v.length_words(),
            Rtcp::ExtendedReport(v) => v.length_words(),
            Rtcp::SourceDescription(v) => v.length_words(),
            Rtcp::Nack(v) => v.length_words(),
            Rtcp::CastFeedback(v) => v.length_words(),
            Rtcp::ReceiverLog(v) => v.length_words(),
            Rtcp::Remb(v) => v.length_words(),
        }
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        match self {
            Rtcp::SenderReport(v) => v.write_to(buf),
            Rtcp::ReceiverReport(v) => v.write_to(buf),
            Rtcp::ExtendedReport(v) => v.write_to(buf),
            Rtcp::SourceDescription(v) => v.write_to(buf),
            Rtcp::Nack(v) => v.write_to(buf),
            Rtcp::CastFeedback(v) => v.write_to(buf),
            Rtcp::ReceiverLog(v) => v.write_to(buf),
            Rtcp::Remb(v) => v.write_to(buf),
        }
    }
}

impl<'a> TryFrom<&'a [u8]> for Rtcp {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        let header: RtcpHeader = buf.try_into()?;

        // By constraining the length, all subparsing can go until they
        // exhaust the buffer length. This presupposes padding is removed
        // from the input.
        let buf = &buf[4..];

        Ok(match header.rtcp_type() {
            RtcpType::SenderReport => Rtcp::SenderReport(buf.try_into()?),
            RtcpType::ReceiverReport => Rtcp::ReceiverReport(buf.try_into()?),
            RtcpType::SourceDescription => Rtcp::SourceDescription(buf.try_into()?),
            RtcpType::Goodbye => return Err("Ignore RTCP type: Goodbye"),
            RtcpType::ApplicationDefined => Rtcp::ReceiverLog(buf.try_into()?),
            RtcpType::TransportLayerFeedback => Rtcp::Nack(buf.try_into()?),
            RtcpType::PayloadSpecificFeedback => {
                // Cast feedback and REMB share PSFB fmt 15, told apart by
                // their 4-byte magic after the two SSRC fields.
                if let Ok(cast) = CastMessage::try_from(buf) {
                    Rtcp::CastFeedback(cast)
                } else if let Ok(remb) = Remb::try_from(buf) {
                    Rtcp::Remb(remb)
                } else {
                    return Err("Unknown PSFB application block");
                }
            }
            RtcpType::ExtendedReport => Rtcp::ExtendedReport(buf.try_into()?),
        })
    }
}

/// Pad up to the next word (4 byte) boundary.
pub(crate) fn pad_bytes_to_word(n: usize) -> usize {
    let pad = 4 - n % 4;
    if pad == 4 {
        n
    } else {
        n + pad
    }
}
