use std::time::Instant;

use crate::time::InstantExt;

use super::{FeedbackMessageType, ReportBlock, RtcpHeader, RtcpPacket, RtcpType, Ssrc};

/// A report of packets sent, carrying the NTP/RTP timestamp pair receivers
/// use for lip sync.
///
/// See [RFC 3550 6.4.1](https://www.rfc-editor.org/rfc/rfc3550#section-6.4.1)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderReport {
    /// The SSRC of the SR originator.
    pub ssrc: Ssrc,
    /// Wallclock time the report describes, written as a 64 bit NTP
    /// timestamp on the wire.
    pub ntp_time: Instant,
    /// The RTP timestamp corresponding to the same point in time as
    /// `ntp_time`, in the stream's clock rate.
    pub rtp_timestamp: u32,
    /// Total number of packets sent so far on the stream.
    pub sender_packet_count: u32,
    /// Total number of payload octets sent so far on the stream.
    pub sender_octet_count: u32,
    /// A sender report is implicitly also a receiver report. A sender that
    /// also receives media can piggyback one reception report.
    pub report: Option<ReportBlock>,
}

impl RtcpPacket for SenderReport {
    fn header(&self) -> RtcpHeader {
        RtcpHeader {
            rtcp_type: RtcpType::SenderReport,
            feedback_message_type: FeedbackMessageType::ReceptionReport(
                self.report.iter().count() as u8,
            ),
            words_less_one: (self.length_words() - 1) as u16,
        }
    }

    fn length_words(&self) -> usize {
        // * header: 1
        // * sender info: 6
        // * report block: 6
        1 + 6 + 6 * self.report.iter().count()
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);

        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());
        buf[8..16].copy_from_slice(&self.ntp_time.as_ntp_64().to_be_bytes());
        buf[16..20].copy_from_slice(&self.rtp_timestamp.to_be_bytes());
        buf[20..24].copy_from_slice(&self.sender_packet_count.to_be_bytes());
        buf[24..28].copy_from_slice(&self.sender_octet_count.to_be_bytes());

        if let Some(r) = &self.report {
            r.write_to(&mut buf[28..]);
        }

        self.length_words() * 4
    }
}

impl<'a> TryFrom<&'a [u8]> for SenderReport {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 24 {
            return Err("Less than 24 bytes for SenderReport");
        }

        let ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();

        let ntp = u64::from_be_bytes([
            buf[4], buf[5], buf[6], buf[7], buf[8], buf[9], buf[10], buf[11],
        ]);
        let ntp_time = Instant::from_ntp_64(ntp);

        let rtp_timestamp = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let sender_packet_count = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let sender_octet_count = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);

        let report = if buf.len() >= 24 + 24 {
            Some((&buf[24..]).try_into()?)
        } else {
            None
        };

        Ok(SenderReport {
            ssrc,
            ntp_time,
            rtp_timestamp,
            sender_packet_count,
            sender_octet_count,
            report,
        })
    }
}
