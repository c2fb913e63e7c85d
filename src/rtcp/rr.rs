use super::{FeedbackMessageType, RtcpHeader, RtcpPacket, RtcpType, Ssrc};

/// A report of packets received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceiverReport {
    /// The SSRC of the RR originator.
    pub sender_ssrc: Ssrc,
    /// Reception statistics for the stream being reported on. Absent when
    /// the report is only sent to keep the RTCP session alive.
    pub report: Option<ReportBlock>,
}

/// Reception statistics for one stream.
///
/// See [RFC 3550 6.4.2](https://www.rfc-editor.org/rfc/rfc3550#section-6.4.2)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportBlock {
    /// The stream the report concerns.
    pub ssrc: Ssrc,
    /// Fraction of packets lost since the previous report, as a fixed point
    /// number with the binary point at the left edge.
    pub fraction_lost: u8,
    /// Total packets lost over the lifetime of the stream. 24 bits on the
    /// wire.
    pub cumulative_lost: u32,
    /// Extended highest sequence number received.
    pub extended_high_seq: u32,
    /// Interarrival jitter in timestamp units.
    pub jitter: u32,
    /// Middle 32 bits of the NTP timestamp from the most recent SR.
    pub last_sr: u32,
    /// Delay between receiving that SR and sending this block, in 1/65536
    /// second units.
    pub delay_since_last_sr: u32,
}

impl RtcpPacket for ReceiverReport {
    fn header(&self) -> RtcpHeader {
        RtcpHeader {
            rtcp_type: RtcpType::ReceiverReport,
            feedback_message_type: FeedbackMessageType::ReceptionReport(
                self.report.iter().count() as u8,
            ),
            words_less_one: (self.length_words() - 1) as u16,
        }
    }

    fn length_words(&self) -> usize {
        // * header: 1
        // * sender ssrc: 1
        // * report block: 6
        1 + 1 + 6 * self.report.iter().count()
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);

        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());

        if let Some(r) = &self.report {
            r.write_to(&mut buf[8..]);
        }

        self.length_words() * 4
    }
}

impl ReportBlock {
    pub(crate) fn write_to(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.ssrc.to_be_bytes());

        buf[4] = self.fraction_lost;
        buf[5..8].copy_from_slice(&self.cumulative_lost.to_be_bytes()[1..]);

        buf[8..12].copy_from_slice(&self.extended_high_seq.to_be_bytes());
        buf[12..16].copy_from_slice(&self.jitter.to_be_bytes());
        buf[16..20].copy_from_slice(&self.last_sr.to_be_bytes());
        buf[20..24].copy_from_slice(&self.delay_since_last_sr.to_be_bytes());
    }
}

impl<'a> TryFrom<&'a [u8]> for ReceiverReport {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 4 {
            return Err("Less than 4 bytes for ReceiverReport");
        }

        let sender_ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();

        let report = if buf.len() >= 4 + 24 {
            Some((&buf[4..]).try_into()?)
        } else {
            None
        };

        Ok(ReceiverReport { sender_ssrc, report })
    }
}

impl<'a> TryFrom<&'a [u8]> for ReportBlock {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 24 {
            return Err("Less than 24 bytes for ReportBlock");
        }

        let ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();

        let fraction_lost = buf[4];
        let cumulative_lost = u32::from_be_bytes([0, buf[5], buf[6], buf[7]]);

        let extended_high_seq = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let jitter = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let last_sr = u32::from_be_bytes([buf[16], buf[17], buf[18], buf[19]]);
        let delay_since_last_sr = u32::from_be_bytes([buf[20], buf[21], buf[22], buf[23]]);

        Ok(ReportBlock {
            ssrc,
            fraction_lost,
            cumulative_lost,
            extended_high_seq,
            jitter,
            last_sr,
            delay_since_last_sr,
        })
    }
}
