use super::{FeedbackMessageType, RtcpHeader, RtcpPacket, RtcpType, Ssrc, TransportType};

/// Ceiling on pid/blp entries per packet, keeping the serialized form well
/// under one UDP datagram.
pub(crate) const MAX_NACK_ENTRIES: usize = 253;

/// Generic NACK reporting missing RTP sequence numbers.
///
/// Definition: <https://www.rfc-editor.org/rfc/rfc4585#section-6.2.1>
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nack {
    /// Sender of this feedback. Mostly irrelevant, but part of RTCP packets.
    pub sender_ssrc: Ssrc,
    /// The SSRC this nack reports missing packets for.
    pub ssrc: Ssrc,
    /// The missing ranges. This can be multiple segments.
    pub entries: Vec<NackEntry>,
}

/// A range of sequence numbers missing. `pid` is the first missing number,
/// each set bit `i` in `blp` marks `pid + i + 1` as also missing.
#[allow(missing_docs)]
#[derive(Debug, PartialEq, Eq, Default, Clone, Copy)]
pub struct NackEntry {
    pub pid: u16,
    pub blp: u16,
}

impl Nack {
    /// Pack a list of missing sequence numbers into pid/blp entries. The
    /// input must be sorted ascending. At most 253 entries are kept so the
    /// packet stays within one datagram; later numbers are dropped.
    pub fn new(sender_ssrc: Ssrc, ssrc: Ssrc, missing: &[u16]) -> Self {
        let mut entries: Vec<NackEntry> = Vec::new();

        for &seq in missing {
            if let Some(last) = entries.last_mut() {
                let offset = seq.wrapping_sub(last.pid);
                if offset >= 1 && offset <= 16 {
                    last.blp |= 1 << (offset - 1);
                    continue;
                }
            }
            if entries.len() >= MAX_NACK_ENTRIES {
                break;
            }
            entries.push(NackEntry { pid: seq, blp: 0 });
        }

        Nack {
            sender_ssrc,
            ssrc,
            entries,
        }
    }

    /// All missing sequence numbers, expanded from the pid/blp encoding.
    pub fn iter_sequence_numbers(&self) -> impl Iterator<Item = u16> + '_ {
        self.entries.iter().flat_map(|e| e.iter())
    }
}

impl NackEntry {
    /// Iterator over the sequence numbers this entry marks missing.
    pub fn iter(&self) -> impl Iterator<Item = u16> {
        NackEntryIterator(*self, 0)
    }
}

pub struct NackEntryIterator(NackEntry, u16);

impl Iterator for NackEntryIterator {
    type Item = u16;

    fn next(&mut self) -> Option<Self::Item> {
        if self.1 == 0 {
            self.1 += 1;
            return Some(self.0.pid);
        }
        loop {
            if self.1 >= 17 {
                return None;
            }
            let i = self.1 - 1;
            self.1 += 1;
            if 1 << i & self.0.blp > 0 {
                return Some(self.0.pid.wrapping_add(self.1 - 1));
            }
        }
    }
}

impl RtcpPacket for Nack {
    fn header(&self) -> RtcpHeader {
        RtcpHeader {
            rtcp_type: RtcpType::TransportLayerFeedback,
            feedback_message_type: FeedbackMessageType::TransportFeedback(TransportType::Nack),
            words_less_one: (self.length_words() - 1) as u16,
        }
    }

    fn length_words(&self) -> usize {
        // header
        // sender SSRC
        // media SSRC
        // 1 word per entry
        1 + 2 + self.entries.len()
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(&mut buf[..4]);
        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        let mut buf = &mut buf[12..];
        for e in &self.entries {
            buf[0..2].copy_from_slice(&e.pid.to_be_bytes());
            buf[2..4].copy_from_slice(&e.blp.to_be_bytes());
            buf = &mut buf[4..];
        }
        self.length_words() * 4
    }
}

impl<'a> TryFrom<&'a [u8]> for Nack {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 12 {
            return Err("Nack less than 12 bytes");
        }

        let sender_ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();
        let ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]).into();

        let mut entries = Vec::new();

        let mut buf = &buf[8..];
        let count = buf.len() / 4;

        for _ in 0..count {
            let pid = u16::from_be_bytes([buf[0], buf[1]]);
            let blp = u16::from_be_bytes([buf[2], buf[3]]);
            entries.push(NackEntry { pid, blp });
            buf = &buf[4..];
        }

        Ok(Nack {
            sender_ssrc,
            ssrc,
            entries,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn coalesce_into_blp() {
        // 100 and 101, 103, 116 fit one entry. 117 starts a new one.
        let nack = Nack::new(1.into(), 2.into(), &[100, 101, 103, 116, 117]);

        assert_eq!(
            nack.entries,
            vec![
                NackEntry {
                    pid: 100,
                    blp: 0b1000_0000_0000_0101
                },
                NackEntry { pid: 117, blp: 0 }
            ]
        );

        let expanded: Vec<_> = nack.iter_sequence_numbers().collect();
        assert_eq!(expanded, vec![100, 101, 103, 116, 117]);
    }

    #[test]
    fn entry_iter_wraps_u16() {
        let entry = NackEntry {
            pid: 0xfffe,
            blp: 0b0000_0000_0000_0011,
        };
        let seqs: Vec<_> = entry.iter().collect();
        assert_eq!(seqs, vec![0xfffe, 0xffff, 0]);
    }

    #[test]
    fn entry_ceiling_bounds_packet_size() {
        // 800 sequence numbers too far apart to coalesce.
        let missing: Vec<u16> = (0..800).map(|i| i * 20).collect();
        let nack = Nack::new(1.into(), 2.into(), &missing);

        assert_eq!(nack.entries.len(), MAX_NACK_ENTRIES);
        assert!(nack.length_words() * 4 <= super::super::MAX_IP_PACKET_SIZE);
    }

    #[test]
    fn roundtrip() {
        let nack = Nack::new(1.into(), 2.into(), &[5, 6, 30]);

        let mut buf = vec![0_u8; nack.length_words() * 4];
        nack.write_to(&mut buf);

        let parsed: Nack = (&buf[4..]).try_into().unwrap();
        assert_eq!(parsed, nack);
    }
}
