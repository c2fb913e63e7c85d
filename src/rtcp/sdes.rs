use super::{pad_bytes_to_word, FeedbackMessageType, RtcpHeader, RtcpPacket, RtcpType, Ssrc};

/// Source description. Only the CNAME item is used; it binds the SSRC to a
/// stable endpoint name across restarts.
///
/// See [RFC 3550 6.5](https://www.rfc-editor.org/rfc/rfc3550#section-6.5)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sdes {
    pub ssrc: Ssrc,
    pub cname: String,
}

const SDES_CNAME: u8 = 1;

impl RtcpPacket for Sdes {
    fn header(&self) -> RtcpHeader {
        RtcpHeader {
            rtcp_type: RtcpType::SourceDescription,
            feedback_message_type: FeedbackMessageType::SourceCount(1),
            words_less_one: (self.length_words() - 1) as u16,
        }
    }

    fn length_words(&self) -> usize {
        // * header: 1
        // * ssrc: 1
        // * item type + length + value, END byte, zero padded to word boundary
        let chunk = pad_bytes_to_word(2 + self.cname.len() + 1);
        1 + 1 + chunk / 4
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        self.header().write_to(buf);

        buf[4..8].copy_from_slice(&self.ssrc.to_be_bytes());

        let len = self.cname.len();
        assert!(len <= 255, "cname must fit one sdes item");

        buf[8] = SDES_CNAME;
        buf[9] = len as u8;
        buf[10..10 + len].copy_from_slice(self.cname.as_bytes());

        // END item and zero padding up to the word boundary.
        let end = pad_bytes_to_word(10 + len + 1);
        for b in &mut buf[10 + len..end] {
            *b = 0;
        }

        self.length_words() * 4
    }
}

impl<'a> TryFrom<&'a [u8]> for Sdes {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 6 {
            return Err("Less than 6 bytes for Sdes");
        }

        let ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();

        if buf[4] != SDES_CNAME {
            return Err("Sdes without leading CNAME item");
        }

        let len = buf[5] as usize;
        if buf.len() < 6 + len {
            return Err("Sdes CNAME length exceeds buffer");
        }

        let cname = String::from_utf8_lossy(&buf[6..6 + len]).into_owned();

        Ok(Sdes { ssrc, cname })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let sdes = Sdes {
            ssrc: 0x1234_5678.into(),
            cname: "sender@host".into(),
        };

        let mut buf = vec![0_u8; sdes.length_words() * 4];
        let n = sdes.write_to(&mut buf);
        assert_eq!(n % 4, 0);

        let parsed: Sdes = (&buf[4..]).try_into().unwrap();
        assert_eq!(parsed, sdes);
    }

    #[test]
    fn padding_always_terminates_chunk() {
        // A cname length that lands exactly on a word boundary still gets a
        // full extra word for the END byte.
        let sdes = Sdes {
            ssrc: 1.into(),
            cname: "ab".into(), // 2 + 2 + 1 = 5 -> padded to 8
        };
        assert_eq!(sdes.length_words(), 4);
    }
}
