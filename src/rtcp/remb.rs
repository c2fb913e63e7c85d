use crate::id::Ssrc;

use super::{FeedbackMessageType, PayloadType, RtcpHeader, RtcpPacket, RtcpType};

/// Largest encodable bitrate: mantissa 0x3ffff at exponent 63.
const BITRATE_MAX: f32 = 2.417_842_4e24;

const REMB_MAGIC: [u8; 4] = [b'R', b'E', b'M', b'B'];

//  0                   1                   2                   3
//  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |V=2|P| FMT=15  |   PT=206      |             length            |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                  SSRC of packet sender                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |             SSRC of media source (always zero)                |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  'R'          |  'E'          |  'M'          |  'B'          |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  Num SSRC     | BR Exp    |  BR Mantissa                      |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |                          SSRC feedback                        |
// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
// |  ...                                                          |

/// Receiver Estimated Maximum Bitrate. The receiver's cap on what the
/// encoder should produce. Shares PSFB fmt 15 with the CAST feedback
/// block, told apart by the magic value.
#[derive(Debug, Clone)]
pub struct Remb {
    /// SSRC of the feedback sender.
    pub sender_ssrc: Ssrc,

    /// Estimated maximum bitrate in bits per second.
    pub bitrate: f32,

    /// Streams the estimate applies to.
    pub ssrcs: Vec<Ssrc>,
}

impl Eq for Remb {}
impl PartialEq for Remb {
    fn eq(&self, other: &Self) -> bool {
        self.sender_ssrc == other.sender_ssrc
            && (self.bitrate as u64) == (other.bitrate as u64)
            && self.ssrcs == other.ssrcs
    }
}

impl RtcpPacket for Remb {
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
        // * 'REMB': 1
        // * num ssrc + bitrate: 1
        // * 1 word per ssrc
        1 + 2 + 1 + 1 + self.ssrcs.len()
    }

    fn write_to(&self, buf: &mut [u8]) -> usize {
        // The bitrate is 6 bits of exponent and 18 bits of mantissa: halve
        // until the mantissa fits, counting halvings in the exponent.
        let mut exp = 0_u8;
        let mut bitrate = self.bitrate.clamp(0.0, BITRATE_MAX);
        while bitrate >= (1 << 18) as f32 {
            bitrate /= 2.0;
            exp += 1;
        }
        let mantissa = bitrate.floor() as u32;

        self.header().write_to(buf);
        buf[4..8].copy_from_slice(&self.sender_ssrc.to_be_bytes());
        buf[8..12].copy_from_slice(&[0; 4]);
        buf[12..16].copy_from_slice(&REMB_MAGIC);

        buf[16] = self.ssrcs.len() as u8;
        buf[17] = exp << 2 | (mantissa >> 16) as u8;
        buf[18] = (mantissa >> 8) as u8;
        buf[19] = mantissa as u8;

        let mut buf = &mut buf[20..];
        for ssrc in &self.ssrcs {
            buf[0..4].copy_from_slice(&ssrc.to_be_bytes());
            buf = &mut buf[4..];
        }

        self.length_words() * 4
    }
}

impl<'a> TryFrom<&'a [u8]> for Remb {
    type Error = &'static str;

    fn try_from(buf: &'a [u8]) -> Result<Self, Self::Error> {
        if buf.len() < 16 {
            return Err("Less than 16 bytes for Remb");
        }

        let sender_ssrc = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]).into();
        let media_ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if media_ssrc != 0 {
            return Err("Remb media ssrc must be zero");
        }

        if buf[8..12] != REMB_MAGIC {
            return Err("Not a REMB block");
        }

        let ssrcs_len = buf[12] as usize;
        if buf.len() < 16 + ssrcs_len * 4 {
            return Err("Remb ssrcs exceed buffer");
        }

        // Mantissa times a power of two is exact in f32 as long as the
        // mantissa fits 24 bits, and the wire format only carries 18.
        let exp = buf[13] >> 2;
        let mantissa = ((buf[13] & 0b11) as u32) << 16 | (buf[14] as u32) << 8 | buf[15] as u32;
        let bitrate = mantissa as f32 * 2_f32.powi(exp as i32);

        let mut ssrcs = Vec::with_capacity(ssrcs_len);
        for i in 0..ssrcs_len {
            let b = 16 + i * 4;
            ssrcs.push(u32::from_be_bytes([buf[b], buf[b + 1], buf[b + 2], buf[b + 3]]).into());
        }

        Ok(Remb {
            sender_ssrc,
            bitrate,
            ssrcs,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn roundtrip() {
        let remb = Remb {
            sender_ssrc: 7.into(),
            bitrate: 2_500_000.0,
            ssrcs: vec![0x1234_5678.into()],
        };

        // 2_500_000 = 156_250 * 2^4.
        let expected = [
            143, 206, 0, 5, 0, 0, 0, 7, 0, 0, 0, 0, 82, 69, 77, 66, 1, 18, 98, 90, 18, 52, 86,
            120,
        ];

        let mut buf = vec![0_u8; remb.length_words() * 4];
        let n = remb.write_to(&mut buf);
        assert_eq!(n, remb.length_words() * 4);
        assert_eq!(buf, expected);

        let parsed: Remb = (&buf[4..]).try_into().unwrap();
        assert_eq!(parsed, remb);
    }

    #[test]
    fn bitrate_over_ceiling_saturates() {
        let remb = Remb {
            sender_ssrc: 9.into(),
            bitrate: f32::MAX,
            ssrcs: vec![],
        };

        // Clamped to mantissa 0x3ffff at exponent 63.
        let expected = [
            143, 206, 0, 4, 0, 0, 0, 9, 0, 0, 0, 0, 82, 69, 77, 66, 0, 255, 255, 255,
        ];

        let mut buf = vec![0_u8; remb.length_words() * 4];
        remb.write_to(&mut buf);
        assert_eq!(buf, expected);

        // The clamped value survives another encode unchanged.
        let parsed: Remb = (&buf[4..]).try_into().unwrap();
        let mut buf2 = vec![0_u8; parsed.length_words() * 4];
        parsed.write_to(&mut buf2);
        assert_eq!(buf2, expected);
    }

    #[test]
    fn rejects_wrong_magic() {
        let remb = Remb {
            sender_ssrc: 1.into(),
            bitrate: 1000.0,
            ssrcs: vec![],
        };

        let mut buf = vec![0_u8; remb.length_words() * 4];
        remb.write_to(&mut buf);
        buf[12] = b'X';

        assert!(Remb::try_from(&buf[4..]).is_err());
    }
}
