use std::collections::VecDeque;

use crate::frame::FrameId;
use crate::packet::SendPacketVec;

/// Upper bound on frames the sender may have in flight without an ACK, and
/// thereby on how many frames storage may be configured to retain.
pub const MAX_UNACKED_FRAMES: usize = 120;

/// Bounded retention of the last N frames' packetized wire bytes, so NACKed
/// packets can be resent without re-encoding.
///
/// Frames are stored contiguously; storing frame `n` requires the previous
/// stored frame to be `n - 1`. Lookup is by the 8-bit wire frame id. A miss
/// means "too old to resend" and is a valid outcome, not an error.
#[derive(Debug)]
pub struct PacketStorage {
    max_stored_frames: usize,
    frames: VecDeque<SendPacketVec>,
    first_frame_id: FrameId,
    last_frame_id: FrameId,
}

impl PacketStorage {
    pub fn new(max_stored_frames: usize) -> Self {
        PacketStorage {
            max_stored_frames,
            frames: VecDeque::new(),
            first_frame_id: FrameId::default(),
            last_frame_id: FrameId::default(),
        }
    }

    /// Configuration check.
    pub fn is_valid(&self) -> bool {
        self.max_stored_frames > 0 && self.max_stored_frames <= MAX_UNACKED_FRAMES
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Append the packets of a newly sent frame, evicting the oldest frame
    /// once capacity is exceeded.
    ///
    /// Frame ids must arrive strictly by increments of 1. Violating that is a
    /// programming error in the caller, not a runtime condition.
    pub fn store_frame(&mut self, frame_id: FrameId, packets: SendPacketVec) {
        if self.frames.is_empty() {
            self.first_frame_id = frame_id;
        } else {
            debug_assert!(
                self.last_frame_id.is_next(frame_id),
                "stored frame ids must be contiguous: {} then {}",
                self.last_frame_id,
                frame_id
            );
        }
        self.last_frame_id = frame_id;

        self.frames.push_back(packets);
        if self.frames.len() > self.max_stored_frames {
            self.frames.pop_front();
            self.first_frame_id = self.first_frame_id.next();
        }
    }

    /// Look up a stored frame by its 8-bit wire id.
    ///
    /// The index math wraps at 8 bits, so a requested id more than 255 frames
    /// away from the oldest stored frame can alias onto a stored one. With the
    /// capacity bounded by [`MAX_UNACKED_FRAMES`] and feedback bounded to the
    /// unacked window, such skew does not occur in practice.
    pub fn get_frame8(&self, frame_id_8bits: u8) -> Option<&SendPacketVec> {
        let index = frame_id_8bits.wrapping_sub(self.first_frame_id.lower_8());
        self.frames.get(index as usize)
    }
}
