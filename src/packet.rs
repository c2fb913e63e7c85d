use std::sync::Arc;
use std::time::Instant;

use crate::id::Ssrc;

/// Identity of one packet instance for the lifetime of the stream.
///
/// Resends reuse the key of the original send (for deduplication) even though
/// they go out with a fresh wire sequence number. The derived ordering,
/// capture time first, is what gives the pacer queue its oldest-first drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PacketKey {
    /// Wall-clock capture time of the frame the packet belongs to.
    pub capture_time: Instant,
    /// Stream the packet belongs to.
    pub ssrc: Ssrc,
    /// Position of the packet within its frame.
    pub packet_id: u16,
}

/// A serialized wire packet, shared between packet storage and in-flight
/// queues without copying.
///
/// Mutation (the sequence-number rewrite before a resend) goes through
/// [`PacketRef::to_mut`], which deep-copies only when another holder exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketRef(Arc<Vec<u8>>);

impl PacketRef {
    pub fn new(data: Vec<u8>) -> Self {
        PacketRef(Arc::new(data))
    }

    /// The packet bytes.
    pub fn data(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Mutable access with copy-on-write. Fast path when this is the only
    /// holder, deep copy otherwise so other holders keep the original bytes.
    pub fn to_mut(&mut self) -> &mut Vec<u8> {
        Arc::make_mut(&mut self.0)
    }
}

impl From<Vec<u8>> for PacketRef {
    fn from(v: Vec<u8>) -> Self {
        PacketRef::new(v)
    }
}

/// Why a packet is in the pacer queue. RTCP has its own queue and never
/// appears here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    Resend,
    Normal,
}

/// All packets of one frame, in packet-id order.
pub type SendPacketVec = Vec<(PacketKey, PacketRef)>;

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Duration;

    #[test]
    fn key_order_is_capture_time_first() {
        let epoch = Instant::now();
        let k = |ms: u64, packet_id: u16| PacketKey {
            capture_time: epoch + Duration::from_millis(ms),
            ssrc: 7.into(),
            packet_id,
        };

        assert!(k(1, 9) < k(2, 0));
        assert!(k(1, 0) < k(1, 1));
    }

    #[test]
    fn copy_on_write() {
        let mut a = PacketRef::new(vec![1, 2, 3]);
        let b = a.clone();

        a.to_mut()[0] = 9;

        assert_eq!(a.data(), &[9, 2, 3]);
        assert_eq!(b.data(), &[1, 2, 3]);
    }
}
