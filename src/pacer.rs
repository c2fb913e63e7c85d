use std::collections::{BTreeMap, VecDeque};
use std::mem;
use std::time::{Duration, Instant};

use crate::id::Ssrc;
use crate::packet::{PacketKey, PacketRef, PacketType};

/// Outcome of handing one packet to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// The packet was written out.
    Sent,
    /// The transport took this packet but can accept no more until it signals
    /// writable again (via [`PacedSender::transport_unblocked`]).
    Blocked,
}

/// The non-blocking packet transport underneath the pacer.
///
/// Implementations wrap a UDP socket (or a test double). A `Blocked` return
/// MUST eventually be followed by exactly one call to
/// [`PacedSender::transport_unblocked`].
pub trait PacketSender {
    fn send_packet(&mut self, packet: &PacketRef) -> SendOutcome;
}

/// Tuning for the burst pacing. The burst constants are empirical; treat them
/// as knobs, not derived values.
#[derive(Debug, Clone)]
pub struct PacerConfig {
    /// Length of one pacing time slice.
    pub pacing_interval: Duration,
    /// Burst size the pacer aims for in the steady state.
    pub target_burst_size: usize,
    /// Hard ceiling on packets per burst.
    pub max_burst_size: usize,
    /// A queue backlog is spread over this many bursts.
    pub max_bursts_per_frame: usize,
    /// Longest dedupe window callers may ask for. Bounds the sent-time
    /// history size.
    pub max_dedupe_window: Duration,
}

impl Default for PacerConfig {
    fn default() -> Self {
        PacerConfig {
            pacing_interval: Duration::from_millis(10),
            target_burst_size: 10,
            max_burst_size: 20,
            max_bursts_per_frame: 3,
            max_dedupe_window: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    /// May drain the queue right away.
    Unblocked,
    /// The transport said "would block"; idle until `transport_unblocked`.
    TransportBlocked,
    /// This time slice's quota is used up; idle until the burst ends.
    BurstFull,
}

/// Levels outgoing packets into timed bursts so the OS/network buffers are
/// not overrun, prioritizes RTCP, and deduplicates repeated resends.
///
/// Sans-IO: nothing here blocks or sleeps. When the pacer needs to wake up
/// later, [`PacedSender::poll_timeout`] says when, and the owner calls
/// [`PacedSender::handle_timeout`] at (or after) that time.
#[derive(Debug)]
pub struct PacedSender {
    config: PacerConfig,

    /// Pending RTP packets. Key order (capture time first) gives the
    /// oldest-first drain; inserting an existing key replaces, never
    /// duplicates.
    queue: BTreeMap<PacketKey, (PacketType, PacketRef)>,

    /// RTCP held back while the transport is blocked. Always drained ahead of
    /// the RTP queue.
    rtcp_queue: VecDeque<PacketRef>,

    state: State,

    burst_end: Option<Instant>,
    current_burst_size: usize,
    current_max_burst_size: usize,
    next_max_burst_size: usize,
    next_next_max_burst_size: usize,

    /// When each key was last given to the transport. Double-buffered with
    /// `sent_time_buffer` to bound memory while still covering the longest
    /// dedupe window.
    sent_time: BTreeMap<PacketKey, Instant>,
    sent_time_buffer: BTreeMap<PacketKey, Instant>,
}

impl PacedSender {
    pub fn new(config: PacerConfig) -> Self {
        let target = config.target_burst_size;
        PacedSender {
            config,
            queue: BTreeMap::new(),
            rtcp_queue: VecDeque::new(),
            state: State::Unblocked,
            burst_end: None,
            current_burst_size: 0,
            current_max_burst_size: target,
            next_max_burst_size: target,
            next_next_max_burst_size: target,
            sent_time: BTreeMap::new(),
            sent_time_buffer: BTreeMap::new(),
        }
    }

    /// Number of packets waiting (RTP and RTCP).
    pub fn queue_len(&self) -> usize {
        self.queue.len() + self.rtcp_queue.len()
    }

    /// Enqueue freshly packetized media packets and drain if possible.
    pub fn send_packets(
        &mut self,
        packets: Vec<(PacketKey, PacketRef)>,
        now: Instant,
        transport: &mut dyn PacketSender,
    ) {
        for (key, packet) in packets {
            self.queue.insert(key, (PacketType::Normal, packet));
        }
        if self.state == State::Unblocked {
            self.send_stored_packets(now, transport);
        }
    }

    /// Enqueue retransmissions, rejecting any packet already handed to the
    /// transport within `dedupe_window`. This is what keeps overlapping NACKs
    /// for the same packet from turning into retransmission storms.
    pub fn resend_packets(
        &mut self,
        packets: Vec<(PacketKey, PacketRef)>,
        dedupe_window: Duration,
        now: Instant,
        transport: &mut dyn PacketSender,
    ) {
        for (key, packet) in packets {
            if let Some(sent) = self.last_sent_time(&key) {
                if now.saturating_duration_since(sent) < dedupe_window {
                    debug!("Rejecting resend within dedupe window: {:?}", key);
                    continue;
                }
            }
            self.queue.insert(key, (PacketType::Resend, packet));
        }
        if self.state == State::Unblocked {
            self.send_stored_packets(now, transport);
        }
    }

    /// RTCP is highest priority. Unless the transport is blocked it goes out
    /// immediately, bypassing burst accounting.
    pub fn send_rtcp_packet(
        &mut self,
        ssrc: Ssrc,
        packet: PacketRef,
        transport: &mut dyn PacketSender,
    ) {
        if self.state == State::TransportBlocked {
            self.rtcp_queue.push_back(packet);
            return;
        }

        trace!("Sending RTCP for ssrc: {}", ssrc);
        if transport.send_packet(&packet) == SendOutcome::Blocked {
            self.state = State::TransportBlocked;
        }
    }

    /// Remove a pending, not-yet-sent packet. No-op if already sent or never
    /// enqueued.
    pub fn cancel_sending_packet(&mut self, key: &PacketKey) {
        self.queue.remove(key);
    }

    /// The transport is writable again after a `Blocked` outcome.
    pub fn transport_unblocked(&mut self, now: Instant, transport: &mut dyn PacketSender) {
        if self.state == State::TransportBlocked {
            self.state = State::Unblocked;
        }
        self.send_stored_packets(now, transport);
    }

    /// When the owner must call [`PacedSender::handle_timeout`] next.
    pub fn poll_timeout(&self) -> Option<Instant> {
        if self.state == State::BurstFull {
            self.burst_end
        } else {
            None
        }
    }

    /// Drive time forward. A no-op drain attempt when the queue emptied in
    /// the meantime.
    pub fn handle_timeout(&mut self, now: Instant, transport: &mut dyn PacketSender) {
        if self.state == State::BurstFull {
            let ended = self.burst_end.map(|end| now >= end).unwrap_or(true);
            if ended {
                self.state = State::Unblocked;
            }
        }
        if self.state == State::Unblocked {
            self.send_stored_packets(now, transport);
        }
    }

    fn last_sent_time(&self, key: &PacketKey) -> Option<Instant> {
        self.sent_time
            .get(key)
            .or_else(|| self.sent_time_buffer.get(key))
            .copied()
    }

    fn note_sent(&mut self, key: PacketKey, now: Instant) {
        self.sent_time.insert(key, now);

        // Swap/clear keeps entries at most twice the bound while every send
        // in the last max_dedupe_window stays visible to last_sent_time.
        if self.sent_time.len() >= self.max_dedupe_entries() {
            mem::swap(&mut self.sent_time, &mut self.sent_time_buffer);
            self.sent_time.clear();
        }
    }

    fn max_dedupe_entries(&self) -> usize {
        let windows =
            self.config.max_dedupe_window.as_millis() / self.config.pacing_interval.as_millis();
        self.config.max_burst_size * windows.max(1) as usize
    }

    fn compute_max_burst_size(&self) -> usize {
        let spread = self.queue.len() / self.config.max_bursts_per_frame;
        spread.clamp(self.config.target_burst_size, self.config.max_burst_size)
    }

    fn send_stored_packets(&mut self, now: Instant, transport: &mut dyn PacketSender) {
        if self.state == State::TransportBlocked {
            return;
        }
        if self.state == State::BurstFull {
            // Waiting for the burst window to pass; handle_timeout re-enters.
            return;
        }

        loop {
            let in_burst = self.burst_end.map(|end| now < end).unwrap_or(false);
            if !in_burst {
                // Start a new time slice. Burst size grows immediately with
                // the backlog but decays over the two lookahead slots, so a
                // transient spike doesn't collapse the send rate right after.
                let computed = self.compute_max_burst_size();
                self.current_burst_size = 0;
                self.burst_end = Some(now + self.config.pacing_interval);
                self.current_max_burst_size = self.next_max_burst_size.max(computed);
                self.next_max_burst_size = self.next_next_max_burst_size.max(computed);
                self.next_next_max_burst_size = computed;
            }

            if self.rtcp_queue.is_empty() && self.queue.is_empty() {
                return;
            }

            if self.current_burst_size >= self.current_max_burst_size {
                self.state = State::BurstFull;
                return;
            }

            // RTCP ahead of the RTP queue; RTP in key (oldest-first) order.
            let (key, packet) = if let Some(packet) = self.rtcp_queue.pop_front() {
                (None, packet)
            } else {
                let key = *self.queue.keys().next().expect("non-empty queue");
                let (packet_type, packet) = self.queue.remove(&key).expect("key just observed");
                trace!("Sending {:?} packet: {:?}", packet_type, key);
                (Some(key), packet)
            };

            let outcome = transport.send_packet(&packet);
            self.current_burst_size += 1;
            if let Some(key) = key {
                self.note_sent(key, now);
            }

            if outcome == SendOutcome::Blocked {
                self.state = State::TransportBlocked;
                return;
            }
        }
    }
}

impl Default for PacedSender {
    fn default() -> Self {
        PacedSender::new(PacerConfig::default())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[derive(Default)]
    struct MockTransport {
        sent: Vec<PacketRef>,
        block_after: Option<usize>,
    }

    impl PacketSender for MockTransport {
        fn send_packet(&mut self, packet: &PacketRef) -> SendOutcome {
            self.sent.push(packet.clone());
            match self.block_after {
                Some(n) if self.sent.len() >= n => SendOutcome::Blocked,
                _ => SendOutcome::Sent,
            }
        }
    }

    fn key(epoch: Instant, ms: u64, packet_id: u16) -> PacketKey {
        PacketKey {
            capture_time: epoch + Duration::from_millis(ms),
            ssrc: 1.into(),
            packet_id,
        }
    }

    fn packets(epoch: Instant, n: usize) -> Vec<(PacketKey, PacketRef)> {
        (0..n)
            .map(|i| {
                (
                    key(epoch, 0, i as u16),
                    PacketRef::new(vec![i as u8; 10]),
                )
            })
            .collect()
    }

    #[test]
    fn burst_quota_enforced() {
        let epoch = Instant::now();
        let mut pacer = PacedSender::default();
        let mut transport = MockTransport::default();

        pacer.send_packets(packets(epoch, 25), epoch, &mut transport);

        // First burst: steady-state size.
        assert_eq!(transport.sent.len(), 10);

        let t1 = pacer.poll_timeout().expect("burst full timer");
        assert_eq!(t1, epoch + Duration::from_millis(10));

        pacer.handle_timeout(t1, &mut transport);
        assert_eq!(transport.sent.len(), 20);

        let t2 = pacer.poll_timeout().unwrap();
        pacer.handle_timeout(t2, &mut transport);
        assert_eq!(transport.sent.len(), 25);

        // Queue drained within ceil(25 / 10) = 3 bursts.
        assert_eq!(pacer.queue_len(), 0);
        assert!(pacer.poll_timeout().is_none());
    }

    #[test]
    fn oldest_capture_time_first() {
        let epoch = Instant::now();
        let mut pacer = PacedSender::default();
        let mut transport = MockTransport::default();

        let newer = (key(epoch, 50, 0), PacketRef::new(vec![2]));
        let older = (key(epoch, 10, 0), PacketRef::new(vec![1]));

        pacer.send_packets(vec![newer, older], epoch + Duration::from_millis(60), &mut transport);

        assert_eq!(transport.sent[0].data(), &[1]);
        assert_eq!(transport.sent[1].data(), &[2]);
    }

    #[test]
    fn dedupe_window_rejects_repeat_resend() {
        let epoch = Instant::now();
        let mut pacer = PacedSender::default();
        let mut transport = MockTransport::default();

        let window = Duration::from_millis(500);
        let p = vec![(key(epoch, 0, 0), PacketRef::new(vec![7]))];

        pacer.resend_packets(p.clone(), window, epoch, &mut transport);
        assert_eq!(transport.sent.len(), 1);

        // Second request within the window: zero additional sends.
        let later = epoch + Duration::from_millis(100);
        pacer.resend_packets(p.clone(), window, later, &mut transport);
        assert_eq!(transport.sent.len(), 1);

        // Outside the window it goes again.
        let outside = epoch + Duration::from_millis(600);
        pacer.resend_packets(p, window, outside, &mut transport);
        assert_eq!(transport.sent.len(), 2);
    }

    #[test]
    fn cancel_before_burst() {
        let epoch = Instant::now();
        let mut pacer = PacedSender::default();
        let mut transport = MockTransport { block_after: Some(0), ..Default::default() };

        // Block the transport so nothing drains on enqueue.
        pacer.send_rtcp_packet(1.into(), PacketRef::new(vec![0]), &mut transport);
        assert_eq!(transport.sent.len(), 1);

        let k = key(epoch, 0, 0);
        pacer.send_packets(vec![(k, PacketRef::new(vec![9]))], epoch, &mut transport);
        assert_eq!(transport.sent.len(), 1);

        pacer.cancel_sending_packet(&k);

        transport.block_after = None;
        pacer.transport_unblocked(epoch + Duration::from_millis(1), &mut transport);

        // The cancelled packet never reached the transport.
        assert_eq!(transport.sent.len(), 1);
    }

    #[test]
    fn rtcp_bypasses_burst_accounting() {
        let epoch = Instant::now();
        let mut pacer = PacedSender::default();
        let mut transport = MockTransport::default();

        pacer.send_packets(packets(epoch, 15), epoch, &mut transport);
        assert_eq!(transport.sent.len(), 10);
        assert!(pacer.poll_timeout().is_some());

        // Burst is full, RTCP still goes straight out.
        pacer.send_rtcp_packet(1.into(), PacketRef::new(vec![200]), &mut transport);
        assert_eq!(transport.sent.len(), 11);
        assert_eq!(transport.sent[10].data(), &[200]);
    }

    #[test]
    fn rtcp_queued_while_blocked_drains_first() {
        let epoch = Instant::now();
        let mut pacer = PacedSender::default();
        let mut transport = MockTransport { block_after: Some(1), ..Default::default() };

        pacer.send_packets(packets(epoch, 2), epoch, &mut transport);
        // First packet taken, transport now blocked.
        assert_eq!(transport.sent.len(), 1);

        pacer.send_rtcp_packet(1.into(), PacketRef::new(vec![200]), &mut transport);
        assert_eq!(transport.sent.len(), 1);

        transport.block_after = None;
        pacer.transport_unblocked(epoch + Duration::from_millis(1), &mut transport);

        // RTCP ahead of the remaining RTP packet.
        assert_eq!(transport.sent[1].data(), &[200]);
        assert_eq!(transport.sent.len(), 3);
    }

    #[test]
    fn resend_replaces_queued_duplicate() {
        let epoch = Instant::now();
        let mut pacer = PacedSender::default();
        let mut transport = MockTransport { block_after: Some(0), ..Default::default() };

        // Block the transport up front.
        pacer.send_rtcp_packet(1.into(), PacketRef::new(vec![0]), &mut transport);

        let k = key(epoch, 0, 0);
        pacer.send_packets(vec![(k, PacketRef::new(vec![1]))], epoch, &mut transport);
        pacer.resend_packets(
            vec![(k, PacketRef::new(vec![2]))],
            Duration::from_millis(500),
            epoch,
            &mut transport,
        );

        // Same key: replaced, not duplicated.
        assert_eq!(pacer.queue_len(), 1);
    }

    #[test]
    fn burst_size_decays_over_lookahead_slots() {
        let epoch = Instant::now();
        let mut pacer = PacedSender::default();
        let mut transport = MockTransport::default();

        // Large backlog: computed size hits the ceiling at once.
        pacer.send_packets(packets(epoch, 90), epoch, &mut transport);
        assert_eq!(transport.sent.len(), 20);

        // Backlog shrinking, but the lookahead slots keep the burst size up
        // while the queue drains.
        let t1 = pacer.poll_timeout().unwrap();
        pacer.handle_timeout(t1, &mut transport);
        assert_eq!(transport.sent.len(), 40);

        let t2 = pacer.poll_timeout().unwrap();
        pacer.handle_timeout(t2, &mut transport);
        assert_eq!(transport.sent.len(), 60);
    }
}
