#![forbid(unsafe_code)]
#![allow(clippy::new_without_default)]
//! Sans-IO send side of a low latency media transport.
//!
//! The crate packetizes encoded audio/video frames into RTP, paces them
//! onto a datagram transport in timed bursts, retains recent frames for
//! NACK-driven retransmission, and runs the RTCP control loop (sender
//! reports, round-trip measurement, receiver feedback and event logs).
//! Frame payloads can optionally be encrypted with AES-128-CTR.
//!
//! Sans-IO means no sockets, no threads and no clocks in here. The owner:
//!
//! * hands over encoded frames with
//!   [`CastTransportSender::insert_coded_audio_frame`] /
//!   [`CastTransportSender::insert_coded_video_frame`],
//! * implements [`PacketSender`] over its UDP socket (returning
//!   [`SendOutcome::Blocked`] on backpressure and later calling
//!   [`CastTransportSender::transport_unblocked`]),
//! * feeds incoming RTCP to [`CastTransportSender::incoming_rtcp_packet`],
//! * and drives time: sleep until [`CastTransportSender::poll_timeout`],
//!   then call [`CastTransportSender::handle_timeout`].
//!
//! Every entry point takes `now: Instant` so tests (and replays) can run on
//! a synthetic clock.

#[macro_use]
extern crate tracing;

use thiserror::Error;

/// Errors surfaced by this crate. Wire-level problems are not errors;
/// malformed input from the network is dropped and logged, only local
/// misconfiguration is reported.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CastError {
    /// A configuration value is out of its valid range.
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(&'static str),
}

mod crypto;
pub use crypto::TransportEncryptionHandler;

mod frame;
pub use frame::{Dependency, EncodedFrame, FrameId, FrameIdWrapHelper};

mod id;
pub use id::{Pt, Ssrc};

mod pacer;
pub use pacer::{PacedSender, PacerConfig, PacketSender, SendOutcome};

mod packet;
pub use packet::{PacketKey, PacketRef, SendPacketVec};

pub mod rtcp;

pub mod rtp;

mod session;
pub use session::{RtcpConfig, RtcpEvent, RtcpSession, RttReport, SenderReportInput};

mod storage;
pub use storage::{PacketStorage, MAX_UNACKED_FRAMES};

mod time;
pub use time::InstantExt;

mod transport;
pub use transport::{
    CastStreamConfig, CastTransportSender, CastTransportStatus, TransportEvent,
};
