//! RTP packetization and the frame send/resend path.

mod header;
pub use header::{CastHeader, RtpHeader, RTP_HEADER_LEN};

mod packetizer;
pub use packetizer::{RtpPacketizer, RtpPacketizerConfig};

mod sender;
pub use sender::{RtpSender, RtpSenderConfig};
