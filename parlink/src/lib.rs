//! # parlink
//!
//! A stop-and-wait file transfer engine for unreliable byte links (RS-232
//! class serial ports, PTY pairs, radio modems behind a UART).
//!
//! One endpoint sends a local file, the peer writes it to disk. The link may
//! corrupt, drop or delay bytes, and either process may be killed at any
//! moment; the receiver keeps a durable checkpoint beside the output file so
//! an interrupted transfer resumes where it left off.
//!
//! ## Protocol overview
//!
//! - Data travels in packets of up to [`frame::BLOCK_SIZE`] payload bytes,
//!   each carrying a CRC-32 over the payload and a 1-bit alternating
//!   sequence number.
//! - Every packet is acknowledged (`'A'`) or rejected (`'N'`) before the
//!   next one is sent; unanswered packets are retransmitted up to
//!   [`MAX_RETRANS`] times.
//! - A `START:`/`ACK_STATUS:` handshake negotiates the resume offset from
//!   the receiver's checkpoint before any data flows.
//! - `END\n` closes the transfer; the receiver then deletes its checkpoint.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::path::Path;
//! use parlink::{mem_link_pair, CancelToken, Channel, Receiver, Sender};
//!
//! // Loopback over an in-memory link. With real hardware, wrap the serial
//! // port in a `Link` implementation instead.
//! let (near, far) = mem_link_pair();
//! let cancel = CancelToken::new();
//!
//! let receiver = std::thread::spawn({
//!     let cancel = cancel.clone();
//!     move || {
//!         let mut chan = Channel::new(far, cancel);
//!         Receiver::new(".").receive(&mut chan)
//!     }
//! });
//!
//! let mut chan = Channel::new(near, cancel);
//! Sender::new()
//!     .send(&mut chan, Path::new("notes.txt"), |sent, total| {
//!         println!("{sent}/{total} bytes");
//!     })
//!     .unwrap();
//!
//! let received = receiver.join().unwrap().unwrap();
//! println!("saved to {}", received.path.display());
//! ```
//!
//! ## Modules
//!
//! - [`cancel`] - cooperative cancellation token
//! - [`channel`] - byte channel adapter over a raw link
//! - [`checkpoint`] - durable resume checkpoints
//! - [`crc`] - CRC-32 (IEEE 802.3) engine
//! - [`error`] - error taxonomy
//! - [`frame`] - packet codec and wire constants
//! - [`handshake`] - resume offset negotiation
//! - [`receiver`] / [`sender`] - the two endpoint state machines

#[macro_use]
extern crate log;

use std::time::Duration;

pub mod cancel;
pub mod channel;
pub mod checkpoint;
pub mod crc;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod receiver;
pub mod sender;

pub use cancel::CancelToken;
pub use channel::{mem_link_pair, Channel, Link, MemLink};
pub use error::{Error, Result};
pub use receiver::{Received, Receiver};
pub use sender::Sender;

/// Maximum transmissions of one packet (or handshake request) before the
/// peer is declared unresponsive.
pub const MAX_RETRANS: u32 = 5;

/// How long the sender waits for a single response byte or handshake reply.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(3);

/// How long the receiver waits for the initial `START:` request.
pub const START_WAIT: Duration = Duration::from_secs(30);

/// How long the receiver waits between packets for the next header byte.
pub const HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// How long the receiver waits for the remainder of a packet once its first
/// byte arrived.
pub const PAYLOAD_TIMEOUT: Duration = Duration::from_secs(2);

/// Fixed pause between successive data packets, for receivers with no
/// hardware flow control.
pub const PACKET_PACE: Duration = Duration::from_millis(5);

/// Protocol timing parameters.
///
/// [`Timing::default`] is the single source of truth used by both state
/// machines. The struct exists so tests can shrink the windows; production
/// code has no reason to deviate from the defaults.
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    /// Sender-side wait for an ACK/NAK or handshake reply, per attempt.
    pub ack_timeout: Duration,
    /// Receiver-side wait for the initial `START:` request.
    pub start_wait: Duration,
    /// Receiver-side wait for the first byte of the next packet.
    pub header_timeout: Duration,
    /// Receiver-side wait for the rest of a packet after its first byte.
    pub payload_timeout: Duration,
    /// Pause between successive data packets.
    pub pace: Duration,
}

impl Default for Timing {
    fn default() -> Self {
        Timing {
            ack_timeout: ACK_TIMEOUT,
            start_wait: START_WAIT,
            header_timeout: HEADER_TIMEOUT,
            payload_timeout: PAYLOAD_TIMEOUT,
            pace: PACKET_PACE,
        }
    }
}
