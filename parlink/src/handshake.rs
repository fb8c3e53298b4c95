//! Resume offset negotiation.
//!
//! Before any data flows, the sender announces the transfer and the
//! receiver answers with how many blocks it already holds on disk:
//!
//! ```text
//! sender -> START:<basename>\n
//! sender <- ACK_STATUS:<blocks>\n
//! ```
//!
//! The sender repeats the request up to [`MAX_RETRANS`] times, then gives
//! up. The receiver ignores lines that are not a valid request until its
//! initial wait expires. Both lines are plain ASCII so a human on a
//! terminal can drive either side by hand.

use std::time::{Duration, Instant};

use crate::channel::{Channel, Link};
use crate::error::{Error, Result};
use crate::frame::{START_TAG, STATUS_TAG};
use crate::MAX_RETRANS;

/// Sender side: announces `name` and returns the peer's block count.
pub fn negotiate<L: Link>(
    chan: &mut Channel<L>,
    name: &str,
    reply_timeout: Duration,
) -> Result<u64> {
    let request = format!("{START_TAG}{name}\n");
    for attempt in 1..=MAX_RETRANS {
        chan.write_all(request.as_bytes())?;
        match chan.read_line(reply_timeout) {
            Ok(line) => {
                if let Some(blocks) = parse_status(&line) {
                    debug!("peer already holds {blocks} blocks");
                    return Ok(blocks);
                }
                warn!(
                    "unexpected handshake reply ({attempt}/{MAX_RETRANS}): {:?}",
                    String::from_utf8_lossy(&line)
                );
            }
            Err(Error::LinkTimeout) => {
                warn!("no handshake reply ({attempt}/{MAX_RETRANS}), repeating START");
            }
            Err(e) => return Err(e),
        }
    }
    Err(Error::HandshakeFailed {
        attempts: MAX_RETRANS,
    })
}

/// Receiver side: waits up to `wait` for a valid `START:` request and
/// returns the announced file name.
pub fn await_start<L: Link>(chan: &mut Channel<L>, wait: Duration) -> Result<String> {
    let start = Instant::now();
    loop {
        let elapsed = start.elapsed();
        if elapsed >= wait {
            return Err(Error::NoStartSignal(wait));
        }
        match chan.read_line(wait - elapsed) {
            Ok(line) => {
                if let Some(name) = parse_start(&line) {
                    return Ok(name);
                }
                debug!(
                    "ignoring stale line while waiting for START: {:?}",
                    String::from_utf8_lossy(&line)
                );
            }
            Err(Error::LinkTimeout) => return Err(Error::NoStartSignal(wait)),
            Err(e) => return Err(e),
        }
    }
}

/// Receiver side: reports `blocks` as the resume offset.
pub fn send_status<L: Link>(chan: &mut Channel<L>, blocks: u64) -> Result<()> {
    chan.write_all(format!("{STATUS_TAG}{blocks}\n").as_bytes())
}

fn parse_start(line: &[u8]) -> Option<String> {
    let text = std::str::from_utf8(line).ok()?;
    let name = text.strip_prefix(START_TAG)?.trim();
    if name.is_empty() {
        None
    } else {
        Some(name.to_string())
    }
}

fn parse_status(line: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(line).ok()?;
    text.strip_prefix(STATUS_TAG)?.trim().parse().ok()
}
