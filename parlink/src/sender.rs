//! Sending state machine.
//!
//! The sender streams a local file to the peer in [`BLOCK_SIZE`] byte
//! blocks, one packet in flight at a time:
//!
//! 1. Negotiate the resume offset with [`handshake::negotiate`] and seek
//!    the source file past the blocks the peer already holds.
//! 2. For each remaining block, transmit a packet and wait for one response
//!    byte. `'A'` advances to the next block and flips the sequence bit;
//!    `'N'`, a timeout, or any other byte retransmits the same packet.
//! 3. A block retransmitted [`MAX_RETRANS`] times without an ACK aborts the
//!    session; the peer's checkpoint lets a later run resume.
//! 4. After the final ACK, emit `END\n` and finish.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::thread;

use crate::channel::{Channel, Link};
use crate::error::{Error, Result};
use crate::frame::{self, BLOCK_SIZE, END_MARKER};
use crate::{handshake, Timing, MAX_RETRANS};

/// Stop-and-wait file sender.
#[derive(Debug, Default)]
pub struct Sender {
    timing: Timing,
}

impl Sender {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the protocol timing. Meant for tests.
    pub fn with_timing(timing: Timing) -> Self {
        Sender { timing }
    }

    /// Sends the file at `path` over `chan`.
    ///
    /// `on_progress` is invoked with `(bytes_acknowledged, file_size)` after
    /// the handshake and after every acknowledged block.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::HandshakeFailed`] when the peer never answers,
    /// [`Error::PeerUnresponsive`] when a block exhausts its retransmissions,
    /// [`Error::Interrupted`] on cancellation, and [`Error::File`] /
    /// [`Error::LinkBroken`] on local I/O trouble.
    pub fn send<L: Link>(
        &mut self,
        chan: &mut Channel<L>,
        path: &Path,
        on_progress: impl Fn(u64, u64),
    ) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                Error::file(
                    path,
                    std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        "file name must be valid UTF-8",
                    ),
                )
            })?
            .to_owned();

        let mut file = File::open(path).map_err(|e| Error::file(path, e))?;
        let file_size = file
            .metadata()
            .map_err(|e| Error::file(path, e))?
            .len();
        let total_blocks = file_size.div_ceil(BLOCK_SIZE as u64);

        info!("sending {name}: {file_size} bytes, {total_blocks} blocks");

        let acked = handshake::negotiate(chan, &name, self.timing.ack_timeout)?;
        if acked >= total_blocks {
            info!("peer already holds the whole file, closing");
            // Keep the marker clear of the peer's post-handshake buffer flush.
            if !self.timing.pace.is_zero() {
                thread::sleep(self.timing.pace);
            }
            chan.write_all(END_MARKER)?;
            on_progress(file_size, file_size);
            return Ok(());
        }
        if acked > 0 {
            info!("resuming from block {acked}");
        }

        file.seek(SeekFrom::Start(acked * BLOCK_SIZE as u64))
            .map_err(|e| Error::file(path, e))?;

        let mut seq = (acked % 2) as u8;
        let mut sent_bytes = acked * BLOCK_SIZE as u64;
        on_progress(sent_bytes.min(file_size), file_size);

        let mut buf = [0u8; BLOCK_SIZE];
        for block in acked..total_blocks {
            if chan.is_interrupted() {
                return Err(Error::Interrupted);
            }

            // Breather for receivers without hardware flow control. Placed
            // ahead of the write so the first packet never lands in the
            // peer's post-handshake buffer flush.
            if !self.timing.pace.is_zero() {
                thread::sleep(self.timing.pace);
            }

            let n = read_block(&mut file, &mut buf).map_err(|e| Error::file(path, e))?;
            if n == 0 {
                // The file shrank under us; the peer's prefix stays valid.
                return Err(Error::file(
                    path,
                    std::io::Error::new(
                        std::io::ErrorKind::UnexpectedEof,
                        "source file truncated during transfer",
                    ),
                ));
            }

            let packet = frame::encode(seq, &buf[..n]);
            self.transmit(chan, &packet, block, total_blocks)?;

            seq ^= 1;
            sent_bytes += n as u64;
            on_progress(sent_bytes, file_size);
        }

        chan.write_all(END_MARKER)?;
        info!("transfer complete");
        Ok(())
    }

    /// Transmits one packet until it is ACKed or the retry budget runs out.
    fn transmit<L: Link>(
        &self,
        chan: &mut Channel<L>,
        packet: &[u8],
        block: u64,
        total_blocks: u64,
    ) -> Result<()> {
        for attempt in 1..=MAX_RETRANS {
            chan.write_all(packet)?;

            let mut response = [0u8; 1];
            match chan.read_exact(&mut response, self.timing.ack_timeout) {
                Ok(()) => match response[0] {
                    frame::ACK => {
                        debug!("block {}/{} acknowledged", block + 1, total_blocks);
                        return Ok(());
                    }
                    frame::NAK => {
                        warn!(
                            "NAK for block {} ({attempt}/{MAX_RETRANS}), retransmitting",
                            block + 1
                        );
                    }
                    other => {
                        warn!(
                            "unexpected response 0x{other:02x} for block {} ({attempt}/{MAX_RETRANS})",
                            block + 1
                        );
                    }
                },
                Err(Error::LinkTimeout) => {
                    warn!(
                        "no response for block {} ({attempt}/{MAX_RETRANS}), retransmitting",
                        block + 1
                    );
                }
                Err(e) => return Err(e),
            }
        }
        Err(Error::PeerUnresponsive {
            block,
            attempts: MAX_RETRANS,
        })
    }
}

/// Reads up to one block, short only at end of file.
fn read_block(file: &mut File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}
