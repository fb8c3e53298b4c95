//! Receiving state machine.
//!
//! The receiver answers a `START:` request, reports how many blocks it
//! already holds, then consumes data packets one at a time. Each packet is
//! validated in order: size, CRC, sequence bit. A packet that fails any
//! check draws a NAK and the state does not advance; a duplicate of the
//! previously accepted packet (the peer missed our ACK) is re-acknowledged
//! without being written. Accepted payloads are flushed to disk and the
//! checkpoint is updated before the ACK goes out, so a crash at any point
//! leaves the output file an exact prefix of the source.
//!
//! The output lands in the receiver's directory as `recebido_<basename>`;
//! the checkpoint sits beside it and is removed only when `END\n` arrives.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::channel::{Channel, Link};
use crate::crc::crc32;
use crate::error::{Error, Result};
use crate::frame::{self, Header, BLOCK_SIZE, HEADER_LEN};
use crate::{checkpoint, handshake, Timing};

/// Summary of a completed transfer.
#[derive(Debug)]
pub struct Received {
    /// Where the file was written.
    pub path: PathBuf,
    /// Total blocks in the file, resumed ones included.
    pub blocks: u64,
    /// Final file size in bytes.
    pub bytes: u64,
}

/// Stop-and-wait file receiver.
pub struct Receiver {
    out_dir: PathBuf,
    timing: Timing,
}

impl Receiver {
    /// Creates a receiver that writes into `out_dir`.
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Receiver {
            out_dir: out_dir.into(),
            timing: Timing::default(),
        }
    }

    /// Overrides the protocol timing. Meant for tests.
    pub fn with_timing(out_dir: impl Into<PathBuf>, timing: Timing) -> Self {
        Receiver {
            out_dir: out_dir.into(),
            timing,
        }
    }

    /// Runs one receive session: handshake, data loop, end marker.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::NoStartSignal`] when no transfer is announced,
    /// [`Error::LinkTimeout`] when the peer goes quiet mid-transfer, and
    /// [`Error::Interrupted`] on cancellation. In every failure case the
    /// partial output and its checkpoint are preserved for a later resume.
    pub fn receive<L: Link>(&mut self, chan: &mut Channel<L>) -> Result<Received> {
        info!("waiting for a transfer request");
        let announced = handshake::await_start(chan, self.timing.start_wait)?;

        let base = Path::new(&announced)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| announced.clone());
        let out_path = self.out_dir.join(format!("recebido_{base}"));
        info!("incoming file {announced:?}, writing to {}", out_path.display());

        let mut resume = checkpoint::load(&out_path);
        if resume > 0 {
            let on_disk = fs::metadata(&out_path).map(|m| m.len()).unwrap_or(0);
            if on_disk <= (resume - 1) * BLOCK_SIZE as u64 {
                warn!(
                    "checkpoint claims {resume} blocks but {} holds {on_disk} bytes, restarting",
                    out_path.display()
                );
                resume = 0;
            } else {
                info!("resuming at block {resume}");
            }
        }

        let (mut file, mut bytes) =
            open_output(&out_path, resume).map_err(|e| Error::file(&out_path, e))?;

        handshake::send_status(chan, resume)?;
        // Anything buffered before our reply is leftover handshake traffic.
        chan.flush_input()?;

        let mut expected_seq = (resume % 2) as u8;
        let mut blocks = resume;
        let mut packet = Vec::with_capacity(HEADER_LEN + BLOCK_SIZE);

        loop {
            if chan.is_interrupted() {
                return Err(Error::Interrupted);
            }

            let mut first = [0u8; 1];
            match chan.read_exact(&mut first, self.timing.header_timeout) {
                Ok(()) => {}
                Err(Error::LinkTimeout) => {
                    warn!(
                        "no data within {:?}, closing the session (checkpoint kept)",
                        self.timing.header_timeout
                    );
                    return Err(Error::LinkTimeout);
                }
                Err(e) => return Err(e),
            }

            match first[0] {
                b'E' => {
                    if self.end_marker_follows(chan)? {
                        file.sync_all().map_err(|e| Error::file(&out_path, e))?;
                        drop(file);
                        checkpoint::remove(&out_path).map_err(|e| Error::file(&out_path, e))?;
                        info!("transfer complete: {blocks} blocks, {bytes} bytes");
                        return Ok(Received {
                            path: out_path,
                            blocks,
                            bytes,
                        });
                    }
                    warn!("mangled end marker, rejecting");
                    chan.write_all(&[frame::NAK])?;
                }
                b'S' => {
                    // A START from a restarted peer; we are mid-transfer, so
                    // drain the line and answer nothing.
                    let _ = chan.read_line(self.timing.payload_timeout);
                    debug!("ignoring stray START while receiving");
                }
                _ => {
                    if !self.collect_packet(chan, first[0], &mut packet)? {
                        chan.write_all(&[frame::NAK])?;
                        continue;
                    }
                    let (header, payload) = match frame::decode(&packet) {
                        Ok(parts) => parts,
                        Err(err) => {
                            warn!("undecodable packet: {err}");
                            chan.write_all(&[frame::NAK])?;
                            continue;
                        }
                    };

                    if crc32(payload) != header.crc {
                        warn!("CRC mismatch on block {}, requesting retransmission", blocks + 1);
                        chan.write_all(&[frame::NAK])?;
                    } else if header.seq == expected_seq {
                        file.write_all(payload).map_err(|e| Error::file(&out_path, e))?;
                        file.sync_data().map_err(|e| Error::file(&out_path, e))?;
                        blocks += 1;
                        bytes += payload.len() as u64;
                        checkpoint::save(&out_path, blocks)
                            .map_err(|e| Error::file(&out_path, e))?;
                        chan.write_all(&[frame::ACK])?;
                        expected_seq ^= 1;
                        debug!("block {blocks} stored ({} bytes)", payload.len());
                    } else if header.seq == expected_seq ^ 1 {
                        // Our previous ACK was lost; the peer resent the block
                        // we already hold.
                        info!("duplicate of block {blocks}, re-acknowledging");
                        chan.write_all(&[frame::ACK])?;
                    } else {
                        warn!(
                            "sequence byte {} where {expected_seq} was expected, rejecting",
                            header.seq
                        );
                        chan.write_all(&[frame::NAK])?;
                    }
                }
            }
        }
    }

    /// Reads the rest of a packet whose first header byte is `first` into
    /// `packet`. Returns `Ok(false)` when the packet cannot be completed
    /// (truncated header, out-of-range length, payload timeout); the caller
    /// answers with a NAK.
    fn collect_packet<L: Link>(
        &self,
        chan: &mut Channel<L>,
        first: u8,
        packet: &mut Vec<u8>,
    ) -> Result<bool> {
        packet.clear();
        packet.resize(HEADER_LEN, 0);
        packet[0] = first;

        match chan.read_exact(&mut packet[1..], self.timing.payload_timeout) {
            Ok(()) => {}
            Err(Error::LinkTimeout) => {
                warn!("truncated packet header");
                return Ok(false);
            }
            Err(e) => return Err(e),
        }

        let Ok(header) = Header::parse(packet) else {
            return Ok(false);
        };
        let len = header.payload_len as usize;
        if len == 0 || len > BLOCK_SIZE {
            warn!("payload length {len} outside 1..={BLOCK_SIZE}, rejecting");
            return Ok(false);
        }

        packet.resize(HEADER_LEN + len, 0);
        match chan.read_exact(&mut packet[HEADER_LEN..], self.timing.payload_timeout) {
            Ok(()) => Ok(true),
            Err(Error::LinkTimeout) => {
                warn!("payload incomplete after {:?}", self.timing.payload_timeout);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Checks whether the bytes after a leading `'E'` spell out the rest of
    /// the end marker.
    fn end_marker_follows<L: Link>(&self, chan: &mut Channel<L>) -> Result<bool> {
        let mut rest = [0u8; 3];
        match chan.read_exact(&mut rest, self.timing.payload_timeout) {
            Ok(()) => Ok(&rest == b"ND\n"),
            Err(Error::LinkTimeout) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

/// Opens the output file for a transfer resuming after `resume` blocks.
///
/// The file is truncated to at most `resume` whole blocks so a block that
/// was written but never checkpointed is dropped and received again, never
/// duplicated. Returns the file positioned at its end plus its length.
fn open_output(path: &Path, resume: u64) -> io::Result<(File, u64)> {
    let mut file = OpenOptions::new().write(true).create(true).open(path)?;
    let on_disk = file.metadata()?.len();
    let len = on_disk.min(resume * BLOCK_SIZE as u64);
    file.set_len(len)?;
    file.seek(SeekFrom::End(0))?;
    Ok((file, len))
}
