//! Error taxonomy.
//!
//! Recoverable link events (a timed-out read, a corrupt packet) are handled
//! inside the ARQ loops and never escape them; everything in [`Error`] except
//! [`Error::LinkTimeout`] terminates the session. The session boundary (the
//! CLI) is the single place that maps these to exit codes.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A channel read did not complete within its deadline.
    #[error("link read timed out")]
    LinkTimeout,

    /// The underlying link failed at the OS level.
    #[error("link broken")]
    LinkBroken(#[source] io::Error),

    /// The peer never answered the `START:` request.
    #[error("handshake failed after {attempts} attempts")]
    HandshakeFailed { attempts: u32 },

    /// No valid `START:` request arrived within the initial wait.
    #[error("no START request received within {0:?}")]
    NoStartSignal(Duration),

    /// A data packet was transmitted [`crate::MAX_RETRANS`] times without an ACK.
    #[error("peer unresponsive: block {block} unacknowledged after {attempts} attempts")]
    PeerUnresponsive { block: u64, attempts: u32 },

    /// Local file or checkpoint I/O failed.
    #[error("file error on {}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// The cancellation token was triggered. Checkpoints are preserved.
    #[error("transfer interrupted")]
    Interrupted,
}

impl Error {
    pub(crate) fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::File {
            path: path.into(),
            source,
        }
    }
}
