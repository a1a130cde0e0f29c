use std::time::Duration;
use thiserror::Error;

/// A single failed register read attempt. These are retried by the register client and
/// never escape it on their own.
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("connect failed: {0}")]
    Connect(#[source] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("device exception: {0}")]
    Exception(String),

    #[error("short read: expected {expected} registers, got {got}")]
    ShortRead { expected: u16, got: usize },
}

#[derive(Debug, Error)]
pub enum Error {
    /// Retry budget exhausted; the caller must assume the link is down.
    #[error("link down: registers {start}+{count} unreadable after {attempts} attempts ({last})")]
    LinkDown {
        start: u16,
        count: u16,
        attempts: u32,
        #[source]
        last: AttemptError,
    },

    /// A reader returned a block of the wrong length.
    #[error("short block: registers {start}+{expected} returned {got} words")]
    ShortBlock { start: u16, expected: u16, got: usize },

    /// One of the identity reads failed, nothing was committed.
    #[error("identity incomplete: {block} read failed")]
    IdentityIncomplete {
        block: &'static str,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    pub fn is_link_down(&self) -> bool {
        matches!(self, Error::LinkDown { .. })
    }
}
