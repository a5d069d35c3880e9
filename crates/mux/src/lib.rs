//! A shared TCP listening endpoint serving multiple logical acceptors.
//!
//! Each accepted connection's first bytes are buffered and handed to every
//! registered classifier in registration order until one accepts it; the
//! connection is then steered to that acceptor wrapped in a [`PreRead`] so
//! the buffered prefix is replayed before the live socket. See
//! [`Mux::open_and_bind`].

mod classifier;
mod listener;
mod preread;

pub use classifier::{Classifier, ClassifierId, Matched, PrefixClassifier};
pub use listener::{Accepted, Mux, MuxHandle, DEFAULT_BACKLOG, DEFAULT_CAPACITY, DEFAULT_READ_TIMEOUT_MS};
pub use preread::PreRead;

use std::fmt;

#[derive(Debug)]
pub enum Error {
    /// Another acceptor with an equal classifier identity is already
    /// registered on this endpoint.
    DuplicateClassifier,
    /// The handle's acceptor has been closed or its listener torn down.
    Closed,
    /// `accept_timeout` elapsed with nothing classified yet.
    WouldBlock,
    Io(std::io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateClassifier => write!(f, "a classifier with this identity is already registered on this endpoint"),
            Self::Closed => write!(f, "mux handle is closed"),
            Self::WouldBlock => write!(f, "accept timed out with no classified connection"),
            Self::Io(err) => write!(f, "mux io error: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}
