//! User-space reliable, ordered byte stream carried as segments over an
//! unreliable, unordered datagram transport, with NewReno congestion
//! control and RFC 813-style flow control. See [`engine::PseudoTcp`].

pub mod congestion;
mod engine;
pub mod mtu;
pub mod notifier;
pub mod options;
mod seq;
pub mod segment;
pub mod rto;
pub mod socket;

pub use engine::{ClockResult, PseudoTcp, State};

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A segment failed to decode.
    Malformed,
    /// The stream has already reached `closed`.
    Closed,
    /// An operation that requires an established connection was attempted
    /// before `connect` or after `close`.
    NotConnected,
    /// The retransmission limit was reached without an ack.
    TimedOut,
    /// A write was reported unreachable by the transport.
    Unreachable,
    /// A non-blocking read or write found nothing to do.
    WouldBlock,
    /// A send or receive buffer is full.
    ResourceExhausted,
    /// The peer sent a segment with the reset flag set.
    ConnectionReset,
    /// Every entry in the MTU fallback ladder has been exhausted.
    MtuExhausted,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed pseudo-tcp segment"),
            Self::Closed => write!(f, "stream is closed"),
            Self::NotConnected => write!(f, "stream is not connected"),
            Self::TimedOut => write!(f, "retransmission limit reached without an ack"),
            Self::Unreachable => write!(f, "destination unreachable"),
            Self::WouldBlock => write!(f, "operation would block"),
            Self::ResourceExhausted => write!(f, "buffer is full"),
            Self::ConnectionReset => write!(f, "connection reset by peer"),
            Self::MtuExhausted => write!(f, "exhausted the mtu fallback ladder"),
        }
    }
}

impl std::error::Error for Error {}

impl From<codec::Error> for Error {
    fn from(_: codec::Error) -> Self {
        Self::Malformed
    }
}
