//! STUN transaction table: client/server transaction state machines, the
//! retransmission ladder, request validation, and the network manager that
//! feeds decoded datagrams into the table.
//!
//! This crate knows nothing about pseudo-TCP or mux; it only correlates
//! STUN requests to responses over one or more UDP sockets.

pub mod address;
pub mod client;
pub mod collaborators;
pub mod manager;
pub mod server;
pub mod table;
mod timer;
pub mod validate;

#[derive(Debug)]
pub enum Error {
    InvalidSource,
    UnknownTransaction,
    AlreadyResponded,
    Malformed,
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InvalidSource => "no socket bound at the given source address",
            Self::UnknownTransaction => "no server transaction exists for this id",
            Self::AlreadyResponded => "a response was already cached for this transaction",
            Self::Malformed => "message too short to carry a transaction id",
        };

        write!(f, "{msg}")
    }
}
