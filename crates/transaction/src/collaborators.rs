use crate::address::TransportAddress;

/// Looks up pre-shared keys and recognized usernames. Kept free of any
/// particular storage choice; `crate::Config`'s static table and a
/// database-backed registry can both implement it.
pub trait CredentialsRegistry: Send + Sync {
    fn local_key(&self, username: &str) -> Option<Vec<u8>>;
    fn check_local_username(&self, username: &str) -> bool;
}

/// Outcome delivered to a client transaction's collector exactly once.
#[derive(Debug, Clone)]
pub enum ResponseEvent {
    Success { bytes: Vec<u8> },
    Error { bytes: Vec<u8> },
}

/// Per-request callback surface. Exactly one of `on_response`, `on_timeout`,
/// `on_unreachable` fires, or none at all if the transaction is cancelled.
pub trait ResponseCollector: Send + Sync {
    fn on_response(&self, event: ResponseEvent);
    fn on_timeout(&self);
    fn on_unreachable(&self, reason: std::io::Error);
}

/// Receives validated requests delivered by a server transaction.
pub trait RequestListener: Send + Sync {
    fn on_request(&self, bytes: &[u8], source: TransportAddress, local: TransportAddress);
}

/// The per-socket send path. A `NetworkManager` owns one connector per bound
/// local address; on I/O error the manager removes the socket and cancels
/// every transaction bound to it.
pub trait Connector: Send + Sync {
    fn send(&self, bytes: &[u8], destination: TransportAddress) -> std::io::Result<()>;
}

/// Receives datagrams on a STUN-carrying socket that don't parse as STUN
/// (wrong magic cookie) — the pseudo-TCP engine registers one of these to
/// receive its segments off the same socket.
pub trait FallbackHandler: Send + Sync {
    fn on_datagram(&self, bytes: &[u8], source: TransportAddress, local: TransportAddress);
}
