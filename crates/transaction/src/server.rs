//! Server transaction: the response side of the STUN transaction table.
//!
//! Lifetime is 16 000 ms, chosen to outlive the client retransmission
//! ladder's 9500 ms span so the final client retransmit still finds a
//! cached response rather than spawning a fresh transaction.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::address::{TransactionId, TransportAddress};
use crate::timer::{Timer, now_ms};

pub const LIFETIME_MS: u64 = 16_000;

/// §8 idempotence: "repeated duplicate-request receipt triggers at most one
/// cached-response retransmission per 100 ms interval."
pub const RETRANSMIT_INTERVAL_MS: u64 = 100;

pub struct ServerTransaction {
    pub id: TransactionId,
    pub local: TransportAddress,
    pub remote: TransportAddress,
    response: Mutex<Option<Vec<u8>>>,
    last_retransmit: Mutex<Option<u64>>,
    expires_at: Timer,
}

impl ServerTransaction {
    pub(crate) fn new(id: TransactionId, local: TransportAddress, remote: TransportAddress) -> Arc<Self> {
        Arc::new(Self {
            id,
            local,
            remote,
            response: Mutex::new(None),
            last_retransmit: Mutex::new(None),
            expires_at: Timer::new(now_ms() + LIFETIME_MS),
        })
    }

    /// Cache the response to send back for every future duplicate request.
    /// Returns `false` if a response was already cached.
    pub(crate) fn set_response(&self, bytes: Vec<u8>) -> bool {
        let mut response = self.response.lock();
        if response.is_some() {
            return false;
        }

        *response = Some(bytes);
        true
    }

    pub(crate) fn cached_response(&self) -> Option<Vec<u8>> {
        self.response.lock().clone()
    }

    /// The cached response, if one is set and at least `RETRANSMIT_INTERVAL_MS`
    /// has passed since the last retransmit handed out by this method.
    /// Updates the last-retransmit timestamp on a hit, so a burst of
    /// duplicates within one interval resends at most once.
    pub(crate) fn try_retransmit(&self, now: u64) -> Option<Vec<u8>> {
        let bytes = self.response.lock().clone()?;

        let mut last = self.last_retransmit.lock();
        if last.is_some_and(|t| now.saturating_sub(t) < RETRANSMIT_INTERVAL_MS) {
            return None;
        }

        *last = Some(now);
        Some(bytes)
    }

    pub(crate) fn is_expired(&self, now: u64) -> bool {
        self.expires_at.has_elapsed(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_response_rejects_a_second_write() {
        let txn = ServerTransaction::new(
            TransactionId::new([0; 12]),
            TransportAddress::udp("127.0.0.1:1".parse().unwrap()),
            TransportAddress::udp("127.0.0.1:2".parse().unwrap()),
        );

        assert!(txn.set_response(vec![1, 2, 3]));
        assert!(!txn.set_response(vec![4, 5, 6]));
        assert_eq!(txn.cached_response(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn lifetime_outlives_client_retransmission_schedule() {
        assert!(LIFETIME_MS > crate::client::TIMEOUT_MS);
    }

    #[test]
    fn try_retransmit_suppresses_bursts_within_the_interval() {
        let txn = ServerTransaction::new(
            TransactionId::new([0; 12]),
            TransportAddress::udp("127.0.0.1:1".parse().unwrap()),
            TransportAddress::udp("127.0.0.1:2".parse().unwrap()),
        );

        assert!(txn.try_retransmit(0).is_none());

        txn.set_response(vec![1, 2, 3]);

        assert_eq!(txn.try_retransmit(1_000), Some(vec![1, 2, 3]));
        assert_eq!(txn.try_retransmit(1_050), None);
        assert_eq!(txn.try_retransmit(1_099), None);
        assert_eq!(txn.try_retransmit(1_100), Some(vec![1, 2, 3]));
    }
}
