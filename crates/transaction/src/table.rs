//! The transaction table: maps transaction ids (plus, for server
//! transactions, the local listening address) to the client or server
//! transaction tracking that exchange.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::Error;
use crate::address::{TransactionId, TransportAddress};
use crate::client::{self, ClientTransaction};
use crate::collaborators::{Connector, ResponseCollector, ResponseEvent};
use crate::server::ServerTransaction;
use crate::timer::now_ms;

type ClientMap = HashMap<TransactionId, Arc<ClientTransaction>, ahash::RandomState>;
type ServerKey = (TransactionId, TransportAddress);
type ServerMap = HashMap<ServerKey, Arc<ServerTransaction>, ahash::RandomState>;

/// Outcome of handing an inbound request to the table, telling the network
/// manager what to do next.
pub enum RequestOutcome {
    /// First sighting of this transaction (or a same-id request from a
    /// different source address, which the spec treats as unrelated);
    /// run request validation and, if accepted, deliver it.
    New,
    /// A duplicate of a request still awaiting its response; nothing to
    /// send, and it must not be re-delivered to the listener.
    DuplicatePending,
    /// A duplicate whose response was already cached; resend it verbatim.
    DuplicateRetransmit(Vec<u8>),
}

pub struct TransactionTable {
    clients: RwLock<ClientMap>,
    servers: RwLock<ServerMap>,
}

impl TransactionTable {
    pub fn new() -> Arc<Self> {
        let table = Arc::new(Self {
            clients: RwLock::new(HashMap::default()),
            servers: RwLock::new(HashMap::default()),
        });

        let weak = Arc::downgrade(&table);
        std::thread::spawn(move || {
            loop {
                std::thread::sleep(Duration::from_secs(1));

                let Some(table) = weak.upgrade() else {
                    break;
                };

                table.sweep_expired_servers();
            }
        });

        table
    }

    fn sweep_expired_servers(&self) {
        let now = now_ms();
        self.servers.write().retain(|_, txn| !txn.is_expired(now));
    }

    /// Start a client transaction. `request` must be a fully-encoded STUN
    /// message; the transaction id is read straight out of its header.
    pub fn send_request(
        self: &Arc<Self>,
        request: Vec<u8>,
        destination: TransportAddress,
        source: TransportAddress,
        collector: Arc<dyn ResponseCollector>,
        connector: Arc<dyn Connector>,
    ) -> Result<TransactionId, Error> {
        let id = TransactionId::from_header(&request).ok_or(Error::Malformed)?;

        let txn = ClientTransaction::new(id, destination, source);
        self.clients.write().insert(id, txn.clone());

        let weak = Arc::downgrade(self);
        client::run_retransmission(txn, request, connector, collector, move |id| {
            if let Some(table) = weak.upgrade() {
                table.clients.write().remove(&id);
            }
        });

        Ok(id)
    }

    /// Hand a decoded response to the waiting client transaction, if any.
    pub fn deliver_response(&self, id: TransactionId, event: ResponseEvent) -> bool {
        match self.clients.read().get(&id) {
            Some(txn) => {
                txn.deliver(event);
                true
            }
            None => false,
        }
    }

    /// Idempotent: cancelling an unknown or already-finished id is a no-op.
    pub fn cancel(&self, id: TransactionId) -> bool {
        match self.clients.read().get(&id) {
            Some(txn) => {
                txn.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_for_address(&self, local_address: TransportAddress) {
        for txn in self.clients.read().values() {
            if txn.source == local_address {
                txn.cancel();
            }
        }

        self.servers.write().retain(|_, txn| txn.local != local_address);
    }

    /// Record or look up the server transaction for an inbound request.
    pub fn receive_request(
        &self,
        id: TransactionId,
        local: TransportAddress,
        remote: TransportAddress,
    ) -> RequestOutcome {
        let key = (id, local);

        if let Some(txn) = self.servers.read().get(&key) {
            if txn.remote != remote {
                return RequestOutcome::New;
            }

            // A cached response resends at most once per
            // `server::RETRANSMIT_INTERVAL_MS`; duplicates arriving inside
            // that window (or before any response is cached) are dropped
            // here with nothing to send.
            return match txn.try_retransmit(now_ms()) {
                Some(bytes) => RequestOutcome::DuplicateRetransmit(bytes),
                None => RequestOutcome::DuplicatePending,
            };
        }

        self.servers.write().insert(key, ServerTransaction::new(id, local, remote));
        RequestOutcome::New
    }

    pub fn send_response(
        &self,
        id: TransactionId,
        local: TransportAddress,
        response: Vec<u8>,
        destination: TransportAddress,
        connector: &dyn Connector,
    ) -> Result<(), Error> {
        let txn = self
            .servers
            .read()
            .get(&(id, local))
            .cloned()
            .ok_or(Error::UnknownTransaction)?;

        if !txn.set_response(response.clone()) {
            return Err(Error::AlreadyResponded);
        }

        connector.send(&response, destination).map_err(|_| Error::InvalidSource)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::ResponseEvent;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct NullConnector;
    impl Connector for NullConnector {
        fn send(&self, _bytes: &[u8], _destination: TransportAddress) -> std::io::Result<()> {
            Ok(())
        }
    }

    struct CountingCollector {
        responses: AtomicUsize,
        timeouts: AtomicUsize,
    }

    impl ResponseCollector for CountingCollector {
        fn on_response(&self, _event: ResponseEvent) {
            self.responses.fetch_add(1, Ordering::SeqCst);
        }
        fn on_timeout(&self) {
            self.timeouts.fetch_add(1, Ordering::SeqCst);
        }
        fn on_unreachable(&self, _reason: std::io::Error) {}
    }

    fn addr(port: u16) -> TransportAddress {
        TransportAddress::udp(([127, 0, 0, 1], port).into())
    }

    #[test]
    fn response_delivered_exactly_once() {
        let table = TransactionTable::new();
        let collector = Arc::new(CountingCollector {
            responses: AtomicUsize::new(0),
            timeouts: AtomicUsize::new(0),
        });

        let mut request = vec![0u8; 20];
        request[8..20].copy_from_slice(&[5; 12]);

        let id = table
            .send_request(request, addr(1), addr(2), collector.clone(), Arc::new(NullConnector))
            .unwrap();

        assert!(table.deliver_response(id, ResponseEvent::Success { bytes: vec![] }));
        assert!(!table.deliver_response(id, ResponseEvent::Success { bytes: vec![] }));

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(collector.responses.load(Ordering::SeqCst), 1);
        assert_eq!(collector.timeouts.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn duplicate_request_before_any_response_is_pending() {
        let table = TransactionTable::new();
        let id = TransactionId::new([9; 12]);

        assert!(matches!(table.receive_request(id, addr(1), addr(2)), RequestOutcome::New));
        assert!(matches!(
            table.receive_request(id, addr(1), addr(2)),
            RequestOutcome::DuplicatePending
        ));
    }

    #[test]
    fn duplicate_request_after_response_is_retransmitted() {
        let table = TransactionTable::new();
        let id = TransactionId::new([4; 12]);
        let local = addr(1);
        let remote = addr(2);

        table.receive_request(id, local, remote);
        table
            .send_response(id, local, vec![1, 2, 3], remote, &NullConnector)
            .unwrap();

        match table.receive_request(id, local, remote) {
            RequestOutcome::DuplicateRetransmit(bytes) => assert_eq!(bytes, vec![1, 2, 3]),
            _ => panic!("expected a retransmit"),
        }
    }

    #[test]
    fn duplicate_retransmits_are_rate_limited_to_one_per_100ms() {
        let table = TransactionTable::new();
        let id = TransactionId::new([6; 12]);
        let local = addr(1);
        let remote = addr(2);

        table.receive_request(id, local, remote);
        table
            .send_response(id, local, vec![1, 2, 3], remote, &NullConnector)
            .unwrap();

        assert!(matches!(
            table.receive_request(id, local, remote),
            RequestOutcome::DuplicateRetransmit(_)
        ));

        for _ in 0..5 {
            assert!(matches!(
                table.receive_request(id, local, remote),
                RequestOutcome::DuplicatePending
            ));
        }

        std::thread::sleep(Duration::from_millis(110));

        assert!(matches!(
            table.receive_request(id, local, remote),
            RequestOutcome::DuplicateRetransmit(_)
        ));
    }

    #[test]
    fn same_id_from_a_different_source_is_treated_as_new() {
        let table = TransactionTable::new();
        let id = TransactionId::new([2; 12]);
        let local = addr(1);

        table.receive_request(id, local, addr(2));
        assert!(matches!(table.receive_request(id, local, addr(3)), RequestOutcome::New));
    }
}
