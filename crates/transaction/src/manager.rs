//! Network manager: one receive thread per bound UDP socket, a worker pool
//! that decodes and dispatches, and the send path that routes through the
//! transaction table.

use std::collections::{HashMap, VecDeque};
use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Condvar, Mutex, RwLock};

use codec::Decoder;

use crate::Error;
use crate::address::{TransactionId, TransportAddress};
use crate::collaborators::{Connector, CredentialsRegistry, FallbackHandler, RequestListener, ResponseCollector, ResponseEvent};
use crate::table::{RequestOutcome, TransactionTable};
use crate::validate::{self, Rejection};

pub const DEFAULT_WORKER_COUNT: usize = 3;

struct InboundDatagram {
    bytes: Vec<u8>,
    source: TransportAddress,
    local: TransportAddress,
}

struct UdpConnector(UdpSocket);

impl Connector for UdpConnector {
    fn send(&self, bytes: &[u8], destination: TransportAddress) -> std::io::Result<()> {
        self.0.send_to(bytes, destination.addr).map(|_| ())
    }
}

pub struct NetworkManager {
    table: Arc<TransactionTable>,
    credentials: Arc<dyn CredentialsRegistry>,
    queue: Arc<(Mutex<VecDeque<InboundDatagram>>, Condvar)>,
    connectors: RwLock<HashMap<TransportAddress, Arc<dyn Connector>, ahash::RandomState>>,
    listeners: RwLock<Vec<(Option<TransportAddress>, Arc<dyn RequestListener>)>>,
    fallback: RwLock<Option<Arc<dyn FallbackHandler>>>,
    shutdown: Arc<AtomicBool>,
}

impl NetworkManager {
    pub fn new(credentials: Arc<dyn CredentialsRegistry>, worker_count: usize) -> Arc<Self> {
        let manager = Arc::new(Self {
            table: TransactionTable::new(),
            credentials,
            queue: Arc::new((Mutex::new(VecDeque::new()), Condvar::new())),
            connectors: RwLock::new(HashMap::default()),
            listeners: RwLock::new(Vec::new()),
            fallback: RwLock::new(None),
            shutdown: Arc::new(AtomicBool::new(false)),
        });

        for _ in 0..worker_count.max(1) {
            let worker = manager.clone();
            std::thread::spawn(move || worker.worker_loop());
        }

        manager
    }

    pub fn register_listener(&self, scope: Option<TransportAddress>, listener: Arc<dyn RequestListener>) {
        self.listeners.write().push((scope, listener));
    }

    pub fn set_fallback(&self, handler: Arc<dyn FallbackHandler>) {
        *self.fallback.write() = Some(handler);
    }

    /// Bind a UDP socket and start its receive thread.
    pub fn bind_udp(self: &Arc<Self>, addr: SocketAddr) -> std::io::Result<TransportAddress> {
        let socket = UdpSocket::bind(addr)?;
        let local = TransportAddress::udp(socket.local_addr()?);
        let read_socket = socket.try_clone()?;

        self.connectors.write().insert(local, Arc::new(UdpConnector(socket)));

        let manager = self.clone();
        std::thread::spawn(move || manager.receive_loop(read_socket, local));

        Ok(local)
    }

    fn receive_loop(self: Arc<Self>, socket: UdpSocket, local: TransportAddress) {
        let mut buf = [0u8; 65536];

        loop {
            if self.shutdown.load(Ordering::Relaxed) {
                return;
            }

            match socket.recv_from(&mut buf) {
                Ok((n, source)) => {
                    self.enqueue(InboundDatagram {
                        bytes: buf[..n].to_vec(),
                        source: TransportAddress::udp(source),
                        local,
                    });
                }
                Err(err) => {
                    log::warn!("socket {local} read error, removing: {err}");
                    self.remove_socket(local);
                    return;
                }
            }
        }
    }

    pub fn remove_socket(&self, local: TransportAddress) {
        self.connectors.write().remove(&local);
        self.table.cancel_for_address(local);
    }

    pub fn send_request(
        &self,
        request: Vec<u8>,
        destination: TransportAddress,
        source: TransportAddress,
        collector: Arc<dyn ResponseCollector>,
    ) -> Result<TransactionId, Error> {
        let connector = self.connectors.read().get(&source).cloned().ok_or(Error::InvalidSource)?;
        self.table.send_request(request, destination, source, collector, connector)
    }

    pub fn send_response(
        &self,
        id: TransactionId,
        local: TransportAddress,
        response: Vec<u8>,
        destination: TransportAddress,
    ) -> Result<(), Error> {
        let connector = self.connectors.read().get(&local).cloned().ok_or(Error::InvalidSource)?;
        self.table.send_response(id, local, response, destination, connector.as_ref())
    }

    pub fn cancel(&self, id: TransactionId) -> bool {
        self.table.cancel(id)
    }

    pub fn cancel_for_address(&self, local_address: TransportAddress) {
        self.table.cancel_for_address(local_address);
    }

    /// Stop accepting new work and wake every worker so they exit. Receive
    /// threads notice on their next socket error or recv timeout.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Relaxed);
        let (_, condvar) = &*self.queue;
        condvar.notify_all();
    }

    fn enqueue(&self, datagram: InboundDatagram) {
        let (lock, condvar) = &*self.queue;
        let mut queue = lock.lock();
        queue.push_back(datagram);
        condvar.notify_one();
    }

    fn worker_loop(self: Arc<Self>) {
        loop {
            let datagram = {
                let (lock, condvar) = &*self.queue;
                let mut queue = lock.lock();

                while queue.is_empty() && !self.shutdown.load(Ordering::Relaxed) {
                    condvar.wait(&mut queue);
                }

                queue.pop_front()
            };

            match datagram {
                Some(datagram) => self.process(datagram),
                None => return,
            }
        }
    }

    fn process(&self, datagram: InboundDatagram) {
        let InboundDatagram { bytes, source, local } = datagram;

        let mut decoder = Decoder::default();
        let decoded = match decoder.decode(&bytes) {
            Ok(message) => message,
            Err(codec::Error::BadMagicCookie) => {
                if let Some(handler) = self.fallback.read().clone() {
                    handler.on_datagram(&bytes, source, local);
                } else {
                    log::trace!("dropping non-stun datagram from {source} with no fallback registered");
                }
                return;
            }
            Err(err) => {
                log::debug!("dropping malformed datagram from {source}: {err}");
                return;
            }
        };

        let method = decoded.method();

        let mut token = [0u8; 12];
        token.copy_from_slice(decoded.token());
        let id = TransactionId::new(token);

        if method.class.is_response() {
            let is_error = method.class.is_error();
            drop(decoded);

            let event = if is_error { ResponseEvent::Error { bytes } } else { ResponseEvent::Success { bytes } };
            self.table.deliver_response(id, event);
            return;
        }

        match self.table.receive_request(id, local, source) {
            RequestOutcome::DuplicateRetransmit(cached) => {
                if let Some(connector) = self.connectors.read().get(&local).cloned() {
                    if let Err(err) = connector.send(&cached, source) {
                        log::warn!("failed to retransmit cached response to {source}: {err}");
                    }
                }
            }
            RequestOutcome::DuplicatePending => {}
            RequestOutcome::New => {
                let rejection = validate::validate(&decoded, self.credentials.as_ref()).err();
                drop(decoded);

                match rejection {
                    Some(rejection) => self.reject(method, token, &rejection, local, source),
                    None => self.deliver(&bytes, source, local),
                }
            }
        }
    }

    fn reject(&self, method: codec::message::methods::Method, token: [u8; 12], rejection: &Rejection, local: TransportAddress, source: TransportAddress) {
        let response = validate::build_error_response(method, &token, rejection);

        if let Some(connector) = self.connectors.read().get(&local).cloned() {
            if let Err(err) = connector.send(&response, source) {
                log::warn!("failed to send error response to {source}: {err}");
            }
        }
    }

    fn deliver(&self, bytes: &[u8], source: TransportAddress, local: TransportAddress) {
        for (scope, listener) in self.listeners.read().iter() {
            if scope.is_none() || *scope == Some(local) {
                listener.on_request(bytes, source, local);
            }
        }
    }
}
