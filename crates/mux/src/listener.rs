//! The background event loop backing a shared listening endpoint, and the
//! handles applications use to register and accept from it.

use std::collections::HashMap;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use log::{debug, warn};
use mio::net::{TcpListener as MioTcpListener, TcpStream as MioTcpStream};
use mio::{Events, Interest, Poll, Token};
use parking_lot::{Mutex, RwLock};
use socket2::{Domain, Socket, Type};

use crate::classifier::{Classifier, ClassifierId, Matched};
use crate::preread::PreRead;
use crate::Error;

pub const DEFAULT_CAPACITY: usize = 8192;
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_BACKLOG: i32 = 1024;

const LISTENER_TOKEN: Token = Token(0);
const SWEEP_INTERVAL: Duration = Duration::from_secs(1);

pub type Accepted = PreRead<MioTcpStream>;

struct Acceptor {
    classifier: Arc<dyn Classifier>,
    sender: mpsc::Sender<Accepted>,
}

struct Pending {
    stream: MioTcpStream,
    buffer: Vec<u8>,
    last_progress: Instant,
}

struct Shared {
    acceptors: RwLock<Vec<Acceptor>>,
    shutdown: AtomicBool,
}

/// A single bound TCP socket and the background thread demultiplexing
/// connections accepted on it across every registered classifier.
pub struct MuxListener {
    local_addr: SocketAddr,
    shared: Arc<Shared>,
}

impl MuxListener {
    fn spawn(addr: SocketAddr, backlog: i32, capacity: usize, read_timeout: Duration) -> Result<Arc<Self>, Error> {
        let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
        let socket = Socket::new(domain, Type::STREAM, None)?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(backlog)?;
        socket.set_nonblocking(true)?;

        let std_listener: std::net::TcpListener = socket.into();
        let mut listener = MioTcpListener::from_std(std_listener);
        let local_addr = listener.local_addr()?;

        let poll = Poll::new()?;
        poll.registry().register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;

        let shared = Arc::new(Shared { acceptors: RwLock::new(Vec::new()), shutdown: AtomicBool::new(false) });

        let loop_shared = shared.clone();
        thread::spawn(move || {
            run_event_loop(poll, listener, loop_shared, capacity, read_timeout);
        });

        Ok(Arc::new(Self { local_addr, shared }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn register(&self, classifier: Arc<dyn Classifier>) -> Result<mpsc::Receiver<Accepted>, Error> {
        let mut acceptors = self.shared.acceptors.write();
        let id = classifier.id();
        if acceptors.iter().any(|a| a.classifier.id() == id) {
            return Err(Error::DuplicateClassifier);
        }
        let (sender, receiver) = mpsc::channel();
        acceptors.push(Acceptor { classifier, sender });
        Ok(receiver)
    }

    fn deregister(&self, id: &ClassifierId) {
        let mut acceptors = self.shared.acceptors.write();
        acceptors.retain(|a| &a.classifier.id() != id);
    }
}

impl Drop for MuxListener {
    fn drop(&mut self) {
        self.shared.shutdown.store(true, Ordering::SeqCst);
    }
}

fn run_event_loop(mut poll: Poll, mut listener: MioTcpListener, shared: Arc<Shared>, capacity: usize, read_timeout: Duration) {
    let mut events = Events::with_capacity(256);
    let mut pending: HashMap<Token, Pending> = HashMap::new();
    let next_token = AtomicUsize::new(1);
    let mut last_sweep = Instant::now();

    loop {
        if shared.shutdown.load(Ordering::SeqCst) {
            break;
        }

        if let Err(err) = poll.poll(&mut events, Some(SWEEP_INTERVAL)) {
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            warn!("mux poll error: {err}");
            break;
        }

        for event in events.iter() {
            match event.token() {
                LISTENER_TOKEN => loop {
                    match listener.accept() {
                        Ok((mut stream, _peer)) => {
                            let token = Token(next_token.fetch_add(1, Ordering::Relaxed));
                            if let Err(err) = poll.registry().register(&mut stream, token, Interest::READABLE) {
                                warn!("failed to register accepted connection: {err}");
                                continue;
                            }
                            pending.insert(token, Pending { stream, buffer: Vec::new(), last_progress: Instant::now() });
                        }
                        Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => break,
                        Err(err) => {
                            warn!("accept error: {err}");
                            break;
                        }
                    }
                },
                token => {
                    let done = read_pending(&mut pending, token, capacity);
                    match done {
                        ReadOutcome::Progressed => {
                            classify_and_dispatch(&shared, &mut pending, token, &poll, capacity);
                        }
                        ReadOutcome::ClosedOrErrored => {
                            if let Some(mut entry) = pending.remove(&token) {
                                let _ = poll.registry().deregister(&mut entry.stream);
                            }
                        }
                        ReadOutcome::Unknown => {}
                    }
                }
            }
        }

        if last_sweep.elapsed() >= SWEEP_INTERVAL {
            sweep_timeouts(&mut pending, &poll, read_timeout);
            last_sweep = Instant::now();
        }
    }

    for (_, mut entry) in pending.drain() {
        let _ = poll.registry().deregister(&mut entry.stream);
    }
    shared.acceptors.write().clear();
}

enum ReadOutcome {
    Progressed,
    ClosedOrErrored,
    Unknown,
}

fn read_pending(pending: &mut HashMap<Token, Pending>, token: Token, capacity: usize) -> ReadOutcome {
    let Some(entry) = pending.get_mut(&token) else {
        return ReadOutcome::Unknown;
    };

    let mut chunk = [0u8; 4096];
    loop {
        match entry.stream.read(&mut chunk) {
            Ok(0) => return ReadOutcome::ClosedOrErrored,
            Ok(n) => {
                entry.buffer.extend_from_slice(&chunk[..n]);
                entry.last_progress = Instant::now();
                if entry.buffer.len() >= capacity {
                    return ReadOutcome::Progressed;
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::WouldBlock => return ReadOutcome::Progressed,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return ReadOutcome::ClosedOrErrored,
        }
    }
}

fn classify_and_dispatch(shared: &Arc<Shared>, pending: &mut HashMap<Token, Pending>, token: Token, poll: &Poll, capacity: usize) {
    let acceptors = shared.acceptors.read();

    let mut matched_sender = None;
    let mut all_rejected = !acceptors.is_empty();
    {
        let entry = match pending.get(&token) {
            Some(entry) => entry,
            None => return,
        };
        for acceptor in acceptors.iter() {
            match acceptor.classifier.classify(&entry.buffer) {
                Matched::Accept => {
                    matched_sender = Some(acceptor.sender.clone());
                    break;
                }
                Matched::NeedMoreData => all_rejected = false,
                Matched::Reject => {}
            }
        }
    }
    drop(acceptors);

    if let Some(sender) = matched_sender {
        if let Some(mut entry) = pending.remove(&token) {
            let _ = poll.registry().deregister(&mut entry.stream);
            let accepted = PreRead::new(entry.buffer, entry.stream);
            if sender.send(accepted).is_err() {
                debug!("classifier acceptor closed before a matched connection could be delivered");
            }
        }
        return;
    }

    let entry = match pending.get(&token) {
        Some(entry) => entry,
        None => return,
    };
    let exhausted = entry.buffer.len() >= capacity;
    if all_rejected || exhausted {
        if let Some(mut entry) = pending.remove(&token) {
            let _ = poll.registry().deregister(&mut entry.stream);
        }
    }
}

fn sweep_timeouts(pending: &mut HashMap<Token, Pending>, poll: &Poll, read_timeout: Duration) {
    let expired: Vec<Token> = pending
        .iter()
        .filter(|(_, entry)| entry.last_progress.elapsed() >= read_timeout)
        .map(|(token, _)| *token)
        .collect();

    for token in expired {
        if let Some(mut entry) = pending.remove(&token) {
            let _ = poll.registry().deregister(&mut entry.stream);
        }
    }
}

fn endpoint_matches(existing: SocketAddr, requested: SocketAddr) -> bool {
    if existing.port() != requested.port() {
        return false;
    }
    existing.ip() == requested.ip() || existing.ip().is_unspecified()
}

/// Owns every shared listening endpoint opened through it; each distinct
/// `(addr, port)` gets one background listener, shared by every classifier
/// registered against it.
pub struct Mux {
    listeners: Mutex<Vec<Arc<MuxListener>>>,
}

impl Default for Mux {
    fn default() -> Self {
        Self::new()
    }
}

impl Mux {
    pub fn new() -> Self {
        Self { listeners: Mutex::new(Vec::new()) }
    }

    pub fn open_and_bind(&self, addr: SocketAddr, classifier: impl Classifier + 'static) -> Result<MuxHandle, Error> {
        self.open_and_bind_with(addr, DEFAULT_BACKLOG, DEFAULT_CAPACITY, Duration::from_millis(DEFAULT_READ_TIMEOUT_MS), classifier)
    }

    pub fn open_and_bind_with(
        &self,
        addr: SocketAddr,
        backlog: i32,
        capacity: usize,
        read_timeout: Duration,
        classifier: impl Classifier + 'static,
    ) -> Result<MuxHandle, Error> {
        let mut listeners = self.listeners.lock();

        let existing = listeners.iter().find(|l| endpoint_matches(l.local_addr(), addr)).cloned();
        let listener = match existing {
            Some(listener) => listener,
            None => {
                let listener = MuxListener::spawn(addr, backlog, capacity, read_timeout)?;
                listeners.push(listener.clone());
                listener
            }
        };
        drop(listeners);

        let classifier: Arc<dyn Classifier> = Arc::new(classifier);
        let classifier_id = classifier.id();
        let receiver = listener.register(classifier)?;

        Ok(MuxHandle { listener, classifier_id, receiver })
    }
}

/// One registered classifier's pending-accept queue on a shared endpoint.
pub struct MuxHandle {
    listener: Arc<MuxListener>,
    classifier_id: ClassifierId,
    receiver: mpsc::Receiver<Accepted>,
}

impl MuxHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    pub fn accept(&self) -> Result<Accepted, Error> {
        self.receiver.recv().map_err(|_| Error::Closed)
    }

    pub fn accept_timeout(&self, timeout: Duration) -> Result<Accepted, Error> {
        match self.receiver.recv_timeout(timeout) {
            Ok(accepted) => Ok(accepted),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(Error::WouldBlock),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(Error::Closed),
        }
    }

    /// Drains and drops this classifier's pending-accept queue and removes
    /// it from the shared endpoint; other classifiers on the same endpoint
    /// are unaffected.
    pub fn close(&self) {
        self.listener.deregister(&self.classifier_id);
        while self.receiver.try_recv().is_ok() {}
    }
}
