//! Blocking wrapper around [`PseudoTcp`]. The engine itself never blocks;
//! this layer adds the suspension points application code expects from a
//! stream socket by parking callers on a condvar until the engine's
//! `Notifier` callbacks say there's something to do, and drives the
//! retransmission/ack clock from a background thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::engine::now_ms;
use crate::notifier::{Notifier, WriteResult};
use crate::options::OptionKind;
use crate::{ClockResult, Error, PseudoTcp, State};

/// Where a [`Socket`] hands outbound segments off to the network. Typically
/// a thin wrapper around a bound UDP socket and a fixed peer address.
pub trait Transport: Send + Sync {
    fn send_to(&self, bytes: &[u8]) -> bool;
}

#[derive(Default)]
struct WaiterState {
    readable: bool,
    writable: bool,
    closed: bool,
    close_error: Option<Error>,
}

struct Waiter {
    state: Mutex<WaiterState>,
    condvar: Condvar,
}

struct SocketNotifier<T> {
    transport: T,
    waiter: Arc<Waiter>,
}

impl<T: Transport> Notifier for SocketNotifier<T> {
    fn write_packet(&self, bytes: &[u8]) -> WriteResult {
        if self.transport.send_to(bytes) {
            WriteResult::Success
        } else {
            WriteResult::Failed
        }
    }

    fn tcp_opened(&self) {
        let mut state = self.waiter.state.lock();
        state.writable = true;
        self.waiter.condvar.notify_all();
    }

    fn tcp_readable(&self) {
        let mut state = self.waiter.state.lock();
        state.readable = true;
        self.waiter.condvar.notify_all();
    }

    fn tcp_writable(&self) {
        let mut state = self.waiter.state.lock();
        state.writable = true;
        self.waiter.condvar.notify_all();
    }

    fn tcp_closed(&self, err: Option<Error>) {
        let mut state = self.waiter.state.lock();
        state.closed = true;
        state.readable = true;
        state.writable = true;
        state.close_error = err;
        self.waiter.condvar.notify_all();
    }
}

fn clock_loop(engine: Arc<PseudoTcp>, shutdown: Arc<AtomicBool>) {
    loop {
        if shutdown.load(Ordering::Acquire) {
            return;
        }

        match engine.next_clock(now_ms()) {
            ClockResult::Quiescent => return,
            ClockResult::IntervalMs(ms) => {
                std::thread::sleep(Duration::from_millis(ms.clamp(1, 1000)));
                engine.notify_clock(now_ms());
            }
        }
    }
}

/// A pseudo-TCP stream with blocking `send`/`recv`, suitable for running on
/// its own worker thread the way [`crate::PseudoTcp`] alone is not.
pub struct Socket {
    engine: Arc<PseudoTcp>,
    waiter: Arc<Waiter>,
    shutdown: Arc<AtomicBool>,
}

impl Socket {
    pub fn new<T: Transport + 'static>(transport: T) -> Self {
        let waiter = Arc::new(Waiter { state: Mutex::new(WaiterState::default()), condvar: Condvar::new() });
        let notifier = Arc::new(SocketNotifier { transport, waiter: waiter.clone() });
        let engine = PseudoTcp::new(notifier);
        let shutdown = Arc::new(AtomicBool::new(false));

        {
            let engine = engine.clone();
            let shutdown = shutdown.clone();
            std::thread::spawn(move || clock_loop(engine, shutdown));
        }

        Self { engine, waiter, shutdown }
    }

    pub fn state(&self) -> State {
        self.engine.state()
    }

    pub fn connect(&self) -> Result<(), Error> {
        self.engine.connect()
    }

    /// Feed one received datagram into the engine. Called by whatever reads
    /// the underlying transport, typically on its own thread.
    pub fn notify_packet(&self, bytes: &[u8]) -> Result<(), Error> {
        self.engine.notify_packet(bytes)
    }

    pub fn send(&self, buf: &[u8]) -> Result<usize, Error> {
        let deadline = self.timeout_deadline(OptionKind::WriteTimeout);

        loop {
            let n = self.engine.send(buf)?;
            if n > 0 || buf.is_empty() {
                return Ok(n);
            }

            if !self.wait_for(|s| s.writable || s.closed, deadline) {
                return Err(Error::TimedOut);
            }

            let mut state = self.waiter.state.lock();
            if state.closed {
                return Err(state.close_error.unwrap_or(Error::Closed));
            }
            state.writable = false;
        }
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let deadline = self.timeout_deadline(OptionKind::ReadTimeout);

        loop {
            match self.engine.recv(buf) {
                Ok(n) => return Ok(n),
                Err(Error::WouldBlock) => {
                    if !self.wait_for(|s| s.readable || s.closed, deadline) {
                        return Err(Error::TimedOut);
                    }

                    let mut state = self.waiter.state.lock();
                    if state.closed && !state.readable {
                        return Err(state.close_error.unwrap_or(Error::Closed));
                    }
                    state.readable = false;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn close(&self, force: bool) {
        self.engine.close(force);
        self.shutdown.store(true, Ordering::Release);
    }

    pub fn set_option(&self, kind: OptionKind, value: i64) {
        self.engine.set_option(kind, value);
    }

    pub fn get_option(&self, kind: OptionKind) -> i64 {
        self.engine.get_option(kind)
    }

    fn timeout_deadline(&self, kind: OptionKind) -> Option<u64> {
        let ms = self.engine.get_option(kind);
        (ms > 0).then(|| now_ms() + ms as u64)
    }

    fn wait_for(&self, predicate: impl Fn(&WaiterState) -> bool, deadline: Option<u64>) -> bool {
        let mut state = self.waiter.state.lock();

        while !predicate(&state) {
            match deadline {
                None => self.waiter.condvar.wait(&mut state),
                Some(deadline) => {
                    let now = now_ms();
                    if now >= deadline {
                        return false;
                    }
                    let timed_out = self
                        .waiter
                        .condvar
                        .wait_for(&mut state, Duration::from_millis(deadline - now))
                        .timed_out();
                    if timed_out && !predicate(&state) {
                        return false;
                    }
                }
            }
        }

        true
    }
}

impl Drop for Socket {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::Release);
    }
}
