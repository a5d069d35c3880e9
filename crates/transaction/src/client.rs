//! Client transaction: the request side of the STUN transaction table.
//!
//! Retransmission runs on a dedicated thread per transaction, parked on the
//! transaction's own condition variable so `cancel` can wake it early
//! without polling, per the concurrency model's suspension-point contract.
//! A matching response is handed in from whichever thread decoded it by
//! calling [`ClientTransaction::deliver`]; the retransmission thread is the
//! only place that ever calls the collector, which keeps the
//! exactly-once-notification property trivially true.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use crate::address::{TransactionId, TransportAddress};
use crate::collaborators::{Connector, ResponseCollector, ResponseEvent};
use crate::timer::now_ms;

/// Offsets from send time, in ms, at which the request is retransmitted.
/// The schedule as a whole spans 9500 ms, deliberately shorter than a
/// server transaction's 16 s lifetime so the final retransmit still finds a
/// cached response.
pub const RETRANSMIT_SCHEDULE_MS: [u64; 9] = [0, 100, 300, 700, 1500, 3100, 4700, 6300, 7900];
pub const TIMEOUT_MS: u64 = 9500;

enum State {
    Waiting,
    Delivered(ResponseEvent),
    Cancelled,
    TimedOut,
}

impl State {
    fn is_waiting(&self) -> bool {
        matches!(self, Self::Waiting)
    }
}

pub struct ClientTransaction {
    pub id: TransactionId,
    pub destination: TransportAddress,
    pub source: TransportAddress,
    state: Mutex<State>,
    condvar: Condvar,
}

impl ClientTransaction {
    pub(crate) fn new(id: TransactionId, destination: TransportAddress, source: TransportAddress) -> Arc<Self> {
        Arc::new(Self {
            id,
            destination,
            source,
            state: Mutex::new(State::Waiting),
            condvar: Condvar::new(),
        })
    }

    /// Suppress further retransmission and deliver no further callbacks.
    /// Idempotent: cancelling twice, or cancelling after completion, is a
    /// no-op.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if state.is_waiting() {
            *state = State::Cancelled;
        }
        self.condvar.notify_all();
    }

    /// Deliver a matching response. Returns `true` if this transaction was
    /// still waiting (i.e. this delivery will reach the collector).
    pub fn deliver(&self, event: ResponseEvent) -> bool {
        let mut state = self.state.lock();
        if state.is_waiting() {
            *state = State::Delivered(event);
            self.condvar.notify_all();
            true
        } else {
            false
        }
    }

    fn is_waiting(&self) -> bool {
        self.state.lock().is_waiting()
    }
}

/// Drive the retransmission ladder on the current thread until the
/// transaction completes, is cancelled, or times out. `on_finish` is called
/// exactly once at the end so the owning table can drop its reference.
pub(crate) fn run_retransmission(
    txn: Arc<ClientTransaction>,
    request: Vec<u8>,
    connector: Arc<dyn Connector>,
    collector: Arc<dyn ResponseCollector>,
    on_finish: impl FnOnce(TransactionId) + Send + 'static,
) {
    std::thread::spawn(move || {
        let start = now_ms();
        let mut guard = txn.state.lock();

        'ladder: for (index, &offset) in RETRANSMIT_SCHEDULE_MS.iter().enumerate() {
            if !guard.is_waiting() {
                break 'ladder;
            }

            wait_until(&txn.condvar, &mut guard, start + offset);

            if !guard.is_waiting() {
                break 'ladder;
            }

            if index > 0 {
                log::debug!("retransmitting stun request {:?}, attempt {index}", txn.id);
            }

            if let Err(err) = connector.send(&request, txn.destination) {
                drop(guard);
                collector.on_unreachable(err);
                on_finish(txn.id);
                return;
            }
        }

        if guard.is_waiting() {
            wait_until(&txn.condvar, &mut guard, start + TIMEOUT_MS);
        }

        if guard.is_waiting() {
            *guard = State::TimedOut;
        }

        let final_state = std::mem::replace(&mut *guard, State::Cancelled);
        drop(guard);

        match final_state {
            State::Delivered(event) => collector.on_response(event),
            State::TimedOut => collector.on_timeout(),
            State::Cancelled | State::Waiting => {}
        }

        on_finish(txn.id);
    });
}

fn wait_until(condvar: &Condvar, guard: &mut MutexGuard<'_, State>, deadline_ms: u64) {
    loop {
        let now = now_ms();
        if now >= deadline_ms {
            return;
        }

        let remaining = Duration::from_millis(deadline_ms - now);
        let timed_out = condvar.wait_for(guard, remaining).timed_out();

        if timed_out || !guard.is_waiting() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_idempotent_and_leaves_state_cancelled() {
        let txn = ClientTransaction::new(
            TransactionId::new([0; 12]),
            TransportAddress::udp("127.0.0.1:1".parse().unwrap()),
            TransportAddress::udp("127.0.0.1:2".parse().unwrap()),
        );

        txn.cancel();
        txn.cancel();

        assert!(!txn.is_waiting());
        assert!(!txn.deliver(ResponseEvent::Success { bytes: vec![] }));
    }

    #[test]
    fn deliver_only_succeeds_once() {
        let txn = ClientTransaction::new(
            TransactionId::new([1; 12]),
            TransportAddress::udp("127.0.0.1:1".parse().unwrap()),
            TransportAddress::udp("127.0.0.1:2".parse().unwrap()),
        );

        assert!(txn.deliver(ResponseEvent::Success { bytes: vec![1] }));
        assert!(!txn.deliver(ResponseEvent::Success { bytes: vec![2] }));
    }
}
