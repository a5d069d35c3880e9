//! The pseudo-TCP control block and state machine (§4.4).
//!
//! [`PseudoTcp`] is not internally threaded: every public method locks the
//! control block for the duration of the call, so `notify_packet` (driven by
//! the owning socket's reader), `notify_clock` (driven by a clock driver),
//! and `send`/`recv` (driven by the application) all serialize on the same
//! lock, per the concurrency model. Notifier callbacks are queued while the
//! lock is held and fired only after it is released, so a callback that
//! calls back into the engine (e.g. `close` from `tcp_closed`) cannot
//! deadlock on a non-reentrant mutex.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use parking_lot::Mutex;

use codec::pseudotcp::{ConnectOption, FLAG_CTRL, FLAG_RST, SegmentHeader, decode_connect_options, encode_connect_options};

use crate::congestion::CongestionState;
use crate::mtu;
use crate::notifier::{Notifier, WriteResult};
use crate::options::{self, OptionKind, Options};
use crate::rto;
use crate::segment::SendSegment;
use crate::seq;
use crate::Error;

pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock before unix epoch")
        .as_millis() as u64
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Listen,
    SynSent,
    SynReceived,
    Established,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ShutdownMode {
    None,
    Graceful,
    Forceful,
}

/// What `next_clock` tells the clock driver: either wait `IntervalMs`
/// longer, or the engine has nothing left to wait for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockResult {
    IntervalMs(u64),
    Quiescent,
}

enum Event {
    Opened,
    Readable,
    Writable,
    Closed(Option<Error>),
}

fn seg_span(seg: &SendSegment) -> u32 {
    if seg.control { 1 } else { seg.len }
}

struct Inner {
    conv: u32,
    conv_locked: bool,
    state: State,

    snd_una: u32,
    snd_nxt: u32,
    snd_wnd: u32,
    swnd_scale: u8,

    rcv_nxt: u32,
    rcv_nxt_initialized: bool,
    rwnd_scale: u8,
    rcvbuf_capacity: usize,

    rto: rto::Estimator,
    rto_base: Option<u64>,

    cong: CongestionState,

    t_ack: Option<u64>,
    force_ack: bool,

    mss: u32,
    mss_level: usize,

    send_buffer: VecDeque<u8>,
    recv_buffer: VecDeque<u8>,

    unacked: VecDeque<SendSegment>,
    control_payloads: std::collections::HashMap<u32, Vec<u8>>,
    ooo: BTreeMap<u32, Vec<u8>>,

    last_send: u64,
    last_recv: u64,
    last_traffic: u64,
    last_peer_tsval: u32,

    shutdown: ShutdownMode,
    local_supports_wscale: bool,
    peer_supports_wscale: bool,

    options: Options,

    opened_fired: bool,
    closed_fired: bool,
}

impl Inner {
    fn new(options: Options) -> Self {
        let rwnd_scale = choose_scale(options.rcvbuf);
        let rcvbuf_capacity = round_up_capacity(options.rcvbuf, rwnd_scale);
        let mss = mtu::mss_for_level(0);
        let iss: u32 = rand::random();

        Self {
            conv: rand::random(),
            conv_locked: false,
            state: State::Listen,

            snd_una: iss,
            snd_nxt: iss,
            snd_wnd: 0xFFFF,
            swnd_scale: 0,

            rcv_nxt: 0,
            rcv_nxt_initialized: false,
            rwnd_scale,
            rcvbuf_capacity,

            rto: rto::Estimator::default(),
            rto_base: None,

            cong: CongestionState::new(mss),

            t_ack: None,
            force_ack: false,

            mss,
            mss_level: 0,

            send_buffer: VecDeque::new(),
            recv_buffer: VecDeque::new(),

            unacked: VecDeque::new(),
            control_payloads: std::collections::HashMap::new(),
            ooo: BTreeMap::new(),

            last_send: 0,
            last_recv: 0,
            last_traffic: 0,
            last_peer_tsval: 0,

            shutdown: ShutdownMode::None,
            local_supports_wscale: true,
            peer_supports_wscale: false,

            options,

            opened_fired: false,
            closed_fired: false,
        }
    }

    fn advertised_window(&self) -> u16 {
        let available = self.rcvbuf_capacity.saturating_sub(self.recv_buffer.len());
        ((available >> self.rwnd_scale).min(0xFFFF as usize)) as u16
    }

    fn fail(&mut self, err: Error, events: &mut Vec<Event>) {
        if self.state != State::Closed {
            self.state = State::Closed;
        }

        if !self.closed_fired {
            self.closed_fired = true;
            events.push(Event::Closed(Some(err)));
        }
    }

    fn check_graceful_close(&mut self, events: &mut Vec<Event>) {
        if self.shutdown == ShutdownMode::Graceful
            && self.state != State::Closed
            && self.send_buffer.is_empty()
            && self.unacked.is_empty()
            && self.t_ack.is_none()
        {
            self.state = State::Closed;

            if !self.closed_fired {
                self.closed_fired = true;
                events.push(Event::Closed(None));
            }
        }
    }

    fn enqueue_connect(&mut self, now: u64, notifier: &dyn Notifier) {
        let seq = self.snd_nxt;

        let opts: Vec<ConnectOption> = if self.local_supports_wscale {
            vec![ConnectOption::WindowScale(self.rwnd_scale)]
        } else {
            Vec::new()
        };

        let mut payload = vec![0u8];
        let mut opt_buf = BytesMut::new();
        encode_connect_options(&opts, &mut opt_buf);
        payload.extend_from_slice(&opt_buf);

        self.control_payloads.insert(seq, payload.clone());

        if self.unacked.is_empty() {
            self.rto_base = Some(now);
        }

        self.unacked.push_back(SendSegment { seq, len: 0, control: true, transmit_count: 1, sent_at: now });
        self.snd_nxt = seq.wrapping_add(1);

        self.write_segment(seq, true, &payload, now, notifier);
    }

    fn segment_payload(&self, seg: &SendSegment) -> Vec<u8> {
        if seg.control {
            self.control_payloads.get(&seg.seq).cloned().unwrap_or_default()
        } else {
            let offset = seg.seq.wrapping_sub(self.snd_una) as usize;
            self.send_buffer.iter().skip(offset).take(seg.len as usize).copied().collect()
        }
    }

    fn write_segment(&mut self, seq: u32, control: bool, payload: &[u8], now: u64, notifier: &dyn Notifier) -> WriteResult {
        let header = SegmentHeader {
            conv: self.conv,
            seq,
            ack: self.rcv_nxt,
            flags: if control { FLAG_CTRL } else { 0 },
            wnd: self.advertised_window(),
            tsval: now as u32,
            tsecr: self.last_peer_tsval,
        };

        let mut buf = BytesMut::with_capacity(24 + payload.len());
        header.encode(&mut buf);
        buf.extend_from_slice(payload);

        let result = notifier.write_packet(&buf);

        if result == WriteResult::Success {
            self.last_send = now;
            self.last_traffic = now;
            self.t_ack = None;
            self.force_ack = false;
        }

        result
    }

    fn flush_pending_ack(&mut self, now: u64, notifier: &dyn Notifier) {
        if self.t_ack.is_some() || self.force_ack {
            self.write_segment(self.snd_nxt, false, &[], now, notifier);
        }
    }

    fn send_probe(&mut self, now: u64, notifier: &dyn Notifier) {
        self.write_segment(self.snd_una, false, &[], now, notifier);
        self.last_send = now;
    }

    /// Drive outbound transmission: build and send new segments while the
    /// congestion/flow window allows, then flush a pending ack if nothing
    /// new could go out.
    fn attempt_send(&mut self, now: u64, notifier: &dyn Notifier, events: &mut Vec<Event>) {
        if self.shutdown == ShutdownMode::Forceful || self.state == State::Closed {
            return;
        }

        let buffer_was_full = self.send_buffer.len() >= self.options.sndbuf;

        loop {
            let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
            let bonus = self.cong.limited_transmit_bonus(self.mss);
            let effective_window = self.snd_wnd.min(self.cong.cwnd.saturating_add(bonus));
            let usable = effective_window.saturating_sub(inflight);

            let buffered_total = self.send_buffer.len() as u32;
            let unsent = buffered_total.saturating_sub(inflight);

            let mut available = unsent.min(self.mss).min(usable);

            if usable > 0 && effective_window > 0 && usable < effective_window / 4 && unsent > usable {
                available = 0;
            }

            if available == 0 {
                self.flush_pending_ack(now, notifier);
                break;
            }

            if self.nagling() && available < self.mss && inflight > 0 {
                self.flush_pending_ack(now, notifier);
                break;
            }

            let seg_seq = self.snd_nxt;
            let seg = SendSegment { seq: seg_seq, len: available, control: false, transmit_count: 1, sent_at: now };
            let payload = self.segment_payload(&seg);

            match self.write_segment(seg_seq, false, &payload, now, notifier) {
                WriteResult::Success => {
                    if self.unacked.is_empty() {
                        self.rto_base = Some(now);
                    }
                    self.unacked.push_back(seg);
                    self.snd_nxt = seg_seq.wrapping_add(available);
                }
                WriteResult::TooLarge => {
                    self.step_down_mtu(events);
                    if self.state == State::Closed {
                        break;
                    }
                }
                WriteResult::Failed => {
                    break;
                }
            }
        }

        if buffer_was_full && (self.options.sndbuf.saturating_sub(self.send_buffer.len())) > 0 {
            events.push(Event::Writable);
        }
    }

    fn nagling(&self) -> bool {
        !self.options.nodelay
    }

    fn step_down_mtu(&mut self, events: &mut Vec<Event>) {
        if self.mss_level + 1 >= mtu::MTU_TABLE.len() {
            self.fail(Error::MtuExhausted, events);
            return;
        }

        self.mss_level += 1;
        self.mss = mtu::mss_for_level(self.mss_level);
        self.cong.cwnd = self.cong.cwnd.max(self.mss);
        self.cong.ssthresh = self.cong.ssthresh.max(2 * self.mss);

        log::debug!("mtu too large, stepping mss down to level {} ({} bytes)", self.mss_level, self.mss);
    }

    fn on_rto(&mut self, now: u64, notifier: &dyn Notifier, events: &mut Vec<Event>) {
        let Some(seg) = self.unacked.front().cloned() else {
            self.rto_base = None;
            return;
        };

        let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
        self.cong.on_retransmit_timeout(self.mss, inflight);
        self.rto.backoff(self.state == State::Established);

        let new_count = seg.transmit_count + 1;
        let limit = if self.state == State::Established { 15 } else { 30 };

        if new_count > limit {
            self.fail(Error::TimedOut, events);
            return;
        }

        if let Some(front) = self.unacked.front_mut() {
            front.transmit_count = new_count;
            front.sent_at = now;
        }
        self.rto_base = Some(now);

        let payload = self.segment_payload(&seg);
        log::debug!("retransmitting pseudo-tcp segment seq={} attempt={new_count}", seg.seq);

        match self.write_segment(seg.seq, seg.control, &payload, now, notifier) {
            WriteResult::TooLarge => self.step_down_mtu(events),
            WriteResult::Success | WriteResult::Failed => {}
        }
    }

    fn process_ack(&mut self, ack: u32, now: u64, tsecr: u32, notifier: &dyn Notifier, events: &mut Vec<Event>) {
        if seq::lt(ack, self.snd_una) {
            return;
        }

        if ack == self.snd_una {
            if self.snd_una != self.snd_nxt {
                let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
                if self.cong.on_duplicate_ack(self.mss, inflight, self.snd_nxt) {
                    if let Some(seg) = self.unacked.front().cloned() {
                        let payload = self.segment_payload(&seg);
                        self.write_segment(seg.seq, seg.control, &payload, now, notifier);
                    }
                }
            }
            return;
        }

        let was_full = self.send_buffer.len() >= self.options.sndbuf;

        self.snd_una = ack;

        while let Some(seg) = self.unacked.front() {
            if seq::le(seg.seq.wrapping_add(seg_span(seg)), self.snd_una) {
                let seg = self.unacked.pop_front().unwrap();
                self.control_payloads.remove(&seg.seq);
                if !seg.control {
                    for _ in 0..seg.len {
                        self.send_buffer.pop_front();
                    }
                }
            } else {
                break;
            }
        }

        self.rto_base = self.unacked.front().map(|s| s.sent_at);

        if tsecr != 0 {
            let rtt = (now as u32).wrapping_sub(tsecr) as u64;
            self.rto.sample(rtt);
        }

        let inflight = self.snd_nxt.wrapping_sub(self.snd_una);
        if self.cong.recover != 0 && seq::ge(ack, self.cong.recover) {
            self.cong.exit_recovery(self.mss, inflight);
            self.cong.recover = 0;
        } else if self.cong.recover == 0 {
            self.cong.on_new_ack(self.mss);
        }

        if was_full && self.send_buffer.len() < self.options.sndbuf {
            events.push(Event::Writable);
        }
    }

    fn push_recv(&mut self, bytes: &[u8]) {
        self.recv_buffer.extend(bytes.iter().copied());
    }

    fn drain_ooo(&mut self) {
        while let Some((&seq, _)) = self.ooo.iter().next() {
            if seq == self.rcv_nxt {
                let (_, bytes) = self.ooo.pop_first().unwrap();
                self.rcv_nxt = self.rcv_nxt.wrapping_add(bytes.len() as u32);
                self.push_recv(&bytes);
            } else {
                break;
            }
        }
    }

    fn on_data_segment(&mut self, seg_seq: u32, payload: &[u8], now: u64) {
        if payload.is_empty() {
            return;
        }

        if seg_seq == self.rcv_nxt {
            self.rcv_nxt = self.rcv_nxt.wrapping_add(payload.len() as u32);
            self.push_recv(payload);
            self.drain_ooo();

            if self.options.ack_delay_ms == 0 {
                self.force_ack = true;
            } else {
                self.t_ack.get_or_insert(now + self.options.ack_delay_ms);
            }
        } else if seq::gt(seg_seq, self.rcv_nxt) {
            let space = self.rcvbuf_capacity.saturating_sub(self.recv_buffer.len());
            if payload.len() <= space {
                self.ooo.entry(seg_seq).or_insert_with(|| payload.to_vec());
            }
            self.force_ack = true;
        } else {
            let seg_end = seg_seq.wrapping_add(payload.len() as u32);
            if seq::gt(seg_end, self.rcv_nxt) {
                let skip = self.rcv_nxt.wrapping_sub(seg_seq) as usize;
                let trimmed = payload[skip..].to_vec();
                self.rcv_nxt = self.rcv_nxt.wrapping_add(trimmed.len() as u32);
                self.push_recv(&trimmed);
                self.drain_ooo();
            }
            self.force_ack = true;
        }
    }

    fn on_control_segment(&mut self, payload: &[u8], now: u64, notifier: &dyn Notifier, events: &mut Vec<Event>) {
        if payload.is_empty() {
            return;
        }

        let opcode = payload[0];
        if opcode != 0 {
            log::trace!("ignoring unknown pseudo-tcp control opcode {opcode}");
            return;
        }

        let opts = decode_connect_options(&payload[1..]).unwrap_or_default();
        let peer_wscale = opts.iter().find_map(|o| match o {
            ConnectOption::WindowScale(shift) => Some(*shift),
            ConnectOption::MssUnsupported => None,
        });

        match peer_wscale {
            Some(shift) => {
                self.swnd_scale = shift;
                self.peer_supports_wscale = true;
            }
            None if self.state == State::Listen || self.state == State::SynSent => {
                self.rwnd_scale = 0;
                self.rcvbuf_capacity = options::DEFAULT_RCVBUF;
                self.peer_supports_wscale = false;
            }
            None => {}
        }

        match self.state {
            State::Listen => {
                self.state = State::SynReceived;
                self.enqueue_connect(now, notifier);
            }
            State::SynSent => {
                self.state = State::Established;
                if !self.opened_fired {
                    self.opened_fired = true;
                    events.push(Event::Opened);
                }
            }
            _ => {}
        }
    }

    fn on_segment(&mut self, header: &SegmentHeader, payload: &[u8], now: u64, notifier: &dyn Notifier, events: &mut Vec<Event>) {
        if self.state == State::Closed {
            return;
        }

        if !self.conv_locked {
            self.conv = header.conv;
            self.conv_locked = true;
        } else if header.conv != self.conv {
            log::trace!("dropping segment with mismatched conversation id");
            return;
        }

        if header.is_reset() {
            self.fail(Error::ConnectionReset, events);
            return;
        }

        self.last_recv = now;
        self.last_traffic = now;
        self.last_peer_tsval = header.tsval;
        self.snd_wnd = (header.wnd as u32) << self.swnd_scale;

        if !self.rcv_nxt_initialized {
            self.rcv_nxt = header.seq;
            self.rcv_nxt_initialized = true;
        }

        let mut became_open = false;

        if header.is_ctrl() {
            if header.seq == self.rcv_nxt {
                self.rcv_nxt = self.rcv_nxt.wrapping_add(1);
                self.force_ack = true;
            }
            self.on_control_segment(payload, now, notifier, events);
        } else {
            self.on_data_segment(header.seq, payload, now);

            if self.state == State::SynReceived {
                self.state = State::Established;
                became_open = true;
            }
        }

        if became_open && !self.opened_fired {
            self.opened_fired = true;
            events.push(Event::Opened);
        }

        // tsecr is 0 only when the peer sent this before receiving anything
        // from us, meaning its ack field isn't derived from our sequence
        // space yet and must be ignored rather than treated as a real ack.
        if header.tsecr != 0 {
            self.process_ack(header.ack, now, header.tsecr, notifier, events);
        }
        self.attempt_send(now, notifier, events);
        self.check_graceful_close(events);

        if !payload.is_empty() && !header.is_ctrl() {
            events.push(Event::Readable);
        }
    }
}

fn choose_scale(capacity: usize) -> u8 {
    let mut scale = 0u8;
    while (capacity >> scale) > 0xFFFF {
        scale += 1;
    }
    scale
}

fn round_up_capacity(capacity: usize, scale: u8) -> usize {
    let unit = 1usize << scale;
    capacity.div_ceil(unit) * unit
}

/// A user-space reliable byte stream carried as pseudo-TCP segments over
/// whatever transport the owning socket reader feeds in through
/// `notify_packet`. See the module doc for the threading contract.
pub struct PseudoTcp {
    inner: Mutex<Inner>,
    notifier: Arc<dyn Notifier>,
}

impl PseudoTcp {
    pub fn new(notifier: Arc<dyn Notifier>) -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(Inner::new(Options::default())), notifier })
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    fn fire(&self, events: Vec<Event>) {
        for event in events {
            match event {
                Event::Opened => self.notifier.tcp_opened(),
                Event::Readable => self.notifier.tcp_readable(),
                Event::Writable => self.notifier.tcp_writable(),
                Event::Closed(err) => self.notifier.tcp_closed(err),
            }
        }
    }

    /// Active-open: transition to `syn-sent` and enqueue the connect
    /// control segment.
    pub fn connect(&self) -> Result<(), Error> {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.state != State::Listen {
                return Err(Error::NotConnected);
            }

            inner.state = State::SynSent;

            let now = now_ms();
            inner.enqueue_connect(now, self.notifier.as_ref());
            inner.attempt_send(now, self.notifier.as_ref(), &mut events);
        }
        self.fire(events);
        Ok(())
    }

    /// `force=true` transitions to `closed` immediately without waiting for
    /// peers to acknowledge; `force=false` delivers buffered data and fires
    /// `tcp_closed` once the send buffer drains and no ack is owed.
    pub fn close(&self, force: bool) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();

            if force {
                inner.shutdown = ShutdownMode::Forceful;
                inner.fail(Error::Closed, &mut events);
            } else {
                inner.shutdown = ShutdownMode::Graceful;
                inner.check_graceful_close(&mut events);
            }
        }
        self.fire(events);
    }

    pub fn notify_packet(&self, bytes: &[u8]) -> Result<(), Error> {
        let (header, payload) = SegmentHeader::decode(bytes).map_err(|_| Error::Malformed)?;

        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();
            let now = now_ms();
            inner.on_segment(&header, payload, now, self.notifier.as_ref(), &mut events);
        }
        self.fire(events);
        Ok(())
    }

    pub fn next_clock(&self, now: u64) -> ClockResult {
        let inner = self.inner.lock();

        if inner.shutdown == ShutdownMode::Forceful || inner.state == State::Closed {
            return ClockResult::Quiescent;
        }

        let mut deadlines = Vec::with_capacity(3);
        if let Some(t) = inner.t_ack {
            deadlines.push(t);
        }
        if let Some(base) = inner.rto_base {
            deadlines.push(base + inner.rto.rto);
        }
        if inner.snd_wnd == 0 && inner.last_send > 0 {
            deadlines.push(inner.last_send + inner.rto.rto);
        }

        match deadlines.into_iter().min() {
            Some(deadline) => ClockResult::IntervalMs(deadline.saturating_sub(now)),
            None => ClockResult::IntervalMs(4000),
        }
    }

    /// Process at most one elapsed deadline: delayed ack, then RTO, then
    /// zero-window probe.
    pub fn notify_clock(&self, now: u64) {
        let mut events = Vec::new();
        {
            let mut inner = self.inner.lock();

            if let Some(t) = inner.t_ack {
                if now >= t {
                    inner.flush_pending_ack(now, self.notifier.as_ref());
                    inner.attempt_send(now, self.notifier.as_ref(), &mut events);
                    inner.check_graceful_close(&mut events);
                    drop(inner);
                    self.fire(events);
                    return;
                }
            }

            if let Some(base) = inner.rto_base {
                if base + inner.rto.rto <= now {
                    inner.on_rto(now, self.notifier.as_ref(), &mut events);
                    drop(inner);
                    self.fire(events);
                    return;
                }
            }

            if inner.snd_wnd == 0 && inner.last_send > 0 && inner.last_send + inner.rto.rto <= now {
                inner.send_probe(now, self.notifier.as_ref());
            }
        }
        self.fire(events);
    }

    pub fn send(&self, buf: &[u8]) -> Result<usize, Error> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();

            if inner.state == State::Closed || inner.shutdown != ShutdownMode::None {
                return Err(Error::NotConnected);
            }

            let space = inner.options.sndbuf.saturating_sub(inner.send_buffer.len());
            let n = buf.len().min(space);
            inner.send_buffer.extend(buf[..n].iter().copied());

            let now = now_ms();
            inner.attempt_send(now, self.notifier.as_ref(), &mut events);

            Ok(n)
        };
        self.fire(events);
        result
    }

    pub fn recv(&self, buf: &mut [u8]) -> Result<usize, Error> {
        let mut events = Vec::new();
        let result = {
            let mut inner = self.inner.lock();

            if inner.recv_buffer.is_empty() {
                if inner.state == State::Closed {
                    return Ok(0);
                }
                return Err(Error::WouldBlock);
            }

            let before_space = inner.rcvbuf_capacity.saturating_sub(inner.recv_buffer.len());
            let was_zero_window = before_space == 0;

            let n = buf.len().min(inner.recv_buffer.len());
            for slot in buf[..n].iter_mut() {
                *slot = inner.recv_buffer.pop_front().unwrap();
            }

            let min_reclaim = (inner.rcvbuf_capacity / 8).min(inner.mss as usize).max(1);
            if was_zero_window && n >= min_reclaim {
                inner.force_ack = true;
            }

            let now = now_ms();
            inner.attempt_send(now, self.notifier.as_ref(), &mut events);

            Ok(n)
        };
        self.fire(events);
        result
    }

    pub fn set_option(&self, kind: OptionKind, value: i64) {
        let mut inner = self.inner.lock();

        if matches!(kind, OptionKind::SndBuf | OptionKind::RcvBuf) && inner.state != State::Listen {
            log::warn!("ignoring {kind:?} change after connect has started");
            return;
        }

        inner.options.set(kind, value);

        if kind == OptionKind::RcvBuf {
            inner.rwnd_scale = choose_scale(inner.options.rcvbuf);
            inner.rcvbuf_capacity = round_up_capacity(inner.options.rcvbuf, inner.rwnd_scale);
        }
    }

    pub fn get_option(&self, kind: OptionKind) -> i64 {
        self.inner.lock().options.get(kind)
    }

    /// Adjust the MSS ladder to fit a known path MTU, e.g. from ICE
    /// candidate-pair discovery.
    pub fn notify_mtu(&self, mtu: u32) {
        let mut inner = self.inner.lock();
        inner.mss_level = mtu::level_for_mtu(mtu);
        inner.mss = mtu::mss_for_level(inner.mss_level);
        inner.cong.cwnd = inner.cong.cwnd.max(inner.mss);
        inner.cong.ssthresh = inner.cong.ssthresh.max(2 * inner.mss);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::WriteResult;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct Capture {
        packets: StdMutex<Vec<Vec<u8>>>,
        opened: std::sync::atomic::AtomicUsize,
        closed: std::sync::atomic::AtomicUsize,
        readable: std::sync::atomic::AtomicUsize,
    }

    impl Notifier for Capture {
        fn write_packet(&self, bytes: &[u8]) -> WriteResult {
            self.packets.lock().unwrap().push(bytes.to_vec());
            WriteResult::Success
        }

        fn tcp_opened(&self) {
            self.opened.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn tcp_readable(&self) {
            self.readable.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }

        fn tcp_writable(&self) {}

        fn tcp_closed(&self, _err: Option<Error>) {
            self.closed.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        }
    }

    fn drain(capture: &Arc<Capture>) -> Vec<Vec<u8>> {
        std::mem::take(&mut *capture.packets.lock().unwrap())
    }

    #[test]
    fn connect_enqueues_a_control_segment_carrying_window_scale() {
        let capture = Arc::new(Capture::default());
        let engine = PseudoTcp::new(capture.clone());
        engine.connect().unwrap();

        let packets = drain(&capture);
        assert_eq!(packets.len(), 1);

        let (header, payload) = SegmentHeader::decode(&packets[0]).unwrap();
        assert!(header.is_ctrl());
        assert_eq!(payload[0], 0);
        assert_eq!(engine.state(), State::SynSent);
    }

    #[test]
    fn handshake_reaches_established_on_both_sides() {
        let client_capture = Arc::new(Capture::default());
        let server_capture = Arc::new(Capture::default());

        let client = PseudoTcp::new(client_capture.clone());
        let server = PseudoTcp::new(server_capture.clone());

        client.connect().unwrap();
        let client_syn = drain(&client_capture);
        server.notify_packet(&client_syn[0]).unwrap();
        assert_eq!(server.state(), State::SynReceived);

        let server_synack = drain(&server_capture);
        client.notify_packet(&server_synack[0]).unwrap();
        assert_eq!(client.state(), State::Established);
        assert_eq!(client_capture.opened.load(std::sync::atomic::Ordering::SeqCst), 1);

        let client_ack = drain(&client_capture);
        server.notify_packet(&client_ack[0]).unwrap();
        assert_eq!(server.state(), State::Established);
        assert_eq!(server_capture.opened.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn loopback_transfer_is_byte_for_byte() {
        let client_capture = Arc::new(Capture::default());
        let server_capture = Arc::new(Capture::default());

        let client = PseudoTcp::new(client_capture.clone());
        let server = PseudoTcp::new(server_capture.clone());

        client.connect().unwrap();
        for packet in drain(&client_capture) {
            server.notify_packet(&packet).unwrap();
        }
        for packet in drain(&server_capture) {
            client.notify_packet(&packet).unwrap();
        }
        for packet in drain(&client_capture) {
            server.notify_packet(&packet).unwrap();
        }

        assert_eq!(client.state(), State::Established);
        assert_eq!(server.state(), State::Established);

        let payload = b"hello pseudo-tcp world";
        assert_eq!(client.send(payload).unwrap(), payload.len());

        for packet in drain(&client_capture) {
            server.notify_packet(&packet).unwrap();
        }

        let mut buf = [0u8; 64];
        let n = server.recv(&mut buf).unwrap();
        assert_eq!(&buf[..n], payload);

        for packet in drain(&server_capture) {
            client.notify_packet(&packet).unwrap();
        }
    }

    #[test]
    fn out_of_order_segment_is_held_until_the_gap_closes() {
        let capture = Arc::new(Capture::default());
        let engine = PseudoTcp::new(capture.clone());

        // Force established state directly via a synthetic handshake.
        engine.connect().unwrap();
        drain(&capture);

        let mut inner = engine.inner.lock();
        inner.state = State::Established;
        inner.rcv_nxt_initialized = true;
        inner.rcv_nxt = 100;
        drop(inner);

        let header_b = SegmentHeader { conv: engine.inner.lock().conv, seq: 103, ack: 0, flags: 0, wnd: 4096, tsval: 1, tsecr: 0 };
        let mut buf = BytesMut::new();
        header_b.encode(&mut buf);
        buf.extend_from_slice(b"456");
        engine.notify_packet(&buf).unwrap();

        let mut out = [0u8; 16];
        assert!(matches!(engine.recv(&mut out), Err(Error::WouldBlock)));

        let header_a = SegmentHeader { conv: engine.inner.lock().conv, seq: 100, ack: 0, flags: 0, wnd: 4096, tsval: 1, tsecr: 0 };
        let mut buf = BytesMut::new();
        header_a.encode(&mut buf);
        buf.extend_from_slice(b"123");
        engine.notify_packet(&buf).unwrap();

        let n = engine.recv(&mut out).unwrap();
        assert_eq!(&out[..n], b"123456");
    }

    #[test]
    fn reset_flag_closes_the_engine() {
        let capture = Arc::new(Capture::default());
        let engine = PseudoTcp::new(capture.clone());
        engine.connect().unwrap();
        drain(&capture);

        let conv = engine.inner.lock().conv;
        let header = SegmentHeader { conv, seq: 0, ack: 0, flags: FLAG_RST, wnd: 0, tsval: 0, tsecr: 0 };
        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        engine.notify_packet(&buf).unwrap();
        assert_eq!(engine.state(), State::Closed);
        assert_eq!(capture.closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn force_close_is_immediate_and_fires_once() {
        let capture = Arc::new(Capture::default());
        let engine = PseudoTcp::new(capture.clone());
        engine.close(true);
        engine.close(true);
        assert_eq!(engine.state(), State::Closed);
        assert_eq!(capture.closed.load(std::sync::atomic::Ordering::SeqCst), 1);
    }

    #[test]
    fn next_clock_is_quiescent_once_forcefully_closed() {
        let capture = Arc::new(Capture::default());
        let engine = PseudoTcp::new(capture.clone());
        engine.close(true);
        assert_eq!(engine.next_clock(0), ClockResult::Quiescent);
    }
}
