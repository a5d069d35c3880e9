/// Outcome of handing a segment to the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Success,
    Failed,
    TooLarge,
}

/// Callback surface the engine drives as its state changes. The owning
/// socket reader is expected to forward `notify_packet` calls back in and
/// drive `notify_clock`/`next_clock`; this trait is the other direction.
pub trait Notifier: Send + Sync {
    fn write_packet(&self, bytes: &[u8]) -> WriteResult;
    fn tcp_opened(&self);
    fn tcp_readable(&self);
    fn tcp_writable(&self);
    fn tcp_closed(&self, err: Option<crate::Error>);
}
