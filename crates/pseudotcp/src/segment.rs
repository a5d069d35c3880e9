/// One unacknowledged outbound chunk. `control` marks it as carrying a
/// connect-handshake control payload rather than stream data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SendSegment {
    pub seq: u32,
    pub len: u32,
    pub control: bool,
    pub transmit_count: u32,
    pub sent_at: u64,
}

/// A received chunk that arrived out of order, kept until the hole before
/// it closes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecvSegmentDescriptor {
    pub seq: u32,
    pub len: u32,
}
