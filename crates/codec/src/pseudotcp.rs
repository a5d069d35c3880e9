//! Pseudo-TCP segment wire format.
//!
//! The segment header is 24 bytes: a conversation id so both ends can tell
//! segments for this session apart from stray traffic on the same shared
//! socket, the usual seq/ack/window triad, one flags byte, and a timestamp
//! pair used by the RTT estimator instead of TCP's options-based timestamp.
//! Everything past the header is payload, except for CTRL segments where the
//! payload is itself a TCP-option-style list (used for the connect
//! handshake).

use bytes::{Buf, BufMut, BytesMut};

use crate::Error;

pub const HEADER_SIZE: usize = 24;

/// Segment carries data (or, for CTRL segments, an empty/option payload)
/// rather than being a pure ack.
pub const FLAG_CTRL: u8 = 0x01;

/// Hard reset: the receiving engine drops to `closed` immediately.
pub const FLAG_RST: u8 = 0x02;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub conv: u32,
    pub seq: u32,
    pub ack: u32,
    pub flags: u8,
    pub wnd: u16,
    pub tsval: u32,
    pub tsecr: u32,
}

impl SegmentHeader {
    pub fn is_ctrl(&self) -> bool {
        self.flags & FLAG_CTRL != 0
    }

    pub fn is_reset(&self) -> bool {
        self.flags & FLAG_RST != 0
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32(self.conv);
        buf.put_u32(self.seq);
        buf.put_u32(self.ack);
        buf.put_u8(self.flags);
        buf.put_u16(self.wnd);
        buf.put_u32(self.tsval);
        buf.put_u32(self.tsecr);
        buf.put_u8(0);
    }

    /// Decode the header, returning it alongside the remaining payload
    /// slice.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use codec::pseudotcp::SegmentHeader;
    ///
    /// let header = SegmentHeader { conv: 1, seq: 2, ack: 3, flags: 0, wnd: 4096, tsval: 10, tsecr: 0 };
    ///
    /// let mut buf = BytesMut::new();
    /// header.encode(&mut buf);
    /// buf.extend_from_slice(b"payload");
    ///
    /// let (decoded, payload) = SegmentHeader::decode(&buf).unwrap();
    /// assert_eq!(decoded, header);
    /// assert_eq!(payload, b"payload");
    /// ```
    pub fn decode(bytes: &[u8]) -> Result<(Self, &[u8]), Error> {
        if bytes.len() < HEADER_SIZE {
            return Err(Error::Malformed);
        }

        let mut cursor = bytes;
        let conv = cursor.get_u32();
        let seq = cursor.get_u32();
        let ack = cursor.get_u32();
        let flags = cursor.get_u8();
        let wnd = cursor.get_u16();
        let tsval = cursor.get_u32();
        let tsecr = cursor.get_u32();
        cursor.get_u8();

        let header = Self { conv, seq, ack, flags, wnd, tsval, tsecr };
        Ok((header, &bytes[HEADER_SIZE..]))
    }
}

/// Options carried in a CTRL segment's connect handshake, modeled after
/// TCP's kind/length/value option encoding (RFC 9293 Section 3.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOption {
    MssUnsupported,
    WindowScale(u8),
}

mod kind {
    pub const EOL: u8 = 0;
    pub const NOP: u8 = 1;
    pub const MSS: u8 = 2;
    pub const WND_SCALE: u8 = 3;
}

pub fn encode_connect_options(options: &[ConnectOption], buf: &mut BytesMut) {
    for option in options {
        match option {
            ConnectOption::MssUnsupported => {
                buf.put_u8(kind::MSS);
                buf.put_u8(2);
            }
            ConnectOption::WindowScale(shift) => {
                buf.put_u8(kind::WND_SCALE);
                buf.put_u8(3);
                buf.put_u8(*shift);
            }
        }
    }

    buf.put_u8(kind::EOL);
}

/// Parse a connect-segment option list.
///
/// # Test
///
/// ```
/// use bytes::BytesMut;
/// use codec::pseudotcp::{ConnectOption, decode_connect_options, encode_connect_options};
///
/// let options = [ConnectOption::WindowScale(3), ConnectOption::MssUnsupported];
///
/// let mut buf = BytesMut::new();
/// encode_connect_options(&options, &mut buf);
///
/// let decoded = decode_connect_options(&buf).unwrap();
/// assert_eq!(decoded, options);
/// ```
pub fn decode_connect_options(bytes: &[u8]) -> Result<Vec<ConnectOption>, Error> {
    let mut out = Vec::new();
    let mut offset = 0;

    while offset < bytes.len() {
        match bytes[offset] {
            kind::EOL => break,
            kind::NOP => {
                offset += 1;
            }
            kind::MSS => {
                out.push(ConnectOption::MssUnsupported);
                offset += 2;
            }
            kind::WND_SCALE => {
                if offset + 2 >= bytes.len() {
                    return Err(Error::Malformed);
                }

                out.push(ConnectOption::WindowScale(bytes[offset + 2]));
                offset += 3;
            }
            _ => return Err(Error::Malformed),
        }
    }

    Ok(out)
}
