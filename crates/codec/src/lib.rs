//! ## Session Traversal Utilities for NAT (STUN) wire codec
//!
//! [RFC8489]: https://tools.ietf.org/html/rfc8489
//! [RFC5389]: https://tools.ietf.org/html/rfc5389
//!
//! This crate only encodes/decodes the bytes on the wire. It knows nothing
//! about retransmission, transaction tables, or the pseudo-TCP state
//! machine built on top of it; those live in the `transaction` and
//! `pseudotcp` crates.

pub mod crypto;
pub mod message;
pub mod pseudotcp;

use self::message::Message;

use std::{array::TryFromSliceError, ops::Range, str::Utf8Error};

#[derive(Debug)]
pub enum Error {
    Malformed,
    IntegrityNotFound,
    IntegrityFailed,
    BadMagicCookie,
    UnknownMethod,
    Utf8Error(Utf8Error),
    TryFromSliceError(TryFromSliceError),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl From<Utf8Error> for Error {
    fn from(value: Utf8Error) -> Self {
        Self::Utf8Error(value)
    }
}

impl From<TryFromSliceError> for Error {
    fn from(value: TryFromSliceError) -> Self {
        Self::TryFromSliceError(value)
    }
}

/// A cache of the list of attributes found while decoding a message, keyed
/// by the raw 16-bit attribute type on the wire rather than the closed
/// [`AttributeType`](self::message::attributes::AttributeType) enum this
/// core knows how to interpret. An attribute type this core doesn't model
/// still gets a slot here with its value range kept intact, so it survives
/// round-trip as opaque bytes and can still be reported by `unknown()`.
/// This is for internal use only; `Decoder` reuses one across calls to
/// avoid reallocating on every datagram.
#[derive(Debug, Clone)]
pub struct Attributes(Vec<(u16, Range<usize>)>);

impl Default for Attributes {
    fn default() -> Self {
        Self(Vec::with_capacity(16))
    }
}

impl Attributes {
    pub fn append(&mut self, kind: u16, range: Range<usize>) {
        self.0.push((kind, range));
    }

    pub fn get(&self, kind: u16) -> Option<Range<usize>> {
        self.0
            .iter()
            .find(|(k, _)| *k == kind)
            .map(|(_, v)| v.clone())
    }

    pub fn get_all<'a>(&'a self, kind: u16) -> impl Iterator<Item = &'a Range<usize>> {
        self.0.iter().filter(move |(k, _)| *k == kind).map(|(_, v)| v)
    }

    /// Every attribute type present that is not in `known`, in wire order,
    /// deduplicated. Used to build the 420 Unknown Attribute error response.
    pub fn unknown(&self, known: &[u16]) -> Vec<u16> {
        let mut out = Vec::new();
        for (kind, _) in &self.0 {
            if !known.contains(kind) && !out.contains(kind) {
                out.push(*kind);
            }
        }
        out
    }

    pub fn clear(&mut self) {
        self.0.clear();
    }
}

#[derive(Default)]
pub struct Decoder(Attributes);

impl Decoder {
    /// Decode a STUN message from `bytes`.
    ///
    /// # Test
    ///
    /// ```
    /// use codec::Decoder;
    /// use codec::message::{MessageEncoder, attributes::UserName};
    /// use codec::message::methods::BINDING_REQUEST;
    /// use bytes::BytesMut;
    ///
    /// let token = [1u8; 12];
    /// let mut buf = BytesMut::new();
    /// let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
    /// message.append::<UserName>("alice");
    /// message.flush(None).unwrap();
    ///
    /// let mut decoder = Decoder::default();
    /// let message = decoder.decode(&buf).unwrap();
    /// assert_eq!(message.get::<UserName>(), Some("alice"));
    /// ```
    pub fn decode<'a>(&'a mut self, bytes: &'a [u8]) -> Result<Message<'a>, Error> {
        self.0.clear();
        Message::decode(bytes, &mut self.0)
    }

    pub fn message_size(bytes: &[u8]) -> Result<usize, Error> {
        Message::message_size(bytes)
    }
}

/// compute padding size.
///
/// STUN stipulates that the attribute content is a multiple of 4.
///
/// # Test
///
/// ```
/// use codec::alignment_32;
///
/// assert_eq!(alignment_32(4), 0);
/// assert_eq!(alignment_32(0), 0);
/// assert_eq!(alignment_32(5), 3);
/// ```
#[inline(always)]
pub fn alignment_32(size: usize) -> usize {
    let range = size % 4;
    if size == 0 || range == 0 {
        return 0;
    }

    4 - range
}
