//! STUN message encoding/decoding.
//!
//! [RFC8489 Section 5](https://datatracker.ietf.org/doc/html/rfc8489#section-5):
//! a 20-byte header (2-byte type, 2-byte length, 4-byte magic cookie,
//! 12-byte transaction id) followed by a sequence of TLV attributes, each
//! padded so its value is a multiple of 4 bytes.

pub mod attributes;
pub mod methods;

use bytes::{BufMut, BytesMut};

use crate::{
    Attributes, Error, alignment_32,
    crypto::{fingerprint, hmac_sha1},
};

use self::{
    attributes::{Attribute, AttributeType, Fingerprint, MessageIntegrity},
    methods::Method,
};

pub const MAGIC_NUMBER: u32 = 0x2112_A442;

/// Builds a STUN message into a caller-owned `BytesMut`.
///
/// The caller drives attribute order; `flush` appends MESSAGE-INTEGRITY (if
/// a key is supplied) and then FINGERPRINT, patching the length field as it
/// goes so both cover exactly the bytes RFC8489 Section 15.4/15.5 require.
pub struct MessageEncoder<'a> {
    buf: &'a mut BytesMut,
    token: &'a [u8],
}

impl<'a> MessageEncoder<'a> {
    pub fn new(method: Method, token: &'a [u8], buf: &'a mut BytesMut) -> Self {
        buf.clear();

        let kind: u16 = method.into();
        buf.put_u16(kind);
        buf.put_u16(0);
        buf.put_u32(MAGIC_NUMBER);
        buf.put(token);

        Self { buf, token }
    }

    pub fn append<A: Attribute<'a>>(&mut self, value: A::Item) {
        let mut value_bytes = BytesMut::new();
        A::serialize(value, &mut value_bytes, self.token);

        let kind: u16 = A::TYPE.into();
        let len = value_bytes.len();

        self.buf.put_u16(kind);
        self.buf.put_u16(len as u16);
        self.buf.put(value_bytes.as_ref());

        for _ in 0..alignment_32(len) {
            self.buf.put_u8(0);
        }

        self.set_len((self.buf.len() - 20) as u16);
    }

    /// Append an attribute by raw numeric type and pre-encoded value bytes,
    /// for attribute kinds this core doesn't model with the [`Attribute`]
    /// trait (comprehension-required attributes outside the known set, used
    /// to exercise the 420 Unknown Attribute path).
    pub fn append_raw(&mut self, kind: u16, value: &[u8]) {
        let len = value.len();

        self.buf.put_u16(kind);
        self.buf.put_u16(len as u16);
        self.buf.put(value);

        for _ in 0..alignment_32(len) {
            self.buf.put_u8(0);
        }

        self.set_len((self.buf.len() - 20) as u16);
    }

    fn set_len(&mut self, len: u16) {
        self.buf[2..4].copy_from_slice(&len.to_be_bytes());
    }

    /// Finalize the message. `integrity_key` is the pre-shared password to
    /// sign with; pass `None` to skip MESSAGE-INTEGRITY entirely (used for
    /// messages sent before a credential is known, e.g. the initial Binding
    /// request when short-term credentials are not yet negotiated).
    pub fn flush(&mut self, integrity_key: Option<&[u8]>) -> Result<(), Error> {
        if let Some(key) = integrity_key {
            let mac = hmac_sha1(key, &[self.buf.as_ref()])?;
            self.append::<MessageIntegrity>(&mac);
        }

        let fp = fingerprint(self.buf.as_ref());
        self.append::<Fingerprint>(fp);

        Ok(())
    }
}

/// A decoded STUN message borrowing from the datagram it was parsed out of.
pub struct Message<'a> {
    buf: &'a [u8],
    method: Method,
    token: &'a [u8],
    attributes: &'a Attributes,
}

impl<'a> Message<'a> {
    pub fn method(&self) -> Method {
        self.method
    }

    pub fn token(&self) -> &'a [u8] {
        self.token
    }

    pub fn get<A: Attribute<'a>>(&self) -> Option<A::Item> {
        let range = self.attributes.get(A::TYPE.into())?;
        A::deserialize(&self.buf[range], self.token).ok()
    }

    pub fn get_all<A: Attribute<'a>>(&self) -> Vec<A::Item> {
        self.attributes
            .get_all(A::TYPE.into())
            .filter_map(|range| A::deserialize(&self.buf[range.clone()], self.token).ok())
            .collect()
    }

    /// Raw attribute type codes present on the wire that aren't in `known`,
    /// in the order first seen. Feeds the 420 Unknown Attribute response.
    /// Unlike `known`, these codes need not resolve to an [`AttributeType`]
    /// variant at all — that's the whole point of this path.
    pub fn unknown_attributes(&self, known: &[AttributeType]) -> Vec<u16> {
        let known: Vec<u16> = known.iter().map(|&k| k.into()).collect();
        self.attributes.unknown(&known)
    }

    /// Verify MESSAGE-INTEGRITY against `key`.
    ///
    /// # Test
    ///
    /// ```
    /// use bytes::BytesMut;
    /// use codec::Decoder;
    /// use codec::message::MessageEncoder;
    /// use codec::message::methods::BINDING_REQUEST;
    ///
    /// let token = [9u8; 12];
    /// let key = b"shared-secret";
    ///
    /// let mut buf = BytesMut::new();
    /// let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
    /// message.flush(Some(key)).unwrap();
    ///
    /// let mut decoder = Decoder::default();
    /// let message = decoder.decode(&buf).unwrap();
    /// assert!(message.integrity_check(key).is_ok());
    /// assert!(message.integrity_check(b"wrong-secret").is_err());
    /// ```
    pub fn integrity_check(&self, key: &[u8]) -> Result<(), Error> {
        let range = self
            .attributes
            .get(AttributeType::MessageIntegrity.into())
            .ok_or(Error::IntegrityNotFound)?;

        let header_end = range.start - 4;
        let mut prefix = self.buf[..header_end].to_vec();
        let patched_len = (range.end - 20) as u16;
        prefix[2..4].copy_from_slice(&patched_len.to_be_bytes());

        let mac = hmac_sha1(key, &[&prefix])?;
        if mac.as_slice() == &self.buf[range] {
            Ok(())
        } else {
            Err(Error::IntegrityFailed)
        }
    }

    /// Verify FINGERPRINT, if present.
    pub fn fingerprint_check(&self) -> Result<(), Error> {
        let range = self
            .attributes
            .get(AttributeType::Fingerprint.into())
            .ok_or(Error::Malformed)?;

        let header_end = range.start - 4;
        let mut prefix = self.buf[..header_end].to_vec();
        let patched_len = (range.end - 20) as u16;
        prefix[2..4].copy_from_slice(&patched_len.to_be_bytes());

        let expect = u32::from_be_bytes(self.buf[range].try_into()?);
        if fingerprint(&prefix) == expect {
            Ok(())
        } else {
            Err(Error::Malformed)
        }
    }

    pub fn message_size(bytes: &[u8]) -> Result<usize, Error> {
        if bytes.len() < 4 {
            return Err(Error::Malformed);
        }

        let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        Ok(20 + len)
    }

    pub(crate) fn decode(bytes: &'a [u8], attributes: &'a mut Attributes) -> Result<Self, Error> {
        if bytes.len() < 20 {
            return Err(Error::Malformed);
        }

        let kind = u16::from_be_bytes([bytes[0], bytes[1]]);
        let len = u16::from_be_bytes([bytes[2], bytes[3]]) as usize;
        let cookie = u32::from_be_bytes(bytes[4..8].try_into()?);

        if cookie != MAGIC_NUMBER {
            return Err(Error::BadMagicCookie);
        }

        if bytes.len() < 20 + len {
            return Err(Error::Malformed);
        }

        let method = Method::try_from(kind)?;
        let token = &bytes[8..20];

        let end = 20 + len;
        let mut offset = 20;

        while offset + 4 <= end {
            let attr_kind = u16::from_be_bytes([bytes[offset], bytes[offset + 1]]);
            let attr_len = u16::from_be_bytes([bytes[offset + 2], bytes[offset + 3]]) as usize;

            let value_start = offset + 4;
            let value_end = value_start + attr_len;

            if value_end > end {
                return Err(Error::Malformed);
            }

            attributes.append(attr_kind, value_start..value_end);

            offset = value_end + alignment_32(attr_len);
        }

        Ok(Self { buf: bytes, method, token, attributes })
    }
}
