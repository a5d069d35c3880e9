//! STUN attributes the transaction layer needs to inspect.
//!
//! Per the data model, everything else is opaque to this core and is left
//! to whatever ICE/TURN layer sits above it; only MESSAGE-INTEGRITY,
//! FINGERPRINT, USERNAME, ERROR-CODE, and UNKNOWN-ATTRIBUTES are decoded.

use bytes::{BufMut, BytesMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::Error;

#[derive(PartialEq, Eq, Hash, Debug, Clone, Copy, IntoPrimitive, TryFromPrimitive)]
#[repr(u16)]
pub enum AttributeType {
    UserName = 0x0006,
    MessageIntegrity = 0x0008,
    ErrorCode = 0x0009,
    UnknownAttributes = 0x000A,
    Fingerprint = 0x8028,
}

/// An attribute codec. `Item` is the value type the core code works with;
/// `serialize`/`deserialize` convert to/from the TLV value bytes. `token` is
/// the 12-byte transaction id, unused by every attribute handled here but
/// kept in the signature so XOR-family attributes (not needed by this core)
/// can be slotted in later without changing the trait.
pub trait Attribute<'a>: Sized {
    const TYPE: AttributeType;
    type Item;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, token: &[u8]);
    fn deserialize(buf: &'a [u8], token: &[u8]) -> Result<Self::Item, Error>;
}

pub struct UserName;

impl<'a> Attribute<'a> for UserName {
    const TYPE: AttributeType = AttributeType::UserName;
    type Item = &'a str;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put(value.as_bytes());
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        Ok(std::str::from_utf8(buf)?)
    }
}

pub struct MessageIntegrity;

impl<'a> Attribute<'a> for MessageIntegrity {
    const TYPE: AttributeType = AttributeType::MessageIntegrity;
    type Item = &'a [u8];

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put(value);
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        if buf.len() != 20 {
            return Err(Error::Malformed);
        }

        Ok(buf)
    }
}

/// The STUN ERROR-CODE attribute: a 3-digit numeric code (class*100+number)
/// plus a UTF-8 reason phrase. Only the subset of codes the request
/// validation pipeline emits (400, 401, 420) are constructed, but any code
/// round-trips.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorType {
    BadRequest,
    Unauthorized,
    UnknownAttribute,
    Other(u16),
}

impl ErrorType {
    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest => 400,
            Self::Unauthorized => 401,
            Self::UnknownAttribute => 420,
            Self::Other(code) => code,
        }
    }

    pub fn reason(self) -> &'static str {
        match self {
            Self::BadRequest => "Bad Request",
            Self::Unauthorized => "Unauthorized",
            Self::UnknownAttribute => "Unknown Attribute",
            Self::Other(_) => "Error",
        }
    }

    fn from_code(code: u16) -> Self {
        match code {
            400 => Self::BadRequest,
            401 => Self::Unauthorized,
            420 => Self::UnknownAttribute,
            other => Self::Other(other),
        }
    }
}

pub struct ErrorCode;

impl<'a> Attribute<'a> for ErrorCode {
    const TYPE: AttributeType = AttributeType::ErrorCode;
    type Item = ErrorType;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        let code = value.code();

        bytes.put_u16(0);
        bytes.put_u8((code / 100) as u8);
        bytes.put_u8((code % 100) as u8);
        bytes.put(value.reason().as_bytes());
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        if buf.len() < 4 {
            return Err(Error::Malformed);
        }

        let class = buf[2] as u16;
        let number = buf[3] as u16;
        Ok(ErrorType::from_code(class * 100 + number))
    }
}

/// UNKNOWN-ATTRIBUTES: a list of 16-bit attribute type codes the server did
/// not understand, used to build the 420 response.
pub struct UnknownAttributes;

impl<'a> Attribute<'a> for UnknownAttributes {
    const TYPE: AttributeType = AttributeType::UnknownAttributes;
    type Item = Vec<u16>;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        for kind in value {
            bytes.put_u16(kind);
        }
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        Ok(buf.chunks_exact(2).map(|c| u16::from_be_bytes([c[0], c[1]])).collect())
    }
}

pub struct Fingerprint;

impl<'a> Attribute<'a> for Fingerprint {
    const TYPE: AttributeType = AttributeType::Fingerprint;
    type Item = u32;

    fn serialize(value: Self::Item, bytes: &mut BytesMut, _token: &[u8]) {
        bytes.put_u32(value);
    }

    fn deserialize(buf: &'a [u8], _token: &[u8]) -> Result<Self::Item, Error> {
        if buf.len() != 4 {
            return Err(Error::Malformed);
        }

        Ok(u32::from_be_bytes(buf.try_into()?))
    }
}
