//! Request validation pipeline (§4.2): every inbound STUN request runs
//! through this before it reaches a registered listener.

use bytes::BytesMut;

use codec::message::attributes::{AttributeType, ErrorCode, ErrorType, MessageIntegrity, UnknownAttributes, UserName};
use codec::message::methods::{MessageClass, Method};
use codec::message::{Message, MessageEncoder};

use crate::collaborators::CredentialsRegistry;

#[derive(Debug, Clone)]
pub enum Rejection {
    Unauthorized,
    UnknownAttribute(Vec<u16>),
}

/// Attributes this core understands; anything comprehension-required
/// outside this list triggers a 420.
pub const KNOWN_ATTRIBUTES: &[AttributeType] = &[
    AttributeType::UserName,
    AttributeType::MessageIntegrity,
    AttributeType::ErrorCode,
    AttributeType::UnknownAttributes,
    AttributeType::Fingerprint,
];

pub fn validate(message: &Message<'_>, credentials: &dyn CredentialsRegistry) -> Result<(), Rejection> {
    if let Some(username) = message.get::<UserName>() {
        if !credentials.check_local_username(username_prefix(username)) {
            return Err(Rejection::Unauthorized);
        }
    }

    match message.get::<MessageIntegrity>() {
        Some(_) => {
            let username = message.get::<UserName>().ok_or(Rejection::Unauthorized)?;
            let key = credentials
                .local_key(username_prefix(username))
                .ok_or(Rejection::Unauthorized)?;

            message.integrity_check(&key).map_err(|_| Rejection::Unauthorized)?;
        }
        None => return Err(Rejection::Unauthorized),
    }

    let unknown: Vec<_> = message
        .unknown_attributes(KNOWN_ATTRIBUTES)
        .into_iter()
        .filter(|kind| is_comprehension_required(*kind))
        .collect();

    if !unknown.is_empty() {
        return Err(Rejection::UnknownAttribute(unknown));
    }

    Ok(())
}

/// STUN long-term credentials are conventionally `realm:user` or
/// `user:resource`; the core only ever looks the prefix up before the first
/// colon, per the wire codec's note on key derivation.
fn username_prefix(username: &str) -> &str {
    username.split(':').next().unwrap_or(username)
}

fn is_comprehension_required(kind: u16) -> bool {
    kind & 0x8000 == 0
}

/// Encode the error response a rejected request should receive: same
/// method and transaction id as the request, class switched to
/// error-response.
pub fn build_error_response(method: Method, token: &[u8], rejection: &Rejection) -> Vec<u8> {
    let mut buf = BytesMut::new();
    let error_method = Method::new(method.number, MessageClass::ErrorResponse);
    let mut encoder = MessageEncoder::new(error_method, token, &mut buf);

    match rejection {
        Rejection::Unauthorized => {
            encoder.append::<ErrorCode>(ErrorType::Unauthorized);
        }
        Rejection::UnknownAttribute(attrs) => {
            encoder.append::<ErrorCode>(ErrorType::UnknownAttribute);
            encoder.append::<UnknownAttributes>(attrs.clone());
        }
    }

    encoder.flush(None).expect("encoding a synthesized error response cannot fail");
    buf.to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use codec::Decoder;
    use codec::message::attributes::Fingerprint;
    use codec::message::methods::BINDING_REQUEST;

    struct StaticCredentials;

    impl CredentialsRegistry for StaticCredentials {
        fn local_key(&self, username: &str) -> Option<Vec<u8>> {
            (username == "alice").then(|| b"secret".to_vec())
        }

        fn check_local_username(&self, username: &str) -> bool {
            username == "alice"
        }
    }

    #[test]
    fn request_without_message_integrity_is_unauthorized() {
        let token = [1u8; 12];
        let mut buf = BytesMut::new();
        let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
        message.flush(None).unwrap();

        let mut decoder = Decoder::default();
        let decoded = decoder.decode(&buf).unwrap();

        assert!(matches!(validate(&decoded, &StaticCredentials), Err(Rejection::Unauthorized)));
    }

    #[test]
    fn request_with_valid_integrity_and_username_is_accepted() {
        let token = [2u8; 12];
        let mut buf = BytesMut::new();
        let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
        message.append::<UserName>("alice:xyz");
        message.flush(Some(b"secret")).unwrap();

        let mut decoder = Decoder::default();
        let decoded = decoder.decode(&buf).unwrap();

        assert!(validate(&decoded, &StaticCredentials).is_ok());
    }

    #[test]
    fn unknown_comprehension_required_attribute_yields_420() {
        let token = [3u8; 12];
        let mut buf = BytesMut::new();
        let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
        message.append::<UserName>("alice:xyz");

        // A comprehension-required attribute (top bit clear) this core does
        // not understand.
        let mut inner = BytesMut::new();
        inner.extend_from_slice(b"rawv");
        message.append_raw(0x0024, &inner);
        message.flush(Some(b"secret")).unwrap();

        let mut decoder = Decoder::default();
        let decoded = decoder.decode(&buf).unwrap();

        match validate(&decoded, &StaticCredentials) {
            Err(Rejection::UnknownAttribute(attrs)) => assert!(!attrs.is_empty()),
            other => panic!("expected 420, got {other:?}"),
        }
    }

    #[test]
    fn error_response_carries_original_method_and_token() {
        let token = [4u8; 12];
        let bytes = build_error_response(BINDING_REQUEST, &token, &Rejection::Unauthorized);

        let mut decoder = Decoder::default();
        let decoded = decoder.decode(&bytes).unwrap();

        assert_eq!(decoded.method().class, MessageClass::ErrorResponse);
        assert_eq!(decoded.token(), &token);
        assert!(decoded.get::<Fingerprint>().is_some());
    }
}
