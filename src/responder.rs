use std::sync::Arc;

use bytes::BytesMut;

use codec::Decoder;
use codec::message::MessageEncoder;
use codec::message::attributes::UserName;
use codec::message::methods::{BINDING_SUCCESS, MessageClass};
use transaction::address::{TransactionId, TransportAddress};
use transaction::collaborators::{CredentialsRegistry, RequestListener};
use transaction::manager::NetworkManager;

/// Answers validated Binding requests with a bare success response (no
/// XOR-MAPPED-ADDRESS, since that attribute sits outside what the wire
/// codec models) so the transaction layer can be smoke-tested end to end.
pub struct BindingResponder {
    manager: Arc<NetworkManager>,
    credentials: Arc<dyn CredentialsRegistry>,
}

impl BindingResponder {
    pub fn new(manager: Arc<NetworkManager>, credentials: Arc<dyn CredentialsRegistry>) -> Self {
        Self { manager, credentials }
    }
}

impl RequestListener for BindingResponder {
    fn on_request(&self, bytes: &[u8], source: TransportAddress, local: TransportAddress) {
        let mut decoder = Decoder::default();
        let decoded = match decoder.decode(bytes) {
            Ok(message) => message,
            Err(err) => {
                log::debug!("dropping undecodable request from {source}: {err}");
                return;
            }
        };

        if decoded.method().class != MessageClass::Request {
            return;
        }

        let Some(id) = TransactionId::from_header(bytes) else {
            return;
        };

        // Validated requests always carry USERNAME + MESSAGE-INTEGRITY by the
        // time they reach a listener; sign the response with the same key
        // that passed integrity verification on the request.
        let key = decoded
            .get::<UserName>()
            .and_then(|username| self.credentials.local_key(username.split(':').next().unwrap_or(username)));

        let mut token = [0u8; 12];
        token.copy_from_slice(&bytes[8..20]);

        let mut response = BytesMut::new();
        let mut encoder = MessageEncoder::new(BINDING_SUCCESS, &token, &mut response);

        if encoder.flush(key.as_deref()).is_err() {
            log::warn!("failed to encode Binding success response for {source}");
            return;
        }

        drop(decoded);

        if let Err(err) = self.manager.send_response(id, local, response.to_vec(), source) {
            log::warn!("failed to send Binding success response to {source}: {err}");
        }
    }
}
