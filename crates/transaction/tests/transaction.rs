use std::net::{SocketAddr, UdpSocket};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bytes::BytesMut;

use codec::Decoder;
use codec::message::MessageEncoder;
use codec::message::attributes::{MessageIntegrity, UserName};
use codec::message::methods::{BINDING_REQUEST, BINDING_SUCCESS};

use transaction::address::TransportAddress;
use transaction::collaborators::{CredentialsRegistry, RequestListener, ResponseCollector, ResponseEvent};
use transaction::manager::NetworkManager;

struct StaticCredentials;

impl CredentialsRegistry for StaticCredentials {
    fn local_key(&self, username: &str) -> Option<Vec<u8>> {
        (username == "alice").then(|| b"secret".to_vec())
    }

    fn check_local_username(&self, username: &str) -> bool {
        username == "alice"
    }
}

struct RecordingCollector {
    responses: AtomicUsize,
    timeouts: AtomicUsize,
}

impl ResponseCollector for RecordingCollector {
    fn on_response(&self, _event: ResponseEvent) {
        self.responses.fetch_add(1, Ordering::SeqCst);
    }

    fn on_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unreachable(&self, _reason: std::io::Error) {}
}

/// A server-side listener that answers every validated Binding request
/// immediately with a success response carrying the same transaction id.
struct BindingResponder {
    manager: std::sync::Weak<NetworkManager>,
}

impl RequestListener for BindingResponder {
    fn on_request(&self, bytes: &[u8], source: TransportAddress, local: TransportAddress) {
        let mut decoder = Decoder::default();
        let Ok(message) = decoder.decode(bytes) else { return };

        let mut token = [0u8; 12];
        token.copy_from_slice(message.token());

        let mut buf = BytesMut::new();
        let mut encoder = MessageEncoder::new(BINDING_SUCCESS, &token, &mut buf);
        encoder.flush(None).unwrap();

        if let Some(manager) = self.manager.upgrade() {
            let id = transaction::address::TransactionId::new(token);
            let _ = manager.send_response(id, local, buf.to_vec(), source);
        }
    }
}

fn free_local_addr() -> SocketAddr {
    UdpSocket::bind("127.0.0.1:0").unwrap().local_addr().unwrap()
}

#[test]
fn client_request_is_answered_by_server_listener() {
    let server = NetworkManager::new(Arc::new(StaticCredentials), 2);
    let server_addr = server.bind_udp(free_local_addr()).unwrap();

    server.register_listener(
        None,
        Arc::new(BindingResponder { manager: Arc::downgrade(&server) }),
    );

    let client = NetworkManager::new(Arc::new(StaticCredentials), 2);
    let client_addr = client.bind_udp(free_local_addr()).unwrap();

    let token = [42u8; 12];
    let mut buf = BytesMut::new();
    let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
    message.append::<UserName>("alice:resource");
    message.flush(Some(b"secret")).unwrap();

    let collector = Arc::new(RecordingCollector {
        responses: AtomicUsize::new(0),
        timeouts: AtomicUsize::new(0),
    });

    client
        .send_request(buf.to_vec(), server_addr, client_addr, collector.clone())
        .unwrap();

    std::thread::sleep(Duration::from_millis(300));

    assert_eq!(collector.responses.load(Ordering::SeqCst), 1);
    assert_eq!(collector.timeouts.load(Ordering::SeqCst), 0);
}

#[test]
fn request_without_message_integrity_is_rejected_and_not_delivered() {
    struct Flag(AtomicUsize);
    impl RequestListener for Flag {
        fn on_request(&self, _bytes: &[u8], _source: TransportAddress, _local: TransportAddress) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let server = NetworkManager::new(Arc::new(StaticCredentials), 1);
    let server_addr = server.bind_udp(free_local_addr()).unwrap();

    let flag = Arc::new(Flag(AtomicUsize::new(0)));
    server.register_listener(None, flag.clone());

    let client_socket = UdpSocket::bind(free_local_addr()).unwrap();

    let token = [1u8; 12];
    let mut buf = BytesMut::new();
    let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
    message.flush(None).unwrap();

    client_socket.send_to(&buf, server_addr.addr).unwrap();

    let mut response = [0u8; 1500];
    client_socket.set_read_timeout(Some(Duration::from_millis(500))).unwrap();
    let (n, _) = client_socket.recv_from(&mut response).unwrap();

    let mut decoder = Decoder::default();
    let decoded = decoder.decode(&response[..n]).unwrap();
    assert!(decoded.method().class.is_error());
    assert_eq!(flag.0.load(Ordering::SeqCst), 0);
}

#[test]
fn send_request_from_unbound_source_fails() {
    let manager = NetworkManager::new(Arc::new(StaticCredentials), 1);
    let collector = Arc::new(RecordingCollector {
        responses: AtomicUsize::new(0),
        timeouts: AtomicUsize::new(0),
    });

    let token = [0u8; 12];
    let mut buf = BytesMut::new();
    let mut message = MessageEncoder::new(BINDING_REQUEST, &token, &mut buf);
    message.flush(None).unwrap();

    let unbound = TransportAddress::udp(free_local_addr());
    let destination = TransportAddress::udp(free_local_addr());

    assert!(manager.send_request(buf.to_vec(), destination, unbound, collector).is_err());
}
