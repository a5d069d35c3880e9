use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::time::Duration;

use mux::{Classifier, ClassifierId, Matched, Mux, PrefixClassifier};

fn free_local_addr() -> SocketAddr {
    std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap()
}

struct TlsHelloClassifier;

impl Classifier for TlsHelloClassifier {
    fn id(&self) -> ClassifierId {
        "tls".into()
    }

    fn classify(&self, buffered: &[u8]) -> Matched {
        const PREFIX: [u8; 2] = [0x16, 0x03];
        if buffered.len() >= PREFIX.len() {
            if buffered[..PREFIX.len()] == PREFIX {
                Matched::Accept
            } else {
                Matched::Reject
            }
        } else if PREFIX[..buffered.len()] == *buffered {
            Matched::NeedMoreData
        } else {
            Matched::Reject
        }
    }
}

#[test]
fn http_and_tls_connections_route_to_their_matching_acceptor_and_junk_is_closed() {
    let mux = Mux::new();
    let addr = free_local_addr();

    let http = mux
        .open_and_bind_with(addr, 128, 8192, Duration::from_millis(500), PrefixClassifier::new("http", b"GET "))
        .unwrap();
    let tls = mux.open_and_bind_with(addr, 128, 8192, Duration::from_millis(500), TlsHelloClassifier).unwrap();

    let bound = http.local_addr();

    let mut http_client = TcpStream::connect(bound).unwrap();
    http_client.write_all(b"GET /x HTTP/1.1\r\n").unwrap();

    let mut tls_client = TcpStream::connect(bound).unwrap();
    tls_client.write_all(&[0x16, 0x03, 0x01, 0x00, 0x2f]).unwrap();

    let mut junk_client = TcpStream::connect(bound).unwrap();
    junk_client.write_all(&[0xFFu8; 64]).unwrap();

    let mut accepted_http = http.accept_timeout(Duration::from_secs(2)).unwrap();
    let mut buf = [0u8; 18];
    accepted_http.read_exact(&mut buf).unwrap();
    assert_eq!(&buf, b"GET /x HTTP/1.1\r\n");

    let mut accepted_tls = tls.accept_timeout(Duration::from_secs(2)).unwrap();
    let mut buf = [0u8; 5];
    accepted_tls.read_exact(&mut buf).unwrap();
    assert_eq!(buf, [0x16, 0x03, 0x01, 0x00, 0x2f]);

    // Junk never matches either classifier, so the connection is closed by
    // the read-timeout sweep without being handed to anyone.
    let mut closed_buf = [0u8; 1];
    std::thread::sleep(Duration::from_millis(800));
    assert!(junk_client.read(&mut closed_buf).map(|n| n == 0).unwrap_or(true));
}

#[test]
fn registering_a_duplicate_classifier_identity_is_rejected() {
    let mux = Mux::new();
    let addr = free_local_addr();

    let _first = mux.open_and_bind(addr, PrefixClassifier::new("http", b"GET ")).unwrap();
    let second = mux.open_and_bind(addr, PrefixClassifier::new("http", b"POST "));

    assert!(matches!(second, Err(mux::Error::DuplicateClassifier)));
}
