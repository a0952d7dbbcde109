use secure_kyber_socket::key_exchange::{run_handshake, Role};
use secure_kyber_socket::{Acceptor, Endpoint, SecureSocketError};
use std::net::{TcpListener, TcpStream};
use std::thread;

#[test]
fn both_sides_derive_the_same_key() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    let server = thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        run_handshake(&mut stream, Role::Initiator).unwrap()
    });

    let mut stream = TcpStream::connect(addr).unwrap();
    let mut client_state = run_handshake(&mut stream, Role::Responder).unwrap();
    let mut server_state = server.join().unwrap();

    assert_eq!(client_state.shared_key(), server_state.shared_key());
    assert_eq!(client_state.shared_key().len(), 32);

    // The derived states are cipher-compatible in both directions.
    let ciphertext = client_state.encrypt(b"key agreement works").unwrap();
    assert_eq!(
        server_state.decrypt(&ciphertext).unwrap(),
        b"key agreement works"
    );
}

#[test]
fn peer_death_before_public_key_fails_the_handshake() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();

    // Connect and vanish without playing the responder half.
    let dead = TcpStream::connect(addr).unwrap();
    drop(dead);

    let (mut stream, _) = listener.accept().unwrap();
    match run_handshake(&mut stream, Role::Initiator) {
        Err(SecureSocketError::HandshakeFailed(_)) => {}
        Err(other) => panic!("expected HandshakeFailed, got {other:?}"),
        Ok(_) => panic!("expected HandshakeFailed, got a keyed state"),
    }
}

#[test]
fn acceptor_survives_a_failed_handshake() {
    let acceptor = Acceptor::bind(0, 4, false, true).unwrap();
    let port = acceptor.local_addr().unwrap().port();

    // First client dies before sending anything.
    let dead = TcpStream::connect(("127.0.0.1", port)).unwrap();
    drop(dead);

    let server = thread::spawn(move || {
        match acceptor.accept_endpoint() {
            Err(SecureSocketError::HandshakeFailed(_)) => {}
            Err(other) => panic!("expected HandshakeFailed, got {other:?}"),
            Ok(_) => panic!("expected HandshakeFailed, got a keyed endpoint"),
        }
        // The listener is still healthy; the next client gets through.
        let mut endpoint = acceptor.accept_endpoint().unwrap();
        assert_eq!(endpoint.receive_text().unwrap(), "still alive");
    });

    let mut good = Endpoint::connect("127.0.0.1", port, false).unwrap();
    good.send_text("still alive").unwrap();
    server.join().unwrap();
}
