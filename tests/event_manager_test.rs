use secure_kyber_socket::{Backend, EventManager, SecureSocketError, CONN_ATTEMPT, SOCKET_ERROR};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::os::unix::io::AsRawFd;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn listener_ready_is_reported_as_conn_attempt(backend: Backend) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let mut events = EventManager::with_backend(listener.as_raw_fd(), 8, backend).unwrap();

    let _client = TcpStream::connect(addr).unwrap();
    assert_eq!(events.wait_for_event().unwrap(), CONN_ATTEMPT);
}

fn monitored_client_readiness_returns_its_handle(backend: Backend) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let mut events = EventManager::with_backend(listener.as_raw_fd(), 8, backend).unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    assert_eq!(events.wait_for_event().unwrap(), CONN_ATTEMPT);

    let (mut server_side, _) = listener.accept().unwrap();
    events.monitor(server_side.as_raw_fd()).unwrap();

    client.write_all(b"x").unwrap();
    assert_eq!(events.wait_for_event().unwrap(), server_side.as_raw_fd());

    // Drain so the level-triggered backends go quiet again.
    let mut buf = [0u8; 1];
    server_side.read_exact(&mut buf).unwrap();
}

fn removed_handle_is_never_reported(backend: Backend) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    let mut events = EventManager::with_backend(listener.as_raw_fd(), 8, backend).unwrap();

    let mut accept_one = || {
        assert_eq!(events.wait_for_event().unwrap(), CONN_ATTEMPT);
        let (stream, _) = listener.accept().unwrap();
        events.monitor(stream.as_raw_fd()).unwrap();
        stream
    };

    let mut c1 = TcpStream::connect(addr).unwrap();
    let s1 = accept_one();
    let mut c2 = TcpStream::connect(addr).unwrap();
    let s2 = accept_one();

    c1.write_all(b"a").unwrap();
    c2.write_all(b"b").unwrap();
    // Let both payloads land before the wait.
    thread::sleep(Duration::from_millis(50));

    events.stop_monitoring(s1.as_raw_fd()).unwrap();
    assert_eq!(events.wait_for_event().unwrap(), s2.as_raw_fd());
    drop(s1);
}

fn run_backend_suite(backend: Backend) {
    listener_ready_is_reported_as_conn_attempt(backend);
    monitored_client_readiness_returns_its_handle(backend);
    removed_handle_is_never_reported(backend);
}

#[cfg(target_os = "linux")]
#[test]
fn epoll_backend_contract() {
    run_backend_suite(Backend::Epoll);
}

#[test]
fn poll_backend_contract() {
    run_backend_suite(Backend::Poll);
}

#[test]
fn select_backend_contract() {
    run_backend_suite(Backend::Select);
}

#[test]
fn the_invalid_handle_sentinel_cannot_be_monitored() {
    // A failed accept reports SOCKET_ERROR; feeding that straight into the
    // manager must not poison the watched set.
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut events = EventManager::with_backend(listener.as_raw_fd(), 4, Backend::Poll).unwrap();
    assert!(matches!(
        events.monitor(SOCKET_ERROR),
        Err(SecureSocketError::BadState(_))
    ));
}

#[test]
fn listener_cannot_be_removed() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let mut events = EventManager::with_backend(listener.as_raw_fd(), 4, Backend::Poll).unwrap();
    assert!(matches!(
        events.stop_monitoring(listener.as_raw_fd()),
        Err(SecureSocketError::BadState(_))
    ));
}

#[test]
fn select_backend_observes_a_shutdown_token() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let token = Arc::new(AtomicBool::new(true));
    let mut events = EventManager::with_backend(listener.as_raw_fd(), 4, Backend::Select)
        .unwrap()
        .with_shutdown(token);

    match events.wait_for_event() {
        Err(SecureSocketError::Shutdown) => {}
        other => panic!("expected Shutdown, got {other:?}"),
    }
}
