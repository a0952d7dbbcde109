//! Blocking TCP socket helpers shared by the endpoint and server layers.
//!
//! Everything above this module works with whole messages; here a "send" or
//! "receive" is only complete once every byte has crossed the socket.
//! Partial transfers are retried in a loop and never surfaced to callers.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};

use socket2::{Domain, Protocol, Socket, Type};

use crate::error::SecureSocketError;
use crate::Result;

/// Create a TCP listener bound to `port` on all interfaces.
///
/// `allow_reuse` sets `SO_REUSEADDR` before bind so a restarted server does
/// not stall in the kernel's linger state. `backlog` bounds the pending
/// connection queue.
pub fn create_listener(port: u16, backlog: i32, allow_reuse: bool) -> Result<TcpListener> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
    if allow_reuse {
        socket.set_reuse_address(true)?;
    }
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}

/// Connect to `host:port` with a blocking stream.
pub fn connect(host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect((host, port)).map_err(map_io)?;
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

/// Write all of `data` to the stream.
///
/// Loops until every byte is transmitted; a peer that goes away mid-write
/// yields [`SecureSocketError::TransportClosed`].
pub fn send_exact(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < data.len() {
        match stream.write(&data[written..]) {
            Ok(0) => return Err(SecureSocketError::TransportClosed),
            Ok(n) => written += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(map_io(e)),
        }
    }
    Ok(())
}

/// Read exactly `buf.len()` bytes from the stream.
///
/// Blocks until the buffer is full; end-of-stream before that point yields
/// [`SecureSocketError::TransportClosed`].
pub fn recv_exact(stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
    let mut filled = 0;
    while filled < buf.len() {
        match stream.read(&mut buf[filled..]) {
            Ok(0) => return Err(SecureSocketError::TransportClosed),
            Ok(n) => filled += n,
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(map_io(e)),
        }
    }
    Ok(())
}

/// Classify an I/O error: peer-gone conditions become `TransportClosed`,
/// everything else is an OS-level `TransportError`.
pub(crate) fn map_io(err: io::Error) -> SecureSocketError {
    match err.kind() {
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => SecureSocketError::TransportClosed,
        _ => SecureSocketError::TransportError(err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn send_and_recv_exact_round_trip() {
        let listener = create_listener(0, 4, true).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 11];
            recv_exact(&mut stream, &mut buf).unwrap();
            buf
        });

        let mut stream = connect("127.0.0.1", addr.port()).unwrap();
        send_exact(&mut stream, b"exact bytes").unwrap();
        assert_eq!(&server.join().unwrap(), b"exact bytes");
    }

    #[test]
    fn recv_exact_reports_closed_peer() {
        let listener = create_listener(0, 4, true).unwrap();
        let addr = listener.local_addr().unwrap();

        let server = thread::spawn(move || {
            // Accept and immediately drop the connection.
            let _ = listener.accept().unwrap();
        });

        let mut stream = connect("127.0.0.1", addr.port()).unwrap();
        server.join().unwrap();

        let mut buf = [0u8; 4];
        match recv_exact(&mut stream, &mut buf) {
            Err(SecureSocketError::TransportClosed) => {}
            other => panic!("expected TransportClosed, got {other:?}"),
        }
    }
}
