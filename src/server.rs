//! Listening acceptor feeding connections to worker threads or an event
//! loop.
//!
//! An [`Acceptor`] owns the bound listener. Servers either hand each
//! accepted stream to a dedicated thread (which then constructs the
//! [`Endpoint`] and blocks on its handshake there), or register the
//! listener with an [`EventManager`](crate::event::EventManager) and accept
//! on [`CONN_ATTEMPT`](crate::event::CONN_ATTEMPT).
//!
//! A failed accept or a failed per-connection handshake is a local problem:
//! the acceptor keeps listening. Only failures to register with the
//! multiplexer should take the server down.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use tracing::debug;

use crate::endpoint::Endpoint;
use crate::net;
use crate::Result;

/// A bound, listening server socket.
pub struct Acceptor {
    listener: TcpListener,
    auto_print: bool,
}

impl Acceptor {
    /// Bind to `port` on all interfaces and start listening.
    ///
    /// `backlog` bounds the pending connection queue; `auto_print` is
    /// inherited by endpoints built through
    /// [`accept_endpoint`](Self::accept_endpoint); `allow_reuse` enables
    /// address reuse so a restarted server can rebind immediately.
    pub fn bind(port: u16, backlog: i32, auto_print: bool, allow_reuse: bool) -> Result<Self> {
        let listener = net::create_listener(port, backlog, allow_reuse)?;
        debug!(port = listener.local_addr()?.port(), "listening");
        Ok(Self {
            listener,
            auto_print,
        })
    }

    /// Accept one pending connection as a raw stream.
    ///
    /// No handshake is performed; pass the stream to
    /// [`Endpoint::from_stream`] from whichever context will own it.
    pub fn accept_stream(&self) -> Result<TcpStream> {
        let (stream, peer) = self.listener.accept().map_err(net::map_io)?;
        let _ = stream.set_nodelay(true);
        debug!(%peer, "accepted connection");
        Ok(stream)
    }

    /// Accept one pending connection and key it in the calling context.
    ///
    /// Blocks for the full handshake; suitable for thread-per-connection
    /// servers where the accepting thread hands the stream straight to a
    /// worker, not for event loops.
    pub fn accept_endpoint(&self) -> Result<Endpoint> {
        let stream = self.accept_stream()?;
        Endpoint::from_stream(stream, self.auto_print)
    }

    /// The locally bound address (useful with port 0).
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl AsRawFd for Acceptor {
    fn as_raw_fd(&self) -> RawFd {
        self.listener.as_raw_fd()
    }
}
