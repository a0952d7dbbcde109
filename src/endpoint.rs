//! Keyed connection endpoint with length-framed text messaging and a
//! runtime cryptography toggle.
//!
//! An [`Endpoint`] is one side of a peer-to-peer connection. Construction
//! runs the blocking key establishment of [`crate::key_exchange`], after
//! which [`send_text`](Endpoint::send_text) and
//! [`receive_text`](Endpoint::receive_text) move whole messages with
//! transparent encryption.
//!
//! # Wire format
//!
//! Each message is a 4-byte little-endian length prefix followed by that
//! many payload bytes. The prefix carries the transmitted payload size:
//! ciphertext length while cryptography is armed, plaintext length
//! otherwise.
//!
//! # The toggle
//!
//! [`set_cryptography`](Endpoint::set_cryptography) arms or disarms the
//! pipeline without re-keying; the contexts stay bound to the handshake key
//! and keep their chaining state. Both peers must flip in lockstep for a
//! given exchange. The library does not police agreement; a mismatch
//! surfaces as a decryption failure on whichever side reads next, and the
//! channel does not recover. Applications coordinate the flip in-band (see
//! the demonstration binaries, which use the literal messages `PQC-ON` and
//! `PQC-OFF`).

use std::net::{Shutdown, TcpStream};
use std::os::unix::io::{AsRawFd, RawFd};

use tracing::{debug, trace};

use crate::cipher::{CryptoState, BLOCK_LEN};
use crate::error::SecureSocketError;
use crate::key_exchange::{self, Role};
use crate::net;
use crate::Result;

/// Largest plaintext accepted by [`Endpoint::send_text`], in bytes.
pub const MAX_MSG_LEN: usize = 500;

/// Largest payload that can legitimately appear on the wire: a maximum-size
/// plaintext padded up to the next cipher block.
pub const MAX_WIRE_LEN: usize = (MAX_MSG_LEN / BLOCK_LEN + 1) * BLOCK_LEN;

/// One side of a secure connection.
///
/// Dropping the endpoint closes the socket and scrubs the key material.
pub struct Endpoint {
    stream: TcpStream,
    auto_print: bool,
    initiator: bool,
    armed: bool,
    closed: bool,
    crypto: Option<CryptoState>,
}

impl Endpoint {
    /// Connect to a server and establish the shared key (responder role).
    ///
    /// With `auto_print` set, every received message is echoed to stdout
    /// before being returned.
    pub fn connect(host: &str, port: u16, auto_print: bool) -> Result<Self> {
        let mut stream = net::connect(host, port)?;
        let crypto = key_exchange::run_handshake(&mut stream, Role::Responder)?;
        debug!(host, port, "connected and keyed");
        Ok(Self {
            stream,
            auto_print,
            initiator: false,
            armed: true,
            closed: false,
            crypto: Some(crypto),
        })
    }

    /// Wrap an accepted connection and establish the shared key (initiator
    /// role).
    ///
    /// Blocks until the peer has completed its half of the handshake, so
    /// call it from whichever execution context will own this connection's
    /// reads and writes. Invoking it from an event loop stalls the loop for
    /// one KEM round trip.
    pub fn from_stream(mut stream: TcpStream, auto_print: bool) -> Result<Self> {
        let crypto = key_exchange::run_handshake(&mut stream, Role::Initiator)?;
        debug!(fd = stream.as_raw_fd(), "accepted connection keyed");
        Ok(Self {
            stream,
            auto_print,
            initiator: true,
            armed: true,
            closed: false,
            crypto: Some(crypto),
        })
    }

    /// Send one message, encrypting it first if cryptography is armed.
    ///
    /// Plaintexts above [`MAX_MSG_LEN`] are refused before any byte is
    /// written, leaving the framing intact.
    pub fn send_text(&mut self, text: &str) -> Result<()> {
        self.ensure_open("send")?;
        if text.len() > MAX_MSG_LEN {
            return Err(SecureSocketError::PayloadTooLarge {
                size: text.len(),
                max: MAX_MSG_LEN,
            });
        }

        let payload = if self.armed {
            self.crypto_state()?.encrypt(text.as_bytes())?
        } else {
            text.as_bytes().to_vec()
        };

        let header = (payload.len() as u32).to_le_bytes();
        net::send_exact(&mut self.stream, &header)?;
        net::send_exact(&mut self.stream, &payload)?;
        trace!(len = payload.len(), armed = self.armed, "frame sent");
        Ok(())
    }

    /// Receive one message, decrypting it if cryptography is armed.
    ///
    /// Blocks until a complete frame has arrived. A peer that disappears
    /// mid-frame yields [`SecureSocketError::TransportClosed`].
    pub fn receive_text(&mut self) -> Result<String> {
        self.ensure_open("receive")?;

        let mut header = [0u8; 4];
        net::recv_exact(&mut self.stream, &mut header)?;
        let len = u32::from_le_bytes(header) as usize;
        if len > MAX_WIRE_LEN {
            return Err(SecureSocketError::PayloadTooLarge {
                size: len,
                max: MAX_WIRE_LEN,
            });
        }

        let mut payload = vec![0u8; len];
        net::recv_exact(&mut self.stream, &mut payload)?;
        trace!(len, armed = self.armed, "frame received");

        let plaintext = if self.armed {
            self.crypto_state()?.decrypt(&payload)?
        } else {
            payload
        };
        let text = String::from_utf8(plaintext).map_err(|_| {
            SecureSocketError::DecryptionFailed("payload is not valid UTF-8".into())
        })?;

        if self.auto_print {
            println!("{text}");
        }
        Ok(text)
    }

    /// Arm or disarm the encryption pipeline at runtime.
    ///
    /// Does not re-key: the handshake key and chaining state stay bound to
    /// the contexts, so arming again later resumes where the stream left
    /// off. Arming is refused before a completed handshake.
    pub fn set_cryptography(&mut self, enabled: bool) -> Result<()> {
        self.ensure_open("toggle cryptography")?;
        if enabled && self.crypto.is_none() {
            return Err(SecureSocketError::BadState(
                "cannot arm cryptography before the handshake has completed".into(),
            ));
        }
        self.armed = enabled;
        Ok(())
    }

    /// Whether the pipeline currently transforms payloads.
    pub fn is_armed(&self) -> bool {
        self.armed
    }

    /// Whether this side played the initiator role in the handshake.
    pub fn is_initiator(&self) -> bool {
        self.initiator
    }

    /// Shut the connection down. Further operations return `BadState`.
    pub fn close(&mut self) -> Result<()> {
        if !self.closed {
            self.closed = true;
            let _ = self.stream.shutdown(Shutdown::Both);
        }
        Ok(())
    }

    /// The OS handle, for registration with an
    /// [`EventManager`](crate::event::EventManager).
    pub fn raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn ensure_open(&self, action: &str) -> Result<()> {
        if self.closed {
            return Err(SecureSocketError::BadState(format!(
                "cannot {action} on a closed endpoint"
            )));
        }
        Ok(())
    }

    fn crypto_state(&mut self) -> Result<&mut CryptoState> {
        self.crypto.as_mut().ok_or_else(|| {
            SecureSocketError::BadState("cryptography armed without a completed handshake".into())
        })
    }
}

impl AsRawFd for Endpoint {
    fn as_raw_fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }
}
