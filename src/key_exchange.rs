//! Key establishment over a freshly connected socket.
//!
//! Both peers run the Kyber1024 key encapsulation mechanism to arrive at a
//! 32-byte shared secret, then agree on a random initialization vector for
//! the AES layer. The transcript is three fixed-size transfers on the raw
//! stream, in order:
//!
//! 1. responder → initiator: Kyber1024 public key (1568 bytes)
//! 2. initiator → responder: KEM ciphertext (1568 bytes)
//! 3. initiator → responder: AES initialization vector (16 bytes)
//!
//! No framing is used; both sides know the lengths in advance. The accepting
//! server side of every connection takes the initiator role, the connecting
//! client the responder role, so the two constructors of
//! [`Endpoint`](crate::endpoint::Endpoint) pair up automatically.
//!
//! # Security
//!
//! The exchange is confidential against a passive observer but carries no
//! signature or pre-shared identity: an active attacker able to rewrite the
//! stream could substitute its own public key. Deployments that need
//! protection against an active man-in-the-middle must authenticate the
//! channel at a higher layer.

use std::net::TcpStream;

use pqc_kyber::{
    decapsulate, encapsulate, keypair, KYBER_CIPHERTEXTBYTES, KYBER_PUBLICKEYBYTES, KYBER_SSBYTES,
};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use crate::cipher::{CryptoState, IV_LEN};
use crate::error::SecureSocketError;
use crate::net;
use crate::Result;

/// Kyber1024 public key length in bytes.
pub const PUBLIC_KEY_LEN: usize = KYBER_PUBLICKEYBYTES;
/// Kyber1024 KEM ciphertext length in bytes.
pub const CIPHERTEXT_LEN: usize = KYBER_CIPHERTEXTBYTES;
/// Shared-secret length in bytes.
pub const SHARED_SECRET_LEN: usize = KYBER_SSBYTES;

/// Which half of the key-establishment protocol a peer runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Role {
    /// Consumes the peer's public key, produces the ciphertext and IV.
    /// Taken by the accepting server side of a connection.
    Initiator,
    /// Generates the keypair, receives the ciphertext and IV.
    /// Taken by the connecting client side.
    Responder,
}

/// Run the handshake on a connected stream and return the keyed cipher
/// state.
///
/// Blocking: the call does not return until the peer has played its half of
/// the transcript. The two sides must use opposite roles.
pub fn run_handshake(stream: &mut TcpStream, role: Role) -> Result<CryptoState> {
    match role {
        Role::Initiator => run_initiator(stream),
        Role::Responder => run_responder(stream),
    }
}

fn run_initiator(stream: &mut TcpStream) -> Result<CryptoState> {
    // Peer's public key is the first thing on the wire.
    let mut peer_public = vec![0u8; PUBLIC_KEY_LEN];
    recv_key_data(stream, &mut peer_public)?;

    let (ciphertext, shared_secret) = encapsulate(&peer_public, &mut OsRng)
        .map_err(|e| SecureSocketError::HandshakeFailed(format!("encapsulation failed: {e}")))?;
    send_key_data(stream, &ciphertext)?;

    // The initiator picks the IV once the secret is established and sends it
    // in the clear. An IV needs no confidentiality, only agreement.
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut iv);
    send_key_data(stream, &iv)?;

    debug!(role = "initiator", "key establishment complete");
    Ok(CryptoState::new(shared_secret, iv))
}

fn run_responder(stream: &mut TcpStream) -> Result<CryptoState> {
    let keys = keypair(&mut OsRng).map_err(|e| {
        SecureSocketError::HandshakeFailed(format!("keypair generation failed: {e}"))
    })?;
    send_key_data(stream, &keys.public)?;

    let mut ciphertext = vec![0u8; CIPHERTEXT_LEN];
    recv_key_data(stream, &mut ciphertext)?;
    let shared_secret = decapsulate(&ciphertext, &keys.secret)
        .map_err(|e| SecureSocketError::HandshakeFailed(format!("decapsulation failed: {e}")))?;

    let mut iv = [0u8; IV_LEN];
    recv_key_data(stream, &mut iv)?;

    debug!(role = "responder", "key establishment complete");
    Ok(CryptoState::new(shared_secret, iv))
}

/// Send one fixed-size handshake transfer.
fn send_key_data(stream: &mut TcpStream, data: &[u8]) -> Result<()> {
    net::send_exact(stream, data).map_err(as_handshake_failure)
}

/// Receive one fixed-size handshake transfer.
fn recv_key_data(stream: &mut TcpStream, buf: &mut [u8]) -> Result<()> {
    net::recv_exact(stream, buf).map_err(as_handshake_failure)
}

/// Any transport fault during the transcript aborts the handshake; the
/// endpoint never reaches the keyed phase.
fn as_handshake_failure(err: SecureSocketError) -> SecureSocketError {
    SecureSocketError::HandshakeFailed(err.to_string())
}
