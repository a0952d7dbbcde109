//! # Secure Kyber Socket
//!
//! A Rust library providing post-quantum secure stream communication over
//! TCP, using the Kyber1024 key encapsulation mechanism for key
//! establishment and AES-256-CBC for bulk encryption, together with an
//! event multiplexer that lets a single-threaded server manage many
//! concurrent connections.
//!
//! ## Overview
//!
//! Every connection starts with a blocking handshake: the connecting client
//! publishes an ephemeral Kyber1024 public key, the accepting server
//! encapsulates a 32-byte shared secret under it and picks the AES
//! initialization vector. From then on the two [`Endpoint`]s exchange
//! length-framed text messages, transparently encrypted while cryptography
//! is armed. The pipeline can be disarmed and re-armed per peer on the live
//! connection, without re-keying, as long as both sides flip in lockstep.
//!
//! Servers scale either by dedicating a thread to each connection or by
//! driving all connections from one thread with an [`EventManager`], which
//! abstracts three readiness backends (epoll, poll, select) behind a single
//! contract.
//!
//! ## Quick Example
//!
//! ```no_run
//! use secure_kyber_socket::Endpoint;
//!
//! fn main() -> secure_kyber_socket::Result<()> {
//!     // Connect to a server; the key establishment runs inline.
//!     let mut endpoint = Endpoint::connect("127.0.0.1", 777, false)?;
//!
//!     // Send and receive encrypted messages.
//!     endpoint.send_text("hello")?;
//!     let reply = endpoint.receive_text()?;
//!     println!("server said: {reply}");
//!
//!     // Drop plaintext once both sides agree to.
//!     endpoint.send_text("PQC-OFF")?;
//!     endpoint.receive_text()?;
//!     endpoint.set_cryptography(false)?;
//!     Ok(())
//! }
//! ```
//!
//! ## Security Considerations
//!
//! - The handshake is unauthenticated: it resists passive observation but
//!   not an active man-in-the-middle. Bind it to signatures or pre-shared
//!   identities at a higher layer if your threat model includes one.
//! - Keys are ephemeral per connection; there is no persisted state and no
//!   re-keying short of reconnecting.
//! - Plaintext messages are capped at [`MAX_MSG_LEN`] bytes; the framer
//!   refuses larger payloads before anything reaches the wire.

pub mod cipher;
pub mod endpoint;
pub mod error;
pub mod event;
pub mod key_exchange;
pub mod net;
pub mod server;

pub use endpoint::{Endpoint, MAX_MSG_LEN, MAX_WIRE_LEN};
pub use error::SecureSocketError;
pub use event::{Backend, EventManager, CONN_ATTEMPT, SOCKET_ERROR};
pub use key_exchange::Role;
pub use server::Acceptor;

/// Result type for secure socket operations
pub type Result<T> = std::result::Result<T, SecureSocketError>;
