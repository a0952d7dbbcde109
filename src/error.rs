use thiserror::Error;

#[derive(Error, Debug)]
pub enum SecureSocketError {
    #[error("connection closed by peer")]
    TransportClosed,

    #[error("socket error: {0}")]
    TransportError(#[from] std::io::Error),

    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    #[error("encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("invalid state: {0}")]
    BadState(String),

    #[error("shutdown requested")]
    Shutdown,
}
