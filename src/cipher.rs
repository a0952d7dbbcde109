//! AES-256-CBC message cipher keyed by the handshake.
//!
//! A [`CryptoState`] holds one encrypt context and one decrypt context for a
//! single connection. Each message is padded with PKCS#7 and enciphered as
//! its own CBC run, but the contexts are streaming: the last ciphertext
//! block of a message becomes the chaining IV for the next one, so the two
//! directions advance in lockstep with the peer's matching state for as long
//! as the connection lives. Re-keying requires a new connection.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use zeroize::Zeroizing;

use crate::error::SecureSocketError;
use crate::Result;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Shared-key length in bytes (AES-256).
pub const KEY_LEN: usize = 32;
/// Initialization-vector length in bytes (one AES block).
pub const IV_LEN: usize = 16;
/// AES block length in bytes.
pub const BLOCK_LEN: usize = 16;

/// Cipher contexts and key material for one keyed connection.
///
/// The shared key is scrubbed from memory when the state is dropped.
pub struct CryptoState {
    shared_key: Zeroizing<[u8; KEY_LEN]>,
    encrypt_iv: [u8; IV_LEN],
    decrypt_iv: [u8; IV_LEN],
}

impl CryptoState {
    /// Build both directions' contexts from the handshake outputs.
    pub fn new(shared_key: [u8; KEY_LEN], iv: [u8; IV_LEN]) -> Self {
        Self {
            shared_key: Zeroizing::new(shared_key),
            encrypt_iv: iv,
            decrypt_iv: iv,
        }
    }

    /// Encrypt one message, advancing the outbound chaining IV.
    ///
    /// Output length is the plaintext padded up to the next whole block, so
    /// at most `plaintext.len() + BLOCK_LEN`.
    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let enc = Aes256CbcEnc::new_from_slices(self.shared_key.as_slice(), &self.encrypt_iv)
            .map_err(|e| SecureSocketError::EncryptionFailed(e.to_string()))?;
        let ciphertext = enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext);
        self.encrypt_iv
            .copy_from_slice(&ciphertext[ciphertext.len() - BLOCK_LEN..]);
        Ok(ciphertext)
    }

    /// Decrypt one message, advancing the inbound chaining IV.
    pub fn decrypt(&mut self, ciphertext: &[u8]) -> Result<Vec<u8>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_LEN != 0 {
            return Err(SecureSocketError::DecryptionFailed(format!(
                "ciphertext length {} is not a positive multiple of the block size",
                ciphertext.len()
            )));
        }
        let dec = Aes256CbcDec::new_from_slices(self.shared_key.as_slice(), &self.decrypt_iv)
            .map_err(|e| SecureSocketError::DecryptionFailed(e.to_string()))?;
        let plaintext = dec
            .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
            .map_err(|e| SecureSocketError::DecryptionFailed(e.to_string()))?;
        self.decrypt_iv
            .copy_from_slice(&ciphertext[ciphertext.len() - BLOCK_LEN..]);
        Ok(plaintext)
    }

    /// The 32-byte shared secret. Exposed for diagnostics and tests.
    pub fn shared_key(&self) -> &[u8; KEY_LEN] {
        &self.shared_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paired_states() -> (CryptoState, CryptoState) {
        let key = [0x42u8; KEY_LEN];
        let iv = [0x17u8; IV_LEN];
        (CryptoState::new(key, iv), CryptoState::new(key, iv))
    }

    #[test]
    fn round_trip_single_message() {
        let (mut a, mut b) = paired_states();
        let ciphertext = a.encrypt(b"attack at dawn").unwrap();
        assert_eq!(b.decrypt(&ciphertext).unwrap(), b"attack at dawn");
    }

    #[test]
    fn contexts_chain_across_messages() {
        let (mut a, mut b) = paired_states();
        for msg in [&b"first"[..], b"second", b"third", b""] {
            let ciphertext = a.encrypt(msg).unwrap();
            assert_eq!(b.decrypt(&ciphertext).unwrap(), msg);
        }
    }

    #[test]
    fn identical_plaintexts_differ_after_first_message() {
        let (mut a, _) = paired_states();
        let first = a.encrypt(b"echo").unwrap();
        let second = a.encrypt(b"echo").unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn padding_rounds_up_to_whole_blocks() {
        let (mut a, _) = paired_states();
        assert_eq!(a.encrypt(b"").unwrap().len(), BLOCK_LEN);
        assert_eq!(a.encrypt(&[0u8; 15]).unwrap().len(), BLOCK_LEN);
        assert_eq!(a.encrypt(&[0u8; 16]).unwrap().len(), 2 * BLOCK_LEN);
        assert_eq!(a.encrypt(&[0u8; 500]).unwrap().len(), 512);
    }

    #[test]
    fn decrypt_rejects_ragged_ciphertext() {
        let (_, mut b) = paired_states();
        assert!(matches!(
            b.decrypt(&[0u8; 15]),
            Err(SecureSocketError::DecryptionFailed(_))
        ));
        assert!(matches!(
            b.decrypt(&[]),
            Err(SecureSocketError::DecryptionFailed(_))
        ));
    }
}
