//! Cryptographic oracle for the sealwire handshake and payload encryption.
//!
//! Three narrow concerns, nothing else:
//!
//! - **KEM**: ML-KEM-768 key encapsulation. The client generates the keypair
//!   and decapsulates; the server only ever encapsulates against a received
//!   encapsulation key. The server never holds a KEM private key.
//! - **KDF**: HKDF-SHA-256 with empty salt and empty info, expanding the raw
//!   KEM shared secret into the 256-bit symmetric key both sides feed into
//!   the AEAD.
//! - **AEAD**: ChaCha20-Poly1305 with a fresh 12-byte nonce sampled from the
//!   OS CSPRNG on every call and no associated data.
//!
//! Nonce uniqueness is enforced by fresh sampling per call, never by a
//! counter; a counter would have to survive reconnects and both ends of the
//! relay, and a 96-bit random nonce under a per-connection key does not reach
//! collision territory at chat volumes.
//!
//! Contract: `decrypt(k, n, encrypt(k, m).1) == m`.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use pqcrypto_mlkem::mlkem768;
use pqcrypto_traits::kem::{
    Ciphertext as _, PublicKey as _, SharedSecret as _,
};
use sha2::Sha256;
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// AEAD nonce size in bytes (ChaCha20-Poly1305).
pub const NONCE_SIZE: usize = 12;

/// Derived symmetric key size in bytes.
pub const KEY_SIZE: usize = 32;

/// Errors from the crypto oracle.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CryptoError {
    /// The peer's encapsulation key bytes were not a valid ML-KEM-768 key.
    /// Fatal for the handshake.
    #[error("invalid ML-KEM-768 encapsulation key")]
    InvalidEncapKey,

    /// The KEM ciphertext bytes were not a valid ML-KEM-768 ciphertext.
    /// Fatal for the handshake.
    #[error("invalid ML-KEM-768 ciphertext")]
    InvalidKemCiphertext,

    /// AEAD sealing failed.
    #[error("encryption failed")]
    Encrypt,

    /// Authentication tag mismatch. The frame is dropped; the connection
    /// survives.
    #[error("decryption failed: authentication tag mismatch")]
    Decrypt,
}

/// The 256-bit symmetric key shared by one client/server pair.
///
/// Exists only after the handshake completes and is never transmitted.
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Raw key bytes for the AEAD.
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Key material never reaches logs.
        f.write_str("SymmetricKey(..)")
    }
}

/// Client-side ML-KEM-768 keypair.
///
/// Generated once per client process and reused across reconnects; the
/// encapsulation key travels to the server in the `exchange_keys` frame.
pub struct KeyPair {
    decap_key: mlkem768::SecretKey,
    encap_key: mlkem768::PublicKey,
}

impl KeyPair {
    /// Generate a fresh ML-KEM-768 keypair from the OS CSPRNG.
    pub fn generate() -> Self {
        let (encap_key, decap_key) = mlkem768::keypair();
        Self { decap_key, encap_key }
    }

    /// Public encapsulation key bytes to send to the server.
    pub fn encap_key_bytes(&self) -> Vec<u8> {
        self.encap_key.as_bytes().to_vec()
    }

    /// Recover the raw shared secret from the server's KEM ciphertext.
    ///
    /// # Errors
    ///
    /// - `CryptoError::InvalidKemCiphertext` if the bytes are not a valid
    ///   ML-KEM-768 ciphertext
    pub fn decapsulate(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let ciphertext = mlkem768::Ciphertext::from_bytes(ciphertext)
            .map_err(|_| CryptoError::InvalidKemCiphertext)?;

        let shared = mlkem768::decapsulate(&ciphertext, &self.decap_key);
        Ok(shared.as_bytes().to_vec())
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair").field("encap_key_len", &self.encap_key.as_bytes().len()).finish()
    }
}

/// Server side of the handshake: encapsulate against the client's
/// encapsulation key.
///
/// Returns the raw shared secret (feed it to [`derive_key`]) and the KEM
/// ciphertext to send back.
///
/// # Errors
///
/// - `CryptoError::InvalidEncapKey` if the bytes are not a valid ML-KEM-768
///   encapsulation key
pub fn encapsulate(encap_key_bytes: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let encap_key = mlkem768::PublicKey::from_bytes(encap_key_bytes)
        .map_err(|_| CryptoError::InvalidEncapKey)?;

    let (shared, ciphertext) = mlkem768::encapsulate(&encap_key);
    Ok((shared.as_bytes().to_vec(), ciphertext.as_bytes().to_vec()))
}

/// Expand the raw KEM shared secret into the AEAD key.
///
/// HKDF-SHA-256, empty salt, empty info, extract-then-expand to 32 bytes.
/// Both sides run this over the same shared secret and obtain the same key.
pub fn derive_key(shared_secret: &[u8]) -> SymmetricKey {
    let hk = Hkdf::<Sha256>::new(None, shared_secret);

    let mut key = [0u8; KEY_SIZE];
    #[allow(clippy::expect_used)]
    hk.expand(&[], &mut key).expect("invariant: 32 bytes is a valid HKDF-SHA-256 output length");

    SymmetricKey(key)
}

/// Seal a plaintext under the shared key.
///
/// Returns `(nonce, ciphertext)`; the nonce is freshly sampled from the OS
/// CSPRNG for this one call.
///
/// # Errors
///
/// - `CryptoError::Encrypt` if AEAD sealing fails
///
/// # Panics
///
/// Panics if the OS RNG fails. Operating without a CSPRNG would silently
/// reuse nonces, which is worse than stopping.
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let mut nonce = [0u8; NONCE_SIZE];
    #[allow(clippy::expect_used)]
    getrandom::getrandom(&mut nonce)
        .expect("invariant: OS RNG failure is unrecoverable for nonce generation");

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    let ciphertext = cipher
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encrypt)?;

    Ok((nonce.to_vec(), ciphertext))
}

/// Open a ciphertext sealed with [`encrypt`].
///
/// # Errors
///
/// - `CryptoError::Decrypt` on tag mismatch, wrong key, or wrong nonce
pub fn decrypt(
    key: &SymmetricKey,
    nonce: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CryptoError> {
    if nonce.len() != NONCE_SIZE {
        return Err(CryptoError::Decrypt);
    }

    let cipher = ChaCha20Poly1305::new(key.as_bytes().into());
    cipher.decrypt(Nonce::from_slice(nonce), ciphertext).map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key(seed: u8) -> SymmetricKey {
        let mut secret = [0u8; 32];
        for (i, byte) in secret.iter_mut().enumerate() {
            *byte = seed.wrapping_add(i as u8);
        }
        derive_key(&secret)
    }

    #[test]
    fn encrypt_decrypt_round_trip() {
        let key = test_key(1);
        let plaintext = b"Hello, post-quantum world!";

        let (nonce, ciphertext) = encrypt(&key, plaintext).unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();

        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn encrypt_decrypt_empty_message() {
        let key = test_key(2);

        let (nonce, ciphertext) = encrypt(&key, b"").unwrap();
        let decrypted = decrypt(&key, &nonce, &ciphertext).unwrap();

        assert_eq!(decrypted, b"");
    }

    #[test]
    fn ciphertext_carries_poly1305_tag() {
        let key = test_key(3);
        let plaintext = b"tagged";

        let (_, ciphertext) = encrypt(&key, plaintext).unwrap();
        assert_eq!(ciphertext.len(), plaintext.len() + 16);
    }

    #[test]
    fn fresh_nonce_per_call() {
        let key = test_key(4);

        let (nonce1, ct1) = encrypt(&key, b"same input").unwrap();
        let (nonce2, ct2) = encrypt(&key, b"same input").unwrap();

        assert_ne!(nonce1, nonce2);
        assert_ne!(ct1, ct2);
    }

    #[test]
    fn wrong_key_fails_decryption() {
        let key = test_key(5);
        let other = test_key(6);

        let (nonce, ciphertext) = encrypt(&key, b"secret").unwrap();
        assert_eq!(decrypt(&other, &nonce, &ciphertext), Err(CryptoError::Decrypt));
    }

    #[test]
    fn tampered_ciphertext_fails_decryption() {
        let key = test_key(7);

        let (nonce, mut ciphertext) = encrypt(&key, b"original").unwrap();
        ciphertext[0] ^= 0xFF;

        assert_eq!(decrypt(&key, &nonce, &ciphertext), Err(CryptoError::Decrypt));
    }

    #[test]
    fn wrong_nonce_length_fails_decryption() {
        let key = test_key(8);
        let (_, ciphertext) = encrypt(&key, b"short nonce").unwrap();

        assert_eq!(decrypt(&key, &[0u8; 8], &ciphertext), Err(CryptoError::Decrypt));
    }

    #[test]
    fn handshake_round_trip_derives_matching_keys() {
        // Client generates, server encapsulates, client decapsulates; both
        // sides HKDF the shared secret into the same 32-byte key.
        let keypair = KeyPair::generate();

        let (server_secret, kem_ciphertext) = encapsulate(&keypair.encap_key_bytes()).unwrap();
        let client_secret = keypair.decapsulate(&kem_ciphertext).unwrap();

        assert_eq!(server_secret, client_secret);

        let server_key = derive_key(&server_secret);
        let client_key = derive_key(&client_secret);
        assert_eq!(server_key.as_bytes(), client_key.as_bytes());
    }

    #[test]
    fn relay_decrypt_then_reencrypt() {
        // The server's fan-out path: decrypt under the sender's key,
        // re-encrypt under the recipient's distinct key.
        let sender_key = test_key(9);
        let recipient_key = test_key(10);

        let (nonce, ciphertext) = encrypt(&sender_key, b"psst").unwrap();
        let plaintext = decrypt(&sender_key, &nonce, &ciphertext).unwrap();

        let (nonce2, ciphertext2) = encrypt(&recipient_key, &plaintext).unwrap();
        assert_eq!(decrypt(&recipient_key, &nonce2, &ciphertext2).unwrap(), b"psst");

        // The sender's key cannot open the relayed copy.
        assert_eq!(decrypt(&sender_key, &nonce2, &ciphertext2), Err(CryptoError::Decrypt));
    }

    #[test]
    fn encapsulate_rejects_garbage_key() {
        assert_eq!(encapsulate(&[0u8; 7]), Err(CryptoError::InvalidEncapKey));
    }

    #[test]
    fn decapsulate_rejects_garbage_ciphertext() {
        let keypair = KeyPair::generate();
        assert_eq!(keypair.decapsulate(&[0u8; 3]), Err(CryptoError::InvalidKemCiphertext));
    }

    #[test]
    fn derive_key_is_deterministic() {
        let secret = [0xAB; 32];
        assert_eq!(derive_key(&secret).as_bytes(), derive_key(&secret).as_bytes());
        assert_ne!(derive_key(&secret).as_bytes(), derive_key(&[0xCD; 32]).as_bytes());
    }
}
