//! Key material for one stream, and the hex-then-base64 wire wrapping used
//! when key material is exchanged with the platform API.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use rand::RngCore;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::{KEY_SIZE, NONCE_SIZE};

/// Key, initial nonce and associated data for one encrypted stream.
///
/// A fresh `KeyMaterial` is generated for every encryption. Reusing one for
/// two independent streams repeats (key, nonce) pairs. Zeroized on drop.
#[derive(Clone)]
pub struct KeyMaterial {
    key: [u8; KEY_SIZE],
    nonce: [u8; NONCE_SIZE],
    aad: Vec<u8>,
}

impl KeyMaterial {
    pub fn new(key: [u8; KEY_SIZE], nonce: [u8; NONCE_SIZE], aad: Vec<u8>) -> Self {
        Self { key, nonce, aad }
    }

    /// Random key and nonce from the OS-seeded thread RNG, empty AAD.
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let mut key = [0u8; KEY_SIZE];
        let mut nonce = [0u8; NONCE_SIZE];
        rng.fill_bytes(&mut key);
        rng.fill_bytes(&mut nonce);
        Self::new(key, nonce, Vec::new())
    }

    /// Rebuild key material from the wrapped strings on a job record.
    pub fn from_wrapped(wrapped_key: &str, wrapped_nonce: &str) -> Result<Self, CryptoError> {
        let mut key_bytes = unwrap_hex_base64(wrapped_key)?;
        let nonce_bytes = unwrap_hex_base64(wrapped_nonce)?;

        if key_bytes.len() != KEY_SIZE {
            let len = key_bytes.len();
            key_bytes.zeroize();
            return Err(CryptoError::KeyMaterial(format!(
                "key is {len} bytes (expected {KEY_SIZE})"
            )));
        }
        if nonce_bytes.len() != NONCE_SIZE {
            key_bytes.zeroize();
            return Err(CryptoError::KeyMaterial(format!(
                "nonce is {} bytes (expected {NONCE_SIZE})",
                nonce_bytes.len()
            )));
        }

        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(&key_bytes);
        key_bytes.zeroize();
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(&nonce_bytes);
        Ok(Self::new(key, nonce, Vec::new()))
    }

    pub fn with_aad(mut self, aad: impl Into<Vec<u8>>) -> Self {
        self.aad = aad.into();
        self
    }

    pub fn key(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }

    pub fn nonce(&self) -> &[u8; NONCE_SIZE] {
        &self.nonce
    }

    pub fn aad(&self) -> &[u8] {
        &self.aad
    }

    pub fn wrapped_key(&self) -> String {
        wrap_hex_base64(&self.key)
    }

    pub fn wrapped_nonce(&self) -> String {
        wrap_hex_base64(&self.nonce)
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.key.zeroize();
        self.nonce.zeroize();
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key", &"[REDACTED]")
            .field("nonce", &"[REDACTED]")
            .field("aad_len", &self.aad.len())
            .finish()
    }
}

/// Hex-encode `bytes`, then base64-encode the hex text.
pub fn wrap_hex_base64(bytes: &[u8]) -> String {
    let mut hexed = hex::encode(bytes);
    let wrapped = B64.encode(hexed.as_bytes());
    hexed.zeroize();
    wrapped
}

/// Inverse of [`wrap_hex_base64`].
pub fn unwrap_hex_base64(wrapped: &str) -> Result<Vec<u8>, CryptoError> {
    let mut hexed = B64
        .decode(wrapped.trim())
        .map_err(|e| CryptoError::KeyMaterial(format!("base64 decode: {e}")))?;
    let raw = hex::decode(&hexed).map_err(|e| CryptoError::KeyMaterial(format!("hex decode: {e}")));
    hexed.zeroize();
    raw
}
