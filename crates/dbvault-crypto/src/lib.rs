//! dbvault-crypto: streaming authenticated encryption for database dumps
//!
//! Architecture: fixed-size chunks sealed with AES-256-GCM
//!
//! ```text
//! plaintext ──► [C bytes][C bytes] … [≤C bytes]
//!                  │        │            │
//!               seal(n0) seal(n1)  …  seal(nk)      n(i+1) = n(i) + 1 (big-endian, full width)
//!                  ▼        ▼            ▼
//! ciphertext ─► [C+16]   [C+16]   …  [≤C+16]
//! ```
//!
//! There is no header, length prefix or chunk index in the output. Chunk size
//! and tag size are shared constants; both sides must agree on them.

pub mod error;
pub mod file;
pub mod keys;
pub mod nonce;
pub mod stream;

pub use error::CryptoError;
pub use file::{decrypt_file, encrypt_file};
pub use keys::{unwrap_hex_base64, wrap_hex_base64, KeyMaterial};
pub use nonce::{nonce_at, NonceSequence};
pub use stream::{
    decrypt_stream, encrypt_stream, size_overhead, ChunkOpener, ChunkSealer, DecryptWriter,
    EncryptReader,
};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM nonce (96-bit)
pub const NONCE_SIZE: usize = 12;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Plaintext bytes per sealed chunk (1 MiB)
pub const CHUNK_SIZE: usize = 1024 * 1024;

/// Ciphertext bytes per full chunk
pub const SEALED_CHUNK_SIZE: usize = CHUNK_SIZE + TAG_SIZE;
