//! Path-to-path helpers around the stream codec

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use crate::error::CryptoError;
use crate::keys::KeyMaterial;
use crate::stream::{decrypt_stream, encrypt_stream};

/// Encrypt `src` into a newly created `dst`. Returns ciphertext bytes written.
pub fn encrypt_file(src: &Path, dst: &Path, keys: &KeyMaterial) -> Result<u64, CryptoError> {
    let reader = BufReader::new(File::open(src)?);
    let writer = BufWriter::new(File::create(dst)?);
    let written = encrypt_stream(reader, writer, keys)?;
    tracing::debug!(src = %src.display(), dst = %dst.display(), bytes = written, "file encrypted");
    Ok(written)
}

/// Decrypt `src` into a newly created `dst`. Returns plaintext bytes written.
///
/// On an integrity failure `dst` holds the verified prefix; callers publish
/// `dst` only on success.
pub fn decrypt_file(src: &Path, dst: &Path, keys: &KeyMaterial) -> Result<u64, CryptoError> {
    let reader = BufReader::new(File::open(src)?);
    let file = File::create(dst)?;
    let written = decrypt_stream(reader, BufWriter::new(&file), keys)?;
    file.sync_all()?;
    tracing::debug!(src = %src.display(), dst = %dst.display(), bytes = written, "file decrypted");
    Ok(written)
}
