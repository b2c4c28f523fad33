//! Chunked AES-256-GCM over byte streams
//!
//! Encryption reads `CHUNK_SIZE` plaintext bytes at a time (short only at end
//! of input) and emits `seal(chunk, nonce_i, aad)`. Decryption consumes
//! `SEALED_CHUNK_SIZE` ciphertext bytes at a time and mirrors the nonce
//! sequence. Plaintext of a chunk reaches the sink only after its tag verified.
//!
//! Verified chunks are written through before the end of the stream is known.
//! A ciphertext cut exactly on a chunk boundary therefore decrypts to an
//! authentic but truncated plaintext without error. Callers that must not
//! expose partial output decrypt into a temporary file and publish it only
//! after [`DecryptWriter::finish`] succeeds.

use std::io::{self, Read, Write};

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce,
};

use crate::error::CryptoError;
use crate::keys::KeyMaterial;
use crate::nonce::NonceSequence;
use crate::{CHUNK_SIZE, SEALED_CHUNK_SIZE, TAG_SIZE};

/// Ciphertext size for a plaintext of `plaintext_len` bytes:
/// `ceil(len / CHUNK_SIZE) * TAG_SIZE + len`.
pub fn size_overhead(plaintext_len: u64) -> u64 {
    plaintext_len.div_ceil(CHUNK_SIZE as u64) * TAG_SIZE as u64 + plaintext_len
}

/// Seals successive chunks of one stream.
pub struct ChunkSealer {
    cipher: Aes256Gcm,
    nonces: NonceSequence,
    aad: Vec<u8>,
}

impl ChunkSealer {
    pub fn new(keys: &KeyMaterial) -> Self {
        Self {
            cipher: Aes256Gcm::new(keys.key().into()),
            nonces: NonceSequence::new(*keys.nonce()),
            aad: keys.aad().to_vec(),
        }
    }

    /// Seal one chunk (at most `CHUNK_SIZE` bytes) under the current nonce,
    /// then advance the nonce.
    pub fn seal_next(&mut self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        debug_assert!(plaintext.len() <= CHUNK_SIZE);
        let chunk = self.nonces.issued();
        let sealed = self
            .cipher
            .encrypt(
                Nonce::from_slice(self.nonces.current()),
                Payload {
                    msg: plaintext,
                    aad: &self.aad,
                },
            )
            .map_err(|_| CryptoError::Seal { chunk })?;
        self.nonces.advance();
        Ok(sealed)
    }

    pub fn chunks_sealed(&self) -> u64 {
        self.nonces.issued()
    }
}

/// Opens successive chunks of one stream. Poisoned by the first failure.
pub struct ChunkOpener {
    cipher: Aes256Gcm,
    nonces: NonceSequence,
    aad: Vec<u8>,
    failed_at: Option<u64>,
}

impl ChunkOpener {
    pub fn new(keys: &KeyMaterial) -> Self {
        Self {
            cipher: Aes256Gcm::new(keys.key().into()),
            nonces: NonceSequence::new(*keys.nonce()),
            aad: keys.aad().to_vec(),
            failed_at: None,
        }
    }

    /// Verify and decrypt one sealed chunk under the current nonce.
    pub fn open_next(&mut self, sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if let Some(chunk) = self.failed_at {
            return Err(CryptoError::Integrity { chunk });
        }
        let chunk = self.nonces.issued();
        if sealed.len() < TAG_SIZE {
            self.failed_at = Some(chunk);
            return Err(CryptoError::Integrity { chunk });
        }
        match self.cipher.decrypt(
            Nonce::from_slice(self.nonces.current()),
            Payload {
                msg: sealed,
                aad: &self.aad,
            },
        ) {
            Ok(plaintext) => {
                self.nonces.advance();
                Ok(plaintext)
            }
            Err(_) => {
                self.failed_at = Some(chunk);
                Err(CryptoError::Integrity { chunk })
            }
        }
    }

    pub fn chunks_opened(&self) -> u64 {
        self.nonces.issued()
    }

    /// Index of the chunk that failed verification, if any
    pub fn failed_at(&self) -> Option<u64> {
        self.failed_at
    }
}

/// Lazily encrypts everything read from `source`.
///
/// Each `read` hands out bytes of the current sealed chunk; a new chunk is
/// sealed only when the previous one has been fully consumed.
pub struct EncryptReader<R> {
    source: R,
    sealer: ChunkSealer,
    plain: Vec<u8>,
    sealed: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: Read> EncryptReader<R> {
    pub fn new(source: R, keys: &KeyMaterial) -> Self {
        Self {
            source,
            sealer: ChunkSealer::new(keys),
            plain: vec![0u8; CHUNK_SIZE],
            sealed: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    pub fn chunks_sealed(&self) -> u64 {
        self.sealer.chunks_sealed()
    }

    fn seal_next_chunk(&mut self) -> io::Result<()> {
        let n = read_full(&mut self.source, &mut self.plain)?;
        self.pos = 0;
        if n < CHUNK_SIZE {
            self.eof = true;
        }
        if n == 0 {
            self.sealed.clear();
            return Ok(());
        }
        self.sealed = self
            .sealer
            .seal_next(&self.plain[..n])
            .map_err(CryptoError::into_io)?;
        Ok(())
    }
}

impl<R: Read> Read for EncryptReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        while self.pos >= self.sealed.len() {
            if self.eof {
                return Ok(0);
            }
            self.seal_next_chunk()?;
        }
        let n = buf.len().min(self.sealed.len() - self.pos);
        buf[..n].copy_from_slice(&self.sealed[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }
}

/// Decrypts everything written to it into `sink`.
///
/// Call [`close`](Self::close) or [`finish`](Self::finish) once all
/// ciphertext is written; the trailing partial chunk is only opened then.
/// Dropping the writer without closing discards that residual.
pub struct DecryptWriter<W: Write> {
    sink: W,
    opener: ChunkOpener,
    pending: Vec<u8>,
    written: u64,
}

impl<W: Write> DecryptWriter<W> {
    pub fn new(sink: W, keys: &KeyMaterial) -> Self {
        Self {
            sink,
            opener: ChunkOpener::new(keys),
            pending: Vec::with_capacity(SEALED_CHUNK_SIZE),
            written: 0,
        }
    }

    pub fn chunks_opened(&self) -> u64 {
        self.opener.chunks_opened()
    }

    /// Verified plaintext bytes written to the sink so far
    pub fn plaintext_written(&self) -> u64 {
        self.written
    }

    fn open_pending(&mut self) -> Result<(), CryptoError> {
        let plaintext = self.opener.open_next(&self.pending)?;
        self.pending.clear();
        self.sink.write_all(&plaintext)?;
        self.written += plaintext.len() as u64;
        Ok(())
    }

    /// Open the residual bytes as the final chunk and flush the sink.
    /// Returns the total plaintext length.
    pub fn close(&mut self) -> Result<u64, CryptoError> {
        if let Some(chunk) = self.opener.failed_at() {
            return Err(CryptoError::Integrity { chunk });
        }
        if !self.pending.is_empty() {
            self.open_pending()?;
        }
        self.sink.flush()?;
        Ok(self.written)
    }

    /// [`close`](Self::close), then hand back the sink.
    pub fn finish(mut self) -> Result<W, CryptoError> {
        self.close()?;
        Ok(self.sink)
    }
}

impl<W: Write> Write for DecryptWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if let Some(chunk) = self.opener.failed_at() {
            return Err(CryptoError::Integrity { chunk }.into_io());
        }
        let take = buf.len().min(SEALED_CHUNK_SIZE - self.pending.len());
        self.pending.extend_from_slice(&buf[..take]);
        if self.pending.len() == SEALED_CHUNK_SIZE {
            self.open_pending().map_err(CryptoError::into_io)?;
        }
        Ok(take)
    }

    /// Flushes the sink. Does not open a partially buffered chunk.
    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

/// Encrypt all of `reader` into `writer`. Returns ciphertext bytes written.
pub fn encrypt_stream<R: Read, W: Write>(
    reader: R,
    mut writer: W,
    keys: &KeyMaterial,
) -> Result<u64, CryptoError> {
    let mut enc = EncryptReader::new(reader, keys);
    let written = io::copy(&mut enc, &mut writer).map_err(CryptoError::from_io)?;
    writer.flush()?;
    tracing::debug!(chunks = enc.chunks_sealed(), bytes = written, "stream sealed");
    Ok(written)
}

/// Decrypt all of `reader` into `writer`. Returns plaintext bytes written.
pub fn decrypt_stream<R: Read, W: Write>(
    mut reader: R,
    writer: W,
    keys: &KeyMaterial,
) -> Result<u64, CryptoError> {
    let mut dec = DecryptWriter::new(writer, keys);
    io::copy(&mut reader, &mut dec).map_err(CryptoError::from_io)?;
    let written = dec.close()?;
    tracing::debug!(chunks = dec.chunks_opened(), bytes = written, "stream opened");
    Ok(written)
}

/// Fill `buf` from `reader` unless end of input comes first.
fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nonce::nonce_at;
    use crate::{KEY_SIZE, NONCE_SIZE};
    use proptest::prelude::*;

    const C: usize = CHUNK_SIZE;

    fn test_keys() -> KeyMaterial {
        let mut nonce = [0u8; NONCE_SIZE];
        // near a byte boundary so multi-chunk streams exercise the carry
        nonce[NONCE_SIZE - 1] = 0xFE;
        KeyMaterial::new([0x5A; KEY_SIZE], nonce, b"dbvault-test".to_vec())
    }

    fn make_data(size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| (i.wrapping_mul(31) ^ (i >> 7)) as u8)
            .collect()
    }

    fn encrypt_vec(data: &[u8], keys: &KeyMaterial) -> Vec<u8> {
        let mut out = Vec::new();
        encrypt_stream(data, &mut out, keys).unwrap();
        out
    }

    #[test]
    fn test_roundtrip_boundary_lengths() {
        let keys = test_keys();
        for len in [0, 1, C - 1, C, C + 1, 2 * C, 2 * C + 17] {
            let data = make_data(len);
            let sealed = encrypt_vec(&data, &keys);
            assert_eq!(sealed.len() as u64, size_overhead(len as u64), "len {len}");

            let mut plain = Vec::new();
            let n = decrypt_stream(sealed.as_slice(), &mut plain, &keys).unwrap();
            assert_eq!(n, len as u64);
            assert_eq!(plain, data, "roundtrip mismatch at len {len}");
        }
    }

    #[test]
    fn test_size_overhead_formula() {
        let tag = TAG_SIZE as u64;
        let c = C as u64;
        assert_eq!(size_overhead(0), 0);
        assert_eq!(size_overhead(1), 1 + tag);
        assert_eq!(size_overhead(c - 1), c - 1 + tag);
        assert_eq!(size_overhead(c), c + tag);
        assert_eq!(size_overhead(c + 1), c + 1 + 2 * tag);
        assert_eq!(size_overhead(2 * c), 2 * c + 2 * tag);
        assert_eq!(size_overhead(2 * c + 17), 2 * c + 17 + 3 * tag);
    }

    #[test]
    fn test_each_chunk_uses_incremented_nonce() {
        let keys = test_keys();
        let data = make_data(3 * C + 5);
        let sealed = encrypt_vec(&data, &keys);

        let cipher = Aes256Gcm::new(keys.key().into());
        let mut seen = std::collections::HashSet::new();
        for (i, chunk) in sealed.chunks(SEALED_CHUNK_SIZE).enumerate() {
            let nonce = nonce_at(keys.nonce(), i as u64);
            assert!(seen.insert(nonce), "nonce repeated at chunk {i}");
            let plain = cipher
                .decrypt(
                    Nonce::from_slice(&nonce),
                    Payload {
                        msg: chunk,
                        aad: keys.aad(),
                    },
                )
                .unwrap_or_else(|_| panic!("chunk {i} not sealed under initial nonce + {i}"));
            assert_eq!(plain, data[i * C..((i + 1) * C).min(data.len())]);
        }
        assert_eq!(seen.len(), 4);
    }

    #[test]
    fn test_tampered_chunk_emits_nothing_from_that_chunk_on() {
        let keys = test_keys();
        let data = make_data(2 * C + 100);
        let sealed = encrypt_vec(&data, &keys);

        for (chunk_idx, offset) in [(0usize, 3usize), (1, 777), (2, 20)] {
            let mut tampered = sealed.clone();
            tampered[chunk_idx * SEALED_CHUNK_SIZE + offset] ^= 0x01;

            let mut plain = Vec::new();
            let err = decrypt_stream(tampered.as_slice(), &mut plain, &keys).unwrap_err();
            match err {
                CryptoError::Integrity { chunk } => assert_eq!(chunk, chunk_idx as u64),
                other => panic!("expected Integrity, got {other:?}"),
            }
            // only chunks before the tampered one were flushed
            assert_eq!(plain.len(), chunk_idx * C);
            assert_eq!(plain, data[..chunk_idx * C]);
        }
    }

    #[test]
    fn test_tampered_tag_detected() {
        let keys = test_keys();
        let mut sealed = encrypt_vec(b"short secret", &keys);
        let last = sealed.len() - 1;
        sealed[last] ^= 0x80;
        let mut plain = Vec::new();
        let err = decrypt_stream(sealed.as_slice(), &mut plain, &keys).unwrap_err();
        assert!(err.is_integrity());
        assert!(plain.is_empty());
    }

    #[test]
    fn test_truncated_on_chunk_boundary_yields_authentic_prefix() {
        let keys = test_keys();
        let data = make_data(2 * C + 9);
        let sealed = encrypt_vec(&data, &keys);

        let mut plain = Vec::new();
        decrypt_stream(&sealed[..SEALED_CHUNK_SIZE], &mut plain, &keys).unwrap();
        assert_eq!(plain, data[..C]);
    }

    #[test]
    fn test_truncated_mid_chunk_fails() {
        let keys = test_keys();
        let data = make_data(C + 500);
        let sealed = encrypt_vec(&data, &keys);

        let mut plain = Vec::new();
        let err = decrypt_stream(&sealed[..sealed.len() - 3], &mut plain, &keys).unwrap_err();
        assert!(matches!(err, CryptoError::Integrity { chunk: 1 }));
        assert_eq!(plain, data[..C]);
    }

    #[test]
    fn test_residual_shorter_than_tag_fails() {
        let keys = test_keys();
        let mut plain = Vec::new();
        let err = decrypt_stream(&[1u8, 2, 3][..], &mut plain, &keys).unwrap_err();
        assert!(matches!(err, CryptoError::Integrity { chunk: 0 }));
    }

    #[test]
    fn test_wrong_key_and_wrong_aad_fail() {
        let keys = test_keys();
        let sealed = encrypt_vec(b"payload", &keys);

        let other_key = KeyMaterial::new([0x11; KEY_SIZE], *keys.nonce(), keys.aad().to_vec());
        assert!(decrypt_stream(sealed.as_slice(), Vec::new(), &other_key).is_err());

        let other_aad = test_keys().with_aad(b"other".to_vec());
        assert!(decrypt_stream(sealed.as_slice(), Vec::new(), &other_aad).is_err());
    }

    #[test]
    fn test_writer_poisoned_after_failure() {
        let keys = test_keys();
        let mut sealed = encrypt_vec(&make_data(C), &keys);
        sealed[0] ^= 0xFF;

        let mut dec = DecryptWriter::new(Vec::new(), &keys);
        assert!(dec.write_all(&sealed).is_err());
        assert!(dec.write(&[0u8; 4]).is_err());
        assert!(matches!(dec.close(), Err(CryptoError::Integrity { chunk: 0 })));
    }

    #[test]
    fn test_drop_without_close_discards_residual() {
        let keys = test_keys();
        let sealed = encrypt_vec(b"never flushed", &keys);
        let mut sink = Vec::new();
        {
            let mut dec = DecryptWriter::new(&mut sink, &keys);
            dec.write_all(&sealed).unwrap();
        }
        assert!(sink.is_empty());
    }

    #[test]
    fn test_sealer_counts_chunks() {
        let keys = test_keys();
        let data = make_data(C * 2);
        let mut enc = EncryptReader::new(data.as_slice(), &keys);
        let mut out = Vec::new();
        enc.read_to_end(&mut out).unwrap();
        // exactly two chunks, no trailing empty chunk
        assert_eq!(enc.chunks_sealed(), 2);
        assert_eq!(out.len(), 2 * SEALED_CHUNK_SIZE);
    }

    /// Reader that returns at most `step` bytes per call.
    struct Trickle<'a> {
        data: &'a [u8],
        step: usize,
    }

    impl Read for Trickle<'_> {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = buf.len().min(self.step).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data = &self.data[n..];
            Ok(n)
        }
    }

    #[test]
    fn test_short_reads_do_not_change_framing() {
        let keys = test_keys();
        let data = make_data(C + 4096);
        let expected = encrypt_vec(&data, &keys);

        let mut out = Vec::new();
        encrypt_stream(
            Trickle {
                data: &data,
                step: 1000,
            },
            &mut out,
            &keys,
        )
        .unwrap();
        assert_eq!(out, expected);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_roundtrip_with_split_writes(
            data in proptest::collection::vec(any::<u8>(), 0..4096),
            split in 1usize..600,
        ) {
            let keys = test_keys();
            let sealed = encrypt_vec(&data, &keys);

            let mut dec = DecryptWriter::new(Vec::new(), &keys);
            for piece in sealed.chunks(split) {
                dec.write_all(piece).unwrap();
            }
            let plain = dec.finish().unwrap();
            prop_assert_eq!(plain, data);
        }
    }
}
