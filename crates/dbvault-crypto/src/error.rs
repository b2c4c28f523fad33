use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Authentication tag did not verify. Nothing from this chunk was emitted.
    #[error("integrity check failed on chunk {chunk}: invalid key, corrupted or truncated data")]
    Integrity { chunk: u64 },

    #[error("encryption failed on chunk {chunk}")]
    Seal { chunk: u64 },

    #[error("invalid key material: {0}")]
    KeyMaterial(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CryptoError {
    /// Recover a `CryptoError` that was carried through an `io::Error` by one
    /// of the stream adapters; any other I/O error stays `Io`.
    pub fn from_io(err: std::io::Error) -> Self {
        if !err.get_ref().is_some_and(|inner| inner.is::<CryptoError>()) {
            return CryptoError::Io(err);
        }
        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<CryptoError>()) {
            Some(Ok(ours)) => *ours,
            Some(Err(other)) => CryptoError::Io(std::io::Error::new(kind, other)),
            None => CryptoError::Io(kind.into()),
        }
    }

    pub(crate) fn into_io(self) -> std::io::Error {
        match self {
            CryptoError::Io(e) => e,
            other => std::io::Error::new(std::io::ErrorKind::InvalidData, other),
        }
    }

    pub fn is_integrity(&self) -> bool {
        matches!(self, CryptoError::Integrity { .. })
    }
}
