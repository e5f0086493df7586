//! Crate-wide error taxonomy.
//!
//! One enum per subsystem (`SuperblockError`-style granularity for
//! `CodecError`, `CryptoError`, etc.), plus `EetError`: an umbrella enum
//! matching the public error set of the external interface. Each
//! subsystem error converts into it via `#[from]`.

use thiserror::Error;

/// The write path's failure family, kept separate from the read-path
/// errors for I/O failures specifically.
#[derive(Error, Debug)]
pub enum WriteError {
    #[error("container would exceed the maximum representable file size")]
    FileTooBig,
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("out of disk space")]
    OutOfSpace,
    #[error("handle is already closed")]
    FileClosed,
}

/// Umbrella error type matching the crate's public error set.
#[derive(Error, Debug)]
pub enum EetError {
    #[error("no error")]
    None,
    #[error("bad object")]
    BadObject,
    #[error("entry is empty")]
    Empty,
    #[error("handle is not writable")]
    NotWritable,
    #[error("out of memory")]
    OutOfMemory,
    #[error("write error: {0}")]
    WriteError(#[from] WriteError),
    #[error("mmap failed: {0}")]
    MmapFailed(String),
    #[error("X.509 encoding failed: {0}")]
    X509EncodingFailed(String),
    #[error("signing failed: {0}")]
    SignatureFailed(String),
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("container is not signed")]
    NotSigned,
    #[error("not implemented")]
    NotImplemented,
    #[error("PRNG not seeded")]
    PrngNotSeeded,
    #[error("encryption failed: {0}")]
    EncryptFailed(String),
    #[error("decryption failed: {0}")]
    DecryptFailed(String),
}

impl From<std::io::Error> for EetError {
    fn from(e: std::io::Error) -> Self {
        EetError::WriteError(WriteError::IoError(e))
    }
}
