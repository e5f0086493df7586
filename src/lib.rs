//! # strongbox — embeddable, seekable, random-access container format
//!
//! Format guarantees:
//! - All numeric fields are big-endian; never negotiated
//! - A flat directory of named entries, each independently
//!   compressible/cipherable/aliasable — no block-stream concept
//! - An optional string dictionary deduplicates repeated names/values
//! - An optional trailing X.509 signature covers every byte before it
//! - Writes are staged in memory and flushed atomically (temp file +
//!   rename), never patched in place
//! - The schema-driven data codec tolerates field additions/removals
//!   (unknown fields skipped, missing fields zero-filled) and bounds
//!   recursion at 128 levels

pub mod byteio;
pub mod codec;
pub mod container;
pub mod crypto;
pub mod data_codec;
pub mod dictionary;
pub mod dump;
pub mod error;
pub mod file_manager;
pub mod image;
pub mod recovery;
pub mod schema;

// Flat re-exports for the most common types.
pub use container::{Container, ContainerBuilder, ContainerError, DirectoryEntry, StagedEntry};
pub use crypto::{derive_key, CryptoError};
pub use crypto::identity::Identity;
pub use data_codec::{decode, encode, DataCodecError, Value};
pub use dictionary::{Dictionary, DictionaryError};
pub use error::EetError;
pub use file_manager::{close, memopen_read, open, Direct, FileManagerError, Handle, ModeOption, OpenOptions};
pub use recovery::{scan_bytes, scan_file, RecoveryQuality, RecoveryReport};
pub use schema::{Descriptor, FieldDescriptor, FieldKind, GroupTag, PrimitiveTag};
