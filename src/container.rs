//! Container format — header, directory, string dictionary, payloads, and
//! an optional signature trailer.
//!
//! # On-disk layout (all integers big-endian)
//! ```text
//! MAGIC        u32   = 0x1ee7ff00
//! entry_count  u32
//! dict_count   u32
//! DIRECTORY    entry_count x {
//!    offset          u32
//!    stored_size     u32
//!    decompressed_sz u32
//!    name_size       u32
//!    flags           u32   bit0=compress bit1=cipher bit2=alias
//!    name            name_size bytes
//! }
//! DICT_RECS    dict_count x { hash offset size prev next }  (u32 each)
//! DICT_BLOB    sum(dict.size) bytes, NUL-separated
//! PAYLOADS     entries' bytes at their declared offsets
//! SIG_TRAILER? signature | x509_der | sig_len:u32 | der_len:u32 | 0x1ee70f42
//! ```
//!
//! This module only knows about bytes and offsets; staging writes,
//! concurrency, and the handle cache live in `file_manager`. The fixed
//! header and per-entry record are kept as one flat directory here
//! rather than split across separate superblock/block types, since this
//! format has no block-stream/solid-block concept.

use crate::byteio::{read_u32, write_u32};
use crate::crypto::identity::{self, Identity};
use crate::dictionary::{Dictionary, DictionaryError};
use std::collections::HashMap;
use std::io::{self, Cursor, Read, Write};
use std::sync::Arc;
use thiserror::Error;

pub const MAGIC: u32 = 0x1ee7_ff00;
pub const SIGN_MAGIC: u32 = 0x1ee7_0f42;

pub const FLAG_COMPRESS: u32 = 1 << 0;
pub const FLAG_CIPHER: u32 = 1 << 1;
pub const FLAG_ALIAS: u32 = 1 << 2;

/// Maximum entry name length accepted while reading a directory record.
/// Guards against a corrupt `name_size` field forcing an unbounded read.
const MAX_NAME_LEN: usize = 4096;

#[derive(Error, Debug)]
pub enum ContainerError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("not a strongbox container (bad magic)")]
    InvalidMagic,
    #[error("entry {0:?} offset/size ({1}+{2}) exceeds file length {3}")]
    EntryOutOfBounds(String, u32, u32, usize),
    #[error("entry {0:?} overlaps the directory region")]
    DirectoryOverlap(String),
    #[error("duplicate entry name {0:?}")]
    DuplicateName(String),
    #[error("dictionary error: {0}")]
    Dictionary(#[from] DictionaryError),
    #[error("container is not signed")]
    NotSigned,
    #[error("signature verification failed")]
    InvalidSignature,
    #[error("signing failed: {0}")]
    SigningFailed(#[from] identity::CryptoError),
    #[error("container would exceed the maximum representable file size")]
    FileTooBig,
}

#[derive(Debug, Clone)]
pub struct DirectoryEntry {
    pub name: String,
    pub offset: u32,
    pub stored_size: u32,
    pub decompressed_size: u32,
    pub flags: u32,
}

impl DirectoryEntry {
    pub fn is_compressed(&self) -> bool {
        self.flags & FLAG_COMPRESS != 0
    }
    pub fn is_ciphered(&self) -> bool {
        self.flags & FLAG_CIPHER != 0
    }
    pub fn is_alias(&self) -> bool {
        self.flags & FLAG_ALIAS != 0
    }
}

#[derive(Debug, Clone)]
pub struct SignatureTrailer {
    pub signature: Vec<u8>,
    pub x509_der: Vec<u8>,
}

/// Where the raw file bytes live: an owned buffer (`memopen`) or a
/// memory-mapped file (`open`). Payload reads borrow from whichever.
enum PayloadSource {
    Owned(Vec<u8>),
    Mapped(Arc<memmap2::Mmap>),
}

impl PayloadSource {
    fn as_slice(&self) -> &[u8] {
        match self {
            PayloadSource::Owned(v) => v.as_slice(),
            PayloadSource::Mapped(m) => &m[..],
        }
    }
}

pub struct Container {
    entries: Vec<DirectoryEntry>,
    by_name: HashMap<String, usize>,
    dictionary: Dictionary,
    source: PayloadSource,
    signature: Option<SignatureTrailer>,
    /// Byte length of everything before the signature trailer (or the
    /// whole file, if unsigned) — what `verify` hashes.
    signed_region_len: usize,
}

impl Container {
    pub fn open_owned(data: Vec<u8>) -> Result<Container, ContainerError> {
        let parsed = parse_header_and_directory(&data)?;
        Self::finish_open(data.len(), parsed, PayloadSource::Owned(data))
    }

    pub fn open_mapped(mmap: Arc<memmap2::Mmap>) -> Result<Container, ContainerError> {
        let len = mmap.len();
        let parsed = parse_header_and_directory(&mmap)?;
        Self::finish_open(len, parsed, PayloadSource::Mapped(mmap))
    }

    fn finish_open(
        file_len: usize,
        parsed: ParsedHeader,
        source: PayloadSource,
    ) -> Result<Container, ContainerError> {
        let ParsedHeader { entries, dict_count, dict_start, payload_region_start } = parsed;

        let mut by_name = HashMap::with_capacity(entries.len());
        for (idx, e) in entries.iter().enumerate() {
            validate_entry_bounds(e, file_len, payload_region_start)?;
            if by_name.insert(e.name.clone(), idx).is_some() {
                return Err(ContainerError::DuplicateName(e.name.clone()));
            }
        }

        let bytes = source.as_slice();
        let mut dict_cur = Cursor::new(&bytes[dict_start..]);
        let dict_blob_start = dict_start + dict_count as usize * 20;
        let dict_blob_end = payload_region_start;

        let dictionary = match &source {
            PayloadSource::Owned(_) => {
                Dictionary::read(&mut dict_cur, dict_count, bytes[dict_blob_start..dict_blob_end].to_vec())?
            }
            PayloadSource::Mapped(mmap) => {
                Dictionary::read_mapped(&mut dict_cur, dict_count, Arc::clone(mmap), dict_blob_start..dict_blob_end)?
            }
        };

        let (signature, signed_region_len) = try_read_signature_trailer(bytes)?;

        Ok(Container { entries, by_name, dictionary, source, signature, signed_region_len })
    }

    pub fn entry(&self, name: &str) -> Option<&DirectoryEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn entries(&self) -> &[DirectoryEntry] {
        &self.entries
    }

    pub fn num_entries(&self) -> usize {
        self.entries.len()
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    /// Raw stored bytes for `entry` (still compressed/ciphered if those
    /// flags are set) — callers decompress/decrypt themselves.
    pub fn payload(&self, entry: &DirectoryEntry) -> &[u8] {
        let start = entry.offset as usize;
        &self.source.as_slice()[start..start + entry.stored_size as usize]
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self.source, PayloadSource::Mapped(_))
    }

    pub fn signature_trailer(&self) -> Option<&SignatureTrailer> {
        self.signature.as_ref()
    }

    /// Verify the trailer's signature over every byte preceding it.
    pub fn verify_signature(&self) -> Result<(), ContainerError> {
        let trailer = self.signature.as_ref().ok_or(ContainerError::NotSigned)?;
        let signed_bytes = &self.source.as_slice()[..self.signed_region_len];
        identity::verify_signature(&trailer.x509_der, signed_bytes, &trailer.signature)
            .map_err(|_| ContainerError::InvalidSignature)
    }

    pub fn sha1(&self) -> [u8; 20] {
        identity::sha1_digest(&self.source.as_slice()[..self.signed_region_len])
    }
}

struct ParsedHeader {
    entries: Vec<DirectoryEntry>,
    dict_count: u32,
    dict_start: usize,
    payload_region_start: usize,
}

fn parse_header_and_directory(bytes: &[u8]) -> Result<ParsedHeader, ContainerError> {
    let mut cur = Cursor::new(bytes);
    let magic = read_u32(&mut cur)?;
    if magic != MAGIC {
        return Err(ContainerError::InvalidMagic);
    }
    let entry_count = read_u32(&mut cur)?;
    let dict_count = read_u32(&mut cur)?;

    let mut entries = Vec::with_capacity(entry_count as usize);
    for _ in 0..entry_count {
        let offset = read_u32(&mut cur)?;
        let stored_size = read_u32(&mut cur)?;
        let decompressed_size = read_u32(&mut cur)?;
        let name_size = read_u32(&mut cur)?;
        let flags = read_u32(&mut cur)?;
        let _ = name_size;
        let name = read_cstring_exact(&mut cur, name_size as usize)?;
        entries.push(DirectoryEntry { name, offset, stored_size, decompressed_size, flags });
    }

    let dict_start = cur.position() as usize;
    let payload_region_start = dict_start + dict_count as usize * 20 + dict_blob_len(bytes, dict_start, dict_count)?;

    Ok(ParsedHeader { entries, dict_count, dict_start, payload_region_start })
}

/// `name` is stored as exactly `name_size` raw bytes (NUL allowed, no
/// terminator required) rather than as a C string — read it directly
/// instead of going through `read_cstring`.
fn read_cstring_exact<R: Read>(r: &mut R, name_size: usize) -> Result<String, ContainerError> {
    if name_size > MAX_NAME_LEN {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "entry name too long").into());
    }
    let mut buf = vec![0u8; name_size];
    r.read_exact(&mut buf)?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Sum the `size` field of every dictionary record to find where
/// DICT_BLOB ends and PAYLOADS begins, without materializing the
/// dictionary itself.
fn dict_blob_len(bytes: &[u8], dict_start: usize, dict_count: u32) -> Result<usize, ContainerError> {
    let mut total = 0usize;
    for i in 0..dict_count as usize {
        let rec_start = dict_start + i * 20;
        let size_field = rec_start + 8; // hash(4) offset(4) size(4)
        let size_bytes = bytes
            .get(size_field..size_field + 4)
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "truncated dictionary record"))?;
        total += u32::from_be_bytes(size_bytes.try_into().unwrap()) as usize;
    }
    Ok(total)
}

fn validate_entry_bounds(
    entry: &DirectoryEntry,
    file_len: usize,
    payload_region_start: usize,
) -> Result<(), ContainerError> {
    let end = entry.offset as usize + entry.stored_size as usize;
    if end > file_len {
        return Err(ContainerError::EntryOutOfBounds(
            entry.name.clone(),
            entry.offset,
            entry.stored_size,
            file_len,
        ));
    }
    if (entry.offset as usize) < payload_region_start {
        return Err(ContainerError::DirectoryOverlap(entry.name.clone()));
    }
    Ok(())
}

fn try_read_signature_trailer(bytes: &[u8]) -> Result<(Option<SignatureTrailer>, usize), ContainerError> {
    if bytes.len() < 12 {
        return Ok((None, bytes.len()));
    }
    let tail = &bytes[bytes.len() - 4..];
    let magic = u32::from_be_bytes(tail.try_into().unwrap());
    if magic != SIGN_MAGIC {
        return Ok((None, bytes.len()));
    }
    let der_len_bytes = &bytes[bytes.len() - 8..bytes.len() - 4];
    let der_len = u32::from_be_bytes(der_len_bytes.try_into().unwrap()) as usize;
    let sig_len_bytes = &bytes[bytes.len() - 12..bytes.len() - 8];
    let sig_len = u32::from_be_bytes(sig_len_bytes.try_into().unwrap()) as usize;

    let trailer_total = 12 + sig_len + der_len;
    if trailer_total > bytes.len() {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "signature trailer length overflow").into());
    }
    let signed_region_len = bytes.len() - trailer_total;
    let sig_start = signed_region_len;
    let der_start = sig_start + sig_len;
    let signature = bytes[sig_start..sig_start + sig_len].to_vec();
    let x509_der = bytes[der_start..der_start + der_len].to_vec();
    Ok((Some(SignatureTrailer { signature, x509_der }), signed_region_len))
}

/// Staged entry, not yet assigned a final file offset.
pub struct StagedEntry {
    pub name: String,
    pub payload: Vec<u8>,
    pub decompressed_size: u32,
    pub flags: u32,
}

/// Accumulates entries and a dictionary in memory, then serializes the
/// whole container in one pass: writes are staged and flushed
/// atomically rather than incrementally patched in place.
pub struct ContainerBuilder {
    entries: Vec<StagedEntry>,
    dictionary: Dictionary,
}

impl ContainerBuilder {
    pub fn new() -> ContainerBuilder {
        ContainerBuilder { entries: Vec::new(), dictionary: Dictionary::new() }
    }

    pub fn dictionary(&self) -> &Dictionary {
        &self.dictionary
    }

    pub fn dictionary_mut(&mut self) -> &mut Dictionary {
        &mut self.dictionary
    }

    pub fn add_entry(&mut self, entry: StagedEntry) {
        self.entries.retain(|e| e.name != entry.name);
        self.entries.push(entry);
    }

    /// Remove a staged entry by name. Returns `false` if it was not
    /// present.
    pub fn remove_entry(&mut self, name: &str) -> bool {
        let before = self.entries.len();
        self.entries.retain(|e| e.name != name);
        self.entries.len() != before
    }

    /// Stage `name` as an alias of `target`'s current payload — a
    /// duplicate write under a different name. The alias flag is set so
    /// readers know the entry was deduplicated; `finish` gives aliased
    /// entries the same file offset as the payload they duplicate.
    pub fn add_alias(&mut self, name: &str, target: &str) -> bool {
        let Some(target_entry) = self.entries.iter().find(|e| e.name == target) else {
            return false;
        };
        let payload = target_entry.payload.clone();
        let decompressed_size = target_entry.decompressed_size;
        let flags = target_entry.flags | crate::container::FLAG_ALIAS;
        self.add_entry(StagedEntry { name: name.to_owned(), payload, decompressed_size, flags });
        true
    }

    pub fn staged_count(&self) -> usize {
        self.entries.len()
    }

    pub fn entry_names(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.name.clone()).collect()
    }

    /// Serialize into a byte buffer, optionally signing with `identity`.
    pub fn finish(&self, identity: Option<&Identity>) -> Result<Vec<u8>, ContainerError> {
        // Header + directory size is fixed once names are known, so
        // offsets can be computed in one forward pass.
        let header_len = 12;
        let directory_len: usize = self
            .entries
            .iter()
            .map(|e| 20 + e.name.as_bytes().len())
            .sum();
        let dict_records_len = self.dictionary.len() * 20;
        let dict_blob_len = self.dictionary.blob_len();
        let payload_region_start = header_len + directory_len + dict_records_len + dict_blob_len;

        // Entries with byte-identical payloads share one offset/size —
        // this is how alias entries (and accidental duplicate writes)
        // get deduplicated on disk.
        let mut offset = payload_region_start as u32;
        let mut final_offsets = Vec::with_capacity(self.entries.len());
        let mut seen: HashMap<&[u8], u32> = HashMap::new();
        let mut unique_payloads: Vec<&[u8]> = Vec::new();
        for e in &self.entries {
            if let Some(&existing) = seen.get(e.payload.as_slice()) {
                final_offsets.push(existing);
                continue;
            }
            final_offsets.push(offset);
            seen.insert(e.payload.as_slice(), offset);
            unique_payloads.push(&e.payload);
            offset = offset
                .checked_add(e.payload.len() as u32)
                .ok_or(ContainerError::FileTooBig)?;
        }

        let mut out = Vec::with_capacity(offset as usize);
        write_u32(&mut out, MAGIC)?;
        write_u32(&mut out, self.entries.len() as u32)?;
        write_u32(&mut out, self.dictionary.len() as u32)?;

        for (e, &final_offset) in self.entries.iter().zip(&final_offsets) {
            write_u32(&mut out, final_offset)?;
            write_u32(&mut out, e.payload.len() as u32)?;
            write_u32(&mut out, e.decompressed_size)?;
            write_u32(&mut out, e.name.as_bytes().len() as u32)?;
            write_u32(&mut out, e.flags)?;
            out.write_all(e.name.as_bytes())?;
        }

        self.dictionary.write(&mut out)?;

        for payload in &unique_payloads {
            out.write_all(payload)?;
        }

        if let Some(identity) = identity {
            let signature = identity.sign(&out)?;
            let der = identity.certificate_der();
            out.write_all(&signature)?;
            out.write_all(der)?;
            write_u32(&mut out, signature.len() as u32)?;
            write_u32(&mut out, der.len() as u32)?;
            write_u32(&mut out, SIGN_MAGIC)?;
        }

        Ok(out)
    }
}

impl Default for ContainerBuilder {
    fn default() -> Self {
        ContainerBuilder::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_simple() -> Vec<u8> {
        let mut builder = ContainerBuilder::new();
        let idx = builder.dictionary_mut().intern("shared-name");
        let _ = idx;
        builder.add_entry(StagedEntry {
            name: "greeting".into(),
            payload: b"hello, strongbox".to_vec(),
            decompressed_size: 16,
            flags: 0,
        });
        builder.add_entry(StagedEntry {
            name: "second".into(),
            payload: b"another entry".to_vec(),
            decompressed_size: 13,
            flags: 0,
        });
        builder.finish(None).unwrap()
    }

    #[test]
    fn roundtrip_open_owned() {
        let bytes = build_simple();
        let container = Container::open_owned(bytes).unwrap();
        assert_eq!(container.num_entries(), 2);
        let e = container.entry("greeting").unwrap();
        assert_eq!(container.payload(e), b"hello, strongbox");
        assert!(container.signature_trailer().is_none());
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = build_simple();
        bytes[0] = 0;
        assert!(matches!(Container::open_owned(bytes), Err(ContainerError::InvalidMagic)));
    }

    #[test]
    fn detects_truncated_entry() {
        let mut bytes = build_simple();
        bytes.truncate(bytes.len() - 5);
        assert!(Container::open_owned(bytes).is_err());
    }

    #[test]
    fn dictionary_survives_roundtrip() {
        let bytes = build_simple();
        let container = Container::open_owned(bytes).unwrap();
        assert_eq!(container.dictionary().len(), 1);
        assert_eq!(container.dictionary().string_at(0).unwrap(), "shared-name");
    }

    #[test]
    fn alias_shares_offset_with_its_target() {
        let mut builder = ContainerBuilder::new();
        builder.add_entry(StagedEntry {
            name: "original".into(),
            payload: b"same bytes".to_vec(),
            decompressed_size: 10,
            flags: 0,
        });
        assert!(builder.add_alias("copy", "original"));
        let bytes = builder.finish(None).unwrap();

        let container = Container::open_owned(bytes).unwrap();
        let original = container.entry("original").unwrap();
        let copy = container.entry("copy").unwrap();
        assert_eq!(original.offset, copy.offset);
        assert_eq!(original.stored_size, copy.stored_size);
        assert!(copy.is_alias());
        assert!(!original.is_alias());
        assert_eq!(container.payload(copy), b"same bytes");
    }
}
