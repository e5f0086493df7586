//! String dictionary — a deduplicated, hashed string table that is
//! persisted alongside the container directory and can be addressed
//! directly into an mmapped blob.
//!
//! On-disk shape (big-endian, matching `container.rs`):
//! `dict_count × {hash:u32, offset:u32, size:u32, prev:u32, next:u32}`
//! followed by a NUL-separated blob. `prev`/`next` chain same-bucket
//! records so collisions are O(chain length) to resolve; there is no
//! bucket array on disk — buckets are recomputed from `hash` on load.

use crate::byteio::{read_u32, write_u32};
use std::io::{self, Read, Write};
use std::sync::Arc;
use thiserror::Error;

/// Sentinel used in place of an absent `prev`/`next` chain link.
const NONE: u32 = u32::MAX;

#[derive(Error, Debug)]
pub enum DictionaryError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("dictionary record {0} points outside the blob")]
    OutOfBounds(usize),
    #[error("dictionary blob contains invalid UTF-8 at record {0}")]
    InvalidUtf8(usize),
}

#[derive(Clone, Copy, Debug)]
struct DictRecord {
    hash: u32,
    offset: u32,
    size: u32,
    prev: u32,
    next: u32,
}

/// Where the blob bytes actually live: a heap copy for a freshly built
/// (write-mode) dictionary, or a borrow into a memory-mapped container
/// for a read-mode one. `string_at` hands out references tied to this
/// source's lifetime.
enum Blob {
    Owned(Vec<u8>),
    Mapped(Arc<memmap2::Mmap>, std::ops::Range<usize>),
}

impl Blob {
    fn as_slice(&self) -> &[u8] {
        match self {
            Blob::Owned(v) => v.as_slice(),
            Blob::Mapped(mmap, range) => &mmap[range.clone()],
        }
    }
}

/// djb2-style mixing hash. Deterministic across platforms — no
/// dependence on `std`'s randomized `HashMap` hasher, since the wire
/// format requires identical dictionary hashes for the same string no
/// matter which process wrote the container.
fn hash_str(s: &str) -> u32 {
    let mut h: u32 = 5381;
    for b in s.as_bytes() {
        h = h.wrapping_mul(33).wrapping_add(*b as u32);
    }
    h
}

pub struct Dictionary {
    buckets: Vec<u32>,
    records: Vec<DictRecord>,
    blob: Blob,
}

impl Dictionary {
    pub fn new() -> Dictionary {
        Dictionary { buckets: vec![NONE; 16], records: Vec::new(), blob: Blob::Owned(Vec::new()) }
    }

    fn bucket_index(&self, hash: u32) -> usize {
        (hash as usize) & (self.buckets.len() - 1)
    }

    fn grow_if_needed(&mut self) {
        if self.records.len() <= self.buckets.len() * 2 {
            return;
        }
        let new_len = self.buckets.len() * 2;
        let mut new_buckets = vec![NONE; new_len];
        for (idx, rec) in self.records.iter_mut().enumerate() {
            let b = (rec.hash as usize) & (new_len - 1);
            rec.prev = NONE;
            rec.next = new_buckets[b];
            if new_buckets[b] != NONE {
                self.records[new_buckets[b] as usize].prev = idx as u32;
            }
            new_buckets[b] = idx as u32;
        }
        self.buckets = new_buckets;
    }

    /// Look up `s`, returning its dictionary index if present.
    pub fn lookup(&self, s: &str) -> Option<u32> {
        let hash = hash_str(s);
        let bucket = self.bucket_index(hash);
        let mut cur = self.buckets[bucket];
        while cur != NONE {
            let rec = &self.records[cur as usize];
            if rec.hash == hash && self.record_str(rec).ok() == Some(s) {
                return Some(cur);
            }
            cur = rec.next;
        }
        None
    }

    /// Returns `true` if `s` is already interned.
    pub fn contains(&self, s: &str) -> bool {
        self.lookup(s).is_some()
    }

    /// Intern `s`, returning its (possibly pre-existing) index.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(idx) = self.lookup(s) {
            return idx;
        }
        let blob = match &mut self.blob {
            Blob::Owned(v) => v,
            Blob::Mapped(..) => {
                // A write-mode dictionary is always Owned; interning
                // against a mapped (read-only) dictionary is a caller
                // error that degrades to a fresh owned blob rather
                // than panicking.
                self.blob = Blob::Owned(Vec::new());
                match &mut self.blob {
                    Blob::Owned(v) => v,
                    Blob::Mapped(..) => unreachable!(),
                }
            }
        };
        let offset = blob.len() as u32;
        blob.extend_from_slice(s.as_bytes());
        blob.push(0);
        let size = s.len() as u32;

        let hash = hash_str(s);
        let idx = self.records.len() as u32;
        let bucket = self.bucket_index(hash);
        let head = self.buckets[bucket];
        if head != NONE {
            self.records[head as usize].prev = idx;
        }
        self.records.push(DictRecord { hash, offset, size, prev: NONE, next: head });
        self.buckets[bucket] = idx;

        self.grow_if_needed();
        idx
    }

    fn record_str(&self, rec: &DictRecord) -> Result<&str, DictionaryError> {
        let blob = self.blob.as_slice();
        let start = rec.offset as usize;
        let end = start + rec.size as usize;
        let bytes = blob
            .get(start..end)
            .ok_or(DictionaryError::OutOfBounds(start))?;
        std::str::from_utf8(bytes).map_err(|_| DictionaryError::InvalidUtf8(start))
    }

    /// Borrow the string at `index`. The lifetime is tied to `&self`,
    /// which in turn is tied to the owning handle for a mmapped
    /// dictionary — a direct, zero-copy borrow that may not outlive it.
    pub fn string_at(&self, index: u32) -> Result<&str, DictionaryError> {
        let rec = self
            .records
            .get(index as usize)
            .ok_or(DictionaryError::OutOfBounds(index as usize))?;
        self.record_str(rec)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Serialize as `count` records (without a leading count — the
    /// caller writes `dict_count` once in the container header) followed
    /// by the blob.
    pub fn write<W: Write>(&self, w: &mut W) -> io::Result<()> {
        for rec in &self.records {
            write_u32(w, rec.hash)?;
            write_u32(w, rec.offset)?;
            write_u32(w, rec.size)?;
            write_u32(w, rec.prev)?;
            write_u32(w, rec.next)?;
        }
        w.write_all(self.blob.as_slice())
    }

    pub fn blob_len(&self) -> usize {
        self.blob.as_slice().len()
    }

    /// Reconstruct a dictionary from `dict_count` records read from `r`
    /// and an owned copy of the blob (used for a non-mmapped load).
    pub fn read<R: Read>(r: &mut R, dict_count: u32, blob: Vec<u8>) -> Result<Dictionary, DictionaryError> {
        let records = Self::read_records(r, dict_count)?;
        Ok(Self::from_parts(records, Blob::Owned(blob)))
    }

    /// Reconstruct a dictionary whose blob is a borrowed slice of a
    /// memory-mapped container file, avoiding a heap copy.
    pub fn read_mapped<R: Read>(
        r: &mut R,
        dict_count: u32,
        mmap: Arc<memmap2::Mmap>,
        blob_range: std::ops::Range<usize>,
    ) -> Result<Dictionary, DictionaryError> {
        let records = Self::read_records(r, dict_count)?;
        Ok(Self::from_parts(records, Blob::Mapped(mmap, blob_range)))
    }

    fn read_records<R: Read>(r: &mut R, dict_count: u32) -> Result<Vec<DictRecord>, DictionaryError> {
        let mut records = Vec::with_capacity(dict_count as usize);
        for _ in 0..dict_count {
            let hash = read_u32(r)?;
            let offset = read_u32(r)?;
            let size = read_u32(r)?;
            let prev = read_u32(r)?;
            let next = read_u32(r)?;
            records.push(DictRecord { hash, offset, size, prev, next });
        }
        Ok(records)
    }

    fn from_parts(records: Vec<DictRecord>, blob: Blob) -> Dictionary {
        let bucket_count = (records.len().max(1) * 2).next_power_of_two().max(16);
        let mut buckets = vec![NONE; bucket_count];
        for (idx, rec) in records.iter().enumerate() {
            let b = (rec.hash as usize) & (bucket_count - 1);
            if buckets[b] == NONE {
                buckets[b] = idx as u32;
            }
        }
        Dictionary { buckets, records, blob }
    }
}

impl Default for Dictionary {
    fn default() -> Self {
        Dictionary::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn intern_dedups() {
        let mut dict = Dictionary::new();
        let a = dict.intern("hello");
        let b = dict.intern("world");
        let c = dict.intern("hello");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(dict.len(), 2);
    }

    #[test]
    fn string_at_roundtrip() {
        let mut dict = Dictionary::new();
        let idx = dict.intern("strongbox");
        assert_eq!(dict.string_at(idx).unwrap(), "strongbox");
    }

    #[test]
    fn hash_is_deterministic() {
        assert_eq!(hash_str("abc"), hash_str("abc"));
    }

    #[test]
    fn serialize_and_reload_roundtrip() {
        let mut dict = Dictionary::new();
        for s in ["one", "two", "three", "four", "five", "six", "seven"] {
            dict.intern(s);
        }
        let mut buf = Vec::new();
        dict.write(&mut buf).unwrap();

        let record_bytes = dict.len() * 20;
        let mut cur = std::io::Cursor::new(&buf[..record_bytes]);
        let blob = buf[record_bytes..].to_vec();
        let reloaded = Dictionary::read(&mut cur, dict.len() as u32, blob).unwrap();

        assert_eq!(reloaded.len(), dict.len());
        for s in ["one", "two", "three", "four", "five", "six", "seven"] {
            let idx = reloaded.lookup(s).expect("string should survive reload");
            assert_eq!(reloaded.string_at(idx).unwrap(), s);
        }
    }

    #[test]
    fn grows_past_initial_bucket_count() {
        let mut dict = Dictionary::new();
        for i in 0..200 {
            dict.intern(&format!("key-{i}"));
        }
        assert_eq!(dict.len(), 200);
        for i in 0..200 {
            let key = format!("key-{i}");
            let idx = dict.lookup(&key).unwrap();
            assert_eq!(dict.string_at(idx).unwrap(), key);
        }
    }
}
