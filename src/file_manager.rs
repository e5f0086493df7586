//! File manager — open/close/read/write/delete/list/sync, the
//! process-wide read-handle cache, and per-handle locking.
//!
//! Concurrency model: one reader-writer lock per live handle; reads
//! take it shared, writes/deletes/flush take it exclusive.
//! A separate lock guards the cache table itself — a handle lock and the
//! cache lock are never held at the same time by this module.
//!
//! The public surface follows an `Archive`-wrapping-a-reader/writer-pair
//! shape, generalized here with an explicit process-wide cache so that
//! repeated opens of the same file share one handle instead of each
//! call mapping the file fresh.

use crate::container::{Container, ContainerBuilder, ContainerError, StagedEntry};
use crate::crypto::identity::Identity;
use crate::crypto::{self, CryptoError};
use crate::error::EetError;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write as _;
use std::ops::Deref;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, OnceLock, RwLock, RwLockReadGuard};
use std::time::SystemTime;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum FileManagerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("container error: {0}")]
    Container(#[from] ContainerError),
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),
    #[error("entry {0:?} not found")]
    NotFound(String),
    #[error("handle is not writable")]
    NotWritable,
    #[error("handle is not readable")]
    NotReadable,
    #[error("handle is already closed")]
    Closed,
    #[error("entry is compressed or ciphered — read_direct is unavailable")]
    NotDirect,
    #[error("entry is encrypted but no passphrase was supplied")]
    MissingPassphrase,
}

impl From<FileManagerError> for EetError {
    fn from(e: FileManagerError) -> Self {
        match e {
            FileManagerError::Io(io) => EetError::from(io),
            FileManagerError::NotWritable => EetError::NotWritable,
            FileManagerError::NotFound(_) | FileManagerError::Closed | FileManagerError::NotReadable => {
                EetError::BadObject
            }
            FileManagerError::Container(_) => EetError::BadObject,
            FileManagerError::Crypto(c) => EetError::DecryptFailed(c.to_string()),
            FileManagerError::NotDirect => EetError::BadObject,
            FileManagerError::MissingPassphrase => EetError::DecryptFailed("no passphrase supplied".into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Read,
    Write,
    ReadWrite,
}

/// Library-level configuration for [`open`] — the ambient "configuration"
/// surface: no config file, just a plain struct plus CLI flags in
/// `main.rs`.
#[derive(Debug, Clone, Default)]
pub struct OpenOptions {
    pub mode: ModeOption,
    pub passphrase: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModeOption {
    #[default]
    Read,
    Write,
    ReadWrite,
}

impl From<ModeOption> for Mode {
    fn from(m: ModeOption) -> Mode {
        match m {
            ModeOption::Read => Mode::Read,
            ModeOption::Write => Mode::Write,
            ModeOption::ReadWrite => Mode::ReadWrite,
        }
    }
}

struct WriteState {
    builder: ContainerBuilder,
    identity: Option<Identity>,
}

enum HandleState {
    Read(Container),
    Write(WriteState),
    Closed,
}

struct HandleShared {
    mode: Mode,
    path: Option<PathBuf>,
    /// Default passphrase supplied at `open()` time, used by `read`/`write`
    /// when no explicit passphrase is passed to `read_encrypted`/
    /// `write_encrypted`. An explicit argument always wins.
    passphrase: Option<String>,
    state: RwLock<HandleState>,
}

/// A live, possibly-shared file handle. Cloning is cheap — it bumps the
/// reference count of the underlying cached handle rather than copying
/// container state.
#[derive(Clone)]
pub struct Handle(Arc<HandleShared>);

impl Handle {
    pub fn mode(&self) -> Mode {
        self.0.mode
    }

    pub fn path(&self) -> Option<&Path> {
        self.0.path.as_deref()
    }

    pub fn num_entries(&self) -> Result<usize, FileManagerError> {
        let guard = self.0.state.read().unwrap();
        match &*guard {
            HandleState::Read(c) => Ok(c.num_entries()),
            HandleState::Write(w) => Ok(w.builder.staged_count()),
            HandleState::Closed => Err(FileManagerError::Closed),
        }
    }

    pub fn dictionary_len(&self) -> Result<usize, FileManagerError> {
        let guard = self.0.state.read().unwrap();
        match &*guard {
            HandleState::Read(c) => Ok(c.dictionary().len()),
            HandleState::Write(w) => Ok(w.builder.dictionary().len()),
            HandleState::Closed => Err(FileManagerError::Closed),
        }
    }

    /// Read `name`. If the entry is encrypted, the passphrase supplied to
    /// `open()` (if any) is used; for a ciphered entry with no passphrase
    /// on either the handle or this call, see [`Handle::read_encrypted`].
    pub fn read(&self, name: &str) -> Result<Vec<u8>, FileManagerError> {
        self.read_impl(name, self.0.passphrase.as_deref())
    }

    /// Decrypt-and-read for an entry written with a passphrase, overriding
    /// whatever passphrase (if any) was supplied to `open()`.
    pub fn read_encrypted(&self, name: &str, passphrase: &str) -> Result<Vec<u8>, FileManagerError> {
        self.read_impl(name, Some(passphrase))
    }

    fn read_impl(&self, name: &str, passphrase: Option<&str>) -> Result<Vec<u8>, FileManagerError> {
        let guard = self.0.state.read().unwrap();
        let container = match &*guard {
            HandleState::Read(c) => c,
            HandleState::Write(_) => return Err(FileManagerError::NotReadable),
            HandleState::Closed => return Err(FileManagerError::Closed),
        };
        let entry = container.entry(name).ok_or_else(|| FileManagerError::NotFound(name.to_owned()))?;
        let raw = container.payload(entry);

        let mut bytes = if entry.is_ciphered() {
            let pw = passphrase.ok_or(FileManagerError::MissingPassphrase)?;
            let salt = entry.name.as_bytes(); // see DESIGN.md: per-entry salt derivation
            let key = crypto::derive_key(pw, salt)?;
            crypto::decrypt(&key, raw)?
        } else {
            raw.to_vec()
        };

        if entry.is_compressed() {
            bytes = crate::codec::decompress(&bytes, entry.decompressed_size as usize)
                .map_err(|e| FileManagerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
        }
        Ok(bytes)
    }

    /// Zero-copy borrow into the mmapped container. Succeeds only when
    /// the entry is uncompressed, unciphered, and the container is
    /// memory-mapped. The returned [`Direct`] keeps the handle's read
    /// lock alive for as long as the borrow lives.
    pub fn read_direct(&self, name: &str) -> Result<Direct<'_>, FileManagerError> {
        let guard = self.0.state.read().unwrap();
        {
            let container = match &*guard {
                HandleState::Read(c) => c,
                HandleState::Write(_) => return Err(FileManagerError::NotReadable),
                HandleState::Closed => return Err(FileManagerError::Closed),
            };
            if !container.is_mapped() {
                return Err(FileManagerError::NotDirect);
            }
            let entry = container.entry(name).ok_or_else(|| FileManagerError::NotFound(name.to_owned()))?;
            if entry.is_compressed() || entry.is_ciphered() {
                return Err(FileManagerError::NotDirect);
            }
        }
        Ok(Direct { guard, name: name.to_owned() })
    }

    /// Write `name`. If a passphrase was supplied to `open()`, the entry is
    /// encrypted with it; otherwise it is stored in the clear. Use
    /// [`Handle::write_encrypted`] to supply (or override) the passphrase
    /// per call.
    pub fn write(&self, name: &str, data: &[u8], compress: bool) -> Result<usize, FileManagerError> {
        self.write_impl(name, data, compress, None)
    }

    pub fn write_encrypted(
        &self,
        name: &str,
        data: &[u8],
        compress: bool,
        passphrase: &str,
    ) -> Result<usize, FileManagerError> {
        self.write_impl(name, data, compress, Some(passphrase))
    }

    fn write_impl(
        &self,
        name: &str,
        data: &[u8],
        compress: bool,
        passphrase: Option<&str>,
    ) -> Result<usize, FileManagerError> {
        let passphrase = passphrase.or(self.0.passphrase.as_deref());
        let mut guard = self.0.state.write().unwrap();
        let state = match &mut *guard {
            HandleState::Write(w) => w,
            HandleState::Read(_) => return Err(FileManagerError::NotWritable),
            HandleState::Closed => return Err(FileManagerError::Closed),
        };

        let mut payload = data.to_vec();
        let decompressed_size = payload.len() as u32;
        let mut flags = 0u32;

        if compress {
            payload = crate::codec::compress(&payload, 6)
                .map_err(|e| FileManagerError::Io(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
            flags |= crate::container::FLAG_COMPRESS;
        }
        if let Some(pw) = passphrase {
            let key = crypto::derive_key(pw, name.as_bytes())?;
            payload = crypto::encrypt(&key, &payload)?;
            flags |= crate::container::FLAG_CIPHER;
        }

        let written = payload.len();
        state.builder.add_entry(StagedEntry {
            name: name.to_owned(),
            payload,
            decompressed_size,
            flags,
        });
        debug!(entry = name, bytes = written, "staged entry for write");
        Ok(written)
    }

    /// Stage `name` as an alias of `target`'s current payload.
    pub fn alias(&self, name: &str, target: &str) -> Result<(), FileManagerError> {
        let mut guard = self.0.state.write().unwrap();
        match &mut *guard {
            HandleState::Write(w) => {
                if w.builder.add_alias(name, target) {
                    Ok(())
                } else {
                    Err(FileManagerError::NotFound(target.to_owned()))
                }
            }
            HandleState::Read(_) => Err(FileManagerError::NotWritable),
            HandleState::Closed => Err(FileManagerError::Closed),
        }
    }

    pub fn delete(&self, name: &str) -> Result<(), FileManagerError> {
        let mut guard = self.0.state.write().unwrap();
        match &mut *guard {
            HandleState::Write(w) => {
                if !w.builder.remove_entry(name) {
                    return Err(FileManagerError::NotFound(name.to_owned()));
                }
                Ok(())
            }
            HandleState::Read(_) => Err(FileManagerError::NotWritable),
            HandleState::Closed => Err(FileManagerError::Closed),
        }
    }

    pub fn list(&self, pattern: &str) -> Result<Vec<String>, FileManagerError> {
        let guard = self.0.state.read().unwrap();
        let names: Vec<String> = match &*guard {
            HandleState::Read(c) => c.entries().iter().map(|e| e.name.clone()).collect(),
            HandleState::Write(w) => w.builder.entry_names(),
            HandleState::Closed => return Err(FileManagerError::Closed),
        };
        let matcher = glob::Pattern::new(pattern)
            .map_err(|e| FileManagerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())))?;
        Ok(names.into_iter().filter(|n| matcher.matches(n)).collect())
    }

    pub fn set_identity(&self, identity: Identity) -> Result<(), FileManagerError> {
        let mut guard = self.0.state.write().unwrap();
        match &mut *guard {
            HandleState::Write(w) => {
                w.identity = Some(identity);
                Ok(())
            }
            _ => Err(FileManagerError::NotWritable),
        }
    }

    /// Flush a write-mode handle to disk without closing it.
    pub fn sync(&self) -> Result<(), FileManagerError> {
        let path = self.0.path.clone();
        let guard = self.0.state.write().unwrap();
        let state = match &*guard {
            HandleState::Write(w) => w,
            HandleState::Read(_) => return Ok(()), // nothing to flush
            HandleState::Closed => return Err(FileManagerError::Closed),
        };
        let bytes = state.builder.finish(state.identity.as_ref())?;
        if let Some(path) = path {
            atomic_write(&path, &bytes)?;
        }
        debug!("flushed container");
        Ok(())
    }
}

/// A zero-copy borrow produced by [`Handle::read_direct`]. Holds the
/// handle's read lock for its entire lifetime, enforcing the "may not
/// outlive the handle" rule structurally rather than by convention.
pub struct Direct<'h> {
    guard: RwLockReadGuard<'h, HandleState>,
    name: String,
}

impl<'h> Deref for Direct<'h> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        match &*self.guard {
            HandleState::Read(c) => {
                let entry = c.entry(&self.name).expect("validated at construction");
                c.payload(entry)
            }
            _ => unreachable!("validated at construction"),
        }
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), FileManagerError> {
    let tmp_path = path.with_extension("tmp");
    let result = (|| -> std::io::Result<()> {
        let mut f = File::create(&tmp_path)?;
        f.write_all(bytes)?;
        f.sync_all()?;
        std::fs::rename(&tmp_path, path)?;
        Ok(())
    })();
    if result.is_err() {
        let _ = std::fs::remove_file(&tmp_path);
    }
    Ok(result?)
}

// ── Process-wide read handle cache ──────────────────────────────────────────

#[derive(PartialEq, Eq, Hash, Clone)]
struct CacheKey {
    canonical_path: PathBuf,
    inode: u64,
    size: u64,
    mtime: Option<SystemTime>,
}

struct Cache {
    entries: HashMap<CacheKey, Handle>,
}

fn cache() -> &'static Mutex<Cache> {
    static CACHE: OnceLock<Mutex<Cache>> = OnceLock::new();
    CACHE.get_or_init(|| Mutex::new(Cache { entries: HashMap::new() }))
}

fn cache_key_for(path: &Path) -> std::io::Result<CacheKey> {
    let canonical_path = path.canonicalize()?;
    let meta = std::fs::metadata(&canonical_path)?;
    Ok(CacheKey {
        canonical_path,
        inode: meta.ino(),
        size: meta.size(),
        mtime: meta.modified().ok(),
    })
}

/// Open `path` in the given mode. A read-mode open with a cache hit on
/// an unchanged file returns the cached handle (bumping its Arc
/// refcount) instead of re-parsing the container.
pub fn open(path: impl AsRef<Path>, opts: OpenOptions) -> Result<Handle, FileManagerError> {
    let path = path.as_ref();
    let mode: Mode = opts.mode.into();

    if mode == Mode::Write {
        debug!(path = %path.display(), "opening container for write");
        return Ok(Handle(Arc::new(HandleShared {
            mode,
            path: Some(path.to_owned()),
            passphrase: opts.passphrase,
            state: RwLock::new(HandleState::Write(WriteState {
                builder: ContainerBuilder::new(),
                identity: None,
            })),
        })));
    }

    let key = cache_key_for(path)?;
    {
        let mut guard = cache().lock().unwrap();
        if let Some(handle) = guard.entries.get(&key) {
            debug!(path = %path.display(), "handle cache hit");
            return Ok(handle.clone());
        }
        let file = File::open(path)?;
        let mmap = unsafe { memmap2::Mmap::map(&file)? };
        let container = Container::open_mapped(Arc::new(mmap))?;
        let handle = Handle(Arc::new(HandleShared {
            mode,
            path: Some(path.to_owned()),
            passphrase: opts.passphrase,
            state: RwLock::new(HandleState::Read(container)),
        }));
        guard.entries.insert(key, handle.clone());
        debug!(path = %path.display(), "handle cache miss, opened and cached");
        Ok(handle)
    }
}

/// Open an in-memory buffer for reading (no caching, no path).
pub fn memopen_read(bytes: Vec<u8>) -> Result<Handle, FileManagerError> {
    let container = Container::open_owned(bytes)?;
    Ok(Handle(Arc::new(HandleShared {
        mode: Mode::Read,
        path: None,
        passphrase: None,
        state: RwLock::new(HandleState::Read(container)),
    })))
}

/// Close a handle. For a write-mode handle this flushes to disk first.
///
/// A read-mode handle may be one of several live clones sharing the same
/// cached `Arc` (see [`open`]'s cache-hit path) — tearing down shared state
/// out from under a sibling clone would break the documented refcounted
/// cache semantics, so this only actually closes the underlying state when
/// `handle` is the sole reference. Otherwise it just drops this caller's
/// reference; `clearcache` is what evicts a handle once its last reference
/// (including the cache table's own) is gone.
pub fn close(handle: Handle) -> Result<(), FileManagerError> {
    if handle.0.mode != Mode::Read {
        handle.sync()?;
    }
    if Arc::strong_count(&handle.0) > 1 {
        return Ok(());
    }
    let mut guard = handle.0.state.write().unwrap();
    *guard = HandleState::Closed;
    Ok(())
}

/// Drop every cached read handle with no other live reference.
pub fn clearcache() {
    let mut guard = cache().lock().unwrap();
    let before = guard.entries.len();
    guard.entries.retain(|_, h| Arc::strong_count(&h.0) > 1);
    let dropped = before - guard.entries.len();
    if dropped > 0 {
        warn!(dropped, "cleared unreferenced handles from cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_back_in_memory() {
        let handle = open(std::env::temp_dir().join("strongbox-fm-test.sbx"), OpenOptions {
            mode: ModeOption::Write,
            passphrase: None,
        })
        .unwrap();
        handle.write("hello", b"world", false).unwrap();
        assert_eq!(handle.num_entries().unwrap(), 1);
    }

    #[test]
    fn delete_missing_entry_errors() {
        let handle = open(std::env::temp_dir().join("strongbox-fm-test2.sbx"), OpenOptions {
            mode: ModeOption::Write,
            passphrase: None,
        })
        .unwrap();
        assert!(handle.delete("nope").is_err());
    }

    #[test]
    fn open_time_passphrase_is_used_by_plain_read_and_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sealed.sbx");

        let handle = open(&path, OpenOptions { mode: ModeOption::Write, passphrase: Some("hunter2".into()) }).unwrap();
        handle.write("secret.bin", b"payload", false).unwrap();
        close(handle).unwrap();

        let handle = open(&path, OpenOptions { mode: ModeOption::Read, passphrase: Some("hunter2".into()) }).unwrap();
        assert_eq!(handle.read("secret.bin").unwrap(), b"payload");
        drop(handle);
        clearcache();

        // A fresh (uncached) open with no passphrase must not inherit the
        // previous handle's stored one.
        let handle = open(&path, OpenOptions { mode: ModeOption::Read, passphrase: None }).unwrap();
        assert!(handle.read("secret.bin").is_err());
    }

    #[test]
    fn closing_one_cached_clone_does_not_invalidate_another() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("shared.sbx");

        let handle = open(&path, OpenOptions { mode: ModeOption::Write, passphrase: None }).unwrap();
        handle.write("k", b"v", false).unwrap();
        close(handle).unwrap();

        let first = open(&path, OpenOptions { mode: ModeOption::Read, passphrase: None }).unwrap();
        let second = open(&path, OpenOptions { mode: ModeOption::Read, passphrase: None }).unwrap();
        close(first).unwrap();
        // `second` (and the cache table) still hold the shared state alive.
        assert_eq!(second.num_entries().unwrap(), 1);

        clearcache();
    }
}
