//! Index-bypass recovery scanner — reconstruct what's readable from a
//! possibly-damaged container without trusting it to parse cleanly.
//!
//! Unlike a solid block-stream format with scattered self-describing
//! headers, this container keeps one flat directory up front, so there
//! is no secondary resync point to scan forward for. What a scanner
//! *can* still do: walk the directory tolerating a short read anywhere
//! (stop rather than abort), and independently assess each entry that
//! did parse — does its declared offset/size fall inside the actual
//! file, and (for compressed entries) does its payload actually inflate
//! to the declared length. Neither the header nor any surviving entry
//! is skipped just because another entry further down is corrupt.

use crate::byteio::read_u32;
use crate::codec;
use crate::container::{FLAG_COMPRESS, MAGIC};
use std::io::{self, Cursor, Read};
use std::path::Path;

const MAX_NAME_LEN: usize = 4096;

/// Health verdict for one scanned directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryHealth {
    /// Bounds check (and, for compressed entries, decompression) passed.
    Healthy,
    /// Declared offset/size would read past the end of the file.
    Truncated { declared_end: u64, file_len: u64 },
    /// Offset falls inside the header/directory/dictionary region.
    DirectoryOverlap,
    /// Entry is marked compressed but its stored bytes don't inflate to
    /// the declared decompressed size.
    DecodeFailed(String),
}

impl EntryHealth {
    pub fn is_usable(&self) -> bool {
        matches!(self, EntryHealth::Healthy)
    }
}

/// Diagnostic record for one directory entry the scanner was able to
/// parse (a short read in the directory itself stops the walk before a
/// `ScannedEntry` is ever produced for the entries past that point).
#[derive(Debug, Clone)]
pub struct ScannedEntry {
    pub name: String,
    pub offset: u32,
    pub stored_size: u32,
    pub decompressed_size: u32,
    pub flags: u32,
    pub health: EntryHealth,
}

impl ScannedEntry {
    pub fn is_usable(&self) -> bool {
        self.health.is_usable()
    }
}

/// Overall quality of a recovery scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryQuality {
    /// All entries healthy; nothing was lost.
    Full,
    /// Some entries unusable; a partial recovery is still possible.
    Partial,
    /// The directory parsed but no payload is recoverable.
    HeaderOnly,
    /// Magic didn't even match, or fewer than half of entries are
    /// usable.
    Catastrophic,
}

/// Complete report produced by [`scan_bytes`].
#[derive(Debug)]
pub struct RecoveryReport {
    pub total_entries: usize,
    pub healthy_entries: usize,
    pub truncated_entries: usize,
    pub corrupt_entries: usize,
    pub bytes_scanned: u64,
    pub entry_log: Vec<ScannedEntry>,
    pub recoverable_bytes: u64,
    pub quality: RecoveryQuality,
}

impl RecoveryReport {
    pub fn health_pct(&self) -> f64 {
        if self.total_entries == 0 {
            return 100.0;
        }
        self.healthy_entries as f64 / self.total_entries as f64 * 100.0
    }

    pub fn summary(&self) -> String {
        format!(
            "{:?} recovery: {}/{} entries healthy ({:.1}%), {:.2} KiB recoverable",
            self.quality,
            self.healthy_entries,
            self.total_entries,
            self.health_pct(),
            self.recoverable_bytes as f64 / 1024.0,
        )
    }
}

/// Scan `data` for recoverable entries without trusting the header's
/// `entry_count` to be accurate past the first structural failure.
/// Never panics or returns `Err` on corrupt input — a bad magic just
/// yields a `Catastrophic`, zero-entry report.
pub fn scan_bytes(data: &[u8]) -> RecoveryReport {
    let mut entry_log = Vec::new();
    let mut healthy_entries = 0usize;
    let mut truncated_entries = 0usize;
    let mut corrupt_entries = 0usize;
    let mut recoverable_bytes = 0u64;

    let mut cur = Cursor::new(data);
    let Ok(magic) = read_u32(&mut cur) else {
        return catastrophic_report(data.len() as u64);
    };
    if magic != MAGIC {
        return catastrophic_report(data.len() as u64);
    }
    let Ok(declared_count) = read_u32(&mut cur) else {
        return catastrophic_report(4);
    };
    let Ok(dict_count) = read_u32(&mut cur) else {
        return catastrophic_report(8);
    };

    for _ in 0..declared_count {
        let entry_start = cur.position();
        let parsed = (|| -> io::Result<(u32, u32, u32, u32, u32, String)> {
            let offset = read_u32(&mut cur)?;
            let stored_size = read_u32(&mut cur)?;
            let decompressed_size = read_u32(&mut cur)?;
            let name_size = read_u32(&mut cur)?;
            let flags = read_u32(&mut cur)?;
            if name_size as usize > MAX_NAME_LEN {
                return Err(io::Error::new(io::ErrorKind::InvalidData, "name too long"));
            }
            let mut name_buf = vec![0u8; name_size as usize];
            cur.read_exact(&mut name_buf)?;
            Ok((offset, stored_size, decompressed_size, flags, name_size, String::from_utf8_lossy(&name_buf).into_owned()))
        })();

        match parsed {
            Err(_) => {
                // Stop the walk — we can't know where the next directory
                // record would even start.
                cur.set_position(entry_start);
                break;
            }
            Ok((offset, stored_size, decompressed_size, flags, _name_size, name)) => {
                let declared_end = offset as u64 + stored_size as u64;
                let health = if declared_end > data.len() as u64 {
                    truncated_entries += 1;
                    EntryHealth::Truncated { declared_end, file_len: data.len() as u64 }
                } else if flags & FLAG_COMPRESS != 0 {
                    let payload = &data[offset as usize..offset as usize + stored_size as usize];
                    match codec::decompress(payload, decompressed_size as usize) {
                        Ok(_) => {
                            healthy_entries += 1;
                            recoverable_bytes += decompressed_size as u64;
                            EntryHealth::Healthy
                        }
                        Err(e) => {
                            corrupt_entries += 1;
                            EntryHealth::DecodeFailed(e.to_string())
                        }
                    }
                } else {
                    healthy_entries += 1;
                    recoverable_bytes += stored_size as u64;
                    EntryHealth::Healthy
                };
                entry_log.push(ScannedEntry { name, offset, stored_size, decompressed_size, flags, health });
            }
        }
    }

    let total_entries = entry_log.len();
    let bytes_scanned = cur.position().max(12 + dict_count as u64 * 20);

    // Directory-overlap check needs to know where the payload region
    // starts; approximate it with the scanned directory's own end plus
    // the dictionary records (the dictionary blob itself can't be
    // bounded without fully parsing it, so this is a conservative
    // under-estimate that only ever produces false negatives, never
    // false positives, for this check).
    let payload_region_floor = bytes_scanned;
    for entry in &mut entry_log {
        if entry.health == EntryHealth::Healthy && (entry.offset as u64) < payload_region_floor {
            entry.health = EntryHealth::DirectoryOverlap;
            healthy_entries -= 1;
            corrupt_entries += 1;
        }
    }

    let quality = if total_entries == 0 {
        RecoveryQuality::HeaderOnly
    } else {
        let pct = healthy_entries as f64 / total_entries as f64;
        if pct >= 0.999 {
            RecoveryQuality::Full
        } else if pct >= 0.5 {
            RecoveryQuality::Partial
        } else {
            RecoveryQuality::Catastrophic
        }
    };

    RecoveryReport {
        total_entries,
        healthy_entries,
        truncated_entries,
        corrupt_entries,
        bytes_scanned,
        entry_log,
        recoverable_bytes,
        quality,
    }
}

fn catastrophic_report(bytes_scanned: u64) -> RecoveryReport {
    RecoveryReport {
        total_entries: 0,
        healthy_entries: 0,
        truncated_entries: 0,
        corrupt_entries: 0,
        bytes_scanned,
        entry_log: Vec::new(),
        recoverable_bytes: 0,
        quality: RecoveryQuality::Catastrophic,
    }
}

/// Convenience: scan a file at `path` and return the report.
pub fn scan_file(path: &Path) -> io::Result<RecoveryReport> {
    let data = std::fs::read(path)?;
    Ok(scan_bytes(&data))
}

/// Rebuild a fresh container from only the entries [`scan_bytes`] judged
/// healthy, dropping anything truncated, overlapping, or undecodable.
/// Stored (still compressed/ciphered) bytes are copied through verbatim
/// rather than re-encoded, since re-encoding would require the
/// passphrase for ciphered entries this scanner never sees.
pub fn extract_recoverable(data: &[u8]) -> (crate::container::ContainerBuilder, RecoveryReport) {
    let report = scan_bytes(data);
    let mut builder = crate::container::ContainerBuilder::new();
    for entry in &report.entry_log {
        if !entry.is_usable() {
            continue;
        }
        let start = entry.offset as usize;
        let payload = data[start..start + entry.stored_size as usize].to_vec();
        builder.add_entry(crate::container::StagedEntry {
            name: entry.name.clone(),
            payload,
            decompressed_size: entry.decompressed_size,
            flags: entry.flags,
        });
    }
    (builder, report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::container::{ContainerBuilder, StagedEntry};

    fn build_sample() -> Vec<u8> {
        let mut builder = ContainerBuilder::new();
        builder.add_entry(StagedEntry { name: "a".into(), payload: b"hello".to_vec(), decompressed_size: 5, flags: 0 });
        builder.add_entry(StagedEntry { name: "b".into(), payload: b"world!".to_vec(), decompressed_size: 6, flags: 0 });
        builder.finish(None).unwrap()
    }

    #[test]
    fn intact_container_is_fully_healthy() {
        let bytes = build_sample();
        let report = scan_bytes(&bytes);
        assert_eq!(report.total_entries, 2);
        assert_eq!(report.healthy_entries, 2);
        assert_eq!(report.quality, RecoveryQuality::Full);
    }

    #[test]
    fn bad_magic_is_catastrophic() {
        let mut bytes = build_sample();
        bytes[0] = 0;
        let report = scan_bytes(&bytes);
        assert_eq!(report.total_entries, 0);
        assert_eq!(report.quality, RecoveryQuality::Catastrophic);
    }

    #[test]
    fn truncated_payload_is_detected() {
        let mut bytes = build_sample();
        bytes.truncate(bytes.len() - 3);
        let report = scan_bytes(&bytes);
        assert!(report.truncated_entries >= 1);
        assert!(report.quality != RecoveryQuality::Full);
    }

    #[test]
    fn extract_recoverable_keeps_only_healthy_entries() {
        let mut bytes = build_sample();
        bytes.truncate(bytes.len() - 3);
        let (builder, report) = extract_recoverable(&bytes);
        assert!(builder.staged_count() <= report.total_entries);
        assert!(builder.staged_count() < 2);
    }
}
