// crates/core/src/archive.rs
//! Backup archive ("bundle") codec used by export and import jobs.
//!
//! A bundle is a gzip stream of newline-delimited JSON. The first line is a
//! [`BundleHeader`]; every following line is one file with its relative
//! path, size, CRC32 and base64 payload. Readers verify path safety,
//! duplicates, checksums and the header's entry count.

use std::collections::HashSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

use crate::error::ArchiveError;

pub const BUNDLE_FORMAT: &str = "chatshell-bundle";
pub const BUNDLE_VERSION: u32 = 1;
pub const BUNDLE_EXTENSION: &str = "chatshell.gz";

/// First line of every bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleHeader {
    pub format: String,
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub entry_count: u64,
}

#[derive(Serialize, Deserialize)]
struct EntryLine {
    path: String,
    size: u64,
    crc32: u32,
    #[serde(with = "base64_bytes")]
    data: Vec<u8>,
}

/// One verified file read back from a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BundleEntry {
    /// Validated relative path, safe to join onto a destination root.
    pub path: PathBuf,
    pub data: Vec<u8>,
}

/// Default archive file name for an export taken at `at`.
pub fn bundle_file_name(at: DateTime<Utc>) -> String {
    format!("chatshell-backup-{}.{}", at.format("%Y%m%d-%H%M%S"), BUNDLE_EXTENSION)
}

/// Streaming bundle writer. The entry count is fixed up front and checked
/// again by [`finish`](Self::finish).
pub struct BundleWriter<W: Write> {
    encoder: GzEncoder<W>,
    expected: u64,
    written: u64,
    seen: HashSet<String>,
}

impl<W: Write> BundleWriter<W> {
    pub fn new(inner: W, entry_count: u64) -> Result<Self, ArchiveError> {
        let mut encoder = GzEncoder::new(inner, Compression::default());
        let header = BundleHeader {
            format: BUNDLE_FORMAT.to_string(),
            version: BUNDLE_VERSION,
            created_at: Utc::now(),
            entry_count,
        };
        write_line(&mut encoder, &header)?;
        Ok(Self {
            encoder,
            expected: entry_count,
            written: 0,
            seen: HashSet::new(),
        })
    }

    /// Append one file under its `/`-separated relative path.
    pub fn append(&mut self, path: &str, data: &[u8]) -> Result<(), ArchiveError> {
        check_entry_name(path)?;
        if !self.seen.insert(path.to_string()) {
            return Err(ArchiveError::DuplicateEntry(path.to_string()));
        }
        let line = EntryLine {
            path: path.to_string(),
            size: data.len() as u64,
            crc32: crc32fast::hash(data),
            data: data.to_vec(),
        };
        write_line(&mut self.encoder, &line)?;
        self.written += 1;
        Ok(())
    }

    pub fn entries_written(&self) -> u64 {
        self.written
    }

    /// Flush the gzip trailer and hand back the inner writer.
    pub fn finish(self) -> Result<W, ArchiveError> {
        if self.written != self.expected {
            return Err(ArchiveError::EntryCountMismatch {
                expected: self.expected,
                found: self.written,
            });
        }
        Ok(self.encoder.finish()?)
    }
}

/// Streaming bundle reader.
pub struct BundleReader<R: Read> {
    lines: std::io::Lines<BufReader<GzDecoder<R>>>,
    header: BundleHeader,
    line_no: usize,
    read: u64,
    seen: HashSet<PathBuf>,
}

impl<R: Read> BundleReader<R> {
    /// Read and check the header line.
    pub fn open(inner: R) -> Result<Self, ArchiveError> {
        let mut lines = BufReader::new(GzDecoder::new(inner)).lines();
        let first = match lines.next() {
            Some(Ok(line)) => line,
            // A non-gzip input surfaces as an IO error on the first read.
            Some(Err(e)) if e.kind() == std::io::ErrorKind::InvalidInput => {
                return Err(ArchiveError::NotABundle)
            }
            Some(Err(e)) if e.kind() == std::io::ErrorKind::InvalidData => {
                return Err(ArchiveError::NotABundle)
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ArchiveError::NotABundle),
        };
        let header: BundleHeader =
            serde_json::from_str(&first).map_err(|_| ArchiveError::NotABundle)?;
        if header.format != BUNDLE_FORMAT {
            return Err(ArchiveError::NotABundle);
        }
        if header.version != BUNDLE_VERSION {
            return Err(ArchiveError::UnsupportedVersion(header.version));
        }
        Ok(Self {
            lines,
            header,
            line_no: 1,
            read: 0,
            seen: HashSet::new(),
        })
    }

    pub fn header(&self) -> &BundleHeader {
        &self.header
    }

    /// Next verified entry, or `None` once the bundle is exhausted and its
    /// entry count matched the header.
    pub fn next_entry(&mut self) -> Result<Option<BundleEntry>, ArchiveError> {
        let line = loop {
            match self.lines.next() {
                Some(line) => {
                    self.line_no += 1;
                    let line = line?;
                    if !line.trim().is_empty() {
                        break line;
                    }
                }
                None => {
                    if self.read != self.header.entry_count {
                        return Err(ArchiveError::EntryCountMismatch {
                            expected: self.header.entry_count,
                            found: self.read,
                        });
                    }
                    return Ok(None);
                }
            }
        };

        let entry: EntryLine =
            serde_json::from_str(&line).map_err(|e| ArchiveError::Malformed {
                line: self.line_no,
                message: e.to_string(),
            })?;
        let path = validate_entry_path(&entry.path)?;
        if entry.data.len() as u64 != entry.size || crc32fast::hash(&entry.data) != entry.crc32 {
            return Err(ArchiveError::ChecksumMismatch(entry.path));
        }
        if !self.seen.insert(path.clone()) {
            return Err(ArchiveError::DuplicateEntry(entry.path));
        }
        self.read += 1;
        if self.read > self.header.entry_count {
            return Err(ArchiveError::EntryCountMismatch {
                expected: self.header.entry_count,
                found: self.read,
            });
        }
        Ok(Some(BundleEntry {
            path,
            data: entry.data,
        }))
    }
}

/// Check that `name` is a `/`-separated relative entry name: no empty,
/// `.` or `..` segments and no NUL. Anything else a filesystem allows in a
/// file name (`:`, `\`, spaces) is kept as is.
pub fn check_entry_name(name: &str) -> Result<(), ArchiveError> {
    let unsafe_name = || ArchiveError::UnsafePath(name.to_string());
    if name.is_empty() || name.contains('\0') {
        return Err(unsafe_name());
    }
    if name
        .split('/')
        .any(|segment| segment.is_empty() || segment == "." || segment == "..")
    {
        return Err(unsafe_name());
    }
    Ok(())
}

/// Turn an entry name read from a bundle into a path that is safe to join
/// onto a destination root on this platform.
///
/// On top of [`check_entry_name`], every component must be a plain name as
/// the host platform parses it, so a `..\` or drive prefix cannot escape
/// the root where `\` is a separator.
pub fn validate_entry_path(path: &str) -> Result<PathBuf, ArchiveError> {
    check_entry_name(path)?;
    let out: PathBuf = path.split('/').collect();
    if !out.components().all(|c| matches!(c, Component::Normal(_))) {
        return Err(ArchiveError::UnsafePath(path.to_string()));
    }
    Ok(out)
}

/// Render a relative filesystem path with `/` separators for a bundle entry.
pub fn entry_name(relative: &Path) -> Option<String> {
    let parts: Option<Vec<&str>> = relative
        .components()
        .map(|c| match c {
            Component::Normal(s) => s.to_str(),
            _ => None,
        })
        .collect();
    parts.map(|p| p.join("/"))
}

fn write_line<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<(), ArchiveError> {
    serde_json::to_writer(&mut *out, value).map_err(std::io::Error::from)?;
    out.write_all(b"\n")?;
    Ok(())
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        STANDARD.decode(s).map_err(serde::de::Error::custom)
    }
}
