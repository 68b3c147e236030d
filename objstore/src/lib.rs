// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Durable typed key/value store for intent records.
//!
//! Keys are flat resource names; values are any serde-able record exposing its
//! resource version through [`Versioned`]. Writes are compare-and-swap on that
//! version and are durable before they are acknowledged: each record lives in
//! its own file, written to a temp name, fsynced and renamed into place.

use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::marker::PhantomData;
use std::path::PathBuf;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("object not found")]
    NotFound,

    #[error("version conflict: stored version is {have}")]
    Conflict { have: u64 },

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("malformed key file name '{0}'")]
    BadKeyFile(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Implemented by every record type held in a [`Store`]. The reported version
/// is what `set`/`delete` compare against.
pub trait Versioned {
    fn version(&self) -> u64;
}

/// A file-per-record store rooted at a directory.
pub struct Store<T> {
    root: PathBuf,
    _marker: PhantomData<T>,
}

impl<T> Store<T>
where
    T: Serialize + DeserializeOwned + Versioned,
{
    /// Open (or create) a store rooted at `root`. Leftover temp files from an
    /// interrupted write are discarded: the rename never happened, so the
    /// write was never acknowledged.
    pub fn open(root: impl Into<PathBuf>) -> StoreResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        for entry in fs::read_dir(&root)? {
            let entry = entry?;
            let is_tmp = entry.path().extension().and_then(|e| e.to_str()) == Some("tmp");
            if is_tmp {
                warn!("Discarding partial write {}", entry.path().display());
                fs::remove_file(entry.path())?;
            }
        }
        debug!("Opened object store at {}", root.display());
        Ok(Self {
            root,
            _marker: PhantomData,
        })
    }

    /// Fetch a record and its version.
    pub fn get(&self, name: &str) -> StoreResult<T> {
        let path = self.key_path(name);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(StoreError::NotFound),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    /// Store a record, compare-and-swap on the currently stored version.
    /// `expected = 0` means create-only: the key must not exist yet.
    /// Returns the version of the record just written.
    pub fn set(&self, name: &str, record: &T, expected: u64) -> StoreResult<u64> {
        match self.get(name) {
            Ok(current) if current.version() != expected => {
                return Err(StoreError::Conflict {
                    have: current.version(),
                });
            }
            Ok(_) => {}
            Err(StoreError::NotFound) if expected == 0 => {}
            Err(StoreError::NotFound) => return Err(StoreError::Conflict { have: 0 }),
            Err(e) => return Err(e),
        }
        let data = serde_json::to_vec(record)?;
        self.write_atomic(name, &data)?;
        debug!("Stored '{name}' at version {}", record.version());
        Ok(record.version())
    }

    /// Remove a record, compare-and-swap on the stored version.
    pub fn delete(&self, name: &str, expected: u64) -> StoreResult<()> {
        let current = self.get(name)?;
        if current.version() != expected {
            return Err(StoreError::Conflict {
                have: current.version(),
            });
        }
        fs::remove_file(self.key_path(name))?;
        self.sync_root()?;
        debug!("Deleted '{name}'");
        Ok(())
    }

    /// List all records whose key starts with `prefix`. An empty prefix lists
    /// the whole store.
    pub fn list(&self, prefix: &str) -> StoreResult<Vec<(String, T)>> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let fname = entry.file_name();
            let Some(fname) = fname.to_str() else {
                return Err(StoreError::BadKeyFile(fname.to_string_lossy().into_owned()));
            };
            if fname.ends_with(".tmp") {
                continue;
            }
            let name = unescape_key(fname).ok_or_else(|| StoreError::BadKeyFile(fname.into()))?;
            if !name.starts_with(prefix) {
                continue;
            }
            let record = serde_json::from_slice(&fs::read(entry.path())?)?;
            out.push((name, record));
        }
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }

    fn key_path(&self, name: &str) -> PathBuf {
        self.root.join(escape_key(name))
    }

    fn write_atomic(&self, name: &str, data: &[u8]) -> StoreResult<()> {
        let file = escape_key(name);
        let target = self.root.join(&file);
        // escaped keys may contain '.', so the temp name suffixes the whole
        // key rather than swapping an "extension"
        let tmp = self.root.join(format!("{file}.tmp"));
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
        fs::rename(&tmp, &target)?;
        self.sync_root()
    }

    fn sync_root(&self) -> StoreResult<()> {
        File::open(&self.root)?.sync_all()?;
        Ok(())
    }
}

/// Map a resource name to a flat file name. Every byte outside
/// `[A-Za-z0-9._-]` becomes `%XX`; '%' itself is escaped, so the mapping
/// reverses without ambiguity.
fn escape_key(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'a'..=b'z' | b'A'..=b'Z' | b'0'..=b'9' | b'.' | b'_' | b'-' => out.push(b as char),
            _ => out.push_str(&format!("%{b:02x}")),
        }
    }
    out
}

fn unescape_key(escaped: &str) -> Option<String> {
    let mut out = Vec::with_capacity(escaped.len());
    let mut bytes = escaped.bytes();
    while let Some(b) = bytes.next() {
        if b == b'%' {
            let hi = bytes.next()?;
            let lo = bytes.next()?;
            let hex = [hi, lo];
            let hex = std::str::from_utf8(&hex).ok()?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
        } else {
            out.push(b);
        }
    }
    String::from_utf8(out).ok()
}
