//! Persisted memo of grid point → aggregate score.
//!
//! File layout, little-endian:
//!
//! ```text
//! [count: u32][dims: u32] then count × [value: f64 × dims][itakura_saito: f64][log_spectrum: f64]
//! ```
//!
//! The header names the dimensionality, so a truncated file never reads as
//! a well-formed file for fewer dimensions.
//!
//! Keys are compared with exact float equality: the cache replays exact
//! grid points, it never interpolates.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use super::comparisons::Comparisons;
use super::range::Ranges;

const HEADER_LEN: usize = 8;
const SCORE_FIELDS: usize = 2;
const WORD: usize = 8;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(
        "value cache {path} holds {found}-dimensional entries but {expected} ranges are configured"
    )]
    DimensionMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub values: Vec<f64>,
    pub result: Comparisons,
}

/// Why a cache file was not accepted.
#[derive(Debug, PartialEq)]
enum Decode {
    /// Damaged or truncated: start empty.
    Corrupt(&'static str),
    /// Well-formed for another dimensionality: refuse to run.
    Dimensions(usize),
}

pub struct ValueCache {
    path: PathBuf,
    dims: usize,
    entries: Vec<CacheEntry>,
}

impl ValueCache {
    /// Empty cache that persists to `path`.
    pub fn new(path: &Path, dims: usize) -> Self {
        Self {
            path: path.to_path_buf(),
            dims,
            entries: Vec::new(),
        }
    }

    /// Load `path`. A missing, short or damaged file starts an empty cache
    /// with a warning; a file written for a different number of dimensions is
    /// an error.
    pub fn open(path: &Path, dims: usize) -> Result<Self, CacheError> {
        let mut cache = Self::new(path, dims);
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!(path = %path.display(), "no value cache yet, starting empty");
                return Ok(cache);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "value cache unreadable, starting empty");
                return Ok(cache);
            }
        };

        match decode(&bytes, dims) {
            Ok(entries) => {
                info!(path = %path.display(), entries = entries.len(), "value cache loaded");
                cache.entries = entries;
                Ok(cache)
            }
            Err(Decode::Corrupt(reason)) => {
                warn!(path = %path.display(), reason, "value cache damaged, starting empty");
                Ok(cache)
            }
            Err(Decode::Dimensions(found)) => Err(CacheError::DimensionMismatch {
                path: path.to_path_buf(),
                expected: dims,
                found,
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[CacheEntry] {
        &self.entries
    }

    /// Score stored for the current values of `ranges`, if any.
    pub fn load(&self, ranges: &Ranges) -> Option<Comparisons> {
        self.lookup(&ranges.values())
    }

    pub fn lookup(&self, values: &[f64]) -> Option<Comparisons> {
        self.entries
            .iter()
            .find(|e| e.values.as_slice() == values)
            .map(|e| e.result)
    }

    /// Append the current values of `ranges` with their score.
    pub fn save(&mut self, ranges: &Ranges, result: Comparisons) {
        self.insert(ranges.values(), result);
    }

    pub fn insert(&mut self, values: Vec<f64>, result: Comparisons) {
        debug_assert_eq!(values.len(), self.dims);
        self.entries.push(CacheEntry { values, result });
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf =
            Vec::with_capacity(HEADER_LEN + self.entries.len() * entry_len(self.dims));
        buf.extend_from_slice(&(self.entries.len() as u32).to_le_bytes());
        buf.extend_from_slice(&(self.dims as u32).to_le_bytes());
        for e in &self.entries {
            for v in &e.values {
                buf.extend_from_slice(&v.to_le_bytes());
            }
            buf.extend_from_slice(&e.result.itakura_saito.to_le_bytes());
            buf.extend_from_slice(&e.result.log_spectrum.to_le_bytes());
        }
        buf
    }

    /// Atomic write of every entry: write to .tmp then rename.
    pub fn persist(&self) -> Result<(), CacheError> {
        let bytes = self.to_bytes();
        let tmp = self.path.with_extension("tmp");
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        debug!(path = %self.path.display(), entries = self.entries.len(), "value cache persisted");
        Ok(())
    }
}

fn entry_len(dims: usize) -> usize {
    (dims + SCORE_FIELDS) * WORD
}

fn read_f64(bytes: &[u8], offset: usize) -> f64 {
    let mut word = [0u8; WORD];
    word.copy_from_slice(&bytes[offset..offset + WORD]);
    f64::from_le_bytes(word)
}

fn read_u32(bytes: &[u8], offset: usize) -> usize {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word) as usize
}

fn decode(bytes: &[u8], dims: usize) -> Result<Vec<CacheEntry>, Decode> {
    if bytes.len() < HEADER_LEN {
        return Err(Decode::Corrupt("shorter than the header"));
    }
    let count = read_u32(bytes, 0);
    let found = read_u32(bytes, 4);
    let body = &bytes[HEADER_LEN..];

    let fits = |d: usize| count.checked_mul(entry_len(d)) == Some(body.len());
    if found != dims {
        // Only a complete file for another dimensionality is a configuration error.
        if fits(found) {
            return Err(Decode::Dimensions(found));
        }
        return Err(Decode::Corrupt("header does not match the entries"));
    }
    if !fits(dims) {
        return Err(Decode::Corrupt("size does not match the entry count"));
    }

    let stride = entry_len(dims);
    let entries = body
        .chunks_exact(stride)
        .map(|chunk| {
            let values = (0..dims).map(|d| read_f64(chunk, d * WORD)).collect();
            let itakura_saito = read_f64(chunk, dims * WORD);
            let log_spectrum = read_f64(chunk, (dims + 1) * WORD);
            CacheEntry {
                values,
                result: Comparisons::new(log_spectrum, itakura_saito),
            }
        })
        .collect();
    Ok(entries)
}
