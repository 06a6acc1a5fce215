//! Binary cache for the semantic index.
//!
//! File format: disease_embeddings.bin
//!
//! Header (57 bytes):
//! - version: u8 (1)
//! - provider_id: [u8; 32] (SHA256 hash of provider name)
//! - dimensions: u32 (little-endian)
//! - name_count: u64 (little-endian)
//! - row_count: u64 (little-endian)
//! - checksum: u32 (CRC32 of header fields before checksum)
//!
//! Names (name_count times):
//! - len: u32 (little-endian)
//! - name: [u8; len] (UTF-8)
//!
//! Matrix:
//! - row_count * dimensions f32 values (little-endian, row-major)
//!
//! Trailer:
//! - body_checksum: u32 (CRC32 of names and matrix)

use std::io::Write;
use std::path::{Path, PathBuf};

use crate::semantic::index::{IndexError, SemanticIndex};
use crate::storage::write_atomic;

/// Current file format version
const FORMAT_VERSION: u8 = 1;

/// version(1) + provider_id(32) + dimensions(4) + name_count(8) + row_count(8) + checksum(4)
const HEADER_SIZE: usize = 57;

/// Cache file name inside the cache directory
pub const CACHE_FILE_NAME: &str = "disease_embeddings.bin";

/// Errors that can occur during cache operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexCacheError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid file format: {0}")]
    InvalidFormat(String),

    #[error("Version mismatch: file version {0}, supported version {1}")]
    VersionMismatch(u8, u8),

    #[error("Provider mismatch: file was built with a different embedding provider")]
    ProviderMismatch,

    #[error("Checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    #[error("Dimension mismatch: expected {expected}, file has {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Shape mismatch: {names} names for {rows} rows")]
    ShapeMismatch { names: u64, rows: u64 },

    #[error("Invalid index: {0}")]
    Index(#[from] IndexError),
}

/// Write-once, read-many cache of a built index under a cache directory.
pub struct IndexCache {
    path: PathBuf,
}

impl IndexCache {
    /// Cache stored as `CACHE_FILE_NAME` inside `cache_dir`.
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            path: cache_dir.join(CACHE_FILE_NAME),
        }
    }

    /// Get the cache file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Load the index, treating every failure as a cache miss.
    pub fn load(&self, provider_id: &[u8; 32], dimensions: usize) -> Option<SemanticIndex> {
        if !self.exists() {
            log::debug!("No cached index at {}", self.path.display());
            return None;
        }

        match self.try_load(provider_id, dimensions) {
            Ok(index) => Some(index),
            Err(e) => {
                log::warn!(
                    "Ignoring cached index at {}: {}",
                    self.path.display(),
                    e
                );
                None
            }
        }
    }

    /// Load the index, reporting why the cache cannot be used.
    pub fn try_load(
        &self,
        provider_id: &[u8; 32],
        dimensions: usize,
    ) -> Result<SemanticIndex, IndexCacheError> {
        let bytes = std::fs::read(&self.path)?;
        decode(&bytes, provider_id, dimensions)
    }

    /// Replace the cache with `index`.
    ///
    /// Uses atomic write: temp file -> fsync -> rename
    pub fn store(&self, index: &SemanticIndex, provider_id: &[u8; 32]) -> Result<(), IndexCacheError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }

        write_atomic(&self.path, |w| {
            encode(
                w,
                provider_id,
                index.dimensions(),
                index.names(),
                index.matrix(),
            )
        })?;

        Ok(())
    }

    /// Delete the cache file if it exists.
    pub fn delete(&self) -> Result<(), IndexCacheError> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

/// Serialize names and matrix. Row count is derived from the matrix so a
/// caller can produce inconsistent files in tests.
fn encode<W: Write>(
    writer: &mut W,
    provider_id: &[u8; 32],
    dimensions: usize,
    names: &[String],
    matrix: &[f32],
) -> std::io::Result<()> {
    let rows = if dimensions == 0 {
        0
    } else {
        matrix.len() / dimensions
    };

    let mut header = [0u8; HEADER_SIZE];
    header[0] = FORMAT_VERSION;
    header[1..33].copy_from_slice(provider_id);
    header[33..37].copy_from_slice(&(dimensions as u32).to_le_bytes());
    header[37..45].copy_from_slice(&(names.len() as u64).to_le_bytes());
    header[45..53].copy_from_slice(&(rows as u64).to_le_bytes());
    let checksum = crc32fast::hash(&header[0..53]);
    header[53..57].copy_from_slice(&checksum.to_le_bytes());
    writer.write_all(&header)?;

    let mut body = crc32fast::Hasher::new();

    for name in names {
        let len = (name.len() as u32).to_le_bytes();
        body.update(&len);
        body.update(name.as_bytes());
        writer.write_all(&len)?;
        writer.write_all(name.as_bytes())?;
    }

    for value in matrix {
        let bytes = value.to_le_bytes();
        body.update(&bytes);
        writer.write_all(&bytes)?;
    }

    writer.write_all(&body.finalize().to_le_bytes())?;
    Ok(())
}

fn decode(
    bytes: &[u8],
    expected_provider_id: &[u8; 32],
    expected_dimensions: usize,
) -> Result<SemanticIndex, IndexCacheError> {
    let mut reader = ByteReader::new(bytes);
    let header = reader.take(HEADER_SIZE)?;

    let version = header[0];
    if version != FORMAT_VERSION {
        return Err(IndexCacheError::VersionMismatch(version, FORMAT_VERSION));
    }

    let stored_checksum = u32::from_le_bytes(le_array(&header[53..57]));
    if crc32fast::hash(&header[0..53]) != stored_checksum {
        return Err(IndexCacheError::ChecksumMismatch);
    }

    if header[1..33] != expected_provider_id[..] {
        return Err(IndexCacheError::ProviderMismatch);
    }

    let dimensions = u32::from_le_bytes(le_array(&header[33..37])) as usize;
    if dimensions != expected_dimensions {
        return Err(IndexCacheError::DimensionMismatch {
            expected: expected_dimensions,
            got: dimensions,
        });
    }

    let name_count = u64::from_le_bytes(le_array(&header[37..45]));
    let row_count = u64::from_le_bytes(le_array(&header[45..53]));
    if name_count != row_count {
        return Err(IndexCacheError::ShapeMismatch {
            names: name_count,
            rows: row_count,
        });
    }
    if row_count == 0 {
        return Err(IndexCacheError::InvalidFormat("index is empty".to_string()));
    }

    let body_start = reader.position();
    let rows = usize::try_from(row_count)
        .map_err(|_| IndexCacheError::InvalidFormat("row count overflows".to_string()))?;

    // Each name needs at least its length prefix; reject absurd counts
    // before allocating.
    if rows.saturating_mul(4) > reader.remaining() {
        return Err(IndexCacheError::InvalidFormat("truncated name list".to_string()));
    }

    let mut names = Vec::with_capacity(rows);
    for _ in 0..rows {
        let len = u32::from_le_bytes(le_array(reader.take(4)?)) as usize;
        let name = std::str::from_utf8(reader.take(len)?)
            .map_err(|e| IndexCacheError::InvalidFormat(format!("name is not UTF-8: {e}")))?;
        names.push(name.to_string());
    }

    let values = rows
        .checked_mul(dimensions)
        .ok_or_else(|| IndexCacheError::InvalidFormat("matrix size overflows".to_string()))?;
    let matrix_bytes = reader.take(values.saturating_mul(4))?;
    let matrix: Vec<f32> = matrix_bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes(le_array(b)))
        .collect();

    let body_end = reader.position();
    let stored_body_checksum = u32::from_le_bytes(le_array(reader.take(4)?));
    if crc32fast::hash(&bytes[body_start..body_end]) != stored_body_checksum {
        return Err(IndexCacheError::ChecksumMismatch);
    }

    if reader.remaining() != 0 {
        return Err(IndexCacheError::InvalidFormat(format!(
            "{} trailing bytes",
            reader.remaining()
        )));
    }

    Ok(SemanticIndex::from_parts(names, dimensions, matrix)?)
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(bytes);
    out
}

/// Bounds-checked cursor over the file contents.
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn position(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], IndexCacheError> {
        if n > self.remaining() {
            return Err(IndexCacheError::InvalidFormat(format!(
                "unexpected end of file at byte {}",
                self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }
}
