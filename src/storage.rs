//! Atomic file replacement.
//!
//! Data is written to a temp file in the destination directory, flushed and
//! fsynced, then renamed over the destination. Readers only ever see the old
//! file or the complete new one.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Write `path` through `write`, replacing any existing file atomically.
///
/// If `write` fails the temp file is removed and `path` is left untouched.
pub fn write_atomic<F>(path: &Path, write: F) -> io::Result<()>
where
    F: FnOnce(&mut BufWriter<&File>) -> io::Result<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let temp = tempfile::NamedTempFile::new_in(dir)?;

    {
        let mut writer = BufWriter::new(temp.as_file());
        write(&mut writer)?;
        writer.flush()?;
    }
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Convenience wrapper for writing a whole buffer.
pub fn write_bytes_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    write_atomic(path, |w| w.write_all(data))
}
