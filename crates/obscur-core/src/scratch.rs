//! Caller-supplied temporary storage for the write path.
//!
//! The manifest precedes the payload on the wire, but its serialized
//! length depends on every item's post-encryption length. The writer
//! therefore stages the multiplexed payload into a scratch store first and
//! appends it to the output after the manifest. Readers never need one.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::error::PackageError;

/// A sequential staging store the writer fills and then drains once.
pub trait Scratch {
    /// Append bytes to the staged payload.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    fn write_all(&mut self, data: &[u8]) -> Result<(), PackageError>;

    /// Number of bytes staged so far.
    fn len(&self) -> u64;

    /// Whether nothing has been staged.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy the staged bytes into `out`, consuming the staging position.
    ///
    /// # Errors
    ///
    /// Propagates I/O failures.
    fn drain_to(&mut self, out: &mut dyn Write) -> Result<(), PackageError>;
}

/// In-memory scratch, the default for modestly sized payloads.
#[derive(Default)]
pub struct MemoryScratch {
    buffer: Vec<u8>,
}

impl MemoryScratch {
    /// Fresh empty scratch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Scratch for MemoryScratch {
    fn write_all(&mut self, data: &[u8]) -> Result<(), PackageError> {
        self.buffer.extend_from_slice(data);
        Ok(())
    }

    fn len(&self) -> u64 {
        self.buffer.len() as u64
    }

    fn drain_to(&mut self, out: &mut dyn Write) -> Result<(), PackageError> {
        out.write_all(&self.buffer)?;
        self.buffer.clear();
        Ok(())
    }
}

/// File-backed scratch for payloads that should not live in memory.
pub struct FileScratch {
    file: File,
    written: u64,
}

impl FileScratch {
    /// Wrap an empty, read-write temporary file.
    #[must_use]
    pub fn new(file: File) -> Self {
        Self { file, written: 0 }
    }
}

impl Scratch for FileScratch {
    fn write_all(&mut self, data: &[u8]) -> Result<(), PackageError> {
        self.file.write_all(data)?;
        self.written += data.len() as u64;
        Ok(())
    }

    fn len(&self) -> u64 {
        self.written
    }

    fn drain_to(&mut self, out: &mut dyn Write) -> Result<(), PackageError> {
        self.file.flush()?;
        self.file.seek(SeekFrom::Start(0))?;
        let mut remaining = self.written;
        let mut chunk = [0u8; 16 * 1024];
        while remaining > 0 {
            let want = chunk.len().min(remaining as usize);
            let got = self.file.read(&mut chunk[..want])?;
            if got == 0 {
                return Err(PackageError::FormatMalformed(
                    "scratch file shorter than staged length".into(),
                ));
            }
            out.write_all(&chunk[..got])?;
            remaining -= got as u64;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_scratch_stages_and_drains() {
        let mut scratch = MemoryScratch::new();
        assert!(scratch.is_empty());
        scratch.write_all(b"hello ").unwrap();
        scratch.write_all(b"world").unwrap();
        assert_eq!(scratch.len(), 11);

        let mut out = Vec::new();
        scratch.drain_to(&mut out).unwrap();
        assert_eq!(out, b"hello world");
        assert!(scratch.is_empty());
    }

    #[test]
    fn file_scratch_stages_and_drains() {
        let file = tempfile::tempfile().unwrap();
        let mut scratch = FileScratch::new(file);
        scratch.write_all(&[0xABu8; 40_000]).unwrap();
        assert_eq!(scratch.len(), 40_000);

        let mut out = Vec::new();
        scratch.drain_to(&mut out).unwrap();
        assert_eq!(out, vec![0xABu8; 40_000]);
    }
}
