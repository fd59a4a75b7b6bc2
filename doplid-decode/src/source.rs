//!
//! Byte sources for the raw readers. The readers never perform I/O themselves; a [`Source`]
//! carries a whole file in memory together with the originating filename, which several
//! formats encode metadata in (and every parsing error names).
//!

use crate::result::Result;
use std::path::Path;

/// An in-memory raw file with its originating filename.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    filename: String,
    bytes: Vec<u8>,
}

impl Source {
    /// Create a source from raw bytes and the originating filename.
    pub fn from_bytes(filename: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            filename: filename.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk into a source. The source filename is the path's final component.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let bytes = std::fs::read(path)?;
        Ok(Self { filename, bytes })
    }

    /// The originating filename.
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The raw file content.
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }
}
