//! Error types for EWF image access

use std::fmt;
use std::io;
use std::path::PathBuf;

/// Result type alias for EWF operations
pub type Result<T> = std::result::Result<T, EwfError>;

/// Errors that can occur while reading or writing an EWF image set
#[derive(Debug)]
pub enum EwfError {
    /// Caller-supplied argument is out of range or the handle is in the
    /// wrong state for the requested operation
    InvalidArgument(String),
    /// Underlying file operation failed
    Io { context: String, source: io::Error },
    /// Signature, section descriptor CRC, or structural inconsistency
    CorruptContainer(String),
    /// A stored chunk could not be decompressed
    ChunkCorrupt { chunk: u64, detail: String },
    /// No valid table/table2 covers the requested chunk
    ChunkUnavailable { chunk: u64 },
    /// A section or format variant this crate does not implement
    UnsupportedFormat(String),
    /// Offset table or buffer allocation failed
    OutOfMemory(String),
}

impl EwfError {
    /// Shorthand for an I/O error with operation context
    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        EwfError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn open(path: &PathBuf, source: io::Error) -> Self {
        EwfError::Io {
            context: format!("open {}", path.display()),
            source,
        }
    }
}

impl fmt::Display for EwfError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EwfError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            EwfError::Io { context, source } => write!(f, "I/O error ({}): {}", context, source),
            EwfError::CorruptContainer(msg) => write!(f, "corrupt container: {}", msg),
            EwfError::ChunkCorrupt { chunk, detail } => {
                write!(f, "chunk {} corrupt: {}", chunk, detail)
            }
            EwfError::ChunkUnavailable { chunk } => {
                write!(f, "chunk {} has no valid offset table entry", chunk)
            }
            EwfError::UnsupportedFormat(msg) => write!(f, "unsupported format: {}", msg),
            EwfError::OutOfMemory(msg) => write!(f, "allocation failed: {}", msg),
        }
    }
}

impl std::error::Error for EwfError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EwfError::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}

impl From<std::collections::TryReserveError> for EwfError {
    fn from(e: std::collections::TryReserveError) -> Self {
        EwfError::OutOfMemory(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = EwfError::io("read volume", io::Error::new(io::ErrorKind::UnexpectedEof, "eof"));
        let msg = err.to_string();
        assert!(msg.contains("read volume"));
        assert!(msg.contains("eof"));
    }

    #[test]
    fn chunk_errors_name_the_chunk() {
        let err = EwfError::ChunkUnavailable { chunk: 42 };
        assert!(err.to_string().contains("42"));
    }
}
