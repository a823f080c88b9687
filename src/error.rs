use std::path::PathBuf;
use thiserror::Error;

/// Failures of the instrument bus itself.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {context}: {source}")]
    Io {
        #[source]
        source: std::io::Error,
        context: String,
    },
    #[error("Bus timeout: {0}")]
    Timeout(String),
    #[error("Connection closed by instrument")]
    Closed,
    #[error("Invalid resource string: {0}")]
    InvalidResource(String),
    #[error("Unsupported resource '{resource}': {reason}")]
    Unsupported { resource: String, reason: String },
    #[error("Response exceeds {0} bytes")]
    Oversized(usize),
    #[error("Non-text response to '{command}'")]
    NonTextResponse { command: String },
    #[error("Script exhausted: no response queued for '{0}'")]
    ScriptExhausted(String),
}

impl TransportError {
    pub(crate) fn io(source: std::io::Error, context: impl Into<String>) -> Self {
        let context = context.into();
        match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportError::Timeout(context)
            }
            std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => TransportError::Closed,
            _ => TransportError::Io { source, context },
        }
    }
}

#[derive(Error, Debug)]
pub enum IdentityError {
    #[error("ID query doesn't match HP4195 (got {response:?})")]
    Mismatch { response: String },
    #[error("Identity query failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CommentError {
    #[error("Comment can only contain ASCII chars (found {ch:?} at byte {position})")]
    NonAscii { ch: char, position: usize },
    #[error("Comment cannot contain quotes or control chars (found {ch:?} at byte {position})")]
    ForbiddenChar { ch: char, position: usize },
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("Capture aborted at {step}: {source}")]
    Transport {
        step: &'static str,
        #[source]
        source: TransportError,
    },
}

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Specify only a base filename with no extension (got '{0}')")]
    ReservedExtension(String),
    #[error("Empty output filename")]
    EmptyBaseName,
    #[error("Failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
pub enum RomError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unusable ROM image size ({0} bytes)")]
    Size(usize),
    #[error("Incomplete ROM image: {len} bytes, font table needs more than {needed}")]
    Truncated { len: usize, needed: usize },
    #[error("Glyph {index} out of bounds (start 0x{start:x}, image length 0x{len:x})")]
    GlyphOutOfBounds { index: usize, start: u64, len: usize },
}

/// Top-level error for one capture, as surfaced to the binaries.
#[derive(Error, Debug)]
pub enum DumpError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error(transparent)]
    Comment(#[from] CommentError),
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Sink(#[from] SinkError),
}

impl DumpError {
    /// Whether the instrument may be left mid-sequence, so the next capture
    /// has to start with a fresh identity check.
    pub fn instrument_state_unknown(&self) -> bool {
        matches!(
            self,
            DumpError::Transport(_) | DumpError::Capture(_) | DumpError::Identity(_)
        )
    }
}

/// Failures that end an interactive session.
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Console IO error: {0}")]
    Console(#[from] std::io::Error),
    #[error(transparent)]
    Identity(IdentityError),
}
