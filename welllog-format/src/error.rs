use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Unexpected end of stream in {what} at {position:#x} after {got} bytes")]
    Truncated {
        what: &'static str,
        position: u64,
        got: u64,
    },

    #[error("Checksum mismatch at {position:#x}: stored {stored:#06x}, computed {computed:#06x}")]
    ChecksumMismatch {
        position: u64,
        stored: u16,
        computed: u16,
    },

    #[error("{what} length {length} at {position:#x} outside [{min}, {max}]")]
    LengthOutOfRange {
        what: &'static str,
        position: u64,
        length: u64,
        min: u64,
        max: u64,
    },

    #[error("Inconsistent record attributes at {position:#x}: {reason}")]
    AttributeInconsistency { position: u64, reason: String },

    #[error("Malformed {what} at {position:#x}: {reason}")]
    Malformed {
        what: &'static str,
        position: u64,
        reason: String,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Could not persist or load index")]
    Persist(#[source] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn malformed<S: Into<String>>(what: &'static str, position: u64, reason: S) -> Error {
        Error::Malformed {
            what,
            position,
            reason: reason.into(),
        }
    }

    pub(crate) fn inconsistent<S: Into<String>>(position: u64, reason: S) -> Error {
        Error::AttributeInconsistency {
            position,
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> FaultKind {
        match self {
            Error::Truncated { .. } => FaultKind::Truncated,
            Error::ChecksumMismatch { .. } => FaultKind::ChecksumMismatch,
            Error::LengthOutOfRange { .. } => FaultKind::LengthOutOfRange,
            Error::AttributeInconsistency { .. } => FaultKind::AttributeInconsistency,
            Error::Malformed { .. } => FaultKind::Malformed,
            Error::Config(_) | Error::Persist(_) | Error::Io(_) => FaultKind::Io,
        }
    }

    /// Stream offset the fault was raised at, where one is known.
    pub fn position(&self) -> Option<u64> {
        match self {
            Error::Truncated { position, .. }
            | Error::ChecksumMismatch { position, .. }
            | Error::LengthOutOfRange { position, .. }
            | Error::AttributeInconsistency { position, .. }
            | Error::Malformed { position, .. } => Some(*position),
            _ => None,
        }
    }

    /// Whether keep-going mode may skip past this fault and resume at the next record.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::ChecksumMismatch { .. } | Error::AttributeInconsistency { .. }
        )
    }

    pub(crate) fn to_anomaly(&self) -> Anomaly {
        Anomaly {
            kind: self.kind(),
            position: self.position().unwrap_or(0),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FaultKind {
    Truncated,
    ChecksumMismatch,
    LengthOutOfRange,
    AttributeInconsistency,
    Malformed,
    TifMarkerMismatch,
    StaleIndex,
    Io,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use FaultKind::*;

        let s = match self {
            Truncated => "truncated",
            ChecksumMismatch => "checksum mismatch",
            LengthOutOfRange => "length out of range",
            AttributeInconsistency => "attribute inconsistency",
            Malformed => "malformed",
            TifMarkerMismatch => "TIF marker mismatch",
            StaleIndex => "stale index",
            Io => "I/O",
        };

        write!(f, "{}", s)
    }
}

/// A fault that was recorded instead of raised.
#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub kind: FaultKind,
    pub position: u64,
    pub message: String,
}

impl Anomaly {
    pub(crate) fn new<S: Into<String>>(kind: FaultKind, position: u64, message: S) -> Anomaly {
        Anomaly {
            kind,
            position,
            message: message.into(),
        }
    }
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {:#x}: {}", self.kind, self.position, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("Could not read `{}`", .1.display())]
    ReadFailed(#[source] std::io::Error, PathBuf),

    #[error("`{}` is neither a LIS nor an RP66V1 file", .0.display())]
    UnknownFormat(PathBuf),

    #[error("Could not read the framing header of `{}`", .1.display())]
    InvalidHeader(#[source] Error, PathBuf),
}

/// Reads until `buf` is full or the stream ends, returning the count read.
///
/// Unlike `Read::read_exact` the partial count survives a short read, which is
/// what `Error::Truncated { got }` reports and what tells a clean end (0) from
/// a cut header.
pub(crate) fn read_full<R: std::io::Read>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Fills `buf` completely or reports how much of `what` was missing.
pub(crate) fn read_exact_at<R: std::io::Read>(
    reader: &mut R,
    buf: &mut [u8],
    what: &'static str,
    position: u64,
) -> Result<()> {
    let got = read_full(reader, buf)?;
    if got < buf.len() {
        return Err(Error::Truncated {
            what,
            position,
            got: got as u64,
        });
    }
    Ok(())
}
