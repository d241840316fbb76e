//! The reader's error taxonomy.
//!
//! Five kinds cover every failure the reader reports: a header that does
//! not decode, an archive whose framing or checksums are wrong, an
//! underlying I/O failure, a format feature the reader does not implement,
//! and an operation the caller performed against the reader's contract.
//! A clean end of archive is not an error; it surfaces as `Ok(None)` from
//! [`Archive::next_entry`](crate::Archive::next_entry).

use thiserror::Error;

use tarview_header::{HeaderError, PaxError};

/// Errors reported by the archive reader.
///
/// The first fatal error latches the reader's
/// [`errored`](crate::Archive::errored) predicate and permanently ends
/// iteration; no resynchronisation is attempted.
#[derive(Debug, Error)]
pub enum Error {
    /// A header block or extension record does not decode.
    #[error("invalid header: {0}")]
    InvalidHeader(String),

    /// The archive's framing, checksums or sparse maps are inconsistent.
    #[error("corrupt archive: {0}")]
    CorruptArchive(String),

    /// An I/O error from the underlying byte source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A format feature the reader does not support.
    #[error("unsupported feature: {0}")]
    UnsupportedFeature(String),

    /// The caller violated the reader's usage contract (stale entry,
    /// backwards read, data access on a non-file entry).
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result alias for reader operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<HeaderError> for Error {
    fn from(err: HeaderError) -> Self {
        match err {
            HeaderError::ChecksumMismatch { .. } => Error::CorruptArchive(err.to_string()),
            _ => Error::InvalidHeader(err.to_string()),
        }
    }
}

impl From<PaxError> for Error {
    fn from(err: PaxError) -> Self {
        match err {
            PaxError::Truncated { .. } => Error::CorruptArchive(err.to_string()),
            _ => Error::InvalidHeader(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_errors_map_to_kinds() {
        let checksum = HeaderError::ChecksumMismatch {
            stored: 1,
            computed: 2,
        };
        assert!(matches!(Error::from(checksum), Error::CorruptArchive(_)));

        let magic = HeaderError::BadMagic(b"garbage".to_vec());
        assert!(matches!(Error::from(magic), Error::InvalidHeader(_)));
    }

    #[test]
    fn pax_errors_map_to_kinds() {
        let truncated = PaxError::Truncated {
            len: 10,
            remaining: 3,
        };
        assert!(matches!(Error::from(truncated), Error::CorruptArchive(_)));

        let malformed = PaxError::Malformed("no separator".into());
        assert!(matches!(Error::from(malformed), Error::InvalidHeader(_)));
    }

    #[test]
    fn messages_name_the_kind() {
        let err = Error::UnsupportedFeature("entry type 'Z'".into());
        assert_eq!(err.to_string(), "unsupported feature: entry type 'Z'");
    }
}
