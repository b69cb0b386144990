//! Error taxonomy for the index. Mirrors the shape of errors that a caller
//! needs to branch on (not-found vs deleted vs expired vs I/O), rather than
//! collapsing everything into a single opaque failure.

use std::{fmt, io, result};

/// Crate-wide result alias.
pub type Result<T> = result::Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    /// Key not present in the index.
    IdNotFound,
    /// Key present but marked deleted.
    IdDeleted,
    /// Key present, not deleted, but past its time-to-live.
    TtlExpired,
    /// A `FileSpan`, token, or other caller-supplied argument violated a
    /// precondition. Carries a human-readable explanation.
    InvalidArgument(String),
    /// Recovery replay found the log in a state the index cannot reconcile
    /// with (e.g. a non-delete record for an already-indexed key).
    InitializationError(String),
    /// A segment file on disk failed to load: bad header, bad checksum,
    /// truncated file.
    IndexCreationFailure(String),
    /// Wrapped I/O failure, annotated with the call site that observed it.
    IoError(String, io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::IdNotFound => write!(f, "id not found"),
            StoreError::IdDeleted => write!(f, "id deleted"),
            StoreError::TtlExpired => write!(f, "ttl expired"),
            StoreError::InvalidArgument(msg) => write!(f, "invalid argument: {}", msg),
            StoreError::InitializationError(msg) => write!(f, "initialization error: {}", msg),
            StoreError::IndexCreationFailure(msg) => write!(f, "index creation failure: {}", msg),
            StoreError::IoError(at, err) => write!(f, "io error at {}: {}", at, err),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::IoError(_, err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(err: io::Error) -> StoreError {
        StoreError::IoError("<unannotated>".to_string(), err)
    }
}

/// Annotate an `io::Result`/`Result<_, impl Into<io::Error>>` with the call
/// site that observed it, wrapping it as `StoreError::IoError`.
///
/// ```ignore
/// let file = err_at!(IOError, fs::File::open(path))?;
/// err_at!(msg: "segment {} missing end marker", start_offset)?;
/// ```
#[macro_export]
macro_rules! err_at {
    (IOError, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let at = format!("{}:{}", file!(), line!());
                Err($crate::error::StoreError::IoError(at, err.into()))
            }
        }
    }};
    (msg: $($arg:tt)+) => {{
        let at = format!("{}:{}", file!(), line!());
        Err($crate::error::StoreError::IoError(
            at,
            std::io::Error::new(std::io::ErrorKind::Other, format!($($arg)+)),
        ))
    }};
}
