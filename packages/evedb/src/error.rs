//! Error types for the event store.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Error kinds carried by results throughout the crate.
///
/// Every variant carries a human-readable context string. Callers prepend
/// field/path breadcrumbs when propagating, e.g. `".conn[3].orig_h: ..."`.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("conversion error: {0}")]
    Convert(String),

    #[error("invalid format: {0}")]
    Format(String),

    #[error("no such file: {0}")]
    NoSuchFile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("end of input: {0}")]
    EndOfInput(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("stalled: {0}")]
    Stalled(String),

    #[error("version mismatch: {0}")]
    VersionMismatch(String),

    #[error("type clash: {0}")]
    TypeClash(String),
}

impl Error {
    /// Stable kind string for status records and wire replies.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Parse(_) => "parse_error",
            Error::Convert(_) => "convert_error",
            Error::Format(_) => "format_error",
            Error::NoSuchFile(_) => "no_such_file",
            Error::Io(_) => "io_error",
            Error::EndOfInput(_) => "end_of_input",
            Error::Timeout(_) => "timeout",
            Error::Stalled(_) => "stalled",
            Error::VersionMismatch(_) => "version_mismatch",
            Error::TypeClash(_) => "type_clash",
        }
    }

    /// Prepend a breadcrumb to the context string.
    pub fn with_context(self, prefix: &str) -> Self {
        let wrap = |msg: String| format!("{}: {}", prefix, msg);
        match self {
            Error::InvalidArgument(m) => Error::InvalidArgument(wrap(m)),
            Error::Parse(m) => Error::Parse(wrap(m)),
            Error::Convert(m) => Error::Convert(wrap(m)),
            Error::Format(m) => Error::Format(wrap(m)),
            Error::NoSuchFile(m) => Error::NoSuchFile(wrap(m)),
            Error::Io(e) => Error::Io(std::io::Error::new(e.kind(), wrap(e.to_string()))),
            Error::EndOfInput(m) => Error::EndOfInput(wrap(m)),
            Error::Timeout(m) => Error::Timeout(wrap(m)),
            Error::Stalled(m) => Error::Stalled(wrap(m)),
            Error::VersionMismatch(m) => Error::VersionMismatch(wrap(m)),
            Error::TypeClash(m) => Error::TypeClash(wrap(m)),
        }
    }
}

/// Breadcrumb helper for `Result` chains.
pub trait ResultExt<T> {
    /// Prepend `prefix` to the error's context string, if any.
    fn ctx(self, prefix: &str) -> Result<T>;
}

impl<T> ResultExt<T> for Result<T> {
    fn ctx(self, prefix: &str) -> Result<T> {
        self.map_err(|e| e.with_context(prefix))
    }
}
