//! Loader errors and the bounded last-error description.

/// Size of the last-error buffer, including the C string terminator the
/// description would carry on the other side of an FFI boundary.
pub const ERROR_BUFFER_CAPACITY: usize = 1024;

/// Errors from discovering, loading or binding the SASL library.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoaderError {
    /// The candidate list was empty.
    #[error("No candidate library names given")]
    NoCandidates,

    /// None of the candidate names could be opened.
    #[error("Failed to load any of {}: {}", .candidates.join(", "), .detail)]
    LibraryNotFound {
        candidates: Vec<String>,
        detail: String,
    },

    /// A library was opened but lacks a required entry point.
    #[error("Required symbol {symbol} is missing: {detail}")]
    SymbolMissing { symbol: String, detail: String },

    /// `open` was called while a handle is already held.
    #[error("SASL library is already loaded")]
    AlreadyLoaded,

    /// `resolve` was called without an open handle.
    #[error("No SASL library is open")]
    NotOpen,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl LoaderError {
    /// `true` when the error means "the SASL feature is not available on
    /// this host", as opposed to a caller mistake.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::LibraryNotFound { .. } | Self::SymbolMissing { .. })
    }

    /// Name of the missing symbol, if that is what failed.
    pub fn missing_symbol(&self) -> Option<&str> {
        match self {
            Self::SymbolMissing { symbol, .. } => Some(symbol),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, LoaderError>;

/// Fixed-capacity description of the most recent failure.
///
/// Longer messages are cut on a UTF-8 character boundary so that the text
/// fits in [`ERROR_BUFFER_CAPACITY`] bytes with a terminator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorBuffer {
    text: String,
}

impl ErrorBuffer {
    pub fn new() -> Self {
        Self {
            text: String::with_capacity(ERROR_BUFFER_CAPACITY),
        }
    }

    /// Overwrite the description.
    pub fn set(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        let mut end = message.len().min(ERROR_BUFFER_CAPACITY - 1);
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        self.text.clear();
        self.text.push_str(&message[..end]);
    }

    pub fn clear(&mut self) {
        self.text.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

impl std::fmt::Display for ErrorBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
