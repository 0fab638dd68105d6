//! Error types for fontdepot
//!
//! All modules use `FontDepotResult<T>` as their return type.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Result type alias for fontdepot operations
pub type FontDepotResult<T> = Result<T, FontDepotError>;

/// Coarse classification used by callers that map errors onto responses
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unknown family, subset name or cached fingerprint
    NotFound,
    /// Malformed selector or unicode-range syntax
    InvalidInput,
    /// Corrupt source font, empty subset, closure error or timeout
    BuildFailure,
    /// Disk write/rename/lock error on the cache
    CacheIo,
    /// Bad configuration
    Config,
    /// Anything else
    Internal,
}

impl ErrorKind {
    /// Process exit status, following the BSD `sysexits` codes
    pub fn exit_code(self) -> u8 {
        match self {
            Self::InvalidInput => 64,
            Self::BuildFailure => 65,
            Self::NotFound => 66,
            Self::Internal => 70,
            Self::CacheIo => 74,
            Self::Config => 78,
        }
    }
}

/// All errors that can occur in fontdepot
#[derive(Error, Debug)]
pub enum FontDepotError {
    // Lookup errors
    #[error("Font family not found: {0}")]
    FamilyNotFound(String),

    #[error("Unknown subset: {0}")]
    SubsetNotFound(String),

    #[error("Cached subset not found: {0}")]
    FingerprintNotFound(String),

    // Request errors
    #[error("Invalid selector '{selector}': {reason}")]
    InvalidSelector { selector: String, reason: String },

    #[error("Invalid unicode-range '{range}': {reason}")]
    InvalidUnicodeRange { range: String, reason: String },

    // Build errors
    #[error("Failed to parse font {path}: {reason}")]
    FontParse { path: PathBuf, reason: String },

    #[error("Subset '{subset}' shares no characters with {family}")]
    EmptySubset { family: String, subset: String },

    #[error("Source font changed since last scan: {0}")]
    SourceChanged(PathBuf),

    #[error("Build of {key} exceeded {secs}s")]
    BuildTimeout { key: String, secs: u64 },

    #[error("Build worker for {key} panicked")]
    BuildPanicked { key: String },

    #[error("WOFF2 encoding failed: {0}")]
    Encode(String),

    #[error("Malformed font table '{table}': {reason}")]
    MalformedTable { table: String, reason: String },

    // Cache errors
    #[error("Timed out waiting for build lock {name} after {secs}s")]
    LockTimeout { name: String, secs: u64 },

    #[error("Cache IO error: {context}")]
    CacheIo {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// One build failure observed by every waiter of that attempt
    #[error("{0}")]
    Shared(Arc<FontDepotError>),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl FontDepotError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a cache IO error with context
    pub fn cache_io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::CacheIo {
            context: context.into(),
            source,
        }
    }

    /// Create a malformed table error
    pub fn malformed(table: &str, reason: impl Into<String>) -> Self {
        Self::MalformedTable {
            table: table.to_string(),
            reason: reason.into(),
        }
    }

    /// The underlying error of a shared build failure
    pub fn root(&self) -> &FontDepotError {
        match self {
            Self::Shared(inner) => inner.root(),
            other => other,
        }
    }

    /// Classify the error, looking through shared build failures
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::FamilyNotFound(_) | Self::SubsetNotFound(_) | Self::FingerprintNotFound(_) => {
                ErrorKind::NotFound
            }
            Self::InvalidSelector { .. } | Self::InvalidUnicodeRange { .. } => {
                ErrorKind::InvalidInput
            }
            Self::FontParse { .. }
            | Self::EmptySubset { .. }
            | Self::SourceChanged(_)
            | Self::BuildTimeout { .. }
            | Self::BuildPanicked { .. }
            | Self::Encode(_)
            | Self::MalformedTable { .. } => ErrorKind::BuildFailure,
            Self::LockTimeout { .. } | Self::CacheIo { .. } => ErrorKind::CacheIo,
            Self::ConfigInvalid { .. }
            | Self::ConfigDirCreate { .. }
            | Self::TomlParse(_)
            | Self::TomlSerialize(_) => ErrorKind::Config,
            Self::Shared(inner) => inner.kind(),
            Self::Io { .. } | Self::Json(_) | Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::BuildTimeout { .. } | Self::LockTimeout { .. } | Self::SourceChanged(_) => true,
            Self::Shared(inner) => inner.is_retryable(),
            _ => false,
        }
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::FamilyNotFound(_) => Some("Run: fontdepot list"),
            Self::SubsetNotFound(_) => Some(
                "Known subsets: latin, latin-ext, cyrillic, cyrillic-ext, greek, greek-ext, vietnamese, math, symbols",
            ),
            Self::SourceChanged(_) => Some("The font directory changed; retry to rescan"),
            Self::LockTimeout { .. } => Some("Raise cache.lock_timeout_secs or check for a stuck worker"),
            Self::BuildTimeout { .. } => Some("Raise cache.build_timeout_secs"),
            Self::Shared(inner) => inner.hint(),
            _ => None,
        }
    }
}
