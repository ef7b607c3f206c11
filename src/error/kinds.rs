use std::{fmt, io};

/// Crate-wide `Result` type using [`RelayError`] as the error.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Top-level error type for an export run.
///
/// Every variant except [`RelayError::Read`] carrying a transient kind is
/// fatal for the run; callers terminate with the rendered message.
#[derive(Debug)]
pub enum RelayError {
    /// Missing or malformed credential/settings file.
    Config(ConfigError),

    /// Source or destination unreachable, or authentication refused.
    Connection(ConnectionError),

    /// Reading from the source failed.
    Read(ReadError),

    /// Writing a segment to the destination failed.
    Upload(UploadError),

    /// Capability derivation, parsing or permission check failed.
    Access(AccessError),

    /// A re-downloaded segment differs from what was uploaded.
    IntegrityMismatch {
        key: String,
        expected: String,
        actual: String,
    },

    /// The run was cancelled before it finished.
    Cancelled,

    /// I/O errors.
    Io(io::Error),

    /// Generic error with a free-form message.
    Generic(String),
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Config file could not be parsed.
    InvalidFormat(String),

    /// Required field missing or empty.
    MissingField(String),

    /// Field present but unusable.
    InvalidValue { field: String, value: String },
}

/// Connection errors, fatal at the point of first use.
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to establish a connection.
    ConnectionFailed(String),

    /// The server refused the supplied credentials.
    AuthenticationFailed(String),

    /// Connecting took longer than the configured timeout.
    Timeout,

    /// Ping command failed.
    PingFailed(String),

    /// Connection URI could not be parsed.
    InvalidUri(String),
}

/// Source read errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// Listing the collections failed; nothing can be resumed without them.
    EnumerationFailed(String),

    /// Acquiring a cursor exceeded the export timeout.
    CursorTimeout { collection: String },

    /// Iterating a cursor failed mid-collection.
    CursorFailed { collection: String, message: String },

    /// A document could not be serialized into a chunk.
    Encode(String),
}

/// Destination write errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// The destination bucket does not exist.
    BucketNotFound(String),

    /// Creating the missing bucket failed.
    BucketCreateFailed(String),

    /// The destination refused the request.
    AccessDenied(String),

    /// Writing the object failed.
    WriteFailed { key: String, message: String },

    /// Reading an object back failed.
    ReadBackFailed { key: String, message: String },

    /// A single chunk is larger than an empty segment can hold.
    OversizedChunk { capacity: usize },
}

/// Access-scope errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessError {
    /// Root credential is not in `ACCESS_KEY_ID:SECRET_KEY` form.
    InvalidRootCredential,

    /// A serialized capability token could not be parsed.
    InvalidToken(String),

    /// The capability does not grant the operation.
    PermissionDenied(String),
}

impl ReadError {
    /// Whether the caller may retry the pull from the same state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ReadError::CursorTimeout { .. } | ReadError::CursorFailed { .. }
        )
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayError::Config(e) => write!(f, "Configuration error: {e}"),
            RelayError::Connection(e) => write!(f, "Connection error: {e}"),
            RelayError::Read(e) => write!(f, "Read error: {e}"),
            RelayError::Upload(e) => write!(f, "Upload error: {e}"),
            RelayError::Access(e) => write!(f, "Access error: {e}"),
            RelayError::IntegrityMismatch {
                key,
                expected,
                actual,
            } => write!(
                f,
                "Integrity check failed for '{key}': uploaded {expected}, downloaded {actual}"
            ),
            RelayError::Cancelled => write!(f, "Export cancelled"),
            RelayError::Io(e) => write!(f, "I/O error: {e}"),
            RelayError::Generic(msg) => write!(f, "{msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::AuthenticationFailed(msg) => {
                write!(f, "Authentication failed: {msg}")
            }
            ConnectionError::Timeout => write!(f, "Connection timeout"),
            ConnectionError::PingFailed(msg) => write!(f, "Ping failed: {msg}"),
            ConnectionError::InvalidUri(uri) => write!(f, "Invalid connection URI: {uri}"),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadError::EnumerationFailed(msg) => {
                write!(f, "Failed to retrieve collection names: {msg}")
            }
            ReadError::CursorTimeout { collection } => {
                write!(f, "Timed out opening a cursor on '{collection}'")
            }
            ReadError::CursorFailed {
                collection,
                message,
            } => write!(f, "Cursor on '{collection}' failed: {message}"),
            ReadError::Encode(msg) => write!(f, "Failed to encode document: {msg}"),
        }
    }
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::BucketNotFound(bucket) => write!(f, "Bucket not found: {bucket}"),
            UploadError::BucketCreateFailed(msg) => write!(f, "Could not create bucket: {msg}"),
            UploadError::AccessDenied(msg) => write!(f, "Access denied: {msg}"),
            UploadError::WriteFailed { key, message } => {
                write!(f, "Could not upload '{key}': {message}")
            }
            UploadError::ReadBackFailed { key, message } => {
                write!(f, "Could not download '{key}': {message}")
            }
            UploadError::OversizedChunk { capacity } => write!(
                f,
                "A document does not fit in an empty segment of {capacity} bytes"
            ),
        }
    }
}

impl fmt::Display for AccessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessError::InvalidRootCredential => {
                write!(f, "Root credential must be ACCESS_KEY_ID:SECRET_KEY")
            }
            AccessError::InvalidToken(msg) => write!(f, "Could not parse access token: {msg}"),
            AccessError::PermissionDenied(op) => {
                write!(f, "Capability does not permit {op}")
            }
        }
    }
}

impl std::error::Error for RelayError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for ConnectionError {}
impl std::error::Error for ReadError {}
impl std::error::Error for UploadError {}
impl std::error::Error for AccessError {}

/* ========================= Conversions to RelayError ========================= */

impl From<io::Error> for RelayError {
    fn from(err: io::Error) -> Self {
        RelayError::Io(err)
    }
}

impl From<ConfigError> for RelayError {
    fn from(err: ConfigError) -> Self {
        RelayError::Config(err)
    }
}

impl From<ConnectionError> for RelayError {
    fn from(err: ConnectionError) -> Self {
        RelayError::Connection(err)
    }
}

impl From<ReadError> for RelayError {
    fn from(err: ReadError) -> Self {
        RelayError::Read(err)
    }
}

impl From<UploadError> for RelayError {
    fn from(err: UploadError) -> Self {
        RelayError::Upload(err)
    }
}

impl From<AccessError> for RelayError {
    fn from(err: AccessError) -> Self {
        RelayError::Access(err)
    }
}
