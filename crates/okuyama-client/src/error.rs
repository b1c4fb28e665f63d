//! Client error taxonomy

use std::fmt;
use std::time::Duration;

use okuyama_protocol::ProtocolError;
use thiserror::Error;

/// Invalid client configuration; raised at construction and never retried
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no endpoints configured")]
    NoEndpoints,

    #[error("invalid endpoint {endpoint:?}: {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    #[error("invalid setting {name}: {reason}")]
    InvalidSetting { name: &'static str, reason: String },
}

/// Where in an exchange a transport failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Before the request line was completely written; the server has not
    /// acted on it
    Request,
    /// After the request was sent; the server may have applied it
    Response,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Request => "sending request",
            Self::Response => "reading response",
        })
    }
}

/// Sub-kind of an explicit failure reported by the server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    KeyTooLong,
    ValueTooLarge,
    AlreadyExists,
    /// Any other failure text
    Rejected,
}

impl FailureKind {
    /// Classify a server failure message
    pub fn classify(message: &str) -> Self {
        if message.starts_with(ALREADY_EXISTS_PREFIX) {
            Self::AlreadyExists
        } else if message.contains("Key Length") {
            Self::KeyTooLong
        } else if message.contains("Max Data Size Over") || message.contains("Value Length") {
            Self::ValueTooLarge
        } else {
            Self::Rejected
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::KeyTooLong => "key too long",
            Self::ValueTooLarge => "value too large",
            Self::AlreadyExists => "already exists",
            Self::Rejected => "rejected",
        })
    }
}

/// Server text returned by `add` when the key is taken
pub(crate) const ALREADY_EXISTS_PREFIX: &str = "NG:Data has already";

/// Server text returned by a versioned write whose version is stale
pub(crate) const VERSION_CONFLICT_MESSAGE: &str = "NG:Data has already been updated";

/// Coarse category of an [`Error`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    InvalidArgument,
    Connectivity,
    Io,
    Protocol,
    Operation,
    VersionConflict,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("no endpoint reachable after {attempts} attempt(s): {last_error}")]
    NoAvailableEndpoint { attempts: usize, last_error: String },

    #[error("I/O error while {stage}: {source}")]
    Io {
        stage: Stage,
        #[source]
        source: std::io::Error,
    },

    #[error("timed out after {after:?} while {stage}")]
    Timeout { stage: Stage, after: Duration },

    #[error("protocol error: {0}")]
    Protocol(ProtocolError),

    #[error("operation failed ({kind}): {message}")]
    Operation { kind: FailureKind, message: String },

    #[error("version conflict: {0}")]
    VersionConflict(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Config(_) => ErrorKind::Config,
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::NoAvailableEndpoint { .. } => ErrorKind::Connectivity,
            Self::Io { .. } | Self::Timeout { .. } => ErrorKind::Io,
            Self::Protocol(_) => ErrorKind::Protocol,
            Self::Operation { .. } => ErrorKind::Operation,
            Self::VersionConflict(_) => ErrorKind::VersionConflict,
        }
    }

    /// Transport failure that a second attempt on a new connection may avoid
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::Io
    }

    /// Stage of a transport failure
    pub fn stage(&self) -> Option<Stage> {
        match self {
            Self::Io { stage, .. } | Self::Timeout { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// True when the server may have applied the request despite the error
    pub fn is_ambiguous(&self) -> bool {
        self.stage() == Some(Stage::Response)
    }

    /// Attribute a codec error to a stage of the exchange
    pub(crate) fn from_protocol(err: ProtocolError, stage: Stage) -> Self {
        match err {
            ProtocolError::Io(source) => Self::Io { stage, source },
            ProtocolError::Timeout(after) => Self::Timeout { stage, after },
            other => Self::Protocol(other),
        }
    }

    pub(crate) fn operation(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Operation {
            kind: FailureKind::classify(&message),
            message,
        }
    }
}

/// Codec errors raised while decoding belong to the response stage
impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Self::from_protocol(err, Stage::Response)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
