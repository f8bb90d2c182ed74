//! Crate-wide error taxonomy.
//!
//! Two kinds are first-class: framework errors (transport, placement,
//! protocol, serialization — always retriable while attempts remain) and
//! application errors (raised by callee logic — never retried, propagated
//! verbatim).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Framework-level error codes recognized by the invocation engine and its
/// collaborators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameworkErrorCode {
    Unreachable,
    NotImplemented,
    Timeout,
    TimedOut,
    UnknownActor,
    Unregistered,
    CorruptHeader,
    VersionUnsupported,
    CorruptBody,
    BoundaryMissing,
    UnknownEnvelope,
    NumericRange,
    TakenOver,
    NoUpgrade,
    TokenNotHeld,
    TableError,
    Other,
}

impl std::fmt::Display for FrameworkErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unreachable => "UNREACHABLE",
            Self::NotImplemented => "NOT_IMPLEMENTED",
            Self::Timeout => "TIMEOUT",
            Self::TimedOut => "TIMED_OUT",
            Self::UnknownActor => "UNKNOWN_ACTOR",
            Self::Unregistered => "UNREGISTERED",
            Self::CorruptHeader => "CORRUPT_HEADER",
            Self::VersionUnsupported => "VERSION_UNSUPPORTED",
            Self::CorruptBody => "CORRUPT_BODY",
            Self::BoundaryMissing => "BOUNDARY_MISSING",
            Self::UnknownEnvelope => "UNKNOWN_ENVELOPE",
            Self::NumericRange => "NUMERIC_RANGE",
            Self::TakenOver => "TAKEN_OVER",
            Self::NoUpgrade => "NO_UPGRADE",
            Self::TokenNotHeld => "TOKEN_NOT_HELD",
            Self::TableError => "TABLE_ERROR",
            Self::Other => "OTHER",
        };
        write!(f, "{s}")
    }
}

/// A framework-level error: retriable, carries the nested attempts that
/// led to it.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("framework error {code}: {message}")]
pub struct FrameworkError {
    pub code: FrameworkErrorCode,
    pub message: String,
    /// Each nested entry is itself a classified framework error from one
    /// attempt of a single logical call, in attempt order.
    #[serde(default)]
    pub nested: Vec<FrameworkError>,
}

impl FrameworkError {
    pub fn new(code: FrameworkErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            nested: Vec::new(),
        }
    }

    pub fn with_nested(code: FrameworkErrorCode, message: impl Into<String>, nested: Vec<FrameworkError>) -> Self {
        Self {
            code,
            message: message.into(),
            nested,
        }
    }

    /// The code of the first recorded attempt, if any nested errors exist;
    /// otherwise this error's own code.
    pub fn first_code(&self) -> FrameworkErrorCode {
        self.nested.first().map(|e| e.code).unwrap_or(self.code)
    }
}

/// An application-level error raised by callee logic. Never retried;
/// propagated verbatim including its localization template and
/// parameters.
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
#[error("application error {code}: {message}")]
pub struct ApplicationError {
    pub code: String,
    pub message: String,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

impl ApplicationError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            template: None,
            parameters: HashMap::new(),
        }
    }
}

/// Top-level error returned to callers: either a framework error (retriable
/// while attempts remained) or an application error (propagated verbatim).
#[derive(Debug, Clone, Error, Serialize, Deserialize)]
pub enum CoreError {
    #[error(transparent)]
    Framework(#[from] FrameworkError),
    #[error(transparent)]
    Application(#[from] ApplicationError),
}

impl CoreError {
    pub fn is_retriable(&self) -> bool {
        matches!(self, CoreError::Framework(_))
    }
}
