//! Error taxonomy for the spice orchestration engine
//!
//! All errors that cross a component boundary in spice collapse to
//! [`SpiceError`], a flat, wire-visible taxonomy (see spec §6/§7). Each
//! variant carries a human-readable `message`, an optional `cause`, and a
//! free-form `context` map for diagnostics — nothing here is meant to be
//! pattern-matched beyond the variant itself; callers distinguish
//! recoverable from unrecoverable failures via [`SpiceError::is_recoverable`].
//!
//! # Example
//!
//! ```rust
//! use spice_core::error::SpiceError;
//!
//! let err = SpiceError::validation("entry point 'start' does not exist");
//! assert_eq!(err.code(), "ValidationError");
//! assert!(!err.is_recoverable());
//! ```

use std::collections::HashMap;
use std::fmt;

use serde_json::Value;

/// Convenience result type using [`SpiceError`].
pub type Result<T> = std::result::Result<T, SpiceError>;

/// Free-form diagnostic context attached to an error.
pub type ErrorContext = HashMap<String, Value>;

/// The flat, wire-visible error taxonomy from spec §6.
///
/// `ToolError`, `NetworkError`, `TimeoutError`, and `RateLimitError` are
/// recoverable (see [`SpiceError::is_recoverable`]); everything else is
/// not. This classification drives `ErrorAction` decisions in the runner.
#[derive(thiserror::Error, Debug)]
pub enum SpiceError {
    /// Graph structure or message-schema validation failed.
    #[error("validation error: {message}")]
    Validation {
        message: String,
        context: ErrorContext,
    },

    /// A run failed for reasons not attributable to a single node.
    #[error("execution error: {message}")]
    Execution {
        message: String,
        context: ErrorContext,
    },

    /// A tool invocation failed.
    #[error("tool error: {message}")]
    Tool {
        message: String,
        context: ErrorContext,
    },

    /// A network call failed (connection refused, DNS, etc).
    #[error("network error: {message}")]
    Network {
        message: String,
        context: ErrorContext,
    },

    /// An operation exceeded its deadline.
    #[error("timeout error: {message}")]
    Timeout {
        message: String,
        context: ErrorContext,
    },

    /// A downstream collaborator rate-limited the request.
    #[error("rate limit error: {message}")]
    RateLimit {
        message: String,
        context: ErrorContext,
    },

    /// Credentials were missing or rejected.
    #[error("authentication error: {message}")]
    Authentication {
        message: String,
        context: ErrorContext,
    },

    /// Anything that doesn't fit the above.
    #[error("unknown error: {message}")]
    Unknown {
        message: String,
        context: ErrorContext,
    },
}

impl SpiceError {
    /// The wire-visible error code, e.g. for inclusion in an `ErrorReport`
    /// tool call (spec §4.3 step 7.j).
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "ValidationError",
            Self::Execution { .. } => "ExecutionError",
            Self::Tool { .. } => "ToolError",
            Self::Network { .. } => "NetworkError",
            Self::Timeout { .. } => "TimeoutError",
            Self::RateLimit { .. } => "RateLimitError",
            Self::Authentication { .. } => "AuthenticationError",
            Self::Unknown { .. } => "UnknownError",
        }
    }

    /// `true` for `ToolError | NetworkError | TimeoutError | RateLimitError`,
    /// the classification spec §4.3 uses to decide `ErrorAction::Retry`
    /// eligibility. Everything else is treated as unrecoverable.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Tool { .. } | Self::Network { .. } | Self::Timeout { .. } | Self::RateLimit { .. }
        )
    }

    /// The diagnostic context map attached to this error.
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Validation { context, .. }
            | Self::Execution { context, .. }
            | Self::Tool { context, .. }
            | Self::Network { context, .. }
            | Self::Timeout { context, .. }
            | Self::RateLimit { context, .. }
            | Self::Authentication { context, .. }
            | Self::Unknown { context, .. } => context,
        }
    }

    /// Attach or overwrite a context key, chainable at the construction site.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        let ctx = match &mut self {
            Self::Validation { context, .. }
            | Self::Execution { context, .. }
            | Self::Tool { context, .. }
            | Self::Network { context, .. }
            | Self::Timeout { context, .. }
            | Self::RateLimit { context, .. }
            | Self::Authentication { context, .. }
            | Self::Unknown { context, .. } => context,
        };
        ctx.insert(key.into(), value.into());
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn execution(message: impl Into<String>) -> Self {
        Self::Execution {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn tool(message: impl Into<String>) -> Self {
        Self::Tool {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::Timeout {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn rate_limit(message: impl Into<String>) -> Self {
        Self::RateLimit {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn authentication(message: impl Into<String>) -> Self {
        Self::Authentication {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn unknown(message: impl Into<String>) -> Self {
        Self::Unknown {
            message: message.into(),
            context: ErrorContext::new(),
        }
    }
}

impl From<serde_json::Error> for SpiceError {
    fn from(err: serde_json::Error) -> Self {
        Self::validation(format!("message schema error: {err}"))
    }
}

/// Summary of a [`SpiceError`] suitable for attaching to a failed message as
/// an `ErrorReport` tool call (spec §4.3 step 7.j, §7).
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ErrorReport {
    pub code: String,
    pub reason: String,
    pub recoverable: bool,
    pub context: ErrorContext,
}

impl From<&SpiceError> for ErrorReport {
    fn from(err: &SpiceError) -> Self {
        Self {
            code: err.code().to_string(),
            reason: err.to_string(),
            recoverable: err.is_recoverable(),
            context: err.context().clone(),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.code, self.recoverable, self.reason)
    }
}
