//! The error taxonomy both sides of the boundary speak.
//!
//! `AbiError` is one struct — message, optional remote backtrace, optional
//! cause chain — tagged with an [`AbiErrorKind`]. The kind carries the
//! per-kind auxiliary fields (status codes, resource names) that survive
//! marshalling; everything else about an error is just its message.
//!
//! The stable string tags live here too, next to the kinds they name, so
//! the exception codec and this module cannot drift apart.

use thiserror::Error;

use crate::status;

/// Kind tag plus the auxiliary fields that kind marshals.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AbiErrorKind {
    #[error("error")]
    Generic,
    #[error("invalid argument `{name}`")]
    InvalidArgument { name: String },
    #[error("argument `{name}` was null")]
    NullArgument { name: String },
    #[error("argument `{name}` out of range")]
    ArgumentOutOfRange { name: String },
    #[error("not supported")]
    NotSupported,
    #[error("not implemented")]
    NotImplemented,
    #[error("invalid operation")]
    InvalidOperation,
    #[error("timed out")]
    Timeout,
    #[error("operation cancelled")]
    Cancelled,
    #[error("`{resource}` already disposed")]
    Disposed { resource: String },
    #[error("I/O error (code {code})")]
    Io { code: i32 },
    #[error("network error (status {status}, code {code})")]
    Network { status: u16, code: i32 },
    #[error("type `{type_name}` failed to initialize")]
    TypeInit { type_name: String },
    #[error("aggregate error")]
    Aggregate,
}

impl AbiErrorKind {
    /// The stable tag that keys the marshalling registry. These strings are
    /// part of the wire contract — never rename one.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::InvalidArgument { .. } => "invalid-argument",
            Self::NullArgument { .. } => "null-argument",
            Self::ArgumentOutOfRange { .. } => "argument-out-of-range",
            Self::NotSupported => "not-supported",
            Self::NotImplemented => "not-implemented",
            Self::InvalidOperation => "invalid-operation",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::Disposed { .. } => "disposed",
            Self::Io { .. } => "io",
            Self::Network { .. } => "network",
            Self::TypeInit { .. } => "type-init",
            Self::Aggregate => "aggregate",
        }
    }
}

/// A marshallable error: kind, message, optional remote backtrace, and an
/// optional chain of causes (outermost first).
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct AbiError {
    pub kind: AbiErrorKind,
    pub message: String,
    /// Stack trace captured on the side that threw, carried as opaque text.
    pub backtrace: Option<String>,
    #[source]
    pub cause: Option<Box<AbiError>>,
}

impl AbiError {
    pub fn new(kind: AbiErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            backtrace: None,
            cause: None,
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(AbiErrorKind::Generic, message)
    }

    pub fn invalid_argument(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(AbiErrorKind::InvalidArgument { name: name.clone() }, format!("invalid argument `{name}`"))
    }

    pub fn null_argument(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(AbiErrorKind::NullArgument { name: name.clone() }, format!("argument `{name}` was null"))
    }

    pub fn argument_out_of_range(name: impl Into<String>) -> Self {
        let name = name.into();
        Self::new(AbiErrorKind::ArgumentOutOfRange { name: name.clone() }, format!("argument `{name}` out of range"))
    }

    pub fn not_supported(message: impl Into<String>) -> Self {
        Self::new(AbiErrorKind::NotSupported, message)
    }

    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(AbiErrorKind::NotImplemented, message)
    }

    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::new(AbiErrorKind::InvalidOperation, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(AbiErrorKind::Timeout, message)
    }

    pub fn cancelled() -> Self {
        Self::new(AbiErrorKind::Cancelled, "operation cancelled")
    }

    pub fn disposed(resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(AbiErrorKind::Disposed { resource: resource.clone() }, format!("`{resource}` already disposed"))
    }

    pub fn io(code: i32, message: impl Into<String>) -> Self {
        Self::new(AbiErrorKind::Io { code }, message)
    }

    pub fn network(status: u16, code: i32, message: impl Into<String>) -> Self {
        Self::new(AbiErrorKind::Network { status, code }, message)
    }

    pub fn type_init(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(
            AbiErrorKind::TypeInit { type_name: type_name.into() },
            message,
        )
    }

    pub fn aggregate(message: impl Into<String>) -> Self {
        Self::new(AbiErrorKind::Aggregate, message)
    }

    /// Attach a nested cause (builder style).
    pub fn with_cause(mut self, cause: AbiError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// Attach a captured backtrace (builder style).
    pub fn with_backtrace(mut self, backtrace: impl Into<String>) -> Self {
        self.backtrace = Some(backtrace.into());
        self
    }

    /// Walk the cause chain, outermost excluded.
    pub fn causes(&self) -> impl Iterator<Item = &AbiError> {
        std::iter::successors(self.cause.as_deref(), |e| e.cause.as_deref())
    }

    /// Map this error to the status code a vtable slot should return.
    pub fn status_code(&self) -> i32 {
        match &self.kind {
            AbiErrorKind::Cancelled => status::CANCELLED,
            AbiErrorKind::InvalidArgument { .. }
            | AbiErrorKind::ArgumentOutOfRange { .. } => status::INVALID_ARG,
            AbiErrorKind::NullArgument { .. } => status::NULL_DISPATCH,
            _ => status::FAIL,
        }
    }
}

impl From<std::io::Error> for AbiError {
    fn from(e: std::io::Error) -> Self {
        Self::io(e.raw_os_error().unwrap_or(0), e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tags_are_stable() {
        assert_eq!(AbiError::cancelled().kind.tag(), "cancelled");
        assert_eq!(AbiError::network(404, -7, "...").kind.tag(), "network");
        assert_eq!(AbiError::disposed("vault").kind.tag(), "disposed");
    }

    #[test]
    fn cause_chain_walks_in_order() {
        let err = AbiError::generic("outer")
            .with_cause(AbiError::io(5, "mid").with_cause(AbiError::cancelled()));
        let kinds: Vec<_> = err.causes().map(|e| e.kind.tag()).collect();
        assert_eq!(kinds, ["io", "cancelled"]);
    }

    #[test]
    fn status_codes_distinguish_cancellation_from_faults() {
        assert_eq!(AbiError::cancelled().status_code(), status::CANCELLED);
        assert_eq!(AbiError::generic("x").status_code(), status::FAIL);
        assert_eq!(AbiError::invalid_argument("n").status_code(), status::INVALID_ARG);
    }
}
