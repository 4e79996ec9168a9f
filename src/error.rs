//! Error types and error handling strategy for taskgrove.
//!
//! This module defines the core error types used throughout the crate.
//! Error handling follows these principles:
//!
//! - Errors are explicit and typed (no stringly-typed errors)
//! - Panics escaping user tasks are isolated at the worker boundary and
//!   converted to [`PanicPayload`]
//! - Invalid configuration values are normalized at tree-build time, not
//!   reported as errors

use core::fmt;
use std::sync::Arc;

/// The kind of error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    // === Topology / lookup ===
    /// Unknown context or worker id, or an invalid parent id.
    BadId,

    // === Lifecycle ===
    /// Operation is not legal in the scheduler's current state.
    InvalidState,
    /// A worker thread could not be spawned.
    ThreadSpawn,

    // === Coroutines ===
    /// The coroutine record is gone; the handle is stale.
    CoroutineExpired,
    /// A coroutine body panicked.
    CoroutinePanicked,

    // === Promise / future ===
    /// A promise was completed twice.
    PromiseBroken,
    /// The future's value was already taken (or never attached).
    NoState,

    // === Workers ===
    /// A user task panicked.
    TaskPanicked,

    // === Internal / state machine ===
    /// Internal invariant violation (bug).
    Internal,

    // === User ===
    /// User-provided error.
    User,
}

/// The main error type for taskgrove operations.
#[derive(Debug, Clone)]
pub struct Error {
    kind: ErrorKind,
    context: Option<String>,
    source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Error {
    /// Creates a new error with the given kind.
    #[must_use]
    pub const fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            context: None,
            source: None,
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// Returns true if this error reports a stale coroutine handle.
    #[must_use]
    pub const fn is_expired(&self) -> bool {
        matches!(self.kind, ErrorKind::CoroutineExpired)
    }

    /// Returns true if this error carries a caught panic.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(
            self.kind,
            ErrorKind::TaskPanicked | ErrorKind::CoroutinePanicked
        )
    }

    /// Adds deterministic context text to the error.
    #[must_use]
    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context = Some(ctx.into());
        self
    }

    /// Adds a source error to the chain.
    #[must_use]
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    /// Creates a user error wrapping an application error value.
    #[must_use]
    pub fn user(source: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::new(ErrorKind::User).with_source(source)
    }

    /// Creates an error from a panic caught in a coroutine body.
    #[must_use]
    pub fn coroutine_panicked(payload: &PanicPayload) -> Self {
        Self::new(ErrorKind::CoroutinePanicked).with_context(payload.message().to_string())
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.kind)?;
        if let Some(ctx) = &self.context {
            write!(f, ": {ctx}")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.source.as_ref().map(|e| e.as_ref() as _)
    }
}

/// Payload from a caught panic.
///
/// Wraps the panic value for safe transport across worker and coroutine
/// boundaries. The raw `Box<dyn Any>` payload is reduced to its message so
/// the payload stays `Clone` and `Send`.
#[derive(Debug, Clone)]
pub struct PanicPayload {
    message: String,
}

impl PanicPayload {
    /// Creates a new panic payload with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    /// Extracts a payload from the boxed value produced by `catch_unwind`.
    #[must_use]
    pub fn from_unwind(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = payload.downcast_ref::<&str>().map_or_else(
            || {
                payload
                    .downcast_ref::<String>()
                    .cloned()
                    .unwrap_or_else(|| "opaque panic payload".to_string())
            },
            |s| (*s).to_string(),
        );
        Self { message }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for PanicPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)
    }
}

/// Extension trait for adding context to Results.
pub trait ResultExt<T> {
    /// Attach a context string on error.
    fn context(self, ctx: impl Into<String>) -> Result<T>;
    /// Attach context computed lazily on error.
    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T>;
}

impl<T, E: Into<Error>> ResultExt<T> for core::result::Result<T, E> {
    fn context(self, ctx: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(ctx))
    }

    fn with_context<F: FnOnce() -> String>(self, f: F) -> Result<T> {
        self.map_err(|e| e.into().with_context(f()))
    }
}

/// A specialized Result type for taskgrove operations.
pub type Result<T> = core::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[derive(Debug)]
    struct Underlying;

    impl fmt::Display for Underlying {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "underlying")
        }
    }

    impl std::error::Error for Underlying {}

    #[test]
    fn display_without_context() {
        let err = Error::new(ErrorKind::Internal);
        assert_eq!(err.to_string(), "Internal");
    }

    #[test]
    fn display_with_context() {
        let err = Error::new(ErrorKind::BadId).with_context("context id 7 out of range");
        assert_eq!(err.to_string(), "BadId: context id 7 out of range");
    }

    #[test]
    fn source_chain_is_exposed() {
        let err = Error::new(ErrorKind::ThreadSpawn)
            .with_context("outer")
            .with_source(Underlying);
        let source = err.source().expect("source missing");
        assert_eq!(source.to_string(), "underlying");
    }

    #[test]
    fn result_ext_adds_context() {
        let res: core::result::Result<(), Error> = Err(Error::new(ErrorKind::NoState));
        let err = res.context("future drained").expect_err("expected err");
        assert_eq!(err.kind(), ErrorKind::NoState);
        assert_eq!(err.to_string(), "NoState: future drained");
    }

    #[test]
    fn predicates_match_kind() {
        let expired = Error::new(ErrorKind::CoroutineExpired);
        assert!(expired.is_expired());
        assert!(!expired.is_panic());

        let panicked = Error::new(ErrorKind::TaskPanicked);
        assert!(panicked.is_panic());
        assert!(!panicked.is_expired());
    }

    #[test]
    fn panic_payload_from_unwind_str() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new("boom");
        let payload = PanicPayload::from_unwind(boxed.as_ref());
        assert_eq!(payload.message(), "boom");
        assert_eq!(payload.to_string(), "panic: boom");
    }

    #[test]
    fn panic_payload_from_unwind_string() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new(String::from("kaput"));
        let payload = PanicPayload::from_unwind(boxed.as_ref());
        assert_eq!(payload.message(), "kaput");
    }

    #[test]
    fn panic_payload_from_unwind_opaque() {
        let boxed: Box<dyn std::any::Any + Send> = Box::new(17u32);
        let payload = PanicPayload::from_unwind(boxed.as_ref());
        assert_eq!(payload.message(), "opaque panic payload");
    }
}
