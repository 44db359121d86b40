//! What the caller gets back once a request has been fully processed.
use std::fmt;

use crate::Error;
use crate::provider::Identity;

/// The result of processing a request, after every scoped provider has been torn down.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Resolution and the endpoint handler succeeded, and no teardown step raised.
    Success(T),
    /// Something failed, but a scoped provider suppressed the error while unwinding.
    ///
    /// There is no handler result to report: the [`Failure`] describes what was suppressed,
    /// and [`Failure::intercepted_by`] tells you who suppressed it.
    Suppressed(Failure),
    /// The request failed. The [`Failure`] carries the final propagating error.
    Failed(Failure),
}

impl<T> Outcome<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            Outcome::Success(t) => Some(t),
            _ => None,
        }
    }

    /// The failure attached to this outcome, whether it was suppressed or not.
    pub fn failure(&self) -> Option<&Failure> {
        match self {
            Outcome::Success(_) => None,
            Outcome::Suppressed(f) | Outcome::Failed(f) => Some(f),
        }
    }

    pub fn map<U, F>(self, f: F) -> Outcome<U>
    where
        F: FnOnce(T) -> U,
    {
        match self {
            Outcome::Success(t) => Outcome::Success(f(t)),
            Outcome::Suppressed(failure) => Outcome::Suppressed(failure),
            Outcome::Failed(failure) => Outcome::Failed(failure),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// Where the current propagating error came from.
pub enum FailureKind {
    /// A provider's producer (or a scoped provider's acquisition step) failed.
    Resolution,
    /// The endpoint handler failed after resolution succeeded.
    Handler,
    /// A teardown step failed on its own account.
    Teardown,
    /// The request was cancelled, or it ran out of time.
    Cancellation,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Resolution => "resolution",
            FailureKind::Handler => "handler",
            FailureKind::Teardown => "teardown",
            FailureKind::Cancellation => "cancellation",
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified failure.
///
/// It remembers the error that triggered the unwinding, the error that is propagating now,
/// the scoped providers that replaced or suppressed it along the way, and every error it
/// superseded.
#[derive(Debug, Clone)]
pub struct Failure {
    kind: FailureKind,
    trigger: Error,
    error: Error,
    origin: Option<Identity>,
    intercepted_by: Vec<Identity>,
    context: Vec<Error>,
    suppressed: bool,
}

impl Failure {
    pub(crate) fn new(kind: FailureKind, error: Error, origin: Option<Identity>) -> Self {
        Self {
            kind,
            trigger: error.clone(),
            error,
            origin,
            intercepted_by: Vec::new(),
            context: Vec::new(),
            suppressed: false,
        }
    }

    /// The producer of `origin` failed.
    pub fn resolution(origin: Identity, error: Error) -> Self {
        Self::new(FailureKind::Resolution, error, Some(origin))
    }

    /// The endpoint handler failed.
    pub fn handler(error: Error) -> Self {
        Self::new(FailureKind::Handler, error, None)
    }

    /// The teardown step of `origin` failed.
    pub fn teardown(origin: Identity, error: Error) -> Self {
        Self::new(FailureKind::Teardown, error, Some(origin))
    }

    /// The request was cancelled or timed out.
    pub fn cancellation(error: Error) -> Self {
        Self::new(FailureKind::Cancellation, error, None)
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    /// The error that started the unwinding.
    pub fn trigger(&self) -> &Error {
        &self.trigger
    }

    /// The final propagating error.
    pub fn error(&self) -> &Error {
        &self.error
    }

    /// The provider whose producer or teardown step raised the current error, if any.
    pub fn origin(&self) -> Option<&Identity> {
        self.origin.as_ref()
    }

    /// The scoped providers that replaced or suppressed the propagating error,
    /// in the order they did it.
    pub fn intercepted_by(&self) -> &[Identity] {
        &self.intercepted_by
    }

    pub fn was_intercepted(&self) -> bool {
        !self.intercepted_by.is_empty()
    }

    /// `true` if a scoped provider swallowed this failure.
    pub fn was_suppressed(&self) -> bool {
        self.suppressed
    }

    /// The errors superseded by a later teardown failure or cancellation, oldest first.
    pub fn context(&self) -> &[Error] {
        &self.context
    }

    /// A scoped provider translated the propagating error.
    pub(crate) fn replace(&mut self, by: Identity, error: Error) {
        self.intercepted_by.push(by);
        self.error = error;
    }

    /// A scoped provider swallowed the propagating error.
    pub(crate) fn suppress(mut self, by: Identity) -> Self {
        self.intercepted_by.push(by);
        self.suppressed = true;
        self
    }

    pub(crate) fn with_context(mut self, error: Error) -> Self {
        self.context.push(error);
        self
    }

    /// A new, unrelated error takes over.
    ///
    /// The current error is kept as context and the trigger is left untouched.
    pub(crate) fn supersede(
        &mut self,
        kind: FailureKind,
        origin: Option<Identity>,
        error: Error,
    ) {
        let previous = std::mem::replace(&mut self.error, error);
        self.context.push(previous);
        self.kind = kind;
        self.origin = origin;
        self.suppressed = false;
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{} failure in `{}`: {}", self.kind, origin, self.error),
            None => write!(f, "{} failure: {}", self.kind, self.error),
        }
    }
}

impl std::error::Error for Failure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}
