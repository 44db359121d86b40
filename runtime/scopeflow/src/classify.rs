//! Map the final propagating error of a request to a transport-level status.
//!
//! The engine never formats a wire response: a [`Classified`] failure is handed over
//! to the transport layer, which renders it as it sees fit.
use std::fmt;

use http::StatusCode;
use serde_json::Value as Json;

use crate::inputs::errors::{InputTypeMismatch, MissingInput};
use crate::outcome::Failure;

#[derive(Debug, Clone, PartialEq)]
/// A failure, classified.
pub struct Classified {
    pub status: StatusCode,
    /// The payload describing the failure to the caller.
    pub detail: Json,
    /// Additional headers to attach to the response.
    pub headers: Vec<(String, String)>,
}

impl Classified {
    pub fn new(status: StatusCode, detail: impl Into<Json>) -> Self {
        Self {
            status,
            detail: detail.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// The answer given when nothing more specific is known about the failure.
    pub fn internal_server_error() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error")
    }
}

impl From<&HttpError> for Classified {
    fn from(e: &HttpError) -> Self {
        Self {
            status: e.status,
            detail: e.detail.clone(),
            headers: e.headers.clone(),
        }
    }
}

#[derive(Debug, Clone)]
/// An error that already knows how it should be reported to the caller.
///
/// Return it from a provider, a teardown step or a handler to short-circuit
/// classification.
///
/// # Example
///
/// ```rust
/// use scopeflow::HttpError;
/// use scopeflow::http::StatusCode;
///
/// let e = HttpError::new(StatusCode::BAD_REQUEST, "X-Token header invalid")
///     .header("x-error", "There goes my error");
/// assert_eq!(e.to_string(), "400 Bad Request: X-Token header invalid");
/// ```
pub struct HttpError {
    pub status: StatusCode,
    pub detail: Json,
    pub headers: Vec<(String, String)>,
}

impl HttpError {
    pub fn new(status: StatusCode, detail: impl Into<Json>) -> Self {
        Self {
            status,
            detail: detail.into(),
            headers: Vec::new(),
        }
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Json::String(s) => write!(f, "{}: {}", self.status, s),
            other => write!(f, "{}: {}", self.status, other),
        }
    }
}

impl std::error::Error for HttpError {}

/// Turn a [`Failure`] into a [`Classified`] failure.
///
/// It is implemented for closures with the right signature, as well as for
/// [`ExceptionHandlers`], the default classifier.
pub trait ErrorClassifier: Send + Sync + 'static {
    fn classify(&self, failure: &Failure) -> Classified;
}

impl<F> ErrorClassifier for F
where
    F: Fn(&Failure) -> Classified + Send + Sync + 'static,
{
    fn classify(&self, failure: &Failure) -> Classified {
        (self)(failure)
    }
}

type Handler = Box<dyn Fn(&Failure) -> Option<Classified> + Send + Sync>;

#[derive(Default)]
/// A classifier keyed by error type.
///
/// Handlers are tried in registration order, matching on the type of the final propagating
/// error. When none matches:
///
/// - an [`HttpError`] is reported as is;
/// - a missing or mistyped request input is reported as `422 Unprocessable Entity`;
/// - anything else becomes an opaque `500 Internal Server Error`.
///
/// # Example
///
/// ```rust
/// use scopeflow::{Classified, ExceptionHandlers};
/// use scopeflow::http::StatusCode;
///
/// #[derive(Debug, thiserror::Error)]
/// #[error("Owner error: {0}")]
/// struct OwnerError(String);
///
/// let handlers = ExceptionHandlers::new().on::<OwnerError, _>(|e, _failure| {
///     Classified::new(StatusCode::BAD_REQUEST, e.to_string())
/// });
/// ```
pub struct ExceptionHandlers {
    handlers: Vec<(&'static str, Handler)>,
}

impl ExceptionHandlers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for errors of type `E`.
    pub fn on<E, F>(mut self, handler: F) -> Self
    where
        E: std::error::Error + 'static,
        F: Fn(&E, &Failure) -> Classified + Send + Sync + 'static,
    {
        let erased: Handler = Box::new(move |failure: &Failure| {
            let e = failure.error().downcast_ref::<E>()?;
            Some(handler(e, failure))
        });
        self.handlers.push((std::any::type_name::<E>(), erased));
        self
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl ErrorClassifier for ExceptionHandlers {
    fn classify(&self, failure: &Failure) -> Classified {
        for (error_type, handler) in &self.handlers {
            if let Some(classified) = handler(failure) {
                tracing::trace!(error_type, "An exception handler matched");
                return classified;
            }
        }
        default_classification(failure)
    }
}

impl fmt::Debug for ExceptionHandlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.handlers.iter().map(|(name, _)| name))
            .finish()
    }
}

fn default_classification(failure: &Failure) -> Classified {
    let error = failure.error();
    if let Some(e) = error.downcast_ref::<HttpError>() {
        return e.into();
    }
    if error.is::<MissingInput>() || error.is::<InputTypeMismatch>() {
        return Classified::new(StatusCode::UNPROCESSABLE_ENTITY, error.to_string());
    }
    Classified::internal_server_error()
}
