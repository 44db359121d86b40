use scopeflow::Outcome;

use crate::fields::{
    SCOPEFLOW_ENDPOINT, SCOPEFLOW_FAILURE_INTERCEPTED_BY, SCOPEFLOW_FAILURE_KIND,
    SCOPEFLOW_FAILURE_ORIGIN, SCOPEFLOW_OUTCOME, error_message, scopeflow_endpoint,
    scopeflow_failure_intercepted_by, scopeflow_failure_kind, scopeflow_failure_origin,
    scopeflow_outcome,
};

/// `RootSpan` is the top-level *logical* [`tracing::Span`] for a request.
///
/// The root span should contain enough information, on its own, to determine
/// what happened to a request.
/// Instrument [`Endpoint::call`](scopeflow::Endpoint::call) with it, then
/// [record the outcome](RootSpan::record_outcome) once the call completes:
///
/// ```rust
/// use scopeflow::{Blueprint, Error, Inputs};
/// use scopeflow_tracing::RootSpan;
/// use tracing::Instrument;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let mut bp = Blueprint::new();
/// bp.endpoint("health_check", |_| async { Ok::<_, Error>("OK") });
/// let app = bp.build().unwrap();
///
/// let endpoint = app.endpoint("health_check").unwrap();
/// let root_span = RootSpan::for_endpoint(endpoint.name());
/// let completion = endpoint
///     .call(Inputs::empty())
///     .instrument(root_span.inner().clone())
///     .await;
/// root_span.record_outcome(completion.outcome());
/// # }
/// ```
///
/// Every field of a `Span` must be declared when the `Span` is created.
/// [`RootSpan::for_endpoint`] declares the outcome and failure fields upfront, leaving them
/// empty until [`RootSpan::record_outcome`] is called.
/// If you need extra fields, create the span yourself and wrap it with [`RootSpan::new`].
#[derive(Debug, Clone)]
pub struct RootSpan(tracing::Span);

impl std::ops::Deref for RootSpan {
    type Target = tracing::Span;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl RootSpan {
    /// Create a new [`RootSpan`] from a [`tracing::Span`].
    pub fn new(span: tracing::Span) -> Self {
        Self(span)
    }

    /// Create the conventional root span for a request to `endpoint`.
    pub fn for_endpoint(endpoint: &str) -> Self {
        let span = tracing::info_span!(
            "Request",
            { SCOPEFLOW_ENDPOINT } = scopeflow_endpoint(endpoint),
            { SCOPEFLOW_OUTCOME } = tracing::field::Empty,
            { SCOPEFLOW_FAILURE_KIND } = tracing::field::Empty,
            { SCOPEFLOW_FAILURE_ORIGIN } = tracing::field::Empty,
            { SCOPEFLOW_FAILURE_INTERCEPTED_BY } = tracing::field::Empty,
            { crate::fields::ERROR_MESSAGE } = tracing::field::Empty,
        );
        Self(span)
    }

    /// Record the outcome of the request, and the details of its failure if any.
    pub fn record_outcome<T>(&self, outcome: &Outcome<T>) {
        self.0.record(SCOPEFLOW_OUTCOME, scopeflow_outcome(outcome));
        if let Some(failure) = outcome.failure() {
            self.0
                .record(SCOPEFLOW_FAILURE_KIND, scopeflow_failure_kind(failure));
            self.0
                .record(SCOPEFLOW_FAILURE_ORIGIN, scopeflow_failure_origin(failure));
            self.0.record(
                SCOPEFLOW_FAILURE_INTERCEPTED_BY,
                scopeflow_failure_intercepted_by(failure),
            );
            self.0
                .record(crate::fields::ERROR_MESSAGE, error_message(failure.error()));
        }
    }

    /// Get a reference to the underlying [`tracing::Span`].
    pub fn inner(&self) -> &tracing::Span {
        &self.0
    }

    /// Deconstruct the root span into its underlying [`tracing::Span`].
    pub fn into_inner(self) -> tracing::Span {
        self.0
    }
}
