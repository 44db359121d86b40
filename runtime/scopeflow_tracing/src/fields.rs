//! Utilities to log `scopeflow` resources with consistent naming and representations.
//!
//! For each resource, this module exposes:
//!
//! - A constant holding the conventional field name used when logging that resource
//! - A function to compute the conventional log representation of that resource
//!
//! For example, you have [`SCOPEFLOW_FAILURE_KIND`] and [`scopeflow_failure_kind`] for the
//! `scopeflow.failure.kind` field.
use scopeflow::{Failure, Identity, Outcome};
use tracing::Value;

// Re-export error-related logging fields and the functions to set them.
pub use tracing_log_error::fields::*;

/// The field name for the name of the endpoint processing the request.
///
/// Use [`scopeflow_endpoint`] to populate the field.
pub const SCOPEFLOW_ENDPOINT: &str = "scopeflow.endpoint";

/// The field name for the identity of a dependency provider.
///
/// Use [`scopeflow_provider`] to populate the field.
pub const SCOPEFLOW_PROVIDER: &str = "scopeflow.provider";

/// The field name for the outcome of a request: `success`, `suppressed` or `failed`.
///
/// Use [`scopeflow_outcome`] to populate the field.
pub const SCOPEFLOW_OUTCOME: &str = "scopeflow.outcome";

/// The field name for the kind of failure: `resolution`, `handler`, `teardown` or `cancellation`.
///
/// Use [`scopeflow_failure_kind`] to populate the field.
pub const SCOPEFLOW_FAILURE_KIND: &str = "scopeflow.failure.kind";

/// The field name for the identity of the provider that raised the final error, if any.
///
/// Use [`scopeflow_failure_origin`] to populate the field.
pub const SCOPEFLOW_FAILURE_ORIGIN: &str = "scopeflow.failure.origin";

/// The field name for the scoped providers that replaced or suppressed the propagating error.
///
/// Use [`scopeflow_failure_intercepted_by`] to populate the field.
pub const SCOPEFLOW_FAILURE_INTERCEPTED_BY: &str = "scopeflow.failure.intercepted_by";

/// The canonical representation for the value in [`SCOPEFLOW_ENDPOINT`].
pub fn scopeflow_endpoint(name: &str) -> impl Value + '_ {
    name
}

/// The canonical representation for the value in [`SCOPEFLOW_PROVIDER`].
pub fn scopeflow_provider(identity: &Identity) -> impl Value + '_ {
    identity.as_str()
}

/// The canonical representation for the value in [`SCOPEFLOW_OUTCOME`].
pub fn scopeflow_outcome<T>(outcome: &Outcome<T>) -> impl Value + use<T> {
    match outcome {
        Outcome::Success(_) => "success",
        Outcome::Suppressed(_) => "suppressed",
        Outcome::Failed(_) => "failed",
    }
}

/// The canonical representation for the value in [`SCOPEFLOW_FAILURE_KIND`].
pub fn scopeflow_failure_kind(failure: &Failure) -> impl Value + use<> {
    failure.kind().as_str()
}

/// The canonical representation for the value in [`SCOPEFLOW_FAILURE_ORIGIN`].
///
/// It's empty if the failure didn't originate from a provider.
pub fn scopeflow_failure_origin(failure: &Failure) -> impl Value + '_ {
    failure.origin().map(|i| i.as_str()).unwrap_or_default()
}

/// The canonical representation for the value in [`SCOPEFLOW_FAILURE_INTERCEPTED_BY`].
///
/// The identities are comma-separated, in the order they intercepted the error.
pub fn scopeflow_failure_intercepted_by(failure: &Failure) -> impl Value + use<> {
    tracing::field::display(
        failure
            .intercepted_by()
            .iter()
            .map(|i| i.as_str())
            .collect::<Vec<_>>()
            .join(","),
    )
}
