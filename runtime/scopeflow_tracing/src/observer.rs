use scopeflow::Failure;
use tracing_log_error::log_error;

use crate::fields::{
    scopeflow_endpoint, scopeflow_failure_intercepted_by, scopeflow_failure_kind,
    scopeflow_failure_origin,
};

/// An error observer that logs every failure, with its full error context.
///
/// Failed requests are logged at `ERROR` level, suppressed ones at `WARN` level.
/// Every error superseded along the way is logged too, at `DEBUG` level.
///
/// Register it via [`Blueprint::error_observer`](scopeflow::Blueprint::error_observer):
///
/// ```rust
/// use scopeflow::Blueprint;
///
/// let mut bp = Blueprint::<()>::new();
/// bp.error_observer(scopeflow_tracing::log_failure);
/// ```
pub fn log_failure(endpoint: &str, failure: &Failure) {
    let level = if failure.was_suppressed() {
        tracing::Level::WARN
    } else {
        tracing::Level::ERROR
    };
    let error = failure.error();
    if level == tracing::Level::WARN {
        log_error!(
            error,
            level: tracing::Level::WARN,
            scopeflow.endpoint = scopeflow_endpoint(endpoint),
            scopeflow.failure.kind = scopeflow_failure_kind(failure),
            scopeflow.failure.origin = scopeflow_failure_origin(failure),
            scopeflow.failure.intercepted_by = scopeflow_failure_intercepted_by(failure),
            "A request failure was suppressed"
        );
    } else {
        log_error!(
            error,
            scopeflow.endpoint = scopeflow_endpoint(endpoint),
            scopeflow.failure.kind = scopeflow_failure_kind(failure),
            scopeflow.failure.origin = scopeflow_failure_origin(failure),
            scopeflow.failure.intercepted_by = scopeflow_failure_intercepted_by(failure),
            "A request failed"
        );
    }
    for superseded in failure.context() {
        log_error!(
            superseded,
            level: tracing::Level::DEBUG,
            scopeflow.endpoint = scopeflow_endpoint(endpoint),
            "An earlier error was superseded while unwinding"
        );
    }
}
