//! The per-request state: the value cache and the stack of open scoped providers.
use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use ahash::HashMap;
use futures_util::FutureExt;
use tracing::Instrument;
use tracing_log_error::log_error;

use crate::Error;
use crate::background::BackgroundTasks;
use crate::outcome::{Failure, FailureKind};
use crate::provider::{Exit, Identity, Provider, TeardownFn, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The lifecycle of a [`RequestScope`].
pub enum ScopeState {
    /// Scoped providers can be pushed.
    Open,
    /// Scoped providers are being torn down.
    Unwinding,
    /// Every scoped provider has been torn down.
    Closed,
}

impl fmt::Display for ScopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ScopeState::Open => "open",
            ScopeState::Unwinding => "unwinding",
            ScopeState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// How a [`RequestScope`] ended.
#[derive(Debug)]
pub enum Unwound {
    /// No error was raised, nor propagated.
    Clean,
    /// An error was propagating, but a teardown step suppressed it.
    Suppressed(Failure),
    /// An error reached the outermost scope.
    Failed(Failure),
}

struct Frame {
    identity: Identity,
    value: Value,
    teardown: Arc<TeardownFn>,
}

/// The state owned by a single request.
///
/// It memoises the values of cacheable providers and keeps track of the scoped providers
/// that have been acquired, most recent last.
/// Once the request is over, [`unwind`](Self::unwind) tears them down in reverse order.
///
/// A `RequestScope` is never shared across requests.
pub struct RequestScope {
    state: ScopeState,
    cache: HashMap<Identity, Value>,
    stack: Vec<Frame>,
    background_tasks: BackgroundTasks,
    teardown_timeout: Option<Duration>,
}

impl Default for RequestScope {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestScope {
    /// Create a new, [open](ScopeState::Open), empty scope.
    pub fn new() -> Self {
        Self {
            state: ScopeState::Open,
            cache: HashMap::default(),
            stack: Vec::new(),
            background_tasks: BackgroundTasks::default(),
            teardown_timeout: None,
        }
    }

    /// Bound the duration of every teardown step.
    ///
    /// A teardown step that runs out of time is abandoned and reported as a
    /// [cancellation](FailureKind::Cancellation); unwinding then carries on with the
    /// outer scopes.
    pub fn teardown_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.teardown_timeout = timeout;
        self
    }

    pub fn state(&self) -> ScopeState {
        self.state
    }

    /// The number of scoped providers currently open.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The identities of the open scoped providers, in acquisition order.
    pub fn open_scopes(&self) -> impl Iterator<Item = &Identity> {
        self.stack.iter().map(|f| &f.identity)
    }

    /// The tasks that will run once the request is over.
    pub fn background_tasks(&self) -> &BackgroundTasks {
        &self.background_tasks
    }

    pub(crate) fn cached(&self, identity: &Identity) -> Option<&Value> {
        self.cache.get(identity)
    }

    pub(crate) fn cache(&mut self, identity: Identity, value: Value) {
        self.cache.insert(identity, value);
    }

    /// Register an acquired scoped resource.
    ///
    /// It fails if the scope is no longer open or if `provider` is not a scoped provider.
    pub fn push(&mut self, provider: &Provider, value: Value) -> Result<(), Error> {
        if self.state != ScopeState::Open {
            return Err(Error::new(errors::ScopeNotOpen {
                identity: provider.identity().clone(),
                state: self.state,
            }));
        }
        let Some(teardown) = provider.teardown() else {
            return Err(Error::new(errors::NotScoped {
                identity: provider.identity().clone(),
            }));
        };
        tracing::debug!(scopeflow.provider = %provider.identity(), depth = self.stack.len(), "Scope opened");
        self.stack.push(Frame {
            identity: provider.identity().clone(),
            value,
            teardown: teardown.clone(),
        });
        Ok(())
    }

    /// Tear down every open scoped provider, most recently acquired first.
    ///
    /// Each teardown step sees the error propagating at that point: initially `failure`,
    /// then whatever the inner teardown steps turned it into.
    /// A teardown step can let the error through, suppress it or replace it (see [`Exit`]).
    /// If it fails on its own account, its error supersedes the propagating one,
    /// which is retained as context.
    ///
    /// The scope is [closed](ScopeState::Closed) afterwards.
    /// Unwinding a scope that isn't open does nothing.
    pub async fn unwind(&mut self, failure: Option<Failure>) -> Unwound {
        if self.state != ScopeState::Open {
            tracing::warn!(state = %self.state, "Attempted to unwind a scope that is not open");
            return match failure {
                Some(failure) => Unwound::Failed(failure),
                None => Unwound::Clean,
            };
        }
        self.state = ScopeState::Unwinding;

        let mut propagating = failure;
        let mut suppressed: Option<Failure> = None;
        while let Some(Frame {
            identity,
            value,
            teardown,
        }) = self.stack.pop()
        {
            let current_error = propagating.as_ref().map(|f| f.error().clone());
            let span = tracing::debug_span!(
                "Teardown",
                scopeflow.provider = %identity,
                error.propagating = current_error.is_some()
            );
            let step = AssertUnwindSafe(teardown(value, current_error))
                .catch_unwind()
                .instrument(span);
            let result = match self.teardown_timeout {
                Some(timeout) => match tokio::time::timeout(timeout, step).await {
                    Ok(r) => settle(&identity, r),
                    Err(_) => Err((
                        FailureKind::Cancellation,
                        Error::new(errors::TeardownTimedOut {
                            identity: identity.clone(),
                            timeout,
                        }),
                    )),
                },
                None => settle(&identity, step.await),
            };

            match result {
                Ok(Exit::Propagate) => {
                    tracing::debug!(scopeflow.provider = %identity, "Scope closed");
                }
                Ok(Exit::Suppress) => {
                    if let Some(failure) = propagating.take() {
                        tracing::warn!(
                            scopeflow.provider = %identity,
                            error.message = %failure.error(),
                            "A scoped provider suppressed the propagating error"
                        );
                        suppressed = Some(failure.suppress(identity));
                    }
                }
                Ok(Exit::Replace(error)) => match propagating.as_mut() {
                    Some(failure) => {
                        tracing::debug!(
                            scopeflow.provider = %identity,
                            error.message = %error,
                            "A scoped provider replaced the propagating error"
                        );
                        failure.replace(identity, error);
                    }
                    None => {
                        propagating = Some(raise(
                            suppressed.take(),
                            FailureKind::Teardown,
                            identity,
                            error,
                        ));
                    }
                },
                Err((kind, error)) => {
                    log_error!(
                        error,
                        level: tracing::Level::WARN,
                        scopeflow.provider = %identity,
                        "A teardown step failed"
                    );
                    match propagating.as_mut() {
                        Some(failure) => failure.supersede(kind, Some(identity), error),
                        None => {
                            propagating = Some(raise(suppressed.take(), kind, identity, error));
                        }
                    }
                }
            }
        }
        self.state = ScopeState::Closed;

        match (propagating, suppressed) {
            (Some(failure), _) => Unwound::Failed(failure),
            (None, Some(failure)) => Unwound::Suppressed(failure),
            (None, None) => Unwound::Clean,
        }
    }
}

/// A panicking teardown step is a teardown failure like any other.
fn settle(
    identity: &Identity,
    result: Result<Result<Exit, Error>, Box<dyn Any + Send>>,
) -> Result<Exit, (FailureKind, Error)> {
    match result {
        Ok(r) => r.map_err(|e| (FailureKind::Teardown, e)),
        Err(payload) => Err((
            FailureKind::Teardown,
            Error::new(errors::TeardownPanicked {
                identity: identity.clone(),
                message: panic_message(payload.as_ref()),
            }),
        )),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_owned()
    }
}

/// A teardown step raised while no error was propagating.
///
/// If an earlier error had been suppressed, it is kept as context.
fn raise(
    suppressed: Option<Failure>,
    kind: FailureKind,
    origin: Identity,
    error: Error,
) -> Failure {
    let failure = Failure::new(kind, error, Some(origin));
    match suppressed {
        Some(suppressed) => failure.with_context(suppressed.error().clone()),
        None => failure,
    }
}

impl Drop for RequestScope {
    fn drop(&mut self) {
        if !self.stack.is_empty() {
            tracing::warn!(
                n_leaked = self.stack.len(),
                open_scopes = ?self.stack.iter().map(|f| f.identity.as_str()).collect::<Vec<_>>(),
                "A request scope was dropped without unwinding it: its scoped providers were never torn down"
            );
        }
    }
}

impl fmt::Debug for RequestScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestScope")
            .field("state", &self.state)
            .field("open_scopes", &self.open_scopes().collect::<Vec<_>>())
            .field("n_cached", &self.cache.len())
            .finish()
    }
}

/// Errors that can occur when manipulating a [`RequestScope`](super::RequestScope).
pub mod errors {
    use std::time::Duration;

    use super::ScopeState;
    use crate::provider::Identity;

    #[derive(Debug, thiserror::Error)]
    #[error("`{identity}` can't be pushed onto a scope that is {state}")]
    /// The error returned by [`RequestScope::push`](super::RequestScope::push)
    /// once unwinding has started.
    pub struct ScopeNotOpen {
        pub identity: Identity,
        pub state: ScopeState,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("`{identity}` is not a scoped provider, it has no teardown step")]
    /// The error returned by [`RequestScope::push`](super::RequestScope::push)
    /// for a value provider.
    pub struct NotScoped {
        pub identity: Identity,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("The teardown step of `{identity}` panicked: {message}")]
    /// A teardown step panicked.
    pub struct TeardownPanicked {
        pub identity: Identity,
        pub message: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("The teardown step of `{identity}` did not complete within {timeout:?}")]
    /// A teardown step ran out of time.
    pub struct TeardownTimedOut {
        pub identity: Identity,
        pub timeout: Duration,
    }
}
