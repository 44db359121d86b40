use std::sync::Arc;

use futures_util::future::BoxFuture;
use indexmap::IndexMap;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::ErrorObserver;
use crate::background::BackgroundTasks;
use crate::classify::{Classified, ErrorClassifier};
use crate::config::EngineConfig;
use crate::inputs::Inputs;
use crate::outcome::{Failure, Outcome};
use crate::plan::ExecutionPlan;
use crate::provider::Location;
use crate::resolve::{Resolved, resolve};
use crate::scope::{RequestScope, Unwound};
use crate::Error;

pub(crate) type HandlerFn<R> =
    dyn Fn(Resolved) -> BoxFuture<'static, Result<R, Error>> + Send + Sync;

/// A set of endpoints, each with its own pre-composed execution plan.
///
/// Built via [`Blueprint::build`](super::Blueprint::build).
pub struct Application<R> {
    endpoints: IndexMap<String, Endpoint<R>>,
}

impl<R> Application<R> {
    pub(super) fn new(endpoints: Vec<Endpoint<R>>) -> Self {
        Self {
            endpoints: endpoints
                .into_iter()
                .map(|e| (e.name().to_owned(), e))
                .collect(),
        }
    }

    /// Look up an endpoint by name.
    pub fn endpoint(&self, name: &str) -> Option<&Endpoint<R>> {
        self.endpoints.get(name)
    }

    /// All endpoints, in registration order (depth-first across nested blueprints).
    pub fn endpoints(&self) -> impl Iterator<Item = &Endpoint<R>> {
        self.endpoints.values()
    }
}

impl<R> std::fmt::Debug for Application<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application")
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A registered endpoint, ready to process requests.
///
/// Cloning is cheap, and an endpoint can process any number of concurrent requests:
/// each call gets its own [`RequestScope`].
pub struct Endpoint<R>(Arc<EndpointInner<R>>);

impl<R> Clone for Endpoint<R> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

pub(crate) struct EndpointInner<R> {
    pub(crate) name: String,
    pub(crate) plan: ExecutionPlan,
    pub(crate) handler: Arc<HandlerFn<R>>,
    pub(crate) observers: Vec<ErrorObserver>,
    pub(crate) classifier: Arc<dyn ErrorClassifier>,
    pub(crate) config: Arc<EngineConfig>,
    pub(crate) registered_at: Location,
}

impl<R> Endpoint<R> {
    pub(super) fn new(inner: EndpointInner<R>) -> Self {
        Self(Arc::new(inner))
    }

    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn plan(&self) -> &ExecutionPlan {
        &self.0.plan
    }

    /// Where the endpoint was registered.
    pub fn registered_at(&self) -> &Location {
        &self.0.registered_at
    }
}

impl<R> Endpoint<R>
where
    R: Send + 'static,
{

    /// Process a request.
    pub async fn call(&self, inputs: Inputs) -> Completion<R> {
        self.call_with_cancellation(inputs, CancellationToken::new())
            .await
    }

    /// Process a request that can be cancelled by the caller.
    ///
    /// Cancellation only interrupts resolution and the endpoint handler.
    /// It is reported as a [cancellation failure](crate::FailureKind::Cancellation)
    /// and every scoped provider that was already acquired is torn down, as usual.
    pub async fn call_with_cancellation(
        &self,
        inputs: Inputs,
        cancellation: CancellationToken,
    ) -> Completion<R> {
        let inner = &*self.0;
        let span = tracing::debug_span!("Process request", scopeflow.endpoint = %inner.name);
        async move {
            let mut scope = RequestScope::new().teardown_timeout(inner.config.teardown_timeout);
            let background_tasks = scope.background_tasks().clone();

            let result = {
                let work = run(inner, &inputs, &mut scope);
                let resolution_timeout = inner.config.resolution_timeout;
                let work = async move {
                    match resolution_timeout {
                        Some(timeout) => tokio::time::timeout(timeout, work)
                            .await
                            .unwrap_or_else(|_| {
                                Err(Failure::cancellation(Error::new(
                                    errors::RequestTimedOut { timeout },
                                )))
                            }),
                        None => work.await,
                    }
                };
                tokio::select! {
                    biased;
                    _ = cancellation.cancelled() => {
                        tracing::debug!("Request cancelled");
                        Err(Failure::cancellation(Error::new(errors::RequestCancelled)))
                    }
                    result = work => result,
                }
            };

            let outcome = match result {
                Ok(value) => match scope.unwind(None).await {
                    Unwound::Clean => Outcome::Success(value),
                    Unwound::Suppressed(failure) => Outcome::Suppressed(failure),
                    Unwound::Failed(failure) => Outcome::Failed(failure),
                },
                Err(failure) => {
                    let trigger = failure.clone();
                    match scope.unwind(Some(failure)).await {
                        Unwound::Suppressed(failure) => Outcome::Suppressed(failure),
                        Unwound::Failed(failure) => Outcome::Failed(failure),
                        // Unwinding with a failure in flight can't end cleanly.
                        Unwound::Clean => Outcome::Failed(trigger),
                    }
                }
            };

            if let Some(failure) = outcome.failure() {
                for observer in &inner.observers {
                    observer(&inner.name, failure);
                }
            }

            Completion {
                outcome,
                background_tasks,
                classifier: inner.classifier.clone(),
                run_on_suppressed: inner.config.run_background_tasks_on_suppressed,
            }
        }
        .instrument(span)
        .await
    }
}

async fn run<R>(
    inner: &EndpointInner<R>,
    inputs: &Inputs,
    scope: &mut RequestScope,
) -> Result<R, Failure> {
    let resolved = resolve(&inner.plan, inputs, scope).await?;
    let span = tracing::debug_span!("Invoke handler", scopeflow.endpoint = %inner.name);
    (inner.handler)(resolved)
        .instrument(span)
        .await
        .map_err(Failure::handler)
}

/// What's left once a request has been processed and every scope has been closed.
#[must_use = "Background tasks only run if you invoke `run_background_tasks`"]
pub struct Completion<R> {
    outcome: Outcome<R>,
    background_tasks: BackgroundTasks,
    classifier: Arc<dyn ErrorClassifier>,
    run_on_suppressed: bool,
}

impl<R> Completion<R> {
    pub fn outcome(&self) -> &Outcome<R> {
        &self.outcome
    }

    /// Drop the completion, keeping only the outcome.
    ///
    /// Pending background tasks are discarded.
    pub fn into_outcome(self) -> Outcome<R> {
        self.outcome
    }

    pub fn background_tasks(&self) -> &BackgroundTasks {
        &self.background_tasks
    }

    /// Classify the failure, using the classifier the endpoint was registered with.
    ///
    /// It returns `None` unless the outcome is [`Outcome::Failed`].
    pub fn classify(&self) -> Option<Classified> {
        match &self.outcome {
            Outcome::Failed(failure) => Some(self.classifier.classify(failure)),
            Outcome::Success(_) | Outcome::Suppressed(_) => None,
        }
    }

    /// Run the background tasks enqueued while processing the request.
    ///
    /// They only run if the request succeeded, or if it was suppressed and the engine is
    /// configured to run them in that case. Otherwise they are discarded.
    ///
    /// Returns `true` if the tasks were executed.
    pub async fn run_background_tasks(&self) -> bool {
        let should_run = match &self.outcome {
            Outcome::Success(_) => true,
            Outcome::Suppressed(_) => self.run_on_suppressed,
            Outcome::Failed(_) => false,
        };
        if should_run {
            let n_failed = self.background_tasks.run().await;
            if n_failed > 0 {
                tracing::warn!(n_failed, "Some background tasks failed");
            }
        } else {
            let n_discarded = self.background_tasks.discard();
            tracing::debug!(n_discarded, "Background tasks discarded");
        }
        should_run
    }
}

impl<R> std::fmt::Debug for Completion<R>
where
    R: std::fmt::Debug,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Completion")
            .field("outcome", &self.outcome)
            .field("background_tasks", &self.background_tasks)
            .finish_non_exhaustive()
    }
}

/// Errors reported as cancellations by [`Endpoint`].
pub mod errors {
    use std::time::Duration;

    #[derive(Debug, thiserror::Error)]
    #[error("The request was cancelled")]
    pub struct RequestCancelled;

    #[derive(Debug, thiserror::Error)]
    #[error("The request did not complete within {timeout:?}")]
    pub struct RequestTimedOut {
        pub timeout: Duration,
    }
}
