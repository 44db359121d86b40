use std::sync::Arc;

use tracing::Instrument;

use crate::background::BackgroundTasks;
use crate::inputs::{Dependencies, Inputs, downcast, errors::UnknownDependency};
use crate::outcome::Failure;
use crate::plan::ExecutionPlan;
use crate::provider::{Kind, Provider, Value};
use crate::scope::{RequestScope, ScopeState, errors::ScopeNotOpen};
use crate::Error;

/// Resolve every step of `plan` against `scope`.
///
/// Steps run sequentially, in plan order.
/// A cacheable declaration already present in the scope's cache is not executed again;
/// a scoped declaration is pushed onto the scope as soon as it is acquired.
///
/// Resolution stops at the first failing producer. The scope is left untouched past that
/// point: the caller is expected to [`unwind`](RequestScope::unwind) it, passing the failure
/// along.
///
/// A scope that is no longer [open](ScopeState::Open) is rejected before any producer runs:
/// a resource acquired there could never be torn down.
pub async fn resolve(
    plan: &ExecutionPlan,
    inputs: &Inputs,
    scope: &mut RequestScope,
) -> Result<Resolved, Failure> {
    if scope.state() != ScopeState::Open {
        if let Some(first) = plan.steps().first() {
            let identity = first.identity().clone();
            let error = Error::new(ScopeNotOpen {
                identity: identity.clone(),
                state: scope.state(),
            });
            tracing::warn!(state = %scope.state(), "Attempted to resolve against a scope that is not open");
            return Err(Failure::resolution(identity, error));
        }
    }
    let mut values: Vec<Value> = Vec::with_capacity(plan.len());
    for step in plan.steps() {
        let provider = step.provider();
        let identity = provider.identity();
        if provider.is_cacheable() {
            if let Some(value) = scope.cached(identity) {
                tracing::trace!(scopeflow.provider = %identity, "Reusing a cached value");
                values.push(value.clone());
                continue;
            }
        }

        let dependencies = Dependencies::new(
            step.inputs()
                .iter()
                .map(|&i| (plan.steps()[i].identity().clone(), values[i].clone()))
                .collect(),
            scope.background_tasks().clone(),
        );
        let span = tracing::debug_span!(
            "Resolve dependency",
            scopeflow.provider = %identity,
            scopeflow.provider.kind = ?provider.kind(),
        );
        let value = match provider
            .produce(dependencies, inputs.clone())
            .instrument(span)
            .await
        {
            Ok(value) => value,
            Err(e) => {
                tracing::debug!(scopeflow.provider = %identity, error.message = %e, "Resolution failed");
                return Err(Failure::resolution(identity.clone(), e));
            }
        };
        if provider.kind() == Kind::Scoped {
            scope
                .push(provider, value.clone())
                .map_err(|e| Failure::resolution(identity.clone(), e))?;
        }
        if provider.is_cacheable() {
            scope.cache(identity.clone(), value.clone());
        }
        values.push(value);
    }

    Ok(Resolved {
        plan: plan.clone(),
        values,
        background_tasks: scope.background_tasks().clone(),
    })
}

/// The values resolved for an [`ExecutionPlan`], handed over to the endpoint handler.
pub struct Resolved {
    plan: ExecutionPlan,
    values: Vec<Value>,
    background_tasks: BackgroundTasks,
}

impl Resolved {
    /// The value produced by `provider`.
    ///
    /// For a non-cacheable declaration, it's the value produced by its first invocation.
    pub fn get<T>(&self, provider: &Provider) -> Result<Arc<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        let Some(index) = self.plan.step_of(provider.identity()) else {
            return Err(Error::new(UnknownDependency {
                reference: provider.identity().to_string(),
            }));
        };
        downcast(provider.identity(), &self.values[index])
    }

    /// The value of the `index`-th endpoint parameter.
    pub fn param<T>(&self, index: usize) -> Result<Arc<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        let Some(&step) = self.plan.parameters().get(index) else {
            return Err(Error::new(UnknownDependency {
                reference: format!("parameter #{index}"),
            }));
        };
        downcast(self.plan.steps()[step].identity(), &self.values[step])
    }

    /// `true` if `provider` was part of the resolution.
    pub fn contains(&self, provider: &Provider) -> bool {
        self.plan.step_of(provider.identity()).is_some()
    }

    /// The tasks that will run once the request is over.
    pub fn background_tasks(&self) -> &BackgroundTasks {
        &self.background_tasks
    }
}

impl std::fmt::Debug for Resolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resolved")
            .field("plan", &self.plan)
            .finish_non_exhaustive()
    }
}
