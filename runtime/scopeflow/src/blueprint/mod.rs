//! Register endpoints and their dependencies, then build them into an [`Application`].
//!
//! A [`Blueprint`] mirrors the layered way dependencies are declared:
//!
//! - dependencies registered on the root blueprint apply to every endpoint;
//! - dependencies registered on a [nested](Blueprint::nest) blueprint apply to the endpoints
//!   registered on it (or on its own nested blueprints);
//! - dependencies registered on an endpoint apply to that endpoint alone;
//! - parameters are the dependencies whose values the endpoint handler consumes.
use std::future::Future;
use std::sync::Arc;

use ahash::HashSet;
use futures_util::FutureExt;
use tracing_log_error::log_error;

pub use application::{Application, Completion, Endpoint, errors};

use crate::classify::{ErrorClassifier, ExceptionHandlers};
use crate::config::EngineConfig;
use crate::outcome::Failure;
use crate::plan::errors::{CompositionError, DuplicateEndpoint};
use crate::plan::{Layers, compose};
use crate::provider::{Location, Provider};
use crate::resolve::Resolved;
use crate::Error;
use application::{EndpointInner, HandlerFn};

mod application;

pub(crate) type ErrorObserver = Arc<dyn Fn(&str, &Failure) + Send + Sync>;

/// The starting point for assembling an [`Application`].
///
/// `R` is the type returned by the endpoint handlers.
///
/// # Example
///
/// ```rust
/// use scopeflow::{Blueprint, Error, Inputs, Provider};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let token = Provider::value("token", |_, inputs| async move {
///     Ok::<_, Error>(inputs.require::<String>("x_token")?.to_string())
/// });
///
/// let mut bp = Blueprint::new();
/// bp.endpoint("read_items", |resolved| async move {
///     let token = resolved.param::<String>(0)?;
///     Ok::<_, Error>(format!("Items for {token}"))
/// })
/// .param(&token);
///
/// let app = bp.build().unwrap();
/// let inputs = Inputs::builder().insert("x_token", "fake-super-secret-token".to_string()).build();
/// let completion = app.endpoint("read_items").unwrap().call(inputs).await;
/// assert_eq!(
///     completion.into_outcome().success().as_deref(),
///     Some("Items for fake-super-secret-token")
/// );
/// # }
/// ```
pub struct Blueprint<R> {
    creation_location: Location,
    dependencies: Vec<Provider>,
    endpoints: Vec<EndpointDeclaration<R>>,
    nested: Vec<Blueprint<R>>,
    error_observers: Vec<ErrorObserver>,
    classifier: Option<Arc<dyn ErrorClassifier>>,
    config: Option<EngineConfig>,
}

struct EndpointDeclaration<R> {
    name: String,
    handler: Arc<HandlerFn<R>>,
    operation: Vec<Provider>,
    parameters: Vec<Provider>,
    registered_at: Location,
}

impl<R> Default for Blueprint<R>
where
    R: Send + 'static,
{
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Blueprint<R>
where
    R: Send + 'static,
{
    #[track_caller]
    /// Create a new [`Blueprint`].
    pub fn new() -> Self {
        Self {
            creation_location: Location::caller(),
            dependencies: Vec::new(),
            endpoints: Vec::new(),
            nested: Vec::new(),
            error_observers: Vec::new(),
            classifier: None,
            config: None,
        }
    }

    /// Register a dependency at this blueprint's level.
    ///
    /// It will be resolved for every endpoint registered on this blueprint
    /// or on the blueprints nested under it, before their own dependencies.
    pub fn dependency(&mut self, provider: &Provider) -> &mut Self {
        self.dependencies.push(provider.clone());
        self
    }

    #[track_caller]
    /// Register an endpoint.
    ///
    /// The handler receives the [`Resolved`] values once every dependency has been
    /// resolved. Use [`RegisteredEndpoint::param`] to declare the values it consumes.
    pub fn endpoint<F, Fut, E>(&mut self, name: impl Into<String>, handler: F) -> RegisteredEndpoint<'_, R>
    where
        F: Fn(Resolved) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let handler: Arc<HandlerFn<R>> = Arc::new(move |resolved: Resolved| {
            handler(resolved).map(|r| r.map_err(Error::new)).boxed()
        });
        self.endpoints.push(EndpointDeclaration {
            name: name.into(),
            handler,
            operation: Vec::new(),
            parameters: Vec::new(),
            registered_at: Location::caller(),
        });
        let index = self.endpoints.len() - 1;
        RegisteredEndpoint {
            declaration: &mut self.endpoints[index],
        }
    }

    /// Nest a blueprint under this one.
    ///
    /// Its dependencies form a new group layer for the endpoints it contains,
    /// composed after the dependencies of this blueprint.
    /// The error observers of this blueprint also apply to the nested endpoints.
    pub fn nest(&mut self, blueprint: Blueprint<R>) -> &mut Self {
        self.nested.push(blueprint);
        self
    }

    /// Register an error observer.
    ///
    /// It is invoked with the endpoint name and the failure for every request that didn't
    /// succeed, once unwinding is over. That includes suppressed failures.
    pub fn error_observer<F>(&mut self, observer: F) -> &mut Self
    where
        F: Fn(&str, &Failure) + Send + Sync + 'static,
    {
        self.error_observers.push(Arc::new(observer));
        self
    }

    /// Set the classifier used for endpoints registered on this blueprint
    /// and on the blueprints nested under it, unless they set their own.
    ///
    /// It defaults to an empty set of [`ExceptionHandlers`].
    pub fn classifier(&mut self, classifier: impl ErrorClassifier) -> &mut Self {
        self.classifier = Some(Arc::new(classifier));
        self
    }

    /// Set the engine configuration.
    ///
    /// Only the root blueprint's configuration is taken into account.
    pub fn config(&mut self, config: EngineConfig) -> &mut Self {
        self.config = Some(config);
        self
    }

    /// Where this blueprint was created.
    pub fn creation_location(&self) -> &Location {
        &self.creation_location
    }

    /// Compose the execution plan of every endpoint.
    ///
    /// It fails if any endpoint can't be composed, or if two endpoints share the same name.
    pub fn build(self) -> Result<Application<R>, CompositionError> {
        let config = Arc::new(self.config.clone().unwrap_or_default());
        let classifier = self
            .classifier
            .clone()
            .unwrap_or_else(|| Arc::new(ExceptionHandlers::new()));
        let mut builder = ApplicationBuilder {
            global: self.dependencies.clone(),
            config,
            names: HashSet::default(),
            endpoints: Vec::new(),
        };
        builder.visit(self, &mut Vec::new(), &[], &classifier, true)?;
        tracing::debug!(n_endpoints = builder.endpoints.len(), "Application built");
        Ok(Application::new(builder.endpoints))
    }
}

struct ApplicationBuilder<R> {
    global: Vec<Provider>,
    config: Arc<EngineConfig>,
    names: HashSet<String>,
    endpoints: Vec<Endpoint<R>>,
}

impl<R> ApplicationBuilder<R>
where
    R: Send + 'static,
{
    fn visit(
        &mut self,
        blueprint: Blueprint<R>,
        groups: &mut Vec<Vec<Provider>>,
        inherited_observers: &[ErrorObserver],
        inherited_classifier: &Arc<dyn ErrorClassifier>,
        is_root: bool,
    ) -> Result<(), CompositionError> {
        let Blueprint {
            creation_location,
            dependencies,
            endpoints,
            nested,
            error_observers,
            classifier,
            config,
        } = blueprint;
        if !is_root {
            if config.is_some() {
                tracing::warn!(
                    blueprint.created_at = %creation_location,
                    "The configuration of a nested blueprint is ignored"
                );
            }
            groups.push(dependencies);
        }
        let observers: Vec<ErrorObserver> = inherited_observers
            .iter()
            .chain(error_observers.iter())
            .cloned()
            .collect();
        let classifier = classifier.unwrap_or_else(|| inherited_classifier.clone());

        for declaration in endpoints {
            if !self.names.insert(declaration.name.clone()) {
                return Err(DuplicateEndpoint {
                    name: declaration.name,
                }
                .into());
            }
            let layers = Layers {
                global: self.global.clone(),
                group: groups.clone(),
                operation: declaration.operation,
                parameters: declaration.parameters,
            };
            let plan = compose(&layers).inspect_err(|e| {
                log_error!(
                    e,
                    scopeflow.endpoint = %declaration.name,
                    endpoint.registered_at = %declaration.registered_at,
                    "Failed to compose the execution plan of an endpoint"
                );
            })?;
            self.endpoints.push(Endpoint::new(EndpointInner {
                name: declaration.name,
                plan,
                handler: declaration.handler,
                observers: observers.clone(),
                classifier: classifier.clone(),
                config: self.config.clone(),
                registered_at: declaration.registered_at,
            }));
        }

        for blueprint in nested {
            self.visit(blueprint, groups, &observers, &classifier, false)?;
        }
        if !is_root {
            groups.pop();
        }
        Ok(())
    }
}

/// The type returned by [`Blueprint::endpoint`].
///
/// It allows you to declare the dependencies of the endpoint.
pub struct RegisteredEndpoint<'a, R> {
    declaration: &'a mut EndpointDeclaration<R>,
}

impl<R> RegisteredEndpoint<'_, R> {
    /// Append a parameter.
    ///
    /// Its value is available to the handler via [`Resolved::param`],
    /// using the position it was registered at.
    pub fn param(self, provider: &Provider) -> Self {
        self.declaration.parameters.push(provider.clone());
        self
    }

    /// Register an operation-level dependency.
    ///
    /// It is resolved before the parameters, even though the handler doesn't consume it directly.
    /// Its value is still available via [`Resolved::get`].
    pub fn dependency(self, provider: &Provider) -> Self {
        self.declaration.operation.push(provider.clone());
        self
    }
}
