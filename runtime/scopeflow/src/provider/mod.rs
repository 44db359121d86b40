//! Declare the dependencies that can be resolved for an incoming request.
//!
//! A [`Provider`] is a pure description: building one never runs its producer.
//! Providers come in two flavours, captured by [`Kind`]:
//!
//! - [`Provider::value`], a plain value computed out of its sub-dependencies
//!   and the request inputs;
//! - [`Provider::scoped`], a resource that is acquired while resolving the request
//!   and released, via its teardown step, once the request is over.
use std::any::Any;
use std::future::Future;
use std::sync::Arc;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;

pub use identity::{Identity, Location};

use crate::Error;
use crate::inputs::{Dependencies, Inputs};

mod identity;

/// A type-erased value produced by a provider.
pub type Value = Arc<dyn Any + Send + Sync>;

pub(crate) type ProduceFn =
    dyn Fn(Dependencies, Inputs) -> BoxFuture<'static, Result<Value, Error>> + Send + Sync;
pub(crate) type TeardownFn =
    dyn Fn(Value, Option<Error>) -> BoxFuture<'static, Result<Exit, Error>> + Send + Sync;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
/// The capabilities of a provider.
pub enum Kind {
    /// The producer returns a value. Nothing happens when the request ends.
    Value,
    /// The producer acquires a resource. Its teardown step is invoked when the request
    /// unwinds, in reverse acquisition order.
    Scoped,
}

/// The decision taken by a teardown step about the error that is propagating
/// through the request, if any.
///
/// A teardown step that fails on its own account should return `Err` instead:
/// its error supersedes the propagating one, which is kept as context.
#[derive(Debug, Clone)]
pub enum Exit {
    /// Let the propagating error (if any) continue, unchanged, towards the outer scopes.
    ///
    /// It is also the expected answer on a clean exit.
    Propagate,
    /// Swallow the propagating error.
    ///
    /// The outer scopes will see no error at all.
    Suppress,
    /// Translate the propagating error into a different one.
    Replace(Error),
}

/// A dependency declaration.
///
/// It is a cheap handle: clone it to reference the same declaration from multiple
/// dependents, layers or endpoints.
///
/// # Example
///
/// ```rust
/// use scopeflow::{Exit, Provider};
///
/// # struct Connection;
/// # impl Connection { fn close(&self) {} }
/// let db = Provider::scoped(
///     "db",
///     |_, _| async { Ok::<_, std::io::Error>(Connection) },
///     |conn, _error| async move {
///         conn.close();
///         Ok::<_, std::io::Error>(Exit::Propagate)
///     },
/// );
/// let token = Provider::value("token", |_, inputs| async move {
///     Ok::<_, scopeflow::Error>(inputs.require::<String>("x_token")?.to_string())
/// });
/// let user = Provider::value("user", |deps, _| async move {
///     let token = deps.get::<String>(1)?;
///     Ok::<_, scopeflow::Error>(format!("{token}-decoded"))
/// })
/// .depends_on(&db)
/// .depends_on(&token);
/// ```
#[derive(Clone)]
pub struct Provider(Arc<Declaration>);

#[derive(Clone)]
struct Declaration {
    identity: Identity,
    kind: Kind,
    cacheable: bool,
    dependencies: Vec<Provider>,
    produce: Arc<ProduceFn>,
    teardown: Option<Arc<TeardownFn>>,
    declared_at: Location,
    output_type: &'static str,
}

impl Provider {
    #[track_caller]
    /// Declare a [`Kind::Value`] provider.
    ///
    /// The producer receives the values of its sub-dependencies, in the order they were
    /// declared via [`depends_on`](Self::depends_on), and the raw request inputs.
    pub fn value<T, E, F, Fut>(identity: impl Into<Identity>, producer: F) -> Self
    where
        F: Fn(Dependencies, Inputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + Sync + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::new(
            identity.into(),
            Kind::Value,
            erase_producer(producer),
            None,
            Location::caller(),
            std::any::type_name::<T>(),
        )
    }

    #[track_caller]
    /// Declare a [`Kind::Scoped`] provider.
    ///
    /// `acquire` produces the resource. `teardown` receives it back when the request
    /// unwinds, together with the error propagating at that point (if any), and decides
    /// what should happen to that error via [`Exit`].
    pub fn scoped<T, E, F, Fut, D, DFut, DE>(
        identity: impl Into<Identity>,
        acquire: F,
        teardown: D,
    ) -> Self
    where
        F: Fn(Dependencies, Inputs) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + Sync + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
        D: Fn(Arc<T>, Option<Error>) -> DFut + Send + Sync + 'static,
        DFut: Future<Output = Result<Exit, DE>> + Send + 'static,
        DE: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let erased: Arc<TeardownFn> = Arc::new(move |value: Value, error: Option<Error>| {
            match value.downcast::<T>() {
                Ok(value) => teardown(value, error).map(|r| r.map_err(Error::new)).boxed(),
                Err(_) => {
                    let e = Error::msg(format!(
                        "The scoped value handed back for teardown is not a `{}`",
                        std::any::type_name::<T>()
                    ));
                    futures_util::future::ready(Err(e)).boxed()
                }
            }
        });
        Self::new(
            identity.into(),
            Kind::Scoped,
            erase_producer(acquire),
            Some(erased),
            Location::caller(),
            std::any::type_name::<T>(),
        )
    }

    fn new(
        identity: Identity,
        kind: Kind,
        produce: Arc<ProduceFn>,
        teardown: Option<Arc<TeardownFn>>,
        declared_at: Location,
        output_type: &'static str,
    ) -> Self {
        Self(Arc::new(Declaration {
            identity,
            kind,
            cacheable: true,
            dependencies: Vec::new(),
            produce,
            teardown,
            declared_at,
            output_type,
        }))
    }

    /// Append a sub-dependency.
    ///
    /// Sub-dependencies are resolved before this provider, and handed to its producer
    /// in the order they were declared.
    pub fn depends_on(mut self, dependency: &Provider) -> Self {
        Arc::make_mut(&mut self.0)
            .dependencies
            .push(dependency.clone());
        self
    }

    /// Set the caching policy.
    ///
    /// Cacheable providers (the default) run at most once per request, no matter how many
    /// dependents reference them.
    /// Non-cacheable providers run once for every reference.
    pub fn cacheable(mut self, cacheable: bool) -> Self {
        Arc::make_mut(&mut self.0).cacheable = cacheable;
        self
    }

    /// Shorthand for [`cacheable(false)`](Self::cacheable).
    pub fn no_cache(self) -> Self {
        self.cacheable(false)
    }

    pub fn identity(&self) -> &Identity {
        &self.0.identity
    }

    pub fn kind(&self) -> Kind {
        self.0.kind
    }

    pub fn is_cacheable(&self) -> bool {
        self.0.cacheable
    }

    /// The sub-dependencies of this provider, in declaration order.
    pub fn dependencies(&self) -> &[Provider] {
        &self.0.dependencies
    }

    /// Where this provider was declared.
    pub fn declared_at(&self) -> &Location {
        &self.0.declared_at
    }

    /// The name of the type produced by this provider.
    pub fn output_type(&self) -> &'static str {
        self.0.output_type
    }

    /// `true` if both handles point at the same declaration.
    pub fn ptr_eq(&self, other: &Provider) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn produce(
        &self,
        dependencies: Dependencies,
        inputs: Inputs,
    ) -> BoxFuture<'static, Result<Value, Error>> {
        (self.0.produce)(dependencies, inputs)
    }

    pub(crate) fn teardown(&self) -> Option<&Arc<TeardownFn>> {
        self.0.teardown.as_ref()
    }
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider")
            .field("identity", &self.0.identity)
            .field("kind", &self.0.kind)
            .field("cacheable", &self.0.cacheable)
            .field(
                "dependencies",
                &self
                    .0
                    .dependencies
                    .iter()
                    .map(|d| d.identity())
                    .collect::<Vec<_>>(),
            )
            .field("declared_at", &self.0.declared_at)
            .finish()
    }
}

fn erase_producer<T, E, F, Fut>(producer: F) -> Arc<ProduceFn>
where
    F: Fn(Dependencies, Inputs) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + Sync + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    Arc::new(move |dependencies: Dependencies, inputs: Inputs| {
        producer(dependencies, inputs)
            .map(|r| r.map(|v| Arc::new(v) as Value).map_err(Error::new))
            .boxed()
    })
}
