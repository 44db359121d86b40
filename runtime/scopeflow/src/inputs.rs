//! The values a producer can read: the raw request inputs and the resolved
//! values of its sub-dependencies.
use std::any::Any;
use std::sync::Arc;

use ahash::HashMap;

use crate::Error;
use crate::background::BackgroundTasks;
use crate::provider::{Identity, Provider, Value};

/// Already-extracted, already-typed request inputs, keyed by parameter name.
///
/// The transport layer is in charge of parsing path, query, header, cookie and body
/// values: the engine only hands them over to the providers that need them.
///
/// Cloning is cheap.
#[derive(Clone, Default)]
pub struct Inputs(Arc<HashMap<String, Value>>);

impl Inputs {
    /// Start assembling a new set of inputs.
    pub fn builder() -> InputsBuilder {
        InputsBuilder::default()
    }

    /// No inputs at all.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Retrieve the input called `name`, if it exists and it is a `T`.
    pub fn get<T>(&self, name: &str) -> Option<Arc<T>>
    where
        T: Send + Sync + 'static,
    {
        self.0.get(name)?.clone().downcast::<T>().ok()
    }

    /// Retrieve the input called `name`, failing if it is missing or it isn't a `T`.
    pub fn require<T>(&self, name: &str) -> Result<Arc<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        let Some(value) = self.0.get(name) else {
            return Err(Error::new(errors::MissingInput {
                name: name.to_owned(),
            }));
        };
        value.clone().downcast::<T>().map_err(|_| {
            Error::new(errors::InputTypeMismatch {
                name: name.to_owned(),
                expected: std::any::type_name::<T>(),
            })
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for Inputs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.0.keys().collect();
        names.sort();
        f.debug_tuple("Inputs").field(&names).finish()
    }
}

#[derive(Default)]
/// The builder returned by [`Inputs::builder`].
pub struct InputsBuilder(HashMap<String, Value>);

impl InputsBuilder {
    /// Add an input. A previous input with the same name is overwritten.
    pub fn insert<T>(mut self, name: impl Into<String>, value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        self.0.insert(name.into(), Arc::new(value));
        self
    }

    pub fn build(self) -> Inputs {
        Inputs(Arc::new(self.0))
    }
}

/// The resolved values of a provider's sub-dependencies, in the order they were declared.
pub struct Dependencies {
    values: Vec<(Identity, Value)>,
    background_tasks: BackgroundTasks,
}

impl Dependencies {
    pub(crate) fn new(values: Vec<(Identity, Value)>, background_tasks: BackgroundTasks) -> Self {
        Self {
            values,
            background_tasks,
        }
    }

    /// The value of the `index`-th sub-dependency.
    pub fn get<T>(&self, index: usize) -> Result<Arc<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        let Some((identity, value)) = self.values.get(index) else {
            return Err(Error::new(errors::UnknownDependency {
                reference: format!("#{index}"),
            }));
        };
        downcast(identity, value)
    }

    /// The value produced by `provider`, which must be one of the declared sub-dependencies.
    pub fn of<T>(&self, provider: &Provider) -> Result<Arc<T>, Error>
    where
        T: Send + Sync + 'static,
    {
        let Some((identity, value)) = self
            .values
            .iter()
            .find(|(identity, _)| identity == provider.identity())
        else {
            return Err(Error::new(errors::UnknownDependency {
                reference: provider.identity().to_string(),
            }));
        };
        downcast(identity, value)
    }

    /// The tasks that will be executed once the request is over.
    pub fn background_tasks(&self) -> &BackgroundTasks {
        &self.background_tasks
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

pub(crate) fn downcast<T>(identity: &Identity, value: &Value) -> Result<Arc<T>, Error>
where
    T: Send + Sync + 'static,
{
    value.clone().downcast::<T>().map_err(|_| {
        Error::new(errors::DependencyTypeMismatch {
            identity: identity.clone(),
            expected: std::any::type_name::<T>(),
        })
    })
}

/// Errors that can occur when reading inputs or resolved dependencies.
pub mod errors {
    use crate::provider::Identity;

    #[derive(Debug, thiserror::Error)]
    #[error("There is no input named `{name}`")]
    /// The error returned by [`Inputs::require`](super::Inputs::require) when the input is missing.
    pub struct MissingInput {
        pub name: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("The input named `{name}` is not a `{expected}`")]
    /// The error returned by [`Inputs::require`](super::Inputs::require) when the input
    /// has a different type.
    pub struct InputTypeMismatch {
        pub name: String,
        pub expected: &'static str,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("`{reference}` is not among the resolved dependencies")]
    /// A resolved value was requested for a provider that wasn't part of the resolution.
    pub struct UnknownDependency {
        pub reference: String,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("The value resolved for `{identity}` is not a `{expected}`")]
    /// A resolved value was requested with the wrong type.
    pub struct DependencyTypeMismatch {
        pub identity: Identity,
        pub expected: &'static str,
    }
}
