//! # scopeflow
//!
//! Request-scoped dependency resolution, with deterministic resource teardown.
//!
//! For every incoming request, `scopeflow` walks a pre-composed graph of dependency
//! [providers](Provider), memoises their values within the request and keeps track of the
//! scoped resources it acquires.
//! Once the request is over, successfully or not, those resources are released in reverse
//! acquisition order. Each teardown step sees the error propagating at that point and decides
//! whether to let it through, suppress it or replace it.
//!
//! # Anatomy
//!
//! - [`Provider`]: the declaration of a single dependency.
//! - [`compose`]: turns the layered declarations of an endpoint into an [`ExecutionPlan`].
//! - [`resolve`]: executes a plan against a [`RequestScope`].
//! - [`RequestScope::unwind`]: tears down the scoped providers.
//! - [`Blueprint`]: registers endpoints and their dependencies, then builds an [`Application`]
//!   that drives all of the above for you and reports an [`Outcome`].
//!
//! The engine doesn't parse transport data, nor does it render wire responses:
//! request inputs come in already extracted ([`Inputs`]), failures go out
//! [classified](ErrorClassifier).
pub use background::BackgroundTasks;
pub use blueprint::{Application, Blueprint, Completion, Endpoint, RegisteredEndpoint};
pub use classify::{Classified, ErrorClassifier, ExceptionHandlers, HttpError};
pub use config::{ConfigLoader, EngineConfig};
pub use error::Error;
pub use inputs::{Dependencies, Inputs, InputsBuilder};
pub use outcome::{Failure, FailureKind, Outcome};
pub use plan::{ExecutionPlan, Layers, Step, compose};
pub use provider::{Exit, Identity, Kind, Location, Provider, Value};
pub use resolve::{Resolved, resolve};
pub use scope::{RequestScope, ScopeState, Unwound};

// Re-exported since it's part of the public API of `Classified` and `HttpError`.
pub use http;

mod background;
pub mod blueprint;
pub mod classify;
pub mod config;
mod error;
pub mod inputs;
mod outcome;
pub mod plan;
pub mod provider;
mod resolve;
pub mod scope;
