//! Compose the layered declarations of an endpoint into an [`ExecutionPlan`].
use std::sync::Arc;

use ahash::HashMap;
use indexmap::IndexMap;
use petgraph::stable_graph::StableDiGraph;

use crate::provider::{Identity, Provider};
use errors::CompositionError;
use graph::DeclarationGraph;

mod graph;

#[derive(Debug, Clone, Default)]
/// The declarations that apply to an endpoint, grouped by the layer they were registered at.
///
/// Layers are composed in order: global, then group levels (outermost first), then
/// operation, then parameters.
pub struct Layers {
    /// Declarations that apply to every endpoint.
    pub global: Vec<Provider>,
    /// Declarations registered on the route groups that contain the endpoint,
    /// one entry per nesting level, outermost first.
    pub group: Vec<Vec<Provider>>,
    /// Declarations registered on the endpoint itself, whose values the handler
    /// doesn't necessarily consume.
    pub operation: Vec<Provider>,
    /// The endpoint's own parameters, in signature order.
    pub parameters: Vec<Provider>,
}

impl Layers {
    fn roots(&self) -> impl Iterator<Item = &Provider> {
        self.global
            .iter()
            .chain(self.group.iter().flatten())
            .chain(self.operation.iter())
            .chain(self.parameters.iter())
    }
}

#[derive(Debug, Clone)]
/// A single provider invocation in an [`ExecutionPlan`].
pub struct Step {
    provider: Provider,
    inputs: Vec<usize>,
}

impl Step {
    pub fn provider(&self) -> &Provider {
        &self.provider
    }

    pub fn identity(&self) -> &Identity {
        self.provider.identity()
    }

    /// The steps whose values feed this one, in the order the provider declared
    /// its sub-dependencies.
    ///
    /// They always come earlier in the plan.
    pub fn inputs(&self) -> &[usize] {
        &self.inputs
    }
}

/// The ordered, deduplicated, cycle-free expansion of an endpoint's declarations.
///
/// Every step comes after the steps it depends on.
/// A cacheable declaration shows up once, at the first position it was reached from;
/// a non-cacheable one shows up once for every reference to it.
///
/// A plan is immutable and cheap to clone: build it once, share it across requests.
#[derive(Clone)]
pub struct ExecutionPlan(Arc<PlanInner>);

struct PlanInner {
    steps: Vec<Step>,
    first_step: HashMap<Identity, usize>,
    parameters: Vec<usize>,
}

impl ExecutionPlan {
    pub fn steps(&self) -> &[Step] {
        &self.0.steps
    }

    pub fn len(&self) -> usize {
        self.0.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.steps.is_empty()
    }

    /// The identities of the steps, in execution order.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.0.steps.iter().map(Step::identity)
    }

    /// The steps producing the endpoint parameters, in signature order.
    pub fn parameters(&self) -> &[usize] {
        &self.0.parameters
    }

    /// The first step executing the declaration with the given identity.
    pub fn step_of(&self, identity: &Identity) -> Option<usize> {
        self.0.first_step.get(identity).copied()
    }

    /// A Graphviz rendering of the plan, for troubleshooting.
    pub fn debug_dot(&self) -> String {
        let mut graph = StableDiGraph::<String, ()>::new();
        let indexes: Vec<_> = self
            .0
            .steps
            .iter()
            .map(|s| graph.add_node(s.identity().to_string()))
            .collect();
        for (step, &index) in self.0.steps.iter().zip(&indexes) {
            for &input in &step.inputs {
                graph.add_edge(indexes[input], index, ());
            }
        }
        format!(
            "{:?}",
            petgraph::dot::Dot::with_config(&graph, &[petgraph::dot::Config::EdgeNoLabel])
        )
    }
}

impl std::fmt::Debug for ExecutionPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionPlan")
            .field("steps", &self.identities().collect::<Vec<_>>())
            .field("parameters", &self.0.parameters)
            .finish()
    }
}

/// Build the [`ExecutionPlan`] for a set of layered declarations.
///
/// It fails if the declarations form a cycle or if two different declarations
/// claim the same identity with incompatible settings.
pub fn compose(layers: &Layers) -> Result<ExecutionPlan, CompositionError> {
    let graph = DeclarationGraph::build(layers.roots())?;
    graph.check_acyclic()?;

    let mut expansion = Expansion {
        graph: &graph,
        steps: Vec::new(),
        cached: IndexMap::new(),
    };
    let mut parameters = Vec::with_capacity(layers.parameters.len());
    for provider in layers
        .global
        .iter()
        .chain(layers.group.iter().flatten())
        .chain(layers.operation.iter())
    {
        expansion.expand(provider);
    }
    for provider in &layers.parameters {
        parameters.push(expansion.expand(provider));
    }

    let mut first_step = HashMap::default();
    for (index, step) in expansion.steps.iter().enumerate() {
        first_step.entry(step.identity().clone()).or_insert(index);
    }
    tracing::debug!(
        n_steps = expansion.steps.len(),
        n_parameters = parameters.len(),
        "Composed an execution plan"
    );
    Ok(ExecutionPlan(Arc::new(PlanInner {
        steps: expansion.steps,
        first_step,
        parameters,
    })))
}

struct Expansion<'a> {
    graph: &'a DeclarationGraph,
    steps: Vec<Step>,
    cached: IndexMap<Identity, usize>,
}

impl Expansion<'_> {
    /// Post-order expansion. Returns the index of the step producing `provider`.
    ///
    /// The graph has already been checked for cycles.
    fn expand(&mut self, provider: &Provider) -> usize {
        let provider = self
            .graph
            .provider(provider.identity())
            .cloned()
            .unwrap_or_else(|| provider.clone());
        if let Some(&index) = self.cached.get(provider.identity()) {
            return index;
        }
        let inputs = provider
            .dependencies()
            .iter()
            .map(|d| self.expand(d))
            .collect();
        let index = self.steps.len();
        if provider.is_cacheable() {
            self.cached.insert(provider.identity().clone(), index);
        }
        self.steps.push(Step { provider, inputs });
        index
    }
}

/// Errors that can occur when composing an [`ExecutionPlan`](super::ExecutionPlan).
pub mod errors {
    use itertools::Itertools;

    use crate::provider::{Identity, Location};

    #[derive(Debug, thiserror::Error)]
    #[non_exhaustive]
    /// The error returned by [`compose`](super::compose) and by
    /// [`Blueprint::build`](crate::Blueprint::build).
    ///
    /// It is fatal: the affected endpoints can't serve any request.
    pub enum CompositionError {
        #[error(transparent)]
        CyclicDependency(#[from] CyclicDependency),
        #[error(transparent)]
        ConflictingDeclarations(#[from] ConflictingDeclarations),
        #[error(transparent)]
        DuplicateEndpoint(#[from] DuplicateEndpoint),
    }

    #[derive(Debug, thiserror::Error)]
    #[error("The dependency graph contains a cycle: {}", render_cycle(.cycle))]
    /// A declaration transitively depends on itself.
    pub struct CyclicDependency {
        /// The identities in the cycle, in dependency order.
        /// The last one depends on the first one.
        pub cycle: Vec<Identity>,
    }

    fn render_cycle(cycle: &[Identity]) -> String {
        cycle.iter().chain(cycle.first()).join(" -> ")
    }

    #[derive(Debug, thiserror::Error)]
    #[error(
        "Two incompatible declarations share the identity `{identity}`. \
        They were declared at {first} and {second}: they must agree on their kind and on their caching policy"
    )]
    /// Two different declarations share an identity, but not their kind or caching policy.
    pub struct ConflictingDeclarations {
        pub identity: Identity,
        pub first: Location,
        pub second: Location,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("There are multiple endpoints named `{name}`")]
    pub struct DuplicateEndpoint {
        pub name: String,
    }
}
