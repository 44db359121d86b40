use std::collections::HashSet;

use indexmap::IndexMap;
use petgraph::stable_graph::{NodeIndex, StableDiGraph};

use super::errors::{ConflictingDeclarations, CyclicDependency};
use crate::provider::{Identity, Provider};

/// The declarations reachable from a set of roots, one node per identity.
///
/// Edges go from a dependent to each of its sub-dependencies.
pub(super) struct DeclarationGraph {
    graph: StableDiGraph<Identity, ()>,
    /// The first declaration encountered for each identity, in discovery order.
    nodes: IndexMap<Identity, (NodeIndex, Provider)>,
}

impl DeclarationGraph {
    /// Discover every declaration reachable from `roots`.
    ///
    /// Two distinct declarations sharing an identity are accepted as long as they agree
    /// on their kind and on their caching policy; the first one wins.
    pub(super) fn build<'a>(
        roots: impl IntoIterator<Item = &'a Provider>,
    ) -> Result<Self, ConflictingDeclarations> {
        let mut graph = StableDiGraph::new();
        let mut nodes: IndexMap<Identity, (NodeIndex, Provider)> = IndexMap::new();
        let mut expanded = HashSet::new();
        let mut to_be_visited: Vec<Provider> = roots.into_iter().cloned().collect();
        to_be_visited.reverse();

        while let Some(provider) = to_be_visited.pop() {
            let node_index = add_node(&mut graph, &mut nodes, &provider)?;
            if !expanded.insert(node_index) {
                continue;
            }
            // Only the winning declaration contributes edges.
            let canonical = nodes[provider.identity()].1.clone();
            for dependency in canonical.dependencies() {
                let dependency_index = add_node(&mut graph, &mut nodes, dependency)?;
                graph.update_edge(node_index, dependency_index, ());
            }
            to_be_visited.extend(canonical.dependencies().iter().rev().cloned());
        }
        Ok(Self { graph, nodes })
    }

    /// The canonical declaration for `identity`.
    pub(super) fn provider(&self, identity: &Identity) -> Option<&Provider> {
        self.nodes.get(identity).map(|(_, p)| p)
    }

    /// Fail if any declaration transitively depends on itself.
    ///
    /// The reported cycle is the first one found, in dependency order.
    pub(super) fn check_acyclic(&self) -> Result<(), CyclicDependency> {
        let cycles = find_cycles(&self.graph);
        match cycles.into_iter().next() {
            None => Ok(()),
            Some(cycle) => Err(CyclicDependency {
                cycle: cycle.into_iter().map(|i| self.graph[i].clone()).collect(),
            }),
        }
    }
}

fn add_node(
    graph: &mut StableDiGraph<Identity, ()>,
    nodes: &mut IndexMap<Identity, (NodeIndex, Provider)>,
    provider: &Provider,
) -> Result<NodeIndex, ConflictingDeclarations> {
    if let Some((index, existing)) = nodes.get(provider.identity()) {
        if !existing.ptr_eq(provider)
            && (existing.kind() != provider.kind()
                || existing.is_cacheable() != provider.is_cacheable())
        {
            return Err(ConflictingDeclarations {
                identity: provider.identity().clone(),
                first: existing.declared_at().clone(),
                second: provider.declared_at().clone(),
            });
        }
        return Ok(*index);
    }
    let index = graph.add_node(provider.identity().clone());
    nodes.insert(provider.identity().clone(), (index, provider.clone()));
    Ok(index)
}

/// Return all the cycles in the graph.
///
/// It's an empty vector if the graph is acyclic.
fn find_cycles(graph: &StableDiGraph<Identity, ()>) -> Vec<Vec<NodeIndex>> {
    fn dfs(
        node_index: NodeIndex,
        graph: &StableDiGraph<Identity, ()>,
        visited: &mut HashSet<NodeIndex>,
        stack: &mut Vec<NodeIndex>,
        cycles: &mut Vec<Vec<NodeIndex>>,
    ) {
        visited.insert(node_index);
        stack.push(node_index);

        let mut neighbours: Vec<_> = graph
            .neighbors_directed(node_index, petgraph::Direction::Outgoing)
            .collect();
        // Outgoing neighbours are yielded most-recent-edge first.
        neighbours.reverse();
        for neighbour_index in neighbours {
            if !visited.contains(&neighbour_index) {
                dfs(neighbour_index, graph, visited, stack, cycles);
            } else if let Some(cycle_start) = stack.iter().position(|&x| x == neighbour_index) {
                cycles.push(stack[cycle_start..].to_vec());
            }
        }

        stack.pop();
    }

    let mut visited = HashSet::new();
    let mut stack = Vec::new();
    let mut cycles = Vec::new();

    for node_index in graph.node_indices() {
        if !visited.contains(&node_index) {
            dfs(node_index, graph, &mut visited, &mut stack, &mut cycles);
        }
    }

    cycles
}
