//! Module dependency graph of one bundle.
//!
//! Module ids are handed out in discovery order, which is what makes bundle output
//! deterministic. Edges point from the importing module to the imported one.

use indexmap::IndexMap;
use log::debug;
use petgraph::{
    algo::tarjan_scc,
    graph::{DiGraph, NodeIndex},
};
use rustc_hash::FxHashMap;

/// Position of a module in its bundle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleId(u32);

impl ModuleId {
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    #[inline]
    pub const fn as_u32(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for ModuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Default)]
pub struct ModuleGraph {
    /// Module key (context-relative path or vendor symbol) to id, in id order
    modules: IndexMap<String, ModuleId>,
    graph: DiGraph<ModuleId, ()>,
    node_indices: FxHashMap<ModuleId, NodeIndex>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `key`, returning its id and whether it was newly added
    pub fn add_module(&mut self, key: &str) -> (ModuleId, bool) {
        if let Some(&id) = self.modules.get(key) {
            return (id, false);
        }
        let id = ModuleId::new(self.modules.len() as u32);
        self.modules.insert(key.to_owned(), id);
        let node = self.graph.add_node(id);
        self.node_indices.insert(id, node);
        debug!("Registered module {id} for {key}");
        (id, true)
    }

    /// Record that `from` imports `to`
    pub fn add_dependency(&mut self, from: ModuleId, to: ModuleId) {
        if let (Some(&from_idx), Some(&to_idx)) =
            (self.node_indices.get(&from), self.node_indices.get(&to))
        {
            if !self.graph.contains_edge(from_idx, to_idx) {
                self.graph.add_edge(from_idx, to_idx, ());
            }
        }
    }

    pub fn key_of(&self, id: ModuleId) -> Option<&str> {
        self.modules
            .get_index(id.as_u32() as usize)
            .map(|(key, _)| key.as_str())
    }

    /// Every registered module with its key, in id order
    pub fn modules(&self) -> impl Iterator<Item = (ModuleId, &str)> + '_ {
        self.modules.iter().map(|(key, &id)| (id, key.as_str()))
    }

    /// Groups of modules that import each other, each sorted by id
    pub fn cycles(&self) -> Vec<Vec<ModuleId>> {
        let mut cycles: Vec<Vec<ModuleId>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|component| {
                component.len() > 1
                    || component
                        .first()
                        .is_some_and(|&n| self.graph.contains_edge(n, n))
            })
            .map(|component| {
                let mut ids: Vec<ModuleId> = component.into_iter().map(|n| self.graph[n]).collect();
                ids.sort_unstable();
                ids
            })
            .collect();
        cycles.sort();
        cycles
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn test_ids_follow_discovery_order() {
        let mut graph = ModuleGraph::new();
        assert_eq!(graph.add_module("./a.js"), (ModuleId::new(0), true));
        assert_eq!(graph.add_module("./b.js"), (ModuleId::new(1), true));
        assert_eq!(graph.add_module("./a.js"), (ModuleId::new(0), false));
        assert_eq!(graph.key_of(ModuleId::new(1)), Some("./b.js"));
        assert_eq!(graph.key_of(ModuleId::new(2)), None);
        assert_eq!(
            graph.modules().collect::<Vec<_>>(),
            vec![(ModuleId::new(0), "./a.js"), (ModuleId::new(1), "./b.js")]
        );
    }

    #[test]
    fn test_cycles() {
        let mut graph = ModuleGraph::new();
        let (a, _) = graph.add_module("a");
        let (b, _) = graph.add_module("b");
        let (c, _) = graph.add_module("c");
        let (d, _) = graph.add_module("d");
        graph.add_dependency(a, b);
        graph.add_dependency(b, c);
        graph.add_dependency(c, a);
        graph.add_dependency(c, d);
        graph.add_dependency(d, d);

        assert_eq!(graph.cycles(), vec![vec![a, b, c], vec![d]]);
    }

    #[test]
    fn test_acyclic_graph_has_no_cycles() {
        let mut graph = ModuleGraph::new();
        let (a, _) = graph.add_module("a");
        let (b, _) = graph.add_module("b");
        graph.add_dependency(a, b);
        graph.add_dependency(a, b);
        assert!(graph.cycles().is_empty());
    }
}
