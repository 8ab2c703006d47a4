//! # Step Dependency Graph
//!
//! Static, process-wide DAG over step identifiers. A step may not accept
//! input until every step it depends on has succeeded.
//!
//! ## Standard graph
//!
//! ```text
//! phone_otp ───────────────┐
//! email_otp                 ├──▶ registry_ntra
//! document ──┬─────────────┘
//!            ├──▶ registry_cso
//!            └──┐
//! selfie_liveness ─┴──▶ face_match
//!            └──────▶ headshot
//! ```
//!
//! Construction validates the graph once; afterwards the topological order
//! is cached and lookups are infallible.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use avs_core::StepId;

/// One node of the dependency graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepNode {
    /// The step this node describes.
    pub step: StepId,
    /// Steps that must succeed before this one opens.
    #[serde(default)]
    pub depends_on: BTreeSet<StepId>,
    /// Whether the step counts towards "verified".
    #[serde(default = "default_required")]
    pub required: bool,
}

fn default_required() -> bool {
    true
}

impl StepNode {
    /// A required node.
    pub fn new(step: StepId, depends_on: impl IntoIterator<Item = StepId>) -> Self {
        Self {
            step,
            depends_on: depends_on.into_iter().collect(),
            required: true,
        }
    }

    /// Mark the node as optional.
    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }
}

/// Errors from graph construction.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The graph has no nodes.
    #[error("dependency graph has no steps")]
    Empty,

    /// A step is declared twice.
    #[error("step {0} is declared more than once")]
    DuplicateStep(StepId),

    /// A step lists itself as a dependency.
    #[error("step {0} depends on itself")]
    SelfDependency(StepId),

    /// A dependency names a step that is not in the graph.
    #[error("step {step} depends on {dependency}, which is not in the graph")]
    UnknownDependency {
        /// The dependent step.
        step: StepId,
        /// The missing dependency.
        dependency: StepId,
    },

    /// The dependencies form a cycle through the listed steps.
    #[error("dependency cycle among steps: {}", format_steps(.0))]
    Cycle(Vec<StepId>),
}

fn format_steps(steps: &[StepId]) -> String {
    steps
        .iter()
        .map(StepId::as_str)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Validated step dependency DAG.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<StepNode>", into = "Vec<StepNode>")]
pub struct StepDependencyGraph {
    nodes: BTreeMap<StepId, StepNode>,
    order: Vec<StepId>,
}

impl StepDependencyGraph {
    /// Validate `nodes` and build the graph.
    pub fn new(nodes: Vec<StepNode>) -> Result<Self, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::Empty);
        }

        let mut map = BTreeMap::new();
        for node in nodes {
            if node.depends_on.contains(&node.step) {
                return Err(GraphError::SelfDependency(node.step));
            }
            let step = node.step;
            if map.insert(step, node).is_some() {
                return Err(GraphError::DuplicateStep(step));
            }
        }

        for node in map.values() {
            if let Some(missing) = node.depends_on.iter().find(|d| !map.contains_key(d)) {
                return Err(GraphError::UnknownDependency {
                    step: node.step,
                    dependency: *missing,
                });
            }
        }

        let order = topological_order(&map)?;
        Ok(Self { nodes: map, order })
    }

    /// The standard eight-step graph, all steps required.
    pub fn standard() -> Self {
        use StepId::*;
        let nodes = vec![
            StepNode::new(PhoneOtp, []),
            StepNode::new(EmailOtp, []),
            StepNode::new(Document, []),
            StepNode::new(SelfieLiveness, []),
            StepNode::new(FaceMatch, [Document, SelfieLiveness]),
            StepNode::new(RegistryCso, [Document]),
            StepNode::new(RegistryNtra, [PhoneOtp, Document]),
            StepNode::new(Headshot, [SelfieLiveness]),
        ];
        let map: BTreeMap<StepId, StepNode> = nodes.into_iter().map(|n| (n.step, n)).collect();
        // Acyclic by construction; the canonical order is already topological.
        let order = map.keys().copied().collect();
        Self { nodes: map, order }
    }

    /// Steps in topological order, ties broken by canonical step order.
    pub fn order(&self) -> &[StepId] {
        &self.order
    }

    /// Nodes in topological order.
    pub fn nodes(&self) -> impl Iterator<Item = &StepNode> {
        self.order.iter().filter_map(|s| self.nodes.get(s))
    }

    /// Whether `step` is part of the graph.
    pub fn contains(&self, step: StepId) -> bool {
        self.nodes.contains_key(&step)
    }

    /// Direct dependencies of `step`. Empty for unknown steps.
    pub fn dependencies(&self, step: StepId) -> impl Iterator<Item = StepId> + '_ {
        self.nodes
            .get(&step)
            .into_iter()
            .flat_map(|n| n.depends_on.iter().copied())
    }

    /// Steps that list `step` as a direct dependency, in topological order.
    pub fn dependents(&self, step: StepId) -> Vec<StepId> {
        self.nodes()
            .filter(|n| n.depends_on.contains(&step))
            .map(|n| n.step)
            .collect()
    }

    /// Whether `step` counts towards verification. False for unknown steps.
    pub fn is_required(&self, step: StepId) -> bool {
        self.nodes.get(&step).is_some_and(|n| n.required)
    }

    /// Required steps in topological order.
    pub fn required_steps(&self) -> Vec<StepId> {
        self.nodes()
            .filter(|n| n.required)
            .map(|n| n.step)
            .collect()
    }

    /// Number of steps.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Always false for a validated graph.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

impl Default for StepDependencyGraph {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<StepNode>> for StepDependencyGraph {
    type Error = GraphError;

    fn try_from(nodes: Vec<StepNode>) -> Result<Self, Self::Error> {
        Self::new(nodes)
    }
}

impl From<StepDependencyGraph> for Vec<StepNode> {
    fn from(graph: StepDependencyGraph) -> Self {
        let StepDependencyGraph { mut nodes, order } = graph;
        order.iter().filter_map(|s| nodes.remove(s)).collect()
    }
}

/// Kahn's algorithm. The ready set is ordered, so the smallest ready step in
/// canonical order is always emitted first.
fn topological_order(nodes: &BTreeMap<StepId, StepNode>) -> Result<Vec<StepId>, GraphError> {
    let mut indegree: BTreeMap<StepId, usize> = nodes
        .values()
        .map(|n| (n.step, n.depends_on.len()))
        .collect();
    let mut ready: BTreeSet<StepId> = indegree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(s, _)| *s)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(step) = ready.pop_first() {
        order.push(step);
        for node in nodes.values().filter(|n| n.depends_on.contains(&step)) {
            if let Some(d) = indegree.get_mut(&node.step) {
                *d -= 1;
                if *d == 0 {
                    ready.insert(node.step);
                }
            }
        }
    }

    if order.len() != nodes.len() {
        let stuck = indegree
            .into_iter()
            .filter(|(_, d)| *d > 0)
            .map(|(s, _)| s)
            .collect();
        return Err(GraphError::Cycle(stuck));
    }
    Ok(order)
}

// ─── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use StepId::*;

    #[test]
    fn standard_graph_matches_validated_construction() {
        let standard = StepDependencyGraph::standard();
        let rebuilt = StepDependencyGraph::new(standard.nodes().cloned().collect()).unwrap();
        assert_eq!(standard, rebuilt);
        assert_eq!(standard.order(), &StepId::ALL);
        assert_eq!(standard.required_steps().len(), 8);
    }

    #[test]
    fn dependencies_and_dependents() {
        let g = StepDependencyGraph::standard();
        let deps: Vec<_> = g.dependencies(RegistryNtra).collect();
        assert_eq!(deps, vec![PhoneOtp, Document]);
        assert_eq!(g.dependents(Document), vec![FaceMatch, RegistryCso, RegistryNtra]);
        assert_eq!(g.dependents(SelfieLiveness), vec![FaceMatch, Headshot]);
        assert!(g.dependents(Headshot).is_empty());
    }

    #[test]
    fn topological_order_respects_dependencies() {
        // Declared out of canonical order on purpose.
        let g = StepDependencyGraph::new(vec![
            StepNode::new(Headshot, [FaceMatch]),
            StepNode::new(FaceMatch, [SelfieLiveness]),
            StepNode::new(SelfieLiveness, []),
            StepNode::new(PhoneOtp, []),
        ])
        .unwrap();
        assert_eq!(g.order(), &[PhoneOtp, SelfieLiveness, FaceMatch, Headshot]);
    }

    #[test]
    fn rejects_invalid_graphs() {
        assert_eq!(StepDependencyGraph::new(vec![]), Err(GraphError::Empty));
        assert_eq!(
            StepDependencyGraph::new(vec![StepNode::new(Document, [Document])]),
            Err(GraphError::SelfDependency(Document))
        );
        assert_eq!(
            StepDependencyGraph::new(vec![
                StepNode::new(Document, []),
                StepNode::new(Document, []),
            ]),
            Err(GraphError::DuplicateStep(Document))
        );
        assert_eq!(
            StepDependencyGraph::new(vec![StepNode::new(FaceMatch, [Document])]),
            Err(GraphError::UnknownDependency {
                step: FaceMatch,
                dependency: Document
            })
        );
        assert_eq!(
            StepDependencyGraph::new(vec![
                StepNode::new(PhoneOtp, []),
                StepNode::new(Document, [FaceMatch]),
                StepNode::new(FaceMatch, [Document]),
            ]),
            Err(GraphError::Cycle(vec![Document, FaceMatch]))
        );
    }

    #[test]
    fn optional_steps_are_not_required() {
        let g = StepDependencyGraph::new(vec![
            StepNode::new(SelfieLiveness, []),
            StepNode::new(Headshot, [SelfieLiveness]).optional(),
        ])
        .unwrap();
        assert!(g.is_required(SelfieLiveness));
        assert!(!g.is_required(Headshot));
        assert!(!g.is_required(Document));
        assert_eq!(g.required_steps(), vec![SelfieLiveness]);
    }

    #[test]
    fn yaml_roundtrip_validates() {
        let yaml = "
- step: document
- step: registry_cso
  depends_on: [document]
- step: headshot
  required: false
";
        let g: StepDependencyGraph = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(g.order(), &[Document, RegistryCso, Headshot]);
        assert!(!g.is_required(Headshot));

        let cyclic = "
- step: document
  depends_on: [registry_cso]
- step: registry_cso
  depends_on: [document]
";
        assert!(serde_yaml::from_str::<StepDependencyGraph>(cyclic).is_err());
    }
}
