use std::collections::{BTreeMap, BTreeSet};

use itertools::Itertools;
use serde_json::{Value, json};

use crate::error::{InvalidGraphError, SirError};
use crate::sir::edge::{EdgeGroup, EdgeKind, HyperEdge, RegionTransfer};
use crate::sir::vertex::{Vertex, VertexKind};
use crate::utils::validity::HasValidityCheck;
use crate::utils::{EdgeId, GraphId, VertexId, sir_validity_assert};

/// The SIR hypergraph: a vertex set, a hyperedge set, an optional entry
/// vertex and an ordered exit list.
///
/// Vertices and edges are stored by identity in ordered maps, so every
/// traversal, the topological order and the serialized tree are
/// deterministic given the ids, independent of insertion order.
#[derive(Clone, Debug, PartialEq)]
pub struct HyperGraph {
    pub id: GraphId,
    pub name: String,
    vertices: BTreeMap<VertexId, Vertex>,
    edges: BTreeMap<EdgeId, HyperEdge>,
    pub entry: Option<VertexId>,
    pub exits: Vec<VertexId>,
    pub metadata: BTreeMap<String, Value>,
}

impl HyperGraph {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            id: GraphId::fresh(),
            name: name.into(),
            vertices: BTreeMap::new(),
            edges: BTreeMap::new(),
            entry: None,
            exits: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    pub fn add_vertex(&mut self, vertex: Vertex) -> VertexId {
        let id = vertex.id.clone();
        self.vertices.insert(id.clone(), vertex);
        id
    }

    /// Inserts an edge. Endpoints are expected to already be members of the
    /// vertex set; with validity checks enabled a dangling endpoint trips an
    /// assertion (use [`HyperGraph::add_edge_strict`] for a checked insert).
    pub fn add_edge(&mut self, edge: HyperEdge) -> EdgeId {
        sir_validity_assert!(
            edge.all_vertices().all(|v| self.vertices.contains_key(v)),
            "edge {} references a vertex outside the graph",
            edge.id
        );
        let id = edge.id.clone();
        self.edges.insert(id.clone(), edge);
        id
    }

    /// Strict insert: fails with `InvalidEdge` when an endpoint vertex is
    /// not present.
    pub fn add_edge_strict(&mut self, edge: HyperEdge) -> Result<EdgeId, SirError> {
        if let Some(missing) = edge
            .all_vertices()
            .find(|v| !self.vertices.contains_key(*v))
        {
            return Err(SirError::invalid_graph(InvalidGraphError::InvalidEdge {
                edge: edge.id.to_string(),
                endpoint: missing.to_string(),
            }));
        }
        Ok(self.add_edge(edge))
    }

    /// Removes a vertex and every edge incident to it.
    pub fn remove_vertex(&mut self, id: &VertexId) {
        self.vertices.remove(id);
        self.edges.retain(|_, e| !e.touches(id));
        if self.entry.as_ref() == Some(id) {
            self.entry = None;
        }
        self.exits.retain(|v| v != id);
    }

    pub fn remove_edge(&mut self, id: &EdgeId) {
        self.edges.remove(id);
    }

    pub fn vertex(&self, id: &VertexId) -> Option<&Vertex> {
        self.vertices.get(id)
    }

    pub fn vertex_mut(&mut self, id: &VertexId) -> Option<&mut Vertex> {
        self.vertices.get_mut(id)
    }

    /// Lookup that fails with `UnknownId` for unregistered identities.
    pub fn try_vertex(&self, id: &VertexId) -> Result<&Vertex, SirError> {
        self.vertex(id)
            .ok_or_else(|| SirError::invalid_graph(InvalidGraphError::UnknownId(id.to_string())))
    }

    pub fn edge(&self, id: &EdgeId) -> Option<&HyperEdge> {
        self.edges.get(id)
    }

    pub fn vertices(&self) -> impl Iterator<Item = &Vertex> {
        self.vertices.values()
    }

    pub fn vertex_ids(&self) -> impl Iterator<Item = &VertexId> {
        self.vertices.keys()
    }

    pub fn edges(&self) -> impl Iterator<Item = &HyperEdge> {
        self.edges.values()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn contains_vertex(&self, id: &VertexId) -> bool {
        self.vertices.contains_key(id)
    }

    pub fn data_flow_edges(&self) -> impl Iterator<Item = &HyperEdge> {
        self.edges.values().filter(|e| e.is_data_flow())
    }

    pub fn control_flow_edges(&self) -> impl Iterator<Item = &HyperEdge> {
        self.edges.values().filter(|e| e.is_control_flow())
    }

    pub fn parallel_edges(&self) -> impl Iterator<Item = &HyperEdge> {
        self.edges.values().filter(|e| e.is_parallel())
    }

    pub fn effect_edges(&self) -> impl Iterator<Item = &HyperEdge> {
        self.edges.values().filter(|e| e.is_effect())
    }

    /// Data-flow predecessors of a vertex, in edge-id order.
    pub fn predecessors(&self, id: &VertexId) -> Vec<&Vertex> {
        let mut preds = Vec::new();
        for edge in self.data_flow_edges() {
            if edge.targets.contains(id) {
                preds.extend(edge.sources.iter().filter_map(|s| self.vertices.get(s)));
            }
        }
        preds
    }

    /// Data-flow successors of a vertex, in edge-id order.
    pub fn successors(&self, id: &VertexId) -> Vec<&Vertex> {
        let mut succs = Vec::new();
        for edge in self.data_flow_edges() {
            if edge.sources.contains(id) {
                succs.extend(edge.targets.iter().filter_map(|t| self.vertices.get(t)));
            }
        }
        succs
    }

    /// Vertices in an order consistent with data-flow dependencies.
    ///
    /// Kahn's algorithm over the data-flow edges with the ready set ordered
    /// by textual id, so the result depends only on the graph's contents.
    /// Vertices trapped in a data-flow cycle (possible through loop
    /// back-edges) are appended afterwards, again in id order.
    pub fn topological_order(&self) -> Vec<VertexId> {
        let mut in_degree: BTreeMap<&VertexId, usize> =
            self.vertices.keys().map(|id| (id, 0)).collect();

        for edge in self.data_flow_edges() {
            for target in &edge.targets {
                if let Some(count) = in_degree.get_mut(target) {
                    *count += edge.sources.len();
                }
            }
        }

        let mut ready: BTreeSet<&VertexId> = in_degree
            .iter()
            .filter(|&(_, &d)| d == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut order = Vec::with_capacity(self.vertices.len());

        while let Some(&id) = ready.iter().next() {
            ready.remove(id);
            order.push(id.clone());
            for edge in self.data_flow_edges() {
                let multiplicity = edge.sources.iter().filter(|s| *s == id).count();
                if multiplicity == 0 {
                    continue;
                }
                for target in &edge.targets {
                    if let Some(count) = in_degree.get_mut(target) {
                        *count = count.saturating_sub(multiplicity);
                        if *count == 0 {
                            ready.insert(target);
                        }
                    }
                }
            }
        }

        if order.len() < self.vertices.len() {
            let placed: BTreeSet<_> = order.iter().collect();
            let mut rest: Vec<VertexId> = self
                .vertices
                .keys()
                .filter(|id| !placed.contains(id))
                .cloned()
                .collect();
            rest.sort();
            order.extend(rest);
        }

        order
    }

    /// The topological position of each vertex.
    pub fn topological_positions(&self) -> BTreeMap<VertexId, usize> {
        self.topological_order()
            .into_iter()
            .enumerate()
            .map(|(i, id)| (id, i))
            .collect()
    }

    /// Groups of vertices declared independently executable by a parallel
    /// edge.
    pub fn find_parallel_regions(&self) -> Vec<EdgeGroup> {
        self.parallel_edges()
            .enumerate()
            .map(|(i, edge)| {
                let mut group = EdgeGroup::new(format!("parallel_region_{i}"), "parallel");
                group.add_edge(edge.id.clone());
                group.fusible = true;
                group
            })
            .collect()
    }

    /// All vertices named by a group's edges.
    pub fn group_vertices(&self, group: &EdgeGroup) -> BTreeSet<VertexId> {
        let mut result = BTreeSet::new();
        for edge_id in &group.edges {
            if let Some(edge) = self.edges.get(edge_id) {
                result.extend(edge.all_vertices().cloned());
            }
        }
        result
    }

    /// Per-vertex effect summary.
    pub fn compute_effects(&self) -> BTreeMap<VertexId, crate::effects::EffectSet> {
        self.vertices
            .iter()
            .map(|(id, v)| (id.clone(), v.metadata.effects.clone()))
            .collect()
    }

    /// Fast structural memory-safety check. This is not the region-model
    /// analysis: it only requires that every Load has an Alloc or Parameter
    /// data-flow predecessor, and that no vertex feeds any edge
    /// topologically after feeding a `move` region edge.
    pub fn verify_memory_safety(&self) -> Vec<String> {
        let mut violations = Vec::new();

        for vertex in self.vertices.values() {
            if vertex.kind == VertexKind::Load {
                let preds = self.predecessors(&vertex.id);
                if !preds
                    .iter()
                    .any(|p| matches!(p.kind, VertexKind::Alloc | VertexKind::Parameter))
                {
                    violations.push(format!("Load {} has no allocation predecessor", vertex.id));
                }
            }
        }

        let positions = self.topological_positions();
        let edge_point = |edge: &HyperEdge| {
            edge.targets
                .iter()
                .filter_map(|t| positions.get(t))
                .max()
                .copied()
                .unwrap_or(0)
        };

        for edge in self.edges.values() {
            let EdgeKind::RegionEdge {
                transfer: RegionTransfer::Move,
                ..
            } = &edge.kind
            else {
                continue;
            };
            let move_point = edge_point(edge);
            for src in &edge.sources {
                for other in self.edges.values() {
                    if other.id != edge.id
                        && other.sources.contains(src)
                        && edge_point(other) >= move_point
                    {
                        violations.push(format!("Vertex {src} used after move"));
                    }
                }
            }
        }

        violations
    }

    /// Deep copy with freshly minted vertex and edge identities. Edge
    /// topology is preserved through an internal old-to-new id map; entry
    /// and exit references are rewritten.
    pub fn clone_graph(&self) -> HyperGraph {
        self.clone_graph_with_mapping().0
    }

    /// [`HyperGraph::clone_graph`], also returning the old-to-new vertex id
    /// map so callers holding ids into this graph can follow the clone.
    pub fn clone_graph_with_mapping(&self) -> (HyperGraph, BTreeMap<VertexId, VertexId>) {
        let mut cloned = HyperGraph::new(self.name.clone());
        cloned.metadata = self.metadata.clone();

        let mut id_map: BTreeMap<VertexId, VertexId> = BTreeMap::new();
        for (old_id, vertex) in &self.vertices {
            let mut new_vertex = vertex.clone();
            new_vertex.id = VertexId::fresh();
            id_map.insert(old_id.clone(), new_vertex.id.clone());
            cloned.add_vertex(new_vertex);
        }

        let remap = |ids: &crate::sir::edge::Endpoints| {
            ids.iter()
                .map(|id| id_map.get(id).cloned().unwrap_or_else(|| id.clone()))
                .collect()
        };
        for edge in self.edges.values() {
            let mut new_edge = edge.clone();
            new_edge.id = EdgeId::fresh();
            new_edge.sources = remap(&edge.sources);
            new_edge.targets = remap(&edge.targets);
            cloned.add_edge(new_edge);
        }

        cloned.entry = self
            .entry
            .as_ref()
            .and_then(|e| id_map.get(e))
            .cloned();
        cloned.exits = self
            .exits
            .iter()
            .map(|e| id_map.get(e).cloned().unwrap_or_else(|| e.clone()))
            .collect();

        (cloned, id_map)
    }

    /// Serializes the graph into the plain tree consumed by the `.aion_sir`
    /// section.
    pub fn serialize(&self) -> Value {
        json!({
            "id": self.id,
            "name": self.name,
            "vertices": self.vertices.values().map(Vertex::serialize).collect::<Vec<_>>(),
            "edges": self.edges.values().map(HyperEdge::serialize).collect::<Vec<_>>(),
            "entry": self.entry,
            "exits": self.exits,
            "metadata": self.metadata,
        })
    }

    pub fn to_json_string(&self) -> String {
        // A graph assembled from plain trees always re-serializes.
        serde_json::to_string(&self.serialize()).unwrap_or_default()
    }

    pub fn to_json_pretty(&self) -> String {
        serde_json::to_string_pretty(&self.serialize()).unwrap_or_default()
    }

    /// Whether two groups may fuse: both must be fusible and they must
    /// share at least one vertex.
    pub fn groups_can_fuse(&self, a: &EdgeGroup, b: &EdgeGroup) -> bool {
        if !a.fusible || !b.fusible {
            return false;
        }
        !self.group_vertices(a).is_disjoint(&self.group_vertices(b))
    }

    pub fn from_dict(data: &Value) -> Result<HyperGraph, SirError> {
        let object = data.as_object().ok_or_else(|| {
            SirError::invalid_graph(InvalidGraphError::Malformed("graph is not a map".into()))
        })?;
        let get = |key: &str| {
            object.get(key).ok_or_else(|| {
                SirError::invalid_graph(InvalidGraphError::Malformed(format!(
                    "missing field `{key}`"
                )))
            })
        };
        let decode_field = |key: &str| -> Result<Value, SirError> { Ok(get(key)?.clone()) };

        let mut graph = HyperGraph::new("");
        graph.id = serde_json::from_value(decode_field("id")?).map_err(|e| {
            SirError::invalid_graph(InvalidGraphError::Malformed(format!("bad `id`: {e}")))
        })?;
        graph.name = get("name")?.as_str().unwrap_or_default().to_owned();

        for vertex_value in get("vertices")?.as_array().into_iter().flatten() {
            graph.add_vertex(Vertex::from_value(vertex_value)?);
        }
        for edge_value in get("edges")?.as_array().into_iter().flatten() {
            let edge = HyperEdge::from_value(edge_value)?;
            graph.add_edge_strict(edge)?;
        }

        graph.entry = serde_json::from_value(decode_field("entry")?).map_err(|e| {
            SirError::invalid_graph(InvalidGraphError::Malformed(format!("bad `entry`: {e}")))
        })?;
        graph.exits = serde_json::from_value(decode_field("exits")?).map_err(|e| {
            SirError::invalid_graph(InvalidGraphError::Malformed(format!("bad `exits`: {e}")))
        })?;
        if let Some(metadata) = get("metadata")?.as_object() {
            graph.metadata = metadata.clone().into_iter().collect();
        }

        Ok(graph)
    }
}

impl crate::utils::display::DebugLines for HyperGraph {
    fn debug_lines(&self) -> Vec<String> {
        self.edges
            .values()
            .map(|e| {
                let sources = e.sources.iter().map(VertexId::to_string).join(",");
                let targets = e.targets.iter().map(VertexId::to_string).join(",");
                format!("{} [{sources}] -> [{targets}]", e.kind.variant_name())
            })
            .sorted()
            .collect()
    }
}

impl HasValidityCheck for HyperGraph {
    fn check_validity(&self) -> Result<(), String> {
        for edge in self.edges.values() {
            for endpoint in edge.all_vertices() {
                if !self.vertices.contains_key(endpoint) {
                    return Err(format!(
                        "edge {} endpoint {endpoint} is not in the vertex set",
                        edge.id
                    ));
                }
            }
        }
        if let Some(entry) = &self.entry
            && !self.vertices.contains_key(entry)
        {
            return Err(format!("entry {entry} is not in the vertex set"));
        }
        for exit in &self.exits {
            if !self.vertices.contains_key(exit) {
                return Err(format!("exit {exit} is not in the vertex set"));
            }
        }
        Ok(())
    }
}

/// Concatenates the vertex and edge sets of several graphs, preserving
/// identities.
pub fn merge_graphs(graphs: &[&HyperGraph], name: impl Into<String>) -> HyperGraph {
    let mut merged = HyperGraph::new(name);
    for graph in graphs {
        for vertex in graph.vertices() {
            merged.add_vertex(vertex.clone());
        }
        for edge in graph.edges() {
            merged.add_edge(edge.clone());
        }
    }
    merged
}

/// Extracts the subgraph of vertices matching `criterion` plus their
/// directly connected neighbours, with every edge whose endpoints all
/// survive.
pub fn slice_graph(graph: &HyperGraph, criterion: impl Fn(&Vertex) -> bool) -> HyperGraph {
    let mut selected: BTreeSet<VertexId> = graph
        .vertices()
        .filter(|v| criterion(v))
        .map(|v| v.id.clone())
        .collect();

    for edge in graph.edges() {
        if edge.all_vertices().any(|v| selected.contains(v)) {
            selected.extend(edge.all_vertices().cloned());
        }
    }

    let mut sliced = HyperGraph::new(format!("{}_slice", graph.name));
    for id in &selected {
        if let Some(vertex) = graph.vertex(id) {
            sliced.add_vertex(vertex.clone());
        }
    }
    for edge in graph.edges() {
        if edge.all_vertices().all(|v| selected.contains(v)) {
            sliced.add_edge(edge.clone());
        }
    }
    sliced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{Effect, EffectSet};
    use crate::sir::edge::{ControlFlowKind, ParallelismKind};
    use crate::sir::vertex::HardwareAffinity;
    use crate::types::Ty;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn arith_graph() -> (HyperGraph, VertexId, VertexId, VertexId) {
        let mut g = HyperGraph::new("arith");
        let c1 = g.add_vertex(Vertex::constant(json!(42), Some(Ty::i64())));
        let c2 = g.add_vertex(Vertex::constant(json!(1), Some(Ty::i64())));
        let a = g.add_vertex(Vertex::apply(
            "op_+",
            Ty::i64(),
            EffectSet::from([Effect::Pure]),
        ));
        g.add_edge(HyperEdge::data_flow([c1.clone()], [a.clone()]));
        g.add_edge(HyperEdge::data_flow([c2.clone()], [a.clone()]));
        (g, c1, c2, a)
    }

    #[test]
    fn add_and_remove_vertices_and_edges() {
        let (mut g, c1, _c2, a) = arith_graph();
        assert_eq!(g.vertex_count(), 3);
        assert_eq!(g.edge_count(), 2);

        g.remove_vertex(&c1);
        assert_eq!(g.vertex_count(), 2);
        // The incident edge went with it.
        assert_eq!(g.edge_count(), 1);
        assert!(g.vertex(&a).is_some());
    }

    #[test]
    fn strict_edge_insert_rejects_unknown_endpoints() {
        let (mut g, c1, ..) = arith_graph();
        let stranger = Vertex::constant(json!(7), Some(Ty::i64()));
        let err = g
            .add_edge_strict(HyperEdge::data_flow(
                [c1.clone()],
                [stranger.id.clone()],
            ))
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            crate::error::SirErrorKind::InvalidGraph(InvalidGraphError::InvalidEdge { .. })
        ));
    }

    #[test]
    fn unknown_id_lookup_fails() {
        let (g, ..) = arith_graph();
        assert!(g.try_vertex(&"v999999".into()).is_err());
    }

    #[test]
    fn predecessors_and_successors_follow_data_flow_only() {
        let (mut g, c1, c2, a) = arith_graph();
        g.add_edge(HyperEdge::control_flow(
            a.clone(),
            c1.clone(),
            ControlFlowKind::Sequential,
            None,
        ));

        let pred_ids: BTreeSet<_> = g.predecessors(&a).iter().map(|v| v.id.clone()).collect();
        assert_eq!(pred_ids, BTreeSet::from([c1.clone(), c2.clone()]));
        // The control edge back to c1 does not make c1 a data-flow successor.
        assert!(g.successors(&a).is_empty());
    }

    #[test]
    fn topological_order_is_insertion_order_independent() {
        let (g, c1, c2, a) = arith_graph();

        let mut permuted = HyperGraph::new("arith");
        permuted.id = g.id.clone();
        let mut vertices: Vec<_> = g.vertices().cloned().collect();
        vertices.reverse();
        for v in vertices {
            permuted.add_vertex(v);
        }
        let mut edges: Vec<_> = g.edges().cloned().collect();
        edges.reverse();
        for e in edges {
            permuted.add_edge(e);
        }

        assert_eq!(g.topological_order(), permuted.topological_order());
        let order = g.topological_order();
        let pos = |id: &VertexId| order.iter().position(|o| o == id).unwrap();
        assert!(pos(&c1) < pos(&a));
        assert!(pos(&c2) < pos(&a));
    }

    #[test]
    fn serialization_round_trips_byte_for_byte() {
        let (g, ..) = arith_graph();
        let first = g.to_json_string();
        let reloaded = HyperGraph::from_dict(&g.serialize()).unwrap();
        assert_eq!(reloaded.to_json_string(), first);

        let vertex_ids: BTreeSet<_> = g.vertex_ids().cloned().collect();
        let reloaded_ids: BTreeSet<_> = reloaded.vertex_ids().cloned().collect();
        assert_eq!(vertex_ids, reloaded_ids);
        assert_eq!(g.exits, reloaded.exits);
    }

    #[test]
    fn clone_mints_fresh_identities_and_is_isolated() {
        let (g, ..) = arith_graph();
        let mut cloned = g.clone_graph();

        let original_ids: BTreeSet<_> = g.vertex_ids().cloned().collect();
        let cloned_ids: BTreeSet<_> = cloned.vertex_ids().cloned().collect();
        assert!(original_ids.is_disjoint(&cloned_ids));
        assert_eq!(cloned.edge_count(), g.edge_count());

        // Mutating the clone leaves the original untouched.
        let some_id = cloned.vertex_ids().next().cloned().unwrap();
        cloned.remove_vertex(&some_id);
        assert_eq!(g.vertex_count(), 3);
    }

    #[test]
    fn structural_memory_safety_flags_orphan_loads() {
        let mut g = HyperGraph::new("bad_load");
        let c = g.add_vertex(Vertex::constant(json!(0), Some(Ty::i64())));
        let l = g.add_vertex(Vertex::load(Ty::i64(), "heap"));
        g.add_edge(HyperEdge::data_flow([c], [l.clone()]));

        let violations = g.verify_memory_safety();
        assert_eq!(violations.len(), 1);
        assert!(violations[0].contains(l.as_str()));
    }

    #[test]
    fn structural_memory_safety_flags_use_after_move() {
        let mut g = HyperGraph::new("moved");
        let src = g.add_vertex(Vertex::alloc(8u64.into(), Ty::i64(), "heap"));
        let dst = g.add_vertex(Vertex::apply("consume", Ty::unit(), EffectSet::new()));
        let late = g.add_vertex(Vertex::apply("late_use", Ty::unit(), EffectSet::new()));
        g.add_edge(HyperEdge::region_transfer(
            src.clone(),
            dst.clone(),
            "heap",
            "gpu_global",
            RegionTransfer::Move,
        ));
        g.add_edge(HyperEdge::data_flow([dst.clone()], [late.clone()]));
        g.add_edge(HyperEdge::data_flow([src.clone()], [late]));

        let violations = g.verify_memory_safety();
        assert!(
            violations.iter().any(|v| v.contains("used after move")),
            "expected a use-after-move violation, got {violations:?}"
        );
    }

    #[test]
    fn merge_preserves_identities() {
        let (g1, ..) = arith_graph();
        let (g2, ..) = arith_graph();
        let merged = merge_graphs(&[&g1, &g2], "merged");
        assert_eq!(merged.vertex_count(), 6);
        assert_eq!(merged.edge_count(), 4);
        for id in g1.vertex_ids().chain(g2.vertex_ids()) {
            assert!(merged.contains_vertex(id));
        }
    }

    #[test]
    fn slice_keeps_matching_vertices_and_neighbours() {
        let mut g = HyperGraph::new("mixed");
        let k = g.add_vertex(Vertex::kernel_launch(
            "k",
            [1, 1, 1],
            [32, 1, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        ));
        let c = g.add_vertex(Vertex::constant(json!(3), Some(Ty::i64())));
        let lonely = g.add_vertex(Vertex::constant(json!(4), Some(Ty::i64())));
        g.add_edge(HyperEdge::data_flow([c.clone()], [k.clone()]));

        let sliced = slice_graph(&g, |v| v.metadata.affinity == HardwareAffinity::Gpu);
        assert!(sliced.contains_vertex(&k));
        assert!(sliced.contains_vertex(&c));
        assert!(!sliced.contains_vertex(&lonely));
        assert_eq!(sliced.edge_count(), 1);
    }

    #[test]
    fn debug_lines_are_sorted_and_name_endpoints() {
        use crate::utils::display::DebugLines;

        let (g, c1, _c2, a) = arith_graph();
        let lines = g.debug_lines();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.starts_with("DATA_FLOW")));
        assert!(lines.iter().any(|l| l.contains(c1.as_str()) && l.contains(a.as_str())));
        let mut sorted = lines.clone();
        sorted.sort();
        assert_eq!(lines, sorted);
    }

    #[test]
    fn groups_fuse_only_when_sharing_vertices() {
        let mut g = HyperGraph::new("groups");
        let a = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
        let b = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
        let c = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
        g.add_edge(HyperEdge::parallel(
            [a.clone(), b.clone()],
            ParallelismKind::Simd,
            HardwareAffinity::Any,
        ));
        g.add_edge(HyperEdge::parallel(
            [b.clone(), c.clone()],
            ParallelismKind::Simd,
            HardwareAffinity::Any,
        ));
        g.add_edge(HyperEdge::parallel(
            [c.clone()],
            ParallelismKind::Simd,
            HardwareAffinity::Any,
        ));

        let groups = g.find_parallel_regions();
        assert_eq!(groups.len(), 3);
        let by_members = |wanted: &BTreeSet<VertexId>| {
            groups
                .iter()
                .find(|grp| &g.group_vertices(grp) == wanted)
                .unwrap()
        };
        let ab = by_members(&BTreeSet::from([a.clone(), b.clone()]));
        let bc = by_members(&BTreeSet::from([b.clone(), c.clone()]));
        let c_only = by_members(&BTreeSet::from([c.clone()]));
        assert!(g.groups_can_fuse(ab, bc));
        assert!(!g.groups_can_fuse(ab, c_only));
    }

    #[test]
    fn parallel_regions_group_parallel_edges() {
        let mut g = HyperGraph::new("par");
        let a = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
        let b = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
        g.add_edge(HyperEdge::parallel(
            [a.clone(), b.clone()],
            ParallelismKind::Simd,
            HardwareAffinity::Any,
        ));

        let regions = g.find_parallel_regions();
        assert_eq!(regions.len(), 1);
        assert!(regions[0].fusible);
        let members = g.group_vertices(&regions[0]);
        assert_eq!(members, BTreeSet::from([a, b]));
    }
}
