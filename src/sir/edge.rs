use serde_derive::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::sir::vertex::HardwareAffinity;
use crate::utils::{EdgeId, VertexId};

pub type Endpoints = SmallVec<[VertexId; 2]>;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ControlFlowKind {
    Sequential,
    Branch,
    LoopEntry,
    LoopBack,
    LoopExit,
    Call,
    Return,
    Exception,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ParallelismKind {
    Simd,
    Simt,
    ThreadLevel,
    TaskLevel,
    Pipeline,
    Dataflow,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EffectOrdering {
    Seq,
    Par,
    Atomic,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryAccess {
    Read,
    Write,
    Atomic,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionTransfer {
    Copy,
    Move,
    Borrow,
}

/// The typed payload of a hyperedge.
#[derive(Clone, Debug, PartialEq)]
pub enum EdgeKind {
    DataFlow {
        port: u32,
        affinity: HardwareAffinity,
    },
    ControlFlow {
        kind: ControlFlowKind,
        condition: Option<String>,
    },
    EffectEdge {
        ordering: EffectOrdering,
    },
    ParallelEdge {
        kind: ParallelismKind,
        simd_width: u32,
        num_threads: u32,
        warp_size: u32,
        affinity: HardwareAffinity,
    },
    MemoryEdge {
        access: MemoryAccess,
        region: String,
    },
    RegionEdge {
        source_region: String,
        target_region: String,
        transfer: RegionTransfer,
    },
}

impl EdgeKind {
    /// The variant name as serialized (`DATA_FLOW`, `CONTROL_FLOW`, …).
    pub fn variant_name(&self) -> &'static str {
        match self {
            EdgeKind::DataFlow { .. } => "DATA_FLOW",
            EdgeKind::ControlFlow { .. } => "CONTROL_FLOW",
            EdgeKind::EffectEdge { .. } => "EFFECT_EDGE",
            EdgeKind::ParallelEdge { .. } => "PARALLEL_EDGE",
            EdgeKind::MemoryEdge { .. } => "MEMORY_EDGE",
            EdgeKind::RegionEdge { .. } => "REGION_EDGE",
        }
    }
}

/// Lightweight scheduling metadata attached to every edge.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeMetadata {
    pub weight: f64,
    pub latency: u64,
    pub bandwidth: u64,
    pub affinity: HardwareAffinity,
    pub critical_path: bool,
}

impl Default for EdgeMetadata {
    fn default() -> Self {
        Self {
            weight: 1.0,
            latency: 0,
            bandwidth: 0,
            affinity: HardwareAffinity::Any,
            critical_path: false,
        }
    }
}

/// A typed relation over two ordered vertex lists. Either list may hold one
/// or many vertices; parallel edges use an empty source list.
#[derive(Clone, Debug, PartialEq)]
pub struct HyperEdge {
    pub id: EdgeId,
    pub kind: EdgeKind,
    pub sources: Endpoints,
    pub targets: Endpoints,
    pub metadata: EdgeMetadata,
}

impl HyperEdge {
    fn new(kind: EdgeKind, sources: Endpoints, targets: Endpoints) -> Self {
        Self {
            id: EdgeId::fresh(),
            kind,
            sources,
            targets,
            metadata: EdgeMetadata::default(),
        }
    }

    pub fn data_flow<S, T>(sources: S, targets: T) -> Self
    where
        S: IntoIterator<Item = VertexId>,
        T: IntoIterator<Item = VertexId>,
    {
        Self::new(
            EdgeKind::DataFlow {
                port: 0,
                affinity: HardwareAffinity::Any,
            },
            sources.into_iter().collect(),
            targets.into_iter().collect(),
        )
    }

    pub fn data_flow_on_port<S, T>(sources: S, targets: T, port: u32) -> Self
    where
        S: IntoIterator<Item = VertexId>,
        T: IntoIterator<Item = VertexId>,
    {
        Self::new(
            EdgeKind::DataFlow {
                port,
                affinity: HardwareAffinity::Any,
            },
            sources.into_iter().collect(),
            targets.into_iter().collect(),
        )
    }

    pub fn control_flow(
        source: VertexId,
        target: VertexId,
        kind: ControlFlowKind,
        condition: Option<String>,
    ) -> Self {
        Self::new(
            EdgeKind::ControlFlow { kind, condition },
            Endpoints::from_iter([source]),
            Endpoints::from_iter([target]),
        )
    }

    pub fn effect_order(source: VertexId, target: VertexId, ordering: EffectOrdering) -> Self {
        Self::new(
            EdgeKind::EffectEdge { ordering },
            Endpoints::from_iter([source]),
            Endpoints::from_iter([target]),
        )
    }

    pub fn parallel<I>(vertices: I, kind: ParallelismKind, affinity: HardwareAffinity) -> Self
    where
        I: IntoIterator<Item = VertexId>,
    {
        Self::new(
            EdgeKind::ParallelEdge {
                kind,
                simd_width: 1,
                num_threads: 1,
                warp_size: 32,
                affinity,
            },
            Endpoints::new(),
            vertices.into_iter().collect(),
        )
    }

    pub fn memory(
        source: VertexId,
        target: VertexId,
        access: MemoryAccess,
        region: impl Into<String>,
    ) -> Self {
        Self::new(
            EdgeKind::MemoryEdge {
                access,
                region: region.into(),
            },
            Endpoints::from_iter([source]),
            Endpoints::from_iter([target]),
        )
    }

    pub fn region_transfer(
        source: VertexId,
        target: VertexId,
        source_region: impl Into<String>,
        target_region: impl Into<String>,
        transfer: RegionTransfer,
    ) -> Self {
        Self::new(
            EdgeKind::RegionEdge {
                source_region: source_region.into(),
                target_region: target_region.into(),
                transfer,
            },
            Endpoints::from_iter([source]),
            Endpoints::from_iter([target]),
        )
    }

    pub fn with_affinity(mut self, affinity: HardwareAffinity) -> Self {
        self.metadata.affinity = affinity;
        self
    }

    /// All endpoints, sources first.
    pub fn all_vertices(&self) -> impl Iterator<Item = &VertexId> {
        self.sources.iter().chain(self.targets.iter())
    }

    pub fn touches(&self, vertex: &VertexId) -> bool {
        self.sources.contains(vertex) || self.targets.contains(vertex)
    }

    pub fn is_data_flow(&self) -> bool {
        matches!(self.kind, EdgeKind::DataFlow { .. })
    }

    pub fn is_control_flow(&self) -> bool {
        matches!(self.kind, EdgeKind::ControlFlow { .. })
    }

    pub fn is_parallel(&self) -> bool {
        matches!(self.kind, EdgeKind::ParallelEdge { .. })
    }

    pub fn is_effect(&self) -> bool {
        matches!(self.kind, EdgeKind::EffectEdge { .. })
    }

    /// For a data-flow edge used across a loop back-edge, whether the edge
    /// participates in topological ordering.
    pub fn is_loop_back(&self) -> bool {
        matches!(
            self.kind,
            EdgeKind::ControlFlow {
                kind: ControlFlowKind::LoopBack,
                ..
            }
        )
    }
}

/// A named group of related hyperedges, the unit of fusion analysis.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeGroup {
    pub name: String,
    pub edges: Vec<EdgeId>,
    pub pattern: String,
    pub fusible: bool,
}

impl EdgeGroup {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            edges: Vec::new(),
            pattern: pattern.into(),
            fusible: false,
        }
    }

    pub fn add_edge(&mut self, edge: EdgeId) {
        self.edges.push(edge);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(id: &str) -> VertexId {
        id.into()
    }

    #[test]
    fn data_flow_edge_orders_endpoints() {
        let e = HyperEdge::data_flow([v("v1"), v("v2")], [v("v3")]);
        assert!(e.is_data_flow());
        assert_eq!(e.sources.as_slice(), &[v("v1"), v("v2")]);
        assert_eq!(e.targets.as_slice(), &[v("v3")]);
        let all: Vec<_> = e.all_vertices().cloned().collect();
        assert_eq!(all, vec![v("v1"), v("v2"), v("v3")]);
    }

    #[test]
    fn parallel_edge_has_no_sources() {
        let e = HyperEdge::parallel(
            [v("a"), v("b")],
            ParallelismKind::Simd,
            HardwareAffinity::Gpu,
        );
        assert!(e.is_parallel());
        assert!(e.sources.is_empty());
        assert_eq!(e.targets.len(), 2);
    }

    #[test]
    fn region_edge_names_both_regions() {
        let e = HyperEdge::region_transfer(
            v("a"),
            v("b"),
            "heap",
            "gpu_global",
            RegionTransfer::Move,
        );
        match &e.kind {
            EdgeKind::RegionEdge {
                source_region,
                target_region,
                transfer,
            } => {
                assert_eq!(source_region, "heap");
                assert_eq!(target_region, "gpu_global");
                assert_eq!(*transfer, RegionTransfer::Move);
            }
            other => panic!("unexpected kind {other:?}"),
        }
    }

    #[test]
    fn variant_names_match_wire_format() {
        let e = HyperEdge::effect_order(v("a"), v("b"), EffectOrdering::Seq);
        assert_eq!(e.kind.variant_name(), "EFFECT_EDGE");
        assert!(e.is_effect());
    }
}
