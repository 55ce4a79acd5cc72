//! The kernel-fusion optimizer: cross-language pattern detection and
//! proof-preserving rewrites over the hypergraph.

pub mod detect;
pub mod optimize;

pub use detect::detect_fusion_patterns;
pub use optimize::{CrossLanguageFuser, KernelFuser, fuse_with_zero_copy};

use std::collections::BTreeSet;

use crate::effects::{Effect, EffectSet};
use crate::proof::ProofTerm;
use crate::sir::{EdgeKind, HardwareAffinity, HyperGraph};
use crate::utils::VertexId;

/// The fusion pattern catalog, in rewrite priority order.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FusionPatternKind {
    PolyglotPipeline,
    KernelFusion,
    TransferElimination,
    MemoryCoalescing,
    DataflowFusion,
    LoopFusion,
    PipelineFusion,
}

impl FusionPatternKind {
    /// The name the fused vertex's callee encodes.
    pub fn fused_name(self) -> &'static str {
        match self {
            FusionPatternKind::PolyglotPipeline => "fused_polyglot_kernel",
            FusionPatternKind::KernelFusion => "fused_kernel",
            FusionPatternKind::TransferElimination => "elided_transfer",
            FusionPatternKind::MemoryCoalescing => "coalesced_load",
            FusionPatternKind::DataflowFusion => "fused_dataflow",
            FusionPatternKind::LoopFusion => "fused_loop",
            FusionPatternKind::PipelineFusion => "fused_pipeline",
        }
    }
}

/// A detected occurrence of a fusion pattern: the vertices that may be
/// collapsed, the estimated speedup and the hardware target of the fused
/// vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct FusionPattern {
    pub kind: FusionPatternKind,
    pub vertices: Vec<VertexId>,
    pub estimated_speedup: f64,
    pub target: HardwareAffinity,
}

impl FusionPattern {
    pub fn new(kind: FusionPatternKind, vertices: Vec<VertexId>, speedup: f64) -> Self {
        Self {
            kind,
            vertices,
            estimated_speedup: speedup,
            target: HardwareAffinity::Any,
        }
    }

    pub fn with_target(mut self, target: HardwareAffinity) -> Self {
        self.target = target;
        self
    }

    /// The union of the constituents' effects.
    pub fn combined_effects(&self, graph: &HyperGraph) -> EffectSet {
        let mut effects = EffectSet::new();
        for id in &self.vertices {
            if let Some(vertex) = graph.vertex(id) {
                effects.extend(vertex.metadata.effects.iter().copied());
            }
        }
        effects
    }

    /// Legality: at most one distinct known write region among the
    /// constituents, and every parallel edge the pattern touches keeps its
    /// affinity.
    pub fn can_fuse(&self, graph: &HyperGraph) -> bool {
        let members: BTreeSet<&VertexId> = self.vertices.iter().collect();

        let mut write_regions: BTreeSet<Option<&str>> = BTreeSet::new();
        for id in &self.vertices {
            if let Some(vertex) = graph.vertex(id)
                && vertex.metadata.effects.contains(&Effect::Write)
            {
                write_regions.insert(vertex.region_name());
            }
        }
        let known: BTreeSet<_> = write_regions.iter().flatten().collect();
        if known.len() > 1 && !write_regions.contains(&None) {
            return false;
        }

        for edge in graph.parallel_edges() {
            if !edge.targets.iter().any(|t| members.contains(t)) {
                continue;
            }
            let EdgeKind::ParallelEdge { affinity, .. } = &edge.kind else {
                continue;
            };
            if *affinity != HardwareAffinity::Any && *affinity != self.target {
                return false;
            }
        }

        true
    }
}

/// Outcome of a fusion pass.
#[derive(Debug)]
pub struct FusionResult {
    pub success: bool,
    pub graph: HyperGraph,
    pub fused_vertices: Vec<VertexId>,
    pub removed_vertices: Vec<VertexId>,
    pub proofs: Vec<ProofTerm>,
    pub speedup_estimate: f64,
    pub rewrites_applied: usize,
}
