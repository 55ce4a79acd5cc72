use std::collections::BTreeSet;

use crate::fusion::{FusionPattern, FusionPatternKind, FusionResult, detect_fusion_patterns};
use crate::proof::{ProofTerm, synthesize_proofs_for_rewrite};
use crate::sir::{HyperEdge, HyperGraph, Parallelism, Provenance, Vertex, merge_graphs};
use crate::types::Ty;
use crate::utils::VertexId;

/// The fusion rewrite engine. Detection runs once on the input graph;
/// rewrites are applied on a clone, in pattern-priority order, in a single
/// outer pass. Existing proofs are re-derived through the rewrite tactic.
#[derive(Debug, Default)]
pub struct KernelFuser;

impl KernelFuser {
    pub fn new() -> Self {
        Self
    }

    pub fn optimize(&self, graph: &HyperGraph, proofs: &[ProofTerm]) -> FusionResult {
        let patterns = detect_fusion_patterns(graph);
        let (mut optimized, id_map) = graph.clone_graph_with_mapping();

        if patterns.is_empty() {
            return FusionResult {
                success: true,
                graph: optimized,
                fused_vertices: Vec::new(),
                removed_vertices: Vec::new(),
                proofs: proofs.to_vec(),
                speedup_estimate: 1.0,
                rewrites_applied: 0,
            };
        }

        let mut fused_vertices = Vec::new();
        let mut removed_vertices = Vec::new();
        let mut speedup = 1.0;
        let mut rewrites = 0usize;

        for pattern in &patterns {
            if !pattern.can_fuse(graph) {
                tracing::debug!(kind = ?pattern.kind, "pattern rejected by legality predicate");
                continue;
            }
            // Follow the constituents into the clone; a vertex consumed by
            // an earlier rewrite drops the pattern.
            let constituents: Vec<VertexId> = pattern
                .vertices
                .iter()
                .filter_map(|v| id_map.get(v).cloned())
                .filter(|v| optimized.contains_vertex(v))
                .collect();
            if constituents.len() < pattern.vertices.len() || constituents.len() < 2 {
                continue;
            }

            let applied = match pattern.kind {
                FusionPatternKind::TransferElimination => {
                    self.elide_transfers(&mut optimized, &constituents, &mut removed_vertices)
                }
                _ => self.collapse(
                    &mut optimized,
                    pattern,
                    &constituents,
                    &mut fused_vertices,
                    &mut removed_vertices,
                ),
            };
            if applied {
                tracing::info!(
                    kind = ?pattern.kind,
                    constituents = constituents.len(),
                    speedup = pattern.estimated_speedup,
                    "applied fusion rewrite"
                );
                speedup *= pattern.estimated_speedup;
                rewrites += 1;
            }
        }

        let proofs = synthesize_proofs_for_rewrite(graph, &optimized, proofs);
        FusionResult {
            success: true,
            graph: optimized,
            fused_vertices,
            removed_vertices,
            proofs,
            speedup_estimate: speedup,
            rewrites_applied: rewrites,
        }
    }

    /// Collapses the constituents into one fused vertex, redirecting every
    /// boundary edge onto it and removing the constituents with their
    /// interior edges.
    fn collapse(
        &self,
        graph: &mut HyperGraph,
        pattern: &FusionPattern,
        constituents: &[VertexId],
        fused_vertices: &mut Vec<VertexId>,
        removed_vertices: &mut Vec<VertexId>,
    ) -> bool {
        let members: BTreeSet<&VertexId> = constituents.iter().collect();

        let affinity = constituents
            .iter()
            .filter_map(|id| graph.vertex(id))
            .map(|v| v.metadata.affinity)
            .max()
            .unwrap_or(pattern.target)
            .max(pattern.target);
        let effects = {
            let mut effects = crate::effects::EffectSet::new();
            for id in constituents {
                if let Some(vertex) = graph.vertex(id) {
                    effects.extend(vertex.metadata.effects.iter().copied());
                }
            }
            effects
        };
        let provenance = Provenance::new("optimization")
            .with_transformation(format!("{}_fusion", pattern.kind.fused_name()));

        let fused = if pattern.kind == FusionPatternKind::KernelFusion {
            let dims = self.max_launch_dims(graph, constituents);
            Vertex::kernel_launch(
                pattern.kind.fused_name(),
                dims.grid_dim,
                dims.block_dim,
                Ty::unit(),
                affinity,
            )
        } else {
            Vertex::apply(pattern.kind.fused_name(), Ty::unit(), effects.clone())
                .with_affinity(affinity)
        }
        .with_effects(effects)
        .with_provenance(provenance);
        let fused_id = graph.add_vertex(fused);

        // Boundary edges, gathered before any mutation.
        let mut incoming: BTreeSet<VertexId> = BTreeSet::new();
        let mut outgoing: BTreeSet<VertexId> = BTreeSet::new();
        for id in constituents {
            for pred in graph.predecessors(id) {
                if !members.contains(&pred.id) {
                    incoming.insert(pred.id.clone());
                }
            }
            for succ in graph.successors(id) {
                if !members.contains(&succ.id) && succ.id != fused_id {
                    outgoing.insert(succ.id.clone());
                }
            }
        }

        for pred in incoming {
            graph.add_edge(HyperEdge::data_flow([pred], [fused_id.clone()]));
        }
        for succ in outgoing {
            graph.add_edge(HyperEdge::data_flow([fused_id.clone()], [succ]));
        }
        for id in constituents {
            graph.remove_vertex(id);
            removed_vertices.push(id.clone());
        }

        fused_vertices.push(fused_id);
        true
    }

    fn max_launch_dims(&self, graph: &HyperGraph, constituents: &[VertexId]) -> Parallelism {
        let mut dims = Parallelism::default();
        for id in constituents {
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            let launch = vertex.metadata.parallelism.clone().unwrap_or_default();
            for axis in 0..3 {
                dims.grid_dim[axis] = dims.grid_dim[axis].max(launch.grid_dim[axis]);
                dims.block_dim[axis] = dims.block_dim[axis].max(launch.block_dim[axis]);
            }
        }
        dims
    }

    /// Keeps the first and last transfer of a memcpy chain and drops the
    /// interior ones, bridging the data flow around each removal.
    fn elide_transfers(
        &self,
        graph: &mut HyperGraph,
        constituents: &[VertexId],
        removed_vertices: &mut Vec<VertexId>,
    ) -> bool {
        if constituents.len() < 3 {
            return false;
        }
        let interior = &constituents[1..constituents.len() - 1];
        for id in interior {
            let preds: Vec<VertexId> = graph
                .predecessors(id)
                .into_iter()
                .map(|v| v.id.clone())
                .collect();
            let succs: Vec<VertexId> = graph
                .successors(id)
                .into_iter()
                .map(|v| v.id.clone())
                .collect();
            for pred in &preds {
                for succ in &succs {
                    graph.add_edge(HyperEdge::data_flow([pred.clone()], [succ.clone()]));
                }
            }
            graph.remove_vertex(id);
            removed_vertices.push(id.clone());
        }
        true
    }
}

/// The zero-copy pass: a memcpy-like Apply whose predecessor and successor
/// live in the same region is bypassed with a direct edge.
pub fn fuse_with_zero_copy(graph: &HyperGraph) -> HyperGraph {
    let mut optimized = graph.clone_graph();

    let transfers: Vec<VertexId> = optimized
        .vertices()
        .filter(|v| v.is_memcpy_like())
        .map(|v| v.id.clone())
        .collect();

    for transfer in transfers {
        let preds: Vec<VertexId> = optimized
            .predecessors(&transfer)
            .into_iter()
            .map(|v| v.id.clone())
            .collect();
        let succs: Vec<VertexId> = optimized
            .successors(&transfer)
            .into_iter()
            .map(|v| v.id.clone())
            .collect();
        let (Some(first_pred), Some(first_succ)) = (preds.first(), succs.first()) else {
            continue;
        };

        let region_of = |id: &VertexId| {
            optimized
                .vertex(id)
                .and_then(|v| v.region_name())
                .map(str::to_owned)
        };
        if region_of(first_pred) != region_of(first_succ) {
            continue;
        }

        for pred in &preds {
            for succ in &succs {
                optimized.add_edge(HyperEdge::data_flow([pred.clone()], [succ.clone()]));
            }
        }
        optimized.remove_vertex(&transfer);
        tracing::debug!(%transfer, "bypassed same-region copy");
    }

    optimized
}

/// Fuses per-language graphs into one pipeline and optimizes it.
#[derive(Debug, Default)]
pub struct CrossLanguageFuser {
    fuser: KernelFuser,
}

impl CrossLanguageFuser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fuse_pipeline(&self, graphs: &[&HyperGraph]) -> FusionResult {
        let merged = merge_graphs(graphs, "cross_language_fused");
        self.fuser.optimize(&merged, &[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::{Effect, EffectSet};
    use crate::memory::RegionManager;
    use crate::proof::{ProofKind, ProofSynthesizer};
    use crate::sir::{HardwareAffinity, VertexKind};
    use crate::types::Ty;

    fn two_kernel_graph() -> (HyperGraph, VertexId, VertexId) {
        // input alloc -> k1 -> k2 -> store sink

        let mut g = HyperGraph::new("kernels");
        let input = g.add_vertex(Vertex::alloc(256u64.into(), Ty::f32(), "gpu_global"));
        let k1 = g.add_vertex(Vertex::kernel_launch(
            "scale",
            [16, 16, 1],
            [16, 16, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        ));
        let k2 = g.add_vertex(Vertex::kernel_launch(
            "offset",
            [16, 16, 1],
            [16, 16, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        ));
        let sink = g.add_vertex(Vertex::store(Ty::f32(), "gpu_global"));
        g.add_edge(HyperEdge::data_flow([input.clone()], [k1.clone()]));
        g.add_edge(HyperEdge::data_flow([k1.clone()], [k2.clone()]));
        g.add_edge(HyperEdge::data_flow([k2.clone()], [sink.clone()]));
        (g, input, sink)
    }

    #[test]
    fn kernel_fusion_collapses_to_one_launch() {
        let (g, ..) = two_kernel_graph();
        let result = KernelFuser::new().optimize(&g, &[]);

        assert!(result.success);
        assert!(result.speedup_estimate >= 2.0);
        assert_eq!(result.rewrites_applied, 1);

        let launches: Vec<_> = result
            .graph
            .vertices()
            .filter(|v| v.kind == VertexKind::KernelLaunch)
            .collect();
        assert_eq!(launches.len(), 1);
        let fused = launches[0];
        assert!(fused.metadata.effects.contains(&Effect::WarpSync));
        assert_eq!(fused.metadata.affinity, HardwareAffinity::Gpu);
        assert_eq!(
            fused.metadata.parallelism.as_ref().unwrap().grid_dim,
            [16, 16, 1]
        );

        // The fused vertex inherits the boundary edges of the originals.
        let input_clone = result
            .graph
            .vertices()
            .find(|v| v.kind == VertexKind::Alloc)
            .unwrap();
        let succs = result.graph.successors(&input_clone.id);
        assert_eq!(succs.len(), 1);
        assert_eq!(succs[0].id, fused.id);
        let sink_clone = result
            .graph
            .vertices()
            .find(|v| v.kind == VertexKind::Store)
            .unwrap();
        let preds = result.graph.predecessors(&sink_clone.id);
        assert_eq!(preds.len(), 1);
        assert_eq!(preds[0].id, fused.id);
    }

    #[test]
    fn fusion_is_idempotent_once_no_new_patterns_appear() {
        let (g, ..) = two_kernel_graph();
        let first = KernelFuser::new().optimize(&g, &[]);
        assert_eq!(first.rewrites_applied, 1);

        let second = KernelFuser::new().optimize(&first.graph, &[]);
        assert_eq!(second.rewrites_applied, 0);
        assert_eq!(second.speedup_estimate, 1.0);
        assert_eq!(second.graph.vertex_count(), first.graph.vertex_count());
    }

    #[test]
    fn fusion_rederives_proofs_through_the_rewrite_tactic() {
        let (g, ..) = two_kernel_graph();
        let mut synthesizer = ProofSynthesizer::new();
        let proofs = synthesizer.synthesize(&g, &RegionManager::new());
        assert!(proofs.iter().any(|p| p.kind == ProofKind::MemorySafety));

        let result = KernelFuser::new().optimize(&g, &proofs);
        let adapted = result
            .proofs
            .iter()
            .find(|p| p.kind == ProofKind::MemorySafety)
            .expect("memory safety proof survives fusion");
        assert!(
            adapted
                .premises
                .contains(&"rewrite_preserves(MEMORY_SAFETY)".to_owned())
        );
    }

    #[test]
    fn conflicting_writers_are_not_fused() {
        let mut g = HyperGraph::new("conflict");
        let k1 = g.add_vertex(
            Vertex::kernel_launch("a", [1, 1, 1], [32, 1, 1], Ty::unit(), HardwareAffinity::Gpu)
                .with_effects(EffectSet::from([Effect::Write]))
                .with_region("gpu_global"),
        );
        let k2 = g.add_vertex(
            Vertex::kernel_launch("b", [1, 1, 1], [32, 1, 1], Ty::unit(), HardwareAffinity::Gpu)
                .with_effects(EffectSet::from([Effect::Write]))
                .with_region("gpu_shared"),
        );
        g.add_edge(HyperEdge::data_flow([k1], [k2]));

        let result = KernelFuser::new().optimize(&g, &[]);
        assert_eq!(result.rewrites_applied, 0);
        let launches = result
            .graph
            .vertices()
            .filter(|v| v.kind == VertexKind::KernelLaunch)
            .count();
        assert_eq!(launches, 2);
    }

    #[test]
    fn zero_copy_bypasses_same_region_copies() {
        let mut g = HyperGraph::new("copies");
        let src = g.add_vertex(Vertex::alloc(64u64.into(), Ty::i64(), "heap"));
        let copy = g.add_vertex(Vertex::apply(
            "memcpy_local",
            Ty::unit(),
            EffectSet::from([Effect::Write]),
        ));
        let dst = g.add_vertex(Vertex::load(Ty::i64(), "heap"));
        g.add_edge(HyperEdge::data_flow([src.clone()], [copy.clone()]));
        g.add_edge(HyperEdge::data_flow([copy], [dst.clone()]));

        let optimized = fuse_with_zero_copy(&g);
        assert_eq!(optimized.vertex_count(), 2);
        let alloc = optimized
            .vertices()
            .find(|v| v.kind == VertexKind::Alloc)
            .unwrap();
        let succs = optimized.successors(&alloc.id);
        assert_eq!(succs.len(), 1);
        assert_eq!(succs[0].kind, VertexKind::Load);
    }

    #[test]
    fn cross_region_copies_are_kept() {
        let mut g = HyperGraph::new("staging");
        let src = g.add_vertex(Vertex::alloc(64u64.into(), Ty::i64(), "heap"));
        let copy = g.add_vertex(Vertex::apply(
            "memcpy_h2d",
            Ty::unit(),
            EffectSet::from([Effect::Write]),
        ));
        let dst = g.add_vertex(Vertex::load(Ty::i64(), "gpu_global"));
        g.add_edge(HyperEdge::data_flow([src], [copy.clone()]));
        g.add_edge(HyperEdge::data_flow([copy], [dst]));

        let optimized = fuse_with_zero_copy(&g);
        assert_eq!(optimized.vertex_count(), 3);
    }
}
