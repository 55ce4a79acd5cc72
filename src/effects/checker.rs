use std::collections::BTreeMap;

use itertools::Itertools;

use crate::effects::capability::Capability;
use crate::effects::lattice::{Effect, EffectLattice};
use crate::error::{Diagnostics, RaceDetected, SirErrorKind};
use crate::sir::{EdgeKind, EffectOrdering, HyperGraph, VertexKind};
use crate::utils::VertexId;

/// Static effect checker: verifies annotations, effect-edge ordering and
/// capability flow along the topological order.
///
/// Capabilities propagate from data-flow predecessors. Roots (KernelLaunch
/// and Parameter vertices) may introduce the capability for their own
/// declared effects; everything else must inherit cover for any effect
/// beyond Pure and Read. A missing capability is a warning; conflicting
/// writers inside one parallel region are an error.
#[derive(Debug, Default)]
pub struct EffectChecker;

impl EffectChecker {
    pub fn new() -> Self {
        Self
    }

    pub fn check(&self, graph: &HyperGraph) -> Diagnostics {
        tracing::debug!(graph = %graph.name, "running effect checker");
        let mut diagnostics = Diagnostics::new();
        self.check_annotations(graph, &mut diagnostics);
        self.check_effect_ordering(graph, &mut diagnostics);
        self.check_parallel_writers(graph, &mut diagnostics);
        self.check_capability_flow(graph, &mut diagnostics);
        diagnostics
    }

    fn check_annotations(&self, graph: &HyperGraph, diagnostics: &mut Diagnostics) {
        for vertex in graph.vertices() {
            if vertex.metadata.effects.is_empty() {
                diagnostics.warn(format!("vertex {} has no effect annotation", vertex.id));
            }
        }
    }

    fn check_effect_ordering(&self, graph: &HyperGraph, diagnostics: &mut Diagnostics) {
        for edge in graph.effect_edges() {
            let EdgeKind::EffectEdge { ordering } = &edge.kind else {
                continue;
            };
            for src in &edge.sources {
                for tgt in &edge.targets {
                    let writes = |id: &VertexId| {
                        graph
                            .vertex(id)
                            .is_some_and(|v| v.metadata.effects.contains(&Effect::Write))
                    };
                    if writes(src) && writes(tgt) && *ordering != EffectOrdering::Seq {
                        diagnostics.warn(format!(
                            "write-write pair {src} / {tgt} under {ordering:?} ordering may need seq"
                        ));
                    }
                }
            }
        }
    }

    fn check_parallel_writers(&self, graph: &HyperGraph, diagnostics: &mut Diagnostics) {
        for edge in graph.parallel_edges() {
            let writers: Vec<_> = edge
                .targets
                .iter()
                .filter_map(|id| graph.vertex(id))
                .filter(|v| v.metadata.effects.contains(&Effect::Write))
                .collect();
            if writers.len() < 2 {
                continue;
            }
            let regions: Vec<_> = writers
                .iter()
                .filter_map(|v| v.region_name())
                .unique()
                .collect();
            if regions.len() == 1 && writers.iter().all(|v| v.region_name().is_some()) {
                for (w1, w2) in writers.iter().tuple_windows() {
                    diagnostics.error(SirErrorKind::RaceDetected(RaceDetected {
                        first: w1.id.to_string(),
                        second: w2.id.to_string(),
                        region: regions[0].to_owned(),
                    }));
                }
            }
        }
    }

    fn check_capability_flow(&self, graph: &HyperGraph, diagnostics: &mut Diagnostics) {
        let mut available: BTreeMap<VertexId, Vec<Capability>> = BTreeMap::new();

        for id in graph.topological_order() {
            let Some(vertex) = graph.vertex(&id) else {
                continue;
            };

            let mut caps: Vec<Capability> = Vec::new();
            for pred in graph.predecessors(&id) {
                for cap in available.get(&pred.id).into_iter().flatten() {
                    if !caps.contains(cap) {
                        caps.push(cap.clone());
                    }
                }
            }

            let is_root = matches!(
                vertex.kind,
                VertexKind::KernelLaunch | VertexKind::Parameter
            );
            if is_root {
                let introduced = Capability::new(EffectLattice::join_all(
                    vertex.metadata.effects.iter().copied(),
                ));
                if !caps.contains(&introduced) {
                    caps.push(introduced);
                }
            } else {
                for &effect in &vertex.metadata.effects {
                    if matches!(effect, Effect::Pure | Effect::Read) {
                        continue;
                    }
                    if !caps.iter().any(|c| c.can_perform(effect)) {
                        diagnostics.warn(format!(
                            "vertex {id} performs {effect:?} without capability"
                        ));
                    }
                }
            }

            available.insert(id, caps);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectSet;
    use crate::sir::{HardwareAffinity, HyperEdge, ParallelismKind, Vertex};
    use crate::types::Ty;

    #[test]
    fn unannotated_vertices_warn() {
        let mut g = HyperGraph::new("bare");
        let mut v = Vertex::apply("f", Ty::unit(), EffectSet::new());
        v.metadata.effects.clear();
        g.add_vertex(v);

        let diagnostics = EffectChecker::new().check(&g);
        assert!(diagnostics.is_clean());
        assert_eq!(diagnostics.warnings.len(), 1);
    }

    #[test]
    fn kernel_roots_grant_downstream_capabilities() {
        let mut g = HyperGraph::new("granted");
        let k = g.add_vertex(Vertex::kernel_launch(
            "k",
            [1, 1, 1],
            [32, 1, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        ));
        let w = g.add_vertex(Vertex::store(Ty::i64(), "gpu_global"));
        g.add_edge(HyperEdge::data_flow([k], [w]));

        let diagnostics = EffectChecker::new().check(&g);
        let uncovered: Vec<_> = diagnostics
            .warnings
            .iter()
            .filter(|w| w.contains("without capability"))
            .collect();
        assert!(uncovered.is_empty(), "{uncovered:?}");
    }

    #[test]
    fn effectful_vertex_without_provenance_of_capability_warns() {
        let mut g = HyperGraph::new("orphan_io");
        g.add_vertex(Vertex::apply(
            "print",
            Ty::unit(),
            EffectSet::from([Effect::Io]),
        ));

        let diagnostics = EffectChecker::new().check(&g);
        assert!(
            diagnostics
                .warnings
                .iter()
                .any(|w| w.contains("without capability"))
        );
    }

    #[test]
    fn conflicting_parallel_writers_error() {
        let mut g = HyperGraph::new("conflict");
        let s1 = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
        let s2 = g.add_vertex(Vertex::store(Ty::i64(), "heap"));
        g.add_edge(HyperEdge::parallel(
            [s1, s2],
            ParallelismKind::Simd,
            HardwareAffinity::Any,
        ));

        let diagnostics = EffectChecker::new().check(&g);
        assert!(!diagnostics.is_clean());
        assert!(matches!(
            diagnostics.errors[0].kind(),
            SirErrorKind::RaceDetected(_)
        ));
    }
}
