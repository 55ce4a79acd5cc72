//! The rewrite tactic: adapting proofs across a graph transformation
//! without re-running full synthesis.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::proof::{ProofKind, ProofTerm};
use crate::sir::{HyperGraph, VertexKind};

/// Adapts `old_proofs` to `new_graph`. A proof survives when a
/// conservative syntactic check shows the transformation preserves its
/// property; surviving proofs gain a `rewrite_preserves(kind)` premise,
/// keep their evidence and wrap their witness in `(rewrite …)`.
pub fn synthesize_proofs_for_rewrite(
    old_graph: &HyperGraph,
    new_graph: &HyperGraph,
    old_proofs: &[ProofTerm],
) -> Vec<ProofTerm> {
    let mut adapted = Vec::new();
    for proof in old_proofs {
        if !rewrite_preserves_property(old_graph, new_graph, proof.kind) {
            tracing::debug!(kind = proof.kind.name(), "rewrite does not preserve proof");
            continue;
        }
        let mut premises = proof.premises.clone();
        premises.push(format!("rewrite_preserves({})", proof.kind.name()));
        adapted.push(ProofTerm {
            kind: proof.kind,
            conclusion: proof.conclusion.clone(),
            premises,
            evidence: proof.evidence.clone(),
            lambda_term: format!("(rewrite {})", proof.lambda_term),
        });
    }
    adapted
}

/// Allocation footprint of a graph: how many allocations of each
/// (region, size) shape it performs. Clones mint fresh vertex ids, so the
/// preservation check compares footprints rather than identities.
fn alloc_footprint(graph: &HyperGraph) -> BTreeMap<(String, Option<u64>), usize> {
    let mut footprint = BTreeMap::new();
    for vertex in graph.vertices() {
        if vertex.kind != VertexKind::Alloc {
            continue;
        }
        let key = (
            vertex.region_name().unwrap_or("heap").to_owned(),
            vertex.alloc_size(),
        );
        *footprint.entry(key).or_insert(0) += 1;
    }
    footprint
}

fn rewrite_preserves_property(
    old_graph: &HyperGraph,
    new_graph: &HyperGraph,
    kind: ProofKind,
) -> bool {
    match kind {
        // The transformed graph may not introduce an allocation shape the
        // original did not have.
        ProofKind::MemorySafety | ProofKind::BoundedResources | ProofKind::RegionValidity => {
            let old = alloc_footprint(old_graph);
            alloc_footprint(new_graph)
                .into_iter()
                .all(|(key, count)| old.get(&key).copied().unwrap_or(0) >= count)
        }
        // New parallel edges would need fresh race analysis; rewrites that
        // only collapse vertices keep the proof.
        ProofKind::RaceFreedom => {
            new_graph.parallel_edges().count() <= old_graph.parallel_edges().count()
        }
        // New synchronization points would need a fresh reachability graph.
        ProofKind::DeadlockFreedom => {
            let sync_count = |g: &HyperGraph| {
                g.vertices()
                    .filter(|v| v.metadata.effects.iter().any(|e| e.is_sync()))
                    .count()
            };
            sync_count(new_graph) <= sync_count(old_graph)
        }
        ProofKind::TypeSoundness | ProofKind::EffectConformance | ProofKind::LifetimeValidity => {
            true
        }
    }
}
