use std::collections::BTreeMap;

use serde_json::{Value, json};

use crate::effects::{Effect, EffectSet};
use crate::effects::analysis::sync_reachability;
use crate::memory::RegionManager;
use crate::proof::smt::SmtSolver;
use crate::proof::{ProofKind, ProofTerm};
use crate::sir::{HyperGraph, VertexKind};
use crate::types::TypeChecker;
use crate::utils::VertexId;

/// Synthesizes one proof per kind for a graph, omitting any kind whose
/// property does not hold. Omissions are reported through `errors` and
/// surface to consumers as a cleared capability bit.
#[derive(Debug)]
pub struct ProofSynthesizer {
    pub smt: SmtSolver,
    errors: Vec<String>,
}

impl Default for ProofSynthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl ProofSynthesizer {
    pub fn new() -> Self {
        Self {
            smt: SmtSolver::new(),
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    pub fn synthesize(&mut self, graph: &HyperGraph, regions: &RegionManager) -> Vec<ProofTerm> {
        tracing::info!(graph = %graph.name, "synthesizing safety proofs");
        self.errors.clear();

        let mut proofs = Vec::new();
        let attempts: [Option<ProofTerm>; 8] = [
            self.synthesize_memory_safety(graph),
            self.synthesize_race_freedom(graph),
            self.synthesize_deadlock_freedom(graph),
            self.synthesize_bounded_resources(graph),
            self.synthesize_type_soundness(graph),
            self.synthesize_effect_conformance(graph),
            self.synthesize_region_validity(graph, regions),
            self.synthesize_lifetime_validity(graph, regions),
        ];
        for proof in attempts.into_iter().flatten() {
            proofs.push(proof);
        }
        tracing::info!(count = proofs.len(), "proof synthesis finished");
        proofs
    }

    /// Walks the graph topologically, timestamping allocations, frees and
    /// uses. Every load of an allocation must sit after the allocation and
    /// before any free of it.
    fn synthesize_memory_safety(&mut self, graph: &HyperGraph) -> Option<ProofTerm> {
        let mut allocations = Vec::new();
        let mut frees = Vec::new();
        let mut uses = Vec::new();

        let mut alloc_index: BTreeMap<VertexId, usize> = BTreeMap::new();
        let mut free_points: BTreeMap<usize, u64> = BTreeMap::new();
        let mut alloc_points: BTreeMap<usize, u64> = BTreeMap::new();

        for (point, id) in graph.topological_order().into_iter().enumerate() {
            let point = point as u64 + 1;
            let Some(vertex) = graph.vertex(&id) else {
                continue;
            };

            match vertex.kind {
                VertexKind::Alloc => {
                    let index = allocations.len();
                    alloc_index.insert(id.clone(), index);
                    alloc_points.insert(index, point);
                    allocations.push(json!({
                        "id": index,
                        "vertex_id": id,
                        "region": vertex.region_name().unwrap_or("heap"),
                        "size": vertex.attributes.get("size").cloned().unwrap_or(Value::Null),
                        "program_point": point,
                    }));
                }
                VertexKind::Apply if vertex.is_free_like() => {
                    for pred in graph.predecessors(&id) {
                        if let Some(&index) = alloc_index.get(&pred.id) {
                            free_points.insert(index, point);
                            frees.push(json!({
                                "alloc_id": index,
                                "vertex_id": id,
                                "program_point": point,
                            }));
                        }
                    }
                }
                VertexKind::Load => {
                    for pred in graph.predecessors(&id) {
                        if let Some(&index) = alloc_index.get(&pred.id) {
                            uses.push(json!({
                                "vertex_id": id,
                                "alloc_id": index,
                                "program_point": point,
                            }));
                        }
                    }
                }
                _ => {}
            }
        }

        let valid = uses.iter().all(|use_record| {
            let alloc_id = use_record["alloc_id"].as_u64().unwrap_or(0) as usize;
            let use_point = use_record["program_point"].as_u64().unwrap_or(0);
            let after_alloc = alloc_points
                .get(&alloc_id)
                .is_some_and(|&alloc_point| alloc_point < use_point);
            let before_free = free_points
                .get(&alloc_id)
                .is_none_or(|&free_point| use_point < free_point);
            after_alloc && before_free
        });

        if !valid {
            self.errors.push("Memory safety violation detected".to_owned());
            return None;
        }

        Some(
            ProofTerm::new(ProofKind::MemorySafety, "memory_safe(program)")
                .with_premises(vec!["valid_alloc".into(), "region_bound".into()])
                .with_evidence(json!({
                    "allocations": allocations,
                    "frees": frees,
                    "uses": uses,
                })),
        )
    }

    /// Every pair of effectful vertices in a parallel region must be
    /// disjoint, read-only, or connected by an effect edge.
    fn synthesize_race_freedom(&mut self, graph: &HyperGraph) -> Option<ProofTerm> {
        let mut parallel_accesses = Vec::new();

        let ordered = |a: &VertexId, b: &VertexId| {
            graph.effect_edges().any(|e| {
                (e.sources.contains(a) && e.targets.contains(b))
                    || (e.sources.contains(b) && e.targets.contains(a))
            })
        };

        for edge in graph.parallel_edges() {
            let mut accesses: Vec<(VertexId, bool, Option<String>)> = Vec::new();
            for id in &edge.targets {
                let Some(vertex) = graph.vertex(id) else {
                    continue;
                };
                let region = vertex.region_name().map(str::to_owned);
                if vertex.metadata.effects.contains(&Effect::Read) {
                    accesses.push((id.clone(), true, region.clone()));
                }
                if vertex.metadata.effects.contains(&Effect::Write) {
                    accesses.push((id.clone(), false, region));
                }
            }

            for (i, (v1, ro1, r1)) in accesses.iter().enumerate() {
                for (v2, ro2, r2) in &accesses[i + 1..] {
                    if v1 == v2 {
                        continue;
                    }
                    let disjoint = r1 != r2;
                    let both_read = *ro1 && *ro2;
                    let pair_ordered = ordered(v1, v2);
                    parallel_accesses.push(json!({
                        "access1": { "vertex": v1, "read_only": ro1, "region": r1 },
                        "access2": { "vertex": v2, "read_only": ro2, "region": r2 },
                        "disjoint": disjoint,
                        "ordered": pair_ordered,
                        "safe": disjoint || both_read || pair_ordered,
                    }));
                }
            }
        }

        let all_safe = parallel_accesses
            .iter()
            .all(|p| p["safe"].as_bool().unwrap_or(false));
        if !all_safe {
            self.errors.push("Potential data race detected".to_owned());
            return None;
        }

        Some(
            ProofTerm::new(ProofKind::RaceFreedom, "race_free(program)")
                .with_premises(vec!["ordered_safe".into(), "disjoint_safe".into()])
                .with_evidence(json!({ "parallel_accesses": parallel_accesses })),
        )
    }

    /// Proves acyclicity of the synchronization-reachability graph.
    fn synthesize_deadlock_freedom(&mut self, graph: &HyperGraph) -> Option<ProofTerm> {
        let reachability = sync_reachability(graph);
        let lock_graph: BTreeMap<String, Vec<String>> = reachability
            .iter()
            .map(|(k, v)| {
                (
                    k.to_string(),
                    v.iter().map(|id| id.to_string()).collect(),
                )
            })
            .collect();

        if has_cycle(&lock_graph) {
            self.errors.push("Potential deadlock detected".to_owned());
            return None;
        }

        Some(
            ProofTerm::new(ProofKind::DeadlockFreedom, "deadlock_free(program)")
                .with_premises(vec!["acyclic_lock_graph".into()])
                .with_evidence(json!({ "lock_graph": lock_graph })),
        )
    }

    /// Every allocation must carry a finite integer size.
    fn synthesize_bounded_resources(&mut self, graph: &HyperGraph) -> Option<ProofTerm> {
        let mut allocations = Vec::new();
        let mut all_bounded = true;

        for vertex in graph.vertices() {
            if vertex.kind != VertexKind::Alloc {
                continue;
            }
            match vertex.alloc_size() {
                Some(size) => allocations.push(json!({
                    "vertex_id": vertex.id,
                    "size": size,
                    "bound": size,
                })),
                None => {
                    all_bounded = false;
                    allocations.push(json!({
                        "vertex_id": vertex.id,
                        "size": vertex.attributes.get("size").cloned().unwrap_or(Value::Null),
                        "bound": "unbounded",
                    }));
                }
            }
        }

        if !all_bounded {
            self.errors.push("Unbounded allocation detected".to_owned());
            return None;
        }

        Some(
            ProofTerm::new(ProofKind::BoundedResources, "bounded_resources(program)")
                .with_premises(vec!["allocation_bounds".into()])
                .with_evidence(json!({ "allocations": allocations })),
        )
    }

    /// A typing derivation for the whole program.
    fn synthesize_type_soundness(&mut self, graph: &HyperGraph) -> Option<ProofTerm> {
        let checker = TypeChecker::new();
        let (ok, diagnostics) = checker.check(graph);
        if !ok {
            self.errors.push(format!(
                "Type soundness violation ({} errors)",
                diagnostics.errors.len()
            ));
            return None;
        }

        Some(
            ProofTerm::new(ProofKind::TypeSoundness, "well_typed(program)")
                .with_premises(vec!["typing_derivation".into()])
                .with_evidence(json!({
                    "vertices": graph.vertex_count(),
                    "warnings": diagnostics.warnings,
                })),
        )
    }

    /// Declared effects bound the actual effects of every vertex. With
    /// lifter-declared annotations the two sets coincide; the record keeps
    /// the verifier honest once rewrites start adapting proofs.
    fn synthesize_effect_conformance(&mut self, graph: &HyperGraph) -> Option<ProofTerm> {
        let mut declared = EffectSet::new();
        let mut actual = EffectSet::new();
        let mut conformances = Vec::new();

        for vertex in graph.vertices() {
            if vertex.metadata.effects.is_empty() {
                continue;
            }
            declared.extend(vertex.metadata.effects.iter().copied());
            actual.extend(vertex.metadata.effects.iter().copied());
            conformances.push(json!({
                "vertex_id": vertex.id,
                "declared_effects": vertex.metadata.effects,
                "actual_effects": vertex.metadata.effects,
            }));
        }

        let premises = declared
            .iter()
            .map(|e| format!("declared({e:?})"))
            .collect();

        Some(
            ProofTerm::new(ProofKind::EffectConformance, "effects_conform(program)")
                .with_premises(premises)
                .with_evidence(json!({
                    "declared_effects": declared,
                    "actual_effects": actual,
                    "vertices": conformances,
                })),
        )
    }

    /// Simulated placement of every allocation inside its declared region:
    /// each access must satisfy offset + size ≤ region size.
    fn synthesize_region_validity(
        &mut self,
        graph: &HyperGraph,
        regions: &RegionManager,
    ) -> Option<ProofTerm> {
        let mut region_accesses = Vec::new();
        let mut cursor: BTreeMap<String, u64> = BTreeMap::new();
        let mut all_in_bounds = true;

        for id in graph.topological_order() {
            let Some(vertex) = graph.vertex(&id) else {
                continue;
            };
            if vertex.kind != VertexKind::Alloc {
                continue;
            }
            let Some(size) = vertex.alloc_size() else {
                continue;
            };
            let region_name = vertex.region_name().unwrap_or("heap").to_owned();
            let region_size = regions
                .region_by_name(&region_name)
                .and_then(|r| r.size)
                .unwrap_or(u64::MAX);

            let offset = *cursor.get(&region_name).unwrap_or(&0);
            let in_bounds = offset.saturating_add(size) <= region_size;
            all_in_bounds &= in_bounds;
            cursor.insert(region_name.clone(), offset + size);

            region_accesses.push(json!({
                "vertex_id": id,
                "region": region_name,
                "offset": offset,
                "size": size,
                "region_size": region_size,
                "in_bounds": in_bounds,
            }));
        }

        if !all_in_bounds {
            self.errors.push("Region bounds violation detected".to_owned());
            return None;
        }

        Some(
            ProofTerm::new(ProofKind::RegionValidity, "valid_region_accesses(program)")
                .with_premises(vec![
                    "in_region(program)".into(),
                    "bounds_check(program)".into(),
                ])
                .with_evidence(json!({ "region_accesses": region_accesses })),
        )
    }

    /// Region-derived lifetimes: every vertex's lifetime must be contained
    /// in its region's lifetime.
    fn synthesize_lifetime_validity(
        &mut self,
        graph: &HyperGraph,
        regions: &RegionManager,
    ) -> Option<ProofTerm> {
        let inferred = regions.infer_lifetimes(graph);
        let mut constraints = Vec::new();
        let mut all_satisfied = true;

        for vertex in graph.vertices() {
            let Some(region_name) = vertex.region_name() else {
                continue;
            };
            let Some(lifetime) = inferred.get(&vertex.id) else {
                continue;
            };
            let satisfied = regions
                .region_by_name(region_name)
                .map(|r| r.lifetime.outlives(lifetime))
                // Undeclared regions pin the vertex to a local scope, which
                // contains itself.
                .unwrap_or(true);
            all_satisfied &= satisfied;
            constraints.push(json!({
                "vertex_id": vertex.id,
                "region": region_name,
                "lifetime": lifetime.name,
                "satisfied": satisfied,
            }));
        }

        if !all_satisfied {
            self.errors.push("Lifetime violation detected".to_owned());
            return None;
        }

        Some(
            ProofTerm::new(ProofKind::LifetimeValidity, "valid_lifetimes(program)")
                .with_premises(vec![
                    "valid_source(program)".into(),
                    "lifetime_contained(program)".into(),
                ])
                .with_evidence(json!({ "lifetime_constraints": constraints })),
        )
    }
}

/// Cycle detection by depth-first search with a recursion stack, over an
/// id-keyed adjacency map.
pub(crate) fn has_cycle(graph: &BTreeMap<String, Vec<String>>) -> bool {
    fn dfs(
        node: &str,
        graph: &BTreeMap<String, Vec<String>>,
        visited: &mut std::collections::BTreeSet<String>,
        stack: &mut std::collections::BTreeSet<String>,
    ) -> bool {
        visited.insert(node.to_owned());
        stack.insert(node.to_owned());
        for neighbor in graph.get(node).into_iter().flatten() {
            if !visited.contains(neighbor) {
                if dfs(neighbor, graph, visited, stack) {
                    return true;
                }
            } else if stack.contains(neighbor) {
                return true;
            }
        }
        stack.remove(node);
        false
    }

    let mut visited = std::collections::BTreeSet::new();
    let mut stack = std::collections::BTreeSet::new();
    graph
        .keys()
        .any(|node| !visited.contains(node) && dfs(node, graph, &mut visited, &mut stack))
}
