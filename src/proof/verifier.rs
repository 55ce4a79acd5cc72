use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::{ProofInvalid, SirError, SirErrorKind};
use crate::proof::synthesis::has_cycle;
use crate::proof::{ProofKind, ProofTerm};

/// Axioms, previously verified lemmas and local assumptions available
/// during verification. Axioms are keyed by head symbol, so a premise like
/// `declared(Io)` discharges against the `declared` axiom family.
#[derive(Clone, Debug, Default)]
pub struct ProofContext {
    axioms: BTreeMap<String, String>,
    lemmas: BTreeMap<String, ProofTerm>,
    assumptions: Vec<String>,
}

impl ProofContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_axiom(&mut self, name: impl Into<String>, statement: impl Into<String>) {
        self.axioms.insert(name.into(), statement.into());
    }

    pub fn add_lemma(&mut self, conclusion: impl Into<String>, proof: ProofTerm) {
        self.lemmas.insert(conclusion.into(), proof);
    }

    /// An extended context carrying one more assumption.
    pub fn assume(&self, assumption: impl Into<String>) -> ProofContext {
        let mut next = self.clone();
        next.assumptions.push(assumption.into());
        next
    }

    pub fn is_valid_premise(&self, premise: &str) -> bool {
        let head = premise.split('(').next().unwrap_or(premise).trim();
        self.axioms.contains_key(head)
            || self.assumptions.iter().any(|a| a == premise)
            || self.lemmas.contains_key(premise)
    }
}

/// The small trusted verifier. Checks a proof term's premises against the
/// context and its evidence against the kind-specific predicate; verified
/// conclusions become lemmas.
#[derive(Debug, Default)]
pub struct ProofVerifier {
    context: ProofContext,
    verified: BTreeMap<String, ProofTerm>,
    errors: Vec<SirError>,
}

impl ProofVerifier {
    pub fn new() -> Self {
        let mut verifier = Self::default();
        verifier.init_axioms();
        verifier
    }

    fn init_axioms(&mut self) {
        let ctx = &mut self.context;
        // Memory axioms.
        ctx.add_axiom("valid_alloc", "∀r. alloc(r) → valid(r)");
        ctx.add_axiom("free_invalid", "∀r. free(r) → ¬valid(r)");
        ctx.add_axiom("region_bound", "∀ptr,r. in_region(ptr,r) → valid(ptr)");
        ctx.add_axiom("allocation_bounds", "∀a. alloc(a) → ∃bound. size(a) ≤ bound");
        // Borrow axioms.
        ctx.add_axiom("borrow_valid", "∀b. borrow(b) → valid(source(b))");
        ctx.add_axiom("mut_exclusive", "∀b. mut_borrow(b) → exclusive(b)");
        ctx.add_axiom("exclusive", "∀b. exclusive(b) → ¬aliased(b)");
        ctx.add_axiom(
            "lifetime_contained",
            "∀b. lifetime(b) ⊆ lifetime(source(b))",
        );
        ctx.add_axiom("valid_source", "∀b. borrow(b) → live(source(b))");
        // Concurrency axioms.
        ctx.add_axiom("ordered_safe", "∀a,b. ordered(a,b) → ¬race(a,b)");
        ctx.add_axiom("disjoint_safe", "∀a,b. disjoint(a,b) → ¬race(a,b)");
        ctx.add_axiom("atomic_linearizable", "∀op. atomic(op) → linearizable(op)");
        ctx.add_axiom("acyclic_lock_graph", "¬∃cycle ∈ wait_graph(program)");
        // Typing and effect axioms.
        ctx.add_axiom("typing_derivation", "Γ;Δ ⊢ program : τ ▷ φ");
        ctx.add_axiom("declared", "∀e. performed(e) → declared(e)");
        ctx.add_axiom("in_region", "∀a. placed(a) → in_region(a, region(a))");
        ctx.add_axiom("bounds_check", "∀a. offset(a) + size(a) ≤ size(region(a))");
        // Rewrite tactic.
        ctx.add_axiom(
            "rewrite_preserves",
            "∀k. preserved(k, old, new) → holds(k, new)",
        );
    }

    pub fn context(&self) -> &ProofContext {
        &self.context
    }

    pub fn errors(&self) -> &[SirError] {
        &self.errors
    }

    /// Verifies one proof term. Verification is pure in the proof: the same
    /// term verifies to the same verdict every time.
    pub fn verify(&mut self, proof: &ProofTerm) -> bool {
        for premise in &proof.premises {
            if !self.context.is_valid_premise(premise) {
                self.errors.push(SirError::new(
                    SirErrorKind::ProofInvalid(ProofInvalid::BadPremise {
                        premise: premise.clone(),
                    }),
                    vec![proof.kind.name().to_owned()],
                ));
                return false;
            }
        }

        let evidence_ok = match proof.kind {
            ProofKind::MemorySafety => self.verify_memory_safety(proof),
            ProofKind::RaceFreedom => self.verify_race_freedom(proof),
            ProofKind::DeadlockFreedom => self.verify_deadlock_freedom(proof),
            ProofKind::BoundedResources => self.verify_bounded_resources(proof),
            ProofKind::TypeSoundness => self.verify_type_soundness(proof),
            ProofKind::EffectConformance => self.verify_effect_conformance(proof),
            ProofKind::RegionValidity => self.verify_region_validity(proof),
            ProofKind::LifetimeValidity => self.verify_lifetime_validity(proof),
        };
        if !evidence_ok {
            return false;
        }

        self.context
            .add_lemma(proof.conclusion.clone(), proof.clone());
        self.verified.insert(proof.conclusion.clone(), proof.clone());
        true
    }

    fn reject(&mut self, kind: ProofKind, detail: impl Into<String>) -> bool {
        self.errors.push(SirError::new(
            SirErrorKind::ProofInvalid(ProofInvalid::BadEvidence {
                kind: kind.name().to_owned(),
                detail: detail.into(),
            }),
            vec![],
        ));
        false
    }

    /// Every allocation record names a region and size; every free
    /// references a recorded allocation; every use sits after its
    /// allocation and before any free of it.
    fn verify_memory_safety(&mut self, proof: &ProofTerm) -> bool {
        let evidence = &proof.evidence;
        let allocations = evidence["allocations"].as_array().cloned().unwrap_or_default();
        let frees = evidence["frees"].as_array().cloned().unwrap_or_default();
        let uses = evidence["uses"].as_array().cloned().unwrap_or_default();

        let mut alloc_points: BTreeMap<u64, u64> = BTreeMap::new();
        for alloc in &allocations {
            if alloc.get("region").is_none() || alloc.get("size").is_none() {
                return self.reject(proof.kind, format!("incomplete allocation record {alloc}"));
            }
            let (Some(id), Some(point)) = (alloc["id"].as_u64(), alloc["program_point"].as_u64())
            else {
                return self.reject(proof.kind, "allocation without id/program_point");
            };
            alloc_points.insert(id, point);
        }

        let mut free_points: BTreeMap<u64, u64> = BTreeMap::new();
        for free in &frees {
            let Some(alloc_id) = free["alloc_id"].as_u64() else {
                return self.reject(proof.kind, "free without alloc_id");
            };
            if !alloc_points.contains_key(&alloc_id) {
                return self.reject(proof.kind, format!("free of unknown allocation {alloc_id}"));
            }
            if let Some(point) = free["program_point"].as_u64() {
                free_points.insert(alloc_id, point);
            }
        }

        for use_record in &uses {
            let (Some(alloc_id), Some(use_point)) = (
                use_record["alloc_id"].as_u64(),
                use_record["program_point"].as_u64(),
            ) else {
                return self.reject(proof.kind, "use without alloc_id/program_point");
            };
            let Some(&alloc_point) = alloc_points.get(&alloc_id) else {
                return self.reject(proof.kind, format!("use of unknown allocation {alloc_id}"));
            };
            if use_point <= alloc_point {
                return self.reject(proof.kind, format!("use at {use_point} precedes allocation"));
            }
            if let Some(&free_point) = free_points.get(&alloc_id)
                && free_point < use_point
            {
                return self.reject(
                    proof.kind,
                    format!("use at {use_point} after free at {free_point}"),
                );
            }
        }

        true
    }

    /// Every recorded pair must be tagged disjoint, ordered or read-only.
    fn verify_race_freedom(&mut self, proof: &ProofTerm) -> bool {
        let pairs = proof.evidence["parallel_accesses"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for pair in &pairs {
            let disjoint = pair["disjoint"].as_bool().unwrap_or(false);
            let ordered = pair["ordered"].as_bool().unwrap_or(false);
            let both_read = pair["access1"]["read_only"].as_bool().unwrap_or(false)
                && pair["access2"]["read_only"].as_bool().unwrap_or(false);
            if !(disjoint || ordered || both_read) {
                return self.reject(proof.kind, format!("unprotected pair {pair}"));
            }
        }
        true
    }

    /// Recomputes the cycle check on the supplied lock graph.
    fn verify_deadlock_freedom(&mut self, proof: &ProofTerm) -> bool {
        let Some(lock_graph) = proof.evidence["lock_graph"].as_object() else {
            return self.reject(proof.kind, "missing lock_graph");
        };
        let adjacency: BTreeMap<String, Vec<String>> = lock_graph
            .iter()
            .map(|(k, v)| {
                let targets = v
                    .as_array()
                    .map(|arr| {
                        arr.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default();
                (k.clone(), targets)
            })
            .collect();
        if has_cycle(&adjacency) {
            return self.reject(proof.kind, "cyclic lock acquisition");
        }
        true
    }

    /// Every allocation record must carry a numeric bound.
    fn verify_bounded_resources(&mut self, proof: &ProofTerm) -> bool {
        let allocations = proof.evidence["allocations"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for alloc in &allocations {
            if alloc.get("bound").and_then(Value::as_u64).is_none() {
                return self.reject(proof.kind, format!("unbounded allocation {alloc}"));
            }
        }
        true
    }

    fn verify_type_soundness(&mut self, proof: &ProofTerm) -> bool {
        if proof.premises.is_empty() {
            return self.reject(proof.kind, "no typing derivation");
        }
        true
    }

    /// Actual effects must be a subset of declared effects.
    fn verify_effect_conformance(&mut self, proof: &ProofTerm) -> bool {
        let as_set = |value: &Value| -> Vec<String> {
            value
                .as_array()
                .map(|arr| {
                    arr.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_owned)
                        .collect()
                })
                .unwrap_or_default()
        };
        let declared = as_set(&proof.evidence["declared_effects"]);
        let actual = as_set(&proof.evidence["actual_effects"]);
        for effect in &actual {
            if !declared.contains(effect) {
                return self.reject(proof.kind, format!("undeclared effect {effect}"));
            }
        }
        true
    }

    /// offset + size ≤ region_size for every recorded access, recomputed
    /// rather than trusted from the `in_bounds` tag.
    fn verify_region_validity(&mut self, proof: &ProofTerm) -> bool {
        let accesses = proof.evidence["region_accesses"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for access in &accesses {
            let offset = access["offset"].as_u64().unwrap_or(0);
            let size = access["size"].as_u64().unwrap_or(0);
            let region_size = access["region_size"].as_u64().unwrap_or(u64::MAX);
            if offset.saturating_add(size) > region_size {
                return self.reject(proof.kind, format!("out-of-bounds access {access}"));
            }
        }
        true
    }

    /// Every recorded lifetime constraint must be marked satisfied.
    fn verify_lifetime_validity(&mut self, proof: &ProofTerm) -> bool {
        let constraints = proof.evidence["lifetime_constraints"]
            .as_array()
            .cloned()
            .unwrap_or_default();
        for constraint in &constraints {
            if !constraint["satisfied"].as_bool().unwrap_or(false) {
                return self.reject(proof.kind, format!("violated constraint {constraint}"));
            }
        }
        true
    }

    /// Verifies a whole proof list, stopping at the first failure.
    pub fn verify_program(&mut self, proofs: &[ProofTerm]) -> (bool, Vec<SirError>) {
        self.errors.clear();
        for proof in proofs {
            if !self.verify(proof) {
                return (false, self.errors.clone());
            }
        }
        (true, Vec::new())
    }

    /// The `.aion_caps` byte over the proofs that pass verification: bit k
    /// is set iff a kind-k proof is present and verified.
    pub fn verified_bitmap(&mut self, proofs: &[ProofTerm]) -> u8 {
        let mut bitmap = 0u8;
        for proof in proofs {
            if self.verify(proof) {
                bitmap |= proof.kind.bit();
            }
        }
        bitmap
    }
}
