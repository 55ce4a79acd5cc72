//! The proof system: synthesis of safety proofs over a graph, a small
//! trusted verifier, and the capability bitmap gating module admission.

pub mod rewrite;
pub mod smt;
pub mod synthesis;
pub mod verifier;

pub use rewrite::synthesize_proofs_for_rewrite;
pub use smt::{PermissiveSolver, SatResult, SmtConstraint, SmtSolver, SolverBackend};
pub use synthesis::ProofSynthesizer;
pub use verifier::{ProofContext, ProofVerifier};

use serde_derive::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::error::{InvalidGraphError, SirError};

/// The eight provable properties. The discriminant is the proof's bit in
/// the capability bitmap.
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProofKind {
    MemorySafety = 0,
    RaceFreedom = 1,
    DeadlockFreedom = 2,
    BoundedResources = 3,
    TypeSoundness = 4,
    EffectConformance = 5,
    RegionValidity = 6,
    LifetimeValidity = 7,
}

impl ProofKind {
    pub const ALL: [ProofKind; 8] = [
        ProofKind::MemorySafety,
        ProofKind::RaceFreedom,
        ProofKind::DeadlockFreedom,
        ProofKind::BoundedResources,
        ProofKind::TypeSoundness,
        ProofKind::EffectConformance,
        ProofKind::RegionValidity,
        ProofKind::LifetimeValidity,
    ];

    pub fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn name(self) -> &'static str {
        match self {
            ProofKind::MemorySafety => "MEMORY_SAFETY",
            ProofKind::RaceFreedom => "RACE_FREEDOM",
            ProofKind::DeadlockFreedom => "DEADLOCK_FREEDOM",
            ProofKind::BoundedResources => "BOUNDED_RESOURCES",
            ProofKind::TypeSoundness => "TYPE_SOUNDNESS",
            ProofKind::EffectConformance => "EFFECT_CONFORMANCE",
            ProofKind::RegionValidity => "REGION_VALIDITY",
            ProofKind::LifetimeValidity => "LIFETIME_VALIDITY",
        }
    }
}

/// A serializable proof of one safety property. Carries no references into
/// the graph beyond identity strings, so proofs survive alongside the
/// emitted module.
#[derive(Clone, Debug, PartialEq)]
pub struct ProofTerm {
    pub kind: ProofKind,
    pub conclusion: String,
    pub premises: Vec<String>,
    /// Kind-specific evidence dictionary.
    pub evidence: Value,
    /// Optional λ-encoded witness in A-normal form.
    pub lambda_term: String,
}

impl ProofTerm {
    pub fn new(kind: ProofKind, conclusion: impl Into<String>) -> Self {
        Self {
            kind,
            conclusion: conclusion.into(),
            premises: Vec::new(),
            evidence: json!({}),
            lambda_term: String::new(),
        }
    }

    pub fn with_premises(mut self, premises: Vec<String>) -> Self {
        self.premises = premises;
        self
    }

    pub fn with_evidence(mut self, evidence: Value) -> Self {
        self.evidence = evidence;
        self
    }

    pub fn serialize(&self) -> Value {
        json!({
            "kind": self.kind,
            "conclusion": self.conclusion,
            "premises": self.premises,
            "evidence": self.evidence,
            "lambda_term": self.lambda_term,
        })
    }

    pub fn from_dict(data: &Value) -> Result<Self, SirError> {
        let bad = |detail: &str| {
            SirError::invalid_graph(InvalidGraphError::Malformed(format!(
                "proof term: {detail}"
            )))
        };
        Ok(Self {
            kind: serde_json::from_value(data.get("kind").cloned().unwrap_or(Value::Null))
                .map_err(|e| bad(&format!("bad kind: {e}")))?,
            conclusion: data
                .get("conclusion")
                .and_then(Value::as_str)
                .ok_or_else(|| bad("missing conclusion"))?
                .to_owned(),
            premises: serde_json::from_value(
                data.get("premises").cloned().unwrap_or_else(|| json!([])),
            )
            .map_err(|e| bad(&format!("bad premises: {e}")))?,
            evidence: data.get("evidence").cloned().unwrap_or_else(|| json!({})),
            lambda_term: data
                .get("lambda_term")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        })
    }
}

/// A named safety theorem, for reporting alongside proofs.
#[derive(Clone, Debug, PartialEq)]
pub struct SafetyTheorem {
    pub name: String,
    pub statement: String,
}

impl SafetyTheorem {
    pub fn memory_safety(program: &str) -> Self {
        Self {
            name: "memory_safety".into(),
            statement: format!("∀ptr ∈ {program}. valid(ptr) ∧ ¬dangling(ptr)"),
        }
    }

    pub fn race_freedom(program: &str) -> Self {
        Self {
            name: "race_freedom".into(),
            statement: format!("∀(r,w) ∈ parallel({program}). disjoint(r,w) ∨ ordered(r,w)"),
        }
    }

    pub fn deadlock_freedom(program: &str) -> Self {
        Self {
            name: "deadlock_freedom".into(),
            statement: format!("¬∃cycle ∈ wait_graph({program})"),
        }
    }

    pub fn bounded_resources(program: &str) -> Self {
        Self {
            name: "bounded_resources".into(),
            statement: format!("∀alloc ∈ {program}. ∃bound. size(alloc) ≤ bound"),
        }
    }
}

/// The `.aion_caps` byte: bit k set means a kind-k proof is present.
pub fn capability_bitmap<I: IntoIterator<Item = ProofKind>>(kinds: I) -> u8 {
    kinds.into_iter().fold(0u8, |acc, kind| acc | kind.bit())
}

/// The `.aion_proof` section: a versioned envelope around the serialized
/// proof list.
pub fn proof_section_bytes(proofs: &[ProofTerm]) -> Vec<u8> {
    let envelope = json!({
        "version": "1.0",
        "proofs": proofs.iter().map(ProofTerm::serialize).collect::<Vec<_>>(),
    });
    envelope.to_string().into_bytes()
}

/// Parses a `.aion_proof` section back into proof terms.
pub fn proofs_from_section(bytes: &[u8]) -> Result<Vec<ProofTerm>, SirError> {
    let bad = |detail: String| {
        SirError::invalid_graph(InvalidGraphError::Malformed(format!(
            "proof section: {detail}"
        )))
    };
    let envelope: Value =
        serde_json::from_slice(bytes).map_err(|e| bad(format!("not a tree: {e}")))?;
    if envelope.get("version").and_then(Value::as_str) != Some("1.0") {
        return Err(bad("unsupported version".into()));
    }
    envelope
        .get("proofs")
        .and_then(Value::as_array)
        .ok_or_else(|| bad("missing proofs".into()))?
        .iter()
        .map(ProofTerm::from_dict)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_layout_is_fixed() {
        assert_eq!(ProofKind::MemorySafety.bit(), 0x01);
        assert_eq!(ProofKind::RaceFreedom.bit(), 0x02);
        assert_eq!(ProofKind::DeadlockFreedom.bit(), 0x04);
        assert_eq!(ProofKind::BoundedResources.bit(), 0x08);
        assert_eq!(ProofKind::TypeSoundness.bit(), 0x10);
        assert_eq!(ProofKind::EffectConformance.bit(), 0x20);
        assert_eq!(ProofKind::RegionValidity.bit(), 0x40);
        assert_eq!(ProofKind::LifetimeValidity.bit(), 0x80);
    }

    #[test]
    fn bitmap_accumulates_kinds() {
        let bitmap = capability_bitmap([ProofKind::MemorySafety, ProofKind::RegionValidity]);
        assert_eq!(bitmap, 0x41);
        assert_eq!(capability_bitmap([]), 0);
        assert_eq!(capability_bitmap(ProofKind::ALL), 0xFF);
    }

    #[test]
    fn proof_terms_round_trip_through_the_section() {
        let proof = ProofTerm::new(ProofKind::MemorySafety, "memory_safe(program)")
            .with_premises(vec!["valid_alloc".into()])
            .with_evidence(json!({"allocations": []}));
        let bytes = proof_section_bytes(std::slice::from_ref(&proof));
        let decoded = proofs_from_section(&bytes).unwrap();
        assert_eq!(decoded, vec![proof]);
    }

    #[test]
    fn unversioned_sections_are_rejected() {
        assert!(proofs_from_section(br#"{"proofs": []}"#).is_err());
        assert!(proofs_from_section(b"garbage").is_err());
    }
}
