//! The contracts the core exposes to backend emitters. The emitters
//! themselves (textual LLVM IR, WASM text) live outside the core and
//! consume this view.

use serde_json::{Map, Value};

use crate::effects::EffectSet;
use crate::error::SirError;
use crate::memory::{RegionKind, RegionManager};
use crate::proof::{ProofTerm, proof_section_bytes};
use crate::schedule::ScheduleResult;
use crate::sir::{
    HardwareAffinity, HyperGraph, Parallelism, Provenance, Vertex,
};
use crate::types::Ty;
use crate::utils::VertexId;

/// Everything an emitter may ask about one vertex.
#[derive(Clone, Debug)]
pub struct VertexFacts<'a> {
    pub id: &'a VertexId,
    pub ty: Option<&'a Ty>,
    pub effects: &'a EffectSet,
    pub region: Option<&'a str>,
    pub affinity: HardwareAffinity,
    pub parallelism: Option<&'a Parallelism>,
    pub provenance: Option<&'a Provenance>,
}

/// Everything an emitter may ask about one edge.
#[derive(Clone, Debug)]
pub struct EdgeFacts<'a> {
    pub variant: &'static str,
    pub sources: &'a [VertexId],
    pub targets: &'a [VertexId],
    pub attributes: Map<String, Value>,
}

/// One row of the region summary.
#[derive(Clone, Debug, PartialEq)]
pub struct RegionSummary {
    pub name: String,
    pub kind: RegionKind,
    pub size: Option<u64>,
    pub alignment: u64,
}

/// The lowering view over a checked, optimized and scheduled module.
pub struct EmitContext<'a> {
    graph: &'a HyperGraph,
    schedule: &'a ScheduleResult,
    regions: &'a RegionManager,
    proofs: &'a [ProofTerm],
    capability_bits: u8,
}

impl<'a> EmitContext<'a> {
    pub fn new(
        graph: &'a HyperGraph,
        schedule: &'a ScheduleResult,
        regions: &'a RegionManager,
        proofs: &'a [ProofTerm],
        capability_bits: u8,
    ) -> Self {
        Self {
            graph,
            schedule,
            regions,
            proofs,
            capability_bits,
        }
    }

    pub fn graph(&self) -> &HyperGraph {
        self.graph
    }

    /// Vertices in scheduled order: by start time, ties by id; vertices
    /// the scheduler never saw follow in topological order.
    pub fn scheduled_vertices(&self) -> Vec<&Vertex> {
        let mut scheduled: Vec<_> = self
            .schedule
            .tasks
            .iter()
            .filter_map(|t| self.graph.vertex(&t.id).map(|v| (t, v)))
            .collect();
        scheduled.sort_by(|(a, _), (b, _)| {
            a.start_time
                .partial_cmp(&b.start_time)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });

        let mut result: Vec<&Vertex> = scheduled.into_iter().map(|(_, v)| v).collect();
        for id in self.graph.topological_order() {
            if self.schedule.task(&id).is_none()
                && let Some(vertex) = self.graph.vertex(&id)
            {
                result.push(vertex);
            }
        }
        result
    }

    pub fn vertex_facts(&self, id: &VertexId) -> Result<VertexFacts<'_>, SirError> {
        let vertex = self.graph.try_vertex(id)?;
        Ok(VertexFacts {
            id: &vertex.id,
            ty: vertex.metadata.ty.as_ref(),
            effects: &vertex.metadata.effects,
            region: vertex.region_name(),
            affinity: vertex.metadata.affinity,
            parallelism: vertex.metadata.parallelism.as_ref(),
            provenance: vertex.metadata.provenance.as_ref(),
        })
    }

    pub fn edge_facts(&self) -> impl Iterator<Item = EdgeFacts<'_>> {
        self.graph.edges().map(|edge| EdgeFacts {
            variant: edge.kind.variant_name(),
            sources: &edge.sources,
            targets: &edge.targets,
            attributes: edge.kind.attributes(),
        })
    }

    /// The regions a backend must materialize, with their kinds, bounds
    /// and alignments.
    pub fn region_summary(&self) -> Vec<RegionSummary> {
        self.regions
            .regions()
            .map(|r| RegionSummary {
                name: r.name.clone(),
                kind: r.kind,
                size: r.size,
                alignment: r.alignment,
            })
            .collect()
    }

    /// The serialized SIR tree for the `.aion_sir` section.
    pub fn sir_section(&self) -> Value {
        self.graph.serialize()
    }

    /// The `.aion_caps` section: one little-endian byte.
    pub fn caps_section(&self) -> [u8; 1] {
        self.capability_bits.to_le_bytes()
    }

    /// The `.aion_proof` section bytes.
    pub fn proof_section(&self) -> Vec<u8> {
        proof_section_bytes(self.proofs)
    }

    pub fn proofs(&self) -> &[ProofTerm] {
        self.proofs
    }

    pub fn schedule(&self) -> &ScheduleResult {
        self.schedule
    }
}

/// Contract implemented by the external LLVM and WASM emitters: consume
/// the view, produce textual output. Constructs the view cannot express
/// surface as `UnsupportedOperation`.
pub trait ModuleEmitter {
    fn emit(&mut self, ctxt: &EmitContext<'_>) -> Result<String, SirError>;
}
