//! The semantic IR: a typed, attributed, directed hypergraph carrying
//! ownership, effect, hardware-affinity, region and provenance metadata.

pub mod builder;
pub mod edge;
pub mod graph;
mod serialize;
pub mod vertex;

pub use builder::GraphBuilder;
pub use edge::{
    ControlFlowKind, EdgeGroup, EdgeKind, EdgeMetadata, EffectOrdering, HyperEdge, MemoryAccess,
    ParallelismKind, RegionTransfer,
};
pub use graph::{HyperGraph, merge_graphs, slice_graph};
pub use vertex::{
    AllocSize, HardwareAffinity, Parallelism, Provenance, Vertex, VertexKind, VertexMetadata,
};

use crate::effects::EffectSet;

/// Access to the refinable metadata of a graph element.
pub trait HasMetadata {
    fn metadata(&self) -> &VertexMetadata;
    fn metadata_mut(&mut self) -> &mut VertexMetadata;
}

/// Access to cross-language provenance.
pub trait HasProvenance {
    fn provenance(&self) -> Option<&Provenance>;
}

/// Access to the declared effect set.
pub trait HasEffects {
    fn effects(&self) -> &EffectSet;
}

impl HasMetadata for Vertex {
    fn metadata(&self) -> &VertexMetadata {
        &self.metadata
    }

    fn metadata_mut(&mut self) -> &mut VertexMetadata {
        &mut self.metadata
    }
}

impl HasProvenance for Vertex {
    fn provenance(&self) -> Option<&Provenance> {
        self.metadata.provenance.as_ref()
    }
}

impl HasEffects for Vertex {
    fn effects(&self) -> &EffectSet {
        &self.metadata.effects
    }
}
