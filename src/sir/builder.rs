use serde_json::Value;

use crate::effects::EffectSet;
use crate::sir::edge::{ControlFlowKind, EffectOrdering, HyperEdge, ParallelismKind};
use crate::sir::graph::HyperGraph;
use crate::sir::vertex::{AllocSize, HardwareAffinity, Vertex};
use crate::types::Ty;
use crate::utils::VertexId;

/// Fluent construction helper for hypergraphs.
///
/// Vertex-creating methods insert the vertex together with its default
/// edges, move the internal cursor onto it and return its id; edge methods
/// return `&mut Self` for chaining. `build` yields the finished graph.
pub struct GraphBuilder {
    graph: HyperGraph,
    current: Option<VertexId>,
}

impl GraphBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            graph: HyperGraph::new(name),
            current: None,
        }
    }

    fn place(&mut self, vertex: Vertex) -> VertexId {
        let id = self.graph.add_vertex(vertex);
        self.current = Some(id.clone());
        id
    }

    pub fn constant(&mut self, value: Value, ty: Option<Ty>) -> VertexId {
        self.place(Vertex::constant(value, ty))
    }

    pub fn alloc(&mut self, size: AllocSize, ty: Ty, region: impl Into<String>) -> VertexId {
        self.place(Vertex::alloc(size, ty, region))
    }

    pub fn load(&mut self, ty: Ty, region: impl Into<String>, from: Option<&VertexId>) -> VertexId {
        let region = region.into();
        let id = self.place(Vertex::load(ty, region));
        if let Some(from) = from {
            self.graph
                .add_edge(HyperEdge::data_flow([from.clone()], [id.clone()]));
        }
        id
    }

    pub fn store(
        &mut self,
        value: &VertexId,
        to: &VertexId,
        ty: Ty,
        region: impl Into<String>,
    ) -> VertexId {
        let id = self.place(Vertex::store(ty, region));
        self.graph.add_edge(HyperEdge::data_flow(
            [value.clone(), to.clone()],
            [id.clone()],
        ));
        id
    }

    pub fn apply(
        &mut self,
        function: impl Into<String>,
        args: &[VertexId],
        ty: Ty,
        effects: EffectSet,
    ) -> VertexId {
        let id = self.place(Vertex::apply(function, ty, effects));
        if !args.is_empty() {
            self.graph
                .add_edge(HyperEdge::data_flow(args.iter().cloned(), [id.clone()]));
        }
        id
    }

    pub fn phi(&mut self, sources: &[VertexId], ty: Ty) -> VertexId {
        let id = self.place(Vertex::phi(ty));
        self.graph
            .add_edge(HyperEdge::data_flow(sources.iter().cloned(), [id.clone()]));
        id
    }

    #[allow(clippy::too_many_arguments)]
    pub fn kernel(
        &mut self,
        name: impl Into<String>,
        grid: [u64; 3],
        block: [u64; 3],
        args: &[VertexId],
        ty: Ty,
        affinity: HardwareAffinity,
    ) -> VertexId {
        let id = self.place(Vertex::kernel_launch(name, grid, block, ty, affinity));
        if !args.is_empty() {
            self.graph
                .add_edge(HyperEdge::data_flow(args.iter().cloned(), [id.clone()]));
        }
        id
    }

    pub fn param(&mut self, name: impl Into<String>, ty: Ty, index: u32) -> VertexId {
        let id = self.place(Vertex::parameter(name, ty, index));
        if self.graph.entry.is_none() {
            self.graph.entry = Some(id.clone());
        }
        id
    }

    pub fn ret(&mut self, value: &VertexId, ty: Ty) -> VertexId {
        let id = self.place(Vertex::ret(ty));
        self.graph
            .add_edge(HyperEdge::data_flow([value.clone()], [id.clone()]));
        let exit = id.clone();
        self.graph.exits.push(exit);
        id
    }

    pub fn connect(&mut self, source: &VertexId, target: &VertexId) -> &mut Self {
        self.graph
            .add_edge(HyperEdge::data_flow([source.clone()], [target.clone()]));
        self
    }

    pub fn control(
        &mut self,
        source: &VertexId,
        target: &VertexId,
        kind: ControlFlowKind,
    ) -> &mut Self {
        self.graph.add_edge(HyperEdge::control_flow(
            source.clone(),
            target.clone(),
            kind,
            None,
        ));
        self
    }

    pub fn parallel(
        &mut self,
        vertices: &[VertexId],
        kind: ParallelismKind,
        affinity: HardwareAffinity,
    ) -> &mut Self {
        self.graph
            .add_edge(HyperEdge::parallel(vertices.iter().cloned(), kind, affinity));
        self
    }

    pub fn effect_order(
        &mut self,
        source: &VertexId,
        target: &VertexId,
        ordering: EffectOrdering,
    ) -> &mut Self {
        self.graph
            .add_edge(HyperEdge::effect_order(source.clone(), target.clone(), ordering));
        self
    }

    /// The cursor: the most recently created vertex.
    pub fn current(&self) -> Option<&VertexId> {
        self.current.as_ref()
    }

    pub fn graph(&self) -> &HyperGraph {
        &self.graph
    }

    pub fn build(self) -> HyperGraph {
        self.graph
    }
}
