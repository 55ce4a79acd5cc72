use crate::error::{BorrowViolation, Diagnostics, MemorySafetyViolation, SirErrorKind};
use crate::memory::{RegionManager, TransferKind};
use crate::sir::{EdgeKind, HyperGraph, RegionTransfer};

/// The static borrow-checker pass over a graph: lifetime analysis, borrow
/// compatibility, move tracking and cross-region transfer legality.
pub struct BorrowChecker<'a> {
    manager: &'a RegionManager,
}

impl<'a> BorrowChecker<'a> {
    pub fn new(manager: &'a RegionManager) -> Self {
        Self { manager }
    }

    pub fn check(&self, graph: &HyperGraph) -> Diagnostics {
        tracing::debug!(graph = %graph.name, "running borrow checker");
        let mut diagnostics = Diagnostics::new();
        self.check_lifetimes(graph, &mut diagnostics);
        self.check_borrows(&mut diagnostics);
        self.check_moves(graph, &mut diagnostics);
        self.check_region_edges(graph, &mut diagnostics);
        diagnostics
    }

    /// Every vertex gets a region-derived lifetime; a vertex naming a
    /// region nobody declared is worth a warning before the proofs trust
    /// it.
    fn check_lifetimes(&self, graph: &HyperGraph, diagnostics: &mut Diagnostics) {
        let inferred = self.manager.infer_lifetimes(graph);
        for (vertex, lifetime) in &inferred {
            if lifetime.name.starts_with("scope_") {
                diagnostics.warn(format!(
                    "vertex {vertex} names region {:?} which is not declared; assuming a local scope",
                    graph.vertex(vertex).and_then(|v| v.region_name())
                ));
            }
        }
    }

    fn check_borrows(&self, diagnostics: &mut Diagnostics) {
        for block in self.blocks() {
            let unique: Vec<_> = block.borrows.iter().filter(|b| b.kind.is_unique()).collect();
            if unique.len() > 1 {
                diagnostics.error(SirErrorKind::BorrowViolation(
                    BorrowViolation::AliasingConflict {
                        block: block.id.to_string(),
                        detail: "multiple unique borrows".to_owned(),
                    },
                ));
            }
            if !unique.is_empty() && block.borrows.iter().any(|b| !b.kind.is_unique()) {
                diagnostics.error(SirErrorKind::BorrowViolation(
                    BorrowViolation::AliasingConflict {
                        block: block.id.to_string(),
                        detail: "shared borrow coexists with a unique borrow".to_owned(),
                    },
                ));
            }
            for borrow in &block.borrows {
                if !block.lifetime.outlives(&borrow.lifetime) {
                    diagnostics.error(SirErrorKind::BorrowViolation(
                        BorrowViolation::BorrowOutlivesBlock {
                            borrow: borrow.id.to_string(),
                            block: block.id.to_string(),
                        },
                    ));
                }
            }
        }
    }

    /// After a recorded move, the old owner must not keep feeding the
    /// moved block into the data flow: any consumer of the old owner at or
    /// after the move point, other than the new owner, is a use of a moved
    /// value. Direct block references are flagged regardless of position.
    fn check_moves(&self, graph: &HyperGraph, diagnostics: &mut Diagnostics) {
        let positions = graph.topological_positions();
        for transfer in self.manager.transfers() {
            if transfer.kind != TransferKind::Move {
                continue;
            }
            let move_point = positions.get(&transfer.to).copied();
            for successor in graph.successors(&transfer.from) {
                if successor.id == transfer.to {
                    continue;
                }
                let references_block = successor
                    .attributes
                    .get("block")
                    .and_then(serde_json::Value::as_str)
                    == Some(transfer.block.as_str());
                let after_move = match (move_point, positions.get(&successor.id)) {
                    (Some(moved), Some(&used)) => used >= moved,
                    _ => false,
                };
                if references_block || after_move {
                    diagnostics.error(SirErrorKind::MemorySafetyViolation(
                        MemorySafetyViolation::UseAfterMove {
                            vertex: successor.id.to_string(),
                        },
                    ));
                }
            }
        }
    }

    /// Region edges in the graph must respect cross-region transfer rules.
    fn check_region_edges(&self, graph: &HyperGraph, diagnostics: &mut Diagnostics) {
        for edge in graph.edges() {
            let EdgeKind::RegionEdge {
                source_region,
                target_region,
                transfer,
            } = &edge.kind
            else {
                continue;
            };
            if let Err(err) = self.manager.validate_transfer(source_region, target_region) {
                diagnostics
                    .errors
                    .push(err.with_context(format!("region edge {}", edge.id)));
            }
            if *transfer == RegionTransfer::Borrow {
                // Borrow edges across devices would dangle on migration.
                let is_device = |name: &str| {
                    self.manager
                        .region_by_name(name)
                        .is_some_and(|r| r.kind.is_device())
                };
                if source_region != target_region
                    && is_device(source_region) != is_device(target_region)
                {
                    diagnostics.warn(format!(
                        "borrow across host/device boundary on edge {} ({source_region} -> {target_region})",
                        edge.id
                    ));
                }
            }
        }
    }

    fn blocks(&self) -> impl Iterator<Item = &crate::memory::MemoryBlock> {
        self.manager.blocks_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{AllocationKind, BorrowKind, Region};
    use crate::sir::{HyperEdge, HyperGraph, Vertex};
    use crate::types::Ty;
    use crate::utils::VertexId;
    use serde_json::json;

    fn vid(s: &str) -> VertexId {
        s.into()
    }

    #[test]
    fn clean_state_produces_no_diagnostics() {
        let manager = RegionManager::new();
        let graph = HyperGraph::new("empty");
        let diagnostics = BorrowChecker::new(&manager).check(&graph);
        assert!(diagnostics.is_clean());
    }

    #[test]
    fn move_then_use_is_flagged() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("scratch"));
        let alloc = manager
            .allocate(&region, 8, 8, vid("producer"), AllocationKind::Owned)
            .unwrap();
        let block = manager.allocation(&alloc).unwrap().block.clone();

        let mut graph = HyperGraph::new("moved");
        let mut producer = Vertex::apply("produce", Ty::unit(), Default::default());
        producer.id = vid("producer");
        let mut consumer = Vertex::apply("consume", Ty::unit(), Default::default());
        consumer.id = vid("consumer");
        let mut late = Vertex::apply("late", Ty::unit(), Default::default());
        late.id = vid("late");
        late.attributes
            .insert("block".to_owned(), json!(block.as_str()));
        graph.add_vertex(producer);
        graph.add_vertex(consumer);
        graph.add_vertex(late);
        graph.add_edge(HyperEdge::data_flow([vid("producer")], [vid("consumer")]));
        graph.add_edge(HyperEdge::data_flow([vid("producer")], [vid("late")]));

        manager
            .transfer_ownership(&block, vid("producer"), vid("consumer"), TransferKind::Move)
            .unwrap();

        let diagnostics = BorrowChecker::new(&manager).check(&graph);
        assert!(diagnostics.errors.iter().any(|e| matches!(
            e.kind(),
            SirErrorKind::MemorySafetyViolation(MemorySafetyViolation::UseAfterMove { .. })
        )));
    }

    #[test]
    fn lowered_move_edges_flag_later_uses() {
        let mut g = HyperGraph::new("lowered_move");
        let alloc = g.add_vertex(Vertex::alloc(8u64.into(), Ty::i64(), "heap"));
        let consumer = g.add_vertex(Vertex::apply("consume", Ty::unit(), Default::default()));
        let late = g.add_vertex(Vertex::apply("late", Ty::unit(), Default::default()));
        g.add_edge(HyperEdge::region_transfer(
            alloc.clone(),
            consumer.clone(),
            "heap",
            "gpu_global",
            RegionTransfer::Move,
        ));
        g.add_edge(HyperEdge::data_flow([alloc.clone()], [consumer.clone()]));
        g.add_edge(HyperEdge::data_flow([alloc], [late.clone()]));
        g.add_edge(HyperEdge::data_flow([consumer], [late.clone()]));

        let mut manager = RegionManager::new();
        let lowered = manager.lower_graph(&g);
        assert!(lowered.is_clean(), "{lowered:?}");

        let diagnostics = BorrowChecker::new(&manager).check(&g);
        assert!(diagnostics.errors.iter().any(|e| matches!(
            e.kind(),
            SirErrorKind::MemorySafetyViolation(MemorySafetyViolation::UseAfterMove {
                vertex,
            }) if *vertex == late.to_string()
        )));
    }

    #[test]
    fn illegal_region_edge_is_flagged() {
        let mut manager = RegionManager::new();
        manager.add_region(Region::gpu_global("gpu_global", 0));
        manager.add_region(Region::fpga_bram("fpga_bram"));

        let mut graph = HyperGraph::new("transfer");
        let a = graph.add_vertex(Vertex::apply("stage", Ty::unit(), Default::default()));
        let b = graph.add_vertex(Vertex::apply("sink", Ty::unit(), Default::default()));
        graph.add_edge(HyperEdge::region_transfer(
            a,
            b,
            "gpu_global",
            "fpga_bram",
            RegionTransfer::Copy,
        ));

        let diagnostics = BorrowChecker::new(&manager).check(&graph);
        assert!(!diagnostics.is_clean());
    }

    #[test]
    fn shared_borrows_alone_are_compatible() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("scratch"));
        let alloc = manager
            .allocate(&region, 8, 8, vid("o"), AllocationKind::Owned)
            .unwrap();
        let block = manager.allocation(&alloc).unwrap().block.clone();
        manager
            .borrow(&block, vid("r1"), BorrowKind::Immutable, None)
            .unwrap();
        manager
            .borrow(&block, vid("r2"), BorrowKind::Immutable, None)
            .unwrap();

        let graph = HyperGraph::new("fine");
        let diagnostics = BorrowChecker::new(&manager).check(&graph);
        assert!(diagnostics.is_clean(), "{diagnostics:?}");
    }
}
