use std::collections::BTreeMap;

use crate::error::{
    BorrowViolation, Diagnostics, MemorySafetyViolation, RegionError, SirError, SirErrorKind,
};
use crate::memory::{
    Allocation, AllocationKind, Borrow, BorrowKind, Lifetime, MemoryBlock, OwnershipTransfer,
    Region, TransferKind,
};
use crate::sir::{EdgeKind, HyperGraph, RegionTransfer, VertexKind};
use crate::utils::validity::HasValidityCheck;
use crate::utils::{AllocId, BlockId, BorrowId, RegionId, TransferId, VertexId};

/// Owner of all region, block, allocation, lifetime and transfer state for
/// one compilation. Created at core entry and threaded through the
/// analyses; all mutation goes through this API.
#[derive(Debug, Default)]
pub struct RegionManager {
    regions: BTreeMap<RegionId, Region>,
    allocations: BTreeMap<AllocId, Allocation>,
    blocks: BTreeMap<BlockId, MemoryBlock>,
    lifetimes: BTreeMap<String, Lifetime>,
    transfers: Vec<OwnershipTransfer>,
    /// Blocks by the vertex that allocated them, filled by
    /// [`RegionManager::lower_graph`].
    vertex_blocks: BTreeMap<VertexId, BlockId>,
}

impl RegionManager {
    pub fn new() -> Self {
        let mut manager = Self::default();
        manager.add_region(Region::stack("global_stack"));
        manager.add_region(Region::heap("global_heap"));
        manager.add_region(Region::thread_local("global_tls"));
        manager
    }

    pub fn add_region(&mut self, region: Region) -> RegionId {
        let id = region.id.clone();
        self.lifetimes
            .entry(region.lifetime.name.clone())
            .or_insert_with(|| region.lifetime.clone());
        self.regions.insert(id.clone(), region);
        id
    }

    pub fn region(&self, id: &RegionId) -> Option<&Region> {
        self.regions.get(id)
    }

    pub fn region_by_name(&self, name: &str) -> Option<&Region> {
        self.regions.values().find(|r| r.name == name)
    }

    /// Regions are created lazily on first allocation into an unknown
    /// name. The kind is inferred from the name the lifter chose, so a
    /// `gpu_global` or `fpga_bram` region gets device semantics (and the
    /// BRAM default budget) rather than a plain heap.
    pub fn region_by_name_or_default(&mut self, name: &str) -> RegionId {
        if let Some(region) = self.region_by_name(name) {
            return region.id.clone();
        }
        let region = if name.contains("gpu_shared") {
            Region::gpu_shared(name)
        } else if name.contains("gpu") {
            Region::gpu_global(name, 0)
        } else if name.contains("fpga_lut") {
            Region::fpga_lut(name)
        } else if name.contains("fpga") {
            Region::fpga_bram(name)
        } else if name.contains("stack") {
            Region::stack(name)
        } else if name.contains("tls") || name.contains("thread") {
            Region::thread_local(name)
        } else if name.contains("wasm") {
            Region::wasm_linear(name)
        } else if name.contains("jvm") {
            Region::jvm_heap(name)
        } else if name.contains("static") {
            Region::statik(name)
        } else {
            Region::heap(name)
        };
        self.add_region(region)
    }

    pub fn regions(&self) -> impl Iterator<Item = &Region> {
        self.regions.values()
    }

    pub fn block(&self, id: &BlockId) -> Option<&MemoryBlock> {
        self.blocks.get(id)
    }

    pub fn blocks_iter(&self) -> impl Iterator<Item = &MemoryBlock> {
        self.blocks.values()
    }

    /// The block a vertex allocated, once the graph has been lowered.
    pub fn block_for_vertex(&self, vertex: &VertexId) -> Option<&MemoryBlock> {
        self.vertex_blocks.get(vertex).and_then(|b| self.blocks.get(b))
    }

    pub fn allocation(&self, id: &AllocId) -> Option<&Allocation> {
        self.allocations.get(id)
    }

    pub fn transfers(&self) -> &[OwnershipTransfer] {
        &self.transfers
    }

    pub fn lifetime(&self, name: &str) -> Option<&Lifetime> {
        self.lifetimes.get(name)
    }

    /// Bytes currently allocated in a region, before alignment of the next
    /// block.
    pub fn used_bytes(&self, region: &RegionId) -> u64 {
        self.blocks
            .values()
            .filter(|b| &b.region == region)
            .map(|b| b.size)
            .sum()
    }

    /// Allocates `size` bytes in `region`. The next offset is the aligned
    /// end of the current live blocks; exceeding a bounded region's maximum
    /// fails with `OutOfRegion`.
    pub fn allocate(
        &mut self,
        region_id: &RegionId,
        size: u64,
        alignment: u64,
        vertex: VertexId,
        strategy: AllocationKind,
    ) -> Result<AllocId, SirError> {
        let region = self.regions.get(region_id).ok_or_else(|| {
            SirError::new(
                SirErrorKind::RegionError(RegionError::UnknownRegion(region_id.to_string())),
                vec![],
            )
        })?;

        let used = self.used_bytes(region_id);
        let alignment = alignment.max(1);
        let offset = used.div_ceil(alignment) * alignment;

        if let Some(limit) = region.size
            && offset + size > limit
        {
            return Err(SirError::new(
                SirErrorKind::RegionError(RegionError::OutOfRegion {
                    region: region.name.clone(),
                    requested: offset + size,
                    limit,
                }),
                vec![],
            ));
        }

        let block = MemoryBlock {
            id: BlockId::fresh(),
            region: region_id.clone(),
            offset,
            size,
            alignment,
            lifetime: region.lifetime.clone(),
            owner: Some(vertex.clone()),
            borrows: Vec::new(),
        };
        tracing::debug!(
            region = %region.name,
            size,
            offset,
            vertex = %vertex,
            "allocated block {}",
            block.id
        );

        let allocation = Allocation {
            id: AllocId::fresh(),
            vertex,
            block: block.id.clone(),
            strategy,
            freed: false,
            freed_by: None,
        };
        let alloc_id = allocation.id.clone();
        self.blocks.insert(block.id.clone(), block);
        self.allocations.insert(alloc_id.clone(), allocation);
        Ok(alloc_id)
    }

    /// Frees an allocation. Double-free and free-while-borrowed are errors;
    /// a successful free detaches the block from the live set.
    pub fn free(&mut self, alloc_id: &AllocId) -> Result<(), SirError> {
        let allocation = self.allocations.get_mut(alloc_id).ok_or_else(|| {
            SirError::new(
                SirErrorKind::MemorySafetyViolation(MemorySafetyViolation::MissingAllocation {
                    vertex: alloc_id.to_string(),
                }),
                vec![],
            )
        })?;

        if allocation.freed {
            return Err(SirError::new(
                SirErrorKind::MemorySafetyViolation(MemorySafetyViolation::DoubleFree {
                    alloc: alloc_id.to_string(),
                }),
                vec![],
            ));
        }
        if let Some(block) = self.blocks.get(&allocation.block)
            && block.is_borrowed()
        {
            return Err(SirError::new(
                SirErrorKind::BorrowViolation(BorrowViolation::BorrowedAtFree {
                    alloc: alloc_id.to_string(),
                }),
                vec![],
            ));
        }

        allocation.freed = true;
        let block = allocation.block.clone();
        self.blocks.remove(&block);
        tracing::debug!("freed allocation {alloc_id} (block {block})");
        Ok(())
    }

    /// Transfers ownership of a block. A move requires `from` to be the
    /// current owner and installs `to`; a clone only records the transfer.
    pub fn transfer_ownership(
        &mut self,
        block_id: &BlockId,
        from: VertexId,
        to: VertexId,
        kind: TransferKind,
    ) -> Result<TransferId, SirError> {
        let block = self.blocks.get_mut(block_id).ok_or_else(|| {
            SirError::new(
                SirErrorKind::BorrowViolation(BorrowViolation::UnknownBlock(block_id.to_string())),
                vec![],
            )
        })?;

        if block.owner.as_ref() != Some(&from) {
            return Err(SirError::new(
                SirErrorKind::BorrowViolation(BorrowViolation::NotOwner {
                    block: block_id.to_string(),
                    vertex: from.to_string(),
                }),
                vec![],
            ));
        }

        if kind == TransferKind::Move {
            if block.is_borrowed() {
                return Err(SirError::new(
                    SirErrorKind::BorrowViolation(BorrowViolation::MovedWhileBorrowed {
                        block: block_id.to_string(),
                    }),
                    vec![],
                ));
            }
            block.owner = Some(to.clone());
        }

        let transfer = OwnershipTransfer {
            id: TransferId::fresh(),
            block: block_id.clone(),
            from,
            to,
            kind,
        };
        let id = transfer.id.clone();
        self.transfers.push(transfer);
        Ok(id)
    }

    /// Creates a borrow of a block. A unique (mutable or exclusive) borrow
    /// requires no existing borrows; an immutable borrow requires no unique
    /// borrow; the borrow's lifetime must be outlived by the block's.
    pub fn borrow(
        &mut self,
        block_id: &BlockId,
        borrower: VertexId,
        kind: BorrowKind,
        lifetime: Option<Lifetime>,
    ) -> Result<BorrowId, SirError> {
        let block = self.blocks.get_mut(block_id).ok_or_else(|| {
            SirError::new(
                SirErrorKind::BorrowViolation(BorrowViolation::UnknownBlock(block_id.to_string())),
                vec![],
            )
        })?;

        if kind.is_unique() && block.is_borrowed() {
            return Err(SirError::new(
                SirErrorKind::BorrowViolation(BorrowViolation::AliasingConflict {
                    block: block_id.to_string(),
                    detail: "unique borrow of an already borrowed block".to_owned(),
                }),
                vec![],
            ));
        }
        if !kind.is_unique() && block.has_unique_borrow() {
            return Err(SirError::new(
                SirErrorKind::BorrowViolation(BorrowViolation::AliasingConflict {
                    block: block_id.to_string(),
                    detail: "shared borrow while uniquely borrowed".to_owned(),
                }),
                vec![],
            ));
        }

        let lifetime = lifetime.unwrap_or_else(|| block.lifetime.clone());
        if !block.lifetime.outlives(&lifetime) {
            return Err(SirError::new(
                SirErrorKind::BorrowViolation(BorrowViolation::BorrowOutlivesBlock {
                    borrow: lifetime.name.clone(),
                    block: block_id.to_string(),
                }),
                vec![],
            ));
        }

        let borrow = Borrow {
            id: BorrowId::fresh(),
            block: block_id.clone(),
            kind,
            borrower,
            lifetime,
        };
        let id = borrow.id.clone();
        block.borrows.push(borrow);
        Ok(id)
    }

    pub fn end_borrow(&mut self, borrow_id: &BorrowId) {
        for block in self.blocks.values_mut() {
            block.borrows.retain(|b| &b.id != borrow_id);
        }
    }

    /// Region-derived lifetime for each vertex of a graph: the lifetime of
    /// the vertex's declared region where one is known, a fresh scope
    /// otherwise.
    pub fn infer_lifetimes(&self, graph: &HyperGraph) -> BTreeMap<VertexId, Lifetime> {
        let mut inferred = BTreeMap::new();
        for vertex in graph.vertices() {
            let lifetime = match vertex.region_name() {
                Some(name) => self
                    .region_by_name(name)
                    .map(|r| r.lifetime.clone())
                    .unwrap_or_else(|| Lifetime::scoped(format!("scope_{}", vertex.id), None)),
                None => Lifetime::statik(),
            };
            inferred.insert(vertex.id.clone(), lifetime);
        }
        inferred
    }

    /// Cross-region transfer validity (see [`Region::can_transfer_to`]).
    pub fn validate_transfer(&self, source: &str, target: &str) -> Result<(), SirError> {
        let (Some(src), Some(dst)) = (self.region_by_name(source), self.region_by_name(target))
        else {
            // Unknown regions are the lifter's to declare; nothing to check.
            return Ok(());
        };
        if src.can_transfer_to(dst) {
            Ok(())
        } else {
            Err(SirError::new(
                SirErrorKind::RegionError(RegionError::IllegalTransfer {
                    source: source.to_owned(),
                    target: target.to_owned(),
                }),
                vec![],
            ))
        }
    }

    /// Lowers a graph's memory behavior into manager state, so the
    /// borrow-checker pass and the safety check run against what the
    /// program actually does:
    /// - every region a vertex names is registered (lazily, kind inferred
    ///   from the name);
    /// - every Alloc with a concrete size becomes a live block owned by
    ///   its vertex;
    /// - a free-like Apply frees its predecessors' allocations;
    /// - region edges become ownership transfers and borrows, at their
    ///   target's program point.
    ///
    /// Violations found while lowering (double free, region overflow,
    /// moving a borrowed block, …) are collected rather than aborting.
    pub fn lower_graph(&mut self, graph: &HyperGraph) -> Diagnostics {
        tracing::debug!(graph = %graph.name, "lowering graph into region state");
        let mut diagnostics = Diagnostics::new();

        for vertex in graph.vertices() {
            if let Some(region) = vertex.region_name() {
                self.region_by_name_or_default(region);
            }
        }
        let edge_regions: Vec<String> = graph
            .edges()
            .filter_map(|e| match &e.kind {
                EdgeKind::RegionEdge {
                    source_region,
                    target_region,
                    ..
                } => Some([source_region.clone(), target_region.clone()]),
                EdgeKind::MemoryEdge { region, .. } => Some([region.clone(), region.clone()]),
                _ => None,
            })
            .flatten()
            .collect();
        for region in edge_regions {
            self.region_by_name_or_default(&region);
        }

        // Placement pass: every concrete Alloc gets its block first, so a
        // region edge can resolve its source block regardless of how the
        // edge's endpoints fall in the data-flow order.
        let order = graph.topological_order();
        let mut vertex_allocs: BTreeMap<VertexId, AllocId> = BTreeMap::new();
        for id in &order {
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };
            if vertex.kind != VertexKind::Alloc {
                continue;
            }
            // Symbolic sizes are for the bounded-resources proof to
            // reject; nothing to place here.
            let Some(size) = vertex.alloc_size() else {
                continue;
            };
            let region_name = vertex.region_name().unwrap_or("heap").to_owned();
            let region = self.region_by_name_or_default(&region_name);
            let alignment = self.region(&region).map(|r| r.alignment).unwrap_or(8);
            match self.allocate(&region, size, alignment, id.clone(), AllocationKind::Owned) {
                Ok(alloc) => {
                    if let Some(allocation) = self.allocations.get(&alloc) {
                        self.vertex_blocks
                            .insert(id.clone(), allocation.block.clone());
                    }
                    vertex_allocs.insert(id.clone(), alloc);
                }
                Err(err) => diagnostics
                    .errors
                    .push(err.with_context(format!("alloc at {id}"))),
            }
        }

        // Event pass: frees and region edges, in program order.
        for id in &order {
            let Some(vertex) = graph.vertex(id) else {
                continue;
            };

            if vertex.kind == VertexKind::Apply && vertex.is_free_like() {
                for pred in graph.predecessors(id) {
                    let Some(alloc_id) = vertex_allocs.get(&pred.id).cloned() else {
                        continue;
                    };
                    match self.free(&alloc_id) {
                        Ok(()) => {
                            if let Some(allocation) = self.allocations.get_mut(&alloc_id) {
                                allocation.freed_by = Some(id.clone());
                            }
                        }
                        Err(err) => diagnostics
                            .errors
                            .push(err.with_context(format!("free at {id}"))),
                    }
                }
            }

            for edge in graph.edges() {
                let EdgeKind::RegionEdge { transfer, .. } = &edge.kind else {
                    continue;
                };
                if !edge.targets.contains(id) {
                    continue;
                }
                for source in edge.sources.clone() {
                    let Some(block) = self.vertex_blocks.get(&source).cloned() else {
                        continue;
                    };
                    let result = match transfer {
                        RegionTransfer::Move => self
                            .transfer_ownership(&block, source, id.clone(), TransferKind::Move)
                            .map(|_| ()),
                        RegionTransfer::Copy => self
                            .transfer_ownership(&block, source, id.clone(), TransferKind::Clone)
                            .map(|_| ()),
                        RegionTransfer::Borrow => self
                            .borrow(&block, id.clone(), BorrowKind::Immutable, None)
                            .map(|_| ()),
                    };
                    if let Err(err) = result {
                        diagnostics
                            .errors
                            .push(err.with_context(format!("region edge {}", edge.id)));
                    }
                }
            }
        }

        diagnostics
    }

    /// Memory-safety check over a graph: a freed allocation must not be
    /// used by any vertex after the free point, and every borrow must be
    /// outlived by its block's lifetime.
    pub fn check_safety(&self, graph: &HyperGraph) -> Diagnostics {
        let mut diagnostics = Diagnostics::new();
        let positions = graph.topological_positions();

        for allocation in self.allocations.values() {
            if !allocation.freed {
                continue;
            }
            let free_point = allocation
                .freed_by
                .as_ref()
                .and_then(|v| positions.get(v))
                .copied();

            for vertex in graph.vertices() {
                if Some(&vertex.id) == allocation.freed_by.as_ref() {
                    continue;
                }
                let references_block = vertex
                    .attributes
                    .get("block")
                    .and_then(serde_json::Value::as_str)
                    == Some(allocation.block.as_str());
                let consumes_allocation = graph
                    .predecessors(&vertex.id)
                    .iter()
                    .any(|p| p.id == allocation.vertex);
                if !references_block && !consumes_allocation {
                    continue;
                }

                let after_free = match (free_point, positions.get(&vertex.id)) {
                    (Some(freed), Some(&used)) => used > freed,
                    // A free with no recorded point (issued through the
                    // API) still invalidates direct block references.
                    _ => references_block,
                };
                if after_free {
                    diagnostics.error(SirErrorKind::MemorySafetyViolation(
                        MemorySafetyViolation::UseAfterFree {
                            vertex: vertex.id.to_string(),
                            alloc: allocation.id.to_string(),
                        },
                    ));
                }
            }
        }

        for block in self.blocks.values() {
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

        diagnostics
    }
}

impl HasValidityCheck for RegionManager {
    fn check_validity(&self) -> Result<(), String> {
        for block in self.blocks.values() {
            if !self.regions.contains_key(&block.region) {
                return Err(format!(
                    "block {} references unknown region {}",
                    block.id, block.region
                ));
            }
        }
        for allocation in self.allocations.values() {
            if !allocation.freed && !self.blocks.contains_key(&allocation.block) {
                return Err(format!(
                    "live allocation {} references detached block {}",
                    allocation.id, allocation.block
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vid(s: &str) -> VertexId {
        s.into()
    }

    #[test]
    fn allocation_packs_blocks_with_alignment() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("scratch"));
        let a = manager
            .allocate(&region, 10, 8, vid("v1"), AllocationKind::Owned)
            .unwrap();
        let b = manager
            .allocate(&region, 8, 8, vid("v2"), AllocationKind::Owned)
            .unwrap();

        let block_a = manager.block(&manager.allocation(&a).unwrap().block).unwrap();
        let block_b = manager.block(&manager.allocation(&b).unwrap().block).unwrap();
        assert_eq!(block_a.offset, 0);
        // 10 used bytes round up to 16 at alignment 8.
        assert_eq!(block_b.offset, 16);
    }

    #[test]
    fn bounded_region_rejects_overflow() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("tiny").with_size(16));
        manager
            .allocate(&region, 12, 8, vid("v1"), AllocationKind::Owned)
            .unwrap();
        let err = manager
            .allocate(&region, 8, 8, vid("v2"), AllocationKind::Owned)
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            SirErrorKind::RegionError(RegionError::OutOfRegion { .. })
        ));
    }

    #[test]
    fn double_free_is_an_error() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("scratch"));
        let alloc = manager
            .allocate(&region, 8, 8, vid("v1"), AllocationKind::Manual)
            .unwrap();
        manager.free(&alloc).unwrap();
        let err = manager.free(&alloc).unwrap_err();
        assert!(matches!(
            err.kind(),
            SirErrorKind::MemorySafetyViolation(MemorySafetyViolation::DoubleFree { .. })
        ));
    }

    #[test]
    fn free_while_borrowed_is_an_error() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("scratch"));
        let alloc = manager
            .allocate(&region, 8, 8, vid("v1"), AllocationKind::Owned)
            .unwrap();
        let block = manager.allocation(&alloc).unwrap().block.clone();
        manager
            .borrow(&block, vid("v2"), BorrowKind::Immutable, None)
            .unwrap();
        let err = manager.free(&alloc).unwrap_err();
        assert!(matches!(
            err.kind(),
            SirErrorKind::BorrowViolation(BorrowViolation::BorrowedAtFree { .. })
        ));
    }

    #[test]
    fn move_requires_current_owner() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("scratch"));
        let alloc = manager
            .allocate(&region, 8, 8, vid("owner"), AllocationKind::Owned)
            .unwrap();
        let block = manager.allocation(&alloc).unwrap().block.clone();

        let err = manager
            .transfer_ownership(&block, vid("thief"), vid("dst"), TransferKind::Move)
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            SirErrorKind::BorrowViolation(BorrowViolation::NotOwner { .. })
        ));

        manager
            .transfer_ownership(&block, vid("owner"), vid("dst"), TransferKind::Move)
            .unwrap();
        assert_eq!(manager.block(&block).unwrap().owner, Some(vid("dst")));
    }

    #[test]
    fn clone_leaves_ownership_unchanged() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("scratch"));
        let alloc = manager
            .allocate(&region, 8, 8, vid("owner"), AllocationKind::Owned)
            .unwrap();
        let block = manager.allocation(&alloc).unwrap().block.clone();
        manager
            .transfer_ownership(&block, vid("owner"), vid("dst"), TransferKind::Clone)
            .unwrap();
        assert_eq!(manager.block(&block).unwrap().owner, Some(vid("owner")));
        assert_eq!(manager.transfers().len(), 1);
    }

    #[test]
    fn borrow_exclusivity() {
        let mut manager = RegionManager::new();
        let region = manager.add_region(Region::heap("scratch"));
        let alloc = manager
            .allocate(&region, 8, 8, vid("owner"), AllocationKind::Owned)
            .unwrap();
        let block = manager.allocation(&alloc).unwrap().block.clone();

        let shared = manager
            .borrow(&block, vid("r1"), BorrowKind::Immutable, None)
            .unwrap();
        // A second shared borrow is fine; a unique borrow is not.
        manager
            .borrow(&block, vid("r2"), BorrowKind::Immutable, None)
            .unwrap();
        assert!(
            manager
                .borrow(&block, vid("w"), BorrowKind::Mutable, None)
                .is_err()
        );

        manager.end_borrow(&shared);
        assert!(
            manager
                .borrow(&block, vid("w"), BorrowKind::Mutable, None)
                .is_err(),
            "one shared borrow still live"
        );
    }

    #[test]
    fn borrow_lifetime_must_be_outlived_by_block() {
        let mut manager = RegionManager::new();
        let scope = Lifetime::scoped("'fn", None);
        let region = manager.add_region(Region::stack("frame").with_lifetime(scope));
        let alloc = manager
            .allocate(&region, 8, 8, vid("owner"), AllocationKind::Owned)
            .unwrap();
        let block = manager.allocation(&alloc).unwrap().block.clone();

        let err = manager
            .borrow(
                &block,
                vid("escapee"),
                BorrowKind::Immutable,
                Some(Lifetime::statik()),
            )
            .unwrap_err();
        assert!(matches!(
            err.kind(),
            SirErrorKind::BorrowViolation(BorrowViolation::BorrowOutlivesBlock { .. })
        ));
    }

    #[test]
    fn lazy_region_creation_by_name() {
        let mut manager = RegionManager::new();
        assert!(manager.region_by_name("gpu_global").is_none());
        let id = manager.region_by_name_or_default("gpu_global");
        assert_eq!(manager.region(&id).unwrap().name, "gpu_global");
        assert_eq!(manager.region_by_name_or_default("gpu_global"), id);
    }

    #[test]
    fn lazy_regions_infer_their_kind_from_the_name() {
        use crate::memory::RegionKind;

        let mut manager = RegionManager::new();
        let gpu = manager.region_by_name_or_default("gpu_global");
        assert!(manager.region(&gpu).unwrap().kind.is_gpu());
        let bram = manager.region_by_name_or_default("fpga_bram");
        let bram = manager.region(&bram).unwrap();
        assert!(bram.kind.is_fpga());
        assert_eq!(bram.size, Some(36 * 1024));
        let plain = manager.region_by_name_or_default("scratch");
        assert_eq!(manager.region(&plain).unwrap().kind, RegionKind::Heap);
    }

    #[test]
    fn lower_graph_materializes_allocations_and_regions() {
        use crate::sir::{HyperEdge, Vertex};
        use crate::types::Ty;

        let mut g = HyperGraph::new("lowered");
        let alloc = g.add_vertex(Vertex::alloc(64u64.into(), Ty::f32(), "gpu_global"));
        let load = g.add_vertex(Vertex::load(Ty::f32(), "gpu_global"));
        g.add_edge(HyperEdge::data_flow([alloc.clone()], [load]));

        let mut manager = RegionManager::new();
        let diagnostics = manager.lower_graph(&g);
        assert!(diagnostics.is_clean(), "{diagnostics:?}");

        assert!(manager.region_by_name("gpu_global").is_some());
        let block = manager.block_for_vertex(&alloc).expect("block placed");
        assert_eq!(block.size, 64);
        assert_eq!(block.owner, Some(alloc));
    }

    #[test]
    fn lower_graph_then_check_safety_flags_use_after_free() {
        use crate::sir::{HyperEdge, Vertex};
        use crate::types::Ty;

        let mut g = HyperGraph::new("uaf");
        let alloc = g.add_vertex(Vertex::alloc(8u64.into(), Ty::i64(), "heap"));
        let free = g.add_vertex(Vertex::apply("free", Ty::unit(), Default::default()));
        let load = g.add_vertex(Vertex::load(Ty::i64(), "heap"));
        g.add_edge(HyperEdge::data_flow([alloc.clone()], [free.clone()]));
        g.add_edge(HyperEdge::data_flow([alloc], [load.clone()]));
        // The load is forced after the free in topological order.
        g.add_edge(HyperEdge::data_flow([free], [load.clone()]));

        let mut manager = RegionManager::new();
        let diagnostics = manager.lower_graph(&g);
        assert!(diagnostics.is_clean(), "{diagnostics:?}");

        let safety = manager.check_safety(&g);
        assert!(safety.errors.iter().any(|e| matches!(
            e.kind(),
            SirErrorKind::MemorySafetyViolation(MemorySafetyViolation::UseAfterFree {
                vertex,
                ..
            }) if *vertex == load.to_string()
        )));
    }

    #[test]
    fn lower_graph_reports_region_overflow() {
        use crate::sir::Vertex;
        use crate::types::Ty;

        let mut manager = RegionManager::new();
        manager.add_region(Region::heap("tiny").with_size(16));

        let mut g = HyperGraph::new("overflow");
        g.add_vertex(Vertex::alloc(32u64.into(), Ty::i64(), "tiny"));

        let diagnostics = manager.lower_graph(&g);
        assert!(diagnostics.errors.iter().any(|e| matches!(
            e.kind(),
            SirErrorKind::RegionError(RegionError::OutOfRegion { .. })
        )));
    }

    #[test]
    fn lower_graph_records_moves_from_region_edges() {
        use crate::sir::{HyperEdge, RegionTransfer, Vertex};
        use crate::types::Ty;

        let mut g = HyperGraph::new("moved");
        let alloc = g.add_vertex(Vertex::alloc(8u64.into(), Ty::i64(), "heap"));
        let consumer = g.add_vertex(Vertex::apply("consume", Ty::unit(), Default::default()));
        g.add_edge(HyperEdge::region_transfer(
            alloc.clone(),
            consumer.clone(),
            "heap",
            "gpu_global",
            RegionTransfer::Move,
        ));

        let mut manager = RegionManager::new();
        let diagnostics = manager.lower_graph(&g);
        assert!(diagnostics.is_clean(), "{diagnostics:?}");
        assert_eq!(manager.transfers().len(), 1);
        assert_eq!(
            manager.block_for_vertex(&alloc).unwrap().owner,
            Some(consumer)
        );
    }

    #[test]
    fn lower_graph_flags_free_of_a_borrowed_block() {
        use crate::sir::{HyperEdge, RegionTransfer, Vertex};
        use crate::types::Ty;

        let mut g = HyperGraph::new("borrowed_free");
        let alloc = g.add_vertex(Vertex::alloc(8u64.into(), Ty::i64(), "heap"));
        let reader = g.add_vertex(Vertex::load(Ty::i64(), "heap"));
        let free = g.add_vertex(Vertex::apply("free", Ty::unit(), Default::default()));
        g.add_edge(HyperEdge::region_transfer(
            alloc.clone(),
            reader.clone(),
            "heap",
            "heap",
            RegionTransfer::Borrow,
        ));
        g.add_edge(HyperEdge::data_flow([alloc.clone()], [reader.clone()]));
        g.add_edge(HyperEdge::data_flow([alloc], [free.clone()]));
        g.add_edge(HyperEdge::data_flow([reader], [free]));

        let mut manager = RegionManager::new();
        let diagnostics = manager.lower_graph(&g);
        assert!(diagnostics.errors.iter().any(|e| matches!(
            e.kind(),
            SirErrorKind::BorrowViolation(BorrowViolation::BorrowedAtFree { .. })
        )));
    }
}
