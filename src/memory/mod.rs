//! The region-based memory model: regions, lifetimes, blocks, borrows,
//! allocation records and ownership transfers.

pub mod borrow_check;
pub mod manager;

pub use borrow_check::BorrowChecker;
pub use manager::RegionManager;

use serde_derive::{Deserialize, Serialize};

use crate::sir::HardwareAffinity;
use crate::utils::{AllocId, BlockId, BorrowId, RegionId, TransferId, VertexId};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    Stack,
    Heap,
    ThreadLocal,
    GpuGlobal { stream: u32 },
    GpuShared,
    FpgaBram,
    FpgaLut,
    Static,
    WasmLinear,
    JvmHeap,
}

impl RegionKind {
    pub fn is_gpu(self) -> bool {
        matches!(self, RegionKind::GpuGlobal { .. } | RegionKind::GpuShared)
    }

    pub fn is_fpga(self) -> bool {
        matches!(self, RegionKind::FpgaBram | RegionKind::FpgaLut)
    }

    /// Device memory as opposed to host-side (CPU-reachable) memory.
    pub fn is_device(self) -> bool {
        self.is_gpu() || self.is_fpga()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationKind {
    Manual,
    Owned,
    Gc,
    Arena,
    Pool,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BorrowKind {
    Immutable,
    Mutable,
    Exclusive,
}

impl BorrowKind {
    pub fn is_unique(self) -> bool {
        matches!(self, BorrowKind::Mutable | BorrowKind::Exclusive)
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferKind {
    Move,
    Clone,
}

/// A named interval governing validity of a region or block. `static`
/// outlives everything; otherwise L1 outlives L2 iff L2's parent chain
/// contains L1.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Lifetime {
    pub name: String,
    pub start_point: String,
    pub end_point: String,
    pub parent: Option<Box<Lifetime>>,
    pub constraints: Vec<String>,
}

impl Lifetime {
    pub fn statik() -> Self {
        Self {
            name: "static".to_owned(),
            start_point: String::new(),
            end_point: String::new(),
            parent: None,
            constraints: Vec::new(),
        }
    }

    pub fn scoped(name: impl Into<String>, parent: Option<Lifetime>) -> Self {
        Self {
            name: name.into(),
            start_point: String::new(),
            end_point: String::new(),
            parent: parent.map(Box::new),
            constraints: Vec::new(),
        }
    }

    pub fn is_static(&self) -> bool {
        self.name == "static"
    }

    pub fn outlives(&self, other: &Lifetime) -> bool {
        if self.is_static() {
            return true;
        }
        if self.name == other.name {
            return true;
        }
        if other.is_static() {
            return false;
        }
        let mut current = other.parent.as_deref();
        while let Some(lifetime) = current {
            if lifetime.name == self.name {
                return true;
            }
            current = lifetime.parent.as_deref();
        }
        false
    }
}

/// A named, typed memory container. Regions compare by identity: two
/// regions are equal iff they are the same region, and moving one between
/// graphs preserves that identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Region {
    pub id: RegionId,
    pub name: String,
    pub kind: RegionKind,
    pub lifetime: Lifetime,
    pub size: Option<u64>,
    pub alignment: u64,
    pub affinity: HardwareAffinity,
    pub parent: Option<RegionId>,
}

impl PartialEq for Region {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Region {}

impl std::hash::Hash for Region {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl Region {
    fn new(name: impl Into<String>, kind: RegionKind, affinity: HardwareAffinity) -> Self {
        Self {
            id: RegionId::fresh(),
            name: name.into(),
            kind,
            lifetime: Lifetime::statik(),
            size: None,
            alignment: 8,
            affinity,
            parent: None,
        }
    }

    pub fn stack(name: impl Into<String>) -> Self {
        let mut region = Self::new(name, RegionKind::Stack, HardwareAffinity::Cpu);
        region.lifetime = Lifetime::scoped("fn_scope", None);
        region
    }

    pub fn heap(name: impl Into<String>) -> Self {
        Self::new(name, RegionKind::Heap, HardwareAffinity::Cpu)
    }

    pub fn thread_local(name: impl Into<String>) -> Self {
        Self::new(name, RegionKind::ThreadLocal, HardwareAffinity::Cpu)
    }

    pub fn gpu_global(name: impl Into<String>, stream: u32) -> Self {
        Self::new(
            name,
            RegionKind::GpuGlobal { stream },
            HardwareAffinity::Gpu,
        )
    }

    pub fn gpu_shared(name: impl Into<String>) -> Self {
        Self::new(name, RegionKind::GpuShared, HardwareAffinity::Gpu)
    }

    pub fn fpga_bram(name: impl Into<String>) -> Self {
        let mut region = Self::new(name, RegionKind::FpgaBram, HardwareAffinity::Fpga);
        region.size = Some(36 * 1024);
        region
    }

    pub fn fpga_lut(name: impl Into<String>) -> Self {
        Self::new(name, RegionKind::FpgaLut, HardwareAffinity::Fpga)
    }

    pub fn statik(name: impl Into<String>) -> Self {
        Self::new(name, RegionKind::Static, HardwareAffinity::Any)
    }

    pub fn wasm_linear(name: impl Into<String>) -> Self {
        Self::new(name, RegionKind::WasmLinear, HardwareAffinity::Wasm)
    }

    pub fn jvm_heap(name: impl Into<String>) -> Self {
        Self::new(name, RegionKind::JvmHeap, HardwareAffinity::Jvm)
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    pub fn with_lifetime(mut self, lifetime: Lifetime) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Whether data may be transferred to `target` without staging.
    /// Permitted when the regions are the same, at least one side is
    /// host-side, or both sit on the same device family. GPU to FPGA (and
    /// symmetric) requires explicit staging through the host.
    pub fn can_transfer_to(&self, target: &Region) -> bool {
        if self.id == target.id {
            return true;
        }
        if !self.kind.is_device() || !target.kind.is_device() {
            return true;
        }
        if self.kind.is_gpu() && target.kind.is_gpu() {
            return true;
        }
        if self.kind.is_fpga() && target.kind.is_fpga() {
            return true;
        }
        false
    }
}

/// A sized, aligned, lifetime-bound portion of a region.
#[derive(Clone, Debug, PartialEq)]
pub struct MemoryBlock {
    pub id: BlockId,
    pub region: RegionId,
    pub offset: u64,
    pub size: u64,
    pub alignment: u64,
    pub lifetime: Lifetime,
    pub owner: Option<VertexId>,
    pub borrows: Vec<Borrow>,
}

impl MemoryBlock {
    pub fn is_borrowed(&self) -> bool {
        !self.borrows.is_empty()
    }

    pub fn has_unique_borrow(&self) -> bool {
        self.borrows.iter().any(|b| b.kind.is_unique())
    }
}

/// A lifetime-bounded reference to a block.
#[derive(Clone, Debug, PartialEq)]
pub struct Borrow {
    pub id: BorrowId,
    pub block: BlockId,
    pub kind: BorrowKind,
    pub borrower: VertexId,
    pub lifetime: Lifetime,
}

/// Record of one allocation and whether it has been freed.
#[derive(Clone, Debug, PartialEq)]
pub struct Allocation {
    pub id: AllocId,
    pub vertex: VertexId,
    pub block: BlockId,
    pub strategy: AllocationKind,
    pub freed: bool,
    /// The vertex whose free detached the block, when the free was
    /// lowered from a graph rather than issued through the API.
    pub freed_by: Option<VertexId>,
}

/// Record of an ownership transfer between vertices. Moves change the
/// block's owner; clones do not.
#[derive(Clone, Debug, PartialEq)]
pub struct OwnershipTransfer {
    pub id: TransferId,
    pub block: BlockId,
    pub from: VertexId,
    pub to: VertexId,
    pub kind: TransferKind,
}
