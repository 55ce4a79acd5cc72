use std::collections::BTreeMap;

use serde_derive::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::effects::{Effect, EffectSet};
use crate::types::Ty;
use crate::utils::VertexId;

/// Preferred execution device for a vertex or edge.
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HardwareAffinity {
    #[default]
    Any,
    Cpu,
    Gpu,
    GpuStream0,
    GpuStream1,
    Fpga,
    FpgaLut,
    Tpu,
    Wasm,
    Jvm,
}

impl HardwareAffinity {
    pub fn is_gpu(self) -> bool {
        matches!(
            self,
            HardwareAffinity::Gpu | HardwareAffinity::GpuStream0 | HardwareAffinity::GpuStream1
        )
    }

    pub fn is_fpga(self) -> bool {
        matches!(self, HardwareAffinity::Fpga | HardwareAffinity::FpgaLut)
    }
}

/// The variant tag of a vertex.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VertexKind {
    Const,
    Alloc,
    Load,
    Store,
    Apply,
    Phi,
    KernelLaunch,
    Parameter,
    Return,
    Branch,
    Merge,
}

/// A requested allocation size: a concrete byte count or a symbolic
/// (dependent) expression carried verbatim.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AllocSize {
    Bytes(u64),
    Symbolic(String),
}

impl AllocSize {
    pub fn as_bytes(&self) -> Option<u64> {
        match self {
            AllocSize::Bytes(n) => Some(*n),
            AllocSize::Symbolic(_) => None,
        }
    }
}

impl From<u64> for AllocSize {
    fn from(n: u64) -> Self {
        AllocSize::Bytes(n)
    }
}

impl From<&str> for AllocSize {
    fn from(s: &str) -> Self {
        AllocSize::Symbolic(s.to_owned())
    }
}

/// Parallelism hints attached to a vertex.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Parallelism {
    pub grid_dim: [u64; 3],
    pub block_dim: [u64; 3],
    pub warp_size: u32,
    pub simd_width: u32,
}

impl Default for Parallelism {
    fn default() -> Self {
        Self {
            grid_dim: [1, 1, 1],
            block_dim: [1, 1, 1],
            warp_size: 32,
            simd_width: 1,
        }
    }
}

impl Parallelism {
    pub fn grid(grid_dim: [u64; 3], block_dim: [u64; 3]) -> Self {
        Self {
            grid_dim,
            block_dim,
            ..Default::default()
        }
    }

    /// Total thread count implied by the launch dimensions.
    pub fn degree(&self) -> u64 {
        self.grid_dim.iter().product::<u64>()
    }

    pub fn launch_size(&self) -> u64 {
        self.grid_dim.iter().product::<u64>() * self.block_dim.iter().product::<u64>()
    }
}

/// Record of where a vertex came from and what has been done to it since.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Provenance {
    pub source_language: String,
    pub source_file: String,
    pub source_line: u32,
    pub source_column: u32,
    pub original_name: String,
    pub transformation_chain: Vec<String>,
}

impl Provenance {
    pub fn new(source_language: impl Into<String>) -> Self {
        Self {
            source_language: source_language.into(),
            ..Default::default()
        }
    }

    pub fn at(mut self, file: impl Into<String>, line: u32, column: u32) -> Self {
        self.source_file = file.into();
        self.source_line = line;
        self.source_column = column;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.original_name = name.into();
        self
    }

    /// Returns a copy with one more entry on the transformation chain.
    pub fn with_transformation(&self, transformation: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.transformation_chain.push(transformation.into());
        next
    }
}

/// Metadata refined onto a vertex between lifting and emission.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexMetadata {
    pub ty: Option<Ty>,
    pub effects: EffectSet,
    pub lifetime: String,
    pub parallelism: Option<Parallelism>,
    pub provenance: Option<Provenance>,
    pub affinity: HardwareAffinity,
    pub region: Option<String>,
}

impl Default for VertexMetadata {
    fn default() -> Self {
        Self {
            ty: None,
            effects: EffectSet::new(),
            lifetime: "static".to_owned(),
            parallelism: None,
            provenance: None,
            affinity: HardwareAffinity::Any,
            region: None,
        }
    }
}

/// A node in the hypergraph. Identity is stable for the vertex's lifetime;
/// metadata may be refined up to emission.
#[derive(Clone, Debug, PartialEq)]
pub struct Vertex {
    pub id: VertexId,
    pub kind: VertexKind,
    pub value: Value,
    pub attributes: BTreeMap<String, Value>,
    pub metadata: VertexMetadata,
}

impl Vertex {
    fn new(kind: VertexKind, metadata: VertexMetadata) -> Self {
        Self {
            id: VertexId::fresh(),
            kind,
            value: Value::Null,
            attributes: BTreeMap::new(),
            metadata,
        }
    }

    pub fn constant(value: Value, ty: Option<Ty>) -> Self {
        let mut v = Self::new(
            VertexKind::Const,
            VertexMetadata {
                ty,
                effects: EffectSet::from([Effect::Pure]),
                ..Default::default()
            },
        );
        v.value = value;
        v
    }

    pub fn alloc(size: AllocSize, ty: Ty, region: impl Into<String>) -> Self {
        let region = region.into();
        let mut v = Self::new(
            VertexKind::Alloc,
            VertexMetadata {
                ty: Some(ty),
                effects: EffectSet::from([Effect::Alloc]),
                region: Some(region.clone()),
                ..Default::default()
            },
        );
        v.attributes
            .insert("size".to_owned(), serde_json::to_value(&size).unwrap_or(Value::Null));
        v.attributes.insert("region".to_owned(), json!(region));
        v
    }

    pub fn load(ty: Ty, region: impl Into<String>) -> Self {
        Self::new(
            VertexKind::Load,
            VertexMetadata {
                ty: Some(ty),
                effects: EffectSet::from([Effect::Read]),
                region: Some(region.into()),
                ..Default::default()
            },
        )
    }

    pub fn store(ty: Ty, region: impl Into<String>) -> Self {
        Self::new(
            VertexKind::Store,
            VertexMetadata {
                ty: Some(ty),
                effects: EffectSet::from([Effect::Write]),
                region: Some(region.into()),
                ..Default::default()
            },
        )
    }

    pub fn apply(function: impl Into<String>, ty: Ty, effects: EffectSet) -> Self {
        let effects = if effects.is_empty() {
            EffectSet::from([Effect::Pure])
        } else {
            effects
        };
        let mut v = Self::new(
            VertexKind::Apply,
            VertexMetadata {
                ty: Some(ty),
                effects,
                ..Default::default()
            },
        );
        v.attributes
            .insert("function".to_owned(), json!(function.into()));
        v
    }

    pub fn phi(ty: Ty) -> Self {
        Self::new(
            VertexKind::Phi,
            VertexMetadata {
                ty: Some(ty),
                effects: EffectSet::from([Effect::Pure]),
                ..Default::default()
            },
        )
    }

    pub fn kernel_launch(
        kernel: impl Into<String>,
        grid_dim: [u64; 3],
        block_dim: [u64; 3],
        ty: Ty,
        affinity: HardwareAffinity,
    ) -> Self {
        let mut v = Self::new(
            VertexKind::KernelLaunch,
            VertexMetadata {
                ty: Some(ty),
                effects: EffectSet::from([Effect::Io, Effect::WarpSync]),
                affinity,
                parallelism: Some(Parallelism::grid(grid_dim, block_dim)),
                ..Default::default()
            },
        );
        v.attributes
            .insert("kernel".to_owned(), json!(kernel.into()));
        v
    }

    pub fn parameter(name: impl Into<String>, ty: Ty, index: u32) -> Self {
        let mut v = Self::new(
            VertexKind::Parameter,
            VertexMetadata {
                ty: Some(ty),
                effects: EffectSet::from([Effect::Pure]),
                ..Default::default()
            },
        );
        v.attributes.insert("name".to_owned(), json!(name.into()));
        v.attributes.insert("index".to_owned(), json!(index));
        v
    }

    pub fn ret(ty: Ty) -> Self {
        Self::new(
            VertexKind::Return,
            VertexMetadata {
                ty: Some(ty),
                effects: EffectSet::from([Effect::Pure]),
                ..Default::default()
            },
        )
    }

    pub fn branch(condition: impl Into<String>) -> Self {
        let mut v = Self::new(
            VertexKind::Branch,
            VertexMetadata {
                effects: EffectSet::from([Effect::Pure]),
                ..Default::default()
            },
        );
        v.attributes
            .insert("condition".to_owned(), json!(condition.into()));
        v
    }

    pub fn merge() -> Self {
        Self::new(
            VertexKind::Merge,
            VertexMetadata {
                effects: EffectSet::from([Effect::Pure]),
                ..Default::default()
            },
        )
    }

    pub fn with_affinity(mut self, affinity: HardwareAffinity) -> Self {
        self.metadata.affinity = affinity;
        self
    }

    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.metadata.region = Some(region.into());
        self
    }

    pub fn with_provenance(mut self, provenance: Provenance) -> Self {
        self.metadata.provenance = Some(provenance);
        self
    }

    pub fn with_effects(mut self, effects: EffectSet) -> Self {
        self.metadata.effects = effects;
        self
    }

    /// The callee name of an Apply vertex, or the kernel name of a launch.
    pub fn function_name(&self) -> Option<&str> {
        self.attributes
            .get("function")
            .or_else(|| self.attributes.get("kernel"))
            .and_then(Value::as_str)
    }

    /// The requested size of an Alloc vertex, when it is a concrete bound.
    pub fn alloc_size(&self) -> Option<u64> {
        self.attributes.get("size").and_then(Value::as_u64)
    }

    pub fn region_name(&self) -> Option<&str> {
        self.metadata.region.as_deref()
    }

    pub fn source_language(&self) -> Option<&str> {
        self.metadata
            .provenance
            .as_ref()
            .map(|p| p.source_language.as_str())
    }

    pub fn is_memcpy_like(&self) -> bool {
        self.kind == VertexKind::Apply
            && self.function_name().is_some_and(|name| {
                let name = name.to_ascii_lowercase();
                name.contains("memcpy") || name.contains("copy")
            })
    }

    pub fn is_free_like(&self) -> bool {
        self.kind == VertexKind::Apply
            && (self.metadata.effects.contains(&Effect::Free)
                || self.function_name().is_some_and(|name| {
                    let name = name.to_ascii_lowercase();
                    name == "free" || name == "dealloc"
                }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ty;

    #[test]
    fn const_vertex_is_pure() {
        let v = Vertex::constant(json!(42), Some(Ty::i64()));
        assert_eq!(v.kind, VertexKind::Const);
        assert_eq!(v.metadata.effects, EffectSet::from([Effect::Pure]));
        assert_eq!(v.value, json!(42));
    }

    #[test]
    fn alloc_vertex_records_size_and_region() {
        let v = Vertex::alloc(1024u64.into(), Ty::i64(), "heap");
        assert_eq!(v.kind, VertexKind::Alloc);
        assert_eq!(v.alloc_size(), Some(1024));
        assert_eq!(v.region_name(), Some("heap"));
        assert!(v.metadata.effects.contains(&Effect::Alloc));
    }

    #[test]
    fn symbolic_alloc_has_no_concrete_size() {
        let v = Vertex::alloc("n * 8".into(), Ty::i64(), "heap");
        assert_eq!(v.alloc_size(), None);
    }

    #[test]
    fn kernel_launch_carries_launch_dims() {
        let v = Vertex::kernel_launch(
            "saxpy",
            [16, 16, 1],
            [16, 16, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        );
        let par = v.metadata.parallelism.as_ref().unwrap();
        assert_eq!(par.grid_dim, [16, 16, 1]);
        assert_eq!(par.launch_size(), 16 * 16 * 16 * 16);
        assert!(v.metadata.effects.contains(&Effect::WarpSync));
    }

    #[test]
    fn provenance_transformation_chain_grows_functionally() {
        let p = Provenance::new("C").at("main.c", 10, 4).named("x");
        let p2 = p.with_transformation("kernel_fusion");
        assert!(p.transformation_chain.is_empty());
        assert_eq!(p2.transformation_chain, vec!["kernel_fusion".to_owned()]);
    }

    #[test]
    fn memcpy_and_free_recognition() {
        let m = Vertex::apply("cudaMemcpyAsync", Ty::unit(), EffectSet::from([Effect::Io]));
        assert!(m.is_memcpy_like());
        let f = Vertex::apply("free", Ty::unit(), EffectSet::from([Effect::Free]));
        assert!(f.is_free_like());
        let g = Vertex::apply("op_add", Ty::i64(), EffectSet::new());
        assert!(!g.is_memcpy_like() && !g.is_free_like());
    }
}
