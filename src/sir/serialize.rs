//! Lossless conversion between graph elements and the plain tree structure
//! consumed by proof emission and the backend sections.
//!
//! The tree layout is fixed: a vertex dict carries `id`, `type`, `value`,
//! `attributes` and a nested `metadata` map; an edge dict carries `id`,
//! `type`, `sources`, `targets`, `attributes`, `metadata`. serde_json's
//! object representation keeps keys sorted, so serializing the same graph
//! twice yields identical bytes.

use serde_json::{Map, Value, json};

use crate::error::{InvalidGraphError, SirError};
use crate::sir::edge::{EdgeKind, EdgeMetadata, HyperEdge};
use crate::sir::vertex::{Vertex, VertexMetadata};
use crate::utils::{EdgeId, VertexId};

fn malformed(detail: impl Into<String>) -> SirError {
    SirError::invalid_graph(InvalidGraphError::Malformed(detail.into()))
}

fn field<'v>(value: &'v Value, key: &str) -> Result<&'v Value, SirError> {
    value
        .get(key)
        .ok_or_else(|| malformed(format!("missing field `{key}`")))
}

fn decode<T: serde::de::DeserializeOwned>(value: &Value, what: &str) -> Result<T, SirError> {
    serde_json::from_value(value.clone())
        .map_err(|e| malformed(format!("bad `{what}`: {e}")))
}

impl Vertex {
    pub fn serialize(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.kind,
            "value": self.value,
            "attributes": self.attributes,
            "metadata": {
                "type_info": self.metadata.ty,
                "effects": self.metadata.effects,
                "lifetime": self.metadata.lifetime,
                "parallelism": self.metadata.parallelism,
                "hardware_affinity": self.metadata.affinity,
                "region": self.metadata.region,
                "provenance": self.metadata.provenance,
            },
        })
    }

    pub fn from_value(value: &Value) -> Result<Self, SirError> {
        let md = field(value, "metadata")?;
        let metadata = VertexMetadata {
            ty: decode(field(md, "type_info")?, "type_info")?,
            effects: decode(field(md, "effects")?, "effects")?,
            lifetime: decode(field(md, "lifetime")?, "lifetime")?,
            parallelism: decode(field(md, "parallelism")?, "parallelism")?,
            provenance: decode(field(md, "provenance")?, "provenance")?,
            affinity: decode(field(md, "hardware_affinity")?, "hardware_affinity")?,
            region: decode(field(md, "region")?, "region")?,
        };
        Ok(Vertex {
            id: decode(field(value, "id")?, "id")?,
            kind: decode(field(value, "type")?, "type")?,
            value: field(value, "value")?.clone(),
            attributes: decode(field(value, "attributes")?, "attributes")?,
            metadata,
        })
    }
}

impl EdgeKind {
    /// The variant payload, flattened into the edge's `attributes` map.
    pub fn attributes(&self) -> Map<String, Value> {
        let value = match self {
            EdgeKind::DataFlow { port, affinity } => {
                json!({ "port": port, "affinity": affinity })
            }
            EdgeKind::ControlFlow { kind, condition } => {
                json!({ "kind": kind, "condition": condition })
            }
            EdgeKind::EffectEdge { ordering } => json!({ "ordering": ordering }),
            EdgeKind::ParallelEdge {
                kind,
                simd_width,
                num_threads,
                warp_size,
                affinity,
            } => json!({
                "kind": kind,
                "simd_width": simd_width,
                "num_threads": num_threads,
                "warp_size": warp_size,
                "affinity": affinity,
            }),
            EdgeKind::MemoryEdge { access, region } => {
                json!({ "access_type": access, "region": region })
            }
            EdgeKind::RegionEdge {
                source_region,
                target_region,
                transfer,
            } => json!({
                "source_region": source_region,
                "target_region": target_region,
                "transfer_type": transfer,
            }),
        };
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    pub fn from_attributes(variant: &str, attrs: &Value) -> Result<Self, SirError> {
        Ok(match variant {
            "DATA_FLOW" => EdgeKind::DataFlow {
                port: decode(field(attrs, "port")?, "port")?,
                affinity: decode(field(attrs, "affinity")?, "affinity")?,
            },
            "CONTROL_FLOW" => EdgeKind::ControlFlow {
                kind: decode(field(attrs, "kind")?, "kind")?,
                condition: decode(field(attrs, "condition")?, "condition")?,
            },
            "EFFECT_EDGE" => EdgeKind::EffectEdge {
                ordering: decode(field(attrs, "ordering")?, "ordering")?,
            },
            "PARALLEL_EDGE" => EdgeKind::ParallelEdge {
                kind: decode(field(attrs, "kind")?, "kind")?,
                simd_width: decode(field(attrs, "simd_width")?, "simd_width")?,
                num_threads: decode(field(attrs, "num_threads")?, "num_threads")?,
                warp_size: decode(field(attrs, "warp_size")?, "warp_size")?,
                affinity: decode(field(attrs, "affinity")?, "affinity")?,
            },
            "MEMORY_EDGE" => EdgeKind::MemoryEdge {
                access: decode(field(attrs, "access_type")?, "access_type")?,
                region: decode(field(attrs, "region")?, "region")?,
            },
            "REGION_EDGE" => EdgeKind::RegionEdge {
                source_region: decode(field(attrs, "source_region")?, "source_region")?,
                target_region: decode(field(attrs, "target_region")?, "target_region")?,
                transfer: decode(field(attrs, "transfer_type")?, "transfer_type")?,
            },
            other => return Err(malformed(format!("unknown edge type `{other}`"))),
        })
    }
}

impl HyperEdge {
    pub fn serialize(&self) -> Value {
        json!({
            "id": self.id,
            "type": self.kind.variant_name(),
            "sources": self.sources.iter().collect::<Vec<_>>(),
            "targets": self.targets.iter().collect::<Vec<_>>(),
            "attributes": Value::Object(self.kind.attributes()),
            "metadata": {
                "weight": self.metadata.weight,
                "latency": self.metadata.latency,
                "bandwidth": self.metadata.bandwidth,
                "hardware_affinity": self.metadata.affinity,
                "critical_path": self.metadata.critical_path,
            },
        })
    }

    pub fn from_value(value: &Value) -> Result<Self, SirError> {
        let variant: String = decode(field(value, "type")?, "type")?;
        let kind = EdgeKind::from_attributes(&variant, field(value, "attributes")?)?;
        let md = field(value, "metadata")?;
        let sources: Vec<VertexId> = decode(field(value, "sources")?, "sources")?;
        let targets: Vec<VertexId> = decode(field(value, "targets")?, "targets")?;
        let id: EdgeId = decode(field(value, "id")?, "id")?;
        Ok(HyperEdge {
            id,
            kind,
            sources: sources.into_iter().collect(),
            targets: targets.into_iter().collect(),
            metadata: EdgeMetadata {
                weight: decode(field(md, "weight")?, "weight")?,
                latency: decode(field(md, "latency")?, "latency")?,
                bandwidth: decode(field(md, "bandwidth")?, "bandwidth")?,
                affinity: decode(field(md, "hardware_affinity")?, "hardware_affinity")?,
                critical_path: decode(field(md, "critical_path")?, "critical_path")?,
            },
        })
    }
}
