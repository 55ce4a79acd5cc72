use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

use crate::effects::Effect;
use crate::fusion::{FusionPattern, FusionPatternKind};
use crate::sir::{HardwareAffinity, HyperGraph, Parallelism, Vertex, VertexKind};
use crate::utils::VertexId;

/// Which side of a polyglot pipeline a source language sits on.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum LanguageClass {
    Host,
    Native,
    Device,
}

fn classify_language(language: &str) -> Option<LanguageClass> {
    match language.to_ascii_lowercase().as_str() {
        "c" | "python" | "sql" | "intent" => Some(LanguageClass::Host),
        "rust" | "native" | "llvm" => Some(LanguageClass::Native),
        "cuda" | "gpu" | "kernel" => Some(LanguageClass::Device),
        _ => None,
    }
}

/// Runs every recognizer once over the input graph and returns the
/// detected patterns in rewrite priority order with deterministic
/// tie-breaks.
pub fn detect_fusion_patterns(graph: &HyperGraph) -> Vec<FusionPattern> {
    let mut patterns = Vec::new();
    patterns.extend(detect_polyglot_pipelines(graph));
    patterns.extend(detect_kernel_fusion(graph));
    patterns.extend(detect_transfer_elimination(graph));
    patterns.extend(detect_memory_coalescing(graph));
    patterns.extend(detect_dataflow_fusion(graph));
    patterns.extend(detect_loop_fusion(graph));
    patterns.extend(detect_pipeline_fusion(graph));

    patterns.sort_by(|a, b| {
        a.kind
            .cmp(&b.kind)
            .then_with(|| a.vertices.cmp(&b.vertices))
    });
    tracing::debug!(count = patterns.len(), "fusion patterns detected");
    patterns
}

/// Chains of vertices whose provenance walks a host → native → device
/// pipeline. The speedup grows with how much of the pipeline collapses.
fn detect_polyglot_pipelines(graph: &HyperGraph) -> Vec<FusionPattern> {
    let mut patterns = Vec::new();
    let mut visited: BTreeSet<VertexId> = BTreeSet::new();

    for id in graph.topological_order() {
        if visited.contains(&id) {
            continue;
        }
        let Some(vertex) = graph.vertex(&id) else {
            continue;
        };
        let Some(LanguageClass::Host) = vertex.source_language().and_then(classify_language)
        else {
            continue;
        };

        let mut chain = vec![id.clone()];
        let mut classes = BTreeSet::from([0u8]);
        let mut current = id.clone();
        loop {
            let next = graph.successors(&current).into_iter().find_map(|s| {
                let class = s.source_language().and_then(classify_language)?;
                if matches!(class, LanguageClass::Native | LanguageClass::Device)
                    && !visited.contains(&s.id)
                    && !chain.contains(&s.id)
                {
                    Some((s.id.clone(), class))
                } else {
                    None
                }
            });
            let Some((next_id, class)) = next else {
                break;
            };
            classes.insert(match class {
                LanguageClass::Host => 0,
                LanguageClass::Native => 1,
                LanguageClass::Device => 2,
            });
            visited.insert(next_id.clone());
            chain.push(next_id.clone());
            current = next_id;
        }

        if chain.len() < 2 {
            continue;
        }
        let (speedup, target) = if classes.contains(&1) && classes.contains(&2) {
            (3.0, HardwareAffinity::Gpu)
        } else if classes.contains(&2) {
            (1.5, HardwareAffinity::Gpu)
        } else {
            (1.3, HardwareAffinity::Cpu)
        };
        patterns.push(
            FusionPattern::new(FusionPatternKind::PolyglotPipeline, chain, speedup)
                .with_target(target),
        );
    }

    patterns
}

fn launch_dims(vertex: &Vertex) -> Parallelism {
    vertex.metadata.parallelism.clone().unwrap_or_default()
}

fn dims_compatible(a: &Parallelism, b: &Parallelism) -> bool {
    let unit = [1, 1, 1];
    let grids = a.grid_dim == b.grid_dim || a.grid_dim == unit || b.grid_dim == unit;
    let blocks = a.block_dim == b.block_dim || a.block_dim == unit || b.block_dim == unit;
    grids && blocks
}

/// Runs of kernel launches, in topological order, with one hardware
/// affinity and compatible launch dimensions (equal, or one side unit).
fn detect_kernel_fusion(graph: &HyperGraph) -> Vec<FusionPattern> {
    let mut patterns = Vec::new();
    let mut group: Vec<VertexId> = Vec::new();

    let mut flush = |group: &mut Vec<VertexId>, affinity: HardwareAffinity| {
        if group.len() >= 2 {
            patterns.push(
                FusionPattern::new(
                    FusionPatternKind::KernelFusion,
                    std::mem::take(group),
                    2.0,
                )
                .with_target(affinity),
            );
        } else {
            group.clear();
        }
    };

    let mut group_affinity = HardwareAffinity::Any;
    for id in graph.topological_order() {
        let Some(vertex) = graph.vertex(&id) else {
            continue;
        };
        if vertex.kind != VertexKind::KernelLaunch {
            continue;
        }
        match group.last().and_then(|last| graph.vertex(last)) {
            Some(last)
                if vertex.metadata.affinity == last.metadata.affinity
                    && dims_compatible(&launch_dims(vertex), &launch_dims(last)) =>
            {
                group.push(id);
            }
            Some(_) => {
                flush(&mut group, group_affinity);
                group_affinity = vertex.metadata.affinity;
                group.push(id);
            }
            None => {
                group_affinity = vertex.metadata.affinity;
                group.push(id);
            }
        }
    }
    flush(&mut group, group_affinity);

    patterns
}

/// Three or more memcpy-like Apply vertices chained through data flow;
/// only the first and last transfers are necessary.
fn detect_transfer_elimination(graph: &HyperGraph) -> Vec<FusionPattern> {
    let mut patterns = Vec::new();
    let mut visited: BTreeSet<VertexId> = BTreeSet::new();

    for id in graph.topological_order() {
        if visited.contains(&id) {
            continue;
        }
        let Some(vertex) = graph.vertex(&id) else {
            continue;
        };
        if !vertex.is_memcpy_like() {
            continue;
        }

        let mut chain = vec![id.clone()];
        let mut current = id;
        while let Some(next) = graph
            .successors(&current)
            .into_iter()
            .find(|s| s.is_memcpy_like() && !visited.contains(&s.id))
        {
            visited.insert(next.id.clone());
            chain.push(next.id.clone());
            current = next.id.clone();
        }

        if chain.len() >= 3 {
            patterns.push(FusionPattern::new(
                FusionPatternKind::TransferElimination,
                chain,
                1.3,
            ));
        }
    }

    patterns
}

/// Four or more loads of one region coalesce into a single wide access.
fn detect_memory_coalescing(graph: &HyperGraph) -> Vec<FusionPattern> {
    let mut loads_by_region: BTreeMap<String, Vec<VertexId>> = BTreeMap::new();
    for vertex in graph.vertices() {
        if vertex.kind == VertexKind::Load {
            loads_by_region
                .entry(vertex.region_name().unwrap_or("heap").to_owned())
                .or_default()
                .push(vertex.id.clone());
        }
    }

    loads_by_region
        .into_values()
        .filter(|loads| loads.len() >= 4)
        .map(|loads| FusionPattern::new(FusionPatternKind::MemoryCoalescing, loads, 1.4))
        .collect()
}

/// SQL operator chains: at least three FILTER / PROJECT / AGGREGATE /
/// TABLE_SCAN vertices.
fn detect_dataflow_fusion(graph: &HyperGraph) -> Vec<FusionPattern> {
    let operators: Vec<VertexId> = graph
        .topological_order()
        .into_iter()
        .filter(|id| {
            graph.vertex(id).is_some_and(|v| {
                matches!(
                    v.attributes.get("operator").and_then(Value::as_str),
                    Some("FILTER" | "PROJECT" | "AGGREGATE" | "TABLE_SCAN")
                )
            })
        })
        .collect();

    if operators.len() >= 3 {
        vec![FusionPattern::new(
            FusionPatternKind::DataflowFusion,
            operators,
            1.5,
        )]
    } else {
        Vec::new()
    }
}

/// Adjacent loops with identical bounds, recognized through a declared
/// `loop_bound` attribute.
fn detect_loop_fusion(graph: &HyperGraph) -> Vec<FusionPattern> {
    let mut by_bound: BTreeMap<String, Vec<VertexId>> = BTreeMap::new();
    for id in graph.topological_order() {
        let Some(vertex) = graph.vertex(&id) else {
            continue;
        };
        if let Some(bound) = vertex.attributes.get("loop_bound") {
            by_bound.entry(bound.to_string()).or_default().push(id);
        }
    }

    by_bound
        .into_values()
        .filter(|loops| loops.len() >= 2)
        .map(|loops| FusionPattern::new(FusionPatternKind::LoopFusion, loops, 1.25))
        .collect()
}

/// Data-flow sequences of pipeline-stage vertices.
fn detect_pipeline_fusion(graph: &HyperGraph) -> Vec<FusionPattern> {
    let mut patterns = Vec::new();
    let mut visited: BTreeSet<VertexId> = BTreeSet::new();

    for id in graph.topological_order() {
        if visited.contains(&id) {
            continue;
        }
        let is_stage = |v: &Vertex| v.metadata.effects.contains(&Effect::PipelineStage);
        let Some(vertex) = graph.vertex(&id) else {
            continue;
        };
        if !is_stage(vertex) {
            continue;
        }

        let mut chain = vec![id.clone()];
        let mut current = id;
        while let Some(next) = graph
            .successors(&current)
            .into_iter()
            .find(|s| is_stage(s) && !visited.contains(&s.id))
        {
            visited.insert(next.id.clone());
            chain.push(next.id.clone());
            current = next.id.clone();
        }

        if chain.len() >= 2 {
            patterns.push(FusionPattern::new(
                FusionPatternKind::PipelineFusion,
                chain,
                1.3,
            ));
        }
    }

    patterns
}
