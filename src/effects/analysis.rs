use std::collections::{BTreeMap, BTreeSet, VecDeque};

use petgraph::algo::tarjan_scc;
use petgraph::graph::DiGraph;

use crate::effects::lattice::Effect;
use crate::sir::HyperGraph;
use crate::utils::VertexId;

/// Result of race-condition analysis: the conflicting pairs, and the
/// parallel regions proven conflict-free.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RaceAnalysis {
    pub has_races: bool,
    /// (first, second, region) per conflicting pair.
    pub race_pairs: Vec<(VertexId, VertexId, String)>,
    pub safe_parallel_regions: Vec<BTreeSet<VertexId>>,
}

/// Partitions the effectful vertices under each parallel edge by region:
/// two writers to one region race; a writer and a reader race unless an
/// effect edge connects them.
pub fn analyze_races(graph: &HyperGraph) -> RaceAnalysis {
    let mut analysis = RaceAnalysis::default();

    let mut reads: BTreeMap<String, Vec<VertexId>> = BTreeMap::new();
    let mut writes: BTreeMap<String, Vec<VertexId>> = BTreeMap::new();
    for vertex in graph.vertices() {
        let region = vertex.region_name().unwrap_or("heap").to_owned();
        if vertex.metadata.effects.contains(&Effect::Read) {
            reads.entry(region.clone()).or_default().push(vertex.id.clone());
        }
        if vertex.metadata.effects.contains(&Effect::Write) {
            writes.entry(region).or_default().push(vertex.id.clone());
        }
    }

    let ordered = |a: &VertexId, b: &VertexId| {
        graph.effect_edges().any(|e| {
            (e.sources.contains(a) && e.targets.contains(b))
                || (e.sources.contains(b) && e.targets.contains(a))
        })
    };

    for edge in graph.parallel_edges() {
        let members: BTreeSet<VertexId> = edge.targets.iter().cloned().collect();
        let mut region_races = 0usize;

        for (region, writers) in &writes {
            let region_writes: Vec<_> = writers.iter().filter(|w| members.contains(w)).collect();
            let region_reads: Vec<_> = reads
                .get(region)
                .map(|rs| rs.iter().filter(|r| members.contains(r)).collect())
                .unwrap_or_default();

            for (i, w1) in region_writes.iter().enumerate() {
                for w2 in &region_writes[i + 1..] {
                    analysis
                        .race_pairs
                        .push(((*w1).clone(), (*w2).clone(), region.clone()));
                    region_races += 1;
                }
            }

            for w in &region_writes {
                for r in &region_reads {
                    if w != r && !ordered(w, r) {
                        analysis
                            .race_pairs
                            .push(((*w).clone(), (*r).clone(), region.clone()));
                        region_races += 1;
                    }
                }
            }
        }

        if region_races == 0 {
            analysis.safe_parallel_regions.push(members);
        }
    }

    analysis.has_races = !analysis.race_pairs.is_empty();
    analysis
}

/// Result of deadlock analysis over the synchronization-reachability graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DeadlockAnalysis {
    pub has_deadlock: bool,
    pub cycles: Vec<Vec<VertexId>>,
}

/// The synchronization-reachability relation: an entry `a -> b` means sync
/// vertex `b` is reachable from sync vertex `a` through data-flow
/// successors, i.e. `a` is treated as held while `b` is acquired.
pub fn sync_reachability(graph: &HyperGraph) -> BTreeMap<VertexId, Vec<VertexId>> {
    let sync_vertices: BTreeSet<VertexId> = graph
        .vertices()
        .filter(|v| v.metadata.effects.iter().any(|e| e.is_sync()))
        .map(|v| v.id.clone())
        .collect();

    let mut reachability: BTreeMap<VertexId, Vec<VertexId>> = BTreeMap::new();
    for start in &sync_vertices {
        let mut reached = Vec::new();
        let mut visited: BTreeSet<VertexId> = BTreeSet::new();
        let mut queue: VecDeque<VertexId> = graph
            .successors(start)
            .into_iter()
            .map(|v| v.id.clone())
            .collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if sync_vertices.contains(&current) && &current != start {
                reached.push(current.clone());
            }
            queue.extend(graph.successors(&current).into_iter().map(|v| v.id.clone()));
        }

        reached.sort();
        reached.dedup();
        reachability.insert(start.clone(), reached);
    }
    reachability
}

/// Detects cycles among synchronization vertices (ThreadJoin, ChannelRecv,
/// Barrier, AtomicRmw). A cycle in the reachability relation is a set of
/// sync operations each waiting on the next.
pub fn analyze_deadlocks(graph: &HyperGraph) -> DeadlockAnalysis {
    let reachability = sync_reachability(graph);

    let mut petgraph: DiGraph<VertexId, ()> = DiGraph::new();
    let mut indices = BTreeMap::new();
    for node in reachability.keys() {
        indices.insert(node.clone(), petgraph.add_node(node.clone()));
    }
    for (from, reached) in &reachability {
        for to in reached {
            if let (Some(&a), Some(&b)) = (indices.get(from), indices.get(to)) {
                petgraph.add_edge(a, b, ());
            }
        }
    }

    let mut analysis = DeadlockAnalysis::default();
    for component in tarjan_scc(&petgraph) {
        let is_cycle = component.len() > 1
            || component
                .first()
                .is_some_and(|&n| petgraph.contains_edge(n, n));
        if is_cycle {
            let mut cycle: Vec<VertexId> = component
                .into_iter()
                .map(|n| petgraph[n].clone())
                .collect();
            cycle.sort();
            analysis.cycles.push(cycle);
        }
    }
    analysis.cycles.sort();
    analysis.has_deadlock = !analysis.cycles.is_empty();
    analysis
}
