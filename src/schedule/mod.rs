//! The adaptive scheduler: task extraction from the hypergraph,
//! topological dispatch across heterogeneous devices, online profiling and
//! migration, and a work-stealing variant.
//!
//! The scheduler describes multi-threaded execution for the runtime; it
//! launches no threads itself.

pub mod adaptive;
pub mod causal;
pub mod stealing;

pub use adaptive::AdaptiveScheduler;
pub use causal::CausalScheduler;
pub use stealing::WorkStealingScheduler;

use std::collections::{BTreeMap, BTreeSet};

use crate::sir::{HardwareAffinity, HyperGraph, Vertex, VertexKind};
use crate::utils::{DeviceId, VertexId};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Ready,
    Running,
    Completed,
    Failed,
    Migrated,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DeviceKind {
    Cpu,
    Gpu,
    Fpga,
    Wasm,
    Jvm,
    Tpu,
}

/// An execution device visible to the scheduler.
#[derive(Clone, Debug, PartialEq)]
pub struct Device {
    pub id: DeviceId,
    pub kind: DeviceKind,
    pub name: String,
    /// Relative compute capacity, 1.0 being a baseline CPU.
    pub capacity: f64,
    pub utilization: f64,
    pub memory_available: u64,
    pub memory_total: u64,
    pub features: BTreeSet<String>,
}

impl Device {
    pub fn new(id: impl Into<DeviceId>, kind: DeviceKind, capacity: f64) -> Self {
        Self {
            id: id.into(),
            kind,
            name: String::new(),
            capacity,
            utilization: 0.0,
            memory_available: 16 * 1024 * 1024 * 1024,
            memory_total: 16 * 1024 * 1024 * 1024,
            features: BTreeSet::new(),
        }
    }

    pub fn with_memory(mut self, bytes: u64) -> Self {
        self.memory_available = bytes;
        self.memory_total = bytes;
        self
    }

    pub fn with_features<I: IntoIterator<Item = String>>(mut self, features: I) -> Self {
        self.features = features.into_iter().collect();
        self
    }

    /// Eligibility: the task's affinity maps to this device kind (ANY
    /// matches all), its memory fits, and its required feature tags are a
    /// subset of this device's features.
    pub fn can_execute(&self, task: &Task) -> bool {
        let required_kind = match task.affinity {
            HardwareAffinity::Any => None,
            HardwareAffinity::Cpu => Some(DeviceKind::Cpu),
            HardwareAffinity::Gpu
            | HardwareAffinity::GpuStream0
            | HardwareAffinity::GpuStream1 => Some(DeviceKind::Gpu),
            HardwareAffinity::Fpga | HardwareAffinity::FpgaLut => Some(DeviceKind::Fpga),
            HardwareAffinity::Wasm => Some(DeviceKind::Wasm),
            HardwareAffinity::Jvm => Some(DeviceKind::Jvm),
            HardwareAffinity::Tpu => Some(DeviceKind::Tpu),
        };
        if let Some(kind) = required_kind
            && kind != self.kind
        {
            return false;
        }
        if task.memory_required > self.memory_available {
            return false;
        }
        task.required_features.is_subset(&self.features)
    }

    /// Estimated wall time for a task on this device, from a 1 GHz
    /// baseline.
    pub fn estimated_time(&self, task: &Task) -> f64 {
        let base = task.estimated_cycles as f64 / 1e9;
        match self.kind {
            DeviceKind::Gpu if task.parallelism > 1 => {
                base / (task.parallelism.min(1024) as f64)
            }
            DeviceKind::Fpga => base * 0.8,
            DeviceKind::Tpu => base / (task.parallelism.min(128) as f64).max(1.0),
            _ => base / self.capacity,
        }
    }
}

/// A schedulable unit derived from a vertex.
#[derive(Clone, Debug, PartialEq)]
pub struct Task {
    pub id: VertexId,
    pub status: TaskStatus,
    pub affinity: HardwareAffinity,
    pub dependencies: BTreeSet<VertexId>,
    pub dependents: BTreeSet<VertexId>,
    pub estimated_cycles: u64,
    pub memory_required: u64,
    pub parallelism: u64,
    pub priority: i64,
    pub required_features: BTreeSet<String>,
    pub assigned_device: Option<DeviceId>,
    pub start_time: f64,
    pub end_time: f64,
}

impl Task {
    pub fn from_vertex(vertex: &Vertex, graph: &HyperGraph) -> Task {
        let dependencies: BTreeSet<VertexId> = graph
            .predecessors(&vertex.id)
            .into_iter()
            .map(|p| p.id.clone())
            .collect();

        let estimated_cycles = match vertex.kind {
            VertexKind::KernelLaunch => {
                let launch = vertex.metadata.parallelism.clone().unwrap_or_default();
                launch.launch_size().max(1) * 100
            }
            VertexKind::Load | VertexKind::Store => 100,
            VertexKind::Apply => 1000,
            _ => 1000,
        };

        let parallelism = vertex
            .metadata
            .parallelism
            .as_ref()
            .map(|p| p.degree().max(1))
            .unwrap_or(1);

        let required_features = vertex
            .attributes
            .get("features")
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        Task {
            id: vertex.id.clone(),
            status: TaskStatus::Pending,
            affinity: vertex.metadata.affinity,
            dependencies,
            dependents: BTreeSet::new(),
            estimated_cycles,
            memory_required: vertex.alloc_size().unwrap_or(0),
            parallelism,
            priority: 0,
            required_features,
            assigned_device: None,
            start_time: 0.0,
            end_time: 0.0,
        }
    }

    pub fn is_ready(&self, completed: &BTreeSet<VertexId>) -> bool {
        self.dependencies.is_subset(completed)
    }
}

/// Extracts one task per vertex and wires the dependent sets.
pub fn extract_tasks(graph: &HyperGraph) -> BTreeMap<VertexId, Task> {
    let mut tasks: BTreeMap<VertexId, Task> = graph
        .vertices()
        .map(|v| (v.id.clone(), Task::from_vertex(v, graph)))
        .collect();

    let edges: Vec<(VertexId, VertexId)> = tasks
        .values()
        .flat_map(|t| {
            t.dependencies
                .iter()
                .map(|dep| (dep.clone(), t.id.clone()))
                .collect::<Vec<_>>()
        })
        .collect();
    for (dep, dependent) in edges {
        if let Some(task) = tasks.get_mut(&dep) {
            task.dependents.insert(dependent);
        }
    }
    tasks
}

/// The outcome of scheduling one graph.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ScheduleResult {
    pub tasks: Vec<Task>,
    pub makespan: f64,
    pub device_utilization: BTreeMap<DeviceId, f64>,
    pub migrations: usize,
}

impl ScheduleResult {
    pub fn task(&self, id: &VertexId) -> Option<&Task> {
        self.tasks.iter().find(|t| &t.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectSet;
    use crate::sir::HyperEdge;
    use crate::types::Ty;

    #[test]
    fn kernel_cycles_scale_with_launch_size() {
        let mut g = HyperGraph::new("k");
        let id = g.add_vertex(Vertex::kernel_launch(
            "k",
            [16, 16, 1],
            [16, 16, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        ));
        let task = Task::from_vertex(g.vertex(&id).unwrap(), &g);
        assert_eq!(task.estimated_cycles, 16 * 16 * 16 * 16 * 100);
        assert_eq!(task.parallelism, 256);
    }

    #[test]
    fn memory_ops_are_cheap_and_applies_generic() {
        let mut g = HyperGraph::new("ops");
        let l = g.add_vertex(Vertex::load(Ty::i64(), "heap"));
        let a = g.add_vertex(Vertex::apply("f", Ty::unit(), EffectSet::new()));
        assert_eq!(Task::from_vertex(g.vertex(&l).unwrap(), &g).estimated_cycles, 100);
        assert_eq!(
            Task::from_vertex(g.vertex(&a).unwrap(), &g).estimated_cycles,
            1000
        );
    }

    #[test]
    fn dependents_mirror_dependencies() {
        let mut g = HyperGraph::new("deps");
        let a = g.add_vertex(Vertex::apply("a", Ty::unit(), EffectSet::new()));
        let b = g.add_vertex(Vertex::apply("b", Ty::unit(), EffectSet::new()));
        g.add_edge(HyperEdge::data_flow([a.clone()], [b.clone()]));

        let tasks = extract_tasks(&g);
        assert!(tasks[&b].dependencies.contains(&a));
        assert!(tasks[&a].dependents.contains(&b));
    }

    #[test]
    fn affinity_gates_eligibility() {
        let mut g = HyperGraph::new("k");
        let id = g.add_vertex(Vertex::kernel_launch(
            "k",
            [1, 1, 1],
            [32, 1, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        ));
        let task = Task::from_vertex(g.vertex(&id).unwrap(), &g);

        let cpu = Device::new("cpu0", DeviceKind::Cpu, 1.0);
        let gpu = Device::new("gpu0", DeviceKind::Gpu, 10.0);
        assert!(!cpu.can_execute(&task));
        assert!(gpu.can_execute(&task));
    }

    #[test]
    fn feature_tags_must_be_covered() {
        let mut g = HyperGraph::new("warp");
        let mut v = Vertex::kernel_launch(
            "k",
            [1, 1, 1],
            [32, 1, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        );
        v.attributes
            .insert("features".to_owned(), serde_json::json!(["warp_sync"]));
        let id = g.add_vertex(v);
        let task = Task::from_vertex(g.vertex(&id).unwrap(), &g);

        let plain_gpu = Device::new("gpu0", DeviceKind::Gpu, 10.0);
        let cuda_gpu = Device::new("gpu1", DeviceKind::Gpu, 10.0)
            .with_features(["cuda".to_owned(), "warp_sync".to_owned()]);
        assert!(!plain_gpu.can_execute(&task));
        assert!(cuda_gpu.can_execute(&task));
    }

    #[test]
    fn device_time_estimates() {
        let mut g = HyperGraph::new("k");
        let id = g.add_vertex(Vertex::kernel_launch(
            "k",
            [2048, 1, 1],
            [1, 1, 1],
            Ty::unit(),
            HardwareAffinity::Any,
        ));
        let task = Task::from_vertex(g.vertex(&id).unwrap(), &g);
        let base = task.estimated_cycles as f64 / 1e9;

        let gpu = Device::new("gpu0", DeviceKind::Gpu, 10.0);
        // Parallelism saturates at 1024 lanes.
        assert!((gpu.estimated_time(&task) - base / 1024.0).abs() < 1e-12);

        let fpga = Device::new("fpga0", DeviceKind::Fpga, 1.0);
        assert!((fpga.estimated_time(&task) - base * 0.8).abs() < 1e-12);

        let cpu = Device::new("cpu0", DeviceKind::Cpu, 2.0);
        assert!((cpu.estimated_time(&task) - base / 2.0).abs() < 1e-12);
    }
}
