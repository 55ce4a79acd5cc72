use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};

use crate::schedule::{Device, ScheduleResult, Task, TaskStatus, extract_tasks};
use crate::sir::HyperGraph;
use crate::utils::{DeviceId, VertexId};

/// Ready-queue entry ordered by priority (highest first), then textual
/// task id (smallest first).
#[derive(Clone, Debug, PartialEq, Eq)]
struct ReadyEntry {
    priority: i64,
    id: VertexId,
}

impl Ord for ReadyEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.id.cmp(&self.id))
    }
}

impl PartialOrd for ReadyEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Causal dispatch: tasks become ready when every data-flow predecessor
/// has completed, and each ready task goes to the device that finishes it
/// earliest. All tie-breaks are deterministic; a task never starts before
/// its last predecessor ends.
pub struct CausalScheduler {
    devices: Vec<Device>,
}

impl Default for CausalScheduler {
    fn default() -> Self {
        Self::new(vec![Device::new(
            "cpu0",
            crate::schedule::DeviceKind::Cpu,
            1.0,
        )])
    }
}

impl CausalScheduler {
    pub fn new(mut devices: Vec<Device>) -> Self {
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        Self { devices }
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    pub fn add_device(&mut self, device: Device) {
        self.devices.push(device);
        self.devices.sort_by(|a, b| a.id.cmp(&b.id));
    }

    pub fn remove_device(&mut self, id: &DeviceId) {
        self.devices.retain(|d| &d.id != id);
    }

    pub fn schedule(&self, graph: &HyperGraph) -> ScheduleResult {
        tracing::debug!(graph = %graph.name, devices = self.devices.len(), "scheduling");
        let mut tasks = extract_tasks(graph);
        self.schedule_tasks(&mut tasks);

        let mut finish_times: BTreeMap<&DeviceId, f64> =
            self.devices.iter().map(|d| (&d.id, 0.0f64)).collect();
        for task in tasks.values() {
            if let Some(device) = &task.assigned_device
                && let Some(finish) = finish_times.get_mut(device)
            {
                *finish = finish.max(task.end_time);
            }
        }
        let makespan = finish_times.values().copied().fold(0.0f64, f64::max);

        let mut device_utilization = BTreeMap::new();
        for device in &self.devices {
            let busy: f64 = tasks
                .values()
                .filter(|t| t.assigned_device.as_ref() == Some(&device.id))
                .map(|t| t.end_time - t.start_time)
                .sum();
            let utilization = if makespan > 0.0 { busy / makespan } else { 0.0 };
            device_utilization.insert(device.id.clone(), utilization);
        }

        ScheduleResult {
            tasks: tasks.into_values().collect(),
            makespan,
            device_utilization,
            migrations: 0,
        }
    }

    fn schedule_tasks(&self, tasks: &mut BTreeMap<VertexId, Task>) {
        let mut completed: BTreeSet<VertexId> = BTreeSet::new();
        let mut device_finish: BTreeMap<DeviceId, f64> =
            self.devices.iter().map(|d| (d.id.clone(), 0.0)).collect();
        let mut ready: BinaryHeap<ReadyEntry> = BinaryHeap::new();

        for task in tasks.values_mut() {
            if task.dependencies.is_empty() {
                task.status = TaskStatus::Ready;
                ready.push(ReadyEntry {
                    priority: task.priority,
                    id: task.id.clone(),
                });
            }
        }

        while let Some(entry) = ready.pop() {
            let Some(task) = tasks.get(&entry.id) else {
                continue;
            };
            if task.status != TaskStatus::Ready {
                continue;
            }

            // A task may not start before its slowest predecessor ends.
            let ready_time = task
                .dependencies
                .iter()
                .filter_map(|dep| tasks.get(dep))
                .map(|dep| dep.end_time)
                .fold(0.0f64, f64::max);

            let mut best: Option<(f64, &Device)> = None;
            for device in &self.devices {
                if !device.can_execute(task) {
                    continue;
                }
                let start = device_finish.get(&device.id).copied().unwrap_or(0.0);
                let start = start.max(ready_time);
                let finish = start + device.estimated_time(task);
                let better = match &best {
                    None => true,
                    Some((best_finish, best_device)) => {
                        finish < *best_finish
                            || (finish == *best_finish && device.id < best_device.id)
                    }
                };
                if better {
                    best = Some((finish, device));
                }
            }

            let device_and_finish = best.map(|(finish, device)| (finish, device.id.clone()));
            let Some(task) = tasks.get_mut(&entry.id) else {
                continue;
            };
            let Some((finish, device)) = device_and_finish else {
                tracing::warn!(task = %task.id, "no eligible device");
                task.status = TaskStatus::Failed;
                continue;
            };

            let start = device_finish.get(&device).copied().unwrap_or(0.0).max(ready_time);
            task.assigned_device = Some(device.clone());
            task.start_time = start;
            task.end_time = finish;
            task.status = TaskStatus::Completed;
            device_finish.insert(device, finish);
            completed.insert(task.id.clone());

            let dependents = task.dependents.clone();
            for dependent in dependents {
                if let Some(next) = tasks.get_mut(&dependent)
                    && next.status == TaskStatus::Pending
                    && next.is_ready(&completed)
                {
                    next.status = TaskStatus::Ready;
                    ready.push(ReadyEntry {
                        priority: next.priority,
                        id: next.id.clone(),
                    });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::EffectSet;
    use crate::schedule::DeviceKind;
    use crate::sir::{HardwareAffinity, HyperEdge, Vertex};
    use crate::types::Ty;

    fn cpu_and_gpu() -> Vec<Device> {
        vec![
            Device::new("cpu0", DeviceKind::Cpu, 1.0),
            Device::new("gpu0", DeviceKind::Gpu, 10.0),
        ]
    }

    fn chain_graph(n: usize) -> HyperGraph {
        let mut g = HyperGraph::new("chain");
        let mut prev: Option<crate::utils::VertexId> = None;
        for i in 0..n {
            let v = g.add_vertex(Vertex::apply(
                format!("step{i}"),
                Ty::unit(),
                EffectSet::new(),
            ));
            if let Some(p) = prev {
                g.add_edge(HyperEdge::data_flow([p], [v.clone()]));
            }
            prev = Some(v);
        }
        g
    }

    #[test]
    fn schedule_respects_dependencies() {
        let g = chain_graph(4);
        let result = CausalScheduler::new(cpu_and_gpu()).schedule(&g);

        for task in &result.tasks {
            assert_eq!(task.status, TaskStatus::Completed);
            for dep in &task.dependencies {
                let dep_task = result.task(dep).unwrap();
                assert!(
                    dep_task.end_time <= task.start_time,
                    "dependency {dep} ends at {} but {} starts at {}",
                    dep_task.end_time,
                    task.id,
                    task.start_time
                );
            }
        }
    }

    #[test]
    fn cross_device_dependencies_still_wait() {
        let mut g = HyperGraph::new("cross");
        let k = g.add_vertex(Vertex::kernel_launch(
            "k",
            [4, 1, 1],
            [64, 1, 1],
            Ty::unit(),
            HardwareAffinity::Gpu,
        ));
        let cpu_only = g.add_vertex(
            Vertex::apply("post", Ty::unit(), EffectSet::new())
                .with_affinity(HardwareAffinity::Cpu),
        );
        g.add_edge(HyperEdge::data_flow([k.clone()], [cpu_only.clone()]));

        let result = CausalScheduler::new(cpu_and_gpu()).schedule(&g);
        let kernel = result.task(&k).unwrap();
        let post = result.task(&cpu_only).unwrap();
        assert_eq!(kernel.assigned_device.as_ref().unwrap().as_str(), "gpu0");
        assert_eq!(post.assigned_device.as_ref().unwrap().as_str(), "cpu0");
        assert!(kernel.end_time <= post.start_time);
    }

    #[test]
    fn schedule_is_deterministic() {
        let g = chain_graph(6);
        let scheduler = CausalScheduler::new(cpu_and_gpu());
        let first = scheduler.schedule(&g);
        let second = scheduler.schedule(&g);
        assert_eq!(first, second);
    }

    #[test]
    fn makespan_covers_every_device_finish() {
        let g = chain_graph(3);
        let result = CausalScheduler::new(cpu_and_gpu()).schedule(&g);
        for task in &result.tasks {
            assert!(task.end_time <= result.makespan);
        }
        for utilization in result.device_utilization.values() {
            assert!((0.0..=1.0).contains(utilization));
        }
    }

    #[test]
    fn unsatisfiable_affinity_fails_the_task() {
        let mut g = HyperGraph::new("nowhere");
        let v = g.add_vertex(
            Vertex::apply("fpga_only", Ty::unit(), EffectSet::new())
                .with_affinity(HardwareAffinity::Fpga),
        );
        let result = CausalScheduler::new(cpu_and_gpu()).schedule(&g);
        assert_eq!(result.task(&v).unwrap().status, TaskStatus::Failed);
    }
}
