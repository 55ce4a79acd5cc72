use crate::schedule::{CausalScheduler, Device, ScheduleResult, TaskStatus};
use crate::sir::HyperGraph;
use crate::utils::data_structures::HashMap;
use crate::utils::{DeviceId, VertexId};

/// Causal scheduling plus online profiling: observed execution times feed
/// back into subsequent schedules of the same graph, migrating tasks to a
/// device that profiles at least `migration_threshold` faster.
pub struct AdaptiveScheduler {
    causal: CausalScheduler,
    profile: HashMap<(VertexId, DeviceId), Vec<f64>>,
    pub migration_threshold: f64,
    pub profiling_enabled: bool,
}

impl AdaptiveScheduler {
    pub fn new(devices: Vec<Device>) -> Self {
        Self {
            causal: CausalScheduler::new(devices),
            profile: HashMap::default(),
            migration_threshold: 0.2,
            profiling_enabled: true,
        }
    }

    pub fn add_device(&mut self, device: Device) {
        self.causal.add_device(device);
    }

    pub fn remove_device(&mut self, id: &DeviceId) {
        self.causal.remove_device(id);
    }

    pub fn devices(&self) -> &[Device] {
        self.causal.devices()
    }

    /// Records one observed execution for a (task, device) pair.
    pub fn record_execution(&mut self, task: VertexId, device: DeviceId, observed_seconds: f64) {
        self.profile
            .entry((task, device))
            .or_default()
            .push(observed_seconds);
    }

    fn average(&self, task: &VertexId, device: &DeviceId) -> Option<f64> {
        let samples = self.profile.get(&(task.clone(), device.clone()))?;
        if samples.is_empty() {
            return None;
        }
        Some(samples.iter().sum::<f64>() / samples.len() as f64)
    }

    pub fn schedule(&self, graph: &HyperGraph) -> ScheduleResult {
        let mut result = self.causal.schedule(graph);
        if self.profiling_enabled && !self.profile.is_empty() {
            self.optimize_from_profile(&mut result);
        }
        result
    }

    /// Reassigns any task whose profile shows another eligible device at
    /// least `migration_threshold` faster than the current assignment.
    /// Candidate devices are scanned in id order, keeping the choice
    /// deterministic.
    fn optimize_from_profile(&self, result: &mut ScheduleResult) {
        let mut migrations = 0usize;

        for task in &mut result.tasks {
            let Some(current_device) = task.assigned_device.clone() else {
                continue;
            };
            let Some(current_avg) = self.average(&task.id, &current_device) else {
                continue;
            };

            let mut best: Option<(f64, DeviceId)> = None;
            for device in self.causal.devices() {
                if device.id == current_device || !device.can_execute(task) {
                    continue;
                }
                let Some(avg) = self.average(&task.id, &device.id) else {
                    continue;
                };
                let better = match &best {
                    None => true,
                    Some((best_avg, best_id)) => {
                        avg < *best_avg || (avg == *best_avg && device.id < *best_id)
                    }
                };
                if better {
                    best = Some((avg, device.id.clone()));
                }
            }

            if let Some((avg, device)) = best {
                let improvement = (current_avg - avg) / current_avg;
                if improvement >= self.migration_threshold {
                    tracing::info!(
                        task = %task.id,
                        from = %current_device,
                        to = %device,
                        improvement,
                        "migrating task"
                    );
                    task.assigned_device = Some(device);
                    task.status = TaskStatus::Migrated;
                    migrations += 1;
                }
            }
        }

        result.migrations = migrations;
    }

    /// The fastest eligible device for a task: profiled average where
    /// available, the static estimate otherwise.
    pub fn get_optimal_device(&self, task: &crate::schedule::Task) -> Option<&Device> {
        let mut best: Option<(f64, &Device)> = None;
        for device in self.causal.devices() {
            if !device.can_execute(task) {
                continue;
            }
            let time = self
                .average(&task.id, &device.id)
                .unwrap_or_else(|| device.estimated_time(task));
            let better = match &best {
                None => true,
                Some((best_time, best_device)) => {
                    time < *best_time || (time == *best_time && device.id < best_device.id)
                }
            };
            if better {
                best = Some((time, device));
            }
        }
        best.map(|(_, device)| device)
    }

    /// Capacity-proportional target utilization per device.
    pub fn balance_load(&self) -> std::collections::BTreeMap<DeviceId, f64> {
        let total: f64 = self.causal.devices().iter().map(|d| d.capacity).sum();
        self.causal
            .devices()
            .iter()
            .map(|d| {
                let share = if total > 0.0 { d.capacity / total } else { 0.0 };
                (d.id.clone(), share)
            })
            .collect()
    }

    /// Predicted tasks per second for a graph under the current schedule.
    pub fn predict_throughput(&self, graph: &HyperGraph) -> f64 {
        let result = self.schedule(graph);
        if result.makespan > 0.0 {
            result.tasks.len() as f64 / result.makespan
        } else {
            0.0
        }
    }
}
