use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::schedule::{Device, ScheduleResult, Task, TaskStatus};
use crate::utils::{DeviceId, VertexId};

/// Work-stealing dispatch: each device owns a FIFO queue, and an idle
/// device steals from the tail of the longest queue. Only tasks whose
/// affinity is compatible with the stealer are taken; the tail preserves
/// locality for the victim's own head-of-queue work.
pub struct WorkStealingScheduler {
    devices: Vec<Device>,
    queues: BTreeMap<DeviceId, VecDeque<Task>>,
    completed: BTreeSet<VertexId>,
}

impl WorkStealingScheduler {
    pub fn new(mut devices: Vec<Device>) -> Self {
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        let queues = devices
            .iter()
            .map(|d| (d.id.clone(), VecDeque::new()))
            .collect();
        Self {
            devices,
            queues,
            completed: BTreeSet::new(),
        }
    }

    pub fn queue_len(&self, device: &DeviceId) -> usize {
        self.queues.get(device).map(VecDeque::len).unwrap_or(0)
    }

    /// Enqueues a task on the eligible device with the shortest queue.
    pub fn add_task(&mut self, mut task: Task) {
        let mut best: Option<(usize, DeviceId)> = None;
        for device in &self.devices {
            if !device.can_execute(&task) {
                continue;
            }
            let len = self.queue_len(&device.id);
            let better = match &best {
                None => true,
                Some((best_len, best_id)) => {
                    len < *best_len || (len == *best_len && device.id < *best_id)
                }
            };
            if better {
                best = Some((len, device.id.clone()));
            }
        }
        if let Some((_, device)) = best {
            task.assigned_device = Some(device.clone());
            if let Some(queue) = self.queues.get_mut(&device) {
                queue.push_back(task);
            }
        } else {
            tracing::warn!(task = %task.id, "no eligible device for task");
        }
    }

    /// Steals a compatible task from the tail of the longest other queue.
    pub fn steal_work(&mut self, idle: &DeviceId) -> Option<Task> {
        let stealer = self.devices.iter().find(|d| &d.id == idle)?.clone();

        let mut victim: Option<(usize, DeviceId)> = None;
        for device in &self.devices {
            if &device.id == idle {
                continue;
            }
            let len = self.queue_len(&device.id);
            let better = match &victim {
                None => len > 1,
                Some((max_len, best_id)) => {
                    len > *max_len || (len == *max_len && device.id < *best_id)
                }
            };
            if better && len > 1 {
                victim = Some((len, device.id.clone()));
            }
        }

        let (_, victim_id) = victim?;
        let queue = self.queues.get_mut(&victim_id)?;
        for index in (0..queue.len()).rev() {
            if stealer.can_execute(&queue[index]) {
                let mut task = queue.remove(index)?;
                task.assigned_device = Some(idle.clone());
                tracing::debug!(task = %task.id, victim = %victim_id, thief = %idle, "stole task");
                return Some(task);
            }
        }
        None
    }

    /// Drains all queues, stealing for idle devices as it goes.
    pub fn run(&mut self) -> ScheduleResult {
        let mut device_times: BTreeMap<DeviceId, f64> = self
            .devices
            .iter()
            .map(|d| (d.id.clone(), 0.0))
            .collect();
        let mut finished: Vec<Task> = Vec::new();

        while self.queues.values().any(|q| !q.is_empty()) {
            let device_ids: Vec<DeviceId> =
                self.devices.iter().map(|d| d.id.clone()).collect();
            for device_id in device_ids {
                if self.queue_len(&device_id) == 0
                    && let Some(stolen) = self.steal_work(&device_id)
                    && let Some(queue) = self.queues.get_mut(&device_id)
                {
                    queue.push_back(stolen);
                }

                let Some(mut task) = self
                    .queues
                    .get_mut(&device_id)
                    .and_then(VecDeque::pop_front)
                else {
                    continue;
                };
                let Some(device) = self.devices.iter().find(|d| d.id == device_id) else {
                    continue;
                };
                let start = device_times.get(&device_id).copied().unwrap_or(0.0);
                task.start_time = start;
                task.end_time = start + device.estimated_time(&task);
                task.status = TaskStatus::Completed;
                device_times.insert(device_id.clone(), task.end_time);
                self.completed.insert(task.id.clone());
                finished.push(task);
            }
        }

        let makespan = device_times.values().copied().fold(0.0f64, f64::max);
        let mut device_utilization = BTreeMap::new();
        for device in &self.devices {
            let busy: f64 = finished
                .iter()
                .filter(|t| t.assigned_device.as_ref() == Some(&device.id))
                .map(|t| t.end_time - t.start_time)
                .sum();
            device_utilization.insert(
                device.id.clone(),
                if makespan > 0.0 { busy / makespan } else { 0.0 },
            );
        }

        ScheduleResult {
            tasks: finished,
            makespan,
            device_utilization,
            migrations: 0,
        }
    }
}
