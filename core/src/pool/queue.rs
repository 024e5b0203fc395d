//! Internal queues: named, FIFO, concurrency-limited gates between
//! "ready to submit" and `preparing`.

use std::collections::{HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use super::proxy::ProxyId;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InternalQueue {
    pub name: String,
    pub members: HashSet<String>,
    /// 0 means unlimited.
    pub limit: usize,
    waiting: VecDeque<ProxyId>,
    active: HashSet<ProxyId>,
}

impl InternalQueue {
    pub fn new(name: impl Into<String>, members: HashSet<String>, limit: usize) -> Self {
        Self { name: name.into(), members, limit, waiting: VecDeque::new(), active: HashSet::new() }
    }

    pub fn enqueue(&mut self, id: ProxyId) {
        if !self.waiting.contains(&id) && !self.active.contains(&id) {
            self.waiting.push_back(id);
        }
    }

    fn has_room(&self) -> bool {
        self.limit == 0 || self.active.len() < self.limit
    }

    /// Release the next waiting proxy, if there is room. The caller is
    /// responsible for transitioning it to `preparing` and calling
    /// `mark_active`.
    pub fn try_release(&mut self) -> Option<ProxyId> {
        if !self.has_room() {
            return None;
        }
        self.waiting.pop_front()
    }

    pub fn mark_active(&mut self, id: ProxyId) {
        self.active.insert(id);
    }

    pub fn mark_inactive(&mut self, id: &ProxyId) {
        self.active.remove(id);
    }

    pub fn remove_waiting(&mut self, id: &ProxyId) {
        self.waiting.retain(|w| w != id);
    }

    pub fn waiting_len(&self) -> usize {
        self.waiting.len()
    }

    pub fn active_len(&self) -> usize {
        self.active.len()
    }
}

/// The full set of queues a workflow declares, with routing from task name
/// to the first matching queue, falling back to `default`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueSet {
    queues: Vec<InternalQueue>,
    default_index: usize,
}

impl QueueSet {
    pub fn new(default_limit: usize) -> Self {
        Self { queues: vec![InternalQueue::new("default", HashSet::new(), default_limit)], default_index: 0 }
    }

    pub fn add_queue(&mut self, queue: InternalQueue) {
        self.queues.push(queue);
    }

    fn route_index(&self, task_name: &str) -> usize {
        self.queues
            .iter()
            .position(|q| q.name != "default" && q.members.contains(task_name))
            .unwrap_or(self.default_index)
    }

    pub fn enqueue(&mut self, task_name: &str, id: ProxyId) {
        let idx = self.route_index(task_name);
        self.queues[idx].enqueue(id);
    }

    /// Attempt to release one proxy per queue, in declaration order.
    pub fn try_release_all(&mut self) -> Vec<ProxyId> {
        let mut released = Vec::new();
        for queue in &mut self.queues {
            if let Some(id) = queue.try_release() {
                queue.mark_active(id.clone());
                released.push(id);
            }
        }
        released
    }

    pub fn mark_inactive(&mut self, task_name: &str, id: &ProxyId) {
        let idx = self.route_index(task_name);
        self.queues[idx].mark_inactive(id);
    }

    pub fn remove(&mut self, task_name: &str, id: &ProxyId) {
        let idx = self.route_index(task_name);
        self.queues[idx].remove_waiting(id);
        self.queues[idx].mark_inactive(id);
    }

    pub fn queues(&self) -> &[InternalQueue] {
        &self.queues
    }
}
