//! The task pool: the live proxy set plus runahead admission, internal
//! queue multiplexing, stall detection, and reference-counted eviction.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cycle::{CyclePoint, Duration8601, Interval};

use super::proxy::{ProxyId, TaskProxy, TaskState};
use super::queue::QueueSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RunaheadLimit {
    /// A count of distinct active cycle points (default 3).
    Count(u32),
    Interval(Interval),
}

impl Default for RunaheadLimit {
    fn default() -> Self {
        RunaheadLimit::Count(3)
    }
}

fn duration_seconds(d: &Duration8601) -> i64 {
    d.years * 365 * 86400 + d.months * 30 * 86400 + d.flat_days() * 86400 + d.flat_seconds()
}

fn interval_magnitude(iv: &Interval) -> i64 {
    match iv {
        Interval::Integer(n) => n.abs(),
        Interval::Duration(d) => duration_seconds(d).abs(),
    }
}

pub struct TaskPool {
    proxies: HashMap<ProxyId, TaskProxy>,
    ref_counts: HashMap<ProxyId, u32>,
    queues: QueueSet,
    runahead_limit: RunaheadLimit,
}

impl TaskPool {
    pub fn new(runahead_limit: RunaheadLimit, default_queue_limit: usize) -> Self {
        Self {
            proxies: HashMap::new(),
            ref_counts: HashMap::new(),
            queues: QueueSet::new(default_queue_limit),
            runahead_limit,
        }
    }

    pub fn queues_mut(&mut self) -> &mut QueueSet {
        &mut self.queues
    }

    pub fn queues(&self) -> &QueueSet {
        &self.queues
    }

    pub fn get(&self, id: &ProxyId) -> Option<&TaskProxy> {
        self.proxies.get(id)
    }

    pub fn get_mut(&mut self, id: &ProxyId) -> Option<&mut TaskProxy> {
        self.proxies.get_mut(id)
    }

    pub fn contains(&self, id: &ProxyId) -> bool {
        self.proxies.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &TaskProxy> {
        self.proxies.values()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn earliest_active_point(&self) -> Option<CyclePoint> {
        self.proxies
            .values()
            .filter(|p| p.state.counts_for_runahead())
            .map(|p| p.id.point)
            .reduce(|a, b| if b < a { b } else { a })
    }

    /// Whether a candidate proxy at `point` may be admitted to the pool
    /// under the configured runahead limit.
    pub fn can_admit(&self, point: &CyclePoint) -> bool {
        match &self.runahead_limit {
            RunaheadLimit::Interval(limit) => match self.earliest_active_point() {
                None => true,
                Some(earliest) => match point.diff(&earliest) {
                    Ok(diff) => interval_magnitude(&diff) <= interval_magnitude(limit),
                    Err(_) => true,
                },
            },
            RunaheadLimit::Count(n) => {
                let mut active: Vec<CyclePoint> =
                    self.proxies.values().filter(|p| p.state.counts_for_runahead()).map(|p| p.id.point).collect();
                active.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                active.dedup();
                if !active.contains(point) {
                    active.push(*point);
                    active.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                }
                match active.iter().position(|p| p == point) {
                    // idx is how many active points already sort strictly
                    // before this candidate; the earliest point (idx 0) must
                    // always be admissible even when n == 0, so only points
                    // past the first are subject to the count check.
                    Some(0) => true,
                    Some(idx) => (idx as u32) < *n,
                    None => true,
                }
            }
        }
    }

    /// Admit `proxy` if runahead allows it. Returns `false` (and does not
    /// insert) if admission is refused.
    pub fn admit(&mut self, proxy: TaskProxy) -> bool {
        if !self.can_admit(&proxy.id.point) {
            return false;
        }
        let id = proxy.id.clone();
        self.proxies.insert(id.clone(), proxy);
        self.ref_counts.entry(id).or_insert(0);
        true
    }

    /// Insert `proxy` unconditionally, bypassing the runahead gate. Runahead
    /// only governs admission of newly spawned proxies; a proxy rehydrated
    /// from the run database on restart was already admitted in a prior run
    /// and must not be dropped because the limit now reads differently.
    pub fn restore(&mut self, proxy: TaskProxy) {
        let id = proxy.id.clone();
        self.proxies.insert(id.clone(), proxy);
        self.ref_counts.entry(id).or_insert(0);
    }

    pub fn set_ref_count(&mut self, id: &ProxyId, count: u32) {
        self.ref_counts.insert(id.clone(), count);
    }

    /// A child proxy has advanced past needing this producer's output;
    /// decrement its reference count. Returns the new count.
    pub fn decrement_ref(&mut self, id: &ProxyId) -> u32 {
        let entry = self.ref_counts.entry(id.clone()).or_insert(0);
        *entry = entry.saturating_sub(1);
        *entry
    }

    fn is_evictable(&self, id: &ProxyId) -> bool {
        match self.proxies.get(id) {
            Some(p) => {
                p.state.is_terminal()
                    && !p.is_held
                    && !p.is_incomplete()
                    && self.ref_counts.get(id).copied().unwrap_or(0) == 0
            }
            None => false,
        }
    }

    /// Evict every proxy eligible for housekeeping, returning their ids.
    pub fn housekeep(&mut self) -> Vec<ProxyId> {
        let evictable: Vec<ProxyId> = self.proxies.keys().filter(|id| self.is_evictable(id)).cloned().collect();
        for id in &evictable {
            self.proxies.remove(id);
            self.ref_counts.remove(id);
        }
        evictable
    }

    pub fn remove(&mut self, id: &ProxyId) -> Option<TaskProxy> {
        self.ref_counts.remove(id);
        self.proxies.remove(id)
    }

    /// Whether the pool has anything that could still make progress without
    /// external intervention: a ready, preparing, submitted, or running
    /// proxy.
    pub fn has_actionable_work(&self) -> bool {
        self.proxies.values().any(|p| p.state.is_active() || p.is_ready_to_submit())
    }

    pub fn is_stalled(&self) -> bool {
        !self.has_actionable_work()
    }

    pub fn incomplete_proxies(&self) -> Vec<&ProxyId> {
        self.proxies.values().filter(|p| p.is_incomplete()).map(|p| &p.id).collect()
    }
}
