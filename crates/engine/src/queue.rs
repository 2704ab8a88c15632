// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Pending request queue.
//!
//! Holds admitted-but-not-yet-started task instances in FIFO order.
//! Admission policy (queue-full alerts, start-time checks) lives in the
//! scheduler; the queue is bounded storage with removal by id.

use cadence_core::{TaskInstance, TaskInstanceId};
use std::collections::VecDeque;

#[derive(Debug)]
pub struct RequestQueue {
    pending: VecDeque<TaskInstance>,
    capacity: u32,
}

impl RequestQueue {
    pub fn new(capacity: u32) -> Self {
        Self { pending: VecDeque::new(), capacity }
    }

    /// Applied on config reload. Requests already queued beyond a shrunken
    /// capacity stay queued; only new admissions are refused.
    pub fn set_capacity(&mut self, capacity: u32) {
        self.capacity = capacity;
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.pending.len() >= self.capacity as usize
    }

    /// Append to the tail. Returns the instance back when the queue is full.
    pub fn push(&mut self, instance: TaskInstance) -> Result<(), TaskInstance> {
        if self.is_full() {
            return Err(instance);
        }
        self.pending.push_back(instance);
        Ok(())
    }

    /// Queued ids in FIFO order. Snapshot, so the caller can remove while
    /// iterating.
    pub fn ids(&self) -> Vec<TaskInstanceId> {
        self.pending.iter().map(|i| i.id).collect()
    }

    pub fn get(&self, id: TaskInstanceId) -> Option<&TaskInstance> {
        self.pending.iter().find(|i| i.id == id)
    }

    pub fn remove(&mut self, id: TaskInstanceId) -> Option<TaskInstance> {
        let pos = self.pending.iter().position(|i| i.id == id)?;
        self.pending.remove(pos)
    }

    /// Remove every queued instance of `task_id` outside `keep_group`.
    ///
    /// This is the discard-aliases rule: a fresh request supersedes older
    /// ones still waiting, but never its own fan-out siblings.
    pub fn remove_aliases(
        &mut self,
        task_id: &str,
        keep_group: TaskInstanceId,
    ) -> Vec<TaskInstance> {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for instance in self.pending.drain(..) {
            if instance.task.id == task_id && instance.group_id != keep_group {
                removed.push(instance);
            } else {
                kept.push_back(instance);
            }
        }
        self.pending = kept;
        removed
    }

    /// Empty the queue, preserving order. Used at config activation to
    /// rebind queued requests against the new task definitions.
    pub fn drain(&mut self) -> Vec<TaskInstance> {
        self.pending.drain(..).collect()
    }
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
