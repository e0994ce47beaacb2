//! # Ready Queue
//!
//! Binary min-heap of READY task ids ordered by the urgency key
//! `(time_left, id)`. Keys are read from the task table on every
//! comparison, so callers pass the table in; the queue itself only stores
//! ids.
//!
//! The idle task is never queued: an empty queue means "run idle".

use heapless::Vec;

use crate::config::{MAX_TASKS, TID_IDLE};
use crate::task::{TaskControlBlock, TaskId};

pub struct ReadyQueue {
    heap: Vec<TaskId, MAX_TASKS>,
}

impl ReadyQueue {
    pub const fn new() -> Self {
        Self { heap: Vec::new() }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn contains(&self, id: TaskId) -> bool {
        self.heap.contains(&id)
    }

    /// Most urgent queued task, without removing it.
    pub fn peek(&self) -> Option<TaskId> {
        self.heap.first().copied()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }

    /// Queue `id`.
    ///
    /// # Panics
    /// When the queue is full. The queue holds every live task at once, so
    /// overflow means the task table and the queue have gone out of sync.
    pub fn insert(&mut self, id: TaskId, tasks: &[TaskControlBlock]) {
        if self.heap.push(id).is_err() {
            panic!("ready queue overflow inserting task {}", id);
        }
        let last = self.heap.len() - 1;
        self.sift_up(last, tasks);
    }

    /// Remove and return the most urgent task, or the idle task when the
    /// queue is empty.
    pub fn extract_min(&mut self, tasks: &[TaskControlBlock]) -> TaskId {
        if self.heap.is_empty() {
            return TID_IDLE;
        }
        let top = self.heap.swap_remove(0);
        self.sift_down(0, tasks);
        top
    }

    /// Take `id` out of the queue wherever it sits. Returns `false` if it was
    /// not queued.
    pub fn remove(&mut self, id: TaskId, tasks: &[TaskControlBlock]) -> bool {
        let Some(pos) = self.heap.iter().position(|&queued| queued == id) else {
            return false;
        };
        self.heap.swap_remove(pos);
        if pos < self.heap.len() {
            let pos = self.sift_up(pos, tasks);
            self.sift_down(pos, tasks);
        }
        true
    }

    /// Restore heap order around `id` after its key changed in either
    /// direction. Returns `false` if `id` is not queued.
    pub fn reheapify(&mut self, id: TaskId, tasks: &[TaskControlBlock]) -> bool {
        let Some(pos) = self.heap.iter().position(|&queued| queued == id) else {
            return false;
        };
        let pos = self.sift_up(pos, tasks);
        self.sift_down(pos, tasks);
        true
    }

    /// Re-establish heap order over the whole queue. Needed after keys of
    /// many queued tasks changed at once (tick accounting).
    pub fn rebuild(&mut self, tasks: &[TaskControlBlock]) {
        for pos in (0..self.heap.len() / 2).rev() {
            self.sift_down(pos, tasks);
        }
    }

    /// Queued ids in heap order.
    pub fn iter(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.heap.iter().copied()
    }

    #[inline]
    fn before(&self, a: usize, b: usize, tasks: &[TaskControlBlock]) -> bool {
        tasks[self.heap[a]].key() < tasks[self.heap[b]].key()
    }

    fn sift_up(&mut self, mut pos: usize, tasks: &[TaskControlBlock]) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.before(pos, parent, tasks) {
                break;
            }
            self.heap.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize, tasks: &[TaskControlBlock]) {
        let len = self.heap.len();
        loop {
            let left = 2 * pos + 1;
            let right = left + 1;
            let mut best = pos;
            if left < len && self.before(left, best, tasks) {
                best = left;
            }
            if right < len && self.before(right, best, tasks) {
                best = right;
            }
            if best == pos {
                break;
            }
            self.heap.swap(pos, best);
            pos = best;
        }
    }
}

impl Default for ReadyQueue {
    fn default() -> Self {
        Self::new()
    }
}
