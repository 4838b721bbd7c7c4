//! Cooperative deferred-task scheduler
//!
//! A single-threaded FIFO queue standing in for the host event loop's
//! "run this soon" primitive. Work deferred with [`Scheduler::defer`] runs
//! when the owner next calls [`Scheduler::tick`]; tasks deferred while a
//! tick is draining run on the following tick.
//!
//! There is no cancellation: a task superseded before its tick still runs,
//! so deferred work must be idempotent.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

type Task = Box<dyn FnOnce() + Send>;

/// FIFO deferred-task queue
pub struct Scheduler {
    queue: Mutex<VecDeque<Task>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue a task for the next tick
    pub fn defer(&self, task: impl FnOnce() + Send + 'static) {
        self.queue.lock().unwrap().push_back(Box::new(task));
    }

    /// Run every task queued before this call; returns how many ran
    pub fn tick(&self) -> usize {
        // Swap the queue out so tasks deferring further work don't extend
        // the current tick.
        let tasks: Vec<Task> = {
            let mut queue = self.queue.lock().unwrap();
            queue.drain(..).collect()
        };
        let count = tasks.len();
        if count > 0 {
            tracing::trace!(count, "scheduler tick");
        }
        for task in tasks {
            task();
        }
        count
    }

    /// Number of tasks waiting for the next tick
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared scheduler handle
pub type SharedScheduler = Arc<Scheduler>;
