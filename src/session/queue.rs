use std::collections::VecDeque;

use crate::config::OverflowPolicy;

/// FIFO of client frames captured before upstream is writable
#[derive(Debug)]
pub struct PendingQueue {
    frames: VecDeque<String>,
    capacity: usize,
    policy: OverflowPolicy,
}

impl PendingQueue {
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            frames: VecDeque::new(),
            capacity: capacity.max(1),
            policy,
        }
    }

    /// Enqueue `frame`; returns the frame lost to overflow, if any.
    pub fn push(&mut self, frame: String) -> Option<String> {
        if self.frames.len() < self.capacity {
            self.frames.push_back(frame);
            return None;
        }

        match self.policy {
            OverflowPolicy::DropOldest => {
                let evicted = self.frames.pop_front();
                self.frames.push_back(frame);
                evicted
            }
            OverflowPolicy::RejectNew => Some(frame),
        }
    }

    /// Take every queued frame in arrival order
    pub fn drain(&mut self) -> impl Iterator<Item = String> + '_ {
        self.frames.drain(..)
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
