//! Bounded FIFO of accepted-but-not-yet-executed commands.
//!
//! Moves and flow switches both pass through here so that pump changes stay
//! ordered relative to motion. Overflow is reported to the caller, never
//! silently dropped.

use std::collections::VecDeque;

use ssg::Position;

#[derive(Debug, Clone, PartialEq)]
pub enum QueuedCommand {
    /// Travel move; the pump is forced off before it runs.
    Rapid { target: Position, feed: f64 },
    /// Drawing move at whatever flow is currently configured.
    Draw { target: Position, feed: f64 },
    FlowOn { duty: u8 },
    FlowOff,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

#[derive(Debug)]
pub struct CommandQueue {
    items: VecDeque<QueuedCommand>,
    capacity: usize,
}

impl CommandQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, command: QueuedCommand) -> Result<(), QueueFull> {
        if self.items.len() >= self.capacity {
            return Err(QueueFull);
        }
        self.items.push_back(command);
        Ok(())
    }

    /// Put a command back at the head. Used when executing one command
    /// requires an implicit step first (a rapid arriving with the pump on).
    /// Deliberately not capacity-checked: the command came out of this queue.
    pub(crate) fn push_front(&mut self, command: QueuedCommand) {
        self.items.push_front(command);
    }

    pub fn pop(&mut self) -> Option<QueuedCommand> {
        self.items.pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }
}
