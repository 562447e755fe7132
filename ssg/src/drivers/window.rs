//! The in-flight window: sent-but-unacknowledged lines, keyed by sequence.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone)]
pub struct InFlight {
    pub line: String,
    pub first_send: Instant,
    pub last_send: Instant,
    pub retries: u32,
}

/// Bounded map of sequence number to in-flight line. The ack timeout is
/// measured from the most recent transmission, so a resend restarts the
/// clock; `first_send` is kept for statistics.
#[derive(Debug)]
pub struct SendWindow {
    capacity: usize,
    entries: BTreeMap<u32, InFlight>,
}

impl SendWindow {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn has_room(&self) -> bool {
        self.entries.len() < self.capacity
    }

    /// Returns false without inserting when the window is full.
    pub fn insert(&mut self, seq: u32, line: String, now: Instant) -> bool {
        if !self.has_room() {
            return false;
        }
        self.entries.insert(
            seq,
            InFlight {
                line,
                first_send: now,
                last_send: now,
                retries: 0,
            },
        );
        true
    }

    pub fn ack(&mut self, seq: u32) -> Option<InFlight> {
        self.entries.remove(&seq)
    }

    pub fn get(&self, seq: u32) -> Option<&InFlight> {
        self.entries.get(&seq)
    }

    /// Sequence numbers whose last transmission is older than `timeout`,
    /// in ascending order.
    pub fn expired(&self, now: Instant, timeout: Duration) -> Vec<u32> {
        self.entries
            .iter()
            .filter(|(_, e)| now.duration_since(e.last_send) > timeout)
            .map(|(seq, _)| *seq)
            .collect()
    }

    /// All in-flight sequence numbers at or below `seq`, ascending. This is
    /// the resend set for a gap report.
    pub fn at_or_below(&self, seq: u32) -> Vec<u32> {
        self.entries.range(..=seq).map(|(s, _)| *s).collect()
    }

    /// Record a retransmission; returns the new retry count.
    pub fn mark_resent(&mut self, seq: u32, now: Instant) -> u32 {
        match self.entries.get_mut(&seq) {
            Some(entry) => {
                entry.last_send = now;
                entry.retries += 1;
                entry.retries
            }
            None => 0,
        }
    }

    /// Restart one entry's timeout without charging a retry. Used for gap
    /// resends, which are driven by the controller rather than by loss.
    pub fn touch(&mut self, seq: u32, now: Instant) {
        if let Some(entry) = self.entries.get_mut(&seq) {
            entry.last_send = now;
        }
    }

    /// Push every timeout forward without charging a retry. Used after a
    /// `busy` reply: the controller is alive, the lines are not lost.
    pub fn touch_all(&mut self, now: Instant) {
        for entry in self.entries.values_mut() {
            entry.last_send = now;
        }
    }

    /// The earliest instant at which some entry will time out.
    pub fn next_deadline(&self, timeout: Duration) -> Option<Instant> {
        self.entries
            .values()
            .map(|e| e.last_send + timeout)
            .min()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
