//! Sequence tracking for the controller side of the line protocol.

/// How an incoming sequence number relates to the tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqDisposition {
    /// Exactly the expected number; the command may proceed to the gates.
    InOrder,
    /// Already seen, almost certainly a retry collision. Re-ack, do not
    /// re-execute.
    Duplicate,
    /// A line in between went missing; the host must resend it.
    Gap,
}

/// `expected_next` and `last_acked` as a pair.
///
/// An in-order command consumes its number whether it ends in `ok` or in
/// `err N<s>`; a `busy` consumes nothing, so the host's retransmission of
/// the same line stays in order. `last_acked` only advances on `ok`.
#[derive(Debug, Clone)]
pub struct SequenceTracker {
    expected_next: u32,
    last_acked: u32,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self {
            expected_next: 1,
            last_acked: 0,
        }
    }

    pub fn classify(&self, seq: u32) -> SeqDisposition {
        if seq == self.expected_next {
            SeqDisposition::InOrder
        } else if seq < self.expected_next {
            SeqDisposition::Duplicate
        } else {
            SeqDisposition::Gap
        }
    }

    /// Consume the expected number after an in-order command was handled.
    pub fn consume(&mut self) {
        self.expected_next += 1;
    }

    pub fn record_ack(&mut self, seq: u32) {
        self.last_acked = seq;
    }

    /// Post-homing reset: the next job starts at `N1`.
    pub fn reset(&mut self) {
        self.expected_next = 1;
        self.last_acked = 0;
    }

    pub fn expected_next(&self) -> u32 {
        self.expected_next
    }

    pub fn last_acked(&self) -> u32 {
        self.last_acked
    }
}

impl Default for SequenceTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_in_order_and_flags_others() {
        let mut t = SequenceTracker::new();
        assert_eq!(t.classify(1), SeqDisposition::InOrder);
        t.consume();
        t.record_ack(1);
        assert_eq!(t.classify(1), SeqDisposition::Duplicate);
        assert_eq!(t.classify(3), SeqDisposition::Gap);
        assert_eq!(t.classify(2), SeqDisposition::InOrder);
    }

    #[test]
    fn reset_restarts_at_one() {
        let mut t = SequenceTracker::new();
        for seq in 1..=5 {
            assert_eq!(t.classify(seq), SeqDisposition::InOrder);
            t.consume();
            t.record_ack(seq);
        }
        t.reset();
        assert_eq!(t.expected_next(), 1);
        assert_eq!(t.last_acked(), 0);
        assert_eq!(t.classify(1), SeqDisposition::InOrder);
    }

    #[test]
    fn invariant_holds_over_a_million_commands() {
        // Sequence numbers are not required to wrap at 32 bits, but they
        // must stay exact over at least 2^20 consecutive commands.
        let mut t = SequenceTracker::new();
        for seq in 1..=(1u32 << 20) {
            assert_eq!(t.classify(seq), SeqDisposition::InOrder);
            t.consume();
            t.record_ack(seq);
            assert_eq!(t.expected_next(), seq + 1);
            assert_eq!(t.last_acked(), seq);
        }
    }

    #[test]
    fn acks_are_monotonic_without_reset() {
        let mut t = SequenceTracker::new();
        let mut last = 0;
        for seq in 1..=100 {
            t.consume();
            t.record_ack(seq);
            assert!(t.last_acked() >= last);
            last = t.last_acked();
        }
    }
}
