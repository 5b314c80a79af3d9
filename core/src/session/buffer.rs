// Candidate buffer — remote candidates for identities that have no session yet
//
// A candidate can overtake the message that makes us create its session.
// Those candidates wait here, keyed by identity, until the session exists or
// the identity is known to be gone.

use crate::message::IceCandidate;
use std::collections::{HashMap, VecDeque};

/// Maximum candidates held per identity
pub const MAX_BUFFERED_PER_IDENTITY: usize = 64;

/// Maximum identities with buffered candidates
pub const MAX_BUFFERED_IDENTITIES: usize = 256;

/// Departed identities remembered; the oldest is forgotten first
pub const MAX_DEPARTED_IDENTITIES: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BufferOutcome {
    Buffered,
    /// The identity left; nothing will ever consume this candidate
    Departed,
    /// Capacity exceeded
    Full,
}

#[derive(Debug, Default)]
pub struct CandidateBuffer {
    pending: HashMap<String, Vec<IceCandidate>>,
    departed: VecDeque<String>,
}

impl CandidateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, identity: &str, candidate: IceCandidate) -> BufferOutcome {
        if self.is_departed(identity) {
            return BufferOutcome::Departed;
        }

        if !self.pending.contains_key(identity) && self.pending.len() >= MAX_BUFFERED_IDENTITIES {
            return BufferOutcome::Full;
        }

        let queue = self.pending.entry(identity.to_string()).or_default();
        if queue.len() >= MAX_BUFFERED_PER_IDENTITY {
            return BufferOutcome::Full;
        }

        queue.push(candidate);
        BufferOutcome::Buffered
    }

    /// Hand over everything buffered for `identity`
    pub fn take(&mut self, identity: &str) -> Vec<IceCandidate> {
        self.pending.remove(identity).unwrap_or_default()
    }

    /// The identity left: release its candidates and refuse new ones.
    /// Returns how many were released.
    pub fn mark_departed(&mut self, identity: &str) -> usize {
        if !self.is_departed(identity) {
            if self.departed.len() >= MAX_DEPARTED_IDENTITIES {
                self.departed.pop_front();
            }
            self.departed.push_back(identity.to_string());
        }
        self.pending.remove(identity).map(|q| q.len()).unwrap_or(0)
    }

    /// The identity (re)joined
    pub fn mark_present(&mut self, identity: &str) {
        self.departed.retain(|d| d != identity);
    }

    fn is_departed(&self, identity: &str) -> bool {
        self.departed.iter().any(|d| d == identity)
    }

    pub fn buffered(&self, identity: &str) -> usize {
        self.pending.get(identity).map(Vec::len).unwrap_or(0)
    }

    pub fn total(&self) -> usize {
        self.pending.values().map(Vec::len).sum()
    }

    pub fn clear(&mut self) {
        self.pending.clear();
        self.departed.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(n: usize) -> IceCandidate {
        IceCandidate::new(format!("candidate:{}", n), None, Some(0))
    }

    #[test]
    fn test_buffer_then_take() {
        let mut buffer = CandidateBuffer::new();
        assert_eq!(buffer.push("bob", candidate(1)), BufferOutcome::Buffered);
        assert_eq!(buffer.push("bob", candidate(2)), BufferOutcome::Buffered);
        assert_eq!(buffer.buffered("bob"), 2);

        assert_eq!(buffer.take("bob"), vec![candidate(1), candidate(2)]);
        assert_eq!(buffer.buffered("bob"), 0);
        assert!(buffer.take("bob").is_empty());
    }

    #[test]
    fn test_departed_identity_discards() {
        let mut buffer = CandidateBuffer::new();
        buffer.push("bob", candidate(1));

        assert_eq!(buffer.mark_departed("bob"), 1);
        assert_eq!(buffer.push("bob", candidate(2)), BufferOutcome::Departed);
        assert_eq!(buffer.total(), 0);

        buffer.mark_present("bob");
        assert_eq!(buffer.push("bob", candidate(3)), BufferOutcome::Buffered);
    }

    #[test]
    fn test_departed_memory_is_bounded() {
        let mut buffer = CandidateBuffer::new();
        for i in 0..=MAX_DEPARTED_IDENTITIES {
            buffer.mark_departed(&format!("peer-{}", i));
        }

        // Oldest departure forgotten, newest still refused
        assert_eq!(buffer.push("peer-0", candidate(1)), BufferOutcome::Buffered);
        assert_eq!(buffer.push("peer-1", candidate(1)), BufferOutcome::Departed);
        let newest = format!("peer-{}", MAX_DEPARTED_IDENTITIES);
        assert_eq!(buffer.push(&newest, candidate(1)), BufferOutcome::Departed);
    }

    #[test]
    fn test_per_identity_limit() {
        let mut buffer = CandidateBuffer::new();
        for i in 0..MAX_BUFFERED_PER_IDENTITY {
            assert_eq!(buffer.push("bob", candidate(i)), BufferOutcome::Buffered);
        }
        assert_eq!(buffer.push("bob", candidate(999)), BufferOutcome::Full);
        // Other identities are unaffected
        assert_eq!(buffer.push("carol", candidate(0)), BufferOutcome::Buffered);
    }

    #[test]
    fn test_identity_limit() {
        let mut buffer = CandidateBuffer::new();
        for i in 0..MAX_BUFFERED_IDENTITIES {
            buffer.push(&format!("peer-{}", i), candidate(i));
        }
        assert_eq!(buffer.push("one-too-many", candidate(0)), BufferOutcome::Full);
        assert_eq!(buffer.push("peer-0", candidate(1)), BufferOutcome::Buffered);
    }
}
