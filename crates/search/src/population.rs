//! Bounded, score-ordered population of traces.

use metaforge_trace::Trace;
use std::collections::HashSet;

/// A scored trace retained by the search.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub trace: Trace,
    pub score: f64,
    pub fingerprint: u64,
    /// Generation that produced the trace; `0` for the initial population.
    pub generation: usize,
}

impl Candidate {
    pub fn new(trace: Trace, score: f64, generation: usize) -> Self {
        let fingerprint = trace.fingerprint();
        Self {
            trace,
            score,
            fingerprint,
            generation,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Added,
    /// A trace with the same fingerprint was already seen.
    Duplicate,
    /// The population is full and the candidate does not beat the floor.
    Rejected,
}

/// Best `capacity` candidates seen so far, best first.
///
/// Eviction drops the population's handle only; anyone still holding a clone
/// of an evicted trace keeps it alive.
#[derive(Debug, Clone)]
pub struct Population {
    capacity: usize,
    members: Vec<Candidate>,
    seen: HashSet<u64>,
}

impl Population {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            members: Vec::with_capacity(capacity),
            seen: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn members(&self) -> &[Candidate] {
        &self.members
    }

    pub fn best(&self) -> Option<&Candidate> {
        self.members.first()
    }

    /// Lowest retained score once the population is full.
    pub fn floor(&self) -> Option<f64> {
        if self.members.len() < self.capacity {
            None
        } else {
            self.members.last().map(|c| c.score)
        }
    }

    pub fn has_seen(&self, fingerprint: u64) -> bool {
        self.seen.contains(&fingerprint)
    }

    /// Insert keeping best-first order; ties keep insertion order.
    pub fn insert(&mut self, candidate: Candidate) -> Insertion {
        if self.seen.contains(&candidate.fingerprint) {
            return Insertion::Duplicate;
        }
        if let Some(floor) = self.floor() {
            if candidate.score <= floor {
                self.seen.insert(candidate.fingerprint);
                return Insertion::Rejected;
            }
        }

        self.seen.insert(candidate.fingerprint);
        let at = self
            .members
            .partition_point(|member| member.score >= candidate.score);
        self.members.insert(at, candidate);
        if self.members.len() > self.capacity {
            self.members.pop();
        }
        Insertion::Added
    }

    /// Cheap copy of the current members for a generation's workers.
    pub fn snapshot(&self) -> Vec<Candidate> {
        self.members.clone()
    }
}
