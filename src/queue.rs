use crate::scanner::CandidateFile;
use crossbeam::queue::SegQueue;

/// Where a popped candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lane {
    Primary,
    Deferred,
}

/// Primary and deferred FIFOs shared by the workers of one cycle.
///
/// Filled once before the workers start. Pops never block: an empty result
/// means there is nothing left for this cycle.
#[derive(Default)]
pub struct WorkQueue {
    primary: SegQueue<CandidateFile>,
    deferred: SegQueue<CandidateFile>,
}

impl WorkQueue {
    pub fn new(candidates: Vec<CandidateFile>) -> Self {
        let queue = Self::default();
        for candidate in candidates {
            queue.primary.push(candidate);
        }
        queue
    }

    /// Primary first, then deferred.
    pub fn pop(&self) -> Option<(CandidateFile, Lane)> {
        if let Some(candidate) = self.primary.pop() {
            return Some((candidate, Lane::Primary));
        }
        self.deferred.pop().map(|c| (c, Lane::Deferred))
    }

    /// Hand a candidate over to the deferred lane.
    pub fn defer(&self, candidate: CandidateFile) {
        self.deferred.push(candidate);
    }

    pub fn primary_len(&self) -> usize {
        self.primary.len()
    }

    pub fn deferred_len(&self) -> usize {
        self.deferred.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_empty() && self.deferred.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn candidate(name: &str) -> CandidateFile {
        CandidateFile {
            path: PathBuf::from(name),
            size: 1,
            modified: 0,
        }
    }

    #[test]
    fn test_primary_drains_before_deferred() {
        let queue = WorkQueue::new(vec![candidate("a"), candidate("b")]);
        let (first, lane) = queue.pop().unwrap();
        assert_eq!(lane, Lane::Primary);
        queue.defer(first);

        assert_eq!(queue.pop().unwrap().1, Lane::Primary);
        let (last, lane) = queue.pop().unwrap();
        assert_eq!(lane, Lane::Deferred);
        assert_eq!(last.path, PathBuf::from("a"));
        assert!(queue.pop().is_none());
        assert!(queue.is_empty());
    }

    #[test]
    fn test_fifo_order() {
        let queue = WorkQueue::new(vec![candidate("1"), candidate("2"), candidate("3")]);
        let order: Vec<PathBuf> = std::iter::from_fn(|| queue.pop().map(|(c, _)| c.path)).collect();
        assert_eq!(order, vec![PathBuf::from("1"), PathBuf::from("2"), PathBuf::from("3")]);
    }
}
