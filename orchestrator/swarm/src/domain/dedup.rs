// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Bounded set of executed proposal ids.

use constellation_core::domain::messages::ProposalId;
use std::collections::{HashSet, VecDeque};

/// FIFO-evicting set; the oldest id is forgotten once `capacity` is exceeded.
#[derive(Debug)]
pub struct ExecutedSet {
    capacity: usize,
    ids: HashSet<ProposalId>,
    order: VecDeque<ProposalId>,
}

impl ExecutedSet {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            ids: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
        }
    }

    /// Returns `false` if the id was already present.
    pub fn insert(&mut self, id: ProposalId) -> bool {
        if !self.ids.insert(id) {
            return false;
        }
        self.order.push_back(id);
        while self.order.len() > self.capacity {
            if let Some(evicted) = self.order.pop_front() {
                self.ids.remove(&evicted);
            }
        }
        true
    }

    pub fn contains(&self, id: &ProposalId) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_insert_is_rejected() {
        let mut set = ExecutedSet::new(4);
        let id = ProposalId::new();
        assert!(set.insert(id));
        assert!(!set.insert(id));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_oldest_is_evicted() {
        let mut set = ExecutedSet::new(2);
        let ids: Vec<ProposalId> = (0..3).map(|_| ProposalId::new()).collect();
        for id in &ids {
            set.insert(*id);
        }
        assert!(!set.contains(&ids[0]));
        assert!(set.contains(&ids[1]));
        assert!(set.contains(&ids[2]));
    }
}
