//! Rolling buffer of the most recent groups, the data feed of the live plot

use parking_lot::RwLock;
use ppstools::{ChannelId, Group};
use std::collections::VecDeque;
use std::ops::RangeInclusive;
use std::sync::Arc;

pub struct DisplayBuffer {
    capacity: usize,
    groups: RwLock<VecDeque<Arc<Group>>>,
}

impl DisplayBuffer {
    /// A capacity of zero is raised to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        DisplayBuffer {
            capacity,
            groups: RwLock::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Append a group, evicting the oldest one when full
    pub fn push(&self, group: Arc<Group>) {
        let mut g = self.groups.write();
        if g.len() == self.capacity {
            g.pop_front();
        }
        g.push_back(group);
    }

    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Copy of the current contents, oldest first. The lock is released
    /// before this returns.
    pub fn snapshot(&self) -> Snapshot {
        let groups = self.groups.read().iter().cloned().collect();
        Snapshot { groups }
    }
}

#[derive(Clone, Debug, Default)]
pub struct Snapshot {
    groups: Vec<Arc<Group>>,
}

impl Snapshot {
    pub fn groups(&self) -> &[Arc<Group>] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn latest(&self) -> Option<&Arc<Group>> {
        self.groups.last()
    }

    /// Period indices covered, first to last
    pub fn indices(&self) -> Option<RangeInclusive<u64>> {
        let first = self.groups.first()?.index();
        let last = self.groups.last()?.index();
        Some(first..=last)
    }

    /// Plot points of one channel: `(period index, offset)` for every event
    pub fn series(&self, channel: ChannelId) -> Vec<(u64, i64)> {
        self.groups
            .iter()
            .filter_map(|g| g.offsets(channel).map(|o| (g.index(), o)))
            .flat_map(|(i, o)| o.iter().map(move |&x| (i, x)))
            .collect()
    }
}
