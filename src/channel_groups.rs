use log::debug;
use serde::{Deserialize, Serialize};

/// One of the two channel groups coherence is computed between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    One,
    Two,
}

impl Group {
    pub fn other(self) -> Group {
        match self {
            Group::One => Group::Two,
            Group::Two => Group::One,
        }
    }
}

/// Membership of input channels in two disjoint, ascending groups.
///
/// A channel that is in neither group is unassigned. All mutation goes
/// through the methods below, which keep the groups disjoint and sorted;
/// each returns whether membership actually changed so the owner can decide
/// whether downstream state needs to be rebuilt.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelSet {
    group1: Vec<usize>,
    group2: Vec<usize>,
}

impl ChannelSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a set from arbitrary channel lists. Duplicates are dropped and a
    /// channel listed in both stays in group 1.
    pub fn from_groups<A, B>(group1: A, group2: B) -> Self
    where
        A: IntoIterator<Item = usize>,
        B: IntoIterator<Item = usize>,
    {
        let mut set = Self::new();
        for channel in group1 {
            sorted_insert(&mut set.group1, channel);
        }
        for channel in group2 {
            if set.group1.binary_search(&channel).is_err() {
                sorted_insert(&mut set.group2, channel);
            }
        }
        set
    }

    pub fn group1(&self) -> &[usize] {
        &self.group1
    }

    pub fn group2(&self) -> &[usize] {
        &self.group2
    }

    pub fn group(&self, group: Group) -> &[usize] {
        match group {
            Group::One => &self.group1,
            Group::Two => &self.group2,
        }
    }

    fn group_mut(&mut self, group: Group) -> &mut Vec<usize> {
        match group {
            Group::One => &mut self.group1,
            Group::Two => &mut self.group2,
        }
    }

    /// The group holding `channel`, if any.
    pub fn group_of(&self, channel: usize) -> Option<Group> {
        if self.group1.binary_search(&channel).is_ok() {
            Some(Group::One)
        } else if self.group2.binary_search(&channel).is_ok() {
            Some(Group::Two)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.group1.is_empty() && self.group2.is_empty()
    }

    /// Number of group1 x group2 pairings.
    pub fn combination_count(&self) -> usize {
        self.group1.len() * self.group2.len()
    }

    /// Flips `channel` in `target`. A channel already in `target` becomes
    /// unassigned; otherwise it leaves the other group first and is inserted
    /// into `target` in sorted position. Always changes membership.
    pub fn toggle(&mut self, channel: usize, target: Group) -> bool {
        if let Ok(pos) = self.group(target).binary_search(&channel) {
            self.group_mut(target).remove(pos);
            debug!("Channel {} removed from {:?}", channel, target);
            return true;
        }

        if let Ok(pos) = self.group(target.other()).binary_search(&channel) {
            self.group_mut(target.other()).remove(pos);
        }
        sorted_insert(self.group_mut(target), channel);
        debug!("Channel {} moved to {:?}", channel, target);
        true
    }

    pub fn clear(&mut self) -> bool {
        let changed = !self.is_empty();
        self.group1.clear();
        self.group2.clear();
        changed
    }

    /// Lower half of the active channels to group 1, upper half to group 2.
    /// With an odd count group 2 gets the extra channel.
    pub fn default_split(&mut self, active: &[usize]) -> bool {
        let mut channels = active.to_vec();
        channels.sort_unstable();
        channels.dedup();
        let group2 = channels.split_off(channels.len() / 2);
        let group1 = channels;
        let changed = self.group1 != group1 || self.group2 != group2;
        self.group1 = group1;
        self.group2 = group2;
        changed
    }

    /// Drops every grouped channel that is no longer in `active`. Newly active
    /// channels are left unassigned.
    pub fn reconcile(&mut self, active: &[usize]) -> bool {
        let before = self.group1.len() + self.group2.len();
        self.group1.retain(|ch| active.contains(ch));
        self.group2.retain(|ch| active.contains(ch));
        let changed = before != self.group1.len() + self.group2.len();
        if changed {
            debug!(
                "Reconciled groups against {} active channels: {:?} / {:?}",
                active.len(),
                self.group1,
                self.group2
            );
        }
        changed
    }
}

fn sorted_insert(group: &mut Vec<usize>, channel: usize) {
    if let Err(pos) = group.binary_search(&channel) {
        group.insert(pos, channel);
    }
}
