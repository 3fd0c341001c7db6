use std::fmt;
use thiserror::Error;

use crate::channel_groups::ChannelSet;

/// Selection id reserved for the average across every combination.
pub const AVERAGE_SELECTION_ID: usize = 1;
/// Selection id of the first combination; ids are 1-based and 0 means
/// "nothing selected".
pub const FIRST_COMBINATION_ID: usize = 2;
pub const AVERAGE_LABEL: &str = "Average across all combinations";

/// A (group 1 channel, group 2 channel) pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Combination {
    pub group1: usize,
    pub group2: usize,
}

impl fmt::Display for Combination {
    // Channels are shown 1-based.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} x {}", self.group1 + 1, self.group2 + 1)
    }
}

/// What the plot should show for a resolved selection id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    Average,
    Combination(usize),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("selection id 0 means nothing is selected")]
    NothingSelected,
    #[error("combination id {id} is out of range for {count} combinations")]
    OutOfRange { id: usize, count: usize },
}

/// Row-major cartesian product: outer loop over group 1, inner over group 2.
/// Row `i` of every coherence matrix belongs to element `i` of this list.
pub fn derive_combinations(group1: &[usize], group2: &[usize]) -> Vec<Combination> {
    group1
        .iter()
        .flat_map(|&g1| group2.iter().map(move |&g2| Combination { group1: g1, group2: g2 }))
        .collect()
}

/// Maps a 1-based selection id onto a combination index.
pub fn resolve_selection(id: usize, count: usize) -> Result<Selection, SelectionError> {
    match id {
        0 => Err(SelectionError::NothingSelected),
        AVERAGE_SELECTION_ID => Ok(Selection::Average),
        _ => {
            let index = id - FIRST_COMBINATION_ID;
            if index < count {
                Ok(Selection::Combination(index))
            } else {
                Err(SelectionError::OutOfRange { id, count })
            }
        }
    }
}

/// An entry of the combination picker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionEntry {
    pub id: usize,
    pub label: String,
}

/// The derived combination list for the current grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CombinationList {
    combinations: Vec<Combination>,
}

impl CombinationList {
    pub fn from_channels(channels: &ChannelSet) -> Self {
        Self {
            combinations: derive_combinations(channels.group1(), channels.group2()),
        }
    }

    pub fn rebuild(&mut self, channels: &ChannelSet) {
        self.combinations = derive_combinations(channels.group1(), channels.group2());
    }

    pub fn len(&self) -> usize {
        self.combinations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.combinations.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<Combination> {
        self.combinations.get(index).copied()
    }

    pub fn resolve(&self, id: usize) -> Result<Selection, SelectionError> {
        resolve_selection(id, self.combinations.len())
    }

    /// Picker entries: the average first, then one per combination.
    pub fn entries(&self) -> Vec<SelectionEntry> {
        let mut entries = Vec::with_capacity(self.combinations.len() + 1);
        entries.push(SelectionEntry {
            id: AVERAGE_SELECTION_ID,
            label: AVERAGE_LABEL.to_string(),
        });
        entries.extend(self.combinations.iter().enumerate().map(|(i, comb)| SelectionEntry {
            id: i + FIRST_COMBINATION_ID,
            label: comb.to_string(),
        }));
        entries
    }

    /// Label for a selection id, if it names an entry.
    pub fn label_for(&self, id: usize) -> Option<String> {
        match self.resolve(id).ok()? {
            Selection::Average => Some(AVERAGE_LABEL.to_string()),
            Selection::Combination(i) => self.get(i).map(|c| c.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn combinations_are_row_major() {
        let combs = derive_combinations(&[0, 2], &[1, 3, 5]);
        assert_eq!(combs.len(), 6);
        let pairs: Vec<(usize, usize)> = combs.iter().map(|c| (c.group1, c.group2)).collect();
        assert_eq!(pairs, vec![(0, 1), (0, 3), (0, 5), (2, 1), (2, 3), (2, 5)]);
    }

    #[test]
    fn empty_group_gives_no_combinations() {
        assert!(derive_combinations(&[0, 1], &[]).is_empty());
        assert!(derive_combinations(&[], &[4]).is_empty());
    }

    #[test]
    fn id_one_is_always_average() {
        for count in 0..5 {
            assert_eq!(resolve_selection(1, count), Ok(Selection::Average));
        }
    }

    #[test]
    fn ids_map_to_zero_based_indices() {
        let count = 3;
        assert_eq!(resolve_selection(2, count), Ok(Selection::Combination(0)));
        assert_eq!(resolve_selection(4, count), Ok(Selection::Combination(2)));
        assert_eq!(
            resolve_selection(5, count),
            Err(SelectionError::OutOfRange { id: 5, count })
        );
        assert_eq!(resolve_selection(0, count), Err(SelectionError::NothingSelected));
        assert!(resolve_selection(2, 0).is_err());
    }

    #[test]
    fn entries_use_one_based_channel_labels() {
        let channels = ChannelSet::from_groups([0], [2, 3]);
        let list = CombinationList::from_channels(&channels);
        let entries = list.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].label, AVERAGE_LABEL);
        assert_eq!(entries[1], SelectionEntry { id: 2, label: "1 x 3".to_string() });
        assert_eq!(entries[2], SelectionEntry { id: 3, label: "1 x 4".to_string() });
        assert_eq!(list.label_for(3).as_deref(), Some("1 x 4"));
        assert_eq!(list.label_for(9), None);
    }
}
