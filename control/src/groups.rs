//! Group index table: group ordinal or label to first slide index.
//!
//! Rebuilt whenever the active projection's content list changes. Both loop
//! queue steps and direct group jumps resolve through it.

use crate::content::{GroupRef, ProjectionItem};

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GroupIndexTable {
    /// `(label, first slide)` in slide order.
    starts: Vec<(String, usize)>,
}

impl GroupIndexTable {
    #[must_use]
    pub fn build(items: &[ProjectionItem]) -> Self {
        let starts = items
            .iter()
            .enumerate()
            .filter_map(|(index, item)| item.group.clone().map(|label| (label, index)))
            .collect();
        Self { starts }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.starts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// First slide of the 1-based group `ordinal`.
    #[must_use]
    pub fn by_ordinal(&self, ordinal: usize) -> Option<usize> {
        let position = ordinal.checked_sub(1)?;
        self.starts.get(position).map(|(_, slide)| *slide)
    }

    /// First slide of the first group labelled `label`.
    #[must_use]
    pub fn by_label(&self, label: &str) -> Option<usize> {
        self.starts
            .iter()
            .find(|(name, _)| name == label)
            .map(|(_, slide)| *slide)
    }

    #[must_use]
    pub fn resolve(&self, group: &GroupRef) -> Option<usize> {
        match group {
            GroupRef::Ordinal(ordinal) => self.by_ordinal(*ordinal),
            GroupRef::Label(label) => self.by_label(label),
        }
    }

    /// 1-based ordinal and label of the group containing `slide`.
    #[must_use]
    pub fn group_of(&self, slide: usize) -> Option<(usize, &str)> {
        let position = self.starts.iter().rposition(|(_, start)| *start <= slide)?;
        let (label, _) = &self.starts[position];
        Some((position + 1, label.as_str()))
    }
}

#[cfg(test)]
#[path = "groups_test.rs"]
mod tests;
