//! Loop queue resolver.
//!
//! DESIGN
//! ======
//! A loop queue is an operator-authored sequence of abstract steps (group or
//! item references) over the active projection. `index` is the step last
//! shown, `-1` before the queue starts. Steps resolve to concrete slide
//! indices through the [`GroupIndexTable`].
//!
//! The queue pointer is driven two ways:
//! - [`LoopQueue::advance`] moves it explicitly and yields the slide to show.
//! - [`LoopQueue::sync_with_free_navigation`] lets it silently follow when
//!   someone navigates by hand to exactly the slide the next step expects.
//!
//! Callers tag positions produced by `advance` with the loop-queue origin and
//! never feed them back into `sync_with_free_navigation`; that breaks the
//! cycle between the queue and the navigation it causes.
//!
//! The resolution of the step after `index` is cached and recomputed whenever
//! the steps, the group table, or the index change.

use crate::content::{LoopStep, Projection};
use crate::groups::GroupIndexTable;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LoopQueue {
    steps: Vec<LoopStep>,
    groups: GroupIndexTable,
    slide_count: usize,
    index: i64,
    next_resolved: Option<usize>,
}

impl Default for LoopQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopQueue {
    /// Empty queue, not started.
    #[must_use]
    pub fn new() -> Self {
        Self {
            steps: Vec::new(),
            groups: GroupIndexTable::default(),
            slide_count: 0,
            index: -1,
            next_resolved: None,
        }
    }

    #[must_use]
    pub fn for_projection(projection: &Projection) -> Self {
        let mut queue = Self::new();
        queue.reset_on_projection_switch(Some(projection));
        queue
    }

    /// Rebuild steps and groups from the newly active projection and restart.
    pub fn reset_on_projection_switch(&mut self, projection: Option<&Projection>) {
        match projection {
            Some(p) => {
                self.steps.clone_from(&p.loop_queue);
                self.groups = GroupIndexTable::build(&p.contents);
                self.slide_count = p.len();
            }
            None => {
                self.steps.clear();
                self.groups = GroupIndexTable::default();
                self.slide_count = 0;
            }
        }
        self.index = -1;
        self.refresh();
    }

    #[must_use]
    pub fn index(&self) -> i64 {
        self.index
    }

    #[must_use]
    pub fn steps(&self) -> &[LoopStep] {
        &self.steps
    }

    #[must_use]
    pub fn groups(&self) -> &GroupIndexTable {
        &self.groups
    }

    /// Highest valid index, `-1` for an empty queue.
    #[must_use]
    pub fn last_index(&self) -> i64 {
        i64::try_from(self.steps.len()).map_or(i64::MAX, |len| len - 1)
    }

    /// Slide the step at `position` points to, if it still exists.
    #[must_use]
    pub fn resolve_step(&self, position: usize) -> Option<usize> {
        let step = self.steps.get(position)?;
        let slide = if let Some(group) = &step.group {
            self.groups.resolve(group)?
        } else {
            step.item?.checked_sub(1)?
        };
        (slide < self.slide_count).then_some(slide)
    }

    /// Cached resolution of the step after `index`.
    #[must_use]
    pub fn next_resolved(&self) -> Option<usize> {
        self.next_resolved
    }

    /// Move the pointer by `delta`, clamped to `[-1, len - 1]`.
    ///
    /// Returns the slide the new step resolves to. `None` means there is
    /// nothing to show (not started, or the step is unresolvable) even though
    /// the pointer itself has moved.
    pub fn advance(&mut self, delta: i64) -> Option<usize> {
        self.index = self.index.saturating_add(delta).clamp(-1, self.last_index().max(-1));
        self.refresh();
        usize::try_from(self.index).ok().and_then(|i| self.resolve_step(i))
    }

    /// Follow a position change that did not come from this queue.
    ///
    /// Returns `true` when the pointer advanced by one.
    pub fn sync_with_free_navigation(&mut self, observed_slide: usize) -> bool {
        if self.next_resolved != Some(observed_slide) {
            return false;
        }
        self.index += 1;
        self.refresh();
        true
    }

    /// Adopt an index chosen elsewhere (clamped).
    pub fn set_index(&mut self, index: i64) {
        self.index = index.clamp(-1, self.last_index().max(-1));
        self.refresh();
    }

    fn refresh(&mut self) {
        self.next_resolved = usize::try_from(self.index + 1)
            .ok()
            .and_then(|next| self.resolve_step(next));
    }
}

#[cfg(test)]
#[path = "loop_queue_test.rs"]
mod tests;
