// src/review.rs

use log::debug;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{HouseholdId, ReviewAction, ReviewDecision};
use crate::results::ReviewItem;

/// Integrity failures of the review workflow. Rejected synchronously and
/// never partially applied.
#[derive(Debug, Error)]
pub enum ReviewError {
    #[error("review item index {index} out of range (queue has {len} items)")]
    InvalidIndex { index: usize, len: usize },

    #[error("cannot complete review: undecided item indices {undecided:?}")]
    Incomplete { undecided: Vec<usize> },
}

/// Overall progress of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueStatus {
    InProgress,
    Complete,
}

/// One operation a reviewer can perform. Decisions are keyed by item
/// index, so navigating back and forth never loses prior decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewEvent {
    SelectCandidate {
        index: usize,
        household_id: HouseholdId,
    },
    Skip {
        index: usize,
    },
    CreateNew {
        index: usize,
    },
    Navigate {
        index: usize,
    },
}

/// Pure state of the review workflow: one decision slot per item plus a
/// cursor. Kept separate from any presentation layer so transitions are
/// testable without a UI harness.
#[derive(Debug, Clone, Default)]
pub struct ReviewState {
    decisions: Vec<Option<ReviewDecision>>,
    cursor: usize,
}

impl ReviewState {
    pub fn new(item_count: usize) -> Self {
        ReviewState {
            decisions: vec![None; item_count],
            cursor: 0,
        }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn decision(&self, index: usize) -> Option<&ReviewDecision> {
        self.decisions.get(index).and_then(|d| d.as_ref())
    }

    pub fn status(&self) -> QueueStatus {
        if self.decisions.iter().all(|d| d.is_some()) {
            QueueStatus::Complete
        } else {
            QueueStatus::InProgress
        }
    }

    pub fn undecided_indices(&self) -> Vec<usize> {
        self.decisions
            .iter()
            .enumerate()
            .filter(|(_, d)| d.is_none())
            .map(|(i, _)| i)
            .collect()
    }

    fn next_pending_after(&self, from: usize) -> usize {
        let len = self.decisions.len();
        if len == 0 {
            return 0;
        }
        // First pending item at or after `from`, wrapping once.
        for offset in 0..len {
            let idx = (from + offset) % len;
            if self.decisions[idx].is_none() {
                return idx;
            }
        }
        from.min(len - 1)
    }
}

/// Pure transition function: applies one reviewer event to the state.
/// Out-of-range indices are rejected; everything else always succeeds.
pub fn apply(mut state: ReviewState, event: ReviewEvent) -> Result<ReviewState, ReviewError> {
    let len = state.decisions.len();
    let check = |index: usize| -> Result<(), ReviewError> {
        if index >= len {
            Err(ReviewError::InvalidIndex { index, len })
        } else {
            Ok(())
        }
    };

    match event {
        ReviewEvent::SelectCandidate {
            index,
            household_id,
        } => {
            check(index)?;
            state.decisions[index] = Some(ReviewDecision {
                item_index: index,
                action: ReviewAction::Match,
                household_id: Some(household_id),
            });
            state.cursor = state.next_pending_after(index);
        }
        ReviewEvent::Skip { index } => {
            check(index)?;
            state.decisions[index] = Some(ReviewDecision {
                item_index: index,
                action: ReviewAction::Skip,
                household_id: None,
            });
            state.cursor = state.next_pending_after(index);
        }
        ReviewEvent::CreateNew { index } => {
            check(index)?;
            state.decisions[index] = Some(ReviewDecision {
                item_index: index,
                action: ReviewAction::CreateNew,
                household_id: None,
            });
            state.cursor = state.next_pending_after(index);
        }
        ReviewEvent::Navigate { index } => {
            check(index)?;
            state.cursor = index;
        }
    }

    Ok(state)
}

/// Review session over the ambiguous items of one reconciliation run.
/// Thin convenience wrapper around the pure [`apply`] transition.
#[derive(Debug)]
pub struct ReviewQueue {
    items: Vec<ReviewItem>,
    state: ReviewState,
}

impl ReviewQueue {
    pub fn new(items: Vec<ReviewItem>) -> Self {
        let state = ReviewState::new(items.len());
        ReviewQueue { items, state }
    }

    pub fn items(&self) -> &[ReviewItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.state.cursor()
    }

    pub fn current_item(&self) -> Option<&ReviewItem> {
        self.items.get(self.state.cursor())
    }

    pub fn status(&self) -> QueueStatus {
        self.state.status()
    }

    pub fn decision(&self, index: usize) -> Option<&ReviewDecision> {
        self.state.decision(index)
    }

    pub fn select_candidate(
        &mut self,
        index: usize,
        household_id: HouseholdId,
    ) -> Result<(), ReviewError> {
        self.dispatch(ReviewEvent::SelectCandidate {
            index,
            household_id,
        })
    }

    pub fn skip(&mut self, index: usize) -> Result<(), ReviewError> {
        self.dispatch(ReviewEvent::Skip { index })
    }

    pub fn create_new(&mut self, index: usize) -> Result<(), ReviewError> {
        self.dispatch(ReviewEvent::CreateNew { index })
    }

    pub fn navigate(&mut self, index: usize) -> Result<(), ReviewError> {
        self.dispatch(ReviewEvent::Navigate { index })
    }

    fn dispatch(&mut self, event: ReviewEvent) -> Result<(), ReviewError> {
        debug!("Review event: {:?}", event);
        let state = std::mem::take(&mut self.state);
        self.state = apply(state, event)?;
        Ok(())
    }

    /// Returns the full decision list for the second reconciliation pass.
    /// Fails loudly with the undecided indices rather than partially
    /// applying; the queue never silently drops an item.
    pub fn complete(&self) -> Result<Vec<ReviewDecision>, ReviewError> {
        let undecided = self.state.undecided_indices();
        if !undecided.is_empty() {
            return Err(ReviewError::Incomplete { undecided });
        }
        Ok((0..self.items.len())
            .map(|i| self.state.decision(i).cloned().expect("all items decided"))
            .collect())
    }
}
