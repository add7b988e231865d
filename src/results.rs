// src/results.rs

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::models::{MatchCandidate, Sale};

/// One ambiguous sale awaiting a human decision, with its ranked
/// candidates and their factor breakdowns. An empty candidate list is a
/// create-new-household prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewItem {
    pub sale: Sale,
    pub candidates: Vec<MatchCandidate>,
}

/// A per-row failure, recorded with the row's natural identifier so the
/// calling application can surface an inspectable error list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowError {
    pub reference: String,
    pub reason: String,
}

impl std::fmt::Display for RowError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reference, self.reason)
    }
}

/// Wall-clock accounting for the phases of a reconciliation run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PhaseTimings {
    pub supersession_seconds: f64,
    pub batch_seconds: f64,
    pub total_seconds: f64,
}

/// Complete outcome of one reconciliation run. Row errors are accumulated
/// here rather than thrown, so the caller always sees exactly what
/// succeeded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub run_id: String,
    pub run_timestamp: NaiveDateTime,

    pub rows_processed: usize,
    pub households_created: usize,
    pub households_updated: usize,
    pub quotes_created: usize,
    pub quotes_updated: usize,
    pub sales_created: usize,
    pub sales_updated: usize,

    /// Previously active records of this upload's report type that were
    /// soft-deactivated before the batch loop started
    pub records_deactivated: usize,

    pub producers_matched: usize,
    /// Deduplicated raw sub-producer strings that resolved to no one
    pub unmatched_producers: Vec<String>,

    /// Households carrying the needs-attention flag after this run
    pub households_flagged: usize,

    pub sales_auto_matched: usize,
    pub sales_pending_review: usize,

    pub row_errors: Vec<RowError>,

    /// Ambiguous sales for the review queue, in processing order
    pub review_items: Vec<ReviewItem>,

    pub timings: PhaseTimings,
}

impl ReconciliationResult {
    pub fn new(run_id: String, run_timestamp: NaiveDateTime) -> Self {
        ReconciliationResult {
            run_id,
            run_timestamp,
            rows_processed: 0,
            households_created: 0,
            households_updated: 0,
            quotes_created: 0,
            quotes_updated: 0,
            sales_created: 0,
            sales_updated: 0,
            records_deactivated: 0,
            producers_matched: 0,
            unmatched_producers: Vec::new(),
            households_flagged: 0,
            sales_auto_matched: 0,
            sales_pending_review: 0,
            row_errors: Vec::new(),
            review_items: Vec::new(),
            timings: PhaseTimings::default(),
        }
    }

    pub fn succeeded_rows(&self) -> usize {
        self.rows_processed.saturating_sub(self.row_errors.len())
    }
}

/// Counts reported by the second reconciliation pass that applies review
/// decisions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DecisionApplyResult {
    pub matched: usize,
    pub created_new: usize,
    pub skipped: usize,
}
