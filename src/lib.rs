// src/lib.rs
pub mod config;
pub mod matching;
pub mod models;
pub mod normalize;
pub mod pipeline;
pub mod results;
pub mod review;
pub mod storage;

// Re-export common types for easier access
pub use models::{
    AgencyId, Household, HouseholdId, HouseholdStatus, MatchCandidate, MatchFactors,
    NormalizedRow, Quote, QuoteId, ReviewAction, ReviewDecision, RowKind, Sale, SaleId,
    SaleMatchState, TeamDirectory, TeamMember, TeamMemberId,
};

// Re-export important functionality
pub use normalize::household_key;
pub use pipeline::{apply_decisions, reconcile, ReconcileContext, ReconcileError};
pub use results::{DecisionApplyResult, ReconciliationResult, ReviewItem, RowError};
pub use review::{QueueStatus, ReviewError, ReviewQueue};
pub use storage::{InMemoryStore, Storage, UpsertOutcome};
