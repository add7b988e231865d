// src/models.rs

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

//------------------------------------------------------------------------------
// IDENTIFIER TYPES
//------------------------------------------------------------------------------
// Using newtype pattern for type safety to prevent mixing different ID types

/// Strongly typed identifier for an agency
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AgencyId(pub String);

/// Strongly typed identifier for Household records
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct HouseholdId(pub String);

impl HouseholdId {
    pub fn new() -> Self {
        HouseholdId(Uuid::new_v4().to_string())
    }
}

impl Default for HouseholdId {
    fn default() -> Self {
        Self::new()
    }
}

/// Strongly typed identifier for Quote records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct QuoteId(pub String);

impl QuoteId {
    pub fn new() -> Self {
        QuoteId(Uuid::new_v4().to_string())
    }
}

impl Default for QuoteId {
    fn default() -> Self {
        Self::new()
    }
}

/// Strongly typed identifier for Sale records
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SaleId(pub String);

impl SaleId {
    pub fn new() -> Self {
        SaleId(Uuid::new_v4().to_string())
    }
}

impl Default for SaleId {
    fn default() -> Self {
        Self::new()
    }
}

/// Strongly typed identifier for team members (producers)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TeamMemberId(pub String);

//------------------------------------------------------------------------------
// CORE DOMAIN MODELS
//------------------------------------------------------------------------------

/// Lifecycle status of a household. Advances forward only,
/// driven by the presence of quotes and sales.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HouseholdStatus {
    Lead,
    Quoted,
    Sold,
}

impl HouseholdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Lead => "lead",
            Self::Quoted => "quoted",
            Self::Sold => "sold",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sold" => Self::Sold,
            "quoted" => Self::Quoted,
            _ => Self::Lead,
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Self::Lead => 0,
            Self::Quoted => 1,
            Self::Sold => 2,
        }
    }
}

/// Represents one prospect/customer entity within an agency.
///
/// Identified by a normalized name+postal-code key that is unique per
/// agency. Created on first quote ingestion; never deleted by this engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Household {
    /// Unique identifier for this household
    pub id: HouseholdId,

    /// The agency that owns this household
    pub agency_id: AgencyId,

    /// Normalized identity key (`LASTNAME|FIRSTNAME|ZIP`)
    pub household_key: String,

    pub first_name: String,
    pub last_name: String,
    pub postal_code: String,

    /// Date the lead was first received
    pub lead_received: NaiveDate,

    /// Forward-only lifecycle status
    pub status: HouseholdStatus,

    /// Producer assigned to this household, if any
    pub producer_id: Option<TeamMemberId>,

    /// Set on creation so a human can confirm a freshly minted household
    pub needs_attention: bool,

    pub active: bool,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl Household {
    /// Advances the household status, never regressing it.
    /// Returns true if the status actually changed.
    pub fn advance_status(&mut self, to: HouseholdStatus) -> bool {
        if to.rank() > self.status.rank() {
            self.status = to;
            true
        } else {
            false
        }
    }
}

/// One quoted product for a household on a given date.
///
/// Natural uniqueness key is (household, quote date, product type);
/// re-ingesting the same logical quote updates rather than duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub id: QuoteId,
    pub agency_id: AgencyId,
    pub household_id: HouseholdId,

    /// Producer that wrote the quote, if resolved
    pub producer_id: Option<TeamMemberId>,

    pub quote_date: NaiveDate,
    pub product_type: String,
    pub items_quoted: i32,

    /// Premium in minor currency units (cents)
    pub premium_cents: i64,

    pub issued_policy_number: Option<String>,

    /// Report type of the upload that produced this quote; used for supersession
    pub report_type: String,

    pub active: bool,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

/// Matching lifecycle of an externally reported sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaleMatchState {
    /// No household link yet
    Unmatched,
    /// Linked without human review (score cleared the confidence floor)
    AutoMatched,
    /// Queued for human review
    PendingReview,
    /// Linked by an explicit human decision
    Matched,
    /// Deliberately left unlinked; excluded from future auto-matching
    Skipped,
    /// Linked to a household created for it during review
    CreatedNew,
}

impl SaleMatchState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unmatched => "unmatched",
            Self::AutoMatched => "auto_matched",
            Self::PendingReview => "pending_review",
            Self::Matched => "matched",
            Self::Skipped => "skipped",
            Self::CreatedNew => "created_new",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "auto_matched" => Self::AutoMatched,
            "pending_review" => Self::PendingReview,
            "matched" => Self::Matched,
            "skipped" => Self::Skipped,
            "created_new" => Self::CreatedNew,
            _ => Self::Unmatched,
        }
    }

    /// A decided sale keeps its state across re-ingestion; only undecided
    /// sales are eligible for another matching attempt.
    pub fn is_decided(&self) -> bool {
        !matches!(self, Self::Unmatched | Self::PendingReview)
    }
}

/// A sold-policy event reported by a carrier upload, initially unlinked
/// to any household until resolved by matching or review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sale {
    pub id: SaleId,
    pub agency_id: AgencyId,

    pub first_name: String,
    pub last_name: String,
    pub postal_code: String,

    pub product_type: String,
    pub premium_cents: i64,
    pub sale_date: NaiveDate,

    /// Sub-producer code as it appeared on the report
    pub sub_producer_code: Option<String>,
    /// Sub-producer name as it appeared on the report
    pub sub_producer_name: Option<String>,

    /// Resolved producer, if the matcher succeeded
    pub producer_id: Option<TeamMemberId>,

    /// Linked household once resolved
    pub household_id: Option<HouseholdId>,

    pub match_state: SaleMatchState,

    /// Report type of the upload that produced this sale; used for supersession
    pub report_type: String,

    pub active: bool,

    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

//------------------------------------------------------------------------------
// TEAM DIRECTORY
//------------------------------------------------------------------------------

/// One producer/team member as known to the agency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeamMember {
    pub id: TeamMemberId,
    pub name: String,
    pub producer_code: Option<String>,
}

/// Read-only snapshot of an agency's team members for one reconciliation
/// run, with the case-insensitive code index built once up front.
#[derive(Debug, Clone)]
pub struct TeamDirectory {
    members: Vec<TeamMember>,
    code_index: HashMap<String, TeamMemberId>,
}

impl TeamDirectory {
    pub fn new(members: Vec<TeamMember>) -> Self {
        let mut code_index = HashMap::new();
        for member in &members {
            if let Some(code) = &member.producer_code {
                let code = code.trim();
                if !code.is_empty() {
                    code_index.insert(code.to_uppercase(), member.id.clone());
                }
            }
        }
        TeamDirectory {
            members,
            code_index,
        }
    }

    /// Case-insensitive exact lookup by producer code.
    pub fn by_code(&self, code: &str) -> Option<&TeamMemberId> {
        self.code_index.get(&code.trim().to_uppercase())
    }

    pub fn members(&self) -> &[TeamMember] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

//------------------------------------------------------------------------------
// INPUT ROWS
//------------------------------------------------------------------------------

/// Row-type-specific payload of a normalized upload row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RowKind {
    Quote {
        quote_date: NaiveDate,
        items_quoted: i32,
        issued_policy_number: Option<String>,
    },
    Sale {
        sale_date: NaiveDate,
    },
}

/// One parsed, vendor-cleaned row from a report upload. Parsing of
/// vendor spreadsheet formats happens upstream; by the time a row
/// reaches this engine all fields are typed and money is integer cents.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRow {
    pub first_name: String,
    pub last_name: String,
    pub postal_code: String,
    pub product_type: String,
    pub premium_cents: i64,
    pub sub_producer_code: Option<String>,
    pub sub_producer_name: Option<String>,
    /// Natural identifier from the source report (policy/quote reference),
    /// used to label per-row errors
    pub reference: Option<String>,
    pub kind: RowKind,
}

impl NormalizedRow {
    /// Label used when reporting a per-row error.
    pub fn error_label(&self) -> String {
        match &self.reference {
            Some(r) if !r.trim().is_empty() => r.clone(),
            _ => format!("{} {} ({})", self.first_name, self.last_name, self.postal_code),
        }
    }
}

//------------------------------------------------------------------------------
// MATCH CANDIDATES AND REVIEW DECISIONS
//------------------------------------------------------------------------------

/// Which scoring factors fired for a candidate. Each flag maps to a fixed
/// point value so a reviewing human can see exactly why a score was earned.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MatchFactors {
    /// Candidate's latest quote product type equals the sale product type
    pub product: bool,
    /// Candidate's assigned producer equals the sale's resolved producer
    pub producer: bool,
    /// Candidate's quoted premium is within tolerance of the sale premium
    pub premium: bool,
    /// Candidate's quote date is on or before the sale date
    pub temporal: bool,
}

/// Ephemeral, request-scoped pairing of a sale with one candidate
/// household/quote. Produced by the scorer, consumed immediately by the
/// auto-match path or the review queue, never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub household_id: HouseholdId,
    pub household_name: String,
    pub quote_id: QuoteId,
    pub quote_date: NaiveDate,
    pub product_type: String,
    pub premium_cents: i64,
    pub producer_id: Option<TeamMemberId>,
    pub score: u32,
    pub factors: MatchFactors,
}

/// Action a human chose for one ambiguous sale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewAction {
    Match,
    Skip,
    CreateNew,
}

impl ReviewAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::Skip => "skip",
            Self::CreateNew => "create_new",
        }
    }
}

/// One recorded human decision for an ambiguous sale.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewDecision {
    /// Index of the item in the review queue this decision belongs to
    pub item_index: usize,
    pub action: ReviewAction,
    /// Chosen household when the action is `Match`
    pub household_id: Option<HouseholdId>,
}

/// Audit record appended once a review decision has been finalized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewAuditEntry {
    pub sale_id: SaleId,
    pub action: String,
    pub household_id: Option<HouseholdId>,
    pub decided_at: NaiveDateTime,
    pub details: serde_json::Value,
}
