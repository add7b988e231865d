// src/config.rs

// Candidate scoring factor values. Additive and independent so every
// match decision stays explainable to the reviewing human.
pub const PRODUCT_MATCH_POINTS: u32 = 40;
pub const PRODUCER_MATCH_POINTS: u32 = 35;
pub const PREMIUM_PROXIMITY_POINTS: u32 = 25;
pub const TEMPORAL_ORDER_POINTS: u32 = 10;

// Top score at or above this commits a sale without human review
pub const AUTO_MATCH_THRESHOLD: u32 = 75;

// Two top candidates within this many points of each other force review
// even when the best one clears the auto-match threshold
pub const AMBIGUITY_MARGIN: u32 = 10;

// Quoted premium counts as "close" when within this fraction of the sale premium
pub const PREMIUM_PROXIMITY_RATIO: f64 = 0.10;

// Fuzzy producer-name matching acceptance floor: a member must account
// for at least half the input tokens AND agree on at least two of them
pub const FUZZY_MIN_TOKEN_SCORE: f64 = 0.5;
pub const FUZZY_MIN_MATCHED_TOKENS: usize = 2;

// Rows per batch. A tuning parameter, not a correctness boundary.
pub const RECONCILE_BATCH_SIZE: usize = 100;

// When a sale row carries no postal code, the candidate pool falls back
// to agency-wide quotes inside this recency window
pub const CANDIDATE_RECENCY_WINDOW_DAYS: i64 = 180;
