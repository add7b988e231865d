// src/matching/scoring.rs

use log::trace;

use crate::config;
use crate::models::{Household, MatchCandidate, MatchFactors, Quote, Sale};

/// One household from the candidate pool paired with its latest quote.
#[derive(Debug, Clone, Copy)]
pub struct CandidateInput<'a> {
    pub household: &'a Household,
    pub quote: &'a Quote,
}

/// Classification of the scored candidate set for one sale.
#[derive(Debug, Clone)]
pub enum ScoreOutcome {
    /// A single candidate cleared the confidence floor by a clear margin;
    /// commit immediately without human review.
    AutoMatch(MatchCandidate),
    /// Human decision required; carries all candidates scoring above zero,
    /// best first.
    Ambiguous(Vec<MatchCandidate>),
    /// Nothing scored; the sale becomes a create-new-household prompt.
    NoMatch,
}

/// Scores every candidate against the sale and returns them sorted by
/// score descending, ties broken by most-recent quote date then by
/// household id for a stable order.
pub fn score_candidates(sale: &Sale, candidates: &[CandidateInput<'_>]) -> Vec<MatchCandidate> {
    let mut scored: Vec<MatchCandidate> = candidates
        .iter()
        .map(|c| score_one(sale, c))
        .collect();

    scored.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(b.quote_date.cmp(&a.quote_date))
            .then(a.household_id.cmp(&b.household_id))
    });
    scored
}

fn score_one(sale: &Sale, candidate: &CandidateInput<'_>) -> MatchCandidate {
    let quote = candidate.quote;
    let household = candidate.household;

    let factors = MatchFactors {
        product: quote.product_type.eq_ignore_ascii_case(&sale.product_type),
        producer: household.producer_id.is_some() && household.producer_id == sale.producer_id,
        premium: premium_within_tolerance(quote.premium_cents, sale.premium_cents),
        temporal: quote.quote_date <= sale.sale_date,
    };

    let mut score = 0;
    if factors.product {
        score += config::PRODUCT_MATCH_POINTS;
    }
    if factors.producer {
        score += config::PRODUCER_MATCH_POINTS;
    }
    if factors.premium {
        score += config::PREMIUM_PROXIMITY_POINTS;
    }
    if factors.temporal {
        score += config::TEMPORAL_ORDER_POINTS;
    }

    trace!(
        "Scored household {:?} for sale {:?}: {} ({:?})",
        household.id,
        sale.id,
        score,
        factors
    );

    MatchCandidate {
        household_id: household.id.clone(),
        household_name: format!("{} {}", household.first_name, household.last_name),
        quote_id: quote.id.clone(),
        quote_date: quote.quote_date,
        product_type: quote.product_type.clone(),
        premium_cents: quote.premium_cents,
        producer_id: household.producer_id.clone(),
        score,
        factors,
    }
}

fn premium_within_tolerance(quoted_cents: i64, sale_cents: i64) -> bool {
    let tolerance = sale_cents.abs() as f64 * config::PREMIUM_PROXIMITY_RATIO;
    (quoted_cents - sale_cents).abs() as f64 <= tolerance
}

/// Applies the classification thresholds to an already-ranked candidate
/// list (the output of [`score_candidates`]).
pub fn classify(ranked: Vec<MatchCandidate>) -> ScoreOutcome {
    let mut positive: Vec<MatchCandidate> =
        ranked.into_iter().filter(|c| c.score > 0).collect();

    let Some(top) = positive.first().cloned() else {
        return ScoreOutcome::NoMatch;
    };

    let runner_up_too_close = positive
        .get(1)
        .map(|second| top.score - second.score <= config::AMBIGUITY_MARGIN)
        .unwrap_or(false);

    if top.score >= config::AUTO_MATCH_THRESHOLD && !runner_up_too_close {
        return ScoreOutcome::AutoMatch(top);
    }

    ScoreOutcome::Ambiguous(positive)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        AgencyId, HouseholdId, HouseholdStatus, QuoteId, SaleId, SaleMatchState, TeamMemberId,
    };
    use chrono::NaiveDate;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn household(id: &str, producer: Option<&str>) -> Household {
        let now = chrono::Utc::now().naive_utc();
        Household {
            id: HouseholdId(id.to_string()),
            agency_id: AgencyId("a1".to_string()),
            household_key: "DOE|JANE|10001".to_string(),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            postal_code: "10001".to_string(),
            lead_received: date(2024, 1, 1),
            status: HouseholdStatus::Quoted,
            producer_id: producer.map(|p| TeamMemberId(p.to_string())),
            needs_attention: false,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn quote(id: &str, household_id: &str, product: &str, premium: i64, qd: NaiveDate) -> Quote {
        let now = chrono::Utc::now().naive_utc();
        Quote {
            id: QuoteId(id.to_string()),
            agency_id: AgencyId("a1".to_string()),
            household_id: HouseholdId(household_id.to_string()),
            producer_id: None,
            quote_date: qd,
            product_type: product.to_string(),
            items_quoted: 1,
            premium_cents: premium,
            issued_policy_number: None,
            report_type: "quotes".to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    fn sale(product: &str, premium: i64, sd: NaiveDate, producer: Option<&str>) -> Sale {
        let now = chrono::Utc::now().naive_utc();
        Sale {
            id: SaleId("s1".to_string()),
            agency_id: AgencyId("a1".to_string()),
            first_name: "Jane".to_string(),
            last_name: "Doe".to_string(),
            postal_code: "10001".to_string(),
            product_type: product.to_string(),
            premium_cents: premium,
            sale_date: sd,
            sub_producer_code: None,
            sub_producer_name: None,
            producer_id: producer.map(|p| TeamMemberId(p.to_string())),
            household_id: None,
            match_state: SaleMatchState::Unmatched,
            report_type: "sales".to_string(),
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn all_four_factors_fire_and_sum() {
        let hh = household("h1", Some("tm1"));
        let q = quote("q1", "h1", "auto", 120_000, date(2024, 3, 1));
        let s = sale("auto", 125_000, date(2024, 3, 15), Some("tm1"));

        let scored = score_candidates(&s, &[CandidateInput { household: &hh, quote: &q }]);
        assert_eq!(scored[0].score, 110);
        assert!(scored[0].factors.product);
        assert!(scored[0].factors.producer);
        assert!(scored[0].factors.premium);
        assert!(scored[0].factors.temporal);
    }

    #[test]
    fn score_exactly_75_auto_matches() {
        // Product (40) + producer (35), premium off, quote after sale.
        let hh = household("h1", Some("tm1"));
        let q = quote("q1", "h1", "auto", 500_000, date(2024, 6, 1));
        let s = sale("auto", 125_000, date(2024, 3, 15), Some("tm1"));

        let scored = score_candidates(&s, &[CandidateInput { household: &hh, quote: &q }]);
        assert_eq!(scored[0].score, 75);
        assert!(matches!(classify(scored), ScoreOutcome::AutoMatch(_)));
    }

    #[test]
    fn score_below_threshold_goes_to_review() {
        // Product (40) + temporal (10) only: no producer, premium far off.
        let hh = household("h1", None);
        let q = quote("q1", "h1", "auto", 90_000, date(2024, 3, 1));
        let s = sale("auto", 125_000, date(2024, 3, 15), Some("tm1"));

        let scored = score_candidates(&s, &[CandidateInput { household: &hh, quote: &q }]);
        assert!(scored[0].score < 75);
        match classify(scored) {
            ScoreOutcome::Ambiguous(c) => assert_eq!(c.len(), 1),
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn close_runner_up_forces_review_despite_clearing_the_floor() {
        let hh1 = household("h1", Some("tm1"));
        let q1 = quote("q1", "h1", "auto", 125_000, date(2024, 3, 1));
        // Second candidate fires the same four factors: 110 vs 110.
        let hh2 = household("h2", Some("tm1"));
        let q2 = quote("q2", "h2", "auto", 124_000, date(2024, 2, 1));
        let s = sale("auto", 125_000, date(2024, 3, 15), Some("tm1"));

        let scored = score_candidates(
            &s,
            &[
                CandidateInput { household: &hh1, quote: &q1 },
                CandidateInput { household: &hh2, quote: &q2 },
            ],
        );
        assert_eq!(scored[0].score, 110);
        assert_eq!(scored[1].score, 110);
        match classify(scored) {
            ScoreOutcome::Ambiguous(c) => {
                assert_eq!(c.len(), 2);
                // Ties break toward the most recent quote date.
                assert_eq!(c[0].quote_date, date(2024, 3, 1));
            }
            other => panic!("expected ambiguous, got {:?}", other),
        }
    }

    #[test]
    fn gap_of_exactly_ten_points_is_still_ambiguous() {
        // 110 vs 100: the temporal factor alone separates them.
        let hh1 = household("h1", Some("tm1"));
        let q1 = quote("q1", "h1", "auto", 125_000, date(2024, 3, 1));
        let hh2 = household("h2", Some("tm1"));
        let q2 = quote("q2", "h2", "auto", 124_000, date(2024, 4, 1));
        let s = sale("auto", 125_000, date(2024, 3, 15), Some("tm1"));

        let scored = score_candidates(
            &s,
            &[
                CandidateInput { household: &hh1, quote: &q1 },
                CandidateInput { household: &hh2, quote: &q2 },
            ],
        );
        assert_eq!(scored[0].score, 110);
        assert_eq!(scored[1].score, 100);
        assert!(matches!(classify(scored), ScoreOutcome::Ambiguous(_)));
    }

    #[test]
    fn zero_scores_classify_as_no_match() {
        let hh = household("h1", None);
        let q = quote("q1", "h1", "home", 999_000, date(2024, 6, 1));
        let s = sale("auto", 125_000, date(2024, 3, 15), Some("tm1"));

        let scored = score_candidates(&s, &[CandidateInput { household: &hh, quote: &q }]);
        assert_eq!(scored[0].score, 0);
        assert!(matches!(classify(scored), ScoreOutcome::NoMatch));
        assert!(matches!(classify(Vec::new()), ScoreOutcome::NoMatch));
    }

    #[test]
    fn premium_tolerance_is_ten_percent_of_the_sale() {
        assert!(premium_within_tolerance(112_500, 125_000));
        assert!(premium_within_tolerance(137_500, 125_000));
        assert!(!premium_within_tolerance(112_499, 125_000));
        assert!(!premium_within_tolerance(137_501, 125_000));
        // Zero-premium sale only tolerates exactly zero.
        assert!(premium_within_tolerance(0, 0));
        assert!(!premium_within_tolerance(1, 0));
    }
}
