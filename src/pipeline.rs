// src/pipeline.rs

use std::collections::BTreeSet;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate, Utc};
use log::{debug, info, warn};
use thiserror::Error;
use uuid::Uuid;

use crate::config;
use crate::matching::producer::{match_producer, ProducerMatch};
use crate::matching::scoring::{classify, score_candidates, CandidateInput, ScoreOutcome};
use crate::models::{
    AgencyId, Household, HouseholdId, HouseholdStatus, NormalizedRow, Quote, QuoteId,
    ReviewAction, ReviewAuditEntry, ReviewDecision, RowKind, Sale, SaleId, SaleMatchState,
    TeamDirectory,
};
use crate::normalize::household_key;
use crate::results::{
    DecisionApplyResult, ReconciliationResult, ReviewItem, RowError,
};
use crate::storage::{Storage, UpsertOutcome};

/// Agency-level context for one reconciliation run.
#[derive(Debug, Clone)]
pub struct ReconcileContext {
    pub agency_id: AgencyId,
    /// Report type of this upload. All previously active records of this
    /// exact type are superseded before the batch loop starts.
    pub report_type: String,
}

/// Fatal run-level failures. Row-level problems never surface here; they
/// are accumulated into the result instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("team directory unavailable for agency {agency}: {source}")]
    DirectoryUnavailable {
        agency: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("supersession of report type {report_type} failed: {source}")]
    SupersessionFailed {
        report_type: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("all {total} rows failed; first error: {first_error}")]
    AllRowsFailed { total: usize, first_error: String },
}

/// Running counters for one reconciliation run. Mutated only by the
/// sequential row loop; folded into the result once the run completes.
#[derive(Default)]
struct RunTally {
    households_created: usize,
    households_updated: usize,
    quotes_created: usize,
    quotes_updated: usize,
    sales_created: usize,
    sales_updated: usize,
    producers_matched: usize,
    sales_auto_matched: usize,
    sales_pending_review: usize,
    unmatched_producers: BTreeSet<String>,
    flagged: BTreeSet<HouseholdId>,
    review_items: Vec<ReviewItem>,
}

/// Reconciles one upload of normalized rows against the agency's
/// households, quotes and sales.
///
/// Fatal context failures (directory fetch, supersession) abort before
/// any row is touched; anything that goes wrong for an individual row is
/// recorded against that row's natural identifier and processing
/// continues. Re-running with the same input converges to the same state:
/// households, quotes and sales are all keyed by natural uniqueness keys.
pub async fn reconcile<S: Storage + ?Sized>(
    store: &S,
    rows: &[NormalizedRow],
    ctx: &ReconcileContext,
) -> std::result::Result<ReconciliationResult, ReconcileError> {
    let run_start = Instant::now();
    let run_id = Uuid::new_v4().to_string();
    let mut result = ReconciliationResult::new(run_id.clone(), Utc::now().naive_utc());

    info!(
        "Reconciliation run {} starting: {} rows of report type {:?} for agency {}",
        run_id,
        rows.len(),
        ctx.report_type,
        ctx.agency_id.0
    );

    // Fatal context checks happen before any side effect.
    let directory = store
        .fetch_team_directory(&ctx.agency_id)
        .await
        .map_err(|source| ReconcileError::DirectoryUnavailable {
            agency: ctx.agency_id.0.clone(),
            source,
        })?;
    debug!("Team directory snapshot: {} members", directory.len());

    // Supersession: this upload becomes the source of truth for its
    // report type, so older records of the same type go inactive first.
    let supersession_start = Instant::now();
    result.records_deactivated = store
        .deactivate_report_type(&ctx.agency_id, &ctx.report_type)
        .await
        .map_err(|source| ReconcileError::SupersessionFailed {
            report_type: ctx.report_type.clone(),
            source,
        })?;
    result.timings.supersession_seconds = supersession_start.elapsed().as_secs_f64();
    info!(
        "Superseded {} active records of report type {:?}",
        result.records_deactivated, ctx.report_type
    );

    let batch_start = Instant::now();
    let mut tally = RunTally::default();
    let batch_count = rows.len().div_ceil(config::RECONCILE_BATCH_SIZE).max(1);

    for (batch_index, batch) in rows.chunks(config::RECONCILE_BATCH_SIZE).enumerate() {
        for row in batch {
            result.rows_processed += 1;
            if let Err(err) = process_row(store, ctx, &directory, row, &mut tally).await {
                let row_error = RowError {
                    reference: row.error_label(),
                    reason: format!("{:#}", err),
                };
                warn!("Row failed: {}", row_error);
                result.row_errors.push(row_error);
            }
        }
        info!(
            "Batch {}/{} complete ({} rows so far, {} errors)",
            batch_index + 1,
            batch_count,
            result.rows_processed,
            result.row_errors.len()
        );
    }

    if !rows.is_empty() && result.succeeded_rows() == 0 {
        return Err(ReconcileError::AllRowsFailed {
            total: rows.len(),
            first_error: result
                .row_errors
                .first()
                .map(|e| e.to_string())
                .unwrap_or_default(),
        });
    }

    result.households_created = tally.households_created;
    result.households_updated = tally.households_updated;
    result.quotes_created = tally.quotes_created;
    result.quotes_updated = tally.quotes_updated;
    result.sales_created = tally.sales_created;
    result.sales_updated = tally.sales_updated;
    result.producers_matched = tally.producers_matched;
    result.sales_auto_matched = tally.sales_auto_matched;
    result.sales_pending_review = tally.sales_pending_review;
    result.unmatched_producers = tally.unmatched_producers.into_iter().collect();
    result.households_flagged = tally.flagged.len();
    result.review_items = tally.review_items;

    result.timings.batch_seconds = batch_start.elapsed().as_secs_f64();
    result.timings.total_seconds = run_start.elapsed().as_secs_f64();

    info!(
        "Run {} complete in {:.2}s: {} rows, {} households created, {} updated, \
         {} quotes created, {} updated, {} sales auto-matched, {} pending review, {} errors",
        result.run_id,
        result.timings.total_seconds,
        result.rows_processed,
        result.households_created,
        result.households_updated,
        result.quotes_created,
        result.quotes_updated,
        result.sales_auto_matched,
        result.sales_pending_review,
        result.row_errors.len()
    );

    Ok(result)
}

fn validate_row(row: &NormalizedRow) -> Result<()> {
    if row.product_type.trim().is_empty() {
        bail!("missing product type");
    }
    if row.first_name.trim().is_empty() && row.last_name.trim().is_empty() {
        bail!("missing applicant name");
    }
    if row.premium_cents < 0 {
        bail!("negative premium ({})", row.premium_cents);
    }
    Ok(())
}

/// Raw sub-producer string for the unmatched-producers report.
fn raw_producer_label(row: &NormalizedRow) -> Option<String> {
    let name = row
        .sub_producer_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    let code = row
        .sub_producer_code
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty());
    match (name, code) {
        (Some(n), Some(c)) => Some(format!("{} ({})", n, c)),
        (Some(n), None) => Some(n.to_string()),
        (None, Some(c)) => Some(c.to_string()),
        (None, None) => None,
    }
}

async fn process_row<S: Storage + ?Sized>(
    store: &S,
    ctx: &ReconcileContext,
    directory: &TeamDirectory,
    row: &NormalizedRow,
    tally: &mut RunTally,
) -> Result<()> {
    validate_row(row)?;

    let producer = match_producer(
        row.sub_producer_code.as_deref(),
        row.sub_producer_name.as_deref(),
        directory,
    );
    if producer.matched {
        tally.producers_matched += 1;
    } else if let Some(label) = raw_producer_label(row) {
        tally.unmatched_producers.insert(label);
    }

    match &row.kind {
        RowKind::Quote {
            quote_date,
            items_quoted,
            issued_policy_number,
        } => {
            process_quote_row(
                store,
                ctx,
                row,
                &producer,
                *quote_date,
                *items_quoted,
                issued_policy_number.clone(),
                tally,
            )
            .await
        }
        RowKind::Sale { sale_date } => {
            process_sale_row(store, ctx, row, &producer, *sale_date, tally).await
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_quote_row<S: Storage + ?Sized>(
    store: &S,
    ctx: &ReconcileContext,
    row: &NormalizedRow,
    producer: &ProducerMatch,
    quote_date: NaiveDate,
    items_quoted: i32,
    issued_policy_number: Option<String>,
    tally: &mut RunTally,
) -> Result<()> {
    let key = household_key(&row.first_name, &row.last_name, &row.postal_code);
    let now = Utc::now().naive_utc();

    let mut household = match store
        .find_household_by_key(&ctx.agency_id, &key)
        .await
        .context("household lookup failed")?
    {
        Some(mut existing) => {
            // Never overwrite a confirmed producer with an unmatched one.
            if existing.producer_id.is_none() && producer.team_member_id.is_some() {
                existing.producer_id = producer.team_member_id.clone();
                existing.updated_at = now;
                store
                    .update_household(&existing)
                    .await
                    .context("producer backfill failed")?;
            }
            tally.households_updated += 1;
            if existing.needs_attention {
                tally.flagged.insert(existing.id.clone());
            }
            existing
        }
        None => {
            let fresh = Household {
                id: HouseholdId::new(),
                agency_id: ctx.agency_id.clone(),
                household_key: key,
                first_name: row.first_name.clone(),
                last_name: row.last_name.clone(),
                postal_code: row.postal_code.clone(),
                lead_received: quote_date,
                status: HouseholdStatus::Lead,
                producer_id: producer.team_member_id.clone(),
                needs_attention: true,
                active: true,
                created_at: now,
                updated_at: now,
            };
            store
                .insert_household(&fresh)
                .await
                .context("household creation failed")?;
            tally.households_created += 1;
            tally.flagged.insert(fresh.id.clone());
            debug!(
                "Created household {} ({}) for agency {}",
                fresh.id.0, fresh.household_key, ctx.agency_id.0
            );
            fresh
        }
    };

    let quote = Quote {
        id: QuoteId::new(),
        agency_id: ctx.agency_id.clone(),
        household_id: household.id.clone(),
        producer_id: producer.team_member_id.clone(),
        quote_date,
        product_type: row.product_type.clone(),
        items_quoted,
        premium_cents: row.premium_cents,
        issued_policy_number,
        report_type: ctx.report_type.clone(),
        active: true,
        created_at: now,
        updated_at: now,
    };

    match store
        .upsert_quote(&quote)
        .await
        .context("quote upsert failed")?
    {
        UpsertOutcome::Created => tally.quotes_created += 1,
        UpsertOutcome::Updated => tally.quotes_updated += 1,
    }

    // The presence of a quote drives the forward-only status.
    if household.advance_status(HouseholdStatus::Quoted) {
        household.updated_at = now;
        store
            .update_household(&household)
            .await
            .context("household status advance failed")?;
    }

    Ok(())
}

async fn process_sale_row<S: Storage + ?Sized>(
    store: &S,
    ctx: &ReconcileContext,
    row: &NormalizedRow,
    producer: &ProducerMatch,
    sale_date: NaiveDate,
    tally: &mut RunTally,
) -> Result<()> {
    let now = Utc::now().naive_utc();
    let sale = Sale {
        id: SaleId::new(),
        agency_id: ctx.agency_id.clone(),
        first_name: row.first_name.clone(),
        last_name: row.last_name.clone(),
        postal_code: row.postal_code.clone(),
        product_type: row.product_type.clone(),
        premium_cents: row.premium_cents,
        sale_date,
        sub_producer_code: row.sub_producer_code.clone(),
        sub_producer_name: row.sub_producer_name.clone(),
        producer_id: producer.team_member_id.clone(),
        household_id: None,
        match_state: SaleMatchState::Unmatched,
        report_type: ctx.report_type.clone(),
        active: true,
        created_at: now,
        updated_at: now,
    };

    let (outcome, mut stored) = store
        .upsert_sale(&sale)
        .await
        .context("sale upsert failed")?;
    match outcome {
        UpsertOutcome::Created => tally.sales_created += 1,
        UpsertOutcome::Updated => tally.sales_updated += 1,
    }

    // A decided sale (matched, skipped, created-new) stands; only
    // undecided sales get another matching attempt.
    if stored.match_state.is_decided() {
        debug!(
            "Sale {} already decided ({}), skipping matching",
            stored.id.0,
            stored.match_state.as_str()
        );
        return Ok(());
    }

    let key = household_key(&row.first_name, &row.last_name, &row.postal_code);
    let exact_hit = store
        .find_household_by_key(&ctx.agency_id, &key)
        .await
        .context("household lookup failed")?;

    if let Some(hh) = &exact_hit {
        if hh.producer_id.is_none() && producer.team_member_id.is_some() {
            let mut updated = hh.clone();
            updated.producer_id = producer.team_member_id.clone();
            updated.updated_at = now;
            store
                .update_household(&updated)
                .await
                .context("producer backfill failed")?;
        }
        tally.households_updated += 1;
        if hh.needs_attention {
            tally.flagged.insert(hh.id.clone());
        }
    }

    // Candidate pool: the exact-key household when there is one,
    // otherwise quoted households sharing the postal code, otherwise a
    // recency-windowed agency-wide pool.
    let pool: Vec<(Household, Quote)> = match &exact_hit {
        Some(hh) => store
            .latest_quote_for_household(&hh.id)
            .await
            .context("latest quote lookup failed")?
            .map(|q| vec![(hh.clone(), q)])
            .unwrap_or_default(),
        None if !row.postal_code.trim().is_empty() => store
            .quoted_households_by_postal(&ctx.agency_id, &row.postal_code)
            .await
            .context("postal candidate query failed")?,
        None => {
            let since = sale_date - Duration::days(config::CANDIDATE_RECENCY_WINDOW_DAYS);
            store
                .quoted_households_since(&ctx.agency_id, since)
                .await
                .context("recency candidate query failed")?
        }
    };

    let inputs: Vec<CandidateInput<'_>> = pool
        .iter()
        .map(|(h, q)| CandidateInput {
            household: h,
            quote: q,
        })
        .collect();
    let ranked = score_candidates(&stored, &inputs);

    match classify(ranked) {
        ScoreOutcome::AutoMatch(candidate) => {
            debug!(
                "Sale {} auto-matched to household {} with score {}",
                stored.id.0, candidate.household_id.0, candidate.score
            );
            link_sale(
                store,
                &mut stored,
                &candidate.household_id,
                SaleMatchState::AutoMatched,
            )
            .await?;
            tally.sales_auto_matched += 1;
        }
        ScoreOutcome::Ambiguous(candidates) => {
            stored.match_state = SaleMatchState::PendingReview;
            stored.updated_at = now;
            store
                .update_sale(&stored)
                .await
                .context("sale state update failed")?;
            tally.sales_pending_review += 1;
            tally.review_items.push(ReviewItem {
                sale: stored,
                candidates,
            });
        }
        ScoreOutcome::NoMatch => {
            // Still reviewed, as a create-new-household prompt.
            stored.match_state = SaleMatchState::PendingReview;
            stored.updated_at = now;
            store
                .update_sale(&stored)
                .await
                .context("sale state update failed")?;
            tally.sales_pending_review += 1;
            tally.review_items.push(ReviewItem {
                sale: stored,
                candidates: Vec::new(),
            });
        }
    }

    Ok(())
}

async fn link_sale<S: Storage + ?Sized>(
    store: &S,
    sale: &mut Sale,
    household_id: &HouseholdId,
    state: SaleMatchState,
) -> Result<()> {
    let now = Utc::now().naive_utc();

    sale.household_id = Some(household_id.clone());
    sale.match_state = state;
    sale.updated_at = now;
    store
        .update_sale(sale)
        .await
        .context("sale link update failed")?;

    let mut household = store
        .get_household(household_id)
        .await
        .context("household fetch failed")?
        .with_context(|| format!("household {} not found", household_id.0))?;
    if household.advance_status(HouseholdStatus::Sold) {
        household.updated_at = now;
        store
            .update_household(&household)
            .await
            .context("household status advance failed")?;
    }
    Ok(())
}

/// Second reconciliation pass: applies the full decision list returned by
/// a completed review queue and finalizes each sale's state, appending an
/// audit record per decision.
pub async fn apply_decisions<S: Storage + ?Sized>(
    store: &S,
    ctx: &ReconcileContext,
    items: &[ReviewItem],
    decisions: &[ReviewDecision],
) -> Result<DecisionApplyResult> {
    let mut applied = DecisionApplyResult::default();
    let now = Utc::now().naive_utc();

    for decision in decisions {
        let item = items
            .get(decision.item_index)
            .with_context(|| format!("decision references unknown item {}", decision.item_index))?;
        let mut sale = item.sale.clone();

        match decision.action {
            ReviewAction::Match => {
                let household_id = decision
                    .household_id
                    .clone()
                    .context("match decision carries no household")?;
                link_sale(store, &mut sale, &household_id, SaleMatchState::Matched).await?;
                applied.matched += 1;
            }
            ReviewAction::CreateNew => {
                let household_id =
                    create_household_for_sale(store, ctx, &sale).await?;
                link_sale(store, &mut sale, &household_id, SaleMatchState::CreatedNew).await?;
                applied.created_new += 1;
            }
            ReviewAction::Skip => {
                // Explicit marker: excluded from future auto-matching
                // unless manually reset.
                sale.match_state = SaleMatchState::Skipped;
                sale.updated_at = now;
                store
                    .update_sale(&sale)
                    .await
                    .context("sale skip update failed")?;
                applied.skipped += 1;
            }
        }

        let entry = ReviewAuditEntry {
            sale_id: sale.id.clone(),
            action: decision.action.as_str().to_string(),
            household_id: sale.household_id.clone(),
            decided_at: now,
            details: serde_json::json!({
                "item_index": decision.item_index,
                "candidate_count": item.candidates.len(),
                "sale_product": sale.product_type,
                "sale_date": sale.sale_date,
            }),
        };
        store
            .append_review_audit(&ctx.agency_id, &entry)
            .await
            .context("audit append failed")?;
    }

    info!(
        "Applied {} review decisions: {} matched, {} created new, {} skipped",
        decisions.len(),
        applied.matched,
        applied.created_new,
        applied.skipped
    );
    Ok(applied)
}

/// Creates (or reuses, when the key already exists) a household for a
/// sale the reviewer chose to split off, mirroring the creation step of
/// the main row loop.
async fn create_household_for_sale<S: Storage + ?Sized>(
    store: &S,
    ctx: &ReconcileContext,
    sale: &Sale,
) -> Result<HouseholdId> {
    let key = household_key(&sale.first_name, &sale.last_name, &sale.postal_code);

    if let Some(existing) = store
        .find_household_by_key(&ctx.agency_id, &key)
        .await
        .context("household lookup failed")?
    {
        return Ok(existing.id);
    }

    let now = Utc::now().naive_utc();
    let fresh = Household {
        id: HouseholdId::new(),
        agency_id: ctx.agency_id.clone(),
        household_key: key,
        first_name: sale.first_name.clone(),
        last_name: sale.last_name.clone(),
        postal_code: sale.postal_code.clone(),
        lead_received: sale.sale_date,
        status: HouseholdStatus::Lead,
        producer_id: sale.producer_id.clone(),
        needs_attention: true,
        active: true,
        created_at: now,
        updated_at: now,
    };
    store
        .insert_household(&fresh)
        .await
        .context("household creation failed")?;
    debug!(
        "Created household {} from reviewed sale {}",
        fresh.id.0, sale.id.0
    );
    Ok(fresh.id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RowKind, TeamMember, TeamMemberId};
    use crate::storage::InMemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn agency() -> AgencyId {
        AgencyId("agency-1".to_string())
    }

    fn ctx(report_type: &str) -> ReconcileContext {
        ReconcileContext {
            agency_id: agency(),
            report_type: report_type.to_string(),
        }
    }

    async fn store_with_directory() -> InMemoryStore {
        let store = InMemoryStore::new();
        store
            .set_directory(
                agency(),
                vec![
                    TeamMember {
                        id: TeamMemberId("tm-ab".to_string()),
                        name: "Alice Baker".to_string(),
                        producer_code: Some("AB1".to_string()),
                    },
                    TeamMember {
                        id: TeamMemberId("tm-js".to_string()),
                        name: "Jonathan Smith".to_string(),
                        producer_code: Some("JS1".to_string()),
                    },
                ],
            )
            .await;
        store
    }

    fn quote_row(first: &str, last: &str, zip: &str, product: &str, premium: i64) -> NormalizedRow {
        NormalizedRow {
            first_name: first.to_string(),
            last_name: last.to_string(),
            postal_code: zip.to_string(),
            product_type: product.to_string(),
            premium_cents: premium,
            sub_producer_code: Some("AB1".to_string()),
            sub_producer_name: None,
            reference: None,
            kind: RowKind::Quote {
                quote_date: date(2024, 3, 1),
                items_quoted: 1,
                issued_policy_number: None,
            },
        }
    }

    fn sale_row(first: &str, last: &str, zip: &str, product: &str, premium: i64) -> NormalizedRow {
        NormalizedRow {
            first_name: first.to_string(),
            last_name: last.to_string(),
            postal_code: zip.to_string(),
            product_type: product.to_string(),
            premium_cents: premium,
            sub_producer_code: Some("AB1".to_string()),
            sub_producer_name: None,
            reference: Some("POL-123".to_string()),
            kind: RowKind::Sale {
                sale_date: date(2024, 3, 15),
            },
        }
    }

    #[tokio::test]
    async fn quote_then_sale_auto_matches_end_to_end() {
        let store = store_with_directory().await;
        let rows = vec![
            quote_row("Jane", "Doe", "10001", "auto", 120_000),
            sale_row("Jane", "Doe", "10001", "auto", 125_000),
        ];

        let result = reconcile(&store, &rows, &ctx("lqs_upload")).await.unwrap();

        assert_eq!(result.rows_processed, 2);
        assert_eq!(result.households_created, 1);
        assert_eq!(result.quotes_created, 1);
        assert_eq!(result.sales_created, 1);
        assert_eq!(result.sales_auto_matched, 1);
        assert_eq!(result.sales_pending_review, 0);
        assert_eq!(result.producers_matched, 2);
        assert!(result.row_errors.is_empty());

        let households = store.households(&agency()).await;
        assert_eq!(households.len(), 1);
        assert_eq!(households[0].status, HouseholdStatus::Sold);

        let sales = store.sales(&agency()).await;
        assert_eq!(sales[0].match_state, SaleMatchState::AutoMatched);
        assert_eq!(sales[0].household_id, Some(households[0].id.clone()));
    }

    #[tokio::test]
    async fn reconcile_is_idempotent() {
        let store = store_with_directory().await;
        let rows = vec![
            quote_row("Jane", "Doe", "10001", "auto", 120_000),
            quote_row("John", "Roe", "10002", "home", 90_000),
            sale_row("Jane", "Doe", "10001", "auto", 125_000),
        ];

        let first = reconcile(&store, &rows, &ctx("lqs_upload")).await.unwrap();
        assert_eq!(first.households_created, 2);
        assert_eq!(first.quotes_created, 2);
        assert_eq!(first.sales_created, 1);

        let second = reconcile(&store, &rows, &ctx("lqs_upload")).await.unwrap();
        assert_eq!(second.households_created, 0);
        assert_eq!(second.households_updated, 2);
        assert_eq!(second.quotes_created, 0);
        assert_eq!(second.quotes_updated, 2);
        assert_eq!(second.records_deactivated, 3);
        assert_eq!(second.sales_created, 0);
        assert_eq!(second.sales_updated, 1);

        // No duplicate households or sales after the second pass.
        assert_eq!(store.households(&agency()).await.len(), 2);
        assert_eq!(store.sales(&agency()).await.len(), 1);
    }

    #[tokio::test]
    async fn supersession_only_touches_its_own_report_type() {
        let store = store_with_directory().await;

        let type_b = vec![quote_row("Amy", "Pond", "20001", "home", 80_000)];
        reconcile(&store, &type_b, &ctx("type_b")).await.unwrap();

        let type_a_v1 = vec![quote_row("Jane", "Doe", "10001", "auto", 120_000)];
        reconcile(&store, &type_a_v1, &ctx("type_a")).await.unwrap();

        let mut replacement = quote_row("Jane", "Doe", "10001", "auto", 110_000);
        if let RowKind::Quote { quote_date, .. } = &mut replacement.kind {
            *quote_date = date(2024, 4, 1);
        }
        let result = reconcile(&store, &[replacement], &ctx("type_a"))
            .await
            .unwrap();
        assert_eq!(result.records_deactivated, 1);

        let quotes = store.quotes(&agency()).await;
        let active_a: Vec<_> = quotes
            .iter()
            .filter(|q| q.report_type == "type_a" && q.active)
            .collect();
        assert_eq!(active_a.len(), 1);
        assert_eq!(active_a[0].quote_date, date(2024, 4, 1));

        let active_b: Vec<_> = quotes
            .iter()
            .filter(|q| q.report_type == "type_b" && q.active)
            .collect();
        assert_eq!(active_b.len(), 1);
    }

    #[tokio::test]
    async fn one_bad_row_does_not_sink_the_batch() {
        let store = store_with_directory().await;
        let mut bad = quote_row("Jane", "Doe", "10001", "", 120_000);
        bad.reference = Some("ROW-2".to_string());
        let rows = vec![
            quote_row("Amy", "Pond", "20001", "home", 80_000),
            bad,
            quote_row("John", "Roe", "10002", "auto", 90_000),
        ];

        let result = reconcile(&store, &rows, &ctx("quotes")).await.unwrap();
        assert_eq!(result.rows_processed, 3);
        assert_eq!(result.households_created, 2);
        assert_eq!(result.row_errors.len(), 1);
        assert_eq!(result.row_errors[0].reference, "ROW-2");
        assert!(result.row_errors[0].reason.contains("product type"));
    }

    #[tokio::test]
    async fn zero_successful_rows_is_a_total_failure() {
        let store = store_with_directory().await;
        let rows = vec![quote_row("", "", "10001", "auto", 120_000)];

        let err = reconcile(&store, &rows, &ctx("quotes")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::AllRowsFailed { total: 1, .. }));
    }

    #[tokio::test]
    async fn missing_directory_is_fatal_before_side_effects() {
        let store = InMemoryStore::new(); // no directory seeded
        let rows = vec![quote_row("Jane", "Doe", "10001", "auto", 120_000)];

        let err = reconcile(&store, &rows, &ctx("quotes")).await.unwrap_err();
        assert!(matches!(err, ReconcileError::DirectoryUnavailable { .. }));
        assert!(store.households(&agency()).await.is_empty());
        assert!(store.quotes(&agency()).await.is_empty());
    }

    #[tokio::test]
    async fn low_scoring_sale_goes_to_review() {
        let store = store_with_directory().await;
        reconcile(
            &store,
            &[quote_row("Jane", "Doe", "10001", "home", 500_000)],
            &ctx("quotes"),
        )
        .await
        .unwrap();

        // Same postal code but different applicant: no key hit, and the
        // candidate only earns producer + temporal points.
        let sale = sale_row("Janet", "Doherty", "10001", "auto", 125_000);
        let result = reconcile(&store, &[sale], &ctx("sales")).await.unwrap();

        assert_eq!(result.sales_pending_review, 1);
        assert_eq!(result.review_items.len(), 1);
        let item = &result.review_items[0];
        assert_eq!(item.candidates.len(), 1);
        assert!(item.candidates[0].score < config::AUTO_MATCH_THRESHOLD);
        assert!(item.candidates[0].factors.producer);
        assert!(!item.candidates[0].factors.product);

        let sales = store.sales(&agency()).await;
        assert_eq!(sales[0].match_state, SaleMatchState::PendingReview);
    }

    #[tokio::test]
    async fn sale_with_no_candidates_becomes_create_new_prompt() {
        let store = store_with_directory().await;
        let sale = sale_row("Jane", "Doe", "99999", "auto", 125_000);
        let result = reconcile(&store, &[sale], &ctx("sales")).await.unwrap();

        assert_eq!(result.sales_pending_review, 1);
        assert!(result.review_items[0].candidates.is_empty());
    }

    #[tokio::test]
    async fn decisions_finalize_sales_and_append_audit_entries() {
        let store = store_with_directory().await;
        reconcile(
            &store,
            &[quote_row("Jane", "Doe", "10001", "home", 500_000)],
            &ctx("quotes"),
        )
        .await
        .unwrap();

        let rows = vec![
            sale_row("Janet", "Doherty", "10001", "auto", 125_000),
            sale_row("Newt", "Comer", "88888", "life", 50_000),
            sale_row("Skip", "Pedone", "77777", "auto", 60_000),
        ];
        let result = reconcile(&store, &rows, &ctx("sales")).await.unwrap();
        assert_eq!(result.review_items.len(), 3);

        let target = result.review_items[0].candidates[0].household_id.clone();
        let decisions = vec![
            ReviewDecision {
                item_index: 0,
                action: ReviewAction::Match,
                household_id: Some(target.clone()),
            },
            ReviewDecision {
                item_index: 1,
                action: ReviewAction::CreateNew,
                household_id: None,
            },
            ReviewDecision {
                item_index: 2,
                action: ReviewAction::Skip,
                household_id: None,
            },
        ];

        let applied = apply_decisions(&store, &ctx("sales"), &result.review_items, &decisions)
            .await
            .unwrap();
        assert_eq!(applied.matched, 1);
        assert_eq!(applied.created_new, 1);
        assert_eq!(applied.skipped, 1);

        let sales = store.sales(&agency()).await;
        let matched = sales.iter().find(|s| s.first_name == "Janet").unwrap();
        assert_eq!(matched.match_state, SaleMatchState::Matched);
        assert_eq!(matched.household_id, Some(target.clone()));

        let created = sales.iter().find(|s| s.first_name == "Newt").unwrap();
        assert_eq!(created.match_state, SaleMatchState::CreatedNew);
        assert!(created.household_id.is_some());

        let skipped = sales.iter().find(|s| s.first_name == "Skip").unwrap();
        assert_eq!(skipped.match_state, SaleMatchState::Skipped);
        assert!(skipped.household_id.is_none());

        // The matched household advanced to sold; the created one exists.
        let households = store.households(&agency()).await;
        let sold = households.iter().find(|h| h.id == target).unwrap();
        assert_eq!(sold.status, HouseholdStatus::Sold);
        assert!(households.iter().any(|h| h.last_name == "Comer"));

        assert_eq!(store.audit_entries(&agency()).await.len(), 3);

        // A skipped sale stays skipped on re-ingestion.
        let rerun = reconcile(
            &store,
            &[sale_row("Skip", "Pedone", "77777", "auto", 60_000)],
            &ctx("sales"),
        )
        .await
        .unwrap();
        assert_eq!(rerun.sales_pending_review, 0);
        let sales = store.sales(&agency()).await;
        let skipped = sales.iter().find(|s| s.first_name == "Skip").unwrap();
        assert_eq!(skipped.match_state, SaleMatchState::Skipped);
    }
}
