// src/storage.rs

use std::collections::HashMap;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use log::debug;
use tokio::sync::Mutex;

use crate::models::{
    AgencyId, Household, HouseholdId, Quote, ReviewAuditEntry, Sale, TeamDirectory, TeamMember,
};

/// Whether an upsert created a fresh record or updated an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Abstract repository consumed by the reconciliation engine.
///
/// The engine never opens its own database connections; the surrounding
/// application supplies an implementation of this trait. All calls are
/// agency-scoped and these are the only suspension points in a run.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Fetches the team-member directory snapshot for a run. Failure here
    /// is fatal to the whole run and must happen before any side effects.
    async fn fetch_team_directory(&self, agency_id: &AgencyId) -> Result<TeamDirectory>;

    /// Looks up a household by its normalized identity key.
    async fn find_household_by_key(
        &self,
        agency_id: &AgencyId,
        household_key: &str,
    ) -> Result<Option<Household>>;

    async fn get_household(&self, id: &HouseholdId) -> Result<Option<Household>>;

    async fn insert_household(&self, household: &Household) -> Result<()>;

    async fn update_household(&self, household: &Household) -> Result<()>;

    /// Upserts a quote by its natural key (household, quote date, product
    /// type). Once the owning household is sold the stored quote is
    /// immutable except for producer backfill (null to non-null).
    async fn upsert_quote(&self, quote: &Quote) -> Result<UpsertOutcome>;

    /// Upserts a sale by its natural key (applicant identity key, sale
    /// date, product type) and returns the stored record. A sale that
    /// already carries a decided match state keeps that state and its
    /// household link.
    async fn upsert_sale(&self, sale: &Sale) -> Result<(UpsertOutcome, Sale)>;

    async fn update_sale(&self, sale: &Sale) -> Result<()>;

    /// Soft-deactivates every active record of the given report type for
    /// the agency, returning how many records were deactivated. Must be
    /// durably visible before any upsert of new records of that type.
    async fn deactivate_report_type(
        &self,
        agency_id: &AgencyId,
        report_type: &str,
    ) -> Result<usize>;

    /// Latest active quote for one household, if it has any.
    async fn latest_quote_for_household(&self, id: &HouseholdId) -> Result<Option<Quote>>;

    /// Quoted households in the given postal code, each paired with its
    /// latest active quote.
    async fn quoted_households_by_postal(
        &self,
        agency_id: &AgencyId,
        postal_code: &str,
    ) -> Result<Vec<(Household, Quote)>>;

    /// Agency-wide quoted households whose latest active quote falls on or
    /// after `since`, for sales that carry no postal code.
    async fn quoted_households_since(
        &self,
        agency_id: &AgencyId,
        since: NaiveDate,
    ) -> Result<Vec<(Household, Quote)>>;

    /// Appends the audit record for one finalized review decision.
    async fn append_review_audit(
        &self,
        agency_id: &AgencyId,
        entry: &ReviewAuditEntry,
    ) -> Result<()>;
}

//------------------------------------------------------------------------------
// IN-MEMORY IMPLEMENTATION
//------------------------------------------------------------------------------

#[derive(Default)]
struct StoreInner {
    directories: HashMap<AgencyId, Vec<TeamMember>>,
    households: Vec<Household>,
    quotes: Vec<Quote>,
    sales: Vec<Sale>,
    audits: Vec<(AgencyId, ReviewAuditEntry)>,
}

/// In-memory [`Storage`] implementation backing the test suite and
/// application dry runs. Not intended as a production store.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds the team directory for an agency.
    pub async fn set_directory(&self, agency_id: AgencyId, members: Vec<TeamMember>) {
        let mut inner = self.inner.lock().await;
        inner.directories.insert(agency_id, members);
    }

    pub async fn households(&self, agency_id: &AgencyId) -> Vec<Household> {
        let inner = self.inner.lock().await;
        inner
            .households
            .iter()
            .filter(|h| &h.agency_id == agency_id)
            .cloned()
            .collect()
    }

    pub async fn quotes(&self, agency_id: &AgencyId) -> Vec<Quote> {
        let inner = self.inner.lock().await;
        inner
            .quotes
            .iter()
            .filter(|q| &q.agency_id == agency_id)
            .cloned()
            .collect()
    }

    pub async fn sales(&self, agency_id: &AgencyId) -> Vec<Sale> {
        let inner = self.inner.lock().await;
        inner
            .sales
            .iter()
            .filter(|s| &s.agency_id == agency_id)
            .cloned()
            .collect()
    }

    pub async fn audit_entries(&self, agency_id: &AgencyId) -> Vec<ReviewAuditEntry> {
        let inner = self.inner.lock().await;
        inner
            .audits
            .iter()
            .filter(|(a, _)| a == agency_id)
            .map(|(_, e)| e.clone())
            .collect()
    }
}

/// Latest active quote per household, as (household, quote) pairs.
fn latest_active_quotes<'a>(
    inner: &'a StoreInner,
    agency_id: &AgencyId,
) -> Vec<(&'a Household, &'a Quote)> {
    let mut latest: HashMap<&HouseholdId, &Quote> = HashMap::new();
    for quote in inner.quotes.iter().filter(|q| q.active && &q.agency_id == agency_id) {
        latest
            .entry(&quote.household_id)
            .and_modify(|current| {
                if quote.quote_date > current.quote_date {
                    *current = quote;
                }
            })
            .or_insert(quote);
    }

    let mut pairs = Vec::with_capacity(latest.len());
    for (household_id, quote) in latest {
        if let Some(household) = inner
            .households
            .iter()
            .find(|h| &h.id == household_id && h.active)
        {
            pairs.push((household, quote));
        }
    }
    pairs
}

#[async_trait]
impl Storage for InMemoryStore {
    async fn fetch_team_directory(&self, agency_id: &AgencyId) -> Result<TeamDirectory> {
        let inner = self.inner.lock().await;
        let members = inner
            .directories
            .get(agency_id)
            .cloned()
            .ok_or_else(|| anyhow!("no team directory for agency {}", agency_id.0))?;
        Ok(TeamDirectory::new(members))
    }

    async fn find_household_by_key(
        &self,
        agency_id: &AgencyId,
        household_key: &str,
    ) -> Result<Option<Household>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .households
            .iter()
            .find(|h| &h.agency_id == agency_id && h.household_key == household_key)
            .cloned())
    }

    async fn get_household(&self, id: &HouseholdId) -> Result<Option<Household>> {
        let inner = self.inner.lock().await;
        Ok(inner.households.iter().find(|h| &h.id == id).cloned())
    }

    async fn insert_household(&self, household: &Household) -> Result<()> {
        let mut inner = self.inner.lock().await;
        if inner.households.iter().any(|h| {
            h.agency_id == household.agency_id && h.household_key == household.household_key
        }) {
            return Err(anyhow!(
                "household key {} already exists for agency {}",
                household.household_key,
                household.agency_id.0
            ));
        }
        inner.households.push(household.clone());
        Ok(())
    }

    async fn update_household(&self, household: &Household) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .households
            .iter_mut()
            .find(|h| h.id == household.id)
            .ok_or_else(|| anyhow!("household {} not found", household.id.0))?;
        *slot = household.clone();
        Ok(())
    }

    async fn upsert_quote(&self, quote: &Quote) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock().await;

        let household_sold = inner
            .households
            .iter()
            .find(|h| h.id == quote.household_id)
            .map(|h| h.status == crate::models::HouseholdStatus::Sold)
            .unwrap_or(false);

        if let Some(existing) = inner.quotes.iter_mut().find(|q| {
            q.household_id == quote.household_id
                && q.quote_date == quote.quote_date
                && q.product_type.eq_ignore_ascii_case(&quote.product_type)
        }) {
            if household_sold {
                // Sold households freeze their quote content; only producer
                // backfill and re-activation after supersession get through.
                if existing.producer_id.is_none() && quote.producer_id.is_some() {
                    existing.producer_id = quote.producer_id.clone();
                }
                existing.active = true;
                existing.updated_at = Utc::now().naive_utc();
            } else {
                let id = existing.id.clone();
                let created_at = existing.created_at;
                *existing = quote.clone();
                existing.id = id;
                existing.created_at = created_at;
                existing.updated_at = Utc::now().naive_utc();
                existing.active = true;
            }
            return Ok(UpsertOutcome::Updated);
        }

        inner.quotes.push(quote.clone());
        Ok(UpsertOutcome::Created)
    }

    async fn upsert_sale(&self, sale: &Sale) -> Result<(UpsertOutcome, Sale)> {
        let mut inner = self.inner.lock().await;

        let key = crate::normalize::household_key(
            &sale.first_name,
            &sale.last_name,
            &sale.postal_code,
        );

        if let Some(existing) = inner.sales.iter_mut().find(|s| {
            s.agency_id == sale.agency_id
                && s.sale_date == sale.sale_date
                && s.product_type.eq_ignore_ascii_case(&sale.product_type)
                && crate::normalize::household_key(&s.first_name, &s.last_name, &s.postal_code)
                    == key
        }) {
            let id = existing.id.clone();
            let created_at = existing.created_at;
            let match_state = existing.match_state;
            let household_id = existing.household_id.clone();
            *existing = sale.clone();
            existing.id = id;
            existing.created_at = created_at;
            existing.updated_at = Utc::now().naive_utc();
            existing.active = true;
            // Decided sales keep their resolution across re-ingestion.
            if match_state.is_decided() {
                existing.match_state = match_state;
                existing.household_id = household_id;
            }
            return Ok((UpsertOutcome::Updated, existing.clone()));
        }

        inner.sales.push(sale.clone());
        Ok((UpsertOutcome::Created, sale.clone()))
    }

    async fn update_sale(&self, sale: &Sale) -> Result<()> {
        let mut inner = self.inner.lock().await;
        let slot = inner
            .sales
            .iter_mut()
            .find(|s| s.id == sale.id)
            .ok_or_else(|| anyhow!("sale {} not found", sale.id.0))?;
        *slot = sale.clone();
        Ok(())
    }

    async fn deactivate_report_type(
        &self,
        agency_id: &AgencyId,
        report_type: &str,
    ) -> Result<usize> {
        let mut inner = self.inner.lock().await;
        let mut count = 0;

        for quote in inner.quotes.iter_mut() {
            if quote.active && &quote.agency_id == agency_id && quote.report_type == report_type {
                quote.active = false;
                quote.updated_at = Utc::now().naive_utc();
                count += 1;
            }
        }
        for sale in inner.sales.iter_mut() {
            if sale.active && &sale.agency_id == agency_id && sale.report_type == report_type {
                sale.active = false;
                sale.updated_at = Utc::now().naive_utc();
                count += 1;
            }
        }

        debug!(
            "Deactivated {} records of report type {:?} for agency {}",
            count, report_type, agency_id.0
        );
        Ok(count)
    }

    async fn latest_quote_for_household(&self, id: &HouseholdId) -> Result<Option<Quote>> {
        let inner = self.inner.lock().await;
        Ok(inner
            .quotes
            .iter()
            .filter(|q| q.active && &q.household_id == id)
            .max_by_key(|q| q.quote_date)
            .cloned())
    }

    async fn quoted_households_by_postal(
        &self,
        agency_id: &AgencyId,
        postal_code: &str,
    ) -> Result<Vec<(Household, Quote)>> {
        let inner = self.inner.lock().await;
        Ok(latest_active_quotes(&inner, agency_id)
            .into_iter()
            .filter(|(h, _)| h.postal_code == postal_code)
            .map(|(h, q)| (h.clone(), q.clone()))
            .collect())
    }

    async fn quoted_households_since(
        &self,
        agency_id: &AgencyId,
        since: NaiveDate,
    ) -> Result<Vec<(Household, Quote)>> {
        let inner = self.inner.lock().await;
        Ok(latest_active_quotes(&inner, agency_id)
            .into_iter()
            .filter(|(_, q)| q.quote_date >= since)
            .map(|(h, q)| (h.clone(), q.clone()))
            .collect())
    }

    async fn append_review_audit(
        &self,
        agency_id: &AgencyId,
        entry: &ReviewAuditEntry,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        inner.audits.push((agency_id.clone(), entry.clone()));
        Ok(())
    }
}
