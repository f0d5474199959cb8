//! MatchStore persistence port for the matching engine, with a Postgres
//! adapter and an in-memory adapter for tests and embedded use.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dealmatch_core::{
    Company, CompanyStatus, GeographicScope, Mandate, MandateStatus, MandateType, Match,
    MatchDetails, MatchStatus,
};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

pub const CRATE_NAME: &str = "dealmatch-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: Uuid) -> Self {
        Self::NotFound { kind, id }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        Self::Persistence(err.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(err: serde_json::Error) -> Self {
        Self::Persistence(format!("match_details (de)serialization: {err}"))
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence port consumed by the orchestrator. Companies and mandates are
/// read-only through this trait; `matches` rows are the only thing written.
/// Uniqueness on (company_id, mandate_id) is the adapter's responsibility:
/// `upsert_match` and `insert_match_if_absent` must be race-safe rather than
/// check-then-insert.
#[async_trait]
pub trait MatchStore: Send + Sync {
    async fn find_company(&self, id: Uuid) -> StoreResult<Company>;
    async fn find_mandate(&self, id: Uuid) -> StoreResult<Mandate>;
    async fn list_active_mandates(&self) -> StoreResult<Vec<Mandate>>;
    async fn list_active_companies(&self, limit: usize) -> StoreResult<Vec<Company>>;
    /// Active companies whose annual revenue falls inside the mandate's
    /// [min_revenue, max_revenue] window, capped at `limit`.
    async fn list_candidate_companies(
        &self,
        mandate: &Mandate,
        limit: usize,
    ) -> StoreResult<Vec<Company>>;
    async fn get_match(&self, company_id: Uuid, mandate_id: Uuid) -> StoreResult<Option<Match>>;
    /// Insert the row, or on (company_id, mandate_id) conflict replace its
    /// score, details and updated_at. created_at and status of an existing
    /// row are left alone.
    async fn upsert_match(&self, row: &Match) -> StoreResult<()>;
    /// Insert only when no row exists for the pair. Returns whether a row
    /// was written.
    async fn insert_match_if_absent(&self, row: &Match) -> StoreResult<bool>;
    /// Delete every match whose updated_at is older than the cutoff,
    /// returning the number of rows removed.
    async fn delete_stale_matches(&self, older_than: DateTime<Utc>) -> StoreResult<u64>;
}

pub async fn connect(database_url: &str) -> StoreResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(5)
        .connect(database_url)
        .await
        .map_err(StoreError::from)
}

pub async fn run_migrations(pool: &PgPool) -> StoreResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|err| StoreError::Persistence(err.to_string()))?;
    info!("store migrations applied");
    Ok(())
}

// ---------------------------------------------------------------------------
// Postgres adapter

pub struct PgMatchStore {
    pool: PgPool,
}

impl PgMatchStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn parse_vocab<T>(column: &str, raw: &str, parsed: Option<T>) -> StoreResult<T> {
    parsed.ok_or_else(|| StoreError::Persistence(format!("unknown {column} value {raw:?}")))
}

fn company_from_row(row: &PgRow) -> StoreResult<Company> {
    let scope_raw: String = row.try_get("geographic_scope")?;
    let status_raw: String = row.try_get("status")?;
    Ok(Company {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        industry: row.try_get("industry")?,
        country: row.try_get("country")?,
        region: row.try_get("region")?,
        geographic_scope: parse_vocab(
            "geographic_scope",
            &scope_raw,
            GeographicScope::parse(&scope_raw),
        )?,
        annual_revenue: row.try_get("annual_revenue")?,
        seller_ready: row.try_get("seller_ready")?,
        buyer_active: row.try_get("buyer_active")?,
        engagement_score: row.try_get("engagement_score")?,
        status: parse_vocab("status", &status_raw, CompanyStatus::parse(&status_raw))?,
    })
}

fn mandate_from_row(row: &PgRow) -> StoreResult<Mandate> {
    let type_raw: String = row.try_get("mandate_type")?;
    let status_raw: String = row.try_get("status")?;
    Ok(Mandate {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        mandate_type: parse_vocab("mandate_type", &type_raw, MandateType::parse(&type_raw))?,
        target_sectors: row.try_get("target_sectors")?,
        target_locations: row.try_get("target_locations")?,
        min_revenue: row.try_get("min_revenue")?,
        max_revenue: row.try_get("max_revenue")?,
        status: parse_vocab("status", &status_raw, MandateStatus::parse(&status_raw))?,
    })
}

fn match_from_row(row: &PgRow) -> StoreResult<Match> {
    let status_raw: String = row.try_get("status")?;
    let details_json: serde_json::Value = row.try_get("match_details")?;
    let match_details: MatchDetails = serde_json::from_value(details_json)?;
    Ok(Match {
        id: row.try_get("id")?,
        company_id: row.try_get("company_id")?,
        mandate_id: row.try_get("mandate_id")?,
        match_score: row.try_get("match_score")?,
        match_details,
        status: parse_vocab("status", &status_raw, MatchStatus::parse(&status_raw))?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const COMPANY_COLUMNS: &str = "id, name, industry, country, region, geographic_scope, \
     annual_revenue, seller_ready, buyer_active, engagement_score, status";

const MANDATE_COLUMNS: &str = "id, name, mandate_type, target_sectors, target_locations, \
     min_revenue, max_revenue, status";

const MATCH_COLUMNS: &str =
    "id, company_id, mandate_id, match_score, match_details, status, created_at, updated_at";

#[async_trait]
impl MatchStore for PgMatchStore {
    async fn find_company(&self, id: Uuid) -> StoreResult<Company> {
        let sql = format!("SELECT {COMPANY_COLUMNS} FROM companies WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("company", id))?;
        company_from_row(&row)
    }

    async fn find_mandate(&self, id: Uuid) -> StoreResult<Mandate> {
        let sql = format!("SELECT {MANDATE_COLUMNS} FROM mandates WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StoreError::not_found("mandate", id))?;
        mandate_from_row(&row)
    }

    async fn list_active_mandates(&self) -> StoreResult<Vec<Mandate>> {
        let sql =
            format!("SELECT {MANDATE_COLUMNS} FROM mandates WHERE status = 'active' ORDER BY name");
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;
        rows.iter().map(mandate_from_row).collect()
    }

    async fn list_active_companies(&self, limit: usize) -> StoreResult<Vec<Company>> {
        let sql = format!(
            "SELECT {COMPANY_COLUMNS} FROM companies WHERE status = 'activa' \
             ORDER BY name LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(company_from_row).collect()
    }

    async fn list_candidate_companies(
        &self,
        mandate: &Mandate,
        limit: usize,
    ) -> StoreResult<Vec<Company>> {
        let sql = format!(
            "SELECT {COMPANY_COLUMNS} FROM companies \
             WHERE status = 'activa' \
               AND annual_revenue >= $1 \
               AND ($2::DOUBLE PRECISION IS NULL OR annual_revenue <= $2) \
             ORDER BY annual_revenue DESC, name LIMIT $3"
        );
        let rows = sqlx::query(&sql)
            .bind(mandate.min_revenue)
            .bind(mandate.max_revenue)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(company_from_row).collect()
    }

    async fn get_match(&self, company_id: Uuid, mandate_id: Uuid) -> StoreResult<Option<Match>> {
        let sql = format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE company_id = $1 AND mandate_id = $2"
        );
        let row = sqlx::query(&sql)
            .bind(company_id)
            .bind(mandate_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(match_from_row).transpose()
    }

    async fn upsert_match(&self, row: &Match) -> StoreResult<()> {
        let details = serde_json::to_value(&row.match_details)?;
        sqlx::query(
            r#"
            INSERT INTO matches
                (id, company_id, mandate_id, match_score, match_details, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (company_id, mandate_id) DO UPDATE
               SET match_score = EXCLUDED.match_score,
                   match_details = EXCLUDED.match_details,
                   updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(row.id)
        .bind(row.company_id)
        .bind(row.mandate_id)
        .bind(row.match_score)
        .bind(details)
        .bind(row.status.as_str())
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_match_if_absent(&self, row: &Match) -> StoreResult<bool> {
        let details = serde_json::to_value(&row.match_details)?;
        let result = sqlx::query(
            r#"
            INSERT INTO matches
                (id, company_id, mandate_id, match_score, match_details, status, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            ON CONFLICT (company_id, mandate_id) DO NOTHING
            "#,
        )
        .bind(row.id)
        .bind(row.company_id)
        .bind(row.mandate_id)
        .bind(row.match_score)
        .bind(details)
        .bind(row.status.as_str())
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_stale_matches(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM matches WHERE updated_at < $1")
            .bind(older_than)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }
}

// ---------------------------------------------------------------------------
// In-memory adapter

/// Mutexed-map store used by engine/web tests and by embedders that run the
/// engine without Postgres. Same contract as `PgMatchStore`, including the
/// pair-uniqueness guarantee.
#[derive(Default)]
pub struct MemoryMatchStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    companies: HashMap<Uuid, Company>,
    mandates: HashMap<Uuid, Mandate>,
    matches: HashMap<(Uuid, Uuid), Match>,
}

impl MemoryMatchStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_company(&self, company: Company) {
        self.state.lock().await.companies.insert(company.id, company);
    }

    pub async fn put_mandate(&self, mandate: Mandate) {
        self.state.lock().await.mandates.insert(mandate.id, mandate);
    }

    /// Seed a match row directly, bypassing threshold and policy checks.
    pub async fn put_match(&self, row: Match) {
        self.state
            .lock()
            .await
            .matches
            .insert((row.company_id, row.mandate_id), row);
    }

    pub async fn match_count(&self) -> usize {
        self.state.lock().await.matches.len()
    }

    pub async fn matches_snapshot(&self) -> Vec<Match> {
        let state = self.state.lock().await;
        let mut rows: Vec<Match> = state.matches.values().cloned().collect();
        rows.sort_by_key(|m| (m.company_id, m.mandate_id));
        rows
    }
}

#[async_trait]
impl MatchStore for MemoryMatchStore {
    async fn find_company(&self, id: Uuid) -> StoreResult<Company> {
        self.state
            .lock()
            .await
            .companies
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("company", id))
    }

    async fn find_mandate(&self, id: Uuid) -> StoreResult<Mandate> {
        self.state
            .lock()
            .await
            .mandates
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("mandate", id))
    }

    async fn list_active_mandates(&self) -> StoreResult<Vec<Mandate>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Mandate> = state
            .mandates
            .values()
            .filter(|m| m.is_active())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(rows)
    }

    async fn list_active_companies(&self, limit: usize) -> StoreResult<Vec<Company>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Company> = state
            .companies
            .values()
            .filter(|c| c.is_active())
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.name.cmp(&b.name));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn list_candidate_companies(
        &self,
        mandate: &Mandate,
        limit: usize,
    ) -> StoreResult<Vec<Company>> {
        let state = self.state.lock().await;
        let mut rows: Vec<Company> = state
            .companies
            .values()
            .filter(|c| c.is_active() && mandate.revenue_in_range(c.annual_revenue))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            b.annual_revenue
                .total_cmp(&a.annual_revenue)
                .then_with(|| a.name.cmp(&b.name))
        });
        rows.truncate(limit);
        Ok(rows)
    }

    async fn get_match(&self, company_id: Uuid, mandate_id: Uuid) -> StoreResult<Option<Match>> {
        Ok(self
            .state
            .lock()
            .await
            .matches
            .get(&(company_id, mandate_id))
            .cloned())
    }

    async fn upsert_match(&self, row: &Match) -> StoreResult<()> {
        let mut state = self.state.lock().await;
        let key = (row.company_id, row.mandate_id);
        match state.matches.get_mut(&key) {
            Some(existing) => {
                existing.match_score = row.match_score;
                existing.match_details = row.match_details.clone();
                existing.updated_at = row.updated_at;
            }
            None => {
                state.matches.insert(key, row.clone());
            }
        }
        Ok(())
    }

    async fn insert_match_if_absent(&self, row: &Match) -> StoreResult<bool> {
        let mut state = self.state.lock().await;
        let key = (row.company_id, row.mandate_id);
        if state.matches.contains_key(&key) {
            return Ok(false);
        }
        state.matches.insert(key, row.clone());
        Ok(true)
    }

    async fn delete_stale_matches(&self, older_than: DateTime<Utc>) -> StoreResult<u64> {
        let mut state = self.state.lock().await;
        let before = state.matches.len();
        state.matches.retain(|_, m| m.updated_at >= older_than);
        Ok((before - state.matches.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use dealmatch_core::{CategoryOutcome, GeographicScope};

    fn company(name: &str, revenue: f64, status: CompanyStatus) -> Company {
        Company {
            id: Uuid::new_v4(),
            name: name.to_string(),
            industry: "industrial".into(),
            country: Some("España".into()),
            region: None,
            geographic_scope: GeographicScope::Nacional,
            annual_revenue: revenue,
            seller_ready: true,
            buyer_active: false,
            engagement_score: 60,
            status,
        }
    }

    fn mandate(min: f64, max: Option<f64>) -> Mandate {
        Mandate {
            id: Uuid::new_v4(),
            name: "Buy-side industrials".into(),
            mandate_type: MandateType::Compra,
            target_sectors: vec!["industrial".into()],
            target_locations: vec!["España".into()],
            min_revenue: min,
            max_revenue: max,
            status: MandateStatus::Active,
        }
    }

    fn match_row(company_id: Uuid, mandate_id: Uuid, score: i32, updated_at: DateTime<Utc>) -> Match {
        let outcome = CategoryOutcome::full(score);
        Match {
            id: Uuid::new_v4(),
            company_id,
            mandate_id,
            match_score: score,
            match_details: MatchDetails {
                industry: outcome,
                geography: CategoryOutcome::miss(),
                revenue: CategoryOutcome::miss(),
                readiness: CategoryOutcome::miss(),
                engagement: CategoryOutcome::miss(),
                calculated_at: updated_at,
            },
            status: MatchStatus::New,
            created_at: updated_at,
            updated_at,
        }
    }

    #[tokio::test]
    async fn missing_company_is_not_found() {
        let store = MemoryMatchStore::new();
        let err = store.find_company(Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn candidate_listing_filters_status_and_revenue() {
        let store = MemoryMatchStore::new();
        store.put_company(company("in-range", 5e6, CompanyStatus::Activa)).await;
        store.put_company(company("too-small", 1e5, CompanyStatus::Activa)).await;
        store.put_company(company("too-big", 5e8, CompanyStatus::Activa)).await;
        store.put_company(company("inactive", 5e6, CompanyStatus::Inactiva)).await;

        let rows = store
            .list_candidate_companies(&mandate(1e6, Some(1e7)), 50)
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].name, "in-range");
    }

    #[tokio::test]
    async fn candidate_listing_respects_page_cap() {
        let store = MemoryMatchStore::new();
        for i in 0..10 {
            store
                .put_company(company(&format!("c{i:02}"), 2e6, CompanyStatus::Activa))
                .await;
        }
        let rows = store
            .list_candidate_companies(&mandate(1e6, None), 4)
            .await
            .unwrap();
        assert_eq!(rows.len(), 4);
    }

    #[tokio::test]
    async fn upsert_keeps_one_row_per_pair() {
        let store = MemoryMatchStore::new();
        let (company_id, mandate_id) = (Uuid::new_v4(), Uuid::new_v4());
        let first = match_row(company_id, mandate_id, 60, Utc::now());
        store.upsert_match(&first).await.unwrap();

        let mut second = match_row(company_id, mandate_id, 80, Utc::now());
        second.id = Uuid::new_v4();
        store.upsert_match(&second).await.unwrap();

        assert_eq!(store.match_count().await, 1);
        let stored = store.get_match(company_id, mandate_id).await.unwrap().unwrap();
        assert_eq!(stored.match_score, 80);
        // Row identity and creation time survive the in-place update.
        assert_eq!(stored.id, first.id);
        assert_eq!(stored.created_at, first.created_at);
    }

    #[tokio::test]
    async fn insert_if_absent_never_overwrites() {
        let store = MemoryMatchStore::new();
        let (company_id, mandate_id) = (Uuid::new_v4(), Uuid::new_v4());
        let first = match_row(company_id, mandate_id, 72, Utc::now());
        assert!(store.insert_match_if_absent(&first).await.unwrap());

        let second = match_row(company_id, mandate_id, 99, Utc::now());
        assert!(!store.insert_match_if_absent(&second).await.unwrap());

        let stored = store.get_match(company_id, mandate_id).await.unwrap().unwrap();
        assert_eq!(stored.match_score, 72);
    }

    #[tokio::test]
    async fn stale_deletion_is_age_based_only() {
        let store = MemoryMatchStore::new();
        let now = Utc::now();
        let old = match_row(Uuid::new_v4(), Uuid::new_v4(), 95, now - Duration::days(31));
        let fresh = match_row(Uuid::new_v4(), Uuid::new_v4(), 51, now - Duration::days(29));
        store.put_match(old).await;
        store.put_match(fresh.clone()).await;

        let removed = store
            .delete_stale_matches(now - Duration::days(30))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        let remaining = store.matches_snapshot().await;
        assert_eq!(remaining.len(), 1);
        // The high-score row went; age is the only criterion.
        assert_eq!(remaining[0].match_score, 51);
    }
}
