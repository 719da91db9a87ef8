//! Keyed persistence for opportunities, the analysis side table, and organizations.
//!
//! Every opportunity write is an upsert on `notice_id`: a colliding key overwrites all
//! fields of the existing row (last write wins) and keeps its surrogate `id`.

use std::cmp::Reverse;
use std::collections::HashMap;

use afois_core::{
    AnalysisRecord, AnalysisResult, BondingStatus, IncumbentData, Opportunity, Organization,
    Recommendation, ScoredOpportunity, Source, StoredOpportunity,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("write rejected: {0}")]
    Rejected(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

#[async_trait]
pub trait OpportunityStore: Send + Sync {
    async fn upsert_opportunity(&self, opportunity: &Opportunity)
        -> Result<UpsertOutcome, StoreError>;

    async fn count_opportunities(&self) -> Result<u64, StoreError>;

    async fn opportunity_by_id(&self, id: Uuid) -> Result<Option<StoredOpportunity>, StoreError>;

    async fn opportunity_by_notice_id(
        &self,
        notice_id: &str,
    ) -> Result<Option<StoredOpportunity>, StoreError>;

    /// Highest analysis score first, unscored rows last; ties go to the most recently updated.
    async fn list_opportunities(&self, limit: usize) -> Result<Vec<StoredOpportunity>, StoreError>;

    async fn organization(&self, id: Uuid) -> Result<Option<Organization>, StoreError>;
}

#[async_trait]
pub trait AnalysisStore: Send + Sync {
    async fn analysis_record(&self, opportunity_id: Uuid)
        -> Result<Option<AnalysisRecord>, StoreError>;

    /// Writes score fields only; incumbent data and the notification flag are preserved.
    async fn upsert_analysis(&self, analysis: &AnalysisResult) -> Result<(), StoreError>;

    /// Writes incumbent data only; an existing score is preserved.
    async fn upsert_incumbent(
        &self,
        opportunity_id: Uuid,
        data: &IncumbentData,
    ) -> Result<(), StoreError>;

    /// Scored, not-yet-notified opportunities at or above `min_score`, best first.
    async fn pending_digest(
        &self,
        min_score: u8,
        limit: usize,
    ) -> Result<Vec<ScoredOpportunity>, StoreError>;

    async fn mark_notified(&self, opportunity_id: Uuid) -> Result<(), StoreError>;
}

#[derive(Debug, Default)]
struct MemoryState {
    opportunities: HashMap<String, StoredOpportunity>,
    analyses: HashMap<Uuid, AnalysisRecord>,
    organizations: HashMap<Uuid, Organization>,
}

/// Process-local store used when no database is configured, and in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn put_organization(&self, org: Organization) {
        self.state.write().await.organizations.insert(org.id, org);
    }
}

#[async_trait]
impl OpportunityStore for MemoryStore {
    async fn upsert_opportunity(
        &self,
        opportunity: &Opportunity,
    ) -> Result<UpsertOutcome, StoreError> {
        let now = Utc::now();
        let mut state = self.state.write().await;
        match state.opportunities.get_mut(&opportunity.notice_id) {
            Some(existing) => {
                existing.opportunity = opportunity.clone();
                existing.updated_at = now;
                Ok(UpsertOutcome::Updated)
            }
            None => {
                state.opportunities.insert(
                    opportunity.notice_id.clone(),
                    StoredOpportunity {
                        id: Uuid::new_v4(),
                        created_at: now,
                        updated_at: now,
                        opportunity: opportunity.clone(),
                    },
                );
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn count_opportunities(&self) -> Result<u64, StoreError> {
        Ok(self.state.read().await.opportunities.len() as u64)
    }

    async fn opportunity_by_id(&self, id: Uuid) -> Result<Option<StoredOpportunity>, StoreError> {
        let state = self.state.read().await;
        Ok(state.opportunities.values().find(|o| o.id == id).cloned())
    }

    async fn opportunity_by_notice_id(
        &self,
        notice_id: &str,
    ) -> Result<Option<StoredOpportunity>, StoreError> {
        Ok(self.state.read().await.opportunities.get(notice_id).cloned())
    }

    async fn list_opportunities(&self, limit: usize) -> Result<Vec<StoredOpportunity>, StoreError> {
        let state = self.state.read().await;
        let score = |id: Uuid| {
            state
                .analyses
                .get(&id)
                .and_then(|record| record.analysis.as_ref())
                .map(|analysis| analysis.pwin_score)
        };
        let mut rows = state.opportunities.values().cloned().collect::<Vec<_>>();
        rows.sort_by_key(|o| (Reverse(score(o.id)), Reverse(o.updated_at)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn organization(&self, id: Uuid) -> Result<Option<Organization>, StoreError> {
        Ok(self.state.read().await.organizations.get(&id).cloned())
    }
}

#[async_trait]
impl AnalysisStore for MemoryStore {
    async fn analysis_record(
        &self,
        opportunity_id: Uuid,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        Ok(self.state.read().await.analyses.get(&opportunity_id).cloned())
    }

    async fn upsert_analysis(&self, analysis: &AnalysisResult) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        ensure_known(&state, analysis.opportunity_id)?;
        state
            .analyses
            .entry(analysis.opportunity_id)
            .or_insert_with(|| empty_record(analysis.opportunity_id))
            .analysis = Some(analysis.clone());
        Ok(())
    }

    async fn upsert_incumbent(
        &self,
        opportunity_id: Uuid,
        data: &IncumbentData,
    ) -> Result<(), StoreError> {
        let mut state = self.state.write().await;
        ensure_known(&state, opportunity_id)?;
        state
            .analyses
            .entry(opportunity_id)
            .or_insert_with(|| empty_record(opportunity_id))
            .incumbent_data = Some(data.clone());
        Ok(())
    }

    async fn pending_digest(
        &self,
        min_score: u8,
        limit: usize,
    ) -> Result<Vec<ScoredOpportunity>, StoreError> {
        let state = self.state.read().await;
        let mut scored = state
            .opportunities
            .values()
            .filter_map(|opp| {
                let record = state.analyses.get(&opp.id)?;
                let analysis = record.analysis.as_ref()?;
                (!record.notification_sent && analysis.pwin_score >= min_score).then(|| {
                    ScoredOpportunity {
                        opportunity: opp.clone(),
                        analysis: analysis.clone(),
                    }
                })
            })
            .collect::<Vec<_>>();
        scored.sort_by(|a, b| {
            b.analysis
                .pwin_score
                .cmp(&a.analysis.pwin_score)
                .then_with(|| b.opportunity.updated_at.cmp(&a.opportunity.updated_at))
        });
        scored.truncate(limit);
        Ok(scored)
    }

    async fn mark_notified(&self, opportunity_id: Uuid) -> Result<(), StoreError> {
        if let Some(record) = self.state.write().await.analyses.get_mut(&opportunity_id) {
            record.notification_sent = true;
        }
        Ok(())
    }
}

fn ensure_known(state: &MemoryState, opportunity_id: Uuid) -> Result<(), StoreError> {
    if state.opportunities.values().any(|o| o.id == opportunity_id) {
        Ok(())
    } else {
        Err(StoreError::Rejected(format!(
            "no opportunity with id {opportunity_id}"
        )))
    }
}

fn empty_record(opportunity_id: Uuid) -> AnalysisRecord {
    AnalysisRecord {
        opportunity_id,
        analysis: None,
        incumbent_data: None,
        notification_sent: false,
    }
}

/// PostgreSQL-backed store. Schema lives in `migrations/`.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

const OPPORTUNITY_COLUMNS: &str = r#"
    o.id, o.created_at, o.updated_at, o.source, o.notice_id, o.title, o.agency,
    o.solicitation_number, o.naics_code, o.set_aside, o.type, o.posted_date,
    o.response_deadline, o.site_visit_date, o.place_of_performance_state, o.raw_json
"#;

const ANALYSIS_COLUMNS: &str = r#"
    a.opportunity_id, a.pwin_score, a.recommendation, a.bonding_status, a.summary,
    a.reasoning, a.analyzed_at, a.incumbent_data, a.notification_sent
"#;

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        info!("database migrations applied");
        Ok(())
    }
}

fn stored_from_row(row: &PgRow) -> Result<StoredOpportunity, StoreError> {
    let source: String = row.try_get("source")?;
    let source = source
        .parse::<Source>()
        .map_err(|e| StoreError::Corrupt(e.to_string()))?;
    Ok(StoredOpportunity {
        id: row.try_get("id")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        opportunity: Opportunity {
            source,
            notice_id: row.try_get("notice_id")?,
            title: row.try_get("title")?,
            agency: row.try_get("agency")?,
            solicitation_number: row.try_get("solicitation_number")?,
            naics_code: row.try_get("naics_code")?,
            set_aside: row.try_get("set_aside")?,
            notice_type: row.try_get("type")?,
            posted_date: row.try_get("posted_date")?,
            response_deadline: row.try_get("response_deadline")?,
            site_visit_date: row.try_get("site_visit_date")?,
            place_of_performance_state: row.try_get("place_of_performance_state")?,
            raw_payload: row.try_get("raw_json")?,
        },
    })
}

fn analysis_from_row(row: &PgRow) -> Result<Option<AnalysisResult>, StoreError> {
    let score: Option<i16> = row.try_get("pwin_score")?;
    let recommendation: Option<String> = row.try_get("recommendation")?;
    let (Some(score), Some(recommendation)) = (score, recommendation) else {
        return Ok(None);
    };
    let bonding: Option<String> = row.try_get("bonding_status")?;
    let analyzed_at: Option<DateTime<Utc>> = row.try_get("analyzed_at")?;
    Ok(Some(AnalysisResult {
        opportunity_id: row.try_get("opportunity_id")?,
        pwin_score: AnalysisResult::clamp_score(f64::from(score)),
        recommendation: recommendation
            .parse::<Recommendation>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        bonding_status: bonding
            .as_deref()
            .unwrap_or_default()
            .parse::<BondingStatus>()
            .unwrap_or(BondingStatus::Unknown),
        summary: row
            .try_get::<Option<String>, _>("summary")?
            .unwrap_or_default(),
        reasoning: row.try_get("reasoning")?,
        analyzed_at: analyzed_at.unwrap_or_else(Utc::now),
    }))
}

#[async_trait]
impl OpportunityStore for PgStore {
    async fn upsert_opportunity(
        &self,
        opportunity: &Opportunity,
    ) -> Result<UpsertOutcome, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO opportunities (
                source, notice_id, title, agency, solicitation_number, naics_code,
                set_aside, type, posted_date, response_deadline, site_visit_date,
                place_of_performance_state, raw_json
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (notice_id) DO UPDATE SET
                source = EXCLUDED.source,
                title = EXCLUDED.title,
                agency = EXCLUDED.agency,
                solicitation_number = EXCLUDED.solicitation_number,
                naics_code = EXCLUDED.naics_code,
                set_aside = EXCLUDED.set_aside,
                type = EXCLUDED.type,
                posted_date = EXCLUDED.posted_date,
                response_deadline = EXCLUDED.response_deadline,
                site_visit_date = EXCLUDED.site_visit_date,
                place_of_performance_state = EXCLUDED.place_of_performance_state,
                raw_json = EXCLUDED.raw_json,
                updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        )
        .bind(opportunity.source.as_str())
        .bind(&opportunity.notice_id)
        .bind(&opportunity.title)
        .bind(&opportunity.agency)
        .bind(&opportunity.solicitation_number)
        .bind(&opportunity.naics_code)
        .bind(&opportunity.set_aside)
        .bind(&opportunity.notice_type)
        .bind(&opportunity.posted_date)
        .bind(&opportunity.response_deadline)
        .bind(&opportunity.site_visit_date)
        .bind(&opportunity.place_of_performance_state)
        .bind(&opportunity.raw_payload)
        .fetch_one(&self.pool)
        .await?;

        let inserted: bool = row.try_get("inserted")?;
        Ok(if inserted {
            UpsertOutcome::Inserted
        } else {
            UpsertOutcome::Updated
        })
    }

    async fn count_opportunities(&self) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM opportunities")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }

    async fn opportunity_by_id(&self, id: Uuid) -> Result<Option<StoredOpportunity>, StoreError> {
        let sql = format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities o WHERE o.id = $1");
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(stored_from_row).transpose()
    }

    async fn opportunity_by_notice_id(
        &self,
        notice_id: &str,
    ) -> Result<Option<StoredOpportunity>, StoreError> {
        let sql =
            format!("SELECT {OPPORTUNITY_COLUMNS} FROM opportunities o WHERE o.notice_id = $1");
        let row = sqlx::query(&sql)
            .bind(notice_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(stored_from_row).transpose()
    }

    async fn list_opportunities(&self, limit: usize) -> Result<Vec<StoredOpportunity>, StoreError> {
        let sql = format!(
            "SELECT {OPPORTUNITY_COLUMNS} \
               FROM opportunities o \
               LEFT JOIN ai_analysis a ON a.opportunity_id = o.id \
              ORDER BY a.pwin_score DESC NULLS LAST, o.updated_at DESC, o.created_at DESC \
              LIMIT $1"
        );
        let rows = sqlx::query(&sql)
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(stored_from_row).collect()
    }

    async fn organization(&self, id: Uuid) -> Result<Option<Organization>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, bonding_capacity, target_naics, target_states, qualified_set_asides
              FROM organizations
             WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else { return Ok(None) };
        Ok(Some(Organization {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            bonding_capacity: row.try_get("bonding_capacity")?,
            target_naics: row.try_get("target_naics")?,
            target_states: row.try_get("target_states")?,
            qualified_set_asides: row.try_get("qualified_set_asides")?,
        }))
    }
}

#[async_trait]
impl AnalysisStore for PgStore {
    async fn analysis_record(
        &self,
        opportunity_id: Uuid,
    ) -> Result<Option<AnalysisRecord>, StoreError> {
        let sql = format!("SELECT {ANALYSIS_COLUMNS} FROM ai_analysis a WHERE a.opportunity_id = $1");
        let row = sqlx::query(&sql)
            .bind(opportunity_id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(None) };

        let incumbent: Option<JsonValue> = row.try_get("incumbent_data")?;
        Ok(Some(AnalysisRecord {
            opportunity_id,
            analysis: analysis_from_row(&row)?,
            incumbent_data: incumbent.map(serde_json::from_value).transpose()?,
            notification_sent: row.try_get("notification_sent")?,
        }))
    }

    async fn upsert_analysis(&self, analysis: &AnalysisResult) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO ai_analysis (
                opportunity_id, pwin_score, recommendation, bonding_status, summary,
                reasoning, analyzed_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (opportunity_id) DO UPDATE SET
                pwin_score = EXCLUDED.pwin_score,
                recommendation = EXCLUDED.recommendation,
                bonding_status = EXCLUDED.bonding_status,
                summary = EXCLUDED.summary,
                reasoning = EXCLUDED.reasoning,
                analyzed_at = EXCLUDED.analyzed_at
            "#,
        )
        .bind(analysis.opportunity_id)
        .bind(i16::from(analysis.pwin_score))
        .bind(analysis.recommendation.as_str())
        .bind(analysis.bonding_status.as_str())
        .bind(&analysis.summary)
        .bind(&analysis.reasoning)
        .bind(analysis.analyzed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn upsert_incumbent(
        &self,
        opportunity_id: Uuid,
        data: &IncumbentData,
    ) -> Result<(), StoreError> {
        let value = serde_json::to_value(data)?;
        sqlx::query(
            r#"
            INSERT INTO ai_analysis (opportunity_id, incumbent_data)
            VALUES ($1, $2)
            ON CONFLICT (opportunity_id) DO UPDATE SET incumbent_data = EXCLUDED.incumbent_data
            "#,
        )
        .bind(opportunity_id)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn pending_digest(
        &self,
        min_score: u8,
        limit: usize,
    ) -> Result<Vec<ScoredOpportunity>, StoreError> {
        let sql = format!(
            "SELECT {OPPORTUNITY_COLUMNS}, {ANALYSIS_COLUMNS} \
               FROM opportunities o \
               JOIN ai_analysis a ON a.opportunity_id = o.id \
              WHERE a.pwin_score >= $1 \
                AND a.recommendation IS NOT NULL \
                AND a.notification_sent = FALSE \
              ORDER BY a.pwin_score DESC, o.updated_at DESC \
              LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(i16::from(min_score))
            .bind(limit as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            let opportunity = stored_from_row(row)?;
            if let Some(analysis) = analysis_from_row(row)? {
                out.push(ScoredOpportunity {
                    opportunity,
                    analysis,
                });
            }
        }
        Ok(out)
    }

    async fn mark_notified(&self, opportunity_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE ai_analysis SET notification_sent = TRUE WHERE opportunity_id = $1")
            .bind(opportunity_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use afois_core::{DEFAULT_AGENCY, DEFAULT_TITLE};

    fn opportunity(notice_id: &str, title: &str) -> Opportunity {
        Opportunity {
            source: Source::Sam,
            notice_id: notice_id.to_string(),
            title: title.to_string(),
            agency: DEFAULT_AGENCY.to_string(),
            solicitation_number: None,
            naics_code: Some("236220".into()),
            set_aside: None,
            notice_type: Some("Solicitation".into()),
            posted_date: Some("2026-01-05".into()),
            response_deadline: None,
            site_visit_date: None,
            place_of_performance_state: Some("AK".into()),
            raw_payload: serde_json::json!({ "noticeId": notice_id }),
        }
    }

    fn analysis(opportunity_id: Uuid, score: u8) -> AnalysisResult {
        AnalysisResult {
            opportunity_id,
            pwin_score: score,
            recommendation: Recommendation::Pursue,
            bonding_status: BondingStatus::Ok,
            summary: "fits".into(),
            reasoning: None,
            analyzed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn colliding_notice_id_updates_in_place() {
        let store = MemoryStore::new();
        let first = store
            .upsert_opportunity(&opportunity("N-1", DEFAULT_TITLE))
            .await
            .unwrap();
        let original_id = store.opportunity_by_notice_id("N-1").await.unwrap().unwrap().id;
        let second = store
            .upsert_opportunity(&opportunity("N-1", "Hangar Repair"))
            .await
            .unwrap();

        assert_eq!(first, UpsertOutcome::Inserted);
        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(store.count_opportunities().await.unwrap(), 1);
        let stored = store.opportunity_by_notice_id("N-1").await.unwrap().unwrap();
        assert_eq!(stored.id, original_id);
        assert_eq!(stored.opportunity.title, "Hangar Repair");
    }

    #[tokio::test]
    async fn incumbent_write_preserves_existing_score() {
        let store = MemoryStore::new();
        store.upsert_opportunity(&opportunity("N-2", "Dock")).await.unwrap();
        let id = store.opportunity_by_notice_id("N-2").await.unwrap().unwrap().id;

        store.upsert_analysis(&analysis(id, 81)).await.unwrap();
        store
            .upsert_incumbent(
                id,
                &IncumbentData::from_awards(&["Borealis LLC".to_string()], vec![]),
            )
            .await
            .unwrap();

        let record = store.analysis_record(id).await.unwrap().unwrap();
        assert_eq!(record.analysis.unwrap().pwin_score, 81);
        assert_eq!(record.incumbent_data.unwrap().identified_incumbent, "Borealis LLC");
    }

    #[tokio::test]
    async fn analysis_for_unknown_opportunity_is_rejected() {
        let store = MemoryStore::new();
        let err = store.upsert_analysis(&analysis(Uuid::new_v4(), 50)).await.unwrap_err();
        assert!(matches!(err, StoreError::Rejected(_)));
    }

    #[tokio::test]
    async fn listing_ranks_by_score_before_recency() {
        let store = MemoryStore::new();
        store.upsert_opportunity(&opportunity("OLD", "Old")).await.unwrap();
        let old = store.opportunity_by_notice_id("OLD").await.unwrap().unwrap().id;
        store.upsert_analysis(&analysis(old, 88)).await.unwrap();
        for notice in ["NEW-1", "NEW-2"] {
            store.upsert_opportunity(&opportunity(notice, notice)).await.unwrap();
        }

        let top = store.list_opportunities(1).await.unwrap();
        assert_eq!(top[0].opportunity.notice_id, "OLD");
        let all = store.list_opportunities(10).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, old);
    }

    #[tokio::test]
    async fn pending_digest_orders_filters_and_respects_notified_flag() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for (notice, score) in [("A", 90u8), ("B", 65), ("C", 75)] {
            store.upsert_opportunity(&opportunity(notice, notice)).await.unwrap();
            let id = store.opportunity_by_notice_id(notice).await.unwrap().unwrap().id;
            store.upsert_analysis(&analysis(id, score)).await.unwrap();
            ids.push(id);
        }

        let pending = store.pending_digest(70, 20).await.unwrap();
        let notices = pending
            .iter()
            .map(|s| s.opportunity.opportunity.notice_id.as_str())
            .collect::<Vec<_>>();
        assert_eq!(notices, vec!["A", "C"]);

        store.mark_notified(ids[0]).await.unwrap();
        let pending = store.pending_digest(70, 20).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].opportunity.opportunity.notice_id, "C");
    }
}
