//! Ingestion pipeline: category loop, retry driver, filtering, upsert sink and run report.
//!
//! A run walks the adapter's categories strictly in order. Each page fetch is wrapped by the
//! retry driver; a category that fails or stays rate limited is recorded and skipped, and the
//! run moves on. Only configuration problems abort a run, and they do so before any request.

use std::collections::BTreeMap;
use std::ops::Add;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use afois_adapters::sam::{DEFAULT_SAM_BASE_URL, DEFAULT_SAM_PAGE_SIZE};
use afois_adapters::subnet::DEFAULT_SUBNET_FEED_URL;
use afois_adapters::usaspending::DEFAULT_USASPENDING_BASE_URL;
use afois_adapters::{
    normalize, AdapterContext, AdapterError, Category, DateWindow, RawRecord, SamAdapter,
    SourceAdapter, SourcePage, SubnetAdapter,
};
use afois_core::{classify_set_aside, SetAsideTier, Source, TargetingConfig};
use afois_storage::{
    AnalysisStore, AttemptOutcome, BackoffPolicy, HttpClientConfig, HttpFetcher, MemoryStore,
    OpportunityStore, PgStore, ResponseArchive, RetryState, StoreError, UpsertOutcome,
};
use anyhow::Context;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

pub mod analysis;
pub mod filter;
pub mod incumbents;

pub use analysis::{
    analyze_opportunity, draft_capability, parse_score_response, render_digest,
    run_daily_digest, Digest, DigestOutcome, DraftingService, HttpScoringService,
    LogNotificationService, NotificationService, ScoreResponse, ScoringInput, ScoringService,
    ServiceError, TemplateDraftingService,
};
pub use filter::{keyword_matches, naics_matches, GeoFilter, RecordFilter};
pub use incumbents::IncumbentService;

pub const DEFAULT_LOOKBACK_DAYS: u32 = 365;
pub const DEFAULT_INGEST_CRON: &str = "0 0 6 * * *";
pub const DEFAULT_DIGEST_MIN_SCORE: u8 = 70;
pub const DEFAULT_DIGEST_LIMIT: usize = 20;
/// Upper bound on error strings kept in a run report.
pub const MAX_ERROR_SAMPLES: usize = 25;
const UNSPECIFIED_STATE: &str = "UNSPECIFIED";

#[derive(Debug, Clone)]
pub struct IngestConfig {
    pub database_url: Option<String>,
    pub sam_api_key: Option<String>,
    pub sam_base_url: String,
    pub subnet_feed_url: String,
    pub usaspending_base_url: String,
    pub lookback_days: u32,
    pub sam_page_size: usize,
    pub http_timeout_secs: u64,
    pub user_agent: String,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub retry_increment_ms: u64,
    pub targets_file: Option<PathBuf>,
    pub artifacts_dir: Option<PathBuf>,
    pub scheduler_enabled: bool,
    pub ingest_cron: String,
    pub scoring_service_url: Option<String>,
    pub digest_min_score: u8,
    pub digest_limit: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        let backoff = BackoffPolicy::default();
        Self {
            database_url: None,
            sam_api_key: None,
            sam_base_url: DEFAULT_SAM_BASE_URL.to_string(),
            subnet_feed_url: DEFAULT_SUBNET_FEED_URL.to_string(),
            usaspending_base_url: DEFAULT_USASPENDING_BASE_URL.to_string(),
            lookback_days: DEFAULT_LOOKBACK_DAYS,
            sam_page_size: DEFAULT_SAM_PAGE_SIZE,
            http_timeout_secs: HttpClientConfig::default().timeout.as_secs(),
            user_agent: "afois-bot/0.1".to_string(),
            retry_max_attempts: backoff.max_attempts,
            retry_base_delay_ms: backoff.base_delay.as_millis() as u64,
            retry_increment_ms: backoff.increment.as_millis() as u64,
            targets_file: None,
            artifacts_dir: None,
            scheduler_enabled: false,
            ingest_cron: DEFAULT_INGEST_CRON.to_string(),
            scoring_service_url: None,
            digest_min_score: DEFAULT_DIGEST_MIN_SCORE,
            digest_limit: DEFAULT_DIGEST_LIMIT,
        }
    }
}

fn parse_or<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl IngestConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; unset, blank or unparsable values keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let text = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            database_url: text("DATABASE_URL"),
            sam_api_key: text("SAM_API_KEY"),
            sam_base_url: text("SAM_API_BASE_URL").unwrap_or(defaults.sam_base_url),
            subnet_feed_url: text("SUBNET_FEED_URL").unwrap_or(defaults.subnet_feed_url),
            usaspending_base_url: text("USASPENDING_API_BASE_URL")
                .unwrap_or(defaults.usaspending_base_url),
            lookback_days: parse_or(text("AFOIS_LOOKBACK_DAYS"), defaults.lookback_days),
            sam_page_size: parse_or(text("AFOIS_SAM_PAGE_SIZE"), defaults.sam_page_size),
            http_timeout_secs: parse_or(text("AFOIS_HTTP_TIMEOUT_SECS"), defaults.http_timeout_secs),
            user_agent: text("AFOIS_USER_AGENT").unwrap_or(defaults.user_agent),
            retry_max_attempts: parse_or(
                text("AFOIS_RETRY_MAX_ATTEMPTS"),
                defaults.retry_max_attempts,
            ),
            retry_base_delay_ms: parse_or(
                text("AFOIS_RETRY_BASE_DELAY_MS"),
                defaults.retry_base_delay_ms,
            ),
            retry_increment_ms: parse_or(
                text("AFOIS_RETRY_INCREMENT_MS"),
                defaults.retry_increment_ms,
            ),
            targets_file: text("AFOIS_TARGETS_FILE").map(PathBuf::from),
            artifacts_dir: text("ARTIFACTS_DIR").map(PathBuf::from),
            scheduler_enabled: text("AFOIS_SCHEDULER_ENABLED")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(defaults.scheduler_enabled),
            ingest_cron: text("AFOIS_INGEST_CRON").unwrap_or(defaults.ingest_cron),
            scoring_service_url: text("SCORING_SERVICE_URL"),
            digest_min_score: parse_or(text("AFOIS_DIGEST_MIN_SCORE"), defaults.digest_min_score)
                .min(100),
            digest_limit: parse_or(text("AFOIS_DIGEST_LIMIT"), defaults.digest_limit),
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.retry_max_attempts.max(1),
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            increment: Duration::from_millis(self.retry_increment_ms),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: Duration::from_secs(self.http_timeout_secs),
            user_agent: Some(self.user_agent.clone()),
        }
    }

    pub fn archive(&self) -> Option<ResponseArchive> {
        self.artifacts_dir.clone().map(ResponseArchive::new)
    }

    /// Compiled-in defaults, overlaid with the targets file when one is configured.
    pub fn targeting(&self) -> anyhow::Result<TargetingConfig> {
        let defaults = TargetingConfig::default();
        match &self.targets_file {
            Some(path) => Ok(TargetsFile::load(path)?.apply(defaults)),
            None => Ok(defaults),
        }
    }
}

/// Optional YAML overriding the default targeting lists. Empty lists keep the defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetsFile {
    #[serde(default)]
    pub naics: Vec<String>,
    #[serde(default)]
    pub states: Vec<String>,
    #[serde(default)]
    pub countries: Vec<String>,
    #[serde(default)]
    pub home_country: Option<String>,
    #[serde(default)]
    pub subnet_keywords: Vec<String>,
    #[serde(default)]
    pub qualified_set_asides: Vec<String>,
    #[serde(default)]
    pub bonding_capacity: Option<i64>,
}

impl TargetsFile {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    pub fn apply(self, mut base: TargetingConfig) -> TargetingConfig {
        let upper = |values: Vec<String>| {
            values
                .into_iter()
                .map(|v| v.trim().to_ascii_uppercase())
                .filter(|v| !v.is_empty())
                .collect::<Vec<_>>()
        };
        if !self.naics.is_empty() {
            base.target_categories = self.naics;
        }
        let states = upper(self.states);
        if !states.is_empty() {
            base.target_states = states.into_iter().collect();
        }
        let countries = upper(self.countries);
        if !countries.is_empty() {
            base.target_countries = countries.into_iter().collect();
        }
        if let Some(home) = self.home_country.filter(|h| !h.trim().is_empty()) {
            base.home_country = home.trim().to_ascii_uppercase();
        }
        if !self.subnet_keywords.is_empty() {
            base.subnet_keywords = self.subnet_keywords;
        }
        if !self.qualified_set_asides.is_empty() {
            base.qualified_set_asides = self.qualified_set_asides;
        }
        if let Some(capacity) = self.bonding_capacity.filter(|c| *c > 0) {
            base.bonding_capacity = Some(capacity);
        }
        base
    }
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("{0} not configured")]
    MissingCredential(&'static str),
    #[error("organization {0} not found")]
    UnknownOrganization(Uuid),
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RecordOutcome {
    Inserted,
    Updated,
    Filtered,
    Malformed,
    Errored,
}

/// Per-category or per-run counters. `processed` counts every raw record seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub processed: u64,
    pub inserted: u64,
    pub updated: u64,
    pub skipped_filter: u64,
    pub skipped_malformed: u64,
    pub errored: u64,
}

impl RunCounters {
    /// Successful writes, new or overwritten.
    pub fn written(&self) -> u64 {
        self.inserted + self.updated
    }

    fn with(self, outcome: RecordOutcome) -> Self {
        let mut next = Self {
            processed: self.processed + 1,
            ..self
        };
        match outcome {
            RecordOutcome::Inserted => next.inserted += 1,
            RecordOutcome::Updated => next.updated += 1,
            RecordOutcome::Filtered => next.skipped_filter += 1,
            RecordOutcome::Malformed => next.skipped_malformed += 1,
            RecordOutcome::Errored => next.errored += 1,
        }
        next
    }
}

impl Add for RunCounters {
    type Output = RunCounters;

    fn add(self, rhs: RunCounters) -> RunCounters {
        RunCounters {
            processed: self.processed + rhs.processed,
            inserted: self.inserted + rhs.inserted,
            updated: self.updated + rhs.updated,
            skipped_filter: self.skipped_filter + rhs.skipped_filter,
            skipped_malformed: self.skipped_malformed + rhs.skipped_malformed,
            errored: self.errored + rhs.errored,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Completed,
    Failed,
    Exhausted,
}

impl CategoryStatus {
    fn as_str(&self) -> &'static str {
        match self {
            CategoryStatus::Completed => "completed",
            CategoryStatus::Failed => "failed",
            CategoryStatus::Exhausted => "exhausted",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CategoryReport {
    pub category: String,
    pub status: CategoryStatus,
    pub pages: u32,
    /// HTTP requests issued, retries included.
    pub requests: u32,
    pub counters: RunCounters,
    #[serde(skip)]
    pub errors: Vec<String>,
    #[serde(skip)]
    pub state_distribution: BTreeMap<String, u64>,
    #[serde(skip)]
    pub set_aside_tiers: BTreeMap<SetAsideTier, u64>,
}

impl CategoryReport {
    fn new(category: &Category) -> Self {
        Self {
            category: category.to_string(),
            status: CategoryStatus::Completed,
            pages: 0,
            requests: 0,
            counters: RunCounters::default(),
            errors: Vec::new(),
            state_distribution: BTreeMap::new(),
            set_aside_tiers: BTreeMap::new(),
        }
    }

    fn record(&mut self, outcome: RecordOutcome, error: Option<String>) {
        self.counters = self.counters.with(outcome);
        if let Some(error) = error {
            self.push_error(error);
        }
    }

    fn push_error(&mut self, error: String) {
        if self.errors.len() < MAX_ERROR_SAMPLES {
            self.errors.push(error);
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DateRange {
    pub posted_from: String,
    pub posted_to: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct IngestDebug {
    pub naics_checked: usize,
    pub states_used: Vec<String>,
    pub errors: Vec<String>,
    pub state_distribution: BTreeMap<String, u64>,
    pub range: DateRange,
}

/// Run summary returned to the caller. `inserted` counts all successful writes.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub success: bool,
    pub run_id: Uuid,
    pub source: Source,
    pub processed: u64,
    pub inserted: u64,
    pub total_in_db: u64,
    pub report_text: String,
    pub counters: RunCounters,
    pub categories: Vec<CategoryReport>,
    pub debug: IngestDebug,
}

/// Result of driving one page fetch through the retry state machine.
#[derive(Debug)]
pub enum PageOutcome {
    Page { page: SourcePage, attempts: u32 },
    Failed { attempts: u32, error: AdapterError },
    Exhausted { attempts: u32, error: AdapterError },
}

/// Waits `policy.delay_for_attempt(n)` before attempt `n` (the first included) and retries
/// only on rate limiting.
pub async fn fetch_with_retry(
    policy: &BackoffPolicy,
    adapter: &dyn SourceAdapter,
    http: &HttpFetcher,
    ctx: &AdapterContext,
    category: &Category,
    offset: usize,
) -> PageOutcome {
    let mut state = policy.start();
    loop {
        let RetryState::Attempting { attempt } = state else {
            return PageOutcome::Failed {
                attempts: 0,
                error: AdapterError::Message(format!("retry loop left in state {state:?}")),
            };
        };

        let delay = policy.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let result = adapter.fetch_page(http, ctx, category, offset).await;
        let outcome = match &result {
            Ok(_) => AttemptOutcome::Success,
            Err(err) if err.is_rate_limited() => AttemptOutcome::RateLimited,
            Err(_) => AttemptOutcome::Failed,
        };
        state = policy.on_outcome(state, outcome);

        match (state, result) {
            (RetryState::Success { attempts }, Ok(page)) => {
                return PageOutcome::Page { page, attempts }
            }
            (RetryState::RateLimited { attempt }, Err(_)) => {
                warn!(
                    %category,
                    offset,
                    attempt = attempt + 1,
                    max_attempts = policy.max_attempts,
                    "rate limited; retrying"
                );
                state = state.resume();
            }
            (RetryState::Exhausted { attempts }, Err(error)) => {
                return PageOutcome::Exhausted { attempts, error }
            }
            (_, Err(error)) => {
                return PageOutcome::Failed {
                    attempts: attempt + 1,
                    error,
                }
            }
            (other, Ok(_)) => {
                return PageOutcome::Failed {
                    attempts: attempt + 1,
                    error: AdapterError::Message(format!("unexpected retry state {other:?}")),
                }
            }
        }
    }
}

pub struct IngestPipeline {
    config: IngestConfig,
    http: HttpFetcher,
    store: Arc<dyn OpportunityStore>,
    defaults: TargetingConfig,
}

impl IngestPipeline {
    pub fn new(
        config: IngestConfig,
        http: HttpFetcher,
        store: Arc<dyn OpportunityStore>,
        defaults: TargetingConfig,
    ) -> Self {
        Self {
            config,
            http,
            store,
            defaults,
        }
    }

    pub fn from_config(config: IngestConfig, store: Arc<dyn OpportunityStore>) -> anyhow::Result<Self> {
        let http = HttpFetcher::new(config.http_client_config())?;
        let defaults = config.targeting()?;
        Ok(Self::new(config, http, store, defaults))
    }

    pub fn config(&self) -> &IngestConfig {
        &self.config
    }

    pub fn http(&self) -> &HttpFetcher {
        &self.http
    }

    pub fn defaults(&self) -> &TargetingConfig {
        &self.defaults
    }

    /// Default targeting, overlaid with the organization's lists when `org_id` is given.
    pub async fn resolve_targeting(&self, org_id: Option<Uuid>) -> Result<TargetingConfig, IngestError> {
        let Some(org_id) = org_id else {
            return Ok(self.defaults.clone());
        };
        let org = self
            .store
            .organization(org_id)
            .await?
            .ok_or(IngestError::UnknownOrganization(org_id))?;
        info!(%org_id, org = %org.name, "using organization targeting");
        Ok(self.defaults.clone().overlay_organization(&org))
    }

    pub async fn run_sam(&self, org_id: Option<Uuid>) -> Result<IngestReport, IngestError> {
        let api_key = self
            .config
            .sam_api_key
            .clone()
            .ok_or(IngestError::MissingCredential("SAM_API_KEY"))?;
        let targeting = self.resolve_targeting(org_id).await?;
        let adapter = SamAdapter::new(self.config.sam_base_url.clone(), api_key)
            .with_page_size(self.config.sam_page_size);
        Ok(self.run(&adapter, &targeting).await)
    }

    pub async fn run_subnet(&self) -> IngestReport {
        let adapter = SubnetAdapter::new(self.config.subnet_feed_url.clone());
        self.run(&adapter, &self.defaults).await
    }

    pub async fn run(&self, adapter: &dyn SourceAdapter, targeting: &TargetingConfig) -> IngestReport {
        let run_id = Uuid::new_v4();
        let source = adapter.source();
        let fetched_at = Utc::now();
        let window = DateWindow::trailing_days(fetched_at.date_naive(), self.config.lookback_days);
        let ctx = AdapterContext::new(run_id, fetched_at, window).with_archive(self.config.archive());
        let filter = RecordFilter::from_targeting(targeting);
        let categories = adapter.categories(targeting);
        info!(%run_id, %source, categories = categories.len(), "ingestion run started");

        let mut reports = Vec::with_capacity(categories.len());
        for category in &categories {
            reports.push(self.ingest_category(adapter, &ctx, category, &filter).await);
        }

        let mut extra_errors = Vec::new();
        let total_in_db = match self.store.count_opportunities().await {
            Ok(count) => count,
            Err(err) => {
                warn!(%run_id, error = %err, "counting stored opportunities failed");
                extra_errors.push(format!("count: {err}"));
                0
            }
        };

        let report = build_report(run_id, source, window, targeting, reports, extra_errors, total_in_db);
        info!(
            %run_id,
            %source,
            processed = report.processed,
            inserted = report.counters.inserted,
            updated = report.counters.updated,
            errors = report.debug.errors.len(),
            "ingestion run finished"
        );
        report
    }

    async fn ingest_category(
        &self,
        adapter: &dyn SourceAdapter,
        ctx: &AdapterContext,
        category: &Category,
        filter: &RecordFilter,
    ) -> CategoryReport {
        let policy = self.config.backoff();
        let mut report = CategoryReport::new(category);
        let mut offset = 0usize;

        loop {
            match fetch_with_retry(&policy, adapter, &self.http, ctx, category, offset).await {
                PageOutcome::Page { page, attempts } => {
                    report.pages += 1;
                    report.requests += attempts;
                    for record in &page.records {
                        self.ingest_record(adapter.source(), record, category, filter, &mut report)
                            .await;
                    }
                    match page.next_offset {
                        Some(next) if next > offset => offset = next,
                        _ => break,
                    }
                }
                PageOutcome::Failed { attempts, error } => {
                    report.requests += attempts;
                    report.status = CategoryStatus::Failed;
                    error!(%category, offset, error = %error, "category fetch failed; skipping");
                    report.push_error(format!("{category}: {error}"));
                    break;
                }
                PageOutcome::Exhausted { attempts, error } => {
                    report.requests += attempts;
                    report.status = CategoryStatus::Exhausted;
                    error!(%category, offset, attempts, "still rate limited; giving up on category");
                    report.push_error(format!(
                        "{category}: gave up after {attempts} rate-limited attempts ({error})"
                    ));
                    break;
                }
            }
        }

        info!(
            %category,
            status = report.status.as_str(),
            pages = report.pages,
            processed = report.counters.processed,
            written = report.counters.written(),
            "category finished"
        );
        report
    }

    async fn ingest_record(
        &self,
        source: Source,
        record: &RawRecord,
        category: &Category,
        filter: &RecordFilter,
        report: &mut CategoryReport,
    ) {
        let normalized = match normalize(record, category) {
            Ok(normalized) => normalized,
            Err(err) => {
                debug!(%category, error = %err, "skipping malformed record");
                report.record(
                    RecordOutcome::Malformed,
                    Some(format!("{category}: skipped record: {err}")),
                );
                return;
            }
        };

        let state = normalized
            .place
            .state
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_ascii_uppercase)
            .unwrap_or_else(|| UNSPECIFIED_STATE.to_string());
        *report.state_distribution.entry(state).or_default() += 1;

        if !filter.accepts(source, &normalized) {
            report.record(RecordOutcome::Filtered, None);
            return;
        }

        let opportunity = &normalized.opportunity;
        match self.store.upsert_opportunity(opportunity).await {
            Ok(outcome) => {
                let tier = classify_set_aside(opportunity.set_aside.as_deref());
                *report.set_aside_tiers.entry(tier).or_default() += 1;
                report.record(
                    match outcome {
                        UpsertOutcome::Inserted => RecordOutcome::Inserted,
                        UpsertOutcome::Updated => RecordOutcome::Updated,
                    },
                    None,
                );
            }
            Err(err) => {
                warn!(%category, notice_id = %opportunity.notice_id, error = %err, "upsert failed");
                report.record(
                    RecordOutcome::Errored,
                    Some(format!("{category}: {}: {err}", opportunity.notice_id)),
                );
            }
        }
    }
}

fn build_report(
    run_id: Uuid,
    source: Source,
    window: DateWindow,
    targeting: &TargetingConfig,
    categories: Vec<CategoryReport>,
    extra_errors: Vec<String>,
    total_in_db: u64,
) -> IngestReport {
    let counters = categories
        .iter()
        .fold(RunCounters::default(), |acc, c| acc + c.counters);
    let errors = categories
        .iter()
        .flat_map(|c| c.errors.iter().cloned())
        .chain(extra_errors)
        .take(MAX_ERROR_SAMPLES)
        .collect::<Vec<_>>();

    let mut state_distribution = BTreeMap::new();
    let mut tiers = BTreeMap::new();
    for category in &categories {
        for (state, count) in &category.state_distribution {
            *state_distribution.entry(state.clone()).or_insert(0u64) += *count;
        }
        for (tier, count) in &category.set_aside_tiers {
            *tiers.entry(*tier).or_insert(0u64) += *count;
        }
    }

    let range = DateRange {
        posted_from: afois_adapters::sam::sam_date(window.posted_from),
        posted_to: afois_adapters::sam::sam_date(window.posted_to),
    };
    let report_text = render_report_text(
        run_id,
        source,
        &range,
        &categories,
        counters,
        &tiers,
        total_in_db,
        errors.len(),
    );

    IngestReport {
        success: true,
        run_id,
        source,
        processed: counters.processed,
        inserted: counters.written(),
        total_in_db,
        report_text,
        counters,
        debug: IngestDebug {
            naics_checked: categories.len(),
            states_used: targeting.target_states.iter().cloned().collect(),
            errors,
            state_distribution,
            range,
        },
        categories,
    }
}

#[allow(clippy::too_many_arguments)]
fn render_report_text(
    run_id: Uuid,
    source: Source,
    range: &DateRange,
    categories: &[CategoryReport],
    counters: RunCounters,
    tiers: &BTreeMap<SetAsideTier, u64>,
    total_in_db: u64,
    error_count: usize,
) -> String {
    let mut lines = vec![
        format!("# AFOIS Ingestion Report ({source})"),
        String::new(),
        format!("- Run ID: `{run_id}`"),
        format!("- Window: {} to {}", range.posted_from, range.posted_to),
        format!(
            "- Processed: {} | Written: {} (new {}, updated {}) | Filtered: {} | Malformed: {} | Write errors: {}",
            counters.processed,
            counters.written(),
            counters.inserted,
            counters.updated,
            counters.skipped_filter,
            counters.skipped_malformed,
            counters.errored
        ),
        format!("- Total in store: {total_in_db}"),
        format!("- Errors sampled: {error_count}"),
        String::new(),
        "## Categories".to_string(),
    ];
    lines.extend(categories.iter().map(|c| {
        format!(
            "- {}: {}, {} record(s), {} page(s), {} request(s)",
            c.category,
            c.status.as_str(),
            c.counters.processed,
            c.pages,
            c.requests
        )
    }));
    if !tiers.is_empty() {
        lines.push(String::new());
        lines.push("## Set-aside tiers".to_string());
        lines.extend(tiers.iter().map(|(tier, count)| format!("- {}: {count}", tier.label())));
    }
    lines.join("\n")
}

/// Opportunity and analysis stores behind one backend.
#[derive(Clone)]
pub struct Stores {
    pub opportunities: Arc<dyn OpportunityStore>,
    pub analyses: Arc<dyn AnalysisStore>,
}

impl Stores {
    pub fn memory() -> Self {
        let store = Arc::new(MemoryStore::new());
        Self {
            opportunities: store.clone(),
            analyses: store,
        }
    }
}

/// PostgreSQL when `DATABASE_URL` is set, otherwise a process-local memory store.
pub async fn open_stores(config: &IngestConfig) -> anyhow::Result<Stores> {
    match &config.database_url {
        Some(url) => {
            let store = Arc::new(PgStore::connect(url).await.context("connecting to database")?);
            Ok(Stores {
                opportunities: store.clone(),
                analyses: store,
            })
        }
        None => {
            warn!("DATABASE_URL not set; opportunities are kept in memory only");
            Ok(Stores::memory())
        }
    }
}

/// Cron-driven SAM ingestion with default targeting, when enabled.
pub async fn maybe_build_scheduler(pipeline: Arc<IngestPipeline>) -> anyhow::Result<Option<JobScheduler>> {
    if !pipeline.config().scheduler_enabled {
        return Ok(None);
    }

    let cron = pipeline.config().ingest_cron.clone();
    let sched = JobScheduler::new().await.context("creating scheduler")?;
    let job = Job::new_async(cron.as_str(), move |_uuid, _l| {
        let pipeline = Arc::clone(&pipeline);
        Box::pin(async move {
            match pipeline.run_sam(None).await {
                Ok(report) => info!(
                    run_id = %report.run_id,
                    processed = report.processed,
                    inserted = report.inserted,
                    "scheduled SAM ingestion finished"
                ),
                Err(err) => error!(error = %err, "scheduled SAM ingestion failed"),
            }
        })
    })
    .with_context(|| format!("creating scheduler job for cron {cron}"))?;
    sched.add(job).await.context("adding scheduler job")?;
    info!(%cron, "scheduler configured");
    Ok(Some(sched))
}
