//! Scoring, drafting and digest orchestration around external services.

use afois_adapters::fields::{lookup_f64, lookup_str};
use afois_adapters::AdapterError;
use afois_core::{
    AnalysisResult, BondingStatus, CompanyProfile, IncumbentData, Recommendation,
    ScoredOpportunity, StoredOpportunity,
};
use afois_storage::{AnalysisStore, FetchError, HttpFetcher, OpportunityStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("opportunity {0} not found")]
    NotFound(Uuid),
    #[error("{service} is not configured")]
    NotConfigured { service: &'static str },
    #[error(transparent)]
    Adapter(#[from] AdapterError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid scoring response: {0}")]
    InvalidResponse(String),
}

/// Payload handed to the scoring service.
#[derive(Debug, Clone, Serialize)]
pub struct ScoringInput {
    pub opportunity: StoredOpportunity,
    pub incumbent_context: Option<IncumbentData>,
    pub company_profile: CompanyProfile,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreResponse {
    pub pwin_score: u8,
    pub recommendation: Recommendation,
    pub bonding_status: BondingStatus,
    pub summary: String,
    pub reasoning: Option<String>,
}

impl ScoreResponse {
    pub fn into_analysis(self, opportunity_id: Uuid, analyzed_at: DateTime<Utc>) -> AnalysisResult {
        AnalysisResult {
            opportunity_id,
            pwin_score: self.pwin_score,
            recommendation: self.recommendation,
            bonding_status: self.bonding_status,
            summary: self.summary,
            reasoning: self.reasoning,
            analyzed_at,
        }
    }
}

/// Parses a scoring reply. Prose around the JSON object is ignored; the score is clamped
/// to 0..=100 and an unrecognized bonding status becomes `UNKNOWN`.
pub fn parse_score_response(text: &str) -> Result<ScoreResponse, ServiceError> {
    let json_text = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text.trim(),
    };
    let value: JsonValue = serde_json::from_str(json_text)
        .map_err(|e| ServiceError::InvalidResponse(e.to_string()))?;

    let raw_score = lookup_f64(&value, &["pwin_score", "pwinScore", "score"])
        .ok_or_else(|| ServiceError::InvalidResponse("missing pwin_score".to_string()))?;
    let recommendation = lookup_str(&value, &["recommendation"])
        .ok_or_else(|| ServiceError::InvalidResponse("missing recommendation".to_string()))?
        .parse::<Recommendation>()
        .map_err(|e| ServiceError::InvalidResponse(format!("unknown recommendation {e}")))?;
    let bonding_status = lookup_str(&value, &["bonding_status", "bondingStatus"])
        .and_then(|s| s.parse().ok())
        .unwrap_or(BondingStatus::Unknown);

    Ok(ScoreResponse {
        pwin_score: AnalysisResult::clamp_score(raw_score),
        recommendation,
        bonding_status,
        summary: lookup_str(&value, &["summary"]).unwrap_or_default(),
        reasoning: lookup_str(&value, &["reasoning"]),
    })
}

#[async_trait]
pub trait ScoringService: Send + Sync {
    async fn score(&self, input: &ScoringInput) -> Result<ScoreResponse, ServiceError>;
}

/// Posts the scoring input as JSON and parses the reply body.
#[derive(Debug, Clone)]
pub struct HttpScoringService {
    http: HttpFetcher,
    url: String,
}

impl HttpScoringService {
    pub fn new(http: HttpFetcher, url: impl Into<String>) -> Self {
        Self {
            http,
            url: url.into(),
        }
    }
}

#[async_trait]
impl ScoringService for HttpScoringService {
    async fn score(&self, input: &ScoringInput) -> Result<ScoreResponse, ServiceError> {
        let response = self
            .http
            .post_json(Uuid::new_v4(), "scoring", &self.url, input)
            .await?;
        parse_score_response(&response.text())
    }
}

/// Scores one stored opportunity against `profile`, passing along any incumbent data already
/// recorded.
pub async fn analyze_opportunity(
    opportunities: &dyn OpportunityStore,
    analyses: &dyn AnalysisStore,
    scorer: &dyn ScoringService,
    profile: &CompanyProfile,
    opportunity_id: Uuid,
) -> Result<AnalysisResult, ServiceError> {
    let opportunity = opportunities
        .opportunity_by_id(opportunity_id)
        .await?
        .ok_or(ServiceError::NotFound(opportunity_id))?;
    let incumbent_context = analyses
        .analysis_record(opportunity_id)
        .await?
        .and_then(|record| record.incumbent_data);

    let input = ScoringInput {
        opportunity,
        incumbent_context,
        company_profile: profile.clone(),
    };
    let analysis = scorer
        .score(&input)
        .await?
        .into_analysis(opportunity_id, Utc::now());
    analyses.upsert_analysis(&analysis).await?;

    info!(
        %opportunity_id,
        pwin_score = analysis.pwin_score,
        recommendation = analysis.recommendation.as_str(),
        "opportunity scored"
    );
    Ok(analysis)
}

#[async_trait]
pub trait DraftingService: Send + Sync {
    async fn draft(
        &self,
        opportunity: &StoredOpportunity,
        analysis: Option<&AnalysisResult>,
    ) -> Result<String, ServiceError>;
}

/// Fills a fixed capability-statement outline from the stored record.
#[derive(Debug, Clone)]
pub struct TemplateDraftingService {
    company_name: String,
    competencies: Vec<String>,
}

impl Default for TemplateDraftingService {
    fn default() -> Self {
        Self {
            company_name: "IPS, Inc.".to_string(),
            competencies: vec![
                "Remote Arctic construction".to_string(),
                "Oil and gas support structures (PEMB/PEFB)".to_string(),
                "Logistics management".to_string(),
            ],
        }
    }
}

#[async_trait]
impl DraftingService for TemplateDraftingService {
    async fn draft(
        &self,
        stored: &StoredOpportunity,
        analysis: Option<&AnalysisResult>,
    ) -> Result<String, ServiceError> {
        let opp = &stored.opportunity;
        let mut lines = vec![
            format!("# {} Capability Statement", self.company_name),
            String::new(),
            format!("**Re:** {} (Notice {})", opp.title, opp.notice_id),
            format!("**Agency:** {}", opp.agency),
        ];
        if let Some(number) = &opp.solicitation_number {
            lines.push(format!("**Solicitation:** {number}"));
        }
        lines.push(String::new());
        lines.push("## Core Competencies".to_string());
        lines.extend(self.competencies.iter().map(|c| format!("- {c}")));
        lines.push(String::new());
        lines.push("## Differentiators".to_string());
        match analysis {
            Some(a) if !a.summary.is_empty() => lines.push(a.summary.clone()),
            _ => lines.push("Proven delivery in remote and austere environments.".to_string()),
        }
        lines.push(String::new());
        lines.push("## Company Data".to_string());
        lines.push(format!(
            "- NAICS: {}",
            opp.naics_code.as_deref().unwrap_or("see solicitation")
        ));
        lines.push(format!("- Set-aside: {}", opp.set_aside.as_deref().unwrap_or("None")));
        Ok(lines.join("\n"))
    }
}

pub async fn draft_capability(
    opportunities: &dyn OpportunityStore,
    analyses: &dyn AnalysisStore,
    drafter: &dyn DraftingService,
    opportunity_id: Uuid,
) -> Result<String, ServiceError> {
    let opportunity = opportunities
        .opportunity_by_id(opportunity_id)
        .await?
        .ok_or(ServiceError::NotFound(opportunity_id))?;
    let analysis = analyses
        .analysis_record(opportunity_id)
        .await?
        .and_then(|record| record.analysis);
    drafter.draft(&opportunity, analysis.as_ref()).await
}

#[derive(Debug, Clone, Serialize)]
pub struct Digest {
    pub subject: String,
    pub body: String,
    pub items: Vec<ScoredOpportunity>,
}

pub fn render_digest(items: Vec<ScoredOpportunity>) -> Digest {
    let subject = format!(
        "Daily Intel: {} High-Value Opportunities Found",
        items.len()
    );
    let mut lines = vec![
        "# Daily Opportunity Digest".to_string(),
        String::new(),
        "High-potential opportunities identified today.".to_string(),
    ];
    for item in &items {
        let opp = &item.opportunity.opportunity;
        let summary = if item.analysis.summary.is_empty() {
            "No summary available."
        } else {
            item.analysis.summary.as_str()
        };
        lines.push(String::new());
        lines.push(format!("## {} ({}% PWin)", opp.title, item.analysis.pwin_score));
        lines.push(format!("Agency: {} | Notice ID: {}", opp.agency, opp.notice_id));
        lines.push(format!("Set Aside: {}", opp.set_aside.as_deref().unwrap_or("None")));
        lines.push(format!(
            "Analysis ({}): {summary}",
            item.analysis.recommendation.as_str()
        ));
        lines.push(format!("https://sam.gov/opp/{}/view", opp.notice_id));
    }
    Digest {
        subject,
        body: lines.join("\n"),
        items,
    }
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    async fn send(&self, digest: &Digest) -> Result<(), ServiceError>;
}

/// Writes the digest to the log instead of delivering it.
#[derive(Debug, Clone, Default)]
pub struct LogNotificationService;

#[async_trait]
impl NotificationService for LogNotificationService {
    async fn send(&self, digest: &Digest) -> Result<(), ServiceError> {
        info!(
            subject = %digest.subject,
            items = digest.items.len(),
            body_bytes = digest.body.len(),
            "digest delivery skipped; no mail transport configured"
        );
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DigestOutcome {
    Empty,
    Sent { count: usize },
}

/// Sends pending high scorers and flags them so they are not sent again.
pub async fn run_daily_digest(
    analyses: &dyn AnalysisStore,
    notifier: &dyn NotificationService,
    min_score: u8,
    limit: usize,
) -> Result<DigestOutcome, ServiceError> {
    let pending = analyses.pending_digest(min_score, limit).await?;
    if pending.is_empty() {
        info!(min_score, "no new high-score opportunities");
        return Ok(DigestOutcome::Empty);
    }

    let digest = render_digest(pending);
    notifier.send(&digest).await?;

    for item in &digest.items {
        if let Err(err) = analyses.mark_notified(item.opportunity.id).await {
            warn!(opportunity_id = %item.opportunity.id, error = %err, "could not flag as notified");
            return Err(err.into());
        }
    }
    info!(count = digest.items.len(), "digest sent");
    Ok(DigestOutcome::Sent {
        count: digest.items.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use afois_core::{Opportunity, Source};
    use afois_storage::{HttpClientConfig, MemoryStore};
    use serde_json::json;
    use std::sync::Mutex;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct FixedScorer(&'static str);

    #[async_trait]
    impl ScoringService for FixedScorer {
        async fn score(&self, input: &ScoringInput) -> Result<ScoreResponse, ServiceError> {
            let mut response = parse_score_response(self.0)?;
            if let Some(context) = &input.incumbent_context {
                response.summary = format!("{} vs {}", response.summary, context.identified_incumbent);
            }
            Ok(response)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier(Mutex<Vec<Digest>>);

    #[async_trait]
    impl NotificationService for RecordingNotifier {
        async fn send(&self, digest: &Digest) -> Result<(), ServiceError> {
            self.0.lock().unwrap().push(digest.clone());
            Ok(())
        }
    }

    fn opportunity(notice_id: &str) -> Opportunity {
        Opportunity {
            source: Source::Sam,
            notice_id: notice_id.to_string(),
            title: format!("Hangar repair {notice_id}"),
            agency: "Department of the Air Force".to_string(),
            solicitation_number: Some("FA5000-26-R-0001".to_string()),
            naics_code: Some("236220".to_string()),
            set_aside: Some("8A".to_string()),
            notice_type: Some("Solicitation".to_string()),
            posted_date: None,
            response_deadline: None,
            site_visit_date: None,
            place_of_performance_state: Some("AK".to_string()),
            raw_payload: json!({ "noticeId": notice_id }),
        }
    }

    async fn seeded(store: &MemoryStore, notice_id: &str) -> Uuid {
        store.upsert_opportunity(&opportunity(notice_id)).await.unwrap();
        store
            .opportunity_by_notice_id(notice_id)
            .await
            .unwrap()
            .unwrap()
            .id
    }

    #[test]
    fn parses_json_wrapped_in_prose() {
        let text = "Here is my analysis:\n```json\n{\"summary\": \"Good fit\", \"pwin_score\": 85, \"recommendation\": \"PURSUE\", \"bonding_status\": \"OK\", \"reasoning\": \"8(a) match\"}\n```\nLet me know.";
        let parsed = parse_score_response(text).unwrap();
        assert_eq!(parsed.pwin_score, 85);
        assert_eq!(parsed.recommendation, Recommendation::Pursue);
        assert_eq!(parsed.bonding_status, BondingStatus::Ok);
        assert_eq!(parsed.reasoning.as_deref(), Some("8(a) match"));
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        let high = parse_score_response(r#"{"pwin_score": 140, "recommendation": "PASS"}"#).unwrap();
        assert_eq!(high.pwin_score, 100);
        let low = parse_score_response(r#"{"pwin_score": "-12", "recommendation": "partner"}"#).unwrap();
        assert_eq!(low.pwin_score, 0);
        assert_eq!(low.recommendation, Recommendation::Partner);
        assert_eq!(low.bonding_status, BondingStatus::Unknown);
    }

    #[test]
    fn unusable_replies_are_rejected() {
        assert!(matches!(
            parse_score_response("no json here"),
            Err(ServiceError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_score_response(r#"{"recommendation": "PURSUE"}"#),
            Err(ServiceError::InvalidResponse(_))
        ));
        assert!(matches!(
            parse_score_response(r#"{"pwin_score": 50, "recommendation": "MAYBE"}"#),
            Err(ServiceError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn analysis_keeps_incumbent_data_and_uses_it_as_context() {
        let store = MemoryStore::new();
        let id = seeded(&store, "n-1").await;
        store
            .upsert_incumbent(id, &IncumbentData::from_awards(&["Borealis LLC".to_string()], vec![]))
            .await
            .unwrap();
        let scorer = FixedScorer(r#"{"summary": "Fit", "pwin_score": 72.4, "recommendation": "PURSUE"}"#);

        let analysis = analyze_opportunity(&store, &store, &scorer, &CompanyProfile::default(), id)
            .await
            .unwrap();

        assert_eq!(analysis.pwin_score, 72);
        assert_eq!(analysis.summary, "Fit vs Borealis LLC");
        let record = store.analysis_record(id).await.unwrap().unwrap();
        assert_eq!(record.analysis.unwrap().pwin_score, 72);
        assert_eq!(record.incumbent_data.unwrap().identified_incumbent, "Borealis LLC");
    }

    #[tokio::test]
    async fn unknown_opportunity_is_not_found() {
        let store = MemoryStore::new();
        let scorer = FixedScorer(r#"{"pwin_score": 1, "recommendation": "PASS"}"#);
        let missing = Uuid::new_v4();
        let err = analyze_opportunity(&store, &store, &scorer, &CompanyProfile::default(), missing)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn http_scorer_posts_opportunity_and_parses_reply() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/score"))
            .and(body_partial_json(json!({
                "opportunity": { "notice_id": "n-2" },
                "company_profile": { "bonding_capacity": 2_500_000, "qualified_set_asides": ["8A", "HZC"] }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_string(
                "Result: {\"pwin_score\": 64, \"recommendation\": \"PARTNER\", \"bonding_status\": \"EXCEEDS\", \"summary\": \"Large\"}",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let store = MemoryStore::new();
        let id = seeded(&store, "n-2").await;
        let http = HttpFetcher::new(HttpClientConfig::default()).unwrap();
        let scorer = HttpScoringService::new(http, format!("{}/score", server.uri()));
        let profile = CompanyProfile {
            bonding_capacity: 2_500_000,
            qualified_set_asides: vec!["8A".to_string(), "HZC".to_string()],
        };

        let analysis = analyze_opportunity(&store, &store, &scorer, &profile, id)
            .await
            .unwrap();
        assert_eq!(analysis.recommendation, Recommendation::Partner);
        assert_eq!(analysis.bonding_status, BondingStatus::Exceeds);
    }

    #[tokio::test]
    async fn template_draft_mentions_the_opportunity() {
        let store = MemoryStore::new();
        let id = seeded(&store, "n-3").await;
        let text = draft_capability(&store, &store, &TemplateDraftingService::default(), id)
            .await
            .unwrap();
        assert!(text.contains("Hangar repair n-3"));
        assert!(text.contains("## Core Competencies"));
        assert!(text.contains("FA5000-26-R-0001"));
    }

    #[tokio::test]
    async fn digest_sends_high_scorers_once() {
        let store = MemoryStore::new();
        let strong = seeded(&store, "strong").await;
        let weak = seeded(&store, "weak").await;
        for (id, score) in [(strong, 88u8), (weak, 40)] {
            store
                .upsert_analysis(&AnalysisResult {
                    opportunity_id: id,
                    pwin_score: score,
                    recommendation: Recommendation::Pursue,
                    bonding_status: BondingStatus::Ok,
                    summary: String::new(),
                    reasoning: None,
                    analyzed_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        let notifier = RecordingNotifier::default();

        let first = run_daily_digest(&store, &notifier, 70, 20).await.unwrap();
        let second = run_daily_digest(&store, &notifier, 70, 20).await.unwrap();

        assert_eq!(first, DigestOutcome::Sent { count: 1 });
        assert_eq!(second, DigestOutcome::Empty);
        let sent = notifier.0.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Daily Intel: 1 High-Value Opportunities Found");
        assert!(sent[0].body.contains("No summary available."));
        assert!(sent[0].body.contains("https://sam.gov/opp/strong/view"));
        assert!(store.analysis_record(strong).await.unwrap().unwrap().notification_sent);
    }
}
