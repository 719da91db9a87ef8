//! Incumbent and competitor enrichment from USASpending award history.

use afois_adapters::usaspending::recipient_names;
use afois_adapters::{AdapterError, AwardSearch, SpendingWindow, UsaSpendingClient};
use afois_core::{CompetitorProfile, IncumbentData};
use afois_storage::{AnalysisStore, HttpFetcher, OpportunityStore};
use chrono::{NaiveDate, Utc};
use futures::future::join_all;
use tracing::{info, warn};
use uuid::Uuid;

use crate::analysis::ServiceError;

pub const INCUMBENT_LOOKBACK_MONTHS: u32 = 24;
pub const COMPETITOR_LOOKBACK_MONTHS: u32 = 12;
pub const TOP_COMPETITORS: u32 = 5;
/// Competitors whose recent awards are fetched.
pub const PROFILED_COMPETITORS: usize = 3;

#[derive(Debug, Clone)]
pub struct IncumbentService {
    http: HttpFetcher,
    client: UsaSpendingClient,
}

impl IncumbentService {
    pub fn new(http: HttpFetcher, client: UsaSpendingClient) -> Self {
        Self { http, client }
    }

    /// Largest recent awards for the NAICS code at the agency; the top recipient is the incumbent.
    pub async fn lookup_incumbent(
        &self,
        naics: Option<&str>,
        agency: &str,
        today: NaiveDate,
    ) -> Result<IncumbentData, AdapterError> {
        let window = SpendingWindow::trailing_months(today, INCUMBENT_LOOKBACK_MONTHS);
        let search = AwardSearch::incumbents(naics, agency, window);
        let awards = self.client.awards(&self.http, Uuid::new_v4(), &search).await?;
        let recipients = recipient_names(&awards);
        Ok(IncumbentData::from_awards(&recipients, awards))
    }

    /// Looks up and stores incumbent data for a stored opportunity. Existing scores are kept.
    pub async fn refresh_incumbent(
        &self,
        opportunities: &dyn OpportunityStore,
        analyses: &dyn AnalysisStore,
        opportunity_id: Uuid,
    ) -> Result<IncumbentData, ServiceError> {
        let stored = opportunities
            .opportunity_by_id(opportunity_id)
            .await?
            .ok_or(ServiceError::NotFound(opportunity_id))?;
        let data = self
            .lookup_incumbent(
                stored.opportunity.naics_code.as_deref(),
                &stored.opportunity.agency,
                Utc::now().date_naive(),
            )
            .await?;
        analyses.upsert_incumbent(opportunity_id, &data).await?;
        info!(
            %opportunity_id,
            incumbent = %data.identified_incumbent,
            competitors = data.potential_competitors.len(),
            "incumbent data stored"
        );
        Ok(data)
    }

    /// Top recipients for a NAICS code. The leading few get their latest awards attached,
    /// fetched concurrently; a failed lookup leaves that competitor's awards empty.
    pub async fn competitors(
        &self,
        naics: &str,
        today: NaiveDate,
    ) -> Result<Vec<CompetitorProfile>, AdapterError> {
        let run_id = Uuid::new_v4();
        let window = SpendingWindow::trailing_months(today, COMPETITOR_LOOKBACK_MONTHS);
        let top = self
            .client
            .top_recipients(&self.http, run_id, naics, window, TOP_COMPETITORS)
            .await?;

        let lookups = top.iter().take(PROFILED_COMPETITORS).map(|recipient| {
            let search = AwardSearch::recent_for_recipient(&recipient.name, naics, window);
            async move { self.client.awards(&self.http, run_id, &search).await }
        });
        let mut recent = join_all(lookups).await.into_iter();

        Ok(top
            .into_iter()
            .map(|recipient| {
                let recent_awards = match recent.next() {
                    Some(Ok(awards)) => awards,
                    Some(Err(err)) => {
                        warn!(competitor = %recipient.name, error = %err, "recent award lookup failed");
                        Vec::new()
                    }
                    None => Vec::new(),
                };
                CompetitorProfile {
                    name: recipient.name,
                    total_obligated_amount: recipient.amount,
                    recent_awards,
                }
            })
            .collect())
    }
}
