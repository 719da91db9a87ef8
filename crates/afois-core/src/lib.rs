//! Core domain model for AFOIS: canonical opportunities, targeting, and analysis results.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;


pub const DEFAULT_TARGET_NAICS: &[&str] = &["236220"];
pub const DEFAULT_TARGET_STATES: &[&str] = &["AK", "AZ"];
pub const DEFAULT_TARGET_COUNTRIES: &[&str] = &["MEX", "USA"];
pub const HOME_COUNTRY: &str = "USA";

pub const DEFAULT_SUBNET_KEYWORDS: &[&str] = &[
    "Construction",
    "Logistics",
    "PEMB",
    "Arctic",
    "Alaska",
    "Development",
    "Infrastructure",
    "Repair",
    "Maintenance",
];

/// (code, description) pairs for the set-asides the firm treats as high value.
pub const TIER_1_SET_ASIDES: &[(&str, &str)] = &[
    ("8A", "8(a) Competed"),
    ("8AN", "8(a) Sole Source"),
    ("IEE", "Indian Economic Enterprise"),
    ("ISBEE", "Indian Small Business Economic Enterprise"),
    ("SDVOSB", "Service-Disabled Veteran-Owned Small Business"),
    ("WOSB", "Women-Owned Small Business"),
    ("HUBZone", "HUBZone"),
    ("VOSB", "Veteran-Owned Small Business"),
];

pub const TIER_2_SET_ASIDES: &[(&str, &str)] = &[
    ("SBA", "Total Small Business"),
    ("SBP", "Partial Small Business"),
];

/// Bonding limit assumed when no organization states one.
pub const DEFAULT_BONDING_CAPACITY: i64 = 10_000_000;
pub const DEFAULT_QUALIFIED_SET_ASIDES: &[&str] = &["8A"];

pub const DEFAULT_TITLE: &str = "Untitled";
pub const DEFAULT_AGENCY: &str = "Unknown";
pub const UNKNOWN_INCUMBENT: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Source {
    #[serde(rename = "SAM")]
    Sam,
    #[serde(rename = "SUB", alias = "SUBNET")]
    Subnet,
    #[serde(rename = "USA", alias = "USASPENDING")]
    UsaSpending,
}

impl Source {
    /// Short code persisted in the `source` column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Sam => "SAM",
            Source::Subnet => "SUB",
            Source::UsaSpending => "USA",
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(pub String);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unrecognized value `{}`", self.0)
    }
}

impl std::error::Error for UnknownVariant {}

impl FromStr for Source {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "SAM" => Ok(Source::Sam),
            "SUB" | "SUBNET" => Ok(Source::Subnet),
            "USA" | "USASPENDING" => Ok(Source::UsaSpending),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Canonical opportunity shape shared by every source.
///
/// `notice_id` is the natural key: the store holds at most one row per value and a
/// re-ingested record overwrites the existing row. Date fields are carried as the
/// source sent them; formatting belongs to whoever displays them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Opportunity {
    pub source: Source,
    pub notice_id: String,
    pub title: String,
    pub agency: String,
    pub solicitation_number: Option<String>,
    pub naics_code: Option<String>,
    pub set_aside: Option<String>,
    #[serde(rename = "type")]
    pub notice_type: Option<String>,
    pub posted_date: Option<String>,
    pub response_deadline: Option<String>,
    pub site_visit_date: Option<String>,
    pub place_of_performance_state: Option<String>,
    pub raw_payload: JsonValue,
}

/// An opportunity as read back from the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredOpportunity {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(flatten)]
    pub opportunity: Opportunity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Recommendation {
    Pursue,
    Partner,
    Pass,
}

impl Recommendation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recommendation::Pursue => "PURSUE",
            Recommendation::Partner => "PARTNER",
            Recommendation::Pass => "PASS",
        }
    }
}

impl FromStr for Recommendation {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "PURSUE" => Ok(Recommendation::Pursue),
            "PARTNER" | "REFER TO PARTNERS" => Ok(Recommendation::Partner),
            "PASS" => Ok(Recommendation::Pass),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum BondingStatus {
    Ok,
    Exceeds,
    #[serde(alias = "N/A")]
    Unknown,
}

impl BondingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BondingStatus::Ok => "OK",
            BondingStatus::Exceeds => "EXCEEDS",
            BondingStatus::Unknown => "UNKNOWN",
        }
    }
}

impl FromStr for BondingStatus {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OK" => Ok(BondingStatus::Ok),
            "EXCEEDS" => Ok(BondingStatus::Exceeds),
            "UNKNOWN" | "N/A" | "" => Ok(BondingStatus::Unknown),
            _ => Err(UnknownVariant(s.to_string())),
        }
    }
}

/// Output of the scoring service, one-to-one with an opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub opportunity_id: Uuid,
    pub pwin_score: u8,
    pub recommendation: Recommendation,
    pub bonding_status: BondingStatus,
    pub summary: String,
    pub reasoning: Option<String>,
    pub analyzed_at: DateTime<Utc>,
}

impl AnalysisResult {
    pub fn clamp_score(raw: f64) -> u8 {
        if raw.is_nan() {
            return 0;
        }
        raw.round().clamp(0.0, 100.0) as u8
    }
}

/// Historical award context inferred from spending data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct IncumbentData {
    pub identified_incumbent: String,
    pub potential_competitors: Vec<String>,
    pub recent_awards: Vec<JsonValue>,
}

impl IncumbentData {
    /// Builds incumbent context from awards already sorted by amount, largest first.
    pub fn from_awards(recipients: &[String], awards: Vec<JsonValue>) -> Self {
        let mut seen = BTreeSet::new();
        let potential_competitors = recipients
            .iter()
            .map(|r| r.trim())
            .filter(|r| !r.is_empty())
            .filter(|r| seen.insert(r.to_string()))
            .map(ToString::to_string)
            .collect::<Vec<_>>();
        let identified_incumbent = potential_competitors
            .first()
            .cloned()
            .unwrap_or_else(|| UNKNOWN_INCUMBENT.to_string());
        Self {
            identified_incumbent,
            potential_competitors,
            recent_awards: awards,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompetitorProfile {
    pub name: String,
    pub total_obligated_amount: Option<f64>,
    pub recent_awards: Vec<JsonValue>,
}

/// Side-table row keyed by opportunity id. Incumbent data may exist before scoring runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRecord {
    pub opportunity_id: Uuid,
    pub analysis: Option<AnalysisResult>,
    pub incumbent_data: Option<IncumbentData>,
    pub notification_sent: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredOpportunity {
    pub opportunity: StoredOpportunity,
    pub analysis: AnalysisResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub bonding_capacity: Option<i64>,
    #[serde(default)]
    pub target_naics: Vec<String>,
    #[serde(default)]
    pub target_states: Vec<String>,
    #[serde(default)]
    pub qualified_set_asides: Vec<String>,
}

/// Explicit targeting threaded into every ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetingConfig {
    pub target_categories: Vec<String>,
    pub target_states: BTreeSet<String>,
    pub target_countries: BTreeSet<String>,
    pub home_country: String,
    pub subnet_keywords: Vec<String>,
    pub qualified_set_asides: Vec<String>,
    #[serde(default)]
    pub bonding_capacity: Option<i64>,
}

impl Default for TargetingConfig {
    fn default() -> Self {
        Self {
            target_categories: DEFAULT_TARGET_NAICS.iter().map(|s| s.to_string()).collect(),
            target_states: DEFAULT_TARGET_STATES.iter().map(|s| s.to_string()).collect(),
            target_countries: DEFAULT_TARGET_COUNTRIES.iter().map(|s| s.to_string()).collect(),
            home_country: HOME_COUNTRY.to_string(),
            subnet_keywords: DEFAULT_SUBNET_KEYWORDS.iter().map(|s| s.to_string()).collect(),
            qualified_set_asides: Vec::new(),
            bonding_capacity: None,
        }
    }
}

/// Company facts handed to the scoring service alongside each opportunity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyProfile {
    pub bonding_capacity: i64,
    pub qualified_set_asides: Vec<String>,
}

impl Default for CompanyProfile {
    fn default() -> Self {
        Self {
            bonding_capacity: DEFAULT_BONDING_CAPACITY,
            qualified_set_asides: DEFAULT_QUALIFIED_SET_ASIDES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl TargetingConfig {
    /// Overlays an organization's non-empty lists onto `self`.
    pub fn overlay_organization(mut self, org: &Organization) -> Self {
        let naics = clean_codes(&org.target_naics, false);
        if !naics.is_empty() {
            self.target_categories = naics;
        }
        let states = clean_codes(&org.target_states, true);
        if !states.is_empty() {
            self.target_states = states.into_iter().collect();
        }
        if !org.qualified_set_asides.is_empty() {
            self.qualified_set_asides = org.qualified_set_asides.clone();
        }
        if let Some(capacity) = org.bonding_capacity.filter(|c| *c > 0) {
            self.bonding_capacity = Some(capacity);
        }
        self
    }

    /// Profile for scoring; unset values fall back to the defaults.
    pub fn company_profile(&self) -> CompanyProfile {
        let defaults = CompanyProfile::default();
        let set_asides = clean_codes(&self.qualified_set_asides, true);
        CompanyProfile {
            bonding_capacity: self
                .bonding_capacity
                .filter(|c| *c > 0)
                .unwrap_or(defaults.bonding_capacity),
            qualified_set_asides: if set_asides.is_empty() {
                defaults.qualified_set_asides
            } else {
                set_asides
            },
        }
    }

    /// Countries other than the home country; a match on one of these is sufficient on its own.
    pub fn cross_border_countries(&self) -> BTreeSet<String> {
        self.target_countries
            .iter()
            .filter(|c| !c.eq_ignore_ascii_case(&self.home_country))
            .map(|c| c.to_ascii_uppercase())
            .collect()
    }
}

fn clean_codes(values: &[String], uppercase: bool) -> Vec<String> {
    let mut seen = BTreeSet::new();
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(|v| if uppercase { v.to_ascii_uppercase() } else { v.to_string() })
        .filter(|v| seen.insert(v.clone()))
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetAsideTier {
    Tier1,
    Tier2,
    Other,
    Unrestricted,
}

impl SetAsideTier {
    pub fn label(&self) -> &'static str {
        match self {
            SetAsideTier::Tier1 => "tier-1",
            SetAsideTier::Tier2 => "tier-2",
            SetAsideTier::Other => "other",
            SetAsideTier::Unrestricted => "unrestricted",
        }
    }
}

/// Buckets a free-text or coded set-aside value. Codes match exactly, descriptions by substring.
pub fn classify_set_aside(set_aside: Option<&str>) -> SetAsideTier {
    let Some(text) = set_aside.map(str::trim).filter(|s| !s.is_empty()) else {
        return SetAsideTier::Unrestricted;
    };
    if text.eq_ignore_ascii_case("n/a") || text.eq_ignore_ascii_case("none") {
        return SetAsideTier::Unrestricted;
    }
    let lower = text.to_ascii_lowercase();
    let matches = |table: &[(&str, &str)]| {
        table.iter().any(|(code, description)| {
            text.eq_ignore_ascii_case(code) || lower.contains(&description.to_ascii_lowercase())
        })
    };
    if matches(TIER_1_SET_ASIDES) || lower.contains("8(a)") {
        SetAsideTier::Tier1
    } else if matches(TIER_2_SET_ASIDES) {
        SetAsideTier::Tier2
    } else {
        SetAsideTier::Other
    }
}
