//! Maps raw source records onto the canonical [`Opportunity`] shape.

use afois_core::{Opportunity, Source, DEFAULT_AGENCY, DEFAULT_TITLE};
use scraper::Html;
use serde_json::Value as JsonValue;
use thiserror::Error;

use crate::fields::{lookup_str, text_or_none};
use crate::{Category, RawRecord, RssItem};

pub const SAM_NOTICE_ID: &[&str] = &["noticeId", "notice_id", "noticeID"];
const SAM_TITLE: &[&str] = &["subject", "title"];
const SAM_AGENCY: &[&str] = &["departmentName", "fullParentPathName", "agency", "department"];
const SAM_SOLICITATION: &[&str] = &["solicitationNumber", "solicitation_number"];
const SAM_NAICS: &[&str] = &["naicsCode", "naics_code", "naics"];
const SAM_SET_ASIDE: &[&str] = &["typeOfSetAside", "typeOfSetAsideDescription", "setAside"];
const SAM_TYPE: &[&str] = &["type", "noticeType", "baseType"];
const SAM_POSTED: &[&str] = &["postedDate", "posted_date"];
const SAM_DEADLINE: &[&str] = &["responseDeadLine", "responseDeadline", "response_deadline"];
const SAM_SITE_VISIT: &[&str] = &["siteVisitDate", "site_visit_date"];
const SAM_DESCRIPTION: &[&str] = &["description", "descriptionText"];
const POP_STATE: &[&str] = &["placeOfPerformance.state.code", "placeOfPerformance.state"];
const POP_COUNTRY: &[&str] = &["placeOfPerformance.country.code", "placeOfPerformance.country"];
const POP_CITY: &[&str] = &["placeOfPerformance.city.name", "placeOfPerformance.city"];

/// Sub-objects SAM sometimes ships as JSON-encoded strings.
const EMBEDDED_JSON_FIELDS: &[&str] = &["placeOfPerformance", "pointOfContact", "officeAddress"];

const DEFAULT_NOTICE_TYPE: &str = "Solicitation";
pub const SUBNET_AGENCY: &str = "SBA SubNet";
pub const SUBNET_SET_ASIDE: &str = "Subcontract - No Bonding Limit";
pub const SUBNET_KEY_MAX_CHARS: usize = 200;

#[derive(Debug, Error, PartialEq)]
pub enum NormalizeError {
    #[error("{source_code} record has no natural key")]
    MissingNaturalKey { source_code: Source },
    #[error("field `{field}` holds malformed JSON: {message}")]
    MalformedJson { field: &'static str, message: String },
    #[error("unsupported record: {0}")]
    UnsupportedRecord(String),
}

/// Where the work happens, as reported by the source. Used only for filtering.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlaceOfPerformance {
    pub state: Option<String>,
    pub country: Option<String>,
    pub city: Option<String>,
}

impl PlaceOfPerformance {
    pub fn is_multiple(&self) -> bool {
        let multiple = |v: &Option<String>| {
            v.as_deref()
                .is_some_and(|s| s.trim().eq_ignore_ascii_case("multiple"))
        };
        multiple(&self.state) || multiple(&self.city)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub opportunity: Opportunity,
    pub place: PlaceOfPerformance,
    /// Title plus plain-text description, for keyword matching.
    pub search_text: String,
}

pub fn normalize(record: &RawRecord, category: &Category) -> Result<NormalizedRecord, NormalizeError> {
    match record {
        RawRecord::Sam(value) => normalize_sam(value, category),
        RawRecord::Subnet(item) => normalize_subnet(item),
    }
}

fn expand_embedded_json(record: &JsonValue) -> Result<JsonValue, NormalizeError> {
    let mut expanded = record.clone();
    let Some(object) = expanded.as_object_mut() else {
        return Err(NormalizeError::UnsupportedRecord(
            "expected a JSON object".to_string(),
        ));
    };
    for field in EMBEDDED_JSON_FIELDS {
        let Some(JsonValue::String(text)) = object.get(*field) else {
            continue;
        };
        if text.trim().is_empty() {
            object.insert((*field).to_string(), JsonValue::Null);
            continue;
        }
        let parsed: JsonValue =
            serde_json::from_str(text).map_err(|e| NormalizeError::MalformedJson {
                field: *field,
                message: e.to_string(),
            })?;
        object.insert((*field).to_string(), parsed);
    }
    Ok(expanded)
}

fn normalize_sam(record: &JsonValue, category: &Category) -> Result<NormalizedRecord, NormalizeError> {
    let expanded = expand_embedded_json(record)?;
    let notice_id = lookup_str(&expanded, SAM_NOTICE_ID).ok_or(NormalizeError::MissingNaturalKey {
        source_code: Source::Sam,
    })?;

    let place = PlaceOfPerformance {
        state: lookup_str(&expanded, POP_STATE),
        country: lookup_str(&expanded, POP_COUNTRY),
        city: lookup_str(&expanded, POP_CITY),
    };
    let stored_state = place
        .state
        .as_deref()
        .filter(|_| !place.is_multiple())
        .map(str::to_ascii_uppercase);

    let title = lookup_str(&expanded, SAM_TITLE).unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let description = lookup_str(&expanded, SAM_DESCRIPTION)
        .map(|d| strip_html(&d))
        .unwrap_or_default();
    let search_text = format!("{title} {description}").trim().to_string();

    let opportunity = Opportunity {
        source: Source::Sam,
        notice_id,
        title,
        agency: lookup_str(&expanded, SAM_AGENCY).unwrap_or_else(|| DEFAULT_AGENCY.to_string()),
        solicitation_number: lookup_str(&expanded, SAM_SOLICITATION),
        naics_code: lookup_str(&expanded, SAM_NAICS)
            .or_else(|| category.naics().map(ToString::to_string)),
        set_aside: lookup_str(&expanded, SAM_SET_ASIDE),
        notice_type: Some(
            lookup_str(&expanded, SAM_TYPE).unwrap_or_else(|| DEFAULT_NOTICE_TYPE.to_string()),
        ),
        posted_date: lookup_str(&expanded, SAM_POSTED),
        response_deadline: lookup_str(&expanded, SAM_DEADLINE),
        site_visit_date: lookup_str(&expanded, SAM_SITE_VISIT),
        place_of_performance_state: stored_state,
        raw_payload: record.clone(),
    };

    Ok(NormalizedRecord {
        opportunity,
        place,
        search_text,
    })
}

fn normalize_subnet(item: &RssItem) -> Result<NormalizedRecord, NormalizeError> {
    let key = item
        .guid_text()
        .or_else(|| item.link.as_deref().and_then(text_or_none))
        .ok_or(NormalizeError::MissingNaturalKey {
            source_code: Source::Subnet,
        })?;
    let notice_id = key.chars().take(SUBNET_KEY_MAX_CHARS).collect::<String>();

    let title = item
        .title
        .as_deref()
        .and_then(text_or_none)
        .unwrap_or_else(|| DEFAULT_TITLE.to_string());
    let description = item.description.as_deref().map(strip_html).unwrap_or_default();
    let search_text = format!("{title} {description}").trim().to_string();

    let opportunity = Opportunity {
        source: Source::Subnet,
        notice_id,
        title,
        agency: SUBNET_AGENCY.to_string(),
        solicitation_number: None,
        naics_code: None,
        set_aside: Some(SUBNET_SET_ASIDE.to_string()),
        notice_type: None,
        posted_date: item.pub_date.as_deref().and_then(text_or_none),
        response_deadline: None,
        site_visit_date: None,
        place_of_performance_state: None,
        raw_payload: item.to_payload(),
    };

    Ok(NormalizedRecord {
        opportunity,
        place: PlaceOfPerformance::default(),
        search_text,
    })
}

/// Plain text of an HTML fragment with whitespace collapsed.
pub fn strip_html(input: &str) -> String {
    let fragment = Html::parse_fragment(input);
    fragment
        .root_element()
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}
