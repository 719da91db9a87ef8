//! Business-rule predicates applied to normalized records before they are written.
//!
//! The geo filter keeps anything whose location is ambiguous. Precision is recovered later
//! by scoring and human review.

use std::collections::BTreeSet;

use afois_adapters::{NormalizedRecord, PlaceOfPerformance};
use afois_core::{Source, TargetingConfig};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoFilter {
    target_states: BTreeSet<String>,
    cross_border_countries: BTreeSet<String>,
}

impl GeoFilter {
    pub fn from_targeting(targeting: &TargetingConfig) -> Self {
        Self {
            target_states: targeting
                .target_states
                .iter()
                .map(|s| s.trim().to_ascii_uppercase())
                .collect(),
            cross_border_countries: targeting.cross_border_countries(),
        }
    }

    /// Any one of: allow-listed state, cross-border country, blank state, or "multiple".
    pub fn matches(&self, place: &PlaceOfPerformance) -> bool {
        let Some(state) = place.state.as_deref().map(str::trim).filter(|s| !s.is_empty()) else {
            return true;
        };
        if self.target_states.contains(&state.to_ascii_uppercase()) {
            return true;
        }
        let cross_border = place
            .country
            .as_deref()
            .map(|c| c.trim().to_ascii_uppercase())
            .is_some_and(|c| self.cross_border_countries.contains(&c));
        cross_border || place.is_multiple()
    }
}

/// Prefix match against the targeted NAICS codes. Records without a code pass.
pub fn naics_matches(targets: &[String], naics: Option<&str>) -> bool {
    let Some(code) = naics.map(str::trim).filter(|c| !c.is_empty()) else {
        return true;
    };
    targets.is_empty() || targets.iter().any(|t| code.starts_with(t.trim()))
}

/// Case-insensitive substring match of any keyword. An empty keyword list matches everything.
pub fn keyword_matches(keywords: &[String], text: &str) -> bool {
    if keywords.is_empty() {
        return true;
    }
    let haystack = text.to_lowercase();
    keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .any(|k| haystack.contains(&k))
}

#[derive(Debug, Clone)]
pub struct RecordFilter {
    geo: GeoFilter,
    categories: Vec<String>,
    keywords: Vec<String>,
}

impl RecordFilter {
    pub fn from_targeting(targeting: &TargetingConfig) -> Self {
        Self {
            geo: GeoFilter::from_targeting(targeting),
            categories: targeting.target_categories.clone(),
            keywords: targeting.subnet_keywords.clone(),
        }
    }

    pub fn accepts(&self, source: Source, record: &NormalizedRecord) -> bool {
        match source {
            Source::Subnet => keyword_matches(&self.keywords, &record.search_text),
            Source::Sam | Source::UsaSpending => {
                self.geo.matches(&record.place)
                    && naics_matches(&self.categories, record.opportunity.naics_code.as_deref())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn place(state: Option<&str>, country: Option<&str>, city: Option<&str>) -> PlaceOfPerformance {
        PlaceOfPerformance {
            state: state.map(ToString::to_string),
            country: country.map(ToString::to_string),
            city: city.map(ToString::to_string),
        }
    }

    #[test]
    fn ambiguous_or_allow_listed_locations_pass() {
        let geo = GeoFilter::from_targeting(&TargetingConfig::default());
        for p in [
            place(None, None, None),
            place(Some("  "), Some("USA"), None),
            place(Some("AK"), Some("USA"), None),
            place(Some("az"), None, None),
            place(Some("MULTIPLE"), None, None),
            place(Some("TX"), None, Some("multiple")),
            place(Some("SON"), Some("MEX"), None),
        ] {
            assert!(geo.matches(&p), "expected {p:?} to pass");
        }
    }

    #[test]
    fn specific_locations_outside_targets_are_rejected() {
        let geo = GeoFilter::from_targeting(&TargetingConfig::default());
        for state in ["TX", "CA", "WA", "NY"] {
            assert!(!geo.matches(&place(Some(state), Some("USA"), Some("Austin"))));
            assert!(!geo.matches(&place(Some(state), None, None)));
        }
    }

    #[test]
    fn home_country_alone_is_not_sufficient() {
        let geo = GeoFilter::from_targeting(&TargetingConfig::default());
        assert!(!geo.matches(&place(Some("FL"), Some("usa"), None)));
    }

    #[test]
    fn naics_prefixes() {
        let targets = vec!["2362".to_string(), "541511".to_string()];
        assert!(naics_matches(&targets, Some("236220")));
        assert!(naics_matches(&targets, Some("541511")));
        assert!(!naics_matches(&targets, Some("541512")));
        assert!(naics_matches(&targets, None));
        assert!(naics_matches(&[], Some("111111")));
    }

    #[test]
    fn keywords_ignore_case() {
        let keywords = vec!["PEMB".to_string(), "Arctic".to_string()];
        assert!(keyword_matches(&keywords, "new pemb warehouse"));
        assert!(keyword_matches(&keywords, "ARCTIC road"));
        assert!(!keyword_matches(&keywords, "janitorial services"));
        assert!(keyword_matches(&[], "anything"));
    }
}
