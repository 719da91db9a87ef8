//! First-match field lookup over loosely typed JSON records.
//!
//! Each logical field has a list of alias spellings, tried in order. Aliases may be dotted
//! paths (`placeOfPerformance.state.code`). All aliases are first tried with exact key
//! matching, then again ignoring ASCII case. Blank strings and nulls count as absent.

use serde_json::Value as JsonValue;

fn walk<'a>(value: &'a JsonValue, path: &str, ignore_case: bool) -> Option<&'a JsonValue> {
    let mut cur = value;
    for segment in path.split('.') {
        let object = cur.as_object()?;
        cur = if ignore_case {
            object
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(segment))
                .map(|(_, v)| v)?
        } else {
            object.get(segment)?
        };
    }
    Some(cur)
}

fn lookup_with<T>(
    value: &JsonValue,
    aliases: &[&str],
    convert: impl Fn(&JsonValue) -> Option<T>,
) -> Option<T> {
    [false, true].into_iter().find_map(|ignore_case| {
        aliases
            .iter()
            .find_map(|alias| walk(value, alias, ignore_case).and_then(&convert))
    })
}

pub fn text_or_none(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn scalar_text(value: &JsonValue) -> Option<String> {
    match value {
        JsonValue::String(s) => text_or_none(s),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn scalar_f64(value: &JsonValue) -> Option<f64> {
    match value {
        JsonValue::Number(n) => n.as_f64(),
        JsonValue::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Raw value under the first alias that holds something other than null or a blank string.
pub fn lookup<'a>(value: &'a JsonValue, aliases: &[&str]) -> Option<&'a JsonValue> {
    [false, true].into_iter().find_map(|ignore_case| {
        aliases.iter().find_map(|alias| {
            walk(value, alias, ignore_case).filter(|v| match v {
                JsonValue::Null => false,
                JsonValue::String(s) => !s.trim().is_empty(),
                _ => true,
            })
        })
    })
}

/// Trimmed text under the first alias holding a scalar. Numbers are stringified.
pub fn lookup_str(value: &JsonValue, aliases: &[&str]) -> Option<String> {
    lookup_with(value, aliases, scalar_text)
}

pub fn lookup_f64(value: &JsonValue, aliases: &[&str]) -> Option<f64> {
    lookup_with(value, aliases, scalar_f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn exact_match_wins_over_case_insensitive_match() {
        let record = json!({ "NOTICEID": "upper", "noticeId": "exact" });
        assert_eq!(lookup_str(&record, &["noticeId"]).as_deref(), Some("exact"));
    }

    #[test]
    fn later_exact_alias_wins_over_earlier_case_insensitive_alias() {
        let record = json!({ "Subject": "loose", "title": "exact" });
        assert_eq!(lookup_str(&record, &["subject", "title"]).as_deref(), Some("exact"));
    }

    #[test]
    fn falls_back_to_case_insensitive_match() {
        let record = json!({ "NoticeID": "abc123" });
        assert_eq!(
            lookup_str(&record, &["noticeId", "notice_id"]).as_deref(),
            Some("abc123")
        );
    }

    #[test]
    fn dotted_paths_walk_nested_objects() {
        let record = json!({
            "placeOfPerformance": { "state": { "code": "AK", "name": "Alaska" } }
        });
        assert_eq!(
            lookup_str(&record, &["placeOfPerformance.state.code"]).as_deref(),
            Some("AK")
        );
        assert_eq!(lookup_str(&record, &["placeOfPerformance.state"]), None);
    }

    #[test]
    fn blanks_and_nulls_are_skipped() {
        let record = json!({ "departmentName": "  ", "agency": null, "department": "DOD" });
        assert_eq!(
            lookup_str(&record, &["departmentName", "agency", "department"]).as_deref(),
            Some("DOD")
        );
        assert!(lookup(&record, &["departmentName", "agency"]).is_none());
    }

    #[test]
    fn numbers_are_stringified_and_parsed() {
        let record = json!({ "naicsCode": 236220, "amount": "1,250.50" });
        assert_eq!(lookup_str(&record, &["naicsCode"]).as_deref(), Some("236220"));
        assert_eq!(lookup_f64(&record, &["amount"]), Some(1250.5));
    }
}
