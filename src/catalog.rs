//! Catalog builder: raw source records + optional definition documents →
//! normalized [`CatalogRow`]s.
//!
//! Raw records arrive as one CSV row per cohort. A definitions directory may
//! hold one full JSON definition document per cohort id; definitions enrich
//! the keyword bag but are never required. A record whose id column fails to
//! parse is retained — it simply never correlates with a definition.

use anyhow::{Context, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

use crate::models::{CatalogRow, LogicFeatures, SourceMeta};
use crate::text::tokenize;

/// One raw source record: column name → value.
///
/// CSV cells load as JSON strings; script-produced records may carry real
/// JSON arrays (e.g. a concept-id list), which the parsers below accept.
pub type RawRecord = serde_json::Map<String, Value>;

/// Load raw records from a CSV file. Headers are trimmed and a UTF-8 BOM on
/// the first header is stripped.
pub fn load_metadata(path: &Path) -> Result<Vec<RawRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("Failed to read metadata CSV: {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .context("Failed to read CSV headers")?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result.context("Failed to read CSV record")?;
        let mut row = RawRecord::new();
        for (header, value) in headers.iter().zip(record.iter()) {
            row.insert(header.clone(), Value::String(value.to_string()));
        }
        records.push(row);
    }
    Ok(records)
}

/// Load definition documents from a directory of `<id>.json` files.
///
/// The cohort id comes from the document's `cohortId` or `id` field, falling
/// back to the file stem. Unreadable or malformed files are skipped
/// individually; a bad definition never aborts the batch.
pub fn load_definitions(dir: Option<&Path>) -> HashMap<i64, Value> {
    let mut definitions = HashMap::new();
    let Some(dir) = dir else {
        return definitions;
    };
    let Ok(entries) = std::fs::read_dir(dir) else {
        return definitions;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&path) else {
            continue;
        };
        let Ok(data) = serde_json::from_str::<Value>(&content) else {
            continue;
        };
        let cohort_id = data
            .get("cohortId")
            .and_then(parse_int)
            .or_else(|| data.get("id").and_then(parse_int))
            .or_else(|| {
                path.file_stem()
                    .and_then(|s| s.to_str())
                    .and_then(|s| s.trim().parse::<i64>().ok())
            });
        if let Some(id) = cohort_id {
            definitions.insert(id, data);
        }
    }
    definitions
}

/// Coerce a JSON value to an integer. Strings are trimmed and parsed;
/// anything non-numeric yields `None`.
pub fn parse_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    }
}

/// Extract a list of integers from a raw value.
///
/// A JSON array coerces element-wise, dropping non-numeric entries.
/// Any other value is stringified and every digit run becomes one integer.
pub fn parse_int_list(value: Option<&Value>) -> Vec<i64> {
    let Some(value) = value else {
        return Vec::new();
    };
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().filter_map(parse_int).collect(),
        other => {
            let text = match other {
                Value::String(s) => s.clone(),
                v => v.to_string(),
            };
            digit_runs(&text)
        }
    }
}

fn digit_runs(text: &str) -> Vec<i64> {
    let mut out = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch.is_ascii_digit() {
            current.push(ch);
        } else if !current.is_empty() {
            if let Ok(n) = current.parse::<i64>() {
                out.push(n);
            }
            current.clear();
        }
    }
    if !current.is_empty() {
        if let Ok(n) = current.parse::<i64>() {
            out.push(n);
        }
    }
    out
}

/// Split a tag value on `;`, `,`, `|`, or whitespace runs, stripping the
/// leading `#` and surrounding whitespace from each item and dropping
/// empties.
pub fn split_tags(value: Option<&Value>) -> Vec<String> {
    let Some(value) = value else {
        return Vec::new();
    };
    let items: Vec<String> = match value {
        Value::Null => return Vec::new(),
        Value::Array(list) => list
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect(),
        Value::String(s) => s
            .split(|c: char| c == ';' || c == ',' || c == '|' || c.is_whitespace())
            .map(|s| s.to_string())
            .collect(),
        other => other
            .to_string()
            .split(|c: char| c == ';' || c == ',' || c == '|' || c.is_whitespace())
            .map(|s| s.to_string())
            .collect(),
    };
    items
        .iter()
        .map(|item| item.trim().trim_start_matches('#').trim().to_string())
        .filter(|item| !item.is_empty())
        .collect()
}

fn get_str<'a>(meta: &'a RawRecord, key: &str) -> &'a str {
    meta.get(key).and_then(|v| v.as_str()).unwrap_or("")
}

fn first_non_empty<'a>(meta: &'a RawRecord, keys: &[&str]) -> &'a str {
    for key in keys {
        let value = get_str(meta, key);
        if !value.is_empty() {
            return value;
        }
    }
    ""
}

/// Boolean-flag semantics for CSV cells: empty, `false`, `0`, and `no` are
/// unset; any other value sets the flag.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Some(Value::String(s)) => {
            let lower = s.trim().to_ascii_lowercase();
            !(lower.is_empty() || lower == "false" || lower == "0" || lower == "no")
        }
        Some(_) => false,
    }
}

fn dedup_preserving_order(keywords: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    keywords
        .into_iter()
        .filter(|kw| seen.insert(kw.clone()))
        .collect()
}

/// Build one catalog row from a raw record and its optional definition.
pub fn build_catalog_row(meta: &RawRecord, definition: Option<&Value>) -> CatalogRow {
    let cohort_id = meta.get("cohortId").and_then(parse_int);
    let name = first_non_empty(meta, &["cohortName", "cohortNameLong", "cohortNameFormatted"]);
    let short_description = first_non_empty(meta, &["logicDescription", "notes"]);
    let tags = split_tags(meta.get("hashTag"));
    let ontology_keys = parse_int_list(meta.get("recommendedReferentConceptIds"));

    let mut signals = Vec::new();
    let status = get_str(meta, "status");
    if !status.is_empty() {
        signals.push(format!("status:{status}"));
    }
    if is_truthy(meta.get("isReferenceCohort")) {
        signals.push("reference".to_string());
    }
    if is_truthy(meta.get("hasWashoutInText")) {
        signals.push("washout".to_string());
    }

    let logic_features = LogicFeatures {
        number_of_inclusion_rules: meta
            .get("numberOfInclusionRules")
            .and_then(parse_int)
            .unwrap_or(0),
        number_of_concept_sets: meta
            .get("numberOfConceptSets")
            .and_then(parse_int)
            .unwrap_or(0),
        domains_in_entry_events: get_str(meta, "domainsInEntryEvents").to_string(),
        has_condition_type: get_str(meta, "hasConditionType").to_string(),
        has_drug_type: get_str(meta, "hasDrugType").to_string(),
        has_observation_type: get_str(meta, "hasObservationType").to_string(),
        has_procedure_type: get_str(meta, "hasProcedureType").to_string(),
    };

    let mut pop_keywords = dedup_preserving_order(tokenize(&format!(
        "{} {} {}",
        name,
        short_description,
        tags.join(" ")
    )));
    if let Some(definition) = definition {
        let description = definition
            .get("description")
            .and_then(|v| v.as_str())
            .filter(|s| !s.is_empty())
            .or_else(|| definition.get("name").and_then(|v| v.as_str()))
            .unwrap_or("");
        if !description.is_empty() {
            pop_keywords.extend(tokenize(description));
            pop_keywords = dedup_preserving_order(pop_keywords);
        }
    }

    let source_meta = SourceMeta {
        librarian: non_empty_string(meta, "librarian"),
        status: non_empty_string(meta, "status"),
        added_version: non_empty_string(meta, "addedVersion"),
        created_date: non_empty_string(meta, "createdDate"),
        modified_date: non_empty_string(meta, "modifiedDate"),
        last_modified_by: non_empty_string(meta, "lastModifiedBy"),
    };

    CatalogRow {
        cohort_id,
        name: name.to_string(),
        short_description: short_description.to_string(),
        tags,
        ontology_keys,
        signals,
        logic_features,
        pop_keywords,
        source_meta,
        text_for_embedding: None,
        text_for_embedding_hash: None,
    }
}

fn non_empty_string(meta: &RawRecord, key: &str) -> Option<String> {
    let value = get_str(meta, key);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> RawRecord {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_split_tags_delimiters_and_hash() {
        let value = json!("#cardio; metabolic,renal |  #chronic   extra");
        assert_eq!(
            split_tags(Some(&value)),
            vec!["cardio", "metabolic", "renal", "chronic", "extra"]
        );
    }

    #[test]
    fn test_split_tags_drops_empties() {
        let value = json!(";;, # ,|");
        assert!(split_tags(Some(&value)).is_empty());
        assert!(split_tags(None).is_empty());
    }

    #[test]
    fn test_parse_int_list_from_array() {
        let value = json!([1, "2", "x", 3.5, 4]);
        assert_eq!(parse_int_list(Some(&value)), vec![1, 2, 4]);
    }

    #[test]
    fn test_parse_int_list_digit_runs() {
        let value = json!("ids: 312327, 4329847; see also 77");
        assert_eq!(parse_int_list(Some(&value)), vec![312327, 4329847, 77]);
    }

    #[test]
    fn test_build_row_name_fallback_and_signals() {
        let meta = record(&[
            ("cohortId", json!("17")),
            ("cohortNameLong", json!("Heart Failure Long")),
            ("logicDescription", json!("Incident heart failure")),
            ("status", json!("approved")),
            ("isReferenceCohort", json!("True")),
            ("hasWashoutInText", json!("false")),
        ]);
        let row = build_catalog_row(&meta, None);
        assert_eq!(row.cohort_id, Some(17));
        assert_eq!(row.name, "Heart Failure Long");
        assert_eq!(
            row.signals,
            vec!["status:approved".to_string(), "reference".to_string()]
        );
    }

    #[test]
    fn test_build_row_unparseable_id_retained() {
        let meta = record(&[("cohortId", json!("n/a")), ("cohortName", json!("Alpha"))]);
        let row = build_catalog_row(&meta, None);
        assert_eq!(row.cohort_id, None);
        assert_eq!(row.name, "Alpha");
    }

    #[test]
    fn test_keyword_bag_dedup_order() {
        let meta = record(&[
            ("cohortId", json!("1")),
            ("cohortName", json!("Atrial Fibrillation")),
            ("logicDescription", json!("Atrial fibrillation diagnosis")),
            ("hashTag", json!("#cardio")),
        ]);
        let row = build_catalog_row(&meta, None);
        assert_eq!(
            row.pop_keywords,
            vec!["atrial", "fibrillation", "diagnosis", "cardio"]
        );
    }

    #[test]
    fn test_keyword_bag_definition_appended() {
        let meta = record(&[
            ("cohortId", json!("1")),
            ("cohortName", json!("Alpha")),
        ]);
        let definition = json!({"description": "alpha with extra terms"});
        let row = build_catalog_row(&meta, Some(&definition));
        assert_eq!(row.pop_keywords, vec!["alpha", "with", "extra", "terms"]);
    }

    #[test]
    fn test_load_definitions_skips_malformed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("12.json"), r#"{"name": "by-stem"}"#).unwrap();
        std::fs::write(
            dir.path().join("named.json"),
            r#"{"cohortId": 99, "name": "by-field"}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{not json").unwrap();
        std::fs::write(dir.path().join("ignored.txt"), "not a definition").unwrap();

        let defs = load_definitions(Some(dir.path()));
        assert_eq!(defs.len(), 2);
        assert_eq!(defs[&12]["name"], "by-stem");
        assert_eq!(defs[&99]["name"], "by-field");
    }

    #[test]
    fn test_load_metadata_trims_bom_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("meta.csv");
        std::fs::write(
            &path,
            "\u{feff}cohortId,cohortName\n1,Alpha\n2,Beta\n",
        )
        .unwrap();
        let rows = load_metadata(&path).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["cohortId"], "1");
        assert_eq!(rows[1]["cohortName"], "Beta");
    }
}
