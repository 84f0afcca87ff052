//! Offline aggregation of evaluation records
//!
//! Input is one large text blob holding many quasi-JSON records
//! (`{'index': 0, 'overall_score': 4.2, ...}`) mixed with arbitrary text.
//! Records are cut out with a brace-depth scanner, parsed one by one, and
//! anything unreadable is counted and skipped.

use crate::error::OrchestrationError;
use crate::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Result of cutting records out of a blob.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnippetScan {
    /// Balanced `{ ... }` substrings that open with an `index` key.
    pub snippets: Vec<String>,
    /// Records that were still open when the next record or the end of
    /// input arrived.
    pub truncated: usize,
}

/// True if a record opens at byte `at`: `{`, optional whitespace, then an
/// `index` key in single or double quotes.
fn record_starts_at(text: &str, at: usize) -> bool {
    let Some(rest) = text[at..].strip_prefix('{') else {
        return false;
    };
    let rest = rest.trim_start();
    rest.starts_with("\"index\"") || rest.starts_with("'index'")
}

/// Cut every record out of `text`.
///
/// Braces inside quoted strings do not count. Stray closing braces outside
/// a record are ignored. A record start seen while another record is open
/// (even inside one of its strings) closes the open one as truncated.
pub fn extract_record_snippets(text: &str) -> SnippetScan {
    let mut scan = SnippetScan::default();

    let mut open: Option<usize> = None;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text.char_indices() {
        if c == '{' && record_starts_at(text, i) {
            if open.is_some() {
                scan.truncated += 1;
            }
            open = Some(i);
            depth = 1;
            quote = None;
            escaped = false;
            continue;
        }

        let Some(start) = open else {
            continue;
        };

        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    scan.snippets.push(text[start..=i].to_string());
                    open = None;
                }
            }
            _ => {}
        }
    }

    if open.is_some() {
        scan.truncated += 1;
    }

    scan
}

/// Rewrite Python literal syntax as JSON: single-quoted strings,
/// `True`/`False`/`None` and trailing commas.
pub fn normalize_python_literal(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len());
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' => {
                out.push('"');
                i += 1;
                while i < chars.len() && chars[i] != c {
                    let ch = chars[i];
                    if ch == '\\' && i + 1 < chars.len() {
                        if chars[i + 1] == '\'' {
                            out.push('\'');
                        } else {
                            out.push('\\');
                            out.push(chars[i + 1]);
                        }
                        i += 2;
                        continue;
                    }
                    if ch == '"' {
                        out.push_str("\\\"");
                    } else {
                        out.push(ch);
                    }
                    i += 1;
                }
                out.push('"');
                i += 1;
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|ch| !ch.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                }
                i += 1;
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

/// One parsed evaluation record. Boolean metrics are stored as 0.0 / 1.0.
/// A record without a numeric overall score still contributes its
/// dimensions and metrics.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EvaluationRecord {
    pub index: Option<i64>,
    pub overall_score: Option<f64>,
    pub dimensions: BTreeMap<String, f64>,
    pub derived_metrics: BTreeMap<String, f64>,
}

fn numeric(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        _ => None,
    }
}

fn numeric_map(value: Option<&Value>) -> BTreeMap<String, f64> {
    value
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(k, v)| numeric(v).map(|n| (k.clone(), n)))
                .collect()
        })
        .unwrap_or_default()
}

/// Parse one snippet as JSON, falling back to Python-literal syntax.
pub fn parse_record(snippet: &str) -> Result<EvaluationRecord> {
    let value: Value = serde_json::from_str(snippet)
        .or_else(|_| serde_json::from_str(&normalize_python_literal(snippet)))
        .map_err(|e| OrchestrationError::MalformedRecord(format!("unparseable record: {}", e)))?;

    if !value.is_object() {
        return Err(OrchestrationError::MalformedRecord(
            "record is not an object".to_string(),
        ));
    }

    Ok(EvaluationRecord {
        index: value.get("index").and_then(Value::as_i64),
        overall_score: value
            .get("overall_score")
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite()),
        dimensions: numeric_map(value.get("dimensions")),
        derived_metrics: numeric_map(value.get("derived_metrics")),
    })
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BatchEvaluationSummary {
    pub records_parsed: usize,
    pub records_skipped: usize,
    /// Parsed records that carried a numeric overall score.
    pub records_scored: usize,
    pub mean_overall_score: f64,
    /// Mean over the records that reported each dimension.
    pub dimension_means: BTreeMap<String, f64>,
    pub metric_means: BTreeMap<String, f64>,
}

fn means(maps: impl Iterator<Item = (String, f64)>) -> BTreeMap<String, f64> {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for (name, value) in maps {
        let entry = sums.entry(name).or_insert((0.0, 0));
        entry.0 += value;
        entry.1 += 1;
    }
    sums.into_iter()
        .map(|(name, (sum, count))| (name, sum / count as f64))
        .collect()
}

/// Reduce parsed records. No records yields zero means, not an error.
pub fn aggregate_records(records: &[EvaluationRecord], skipped: usize) -> BatchEvaluationSummary {
    if records.is_empty() {
        return BatchEvaluationSummary {
            records_skipped: skipped,
            ..Default::default()
        };
    }

    let scores: Vec<f64> = records.iter().filter_map(|r| r.overall_score).collect();
    let mean_overall_score = if scores.is_empty() {
        0.0
    } else {
        scores.iter().sum::<f64>() / scores.len() as f64
    };

    BatchEvaluationSummary {
        records_parsed: records.len(),
        records_skipped: skipped,
        records_scored: scores.len(),
        mean_overall_score,
        dimension_means: means(
            records
                .iter()
                .flat_map(|r| r.dimensions.iter().map(|(k, v)| (k.clone(), *v))),
        ),
        metric_means: means(
            records
                .iter()
                .flat_map(|r| r.derived_metrics.iter().map(|(k, v)| (k.clone(), *v))),
        ),
    }
}

/// Scan, parse and aggregate a whole blob.
pub fn aggregate_evaluation_blob(text: &str) -> BatchEvaluationSummary {
    let scan = extract_record_snippets(text);
    let mut skipped = scan.truncated;
    let mut records = Vec::with_capacity(scan.snippets.len());

    for snippet in &scan.snippets {
        match parse_record(snippet) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(error = %e, "Skipping malformed evaluation record");
                skipped += 1;
            }
        }
    }

    debug!(truncated = scan.truncated, snippets = scan.snippets.len(), "Evaluation blob scanned");

    let summary = aggregate_records(&records, skipped);
    info!(
        parsed = summary.records_parsed,
        scored = summary.records_scored,
        skipped = summary.records_skipped,
        mean_overall_score = summary.mean_overall_score,
        "Evaluation batch aggregated"
    );
    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        let scan = extract_record_snippets("");
        assert!(scan.snippets.is_empty());
        assert_eq!(scan.truncated, 0);

        let summary = aggregate_evaluation_blob("");
        assert_eq!(summary, BatchEvaluationSummary::default());
    }

    #[test]
    fn test_truncated_at_depth_is_counted() {
        let scan = extract_record_snippets("noise {'index': 0, 'dimensions': {'coverage': 4");
        assert!(scan.snippets.is_empty());
        assert_eq!(scan.truncated, 1);
    }

    #[test]
    fn test_extra_closing_brace_is_ignored() {
        let text = "}} {\"index\": 1, \"overall_score\": 3.0} }";
        let scan = extract_record_snippets(text);
        assert_eq!(scan.snippets, vec!["{\"index\": 1, \"overall_score\": 3.0}".to_string()]);
        assert_eq!(scan.truncated, 0);
    }

    #[test]
    fn test_braces_inside_strings_do_not_count() {
        let text = "{'index': 2, 'overall_score': 4.0, 'feedback': 'use {braces} freely }'}";
        let scan = extract_record_snippets(text);
        assert_eq!(scan.snippets.len(), 1);
        assert_eq!(parse_record(&scan.snippets[0]).unwrap().overall_score, Some(4.0));
    }

    #[test]
    fn test_new_record_closes_open_one() {
        let text = "{'index': 0, 'overall_score': 2.0, 'feedback': 'cut off\n{'index': 1, 'overall_score': 5.0}";
        let scan = extract_record_snippets(text);
        assert_eq!(scan.truncated, 1);
        assert_eq!(scan.snippets.len(), 1);
        assert_eq!(parse_record(&scan.snippets[0]).unwrap().index, Some(1));
    }

    #[test]
    fn test_plain_object_without_index_is_not_a_record() {
        let scan = extract_record_snippets("{\"score\": 1} {'index': 3, 'overall_score': 1.0}");
        assert_eq!(scan.snippets.len(), 1);
    }

    #[test]
    fn test_python_literal_normalisation() {
        let normalised = normalize_python_literal("{'a': True, 'b': None, 'c': 'it\\'s \"x\"', 'd': [1, 2,],}");
        let value: Value = serde_json::from_str(&normalised).unwrap();
        assert_eq!(value["a"], true);
        assert!(value["b"].is_null());
        assert_eq!(value["c"], "it's \"x\"");
        assert_eq!(value["d"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_record_coerces_booleans_and_skips_text() {
        let record = parse_record(
            "{'index': 7, 'overall_score': 4.5, 'dimensions': {'coverage': 5, 'note': 'x'}, \
             'derived_metrics': {'summary_valid_json': True, 'brief_chars': 812}}",
        )
        .unwrap();
        assert_eq!(record.index, Some(7));
        assert_eq!(record.dimensions.len(), 1);
        assert_eq!(record.derived_metrics["summary_valid_json"], 1.0);
        assert_eq!(record.derived_metrics["brief_chars"], 812.0);
    }

    #[test]
    fn test_missing_score_keeps_dimensions() {
        let record = parse_record("{'index': 1, 'overall_score': None, 'dimensions': {'coverage': 3}}").unwrap();
        assert_eq!(record.overall_score, None);
        assert_eq!(record.dimensions["coverage"], 3.0);
    }

    #[test]
    fn test_non_object_is_malformed() {
        let result = parse_record("[1, 2]");
        assert!(matches!(result, Err(OrchestrationError::MalformedRecord(_))));
    }

    #[test]
    fn test_unscored_records_count_toward_dimensions_only() {
        let records = vec![
            parse_record("{'index': 0, 'overall_score': 4.0, 'dimensions': {'coverage': 4}}").unwrap(),
            parse_record("{'index': 1, 'overall_score': 'n/a', 'dimensions': {'coverage': 2}, \
                          'derived_metrics': {'summary_valid_json': False}}")
            .unwrap(),
        ];
        let summary = aggregate_records(&records, 0);

        assert_eq!(summary.records_parsed, 2);
        assert_eq!(summary.records_scored, 1);
        assert_eq!(summary.mean_overall_score, 4.0);
        assert_eq!(summary.dimension_means["coverage"], 3.0);
        assert_eq!(summary.metric_means["summary_valid_json"], 0.0);
    }

    #[test]
    fn test_dimension_means_use_reporting_records_only() {
        let records = vec![
            parse_record("{'index': 0, 'overall_score': 4.0, 'dimensions': {'coverage': 4, 'clarity': 2}}").unwrap(),
            parse_record("{'index': 1, 'overall_score': 2.0, 'dimensions': {'coverage': 2}}").unwrap(),
        ];
        let summary = aggregate_records(&records, 0);
        assert_eq!(summary.mean_overall_score, 3.0);
        assert_eq!(summary.dimension_means["coverage"], 3.0);
        assert_eq!(summary.dimension_means["clarity"], 2.0);
    }
}
