//! Run memory
//!
//! Append-only store of completed-run snapshots keyed by (product, region).
//! Entries are frozen behind `Arc` once appended; there is no update or
//! delete, only later entries and an explicit `reset`.

use crate::error::OrchestrationError;
use crate::models::{
    CompetitorSnapshot, EvaluationResult, FxScenarioSet, MarginScenarioSet, PricingRecommendation,
    ProductSnapshot, RiskLevel,
};
use crate::Result;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// Normalised (trimmed, lower-cased) product/region key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MemoryKey {
    pub product: String,
    pub region: String,
}

impl MemoryKey {
    pub fn new(product: &str, region: &str) -> Self {
        Self {
            product: product.trim().to_lowercase(),
            region: region.trim().to_lowercase(),
        }
    }
}

/// Artifacts captured from one completed run.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RunSnapshot {
    pub product: Option<ProductSnapshot>,
    pub competitors: Option<CompetitorSnapshot>,
    pub fx_scenarios: Option<FxScenarioSet>,
    pub margin_scenarios: Option<MarginScenarioSet>,
    pub recommendation: Option<PricingRecommendation>,
    pub fx_risk: Option<RiskLevel>,
    pub structured_summary: Value,
    pub evaluation: Option<EvaluationResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryEntry {
    pub entry_id: Uuid,
    pub run_id: Uuid,
    pub product: String,
    pub region: String,
    pub reporting_currency: String,
    pub timestamp: DateTime<Utc>,
    pub tags: Vec<String>,
    pub request_fingerprint: String,
    pub target_margin: f64,
    pub manager_notes: Option<String>,
    pub snapshot: RunSnapshot,
}

impl MemoryEntry {
    pub fn recommended_price(&self) -> Option<f64> {
        self.snapshot
            .recommendation
            .as_ref()
            .map(|r| r.recommended_price)
    }

    pub fn evaluation_score(&self) -> Option<f64> {
        self.snapshot.evaluation.as_ref().map(|e| e.overall_score)
    }
}

/// Aggregates over every stored entry for one key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemoryMetrics {
    pub session_count: usize,
    pub avg_evaluation_score: Option<f64>,
    pub avg_recommended_price: Option<f64>,
    pub avg_target_margin: Option<f64>,
    pub first_timestamp: DateTime<Utc>,
    pub last_timestamp: DateTime<Utc>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push_str("...");
    cut
}

#[derive(Clone, Default)]
pub struct MemoryService {
    entries: Arc<RwLock<HashMap<MemoryKey, Vec<Arc<MemoryEntry>>>>>,
}

impl MemoryService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. Its timestamp is nudged forward by a microsecond if
    /// needed so timestamps stay strictly increasing per key.
    pub async fn append(&self, mut entry: MemoryEntry) -> Result<Arc<MemoryEntry>> {
        if entry.product.trim().is_empty() || entry.region.trim().is_empty() {
            return Err(OrchestrationError::MemoryError(
                "memory entries need a product and a region".to_string(),
            ));
        }

        let key = MemoryKey::new(&entry.product, &entry.region);
        let mut entries = self.entries.write().await;
        let history = entries.entry(key).or_default();

        if let Some(last) = history.last() {
            if entry.timestamp <= last.timestamp {
                entry.timestamp = last.timestamp + Duration::microseconds(1);
            }
        }

        let entry = Arc::new(entry);
        history.push(Arc::clone(&entry));

        info!(
            product = %entry.product,
            region = %entry.region,
            run_id = %entry.run_id,
            sessions = history.len(),
            "Memory entry appended"
        );

        Ok(entry)
    }

    /// Entries for the key, newest first, optionally bounded.
    pub async fn search(&self, product: &str, region: &str, limit: Option<usize>) -> Vec<Arc<MemoryEntry>> {
        let entries = self.entries.read().await;
        entries
            .get(&MemoryKey::new(product, region))
            .map(|history| {
                history
                    .iter()
                    .rev()
                    .take(limit.unwrap_or(usize::MAX))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn latest(&self, product: &str, region: &str) -> Option<Arc<MemoryEntry>> {
        let entries = self.entries.read().await;
        entries
            .get(&MemoryKey::new(product, region))
            .and_then(|history| history.last().cloned())
    }

    pub async fn session_count(&self, product: &str, region: &str) -> usize {
        let entries = self.entries.read().await;
        entries
            .get(&MemoryKey::new(product, region))
            .map_or(0, Vec::len)
    }

    pub async fn keys(&self) -> Vec<MemoryKey> {
        let entries = self.entries.read().await;
        let mut keys: Vec<MemoryKey> = entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Readable digest of the most recent sessions for a key.
    pub async fn consolidate(
        &self,
        product: &str,
        region: &str,
        max_sessions: usize,
        max_chars_per_note: usize,
    ) -> String {
        let recent = self.search(product, region, Some(max_sessions)).await;
        let key = MemoryKey::new(product, region);

        if recent.is_empty() {
            return format!(
                "No stored pricing sessions for product '{}' in region '{}'.",
                key.product, key.region
            );
        }

        let mut lines = vec![format!(
            "Pricing memory for product '{}' in region '{}' (last {} sessions):",
            key.product,
            key.region,
            recent.len()
        )];

        for (idx, entry) in recent.iter().enumerate() {
            let price = entry
                .recommended_price()
                .map(|p| format!("{:.2} {}", p, entry.reporting_currency))
                .unwrap_or_else(|| "n/a".to_string());
            let score = entry
                .evaluation_score()
                .map(|s| format!("{:.2}", s))
                .unwrap_or_else(|| "n/a".to_string());
            let risk = entry
                .snapshot
                .fx_risk
                .map(|r| r.to_string())
                .unwrap_or_else(|| "n/a".to_string());
            let notes = entry
                .manager_notes
                .as_deref()
                .map(|n| truncate_chars(n, max_chars_per_note))
                .unwrap_or_default();

            lines.push(format!(
                "- #{} at {}: price {}, target margin {:.1}%, fx risk {}, eval {}, notes '{}'",
                idx + 1,
                entry.timestamp.format("%Y-%m-%d %H:%M:%S"),
                price,
                entry.target_margin * 100.0,
                risk,
                score,
                notes
            ));
        }

        lines.join("\n")
    }

    pub async fn aggregate_metrics(&self, product: &str, region: &str) -> Option<MemoryMetrics> {
        let entries = self.entries.read().await;
        let history = entries.get(&MemoryKey::new(product, region))?;
        let first = history.first()?;
        let last = history.last()?;

        let scores: Vec<f64> = history.iter().filter_map(|e| e.evaluation_score()).collect();
        let prices: Vec<f64> = history.iter().filter_map(|e| e.recommended_price()).collect();
        let margins: Vec<f64> = history.iter().map(|e| e.target_margin).collect();

        Some(MemoryMetrics {
            session_count: history.len(),
            avg_evaluation_score: mean(&scores),
            avg_recommended_price: mean(&prices),
            avg_target_margin: mean(&margins),
            first_timestamp: first.timestamp,
            last_timestamp: last.timestamp,
        })
    }

    /// JSON export of every key (or one key) with its entries, oldest first.
    pub async fn export_snapshot(&self, filter: Option<(&str, &str)>) -> Result<Value> {
        let wanted = filter.map(|(p, r)| MemoryKey::new(p, r));
        let entries = self.entries.read().await;

        let mut keys: Vec<&MemoryKey> = entries
            .keys()
            .filter(|k| wanted.as_ref().map_or(true, |w| *k == w))
            .collect();
        keys.sort();

        let mut export = serde_json::Map::new();
        for key in keys {
            let history: Vec<&MemoryEntry> = entries[key].iter().map(|e| e.as_ref()).collect();
            export.insert(
                format!("{}|{}", key.product, key.region),
                serde_json::to_value(history)?,
            );
        }

        Ok(json!({
            "exported_at": Utc::now(),
            "keys": export,
        }))
    }

    /// Drop every entry, returning how many were stored.
    pub async fn reset(&self) -> usize {
        let mut entries = self.entries.write().await;
        let dropped = entries.values().map(Vec::len).sum();
        entries.clear();
        dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(product: &str, region: &str, ts: DateTime<Utc>, score: f64) -> MemoryEntry {
        MemoryEntry {
            entry_id: Uuid::new_v4(),
            run_id: Uuid::new_v4(),
            product: product.to_string(),
            region: region.to_string(),
            reporting_currency: "EUR".to_string(),
            timestamp: ts,
            tags: vec!["test".to_string()],
            request_fingerprint: "fp".to_string(),
            target_margin: 0.25,
            manager_notes: Some("keep it above competitors' mid".to_string()),
            snapshot: RunSnapshot {
                evaluation: Some(EvaluationResult {
                    overall_score: score,
                    dimensions: Default::default(),
                    derived_metrics: Default::default(),
                    feedback: String::new(),
                    flags: vec![],
                }),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_search_is_newest_first_and_keys_normalised() {
        let memory = MemoryService::new();
        let now = Utc::now();
        memory.append(entry("LaptopX", "EU", now, 3.0)).await.unwrap();
        memory.append(entry(" laptopx ", "eu", now, 4.0)).await.unwrap();

        let found = memory.search("LAPTOPX", "Eu", None).await;
        assert_eq!(found.len(), 2);
        assert!(found[0].timestamp > found[1].timestamp);
        assert_eq!(found[0].evaluation_score(), Some(4.0));

        assert_eq!(memory.search("LaptopX", "EU", Some(1)).await.len(), 1);
        assert_eq!(memory.keys().await.len(), 1);
    }

    #[tokio::test]
    async fn test_same_timestamp_is_bumped() {
        let memory = MemoryService::new();
        let now = Utc::now();
        let first = memory.append(entry("p", "r", now, 1.0)).await.unwrap();
        let second = memory.append(entry("p", "r", now, 1.0)).await.unwrap();
        assert!(second.timestamp > first.timestamp);
        assert_eq!(first.timestamp, now);
    }

    #[tokio::test]
    async fn test_metrics_and_consolidation() {
        let memory = MemoryService::new();
        let now = Utc::now();
        memory.append(entry("p", "r", now, 2.0)).await.unwrap();
        memory.append(entry("p", "r", now + Duration::seconds(5), 4.0)).await.unwrap();

        let metrics = memory.aggregate_metrics("p", "r").await.unwrap();
        assert_eq!(metrics.session_count, 2);
        assert_eq!(metrics.avg_evaluation_score, Some(3.0));
        assert_eq!(metrics.avg_target_margin, Some(0.25));
        assert!(metrics.avg_recommended_price.is_none());

        let text = memory.consolidate("p", "r", 5, 10).await;
        assert!(text.starts_with("Pricing memory for product 'p'"));
        assert!(text.contains("#2"));
        assert!(text.contains("keep it ab..."));

        assert!(memory.consolidate("q", "r", 5, 10).await.starts_with("No stored"));
    }

    #[tokio::test]
    async fn test_export_and_reset() {
        let memory = MemoryService::new();
        memory.append(entry("a", "eu", Utc::now(), 1.0)).await.unwrap();
        memory.append(entry("b", "us", Utc::now(), 1.0)).await.unwrap();

        let all = memory.export_snapshot(None).await.unwrap();
        assert_eq!(all["keys"].as_object().unwrap().len(), 2);
        let one = memory.export_snapshot(Some(("A", "EU"))).await.unwrap();
        assert!(one["keys"].get("a|eu").is_some());
        assert_eq!(one["keys"].as_object().unwrap().len(), 1);

        assert_eq!(memory.reset().await, 2);
        assert!(memory.latest("a", "eu").await.is_none());
    }

    #[tokio::test]
    async fn test_rejects_blank_key() {
        let memory = MemoryService::new();
        let result = memory.append(entry(" ", "eu", Utc::now(), 1.0)).await;
        assert!(matches!(result, Err(OrchestrationError::MemoryError(_))));
    }
}
