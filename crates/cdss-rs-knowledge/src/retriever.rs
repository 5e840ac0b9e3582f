//! Tiered retrieval over a knowledge store.
//!
//! Tiers run in strict order and stop at the first one producing results:
//! hybrid search at the configured threshold, the same search with a relaxed
//! threshold, then per-keyword substring matching. Store failures are recorded
//! in the report and treated as an empty tier.

use crate::model::{RetrievalResult, SearchParams};
use crate::normalize::NormalizedQuery;
use crate::store::KnowledgeStore;
use log::{debug, info, warn};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Retrieval stage that produced (or attempted to produce) results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RetrievalTier {
    /// Hybrid search at the primary threshold.
    Primary,
    /// Hybrid search at the relaxed threshold.
    Relaxed,
    /// Per-keyword substring fallback.
    Keyword,
}

impl fmt::Display for RetrievalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RetrievalTier::Primary => "tier1",
            RetrievalTier::Relaxed => "tier2",
            RetrievalTier::Keyword => "tier3",
        };
        f.write_str(label)
    }
}

/// Thresholds and caps for each tier.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrieverSettings {
    pub primary_threshold: f32,
    pub relaxed_threshold: f32,
    pub match_count: usize,
    pub keyword_count: usize,
    pub keyword_match_count: usize,
}

impl Default for RetrieverSettings {
    fn default() -> Self {
        Self {
            primary_threshold: 0.05,
            relaxed_threshold: 0.0,
            match_count: 5,
            keyword_count: 3,
            keyword_match_count: 2,
        }
    }
}

/// Outcome of one retrieval, including the tiers that were tried.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievalReport {
    pub attempted: Vec<RetrievalTier>,
    /// Tier whose results were kept; None when every tier came back empty.
    pub resolved: Option<RetrievalTier>,
    pub errors: Vec<(RetrievalTier, String)>,
    pub results: Vec<RetrievalResult>,
}

impl RetrievalReport {
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }
}

/// Runs the tier cascade against a shared store.
#[derive(Clone)]
pub struct HybridRetriever {
    store: Arc<dyn KnowledgeStore>,
    settings: RetrieverSettings,
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn KnowledgeStore>, settings: RetrieverSettings) -> Self {
        Self { store, settings }
    }

    pub fn settings(&self) -> &RetrieverSettings {
        &self.settings
    }

    /// Global principles from the store; empty when the store cannot serve them.
    pub async fn principles(&self) -> Vec<String> {
        match self.store.principles().await {
            Ok(principles) => principles,
            Err(err) => {
                warn!("failed to load global principles (error={})", err);
                Vec::new()
            }
        }
    }

    /// Retrieve grounding records for a query embedding and its normalized form.
    pub async fn retrieve(&self, embedding: &[f32], query: &NormalizedQuery) -> RetrievalReport {
        let mut report = RetrievalReport::default();

        for (tier, threshold) in [
            (RetrievalTier::Primary, self.settings.primary_threshold),
            (RetrievalTier::Relaxed, self.settings.relaxed_threshold),
        ] {
            let params = SearchParams {
                embedding: embedding.to_vec(),
                text: query.search_text.clone(),
                threshold,
                count: self.settings.match_count,
            };
            report.attempted.push(tier);
            match self.store.similarity_search(&params).await {
                Ok(results) if !results.is_empty() => {
                    return finish(report, tier, results);
                }
                Ok(_) => debug!("retrieval tier empty (tier={})", tier),
                Err(err) => {
                    warn!("retrieval tier failed (tier={}, error={})", tier, err);
                    report.errors.push((tier, err.to_string()));
                }
            }
        }

        report.attempted.push(RetrievalTier::Keyword);
        let mut seen = HashSet::new();
        let mut merged = Vec::new();
        for keyword in query.top_keywords(self.settings.keyword_count) {
            match self
                .store
                .keyword_search(keyword, self.settings.keyword_match_count)
                .await
            {
                Ok(results) => {
                    for mut result in results {
                        if seen.insert(result.record_id.clone()) {
                            result.score = 0.0;
                            merged.push(result);
                        }
                    }
                }
                Err(err) => {
                    warn!(
                        "keyword search failed (keyword_len={}, error={})",
                        keyword.len(),
                        err
                    );
                    report
                        .errors
                        .push((RetrievalTier::Keyword, err.to_string()));
                }
            }
        }
        if merged.is_empty() {
            info!(
                "retrieval found no records (tiers={}, errors={})",
                report.attempted.len(),
                report.errors.len()
            );
            return report;
        }
        finish(report, RetrievalTier::Keyword, merged)
    }
}

fn finish(
    mut report: RetrievalReport,
    tier: RetrievalTier,
    results: Vec<RetrievalResult>,
) -> RetrievalReport {
    info!(
        "retrieval resolved (tier={}, results={})",
        tier,
        results.len()
    );
    report.resolved = Some(tier);
    report.results = results;
    report
}
