use async_trait::async_trait;
use cdss_rs_knowledge::{KnowledgeError, KnowledgeStore, RetrievalResult, SearchParams};
use cdss_rs_protocol::RecordSource;
use std::sync::atomic::{AtomicUsize, Ordering};

pub fn product_result(code: &str, content: &str) -> RetrievalResult {
    RetrievalResult {
        record_id: format!("product-{code}"),
        source: RecordSource::Product,
        reference: code.to_string(),
        content: content.to_string(),
        score: 0.5,
    }
}

pub fn rule_result(rule_id: &str, content: &str) -> RetrievalResult {
    RetrievalResult {
        record_id: format!("rule-{rule_id}"),
        source: RecordSource::Rule,
        reference: rule_id.to_string(),
        content: content.to_string(),
        score: 0.5,
    }
}

/// Store returning the same rows from the first similarity query.
#[derive(Debug, Default)]
pub struct StubKnowledgeStore {
    results: Vec<RetrievalResult>,
    similarity_calls: AtomicUsize,
    keyword_calls: AtomicUsize,
}

impl StubKnowledgeStore {
    pub fn new(results: Vec<RetrievalResult>) -> Self {
        Self {
            results,
            ..Self::default()
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn similarity_calls(&self) -> usize {
        self.similarity_calls.load(Ordering::SeqCst)
    }

    pub fn keyword_calls(&self) -> usize {
        self.keyword_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl KnowledgeStore for StubKnowledgeStore {
    async fn similarity_search(
        &self,
        params: &SearchParams,
    ) -> Result<Vec<RetrievalResult>, KnowledgeError> {
        self.similarity_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.results.iter().take(params.count).cloned().collect())
    }

    async fn keyword_search(
        &self,
        _keyword: &str,
        _limit: usize,
    ) -> Result<Vec<RetrievalResult>, KnowledgeError> {
        self.keyword_calls.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::new())
    }
}

#[derive(Debug, Default)]
pub struct FailingKnowledgeStore;

#[async_trait]
impl KnowledgeStore for FailingKnowledgeStore {
    async fn similarity_search(
        &self,
        _params: &SearchParams,
    ) -> Result<Vec<RetrievalResult>, KnowledgeError> {
        Err(KnowledgeError::Io(std::io::Error::other("store offline")))
    }

    async fn keyword_search(
        &self,
        _keyword: &str,
        _limit: usize,
    ) -> Result<Vec<RetrievalResult>, KnowledgeError> {
        Err(KnowledgeError::Io(std::io::Error::other("store offline")))
    }
}
