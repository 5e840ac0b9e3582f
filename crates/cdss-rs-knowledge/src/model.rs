//! Clinical record and retrieval result models.

use cdss_rs_protocol::RecordSource;
use serde::{Deserialize, Serialize};

/// Record id holding the rule collection's global principles.
pub const GLOBAL_PRINCIPLES_ID: &str = "rule-global-principles";

/// Structured fields carried alongside a record's searchable content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecordMetadata {
    /// Dental product sheet.
    Product {
        name: String,
        /// CNK registration code.
        code: Option<String>,
        /// Declared ingredients (NCI).
        ingredients: Option<String>,
        #[serde(default)]
        indications: Vec<String>,
        #[serde(default)]
        limits: Vec<String>,
        #[serde(default)]
        patient_profile: Vec<String>,
        mechanism: Option<String>,
        usage_notes: Option<String>,
    },
    /// Antibiotic prescription rule.
    Rule {
        rule_id: String,
        condition: serde_json::Value,
        recommendation: serde_json::Value,
    },
}

/// Immutable knowledge base entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClinicalRecord {
    pub id: String,
    pub source: RecordSource,
    /// Text quoted verbatim into prompts and matched by lexical search.
    pub content: String,
    pub metadata: RecordMetadata,
    /// Dense embedding of `content`; empty when none was computed.
    #[serde(default)]
    pub embedding: Vec<f32>,
}

impl ClinicalRecord {
    /// Identifier cited in answer justifications: CNK code or rule id.
    pub fn reference(&self) -> String {
        match &self.metadata {
            RecordMetadata::Product {
                code: Some(code), ..
            } if !code.trim().is_empty() => code.clone(),
            RecordMetadata::Rule { rule_id, .. } if !rule_id.trim().is_empty() => rule_id.clone(),
            _ => self.id.clone(),
        }
    }

    /// True for the global principles record, which is never a search hit.
    pub fn is_principles(&self) -> bool {
        self.id == GLOBAL_PRINCIPLES_ID
    }

    /// Principle lines carried by the global principles record.
    pub fn principle_lines(&self) -> Vec<String> {
        match &self.metadata {
            RecordMetadata::Rule { recommendation, .. } if self.is_principles() => recommendation
                .as_array()
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|item| item.as_str())
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default(),
            _ => Vec::new(),
        }
    }

    /// Project the record into a scored retrieval result.
    pub fn to_result(&self, score: f32) -> RetrievalResult {
        RetrievalResult {
            record_id: self.id.clone(),
            source: self.source,
            reference: self.reference(),
            content: self.content.clone(),
            score,
        }
    }
}

/// One record returned by a retrieval tier.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetrievalResult {
    pub record_id: String,
    pub source: RecordSource,
    pub reference: String,
    pub content: String,
    /// Hybrid score; 0 for keyword fallback matches.
    pub score: f32,
}

/// Parameters of a hybrid similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchParams {
    pub embedding: Vec<f32>,
    /// Space separated lexical terms.
    pub text: String,
    /// Results must score strictly above this value.
    pub threshold: f32,
    pub count: usize,
}
