//! Conversion of the product and rule collections into clinical records.

use crate::embedding::Embedder;
use crate::error::KnowledgeError;
use crate::model::{ClinicalRecord, GLOBAL_PRINCIPLES_ID, RecordMetadata};
use cdss_rs_protocol::RecordSource;
use log::{info, warn};
use serde::Deserialize;
use serde_json::Value;

/// One entry of the dental product collection.
#[derive(Debug, Clone, Deserialize)]
pub struct ProductEntry {
    pub nom: String,
    #[serde(default)]
    pub cnk: Option<Value>,
    #[serde(default)]
    pub nci: Option<String>,
    #[serde(default)]
    pub indications: Vec<String>,
    #[serde(default)]
    pub limites: Vec<String>,
    #[serde(default)]
    pub profil_patient: Vec<String>,
    #[serde(default)]
    pub mecanisme_action: Option<String>,
    #[serde(default)]
    pub conseil_usage: Option<String>,
}

/// One antibiotic prescription rule.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleEntry {
    pub id: String,
    #[serde(default)]
    pub condition: Value,
    #[serde(default)]
    pub recommendation: Value,
}

#[derive(Debug, Deserialize)]
struct RuleCollection {
    #[serde(default)]
    rules: Vec<RuleEntry>,
    #[serde(default)]
    global_principles: Vec<String>,
}

/// Parse a JSON array of products into records.
pub fn parse_products(json: &str) -> Result<Vec<ClinicalRecord>, KnowledgeError> {
    let entries: Vec<ProductEntry> = serde_json::from_str(json)?;
    Ok(entries.into_iter().map(product_record).collect())
}

/// Parse a `{ "rules": [...], "global_principles": [...] }` document into records.
///
/// Non-blank global principles become one extra rule-source record.
pub fn parse_rules(json: &str) -> Result<Vec<ClinicalRecord>, KnowledgeError> {
    let collection: RuleCollection = serde_json::from_str(json)?;
    let mut records = collection
        .rules
        .into_iter()
        .map(rule_record)
        .collect::<Result<Vec<_>, _>>()?;
    if let Some(record) = principles_record(collection.global_principles) {
        records.push(record);
    }
    Ok(records)
}

pub fn product_record(entry: ProductEntry) -> ClinicalRecord {
    let code = entry.cnk.as_ref().and_then(code_text);
    let mut lines = vec![format!("Product: {}", entry.nom)];
    if let Some(code) = &code {
        lines.push(format!("CNK: {code}"));
    }
    if let Some(nci) = entry.nci.as_deref().map(str::trim).filter(|n| !n.is_empty()) {
        lines.push(format!("Ingredients: {nci}"));
    }
    lines.push(format!("Uses: {}", entry.indications.join(", ")));
    lines.push(format!(
        "Description: {} {}",
        entry.mecanisme_action.as_deref().unwrap_or_default(),
        entry.conseil_usage.as_deref().unwrap_or_default(),
    ));
    let content = lines.join("\n");
    let id = match &code {
        Some(code) => format!("product-{code}"),
        None => format!("product-{}", slug(&entry.nom)),
    };
    ClinicalRecord {
        id,
        source: RecordSource::Product,
        content: content.trim_end().to_string(),
        metadata: RecordMetadata::Product {
            name: entry.nom,
            code,
            ingredients: entry.nci,
            indications: entry.indications,
            limits: entry.limites,
            patient_profile: entry.profil_patient,
            mechanism: entry.mecanisme_action,
            usage_notes: entry.conseil_usage,
        },
        embedding: Vec::new(),
    }
}

pub fn rule_record(entry: RuleEntry) -> Result<ClinicalRecord, KnowledgeError> {
    let content = format!(
        "Rule: {}\nCondition/Uses: {}\nRecommendation/Description: {}",
        entry.id,
        serde_json::to_string(&entry.condition)?,
        serde_json::to_string(&entry.recommendation)?,
    );
    Ok(ClinicalRecord {
        id: format!("rule-{}", entry.id),
        source: RecordSource::Rule,
        content,
        metadata: RecordMetadata::Rule {
            rule_id: entry.id,
            condition: entry.condition,
            recommendation: entry.recommendation,
        },
        embedding: Vec::new(),
    })
}

pub fn principles_record(principles: Vec<String>) -> Option<ClinicalRecord> {
    let principles: Vec<String> = principles
        .into_iter()
        .map(|line| line.trim().to_string())
        .filter(|line| !line.is_empty())
        .collect();
    if principles.is_empty() {
        return None;
    }
    let content = format!("Global Principles:\n{}", principles.join("\n"));
    Some(ClinicalRecord {
        id: GLOBAL_PRINCIPLES_ID.to_string(),
        source: RecordSource::Rule,
        content,
        metadata: RecordMetadata::Rule {
            rule_id: "global-principles".to_string(),
            condition: Value::Null,
            recommendation: Value::from(principles),
        },
        embedding: Vec::new(),
    })
}

/// Fill record embeddings; records whose embedding fails keep an empty vector.
pub async fn embed_records(records: &mut [ClinicalRecord], embedder: &dyn Embedder) -> usize {
    let mut embedded = 0;
    for record in records.iter_mut() {
        match embedder.embed(&record.content).await {
            Ok(vector) => {
                record.embedding = vector;
                embedded += 1;
            }
            Err(err) => warn!(
                "failed to embed record (record_id={}, error={})",
                record.id, err
            ),
        }
    }
    info!(
        "embedded records (embedded={}, total={})",
        embedded,
        records.len()
    );
    embedded
}

fn code_text(value: &Value) -> Option<String> {
    match value {
        Value::Number(number) => Some(number.to_string()),
        Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
        _ => None,
    }
}

fn slug(name: &str) -> String {
    name.split(|ch: char| !ch.is_alphanumeric())
        .filter(|part| !part.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join("-")
}
