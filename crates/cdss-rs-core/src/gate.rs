//! Grounding gate: decides whether an answer may be attempted.

use crate::language::Language;
use cdss_rs_config::RefusalPolicy;
use cdss_rs_knowledge::RetrievalResult;
use cdss_rs_protocol::RecordSource;
use log::debug;

/// One record quoted into the prompt.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextBlock {
    pub source: RecordSource,
    pub record_id: String,
    pub reference: String,
    pub content: String,
}

impl ContextBlock {
    /// Tag line identifying the record inside the prompt.
    pub fn tag(&self) -> String {
        format!(
            "[source={} id={} ref={}]",
            self.source, self.record_id, self.reference
        )
    }
}

/// Evidence the answer must be restricted to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GroundingContext {
    blocks: Vec<ContextBlock>,
}

impl GroundingContext {
    /// Build a context from retrieval results, skipping blank contents.
    pub fn from_results(results: &[RetrievalResult]) -> Self {
        let blocks = results
            .iter()
            .filter(|result| !result.content.trim().is_empty())
            .map(|result| ContextBlock {
                source: result.source,
                record_id: result.record_id.clone(),
                reference: result.reference.clone(),
                content: result.content.clone(),
            })
            .collect();
        Self { blocks }
    }

    pub fn blocks(&self) -> &[ContextBlock] {
        &self.blocks
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Identifiers available for citation, in context order.
    pub fn references(&self) -> Vec<&str> {
        self.blocks
            .iter()
            .map(|block| block.reference.as_str())
            .collect()
    }

    /// Tagged blocks separated by blank lines, contents verbatim.
    pub fn render(&self) -> String {
        self.blocks
            .iter()
            .map(|block| format!("{}\n{}", block.tag(), block.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// What an answer is allowed to rest on.
#[derive(Debug, Clone, PartialEq)]
pub enum Grounding {
    /// Retrieved records.
    Evidence(GroundingContext),
    /// No records; the answer must be labeled as general knowledge.
    GeneralKnowledge,
}

/// Result of the gate check.
#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    /// Continue to prompt assembly and completion.
    Answer(Grounding),
    /// Stop and return the refusal text.
    Refuse { message: String },
}

impl GateDecision {
    pub fn is_refusal(&self) -> bool {
        matches!(self, GateDecision::Refuse { .. })
    }
}

/// Stateless gate applying the configured refusal policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct GroundingGate {
    policy: RefusalPolicy,
}

impl GroundingGate {
    pub fn new(policy: RefusalPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> RefusalPolicy {
        self.policy
    }

    pub fn evaluate(&self, results: &[RetrievalResult], language: Language) -> GateDecision {
        let context = GroundingContext::from_results(results);
        if !context.is_empty() {
            debug!("gate proceeds (blocks={})", context.blocks().len());
            return GateDecision::Answer(Grounding::Evidence(context));
        }
        match self.policy {
            RefusalPolicy::HardRefuse => {
                debug!("gate refuses (language={})", language);
                GateDecision::Refuse {
                    message: language.refusal().to_string(),
                }
            }
            RefusalPolicy::LabeledGeneralKnowledge => {
                debug!("gate allows labeled general knowledge answer");
                GateDecision::Answer(Grounding::GeneralKnowledge)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{GateDecision, Grounding, GroundingGate};
    use crate::language::Language;
    use cdss_rs_config::RefusalPolicy;
    use cdss_rs_knowledge::RetrievalResult;
    use cdss_rs_protocol::RecordSource;
    use pretty_assertions::assert_eq;

    fn result(id: &str, content: &str) -> RetrievalResult {
        RetrievalResult {
            record_id: id.to_string(),
            source: RecordSource::Rule,
            reference: format!("R-{id}"),
            content: content.to_string(),
            score: 0.4,
        }
    }

    #[test]
    fn empty_results_refuse_with_localized_text() {
        let gate = GroundingGate::default();
        assert_eq!(
            gate.evaluate(&[], Language::English),
            GateDecision::Refuse {
                message: "No official data found in current clinical guidelines".to_string()
            }
        );
        assert_eq!(
            gate.evaluate(&[], Language::French),
            GateDecision::Refuse {
                message: Language::French.refusal().to_string()
            }
        );
    }

    #[test]
    fn blank_contents_count_as_no_evidence() {
        let gate = GroundingGate::default();
        let decision = gate.evaluate(&[result("a", "   "), result("b", "\n")], Language::English);
        assert!(decision.is_refusal());
    }

    #[test]
    fn evidence_proceeds_and_is_deterministic() {
        let gate = GroundingGate::default();
        let results = vec![result("a", "Amoxicillin 2g"), result("b", "")];
        let first = gate.evaluate(&results, Language::English);
        let second = gate.evaluate(&results, Language::English);
        assert_eq!(first, second);
        let GateDecision::Answer(Grounding::Evidence(context)) = first else {
            panic!("expected evidence");
        };
        assert_eq!(context.references(), vec!["R-a"]);
        assert_eq!(context.render(), "[source=rule id=a ref=R-a]\nAmoxicillin 2g");
    }

    #[test]
    fn labeled_policy_answers_without_evidence() {
        let gate = GroundingGate::new(RefusalPolicy::LabeledGeneralKnowledge);
        assert_eq!(
            gate.evaluate(&[], Language::English),
            GateDecision::Answer(Grounding::GeneralKnowledge)
        );
    }
}
