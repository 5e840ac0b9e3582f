//! System prompt assembly for consultation turns.

use crate::gate::Grounding;
use crate::language::Language;

const ROLE_SECTION: &str = "You are a clinical decision support assistant for dentists and pharmacists. \
Answers must be precise and deterministic.";

/// Builds the evidence-only system instruction.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptAssembler;

impl PromptAssembler {
    pub fn new() -> Self {
        Self
    }

    /// Build the system prompt for one answer.
    pub fn system_prompt(&self, grounding: &Grounding, language: Language) -> String {
        self.system_prompt_with_principles(grounding, &[], language)
    }

    /// Build the system prompt, listing global principles ahead of the records.
    pub fn system_prompt_with_principles(
        &self,
        grounding: &Grounding,
        principles: &[String],
        language: Language,
    ) -> String {
        let mut sections = vec![ROLE_SECTION.to_string()];
        let rules = match grounding {
            Grounding::Evidence(_) => evidence_rules(language),
            Grounding::GeneralKnowledge => general_knowledge_rules(language),
        };
        sections.push(rules);
        if !principles.is_empty() {
            sections.push(format!("## Global Principles\n\n{}", principles.join("\n")));
        }
        match grounding {
            Grounding::Evidence(context) => {
                sections.push(format!("## Official Data\n\n{}", context.render()));
            }
            Grounding::GeneralKnowledge => {
                sections.push("## Official Data\n\nNo official record matched this question.".to_string());
            }
        }
        sections.join("\n\n")
    }
}

fn evidence_rules(language: Language) -> String {
    format!(
        "## Rules\n\n\
1. Use ONLY the records under \"Official Data\". They take precedence over anything you believe to be true; report what the records say.\n\
2. Never estimate a concentration, dosage or ingredient. If a requested numeric detail (ppm, mg, %, dose) is not written in the records, state exactly: \"{missing}\".\n\
3. Check the declared ingredients of every product before naming them. Do not assume ingredients.\n\
4. If the question is not covered by the records, answer exactly: \"{refusal}\" and nothing else.\n\
5. End every answer with a \"Justification\" section citing the ref value of each record you used (CNK codes or rule ids).\n\
6. Answer in {language}.",
        missing = language.missing_detail(),
        refusal = language.refusal(),
        language = language.name(),
    )
}

fn general_knowledge_rules(language: Language) -> String {
    format!(
        "## Rules\n\n\
1. No official record supports this question. Start the answer with the label \"{label}\".\n\
2. Never state a concentration, dosage or ingredient as if it came from official data.\n\
3. End the answer with a \"Justification\" section stating that no official record was available.\n\
4. Answer in {language}.",
        label = language.general_knowledge_label(),
        language = language.name(),
    )
}
