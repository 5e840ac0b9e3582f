//! Question language detection and the localized canned texts.

use std::fmt;

/// Languages the service answers in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Language {
    #[default]
    English,
    French,
}

const FRENCH_MARKERS: &[&str] = &[
    "le", "la", "les", "des", "du", "une", "un", "pour", "dans", "avec", "quelle", "quel",
    "quels", "quelles", "est", "sont", "chez", "combien", "posologie", "contient", "patient",
    "enfant", "dent", "dents", "et", "ou", "sur", "peut", "faut",
];

const ENGLISH_MARKERS: &[&str] = &[
    "the", "what", "which", "is", "are", "for", "with", "how", "does", "dose", "of", "and",
    "can", "should", "in", "child", "tooth", "teeth", "much",
];

impl Language {
    /// Guess the language of a question from function words and accents.
    pub fn detect(text: &str) -> Self {
        let lower = text.to_lowercase();
        let mut french = lower
            .chars()
            .filter(|ch| "éèêàâçôûùîïë".contains(*ch))
            .count();
        let mut english = 0;
        for word in lower.split(|ch: char| !ch.is_alphabetic()) {
            if FRENCH_MARKERS.contains(&word) {
                french += 1;
            }
            if ENGLISH_MARKERS.contains(&word) {
                english += 1;
            }
        }
        if french > english {
            Language::French
        } else {
            Language::English
        }
    }

    /// Exact text returned when no evidence exists.
    pub fn refusal(&self) -> &'static str {
        match self {
            Language::English => "No official data found in current clinical guidelines",
            Language::French => {
                "Aucune donnée officielle trouvée dans les recommandations cliniques actuelles"
            }
        }
    }

    /// Text the model must use when a requested detail is absent from the context.
    pub fn missing_detail(&self) -> &'static str {
        match self {
            Language::English => "No official data found for this specific detail",
            Language::French => "Aucune donnée officielle trouvée pour ce détail précis",
        }
    }

    /// Text returned when the completion endpoint fails or times out.
    pub fn apology(&self) -> &'static str {
        match self {
            Language::English => {
                "Sorry, the clinical assistant is temporarily unavailable. Please try again in a moment."
            }
            Language::French => {
                "Désolé, l'assistant clinique est momentanément indisponible. Veuillez réessayer dans un instant."
            }
        }
    }

    /// Label prefixed to answers given without grounding evidence.
    pub fn general_knowledge_label(&self) -> &'static str {
        match self {
            Language::English => "General knowledge (not from official clinical data)",
            Language::French => "Connaissances générales (hors données cliniques officielles)",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Language::English => "English",
            Language::French => "French",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::Language;
    use pretty_assertions::assert_eq;

    #[test]
    fn detects_french_questions() {
        assert_eq!(
            Language::detect("Quelle est la posologie de l'amoxicilline chez l'enfant ?"),
            Language::French
        );
        assert_eq!(
            Language::detect("Quels antibiotiques pour une pulpite ?"),
            Language::French
        );
    }

    #[test]
    fn defaults_to_english() {
        assert_eq!(
            Language::detect("What ppm concentration does Dentaid Xeros Spray contain?"),
            Language::English
        );
        assert_eq!(Language::detect(""), Language::English);
        assert_eq!(Language::detect("GEL38GR"), Language::English);
    }

    #[test]
    fn canned_texts_are_localized() {
        assert_eq!(
            Language::English.refusal(),
            "No official data found in current clinical guidelines"
        );
        assert!(Language::French.refusal().starts_with("Aucune donnée"));
        assert!(Language::French.apology().starts_with("Désolé"));
    }
}
