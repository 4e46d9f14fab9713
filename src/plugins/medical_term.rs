//! Dictionary/pattern matching of medical vocabulary.
//!
//! Output shape:
//!
//! ```json
//! { "terms": [ { "term": "bronchitis", "position": 12,
//!                "category": "inflammation",
//!                "description": "Inflammatory process" } ] }
//! ```
//!
//! `position` is a character offset (not a byte offset) into the page text,
//! so it is stable for Cyrillic input.

use super::{Plugin, PluginContext, PluginInput};
use crate::config::MEDICAL_TERM_PLUGIN;
use crate::error::PluginError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// One dictionary entry: a pattern and what a match means.
#[derive(Debug, Clone)]
pub struct TermPattern {
    pub pattern: Regex,
    pub category: String,
    pub description: String,
}

impl TermPattern {
    /// Compile a case-insensitive pattern.
    pub fn new(
        pattern: &str,
        category: impl Into<String>,
        description: impl Into<String>,
    ) -> Result<Self, regex::Error> {
        Ok(Self {
            pattern: Regex::new(&format!("(?i){pattern}"))?,
            category: category.into(),
            description: description.into(),
        })
    }
}

/// A single match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TermMatch {
    pub term: String,
    pub position: usize,
    pub category: String,
    pub description: String,
}

static DEFAULT_DICTIONARY: Lazy<Vec<TermPattern>> = Lazy::new(|| {
    [
        (r"\b\w*itis\b", "inflammation", "Inflammatory process"),
        (r"\b\w*oma\b", "tumor", "Tumor"),
        (r"\b\w*ectomy\b", "surgical_removal", "Surgical removal"),
        (r"\b\w*алгия\b", "pain", "Pain"),
        (r"\b\w*стеноз\b", "stenosis", "Narrowing"),
        (r"\b\w+(?:osis|emia|opathy)\b", "condition", "Pathological condition"),
        (r"\b(?:MRI|CT|EKG|ECG|CBC)\b", "diagnostic_abbreviation", "Diagnostic test"),
    ]
    .into_iter()
    .map(|(p, c, d)| TermPattern::new(p, c, d).unwrap())
    .collect()
});

/// Term extraction plugin.
#[derive(Debug, Clone)]
pub struct MedicalTermPlugin {
    dictionary: Vec<TermPattern>,
}

impl Default for MedicalTermPlugin {
    fn default() -> Self {
        Self {
            dictionary: DEFAULT_DICTIONARY.clone(),
        }
    }
}

impl MedicalTermPlugin {
    /// Use a custom dictionary instead of the built-in one.
    pub fn with_dictionary(dictionary: Vec<TermPattern>) -> Self {
        Self { dictionary }
    }

    /// All matches in `text`, ordered by dictionary entry then position.
    pub fn find_terms(&self, text: &str) -> Vec<TermMatch> {
        let mut found = Vec::new();
        for entry in &self.dictionary {
            for m in entry.pattern.find_iter(text) {
                found.push(TermMatch {
                    term: m.as_str().to_string(),
                    position: text[..m.start()].chars().count(),
                    category: entry.category.clone(),
                    description: entry.description.clone(),
                });
            }
        }
        found
    }
}

impl Plugin for MedicalTermPlugin {
    fn name(&self) -> &str {
        MEDICAL_TERM_PLUGIN
    }

    fn validate(&self, input: &PluginInput<'_>) -> bool {
        !input.text.trim().is_empty()
    }

    fn process(
        &self,
        input: &PluginInput<'_>,
        _ctx: &PluginContext<'_>,
    ) -> Result<serde_json::Value, PluginError> {
        let terms =
            serde_json::to_value(self.find_terms(input.text)).map_err(|e| PluginError::Failed {
                plugin: MEDICAL_TERM_PLUGIN.to_string(),
                message: e.to_string(),
            })?;
        Ok(serde_json::json!({ "terms": terms }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcessingParameters;

    #[test]
    fn finds_inflammation() {
        let plugin = MedicalTermPlugin::default();
        let terms = plugin.find_terms("Diagnosis: acute bronchitis.");
        let hit = terms
            .iter()
            .find(|t| t.category == "inflammation")
            .expect("inflammation match");
        assert_eq!(hit.term, "bronchitis");
        assert_eq!(hit.position, 17);
    }

    #[test]
    fn case_insensitive() {
        let plugin = MedicalTermPlugin::default();
        let terms = plugin.find_terms("GASTRITIS and Carcinoma");
        let cats: Vec<&str> = terms.iter().map(|t| t.category.as_str()).collect();
        assert!(cats.contains(&"inflammation"));
        assert!(cats.contains(&"tumor"));
    }

    #[test]
    fn cyrillic_positions_are_char_offsets() {
        let plugin = MedicalTermPlugin::default();
        let terms = plugin.find_terms("Жалобы: невралгия");
        let hit = terms.iter().find(|t| t.category == "pain").unwrap();
        assert_eq!(hit.term, "невралгия");
        assert_eq!(hit.position, 8);
    }

    #[test]
    fn abbreviations() {
        let plugin = MedicalTermPlugin::default();
        let terms = plugin.find_terms("Ordered an MRI and a CBC.");
        assert_eq!(
            terms
                .iter()
                .filter(|t| t.category == "diagnostic_abbreviation")
                .count(),
            2
        );
    }

    #[test]
    fn custom_dictionary() {
        let plugin = MedicalTermPlugin::with_dictionary(vec![TermPattern::new(
            r"\baspirin\b",
            "drug",
            "NSAID",
        )
        .unwrap()]);
        let terms = plugin.find_terms("Take Aspirin daily; no bronchitis.");
        assert_eq!(terms.len(), 1);
        assert_eq!(terms[0].category, "drug");
    }

    #[test]
    fn process_output_shape() {
        let plugin = MedicalTermPlugin::default();
        let params = ProcessingParameters::default();
        let input = PluginInput {
            text: "appendectomy",
            image: None,
        };
        let out = plugin
            .process(
                &input,
                &PluginContext {
                    page_index: 1,
                    params: &params,
                },
            )
            .unwrap();
        assert_eq!(out["terms"][0]["category"], "surgical_removal");
        assert_eq!(out["terms"][0]["position"], 0);
    }

    #[test]
    fn blank_text_not_valid() {
        let plugin = MedicalTermPlugin::default();
        assert!(!plugin.validate(&PluginInput {
            text: "  \n",
            image: None
        }));
    }
}
