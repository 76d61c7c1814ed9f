//! The trusted answer shape returned to callers.
//!
//! A [`VerifiedAnswer`] is only ever produced by [`crate::verifier::verify`]
//! or [`VerifiedAnswer::safe_fallback`]. Keys serialize in camelCase.

use serde::{Deserialize, Serialize};

/// Label for claims demoted out of `answerFromSources`.
pub const LABEL_NOT_FROM_SOURCES: &str = "not_from_sources";
/// Default label for reasoning entries that arrive without one.
pub const LABEL_REASONING: &str = "reasoning";
/// Label of the generic note attached to the safe fallback.
pub const LABEL_ERROR: &str = "error";

/// Language of the fixed texts (fallback question, apology).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Locale {
    #[default]
    Nl,
    En,
}

impl Locale {
    pub fn fallback_question(&self) -> &'static str {
        match self {
            Locale::Nl => "Welke documenten of onderwerpen moet ik hiervoor gebruiken?",
            Locale::En => "Which documents or topics should I use for this?",
        }
    }

    fn fallback_reply(&self) -> &'static str {
        match self {
            Locale::Nl => {
                "Sorry, ik kon op dit moment geen onderbouwd antwoord genereren. Probeer het later opnieuw."
            }
            Locale::En => "Sorry, I could not generate a grounded answer right now. Please try again later.",
        }
    }

    fn fallback_note(&self) -> &'static str {
        match self {
            Locale::Nl => "Er is een interne fout opgetreden; er zijn geen bronnen gebruikt.",
            Locale::En => "An internal error occurred; no sources were used.",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Citation {
    pub doc_id: String,
    pub chunk_id: String,
    pub page: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourcedStatement {
    pub text: String,
    pub citations: Vec<Citation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReasoningItem {
    pub text: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedAnswer {
    pub reply: String,
    pub answer_from_sources: Vec<SourcedStatement>,
    pub additional_reasoning: Vec<ReasoningItem>,
    pub missing_info_questions: Vec<String>,
}

impl VerifiedAnswer {
    /// The fixed response used whenever an upstream stage fails.
    ///
    /// Carries no diagnostic detail; that belongs in logs and the run callback.
    pub fn safe_fallback(locale: Locale) -> Self {
        Self {
            reply: locale.fallback_reply().to_string(),
            answer_from_sources: Vec::new(),
            additional_reasoning: vec![ReasoningItem {
                text: locale.fallback_note().to_string(),
                label: LABEL_ERROR.to_string(),
            }],
            missing_info_questions: vec![locale.fallback_question().to_string()],
        }
    }

    /// Number of reasoning entries that were demoted from sourced claims.
    pub fn demoted_count(&self) -> usize {
        self.additional_reasoning
            .iter()
            .filter(|r| r.label == LABEL_NOT_FROM_SOURCES)
            .count()
    }
}
