//! Grounding verification of generator output.
//!
//! The generator is untrusted: it may omit fields, send the wrong types, or
//! cite fragments it was never shown. Verification happens in two steps:
//!
//! 1. [`RawAnswer::from_value`] parses the untyped JSON into typed values.
//!    Every field goes through a coerce-or-ignore rule; the only failure is
//!    a top-level value that is not an object.
//! 2. [`verify`] checks each claimed citation against the
//!    [`AllowedCitationSet`] (exact match on document, chunk, and page),
//!    demotes claims without a valid citation to `additionalReasoning`
//!    labelled `not_from_sources`, and guarantees that the result always
//!    contains either a sourced statement or a clarifying question.
//!
//! `verify` is pure: no I/O, no logging, no shared state. Applying it to its
//! own output with the same allowed set returns the same answer.

use anyhow::{bail, Result};
use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::answer::{
    Citation, Locale, ReasoningItem, SourcedStatement, VerifiedAnswer, LABEL_NOT_FROM_SOURCES,
    LABEL_REASONING,
};
use crate::models::{FragmentId, SourceFragment};

/// Fragment identities that were actually offered to the generator.
#[derive(Debug, Clone, Default)]
pub struct AllowedCitationSet {
    ids: HashSet<FragmentId>,
}

impl AllowedCitationSet {
    pub fn from_fragments(fragments: &[SourceFragment]) -> Self {
        fragments.iter().map(|f| f.id.clone()).collect()
    }

    pub fn contains(&self, citation: &Citation) -> bool {
        // FragmentId is the compound key; build it rather than matching parts.
        self.ids.contains(&FragmentId::new(
            citation.doc_id.clone(),
            citation.chunk_id.clone(),
            citation.page,
        ))
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl FromIterator<FragmentId> for AllowedCitationSet {
    fn from_iter<I: IntoIterator<Item = FragmentId>>(iter: I) -> Self {
        Self {
            ids: iter.into_iter().collect(),
        }
    }
}

/// A claimed source-backed statement, after type coercion.
#[derive(Debug, Clone, PartialEq)]
pub struct RawStatement {
    pub text: String,
    pub citations: Vec<Citation>,
}

/// Typed view of the generator's output. Nothing here is trusted yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawAnswer {
    pub reply: String,
    pub answer_from_sources: Vec<RawStatement>,
    pub additional_reasoning: Vec<ReasoningItem>,
    pub missing_info_questions: Vec<String>,
}

impl RawAnswer {
    /// Parses generator JSON, accepting camelCase and snake_case keys.
    ///
    /// Fails only when `value` is not a JSON object.
    pub fn from_value(value: &Value) -> Result<Self> {
        let obj = match value {
            Value::Object(obj) => obj,
            other => bail!("generator output is not a JSON object (got {})", kind(other)),
        };

        let reply = match field(obj, "reply", "reply") {
            Some(Value::String(s)) => s.clone(),
            _ => String::new(),
        };

        let answer_from_sources = array_field(obj, "answerFromSources", "answer_from_sources")
            .iter()
            .filter_map(Value::as_object)
            .map(|item| RawStatement {
                text: coerce_string(item.get("text")),
                citations: parse_citations(item.get("citations")),
            })
            .collect();

        let additional_reasoning =
            array_field(obj, "additionalReasoning", "additional_reasoning")
                .iter()
                .filter_map(Value::as_object)
                .map(|item| ReasoningItem {
                    text: coerce_string(item.get("text")),
                    label: coerce_string(item.get("label")),
                })
                .collect();

        let missing_info_questions =
            array_field(obj, "missingInfoQuestions", "missing_info_questions")
                .iter()
                .filter_map(coerce_scalar)
                .collect();

        Ok(Self {
            reply,
            answer_from_sources,
            additional_reasoning,
            missing_info_questions,
        })
    }
}

/// Turns a raw answer into one whose sourcing can be trusted.
pub fn verify(raw: &RawAnswer, allowed: &AllowedCitationSet, locale: Locale) -> VerifiedAnswer {
    let mut answer_from_sources = Vec::new();
    let mut moved: Vec<String> = Vec::new();

    for statement in &raw.answer_from_sources {
        let text = statement.text.trim();
        if text.is_empty() {
            continue;
        }

        let valid: Vec<Citation> = statement
            .citations
            .iter()
            .map(|c| Citation {
                doc_id: c.doc_id.trim().to_string(),
                chunk_id: c.chunk_id.trim().to_string(),
                page: c.page,
            })
            .filter(|c| allowed.contains(c))
            .collect();

        if valid.is_empty() {
            moved.push(text.to_string());
        } else {
            answer_from_sources.push(SourcedStatement {
                text: text.to_string(),
                citations: valid,
            });
        }
    }

    let additional_reasoning = raw
        .additional_reasoning
        .iter()
        .cloned()
        .chain(moved.into_iter().map(|text| ReasoningItem {
            text,
            label: LABEL_NOT_FROM_SOURCES.to_string(),
        }))
        .filter_map(|item| {
            let text = item.text.trim();
            if text.is_empty() {
                return None;
            }
            let label = item.label.trim();
            Some(ReasoningItem {
                text: text.to_string(),
                label: if label.is_empty() {
                    LABEL_REASONING.to_string()
                } else {
                    label.to_string()
                },
            })
        })
        .collect();

    let mut missing_info_questions: Vec<String> = raw
        .missing_info_questions
        .iter()
        .map(|q| q.trim())
        .filter(|q| !q.is_empty())
        .map(str::to_string)
        .collect();

    if answer_from_sources.is_empty() && missing_info_questions.is_empty() {
        missing_info_questions.push(locale.fallback_question().to_string());
    }

    VerifiedAnswer {
        reply: raw.reply.clone(),
        answer_from_sources,
        additional_reasoning,
        missing_info_questions,
    }
}

/// Parses and verifies in one step; the error case is a non-object value.
pub fn verify_value(
    value: &Value,
    allowed: &AllowedCitationSet,
    locale: Locale,
) -> Result<VerifiedAnswer> {
    let raw = RawAnswer::from_value(value)?;
    Ok(verify(&raw, allowed, locale))
}

// ============ Coercion helpers ============

fn field<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> Option<&'a Value> {
    obj.get(camel).or_else(|| obj.get(snake))
}

fn array_field<'a>(obj: &'a Map<String, Value>, camel: &str, snake: &str) -> &'a [Value] {
    match field(obj, camel, snake) {
        Some(Value::Array(items)) => items,
        _ => &[],
    }
}

fn parse_citations(value: Option<&Value>) -> Vec<Citation> {
    // A non-array value counts as "no citations", which demotes the claim.
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    items
        .iter()
        .filter_map(Value::as_object)
        .map(|c| Citation {
            doc_id: coerce_string(c.get("docId")).trim().to_string(),
            chunk_id: coerce_string(c.get("chunkId")).trim().to_string(),
            page: coerce_page(c.get("page")),
        })
        .collect()
}

/// Strings pass through; numbers and booleans are rendered; anything else is empty.
fn coerce_string(value: Option<&Value>) -> String {
    value.and_then(coerce_scalar).unwrap_or_default()
}

fn coerce_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

fn coerce_page(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse::<i64>().unwrap_or(0),
        Some(Value::Bool(b)) => i64::from(*b),
        _ => 0,
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn allowed(ids: &[(&str, &str, i64)]) -> AllowedCitationSet {
        ids.iter()
            .map(|(d, c, p)| FragmentId::new(*d, *c, *p))
            .collect()
    }

    fn run(value: Value, set: &AllowedCitationSet) -> VerifiedAnswer {
        verify_value(&value, set, Locale::En).unwrap()
    }

    fn not_from_sources(answer: &VerifiedAnswer) -> Vec<String> {
        answer
            .additional_reasoning
            .iter()
            .filter(|r| r.label == LABEL_NOT_FROM_SOURCES)
            .map(|r| r.text.clone())
            .collect()
    }

    #[test]
    fn test_valid_citation_is_kept() {
        let out = run(
            json!({
                "answerFromSources": [
                    {"text": "Revenue grew 10%", "citations": [{"docId": "d1", "chunkId": "c1", "page": 2}]}
                ]
            }),
            &allowed(&[("d1", "c1", 2)]),
        );
        assert_eq!(out.answer_from_sources.len(), 1);
        assert_eq!(out.answer_from_sources[0].text, "Revenue grew 10%");
        assert_eq!(
            out.answer_from_sources[0].citations,
            vec![Citation {
                doc_id: "d1".to_string(),
                chunk_id: "c1".to_string(),
                page: 2
            }]
        );
        assert!(out.additional_reasoning.is_empty());
        assert!(out.missing_info_questions.is_empty());
    }

    #[test]
    fn test_page_mismatch_demotes_claim() {
        let out = run(
            json!({
                "answerFromSources": [
                    {"text": "Revenue grew 10%", "citations": [{"docId": "d1", "chunkId": "c1", "page": 2}]}
                ]
            }),
            &allowed(&[("d1", "c1", 3)]),
        );
        assert!(out.answer_from_sources.is_empty());
        assert_eq!(not_from_sources(&out), vec!["Revenue grew 10%".to_string()]);
        // Nothing sourced and no questions: the fallback question is injected.
        assert_eq!(
            out.missing_info_questions,
            vec![Locale::En.fallback_question().to_string()]
        );
    }

    #[test]
    fn test_empty_object_gets_fallback_question() {
        let out = run(json!({}), &allowed(&[]));
        assert_eq!(out.reply, "");
        assert!(out.answer_from_sources.is_empty());
        assert!(out.additional_reasoning.is_empty());
        assert_eq!(
            out.missing_info_questions,
            vec![Locale::En.fallback_question().to_string()]
        );
    }

    #[test]
    fn test_dutch_fallback_question() {
        let raw = RawAnswer::default();
        let out = verify(&raw, &allowed(&[]), Locale::Nl);
        assert_eq!(
            out.missing_info_questions,
            vec!["Welke documenten of onderwerpen moet ik hiervoor gebruiken?".to_string()]
        );
    }

    #[test]
    fn test_empty_citations_moves_text() {
        let out = run(
            json!({"answerFromSources": [{"text": "Claim without source", "citations": []}]}),
            &allowed(&[("d1", "c1", 0)]),
        );
        assert!(out.answer_from_sources.is_empty());
        assert_eq!(not_from_sources(&out), vec!["Claim without source".to_string()]);
    }

    #[test]
    fn test_non_array_citations_moves_text() {
        let out = run(
            json!({"answerFromSources": [{"text": "Odd citations", "citations": "d1"}]}),
            &allowed(&[("d1", "c1", 0)]),
        );
        assert_eq!(not_from_sources(&out), vec!["Odd citations".to_string()]);
    }

    #[test]
    fn test_invalid_citations_are_filtered_per_entry() {
        let out = run(
            json!({"answerFromSources": [{
                "text": "Mixed",
                "citations": [
                    {"docId": "d1", "chunkId": "c1", "page": 1},
                    {"docId": "d9", "chunkId": "c9", "page": 1},
                    "not an object"
                ]
            }]}),
            &allowed(&[("d1", "c1", 1)]),
        );
        assert_eq!(out.answer_from_sources.len(), 1);
        assert_eq!(out.answer_from_sources[0].citations.len(), 1);
        assert_eq!(out.answer_from_sources[0].citations[0].doc_id, "d1");
    }

    #[test]
    fn test_citation_fields_are_coerced() {
        let out = run(
            json!({"answerFromSources": [{
                "text": "  Padded  ",
                "citations": [{"docId": " d1 ", "chunkId": 42, "page": "3"}]
            }]}),
            &allowed(&[("d1", "42", 3)]),
        );
        assert_eq!(out.answer_from_sources.len(), 1);
        assert_eq!(out.answer_from_sources[0].text, "Padded");
        let c = &out.answer_from_sources[0].citations[0];
        assert_eq!((c.doc_id.as_str(), c.chunk_id.as_str(), c.page), ("d1", "42", 3));
    }

    #[test]
    fn test_unparseable_page_defaults_to_zero() {
        let out = run(
            json!({"answerFromSources": [
                {"text": "a", "citations": [{"docId": "d1", "chunkId": "c1", "page": "two"}]},
                {"text": "b", "citations": [{"docId": "d1", "chunkId": "c1", "page": null}]},
                {"text": "c", "citations": [{"docId": "d1", "chunkId": "c1"}]},
                {"text": "d", "citations": [{"docId": "d1", "chunkId": "c1", "page": 0.9}]}
            ]}),
            &allowed(&[("d1", "c1", 0)]),
        );
        assert_eq!(out.answer_from_sources.len(), 4);
        assert!(out
            .answer_from_sources
            .iter()
            .all(|s| s.citations[0].page == 0));
    }

    #[test]
    fn test_fuzzy_matches_are_rejected() {
        let set = allowed(&[("d1", "c1", 2)]);
        for citation in [
            json!({"docId": "D1", "chunkId": "c1", "page": 2}),
            json!({"docId": "d1", "chunkId": "c", "page": 2}),
            json!({"docId": "c1", "chunkId": "d1", "page": 2}),
            json!({"docId": "d1", "chunkId": "c1"}),
            json!({"chunkId": "c1", "page": 2}),
        ] {
            let out = run(
                json!({"answerFromSources": [{"text": "t", "citations": [citation.clone()]}]}),
                &set,
            );
            assert!(
                out.answer_from_sources.is_empty(),
                "citation should not match: {}",
                citation
            );
        }
    }

    #[test]
    fn test_moved_texts_follow_generator_reasoning() {
        let out = run(
            json!({
                "answerFromSources": [{"text": "Unsupported", "citations": []}],
                "additionalReasoning": [
                    {"text": "Generator note", "label": "meta"},
                    {"text": "   ", "label": "meta"},
                    {"text": "No label"},
                    "junk"
                ]
            }),
            &allowed(&[]),
        );
        assert_eq!(
            out.additional_reasoning,
            vec![
                ReasoningItem {
                    text: "Generator note".to_string(),
                    label: "meta".to_string()
                },
                ReasoningItem {
                    text: "No label".to_string(),
                    label: LABEL_REASONING.to_string()
                },
                ReasoningItem {
                    text: "Unsupported".to_string(),
                    label: LABEL_NOT_FROM_SOURCES.to_string()
                },
            ]
        );
    }

    #[test]
    fn test_questions_are_normalized() {
        let out = run(
            json!({"missingInfoQuestions": ["  Which year? ", "", 7, true, null, {"q": 1}, "   "]}),
            &allowed(&[]),
        );
        assert_eq!(
            out.missing_info_questions,
            vec!["Which year?".to_string(), "7".to_string(), "true".to_string()]
        );
    }

    #[test]
    fn test_snake_case_keys_are_accepted() {
        let out = run(
            json!({
                "reply": "Hi",
                "answer_from_sources": [{"text": "t", "citations": [{"docId": "d1", "chunkId": "c1", "page": 1}]}],
                "additional_reasoning": [{"text": "r", "label": "l"}],
                "missing_info_questions": ["q"]
            }),
            &allowed(&[("d1", "c1", 1)]),
        );
        assert_eq!(out.reply, "Hi");
        assert_eq!(out.answer_from_sources.len(), 1);
        assert_eq!(out.additional_reasoning.len(), 1);
        assert_eq!(out.missing_info_questions, vec!["q".to_string()]);
    }

    #[test]
    fn test_wrong_typed_fields_are_tolerated() {
        let out = run(
            json!({
                "reply": 12,
                "answerFromSources": "nope",
                "additionalReasoning": {"text": "x"},
                "missingInfoQuestions": "why?"
            }),
            &allowed(&[]),
        );
        assert_eq!(out.reply, "");
        assert!(out.answer_from_sources.is_empty());
        assert!(out.additional_reasoning.is_empty());
        assert_eq!(out.missing_info_questions.len(), 1);
    }

    #[test]
    fn test_non_object_is_rejected() {
        for value in [json!([]), json!("text"), json!(null), json!(3)] {
            assert!(RawAnswer::from_value(&value).is_err());
        }
    }

    #[test]
    fn test_empty_text_entries_are_skipped_not_moved() {
        let out = run(
            json!({"answerFromSources": [
                {"text": "   ", "citations": []},
                {"citations": [{"docId": "d1", "chunkId": "c1", "page": 1}]},
                42
            ]}),
            &allowed(&[("d1", "c1", 1)]),
        );
        assert!(out.answer_from_sources.is_empty());
        assert!(out.additional_reasoning.is_empty());
    }

    /// Adversarial inputs shared by the property checks below.
    fn corpus() -> Vec<Value> {
        vec![
            json!({}),
            json!({"reply": "ok"}),
            json!({"answerFromSources": [
                {"text": "Revenue grew 10%", "citations": [{"docId": "d1", "chunkId": "c1", "page": 2}]},
                {"text": "Revenue grew 10%", "citations": [{"docId": "d1", "chunkId": "c1", "page": 9}]},
                {"text": "Made up", "citations": [{"docId": "dx", "chunkId": "cx", "page": 1}]},
                {"text": "  ", "citations": []},
                {"text": "Duplicate claim", "citations": []},
                {"text": "Duplicate claim", "citations": null},
                null,
                [1, 2]
            ]}),
            json!({
                "answer_from_sources": [{"text": 3.5, "citations": [{"docId": "d2", "chunkId": "c2", "page": "4"}]}],
                "additional_reasoning": [{"text": " spaced ", "label": " "}],
                "missing_info_questions": [" ", "What period?"]
            }),
            json!({
                "answerFromSources": [{"text": "Only reasoning", "citations": {"docId": "d1"}}],
                "additionalReasoning": "bad",
                "missingInfoQuestions": [false]
            }),
        ]
    }

    fn corpus_allowed() -> AllowedCitationSet {
        allowed(&[("d1", "c1", 2), ("d2", "c2", 4)])
    }

    #[test]
    fn test_every_output_citation_is_allowed() {
        let set = corpus_allowed();
        for value in corpus() {
            let out = run(value, &set);
            for statement in &out.answer_from_sources {
                assert!(!statement.text.is_empty());
                assert!(!statement.citations.is_empty());
                for c in &statement.citations {
                    assert!(set.contains(c), "unexpected citation {:?}", c);
                }
            }
        }
    }

    #[test]
    fn test_no_silent_loss_of_unsupported_claims() {
        let set = corpus_allowed();
        for value in corpus() {
            let raw = RawAnswer::from_value(&value).unwrap();
            let mut expected: Vec<String> = raw
                .answer_from_sources
                .iter()
                .filter(|s| !s.text.trim().is_empty())
                .filter(|s| {
                    !s.citations.iter().any(|c| {
                        set.contains(&Citation {
                            doc_id: c.doc_id.trim().to_string(),
                            chunk_id: c.chunk_id.trim().to_string(),
                            page: c.page,
                        })
                    })
                })
                .map(|s| s.text.trim().to_string())
                .collect();
            let out = verify(&raw, &set, Locale::En);
            let mut actual = not_from_sources(&out);
            expected.sort();
            actual.sort();
            assert_eq!(expected, actual);
        }
    }

    #[test]
    fn test_never_empty_of_answers_and_questions() {
        let set = corpus_allowed();
        for value in corpus() {
            let out = run(value, &set);
            assert!(!out.answer_from_sources.is_empty() || !out.missing_info_questions.is_empty());
        }
    }

    #[test]
    fn test_verify_is_idempotent() {
        let set = corpus_allowed();
        for value in corpus() {
            let once = run(value, &set);
            let as_json = serde_json::to_value(&once).unwrap();
            let twice = run(as_json, &set);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_allowed_set_from_fragments() {
        let fragments = vec![SourceFragment {
            id: FragmentId::new("d1", "c1", 2),
            text: "Revenue grew".to_string(),
            score: 3,
        }];
        let set = AllowedCitationSet::from_fragments(&fragments);
        assert_eq!(set.len(), 1);
        assert!(set.contains(&Citation {
            doc_id: "d1".to_string(),
            chunk_id: "c1".to_string(),
            page: 2
        }));
    }
}
