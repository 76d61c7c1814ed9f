//! Grounded answer prompt construction.
//!
//! Builds the chat request that asks the model to answer only from the
//! offered fragments, and forwards it to a [`JsonCompleter`]. The output is
//! untrusted and must go through [`crate::verifier`] before use.

use anyhow::Result;
use serde_json::{json, Value};

use crate::llm::{ChatRequest, JsonCompleter};
use crate::models::{SourceFragment, WorkspaceContext};

const SYSTEM_PROMPT: &str = "Je bent een behulpzame Nederlandse assistent die antwoorden geeft op basis van aangeleverde \
documentfragmenten. Je mag alleen feiten gebruiken die expliciet in de fragmenten staan. \
Als de informatie ontbreekt, geef je dat duidelijk aan en stel je verduidelijkende vragen.";

const SCHEMA_PREAMBLE: &str = "Je krijgt een vraag en een set documentfragmenten met metadata. \
Gebruik het volgende JSON-schema EXACT voor je antwoord:\n\
{\n  \"reply\": \"string\",\n  \"answer_from_sources\": [\n     {\n       \"text\": \"string\",\n       \
\"citations\": [\n          { \"docId\": \"string\", \"chunkId\": \"string\", \"page\": 0 }\n       ]\n     }\n  ],\n  \
\"additional_reasoning\": [\n     { \"text\": \"string\", \"label\": \"string\" }\n  ],\n  \
\"missing_info_questions\": [\"string\"]\n}\n\n\
BELANGRIJK: retourneer ALLEEN geldige JSON zonder uitleg eromheen.\n\
Hier is de input (in JSON):\n";

const RULES: &[&str] = &[
    "Gebruik ALLEEN de meegegeven documentfragmenten als bron voor 'answer_from_sources'.",
    "Elke 'answer_from_sources' entry MOET minimaal 1 citation bevatten.",
    "Als de fragmenten onvoldoende informatie bevatten, vul je relevante vragen in 'missing_info_questions'.",
    "'additional_reasoning' is alleen voor uitleg / meta-commentaar en moet duidelijk NIET als bron worden gepresenteerd.",
    "Geen hallucinatie: verzin geen feiten die niet in de fragmenten staan.",
    "Schrijf alle antwoorden in het Nederlands.",
];

/// Builds the grounded-answer request.
///
/// Each fragment is serialized on its own line with the exact
/// `{docId, chunkId, page}` triple the verifier will accept, and its text
/// truncated to `max_chunk_chars` characters.
pub fn build_answer_request(
    question: &str,
    context: Option<&WorkspaceContext>,
    fragments: &[SourceFragment],
    max_chunk_chars: usize,
    temperature: f32,
) -> ChatRequest {
    let mut parts: Vec<String> = Vec::new();

    if let Some(ctx) = context.filter(|c| !c.is_empty()) {
        parts.push("WORKSPACE_CONTEXT:".to_string());
        parts.push(serde_json::to_string(ctx).unwrap_or_else(|_| "{}".to_string()));
    }

    parts.push("DOCUMENT_CHUNKS:".to_string());
    for fragment in fragments {
        let text: String = fragment.text.chars().take(max_chunk_chars).collect();
        parts.push(
            json!({
                "meta": {
                    "docId": fragment.id.document_id,
                    "chunkId": fragment.id.chunk_id,
                    "page": fragment.id.position,
                },
                "text": text,
            })
            .to_string(),
        );
    }

    let payload = json!({
        "question": question,
        "context": parts.join("\n"),
        "output_schema": {
            "reply": "string",
            "answer_from_sources": [
                {"text": "string", "citations": [{"docId": "string", "chunkId": "string", "page": 0}]}
            ],
            "additional_reasoning": [{"text": "string", "label": "string"}],
            "missing_info_questions": ["string"],
        },
        "rules": RULES,
    });

    ChatRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: format!("{}{}", SCHEMA_PREAMBLE, payload),
        temperature,
    }
}

/// Asks the model for a grounded answer; returns its raw JSON object.
pub async fn generate_answer(
    llm: &dyn JsonCompleter,
    question: &str,
    context: Option<&WorkspaceContext>,
    fragments: &[SourceFragment],
    max_chunk_chars: usize,
    temperature: f32,
) -> Result<Value> {
    let request = build_answer_request(question, context, fragments, max_chunk_chars, temperature);
    llm.complete_json(&request).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FragmentId;

    fn payload_of(request: &ChatRequest) -> Value {
        let raw = request.user.strip_prefix(SCHEMA_PREAMBLE).unwrap();
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn test_fragments_carry_citation_meta() {
        let fragments = vec![SourceFragment {
            id: FragmentId::new("doc-1", "chunk-7", 3),
            text: "Refunds within 30 days.".to_string(),
            score: 2,
        }];
        let req = build_answer_request("refund?", None, &fragments, 4000, 0.2);
        let payload = payload_of(&req);
        let context = payload["context"].as_str().unwrap();
        let line = context.lines().nth(1).unwrap();
        let chunk: Value = serde_json::from_str(line).unwrap();
        assert_eq!(chunk["meta"]["docId"], "doc-1");
        assert_eq!(chunk["meta"]["chunkId"], "chunk-7");
        assert_eq!(chunk["meta"]["page"], 3);
        assert_eq!(payload["question"], "refund?");
        assert!((req.temperature - 0.2).abs() < f32::EPSILON);
    }

    #[test]
    fn test_chunk_text_is_truncated_by_chars() {
        let fragments = vec![SourceFragment {
            id: FragmentId::new("d", "c", 0),
            text: "ü".repeat(50),
            score: 0,
        }];
        let req = build_answer_request("q", None, &fragments, 10, 0.2);
        let payload = payload_of(&req);
        let line = payload["context"].as_str().unwrap().lines().nth(1).unwrap().to_string();
        let chunk: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(chunk["text"].as_str().unwrap().chars().count(), 10);
    }

    #[test]
    fn test_workspace_context_included_when_present() {
        let ctx = WorkspaceContext {
            profile_json: Some(json!({"industry": "saas"})),
            ..Default::default()
        };
        let req = build_answer_request("q", Some(&ctx), &[], 4000, 0.2);
        let payload = payload_of(&req);
        let context = payload["context"].as_str().unwrap();
        assert!(context.starts_with("WORKSPACE_CONTEXT:"));
        assert!(context.contains("saas"));

        let empty = build_answer_request("q", Some(&WorkspaceContext::default()), &[], 4000, 0.2);
        assert!(payload_of(&empty)["context"]
            .as_str()
            .unwrap()
            .starts_with("DOCUMENT_CHUNKS:"));
    }
}
