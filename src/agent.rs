//! Grounded agent runs.
//!
//! [`AgentRuntime`] owns the shared resources of one run (retriever, model
//! client, callback notifier) and turns an [`AgentRunInput`] into a
//! [`VerifiedAnswer`]. Every upstream failure collapses into the safe
//! fallback answer; the detail is logged, never returned.

use anyhow::{anyhow, Result};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

use crate::answer::{Locale, VerifiedAnswer};
use crate::callback::{RunEvent, RunNotifier};
use crate::config::Config;
use crate::generator::generate_answer;
use crate::llm::JsonCompleter;
use crate::models::AgentRunInput;
use crate::retrieve::Retriever;
use crate::verifier::{verify_value, AllowedCitationSet};

/// Length of the reply excerpt sent as the callback summary.
const SUMMARY_CHARS: usize = 200;

pub struct AgentRuntime {
    retriever: Arc<dyn Retriever>,
    llm: Arc<dyn JsonCompleter>,
    notifier: Arc<RunNotifier>,
    locale: Locale,
    max_chunk_chars: usize,
    temperature: f32,
    timeout: Duration,
}

impl AgentRuntime {
    pub fn new(
        config: &Config,
        retriever: Arc<dyn Retriever>,
        llm: Arc<dyn JsonCompleter>,
        notifier: Arc<RunNotifier>,
    ) -> Self {
        Self {
            retriever,
            llm,
            notifier,
            locale: config.answer.locale,
            max_chunk_chars: config.retrieval.max_chunk_chars,
            temperature: config.llm.answer_temperature,
            timeout: Duration::from_secs(config.llm.timeout_secs),
        }
    }

    /// Answers one request. Always produces an answer.
    pub async fn run(&self, input: &AgentRunInput) -> VerifiedAnswer {
        let outcome = self.answer(input).await;

        let answer = match &outcome {
            Ok(answer) => answer.clone(),
            Err(e) => {
                tracing::error!(
                    workspace_id = %input.workspace_id,
                    agent_id = %input.agent_id,
                    error = %e,
                    "agent run failed, returning fallback"
                );
                VerifiedAnswer::safe_fallback(self.locale)
            }
        };

        if let Some(run_id) = input.run_id.as_deref().filter(|r| !r.is_empty()) {
            let event = match &outcome {
                Ok(answer) => RunEvent::success(
                    run_id,
                    summarize(&answer.reply),
                    json!({
                        "sourcesUsed": answer.answer_from_sources.len(),
                        "demoted": answer.demoted_count(),
                        "questions": answer.missing_info_questions.len(),
                    }),
                ),
                Err(e) => RunEvent::failed(run_id, e.to_string()),
            };
            self.notifier.notify_detached(event);
        }

        answer
    }

    async fn answer(&self, input: &AgentRunInput) -> Result<VerifiedAnswer> {
        let context = match self.retriever.workspace_context(&input.workspace_id).await {
            Ok(ctx) => ctx,
            Err(e) => {
                tracing::error!(
                    workspace_id = %input.workspace_id,
                    error = %e,
                    "failed to load workspace context"
                );
                None
            }
        };

        let fragments = self
            .retriever
            .search(&input.retrieval_query())
            .await
            .map_err(|e| anyhow!("retrieval failed: {}", e))?;
        let allowed = AllowedCitationSet::from_fragments(&fragments);

        tracing::info!(
            workspace_id = %input.workspace_id,
            fragments = fragments.len(),
            "retrieved source fragments"
        );

        let generation = generate_answer(
            self.llm.as_ref(),
            &input.message,
            context.as_ref(),
            &fragments,
            self.max_chunk_chars,
            self.temperature,
        );
        let raw = tokio::time::timeout(self.timeout, generation)
            .await
            .map_err(|_| anyhow!("answer generation timed out after {:?}", self.timeout))?
            .map_err(|e| anyhow!("answer generation failed: {}", e))?;

        let verified = verify_value(&raw, &allowed, self.locale)?;
        if verified.demoted_count() > 0 {
            tracing::warn!(
                workspace_id = %input.workspace_id,
                demoted = verified.demoted_count(),
                "demoted claims with unverifiable citations"
            );
        }
        Ok(verified)
    }
}

fn summarize(reply: &str) -> String {
    let trimmed = reply.trim();
    if trimmed.chars().count() <= SUMMARY_CHARS {
        return trimmed.to_string();
    }
    let mut out: String = trimmed.chars().take(SUMMARY_CHARS).collect();
    out.push_str("...");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::answer::LABEL_NOT_FROM_SOURCES;
    use crate::config::parse_config;
    use crate::llm::ChatRequest;
    use crate::models::{FragmentId, RetrievalQuery, SourceFragment, WorkspaceContext};
    use async_trait::async_trait;
    use serde_json::Value;
    use std::sync::Mutex;

    struct FixedRetriever {
        fragments: Vec<SourceFragment>,
        fail: bool,
    }

    #[async_trait]
    impl Retriever for FixedRetriever {
        async fn search(&self, _query: &RetrievalQuery) -> Result<Vec<SourceFragment>> {
            if self.fail {
                return Err(anyhow!("database unavailable"));
            }
            Ok(self.fragments.clone())
        }

        async fn workspace_context(&self, _workspace_id: &str) -> Result<Option<WorkspaceContext>> {
            Err(anyhow!("no context table"))
        }
    }

    struct ScriptedLlm {
        reply: Result<Value, String>,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl JsonCompleter for ScriptedLlm {
        async fn complete_json(&self, request: &ChatRequest) -> Result<Value> {
            self.seen.lock().unwrap().push(request.user.clone());
            self.reply.clone().map_err(|e| anyhow!(e))
        }
    }

    fn runtime(retriever: FixedRetriever, reply: Result<Value, String>) -> (AgentRuntime, Arc<ScriptedLlm>) {
        let config = parse_config("[db]\npath = \"x.sqlite\"\n[server]\nbind = \"127.0.0.1:0\"\n").unwrap();
        let llm = Arc::new(ScriptedLlm {
            reply,
            seen: Mutex::new(Vec::new()),
        });
        let rt = AgentRuntime::new(
            &config,
            Arc::new(retriever),
            llm.clone(),
            Arc::new(RunNotifier::disabled()),
        );
        (rt, llm)
    }

    fn input() -> AgentRunInput {
        serde_json::from_value(json!({
            "workspaceId": "w1",
            "userId": "u1",
            "agentId": "a1",
            "message": "What is the refund policy?",
            "organizationId": "o1",
            "runId": "run-1",
        }))
        .unwrap()
    }

    fn refund_fragment() -> SourceFragment {
        SourceFragment {
            id: FragmentId::new("doc-1", "chunk-1", 0),
            text: "Refunds are accepted within 30 days.".to_string(),
            score: 4,
        }
    }

    #[tokio::test]
    async fn test_grounded_answer_passes() {
        let reply = json!({
            "reply": "Refunds within 30 days.",
            "answer_from_sources": [{
                "text": "Refunds are accepted within 30 days.",
                "citations": [{"docId": "doc-1", "chunkId": "chunk-1", "page": 0}]
            }],
            "additional_reasoning": [],
            "missing_info_questions": []
        });
        let (rt, llm) = runtime(
            FixedRetriever { fragments: vec![refund_fragment()], fail: false },
            Ok(reply),
        );
        let answer = rt.run(&input()).await;
        assert_eq!(answer.answer_from_sources.len(), 1);
        assert_eq!(answer.reply, "Refunds within 30 days.");
        assert!(llm.seen.lock().unwrap()[0].contains("chunk-1"));
    }

    #[tokio::test]
    async fn test_fabricated_citation_is_demoted() {
        let reply = json!({
            "reply": "Refunds within 30 days.",
            "answer_from_sources": [{
                "text": "Refunds are accepted within 30 days.",
                "citations": [{"docId": "doc-9", "chunkId": "chunk-9", "page": 0}]
            }]
        });
        let (rt, _) = runtime(
            FixedRetriever { fragments: vec![refund_fragment()], fail: false },
            Ok(reply),
        );
        let answer = rt.run(&input()).await;
        assert!(answer.answer_from_sources.is_empty());
        assert_eq!(answer.additional_reasoning.len(), 1);
        assert_eq!(answer.additional_reasoning[0].label, LABEL_NOT_FROM_SOURCES);
        assert!(!answer.missing_info_questions.is_empty());
    }

    #[tokio::test]
    async fn test_generator_failure_returns_fallback() {
        let (rt, _) = runtime(
            FixedRetriever { fragments: vec![refund_fragment()], fail: false },
            Err("upstream 500".to_string()),
        );
        let answer = rt.run(&input()).await;
        assert_eq!(answer, VerifiedAnswer::safe_fallback(Locale::Nl));
    }

    #[tokio::test]
    async fn test_retrieval_failure_skips_generation() {
        let (rt, llm) = runtime(
            FixedRetriever { fragments: vec![], fail: true },
            Ok(json!({"reply": "should not be used"})),
        );
        let answer = rt.run(&input()).await;
        assert_eq!(answer, VerifiedAnswer::safe_fallback(Locale::Nl));
        assert!(llm.seen.lock().unwrap().is_empty());
    }

    struct SlowLlm;

    #[async_trait]
    impl JsonCompleter for SlowLlm {
        async fn complete_json(&self, _request: &ChatRequest) -> Result<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(json!({"reply": "too late"}))
        }
    }

    async fn capture_event(
        axum::extract::State(tx): axum::extract::State<tokio::sync::mpsc::UnboundedSender<Value>>,
        axum::Json(body): axum::Json<Value>,
    ) -> axum::http::StatusCode {
        let _ = tx.send(body);
        axum::http::StatusCode::OK
    }

    #[tokio::test]
    async fn test_generation_timeout_returns_fallback_and_reports_failure() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let hub = axum::Router::new()
            .route("/api/runs/callback", axum::routing::post(capture_event))
            .with_state(tx);
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, hub).await.unwrap();
        });

        let config = parse_config(
            "[db]\npath = \"x.sqlite\"\n[server]\nbind = \"127.0.0.1:0\"\n[llm]\ntimeout_secs = 1\n",
        )
        .unwrap();
        let secrets = crate::config::Secrets {
            agenthub_base_url: Some(format!("http://{}", addr)),
            agent_service_key: Some("svc".to_string()),
            ..Default::default()
        };
        let notifier = Arc::new(RunNotifier::new(&secrets, &config.callback).unwrap());
        let rt = AgentRuntime::new(
            &config,
            Arc::new(FixedRetriever { fragments: vec![refund_fragment()], fail: false }),
            Arc::new(SlowLlm),
            notifier,
        );

        let started = std::time::Instant::now();
        let answer = rt.run(&input()).await;
        assert!(started.elapsed() < Duration::from_secs(4));
        assert_eq!(answer, VerifiedAnswer::safe_fallback(Locale::Nl));

        let event = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event["runId"], "run-1");
        assert_eq!(event["status"], "failed");
        assert!(event["error"].as_str().unwrap().contains("timed out"));
    }

    #[test]
    fn test_summary_is_bounded() {
        assert_eq!(summarize("  short  "), "short");
        let long = "x".repeat(500);
        assert_eq!(summarize(&long).chars().count(), SUMMARY_CHARS + 3);
    }
}
