//! Insight generation from stored signals.
//!
//! Selects the strongest signals of a period, asks the model for grounded
//! observations, hypotheses and opportunities, validates the shape of the
//! reply, and stores it in `insights` with the selected signal ids as
//! sources.

use anyhow::{anyhow, bail, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::SqlitePool;

use crate::llm::{ChatRequest, JsonCompleter};
use crate::signals::{load_signals, select_signals, Signal};

pub const ERR_PERIOD_ORDER: &str = "periodStart must be before periodEnd";
pub const ERR_NO_SIGNALS: &str = "No Signals found for the given workspace/period";
pub const ERR_NONE_SELECTED: &str = "No Signals selected for intelligence generation";
pub const ERR_LLM_FAILED: &str = "LLM generation failed";

const SYSTEM_PROMPT: &str = "You are a precise analytics strategist. Respond only with valid JSON.";

/// Dimension keys shown next to each signal in the prompt.
const PROMPT_DIMENSIONS: [&str; 4] = ["channel", "page", "campaign", "sourceProvider"];

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightRequest {
    pub workspace_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightSources {
    pub signal_ids: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InsightResult {
    pub ok: bool,
    pub insight_id: String,
    pub workspace_id: String,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub sources: InsightSources,
}

pub async fn generate_insight(
    pool: &SqlitePool,
    llm: &dyn JsonCompleter,
    temperature: f32,
    request: &InsightRequest,
) -> Result<InsightResult> {
    if request.period_start >= request.period_end {
        bail!(ERR_PERIOD_ORDER);
    }

    let signals = load_signals(
        pool,
        &request.workspace_id,
        request.period_start.timestamp(),
        request.period_end.timestamp(),
    )
    .await?;
    if signals.is_empty() {
        bail!(ERR_NO_SIGNALS);
    }

    let selected = select_signals(&signals);
    if selected.is_empty() {
        bail!(ERR_NONE_SELECTED);
    }

    let chat = ChatRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: build_prompt(request, &selected),
        temperature,
    };
    let reply = match llm.complete_json(&chat).await.and_then(validate_reply) {
        Ok(reply) => reply,
        Err(e) => {
            tracing::error!(workspace_id = %request.workspace_id, error = %e, "insight generation failed");
            bail!(ERR_LLM_FAILED);
        }
    };

    let insight_id = uuid::Uuid::new_v4().to_string();
    let signal_ids: Vec<String> = selected.iter().map(|s| s.id.clone()).collect();

    sqlx::query(
        "INSERT INTO insights (id, workspace_id, period_start, period_end, observations, hypotheses, opportunities, sources, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&insight_id)
    .bind(&request.workspace_id)
    .bind(request.period_start.timestamp())
    .bind(request.period_end.timestamp())
    .bind(reply["observations"].to_string())
    .bind(reply["hypotheses"].to_string())
    .bind(reply["opportunities"].to_string())
    .bind(json!({"signalIds": signal_ids}).to_string())
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    tracing::info!(
        workspace_id = %request.workspace_id,
        insight_id = %insight_id,
        signals = signal_ids.len(),
        "stored insight"
    );

    Ok(InsightResult {
        ok: true,
        insight_id,
        workspace_id: request.workspace_id.clone(),
        period_start: request.period_start,
        period_end: request.period_end,
        sources: InsightSources { signal_ids },
    })
}

fn validate_reply(reply: Value) -> Result<Value> {
    let obj = reply
        .as_object()
        .ok_or_else(|| anyhow!("Response is not a JSON object"))?;
    for key in ["observations", "hypotheses", "opportunities"] {
        match obj.get(key) {
            None => bail!("Missing key '{}' in response", key),
            Some(v) if !v.is_array() => bail!("Field '{}' must be a list", key),
            Some(_) => {}
        }
    }
    Ok(reply)
}

fn signal_line(signal: &Signal) -> String {
    let dims: Vec<String> = PROMPT_DIMENSIONS
        .iter()
        .filter_map(|key| {
            signal.dimensions.get(*key).map(|v| match v {
                Value::String(s) => format!("{}={}", key, s),
                other => format!("{}={}", key, other),
            })
        })
        .collect();
    let dims = if dims.is_empty() {
        "global".to_string()
    } else {
        dims.join(", ")
    };
    format!(
        "- [{}] {} = {} {} ({}, signalId={})",
        signal.signal_type, signal.key, signal.value, signal.unit, dims, signal.id
    )
}

fn build_prompt(request: &InsightRequest, selected: &[Signal]) -> String {
    let signals_block: Vec<String> = selected.iter().map(signal_line).collect();

    format!(
        "You are an analytics strategist for B2B companies.\n\
         You receive normalized Signals from multiple data providers.\n\
         Each signal has a type (TRAFFIC, ENGAGEMENT, CONVERSION, COST, CONTENT, REVENUE), \
         a numeric value, and optional dimensions like channel, page or campaign.\n\n\
         Workspace: {workspace}\n\
         Period: {start} t/m {end}\n\n\
         Signals (id, type, key, value, unit, dimensions):\n\
         {signals}\n\n\
         TASK:\n\
         1) Create 3-6 factual observations that are DIRECTLY grounded in the signals above.\n   \
            - Each observation MUST reference at least one signalId from the list.\n\
         2) Create 2-4 hypotheses that explain WHY these patterns might be happening.\n   \
            - Clearly label them as hypotheses (e.g. start text with 'Hypothesis:').\n   \
            - Each hypothesis must also reference at least one signalId.\n\
         3) Create 3-6 opportunities for content/experiments based on the signals.\n   \
            - Each opportunity should have: topic, angle, whyNow, ctaStyle, and signalIds.\n\n\
         Respond ONLY with a single JSON object using this exact structure:\n\
         {{\n  \"observations\": [ {{ \"text\": string, \"signalIds\": [string, ...] }} ],\n  \
         \"hypotheses\": [ {{ \"text\": string, \"signalIds\": [string, ...] }} ],\n  \
         \"opportunities\": [ {{ \"topic\": string, \"angle\": string, \"whyNow\": string, \"ctaStyle\": string, \"signalIds\": [string, ...] }} ]\n}}\n\
         The JSON must be valid and parseable. Do not add explanations outside the JSON.",
        workspace = request.workspace_id,
        start = request.period_start.format("%Y-%m-%d"),
        end = request.period_end.format("%Y-%m-%d"),
        signals = signals_block.join("\n"),
    )
}
