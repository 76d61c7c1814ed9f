//! Weekly business reports.
//!
//! A report covers one Monday-based week `[week_start, week_start + 7d)`.
//! It holds a scoreboard of signal totals against the previous week, up to
//! three highlights from the latest insight, and an LLM-written summary with
//! decisions and risks. Generation is idempotent per workspace and week.

use anyhow::Result;
use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};

use crate::jobs::{FailureLog, JobFailure};
use crate::llm::{ChatRequest, JsonCompleter};
use crate::lock::{with_lock, JobLock, WEEKLY_REPORTS_LOCK};
use crate::signals::{build_scoreboard, load_signals, Signal};

const HIGHLIGHTS: usize = 3;
const PROMPT_SIGNALS: usize = 20;

const SYSTEM_PROMPT: &str =
    "You are a business intelligence analyst. Generate concise, actionable weekly reports.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportRef {
    pub id: String,
    /// `false` when the report for that week already existed.
    pub created: bool,
}

/// Ensures a report exists for the workspace and week and returns its id.
pub async fn generate_weekly_report(
    pool: &SqlitePool,
    llm: &dyn JsonCompleter,
    temperature: f32,
    workspace_id: &str,
    week_start: DateTime<Utc>,
    week_end: DateTime<Utc>,
) -> Result<ReportRef> {
    let start = week_start.timestamp();
    let end = week_end.timestamp();

    let existing: Option<String> = sqlx::query_scalar(
        "SELECT id FROM weekly_reports WHERE workspace_id = ? AND week_start = ? AND week_end = ? LIMIT 1",
    )
    .bind(workspace_id)
    .bind(start)
    .bind(end)
    .fetch_optional(pool)
    .await?;
    if let Some(id) = existing {
        return Ok(ReportRef { id, created: false });
    }

    let signals = load_signals(pool, workspace_id, start, end).await?;
    let previous = load_signals(pool, workspace_id, start - 7 * 86_400, start).await?;
    let scoreboard = build_scoreboard(&signals, &previous);

    let insight = latest_insight(pool, workspace_id, start, end).await?;
    let highlights = insight
        .as_ref()
        .map(|i| highlights_of(&i.observations))
        .unwrap_or_default();

    let prompt = build_prompt(week_start, week_end, &signals, insight.as_ref());
    let chat = ChatRequest {
        system: SYSTEM_PROMPT.to_string(),
        user: prompt,
        temperature,
    };
    let narrative = match llm.complete_json(&chat).await {
        Ok(reply) => Narrative::from_reply(&reply),
        Err(e) => {
            tracing::warn!(workspace_id, error = %e, "weekly report LLM failed, using fallback summary");
            Narrative::fallback(week_start, week_end, signals.len())
        }
    };

    let id = uuid::Uuid::new_v4().to_string();
    sqlx::query(
        "INSERT INTO weekly_reports (id, workspace_id, week_start, week_end, summary, scoreboard, insights, decisions, risks, created_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(workspace_id)
    .bind(start)
    .bind(end)
    .bind(&narrative.summary)
    .bind(serde_json::to_string(&scoreboard)?)
    .bind(serde_json::to_string(&highlights)?)
    .bind(narrative.decisions.to_string())
    .bind(narrative.risks.to_string())
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await?;

    Ok(ReportRef { id, created: true })
}

struct InsightRow {
    observations: Value,
    opportunities: Value,
}

/// Latest insight inside the week, else the latest one overall.
async fn latest_insight(
    pool: &SqlitePool,
    workspace_id: &str,
    start: i64,
    end: i64,
) -> Result<Option<InsightRow>> {
    let in_week = sqlx::query(
        "SELECT observations, opportunities FROM insights \
         WHERE workspace_id = ? AND period_start >= ? AND period_end <= ? \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(workspace_id)
    .bind(start)
    .bind(end)
    .fetch_optional(pool)
    .await?;

    let row = match in_week {
        Some(row) => Some(row),
        None => {
            sqlx::query(
                "SELECT observations, opportunities FROM insights WHERE workspace_id = ? ORDER BY created_at DESC LIMIT 1",
            )
            .bind(workspace_id)
            .fetch_optional(pool)
            .await?
        }
    };

    Ok(row.map(|row| {
        let parse = |col: &str| -> Value {
            let raw: String = row.get(col);
            serde_json::from_str(&raw).unwrap_or(Value::Array(Vec::new()))
        };
        InsightRow {
            observations: parse("observations"),
            opportunities: parse("opportunities"),
        }
    }))
}

fn highlights_of(observations: &Value) -> Vec<String> {
    observations
        .as_array()
        .map(|items| {
            items
                .iter()
                .take(HIGHLIGHTS)
                .map(|obs| match obs.get("text").and_then(|t| t.as_str()) {
                    Some(text) => text.to_string(),
                    None => match obs {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    },
                })
                .collect()
        })
        .unwrap_or_default()
}

fn build_prompt(
    week_start: DateTime<Utc>,
    week_end: DateTime<Utc>,
    signals: &[Signal],
    insight: Option<&InsightRow>,
) -> String {
    let metrics: Vec<String> = signals
        .iter()
        .take(PROMPT_SIGNALS)
        .map(|s| format!("- {} {}: {} {}", s.signal_type, s.key, s.value, s.unit))
        .collect();

    let insight_summary = match insight {
        Some(i) => format!(
            "Observations: {}. Opportunities: {}.",
            i.observations.as_array().map_or(0, Vec::len),
            i.opportunities.as_array().map_or(0, Vec::len)
        ),
        None => "No insights available for this week.".to_string(),
    };

    format!(
        "Generate a weekly business report for the week {} to {}.\n\n\
         Key metrics (this week):\n{}\n\n{}\n\n\
         Provide a JSON response with:\n\
         - summary: A 2-3 sentence human-readable summary of the week\n\
         - decisions: Array of 1-3 suggested decisions/actions (each as {{\"action\": \"...\", \"reason\": \"...\"}})\n\
         - risks: Array of 1-2 identified risks or noise factors (each as {{\"risk\": \"...\", \"severity\": \"LOW|MEDIUM|HIGH\"}})\n\n\
         Output ONLY valid JSON, no markdown or extra text.",
        week_start.format("%Y-%m-%d"),
        week_end.format("%Y-%m-%d"),
        metrics.join("\n"),
        insight_summary,
    )
}

struct Narrative {
    summary: String,
    decisions: Value,
    risks: Value,
}

impl Narrative {
    fn from_reply(reply: &Value) -> Self {
        let list = |key: &str| match reply.get(key) {
            Some(v @ Value::Array(_)) => v.clone(),
            _ => json!([]),
        };
        Self {
            summary: reply
                .get("summary")
                .and_then(|s| s.as_str())
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("No summary available.")
                .to_string(),
            decisions: list("decisions"),
            risks: list("risks"),
        }
    }

    fn fallback(week_start: DateTime<Utc>, week_end: DateTime<Utc>, signal_count: usize) -> Self {
        Self {
            summary: format!(
                "Weekly report for {} to {}. {} signals recorded.",
                week_start.format("%Y-%m-%d"),
                week_end.format("%Y-%m-%d"),
                signal_count
            ),
            decisions: json!([]),
            risks: json!([]),
        }
    }
}

// ============ Weekly job ============

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeeklyReportsRequest {
    /// Any instant in the target week; defaults to the previous full week.
    #[serde(default)]
    pub week_of: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum WeeklyReportsOutcome {
    Skipped {
        reason: String,
        message: String,
    },
    Success {
        week_start: DateTime<Utc>,
        week_end: DateTime<Utc>,
        created: usize,
        existing: usize,
        failed: usize,
        failures: Vec<JobFailure>,
    },
}

/// Monday 00:00 UTC of the week containing `at`.
pub fn week_start_of(at: DateTime<Utc>) -> DateTime<Utc> {
    let date = at.date_naive() - Duration::days(at.weekday().num_days_from_monday() as i64);
    date.and_time(NaiveTime::MIN).and_utc()
}

/// Generates reports for every workspace with signals in the week.
pub async fn run_weekly_reports(
    pool: &SqlitePool,
    lock: &dyn JobLock,
    llm: &dyn JsonCompleter,
    temperature: f32,
    request: &WeeklyReportsRequest,
) -> Result<WeeklyReportsOutcome> {
    let week_start = match request.week_of {
        Some(at) => week_start_of(at),
        None => week_start_of(Utc::now()) - Duration::days(7),
    };
    let week_end = week_start + Duration::days(7);

    let work = async {
        let workspaces: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT workspace_id FROM signals WHERE period_start >= ? AND period_end <= ? ORDER BY workspace_id",
        )
        .bind(week_start.timestamp())
        .bind(week_end.timestamp())
        .fetch_all(pool)
        .await?;

        let mut created = 0;
        let mut existing = 0;
        let mut failures = FailureLog::new();

        for workspace_id in &workspaces {
            match generate_weekly_report(pool, llm, temperature, workspace_id, week_start, week_end).await {
                Ok(ReportRef { created: true, .. }) => created += 1,
                Ok(ReportRef { created: false, .. }) => existing += 1,
                Err(e) => {
                    tracing::warn!(workspace_id = %workspace_id, error = %e, "weekly report failed");
                    failures.record(workspace_id, None, e.to_string());
                }
            }
        }

        tracing::info!(
            week_start = %week_start,
            created,
            existing,
            failed = failures.count(),
            "weekly reports finished"
        );

        Ok::<_, anyhow::Error>(WeeklyReportsOutcome::Success {
            week_start,
            week_end,
            created,
            existing,
            failed: failures.count(),
            failures: failures.into_entries(),
        })
    };

    let outcome = with_lock(lock, WEEKLY_REPORTS_LOCK, work).await?;
    Ok(outcome.unwrap_or_else(|| WeeklyReportsOutcome::Skipped {
        reason: "already_running".to_string(),
        message: "Weekly reports are already being generated".to_string(),
    }))
}
