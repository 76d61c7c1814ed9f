//! Provider-agnostic normalized signals.
//!
//! A signal is one numeric observation (`type`, `key`, `value`, `unit`) for a
//! workspace over a period `[period_start, period_end)` in unix seconds.
//! Daily syncs write them; insight generation and weekly reports read them.

use anyhow::Result;
use serde::Serialize;
use serde_json::Value;
use sqlx::{Row, SqlitePool};
use std::collections::{BTreeMap, HashSet};

use crate::providers::DailyMetrics;

/// Signals taken per type by [`select_signals`].
pub const TOP_PER_TYPE: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalType {
    Traffic,
    Engagement,
    Conversion,
}

impl SignalType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignalType::Traffic => "TRAFFIC",
            SignalType::Engagement => "ENGAGEMENT",
            SignalType::Conversion => "CONVERSION",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub id: String,
    pub workspace_id: String,
    #[serde(rename = "type")]
    pub signal_type: String,
    pub source_provider: String,
    pub period_start: i64,
    pub period_end: i64,
    pub key: String,
    pub value: f64,
    pub unit: String,
    pub dimensions: Value,
}

/// The five signals derived from one day of metrics.
pub fn daily_signals(
    workspace_id: &str,
    source: &str,
    period: (i64, i64),
    metrics: &DailyMetrics,
    dimensions: &Value,
) -> Vec<Signal> {
    let make = |signal_type: SignalType, key: &str, value: f64| Signal {
        id: uuid::Uuid::new_v4().to_string(),
        workspace_id: workspace_id.to_string(),
        signal_type: signal_type.as_str().to_string(),
        source_provider: source.to_string(),
        period_start: period.0,
        period_end: period.1,
        key: key.to_string(),
        value,
        unit: "count".to_string(),
        dimensions: dimensions.clone(),
    };

    vec![
        make(SignalType::Traffic, "sessions", metrics.sessions),
        make(SignalType::Traffic, "users", metrics.total_users),
        make(SignalType::Traffic, "pageviews", metrics.screen_page_views),
        // Pageviews double as the engagement proxy.
        make(SignalType::Engagement, "pageviews", metrics.screen_page_views),
        make(SignalType::Conversion, "conversions", metrics.conversions),
    ]
}

/// Replaces the signals of one source for one workspace and period.
pub async fn replace_signals(
    pool: &SqlitePool,
    workspace_id: &str,
    source: &str,
    period: (i64, i64),
    signals: &[Signal],
) -> Result<()> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;

    sqlx::query(
        "DELETE FROM signals WHERE workspace_id = ? AND source_provider = ? AND period_start = ? AND period_end = ?",
    )
    .bind(workspace_id)
    .bind(source)
    .bind(period.0)
    .bind(period.1)
    .execute(&mut *tx)
    .await?;

    for signal in signals {
        sqlx::query(
            "INSERT INTO signals (id, workspace_id, type, source_provider, period_start, period_end, key, value, unit, dimensions, created_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&signal.id)
        .bind(&signal.workspace_id)
        .bind(&signal.signal_type)
        .bind(&signal.source_provider)
        .bind(signal.period_start)
        .bind(signal.period_end)
        .bind(&signal.key)
        .bind(signal.value)
        .bind(&signal.unit)
        .bind(signal.dimensions.to_string())
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(())
}

/// Signals fully contained in `[start, end]`, newest first.
pub async fn load_signals(
    pool: &SqlitePool,
    workspace_id: &str,
    start: i64,
    end: i64,
) -> Result<Vec<Signal>> {
    let rows = sqlx::query(
        "SELECT id, workspace_id, type, source_provider, period_start, period_end, key, value, unit, dimensions \
         FROM signals WHERE workspace_id = ? AND period_start >= ? AND period_end <= ? \
         ORDER BY created_at DESC, id",
    )
    .bind(workspace_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| {
            let dimensions: String = row.get("dimensions");
            Signal {
                id: row.get("id"),
                workspace_id: row.get("workspace_id"),
                signal_type: row.get("type"),
                source_provider: row.get("source_provider"),
                period_start: row.get("period_start"),
                period_end: row.get("period_end"),
                key: row.get("key"),
                value: row.get("value"),
                unit: row.get("unit"),
                dimensions: serde_json::from_str(&dimensions)
                    .unwrap_or_else(|_| Value::Object(Default::default())),
            }
        })
        .collect())
}

/// Top [`TOP_PER_TYPE`] signals by value for TRAFFIC, ENGAGEMENT and
/// CONVERSION, in that order, without duplicate ids.
pub fn select_signals(signals: &[Signal]) -> Vec<Signal> {
    let mut seen = HashSet::new();
    let mut selected = Vec::new();

    for signal_type in [SignalType::Traffic, SignalType::Engagement, SignalType::Conversion] {
        let mut of_type: Vec<&Signal> = signals
            .iter()
            .filter(|s| s.signal_type == signal_type.as_str())
            .collect();
        of_type.sort_by(|a, b| b.value.total_cmp(&a.value));

        for signal in of_type.into_iter().take(TOP_PER_TYPE) {
            if !signal.id.is_empty() && seen.insert(signal.id.as_str()) {
                selected.push(signal.clone());
            }
        }
    }

    selected
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoreboardEntry {
    pub current: f64,
    pub previous: f64,
    pub delta: f64,
    pub delta_percent: Option<f64>,
}

fn scoreboard_key(signal: &Signal) -> String {
    format!("{}_{}", signal.signal_type, signal.key)
}

/// Summed values per `"{type}_{key}"` of the current period compared with
/// the previous one. Keys only present in the previous period are left out.
pub fn build_scoreboard(current: &[Signal], previous: &[Signal]) -> BTreeMap<String, ScoreboardEntry> {
    let mut current_totals: BTreeMap<String, f64> = BTreeMap::new();
    for signal in current {
        *current_totals.entry(scoreboard_key(signal)).or_default() += signal.value;
    }

    let mut previous_totals: BTreeMap<String, f64> = BTreeMap::new();
    for signal in previous {
        *previous_totals.entry(scoreboard_key(signal)).or_default() += signal.value;
    }

    current_totals
        .into_iter()
        .map(|(key, current)| {
            let previous = previous_totals.get(&key).copied().unwrap_or(0.0);
            let delta = current - previous;
            let delta_percent = (previous > 0.0).then(|| delta / previous * 100.0);
            (
                key,
                ScoreboardEntry {
                    current,
                    previous,
                    delta,
                    delta_percent,
                },
            )
        })
        .collect()
}
