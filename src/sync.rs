//! Daily provider sync.
//!
//! Pulls yesterday's aggregates (UTC) for every connected, eligible
//! connection of one provider and stores them as a `metric_daily` row plus
//! the derived daily signals. The whole job runs under the `sync-daily` job
//! lock; a trigger that finds it held returns `skipped` without touching
//! connection data. One failing connection never aborts the others.

use anyhow::{bail, Result};
use chrono::{Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{Row, SqlitePool};
use std::sync::Arc;

use crate::jobs::{FailureLog, JobFailure};
use crate::lock::{with_lock, JobLock, SYNC_DAILY_LOCK};
use crate::models::{Connection, ConnectionStatus};
use crate::providers::{load_auth, MetricsProvider, GOOGLE_ANALYTICS};
use crate::signals::{daily_signals, replace_signals};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SyncOutcome {
    Skipped {
        reason: String,
        message: String,
    },
    DryRun {
        eligible_connections: usize,
        total_connections: usize,
        message: String,
    },
    Success {
        synced: usize,
        failed: usize,
        failures: Vec<JobFailure>,
    },
}

/// Runs the daily sync for the requested provider (default GA4).
pub async fn run_sync_daily(
    pool: &SqlitePool,
    lock: &dyn JobLock,
    providers: &[Arc<dyn MetricsProvider>],
    request: &SyncRequest,
) -> Result<SyncOutcome> {
    let day = Utc::now().date_naive() - Duration::days(1);
    let outcome = with_lock(lock, SYNC_DAILY_LOCK, sync_day(pool, providers, request, day)).await?;

    Ok(outcome.unwrap_or_else(|| SyncOutcome::Skipped {
        reason: "already_running".to_string(),
        message: "Another sync is already running".to_string(),
    }))
}

async fn sync_day(
    pool: &SqlitePool,
    providers: &[Arc<dyn MetricsProvider>],
    request: &SyncRequest,
    day: NaiveDate,
) -> Result<SyncOutcome> {
    let provider_id = request
        .provider
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .unwrap_or(GOOGLE_ANALYTICS);
    let provider = providers.iter().find(|p| p.provider() == provider_id);

    let connections = load_connections(pool, provider_id).await?;
    let eligible: Vec<&Connection> = match provider {
        Some(p) => connections
            .iter()
            .filter(|c| {
                load_auth(c.auth_json.as_deref())
                    .map(|auth| p.is_eligible(&auth))
                    .unwrap_or(false)
            })
            .collect(),
        None => {
            tracing::warn!(provider = provider_id, "no metrics provider registered");
            Vec::new()
        }
    };

    if request.dry_run {
        return Ok(SyncOutcome::DryRun {
            eligible_connections: eligible.len(),
            total_connections: connections.len(),
            message: "No writes performed".to_string(),
        });
    }

    let mut synced = 0;
    let mut failures = FailureLog::new();

    if let Some(provider) = provider {
        for connection in eligible {
            match sync_connection(pool, provider.as_ref(), connection, day).await {
                Ok(()) => synced += 1,
                Err(e) => {
                    tracing::warn!(
                        connection_id = %connection.id,
                        workspace_id = %connection.workspace_id,
                        error = %e,
                        "connection sync failed"
                    );
                    failures.record(&connection.workspace_id, Some(&connection.provider), e.to_string());
                }
            }
        }
    }

    tracing::info!(
        provider = provider_id,
        %day,
        synced,
        failed = failures.count(),
        "daily sync finished"
    );

    Ok(SyncOutcome::Success {
        synced,
        failed: failures.count(),
        failures: failures.into_entries(),
    })
}

async fn load_connections(pool: &SqlitePool, provider: &str) -> Result<Vec<Connection>> {
    let rows = sqlx::query(
        "SELECT id, user_id, workspace_id, provider, status, auth_json FROM connections \
         WHERE provider = ? AND status = ? ORDER BY created_at, id",
    )
    .bind(provider)
    .bind(ConnectionStatus::Connected.as_str())
    .fetch_all(pool)
    .await?;

    Ok(rows
        .iter()
        .map(|row| Connection {
            id: row.get("id"),
            user_id: row.get("user_id"),
            workspace_id: row.get("workspace_id"),
            provider: row.get("provider"),
            status: row.get("status"),
            auth_json: row.get("auth_json"),
        })
        .collect())
}

async fn sync_connection(
    pool: &SqlitePool,
    provider: &dyn MetricsProvider,
    connection: &Connection,
    day: NaiveDate,
) -> Result<()> {
    let auth = load_auth(connection.auth_json.as_deref())?;
    let now = Utc::now().timestamp();

    let auth = match provider.refresh_auth(auth.clone()).await {
        Ok(refreshed) => refreshed,
        Err(e) => {
            let reason = e.to_string();
            let mut failed = auth;
            provider.record_auth_error(&mut failed, &reason);
            sqlx::query("UPDATE connections SET status = ?, auth_json = ?, updated_at = ? WHERE id = ?")
                .bind(ConnectionStatus::Error.as_str())
                .bind(failed.to_string())
                .bind(now)
                .bind(&connection.id)
                .execute(pool)
                .await?;
            bail!("Token refresh failed: {}", reason);
        }
    };

    let report = provider.fetch_day(&auth, day).await?;
    let date = day.format("%Y-%m-%d").to_string();

    sqlx::query(
        "INSERT INTO metric_daily (id, user_id, workspace_id, provider, date, metrics_json, dimensions_json, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
         ON CONFLICT(workspace_id, provider, date) DO UPDATE SET \
         metrics_json = excluded.metrics_json, dimensions_json = excluded.dimensions_json, updated_at = excluded.updated_at",
    )
    .bind(uuid::Uuid::new_v4().to_string())
    .bind(&connection.user_id)
    .bind(&connection.workspace_id)
    .bind(&connection.provider)
    .bind(&date)
    .bind(serde_json::to_string(&report.metrics)?)
    .bind(report.dimensions.to_string())
    .bind(now)
    .bind(now)
    .execute(pool)
    .await?;

    let period_start = day
        .and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default();
    let period = (period_start, period_start + 86_400);
    let signals = daily_signals(
        &connection.workspace_id,
        provider.signal_source(),
        period,
        &report.metrics,
        &report.dimensions,
    );
    if let Err(e) = replace_signals(
        pool,
        &connection.workspace_id,
        provider.signal_source(),
        period,
        &signals,
    )
    .await
    {
        tracing::warn!(
            workspace_id = %connection.workspace_id,
            error = %e,
            "failed to write daily signals"
        );
    }

    sqlx::query("UPDATE connections SET auth_json = ?, updated_at = ? WHERE id = ?")
        .bind(auth.to_string())
        .bind(now)
        .bind(&connection.id)
        .execute(pool)
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_defaults() {
        let req: SyncRequest = serde_json::from_value(json!({})).unwrap();
        assert!(req.provider.is_none());
        assert!(!req.dry_run);

        let req: SyncRequest =
            serde_json::from_value(json!({"provider": "GOOGLE_ANALYTICS", "dryRun": true})).unwrap();
        assert!(req.dry_run);
    }

    #[test]
    fn test_outcome_wire_shape() {
        let skipped = serde_json::to_value(SyncOutcome::Skipped {
            reason: "already_running".to_string(),
            message: "m".to_string(),
        })
        .unwrap();
        assert_eq!(skipped["status"], "skipped");
        assert_eq!(skipped["reason"], "already_running");

        let dry = serde_json::to_value(SyncOutcome::DryRun {
            eligible_connections: 1,
            total_connections: 2,
            message: "m".to_string(),
        })
        .unwrap();
        assert_eq!(dry["status"], "dry_run");
        assert_eq!(dry["eligibleConnections"], 1);
        assert_eq!(dry["totalConnections"], 2);
    }
}
