use anyhow::Result;
use sqlx::SqlitePool;

pub async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    // Document chunks, scoped per organization/workspace and GLOBAL or PROJECT
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS document_chunks (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            organization_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            project_id TEXT,
            scope TEXT NOT NULL DEFAULT 'GLOBAL',
            chunk_index INTEGER NOT NULL,
            text TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(document_id, chunk_index)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS workspace_contexts (
            workspace_id TEXT PRIMARY KEY,
            profile_json TEXT,
            goals_json TEXT,
            preferences_json TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Provider connections; auth_json holds tokens and the selected property
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS connections (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            status TEXT NOT NULL,
            auth_json TEXT,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS metric_daily (
            id TEXT PRIMARY KEY,
            user_id TEXT NOT NULL,
            workspace_id TEXT NOT NULL,
            provider TEXT NOT NULL,
            date TEXT NOT NULL,
            metrics_json TEXT NOT NULL,
            dimensions_json TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            UNIQUE(workspace_id, provider, date)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signals (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            type TEXT NOT NULL,
            source_provider TEXT NOT NULL,
            period_start INTEGER NOT NULL,
            period_end INTEGER NOT NULL,
            key TEXT NOT NULL,
            value REAL NOT NULL,
            unit TEXT NOT NULL,
            dimensions TEXT NOT NULL DEFAULT '{}',
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS insights (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            period_start INTEGER NOT NULL,
            period_end INTEGER NOT NULL,
            observations TEXT NOT NULL,
            hypotheses TEXT NOT NULL,
            opportunities TEXT NOT NULL,
            sources TEXT NOT NULL,
            created_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS weekly_reports (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            week_start INTEGER NOT NULL,
            week_end INTEGER NOT NULL,
            summary TEXT NOT NULL,
            scoreboard TEXT NOT NULL,
            insights TEXT NOT NULL,
            decisions TEXT NOT NULL,
            risks TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            UNIQUE(workspace_id, week_start, week_end)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One row per held job lock
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS job_locks (
            name TEXT PRIMARY KEY,
            holder TEXT NOT NULL,
            acquired_at INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Create indexes
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_scope ON document_chunks(organization_id, workspace_id, scope)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_chunks_created_at ON document_chunks(created_at DESC)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_connections_provider ON connections(provider, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_signals_period ON signals(workspace_id, period_start, period_end)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_insights_period ON insights(workspace_id, created_at DESC)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
