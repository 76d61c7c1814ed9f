//! # Bureau runtime CLI (`bureau`)
//!
//! Runs the grounded agent runtime and the analytics jobs, either as an
//! HTTP service or as one-shot commands.
//!
//! ## Usage
//!
//! ```bash
//! bureau --config ./config/bureau.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `bureau init` | Create the SQLite database and run schema migrations |
//! | `bureau serve` | Start the HTTP server |
//! | `bureau ask "<question>"` | Answer one question from stored chunks |
//! | `bureau keywords "<text>"` | Print the search keywords for a text |
//! | `bureau sync-daily` | Sync yesterday's provider metrics |
//! | `bureau weekly-reports` | Generate last week's reports |
//! | `bureau intelligence` | Generate an insight for a workspace period |
//!
//! Secrets (`AGENT_RUNTIME_SECRET`, `OPENAI_API_KEY`, ...) are read from the
//! environment; a `.env` file in the working directory is loaded first.

use anyhow::Context;
use bureau_runtime::config::{self, Secrets};
use bureau_runtime::intelligence::{generate_insight, InsightRequest};
use bureau_runtime::keywords::extract_keywords;
use bureau_runtime::models::AgentRunInput;
use bureau_runtime::report::{run_weekly_reports, WeeklyReportsRequest};
use bureau_runtime::server::{run_server, AppState};
use bureau_runtime::sync::{run_sync_daily, SyncRequest};
use bureau_runtime::{db, migrate};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// Bureau runtime: grounded answers over workspace documents, plus the
/// periodic analytics jobs that feed workspace insights.
#[derive(Parser)]
#[command(name = "bureau", version, about = "Grounded agent runtime and analytics jobs")]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/bureau.toml`. Secrets never go in this file.
    #[arg(long, global = true, default_value = "./config/bureau.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Idempotent.
    Init,

    /// Start the HTTP server on `[server].bind`.
    ///
    /// Requires `AGENT_RUNTIME_SECRET`.
    Serve,

    /// Answer a question from stored document chunks and print the JSON answer.
    Ask {
        question: String,

        #[arg(long)]
        workspace: String,

        #[arg(long)]
        organization: String,

        /// Include PROJECT chunks of this project.
        #[arg(long)]
        project: Option<String>,

        /// Exclude GLOBAL library chunks.
        #[arg(long)]
        no_global: bool,

        #[arg(long, default_value = "cli")]
        user: String,

        #[arg(long, default_value = "cli")]
        agent: String,
    },

    /// Print the keywords extracted from a text, one per line.
    Keywords { text: String },

    /// Sync yesterday's metrics for all eligible connections.
    SyncDaily {
        /// Provider id (default `GOOGLE_ANALYTICS`).
        #[arg(long)]
        provider: Option<String>,

        /// Only count eligible connections.
        #[arg(long)]
        dry_run: bool,
    },

    /// Generate weekly reports for every workspace with signals.
    WeeklyReports {
        /// Any RFC 3339 instant inside the target week (default: last week).
        #[arg(long)]
        week_of: Option<DateTime<Utc>>,
    },

    /// Generate an insight from the signals of a period.
    Intelligence {
        #[arg(long)]
        workspace: String,

        /// Period start, RFC 3339.
        #[arg(long)]
        start: DateTime<Utc>,

        /// Period end, RFC 3339.
        #[arg(long)]
        end: DateTime<Utc>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is normal.
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("bureau_runtime=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Commands that don't require config
    if let Commands::Keywords { text } = &cli.command {
        for keyword in extract_keywords(text) {
            println!("{}", keyword);
        }
        return Ok(());
    }

    let cfg = config::load_config(&cli.config)?;
    let secrets = Secrets::from_env();

    match cli.command {
        Commands::Init => {
            let pool = db::connect(&cfg).await?;
            migrate::run_migrations(&pool).await?;
            pool.close().await;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            run_server(&cfg, &secrets).await?;
        }
        Commands::Ask {
            question,
            workspace,
            organization,
            project,
            no_global,
            user,
            agent,
        } => {
            let state = AppState::connect(&cfg, &secrets).await?;
            let input = AgentRunInput {
                workspace_id: workspace,
                user_id: user,
                agent_id: agent,
                message: question,
                organization_id: organization,
                project_id: project,
                use_global_library: !no_global,
                run_id: None,
            };
            let answer = state.agent.run(&input).await;
            println!("{}", serde_json::to_string_pretty(&answer)?);
            state.pool.close().await;
        }
        // Handled before the config is loaded.
        Commands::Keywords { .. } => {}
        Commands::SyncDaily { provider, dry_run } => {
            let state = AppState::connect(&cfg, &secrets).await?;
            let request = SyncRequest { provider, dry_run };
            let outcome =
                run_sync_daily(&state.pool, state.lock.as_ref(), &state.providers, &request).await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            state.pool.close().await;
        }
        Commands::WeeklyReports { week_of } => {
            let state = AppState::connect(&cfg, &secrets).await?;
            let outcome = run_weekly_reports(
                &state.pool,
                state.lock.as_ref(),
                state.llm.as_ref(),
                cfg.llm.analysis_temperature,
                &WeeklyReportsRequest { week_of },
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
            state.pool.close().await;
        }
        Commands::Intelligence {
            workspace,
            start,
            end,
        } => {
            secrets
                .openai_api_key
                .as_ref()
                .context("OPENAI_API_KEY must be set to generate insights")?;
            let state = AppState::connect(&cfg, &secrets).await?;
            let request = InsightRequest {
                workspace_id: workspace,
                period_start: start,
                period_end: end,
            };
            let result = generate_insight(
                &state.pool,
                state.llm.as_ref(),
                cfg.llm.analysis_temperature,
                &request,
            )
            .await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            state.pool.close().await;
        }
    }

    Ok(())
}
