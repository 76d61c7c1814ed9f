//! # Bureau runtime
//!
//! Grounded question answering over workspace documents, plus the periodic
//! analytics jobs that turn provider metrics into signals, insights and
//! weekly reports.
//!
//! ## Architecture
//!
//! ```text
//! question ──▶ retrieve ──▶ generator (LLM) ──▶ verifier ──▶ VerifiedAnswer
//!                 │                                │
//!           document_chunks                 allowed citations
//!
//! cron ──▶ lock ──▶ sync (providers) ──▶ metric_daily + signals
//!                                               │
//!                         intelligence ◀────────┤
//!                                               ▼
//!                                        weekly reports
//! ```
//!
//! Every claim in a [`answer::VerifiedAnswer`]'s sourced section cites a
//! fragment that was actually retrieved for that request; anything else is
//! demoted to reasoning by [`verifier::verify`].
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration and environment secrets |
//! | [`models`] | Core data types |
//! | [`answer`] | Trusted answer shape and safe fallback |
//! | [`verifier`] | Citation verification of model output |
//! | [`keywords`] | Query keyword extraction |
//! | [`retrieve`] | Scoped keyword retrieval |
//! | [`llm`] | JSON completion client |
//! | [`generator`] | Grounded answer prompts |
//! | [`agent`] | Request orchestration |
//! | [`callback`] | Fire-and-forget run callback |
//! | [`lock`] | Named job locks |
//! | [`jobs`] | Per-item failure bookkeeping |
//! | [`providers`] | Analytics data providers (GA4) |
//! | [`signals`] | Normalized signals and scoreboards |
//! | [`sync`] | Daily provider sync job |
//! | [`intelligence`] | Insight generation |
//! | [`report`] | Weekly reports |
//! | [`server`] | HTTP server |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod agent;
pub mod answer;
pub mod callback;
pub mod config;
pub mod db;
pub mod generator;
pub mod intelligence;
pub mod jobs;
pub mod keywords;
pub mod llm;
pub mod lock;
pub mod migrate;
pub mod models;
pub mod providers;
pub mod report;
pub mod retrieve;
pub mod server;
pub mod signals;
pub mod sync;
pub mod verifier;
