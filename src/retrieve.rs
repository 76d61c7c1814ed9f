//! Scoped keyword retrieval of document chunks.
//!
//! The [`Retriever`] trait is the seam between orchestration and storage.
//! [`SqliteRetriever`] implements it over the `document_chunks` table:
//!
//! 1. Extract keywords from the query ([`crate::keywords`]).
//! 2. No keywords → return the most recent chunks in scope, score 0.
//! 3. Otherwise fetch up to `candidate_limit` chunks containing any keyword
//!    (`LIKE`, see [`like_pattern`]), score them in Rust, drop zero scores,
//!    sort by score desc and position asc, and keep the top `limit`.
//!
//! Scoping always filters on organization and workspace. PROJECT chunks are
//! only included for the requested project, GLOBAL chunks only when the
//! global library is enabled. A request with neither returns no chunks.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::config::{RecentOrder, RetrievalConfig};
use crate::keywords::extract_keywords;
use crate::models::{ChunkScope, FragmentId, RetrievalQuery, SourceFragment, WorkspaceContext};

/// Characters at the start of a chunk that earn a bonus point per keyword.
const LEADING_WINDOW_CHARS: usize = 200;

#[async_trait]
pub trait Retriever: Send + Sync {
    /// Candidate fragments for the query, best first.
    async fn search(&self, query: &RetrievalQuery) -> Result<Vec<SourceFragment>>;

    /// Stored context for the workspace, if any.
    async fn workspace_context(&self, workspace_id: &str) -> Result<Option<WorkspaceContext>>;
}

pub struct SqliteRetriever {
    pool: SqlitePool,
    config: RetrievalConfig,
}

impl SqliteRetriever {
    pub fn new(pool: SqlitePool, config: RetrievalConfig) -> Self {
        Self { pool, config }
    }
}

/// SQL fragment and binds for the scope filter.
struct ScopeFilter {
    sql: String,
    binds: Vec<String>,
}

fn scope_filter(query: &RetrievalQuery) -> Option<ScopeFilter> {
    let mut clauses = Vec::new();
    let mut binds = vec![query.organization_id.clone(), query.workspace_id.clone()];

    if let Some(project_id) = &query.project_id {
        clauses.push("(scope = ? AND project_id = ?)");
        binds.push(ChunkScope::Project.as_str().to_string());
        binds.push(project_id.clone());
    }
    if query.use_global_library {
        clauses.push("(scope = ?)");
        binds.push(ChunkScope::Global.as_str().to_string());
    }

    if clauses.is_empty() {
        return None;
    }

    Some(ScopeFilter {
        sql: format!(
            "organization_id = ? AND workspace_id = ? AND ({})",
            clauses.join(" OR ")
        ),
        binds,
    })
}

#[async_trait]
impl Retriever for SqliteRetriever {
    async fn search(&self, query: &RetrievalQuery) -> Result<Vec<SourceFragment>> {
        let Some(scope) = scope_filter(query) else {
            return Ok(Vec::new());
        };

        let keywords = extract_keywords(&query.query);

        if keywords.is_empty() {
            let order = match self.config.recent_order {
                RecentOrder::CreatedAt => "created_at DESC, id DESC",
                RecentOrder::Id => "id DESC",
            };
            let sql = format!(
                "SELECT id, document_id, chunk_index, text FROM document_chunks WHERE {} ORDER BY {} LIMIT ?",
                scope.sql, order
            );
            let mut q = sqlx::query(&sql);
            for b in &scope.binds {
                q = q.bind(b);
            }
            let rows = q.bind(self.config.limit).fetch_all(&self.pool).await?;

            return Ok(rows
                .iter()
                .map(|row| SourceFragment {
                    id: FragmentId::new(
                        row.get::<String, _>("document_id"),
                        row.get::<String, _>("id"),
                        row.get::<i64, _>("chunk_index"),
                    ),
                    text: row.get("text"),
                    score: 0,
                })
                .collect());
        }

        let text_clause = vec!["text LIKE ?"; keywords.len()].join(" OR ");
        let sql = format!(
            "SELECT id, document_id, chunk_index, text FROM document_chunks WHERE {} AND ({}) LIMIT ?",
            scope.sql, text_clause
        );
        let mut q = sqlx::query(&sql);
        for b in &scope.binds {
            q = q.bind(b);
        }
        for kw in &keywords {
            q = q.bind(like_pattern(kw));
        }
        let rows = q
            .bind(self.config.candidate_limit)
            .fetch_all(&self.pool)
            .await?;

        let candidates: Vec<SourceFragment> = rows
            .iter()
            .map(|row| {
                let text: String = row.get("text");
                SourceFragment {
                    id: FragmentId::new(
                        row.get::<String, _>("document_id"),
                        row.get::<String, _>("id"),
                        row.get::<i64, _>("chunk_index"),
                    ),
                    score: score_text(&text, &keywords),
                    text,
                }
            })
            .filter(|f: &SourceFragment| f.score > 0)
            .collect();

        Ok(rank_fragments(candidates, self.config.limit as usize))
    }

    async fn workspace_context(&self, workspace_id: &str) -> Result<Option<WorkspaceContext>> {
        let row = sqlx::query(
            "SELECT profile_json, goals_json, preferences_json FROM workspace_contexts WHERE workspace_id = ? LIMIT 1",
        )
        .bind(workspace_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| WorkspaceContext {
            profile_json: parse_stored_json(row.get("profile_json")),
            goals_json: parse_stored_json(row.get("goals_json")),
            preferences_json: parse_stored_json(row.get("preferences_json")),
        }))
    }
}

/// `LIKE` pattern for a keyword.
///
/// SQLite folds case for ASCII only, so each non-ASCII character becomes the
/// single-character wildcard `_`. The match is then a superset and
/// [`score_text`] does the Unicode-aware filtering. Keywords are
/// alphanumeric, so they never contain `%` or `_` themselves.
pub fn like_pattern(keyword: &str) -> String {
    let body: String = keyword
        .chars()
        .map(|c| if c.is_ascii() { c } else { '_' })
        .collect();
    format!("%{}%", body)
}

/// Keyword score: +1 per keyword in the text, +1 more if it is also in the
/// first [`LEADING_WINDOW_CHARS`] characters.
pub fn score_text(text: &str, keywords: &[String]) -> u32 {
    let lowered = text.trim().to_lowercase();
    let leading: String = lowered.chars().take(LEADING_WINDOW_CHARS).collect();

    keywords
        .iter()
        .map(|kw| match (lowered.contains(kw.as_str()), leading.contains(kw.as_str())) {
            (true, true) => 2,
            (true, false) => 1,
            _ => 0,
        })
        .sum()
}

/// Sorts by score desc then position asc and truncates to `limit`.
pub fn rank_fragments(mut fragments: Vec<SourceFragment>, limit: usize) -> Vec<SourceFragment> {
    fragments.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.id.position.cmp(&b.id.position))
    });
    fragments.truncate(limit);
    fragments
}

fn parse_stored_json(raw: Option<String>) -> Option<serde_json::Value> {
    let raw = raw.filter(|s| !s.is_empty())?;
    Some(serde_json::from_str(&raw).unwrap_or(serde_json::Value::String(raw)))
}
