//! Core data models shared by retrieval, orchestration, and the sync jobs.

use serde::{Deserialize, Serialize};

/// Compound identity of a retrievable fragment.
///
/// Treated as an opaque key: all three parts take part in equality and
/// are never compared separately.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FragmentId {
    pub document_id: String,
    pub chunk_id: String,
    pub position: i64,
}

impl FragmentId {
    pub fn new(document_id: impl Into<String>, chunk_id: impl Into<String>, position: i64) -> Self {
        Self {
            document_id: document_id.into(),
            chunk_id: chunk_id.into(),
            position,
        }
    }
}

/// A chunk of document text offered to the answer generator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceFragment {
    pub id: FragmentId,
    pub text: String,
    /// Keyword relevance; higher is better, 0 for the recency fallback.
    pub score: u32,
}

/// Scope of a chunk within an organization's library.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkScope {
    Global,
    Project,
}

impl ChunkScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChunkScope::Global => "GLOBAL",
            ChunkScope::Project => "PROJECT",
        }
    }
}

/// What to search and where.
#[derive(Debug, Clone)]
pub struct RetrievalQuery {
    pub workspace_id: String,
    pub organization_id: String,
    pub project_id: Option<String>,
    pub use_global_library: bool,
    pub query: String,
}

/// Profile, goals, and preferences stored for a workspace.
///
/// Each value is the parsed JSON when the stored text is valid JSON and the
/// raw string otherwise.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WorkspaceContext {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub profile_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goals_json: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preferences_json: Option<serde_json::Value>,
}

impl WorkspaceContext {
    pub fn is_empty(&self) -> bool {
        self.profile_json.is_none() && self.goals_json.is_none() && self.preferences_json.is_none()
    }
}

/// Request body for `POST /v1/agents/run`.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRunInput {
    pub workspace_id: String,
    pub user_id: String,
    pub agent_id: String,
    pub message: String,
    pub organization_id: String,
    #[serde(default)]
    pub project_id: Option<String>,
    #[serde(default = "default_true")]
    pub use_global_library: bool,
    #[serde(default)]
    pub run_id: Option<String>,
}

fn default_true() -> bool {
    true
}

impl AgentRunInput {
    pub fn retrieval_query(&self) -> RetrievalQuery {
        RetrievalQuery {
            workspace_id: self.workspace_id.clone(),
            organization_id: self.organization_id.clone(),
            project_id: self.project_id.clone().filter(|p| !p.trim().is_empty()),
            use_global_library: self.use_global_library,
            query: self.message.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Pending,
    Connected,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Pending => "PENDING",
            ConnectionStatus::Connected => "CONNECTED",
            ConnectionStatus::Error => "ERROR",
        }
    }
}

/// A stored provider connection row.
#[derive(Debug, Clone)]
pub struct Connection {
    pub id: String,
    pub user_id: String,
    pub workspace_id: String,
    pub provider: String,
    pub status: String,
    pub auth_json: Option<String>,
}
