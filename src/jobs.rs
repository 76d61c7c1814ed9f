//! Per-item failure bookkeeping for batch jobs.

use serde::Serialize;

/// Failures kept in a job result; the count covers all of them.
pub const MAX_RECORDED_FAILURES: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobFailure {
    pub workspace_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct FailureLog {
    count: usize,
    entries: Vec<JobFailure>,
}

impl FailureLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, workspace_id: &str, provider: Option<&str>, reason: impl Into<String>) {
        self.count += 1;
        if self.entries.len() < MAX_RECORDED_FAILURES {
            self.entries.push(JobFailure {
                workspace_id: workspace_id.to_string(),
                provider: provider.map(str::to_string),
                reason: reason.into(),
            });
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn into_entries(self) -> Vec<JobFailure> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_caps_entries_but_counts_all() {
        let mut log = FailureLog::new();
        for i in 0..25 {
            log.record(&format!("w{}", i), Some("GOOGLE_ANALYTICS"), "boom");
        }
        assert_eq!(log.count(), 25);
        let entries = log.into_entries();
        assert_eq!(entries.len(), MAX_RECORDED_FAILURES);
        assert_eq!(entries[0].workspace_id, "w0");
    }

    #[test]
    fn test_serializes_camel_case() {
        let mut log = FailureLog::new();
        log.record("w1", None, "no signals");
        let value = serde_json::to_value(log.into_entries()).unwrap();
        assert_eq!(
            value,
            serde_json::json!([{"workspaceId": "w1", "reason": "no signals"}])
        );
    }
}
