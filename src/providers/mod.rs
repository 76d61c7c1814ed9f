//! Analytics data providers for the daily sync.
//!
//! A [`MetricsProvider`] knows how to tell whether a stored connection is
//! ready to sync, how to keep its credentials fresh, and how to fetch one
//! day of aggregate metrics. The sync job in [`crate::sync`] drives it and
//! owns all persistence.
//!
//! Connection credentials live in `connections.auth_json` as a JSON object.
//! Providers read and update it as a [`serde_json::Value`]; the shape under
//! each provider key belongs to that provider.

pub mod ga4;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::{Map, Value};

pub use ga4::Ga4Provider;

/// Provider id stored on connections and metric rows.
pub const GOOGLE_ANALYTICS: &str = "GOOGLE_ANALYTICS";

/// One day of aggregate metrics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyMetrics {
    pub sessions: f64,
    pub total_users: f64,
    pub screen_page_views: f64,
    pub conversions: f64,
    pub total_revenue: f64,
}

#[derive(Debug, Clone)]
pub struct DayReport {
    pub metrics: DailyMetrics,
    /// Shared by the metric row and the derived signals.
    pub dimensions: Value,
}

#[async_trait]
pub trait MetricsProvider: Send + Sync {
    /// Provider id as stored on connections (e.g. `GOOGLE_ANALYTICS`).
    fn provider(&self) -> &'static str;

    /// Short source name recorded on signals (e.g. `GA4`).
    fn signal_source(&self) -> &'static str;

    /// Whether a connection with this auth object can be synced.
    fn is_eligible(&self, auth: &Value) -> bool;

    /// Returns the auth object with credentials valid for the next call,
    /// refreshing them upstream if needed.
    async fn refresh_auth(&self, auth: Value) -> Result<Value>;

    async fn fetch_day(&self, auth: &Value, day: NaiveDate) -> Result<DayReport>;

    /// Records a credential failure inside the auth object.
    fn record_auth_error(&self, auth: &mut Value, error: &str);
}

/// Parses a stored auth column, requiring a JSON object.
pub fn load_auth(raw: Option<&str>) -> Result<Value> {
    let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
        bail!("authJson is empty");
    };
    let value: Value = serde_json::from_str(raw)?;
    if !value.is_object() {
        bail!("authJson is not a JSON object");
    }
    Ok(value)
}

/// Sets `target[path[0]][path[1]]...` to `value`, replacing any non-object
/// node along the way with an empty object.
pub(crate) fn set_path(target: &mut Value, path: &[&str], value: Value) {
    let Some((last, parents)) = path.split_last() else {
        *target = value;
        return;
    };
    let mut node = target;
    for key in parents {
        if !node.is_object() {
            *node = Value::Object(Map::new());
        }
        node = &mut node[*key];
    }
    if !node.is_object() {
        *node = Value::Object(Map::new());
    }
    node[*last] = value;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_load_auth() {
        assert!(load_auth(None).is_err());
        assert!(load_auth(Some("  ")).is_err());
        assert!(load_auth(Some("[1]")).is_err());
        assert!(load_auth(Some("not json")).is_err());
        assert_eq!(load_auth(Some(r#"{"ga4": {}}"#)).unwrap(), json!({"ga4": {}}));
    }

    #[test]
    fn test_set_path_creates_missing_sections() {
        let mut auth = json!({"ga4": "garbage", "other": 1});
        set_path(&mut auth, &["ga4", "error"], json!("x"));
        assert_eq!(auth, json!({"ga4": {"error": "x"}, "other": 1}));

        let mut empty = Value::Null;
        set_path(&mut empty, &["ga4", "tokens", "access_token"], json!("t"));
        assert_eq!(empty, json!({"ga4": {"tokens": {"access_token": "t"}}}));
    }

    #[test]
    fn test_metrics_serialize_camel_case() {
        let value = serde_json::to_value(DailyMetrics::default()).unwrap();
        assert!(value.get("screenPageViews").is_some());
        assert!(value.get("totalUsers").is_some());
    }
}
