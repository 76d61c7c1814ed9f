//! Google Analytics 4 daily aggregates.
//!
//! Auth layout under `auth_json.ga4`:
//!
//! ```json
//! {
//!   "selectedPropertyId": "123456",
//!   "tokens": { "access_token": "...", "refresh_token": "...", "expires_at": "..." },
//!   "error": "...", "errorAt": "..."
//! }
//! ```
//!
//! `expires_at` may be RFC 3339, a naive ISO timestamp (taken as UTC), or
//! unix seconds (number or numeric string). An unparsable or missing expiry
//! counts as expired.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, NaiveDate, NaiveDateTime, Utc};
use serde_json::{json, Value};
use std::time::Duration;

use super::{set_path, DailyMetrics, DayReport, MetricsProvider, GOOGLE_ANALYTICS};
use crate::config::{ProvidersConfig, Secrets};

/// Tokens expiring within this window are refreshed first.
const REFRESH_BUFFER_MINUTES: i64 = 5;

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Requested metrics, in the order GA4 returns their values.
const REPORT_METRICS: [&str; 5] = [
    "sessions",
    "totalUsers",
    "screenPageViews",
    "conversions",
    "totalRevenue",
];

pub struct Ga4Provider {
    http: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl Ga4Provider {
    pub fn new(config: &ProvidersConfig, secrets: &Secrets) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            http,
            api_base: config.ga4_api_base.trim_end_matches('/').to_string(),
            token_url: config.google_token_url.clone(),
            client_id: secrets.google_client_id.clone(),
            client_secret: secrets.google_client_secret.clone(),
        })
    }

    async fn request_token(&self, refresh_token: &str) -> Result<(String, i64)> {
        let (Some(client_id), Some(client_secret)) = (&self.client_id, &self.client_secret) else {
            bail!("Google OAuth credentials not configured");
        };

        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.as_str()),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Google token endpoint returned {} - {}", status, body);
        }

        let body: Value = response.json().await?;
        let access_token = body
            .get("access_token")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Token refresh response missing access_token"))?
            .to_string();
        let expires_in = body
            .get("expires_in")
            .and_then(|v| v.as_i64())
            .unwrap_or(DEFAULT_EXPIRES_IN_SECS);

        Ok((access_token, expires_in))
    }
}

#[async_trait]
impl MetricsProvider for Ga4Provider {
    fn provider(&self) -> &'static str {
        GOOGLE_ANALYTICS
    }

    fn signal_source(&self) -> &'static str {
        "GA4"
    }

    fn is_eligible(&self, auth: &Value) -> bool {
        selected_property_id(auth).is_some()
    }

    async fn refresh_auth(&self, mut auth: Value) -> Result<Value> {
        let tokens = &auth["ga4"]["tokens"];
        if non_empty_str(&tokens["access_token"]).is_none() {
            bail!("access_token missing in auth data");
        }

        let expires_at = parse_expires_at(&tokens["expires_at"]);
        if !expires_soon(expires_at, Utc::now()) {
            return Ok(auth);
        }

        let refresh_token = non_empty_str(&tokens["refresh_token"])
            .ok_or_else(|| {
                anyhow!("refresh_token missing - cannot refresh. User may need to re-authorize with offline access.")
            })?
            .to_string();

        let (access_token, expires_in) = self.request_token(&refresh_token).await?;
        let new_expiry = Utc::now() + ChronoDuration::seconds(expires_in);

        set_path(&mut auth, &["ga4", "tokens", "access_token"], json!(access_token));
        set_path(
            &mut auth,
            &["ga4", "tokens", "expires_at"],
            json!(new_expiry.to_rfc3339()),
        );
        tracing::debug!(expires_at = %new_expiry, "refreshed google access token");
        Ok(auth)
    }

    async fn fetch_day(&self, auth: &Value, day: NaiveDate) -> Result<DayReport> {
        let property_id = selected_property_id(auth)
            .ok_or_else(|| anyhow!("No GA4 property selected for this connection"))?;
        let access_token = non_empty_str(&auth["ga4"]["tokens"]["access_token"])
            .ok_or_else(|| anyhow!("access_token missing in auth data"))?;

        let date = day.format("%Y-%m-%d").to_string();
        let body = json!({
            "dateRanges": [{"startDate": date, "endDate": date}],
            "metrics": REPORT_METRICS.iter().map(|m| json!({"name": m})).collect::<Vec<_>>(),
            "dimensions": [],
        });

        let response = self
            .http
            .post(format!(
                "{}/properties/{}:runReport",
                self.api_base, property_id
            ))
            .bearer_auth(access_token)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("GA4 API call failed: {} - {}", status, body);
        }

        let report: Value = response
            .json()
            .await
            .context("GA4 API returned invalid JSON")?;

        Ok(DayReport {
            metrics: parse_report(&report),
            dimensions: json!({"propertyId": property_id, "source": "GA4"}),
        })
    }

    fn record_auth_error(&self, auth: &mut Value, error: &str) {
        set_path(auth, &["ga4", "error"], json!(error));
        set_path(auth, &["ga4", "errorAt"], json!(Utc::now().to_rfc3339()));
    }
}

fn non_empty_str(value: &Value) -> Option<&str> {
    value.as_str().map(str::trim).filter(|s| !s.is_empty())
}

fn selected_property_id(auth: &Value) -> Option<String> {
    match &auth["ga4"]["selectedPropertyId"] {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Reads the aggregate row; missing rows or values count as zero.
fn parse_report(report: &Value) -> DailyMetrics {
    let values = report["rows"][0]["metricValues"]
        .as_array()
        .cloned()
        .unwrap_or_default();
    let metric = |i: usize| -> f64 {
        match values.get(i).map(|v| &v["value"]) {
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
            Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
            _ => 0.0,
        }
    };

    DailyMetrics {
        sessions: metric(0),
        total_users: metric(1),
        screen_page_views: metric(2),
        conversions: metric(3),
        total_revenue: metric(4),
    }
}

pub(crate) fn parse_expires_at(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
                return Some(naive.and_utc());
            }
            s.parse::<f64>().ok().and_then(from_unix)
        }
        Value::Number(n) => n.as_f64().and_then(from_unix),
        _ => None,
    }
}

fn from_unix(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    DateTime::from_timestamp(secs as i64, 0)
}

pub(crate) fn expires_soon(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match expires_at {
        Some(at) => at <= now + ChronoDuration::minutes(REFRESH_BUFFER_MINUTES),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> Ga4Provider {
        Ga4Provider::new(&ProvidersConfig::default(), &Secrets::default()).unwrap()
    }

    #[test]
    fn test_eligibility_requires_selected_property() {
        let p = provider();
        assert!(p.is_eligible(&json!({"ga4": {"selectedPropertyId": "123"}})));
        assert!(p.is_eligible(&json!({"ga4": {"selectedPropertyId": 123}})));
        assert!(!p.is_eligible(&json!({"ga4": {"selectedPropertyId": ""}})));
        assert!(!p.is_eligible(&json!({"ga4": {}})));
        assert!(!p.is_eligible(&json!({})));
    }

    #[test]
    fn test_parse_expires_at_formats() {
        let rfc = parse_expires_at(&json!("2026-01-02T03:04:05Z")).unwrap();
        assert_eq!(rfc.timestamp(), 1767323045);

        let naive = parse_expires_at(&json!("2026-01-02T03:04:05.123456")).unwrap();
        assert_eq!(naive.timestamp(), 1767323045);

        assert_eq!(parse_expires_at(&json!(1767323045)).unwrap(), rfc);
        assert_eq!(parse_expires_at(&json!("1767323045")).unwrap(), rfc);

        assert!(parse_expires_at(&json!("tomorrow")).is_none());
        assert!(parse_expires_at(&Value::Null).is_none());
    }

    #[test]
    fn test_expires_soon_buffer() {
        let now = Utc::now();
        assert!(expires_soon(None, now));
        assert!(expires_soon(Some(now + ChronoDuration::minutes(4)), now));
        assert!(!expires_soon(Some(now + ChronoDuration::minutes(10)), now));
        assert!(expires_soon(Some(now - ChronoDuration::hours(1)), now));
    }

    #[test]
    fn test_parse_report_rows() {
        let report = json!({"rows": [{"metricValues": [
            {"value": "120"}, {"value": "80"}, {"value": "300"}, {"value": "4"}, {"value": "99.5"}
        ]}]});
        let m = parse_report(&report);
        assert_eq!(m.sessions, 120.0);
        assert_eq!(m.total_users, 80.0);
        assert_eq!(m.screen_page_views, 300.0);
        assert_eq!(m.conversions, 4.0);
        assert_eq!(m.total_revenue, 99.5);

        assert_eq!(parse_report(&json!({})), DailyMetrics::default());
        assert_eq!(parse_report(&json!({"rows": []})), DailyMetrics::default());
    }

    #[tokio::test]
    async fn test_refresh_skipped_for_fresh_token() {
        let expires = (Utc::now() + ChronoDuration::hours(1)).to_rfc3339();
        let auth = json!({"ga4": {"tokens": {"access_token": "tok", "expires_at": expires}}});
        let refreshed = provider().refresh_auth(auth.clone()).await.unwrap();
        assert_eq!(refreshed, auth);
    }

    #[tokio::test]
    async fn test_refresh_requires_refresh_token() {
        let auth = json!({"ga4": {"tokens": {"access_token": "tok"}}});
        let err = provider().refresh_auth(auth).await.unwrap_err();
        assert!(err.to_string().contains("refresh_token missing"));
    }

    #[test]
    fn test_record_auth_error() {
        let mut auth = json!({"ga4": {"selectedPropertyId": "1"}});
        provider().record_auth_error(&mut auth, "revoked");
        assert_eq!(auth["ga4"]["error"], "revoked");
        assert!(auth["ga4"]["errorAt"].is_string());
        assert_eq!(auth["ga4"]["selectedPropertyId"], "1");
    }
}
