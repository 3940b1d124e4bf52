use std::future::Future;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde_json::Value;

use crate::errors::{DashboardError, DashboardResult, FetchError};
use crate::metrics::MetricsResponse;
use crate::types::{DateRange, MetricCategory, DATE_FORMAT};

const POOL_IDLE_TIMEOUT_SECS: u64 = 60;
const POOL_MAX_IDLE_PER_HOST: usize = 16;

/// Anything that can answer "give me the fields for this category and range".
pub trait AnalyticsSource: Send + Sync {
    fn fetch_analytics(
        &self,
        category: MetricCategory,
        range: DateRange,
    ) -> impl Future<Output = MetricsResponse> + Send;
}

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub base_url: String,
    pub secret_header: String,
    pub secret: Option<String>,
    pub request_timeout: Option<Duration>,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            secret_header: "secret".to_string(),
            secret: None,
            request_timeout: None,
        }
    }
}

/// HTTP client for the analytics backend. Clones share one connection pool.
#[derive(Debug, Clone)]
pub struct AnalyticsClient {
    http: reqwest::Client,
    base_url: String,
}

impl AnalyticsClient {
    pub fn new(settings: &ClientSettings) -> DashboardResult<Self> {
        let mut builder = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
            .tcp_nodelay(true)
            .default_headers(static_headers(settings)?);
        if let Some(timeout) = settings.request_timeout {
            builder = builder.timeout(timeout);
        }
        let http = builder.build()?;

        Ok(Self {
            http,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn build_url(&self, category: MetricCategory, range: &DateRange) -> String {
        format!(
            "{}/analytics/{}/?start={}&end={}",
            self.base_url,
            category.path_segment(),
            range.start.format(DATE_FORMAT),
            range.end.format(DATE_FORMAT)
        )
    }

    async fn try_fetch(
        &self,
        category: MetricCategory,
        range: &DateRange,
    ) -> Result<MetricsResponse, FetchError> {
        let url = self.build_url(category, range);
        log::info!("[AnalyticsClient] GET {}", url);

        let resp = self.http.get(&url).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }

        let body = resp.bytes().await?;
        log::debug!(
            "[AnalyticsClient] {} response: {}",
            category.path_segment(),
            String::from_utf8_lossy(&body)
        );

        match serde_json::from_slice::<Value>(&body)? {
            Value::Object(fields) => Ok(MetricsResponse::new(fields)),
            other => Err(FetchError::Body(format!(
                "expected a JSON object, got {}",
                json_kind(&other)
            ))),
        }
    }
}

impl AnalyticsSource for AnalyticsClient {
    /// Never fails: any error is logged and turned into an empty response.
    async fn fetch_analytics(&self, category: MetricCategory, range: DateRange) -> MetricsResponse {
        match self.try_fetch(category, &range).await {
            Ok(response) => response,
            Err(e) => {
                log::warn!(
                    "[AnalyticsClient] {} metrics unavailable for {}..{}: {}",
                    category.path_segment(),
                    range.start,
                    range.end,
                    e
                );
                MetricsResponse::failed(format!(
                    "Could not load {} metrics: {}",
                    category.path_segment(),
                    e
                ))
            }
        }
    }
}

fn static_headers(settings: &ClientSettings) -> DashboardResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    if let Some(secret) = settings.secret.as_deref() {
        let name = HeaderName::from_bytes(settings.secret_header.as_bytes()).map_err(|e| {
            DashboardError::Client(format!(
                "Invalid secret header name {:?}: {}",
                settings.secret_header, e
            ))
        })?;
        let mut value = HeaderValue::from_str(secret)
            .map_err(|e| DashboardError::Client(format!("Invalid secret header value: {}", e)))?;
        value.set_sensitive(true);
        headers.insert(name, value);
    }
    Ok(headers)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
