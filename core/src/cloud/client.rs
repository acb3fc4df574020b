//! HTTP client for the community price aggregation remote.
//!
//! The remote is a row-oriented REST service keyed by an anonymous API key.
//! Every list endpoint caps responses at a default row limit, so all
//! fetches paginate explicitly and stop on a short page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::CloudConfig;
use crate::error::CloudError;

/// Rows per page; matches the remote's observed response cap.
pub const PAGE_SIZE: usize = 1000;

const REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Serialize)]
pub struct PriceSubmission<'a> {
    pub device_id: &'a str,
    pub type_id: i64,
    pub value_fe: f64,
    pub captured_ts: DateTime<Utc>,
    pub season_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct AggregatedPriceRow {
    pub type_id: i64,
    pub median_fe: f64,
    #[serde(default)]
    pub p10_fe: f64,
    #[serde(default)]
    pub p90_fe: f64,
    #[serde(default)]
    pub contributor_count: i64,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryRowDto {
    pub type_id: i64,
    pub hour_bucket: DateTime<Utc>,
    pub median_fe: f64,
    #[serde(default)]
    pub p10_fe: f64,
    #[serde(default)]
    pub p90_fe: f64,
    #[serde(default)]
    pub submission_count: i64,
    #[serde(default)]
    pub device_count: i64,
}

pub struct CloudClient {
    http: reqwest::Client,
    base_url: String,
    anon_key: String,
}

impl CloudClient {
    pub fn new(config: &CloudConfig) -> Result<Self, CloudError> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .user_agent(concat!("embertrack/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| CloudError::Retryable(e.to_string()))?;
        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            anon_key: config.anon_key.clone(),
        })
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base_url))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
    }

    /// Submit one learned price. Only the anonymous device UUID travels
    /// with it.
    pub async fn submit_price(&self, submission: &PriceSubmission<'_>) -> Result<(), CloudError> {
        let response = self
            .request(reqwest::Method::POST, "/rest/v1/price_submissions")
            .json(submission)
            .send()
            .await
            .map_err(|e| CloudError::Retryable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(CloudError::from_status(status, body))
    }

    /// Fetch the aggregated price set for a season, fully paginated.
    pub async fn fetch_season_prices(
        &self,
        season_id: i64,
    ) -> Result<Vec<AggregatedPriceRow>, CloudError> {
        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: Vec<AggregatedPriceRow> = self
                .get_json(&format!(
                    "/rest/v1/aggregated_prices?season_id=eq.{season_id}&order=type_id&limit={PAGE_SIZE}&offset={offset}"
                ))
                .await?;
            let short = page.len() < PAGE_SIZE;
            offset += page.len();
            all.extend(page);
            // A full page means the remote may have truncated; keep going.
            if short {
                break;
            }
        }
        Ok(all)
    }

    /// Fetch hourly price history for a bounded set of items, paginated.
    /// Callers restrict `type_ids` to the current inventory to bound
    /// bandwidth.
    pub async fn fetch_price_history(
        &self,
        type_ids: &[i64],
        since: DateTime<Utc>,
    ) -> Result<Vec<HistoryRowDto>, CloudError> {
        if type_ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = type_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");
        let since = since.to_rfc3339();

        let mut all = Vec::new();
        let mut offset = 0usize;
        loop {
            let page: Vec<HistoryRowDto> = self
                .get_json(&format!(
                    "/rest/v1/price_history?type_id=in.({ids})&hour_bucket=gte.{since}&order=hour_bucket&limit={PAGE_SIZE}&offset={offset}"
                ))
                .await?;
            let short = page.len() < PAGE_SIZE;
            offset += page.len();
            all.extend(page);
            if short {
                break;
            }
        }
        Ok(all)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<T, CloudError> {
        let response = self
            .request(reqwest::Method::GET, path)
            .send()
            .await
            .map_err(|e| CloudError::Retryable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CloudError::from_status(status, body));
        }
        response
            .json()
            .await
            .map_err(|e| CloudError::Rejected(format!("malformed response: {e}")))
    }
}
