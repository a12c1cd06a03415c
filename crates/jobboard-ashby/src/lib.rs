//! Ashby posting API client + payload normalization.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobboard_core::{NormalizedJob, OrganizationId};
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{info_span, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobboard-ashby";

pub const DEFAULT_API_BASE: &str = "https://api.ashbyhq.com/posting-api/job-board";
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Raw bytes of one listing fetch plus their content fingerprint.
#[derive(Debug, Clone)]
pub struct RawPayload {
    pub body: Vec<u8>,
    pub content_hash: String,
    pub final_url: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request timed out for {url}")]
    Timeout { url: String },
    #[error("request failed: {0}")]
    Network(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("payload is not valid JSON: {0}")]
    InvalidEncoding(#[from] serde_json::Error),
    #[error("payload is missing the {0:?} field")]
    MissingField(&'static str),
}

/// Seam between the pipeline and the listing source; stubbed in tests.
#[async_trait]
pub trait JobSource: Send + Sync {
    async fn fetch_listing(
        &self,
        run_id: Uuid,
        organization_id: &OrganizationId,
    ) -> Result<RawPayload, FetchError>;

    fn parse_listing(&self, payload: &RawPayload) -> Result<Vec<NormalizedJob>, ParseError>;
}

#[derive(Debug, Clone)]
pub struct AshbyClientConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for AshbyClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE.to_string(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AshbyClient {
    client: reqwest::Client,
    base_url: String,
}

impl AshbyClient {
    pub fn new(config: AshbyClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn listing_url(&self, organization_id: &OrganizationId) -> String {
        format!("{}/{}", self.base_url, organization_id)
    }

    /// One GET against the posting API. No retries here: the next scheduled
    /// slot is the retry mechanism.
    pub async fn fetch(
        &self,
        run_id: Uuid,
        organization_id: &OrganizationId,
    ) -> Result<RawPayload, FetchError> {
        let url = self.listing_url(organization_id);
        let span = info_span!("ashby_fetch", %run_id, organization_id = %organization_id, url = %url);
        let _guard = span.enter();

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|err| classify_error(err, &url))?;

        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }

        let body = resp
            .bytes()
            .await
            .map_err(|err| classify_error(err, &final_url))?
            .to_vec();

        Ok(RawPayload {
            content_hash: sha256_hex(&body),
            body,
            final_url,
            fetched_at: Utc::now(),
        })
    }
}

fn classify_error(err: reqwest::Error, url: &str) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout {
            url: url.to_string(),
        }
    } else {
        FetchError::Network(err)
    }
}

#[async_trait]
impl JobSource for AshbyClient {
    async fn fetch_listing(
        &self,
        run_id: Uuid,
        organization_id: &OrganizationId,
    ) -> Result<RawPayload, FetchError> {
        self.fetch(run_id, organization_id).await
    }

    fn parse_listing(&self, payload: &RawPayload) -> Result<Vec<NormalizedJob>, ParseError> {
        normalize(payload)
    }
}

/// Map one payload into normalized postings. A record without an id is
/// logged and skipped; every other missing field falls back to a default.
pub fn normalize(payload: &RawPayload) -> Result<Vec<NormalizedJob>, ParseError> {
    let value: JsonValue = serde_json::from_slice(&payload.body)?;
    let jobs = value
        .get("jobs")
        .and_then(|v| v.as_array())
        .ok_or(ParseError::MissingField("jobs"))?;

    let mut out = Vec::with_capacity(jobs.len());
    for record in jobs {
        let external_id = match json_str(record, "id") {
            Some(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                warn!(
                    title = json_str(record, "title").unwrap_or(""),
                    "skipping posting without an id"
                );
                continue;
            }
        };
        out.push(NormalizedJob {
            external_id,
            title: json_string(record, "title"),
            department: json_string(record, "department"),
            team: json_string(record, "team"),
            location: json_string(record, "location"),
            employment_type: json_string(record, "employmentType"),
            compensation: json_string(record, "compensationTierSummary"),
            published_at: json_string(record, "publishedDate"),
            is_remote: record
                .get("isRemote")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            application_url: json_string(record, "jobUrl"),
        });
    }
    Ok(out)
}

fn json_str<'a>(value: &'a JsonValue, key: &str) -> Option<&'a str> {
    value.get(key).and_then(|v| v.as_str())
}

fn json_string(value: &JsonValue, key: &str) -> String {
    json_str(value, key).unwrap_or_default().to_string()
}
