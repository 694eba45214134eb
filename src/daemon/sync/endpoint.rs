//! Contract with the ingestion endpoint and its HTTP realization.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::daemon::{gate::ShiftWindow, storage::entities::UsageRecord};

#[derive(Debug, Error)]
pub enum EndpointError {
    /// The endpoint couldn't be reached at all, or didn't answer in time.
    #[error("endpoint unreachable: {0}")]
    Connectivity(String),
    #[error("endpoint rejected the request with status {status}")]
    Rejected { status: u16 },
    #[error("malformed endpoint response: {0}")]
    Malformed(String),
    #[error("request failed: {0}")]
    Transport(String),
}

impl EndpointError {
    pub fn is_connectivity(&self) -> bool {
        matches!(self, EndpointError::Connectivity(_))
    }
}

impl From<reqwest::Error> for EndpointError {
    /// Anything that went wrong on the way to or from the server without an HTTP status is a
    /// connectivity failure: refused, reset, timed out or cut off mid-body.
    fn from(value: reqwest::Error) -> Self {
        if value.is_decode() {
            EndpointError::Malformed(value.to_string())
        } else if value.is_connect()
            || value.is_timeout()
            || (value.status().is_none() && (value.is_request() || value.is_body()))
        {
            EndpointError::Connectivity(value.to_string())
        } else {
            EndpointError::Transport(value.to_string())
        }
    }
}

/// Remote side of the agent. Accepts usage records and serves per-identity shift configuration.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IngestionEndpoint: Send + Sync {
    async fn fetch_shift_window(&self, identity: &str) -> Result<ShiftWindow, EndpointError>;

    /// Succeeds only when the endpoint acknowledged the record.
    async fn upload(&self, record: &UsageRecord) -> Result<(), EndpointError>;
}

#[derive(Deserialize, Debug)]
struct ShiftSettingsBody {
    start: i64,
    end: i64,
}

#[derive(Serialize, Debug)]
struct UploadBody<'a> {
    system_id: &'a str,
    app: &'a str,
    time: f64,
    loc: &'a str,
    timestamp: &'a str,
}

impl<'a> From<&'a UsageRecord> for UploadBody<'a> {
    fn from(record: &'a UsageRecord) -> Self {
        Self {
            system_id: &record.identity,
            app: &record.application,
            time: record.duration_seconds,
            loc: &record.location,
            timestamp: &record.end_timestamp,
        }
    }
}

pub struct HttpEndpoint {
    base: Url,
    client: Client,
}

impl HttpEndpoint {
    /// Every request made through this endpoint is bounded by `timeout`.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, EndpointError> {
        if base.cannot_be_a_base() {
            return Err(EndpointError::Transport(format!(
                "{base} can't be used as a base url"
            )));
        }
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    fn url_for(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[async_trait]
impl IngestionEndpoint for HttpEndpoint {
    #[instrument(skip(self))]
    async fn fetch_shift_window(&self, identity: &str) -> Result<ShiftWindow, EndpointError> {
        let response = self
            .client
            .get(self.url_for(&["get_settings", identity]))
            .send()
            .await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(EndpointError::Rejected {
                status: status.as_u16(),
            });
        }
        let body: ShiftSettingsBody = response.json().await?;
        debug!("Received shift settings {body:?}");
        ShiftWindow::from_hours(body.start, body.end).ok_or_else(|| {
            EndpointError::Malformed(format!(
                "shift hours {}..{} are out of range",
                body.start, body.end
            ))
        })
    }

    #[instrument(skip_all, fields(application = %record.application))]
    async fn upload(&self, record: &UsageRecord) -> Result<(), EndpointError> {
        let response = self
            .client
            .post(self.url_for(&["upload"]))
            .json(&UploadBody::from(record))
            .send()
            .await?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(EndpointError::Rejected {
                status: status.as_u16(),
            })
        }
    }
}
