use std::{fmt::Display, path::Path, sync::Arc};

use anyhow::{Context, Result};
use tracing::debug;

use crate::daemon::{
    config::AgentConfig,
    gate::ShiftWindow,
    storage::queue_store::{QueueStore, SqliteQueueStore},
    sync::endpoint::{HttpEndpoint, IngestionEndpoint},
    QUEUE_FILE,
};

#[derive(Debug, PartialEq)]
pub enum EndpointStatus {
    Reachable(ShiftWindow),
    Unreachable(String),
}

/// Snapshot of the local queue and of the endpoint as seen from this machine.
#[derive(Debug, PartialEq)]
pub struct StatusReport {
    pub identity: Arc<str>,
    pub pending: u64,
    pub oldest_pending: Option<String>,
    pub endpoint: EndpointStatus,
}

impl Display for StatusReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "identity\t{}", self.identity)?;
        writeln!(f, "pending\t{}", self.pending)?;
        if let Some(oldest) = &self.oldest_pending {
            writeln!(f, "oldest\t{oldest}")?;
        }
        match &self.endpoint {
            EndpointStatus::Reachable(window) => write!(
                f,
                "endpoint\treachable, shift {}:00 to {}:00",
                window.start_hour, window.end_hour
            ),
            EndpointStatus::Unreachable(reason) => write!(f, "endpoint\tunreachable, {reason}"),
        }
    }
}

/// Never uploads anything: the endpoint is probed through the shift configuration fetch.
pub async fn collect_status(dir: &Path, config: &AgentConfig) -> Result<StatusReport> {
    let store = SqliteQueueStore::open(&dir.join(QUEUE_FILE))
        .with_context(|| format!("Failed to open the queue in {dir:?}"))?;
    let pending = store.pending_count()?;
    let oldest_pending = store.oldest_pending()?.map(|v| v.record.end_timestamp);

    let identity = config.identity();
    let endpoint = HttpEndpoint::new(config.endpoint_url()?, config.request_timeout())?;
    let endpoint = match endpoint.fetch_shift_window(&identity).await {
        Ok(window) => EndpointStatus::Reachable(window),
        Err(e) => {
            debug!("Endpoint probe failed {e:?}");
            EndpointStatus::Unreachable(e.to_string())
        }
    };

    Ok(StatusReport {
        identity,
        pending,
        oldest_pending,
        endpoint,
    })
}
