//! Delivery of queued records to the ingestion endpoint.
//!
//! A drain pass reads everything pending and sends it one record at a time. A record is removed
//! from the queue only after the endpoint acknowledges it. When the endpoint can't be reached the
//! pass stops right away and the remaining records wait for the next pass; a rejected record is
//! skipped and retried on every following pass. A shutdown request ends the pass before the next
//! send, or abandons the one in flight, which leaves that record queued.

pub mod endpoint;

use std::{collections::HashMap, sync::Arc, time::Duration};

use endpoint::IngestionEndpoint;
use tokio::{select, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use super::storage::queue_store::{QueueStore, StorageError};

/// Outcome of a single drain pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    pub attempted: usize,
    pub delivered: usize,
    pub rejected: usize,
    /// The pass stopped early because the endpoint was unreachable.
    pub halted: bool,
    /// The pass stopped early because of a shutdown request.
    pub cancelled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Rejection {
    count: u32,
    first_at: Instant,
}

/// Snapshot of records the endpoint keeps refusing.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RejectionStats {
    /// Pending records rejected more than once.
    pub repeatedly_rejected: usize,
    pub highest_count: u32,
    /// Time since the first rejection of the longest rejected record.
    pub oldest_age: Option<Duration>,
}

pub struct SyncDrainer<S> {
    store: S,
    endpoint: Arc<dyn IngestionEndpoint>,
    rejections: HashMap<i64, Rejection>,
    shutdown: CancellationToken,
}

impl<S: QueueStore> SyncDrainer<S> {
    pub fn new(
        store: S,
        endpoint: Arc<dyn IngestionEndpoint>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            store,
            endpoint,
            rejections: HashMap::new(),
            shutdown,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Runs one delivery pass over the current queue contents. Only local storage failures are
    /// returned as errors. `now` stamps first rejections in the ledger.
    pub async fn drain(&mut self, now: Instant) -> Result<DrainReport, StorageError> {
        let pending = self.store.list_pending()?;
        let mut report = DrainReport::default();
        if pending.is_empty() {
            self.rejections.clear();
            return Ok(report);
        }

        self.rejections
            .retain(|id, _| pending.iter().any(|entry| entry.id == *id));

        let span = info_span!("Drain", pending = pending.len());
        async {
            for entry in pending {
                if self.shutdown.is_cancelled() {
                    report.cancelled = true;
                    break;
                }
                report.attempted += 1;
                // A finished upload wins over a shutdown request arriving at the same time.
                let result = select! {
                    biased;
                    result = self.endpoint.upload(&entry.record) => result,
                    _ = self.shutdown.cancelled() => {
                        debug!("Shutdown requested, record {} stays queued", entry.id);
                        report.cancelled = true;
                        break;
                    }
                };
                match result {
                    Ok(()) => {
                        self.store.remove(entry.id)?;
                        self.rejections.remove(&entry.id);
                        report.delivered += 1;
                        debug!("Delivered record {}", entry.id);
                    }
                    Err(e) if e.is_connectivity() => {
                        info!("Endpoint unreachable, stopping drain: {e}");
                        report.halted = true;
                        break;
                    }
                    Err(e) => {
                        let rejection = self.rejections.entry(entry.id).or_insert(Rejection {
                            count: 0,
                            first_at: now,
                        });
                        rejection.count += 1;
                        report.rejected += 1;
                        warn!(
                            "Record {} for {} was not accepted ({} times so far): {e}",
                            entry.id, entry.record.application, rejection.count
                        );
                    }
                }
            }
            Ok::<_, StorageError>(())
        }
        .instrument(span)
        .await?;

        debug!("Drain finished {report:?}");
        Ok(report)
    }

    pub fn rejection_stats(&self, now: Instant) -> RejectionStats {
        RejectionStats {
            repeatedly_rejected: self.rejections.values().filter(|r| r.count > 1).count(),
            highest_count: self.rejections.values().map(|r| r.count).max().unwrap_or(0),
            oldest_age: self
                .rejections
                .values()
                .map(|r| now.saturating_duration_since(r.first_at))
                .max(),
        }
    }
}
