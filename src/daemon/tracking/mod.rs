pub mod location;
pub mod sampler;

use std::{sync::Arc, time::Duration};

use anyhow::Result;
use chrono::FixedOffset;
use location::LocationProvider;
use sampler::{ActivitySampler, SwitchDetector};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{utils::clock::Clock, utils::time::to_local};

use super::{
    gate::ShiftWindowGate,
    storage::{entities::UsageRecord, queue_store::QueueStore},
    sync::SyncDrainer,
};

#[derive(Debug, Clone)]
pub struct TrackingSettings {
    pub identity: Arc<str>,
    pub utc_offset: FixedOffset,
    pub active_interval: Duration,
    pub off_hours_interval: Duration,
    pub catch_up_interval: Duration,
    pub min_report: chrono::Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingState {
    Starting,
    OffHours,
    Sampling,
}

/// Control loop tying the gate, the sampler and the drainer together. Everything runs on one
/// timeline: a slow network call simply delays the next tick.
pub struct TrackingLoop<S> {
    settings: TrackingSettings,
    gate: ShiftWindowGate,
    sampler: ActivitySampler,
    drainer: SyncDrainer<S>,
    location: Box<dyn LocationProvider>,
    clock: Box<dyn Clock>,
    shutdown: CancellationToken,
}

impl<S: QueueStore> TrackingLoop<S> {
    pub fn new(
        settings: TrackingSettings,
        gate: ShiftWindowGate,
        sampler: ActivitySampler,
        drainer: SyncDrainer<S>,
        location: Box<dyn LocationProvider>,
        clock: Box<dyn Clock>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            settings,
            gate,
            sampler,
            drainer,
            location,
            clock,
            shutdown,
        }
    }

    /// Executes the tracking loop until the shutdown token is cancelled. The interval that is
    /// open at that moment is abandoned, and so is a drain in progress. Only local storage
    /// failures end the loop early.
    pub async fn run(mut self) -> Result<()> {
        let identity = self.settings.identity.clone();
        let mut state = TrackingState::Starting;

        self.gate.refresh(&identity, self.clock.instant()).await;
        let location: Arc<str> = self.location.resolve().await.into();
        let mut detector = SwitchDetector::new(self.settings.min_report, self.clock.time());
        let window = self.gate.window();
        info!(
            "Tracking {identity} from {location}, shift {}:00 to {}:00",
            window.start_hour, window.end_hour
        );

        // Leftovers from a previous run.
        self.drain().await?;
        let mut last_drain = self.clock.instant();

        loop {
            self.gate.refresh(&identity, self.clock.instant()).await;

            let now = self.clock.time();
            let next_state = if self.gate.is_active(to_local(now, self.settings.utc_offset)) {
                TrackingState::Sampling
            } else {
                TrackingState::OffHours
            };
            if next_state != state {
                info!("Switching from {state:?} to {next_state:?}");
                state = next_state;
            }

            let finished = match state {
                TrackingState::Sampling => detector.observe(self.sampler.sample(), now),
                // Off-hours time is never billed to the application that was focused last.
                _ => detector.close(now),
            };

            if let Some(interval) = finished {
                let record = UsageRecord::new(
                    identity.clone(),
                    interval.application,
                    interval.duration,
                    location.clone(),
                    to_local(interval.end, self.settings.utc_offset),
                );
                info!(
                    "{} used for {}s",
                    record.application,
                    record.duration_seconds.round()
                );
                self.drainer
                    .store()
                    .enqueue(&record)
                    .inspect_err(|e| error!("Failed to persist record {e:?}"))?;
                self.drain().await?;
                last_drain = self.clock.instant();
            } else if self.clock.instant().saturating_duration_since(last_drain)
                >= self.settings.catch_up_interval
            {
                debug!("Running catch-up drain");
                self.drain().await?;
                last_drain = self.clock.instant();
            }

            let pause = match state {
                TrackingState::Sampling => self.settings.active_interval,
                _ => self.settings.off_hours_interval,
            };

            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    info!("Tracking stopped");
                    return Ok(())
                }
                _ = self.clock.sleep(pause) => ()
            }
        }
    }

    async fn drain(&mut self) -> Result<()> {
        let report = self
            .drainer
            .drain(self.clock.instant())
            .await
            .inspect_err(|e| error!("Failed to read the local queue {e:?}"))?;
        if report.attempted > 0 {
            debug!("Drain report {report:?}");
        }
        let stats = self.drainer.rejection_stats(self.clock.instant());
        if stats.repeatedly_rejected > 0 {
            info!(
                "{} queued records keep being rejected, oldest for {:?}",
                stats.repeatedly_rejected, stats.oldest_age
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::{
        path::Path,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
        time::Duration,
    };

    use anyhow::{anyhow, Result};
    use async_trait::async_trait;
    use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
    use tempfile::tempdir;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            gate::{ShiftWindow, ShiftWindowGate},
            storage::{
                entities::{QueueEntry, UsageRecord},
                queue_store::{QueueStore, SqliteQueueStore, StorageError},
            },
            sync::{
                endpoint::{EndpointError, IngestionEndpoint, MockIngestionEndpoint},
                SyncDrainer,
            },
        },
        utils::{clock::Clock, logging::TEST_LOGGING},
        window_api::{ActiveWindowData, MockWindowManager},
    };

    use super::{
        location::StaticLocation, sampler::ActivitySampler, TrackingLoop, TrackingSettings,
    };

    #[derive(Clone)]
    struct TestClock {
        start_time: DateTime<Utc>,
        reference: Instant,
    }

    #[async_trait]
    impl Clock for TestClock {
        fn time(&self) -> DateTime<Utc> {
            self.start_time + self.reference.elapsed()
        }

        fn instant(&self) -> Instant {
            Instant::now()
        }

        async fn sleep(&self, duration: Duration) {
            tokio::time::sleep(duration).await;
        }
    }

    fn utc(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Utc.from_utc_datetime(
            &NaiveDate::from_ymd_opt(2018, 7, 4)
                .unwrap()
                .and_hms_opt(h, m, s)
                .unwrap(),
        )
    }

    fn settings() -> TrackingSettings {
        TrackingSettings {
            identity: "desk-01".into(),
            utc_offset: FixedOffset::east_opt(0).unwrap(),
            active_interval: Duration::from_secs(5),
            off_hours_interval: Duration::from_secs(60),
            catch_up_interval: Duration::from_secs(300),
            min_report: chrono::Duration::seconds(5),
        }
    }

    fn focus_sequence(names: &[&str]) -> MockWindowManager {
        let mut items = names
            .iter()
            .map(|name| ActiveWindowData {
                window_title: "window".into(),
                process_name: format!(r"C:\Apps\{name}").into(),
            })
            .collect::<Vec<_>>()
            .into_iter();
        let mut manager = MockWindowManager::new();
        let len = names.len();
        manager
            .expect_get_active_window_data()
            .times(..=len)
            .returning(move || items.next().ok_or_else(|| anyhow!("sequence exhausted")));
        manager
    }

    fn tracker<S: QueueStore>(
        store: S,
        endpoint: MockIngestionEndpoint,
        manager: MockWindowManager,
        start: DateTime<Utc>,
        shutdown: &CancellationToken,
    ) -> TrackingLoop<S> {
        let endpoint = Arc::new(endpoint);
        TrackingLoop::new(
            settings(),
            ShiftWindowGate::new(
                ShiftWindow::default(),
                endpoint.clone(),
                Duration::from_secs(600),
            ),
            ActivitySampler::new(Box::new(manager), vec!["shell.exe".to_string()]),
            SyncDrainer::new(store, endpoint, shutdown.clone()),
            Box::new(StaticLocation("Office".into())),
            Box::new(TestClock {
                start_time: start,
                reference: Instant::now(),
            }),
            shutdown.clone(),
        )
    }

    async fn run_for(
        tracker: TrackingLoop<impl QueueStore>,
        shutdown: CancellationToken,
        secs: u64,
    ) -> Result<()> {
        let (_, result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_secs(secs)).await;
                shutdown.cancel()
            },
            tracker.run(),
        );
        result
    }

    fn pending(path: &Path) -> Result<Vec<QueueEntry>> {
        Ok(SqliteQueueStore::open(path)?.list_pending()?)
    }

    #[tokio::test(start_paused = true)]
    async fn test_switch_is_recorded_and_delivered() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let path = dir.path().join("queue.db");
        let mut endpoint = MockIngestionEndpoint::new();
        endpoint
            .expect_fetch_shift_window()
            .times(1)
            .returning(|_| Ok(ShiftWindow::new(0, 0)));
        endpoint
            .expect_upload()
            .withf(|record: &UsageRecord| {
                &*record.application == "editor.exe"
                    && record.duration_seconds == 20.
                    && &*record.identity == "desk-01"
                    && &*record.location == "Office"
                    && record.end_timestamp == "2018-07-04 10:00:20"
            })
            .times(1)
            .returning(|_| Ok(()));
        let manager = focus_sequence(&[
            "editor.exe",
            "editor.exe",
            "shell.exe",
            "editor.exe",
            "browser.exe",
            "browser.exe",
        ]);
        let shutdown = CancellationToken::new();
        let tracker = tracker(
            SqliteQueueStore::open(&path)?,
            endpoint,
            manager,
            utc(10, 0, 0),
            &shutdown,
        );

        run_for(tracker, shutdown, 27).await?;

        assert!(pending(&path)?.is_empty());
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_records_stay_queued_while_offline() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let path = dir.path().join("queue.db");
        let mut endpoint = MockIngestionEndpoint::new();
        endpoint
            .expect_fetch_shift_window()
            .times(1)
            .returning(|_| Err(EndpointError::Connectivity("refused".into())));
        // Each drain stops at the first record.
        endpoint
            .expect_upload()
            .withf(|record: &UsageRecord| &*record.application == "editor.exe")
            .times(2)
            .returning(|_| Err(EndpointError::Connectivity("refused".into())));
        let manager = focus_sequence(&[
            "editor.exe",
            "editor.exe",
            "editor.exe",
            "browser.exe",
            "browser.exe",
            "editor.exe",
        ]);
        let shutdown = CancellationToken::new();
        // Default shift is 9 to 18, so 10:00 is within it.
        let tracker = tracker(
            SqliteQueueStore::open(&path)?,
            endpoint,
            manager,
            utc(10, 0, 0),
            &shutdown,
        );

        run_for(tracker, shutdown, 27).await?;

        let pending = pending(&path)?;
        let applications = pending
            .iter()
            .map(|e| (&*e.record.application, e.record.duration_seconds))
            .collect::<Vec<_>>();
        assert_eq!(applications, vec![("editor.exe", 15.), ("browser.exe", 10.)]);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_off_hours_skips_sampling() -> Result<()> {
        *TEST_LOGGING;
        let mut endpoint = MockIngestionEndpoint::new();
        endpoint
            .expect_fetch_shift_window()
            .times(1)
            .returning(|_| Ok(ShiftWindow::new(9, 18)));
        endpoint.expect_upload().never();
        let mut manager = MockWindowManager::new();
        manager.expect_get_active_window_data().never();
        let shutdown = CancellationToken::new();
        let tracker = tracker(
            SqliteQueueStore::open_in_memory()?,
            endpoint,
            manager,
            utc(20, 0, 0),
            &shutdown,
        );

        run_for(tracker, shutdown, 150).await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_shift_end_closes_open_interval() -> Result<()> {
        *TEST_LOGGING;
        let mut endpoint = MockIngestionEndpoint::new();
        endpoint
            .expect_fetch_shift_window()
            .times(1)
            .returning(|_| Ok(ShiftWindow::new(9, 18)));
        endpoint
            .expect_upload()
            .withf(|record: &UsageRecord| {
                &*record.application == "editor.exe"
                    && record.duration_seconds == 10.
                    && record.end_timestamp == "2018-07-04 18:00:00"
            })
            .times(1)
            .returning(|_| Ok(()));
        let manager = focus_sequence(&["editor.exe", "editor.exe"]);
        let shutdown = CancellationToken::new();
        let tracker = tracker(
            SqliteQueueStore::open_in_memory()?,
            endpoint,
            manager,
            utc(17, 59, 50),
            &shutdown,
        );

        run_for(tracker, shutdown, 90).await?;
        Ok(())
    }

    /// Takes a second to answer every upload.
    struct SlowEndpoint {
        uploads: AtomicUsize,
    }

    #[async_trait]
    impl IngestionEndpoint for SlowEndpoint {
        async fn fetch_shift_window(&self, _: &str) -> Result<ShiftWindow, EndpointError> {
            Ok(ShiftWindow::new(0, 0))
        }

        async fn upload(&self, _: &UsageRecord) -> Result<(), EndpointError> {
            tokio::time::sleep(Duration::from_secs(1)).await;
            self.uploads.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_backlog_drain() -> Result<()> {
        *TEST_LOGGING;
        let dir = tempdir()?;
        let path = dir.path().join("queue.db");
        let store = SqliteQueueStore::open(&path)?;
        let offset = FixedOffset::east_opt(0).unwrap();
        for i in 0..100 {
            store.enqueue(&UsageRecord::new(
                "desk-01".into(),
                "editor.exe".into(),
                chrono::Duration::seconds(i + 5),
                "Office".into(),
                utc(9, 0, 0).with_timezone(&offset),
            ))?;
        }

        let endpoint = Arc::new(SlowEndpoint {
            uploads: AtomicUsize::new(0),
        });
        let mut manager = MockWindowManager::new();
        manager
            .expect_get_active_window_data()
            .returning(|| Err(anyhow!("locked")));
        let shutdown = CancellationToken::new();
        let tracker = TrackingLoop::new(
            settings(),
            ShiftWindowGate::new(
                ShiftWindow::default(),
                endpoint.clone(),
                Duration::from_secs(600),
            ),
            ActivitySampler::new(Box::new(manager), vec![]),
            SyncDrainer::new(store, endpoint.clone(), shutdown.clone()),
            Box::new(StaticLocation("Office".into())),
            Box::new(TestClock {
                start_time: utc(10, 0, 0),
                reference: Instant::now(),
            }),
            shutdown.clone(),
        );

        let started = Instant::now();
        tokio::time::timeout(
            Duration::from_secs(10),
            run_for(tracker, shutdown, 2),
        )
        .await??;

        assert!(started.elapsed() < Duration::from_secs(3));
        let uploads = endpoint.uploads.load(Ordering::SeqCst);
        assert!(uploads <= 2, "{uploads} uploads finished");
        assert_eq!(pending(&path)?.len(), 100 - uploads);
        Ok(())
    }

    struct FailingStore;

    impl QueueStore for FailingStore {
        fn enqueue(&self, _: &UsageRecord) -> Result<i64, StorageError> {
            Err(StorageError::Io(std::io::Error::other("disk full")))
        }

        fn list_pending(&self) -> Result<Vec<QueueEntry>, StorageError> {
            Ok(vec![])
        }

        fn remove(&self, _: i64) -> Result<(), StorageError> {
            Ok(())
        }

        fn pending_count(&self) -> Result<u64, StorageError> {
            Ok(0)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_storage_failure_stops_tracking() -> Result<()> {
        *TEST_LOGGING;
        let mut endpoint = MockIngestionEndpoint::new();
        endpoint
            .expect_fetch_shift_window()
            .returning(|_| Ok(ShiftWindow::new(0, 0)));
        endpoint.expect_upload().never();
        let manager = focus_sequence(&["editor.exe", "editor.exe", "browser.exe"]);
        let shutdown = CancellationToken::new();
        let tracker = tracker(FailingStore, endpoint, manager, utc(10, 0, 0), &shutdown);

        let result = tracker.run().await;

        let error = result.expect_err("enqueue failure should end the loop");
        assert!(error.downcast_ref::<StorageError>().is_some());
        Ok(())
    }
}
