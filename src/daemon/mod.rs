use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use config::{AgentConfig, CONFIG_FILE};
use gate::ShiftWindowGate;
use storage::queue_store::{QueueStore, SqliteQueueStore};
use sync::{
    endpoint::{HttpEndpoint, IngestionEndpoint},
    SyncDrainer,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracking::{
    location::{IpInfoLocation, LocationProvider, StaticLocation},
    sampler::ActivitySampler,
    TrackingLoop,
};

use crate::{
    utils::clock::{Clock, DefaultClock},
    window_api::{GenericWindowManager, WindowManager},
};

use args::ConfigOverrides;

pub mod args;
pub mod config;
pub mod gate;
pub mod shutdown;
pub mod storage;
pub mod sync;
pub mod tracking;

pub const QUEUE_FILE: &str = "queue.db";

/// Reads the configuration from `dir` and applies the command line overrides.
pub fn load_config(dir: &Path, overrides: ConfigOverrides) -> Result<AgentConfig> {
    let config = AgentConfig::load(&dir.join(CONFIG_FILE))?.with_overrides(overrides);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Represents the starting point for the daemon
pub async fn start_daemon(dir: &Path, overrides: ConfigOverrides) -> Result<()> {
    let config = load_config(dir, overrides)?;

    let manager = GenericWindowManager::new()?;
    let store = SqliteQueueStore::open(&dir.join(QUEUE_FILE))
        .with_context(|| format!("Failed to open the queue in {dir:?}"))?;
    let endpoint: Arc<dyn IngestionEndpoint> = Arc::new(HttpEndpoint::new(
        config.endpoint_url()?,
        config.request_timeout(),
    )?);
    let location: Box<dyn LocationProvider> = match &config.location {
        Some(location) => Box::new(StaticLocation(location.clone())),
        None => Box::new(IpInfoLocation::new(
            config.location_url()?,
            config.location_timeout(),
        )),
    };

    let shutdown_token = CancellationToken::new();

    let tracker = create_tracker(
        &config,
        store,
        endpoint,
        manager,
        location,
        &shutdown_token,
        DefaultClock,
    )?;

    let (_, tracking_result) = tokio::join!(
        shutdown::detect_shutdown(shutdown_token.clone()),
        async {
            let result = tracker.run().await;
            shutdown_token.cancel();
            result
        },
    );

    if let Err(e) = &tracking_result {
        error!("Tracking loop got an error {:?}", e);
    }
    info!("Agent stopped");
    tracking_result
}

fn create_tracker<S: QueueStore>(
    config: &AgentConfig,
    store: S,
    endpoint: Arc<dyn IngestionEndpoint>,
    manager: impl WindowManager + 'static,
    location: Box<dyn LocationProvider>,
    shutdown_token: &CancellationToken,
    clock: impl Clock,
) -> Result<TrackingLoop<S>> {
    Ok(TrackingLoop::new(
        config.tracking_settings()?,
        ShiftWindowGate::new(
            config.default_shift,
            endpoint.clone(),
            config.config_refresh_interval(),
        ),
        ActivitySampler::new(Box::new(manager), config.ignore_apps.clone()),
        SyncDrainer::new(store, endpoint, shutdown_token.clone()),
        location,
        Box::new(clock),
        shutdown_token.clone(),
    ))
}

#[cfg(test)]
mod daemon_tests {
    use std::{sync::Arc, time::Duration};

    use anyhow::Result;
    use async_trait::async_trait;
    use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc};
    use mockito::Server;
    use tempfile::tempdir;
    use tokio::time::Instant;
    use tokio_util::sync::CancellationToken;

    use crate::{
        daemon::{
            config::AgentConfig,
            create_tracker,
            storage::queue_store::{QueueStore, SqliteQueueStore},
            sync::endpoint::HttpEndpoint,
            tracking::location::StaticLocation,
            QUEUE_FILE,
        },
        utils::{clock::Clock, logging::TEST_LOGGING},
        window_api::{ActiveWindowData, MockWindowManager},
    };

    const TEST_START_DATE: NaiveDateTime = NaiveDateTime::new(
        NaiveDate::from_ymd_opt(2018, 7, 4).unwrap(),
        NaiveTime::from_hms_opt(4, 0, 0).unwrap(),
    );

    fn test_items() -> impl Iterator<Item = ActiveWindowData> {
        ["editor.exe", "editor.exe"]
            .into_iter()
            .chain(std::iter::repeat("browser.exe"))
            .map(|name| ActiveWindowData {
                window_title: "test".into(),
                process_name: format!("/opt/{name}").into(),
            })
    }

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

    /// Smoke test running the whole agent against a fake HTTP collector. The collector refuses
    /// the first upload, so the editor record stays queued until the catch-up drain.
    #[tokio::test]
    async fn smoke_test_daemon() -> Result<()> {
        *TEST_LOGGING;
        let mut server = Server::new_async().await;
        let settings = server
            .mock("GET", "/get_settings/desk-01")
            .with_status(200)
            .with_body(r#"{"start": 9, "end": 18}"#)
            .expect(1)
            .create_async()
            .await;
        let refused = server
            .mock("POST", "/upload")
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let mut mock_window_manager = MockWindowManager::new();
        let mut items = test_items();
        mock_window_manager
            .expect_get_active_window_data()
            .returning(move || Ok(items.next().unwrap()));

        let dir = tempdir()?;
        let config = AgentConfig {
            identity: Some("desk-01".into()),
            endpoint_base_url: server.url(),
            active_sample_interval_secs: 1,
            min_report_threshold_secs: 1.,
            catch_up_drain_interval_secs: 2,
            utc_offset_minutes: 5 * 60 + 30,
            ..Default::default()
        };
        config.validate()?;

        let shutdown_token = CancellationToken::new();
        let tracker = create_tracker(
            &config,
            SqliteQueueStore::open(&dir.path().join(QUEUE_FILE))?,
            Arc::new(HttpEndpoint::new(
                config.endpoint_url()?,
                config.request_timeout(),
            )?),
            mock_window_manager,
            Box::new(StaticLocation("Office".into())),
            &shutdown_token,
            TestClock {
                start_time: Utc.from_utc_datetime(&TEST_START_DATE),
                reference: Instant::now(),
            },
        )?;

        let (_, tracking_result) = tokio::join!(
            async {
                tokio::time::sleep(Duration::from_millis(2500)).await;
                refused.assert_async().await;
                refused.remove_async().await;
                server
                    .mock("POST", "/upload")
                    .with_status(200)
                    .create_async()
                    .await;
                tokio::time::sleep(Duration::from_millis(3000)).await;
                shutdown_token.cancel()
            },
            tracker.run(),
        );

        tracking_result?;
        settings.assert_async().await;

        let store = SqliteQueueStore::open(&dir.path().join(QUEUE_FILE))?;
        assert_eq!(store.pending_count()?, 0);

        Ok(())
    }
}
