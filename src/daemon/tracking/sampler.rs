use std::{collections::HashSet, sync::Arc};

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, trace};

use crate::window_api::WindowManager;

/// What a single look at the host produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sample {
    Focused(Arc<str>),
    /// The host couldn't tell which application is focused.
    Unknown,
    /// An application from the ignore list is focused.
    Ignored,
}

/// An interval that ended because the focus moved elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct FinishedInterval {
    pub application: Arc<str>,
    pub duration: Duration,
    pub end: DateTime<Utc>,
}

/// Asks the host for the focused application and filters it through the ignore list.
pub struct ActivitySampler {
    manager: Box<dyn WindowManager>,
    ignored: HashSet<Arc<str>>,
}

impl ActivitySampler {
    pub fn new(manager: Box<dyn WindowManager>, ignored: impl IntoIterator<Item = String>) -> Self {
        Self {
            manager,
            ignored: ignored.into_iter().map(Arc::from).collect(),
        }
    }

    /// Never fails: host errors turn into [Sample::Unknown].
    pub fn sample(&mut self) -> Sample {
        match self.manager.get_active_window_data() {
            Ok(data) => {
                let application = data.application_name();
                trace!("Focused {application} ({})", data.window_title);
                if self.ignored.contains(&application) {
                    Sample::Ignored
                } else {
                    Sample::Focused(application)
                }
            }
            Err(e) => {
                debug!("Host couldn't report focused window {e:?}");
                Sample::Unknown
            }
        }
    }
}

/// Two-state machine that turns samples into finished intervals.
pub struct SwitchDetector {
    current: Option<Arc<str>>,
    interval_start: DateTime<Utc>,
    min_report: Duration,
}

impl SwitchDetector {
    pub fn new(min_report: Duration, now: DateTime<Utc>) -> Self {
        Self {
            current: None,
            interval_start: now,
            min_report,
        }
    }

    pub fn current(&self) -> Option<&Arc<str>> {
        self.current.as_ref()
    }

    /// Feeds one sample. Returns the interval that just ended if it's long enough to report.
    /// Ignored and unknown samples leave the state untouched, the open interval keeps running.
    pub fn observe(&mut self, sample: Sample, now: DateTime<Utc>) -> Option<FinishedInterval> {
        let next = match sample {
            Sample::Ignored | Sample::Unknown => return None,
            Sample::Focused(application) => application,
        };
        if self.current.as_ref() == Some(&next) {
            return None;
        }
        let finished = self.close(now);
        self.current = Some(next);
        self.interval_start = now;
        finished
    }

    /// Ends the open interval at `now` without starting a new one.
    pub fn close(&mut self, now: DateTime<Utc>) -> Option<FinishedInterval> {
        let application = self.current.take()?;
        let duration = now - self.interval_start;
        self.interval_start = now;
        if duration < self.min_report {
            debug!("Dropping {application} interval of {duration}");
            return None;
        }
        Some(FinishedInterval {
            application,
            duration,
            end: now,
        })
    }
}
