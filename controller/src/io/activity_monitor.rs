//! Periodic foreground-activity health poll.
//!
//! The monitor thread asks the device for its resumed activity on a fixed
//! interval and keeps a count of consecutive polls that did not match the task's
//! expected activity. Sampling the count is a single atomic load.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, warn};

use crate::io::adb::DeviceTransport;
use crate::io::monitor::MonitorThread;

#[derive(Debug, Default)]
struct Shared {
    failures: AtomicU32,
    last_activity: Mutex<Option<String>>,
}

/// Running activity monitor. Dropping it stops the thread.
#[derive(Debug)]
pub struct ActivityMonitor {
    shared: Arc<Shared>,
    thread: MonitorThread,
}

impl ActivityMonitor {
    pub fn spawn(
        transport: Arc<dyn DeviceTransport>,
        expected_activity: String,
        poll_interval: Duration,
        join_timeout: Duration,
    ) -> Result<Self> {
        let shared = Arc::new(Shared::default());
        let state = Arc::clone(&shared);
        let thread = MonitorThread::spawn("activity-monitor", join_timeout, move |token| {
            loop {
                poll_once(transport.as_ref(), &expected_activity, &state);
                if token.wait(poll_interval) {
                    break;
                }
            }
        })?;
        Ok(Self { shared, thread })
    }

    /// Consecutive polls that did not find the expected activity.
    pub fn failure_count(&self) -> u32 {
        self.shared.failures.load(Ordering::Acquire)
    }

    /// Activity seen by the latest successful poll.
    pub fn last_activity(&self) -> Option<String> {
        self.shared
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn stop(&mut self) -> bool {
        self.thread.stop()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }
}

fn poll_once(transport: &dyn DeviceTransport, expected: &str, state: &Shared) {
    match transport.current_activity() {
        Ok(activity) => {
            let matches = activity == expected;
            *state
                .last_activity
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(activity.clone());
            if matches {
                state.failures.store(0, Ordering::Release);
            } else {
                let failures = state.failures.fetch_add(1, Ordering::AcqRel) + 1;
                debug!(%activity, expected, failures, "unexpected foreground activity");
            }
        }
        Err(err) => {
            let failures = state.failures.fetch_add(1, Ordering::AcqRel) + 1;
            warn!(err = %format!("{err:#}"), failures, "activity poll failed");
        }
    }
}
