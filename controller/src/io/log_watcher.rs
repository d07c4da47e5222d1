//! Background consumer of the device log stream.
//!
//! The watcher thread evaluates the task's [`LogRules`] against every line and
//! folds the resulting events into a mutex-guarded [`LogAccumulator`]. The
//! controller reads through the `get_and_reset_*` accessors, each of which holds
//! the lock only for the swap.

use std::fmt;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tracing::{debug, info, trace, warn};

use crate::core::log_rules::{LogAccumulator, LogEvent, LogRules};
use crate::core::types::Extras;
use crate::io::monitor::MonitorThread;

/// Longest the watcher blocks on the stream before re-checking for a stop request.
const LINE_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A live, line-oriented device log.
///
/// The optional closer runs when the stream is dropped (e.g. to kill the process
/// producing it).
pub struct LogStream {
    lines: mpsc::Receiver<String>,
    closer: Option<Box<dyn FnOnce() + Send>>,
}

impl LogStream {
    pub fn new(lines: mpsc::Receiver<String>) -> Self {
        Self {
            lines,
            closer: None,
        }
    }

    pub fn with_closer(mut self, closer: impl FnOnce() + Send + 'static) -> Self {
        self.closer = Some(Box::new(closer));
        self
    }

    fn recv_timeout(&self, timeout: Duration) -> Result<String, RecvTimeoutError> {
        self.lines.recv_timeout(timeout)
    }
}

impl fmt::Debug for LogStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LogStream")
            .field("has_closer", &self.closer.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for LogStream {
    fn drop(&mut self) {
        if let Some(closer) = self.closer.take() {
            closer();
        }
    }
}

/// Running log watcher. Dropping it stops the thread.
#[derive(Debug)]
pub struct LogWatcher {
    state: Arc<Mutex<LogAccumulator>>,
    thread: MonitorThread,
}

impl LogWatcher {
    pub fn spawn(stream: LogStream, rules: LogRules, join_timeout: Duration) -> Result<Self> {
        let state = Arc::new(Mutex::new(LogAccumulator::default()));
        let shared = Arc::clone(&state);
        let thread = MonitorThread::spawn("log-watcher", join_timeout, move |token| {
            loop {
                if token.is_stopped() {
                    debug!("log watcher stop requested");
                    break;
                }
                match stream.recv_timeout(LINE_POLL_INTERVAL) {
                    Ok(line) => consume_line(&rules, &shared, &line),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => {
                        info!("log stream ended");
                        break;
                    }
                }
            }
            drop(stream);
        })?;
        Ok(Self { state, thread })
    }

    /// Reward accumulated since the last call, or `None` if nothing was reported.
    pub fn get_and_reset_reward(&self) -> Option<f64> {
        self.lock().take_reward()
    }

    /// Extras accumulated since the last call; empty when nothing was reported.
    pub fn get_and_reset_extras(&self) -> Extras {
        self.lock().take_extras()
    }

    /// Whether an episode end was logged since the last call.
    pub fn get_and_reset_episode_end(&self) -> bool {
        self.lock().take_episode_end()
    }

    /// Stop the watcher thread (bounded wait). See [`MonitorThread::stop`].
    pub fn stop(&mut self) -> bool {
        self.thread.stop()
    }

    pub fn is_running(&self) -> bool {
        self.thread.is_running()
    }

    fn lock(&self) -> MutexGuard<'_, LogAccumulator> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn consume_line(rules: &LogRules, state: &Mutex<LogAccumulator>, line: &str) {
    let events = rules.events(line);
    if events.is_empty() {
        return;
    }
    trace!(line, matches = events.len(), "log line matched");
    let mut acc = state.lock().unwrap_or_else(PoisonError::into_inner);
    for event in events {
        if let LogEvent::Malformed { pattern, reason } = &event {
            warn!(pattern = %pattern, reason = %reason, "ignoring malformed log match");
            continue;
        }
        acc.apply(event);
    }
}
