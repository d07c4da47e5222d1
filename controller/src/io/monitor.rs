//! Background monitor threads with cooperative stop and bounded join.
//!
//! A monitor waits on its [`StopToken`] between units of work, so a stop request
//! interrupts a poll sleep immediately. Stopping never kills a thread: if it does
//! not exit within the join timeout it is detached and a warning is logged.

use std::cell::Cell;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tracing::{debug, warn};

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Receiving side of a stop request, owned by the monitor thread.
#[derive(Debug)]
pub struct StopToken {
    rx: mpsc::Receiver<()>,
    stopped: Cell<bool>,
}

impl StopToken {
    /// Sleep up to `timeout`, returning early with `true` if a stop was requested.
    pub fn wait(&self, timeout: Duration) -> bool {
        if self.stopped.get() {
            return true;
        }
        let stopped = match self.rx.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) => false,
        };
        self.stopped.set(stopped);
        stopped
    }

    /// Non-blocking check.
    pub fn is_stopped(&self) -> bool {
        self.wait(Duration::ZERO)
    }
}

/// A named background thread that can be stopped and joined with a bounded wait.
#[derive(Debug)]
pub struct MonitorThread {
    name: String,
    stop_tx: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
    join_timeout: Duration,
}

impl MonitorThread {
    pub fn spawn<F>(name: &str, join_timeout: Duration, body: F) -> Result<Self>
    where
        F: FnOnce(StopToken) + Send + 'static,
    {
        let (stop_tx, rx) = mpsc::channel();
        let token = StopToken {
            rx,
            stopped: Cell::new(false),
        };
        let handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || body(token))
            .with_context(|| format!("spawn {name} thread"))?;
        debug!(monitor = name, "monitor started");
        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
            join_timeout,
        })
    }

    /// Request a stop and wait (bounded) for the thread to exit.
    ///
    /// Returns `false` if the thread was still running at the deadline. Calling
    /// this again after it returned is a no-op that returns `true`.
    pub fn stop(&mut self) -> bool {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        match self.handle.take() {
            Some(handle) => join_with_timeout(handle, self.join_timeout, &self.name),
            None => true,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for MonitorThread {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Wait until `handle` finishes or `timeout` elapses. On timeout the thread is
/// detached.
pub fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration, name: &str) -> bool {
    let deadline = Instant::now() + timeout;
    while !handle.is_finished() {
        if Instant::now() >= deadline {
            warn!(
                monitor = name,
                timeout_ms = timeout.as_millis() as u64,
                "monitor did not stop in time, detaching"
            );
            return false;
        }
        thread::sleep(JOIN_POLL_INTERVAL);
    }
    if handle.join().is_err() {
        warn!(monitor = name, "monitor thread panicked");
    }
    debug!(monitor = name, "monitor stopped");
    true
}
