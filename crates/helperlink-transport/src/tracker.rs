use std::collections::HashMap;
use std::fmt;
use std::io;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};

use crate::subprocess::send_signal;

const REAP_POLL_INTERVAL: Duration = Duration::from_millis(25);

type ExitCallback = Box<dyn FnOnce(u32, ExitStatus) + Send>;
type ErrorCallback = Box<dyn FnOnce(u32, io::Error) + Send>;

/// Callbacks fired once when a tracked helper is reaped.
#[derive(Default)]
pub struct ProcessCallbacks {
    on_exit: Option<ExitCallback>,
    on_error: Option<ErrorCallback>,
}

impl ProcessCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with the pid and exit status once the helper has been reaped.
    pub fn on_exit(mut self, f: impl FnOnce(u32, ExitStatus) + Send + 'static) -> Self {
        self.on_exit = Some(Box::new(f));
        self
    }

    /// Called if waiting on the helper fails.
    pub fn on_error(mut self, f: impl FnOnce(u32, io::Error) + Send + 'static) -> Self {
        self.on_error = Some(Box::new(f));
        self
    }
}

impl fmt::Debug for ProcessCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessCallbacks")
            .field("on_exit", &self.on_exit.is_some())
            .field("on_error", &self.on_error.is_some())
            .finish()
    }
}

/// A helper process shared by its reaper and the records that signal it.
///
/// The process is only reaped with the lock held, and signals are only sent
/// with the lock held and the child still present, so a signal can never
/// reach a pid the kernel has already recycled.
#[derive(Debug, Clone)]
pub(crate) struct ChildHandle {
    pid: u32,
    child: Arc<Mutex<Option<Child>>>,
}

impl ChildHandle {
    pub(crate) fn new(pid: u32, child: Child) -> Self {
        Self {
            pid,
            child: Arc::new(Mutex::new(Some(child))),
        }
    }

    pub(crate) fn pid(&self) -> u32 {
        self.pid
    }

    /// False once the process has been reaped.
    pub(crate) fn is_live(&self) -> bool {
        self.lock().is_some()
    }

    /// Send `signal` unless the process has been reaped.
    pub(crate) fn signal(&self, signal: libc::c_int) -> bool {
        let guard = self.lock();
        guard.is_some() && send_signal(self.pid, signal)
    }

    /// Reap the process if it has exited.
    fn try_reap(&self) -> Option<io::Result<ExitStatus>> {
        let mut guard = self.lock();
        let outcome = match guard.as_mut()?.try_wait() {
            Ok(Some(status)) => Ok(status),
            Ok(None) => return None,
            Err(err) => Err(err),
        };
        *guard = None;
        Some(outcome)
    }

    /// Wait for the process to exit, reaping it on every `SIGCHLD`.
    async fn reap(&self) -> io::Result<ExitStatus> {
        // Registered before the first check so no exit goes unnoticed.
        let mut sigchld = match signal(SignalKind::child()) {
            Ok(stream) => Some(stream),
            Err(err) => {
                warn!(pid = self.pid, error = %err, "no SIGCHLD stream; polling for exit");
                None
            }
        };
        loop {
            if let Some(outcome) = self.try_reap() {
                return outcome;
            }
            match sigchld.as_mut() {
                Some(stream) => {
                    if stream.recv().await.is_none() {
                        sigchld = None;
                    }
                }
                None => tokio::time::sleep(REAP_POLL_INTERVAL).await,
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<Child>> {
        self.child.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct Tracked {
    child: ChildHandle,
    /// `None` once the owner has called [`ProcessTracker::remove`].
    callbacks: Option<ProcessCallbacks>,
}

/// Reaps helper processes and reports their exit.
///
/// Shared by every connection that launches helpers; cloning is cheap.
/// Every registered pid stays tracked until the process has been reaped.
#[derive(Clone, Default)]
pub struct ProcessTracker {
    inner: Arc<Mutex<HashMap<u32, Tracked>>>,
}

impl ProcessTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track `child` and spawn a task that reaps it.
    pub(crate) fn register(&self, child: ChildHandle, callbacks: ProcessCallbacks) {
        let pid = child.pid();
        self.lock().insert(
            pid,
            Tracked {
                child: child.clone(),
                callbacks: Some(callbacks),
            },
        );
        debug!(pid, "tracking helper");

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let outcome = child.reap().await;
            let entry = inner
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&pid);
            let callbacks = entry.and_then(|tracked| tracked.callbacks);

            match outcome {
                Ok(status) => {
                    info!(pid, %status, "helper exited");
                    if let Some(f) = callbacks.and_then(|c| c.on_exit) {
                        f(pid, status);
                    }
                }
                Err(err) => {
                    warn!(pid, error = %err, "failed to wait on helper");
                    if let Some(f) = callbacks.and_then(|c| c.on_error) {
                        f(pid, err);
                    }
                }
            }
        });
    }

    /// Drop the callbacks for `pid`. The process is still reaped when it
    /// exits. Returns whether the pid was tracked.
    pub fn remove(&self, pid: u32) -> bool {
        match self.lock().get_mut(&pid) {
            Some(tracked) => {
                tracked.callbacks = None;
                true
            }
            None => false,
        }
    }

    /// Signal every live helper: `SIGKILL` when `hard`, otherwise `SIGTERM`.
    /// Returns how many were signalled.
    pub fn kill_all(&self, hard: bool) -> usize {
        let signal = if hard { libc::SIGKILL } else { libc::SIGTERM };
        let guard = self.lock();
        let mut signalled = 0;
        for tracked in guard.values() {
            if tracked.child.signal(signal) {
                signalled += 1;
            }
        }
        if signalled > 0 {
            info!(signalled, hard, "signalled tracked helpers");
        }
        signalled
    }

    /// `SIGTERM` every helper, wait up to `soft_delay` for them to be reaped,
    /// then `SIGKILL` the survivors and wait up to `max_delay` overall.
    ///
    /// Returns true once nothing is tracked.
    pub async fn ensure_all_killed(&self, soft_delay: Duration, max_delay: Duration) -> bool {
        let start = tokio::time::Instant::now();
        self.kill_all(false);
        if self.wait_until_empty(start + soft_delay).await {
            return true;
        }

        warn!(remaining = self.len(), "helpers ignored SIGTERM; escalating");
        self.kill_all(true);
        self.wait_until_empty(start + max_delay.max(soft_delay)).await
    }

    async fn wait_until_empty(&self, deadline: tokio::time::Instant) -> bool {
        loop {
            if self.is_empty() {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(REAP_POLL_INTERVAL).await;
        }
    }

    /// Pids not yet reaped, in ascending order.
    pub fn tracked(&self) -> Vec<u32> {
        let mut pids: Vec<u32> = self.lock().keys().copied().collect();
        pids.sort_unstable();
        pids
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<u32, Tracked>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for ProcessTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessTracker")
            .field("tracked", &self.tracked())
            .finish()
    }
}
