//! Resource teardown.
//!
//! A [`Closer`] collects teardown callbacks for one container generation.
//! [`Closer::close_all`] runs them concurrently, once, and releases every
//! [`Closer::wait`]er when the last one finishes. Failures are logged and
//! swallowed: teardown is best effort and order-independent.

use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

use crate::config::CloserConfig;
use crate::error::BoxError;
use crate::signal::TerminationSignal;

enum Action {
    /// Synchronous callback, run on the blocking pool.
    Blocking(Box<dyn FnOnce() -> Result<(), BoxError> + Send>),
    Async(BoxFuture<'static, Result<(), BoxError>>),
}

struct Teardown {
    label: Cow<'static, str>,
    action: Action,
}

/// Collects teardown callbacks and runs them once.
pub struct Closer {
    config: CloserConfig,
    teardowns: Mutex<Vec<Teardown>>,
    /// Set under the `teardowns` lock by the first `close_all`.
    started: AtomicBool,
    done: CancellationToken,
    /// Cancelled on drop so a pending `close_on` trigger exits.
    disarm: CancellationToken,
}

impl Closer {
    /// Creates an empty closer.
    pub fn new(config: CloserConfig) -> Self {
        Self {
            config,
            teardowns: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            done: CancellationToken::new(),
            disarm: CancellationToken::new(),
        }
    }

    /// Registers a synchronous teardown callback.
    ///
    /// Returns `false` if `close_all` has already taken the list; the
    /// callback is then dropped without running.
    pub fn add<F>(&self, label: impl Into<Cow<'static, str>>, teardown: F) -> bool
    where
        F: FnOnce() -> Result<(), BoxError> + Send + 'static,
    {
        self.push(Teardown {
            label: label.into(),
            action: Action::Blocking(Box::new(teardown)),
        })
    }

    /// Registers an asynchronous teardown.
    ///
    /// Same contract as [`add`](Self::add).
    pub fn add_async<F>(&self, label: impl Into<Cow<'static, str>>, teardown: F) -> bool
    where
        F: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.push(Teardown {
            label: label.into(),
            action: Action::Async(Box::pin(teardown)),
        })
    }

    fn push(&self, teardown: Teardown) -> bool {
        let mut teardowns = self.teardowns.lock();
        if self.started.load(Ordering::Acquire) {
            warn!(label = %teardown.label, "Closer already closing, teardown dropped");
            return false;
        }
        debug!(label = %teardown.label, "Registered teardown");
        teardowns.push(teardown);
        true
    }

    /// Number of callbacks waiting to run.
    pub fn len(&self) -> usize {
        self.teardowns.lock().len()
    }

    /// Returns true if no callbacks are waiting to run.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true once `close_all` has finished.
    pub fn is_closed(&self) -> bool {
        self.done.is_cancelled()
    }

    /// Runs every registered callback concurrently and waits for them.
    ///
    /// Only the first call runs anything; later and concurrent calls wait
    /// for the first to finish. The callbacks run on a detached task, so
    /// dropping this future does not cut teardown short. Must be called from
    /// inside a Tokio runtime.
    #[instrument(skip(self), name = "closer_close_all")]
    pub async fn close_all(&self) {
        let taken = {
            let mut teardowns = self.teardowns.lock();
            if self.started.swap(true, Ordering::AcqRel) {
                None
            } else {
                Some(std::mem::take(&mut *teardowns))
            }
        };

        if let Some(teardowns) = taken {
            tokio::spawn(
                run_teardowns(teardowns, self.config.teardown_timeout, self.done.clone())
                    .in_current_span(),
            );
        }
        self.done.cancelled().await;
    }

    /// Waits until `close_all` has finished.
    ///
    /// Safe to call before `close_all` and with no callbacks registered.
    pub async fn wait(&self) {
        self.done.cancelled().await;
    }

    /// Runs `close_all` once `trigger` resolves.
    ///
    /// The trigger fires at most once and is dropped without effect when the
    /// closer finishes by other means or is dropped. Returns `false` outside
    /// a Tokio runtime.
    pub fn close_on<F>(self: &Arc<Self>, trigger: F) -> bool
    where
        F: Future + Send + 'static,
        F::Output: Send,
    {
        let Ok(handle) = Handle::try_current() else {
            debug!("No Tokio runtime, close trigger not armed");
            return false;
        };

        let closer = Arc::downgrade(self);
        let done = self.done.clone();
        let disarm = self.disarm.clone();

        handle.spawn(async move {
            tokio::select! {
                _ = trigger => {
                    if let Some(closer) = closer.upgrade() {
                        closer.close_all().await;
                    }
                }
                _ = done.cancelled() => {}
                _ = disarm.cancelled() => {}
            }
        });
        true
    }

    /// Closes on SIGINT or SIGTERM (Ctrl-C off Unix).
    pub fn arm_signals(self: &Arc<Self>) -> bool {
        if Handle::try_current().is_err() {
            debug!("No Tokio runtime, signal handling not armed");
            return false;
        }

        match TerminationSignal::register() {
            Ok(signal) => self.close_on(async move {
                let name = signal.wait().await;
                info!(signal = name, "Termination signal received");
            }),
            Err(err) => {
                warn!(error = %err, "Failed to install termination signal handlers");
                false
            }
        }
    }
}

async fn run_teardowns(
    teardowns: Vec<Teardown>,
    teardown_timeout: Option<Duration>,
    done: CancellationToken,
) {
    // Released even if the runtime drops this task mid-teardown.
    let _done = done.drop_guard();

    info!(callbacks = teardowns.len(), "Closing resources");

    let mut tasks = JoinSet::new();
    for Teardown { label, action } in teardowns {
        match action {
            Action::Blocking(teardown) => {
                tasks.spawn_blocking(move || (label, teardown()));
            }
            Action::Async(teardown) => {
                tasks.spawn(async move { (label, teardown.await) });
            }
        }
    }

    let mut failures = 0usize;
    let drain = async {
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((label, Ok(()))) => debug!(label = %label, "Teardown finished"),
                Ok((label, Err(err))) => {
                    failures += 1;
                    error!(label = %label, error = %err, "Teardown failed");
                }
                Err(err) => {
                    failures += 1;
                    error!(error = %err, "Teardown task panicked or was cancelled");
                }
            }
        }
    };

    match teardown_timeout {
        None => drain.await,
        Some(limit) => {
            let outcome = tokio::time::timeout(limit, drain).await;
            if outcome.is_err() {
                let abandoned = tasks.len();
                tasks.abort_all();
                error!(
                    timeout = ?limit,
                    abandoned,
                    "Teardown timed out, forcing exit"
                );
            }
        }
    }

    if failures > 0 {
        warn!(failures, "Resources closed with failures");
    } else {
        info!("Resources closed");
    }
}

impl Default for Closer {
    fn default() -> Self {
        Self::new(CloserConfig::default())
    }
}

impl Drop for Closer {
    fn drop(&mut self) {
        self.disarm.cancel();
    }
}

impl fmt::Debug for Closer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Closer")
            .field("pending", &self.len())
            .field("closing", &self.started.load(Ordering::Acquire))
            .field("closed", &self.is_closed())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    fn counter() -> Arc<AtomicU32> {
        Arc::new(AtomicU32::new(0))
    }

    #[tokio::test]
    async fn close_all_twice_runs_callbacks_once() {
        let closer = Closer::default();
        let calls = counter();

        let c = calls.clone();
        closer.add("blocking", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let c = calls.clone();
        closer.add_async("async", async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        assert_eq!(closer.len(), 2);

        closer.close_all().await;
        closer.close_all().await;

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(closer.is_closed());
        assert!(closer.is_empty());
    }

    #[tokio::test]
    async fn wait_before_close_all_unblocks() {
        let closer = Arc::new(Closer::default());

        let waiter = {
            let closer = closer.clone();
            tokio::spawn(async move { closer.wait().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        closer.close_all().await;
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn wait_with_no_callbacks() {
        let closer = Closer::default();
        closer.close_all().await;
        closer.wait().await;
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn failures_are_swallowed() {
        let closer = Closer::default();
        let calls = counter();

        closer.add("broken", || Err("disk on fire".into()));
        closer.add("panics", || panic!("teardown panic"));
        let c = calls.clone();
        closer.add_async("healthy", async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        closer.close_all().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn concurrent_close_all_waits_for_first() {
        let closer = Arc::new(Closer::default());
        let (release_tx, release_rx) = tokio::sync::oneshot::channel::<()>();
        closer.add_async("slow", async move {
            let _ = release_rx.await;
            Ok(())
        });

        let first = {
            let closer = closer.clone();
            tokio::spawn(async move { closer.close_all().await })
        };
        tokio::task::yield_now().await;

        let second = {
            let closer = closer.clone();
            tokio::spawn(async move { closer.close_all().await })
        };
        tokio::task::yield_now().await;
        assert!(!second.is_finished());

        release_tx.send(()).unwrap();
        first.await.unwrap();
        second.await.unwrap();
        assert!(closer.is_closed());
    }

    #[tokio::test]
    async fn add_after_close_is_dropped() {
        let closer = Closer::default();
        closer.close_all().await;

        let calls = counter();
        let c = calls.clone();
        let accepted = closer.add("late", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        assert!(!accepted);
        assert_eq!(closer.len(), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn close_on_trigger_runs_once() {
        let closer = Arc::new(Closer::default());
        let calls = counter();
        let c = calls.clone();
        closer.add("conn", move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        assert!(closer.close_on(async move {
            let _ = rx.await;
        }));

        tx.send(()).unwrap();
        closer.wait().await;
        closer.close_all().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn close_on_outside_runtime_is_not_armed() {
        let closer = Arc::new(Closer::default());
        assert!(!closer.close_on(async {}));
        assert!(!closer.arm_signals());
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_close_all_still_finishes_teardown() {
        let closer = Closer::default();
        let calls = counter();
        let c = calls.clone();
        closer.add_async("pool", async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        let cut_short = tokio::time::timeout(Duration::from_millis(10), closer.close_all()).await;
        assert!(cut_short.is_err());
        assert!(!closer.is_closed());

        closer.wait().await;
        assert!(closer.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        closer.close_all().await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_adds_all_run() {
        let closer = Arc::new(Closer::default());
        let calls = counter();

        let adders: Vec<_> = (0..8)
            .map(|worker| {
                let closer = closer.clone();
                let calls = calls.clone();
                std::thread::spawn(move || {
                    for i in 0..25 {
                        let c = calls.clone();
                        assert!(closer.add(format!("worker-{worker}-{i}"), move || {
                            c.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }));
                    }
                })
            })
            .collect();
        for adder in adders {
            adder.join().unwrap();
        }
        assert_eq!(closer.len(), 200);

        closer.close_all().await;
        assert_eq!(calls.load(Ordering::SeqCst), 200);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_abandons_stragglers() {
        let config = CloserConfig::default().with_teardown_timeout(Duration::from_secs(1));
        let closer = Closer::new(config);
        let calls = counter();

        closer.add_async("hung", async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        });
        let c = calls.clone();
        closer.add_async("quick", async move {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        closer.close_all().await;
        assert!(closer.is_closed());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
