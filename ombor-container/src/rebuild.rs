//! Rebuild on change.
//!
//! [`Container::rebuild_on`] subscribes the container to a stream of
//! "something changed" events. Each accepted event publishes a
//! [`RebuildNotice`], retires the current generation and installs a fresh
//! one. Bursts inside the debounce window collapse into one rebuild.
//!
//! Consumers drain and rebuild:
//!
//! ```rust,no_run
//! # use ombor_container::prelude::*;
//! # async fn serve(container: Container) {
//! loop {
//!     // ... serve with instances from `container.get(..)` ...
//!     let notice = container.rebuild_requested().await;
//!     // ... finish the current unit of work ...
//!     notice.reloaded().await;
//! }
//! # }
//! ```

use std::pin::pin;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::container::{Container, ContainerInner, Resolver};
use crate::error::{ContainerError, Result};

/// Where the rebuild coordinator stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPhase {
    /// No change source subscribed.
    Idle,
    /// Waiting for the next change.
    Watching,
    /// Tearing down the previous generation.
    Rebuilding,
}

/// Announces a rebuild to whoever serves from the container.
#[derive(Debug, Clone)]
pub struct RebuildNotice {
    epoch: u64,
    reloaded: CancellationToken,
}

impl RebuildNotice {
    fn new(epoch: u64) -> Self {
        Self {
            epoch,
            reloaded: CancellationToken::new(),
        }
    }

    /// Epoch of the generation the rebuild installs.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Returns true once the previous generation has been torn down.
    pub fn is_reloaded(&self) -> bool {
        self.reloaded.is_cancelled()
    }

    /// Completes once the previous generation has been torn down.
    pub async fn reloaded(&self) {
        self.reloaded.cancelled().await;
    }
}

// ═══════════════════════════════════════════
// Debouncer
// ═══════════════════════════════════════════

#[derive(Debug, Clone, Copy)]
enum DebounceState {
    Idle,
    Armed { until: Instant },
}

/// Accepts a signal, then rejects further ones until the window passes.
#[derive(Debug)]
pub(crate) struct Debouncer {
    window: Duration,
    state: Mutex<DebounceState>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            state: Mutex::new(DebounceState::Idle),
        }
    }

    /// Returns true if a signal at `now` should trigger a rebuild.
    pub fn accept(&self, now: Instant) -> bool {
        let mut state = self.state.lock();
        match *state {
            DebounceState::Armed { until } if now < until => false,
            DebounceState::Idle | DebounceState::Armed { .. } => {
                *state = DebounceState::Armed {
                    until: now + self.window,
                };
                true
            }
        }
    }
}

// ═══════════════════════════════════════════
// Coordinator
// ═══════════════════════════════════════════

struct Watch {
    id: u64,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

struct CoordinatorState {
    phase: RebuildPhase,
    watch: Option<Watch>,
    next_watch_id: u64,
}

impl CoordinatorState {
    fn settle(&mut self) {
        self.phase = if self.watch.is_some() {
            RebuildPhase::Watching
        } else {
            RebuildPhase::Idle
        };
    }
}

pub(crate) struct RebuildCoordinator {
    state: Mutex<CoordinatorState>,
    debouncer: Debouncer,
    /// Capacity one. A notice nobody has taken yet is never replaced.
    pending: Mutex<Option<RebuildNotice>>,
    notify: Notify,
}

impl RebuildCoordinator {
    pub fn new(debounce: Duration) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                phase: RebuildPhase::Idle,
                watch: None,
                next_watch_id: 0,
            }),
            debouncer: Debouncer::new(debounce),
            pending: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    pub fn phase(&self) -> RebuildPhase {
        self.state.lock().phase
    }

    fn set_phase(&self, phase: RebuildPhase) {
        self.state.lock().phase = phase;
    }

    fn settle(&self) {
        self.state.lock().settle();
    }

    fn publish(&self, notice: RebuildNotice) {
        {
            let mut pending = self.pending.lock();
            if pending.is_some() {
                debug!(epoch = notice.epoch(), "Rebuild notice already pending");
                return;
            }
            *pending = Some(notice);
        }
        self.notify.notify_one();
    }

    fn take(&self) -> Option<RebuildNotice> {
        self.pending.lock().take()
    }

    async fn next(&self) -> RebuildNotice {
        loop {
            if let Some(notice) = self.take() {
                return notice;
            }
            self.notify.notified().await;
        }
    }

    /// Called by a watch task on exit.
    fn finish_watch(&self, id: u64) {
        let mut state = self.state.lock();
        if state.watch.as_ref().is_some_and(|watch| watch.id == id) {
            state.watch = None;
        }
        state.settle();
    }

    /// Signals the current watch task to stop without waiting for it.
    pub fn cancel_watch(&self) {
        if let Some(watch) = self.state.lock().watch.take() {
            watch.cancel.cancel();
        }
    }
}

// ═══════════════════════════════════════════
// Container API
// ═══════════════════════════════════════════

impl Container {
    /// Rebuilds the container whenever `changes` yields.
    ///
    /// Replaces any earlier subscription: the previous watcher is cancelled
    /// and the new one waits for it to exit before consuming events. A
    /// rebuild already in progress is not interrupted. Requires a Tokio
    /// runtime.
    pub fn rebuild_on<S>(&self, changes: S) -> Result<()>
    where
        S: Stream + Send + 'static,
        S::Item: Send,
    {
        let handle = Handle::try_current().map_err(|_| ContainerError::NoRuntime {
            operation: "rebuild_on",
        })?;

        let rebuild = &self.inner.rebuild;
        let mut state = rebuild.state.lock();

        let previous = state.watch.take().map(|watch| {
            watch.cancel.cancel();
            watch.task
        });
        let id = state.next_watch_id;
        state.next_watch_id += 1;

        let cancel = CancellationToken::new();
        let task = handle.spawn(watch_changes(
            Arc::downgrade(&self.inner),
            id,
            changes,
            cancel.clone(),
            previous,
        ));
        state.watch = Some(Watch { id, cancel, task });
        if state.phase == RebuildPhase::Idle {
            state.phase = RebuildPhase::Watching;
        }

        info!(watch = id, "Watching for changes");
        Ok(())
    }

    /// Stops the current subscription and waits for its task to exit.
    pub async fn stop_watching(&self) {
        let watch = self.inner.rebuild.state.lock().watch.take();
        if let Some(watch) = watch {
            debug!(watch = watch.id, "Stopping watch");
            watch.cancel.cancel();
            let _ = watch.task.await;
        }
        self.inner.rebuild.settle();
    }

    /// Current phase of the rebuild coordinator.
    pub fn rebuild_phase(&self) -> RebuildPhase {
        self.inner.rebuild.phase()
    }

    /// Takes the pending rebuild notice, if any. Never blocks.
    pub fn take_rebuild(&self) -> Option<RebuildNotice> {
        self.inner.rebuild.take()
    }

    /// Waits for the next rebuild notice.
    pub async fn rebuild_requested(&self) -> RebuildNotice {
        self.inner.rebuild.next().await
    }

    async fn apply_change(&self) {
        let rebuild = &self.inner.rebuild;
        if !rebuild.debouncer.accept(Instant::now()) {
            debug!("Change inside debounce window, ignored");
            return;
        }

        rebuild.set_phase(RebuildPhase::Rebuilding);
        let notice = RebuildNotice::new(self.epoch() + 1);
        rebuild.publish(notice.clone());
        info!(epoch = notice.epoch(), "Change detected, rebuilding");

        self.shutdown_resources().await;

        notice.reloaded.cancel();
        rebuild.settle();
        info!(epoch = self.epoch(), "Rebuild complete");
    }
}

impl Resolver<'_> {
    /// Subscribes the owning container to `changes`.
    /// See [`Container::rebuild_on`].
    pub fn rebuild_on<S>(&self, changes: S) -> Result<()>
    where
        S: Stream + Send + 'static,
        S::Item: Send,
    {
        self.container().rebuild_on(changes)
    }
}

async fn watch_changes<S>(
    container: Weak<ContainerInner>,
    id: u64,
    changes: S,
    cancel: CancellationToken,
    previous: Option<JoinHandle<()>>,
) where
    S: Stream + Send + 'static,
    S::Item: Send,
{
    if let Some(previous) = previous {
        let _ = previous.await;
    }

    let mut changes = pin!(changes);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(watch = id, "Watch cancelled");
                break;
            }
            change = changes.next() => {
                if change.is_none() {
                    debug!(watch = id, "Change source ended");
                    break;
                }
                let Some(inner) = container.upgrade() else {
                    break;
                };
                Container { inner }.apply_change().await;
                // A source that is always ready must not starve the worker.
                tokio::task::consume_budget().await;
            }
        }
    }

    if let Some(inner) = container.upgrade() {
        inner.rebuild.finish_watch(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::Service;
    use futures::channel::mpsc;
    use std::sync::atomic::{AtomicU32, Ordering};

    const WINDOW: Duration = Duration::from_millis(500);
    const CONFIG: Service<Arc<String>> = Service::new("config");

    fn container(built: &Arc<AtomicU32>, closed: &Arc<AtomicU32>) -> Container {
        let built = built.clone();
        let closed = closed.clone();
        Container::builder()
            .handle_signals(false)
            .debounce(WINDOW)
            .provide(&CONFIG, move |r| {
                let n = built.fetch_add(1, Ordering::SeqCst);
                let closed = closed.clone();
                r.on_shutdown(move || {
                    closed.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                });
                Ok(Arc::new(format!("config-{n}")))
            })
            .build()
    }

    #[test]
    fn debouncer_rejects_inside_window() {
        let debouncer = Debouncer::new(WINDOW);
        let start = Instant::now();

        assert!(debouncer.accept(start));
        assert!(!debouncer.accept(start));
        assert!(!debouncer.accept(start + Duration::from_millis(499)));
        assert!(debouncer.accept(start + WINDOW));
        assert!(!debouncer.accept(start + WINDOW + Duration::from_millis(100)));
    }

    #[test]
    fn pending_notice_is_not_overwritten() {
        let coordinator = RebuildCoordinator::new(WINDOW);
        coordinator.publish(RebuildNotice::new(1));
        coordinator.publish(RebuildNotice::new(2));

        assert_eq!(coordinator.take().map(|n| n.epoch()), Some(1));
        assert!(coordinator.take().is_none());
    }

    #[test]
    fn rebuild_on_requires_runtime() {
        let container = Container::builder().handle_signals(false).build();
        let result = container.rebuild_on(futures::stream::empty::<()>());
        assert!(matches!(
            result,
            Err(ContainerError::NoRuntime { operation: "rebuild_on" })
        ));
        assert_eq!(container.rebuild_phase(), RebuildPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_inside_window_rebuilds_once() {
        let (built, closed) = (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));
        let container = container(&built, &closed);
        let first = container.get(&CONFIG);

        let (tx, rx) = mpsc::unbounded::<()>();
        container.rebuild_on(rx).unwrap();
        assert_eq!(container.rebuild_phase(), RebuildPhase::Watching);

        tx.unbounded_send(()).unwrap();
        tx.unbounded_send(()).unwrap();
        drop(tx);

        let notice = container.rebuild_requested().await;
        notice.reloaded().await;
        container.stop_watching().await;

        assert_eq!(notice.epoch(), 1);
        assert_eq!(container.epoch(), 1);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
        assert!(container.take_rebuild().is_none());
        assert_eq!(container.rebuild_phase(), RebuildPhase::Idle);

        let second = container.get(&CONFIG);
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(*second, "config-1");
    }

    #[tokio::test(start_paused = true)]
    async fn spaced_signals_rebuild_twice() {
        let (built, closed) = (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));
        let container = container(&built, &closed);
        let _ = container.get(&CONFIG);

        let (tx, rx) = mpsc::unbounded::<()>();
        container.rebuild_on(rx).unwrap();

        tx.unbounded_send(()).unwrap();
        let notice = container.rebuild_requested().await;
        notice.reloaded().await;
        assert_eq!(notice.epoch(), 1);
        let _ = container.get(&CONFIG);

        tokio::time::advance(WINDOW + Duration::from_millis(100)).await;

        tx.unbounded_send(()).unwrap();
        let notice = container.rebuild_requested().await;
        notice.reloaded().await;
        assert_eq!(notice.epoch(), 2);

        drop(tx);
        container.stop_watching().await;

        assert_eq!(container.epoch(), 2);
        assert_eq!(closed.load(Ordering::SeqCst), 2);
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn resubscribe_replaces_previous_watch() {
        let (built, closed) = (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));
        let container = container(&built, &closed);

        container.rebuild_on(futures::stream::pending::<()>()).unwrap();
        container.rebuild_on(futures::stream::iter([()])).unwrap();

        let notice = container.rebuild_requested().await;
        notice.reloaded().await;
        container.stop_watching().await;

        assert_eq!(container.epoch(), 1);
        assert_eq!(container.rebuild_phase(), RebuildPhase::Idle);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_watching_interrupts_always_ready_source() {
        let (built, closed) = (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));
        let container = container(&built, &closed);

        container.rebuild_on(futures::stream::repeat(())).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let stopped = tokio::time::timeout(Duration::from_secs(3), container.stop_watching()).await;
        assert!(stopped.is_ok());
        assert_eq!(container.rebuild_phase(), RebuildPhase::Idle);
        assert!(container.epoch() >= 1);
    }

    #[tokio::test]
    async fn ended_source_returns_to_idle() {
        let (built, closed) = (Arc::new(AtomicU32::new(0)), Arc::new(AtomicU32::new(0)));
        let container = container(&built, &closed);

        container.rebuild_on(futures::stream::empty::<()>()).unwrap();
        for _ in 0..10 {
            if container.rebuild_phase() == RebuildPhase::Idle {
                break;
            }
            tokio::task::yield_now().await;
        }

        assert_eq!(container.rebuild_phase(), RebuildPhase::Idle);
        assert_eq!(container.epoch(), 0);
    }

    #[tokio::test]
    async fn constructor_can_subscribe() {
        const WATCHED: Service<u32> = Service::new("watched");

        let container = Container::builder()
            .handle_signals(false)
            .provide(&WATCHED, |r| {
                r.rebuild_on(futures::stream::pending::<()>())?;
                Ok(r.epoch() as u32)
            })
            .build();

        assert_eq!(container.get(&WATCHED), 0);
        assert_eq!(container.rebuild_phase(), RebuildPhase::Watching);
        container.stop_watching().await;
        assert_eq!(container.rebuild_phase(), RebuildPhase::Idle);
    }
}
