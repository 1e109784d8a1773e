//! Periodic background refresh.
//!
//! Each poller is a cancellable task that fetches on a fixed interval and
//! publishes the latest good value on a `watch` channel. A failed fetch is
//! logged and leaves the last value in place.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::ApiResult;

pub struct Poller<T> {
    name: &'static str,
    rx: watch::Receiver<Option<T>>,
    kick: Arc<Notify>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl<T> Poller<T> {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<T>> {
        self.rx.clone()
    }

    /// Fetch now instead of waiting for the next tick.
    pub fn refresh_now(&self) {
        self.kick.notify_one();
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl<T: Clone> Poller<T> {
    pub fn latest(&self) -> Option<T> {
        self.rx.borrow().clone()
    }
}

impl<T> Drop for Poller<T> {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Start polling. The first fetch happens immediately.
pub fn spawn<T, F, Fut>(
    name: &'static str,
    every: Duration,
    cancel: CancellationToken,
    mut fetch: F,
) -> Poller<T>
where
    T: Send + Sync + 'static,
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = ApiResult<T>> + Send + 'static,
{
    let (tx, rx) = watch::channel(None);
    let kick = Arc::new(Notify::new());
    let task_kick = Arc::clone(&kick);
    let task_cancel = cancel.clone();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = task_cancel.cancelled() => break,
                _ = ticker.tick() => {}
                _ = task_kick.notified() => ticker.reset(),
            }
            match fetch().await {
                Ok(value) => {
                    debug!(poller = name, "poll refreshed");
                    tx.send_replace(Some(value));
                }
                Err(e) => warn!(poller = name, error = %e, "poll failed"),
            }
        }
        debug!(poller = name, "poller stopped");
    });

    Poller {
        name,
        rx,
        kick,
        cancel,
        task,
    }
}

/// Hand every new value from `poller` to `apply` until `cancel` fires.
pub fn forward<T, F>(poller: &Poller<T>, cancel: CancellationToken, mut apply: F) -> JoinHandle<()>
where
    T: Clone + Send + Sync + 'static,
    F: FnMut(T) + Send + 'static,
{
    let mut rx = poller.subscribe();
    let name = poller.name();
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                changed = rx.changed() => {
                    if changed.is_err() {
                        debug!(poller = name, "poller gone, forwarding stopped");
                        break;
                    }
                    let value = rx.borrow_and_update().clone();
                    if let Some(value) = value {
                        apply(value);
                    }
                }
            }
        }
    })
}
