//! Live Subscriptions
//!
//! A [`Subscription`] owns the background task that follows a backend live
//! query and the receiving half of the `watch` channel that task publishes
//! into. Dropping the subscription aborts the task, which in turn drops the
//! backend stream and every request still in flight.

use std::future::Future;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Handle to a value kept current by a background task
pub struct Subscription<T> {
    /// Latest published value
    state_rx: watch::Receiver<T>,

    /// Task following the backend query (`None` for fixed values)
    task: Option<JoinHandle<()>>,
}

impl<T> Subscription<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Spawn `worker` with the publishing half of a fresh channel
    pub(crate) fn spawn<F, Fut>(initial: T, worker: F) -> Self
    where
        F: FnOnce(watch::Sender<T>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (state_tx, state_rx) = watch::channel(initial);
        let task = tokio::spawn(worker(state_tx));

        Self {
            state_rx,
            task: Some(task),
        }
    }

    /// A subscription that never changes and holds no backend resources
    pub(crate) fn fixed(value: T) -> Self {
        let (_state_tx, state_rx) = watch::channel(value);

        Self {
            state_rx,
            task: None,
        }
    }

    /// Snapshot of the latest published value
    pub fn current(&self) -> T {
        self.state_rx.borrow().clone()
    }

    /// Latest value, marked as seen so `changed` waits for a newer one
    pub(crate) fn take_current(&mut self) -> T {
        self.state_rx.borrow_and_update().clone()
    }

    /// Wait for the next published value
    ///
    /// Returns `None` once the background task has finished and every
    /// published value has been observed.
    pub async fn changed(&mut self) -> Option<T> {
        self.state_rx.changed().await.ok()?;
        let value = self.state_rx.borrow_and_update().clone();
        Some(value)
    }

    /// Wait until the published value satisfies `pred`
    ///
    /// Checks the current value first. Returns `None` if the task finishes
    /// without ever publishing a matching value.
    pub async fn wait_for(&mut self, mut pred: impl FnMut(&T) -> bool) -> Option<T> {
        loop {
            {
                let value = self.state_rx.borrow_and_update();
                if pred(&value) {
                    return Some(value.clone());
                }
            }
            self.state_rx.changed().await.ok()?;
        }
    }

    /// Another receiver on the same channel, e.g. for a UI binding
    pub fn watch(&self) -> watch::Receiver<T> {
        self.state_rx.clone()
    }

    /// Whether the background task is still following the backend
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop following the backend; the last published value stays readable
    pub fn cancel(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
