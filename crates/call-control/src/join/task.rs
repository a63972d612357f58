//! Awaitable, non-cancellable join/unjoin work

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};

use crate::errors::{CallControlError, Result};
use crate::events::{JoinCompleteEvent, UnjoinCompleteEvent};

/// Pending join
pub type Joint = CompletionTask<JoinCompleteEvent>;
/// Pending unjoin
pub type Unjoint = CompletionTask<UnjoinCompleteEvent>;

struct DoneGuard(Arc<AtomicBool>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

/// A unit of work running on the Tokio runtime that always resolves to an event.
///
/// Clones share the same outcome. Dropping every handle does not stop the work.
#[derive(Clone)]
pub struct CompletionTask<E>
where
    E: Clone + Send + Sync + 'static,
{
    outcome: Shared<BoxFuture<'static, E>>,
    done: Arc<AtomicBool>,
}

impl<E> CompletionTask<E>
where
    E: Clone + Send + Sync + 'static,
{
    /// Spawn `work`; `on_abort` builds the event when the work panics
    pub fn spawn<F, A>(work: F, on_abort: A) -> Self
    where
        F: Future<Output = E> + Send + 'static,
        A: FnOnce(String) -> E + Send + 'static,
    {
        let done = Arc::new(AtomicBool::new(false));
        let guard = DoneGuard(done.clone());
        let handle = tokio::spawn(async move {
            let _guard = guard;
            work.await
        });
        let outcome = async move {
            match handle.await {
                Ok(event) => event,
                Err(e) => on_abort(e.to_string()),
            }
        }
        .boxed()
        .shared();
        Self { outcome, done }
    }

    /// A task that already resolved to `event`
    pub fn completed(event: E) -> Self {
        Self {
            outcome: futures::future::ready(event).boxed().shared(),
            done: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Wait for the outcome
    pub async fn get(&self) -> E {
        self.outcome.clone().await
    }

    /// Wait at most `timeout`; the work keeps running when the wait expires
    pub async fn get_timeout(&self, timeout: Duration) -> Result<E> {
        tokio::time::timeout(timeout, self.get())
            .await
            .map_err(|_| CallControlError::Timeout(timeout))
    }

    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::Acquire)
    }

    /// Joins cannot be cancelled once started
    pub fn cancel(&self) -> bool {
        false
    }

    pub fn is_cancelled(&self) -> bool {
        false
    }
}

impl<E> std::fmt::Debug for CompletionTask<E>
where
    E: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionTask").field("done", &self.is_done()).finish()
    }
}
