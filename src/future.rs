//! One-shot, multi-waiter value cell
//!
//! A [`Future`] settles exactly once, either resolved with a value or
//! rejected with an error. Every waiter, including ones that start after
//! settlement, observes the same outcome. Handles are cheap to clone and
//! all clones share the same cell.

use futures_util::future::{select_all, BoxFuture, FutureExt};
use std::fmt;
use std::future::IntoFuture;
use std::sync::Arc;
use tokio::sync::watch;

use crate::error::{MarketDataError, Result};

/// Terminal value of a [`Future`]
pub type Outcome<T> = Result<T>;

/// Shared completion cell used to hand a value from the receive path to callers
pub struct Future<T> {
    cell: Arc<watch::Sender<Option<Outcome<T>>>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match &*self.cell.borrow() {
            None => "pending",
            Some(Ok(_)) => "resolved",
            Some(Err(_)) => "rejected",
        };
        f.debug_struct("Future").field("state", &state).finish()
    }
}

impl<T: Clone + Send + Sync + 'static> Default for Future<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Send + Sync + 'static> Future<T> {
    /// Create a pending future
    pub fn new() -> Self {
        let (cell, _) = watch::channel(None);
        Self {
            cell: Arc::new(cell),
        }
    }

    /// Resolve with `value`. Returns false if the future had already settled.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with `error`. Returns false if the future had already settled.
    pub fn reject(&self, error: MarketDataError) -> bool {
        self.settle(Err(error))
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        let mut outcome = Some(outcome);
        self.cell.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = outcome.take();
            true
        })
    }

    /// Whether the future has been resolved or rejected
    pub fn is_settled(&self) -> bool {
        self.cell.borrow().is_some()
    }

    /// Current outcome without waiting
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.cell.borrow().clone()
    }

    /// Wait for the outcome
    pub async fn wait(&self) -> Outcome<T> {
        let mut rx = self.cell.subscribe();
        let outcome = match rx.wait_for(Option::is_some).await {
            Ok(slot) => slot.clone(),
            Err(_) => None,
        };
        outcome.unwrap_or_else(|| {
            Err(MarketDataError::WebSocketConnection(
                "future dropped before settling".to_string(),
            ))
        })
    }

    /// Whether two handles share the same cell
    pub fn same(&self, other: &Future<T>) -> bool {
        Arc::ptr_eq(&self.cell, &other.cell)
    }
}

impl<T: Clone + Send + Sync + 'static> IntoFuture for Future<T> {
    type Output = Outcome<T>;
    type IntoFuture = BoxFuture<'static, Outcome<T>>;

    fn into_future(self) -> Self::IntoFuture {
        async move { self.wait().await }.boxed()
    }
}

/// A future that settles with the outcome of whichever input settles first.
///
/// Inputs that are already settled win in argument order. Otherwise a task
/// is spawned on the current Tokio runtime to watch the inputs.
pub fn race<T: Clone + Send + Sync + 'static>(futures: Vec<Future<T>>) -> Future<T> {
    let winner = Future::new();

    if let Some(outcome) = futures.iter().find_map(Future::peek) {
        winner.settle(outcome);
        return winner;
    }
    if futures.is_empty() {
        return winner;
    }

    let result = winner.clone();
    tokio::spawn(async move {
        let waits = futures
            .into_iter()
            .map(|future| async move { future.wait().await }.boxed());
        let (outcome, _, _) = select_all(waits).await;
        result.settle(outcome);
    });
    winner
}
