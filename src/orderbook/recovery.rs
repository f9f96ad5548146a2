//! Snapshot recovery
//!
//! Reconciles a freshly fetched snapshot with the deltas buffered while
//! the book was out of sync. Retries are bounded; running out of them is a
//! staleness error for the caller waiting on this book only.

use async_trait::async_trait;
use tracing::{info, warn};

use super::{BookDelta, BookSnapshot, Level, OrderBook, SharedOrderBook};
use crate::error::{MarketDataError, Result};

/// Provider of full book snapshots, typically a venue's REST endpoint
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SnapshotSource<L: Level>: Send + Sync {
    /// Fetch a full snapshot of the book for `symbol`
    async fn fetch_snapshot(&self, symbol: &str, limit: Option<usize>) -> Result<BookSnapshot<L>>;

    /// Position of the first buffered delta to replay on top of `snapshot`,
    /// or `None` if the buffer cannot be lined up with it
    fn cache_index(&self, snapshot: &BookSnapshot<L>, cache: &[BookDelta<L>]) -> Option<usize> {
        default_cache_index(snapshot, cache)
    }
}

/// Sequence-number alignment used by venues that send `first_nonce..=nonce`
/// ranges with their deltas.
///
/// Deltas fully covered by the snapshot are skipped. The first newer delta
/// must start no later than `snapshot.nonce + 1`, otherwise updates were
/// missed and `None` is returned. A snapshot ahead of every buffered delta
/// yields `cache.len()` (nothing to replay).
pub fn default_cache_index<L>(snapshot: &BookSnapshot<L>, cache: &[BookDelta<L>]) -> Option<usize> {
    let nonce = snapshot.nonce?;
    for (i, delta) in cache.iter().enumerate() {
        let Some(last) = delta.nonce else {
            continue;
        };
        if last <= nonce {
            continue;
        }
        return match delta.first_nonce {
            Some(first) if first > nonce + 1 => None,
            _ => Some(i),
        };
    }
    Some(cache.len())
}

/// Synchronise `book` with a fresh snapshot and its buffered deltas
///
/// Each attempt fetches a snapshot and looks for the replay position in
/// the buffer. On success the book is reset to the snapshot, the deltas
/// from that position on are replayed, the buffer is cleared, and a copy
/// of the book is returned. After `max_retries` failed attempts the last
/// fetch error, or [`MarketDataError::NonceBehindCache`], is returned.
pub async fn load_order_book<L, S>(
    book: &SharedOrderBook<L>,
    source: &S,
    symbol: &str,
    limit: Option<usize>,
    max_retries: u32,
) -> Result<OrderBook<L>>
where
    L: Level,
    S: SnapshotSource<L> + ?Sized,
{
    let mut last_error = None;

    for attempt in 1..=max_retries {
        let snapshot = match source.fetch_snapshot(symbol, limit).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(symbol = %symbol, attempt, error = %e, "Snapshot fetch failed");
                last_error = Some(e);
                continue;
            }
        };
        last_error = None;

        let recovered = book.write(|book| {
            let index = source.cache_index(&snapshot, book.buffered())?;
            let pending: Vec<BookDelta<L>> = book.buffered()[index..].to_vec();
            book.reset(&snapshot);
            for delta in &pending {
                book.apply(delta);
            }
            book.clear_buffer();
            book.limit();
            Some((book.clone(), pending.len()))
        });

        match recovered {
            Some((copy, replayed)) => {
                info!(
                    symbol = %symbol,
                    nonce = ?copy.nonce(),
                    replayed,
                    "Order book synchronised from snapshot"
                );
                return Ok(copy);
            }
            None => {
                warn!(
                    symbol = %symbol,
                    attempt,
                    snapshot_nonce = ?snapshot.nonce,
                    "Snapshot does not line up with buffered deltas, retrying"
                );
            }
        }
    }

    Err(last_error.unwrap_or_else(|| MarketDataError::NonceBehindCache {
        symbol: symbol.to_string(),
        tries: max_retries,
    }))
}
