//! Response iterator - consumer-visible streaming of sub-request results.
//!
//! One iterator serves every dispatch discipline. A fixed fan-out never
//! resizes its expected count; the retry engine and the selective-retry
//! tracker resize through a shared [`IteratorHandle`]. The invariant that
//! makes the accounting exact: `add_and_get` is called *before* the result
//! it accounts for can be published, and the count is decremented only at
//! delivery. `remaining == 0` with an empty queue therefore means drained.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use scatter_core::{Error, NodeId, PartitionedId, Result};
use tokio::sync::mpsc;
use tokio::sync::Notify;

use crate::queue::ResponseQueue;

/// One delivered sub-request result.
#[derive(Debug)]
pub struct SubResponse<K: PartitionedId, R> {
    /// The node that served (or failed) this sub-request.
    pub node: NodeId,
    /// The partitioned ids the sub-request covered.
    pub ids: HashSet<K>,
    /// The decoded response, or the classified failure.
    pub outcome: Result<R>,
}

/// State shared between the iterator, its handle, and any tracker task.
struct IterShared {
    /// Results still expected but not yet delivered.
    remaining: AtomicI64,
    /// Set once by `close`; never cleared.
    closed: AtomicBool,
    /// Wakes the consumer on publish, resize, and close.
    wake: Notify,
    /// Wakes background tasks (the selective-retry tracker) on close.
    shutdown: Notify,
}

/// Producer-side handle to a response iterator.
///
/// Cloned into every sub-request driver. Publishing and resizing through
/// the handle keeps the consumer's accounting exact.
pub struct IteratorHandle<K: PartitionedId, R> {
    shared: Arc<IterShared>,
    queue: ResponseQueue<SubResponse<K, R>>,
}

impl<K: PartitionedId, R> IteratorHandle<K, R> {
    /// Atomically adjusts the expected-result count and returns the new
    /// value, waking the consumer.
    ///
    /// Callers growing the count must do so *before* submitting the
    /// sub-requests the growth accounts for.
    ///
    /// `notify_one` stores a permit, so a consumer racing between its
    /// state check and its wait still observes the adjustment.
    pub fn add_and_get(&self, delta: i64) -> i64 {
        let value = self.shared.remaining.fetch_add(delta, Ordering::AcqRel) + delta;
        self.shared.wake.notify_one();
        value
    }

    /// Publishes one completed result.
    pub fn publish(&self, response: SubResponse<K, R>) {
        self.queue.push(response);
        self.shared.wake.notify_one();
    }

    /// Returns the current expected-result count.
    #[must_use]
    pub fn expected(&self) -> i64 {
        self.shared.remaining.load(Ordering::Acquire)
    }

    /// Returns true once the consumer has closed the iterator.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Resolves when the consumer closes the iterator.
    pub(crate) async fn closed(&self) {
        if self.is_closed() {
            return;
        }
        self.shared.shutdown.notified().await;
    }
}

impl<K: PartitionedId, R> Clone for IteratorHandle<K, R> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            queue: self.queue.clone(),
        }
    }
}

impl<K: PartitionedId, R> std::fmt::Debug for IteratorHandle<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IteratorHandle")
            .field("expected", &self.expected())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Async stream of sub-request results, in completion order.
pub struct ResponseIterator<K: PartitionedId, R> {
    shared: Arc<IterShared>,
    rx: mpsc::UnboundedReceiver<SubResponse<K, R>>,
    handle: IteratorHandle<K, R>,
}

impl<K: PartitionedId, R> ResponseIterator<K, R> {
    /// Creates an iterator expecting `expected` results, returning the
    /// consumer side and the producer handle.
    #[must_use]
    pub fn with_expected(expected: usize) -> (Self, IteratorHandle<K, R>) {
        let shared = Arc::new(IterShared {
            remaining: AtomicI64::new(i64::try_from(expected).unwrap_or(i64::MAX)),
            closed: AtomicBool::new(false),
            wake: Notify::new(),
            shutdown: Notify::new(),
        });
        let (queue, rx) = ResponseQueue::channel();
        let handle = IteratorHandle {
            shared: Arc::clone(&shared),
            queue,
        };
        let iterator = Self {
            shared,
            rx,
            handle: handle.clone(),
        };
        (iterator, handle)
    }

    /// Returns a producer handle for this iterator.
    #[must_use]
    pub fn handle(&self) -> IteratorHandle<K, R> {
        self.handle.clone()
    }

    /// True while results are still expected.
    #[must_use]
    pub fn has_next(&self) -> bool {
        !self.shared.closed.load(Ordering::Acquire)
            && self.shared.remaining.load(Ordering::Acquire) > 0
    }

    /// Returns the current expected-result count.
    #[must_use]
    pub fn expected(&self) -> i64 {
        self.shared.remaining.load(Ordering::Acquire)
    }

    /// Awaits the next result.
    ///
    /// Returns `Ok(None)` once every expected result has been delivered.
    ///
    /// # Errors
    ///
    /// Returns `Cancelled` if the iterator has been closed.
    pub async fn next(&mut self) -> Result<Option<SubResponse<K, R>>> {
        loop {
            if self.shared.closed.load(Ordering::Acquire) {
                return Err(Error::Cancelled { operation: "next" });
            }

            match self.rx.try_recv() {
                Ok(response) => {
                    self.shared.remaining.fetch_sub(1, Ordering::AcqRel);
                    return Ok(Some(response));
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => return Ok(None),
            }

            if self.shared.remaining.load(Ordering::Acquire) <= 0 {
                return Ok(None);
            }

            // Wait for a publish, a resize, or close. The recv arm also
            // drains publishes that raced past the try_recv above.
            let wake = self.shared.wake.notified();
            tokio::select! {
                () = wake => {}
                received = self.rx.recv() => match received {
                    Some(response) => {
                        self.shared.remaining.fetch_sub(1, Ordering::AcqRel);
                        return Ok(Some(response));
                    }
                    None => return Ok(None),
                },
            }
        }
    }

    /// Awaits the next result with a deadline.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if no result arrives in time, and `Cancelled` if
    /// the iterator has been closed.
    pub async fn next_timeout(&mut self, timeout: Duration) -> Result<Option<SubResponse<K, R>>> {
        match tokio::time::timeout(timeout, self.next()).await {
            Ok(result) => result,
            Err(_) => Err(Error::Timeout {
                operation: "next",
                waited_us: u64::try_from(timeout.as_micros()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Closes the iterator, waking any waiter with `Cancelled`.
    ///
    /// Idempotent. In-flight sub-requests are not rescinded; their late
    /// results are dropped silently.
    pub fn close(&self) {
        if !self.shared.closed.swap(true, Ordering::AcqRel) {
            self.shared.wake.notify_one();
            self.shared.shutdown.notify_one();
        }
    }

    /// Wraps the iterator for synchronous callers.
    ///
    /// The returned adapter drives `next` via `block_on`; it must be used
    /// from outside the async runtime.
    #[must_use]
    pub fn blocking(self, runtime: tokio::runtime::Handle) -> BlockingIterator<K, R> {
        BlockingIterator {
            inner: self,
            runtime,
        }
    }
}

impl<K: PartitionedId, R> Drop for ResponseIterator<K, R> {
    fn drop(&mut self) {
        self.close();
    }
}

impl<K: PartitionedId, R> std::fmt::Debug for ResponseIterator<K, R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseIterator")
            .field("expected", &self.expected())
            .field("closed", &self.shared.closed.load(Ordering::Acquire))
            .finish()
    }
}

/// Blocking adapter over [`ResponseIterator`] for synchronous callers.
pub struct BlockingIterator<K: PartitionedId, R> {
    inner: ResponseIterator<K, R>,
    runtime: tokio::runtime::Handle,
}

impl<K: PartitionedId, R> BlockingIterator<K, R> {
    /// Blocks for the next result.
    ///
    /// # Errors
    ///
    /// Propagates the underlying iterator's errors.
    ///
    /// # Panics
    ///
    /// Panics if called from within the async runtime.
    pub fn next(&mut self) -> Result<Option<SubResponse<K, R>>> {
        self.runtime.block_on(self.inner.next())
    }

    /// Blocks for the next result with a deadline.
    ///
    /// # Errors
    ///
    /// Propagates the underlying iterator's errors.
    ///
    /// # Panics
    ///
    /// Panics if called from within the async runtime.
    pub fn next_timeout(&mut self, timeout: Duration) -> Result<Option<SubResponse<K, R>>> {
        self.runtime.block_on(self.inner.next_timeout(timeout))
    }

    /// True while results are still expected.
    #[must_use]
    pub fn has_next(&self) -> bool {
        self.inner.has_next()
    }

    /// Closes the underlying iterator.
    pub fn close(&self) {
        self.inner.close();
    }
}
