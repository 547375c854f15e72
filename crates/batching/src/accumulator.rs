//! Nagle-style batch accumulator.
//!
//! Producers append [`PendingItem`]s to the newest open [`Batch`] under a
//! short lock; the single consumer (the scheduler) pulls the oldest batch once
//! it is full or has waited `max_batch_wait`. Only the newest batch can ever
//! be open and below the size limit, so readiness is decided by looking at
//! the front of the queue alone.

use crate::pending::{PendingItem, ResultSlot};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::sync::futures::Notified;
use tokio::sync::Notify;
use tracing::debug;
use vecserve_core::config::BatchingConfig;
use vecserve_core::error::{EmbedError, EmbedResult};

/// Size, latency and backpressure limits of the accumulator.
#[derive(Debug, Clone, Copy)]
pub struct AccumulatorLimits {
    pub max_batch_size: usize,
    pub max_batch_wait: Duration,
    /// 0 disables the bound.
    pub max_pending_items: usize,
}

impl From<&BatchingConfig> for AccumulatorLimits {
    fn from(config: &BatchingConfig) -> Self {
        Self {
            max_batch_size: config.max_batch_size.max(1),
            max_batch_wait: Duration::from_millis(config.max_batch_wait_ms),
            max_pending_items: config.max_pending_items,
        }
    }
}

/// Items that will go through the model in one call.
#[derive(Debug)]
pub struct Batch {
    items: Vec<PendingItem>,
    created_at: Instant,
    closed: bool,
}

impl Batch {
    fn new(created_at: Instant, capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity),
            created_at,
            closed: false,
        }
    }

    fn push(&mut self, item: PendingItem) {
        debug_assert!(!self.closed, "append to a closed batch");
        self.items.push(item);
    }

    fn close(&mut self) {
        self.closed = true;
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn texts(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(|item| item.text())
    }

    /// Split into the model input and the matching result slots, index-aligned.
    pub fn into_parts(self) -> (Vec<String>, Vec<ResultSlot>) {
        self.items.into_iter().map(PendingItem::into_parts).unzip()
    }

    /// Resolve every item with the same error.
    pub fn fail_all(self, err: EmbedError) {
        for item in self.items {
            item.fail(err.clone());
        }
    }
}

/// Outcome of [`BatchAccumulator::take_ready`].
#[derive(Debug)]
pub enum TakeReady {
    /// A closed batch to run through the model.
    Ready(Batch),
    /// The only batch is still accumulating; nothing is ready before `deadline`.
    Pending { deadline: Instant },
    /// Nothing queued.
    Empty,
    /// Force-closed during shutdown; must be failed, not encoded.
    Drained(Batch),
    /// Shut down and empty.
    Stopped,
}

struct State {
    batches: VecDeque<Batch>,
    pending: usize,
    shut_down: bool,
}

/// Multi-producer, single-consumer batch queue.
pub struct BatchAccumulator {
    state: Mutex<State>,
    wake: Notify,
    limits: AccumulatorLimits,
}

impl BatchAccumulator {
    pub fn new(limits: AccumulatorLimits) -> Self {
        Self {
            state: Mutex::new(State {
                batches: VecDeque::new(),
                pending: 0,
                shut_down: false,
            }),
            wake: Notify::new(),
            limits: AccumulatorLimits {
                max_batch_size: limits.max_batch_size.max(1),
                ..limits
            },
        }
    }

    /// Append one item to the open batch.
    pub fn submit(&self, item: PendingItem) -> EmbedResult<()> {
        self.submit_many(vec![item])
    }

    /// Admit all of a request's items, in order, or none of them.
    ///
    /// On rejection every item's slot is filled with the returned error.
    pub fn submit_many(&self, items: Vec<PendingItem>) -> EmbedResult<()> {
        if items.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        let max = self.limits.max_batch_size;
        let mut wake = false;

        let rejection = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            let limit = self.limits.max_pending_items;

            if state.shut_down {
                Some((EmbedError::ServiceStopping, items))
            } else if limit != 0 && state.pending + items.len() > limit {
                let err = EmbedError::Overloaded {
                    pending: state.pending,
                    limit,
                };
                Some((err, items))
            } else {
                state.pending += items.len();
                for item in items {
                    let open = state
                        .batches
                        .back()
                        .map_or(false, |b| !b.closed && b.len() < max);
                    if !open {
                        state.batches.push_back(Batch::new(now, max));
                        wake = true;
                    }
                    if let Some(batch) = state.batches.back_mut() {
                        batch.push(item);
                        if batch.len() >= max {
                            batch.close();
                            wake = true;
                        }
                    }
                }
                None
            }
        };

        if let Some((err, items)) = rejection {
            let request_id = items.first().map(PendingItem::request_id);
            debug!(
                request_id = ?request_id,
                error = %err,
                items = items.len(),
                "Submission rejected"
            );
            for item in items {
                item.fail(err.clone());
            }
            return Err(err);
        }

        if wake {
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Pop the oldest batch if it is ready to run.
    pub fn take_ready(&self, now: Instant) -> TakeReady {
        self.take(now, false)
    }

    /// Pop the oldest batch even if it is still accumulating. Used by an idle
    /// consumer that would rather run a partial batch than wait out
    /// `max_batch_wait`.
    pub fn pull(&self, now: Instant) -> TakeReady {
        self.take(now, true)
    }

    fn take(&self, now: Instant, force: bool) -> TakeReady {
        let mut state = self.state.lock();

        let Some(front) = state.batches.front() else {
            return if state.shut_down {
                TakeReady::Stopped
            } else {
                TakeReady::Empty
            };
        };

        let deadline = front.created_at + self.limits.max_batch_wait;
        let ready = force
            || front.closed
            || front.len() >= self.limits.max_batch_size
            || now >= deadline;

        if !state.shut_down && !ready {
            return TakeReady::Pending { deadline };
        }

        let Some(mut batch) = state.batches.pop_front() else {
            return TakeReady::Empty;
        };
        batch.close();
        state.pending -= batch.len();

        if state.shut_down {
            TakeReady::Drained(batch)
        } else {
            TakeReady::Ready(batch)
        }
    }

    /// Future that resolves when the consumer should look again.
    pub fn notified(&self) -> Notified<'_> {
        self.wake.notified()
    }

    /// Refuse new submissions and wake the consumer so it drains what is left.
    pub fn shutdown(&self) {
        self.state.lock().shut_down = true;
        self.wake.notify_one();
    }

    /// Remove every queued batch, ready or not.
    pub fn drain(&self) -> Vec<Batch> {
        let mut state = self.state.lock();
        state.pending = 0;
        state.batches.drain(..).collect()
    }

    pub fn is_shut_down(&self) -> bool {
        self.state.lock().shut_down
    }

    /// Items queued and not yet handed to the model.
    pub fn pending_items(&self) -> usize {
        self.state.lock().pending
    }

    pub fn queued_batches(&self) -> usize {
        self.state.lock().batches.len()
    }

    pub fn limits(&self) -> AccumulatorLimits {
        self.limits
    }
}
