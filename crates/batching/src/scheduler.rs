//! Single-writer scheduler that owns the model resource.
//!
//! The [`Scheduler`] loop is the only code that can reach the model: it is
//! moved into the loop at spawn time and from there into a blocking thread for
//! each encode call, then moved back. At most one encode call is in flight.
//!
//! ```text
//! Idle -> BatchAvailable -> Encoding -> Dispatching -> Idle
//!   \______________________ shutdown ______________________/-> Stopped
//! ```

use crate::accumulator::{BatchAccumulator, TakeReady};
use crate::pending::ResultSlot;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use vecserve_core::config::BatchingConfig;
use vecserve_core::error::EmbedError;
use vecserve_core::inference::{InferenceError, ModelResource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    BatchAvailable,
    Encoding,
    Dispatching,
    Stopped,
}

#[derive(Debug, Clone, Default)]
pub struct SchedulerOptions {
    /// After a multi-item batch fails, re-run its items one at a time so the
    /// error lands only on the offending items.
    pub retry_failed_items_individually: bool,
    /// Pull a still-accumulating batch as soon as the loop is idle instead of
    /// waiting out `max_batch_wait`. Batches still form while a call is in
    /// flight.
    pub dispatch_when_idle: bool,
}

impl From<&BatchingConfig> for SchedulerOptions {
    fn from(config: &BatchingConfig) -> Self {
        Self {
            retry_failed_items_individually: config.retry_failed_items_individually,
            dispatch_when_idle: config.dispatch_when_idle,
        }
    }
}

type EncodeOutput = Result<Vec<Vec<f32>>, InferenceError>;

/// The inference worker. Construct with [`Scheduler::spawn`].
pub struct Scheduler<M> {
    model: Option<M>,
    model_name: String,
    accumulator: Arc<BatchAccumulator>,
    options: SchedulerOptions,
    state: watch::Sender<SchedulerState>,
}

/// Control handle for a running scheduler.
pub struct SchedulerHandle {
    join: JoinHandle<()>,
    accumulator: Arc<BatchAccumulator>,
    state: watch::Receiver<SchedulerState>,
}

impl<M: ModelResource + 'static> Scheduler<M> {
    /// Start the scheduler loop on the current tokio runtime.
    pub fn spawn(
        model: M,
        accumulator: Arc<BatchAccumulator>,
        options: SchedulerOptions,
    ) -> SchedulerHandle {
        let batch_limit = accumulator.limits().max_batch_size;
        if batch_limit > model.max_batch_size() {
            warn!(
                model = model.model_name(),
                batch_limit,
                model_limit = model.max_batch_size(),
                "Batch size exceeds the model's per-call limit; full batches will fail"
            );
        }

        let (state_tx, state_rx) = watch::channel(SchedulerState::Idle);
        let scheduler = Self {
            model_name: model.model_name().to_string(),
            model: Some(model),
            accumulator: accumulator.clone(),
            options,
            state: state_tx,
        };

        let join = tokio::spawn(scheduler.run());

        SchedulerHandle {
            join,
            accumulator,
            state: state_rx,
        }
    }

    async fn run(mut self) {
        info!(model = %self.model_name, "Scheduler started");

        loop {
            let now = Instant::now();
            let next = if self.options.dispatch_when_idle {
                self.accumulator.pull(now)
            } else {
                self.accumulator.take_ready(now)
            };

            match next {
                TakeReady::Ready(batch) => {
                    self.set_state(SchedulerState::BatchAvailable);
                    let queued_us = now.saturating_duration_since(batch.created_at()).as_micros();
                    metrics::histogram!("embed.batch_wait_us").record(queued_us as f64);
                    let (texts, slots) = batch.into_parts();
                    self.process(texts, slots).await;

                    if self.model.is_none() {
                        error!(model = %self.model_name, "Model lost, stopping scheduler");
                        self.accumulator.shutdown();
                    }
                    self.set_state(SchedulerState::Idle);
                }
                TakeReady::Pending { deadline } => {
                    tokio::select! {
                        _ = self.accumulator.notified() => {}
                        _ = tokio::time::sleep_until(deadline.into()) => {}
                    }
                }
                TakeReady::Empty => self.accumulator.notified().await,
                TakeReady::Drained(batch) => {
                    debug!(items = batch.len(), "Failing batch drained at shutdown");
                    batch.fail_all(EmbedError::ServiceStopping);
                }
                TakeReady::Stopped => break,
            }
        }

        self.set_state(SchedulerState::Stopped);
        info!(model = %self.model_name, "Scheduler stopped");
    }

    async fn process(&mut self, texts: Vec<String>, slots: Vec<ResultSlot>) {
        let batch_size = texts.len();
        metrics::counter!("embed.batches").increment(1);
        metrics::histogram!("embed.batch_size").record(batch_size as f64);

        self.set_state(SchedulerState::Encoding);
        let start = Instant::now();
        let (texts, result) = self.encode(texts).await;
        let latency_us = start.elapsed().as_micros() as u64;
        metrics::histogram!("embed.inference_latency_us").record(latency_us as f64);

        self.set_state(SchedulerState::Dispatching);
        match check_output(result, batch_size) {
            Ok(vectors) => {
                debug!(batch_size, latency_us, "Batch encoded");
                for (slot, vector) in slots.into_iter().zip(vectors) {
                    slot.fill(Ok(vector));
                }
            }
            Err(err) => {
                metrics::counter!("embed.inference_errors").increment(1);
                let mut request_ids: Vec<_> = slots.iter().map(ResultSlot::request_id).collect();
                request_ids.dedup();
                warn!(batch_size, ?request_ids, error = %err, "Batch inference failed");

                if self.options.retry_failed_items_individually
                    && batch_size > 1
                    && self.model.is_some()
                {
                    self.retry_individually(texts, slots).await;
                } else {
                    let err = EmbedError::Inference(err);
                    for slot in slots {
                        slot.fill(Err(err.clone()));
                    }
                }
            }
        }
    }

    /// Localize a batch failure to the offending items.
    async fn retry_individually(&mut self, texts: Vec<String>, slots: Vec<ResultSlot>) {
        debug!(items = slots.len(), "Retrying failed batch item by item");

        for (text, slot) in texts.into_iter().zip(slots) {
            if slot.is_abandoned() {
                continue;
            }
            let (_, result) = self.encode(vec![text]).await;
            let result = check_output(result, 1)
                .map(|mut vectors| vectors.remove(0))
                .map_err(EmbedError::Inference);
            if let Err(e) = &result {
                warn!(
                    request_id = %slot.request_id(),
                    index = slot.index(),
                    error = %e,
                    "Item failed on retry"
                );
            }
            slot.fill(result);
        }
    }

    /// Run one encode call on a blocking thread. Returns the texts alongside
    /// the result so a failed batch can be retried.
    async fn encode(&mut self, texts: Vec<String>) -> (Vec<String>, EncodeOutput) {
        let Some(mut model) = self.model.take() else {
            let err = InferenceError::ModelNotLoaded(self.model_name.clone());
            return (texts, Err(err));
        };

        let joined = tokio::task::spawn_blocking(move || {
            let result = model.encode(&texts);
            (model, texts, result)
        })
        .await;

        match joined {
            Ok((model, texts, result)) => {
                self.model = Some(model);
                (texts, result)
            }
            Err(e) => {
                error!(error = %e, "Model call panicked");
                let err = InferenceError::ModelNotLoaded(format!("model call panicked: {e}"));
                (Vec::new(), Err(err))
            }
        }
    }

    fn set_state(&self, state: SchedulerState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            debug!(from = ?previous, to = ?state, "Scheduler state");
        }
    }
}

/// The model contract requires exactly one vector per input.
fn check_output(result: EncodeOutput, expected: usize) -> EncodeOutput {
    let vectors = result?;
    if vectors.len() != expected {
        return Err(InferenceError::OutputMismatch {
            expected,
            got: vectors.len(),
        });
    }
    Ok(vectors)
}

impl SchedulerHandle {
    /// Receiver for observing state transitions (readiness probes).
    pub fn subscribe(&self) -> watch::Receiver<SchedulerState> {
        self.state.clone()
    }

    /// Stop accepting work, fail everything still queued with
    /// [`EmbedError::ServiceStopping`] and wait for the loop to exit.
    ///
    /// A batch that is already encoding completes and delivers its vectors.
    pub async fn shutdown(self) {
        info!("Scheduler shutdown requested");
        self.accumulator.shutdown();

        if let Err(e) = self.join.await {
            error!(error = %e, "Scheduler task failed");
            for batch in self.accumulator.drain() {
                batch.fail_all(EmbedError::ServiceStopping);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accumulator::AccumulatorLimits;
    use crate::pending::{PendingItem, ResultWaiter};
    use crate::testing::{vector_for, RecordingModel, ShortModel, POISON};
    use std::time::Duration;
    use uuid::Uuid;

    fn accumulator(max_batch_size: usize, wait_ms: u64) -> Arc<BatchAccumulator> {
        Arc::new(BatchAccumulator::new(AccumulatorLimits {
            max_batch_size,
            max_batch_wait: Duration::from_millis(wait_ms),
            max_pending_items: 0,
        }))
    }

    fn submit(acc: &BatchAccumulator, texts: &[&str]) -> Vec<ResultWaiter> {
        let request_id = Uuid::new_v4();
        let mut waiters = Vec::new();
        let items = texts
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let (item, waiter) = PendingItem::new(request_id, i, t.to_string());
                waiters.push(waiter);
                item
            })
            .collect();
        acc.submit_many(items).unwrap();
        waiters
    }

    async fn wait_all(waiters: Vec<ResultWaiter>) -> Vec<Result<Vec<f32>, EmbedError>> {
        let mut out = Vec::new();
        for w in waiters {
            out.push(w.wait().await);
        }
        out
    }

    #[tokio::test]
    async fn test_results_follow_input_order() {
        let acc = accumulator(8, 5);
        let (model, calls) = RecordingModel::new();
        let handle = Scheduler::spawn(model, acc.clone(), SchedulerOptions::default());

        let results = wait_all(submit(&acc, &["c", "a", "b"])).await;
        let expected: Vec<_> = ["c", "a", "b"].iter().map(|t| Ok(vector_for(t))).collect();
        assert_eq!(results, expected);
        assert_eq!(*calls.lock(), vec![3]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_no_call_exceeds_max_batch_size() {
        let acc = accumulator(4, 20);
        let (model, calls) = RecordingModel::new();
        let handle = Scheduler::spawn(model, acc.clone(), SchedulerOptions::default());

        let mut waiters = Vec::new();
        for i in 0..6 {
            waiters.extend(submit(&acc, &[&format!("t{i}")]));
        }
        for result in wait_all(waiters).await {
            assert!(result.is_ok());
        }

        let calls = calls.lock().clone();
        assert!(calls.len() >= 2, "expected at least 2 dispatches: {calls:?}");
        assert!(calls.iter().all(|&n| n <= 4));
        assert_eq!(calls.iter().sum::<usize>(), 6);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_failure_fails_whole_batch_only() {
        let acc = accumulator(2, 1_000);
        let (model, _calls) = RecordingModel::new();
        let handle = Scheduler::spawn(model, acc.clone(), SchedulerOptions::default());

        // Two full batches: the first poisoned, the second healthy.
        let bad = submit(&acc, &["ok-1", POISON]);
        let good = submit(&acc, &["ok-2", "ok-3"]);

        for result in wait_all(bad).await {
            assert!(matches!(
                result,
                Err(EmbedError::Inference(InferenceError::InferenceFailure(_)))
            ));
        }
        for result in wait_all(good).await {
            assert!(result.is_ok());
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_single_item_retry_localizes_failure() {
        let acc = accumulator(3, 1_000);
        let (model, calls) = RecordingModel::new();
        let options = SchedulerOptions {
            retry_failed_items_individually: true,
            ..SchedulerOptions::default()
        };
        let handle = Scheduler::spawn(model, acc.clone(), options);

        let results = wait_all(submit(&acc, &["a", POISON, "b"])).await;
        assert_eq!(results[0], Ok(vector_for("a")));
        assert!(results[1].is_err());
        assert_eq!(results[2], Ok(vector_for("b")));
        assert_eq!(*calls.lock(), vec![3, 1, 1, 1]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_output_count_mismatch_is_inference_error() {
        let acc = accumulator(2, 1_000);
        let handle = Scheduler::spawn(ShortModel, acc.clone(), SchedulerOptions::default());

        for result in wait_all(submit(&acc, &["a", "b"])).await {
            assert_eq!(
                result,
                Err(EmbedError::Inference(InferenceError::OutputMismatch {
                    expected: 2,
                    got: 1
                }))
            );
        }

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_shutdown_fails_queued_items() {
        let acc = accumulator(100, 60_000);
        let (model, calls) = RecordingModel::new();
        let handle = Scheduler::spawn(model, acc.clone(), SchedulerOptions::default());

        let waiters = submit(&acc, &["a", "b", "c"]);
        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown().await;

        for result in wait_all(waiters).await {
            assert_eq!(result, Err(EmbedError::ServiceStopping));
        }
        assert!(calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_batch_completes_during_shutdown() {
        let acc = accumulator(1, 0);
        let (model, _calls) = RecordingModel::new();
        let model = model.with_delay(Duration::from_millis(100));
        let handle = Scheduler::spawn(model, acc.clone(), SchedulerOptions::default());
        let mut state = handle.subscribe();

        let waiters = submit(&acc, &["slow"]);
        state
            .wait_for(|s| *s == SchedulerState::Encoding)
            .await
            .unwrap();
        handle.shutdown().await;

        assert_eq!(wait_all(waiters).await, vec![Ok(vector_for("slow"))]);
        assert_eq!(*state.borrow(), SchedulerState::Stopped);
    }

    #[tokio::test]
    async fn test_model_panic_stops_scheduler() {
        let acc = accumulator(1, 0);
        let (model, _calls) = RecordingModel::new();
        let model = model.panicking_on("crash");
        let handle = Scheduler::spawn(model, acc.clone(), SchedulerOptions::default());
        let mut state = handle.subscribe();

        let crashed = submit(&acc, &["crash"]);
        assert!(matches!(
            wait_all(crashed).await[0],
            Err(EmbedError::Inference(InferenceError::ModelNotLoaded(_)))
        ));

        state
            .wait_for(|s| *s == SchedulerState::Stopped)
            .await
            .unwrap();
        assert!(acc.is_shut_down());
        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_idle_scheduler_pulls_partial_batch() {
        // A wait this long would stall the test if the batch were not pulled.
        let acc = accumulator(8, 60_000);
        let (model, calls) = RecordingModel::new();
        let options = SchedulerOptions {
            dispatch_when_idle: true,
            ..SchedulerOptions::default()
        };
        let handle = Scheduler::spawn(model, acc.clone(), options);

        let results = tokio::time::timeout(
            Duration::from_secs(2),
            wait_all(submit(&acc, &["x", "y"])),
        )
        .await
        .expect("idle scheduler should not wait for the batch deadline");
        assert_eq!(results, vec![Ok(vector_for("x")), Ok(vector_for("y"))]);
        assert_eq!(*calls.lock(), vec![2]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_busy_scheduler_still_batches_when_pulling() {
        let acc = accumulator(8, 60_000);
        let (model, calls) = RecordingModel::new();
        let model = model.with_delay(Duration::from_millis(100));
        let options = SchedulerOptions {
            dispatch_when_idle: true,
            ..SchedulerOptions::default()
        };
        let handle = Scheduler::spawn(model, acc.clone(), options);
        let mut state = handle.subscribe();

        let first = submit(&acc, &["first"]);
        state
            .wait_for(|s| *s == SchedulerState::Encoding)
            .await
            .unwrap();
        // These arrive while the model is busy and share the next call.
        let mut rest = submit(&acc, &["a"]);
        rest.extend(submit(&acc, &["b"]));
        rest.extend(submit(&acc, &["c"]));

        assert!(wait_all(first).await[0].is_ok());
        for result in wait_all(rest).await {
            assert!(result.is_ok());
        }
        assert_eq!(*calls.lock(), vec![1, 3]);

        handle.shutdown().await;
    }

    #[tokio::test]
    async fn test_abandoned_caller_does_not_block_others() {
        let acc = accumulator(2, 1_000);
        let (model, _calls) = RecordingModel::new();
        let handle = Scheduler::spawn(model, acc.clone(), SchedulerOptions::default());

        let abandoned = submit(&acc, &["gone"]);
        drop(abandoned);
        let kept = submit(&acc, &["kept"]);
        assert_eq!(wait_all(kept).await, vec![Ok(vector_for("kept"))]);

        handle.shutdown().await;
    }
}
