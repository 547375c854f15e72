//! Micro-batching core: many concurrent callers, one model.
//!
//! Callers go through [`EmbeddingService`], which splits each request into
//! [`PendingItem`]s and hands them to the [`BatchAccumulator`]. A single
//! [`Scheduler`] task owns the model, drains ready batches and writes every
//! result back into the item's [`ResultSlot`].

pub mod accumulator;
pub mod pending;
pub mod scheduler;
pub mod service;

#[cfg(test)]
pub(crate) mod testing;

pub use accumulator::{AccumulatorLimits, Batch, BatchAccumulator, TakeReady};
pub use pending::{PendingItem, ResultSlot, ResultWaiter, SlotResult};
pub use scheduler::{Scheduler, SchedulerHandle, SchedulerOptions, SchedulerState};
pub use service::EmbeddingService;
