//! `bulkscreen-engine` — the bulk job processing engine.
//!
//! ## Design
//!
//! - One [`Job`] per uploaded file, with a one-directional status machine
//!   (`Pending → Running → {Completed, Failed}`)
//! - The [`BulkJobRunner`] streams input rows through the row transformer,
//!   checkpointing progress into the [`JobStore`] at a fixed cadence
//! - Row-level screening failures are encoded into the output row; they
//!   never abort the batch
//! - The [`Reconciler`] fails jobs orphaned by an unclean shutdown, once
//!   per process, before any new job is accepted
//! - Job dispatch happens behind the [`JobDispatcher`] seam so the state
//!   machine stays independent of the concurrency transport

pub mod dispatch;
pub mod job;
pub mod reconciler;
pub mod runner;
pub mod store;
pub mod transformer;

pub use dispatch::{JobDispatcher, TokioDispatcher};
pub use job::{Job, JobStatus};
pub use reconciler::{ORPHANED_JOB_MESSAGE, Reconciler};
pub use runner::{BulkJobRunner, RunnerConfig};
pub use store::{InMemoryJobStore, JobStore, JobStoreError};
pub use transformer::{InputRecord, OutputRecord, RowTransformer};
