use std::future::Future;
use std::pin::Pin;

use tracing::debug;

use bulkscreen_core::JobId;

/// Boxed unit of background work owned by a dispatcher.
pub type JobFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Hands a job's execution to a background context.
///
/// The seam exists so HTTP handlers can return as soon as a job is
/// accepted; tests swap in an inline dispatcher to run jobs to
/// completion deterministically.
pub trait JobDispatcher: Send + Sync {
    fn dispatch(&self, job_id: JobId, work: JobFuture);
}

/// Spawns one detached tokio task per submitted job.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioDispatcher;

impl JobDispatcher for TokioDispatcher {
    fn dispatch(&self, job_id: JobId, work: JobFuture) {
        debug!(%job_id, "spawning background job task");
        tokio::spawn(work);
    }
}
