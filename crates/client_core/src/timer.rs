use std::time::Duration;

use futures::future::BoxFuture;
use tokio::task::JoinHandle;

/// Handle to a callback scheduled on a [`Timer`].
pub trait ScheduledTask: Send + Sync {
    /// Prevents the callback from starting. No effect once it has started.
    fn cancel(&self);
}

/// Delayed callback scheduling.
pub trait Timer: Send + Sync {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Box<dyn ScheduledTask>;
}

/// Timer backed by the tokio clock; honours `tokio::time::pause`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

struct TokioScheduledTask(JoinHandle<()>);

impl ScheduledTask for TokioScheduledTask {
    fn cancel(&self) {
        self.0.abort();
    }
}

impl Timer for TokioTimer {
    fn schedule(&self, delay: Duration, task: BoxFuture<'static, ()>) -> Box<dyn ScheduledTask> {
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Detached so a late cancel cannot abort work already started.
            tokio::spawn(task);
        });
        Box::new(TokioScheduledTask(handle))
    }
}
