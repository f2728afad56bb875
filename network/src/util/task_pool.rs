use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Bounded set of detached background tasks.
///
/// Each task holds a permit for its whole lifetime, so at most `capacity`
/// tasks run at once. Tasks are dropped at their next await point once the
/// pool is cancelled.
pub(crate) struct TaskPool {
    permits: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl TaskPool {
    pub fn new(capacity: usize, cancel: CancellationToken) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity)),
            cancel,
        }
    }

    /// Waits for a free slot and spawns the task.
    pub async fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let permit = tokio::select! {
            permit = self.permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => return,
            },
            _ = self.cancel.cancelled() => return,
        };

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task => {}
                _ = cancel.cancelled() => {}
            }
            drop(permit);
        });
    }

    /// Spawns the task only if there is a free slot right now.
    pub fn try_spawn<F>(&self, task: F) -> bool
    where
        F: Future<Output = ()> + Send + 'static,
    {
        if self.cancel.is_cancelled() {
            return false;
        }
        let Ok(permit) = self.permits.clone().try_acquire_owned() else {
            return false;
        };

        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = task => {}
                _ = cancel.cancelled() => {}
            }
            drop(permit);
        });
        true
    }

    #[cfg(test)]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}
