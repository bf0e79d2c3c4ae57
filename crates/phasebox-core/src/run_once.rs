//! Run-once barrier shared by every phase of a build
//!
//! The first caller performs the work while holding the lock; concurrent
//! callers wait on the lock and then observe the recorded outcome. A failed
//! attempt is remembered and never retried, so later phases fail fast with
//! the first cause instead of re-uploading a source that already broke.
//! An attempt that is cancelled midway records nothing, so the next caller
//! performs the work again.

use crate::StageError;
use std::future::Future;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Default)]
pub struct RunOnce {
    outcome: Mutex<Option<Result<(), String>>>,
    finished: Notify,
}

impl RunOnce {
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` unless it has already run
    ///
    /// Returns `Ok` when the work has completed successfully, whether here or
    /// in an earlier call.
    pub async fn run<F, Fut>(&self, f: F) -> Result<(), StageError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), StageError>>,
    {
        let mut outcome = self.outcome.lock().await;
        if let Some(recorded) = outcome.as_ref() {
            return recorded_result(recorded);
        }

        let result = f().await;
        *outcome = Some(result.as_ref().map(|_| ()).map_err(|e| e.to_string()));
        drop(outcome);
        self.finished.notify_waiters();
        result
    }

    /// Wait until some caller of [`RunOnce::run`] has finished the work,
    /// without ever performing it here
    pub async fn wait(&self) -> Result<(), StageError> {
        loop {
            let finished = self.finished.notified();
            tokio::pin!(finished);
            // Register before checking so a notification in between is kept
            finished.as_mut().enable();

            if let Some(recorded) = self.outcome.lock().await.as_ref() {
                return recorded_result(recorded);
            }
            finished.await;
        }
    }

    /// Whether the work has finished, successfully or not
    pub async fn is_done(&self) -> bool {
        self.outcome.lock().await.is_some()
    }
}

fn recorded_result(recorded: &Result<(), String>) -> Result<(), StageError> {
    match recorded {
        Ok(()) => Ok(()),
        Err(msg) => Err(StageError::PreviousAttemptFailed(msg.clone())),
    }
}
