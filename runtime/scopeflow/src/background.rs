use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tracing_log_error::log_error;

use crate::Error;

struct Task {
    name: String,
    future: BoxFuture<'static, Result<(), Error>>,
}

/// Work deferred until the request is over.
///
/// Providers get a handle via [`Dependencies::background_tasks`], endpoint handlers via
/// [`Resolved::background_tasks`]. All handles for the same request share the same queue.
///
/// Tasks are executed in the order they were added, after every scoped provider has been
/// torn down, when [`Completion::run_background_tasks`] is invoked.
///
/// [`Dependencies::background_tasks`]: crate::Dependencies::background_tasks
/// [`Resolved::background_tasks`]: crate::Resolved::background_tasks
/// [`Completion::run_background_tasks`]: crate::Completion::run_background_tasks
#[derive(Clone, Default)]
pub struct BackgroundTasks(Arc<Mutex<Vec<Task>>>);

impl BackgroundTasks {
    /// Enqueue a task.
    pub fn add<F, E>(&self, name: impl Into<String>, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let task = Task {
            name: name.into(),
            future: task.map(|r| r.map_err(Error::new)).boxed(),
        };
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(task);
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all pending tasks without running them.
    pub(crate) fn discard(&self) -> usize {
        let mut tasks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        let n_discarded = tasks.len();
        tasks.clear();
        n_discarded
    }

    /// Run all pending tasks, sequentially.
    ///
    /// A failing task is logged; it doesn't prevent the following ones from running.
    /// Returns the number of tasks that failed.
    pub(crate) async fn run(&self) -> usize {
        let tasks = std::mem::take(&mut *self.0.lock().unwrap_or_else(PoisonError::into_inner));
        let mut n_failed = 0;
        for Task { name, future } in tasks {
            if let Err(e) = future.await {
                n_failed += 1;
                log_error!(e, background_task = %name, "A background task failed");
            } else {
                tracing::debug!(background_task = %name, "Background task completed");
            }
        }
        n_failed
    }
}

impl std::fmt::Debug for BackgroundTasks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tasks = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        f.debug_list().entries(tasks.iter().map(|t| &t.name)).finish()
    }
}
