use crate::error::LabError;
use crate::observability::EventSink;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::{AbortHandle, JoinSet};

/// Terminal state of one task submitted to a [`TaskGroup`].
#[derive(Debug)]
pub enum TaskOutcome<T> {
    Succeeded(T),
    Failed(LabError),
    Cancelled,
}

#[derive(Debug)]
pub struct CompletedTask<T> {
    pub name: String,
    pub outcome: TaskOutcome<T>,
}

impl<T> CompletedTask<T> {
    pub fn succeeded(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Succeeded(_))
    }

    pub fn failed(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Failed(_))
    }

    pub fn cancelled(&self) -> bool {
        matches!(self.outcome, TaskOutcome::Cancelled)
    }
}

/// A fail-soft group of concurrent operations under a shared concurrency cap.
///
/// Submissions past the cap queue on the semaphore inside their task, so at
/// most `limit` operations execute at once no matter how bursty submission
/// is. One task failing never aborts its siblings; `join_all` waits for every
/// task to reach a terminal state and returns the full outcome list. The
/// shutdown signal handed in at construction aborts in-flight tasks, which
/// are then recorded as `Cancelled`, not `Failed`.
pub struct TaskGroup<T> {
    semaphore: Arc<Semaphore>,
    tasks: JoinSet<Result<T, LabError>>,
    names: HashMap<tokio::task::Id, String>,
    sink: Arc<dyn EventSink>,
    shutdown: watch::Receiver<bool>,
}

impl<T: Send + 'static> TaskGroup<T> {
    pub fn new(limit: usize, sink: Arc<dyn EventSink>, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            tasks: JoinSet::new(),
            names: HashMap::new(),
            sink,
            shutdown,
        }
    }

    /// Submit one operation under `name`. The returned handle can abort this
    /// task alone; group-wide cancellation goes through the shutdown signal.
    pub fn spawn<F>(&mut self, name: impl Into<String>, future: F) -> AbortHandle
    where
        F: Future<Output = Result<T, LabError>> + Send + 'static,
    {
        let name = name.into();
        let semaphore = Arc::clone(&self.semaphore);
        let sink = Arc::clone(&self.sink);
        let task_name = name.clone();
        let handle = self.tasks.spawn(async move {
            let _permit = match semaphore.acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return Err(LabError::Cancelled),
            };
            sink.task_started(&task_name);
            future.await
        });
        self.names.insert(handle.id(), name);
        handle
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Drain the group: wait for every submitted task to reach a terminal
    /// state and return the outcomes in completion order.
    pub async fn join_all(mut self) -> Vec<CompletedTask<T>> {
        let mut completed = Vec::with_capacity(self.names.len());
        let mut aborted = *self.shutdown.borrow();
        if aborted {
            self.tasks.abort_all();
        }
        loop {
            tokio::select! {
                joined = self.tasks.join_next_with_id() => {
                    let Some(joined) = joined else { break };
                    let (id, outcome) = match joined {
                        Ok((id, Ok(value))) => (id, TaskOutcome::Succeeded(value)),
                        Ok((id, Err(LabError::Cancelled))) => (id, TaskOutcome::Cancelled),
                        Ok((id, Err(error))) => (id, TaskOutcome::Failed(error)),
                        Err(join_error) => {
                            let id = join_error.id();
                            if join_error.is_cancelled() {
                                (id, TaskOutcome::Cancelled)
                            } else {
                                (id, TaskOutcome::Failed(LabError::Panicked(join_error.to_string())))
                            }
                        }
                    };
                    let name = self.names.remove(&id).unwrap_or_default();
                    match &outcome {
                        TaskOutcome::Succeeded(_) => self.sink.task_succeeded(&name),
                        TaskOutcome::Failed(error) => self.sink.task_failed(&name, error),
                        TaskOutcome::Cancelled => self.sink.task_cancelled(&name),
                    }
                    completed.push(CompletedTask { name, outcome });
                }
                changed = self.shutdown.wait_for(|stop| *stop), if !aborted => {
                    aborted = true;
                    if changed.is_ok() {
                        self.tasks.abort_all();
                    }
                }
            }
        }
        completed
    }
}
