//! Bounded dynamic worker-thread pool for cpu-bound requests.
//!
//! Tasks cross the boundary by value and come back the same way; the pool
//! never touches the writer. Idle workers park on a condvar, and a new thread
//! is spawned only when a task arrives while nothing is idle and the cap has
//! not been reached. A panicking handler is contained to its task.

use std::collections::VecDeque;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Condvar, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::oneshot;
use tracing::debug;

use crate::error::HostError;

/// One unit of cpu-bound work: the original request body plus its
/// correlation id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub message_id: String,
    pub payload: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResult {
    pub message_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskResult {
    pub fn ok(message_id: String, result: Value) -> Self {
        Self { message_id, result: Some(result), error: None }
    }

    pub fn failed(message_id: String, error: impl Into<String>) -> Self {
        Self { message_id, result: None, error: Some(error.into()) }
    }
}

pub type TaskHandler = Arc<dyn Fn(Task) -> TaskResult + Send + Sync>;

/// `(min, max)` thread counts: always two threads, capped at twice half the
/// machine (but never below four).
pub fn bounds() -> (usize, usize) {
    let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(2);
    (2, 2 * (cores / 2).max(2))
}

struct Job {
    task: Task,
    reply: oneshot::Sender<TaskResult>,
}

struct PoolQueue {
    jobs: VecDeque<Job>,
    idle: usize,
    total: usize,
    shutdown: bool,
}

struct PoolShared {
    queue: Mutex<PoolQueue>,
    condvar: Condvar,
    handler: TaskHandler,
    max: usize,
}

#[derive(Clone)]
pub struct WorkerPool {
    shared: Arc<PoolShared>,
}

impl WorkerPool {
    pub fn new(handler: TaskHandler) -> Self {
        let (min, max) = bounds();
        Self::with_bounds(handler, min, max)
    }

    pub fn with_bounds(handler: TaskHandler, min: usize, max: usize) -> Self {
        let shared = Arc::new(PoolShared {
            queue: Mutex::new(PoolQueue {
                jobs: VecDeque::new(),
                idle: 0,
                total: 0,
                shutdown: false,
            }),
            condvar: Condvar::new(),
            handler,
            max: max.max(min),
        });
        let pool = Self { shared };
        for _ in 0..min {
            pool.spawn_worker();
        }
        pool
    }

    /// Queues one task and waits for its result. Worker-side failures ride
    /// inside the returned [`TaskResult`].
    pub async fn execute(&self, task: Task) -> Result<TaskResult, HostError> {
        let (reply, rx) = oneshot::channel();
        {
            let mut queue = self.shared.queue.lock().unwrap();
            if queue.shutdown {
                return Err(HostError::implementation("worker pool is shut down"));
            }
            queue.jobs.push_back(Job { task, reply });
            if queue.idle == 0 && queue.total < self.shared.max {
                queue.total += 1;
                drop(queue);
                self.spawn_worker_counted();
            }
        }
        self.shared.condvar.notify_one();

        rx.await
            .map_err(|_| HostError::implementation("worker abandoned the task"))
    }

    pub fn shutdown(&self) {
        let mut queue = self.shared.queue.lock().unwrap();
        queue.shutdown = true;
        self.shared.condvar.notify_all();
    }

    fn spawn_worker(&self) {
        self.shared.queue.lock().unwrap().total += 1;
        self.spawn_worker_counted();
    }

    /// Caller has already accounted for this thread in `total`.
    fn spawn_worker_counted(&self) {
        let shared = Arc::clone(&self.shared);
        std::thread::spawn(move || worker_loop(shared));
    }
}

fn worker_loop(shared: Arc<PoolShared>) {
    loop {
        let job = {
            let mut queue = shared.queue.lock().unwrap();
            loop {
                if let Some(job) = queue.jobs.pop_front() {
                    break job;
                }
                if queue.shutdown {
                    queue.total -= 1;
                    return;
                }
                queue.idle += 1;
                queue = shared.condvar.wait(queue).unwrap();
                queue.idle -= 1;
            }
        };

        let message_id = job.task.message_id.clone();
        let result = match catch_unwind(AssertUnwindSafe(|| (shared.handler)(job.task))) {
            Ok(result) => result,
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| (*s).to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                debug!("worker task panicked: {reason}");
                TaskResult::failed(message_id, format!("task panicked: {reason}"))
            }
        };
        // receiver gone means the request was abandoned, nothing to do
        let _ = job.reply.send(result);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn echo_handler() -> TaskHandler {
        Arc::new(|task: Task| {
            TaskResult::ok(task.message_id.clone(), json!({"echo": task.payload}))
        })
    }

    #[tokio::test]
    async fn executes_and_replies() {
        let pool = WorkerPool::with_bounds(echo_handler(), 2, 4);
        let result = pool
            .execute(Task { message_id: "m1".into(), payload: json!(7) })
            .await
            .unwrap();
        assert_eq!(result.message_id, "m1");
        assert_eq!(result.result.unwrap()["echo"], 7);
        assert!(result.error.is_none());
        pool.shutdown();
    }

    #[tokio::test]
    async fn panic_is_contained_to_the_task() {
        let handler: TaskHandler = Arc::new(|task: Task| {
            if task.payload == json!("boom") {
                panic!("deliberate");
            }
            TaskResult::ok(task.message_id.clone(), task.payload)
        });
        let pool = WorkerPool::with_bounds(handler, 2, 4);

        let failed = pool
            .execute(Task { message_id: "bad".into(), payload: json!("boom") })
            .await
            .unwrap();
        assert!(failed.error.unwrap().contains("deliberate"));

        // pool still serves after the panic
        let ok = pool
            .execute(Task { message_id: "good".into(), payload: json!(1) })
            .await
            .unwrap();
        assert_eq!(ok.result.unwrap(), json!(1));
        pool.shutdown();
    }

    #[tokio::test]
    async fn many_concurrent_tasks_complete() {
        let pool = WorkerPool::with_bounds(echo_handler(), 2, 4);
        let mut handles = Vec::new();
        for i in 0..32 {
            let pool = pool.clone();
            handles.push(tokio::spawn(async move {
                pool.execute(Task { message_id: format!("m{i}"), payload: json!(i) }).await
            }));
        }
        for (i, handle) in handles.into_iter().enumerate() {
            let result = handle.await.unwrap().unwrap();
            assert_eq!(result.result.unwrap()["echo"], i);
        }
        pool.shutdown();
    }

    #[tokio::test]
    async fn rejects_after_shutdown() {
        let pool = WorkerPool::with_bounds(echo_handler(), 2, 4);
        pool.shutdown();
        let err = pool
            .execute(Task { message_id: "late".into(), payload: json!(0) })
            .await
            .unwrap_err();
        assert_eq!(err.error_type(), "PluginInvokeError");
    }

    #[test]
    fn bounds_respect_the_floor() {
        let (min, max) = bounds();
        assert_eq!(min, 2);
        assert!(max >= 4);
    }
}
