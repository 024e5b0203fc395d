//! The bounded async subprocess pool: the only place the scheduler touches
//! external processes.
//!
//! Workers run concurrently but never mutate scheduler state themselves —
//! results are deposited on an outbound channel and it is the main loop,
//! draining that channel on its own thread, that invokes the associated
//! callback. That split is load-bearing: it is what keeps every mutation of
//! the task pool, prerequisite engine, and related bookkeeping on one
//! logical thread.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, warn};

use super::command::{Category, Command, CommandResult, JobHandle};

/// Per-category concurrency caps. Defaults chosen so an avalanche of one
/// category cannot starve another.
#[derive(Debug, Clone)]
pub struct QosLimits {
    pub submission: usize,
    pub poll: usize,
    pub kill: usize,
    pub handler: usize,
    pub log_fetch: usize,
}

impl Default for QosLimits {
    fn default() -> Self {
        Self { submission: 10, poll: 10, kill: 5, handler: 5, log_fetch: 5 }
    }
}

struct CategorySemaphores {
    submission: Arc<Semaphore>,
    poll: Arc<Semaphore>,
    kill: Arc<Semaphore>,
    handler: Arc<Semaphore>,
    log_fetch: Arc<Semaphore>,
}

impl CategorySemaphores {
    fn new(limits: &QosLimits) -> Self {
        Self {
            submission: Arc::new(Semaphore::new(limits.submission)),
            poll: Arc::new(Semaphore::new(limits.poll)),
            kill: Arc::new(Semaphore::new(limits.kill)),
            handler: Arc::new(Semaphore::new(limits.handler)),
            log_fetch: Arc::new(Semaphore::new(limits.log_fetch)),
        }
    }

    fn get(&self, category: Category) -> Arc<Semaphore> {
        match category {
            Category::Submission => self.submission.clone(),
            Category::Poll => self.poll.clone(),
            Category::Kill => self.kill.clone(),
            Category::Handler => self.handler.clone(),
            Category::LogFetch => self.log_fetch.clone(),
        }
    }
}

/// Handle to the subprocess pool: cheaply cloned, safe to share with every
/// part of the scheduler that dispatches work.
#[derive(Clone)]
pub struct SubprocessPool {
    global: Arc<Semaphore>,
    categories: Arc<CategorySemaphores>,
    next_handle: Arc<AtomicU64>,
    results_tx: mpsc::Sender<CommandResult>,
    outstanding: Arc<Mutex<HashMap<JobHandle, tokio::task::JoinHandle<()>>>>,
}

impl SubprocessPool {
    /// `max_concurrent` bounds total in-flight commands across all
    /// categories; `limits` bounds each category individually.
    pub fn new(max_concurrent: usize, limits: QosLimits) -> (Self, mpsc::Receiver<CommandResult>) {
        let (results_tx, results_rx) = mpsc::channel(1024);
        let pool = Self {
            global: Arc::new(Semaphore::new(max_concurrent)),
            categories: Arc::new(CategorySemaphores::new(&limits)),
            next_handle: Arc::new(AtomicU64::new(1)),
            results_tx,
            outstanding: Arc::new(Mutex::new(HashMap::new())),
        };
        (pool, results_rx)
    }

    /// Dispatch `command`. Queues FIFO behind the global and per-category
    /// semaphores when the pool is saturated; never blocks the caller
    /// beyond spawning the worker task.
    pub fn submit(&self, command: Command) -> JobHandle {
        let handle = JobHandle(self.next_handle.fetch_add(1, Ordering::SeqCst));
        let global = self.global.clone();
        let category_sem = self.categories.get(command.category);
        let results_tx = self.results_tx.clone();
        let outstanding = self.outstanding.clone();

        let task = tokio::spawn(async move {
            let _global_permit = global.acquire_owned().await.expect("subprocess pool semaphore closed");
            let _category_permit = category_sem.acquire_owned().await.expect("subprocess pool semaphore closed");

            debug!(callback_id = %command.callback_id, argv = ?command.argv, "subprocess: dispatching");
            let result = run_one(handle, &command).await;
            if results_tx.send(result).await.is_err() {
                warn!(callback_id = %command.callback_id, "subprocess: main loop inbound channel closed, dropping result");
            }
            outstanding.lock().expect("outstanding map poisoned").remove(&handle);
        });

        self.outstanding.lock().expect("outstanding map poisoned").insert(handle, task);
        handle
    }

    /// Await outstanding commands with bounded grace, then abort whatever
    /// remains. Called on scheduler shutdown.
    pub async fn drain(&self, grace: std::time::Duration) {
        let deadline = tokio::time::sleep(grace);
        tokio::pin!(deadline);
        loop {
            let remaining = self.outstanding.lock().expect("outstanding map poisoned").len();
            if remaining == 0 {
                return;
            }
            tokio::select! {
                _ = &mut deadline => {
                    let mut guard = self.outstanding.lock().expect("outstanding map poisoned");
                    for (_, task) in guard.drain() {
                        task.abort();
                    }
                    return;
                }
                _ = tokio::time::sleep(std::time::Duration::from_millis(50)) => {}
            }
        }
    }
}

async fn run_one(handle: JobHandle, command: &Command) -> CommandResult {
    let start = Instant::now();
    let mut builder = tokio::process::Command::new(&command.argv[0]);
    builder.args(&command.argv[1..]);
    for (k, v) in &command.environment {
        builder.env(k, v);
    }
    if let Some(dir) = &command.working_dir {
        builder.current_dir(dir);
    }
    builder.stdin(std::process::Stdio::piped());
    builder.stdout(std::process::Stdio::piped());
    builder.stderr(std::process::Stdio::piped());

    let spawn_and_run = async {
        let mut child = builder.spawn()?;
        if let Some(input) = &command.stdin {
            use tokio::io::AsyncWriteExt;
            if let Some(mut stdin) = child.stdin.take() {
                stdin.write_all(input.as_bytes()).await?;
            }
        }
        child.wait_with_output().await
    };

    match tokio::time::timeout(command.soft_timeout, spawn_and_run).await {
        Ok(Ok(output)) => CommandResult {
            handle,
            callback_id: command.callback_id.clone(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            elapsed: start.elapsed(),
            timed_out: false,
        },
        Ok(Err(e)) => CommandResult {
            handle,
            callback_id: command.callback_id.clone(),
            exit_code: None,
            stdout: String::new(),
            stderr: format!("failed to execute command: {e}"),
            elapsed: start.elapsed(),
            timed_out: false,
        },
        Err(_) => CommandResult {
            handle,
            callback_id: command.callback_id.clone(),
            exit_code: None,
            stdout: String::new(),
            stderr: "command timed out".to_string(),
            elapsed: start.elapsed(),
            timed_out: true,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_submit_basic_success() {
        let (pool, mut results) = SubprocessPool::new(4, QosLimits::default());
        let cmd = Command::new(Category::Submission, vec!["echo".into(), "hello".into()], "cb-1");
        pool.submit(cmd);

        let result = results.recv().await.unwrap();
        assert!(result.succeeded());
        assert!(result.stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_submit_timeout() {
        let (pool, mut results) = SubprocessPool::new(4, QosLimits::default());
        let mut cmd = Command::new(Category::Submission, vec!["sleep".into(), "2".into()], "cb-2");
        cmd.soft_timeout = std::time::Duration::from_millis(50);
        pool.submit(cmd);

        let result = results.recv().await.unwrap();
        assert!(result.timed_out);
        assert!(!result.succeeded());
    }

    #[tokio::test]
    async fn test_submit_nonzero_exit() {
        let (pool, mut results) = SubprocessPool::new(4, QosLimits::default());
        let cmd = Command::new(Category::Submission, vec!["false".into()], "cb-3");
        pool.submit(cmd);

        let result = results.recv().await.unwrap();
        assert_eq!(result.exit_code, Some(1));
        assert!(!result.succeeded());
    }
}
