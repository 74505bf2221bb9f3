//! Ownership of the long-running background loops.
//!
//! Each task is registered under a name with a factory that can build a
//! fresh instance of its future. When a task finishes, fails, or panics,
//! a [`TaskExit`] is reported on the supervisor's channel; the owner then
//! decides whether to [`restart`](Supervisor::restart) it.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{error, info, warn};

use crate::{PulseError, Result};

/// Builds a new instance of a task's future.
pub type TaskFactory = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// How a task ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitStatus {
    Completed,
    Failed(String),
    Panicked(String),
    Aborted,
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Failed(e) => write!(f, "failed: {e}"),
            Self::Panicked(msg) => write!(f, "panicked: {msg}"),
            Self::Aborted => write!(f, "aborted"),
        }
    }
}

/// Exit report of one task run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskExit {
    pub name: String,
    pub status: ExitStatus,
}

/// Named, restartable background tasks.
pub struct Supervisor {
    factories: HashMap<String, TaskFactory>,
    running: HashMap<String, AbortHandle>,
    exits_tx: mpsc::UnboundedSender<TaskExit>,
    exits_rx: mpsc::UnboundedReceiver<TaskExit>,
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl Supervisor {
    pub fn new() -> Self {
        let (exits_tx, exits_rx) = mpsc::unbounded_channel();
        Self {
            factories: HashMap::new(),
            running: HashMap::new(),
            exits_tx,
            exits_rx,
        }
    }

    /// Registers `factory` under `name` and starts it. A task already
    /// registered under that name is replaced.
    pub fn spawn<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> BoxFuture<'static, Result<()>> + Send + Sync + 'static,
    {
        if let Some(previous) = self.running.remove(name) {
            previous.abort();
        }
        self.factories.insert(name.to_string(), Arc::new(factory));
        self.start(name);
    }

    fn start(&mut self, name: &str) {
        let Some(factory) = self.factories.get(name) else {
            return;
        };
        let task = tokio::spawn(factory());
        self.running.insert(name.to_string(), task.abort_handle());
        info!(task = name, "Task started");

        let tx = self.exits_tx.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let status = match task.await {
                Ok(Ok(())) => ExitStatus::Completed,
                Ok(Err(e)) => ExitStatus::Failed(e.to_string()),
                Err(e) if e.is_panic() => ExitStatus::Panicked(panic_message(e.into_panic())),
                Err(_) => ExitStatus::Aborted,
            };
            // Receiver is gone only when the supervisor was dropped.
            let _ = tx.send(TaskExit { name, status });
        });
    }

    /// Waits for the next task exit and logs it.
    pub async fn next_exit(&mut self) -> Option<TaskExit> {
        let exit = self.exits_rx.recv().await?;
        match &exit.status {
            ExitStatus::Completed => info!(task = %exit.name, "Task completed"),
            ExitStatus::Aborted => info!(task = %exit.name, "Task aborted"),
            status => error!(task = %exit.name, %status, "Task exited abnormally"),
        }
        Some(exit)
    }

    /// Stops `name` if it is running and starts a fresh instance.
    ///
    /// # Errors
    ///
    /// Returns [`PulseError::Worker`] if no task is registered as `name`.
    pub fn restart(&mut self, name: &str) -> Result<()> {
        if !self.factories.contains_key(name) {
            return Err(PulseError::Worker(format!("no task named {name}")));
        }
        if let Some(handle) = self.running.remove(name) {
            handle.abort();
        }
        warn!(task = name, "Restarting task");
        self.start(name);
        Ok(())
    }

    /// Whether `name` is registered and its last run is still going.
    pub fn is_running(&self, name: &str) -> bool {
        self.running.get(name).is_some_and(|h| !h.is_finished())
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Aborts every running task.
    pub fn shutdown(&mut self) {
        for (name, handle) in self.running.drain() {
            handle.abort();
            info!(task = %name, "Task stopped");
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
