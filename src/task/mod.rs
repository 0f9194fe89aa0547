//! The task and progress reporting contract.
//!
//! Orchestrators report through [`TaskHandle`]s, never to a concrete
//! transport: a handle is a log/metric sink backed by `tracing` plus an
//! in-memory record that tests and callers can inspect. Progress is stored
//! as atomic hundredths of a percent and only ever moves forward, so
//! concurrent and out-of-order reporters cannot make it decrease.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use tracing::{error, info, warn};

pub type TaskId = u64;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Succeeded | TaskStatus::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

#[derive(Clone, Debug)]
pub struct TaskLogEntry {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug)]
struct TaskInner {
    id: TaskId,
    name: String,
    dataset_id: Option<u64>,
    group: String,
    status: Mutex<TaskStatus>,
    /// Hundredths of a percent; fetch_max keeps it monotonic.
    progress: AtomicU32,
    log: Mutex<Vec<TaskLogEntry>>,
}

/// A cloneable handle to one unit of reportable work.
#[derive(Clone, Debug)]
pub struct TaskHandle {
    inner: Arc<TaskInner>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.inner.id
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn dataset_id(&self) -> Option<u64> {
        self.inner.dataset_id
    }

    pub fn group(&self) -> &str {
        &self.inner.group
    }

    /// Set progress in percent. Values that would move progress backwards
    /// are ignored; values are clamped to [0, 100].
    pub fn set_progress(&self, percent: f32) {
        let clamped = percent.clamp(0.0, 100.0);
        let hundredths = (clamped * 100.0).round() as u32;
        self.inner.progress.fetch_max(hundredths, Ordering::AcqRel);
    }

    pub fn progress(&self) -> f32 {
        self.inner.progress.load(Ordering::Acquire) as f32 / 100.0
    }

    pub fn set_status(&self, status: TaskStatus) {
        let mut current = self.inner.status.lock().expect("task status poisoned");
        // terminal states are never reused
        if !current.is_terminal() {
            *current = status;
        }
    }

    pub fn status(&self) -> TaskStatus {
        *self.inner.status.lock().expect("task status poisoned")
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!(task = self.inner.id, "{message}");
        self.push(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        let message = message.into();
        warn!(task = self.inner.id, "{message}");
        self.push(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        error!(task = self.inner.id, "{message}");
        self.push(LogLevel::Error, message);
    }

    fn push(&self, level: LogLevel, message: String) {
        self.inner
            .log
            .lock()
            .expect("task log poisoned")
            .push(TaskLogEntry { level, message });
    }

    pub fn log(&self) -> Vec<TaskLogEntry> {
        self.inner.log.lock().expect("task log poisoned").clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|entry| entry.level == LogLevel::Warning)
            .map(|entry| entry.message)
            .collect()
    }
}

/// Creates tasks and keeps handles addressable by id.
#[derive(Debug, Default)]
pub struct TaskHub {
    next_id: AtomicU64,
    tasks: DashMap<TaskId, TaskHandle>,
}

impl TaskHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            tasks: DashMap::new(),
        }
    }

    pub fn new_task(
        &self,
        name: impl Into<String>,
        dataset_id: Option<u64>,
        group: impl Into<String>,
    ) -> TaskHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let handle = TaskHandle {
            inner: Arc::new(TaskInner {
                id,
                name: name.into(),
                dataset_id,
                group: group.into(),
                status: Mutex::new(TaskStatus::Pending),
                progress: AtomicU32::new(0),
                log: Mutex::new(Vec::new()),
            }),
        };
        self.tasks.insert(id, handle.clone());
        handle
    }

    pub fn get(&self, id: TaskId) -> Option<TaskHandle> {
        self.tasks.get(&id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Folds per-shard progress into one parent percentage.
///
/// Each shard owns a slot holding its fraction complete; the parent reads
/// `Σ fraction / slot_count × 100`. Slots only move forward, so the sum is
/// monotonic regardless of shard completion order, and the parent handle's
/// own fetch_max guards against interleaved writers.
#[derive(Debug)]
pub struct AggregateProgress {
    parent: TaskHandle,
    shares: Mutex<Vec<f32>>,
}

impl AggregateProgress {
    pub fn new(parent: TaskHandle, shard_count: usize) -> Arc<Self> {
        Arc::new(Self {
            parent,
            shares: Mutex::new(vec![0.0; shard_count.max(1)]),
        })
    }

    /// Record shard `index` as `fraction` complete (0.0..=1.0).
    pub fn update(&self, index: usize, fraction: f32) {
        let total = {
            let mut shares = self.shares.lock().expect("progress shares poisoned");
            if let Some(slot) = shares.get_mut(index) {
                *slot = slot.max(fraction.clamp(0.0, 1.0));
            }
            shares.iter().sum::<f32>() / shares.len() as f32 * 100.0
        };
        self.parent.set_progress(total);
        if total >= 100.0 {
            self.parent.set_status(TaskStatus::Succeeded);
        }
    }

    pub fn parent(&self) -> &TaskHandle {
        &self.parent
    }
}
