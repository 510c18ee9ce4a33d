//! Task records and lifecycle state.
//!
//! A record moves pending → running → completed|failed and never backward;
//! the `mark_*` methods enforce that ordering, so a terminal record can only
//! leave the store by janitor eviction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// One observed agent step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepEvent {
    /// 1-based step index.
    pub step: u32,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    /// Set on the single event appended when the agent terminates.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub terminal: Option<bool>,
}

/// Step counters plus the ordered event history.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskProgress {
    pub current_step: u32,
    pub total_steps: u32,
    pub steps: Vec<StepEvent>,
}

impl TaskProgress {
    /// Record one completed agent step. `total_steps` only ever grows, so
    /// `current_step <= total_steps` holds from the first observed step on.
    pub fn record_step(&mut self, step: u32, goal: Option<String>, now: DateTime<Utc>) {
        self.current_step = step;
        self.total_steps = self.total_steps.max(step);
        self.steps.push(StepEvent {
            step,
            time: now,
            goal,
            terminal: None,
        });
    }

    /// Append the terminal event without advancing the counters.
    pub fn record_done(&mut self, now: DateTime<Utc>) {
        self.steps.push(StepEvent {
            step: self.current_step + 1,
            time: now,
            goal: None,
            terminal: Some(true),
        });
    }
}

/// Normalized result of a completed task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub final_text: String,
    /// The agent's own success verdict, when it gave one.
    pub success: Option<bool>,
    pub has_errors: bool,
    pub errors: Vec<String>,
    pub urls_visited: Vec<String>,
    pub actions_performed: Vec<String>,
    pub extracted_content: Value,
    pub steps_taken: u64,
}

/// One browser-automation job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: Uuid,
    pub status: TaskStatus,
    pub url: String,
    pub action: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<TaskProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<TaskResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl TaskRecord {
    pub fn new(id: Uuid, url: String, action: String) -> Self {
        Self {
            id,
            status: TaskStatus::Pending,
            url,
            action,
            created_at: Utc::now(),
            start_time: None,
            end_time: None,
            progress: None,
            result: None,
            error: None,
            trace: None,
        }
    }

    /// Enter the running state. A no-op unless the record is still pending.
    pub fn mark_running(&mut self, now: DateTime<Utc>) {
        if self.status != TaskStatus::Pending {
            tracing::warn!("Task {}: ignoring running transition from {:?}", self.id, self.status);
            return;
        }
        self.status = TaskStatus::Running;
        self.start_time = Some(now);
        self.progress = Some(TaskProgress::default());
    }

    /// Finish successfully. A no-op if the record is already terminal.
    pub fn mark_completed(&mut self, result: TaskResult, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            tracing::warn!("Task {}: ignoring completed transition from {:?}", self.id, self.status);
            return;
        }
        self.status = TaskStatus::Completed;
        self.end_time = Some(now);
        self.result = Some(result);
    }

    /// Finish with an error. A no-op if the record is already terminal.
    pub fn mark_failed(&mut self, error: String, trace: Option<String>, now: DateTime<Utc>) {
        if self.status.is_terminal() {
            tracing::warn!("Task {}: ignoring failed transition from {:?}", self.id, self.status);
            return;
        }
        self.status = TaskStatus::Failed;
        self.end_time = Some(now);
        self.error = Some(error);
        self.trace = trace;
    }
}
