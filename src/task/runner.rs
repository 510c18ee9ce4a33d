//! Task execution.
//!
//! One runner invocation drives one task from pending to a terminal state.
//! The runner owns the session lifecycle around the agent run and reports
//! every outcome, success or failure, by writing to the task record; nothing
//! escapes its boundary.

use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use thiserror::Error;
use uuid::Uuid;

use crate::agent::{
    Agent, AgentStep, BrowserHandle, BrowserProfile, ContextHandle, RunObserver, RunSummary,
    SessionFactory,
};
use super::record::TaskResult;
use super::store::TaskStore;

/// Rejections from the result adapter.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("agent reported a failed result: {0}")]
    FailedResult(String),
}

/// Drives tasks to completion against the external collaborators.
pub struct TaskRunner {
    store: Arc<TaskStore>,
    sessions: Arc<dyn SessionFactory>,
    agent: Arc<dyn Agent>,
    profile: BrowserProfile,
    max_steps: u32,
}

/// Session resources held by one task, in acquisition order. Cleanup takes
/// whatever is present, so a partially acquired session releases exactly the
/// handles that exist.
#[derive(Default)]
struct SessionResources {
    browser: Option<Box<dyn BrowserHandle>>,
    context: Option<Box<dyn ContextHandle>>,
}

impl SessionResources {
    /// Release context before browser. Failures are logged only; the task's
    /// terminal status is already decided by the time this runs.
    async fn release(&mut self, task_id: Uuid) {
        let mut clean = true;
        if let Some(context) = self.context.take() {
            if let Err(e) = context.close().await {
                clean = false;
                tracing::error!("Error closing context for task {}: {:#}", task_id, e);
            }
        }
        if let Some(browser) = self.browser.take() {
            if let Err(e) = browser.close().await {
                clean = false;
                tracing::error!("Error closing browser for task {}: {:#}", task_id, e);
            }
        }
        if clean {
            tracing::info!("Browser resources for task {} cleaned up", task_id);
        }
    }
}

impl TaskRunner {
    pub fn new(
        store: Arc<TaskStore>,
        sessions: Arc<dyn SessionFactory>,
        agent: Arc<dyn Agent>,
        profile: BrowserProfile,
        max_steps: u32,
    ) -> Self {
        Self {
            store,
            sessions,
            agent,
            profile,
            max_steps,
        }
    }

    /// Run one task to its terminal state. Never returns an error: every
    /// failure ends up on the task record instead.
    pub async fn run(&self, id: Uuid, url: String, action: String) {
        let mut session = SessionResources::default();
        let outcome = self.execute(id, &url, &action, &mut session).await;

        let now = Utc::now();
        let write = match outcome {
            Ok(result) => {
                self.store
                    .update(id, move |record| record.mark_completed(result, now))
                    .await
            }
            Err(error) => {
                tracing::error!("Task {} failed: {:#}", id, error);
                let message = format!("{:#}", error);
                let trace = format!("{:?}", error);
                self.store
                    .update(id, move |record| record.mark_failed(message, Some(trace), now))
                    .await
            }
        };
        if let Err(e) = write {
            tracing::error!("Task {}: could not record outcome: {}", id, e);
        }

        session.release(id).await;
    }

    async fn execute(
        &self,
        id: Uuid,
        url: &str,
        action: &str,
        session: &mut SessionResources,
    ) -> anyhow::Result<TaskResult> {
        let now = Utc::now();
        self.store
            .update(id, move |record| record.mark_running(now))
            .await
            .context("task record missing at start")?;

        let browser = self
            .sessions
            .launch_browser(&self.profile)
            .await
            .context("session creation failed")?;
        let browser = session.browser.insert(browser);
        let context = self
            .sessions
            .open_context(browser.as_ref(), &self.profile)
            .await
            .context("session creation failed")?;
        let context = session.context.insert(context);

        let observer = ProgressObserver {
            store: Arc::clone(&self.store),
            task_id: id,
        };
        let instruction = format!("First, navigate to {}. Then, {}", url, action);
        let report = self
            .agent
            .run(&instruction, context.as_ref(), self.max_steps, &observer)
            .await
            .context("agent execution failed")?;

        normalize_report(&report).context("result extraction failed")
    }
}

/// Feeds agent progress callbacks into the task record.
pub struct ProgressObserver {
    store: Arc<TaskStore>,
    task_id: Uuid,
}

impl ProgressObserver {
    pub fn new(store: Arc<TaskStore>, task_id: Uuid) -> Self {
        Self { store, task_id }
    }
}

#[async_trait]
impl RunObserver for ProgressObserver {
    async fn on_step(&self, step: AgentStep) {
        let AgentStep { number, goal } = step;
        let now = Utc::now();
        let written = self
            .store
            .update(self.task_id, move |record| {
                if let Some(progress) = record.progress.as_mut() {
                    progress.record_step(number, goal, now);
                }
            })
            .await;
        match written {
            Ok(()) => tracing::info!("Task {}: step {} completed", self.task_id, number),
            Err(e) => tracing::warn!("Task {}: dropping step update: {}", self.task_id, e),
        }
    }

    async fn on_done(&self, summary: RunSummary) {
        tracing::info!(
            "Task {}: agent finished after {} steps",
            self.task_id,
            summary.steps_taken
        );
        let now = Utc::now();
        let written = self
            .store
            .update(self.task_id, move |record| {
                if let Some(progress) = record.progress.as_mut() {
                    progress.record_done(now);
                }
            })
            .await;
        if let Err(e) = written {
            tracing::warn!("Task {}: dropping done marker: {}", self.task_id, e);
        }
    }
}

/// Map the agent's raw report onto the internal result record.
///
/// This is the only place allowed to tolerate missing or oddly-shaped
/// fields. A structured `final_result` carrying a non-ok `status` is the one
/// shape that rejects: the agent itself marked the outcome invalid.
pub fn normalize_report(report: &Value) -> Result<TaskResult, ReportError> {
    let final_text = match report.get("final_result") {
        Some(Value::Object(map)) => {
            if let Some(status) = map.get("status").and_then(Value::as_str) {
                if status != "ok" {
                    let detail = map
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or(status);
                    return Err(ReportError::FailedResult(detail.to_string()));
                }
            }
            match map.get("text") {
                Some(Value::String(text)) => text.clone(),
                Some(other) => other.to_string(),
                None => Value::Object(map.clone()).to_string(),
            }
        }
        Some(Value::String(text)) => text.clone(),
        None | Some(Value::Null) => "No final result available".to_string(),
        Some(other) => other.to_string(),
    };

    Ok(TaskResult {
        final_text,
        success: report.get("success").and_then(Value::as_bool),
        has_errors: report
            .get("has_errors")
            .and_then(Value::as_bool)
            .unwrap_or(false),
        errors: string_list(report.get("errors")),
        urls_visited: string_list(report.get("urls_visited")),
        actions_performed: string_list(report.get("action_names")),
        extracted_content: report
            .get("extracted_content")
            .cloned()
            .unwrap_or(Value::Null),
        steps_taken: report
            .get("steps_taken")
            .and_then(Value::as_u64)
            .unwrap_or(0),
    })
}

/// Collect an array into non-empty strings, stringifying other scalars and
/// dropping nulls, the same filtering the upstream history accessors apply.
fn string_list(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) if !s.is_empty() => Some(s.clone()),
                    Value::String(_) | Value::Null => None,
                    other => Some(other.to_string()),
                })
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::testing::{MockAgent, MockFactory};
    use crate::task::record::{TaskRecord, TaskStatus};
    use serde_json::json;
    use std::sync::atomic::Ordering;

    fn profile() -> BrowserProfile {
        BrowserProfile {
            window_width: 1280,
            window_height: 1100,
            locale: "en-US".to_string(),
            user_agent: "test-agent".to_string(),
            browser_args: vec![],
            chrome_path: None,
        }
    }

    fn report() -> Value {
        json!({
            "final_result": "Found the pricing link",
            "success": true,
            "has_errors": false,
            "errors": [],
            "urls_visited": ["https://example.com", "https://example.com/pricing"],
            "action_names": ["navigate", "click"],
            "extracted_content": ["Pricing"],
            "steps_taken": 2,
        })
    }

    async fn run_task(
        factory: MockFactory,
        agent: MockAgent,
    ) -> (Arc<TaskStore>, TaskRecord, Vec<String>) {
        let store = Arc::new(TaskStore::new());
        let log = Arc::clone(&factory.log);
        let id = Uuid::new_v4();
        store
            .create(TaskRecord::new(
                id,
                "https://example.com".to_string(),
                "find the pricing link".to_string(),
            ))
            .await
            .unwrap();

        let runner = TaskRunner::new(
            Arc::clone(&store),
            Arc::new(factory),
            Arc::new(agent),
            profile(),
            10,
        );
        runner
            .run(id, "https://example.com".to_string(), "find the pricing link".to_string())
            .await;

        let record = store.snapshot(id).await.unwrap();
        let calls = log.lock().unwrap().clone();
        (store, record, calls)
    }

    #[tokio::test]
    async fn successful_run_completes_the_record() {
        let (_, record, calls) = run_task(
            MockFactory::default(),
            MockAgent::succeeding(report()),
        )
        .await;

        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.start_time.is_some());
        assert!(record.end_time.is_some());
        assert!(record.error.is_none());

        let result = record.result.expect("completed record carries a result");
        assert_eq!(result.final_text, "Found the pricing link");
        assert_eq!(result.success, Some(true));
        assert_eq!(result.urls_visited.len(), 2);

        // Steps observed while running, terminal marker appended on done.
        let progress = record.progress.unwrap();
        assert_eq!(progress.current_step, 2);
        assert_eq!(progress.steps.last().unwrap().terminal, Some(true));

        assert_eq!(
            calls,
            vec!["browser.launch", "context.open", "context.close", "browser.close"]
        );
    }

    #[tokio::test]
    async fn browser_launch_failure_fails_fast() {
        let factory = MockFactory {
            fail_browser: true,
            ..Default::default()
        };
        let agent = MockAgent::succeeding(report());
        let invoked = Arc::clone(&agent.invoked);

        let (_, record, calls) = run_task(factory, agent).await;

        assert_eq!(record.status, TaskStatus::Failed);
        assert!(record.error.unwrap().contains("session creation failed"));
        assert!(record.trace.is_some());
        assert!(record.result.is_none());
        // No agent work and nothing to release.
        assert!(!invoked.load(Ordering::SeqCst));
        assert!(calls.is_empty());
    }

    #[tokio::test]
    async fn context_failure_releases_only_the_browser() {
        let factory = MockFactory {
            fail_context: true,
            ..Default::default()
        };
        let (_, record, calls) = run_task(factory, MockAgent::succeeding(report())).await;

        assert_eq!(record.status, TaskStatus::Failed);
        assert_eq!(calls, vec!["browser.launch", "browser.close"]);
    }

    #[tokio::test]
    async fn agent_failure_records_trace_and_releases_in_order() {
        let (_, record, calls) =
            run_task(MockFactory::default(), MockAgent::failing("tab crashed")).await;

        assert_eq!(record.status, TaskStatus::Failed);
        let error = record.error.unwrap();
        assert!(error.contains("agent execution failed"));
        assert!(error.contains("tab crashed"));
        assert!(record.trace.is_some());
        assert_eq!(
            calls,
            vec!["browser.launch", "context.open", "context.close", "browser.close"]
        );
    }

    #[tokio::test]
    async fn invalid_final_result_is_an_extraction_failure() {
        let report = json!({
            "final_result": {"status": "error", "error": "navigation blocked"},
            "steps_taken": 1,
        });
        let (_, record, _) =
            run_task(MockFactory::default(), MockAgent::succeeding(report)).await;

        assert_eq!(record.status, TaskStatus::Failed);
        let error = record.error.unwrap();
        assert!(error.contains("result extraction failed"));
        assert!(error.contains("navigation blocked"));
    }

    #[tokio::test]
    async fn cleanup_failure_never_changes_the_outcome() {
        let factory = MockFactory {
            fail_close: true,
            ..Default::default()
        };
        let (_, record, calls) = run_task(factory, MockAgent::succeeding(report())).await;

        assert_eq!(record.status, TaskStatus::Completed);
        assert_eq!(
            calls,
            vec!["browser.launch", "context.open", "context.close", "browser.close"]
        );
    }

    #[tokio::test]
    async fn observer_updates_progress_with_synthetic_steps() {
        let store = Arc::new(TaskStore::new());
        let id = Uuid::new_v4();
        store
            .create(TaskRecord::new(id, "https://example.com".to_string(), "go".to_string()))
            .await
            .unwrap();
        store
            .update(id, |record| record.mark_running(Utc::now()))
            .await
            .unwrap();

        let observer = ProgressObserver::new(Arc::clone(&store), id);
        observer
            .on_step(AgentStep {
                number: 1,
                goal: Some("open the page".to_string()),
            })
            .await;
        observer.on_step(AgentStep { number: 2, goal: None }).await;
        observer.on_done(RunSummary { steps_taken: 2 }).await;

        let record = store.snapshot(id).await.unwrap();
        // A task with observed steps can no longer be pending.
        assert_ne!(record.status, TaskStatus::Pending);
        let progress = record.progress.unwrap();
        assert_eq!(progress.current_step, 2);
        assert_eq!(progress.total_steps, 2);
        assert_eq!(progress.steps.len(), 3);
        assert_eq!(progress.steps[0].goal.as_deref(), Some("open the page"));
        assert_eq!(progress.steps[2].terminal, Some(true));
    }

    #[test]
    fn normalize_tolerates_an_empty_report() {
        let result = normalize_report(&json!({})).unwrap();
        assert_eq!(result.final_text, "No final result available");
        assert_eq!(result.success, None);
        assert!(!result.has_errors);
        assert!(result.errors.is_empty());
        assert_eq!(result.steps_taken, 0);
        assert_eq!(result.extracted_content, Value::Null);
    }

    #[test]
    fn normalize_extracts_structured_final_results() {
        let report = json!({
            "final_result": {"status": "ok", "text": "All done"},
            "errors": ["", "stale element", null],
            "steps_taken": 3,
        });
        let result = normalize_report(&report).unwrap();
        assert_eq!(result.final_text, "All done");
        assert_eq!(result.errors, vec!["stale element"]);
        assert_eq!(result.steps_taken, 3);
    }

    #[test]
    fn normalize_rejects_a_failed_validity_check() {
        let report = json!({
            "final_result": {"status": "timeout"},
        });
        let error = normalize_report(&report).unwrap_err();
        assert!(error.to_string().contains("timeout"));
    }

    #[test]
    fn normalize_stringifies_scalar_results() {
        let result = normalize_report(&json!({"final_result": 42})).unwrap();
        assert_eq!(result.final_text, "42");
    }
}
