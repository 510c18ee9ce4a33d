//! Automation bridge client.
//!
//! Talks to the external browser-automation service over HTTP: browsers and
//! contexts are created and torn down with plain REST calls, and an agent run
//! is a single POST whose response body is a server-sent event stream of
//! `step` events terminated by one `done` (or `error`) event.

use anyhow::Context as _;
use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde_json::{json, Value};

use super::{
    Agent, AgentStep, BrowserHandle, BrowserProfile, ContextHandle, RunObserver, RunSummary,
    SessionFactory,
};
use crate::llm::ModelConfig;

/// Client for the automation bridge, implementing both the session factory
/// and the agent side of the boundary.
#[derive(Clone)]
pub struct BrowserBridge {
    base_url: String,
    client: reqwest::Client,
    model: ModelConfig,
}

impl BrowserBridge {
    pub fn new(base_url: impl Into<String>, model: ModelConfig) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        Self {
            base_url,
            client: reqwest::Client::new(),
            model,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn delete(&self, url: &str) -> anyhow::Result<()> {
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .with_context(|| format!("Failed to call bridge DELETE {}", url))?;
        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("bridge DELETE {} failed: {} - {}", url, status, text);
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct CreatedResource {
    id: String,
}

struct BridgeBrowser {
    id: String,
    bridge: BrowserBridge,
}

#[async_trait]
impl BrowserHandle for BridgeBrowser {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> anyhow::Result<()> {
        let url = format!("{}/browsers/{}", self.bridge.base_url, self.id);
        self.bridge.delete(&url).await
    }
}

struct BridgeContext {
    id: String,
    browser_id: String,
    bridge: BrowserBridge,
}

#[async_trait]
impl ContextHandle for BridgeContext {
    fn id(&self) -> &str {
        &self.id
    }

    async fn close(&self) -> anyhow::Result<()> {
        let url = format!(
            "{}/browsers/{}/contexts/{}",
            self.bridge.base_url, self.browser_id, self.id
        );
        self.bridge.delete(&url).await
    }
}

#[async_trait]
impl SessionFactory for BrowserBridge {
    async fn launch_browser(
        &self,
        profile: &BrowserProfile,
    ) -> anyhow::Result<Box<dyn BrowserHandle>> {
        let url = format!("{}/browsers", self.base_url);
        let mut body = serde_json::Map::new();
        body.insert("args".to_string(), json!(profile.browser_args));
        if let Some(path) = &profile.chrome_path {
            body.insert("executable_path".to_string(), json!(path));
        }

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to call bridge POST /browsers")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("bridge /browsers failed: {} - {}", status, text);
        }

        let created: CreatedResource = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse bridge browser response: {}", text))?;
        Ok(Box::new(BridgeBrowser {
            id: created.id,
            bridge: self.clone(),
        }))
    }

    async fn open_context(
        &self,
        browser: &dyn BrowserHandle,
        profile: &BrowserProfile,
    ) -> anyhow::Result<Box<dyn ContextHandle>> {
        let url = format!("{}/browsers/{}/contexts", self.base_url, browser.id());
        let body = json!({
            "window": {
                "width": profile.window_width,
                "height": profile.window_height,
            },
            "locale": profile.locale,
            "user_agent": profile.user_agent,
        });

        let resp = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .context("Failed to call bridge POST /browsers/{id}/contexts")?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("bridge context creation failed: {} - {}", status, text);
        }

        let created: CreatedResource = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse bridge context response: {}", text))?;
        Ok(Box::new(BridgeContext {
            id: created.id,
            browser_id: browser.id().to_string(),
            bridge: self.clone(),
        }))
    }
}

#[async_trait]
impl Agent for BrowserBridge {
    async fn run(
        &self,
        instruction: &str,
        context: &dyn ContextHandle,
        max_steps: u32,
        observer: &dyn RunObserver,
    ) -> anyhow::Result<Value> {
        let url = format!("{}/agent/run", self.base_url);
        let body = json!({
            "context_id": context.id(),
            "instruction": instruction,
            "max_steps": max_steps,
            "model": self.model,
        });

        let resp = self
            .client
            .post(&url)
            .header("Accept", "text/event-stream")
            .json(&body)
            .send()
            .await
            .context("Failed to call bridge POST /agent/run")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("bridge /agent/run failed: {} - {}", status, text);
        }

        // Process complete SSE frames (terminated by a blank line) as chunks
        // arrive; a run always ends with a done or error event.
        let mut stream = resp.bytes_stream();
        let mut buffer = String::new();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.context("bridge event stream aborted")?;
            let Ok(text) = std::str::from_utf8(&chunk) else {
                continue;
            };
            buffer.push_str(text);

            while let Some(pos) = buffer.find("\n\n") {
                let frame = buffer[..pos].to_string();
                buffer = buffer[pos + 2..].to_string();

                match parse_run_event(&frame) {
                    Some(RunEvent::Step { number, goal }) => {
                        observer.on_step(AgentStep { number, goal }).await;
                    }
                    Some(RunEvent::Done {
                        steps_taken,
                        report,
                    }) => {
                        observer.on_done(RunSummary { steps_taken }).await;
                        return Ok(report);
                    }
                    Some(RunEvent::Error { message }) => {
                        anyhow::bail!("agent run failed: {}", message);
                    }
                    None => {}
                }
            }
        }

        anyhow::bail!("bridge event stream ended before a done event")
    }
}

/// Events carried on the agent run stream.
#[derive(Debug)]
enum RunEvent {
    Step { number: u32, goal: Option<String> },
    Done { steps_taken: u64, report: Value },
    Error { message: String },
}

/// Parse one SSE frame into a run event. Unknown event names and frames
/// without data (comments, keep-alives) yield `None`.
fn parse_run_event(frame: &str) -> Option<RunEvent> {
    let mut event_name = "message";
    let mut data = String::new();

    for line in frame.lines() {
        if let Some(rest) = line.strip_prefix("event:") {
            event_name = rest.trim();
        } else if let Some(rest) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim());
        }
    }

    if data.is_empty() {
        return None;
    }
    let value: Value = serde_json::from_str(&data).ok()?;

    match event_name {
        "step" => Some(RunEvent::Step {
            number: value.get("number").and_then(Value::as_u64).unwrap_or(0) as u32,
            goal: value
                .get("goal")
                .and_then(Value::as_str)
                .map(str::to_string),
        }),
        "done" => Some(RunEvent::Done {
            steps_taken: value
                .get("steps_taken")
                .and_then(Value::as_u64)
                .unwrap_or(0),
            report: value.get("report").cloned().unwrap_or(Value::Null),
        }),
        "error" => Some(RunEvent::Error {
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or("unknown bridge error")
                .to_string(),
        }),
        _ => None,
    }
}
