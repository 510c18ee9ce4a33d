//! Tool and resource dispatch.
//!
//! Routes JSON-RPC calls onto the task store and runner. Only malformed
//! requests fail at the protocol level; every domain-level outcome, including
//! an unknown task id, travels back as ordinary data so polling clients
//! branch on payloads, not transport failures.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{json, Value};
use thiserror::Error;
use uuid::Uuid;

use super::protocol::{
    JsonRpcRequest, JsonRpcResponse, ResourceContents, ResourceDescriptor, ToolDefinition,
    ToolResult, INTERNAL_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND, PROTOCOL_VERSION,
};
use crate::config::Config;
use crate::task::{TaskRunner, TaskStatus, TaskStore, TaskRecord};

/// URI scheme under which finished tasks are exposed as resources.
pub const RESOURCE_PREFIX: &str = "resource://browser_task/";

/// Protocol-level failures; everything else is data.
#[derive(Debug, Error)]
pub enum RpcError {
    #[error("Missing required argument '{0}'")]
    MissingArgument(&'static str),
    #[error("Unknown tool: {0}")]
    UnknownTool(String),
    #[error("{0}")]
    Internal(String),
}

impl RpcError {
    fn code(&self) -> i32 {
        match self {
            RpcError::Internal(_) => INTERNAL_ERROR,
            _ => INVALID_PARAMS,
        }
    }
}

pub struct ToolDispatcher {
    config: Arc<Config>,
    store: Arc<TaskStore>,
    runner: Arc<TaskRunner>,
}

impl ToolDispatcher {
    pub fn new(config: Arc<Config>, store: Arc<TaskStore>, runner: Arc<TaskRunner>) -> Self {
        Self {
            config,
            store,
            runner,
        }
    }

    /// Route one request. Returns `None` for notifications, which take no
    /// response frame.
    pub async fn handle(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        match request.method.as_str() {
            "initialize" => Some(JsonRpcResponse::success(
                request.id,
                json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "serverInfo": {
                        "name": "browserd",
                        "version": env!("CARGO_PKG_VERSION"),
                    },
                    "capabilities": {
                        "tools": { "listChanged": false },
                        "resources": { "subscribe": false, "listChanged": false },
                    },
                }),
            )),
            "notifications/initialized" | "initialized" => None,
            "tools/list" => Some(JsonRpcResponse::success(
                request.id,
                json!({ "tools": self.list_tools() }),
            )),
            "tools/call" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let args = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                match self.call_tool(name, &args).await {
                    Ok(result) => Some(JsonRpcResponse::success(request.id, json!(result))),
                    Err(e) => Some(JsonRpcResponse::error(request.id, e.code(), e.to_string())),
                }
            }
            "resources/list" => Some(JsonRpcResponse::success(
                request.id,
                json!({ "resources": self.list_resources().await }),
            )),
            "resources/read" => {
                let uri = request
                    .params
                    .get("uri")
                    .and_then(Value::as_str)
                    .unwrap_or("");
                let contents = self.read_resource(uri).await;
                Some(JsonRpcResponse::success(
                    request.id,
                    json!({ "contents": [contents] }),
                ))
            }
            other => Some(JsonRpcResponse::error(
                request.id,
                METHOD_NOT_FOUND,
                format!("Method not found: {}", other),
            )),
        }
    }

    async fn call_tool(&self, name: &str, args: &Value) -> Result<ToolResult, RpcError> {
        match name {
            "browser_use" => self.start_task(args).await,
            "browser_get_result" => self.get_result(args).await,
            other => Err(RpcError::UnknownTool(other.to_string())),
        }
    }

    /// Start a task: create the pending record, spawn the runner detached,
    /// then answer according to the current patient mode.
    async fn start_task(&self, args: &Value) -> Result<ToolResult, RpcError> {
        let url = require_str(args, "url")?;
        let action = require_str(args, "action")?;

        let id = Uuid::new_v4();
        self.store
            .create(TaskRecord::new(id, url.clone(), action.clone()))
            .await
            // Unreachable with v4 ids, but never silently overwrite.
            .map_err(|e| RpcError::Internal(e.to_string()))?;

        let runner = Arc::clone(&self.runner);
        let handle = tokio::spawn(async move {
            runner.run(id, url, action).await;
        });
        self.store.register_worker(id, handle).await;

        if self.config.patient_mode() {
            return Ok(self.await_completion(id).await);
        }

        let estimated = self.config.estimated_task_seconds;
        Ok(ToolResult::json(&json!({
            "task_id": id,
            "status": "pending",
            "resource_uri": resource_uri(id),
            "message": format!(
                "Browser task started. Wait about {} seconds, then check the result \
                 with browser_get_result or the resource URI.",
                estimated
            ),
            "estimated_time": format!("{} seconds", estimated),
            "poll_interval_hint": self.config.poll_interval_seconds,
        })))
    }

    /// Patient mode: join the detached worker and return the terminal record.
    /// The runner already converts every failure into a failed record; a
    /// panic that still escapes it is caught here and force-written, so the
    /// tool call itself never fails for this reason.
    async fn await_completion(&self, id: Uuid) -> ToolResult {
        if let Some(Err(join_error)) = self.store.join_worker(id).await {
            tracing::error!("Error in patient mode execution for task {}: {}", id, join_error);
            let message = format!("task worker terminated abnormally: {}", join_error);
            let trace = format!("{:?}", join_error);
            let now = Utc::now();
            if let Err(e) = self
                .store
                .update(id, move |record| record.mark_failed(message, Some(trace), now))
                .await
            {
                tracing::error!("Task {}: could not record worker failure: {}", id, e);
            }
        }

        match self.store.snapshot(id).await {
            Some(record) => {
                if record.status == TaskStatus::Failed {
                    tracing::error!(
                        "Task {} failed: {}",
                        id,
                        record.error.as_deref().unwrap_or("Unknown error")
                    );
                }
                ToolResult::json(&record_json(&record))
            }
            // Only possible if the janitor already evicted the record.
            None => ToolResult::json(&json!({
                "error": "Task not found",
                "task_id": id,
            })),
        }
    }

    /// Return a task snapshot, enriched with polling guidance while it runs.
    /// The enrichment lives only on the serialized copy, never in the store.
    async fn get_result(&self, args: &Value) -> Result<ToolResult, RpcError> {
        let task_id = require_str(args, "task_id")?;

        let record = match Uuid::parse_str(&task_id) {
            Ok(id) => self.store.snapshot(id).await,
            Err(_) => None,
        };
        let Some(record) = record else {
            return Ok(ToolResult::json(&json!({
                "error": "Task not found",
                "task_id": task_id,
            })));
        };

        let mut payload = record_json(&record);
        if record.status == TaskStatus::Running {
            let current_step = record
                .progress
                .as_ref()
                .map(|p| p.current_step)
                .unwrap_or(0);
            let poll = self.config.poll_interval_seconds;
            let message = if current_step > 0 {
                format!(
                    "Task is running (step {}). Poll again in {} seconds.",
                    current_step, poll
                )
            } else {
                format!("Task is starting. Poll again in {} seconds.", poll)
            };
            if let Some(map) = payload.as_object_mut() {
                map.insert("message".to_string(), json!(message));
                map.insert("poll_interval_hint".to_string(), json!(poll));
            }
        }

        Ok(ToolResult::json(&payload))
    }

    /// Tool schemas. The descriptions flip with the patient flag, read here
    /// on every call, while the input schemas never change.
    fn list_tools(&self) -> Vec<ToolDefinition> {
        let patient = self.config.patient_mode();

        let browser_use_description = if patient {
            "Performs a browser action and returns the complete result directly \
             (patient mode active)"
        } else {
            "Performs a browser action and returns a task ID for async execution"
        };
        let get_result_description = if patient {
            "Gets the result of an asynchronous browser task (not needed in patient \
             mode as browser_use returns complete results directly)"
        } else {
            "Gets the result of an asynchronous browser task"
        };

        vec![
            ToolDefinition {
                name: "browser_use".to_string(),
                description: browser_use_description.to_string(),
                input_schema: json!({
                    "type": "object",
                    "required": ["url", "action"],
                    "properties": {
                        "url": {
                            "type": "string",
                            "description": "URL to navigate to",
                        },
                        "action": {
                            "type": "string",
                            "description": "Action to perform in the browser",
                        },
                    },
                }),
            },
            ToolDefinition {
                name: "browser_get_result".to_string(),
                description: get_result_description.to_string(),
                input_schema: json!({
                    "type": "object",
                    "required": ["task_id"],
                    "properties": {
                        "task_id": {
                            "type": "string",
                            "description": "ID of the task to get results for",
                        },
                    },
                }),
            },
        ]
    }

    /// Every finished task is a readable resource; live tasks never appear.
    async fn list_resources(&self) -> Vec<ResourceDescriptor> {
        let mut resources: Vec<ResourceDescriptor> = self
            .store
            .scan_terminal()
            .await
            .into_iter()
            .map(|(id, record)| {
                let id_text = id.to_string();
                ResourceDescriptor {
                    uri: resource_uri(id),
                    name: format!("Browser Task Result: {}", &id_text[..8]),
                    description: format!("Result of browser task for URL: {}", record.url),
                    mime_type: "application/json".to_string(),
                }
            })
            .collect();
        resources.sort_by(|a, b| a.uri.cmp(&b.uri));
        resources
    }

    async fn read_resource(&self, uri: &str) -> ResourceContents {
        let Some(task_id) = uri.strip_prefix(RESOURCE_PREFIX) else {
            return ResourceContents::json(
                uri,
                &json!({ "error": format!("Invalid resource URI: {}", uri) }),
            );
        };

        let record = match Uuid::parse_str(task_id) {
            Ok(id) => self.store.snapshot(id).await,
            Err(_) => None,
        };
        match record {
            Some(record) => ResourceContents::json(uri, &record_json(&record)),
            None => ResourceContents::json(
                uri,
                &json!({ "error": format!("Task not found: {}", task_id) }),
            ),
        }
    }
}

fn resource_uri(id: Uuid) -> String {
    format!("{}{}", RESOURCE_PREFIX, id)
}

fn record_json(record: &TaskRecord) -> Value {
    serde_json::to_value(record).unwrap_or_else(|e| json!({ "error": e.to_string() }))
}

fn require_str(args: &Value, key: &'static str) -> Result<String, RpcError> {
    args.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(RpcError::MissingArgument(key))
}
