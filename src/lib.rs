//! # browserd
//!
//! An MCP server for asynchronous browser automation tasks.
//!
//! This library provides:
//! - Tool and resource endpoints (JSON-RPC 2.0) for starting browser tasks
//!   and polling their results
//! - A task store tracking every job from `pending` through a terminal state
//! - Isolated browser sessions per task, delegated to an external automation
//!   bridge
//!
//! ## Task Flow
//! 1. A `browser_use` tool call creates a pending task and spawns a runner
//! 2. The runner acquires a fresh browser + context and delegates to the agent
//! 3. Step events stream back into the task record as progress
//! 4. Clients poll `browser_get_result` or read the task resource; a janitor
//!    evicts finished records after the retention window
//!
//! In patient mode the `browser_use` call itself blocks until the task is
//! terminal and returns the full record.
//!
//! ## Modules
//! - `task`: task records, store, runner, and the retention janitor
//! - `mcp`: protocol types and the tool/resource dispatcher
//! - `agent`: the external automation boundary and its bridge client
//! - `server`: SSE and stdio transports

pub mod agent;
pub mod config;
pub mod llm;
pub mod mcp;
pub mod server;
pub mod task;

pub use config::Config;
