//! stdio transport.
//!
//! Line-delimited JSON-RPC on stdin/stdout, multiplexing the same dispatcher
//! as the SSE surface for local-process clients. Stdout carries protocol
//! frames only; all logging is pinned to stderr at startup.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::mcp::protocol::{JsonRpcRequest, JsonRpcResponse, PARSE_ERROR};
use crate::mcp::ToolDispatcher;

/// Serve until stdin closes.
pub async fn serve(dispatcher: Arc<ToolDispatcher>) -> anyhow::Result<()> {
    tracing::info!("Serving MCP over stdio");

    let stdin = tokio::io::stdin();
    let mut lines = BufReader::new(stdin).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = match serde_json::from_str::<JsonRpcRequest>(&line) {
            Ok(request) => dispatcher.handle(request).await,
            Err(e) => Some(JsonRpcResponse::error(
                serde_json::Value::Null,
                PARSE_ERROR,
                e.to_string(),
            )),
        };

        if let Some(response) = response {
            let frame = serde_json::to_string(&response)?;
            stdout.write_all(frame.as_bytes()).await?;
            stdout.write_all(b"\n").await?;
            stdout.flush().await?;
        }
    }

    tracing::info!("stdin closed, shutting down");
    Ok(())
}
