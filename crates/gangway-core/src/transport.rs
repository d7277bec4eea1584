use anyhow::{bail, Result};
use futures_util::StreamExt;
use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use super::jsonrpc::{JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};

// ── Stdio transport ──────────────────────────────────────────────────────────

/// Line-delimited JSON-RPC over the stdin/stdout of a spawned server
/// process. Stderr is discarded.
pub struct StdioTransport {
    stdin: Mutex<ChildStdin>,
    stdout: Mutex<BufReader<ChildStdout>>,
    next_id: AtomicU64,
    child: Mutex<Child>,
}

impl StdioTransport {
    pub fn spawn(command: &str, args: &[String], env: &HashMap<String, String>) -> Result<Self> {
        let mut child = tokio::process::Command::new(command)
            .args(args)
            .envs(env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow::anyhow!("no stdin from MCP process"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow::anyhow!("no stdout from MCP process"))?;

        Ok(Self {
            stdin: Mutex::new(stdin),
            stdout: Mutex::new(BufReader::new(stdout)),
            next_id: AtomicU64::new(1),
            child: Mutex::new(child),
        })
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let payload = serde_json::to_string(&JsonRpcRequest::new(id, method, params))?;
        self.send_line(&payload).await?;
        self.await_reply(id).await
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        let payload = serde_json::to_string(&JsonRpcNotification::new(method, params))?;
        self.send_line(&payload).await
    }

    async fn send_line(&self, payload: &str) -> Result<()> {
        debug!("MCP stdio → {payload}");
        let mut stdin = self.stdin.lock().await;
        stdin.write_all(payload.as_bytes()).await?;
        stdin.write_all(b"\n").await?;
        stdin.flush().await?;
        Ok(())
    }

    /// Read stdout lines until the reply to request `id` arrives.
    /// Server-initiated notifications, replies to other requests, and
    /// unparseable lines are skipped.
    async fn await_reply(&self, id: u64) -> Result<Value> {
        let mut stdout = self.stdout.lock().await;
        loop {
            let mut buf = String::new();
            if stdout.read_line(&mut buf).await? == 0 {
                bail!("MCP server closed its stdout before replying");
            }
            let line = buf.trim();
            if line.is_empty() {
                continue;
            }
            debug!("MCP stdio ← {line}");

            match serde_json::from_str::<JsonRpcResponse>(line) {
                Ok(resp) if resp.matches(id) => return resp.into_result(),
                _ => continue,
            }
        }
    }

    /// Best-effort subprocess teardown. Callable from any context; failures
    /// are reported, never propagated.
    pub fn shutdown(&self) {
        match self.child.try_lock() {
            Ok(mut child) => {
                if let Err(e) = child.start_kill() {
                    debug!("MCP subprocess already finished: {e}");
                }
            }
            Err(_) => warn!("MCP subprocess busy at shutdown; leaving it to exit on its own"),
        }
    }
}

// ── SSE/HTTP transport ───────────────────────────────────────────────────────

/// HTTP transport for remote MCP servers: every JSON-RPC request is POSTed
/// to `{url}/message`, and the reply is read back off that response's body
/// as `data:` events. Each exchange is a self-contained HTTP request, so
/// there is no connection state to tear down.
pub struct SseTransport {
    http: Client,
    endpoint: String,
    next_id: AtomicU64,
}

impl SseTransport {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base = base_url.into();
        Self {
            http: Client::new(),
            endpoint: format!("{}/message", base.trim_end_matches('/')),
            next_id: AtomicU64::new(1),
        }
    }

    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let req = JsonRpcRequest::new(id, method, params);
        debug!("MCP SSE → POST {} {}", self.endpoint, req.method);

        let response = self
            .http
            .post(&self.endpoint)
            .json(&req)
            .send()
            .await?
            .error_for_status()?;

        let mut stream = response.bytes_stream();
        let mut pending = String::new();

        while let Some(chunk) = stream.next().await {
            pending.push_str(&String::from_utf8_lossy(&chunk?));

            // Everything up to a newline is a complete SSE line; each
            // `data:` line carries one self-contained JSON payload.
            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                let Some(data) = line.trim_end().strip_prefix("data: ") else {
                    continue;
                };
                debug!("MCP SSE ← {data}");

                match serde_json::from_str::<JsonRpcResponse>(data) {
                    Ok(resp) if resp.matches(id) => return resp.into_result(),
                    _ => continue,
                }
            }
        }

        bail!(
            "SSE stream from {} ended without a reply to request {id}",
            self.endpoint
        )
    }
}

// ── Unified transport enum ───────────────────────────────────────────────────

pub enum Transport {
    Stdio(Box<StdioTransport>),
    Sse(SseTransport),
}

impl Transport {
    pub async fn request(&self, method: &str, params: Option<Value>) -> Result<Value> {
        match self {
            Self::Stdio(t) => t.request(method, params).await,
            Self::Sse(t) => t.request(method, params).await,
        }
    }

    pub async fn notify(&self, method: &str, params: Option<Value>) -> Result<()> {
        match self {
            Self::Stdio(t) => t.notify(method, params).await,
            // Notifications over SSE are fire-and-forget POSTs
            Self::Sse(t) => {
                let notif = JsonRpcNotification::new(method, params);
                let _ = t.http.post(&t.endpoint).json(&notif).send().await;
                Ok(())
            }
        }
    }

    pub fn shutdown(&self) {
        match self {
            Self::Stdio(t) => t.shutdown(),
            // Nothing to tear down: each SSE exchange is its own HTTP request
            Self::Sse(_) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn spawn_applies_env_and_args() {
        let env = HashMap::from([("GANGWAY_TEST_VALUE".to_string(), "marker".to_string())]);
        let transport = StdioTransport::spawn(
            "sh",
            &[
                "-c".to_string(),
                // Replies to any request line with a response embedding the env var.
                r#"read line; id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p'); printf '{"jsonrpc":"2.0","id":%s,"result":{"value":"%s"}}\n' "$id" "$GANGWAY_TEST_VALUE""#
                    .to_string(),
            ],
            &env,
        )
        .unwrap();

        let result = transport.request("probe", None).await.unwrap();
        assert_eq!(result["value"], "marker");
    }

    #[tokio::test]
    async fn request_skips_server_notifications() {
        let transport = StdioTransport::spawn(
            "sh",
            &[
                "-c".to_string(),
                // A notification line lands before the actual reply.
                r#"read line; printf '{"jsonrpc":"2.0","method":"notifications/progress"}\n'; printf '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}\n'"#
                    .to_string(),
            ],
            &HashMap::new(),
        )
        .unwrap();

        let result = transport.request("probe", None).await.unwrap();
        assert_eq!(result["ok"], true);
    }

    #[tokio::test]
    async fn request_fails_when_subprocess_exits() {
        let transport = StdioTransport::spawn("true", &[], &HashMap::new()).unwrap();
        let err = transport.request("probe", None).await.unwrap_err();
        let msg = err.to_string();
        assert!(
            msg.contains("closed") || msg.contains("Broken pipe") || msg.contains("broken pipe"),
            "unexpected: {msg}"
        );
    }

    #[tokio::test]
    async fn shutdown_is_idempotent() {
        let transport =
            StdioTransport::spawn("sh", &["-c".to_string(), "sleep 60".to_string()], &HashMap::new())
                .unwrap();
        transport.shutdown();
        transport.shutdown();
    }

    #[tokio::test]
    async fn spawn_missing_command_errors() {
        let result = StdioTransport::spawn("/nonexistent/gangway-test-bin", &[], &HashMap::new());
        assert!(result.is_err());
    }
}
