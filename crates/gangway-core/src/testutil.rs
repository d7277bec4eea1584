//! Shared test fixtures: scripted MCP servers for both transports.

use std::convert::Infallible;
use std::io::Write;
use std::net::SocketAddr;

use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tempfile::NamedTempFile;
use tokio::net::TcpListener;

use crate::config::McpServerConfig;

const SCRIPT_TEMPLATE: &str = r##"#!/bin/sh
@SLEEP@
while IFS= read -r line; do
  id=$(printf '%s' "$line" | sed -n 's/.*"id":\([0-9][0-9]*\).*/\1/p')
  case "$line" in
    *'"method":"initialize"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"protocolVersion":"2024-11-05","capabilities":{"tools":{}},"serverInfo":{"name":"stub","version":"0.1.0"}}}\n' "$id"
      ;;
    *'"method":"tools/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"tools":@TOOLS@}}\n' "$id"
      ;;
    *'"method":"tools/call"'*)
      text=$(printf '%s' "$line" | sed -n 's/.*"text":"\([^"]*\)".*/\1/p')
@MUTATE@
      printf '{"jsonrpc":"2.0","id":%s,"result":{"content":[{"type":"text","text":"%s"}],"isError":false}}\n' "$id" "$text"
      ;;
    *'"method":"resources/list"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"resources":[{"uri":"stub://greeting","name":"greeting","mimeType":"text/plain"}]}}\n' "$id"
      ;;
    *'"method":"resources/read"'*)
      printf '{"jsonrpc":"2.0","id":%s,"result":{"contents":[{"uri":"stub://greeting","mimeType":"text/plain","text":"hello from stub"}]}}\n' "$id"
      ;;
  esac
done
"##;

/// A scripted stdio MCP server: a `sh` script that answers the handshake,
/// the catalog request, and tool calls with canned JSON-RPC payloads.
pub(crate) struct StubServer {
    script: NamedTempFile,
}

impl StubServer {
    /// One `echo` tool; calls echo the `text` argument back.
    pub fn echo() -> Self {
        Self::build(0, &[("echo", "Echo text back")], None)
    }

    /// Advertise the given `(name, description)` tools.
    pub fn with_tools(tools: &[(&str, &str)]) -> Self {
        Self::build(0, tools, None)
    }

    /// Calls come back as `{text}|{$STUB_TAG}`, exposing the subprocess env.
    pub fn env_tagged() -> Self {
        Self::build(
            0,
            &[("echo", "Echo text back")],
            Some(r#"      text="$text|${STUB_TAG:-unset}""#),
        )
    }

    /// Sleeps before answering anything; simulates a slow-connecting endpoint.
    pub fn slow(delay_secs: u64) -> Self {
        Self::build(delay_secs, &[("echo", "Echo text back")], None)
    }

    fn build(delay_secs: u64, tools: &[(&str, &str)], call_mutation: Option<&str>) -> Self {
        let tools_json = Value::Array(
            tools
                .iter()
                .map(|(name, description)| {
                    json!({
                        "name": name,
                        "description": description,
                        "inputSchema": {
                            "type": "object",
                            "properties": { "text": { "type": "string" } },
                            "required": ["text"]
                        }
                    })
                })
                .collect(),
        );

        let sleep = if delay_secs > 0 {
            format!("sleep {delay_secs}")
        } else {
            String::new()
        };

        let body = SCRIPT_TEMPLATE
            .replace("@SLEEP@", &sleep)
            .replace("@TOOLS@", &tools_json.to_string())
            .replace("@MUTATE@", call_mutation.unwrap_or(""));

        let mut script = NamedTempFile::new().expect("failed to create stub script");
        script.write_all(body.as_bytes()).expect("failed to write stub script");
        script.flush().expect("failed to flush stub script");

        Self { script }
    }

    /// `(command, args)` that runs this stub.
    pub fn command(&self) -> (String, Vec<String>) {
        (
            "sh".to_string(),
            vec![self.script.path().to_string_lossy().into_owned()],
        )
    }

    pub fn config(&self, name: &str) -> McpServerConfig {
        let (command, args) = self.command();
        McpServerConfig::stdio(name, command, args)
    }
}

/// In-process HTTP server speaking the POST-and-SSE-reply protocol, one
/// `ping` tool. Accepts connections until the runtime is dropped.
pub(crate) async fn serve_sse_stub() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service_fn(handle_rpc))
                    .await
                    .ok();
            });
        }
    });

    addr
}

async fn handle_rpc(
    req: Request<hyper::body::Incoming>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(_) => Bytes::new(),
    };
    let rpc: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);

    let id = rpc["id"].clone();
    if id.is_null() {
        // Notification; nothing to reply with.
        return Ok(Response::new(Full::new(Bytes::new())));
    }

    let payload = match rpc["method"].as_str().unwrap_or("") {
        "initialize" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "serverInfo": { "name": "sse-stub", "version": "0.1.0" }
            }
        }),
        "tools/list" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [{
                    "name": "ping",
                    "description": "Reply with pong",
                    "inputSchema": { "type": "object", "properties": {} }
                }]
            }
        }),
        "tools/call" => json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "content": [{ "type": "text", "text": "pong" }],
                "isError": false
            }
        }),
        _ => json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": -32601, "message": "method not found" }
        }),
    };

    let body = format!("data: {payload}\n\n");
    Ok(Response::new(Full::new(Bytes::from(body))))
}
