use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// The surface an agent framework consumes: a named, described, schema'd
/// capability invocable either from async code (`call`) or from a plain
/// blocking caller (`call_blocking`).
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> serde_json::Value;
    async fn call(&self, args: serde_json::Value) -> Result<ToolResult>;

    /// Run the tool to completion from a synchronous caller.
    ///
    /// The call is driven on a dedicated worker thread with its own
    /// single-threaded runtime; the scope join guarantees both are torn down
    /// before this returns, on success, error, or panic alike.
    fn call_blocking(&self, args: serde_json::Value) -> Result<ToolResult> {
        std::thread::scope(|scope| {
            let handle = scope.spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(self.call(args))
            });
            match handle.join() {
                Ok(result) => result,
                Err(_) => Err(anyhow::anyhow!("blocking tool call panicked")),
            }
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    pub content: String,
    pub is_error: bool,
}

impl ToolResult {
    pub fn ok(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: false,
        }
    }

    pub fn err(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            is_error: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDef {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Doubler;

    #[async_trait]
    impl Tool for Doubler {
        fn name(&self) -> &str {
            "doubler"
        }

        fn description(&self) -> &str {
            "Doubles a number"
        }

        fn parameters(&self) -> serde_json::Value {
            json!({ "type": "object", "properties": { "n": { "type": "integer" } } })
        }

        async fn call(&self, args: serde_json::Value) -> Result<ToolResult> {
            // Suspend once so the blocking path actually exercises the runtime.
            tokio::task::yield_now().await;
            let n = args["n"]
                .as_i64()
                .ok_or_else(|| anyhow::anyhow!("missing 'n'"))?;
            Ok(ToolResult::ok((n * 2).to_string()))
        }
    }

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }

        fn description(&self) -> &str {
            ""
        }

        fn parameters(&self) -> serde_json::Value {
            json!({ "type": "object" })
        }

        async fn call(&self, _args: serde_json::Value) -> Result<ToolResult> {
            panic!("boom");
        }
    }

    #[test]
    fn call_blocking_runs_async_tool_without_ambient_runtime() {
        let result = Doubler.call_blocking(json!({ "n": 21 })).unwrap();
        assert_eq!(result.content, "42");
        assert!(!result.is_error);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn call_blocking_works_inside_a_runtime() {
        let result = tokio::task::spawn_blocking(|| Doubler.call_blocking(json!({ "n": 4 })))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(result.content, "8");
    }

    #[test]
    fn call_blocking_surfaces_tool_errors() {
        let err = Doubler.call_blocking(json!({})).unwrap_err();
        assert!(err.to_string().contains("missing 'n'"));
    }

    #[test]
    fn call_blocking_converts_panics_to_errors() {
        let err = Panicky.call_blocking(json!({})).unwrap_err();
        assert!(err.to_string().contains("panicked"));
    }

    #[tokio::test]
    async fn blocking_and_async_agree_for_deterministic_tool() {
        let via_async = Doubler.call(json!({ "n": 5 })).await.unwrap();
        let via_blocking = tokio::task::spawn_blocking(|| Doubler.call_blocking(json!({ "n": 5 })))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(via_async.content, via_blocking.content);
        assert_eq!(via_async.is_error, via_blocking.is_error);
    }
}
