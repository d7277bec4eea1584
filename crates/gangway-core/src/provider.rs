use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, info, warn};

use crate::bridge::{McpResourceAdapter, McpToolAdapter};
use crate::client::McpClient;
use crate::config::{McpServersConfig, TransportConfig, TransportKind};
use crate::tool::{Tool, ToolDef};

/// How long a blocking construction waits for the session to come up when
/// it cannot drive the initialization itself.
pub const DEFAULT_INIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Uninitialized,
    Initializing,
    Initialized,
    Failed,
    /// Terminal: reconnecting requires a new provider.
    Closed,
}

/// The live connection state spanning every configured endpoint. Owned by
/// exactly one provider; bridges only ever hold weak references into it.
struct Session {
    clients: Vec<Arc<McpClient>>,
}

impl Session {
    fn empty() -> Self {
        Self {
            clients: Vec::new(),
        }
    }

    /// Connect every enabled endpoint and collect its tool catalog.
    ///
    /// A failing endpoint contributes zero tools and is logged; it never
    /// aborts its siblings. Catalogs concatenate in endpoint order, then
    /// within-endpoint order.
    async fn open(config: McpServersConfig) -> (Self, Vec<Arc<dyn Tool>>) {
        let mut clients = Vec::new();
        let mut tools: Vec<Arc<dyn Tool>> = Vec::new();

        for server in config.enabled_servers() {
            let connected = match &server.transport {
                TransportConfig::Stdio { command, args, env } => {
                    McpClient::connect_stdio(&server.name, command, args, env).await
                }
                TransportConfig::Network {
                    url,
                    transport: TransportKind::Sse,
                } => McpClient::connect_sse(&server.name, url).await,
            };

            let client = match connected {
                Ok(client) => Arc::new(client),
                Err(e) => {
                    warn!("skipping MCP server '{}': {e:#}", server.name);
                    continue;
                }
            };

            match client.list_tools().await {
                Ok(catalog) => {
                    debug!(
                        "MCP server '{}' advertises {} tools",
                        server.name,
                        catalog.len()
                    );
                    for info in catalog {
                        tools.push(Arc::new(McpToolAdapter::new(&client, info)));
                    }
                }
                Err(e) => {
                    warn!(
                        "could not list tools on MCP server '{}': {e:#}",
                        server.name
                    );
                }
            }

            if server.expose_resources {
                match client.list_resources().await {
                    Ok(resources) if !resources.is_empty() => {
                        tools.push(Arc::new(McpResourceAdapter::new(&client)));
                    }
                    Ok(_) => {
                        debug!("MCP server '{}' has no resources to expose", server.name);
                    }
                    Err(e) => {
                        warn!(
                            "could not list resources on MCP server '{}': {e:#}",
                            server.name
                        );
                    }
                }
            }

            clients.push(client);
        }

        (Self { clients }, tools)
    }

    fn shutdown(&self) {
        for client in &self.clients {
            client.shutdown();
        }
    }
}

/// Connects to a set of MCP servers and exposes their combined tool catalog
/// as framework `Tool`s.
///
/// Construction never fails: every initialization problem degrades to an
/// empty tool list and a logged warning so the host can proceed without MCP.
pub struct McpToolProvider {
    state: ProviderState,
    session: Option<Arc<Session>>,
    tools: Vec<Arc<dyn Tool>>,
    /// Keeps the session's I/O driver alive for providers built from a
    /// blocking context. `None` when the caller's runtime drives the session.
    runtime: Option<Runtime>,
}

impl McpToolProvider {
    /// Blocking construction with the default initialization timeout.
    pub fn new(config: McpServersConfig) -> Self {
        Self::with_init_timeout(config, DEFAULT_INIT_TIMEOUT)
    }

    /// Blocking construction. Safe to call from inside a running Tokio
    /// runtime: the session is then opened on a separate worker thread and
    /// the wait is bounded by `init_timeout`. On timeout the provider is
    /// `Failed` with zero tools; the orphaned connection attempt keeps
    /// running until it finishes on its own.
    pub fn with_init_timeout(config: McpServersConfig, init_timeout: Duration) -> Self {
        let mut provider = Self {
            state: ProviderState::Initializing,
            session: None,
            tools: Vec::new(),
            runtime: None,
        };

        if config.enabled_servers().is_empty() {
            info!("no MCP servers configured");
            provider.session = Some(Arc::new(Session::empty()));
            provider.state = ProviderState::Initialized;
            return provider;
        }

        let runtime = match Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("gangway-mcp")
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!("could not start MCP session runtime: {e:#}");
                provider.state = ProviderState::Failed;
                return provider;
            }
        };

        if Handle::try_current().is_ok() {
            // A scheduler is already running on this thread; block_on here
            // would deadlock it. Open the session on a worker thread and
            // bound the wait.
            let (tx, rx) = mpsc::channel();
            let spawned = std::thread::Builder::new()
                .name("gangway-mcp-init".into())
                .spawn(move || {
                    let opened = runtime.block_on(Session::open(config));
                    let _ = tx.send((runtime, opened));
                });
            if let Err(e) = spawned {
                warn!("could not spawn MCP init thread: {e:#}");
                provider.state = ProviderState::Failed;
                return provider;
            }
            match rx.recv_timeout(init_timeout) {
                Ok((runtime, (session, tools))) => {
                    provider.adopt(Some(runtime), session, tools);
                }
                Err(_) => {
                    warn!(
                        "MCP initialization did not finish within {init_timeout:?}; \
                         continuing without MCP tools"
                    );
                    provider.state = ProviderState::Failed;
                }
            }
        } else {
            let (session, tools) = runtime.block_on(Session::open(config));
            provider.adopt(Some(runtime), session, tools);
        }

        provider
    }

    /// Async construction on the caller's runtime.
    pub async fn connect(config: McpServersConfig) -> Self {
        let mut provider = Self {
            state: ProviderState::Initializing,
            session: None,
            tools: Vec::new(),
            runtime: None,
        };
        let (session, tools) = Session::open(config).await;
        provider.adopt(None, session, tools);
        provider
    }

    fn adopt(&mut self, runtime: Option<Runtime>, session: Session, tools: Vec<Arc<dyn Tool>>) {
        info!(
            "MCP session open: {} servers, {} tools",
            session.clients.len(),
            tools.len()
        );
        self.session = Some(Arc::new(session));
        self.tools = tools;
        self.runtime = runtime;
        self.state = ProviderState::Initialized;
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    pub fn is_initialized(&self) -> bool {
        self.state == ProviderState::Initialized
    }

    /// The combined tool catalog. Zero tools is a valid, degraded condition:
    /// callers get an empty list (plus a logged warning when the provider
    /// never initialized), not an error.
    pub fn get_tools(&self) -> Vec<Arc<dyn Tool>> {
        if self.state != ProviderState::Initialized {
            warn!(
                "MCP tools requested but provider is {:?}; returning none",
                self.state
            );
            return Vec::new();
        }
        self.tools.clone()
    }

    /// Declarations for the combined catalog, in catalog order.
    pub fn tool_defs(&self) -> Vec<ToolDef> {
        self.get_tools()
            .iter()
            .map(|tool| ToolDef {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                parameters: tool.parameters(),
            })
            .collect()
    }

    /// Tear the session down. Idempotent; shutdown problems are logged,
    /// never propagated. Every bridge handed out becomes invocation-dead.
    pub fn close(&mut self) {
        if self.state == ProviderState::Closed {
            return;
        }
        if let Some(session) = self.session.take() {
            session.shutdown();
        }
        self.tools.clear();
        if let Some(runtime) = self.runtime.take() {
            // Callable from async contexts too, where a blocking shutdown
            // would panic.
            runtime.shutdown_background();
        }
        self.state = ProviderState::Closed;
    }
}

impl Drop for McpToolProvider {
    fn drop(&mut self) {
        self.close();
    }
}
