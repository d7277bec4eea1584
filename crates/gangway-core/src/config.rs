use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read MCP config at {path}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed MCP config at {path}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

/// How to reach one MCP server. The variant is inferred from which fields
/// are present: `command` means a spawned subprocess speaking stdio,
/// `url` means a network endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TransportConfig {
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Network {
        url: String,
        #[serde(default)]
        transport: TransportKind,
    },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    #[default]
    Sse,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct McpServerConfig {
    pub name: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Also expose the server's resources through a `read_resource` tool.
    #[serde(default)]
    pub expose_resources: bool,
    #[serde(flatten)]
    pub transport: TransportConfig,
}

fn default_enabled() -> bool {
    true
}

impl McpServerConfig {
    pub fn stdio(
        name: impl Into<String>,
        command: impl Into<String>,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            expose_resources: false,
            transport: TransportConfig::Stdio {
                command: command.into(),
                args,
                env: HashMap::new(),
            },
        }
    }

    pub fn sse(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            expose_resources: false,
            transport: TransportConfig::Network {
                url: url.into(),
                transport: TransportKind::Sse,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct McpServersConfig {
    #[serde(default)]
    pub servers: Vec<McpServerConfig>,
}

impl McpServersConfig {
    fn path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".gangway")
            .join("mcp.json")
    }

    /// Load the user-level server list from `~/.gangway/mcp.json`.
    /// A missing file is an empty config; a broken one is logged and
    /// treated the same way.
    pub fn load() -> Self {
        let path = Self::path();
        if !path.exists() {
            return Self::default();
        }
        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("ignoring MCP config: {e:#}");
                Self::default()
            }
        }
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ConfigError::Malformed {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Servers eligible for connection: enabled, with duplicate names
    /// dropped (first declaration wins). Declaration order is preserved —
    /// tool catalogs are concatenated in this order.
    pub fn enabled_servers(&self) -> Vec<&McpServerConfig> {
        let mut seen = HashSet::new();
        let mut servers = Vec::new();
        for server in &self.servers {
            if !seen.insert(server.name.as_str()) {
                warn!("duplicate MCP server '{}' ignored", server.name);
                continue;
            }
            if !server.enabled {
                continue;
            }
            servers.push(server);
        }
        servers
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn stdio_entry_parses_with_defaults() {
        let config: McpServerConfig = serde_json::from_value(json!({
            "name": "math",
            "command": "python",
            "args": ["math_server.py"]
        }))
        .unwrap();

        assert!(config.enabled);
        assert!(!config.expose_resources);
        match config.transport {
            TransportConfig::Stdio { command, args, env } => {
                assert_eq!(command, "python");
                assert_eq!(args, vec!["math_server.py"]);
                assert!(env.is_empty());
            }
            other => panic!("expected stdio transport, got {other:?}"),
        }
    }

    #[test]
    fn network_entry_parses() {
        let config: McpServerConfig = serde_json::from_value(json!({
            "name": "weather",
            "url": "http://localhost:8000/sse",
            "transport": "sse"
        }))
        .unwrap();

        assert_eq!(
            config.transport,
            TransportConfig::Network {
                url: "http://localhost:8000/sse".into(),
                transport: TransportKind::Sse,
            }
        );
    }

    #[test]
    fn entry_without_command_or_url_is_rejected() {
        let result: Result<McpServerConfig, _> =
            serde_json::from_value(json!({ "name": "broken" }));
        assert!(result.is_err());
    }

    #[test]
    fn enabled_servers_skips_disabled_and_duplicates() {
        let mut duplicate = McpServerConfig::stdio("a", "echo", vec![]);
        duplicate.transport = TransportConfig::Stdio {
            command: "other".into(),
            args: vec![],
            env: HashMap::new(),
        };
        let mut disabled = McpServerConfig::stdio("b", "echo", vec![]);
        disabled.enabled = false;

        let config = McpServersConfig {
            servers: vec![
                McpServerConfig::stdio("a", "echo", vec![]),
                duplicate,
                disabled,
                McpServerConfig::sse("c", "http://localhost:1"),
            ],
        };

        let enabled = config.enabled_servers();
        let names: Vec<_> = enabled.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
        match &enabled[0].transport {
            TransportConfig::Stdio { command, .. } => assert_eq!(command, "echo"),
            other => panic!("first declaration should win, got {other:?}"),
        }
    }

    #[test]
    fn from_file_round_trips() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let json = json!({
            "servers": [
                { "name": "math", "command": "python", "args": ["server.py"] },
                { "name": "weather", "url": "http://localhost:8000/sse" }
            ]
        });
        write!(file, "{json}").unwrap();

        let config = McpServersConfig::from_file(file.path()).unwrap();
        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].name, "math");
    }

    #[test]
    fn from_file_reports_malformed_json() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{ not json").unwrap();

        match McpServersConfig::from_file(file.path()) {
            Err(ConfigError::Malformed { path, .. }) => assert_eq!(path, file.path()),
            other => panic!("expected malformed error, got {other:?}"),
        }
    }

    #[test]
    fn from_file_reports_missing_file() {
        match McpServersConfig::from_file("/nonexistent/gangway/mcp.json") {
            Err(ConfigError::Unreadable { .. }) => {}
            other => panic!("expected unreadable error, got {other:?}"),
        }
    }
}
