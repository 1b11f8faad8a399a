//! grid.toml configuration parser.
//!
//! Recognizes the registration secret, bus transport, node client choice,
//! session map backend and connection string, and tracing level. All other
//! configuration belongs to the surrounding shell.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GridError, GridResult};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GridConfig {
    pub server: Option<ServerConfig>,
    /// Secret nodes must present when registering. `None` disables the check
    /// only for statuses that also carry no secret.
    pub registration_secret: Option<String>,
    pub bus: Option<BusConfig>,
    pub node_client: Option<NodeClientConfig>,
    pub session_map: Option<SessionMapConfig>,
    pub tracing: Option<TracingConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub port: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusConfig {
    /// Bus implementation. Only `"local"` ships in-tree.
    pub transport: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeClientConfig {
    /// Node client factory. Only `"http"` ships in-tree.
    pub kind: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMapConfig {
    /// `"memory"` or `"sqlite"`.
    pub backend: Option<String>,
    /// Connection string for the relational backend: a path or `":memory:"`.
    pub connection: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TracingConfig {
    /// Log filter, e.g. `"info"` or `"hivegrid=debug"`.
    pub level: Option<String>,
}

impl GridConfig {
    pub fn from_file(path: &Path) -> GridResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| GridError::Config(format!("{}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| GridError::Config(format!("{}: {e}", path.display())))
    }

    pub fn session_map_backend(&self) -> &str {
        self.session_map
            .as_ref()
            .and_then(|m| m.backend.as_deref())
            .unwrap_or("memory")
    }

    pub fn session_map_connection(&self) -> &str {
        self.session_map
            .as_ref()
            .and_then(|m| m.connection.as_deref())
            .unwrap_or(":memory:")
    }

    pub fn bus_transport(&self) -> &str {
        self.bus
            .as_ref()
            .and_then(|b| b.transport.as_deref())
            .unwrap_or("local")
    }

    pub fn node_client_kind(&self) -> &str {
        self.node_client
            .as_ref()
            .and_then(|c| c.kind.as_deref())
            .unwrap_or("http")
    }

    pub fn tracing_level(&self) -> &str {
        self.tracing
            .as_ref()
            .and_then(|t| t.level.as_deref())
            .unwrap_or("info")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_full_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
            registration_secret = "hunter2"

            [server]
            port = 4444

            [bus]
            transport = "local"

            [node_client]
            kind = "http"

            [session_map]
            backend = "sqlite"
            connection = "/var/lib/hivegrid/sessions.db"

            [tracing]
            level = "debug"
            "#
        )
        .unwrap();

        let config = GridConfig::from_file(file.path()).unwrap();
        assert_eq!(config.registration_secret.as_deref(), Some("hunter2"));
        assert_eq!(config.server.as_ref().unwrap().port, Some(4444));
        assert_eq!(config.bus_transport(), "local");
        assert_eq!(config.node_client_kind(), "http");
        assert_eq!(config.session_map_backend(), "sqlite");
        assert_eq!(
            config.session_map_connection(),
            "/var/lib/hivegrid/sessions.db"
        );
        assert_eq!(config.tracing_level(), "debug");
    }

    #[test]
    fn empty_config_uses_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "").unwrap();

        let config = GridConfig::from_file(file.path()).unwrap();
        assert_eq!(config.registration_secret, None);
        assert_eq!(config.session_map_backend(), "memory");
        assert_eq!(config.session_map_connection(), ":memory:");
        assert_eq!(config.tracing_level(), "info");
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = GridConfig::from_file(Path::new("/nonexistent/grid.toml")).unwrap_err();
        assert!(matches!(err, GridError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "registration_secret = [not valid").unwrap();

        let err = GridConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, GridError::Config(_)));
    }
}
