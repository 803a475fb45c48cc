use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / lightbox.toml / env)
// =============================================================================
//
// Equivalent ways to configure:
//
//   lightbox.toml:   [server]
//                    port = 9800
//
//   env var:         LIGHTBOX_SERVER__PORT=9800   (double underscore = nesting)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
}

/// Server tuning knobs (lives under `[server]` in lightbox.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    /// Per-upload byte cap in megabytes. Also used as the WebSocket
    /// max-message-size (with base64 headroom).
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            max_upload_mb: default_max_upload_mb(),
        }
    }
}

fn default_max_upload_mb() -> usize {
    50
}

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9800;

/// Fixed client-side wait on request/response calls (search, download).
/// The server has no corresponding internal timeout.
pub const CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolved server configuration (runtime view).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub max_upload_bytes: usize,
}

impl ServerConfig {
    /// Resolve the runtime config: CLI flags take priority over the file
    /// config, which takes priority over built-in defaults.
    pub fn resolve(fc: &FileConfig, host_flag: Option<String>, port_flag: Option<u16>) -> Self {
        Self {
            host: host_flag
                .or_else(|| fc.server.host.clone())
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port: port_flag.or(fc.server.port).unwrap_or(DEFAULT_PORT),
            max_upload_bytes: fc.server.max_upload_mb * 1024 * 1024,
        }
    }

    /// WebSocket max-message-size: the upload cap plus base64 inflation
    /// (4/3) and envelope headroom.
    pub fn max_message_bytes(&self) -> usize {
        self.max_upload_bytes * 4 / 3 + 4096
    }
}

/// Layer struct defaults → lightbox.toml → LIGHTBOX_* env vars.
pub fn load_config(config_path: Option<&Path>) -> Result<FileConfig> {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let path = config_path.unwrap_or_else(|| Path::new("lightbox.toml"));
    let config = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("LIGHTBOX_").split("__"))
        .extract()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_loopback_and_50mb() {
        let config = ServerConfig::resolve(&FileConfig::default(), None, None);
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 9800);
        assert_eq!(config.max_upload_bytes, 50 * 1024 * 1024);
    }

    #[test]
    fn cli_flags_override_file_values() {
        let fc = FileConfig {
            server: ServerFileConfig {
                host: Some("0.0.0.0".to_string()),
                port: Some(7777),
                max_upload_mb: 10,
            },
        };
        let config = ServerConfig::resolve(&fc, Some("10.0.0.1".to_string()), Some(8888));
        assert_eq!(config.host, "10.0.0.1");
        assert_eq!(config.port, 8888);
        assert_eq!(config.max_upload_bytes, 10 * 1024 * 1024);
    }

    #[test]
    fn file_values_override_defaults() {
        let fc = FileConfig {
            server: ServerFileConfig {
                host: Some("0.0.0.0".to_string()),
                port: Some(7777),
                max_upload_mb: 1,
            },
        };
        let config = ServerConfig::resolve(&fc, None, None);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 7777);
    }

    #[test]
    fn max_message_size_has_base64_headroom() {
        let config = ServerConfig::resolve(&FileConfig::default(), None, None);
        assert!(config.max_message_bytes() > config.max_upload_bytes * 4 / 3);
    }

    #[test]
    fn missing_config_file_falls_back_to_defaults() {
        let fc = load_config(Some(Path::new("/nonexistent/lightbox.toml"))).unwrap();
        assert_eq!(fc.server.max_upload_mb, 50);
        assert!(fc.server.port.is_none());
    }
}
