//! Gateway configuration loader.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GatewayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    pub upstream: UpstreamConfig,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_http_timeout_seconds() -> u64 {
    30
}

fn default_http_max_in_flight() -> usize {
    256
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
    #[serde(default = "default_http_max_in_flight")]
    pub http_max_in_flight: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            http_timeout_seconds: default_http_timeout_seconds(),
            http_max_in_flight: default_http_max_in_flight(),
        }
    }
}

fn default_request_timeout_seconds() -> u64 {
    60
}

/// The upstream this gateway fronts, and the substring used to recognize
/// when a request targets the identity-sensitive host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpstreamConfig {
    pub base_url: String,
    pub identity_host_substring: String,
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

impl GatewayConfig {
    pub async fn load_with_path(path: Option<PathBuf>) -> anyhow::Result<(Self, PathBuf)> {
        let path = match path {
            Some(path) => path,
            None => default_config_path()?,
        };
        let contents = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| anyhow::anyhow!("read config {}: {e}", path.display()))?;

        let cfg: GatewayConfig = toml::from_str(&contents)
            .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?;

        cfg.validate()?;
        Ok((cfg, path))
    }

    pub fn bind_addr(&self) -> anyhow::Result<SocketAddr> {
        self.server
            .bind_addr
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid server.bind_addr {:?}: {e}", self.server.bind_addr))
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.base_url.trim().is_empty() {
            return Err(anyhow::anyhow!("upstream.base_url must not be empty"));
        }
        let lowered = self.upstream.base_url.to_ascii_lowercase();
        if !(lowered.starts_with("http://") || lowered.starts_with("https://")) {
            return Err(anyhow::anyhow!(
                "upstream.base_url must start with http:// or https://"
            ));
        }
        if self.upstream.identity_host_substring.trim().is_empty() {
            return Err(anyhow::anyhow!(
                "upstream.identity_host_substring must not be empty"
            ));
        }
        if self.server.http_max_in_flight == 0 {
            return Err(anyhow::anyhow!("server.http_max_in_flight must be > 0"));
        }
        self.bind_addr()?;
        Ok(())
    }
}

pub fn default_config_path() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME").map_err(|_| anyhow::anyhow!("HOME is not set"))?;
    Ok(Path::new(&home).join(".gateway").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> GatewayConfig {
        toml::from_str(
            r#"
[upstream]
base_url = "https://api.anthropic-compatible.internal"
identity_host_substring = "anthropic-compatible.internal"
"#,
        )
        .unwrap()
    }

    #[test]
    fn defaults_fill_in_server_section() {
        let cfg = base_config();
        assert_eq!(cfg.server.bind_addr, "127.0.0.1:8080");
        assert_eq!(cfg.server.http_timeout_seconds, 30);
        assert_eq!(cfg.upstream.request_timeout_seconds, 60);
    }

    #[test]
    fn rejects_non_http_base_url() {
        let mut cfg = base_config();
        cfg.upstream.base_url = "ftp://example.com".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_empty_identity_host_substring() {
        let mut cfg = base_config();
        cfg.upstream.identity_host_substring = "".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_top_level_field_is_rejected() {
        let result: Result<GatewayConfig, _> = toml::from_str(
            r#"
[upstream]
base_url = "https://example.com"
identity_host_substring = "example.com"

[nonsense]
foo = 1
"#,
        );
        assert!(result.is_err());
    }
}
