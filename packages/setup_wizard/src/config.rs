use anyhow::{Context, Result, bail};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// Unified config (figment-deserialized from defaults / config.toml / env vars)
// =============================================================================
//
// Three equivalent ways to configure:
//
//   config.toml:     [channel]
//                    reconnect_delay_ms = 500
//
//   env var:         WIZARD_CHANNEL__RECONNECT_DELAY_MS=500   (double underscore = nesting)
//
//   CLI:             --url https://127.0.0.1:9443  (backend.url only)

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub backend: BackendFileConfig,
    #[serde(default)]
    pub channel: ChannelFileConfig,
    #[serde(default)]
    pub gateway: GatewayFileConfig,
}

/// Where the setup backend lives (`[backend]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BackendFileConfig {
    #[serde(default = "default_backend_url")]
    pub url: String,
}

impl Default for BackendFileConfig {
    fn default() -> Self {
        Self {
            url: default_backend_url(),
        }
    }
}

/// Push channel tunables (`[channel]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelFileConfig {
    #[serde(default = "default_channel_path")]
    pub path: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Outbound messages queued per connection before `send` starts dropping.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for ChannelFileConfig {
    fn default() -> Self {
        Self {
            path: default_channel_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Trigger request tunables (`[gateway]` in config.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GatewayFileConfig {
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for GatewayFileConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_backend_url() -> String {
    "http://127.0.0.1:8080".to_string()
}
fn default_channel_path() -> String {
    "/ws".to_string()
}
fn default_reconnect_delay_ms() -> u64 {
    3000
}
fn default_outbound_capacity() -> usize {
    32
}
fn default_request_timeout_secs() -> u64 {
    10
}

/// Build a figment that layers: defaults → config.toml → WIZARD_* env vars → CLI.
///
/// Env vars use double-underscore for nesting into sections:
///   `WIZARD_BACKEND__URL=http://10.0.0.2:8080`  →  `backend.url`
///   `WIZARD_GATEWAY__REQUEST_TIMEOUT_SECS=0`  →  `gateway.request_timeout_secs`
pub fn load_config(config_dir: &Path, cli_url: Option<&str>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let figment = Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join("config.toml")))
        .merge(Env::prefixed("WIZARD_").split("__"));

    match cli_url {
        Some(url) => figment.merge(Serialized::defaults(
            serde_json::json!({ "backend": { "url": url } }),
        )),
        None => figment,
    }
}

/// Default config directory: `~/.setup_wizard`.
pub fn default_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    Ok(home.join(".setup_wizard"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

/// Backend base URL plus the derived trigger and channel URLs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendEndpoint {
    base: Url,
    channel_path: String,
}

impl BackendEndpoint {
    pub fn new(base_url: &str, channel_path: &str) -> Result<Self> {
        let base = Url::parse(base_url)
            .with_context(|| format!("Invalid backend URL: {base_url}"))?;
        match base.scheme() {
            "http" | "https" => {}
            other => bail!("Backend URL must be http or https, got {other}"),
        }
        let channel_path = if channel_path.starts_with('/') {
            channel_path.to_string()
        } else {
            format!("/{channel_path}")
        };
        Ok(Self { base, channel_path })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// Absolute URL of a trigger endpoint such as `/api/login`.
    pub fn api_url(&self, path: &str) -> String {
        let base = self.base.as_str().trim_end_matches('/');
        format!("{base}{path}")
    }

    /// Push channel URL: same base as the trigger endpoints, `wss` for an
    /// https backend and `ws` otherwise.
    pub fn ws_url(&self) -> String {
        let url = self.api_url(&self.channel_path);
        // `new` only accepts http and https bases.
        match url.strip_prefix("http") {
            Some(rest) => format!("ws{rest}"),
            None => url,
        }
    }
}

/// Channel manager settings (runtime view).
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    pub reconnect_delay: Duration,
    pub outbound_capacity: usize,
}

/// Operation gateway settings (runtime view).
#[derive(Clone, Debug)]
pub struct GatewayConfig {
    /// Per-request timeout (None = disabled)
    pub request_timeout: Option<Duration>,
}

#[derive(Clone, Debug)]
pub struct WizardConfig {
    pub endpoint: BackendEndpoint,
    pub channel: ChannelConfig,
    pub gateway: GatewayConfig,
}

impl WizardConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        Ok(Self {
            endpoint: BackendEndpoint::new(&fc.backend.url, &fc.channel.path)?,
            channel: ChannelConfig {
                reconnect_delay: Duration::from_millis(fc.channel.reconnect_delay_ms),
                outbound_capacity: fc.channel.outbound_capacity.max(1),
            },
            gateway: GatewayConfig {
                request_timeout: if fc.gateway.request_timeout_secs == 0 {
                    None
                } else {
                    Some(Duration::from_secs(fc.gateway.request_timeout_secs))
                },
            },
        })
    }

    /// Load and resolve the layered config for `config_dir`.
    pub fn load(config_dir: &Path, cli_url: Option<&str>) -> Result<Self> {
        let fc: FileConfig = load_config(config_dir, cli_url)
            .extract()
            .context("Failed to load configuration")?;
        Self::from_file(&fc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── defaults ────────────────────────────────────────────────────────

    #[test]
    fn test_file_config_defaults() {
        let fc = FileConfig::default();
        assert_eq!(fc.backend.url, "http://127.0.0.1:8080");
        assert_eq!(fc.channel.path, "/ws");
        assert_eq!(fc.channel.reconnect_delay_ms, 3000);
        assert_eq!(fc.channel.outbound_capacity, 32);
        assert_eq!(fc.gateway.request_timeout_secs, 10);
    }

    #[test]
    fn test_wizard_config_from_defaults() {
        let config = WizardConfig::from_file(&FileConfig::default()).unwrap();
        assert_eq!(config.channel.reconnect_delay, Duration::from_secs(3));
        assert_eq!(
            config.gateway.request_timeout,
            Some(Duration::from_secs(10))
        );
        assert_eq!(config.endpoint.ws_url(), "ws://127.0.0.1:8080/ws");
    }

    #[test]
    fn test_request_timeout_zero_disables() {
        let fc = FileConfig {
            gateway: GatewayFileConfig {
                request_timeout_secs: 0,
            },
            ..Default::default()
        };
        let config = WizardConfig::from_file(&fc).unwrap();
        assert!(config.gateway.request_timeout.is_none());
    }

    // ── BackendEndpoint ─────────────────────────────────────────────────

    #[test]
    fn test_https_backend_uses_wss() {
        let endpoint = BackendEndpoint::new("https://setup.local:9443", "/ws").unwrap();
        assert_eq!(endpoint.ws_url(), "wss://setup.local:9443/ws");
    }

    #[test]
    fn test_default_port_is_omitted() {
        let endpoint = BackendEndpoint::new("https://setup.local/", "/ws").unwrap();
        assert_eq!(endpoint.ws_url(), "wss://setup.local/ws");
        assert_eq!(
            endpoint.api_url("/api/login"),
            "https://setup.local/api/login"
        );
    }

    #[test]
    fn test_base_path_is_shared_by_api_and_channel() {
        let endpoint = BackendEndpoint::new("https://setup.local/wizard", "/ws").unwrap();
        assert_eq!(
            endpoint.api_url("/api/login"),
            "https://setup.local/wizard/api/login"
        );
        assert_eq!(endpoint.ws_url(), "wss://setup.local/wizard/ws");

        let endpoint = BackendEndpoint::new("http://10.0.0.2:8080/wizard/", "ws").unwrap();
        assert_eq!(endpoint.ws_url(), "ws://10.0.0.2:8080/wizard/ws");
    }

    #[test]
    fn test_channel_path_gets_leading_slash() {
        let endpoint = BackendEndpoint::new("http://127.0.0.1:8080", "events").unwrap();
        assert_eq!(endpoint.ws_url(), "ws://127.0.0.1:8080/events");
    }

    #[test]
    fn test_api_url_joins_without_double_slash() {
        let endpoint = BackendEndpoint::new("http://127.0.0.1:8080", "/ws").unwrap();
        assert_eq!(
            endpoint.api_url("/api/service/install"),
            "http://127.0.0.1:8080/api/service/install"
        );
    }

    #[test]
    fn test_rejects_non_http_backend() {
        assert!(BackendEndpoint::new("ftp://127.0.0.1", "/ws").is_err());
        assert!(BackendEndpoint::new("not a url", "/ws").is_err());
    }

    // ── load_config ─────────────────────────────────────────────────────

    #[test]
    fn test_load_config_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(tmp.path(), None).extract().unwrap();
        assert_eq!(fc.backend.url, "http://127.0.0.1:8080");
        assert_eq!(fc.channel.reconnect_delay_ms, 3000);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[backend]\nurl = \"https://10.0.0.2\"\n\n[channel]\nreconnect_delay_ms = 250\n",
        )
        .unwrap();
        let config = WizardConfig::load(tmp.path(), None).unwrap();
        assert_eq!(config.endpoint.ws_url(), "wss://10.0.0.2/ws");
        assert_eq!(config.channel.reconnect_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_cli_url_overrides_toml() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(
            tmp.path().join("config.toml"),
            "[backend]\nurl = \"https://10.0.0.2\"\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(tmp.path(), Some("http://127.0.0.1:9000"))
            .extract()
            .unwrap();
        assert_eq!(fc.backend.url, "http://127.0.0.1:9000");
    }

    #[test]
    fn test_load_rejects_bad_url() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("config.toml"), "[backend]\nurl = \"nope\"\n").unwrap();
        assert!(WizardConfig::load(tmp.path(), None).is_err());
    }
}
