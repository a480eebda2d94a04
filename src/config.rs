use crate::client::DEFAULT_MAX_RETRIES;
use crate::error::{BridgeError, Result};
use crate::providers::ProviderPreset;
use crate::stream::DEFAULT_MAX_MALFORMED_FRAMES;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_FILE_NAME: &str = "anthropic-openai-bridge.toml";
const CONFIG_DIR_NAME: &str = "anthropic-openai-bridge";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub stream: StreamConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default = "default_provider_name")]
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    /// Defaults to the preset's variable, then `OPENAI_API_KEY`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
    /// Extra headers sent with every upstream request.
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// Retries after a failed connection attempt. Requests that reached the
    /// provider are never retried.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Fail requests whose tool-call arguments are not valid JSON instead of
    /// substituting an empty input.
    #[serde(default)]
    pub strict_tool_arguments: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    #[serde(default = "default_max_malformed_frames")]
    pub max_malformed_frames: u32,
}

fn default_port() -> u16 {
    4222
}

fn default_provider_name() -> String {
    "openai".to_string()
}

fn default_timeout_secs() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

fn default_max_malformed_frames() -> u32 {
    DEFAULT_MAX_MALFORMED_FRAMES
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            provider: ProviderConfig::default(),
            client: ClientConfig::default(),
            stream: StreamConfig::default(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            base_url: None,
            api_key_env: None,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: None,
            headers: HashMap::new(),
            max_retries: default_max_retries(),
            strict_tool_arguments: false,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            max_malformed_frames: default_max_malformed_frames(),
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout_secs.map(Duration::from_secs)
    }
}

impl BridgeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: explicit path > CWD > platform config dir > home dir.
    /// With no file anywhere, the defaults are used.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        for candidate in config_search_paths() {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(&candidate);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    /// Configured base URL, or the provider preset's.
    pub fn effective_base_url(&self) -> Result<String> {
        if let Some(ref url) = self.provider.base_url {
            return Ok(url.trim_end_matches('/').to_string());
        }

        let preset = ProviderPreset::from_name(&self.provider.name).ok_or_else(|| {
            BridgeError::config(format!(
                "Unknown provider '{}' and no base_url configured. Known providers: {}",
                self.provider.name,
                ProviderPreset::names().join(", ")
            ))
        })?;

        Ok(preset.base_url.to_string())
    }

    /// Name of the environment variable holding the API key.
    pub fn api_key_env(&self) -> &str {
        if let Some(ref env) = self.provider.api_key_env {
            return env;
        }
        ProviderPreset::from_name(&self.provider.name)
            .map_or("OPENAI_API_KEY", |p| p.default_api_key_env)
    }

    pub fn resolve_api_key(&self) -> Result<String> {
        let env = self.api_key_env();
        std::env::var(env).map_err(|_| {
            BridgeError::config(format!(
                "Environment variable '{env}' not set. Set it with your provider API key."
            ))
        })
    }
}

/// Candidate config file locations, in search order.
pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(CONFIG_FILE_NAME)];

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join(CONFIG_DIR_NAME)
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join(CONFIG_DIR_NAME).join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join(CONFIG_DIR_NAME).join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(format!(".{CONFIG_FILE_NAME}")));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(
            f,
            r#"
port = 5000

[provider]
name = "groq"

[client]
timeout_secs = 15
max_retries = 0
strict_tool_arguments = true
headers = {{ "OpenAI-Organization" = "org-123" }}

[stream]
max_malformed_frames = 10
"#
        )
        .unwrap();

        let config = BridgeConfig::load(f.path()).unwrap();
        assert_eq!(config.port, 5000);
        assert_eq!(config.provider.name, "groq");
        assert_eq!(config.api_key_env(), "GROQ_API_KEY");
        assert_eq!(config.client.timeout(), Duration::from_secs(15));
        assert_eq!(config.client.connect_timeout(), None);
        assert_eq!(config.client.max_retries, 0);
        assert!(config.client.strict_tool_arguments);
        assert_eq!(
            config.client.headers.get("OpenAI-Organization"),
            Some(&"org-123".to_string())
        );
        assert_eq!(config.stream.max_malformed_frames, 10);
    }

    #[test]
    fn test_empty_file_uses_defaults() {
        let f = NamedTempFile::new().unwrap();
        let config = BridgeConfig::load(f.path()).unwrap();

        assert_eq!(config.port, 4222);
        assert_eq!(config.provider.name, "openai");
        assert_eq!(config.client.timeout_secs, 60);
        assert_eq!(config.client.max_retries, 2);
        assert!(!config.client.strict_tool_arguments);
        assert_eq!(config.stream.max_malformed_frames, 3);
        assert_eq!(config.effective_base_url().unwrap(), "https://api.openai.com/v1");
    }

    #[test]
    fn test_invalid_toml_is_an_error() {
        let mut f = NamedTempFile::new().unwrap();
        writeln!(f, "port = \"not a number\"").unwrap();

        assert!(matches!(
            BridgeConfig::load(f.path()),
            Err(BridgeError::Toml(_))
        ));
    }

    #[test]
    fn test_effective_base_url_override() {
        let mut config = BridgeConfig::default();
        config.provider.name = "custom".to_string();
        config.provider.base_url = Some("https://my-server.com/v1/".to_string());
        config.provider.api_key_env = Some("MY_KEY".to_string());

        assert_eq!(config.effective_base_url().unwrap(), "https://my-server.com/v1");
        assert_eq!(config.api_key_env(), "MY_KEY");
    }

    #[test]
    fn test_unknown_provider_without_base_url() {
        let mut config = BridgeConfig::default();
        config.provider.name = "nowhere".to_string();

        let err = config.effective_base_url().unwrap_err();
        assert!(err.to_string().contains("openrouter"));
        assert_eq!(config.api_key_env(), "OPENAI_API_KEY");
    }

    #[test]
    fn test_search_paths_start_in_cwd() {
        let paths = config_search_paths();
        assert_eq!(paths[0], PathBuf::from("anthropic-openai-bridge.toml"));
    }
}
