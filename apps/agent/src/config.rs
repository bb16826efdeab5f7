use std::{env, fmt, fs, io, path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uplink::ControllerConfig;
use url::Url;

/// Shortest credential the controller accepts
pub const MIN_API_KEY_LEN: usize = 64;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    ReadFailed { path: path::PathBuf, source: io::Error },

    #[error("Failed to parse {path}: {source}")]
    ParseFailed { path: path::PathBuf, source: toml::de::Error },

    #[error("No config path available: neither XDG_CONFIG_HOME nor HOME is set")]
    ConfigPathUnavailable,

    #[error("{0} is required")]
    Missing(&'static str),

    #[error("API key must be at least {MIN_API_KEY_LEN} characters long")]
    ApiKeyTooShort,

    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },

    #[error("Invalid controller URL {url:?}: {source}")]
    InvalidUrl { url: String, source: url::ParseError },
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentConfig {
    pub controller: ControllerSection,
    pub agent: AgentSection,
    pub monitoring: MonitoringSection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ControllerSection {
    /// Controller address; `https://` is assumed when no scheme is given
    pub url: String,
    /// Agent server port on the controller
    pub port: u16,
    pub api_key: String,
    pub use_websocket: bool,
    pub push_connect_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub user_agent: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AgentSection {
    /// Defaults to the hostname
    pub id: String,
    pub hostname: String,
    /// Local health/status server port
    pub health_port: u16,
    pub log_level: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct MonitoringSection {
    pub probe_timeout_secs: u64,
    pub ping_timeout_secs: u64,
    pub update_queue_capacity: usize,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            url: String::new(),
            port: uplink::config::DEFAULT_CONTROLLER_PORT,
            api_key: String::new(),
            use_websocket: true,
            push_connect_timeout_secs: 10,
            request_timeout_secs: 30,
            user_agent: uplink::config::DEFAULT_USER_AGENT.into(),
        }
    }
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            id: String::new(),
            hostname: String::new(),
            health_port: 8081,
            log_level: "info".into(),
        }
    }
}

impl Default for MonitoringSection {
    fn default() -> Self {
        Self { probe_timeout_secs: 30, ping_timeout_secs: 5, update_queue_capacity: 10 }
    }
}

/// Used to ensure we are actually reading a toml file
fn normalize_toml_path(path: &path::Path) -> path::PathBuf {
    let mut path = path.to_path_buf();
    if path.extension().map(|ext| ext != "toml").unwrap_or(true) {
        path.set_extension("toml");
    }
    path
}

/// Default config path ($XDG_CONFIG_HOME/siteup/agent.toml or
/// $HOME/.config/...)
fn default_config_path(
    lookup: &impl Fn(&str) -> Option<String>,
) -> Result<path::PathBuf, ConfigError> {
    let path = if let Some(config_home) = lookup("XDG_CONFIG_HOME").filter(|v| !v.is_empty()) {
        path::PathBuf::from(config_home)
    } else if let Some(home_dir) = lookup("HOME").filter(|v| !v.is_empty()) {
        path::PathBuf::from(home_dir).join(".config")
    } else {
        return Err(ConfigError::ConfigPathUnavailable);
    };

    Ok(path.join("siteup/agent.toml"))
}

/// Hostname of this machine, `unknown` if it cannot be determined
pub fn detect_hostname() -> String {
    gethostname::gethostname()
        .into_string()
        .ok()
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

/// Prefix `https://` when no scheme is present and drop a trailing slash
fn normalize_url(raw: &str) -> String {
    let url = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    url.trim_end_matches('/').to_string()
}

fn mask(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".into();
    }
    let visible: String = secret.chars().take(4).collect();
    format!("{visible}****")
}

fn parse_port(name: &'static str, value: String) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue { name, value })
}

impl fmt::Display for AgentConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let write_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str, value: &dyn fmt::Display| {
                writeln!(f, "  {:indent$}{}: {}", "", label, value, indent = level * 2)
            }
        };
        let write_title_indented = |level: usize| {
            move |f: &mut fmt::Formatter<'_>, label: &str| {
                writeln!(f, "{:indent$}{}", "", label, indent = level * 2)
            }
        };

        let write_title_1 = write_title_indented(1);
        let write_1 = write_indented(1);

        writeln!(f, "Current Agent Configuration:")?;
        write_title_1(f, "Controller")?;
        write_1(f, "URL", &self.controller.url)?;
        write_1(f, "Port", &self.controller.port)?;
        write_1(f, "API Key", &mask(&self.controller.api_key))?;
        write_1(f, "WebSocket", &self.controller.use_websocket)?;
        write_1(f, "Push Connect Timeout (s)", &self.controller.push_connect_timeout_secs)?;
        write_1(f, "Request Timeout (s)", &self.controller.request_timeout_secs)?;
        write_1(f, "User Agent", &self.controller.user_agent)?;
        write_title_1(f, "Agent")?;
        write_1(f, "ID", &self.agent.id)?;
        write_1(f, "Hostname", &self.agent.hostname)?;
        write_1(f, "Health Port", &self.agent.health_port)?;
        write_1(f, "Log Level", &self.agent.log_level)?;
        write_title_1(f, "Monitoring")?;
        write_1(f, "Probe Timeout (s)", &self.monitoring.probe_timeout_secs)?;
        write_1(f, "Ping Timeout (s)", &self.monitoring.ping_timeout_secs)?;
        write_1(f, "Update Queue Capacity", &self.monitoring.update_queue_capacity)?;

        Ok(())
    }
}

impl AgentConfig {
    /// Load from file and process environment
    pub fn load(optional_path: Option<impl AsRef<path::Path>>) -> Result<Self, ConfigError> {
        Self::load_with(optional_path, |name| env::var(name).ok(), detect_hostname())
    }

    /// Load with an explicit environment lookup and machine hostname.
    ///
    /// Defaults, then the TOML file if it exists, then environment overrides.
    pub fn load_with(
        optional_path: Option<impl AsRef<path::Path>>,
        lookup: impl Fn(&str) -> Option<String>,
        machine_hostname: String,
    ) -> Result<Self, ConfigError> {
        let config_path = match optional_path {
            Some(path) => Some(normalize_toml_path(path.as_ref())),
            None => default_config_path(&lookup).ok(),
        };

        let mut config = match config_path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };

        config.apply_env(&lookup)?;
        config.normalize(machine_hostname);
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file
    pub fn from_file(path: &path::Path) -> Result<Self, ConfigError> {
        let raw_string = fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFailed { path: path.to_path_buf(), source })?;
        toml::from_str(&raw_string)
            .map_err(|source| ConfigError::ParseFailed { path: path.to_path_buf(), source })
    }

    fn apply_env(&mut self, lookup: &impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        let var = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(url) = var("MASTER_FQDN") {
            self.controller.url = url;
        }
        if let Some(key) = var("AGENT_API_KEY").or_else(|| var("API_KEY")) {
            self.controller.api_key = key;
        }
        if let Some(id) = var("AGENT_ID") {
            self.agent.id = id;
        }
        if let Some(port) = var("AGENT_SERVER_PORT") {
            self.controller.port = parse_port("AGENT_SERVER_PORT", port)?;
        }
        if let Some(port) = var("AGENT_PORT") {
            self.agent.health_port = parse_port("AGENT_PORT", port)?;
        }
        if let Some(level) = var("LOG_LEVEL") {
            self.agent.log_level = level.to_lowercase();
        }
        if let Some(flag) = var("USE_WEBSOCKET") {
            self.controller.use_websocket = flag.to_lowercase() != "false";
        }

        Ok(())
    }

    fn normalize(&mut self, machine_hostname: String) {
        if !self.controller.url.is_empty() {
            self.controller.url = normalize_url(&self.controller.url);
        }
        if self.agent.hostname.is_empty() {
            self.agent.hostname = machine_hostname;
        }
        if self.agent.id.is_empty() {
            self.agent.id = self.agent.hostname.clone();
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.controller.url.is_empty() {
            return Err(ConfigError::Missing("MASTER_FQDN"));
        }
        Url::parse(&self.controller.url).map_err(|source| ConfigError::InvalidUrl {
            url: self.controller.url.clone(),
            source,
        })?;

        if self.controller.api_key.is_empty() {
            return Err(ConfigError::Missing("AGENT_API_KEY"));
        }
        if self.controller.api_key.chars().count() < MIN_API_KEY_LEN {
            return Err(ConfigError::ApiKeyTooShort);
        }
        if self.agent.id.is_empty() {
            return Err(ConfigError::Missing("agent id"));
        }

        Ok(())
    }

    /// Settings handed to the transport client
    pub fn to_controller_config(&self) -> ControllerConfig {
        let mut config = ControllerConfig::new(
            self.controller.url.clone(),
            self.controller.api_key.clone(),
            self.agent.id.clone(),
        );
        config.port = self.controller.port;
        config.hostname = self.agent.hostname.clone();
        config.user_agent = self.controller.user_agent.clone();
        config.use_websocket = self.controller.use_websocket;
        config.request_timeout = Duration::from_secs(self.controller.request_timeout_secs);
        config.push_connect_timeout = Duration::from_secs(self.controller.push_connect_timeout_secs);
        config.update_queue_capacity = self.monitoring.update_queue_capacity;
        config
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.monitoring.probe_timeout_secs)
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_secs(self.monitoring.ping_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn key() -> String {
        "a".repeat(64)
    }

    fn env_of(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> =
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name| map.get(name).cloned()
    }

    fn load(pairs: &[(&str, &str)]) -> Result<AgentConfig, ConfigError> {
        let dir = tempfile::tempdir().unwrap();
        let mut all = vec![("XDG_CONFIG_HOME", dir.path().to_str().unwrap())];
        all.extend_from_slice(pairs);
        AgentConfig::load_with(None::<&path::Path>, env_of(&all), "box-1".into())
    }

    #[test]
    fn test_env_only_with_defaults() {
        let key = key();
        let config = load(&[("MASTER_FQDN", "monitor.example.com/"), ("AGENT_API_KEY", &key)])
            .unwrap();

        assert_eq!(config.controller.url, "https://monitor.example.com");
        assert_eq!(config.controller.port, 5227);
        assert!(config.controller.use_websocket);
        assert_eq!(config.agent.hostname, "box-1");
        assert_eq!(config.agent.id, "box-1");
        assert_eq!(config.agent.health_port, 8081);
        assert_eq!(config.agent.log_level, "info");
    }

    #[test]
    fn test_env_overrides() {
        let key = key();
        let config = load(&[
            ("MASTER_FQDN", "http://10.0.0.5"),
            ("API_KEY", &key),
            ("AGENT_ID", "edge-7"),
            ("AGENT_SERVER_PORT", "9000"),
            ("AGENT_PORT", "9100"),
            ("LOG_LEVEL", "DEBUG"),
            ("USE_WEBSOCKET", "FALSE"),
        ])
        .unwrap();

        assert_eq!(config.controller.url, "http://10.0.0.5");
        assert_eq!(config.controller.api_key, key);
        assert_eq!(config.agent.id, "edge-7");
        assert_eq!(config.controller.port, 9000);
        assert_eq!(config.agent.health_port, 9100);
        assert_eq!(config.agent.log_level, "debug");
        assert!(!config.controller.use_websocket);
    }

    #[test]
    fn test_use_websocket_only_disabled_by_false() {
        let key = key();
        let config =
            load(&[("MASTER_FQDN", "x.example"), ("AGENT_API_KEY", &key), ("USE_WEBSOCKET", "0")])
                .unwrap();
        assert!(config.controller.use_websocket);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(load(&[]), Err(ConfigError::Missing("MASTER_FQDN"))));
        assert!(matches!(
            load(&[("MASTER_FQDN", "x.example")]),
            Err(ConfigError::Missing("AGENT_API_KEY"))
        ));
        assert!(matches!(
            load(&[("MASTER_FQDN", "x.example"), ("AGENT_API_KEY", "short")]),
            Err(ConfigError::ApiKeyTooShort)
        ));

        let key = key();
        assert!(matches!(
            load(&[("MASTER_FQDN", "x.example"), ("AGENT_API_KEY", &key), ("AGENT_PORT", "http")]),
            Err(ConfigError::InvalidValue { name: "AGENT_PORT", .. })
        ));
    }

    #[test]
    fn test_file_then_env() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        fs::write(
            &path,
            format!(
                "[controller]\nurl = \"https://from-file.example\"\napi_key = \"{}\"\n\
                 use_websocket = false\n\n[monitoring]\nping_timeout_secs = 2\n",
                key()
            ),
        )
        .unwrap();

        let config =
            AgentConfig::load_with(Some(&path), env_of(&[("AGENT_ID", "env-id")]), "box".into())
                .unwrap();

        assert_eq!(config.controller.url, "https://from-file.example");
        assert!(!config.controller.use_websocket);
        assert_eq!(config.monitoring.ping_timeout_secs, 2);
        assert_eq!(config.monitoring.probe_timeout_secs, 30);
        assert_eq!(config.agent.id, "env-id");
    }

    #[test]
    fn test_path_without_extension_is_normalized() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("agent.toml"),
            format!("[controller]\nurl = \"a.example\"\napi_key = \"{}\"\n", key()),
        )
        .unwrap();

        let config =
            AgentConfig::load_with(Some(dir.path().join("agent")), env_of(&[]), "box".into())
                .unwrap();
        assert_eq!(config.controller.url, "https://a.example");
    }

    #[test]
    fn test_bad_toml_reports_parse_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("agent.toml");
        fs::write(&path, "[controller\n").unwrap();

        let err = AgentConfig::load_with(Some(&path), env_of(&[]), "box".into()).unwrap_err();
        assert!(matches!(err, ConfigError::ParseFailed { .. }));
    }

    #[test]
    fn test_display_masks_api_key() {
        let key = key();
        let config = load(&[("MASTER_FQDN", "x.example"), ("AGENT_API_KEY", &key)]).unwrap();
        let rendered = config.to_string();

        assert!(rendered.contains("aaaa****"));
        assert!(!rendered.contains(&key));
    }

    #[test]
    fn test_to_controller_config() {
        let key = key();
        let config = load(&[
            ("MASTER_FQDN", "x.example"),
            ("AGENT_API_KEY", &key),
            ("AGENT_SERVER_PORT", "7000"),
        ])
        .unwrap();
        let controller = config.to_controller_config();

        assert_eq!(controller.base_url, "https://x.example");
        assert_eq!(controller.port, 7000);
        assert_eq!(controller.agent_id, "box-1");
        assert_eq!(controller.hostname, "box-1");
        assert_eq!(controller.push_connect_timeout, Duration::from_secs(10));
        assert_eq!(controller.update_queue_capacity, 10);
    }
}
