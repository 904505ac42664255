use crate::policy::{Policy, PolicyTable};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub client: ClientSettings,
    #[serde(default)]
    pub log_level: LogLevel,
    /// Per-host overrides; see [`Policy`]
    #[serde(default)]
    pub policies: HashMap<String, Policy>,
}

impl Settings {
    pub fn policy_table(&self) -> PolicyTable {
        PolicyTable::new(self.policies.clone())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_backlog")]
    pub backlog: u32,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            backlog: default_backlog(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientSettings {
    /// Upstream connect timeout in milliseconds
    #[serde(default = "default_cnn_timeout")]
    pub cnn_timeout: u64,
}

impl ClientSettings {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.cnn_timeout)
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            cnn_timeout: default_cnn_timeout(),
        }
    }
}

/// Log level
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    #[default]
    Info,
    Warning,
    Error,
    Debug,
    Silent,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    9933
}

fn default_backlog() -> u32 {
    128
}

fn default_cnn_timeout() -> u64 {
    3000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 9933);
        assert_eq!(settings.server.backlog, 128);
        assert_eq!(
            settings.client.connect_timeout(),
            Duration::from_millis(3000)
        );
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let settings: Settings = serde_yaml::from_str(
            r#"
server:
  port: 8101
policies:
  foo.test:
    ip: 203.0.113.7
    port: 8443
    ip_type: ipv4
"#,
        )
        .unwrap();

        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8101);
        assert_eq!(settings.client.cnn_timeout, 3000);

        let policy = settings.policy_table().get_policy("foo.test");
        assert_eq!(policy.ip.as_deref(), Some("203.0.113.7"));
        assert_eq!(policy.port, Some(8443));
    }
}
