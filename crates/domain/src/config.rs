use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub orchestrator: OrchestratorConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Bearer token gating `/v1/providers`. Empty (or unset) disables the gate.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "d_shutdown_timeout_secs")]
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            token: None,
            shutdown_timeout_secs: d_shutdown_timeout_secs(),
        }
    }
}

fn d_host() -> String {
    "localhost".into()
}
fn d_port() -> u16 {
    5758
}
fn d_shutdown_timeout_secs() -> u64 {
    30
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Cache
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Defaults to the OS user-cache-dir convention (`dirs::cache_dir()`)
    /// joined with `tfrelay/providers`) when unset.
    #[serde(default)]
    pub provider_cache_dir: Option<PathBuf>,
    /// When true, every cached provider keeps its archive on disk after
    /// extraction (the `cache_providerandarchive` behavior), not just the
    /// ones explicitly requested through the sentinel platform.
    #[serde(default)]
    pub keep_provider_archive: bool,
    #[serde(default = "d_registry_names")]
    pub registry_names: Vec<String>,
    /// Unix file mode applied to extracted provider binaries.
    #[serde(default = "d_extracted_file_mode")]
    pub extracted_file_mode: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            provider_cache_dir: None,
            keep_provider_archive: false,
            registry_names: d_registry_names(),
            extracted_file_mode: d_extracted_file_mode(),
        }
    }
}

fn d_registry_names() -> Vec<String> {
    vec![
        "registry.terraform.io".into(),
        "registry.opentofu.org".into(),
    ]
}
fn d_extracted_file_mode() -> u32 {
    0o755
}

impl CacheConfig {
    /// Resolves `provider_cache_dir`, falling back to the OS user-cache
    /// convention when unset.
    pub fn resolved_cache_dir(&self) -> PathBuf {
        self.provider_cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("tfrelay")
                .join("providers")
        })
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator (minimal collaborator stand-in — see spec Non-goals)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OrchestratorConfig {
    /// Command used to launch the downstream collaborator process once
    /// this server is listening. Empty means "print the endpoint and
    /// wait for a signal" (the behavior `tfrelay run` falls back to).
    #[serde(default)]
    pub downstream_command: Vec<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues. Empty
    /// means everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }

        if self.server.shutdown_timeout_secs == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "server.shutdown_timeout_secs".into(),
                message: "0 means no grace period — in-flight requests will be dropped on shutdown".into(),
            });
        }

        if let Some(dir) = &self.cache.provider_cache_dir {
            if dir.as_os_str().is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: "cache.provider_cache_dir".into(),
                    message: "must not be empty when set".into(),
                });
            }
        }

        if self.cache.registry_names.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "cache.registry_names".into(),
                message: "no registries configured — every request will fall through to proxying".into(),
            });
        }

        if self.cache.extracted_file_mode & !0o777 != 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "cache.extracted_file_mode".into(),
                message: format!(
                    "{:#o} is not a valid Unix permission mode",
                    self.cache.extracted_file_mode
                ),
            });
        }

        if let Some(token) = &self.server.token {
            if token.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: "server.token".into(),
                    message: "empty token is equivalent to unset — the bearer gate is disabled".into(),
                });
            }
        }

        errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_pass_validation_without_errors() {
        let config = Config::default();
        let issues = config.validate();
        assert!(issues
            .iter()
            .all(|i| i.severity != ConfigSeverity::Error));
        assert_eq!(config.server.port, 5758);
        assert_eq!(config.server.host, "localhost");
        assert_eq!(
            config.cache.registry_names,
            vec!["registry.terraform.io", "registry.opentofu.org"]
        );
    }

    #[test]
    fn empty_host_is_an_error() {
        let mut config = Config::default();
        config.server.host = String::new();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "server.host" && i.severity == ConfigSeverity::Error));
    }

    #[test]
    fn empty_registry_names_is_a_warning_not_an_error() {
        let mut config = Config::default();
        config.cache.registry_names.clear();
        let issues = config.validate();
        assert!(issues
            .iter()
            .any(|i| i.field == "cache.registry_names" && i.severity == ConfigSeverity::Warning));
        assert!(issues
            .iter()
            .all(|i| i.field != "cache.registry_names" || i.severity != ConfigSeverity::Error));
    }

    #[test]
    fn round_trips_through_toml() {
        let config = Config::default();
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&rendered).unwrap();
        assert_eq!(parsed.server.port, config.server.port);
    }
}
