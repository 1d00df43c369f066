//! Server configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::account::{AccountProfile, AccountRegistry};

/// Server configuration
///
/// Every field has a default so that an empty environment yields a working
/// setup. Values are layered from an optional `fleet.toml` and then `FLEET_*`
/// environment variables (e.g. `FLEET_HTTP_PORT=3100`).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// HTTP server host
    #[serde(default = "default_http_host")]
    pub http_host: String,

    /// HTTP server port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// JSON document holding the instance list
    #[serde(default = "default_instances_file")]
    pub instances_file: PathBuf,

    /// Root directory for credential files, partitioned per account type
    #[serde(default = "default_tokens_dir")]
    pub tokens_dir: PathBuf,

    /// Worker executable spawned for each instance
    #[serde(default = "default_worker_command")]
    pub worker_command: String,

    /// Extra arguments passed to the worker executable
    #[serde(default)]
    pub worker_args: Vec<String>,

    /// Address the worker binds to (passed as `HOST`)
    #[serde(default = "default_worker_host")]
    pub worker_host: String,

    /// Grace period between SIGTERM and SIGKILL when stopping a worker
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,

    /// Connect timeout for the port-in-use probe
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,

    /// Timeout for every provider HTTP call
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,

    /// Upper bound on quota fetches running at the same time
    #[serde(default = "default_max_concurrent_fetches")]
    pub max_concurrent_fetches: usize,

    /// OAuth token endpoint used for refresh
    #[serde(default = "default_token_uri")]
    pub token_uri: String,

    /// Identity endpoint shared by all account types
    #[serde(default = "default_userinfo_url")]
    pub userinfo_url: String,

    /// Cloud resource listing used for project discovery
    #[serde(default = "default_resource_manager_url")]
    pub resource_manager_url: String,

    /// API base URL for `standard` accounts
    #[serde(default = "default_standard_base_url")]
    pub standard_base_url: String,

    #[serde(default)]
    pub standard_client_id: String,

    #[serde(default)]
    pub standard_client_secret: String,

    /// API base URL for `alternate` accounts
    #[serde(default = "default_alternate_base_url")]
    pub alternate_base_url: String,

    #[serde(default)]
    pub alternate_client_id: String,

    #[serde(default)]
    pub alternate_client_secret: String,

    /// Emit logs as JSON lines
    #[serde(default)]
    pub log_json: bool,

    /// Stop all tracked workers when the server shuts down
    #[serde(default = "default_stop_workers_on_shutdown")]
    pub stop_workers_on_shutdown: bool,
}

fn default_http_host() -> String {
    "0.0.0.0".to_string()
}

fn default_http_port() -> u16 {
    3000
}

fn default_instances_file() -> PathBuf {
    PathBuf::from("servers_config.json")
}

fn default_tokens_dir() -> PathBuf {
    PathBuf::from("tokens")
}

fn default_worker_command() -> String {
    "proxy-worker".to_string()
}

fn default_worker_host() -> String {
    "0.0.0.0".to_string()
}

fn default_stop_timeout_secs() -> u64 {
    3
}

fn default_probe_timeout_ms() -> u64 {
    300
}

fn default_http_timeout_secs() -> u64 {
    8
}

fn default_max_concurrent_fetches() -> usize {
    8
}

fn default_token_uri() -> String {
    "https://oauth2.googleapis.com/token".to_string()
}

fn default_userinfo_url() -> String {
    "https://www.googleapis.com/oauth2/v2/userinfo".to_string()
}

fn default_resource_manager_url() -> String {
    "https://cloudresourcemanager.googleapis.com/v1/projects".to_string()
}

fn default_standard_base_url() -> String {
    "https://cloudcode-pa.googleapis.com".to_string()
}

fn default_alternate_base_url() -> String {
    "https://daily-cloudcode-pa.googleapis.com".to_string()
}

fn default_stop_workers_on_shutdown() -> bool {
    true
}

impl Config {
    /// Load configuration from `fleet.toml` (optional) and `FLEET_*` variables
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name("fleet").required(false))
            .add_source(
                config::Environment::with_prefix("FLEET")
                    .try_parsing(true)
                    .list_separator(" ")
                    .with_list_parse_key("worker_args"),
            )
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }

    /// Build the per-type provider profiles from the configured endpoints
    /// and client credentials
    pub fn account_registry(&self) -> AccountRegistry {
        let standard = AccountProfile {
            client_id: self.standard_client_id.clone(),
            client_secret: self.standard_client_secret.clone(),
            base_url: self.standard_base_url.clone(),
            token_uri: self.token_uri.clone(),
            ..AccountProfile::standard()
        };
        let alternate = AccountProfile {
            client_id: self.alternate_client_id.clone(),
            client_secret: self.alternate_client_secret.clone(),
            base_url: self.alternate_base_url.clone(),
            token_uri: self.token_uri.clone(),
            ..AccountProfile::alternate()
        };
        AccountRegistry::new(standard, alternate)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_host: default_http_host(),
            http_port: default_http_port(),
            instances_file: default_instances_file(),
            tokens_dir: default_tokens_dir(),
            worker_command: default_worker_command(),
            worker_args: Vec::new(),
            worker_host: default_worker_host(),
            stop_timeout_secs: default_stop_timeout_secs(),
            probe_timeout_ms: default_probe_timeout_ms(),
            http_timeout_secs: default_http_timeout_secs(),
            max_concurrent_fetches: default_max_concurrent_fetches(),
            token_uri: default_token_uri(),
            userinfo_url: default_userinfo_url(),
            resource_manager_url: default_resource_manager_url(),
            standard_base_url: default_standard_base_url(),
            standard_client_id: String::new(),
            standard_client_secret: String::new(),
            alternate_base_url: default_alternate_base_url(),
            alternate_client_id: String::new(),
            alternate_client_secret: String::new(),
            log_json: false,
            stop_workers_on_shutdown: default_stop_workers_on_shutdown(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::account::AccountType;

    #[test]
    fn test_defaults_deserialize_from_empty_source() {
        let config: Config = serde_json::from_str("{}").expect("Failed to parse empty config");
        assert_eq!(config.http_port, 3000);
        assert_eq!(config.stop_timeout(), Duration::from_secs(3));
        assert!(config.worker_args.is_empty());
        assert!(config.stop_workers_on_shutdown);
    }

    #[test]
    fn test_account_registry_uses_configured_endpoints() {
        let config = Config {
            standard_base_url: "http://127.0.0.1:9".to_string(),
            alternate_client_id: "alt-client".to_string(),
            token_uri: "http://127.0.0.1:9/token".to_string(),
            ..Config::default()
        };

        let registry = config.account_registry();
        assert_eq!(registry.get(AccountType::Standard).base_url, "http://127.0.0.1:9");
        assert_eq!(registry.get(AccountType::Alternate).client_id, "alt-client");
        assert_eq!(
            registry.get(AccountType::Alternate).token_uri,
            "http://127.0.0.1:9/token"
        );
    }
}
