use crate::policy::{AddressScope, FailPolicy};
use crate::timeouts::{ms, secs};
use crate::{Result, ScanError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct Config {
    #[serde(default)]
    pub scan: ScanOptions,
    #[serde(default)]
    pub policy: PolicyConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

/// Resolved options for one scan. Immutable once the scan starts.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScanOptions {
    #[serde(default = "default_true")]
    pub use_cookie: bool,
    #[serde(default = "default_true")]
    pub javascript_enabled: bool,
    #[serde(default = "default_true")]
    pub hosted_locally: bool,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_log_file")]
    pub log_file: PathBuf,
    #[serde(default)]
    pub cookie_dir: Option<PathBuf>,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_ms: u64,
    #[serde(default = "default_resource_timeout")]
    pub resource_timeout_ms: u64,
    #[serde(default = "default_max_scan")]
    pub max_scan_secs: u64,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            use_cookie: true,
            javascript_enabled: true,
            hosted_locally: true,
            url: None,
            log_file: default_log_file(),
            cookie_dir: None,
            idle_timeout_ms: default_idle_timeout(),
            resource_timeout_ms: default_resource_timeout(),
            max_scan_secs: default_max_scan(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PolicyConfig {
    #[serde(default)]
    pub address_scope: AddressScope,
    #[serde(default)]
    pub fail_policy: FailPolicy,
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_ms: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            address_scope: AddressScope::default(),
            fail_policy: FailPolicy::default(),
            resolve_timeout_ms: default_resolve_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    pub chrome_path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub headless: bool,
    pub user_data_dir: Option<PathBuf>,
    #[serde(default)]
    pub no_sandbox: bool,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            chrome_path: None,
            headless: true,
            user_data_dir: None,
            no_sandbox: false,
            request_timeout_secs: default_request_timeout(),
            extra_args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct OutputConfig {
    #[serde(default)]
    pub json_pretty: bool,
}

fn default_true() -> bool {
    true
}
fn default_log_file() -> PathBuf {
    PathBuf::from("scan.json")
}
fn default_idle_timeout() -> u64 {
    ms::IDLE_QUIET
}
fn default_resource_timeout() -> u64 {
    ms::RESOURCE
}
fn default_resolve_timeout() -> u64 {
    ms::RESOLVE
}
fn default_max_scan() -> u64 {
    secs::MAX_SCAN
}
fn default_request_timeout() -> u64 {
    secs::REQUEST
}

pub fn default_config_path() -> Result<PathBuf> {
    default_config_dir().map(|p| p.join("config.toml"))
}

pub fn default_config_dir() -> Result<PathBuf> {
    dirs::config_dir()
        .map(|p| p.join("adscan"))
        .ok_or_else(|| ScanError::ConfigError("Could not determine config directory".into()))
}

impl Config {
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        let global_path = default_config_path()?;
        if global_path.exists() {
            let content = std::fs::read_to_string(&global_path)?;
            config = toml::from_str(&content)?;
        }

        let project_path = PathBuf::from(".adscan.toml");
        if project_path.exists() {
            let content = std::fs::read_to_string(&project_path)?;
            let project_config: Config = toml::from_str(&content)?;
            config = config.merge(project_config);
        }

        config.load_from_env();

        Ok(config)
    }

    pub fn load_with_overrides(&self, cli_overrides: ConfigOverrides) -> Self {
        let mut config = self.clone();

        if let Some(use_cookie) = cli_overrides.use_cookie {
            config.scan.use_cookie = use_cookie;
        }
        if let Some(enabled) = cli_overrides.javascript_enabled {
            config.scan.javascript_enabled = enabled;
        }
        if let Some(hosted_locally) = cli_overrides.hosted_locally {
            config.scan.hosted_locally = hosted_locally;
        }
        if let Some(url) = cli_overrides.url {
            config.scan.url = Some(url);
        }
        if let Some(log_file) = cli_overrides.log_file {
            config.scan.log_file = log_file;
        }
        if let Some(cookie_dir) = cli_overrides.cookie_dir {
            config.scan.cookie_dir = Some(cookie_dir);
        }
        if let Some(chrome_path) = cli_overrides.chrome_path {
            config.browser.chrome_path = Some(chrome_path);
        }
        if let Some(headless) = cli_overrides.headless {
            config.browser.headless = headless;
        }
        if cli_overrides.fail_closed {
            config.policy.fail_policy = FailPolicy::Closed;
        }
        if let Some(json) = cli_overrides.json_pretty {
            config.output.json_pretty = json;
        }

        config
    }

    fn merge(mut self, other: Config) -> Self {
        if other.browser.chrome_path.is_some() {
            self.browser.chrome_path = other.browser.chrome_path;
        }
        if other.browser.user_data_dir.is_some() {
            self.browser.user_data_dir = other.browser.user_data_dir;
        }
        if !other.browser.extra_args.is_empty() {
            self.browser.extra_args = other.browser.extra_args;
        }
        if other.scan.cookie_dir.is_some() {
            self.scan.cookie_dir = other.scan.cookie_dir;
        }
        if other.scan.url.is_some() {
            self.scan.url = other.scan.url;
        }
        // A project file may tighten the fail policy but never loosen it.
        if other.policy.fail_policy == FailPolicy::Closed {
            self.policy.fail_policy = FailPolicy::Closed;
        }
        self
    }

    fn load_from_env(&mut self) {
        if let Ok(path) = std::env::var("CHROME_PATH") {
            self.browser.chrome_path = Some(PathBuf::from(path));
        }
        if let Ok(dir) = std::env::var("ADSCAN_COOKIE_DIR") {
            self.scan.cookie_dir = Some(PathBuf::from(dir));
        }
        if let Ok(policy) = std::env::var("ADSCAN_FAIL_POLICY") {
            match policy.to_ascii_lowercase().as_str() {
                "closed" => self.policy.fail_policy = FailPolicy::Closed,
                "open" => self.policy.fail_policy = FailPolicy::Open,
                other => tracing::warn!("Ignoring unknown ADSCAN_FAIL_POLICY '{}'", other),
            }
        }
        if let Ok(timeout) = std::env::var("ADSCAN_IDLE_TIMEOUT_MS")
            && let Ok(timeout) = timeout.parse()
        {
            self.scan.idle_timeout_ms = timeout;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scan.idle_timeout_ms == 0 {
            return Err(ScanError::ConfigError(
                "idle_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.scan.resource_timeout_ms == 0 {
            return Err(ScanError::ConfigError(
                "resource_timeout_ms must be greater than 0".into(),
            ));
        }

        if self.scan.max_scan_secs == 0 {
            return Err(ScanError::ConfigError(
                "max_scan_secs must be greater than 0".into(),
            ));
        }

        if self.policy.resolve_timeout_ms == 0 {
            return Err(ScanError::ConfigError(
                "resolve_timeout_ms must be greater than 0".into(),
            ));
        }

        // A verdict must land before the resource can time out, or a block is lost.
        if self.policy.resolve_timeout_ms >= self.scan.resource_timeout_ms {
            return Err(ScanError::ConfigError(format!(
                "resolve_timeout_ms ({}) must be less than resource_timeout_ms ({})",
                self.policy.resolve_timeout_ms, self.scan.resource_timeout_ms
            )));
        }

        if let Some(ref url) = self.scan.url {
            url::Url::parse(url).map_err(|e| ScanError::InvalidUrl(format!("{}: {}", url, e)))?;
        }

        if let Some(ref path) = self.browser.chrome_path
            && !path.exists()
        {
            return Err(ScanError::ConfigError(format!(
                "Chrome path does not exist: {}",
                path.display()
            )));
        }

        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub use_cookie: Option<bool>,
    pub javascript_enabled: Option<bool>,
    pub hosted_locally: Option<bool>,
    pub url: Option<String>,
    pub log_file: Option<PathBuf>,
    pub cookie_dir: Option<PathBuf>,
    pub chrome_path: Option<PathBuf>,
    pub headless: Option<bool>,
    pub fail_closed: bool,
    pub json_pretty: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scan_options_default() {
        let options = ScanOptions::default();
        assert!(options.use_cookie);
        assert!(options.javascript_enabled);
        assert!(options.hosted_locally);
        assert!(options.url.is_none());
        assert_eq!(options.idle_timeout_ms, 10_000);
        assert_eq!(options.resource_timeout_ms, 10_000);
    }

    #[test]
    fn test_policy_config_default_fails_open() {
        let config = PolicyConfig::default();
        assert_eq!(config.fail_policy, FailPolicy::Open);
        assert_eq!(config.address_scope, AddressScope::Extended);
        assert_eq!(config.resolve_timeout_ms, 3_000);
    }

    #[test]
    fn test_config_validate_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_invalid_timeouts() {
        let mut config = Config::default();
        config.scan.idle_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.policy.resolve_timeout_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_resolve_timeout_must_undercut_resource_timeout() {
        let mut config = Config::default();
        config.scan.resource_timeout_ms = 2_000;
        config.policy.resolve_timeout_ms = 2_000;
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ScanError::ConfigError(_)));
        assert!(err.to_string().contains("resolve_timeout_ms"));

        config.policy.resolve_timeout_ms = 1_999;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validate_invalid_url() {
        let mut config = Config::default();
        config.scan.url = Some("not a url".into());
        assert!(matches!(config.validate(), Err(ScanError::InvalidUrl(_))));
    }

    #[test]
    fn test_config_load_with_overrides() {
        let config = Config::default();
        let overrides = ConfigOverrides {
            use_cookie: Some(false),
            javascript_enabled: Some(false),
            hosted_locally: Some(false),
            url: Some("http://127.0.0.1:8000/ad.html".into()),
            log_file: Some(PathBuf::from("/tmp/out.json")),
            fail_closed: true,
            ..Default::default()
        };

        let result = config.load_with_overrides(overrides);
        assert!(!result.scan.use_cookie);
        assert!(!result.scan.javascript_enabled);
        assert!(!result.scan.hosted_locally);
        assert_eq!(result.scan.url.as_deref(), Some("http://127.0.0.1:8000/ad.html"));
        assert_eq!(result.scan.log_file, PathBuf::from("/tmp/out.json"));
        assert_eq!(result.policy.fail_policy, FailPolicy::Closed);
    }

    #[test]
    fn test_config_from_toml() {
        let config: Config = toml::from_str(
            r#"
            [scan]
            hosted_locally = false
            idle_timeout_ms = 5000

            [policy]
            address_scope = "rfc1918"
            fail_policy = "closed"
            "#,
        )
        .unwrap();

        assert!(!config.scan.hosted_locally);
        assert!(config.scan.use_cookie);
        assert_eq!(config.scan.idle_timeout_ms, 5000);
        assert_eq!(config.policy.address_scope, AddressScope::Rfc1918);
        assert_eq!(config.policy.fail_policy, FailPolicy::Closed);
        assert!(config.browser.headless);
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("[scan]"));
        assert!(toml_str.contains("[policy]"));

        let parsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.scan.idle_timeout_ms, config.scan.idle_timeout_ms);
    }
}
