use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::duration::{deserialize_duration, serialize_duration};
use crate::models::Provider;

/// Microsoft identity platform authority.
pub const DEFAULT_MS_AUTHORITY: &str = "https://login.microsoftonline.com";
/// Azure CLI's public client id. It belongs to the family-of-client-ids group,
/// so its refresh tokens can be redeemed for other family members.
pub const AZURE_CLI_CLIENT_ID: &str = "04b07795-8ddb-461a-bbee-02f9e1bf7b46";
/// Microsoft Office public client id (also a family member).
pub const OFFICE_CLIENT_ID: &str = "d3590ed6-52b3-4102-aeff-aad2292ab01c";
pub const DEFAULT_GCP_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const DEFAULT_GCP_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub const DEFAULT_AZURE_SCOPE: &str = "https://management.azure.com/.default offline_access";
pub const DEFAULT_GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default offline_access";

/// OAuth issuer settings for a Microsoft identity platform provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub authority: String,
    /// Tenant id or domain; `common` / `organizations` for multi-tenant.
    pub tenant: String,
    pub client_id: String,
    /// Scope requested on refresh; the provider default when unset.
    pub scope: Option<String>,
}

impl OAuthConfig {
    fn tenant_or<'a>(&'a self, tenant: Option<&'a str>) -> &'a str {
        tenant.unwrap_or(&self.tenant)
    }

    pub fn token_endpoint(&self, tenant: Option<&str>) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority.trim_end_matches('/'),
            self.tenant_or(tenant)
        )
    }

    pub fn device_code_endpoint(&self, tenant: Option<&str>) -> String {
        format!(
            "{}/{}/oauth2/v2.0/devicecode",
            self.authority.trim_end_matches('/'),
            self.tenant_or(tenant)
        )
    }
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            authority: DEFAULT_MS_AUTHORITY.to_string(),
            tenant: "common".to_string(),
            client_id: AZURE_CLI_CLIENT_ID.to_string(),
            scope: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    /// Region used when a static key carries no region of its own.
    pub default_region: String,
    /// STS endpoint override. Defaults to the regional endpoint.
    pub sts_endpoint: Option<String>,
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            default_region: "us-east-1".to_string(),
            sts_endpoint: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpConfig {
    pub token_uri: String,
    pub scope: String,
}

impl Default for GcpConfig {
    fn default() -> Self {
        Self {
            token_uri: DEFAULT_GCP_TOKEN_URI.to_string(),
            scope: DEFAULT_GCP_SCOPE.to_string(),
        }
    }
}

fn default_cli_timeout() -> Duration {
    Duration::from_secs(5 * 60)
}

/// External CLI tool settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Upper bound on a single CLI invocation (interactive logins included).
    #[serde(
        default = "default_cli_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,

    /// Explicit `az` path, checked before the default locations.
    pub az_path: Option<PathBuf>,

    /// Explicit `gcloud` path, checked before the default locations.
    pub gcloud_path: Option<PathBuf>,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            timeout: default_cli_timeout(),
            az_path: None,
            gcloud_path: None,
        }
    }
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_device_code_timeout() -> Duration {
    Duration::from_secs(15 * 60)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceCodeConfig {
    /// Poll interval used when the server does not suggest one.
    #[serde(
        default = "default_poll_interval",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub poll_interval: Duration,

    /// Give up on the flow after this long, even if the code is still valid.
    #[serde(
        default = "default_device_code_timeout",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub timeout: Duration,
}

impl Default for DeviceCodeConfig {
    fn default() -> Self {
        Self {
            poll_interval: default_poll_interval(),
            timeout: default_device_code_timeout(),
        }
    }
}

fn default_expiry_skew() -> Duration {
    Duration::from_secs(60)
}

/// Application configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to data directory. If relative, resolved from config file location.
    /// If not specified, defaults to the config file's directory.
    pub data_dir: Option<PathBuf>,

    /// Tokens expiring within this margin are treated as already expired.
    #[serde(
        default = "default_expiry_skew",
        deserialize_with = "deserialize_duration",
        serialize_with = "serialize_duration"
    )]
    pub expiry_skew: Duration,

    pub aws: AwsConfig,
    pub azure: OAuthConfig,
    pub directory: OAuthConfig,
    pub gcp: GcpConfig,
    pub cli: CliConfig,
    pub device_code: DeviceCodeConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: None,
            expiry_skew: default_expiry_skew(),
            aws: AwsConfig::default(),
            azure: OAuthConfig::default(),
            directory: OAuthConfig::default(),
            gcp: GcpConfig::default(),
            cli: CliConfig::default(),
            device_code: DeviceCodeConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// OAuth issuer for providers that mint bearer tokens through the
    /// Microsoft identity platform.
    pub fn oauth(&self, provider: Provider) -> Option<&OAuthConfig> {
        match provider {
            Provider::Azure => Some(&self.azure),
            Provider::Directory => Some(&self.directory),
            Provider::Aws | Provider::Gcp => None,
        }
    }

    /// Token endpoint used to refresh bearer tokens of `provider`.
    pub fn token_endpoint(&self, provider: Provider, tenant: Option<&str>) -> Option<String> {
        match provider {
            Provider::Gcp => Some(self.gcp.token_uri.clone()),
            _ => self.oauth(provider).map(|o| o.token_endpoint(tenant)),
        }
    }

    /// Scope requested when refreshing or minting tokens for `provider`.
    pub fn scope(&self, provider: Provider) -> String {
        let configured = self.oauth(provider).and_then(|o| o.scope.clone());
        configured.unwrap_or_else(|| {
            match provider {
                Provider::Azure => DEFAULT_AZURE_SCOPE,
                Provider::Directory => DEFAULT_GRAPH_SCOPE,
                Provider::Gcp | Provider::Aws => self.gcp.scope.as_str(),
            }
            .to_string()
        })
    }

    /// Resolve the data directory path.
    ///
    /// If `data_dir` is set and relative, it's resolved relative to `config_dir`.
    /// If `data_dir` is not set, returns `config_dir`.
    pub fn resolve_data_dir(&self, config_dir: &Path) -> PathBuf {
        match &self.data_dir {
            Some(data_dir) if data_dir.is_absolute() => data_dir.clone(),
            Some(data_dir) => config_dir.join(data_dir),
            None => config_dir.to_path_buf(),
        }
    }
}

/// Loaded configuration with resolved paths.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// The resolved data directory path.
    pub data_dir: PathBuf,
    pub settings: Config,
}

/// Returns the default config file path.
///
/// Resolution order:
/// 1. `./accesskeep.toml` if it exists in current directory
/// 2. `~/.local/share/accesskeep/accesskeep.toml` (XDG data directory)
pub fn default_config_path() -> PathBuf {
    let local_config = PathBuf::from("accesskeep.toml");
    if local_config.exists() {
        return local_config;
    }

    if let Some(data_dir) = dirs::data_dir() {
        return data_dir.join("accesskeep").join("accesskeep.toml");
    }

    local_config
}

impl ResolvedConfig {
    /// Load and resolve config from a file path.
    pub fn load(config_path: &Path) -> Result<Self> {
        let config_path = config_path
            .canonicalize()
            .with_context(|| format!("Config file not found: {}", config_path.display()))?;
        let config_dir = config_path
            .parent()
            .context("Config file has no parent directory")?;

        let settings = Config::load(&config_path)?;
        Ok(Self {
            data_dir: settings.resolve_data_dir(config_dir),
            settings,
        })
    }

    /// Load config, falling back to defaults if the file doesn't exist.
    ///
    /// Without a file, the directory the config would live in becomes the
    /// data directory.
    pub fn load_or_default(config_path: &Path) -> Result<Self> {
        if config_path.exists() {
            return Self::load(config_path);
        }

        let config_path = if config_path.is_relative() {
            std::env::current_dir()
                .context("Failed to get current directory")?
                .join(config_path)
        } else {
            config_path.to_path_buf()
        };
        let config_dir = config_path
            .parent()
            .context("Config path has no parent directory")?;

        Ok(Self {
            data_dir: config_dir.to_path_buf(),
            settings: Config::default(),
        })
    }

    /// Config rooted at an explicit data directory with default settings.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            settings: Config::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_default_data_dir_is_config_dir() {
        let config = Config::default();
        let config_dir = Path::new("/home/op/engagement");
        assert_eq!(
            config.resolve_data_dir(config_dir),
            PathBuf::from("/home/op/engagement")
        );
    }

    #[test]
    fn test_relative_and_absolute_data_dir() {
        let config_dir = Path::new("/home/op/engagement");
        let relative = Config {
            data_dir: Some(PathBuf::from("creds")),
            ..Default::default()
        };
        assert_eq!(
            relative.resolve_data_dir(config_dir),
            PathBuf::from("/home/op/engagement/creds")
        );

        let absolute = Config {
            data_dir: Some(PathBuf::from("/var/lib/accesskeep")),
            ..Default::default()
        };
        assert_eq!(
            absolute.resolve_data_dir(config_dir),
            PathBuf::from("/var/lib/accesskeep")
        );
    }

    #[test]
    fn test_load_empty_config_uses_defaults() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("accesskeep.toml");
        std::fs::File::create(&config_path)?;

        let config = Config::load(&config_path)?;
        assert_eq!(config.data_dir, None);
        assert_eq!(config.expiry_skew, Duration::from_secs(60));
        assert_eq!(config.azure.client_id, AZURE_CLI_CLIENT_ID);
        assert_eq!(config.scope(Provider::Directory), DEFAULT_GRAPH_SCOPE);
        assert_eq!(config.scope(Provider::Gcp), DEFAULT_GCP_SCOPE);
        assert_eq!(config.device_code.timeout, Duration::from_secs(900));
        Ok(())
    }

    #[test]
    fn test_load_sections() -> Result<()> {
        let dir = TempDir::new()?;
        let config_path = dir.path().join("accesskeep.toml");
        let mut file = std::fs::File::create(&config_path)?;
        writeln!(file, "data_dir = \"./state\"")?;
        writeln!(file, "expiry_skew = \"2m\"")?;
        writeln!(file, "[azure]")?;
        writeln!(file, "tenant = \"contoso.onmicrosoft.com\"")?;
        writeln!(file, "[directory]")?;
        writeln!(file, "client_id = \"{OFFICE_CLIENT_ID}\"")?;
        writeln!(file, "[device_code]")?;
        writeln!(file, "poll_interval = \"2s\"")?;
        writeln!(file, "[cli]")?;
        writeln!(file, "timeout = \"90s\"")?;
        writeln!(file, "az_path = \"/opt/az/bin/az\"")?;

        let resolved = ResolvedConfig::load(&config_path)?;
        let settings = &resolved.settings;
        assert!(resolved.data_dir.ends_with("state"));
        assert_eq!(settings.expiry_skew, Duration::from_secs(120));
        assert_eq!(settings.azure.tenant, "contoso.onmicrosoft.com");
        assert_eq!(settings.azure.client_id, AZURE_CLI_CLIENT_ID);
        assert_eq!(settings.directory.client_id, OFFICE_CLIENT_ID);
        assert_eq!(settings.scope(Provider::Directory), DEFAULT_GRAPH_SCOPE);
        assert_eq!(
            settings.token_endpoint(Provider::Azure, None).as_deref(),
            Some("https://login.microsoftonline.com/contoso.onmicrosoft.com/oauth2/v2.0/token")
        );
        assert_eq!(settings.token_endpoint(Provider::Aws, None), None);
        assert_eq!(settings.device_code.poll_interval, Duration::from_secs(2));
        assert_eq!(settings.device_code.timeout, Duration::from_secs(900));
        assert_eq!(settings.cli.timeout, Duration::from_secs(90));
        assert_eq!(settings.cli.az_path, Some(PathBuf::from("/opt/az/bin/az")));
        Ok(())
    }

    #[test]
    fn test_endpoints() {
        let oauth = OAuthConfig {
            authority: "https://login.example/".to_string(),
            ..Default::default()
        };
        assert_eq!(
            oauth.token_endpoint(None),
            "https://login.example/common/oauth2/v2.0/token"
        );
        assert_eq!(
            oauth.device_code_endpoint(Some("t1")),
            "https://login.example/t1/oauth2/v2.0/devicecode"
        );
    }

    #[test]
    fn test_missing_config_falls_back() -> Result<()> {
        let dir = TempDir::new()?;
        let resolved = ResolvedConfig::load_or_default(&dir.path().join("missing.toml"))?;
        assert_eq!(resolved.data_dir, dir.path());
        Ok(())
    }
}
