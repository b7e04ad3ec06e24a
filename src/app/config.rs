use std::path::Path;

use serde_json::{json, Value};

use crate::config::{OAuthConfig, ResolvedConfig};
use crate::duration::format_duration;
use crate::models::Provider;

fn issuer(config: &ResolvedConfig, provider: Provider, oauth: &OAuthConfig) -> Value {
    json!({
        "authority": oauth.authority,
        "tenant": oauth.tenant,
        "client_id": oauth.client_id,
        "scope": config.settings.scope(provider),
        "token_endpoint": oauth.token_endpoint(None),
    })
}

pub fn config_output(config_path: &Path, config: &ResolvedConfig) -> Value {
    let settings = &config.settings;
    json!({
        "config_file": config_path.display().to_string(),
        "data_directory": config.data_dir.display().to_string(),
        "credentials_directory": config.data_dir.join("credentials").display().to_string(),
        "expiry_skew": format_duration(settings.expiry_skew),
        "aws": {
            "default_region": settings.aws.default_region,
            "sts_endpoint": settings.aws.sts_endpoint,
        },
        "azure": issuer(config, Provider::Azure, &settings.azure),
        "directory": issuer(config, Provider::Directory, &settings.directory),
        "gcp": {
            "token_uri": settings.gcp.token_uri,
            "scope": settings.gcp.scope,
        },
        "cli": {
            "timeout": format_duration(settings.cli.timeout),
            "az_path": settings.cli.az_path,
            "gcloud_path": settings.cli.gcloud_path,
        },
        "device_code": {
            "poll_interval": format_duration(settings.device_code.poll_interval),
            "timeout": format_duration(settings.device_code.timeout),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shows_resolved_directories_and_defaults() {
        let config = ResolvedConfig::with_data_dir("/srv/accesskeep");
        let out = config_output(Path::new("/srv/accesskeep/accesskeep.toml"), &config);
        assert_eq!(out["credentials_directory"], "/srv/accesskeep/credentials");
        assert_eq!(out["expiry_skew"], "1m");
        assert_eq!(out["device_code"]["timeout"], "15m");
        assert_eq!(
            out["directory"]["scope"],
            "https://graph.microsoft.com/.default offline_access"
        );
    }
}
