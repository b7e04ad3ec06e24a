use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Backend a credential authenticates against.
///
/// The store is partitioned by provider: names and the single-active rule are
/// scoped per provider, never global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Aws,
    Azure,
    Gcp,
    /// Graph-style directory identity service.
    Directory,
}

impl Provider {
    pub const ALL: [Provider; 4] = [
        Provider::Aws,
        Provider::Azure,
        Provider::Gcp,
        Provider::Directory,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Aws => "aws",
            Provider::Azure => "azure",
            Provider::Gcp => "gcp",
            Provider::Directory => "directory",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "aws" => Ok(Provider::Aws),
            "azure" | "az" => Ok(Provider::Azure),
            "gcp" | "google" => Ok(Provider::Gcp),
            "directory" | "graph" | "entra" => Ok(Provider::Directory),
            other => Err(format!(
                "Unknown provider: {other}. Expected aws, azure, gcp, or directory."
            )),
        }
    }
}
