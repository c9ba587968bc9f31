use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_GITHUB_API: &str = "https://api.github.com/";
pub const DEFAULT_CATALOG_REPO: &str = "decentespresso/de1app";
pub const DEFAULT_CATALOG_PATH: &str = "de1plus/profiles";
pub const DEFAULT_RELEASES_REPO: &str = "hsyhsw/de1-profile-restoration";
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalOptions {
    pub quiet: bool,
    pub verbose: u8,
    pub trace: bool,
    pub json: bool,
    pub offline: bool,
    pub root: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub(crate) struct EnvSnapshot {
    vars: HashMap<String, String>,
}

impl EnvSnapshot {
    pub(crate) fn capture() -> Self {
        Self {
            vars: env::vars().collect(),
        }
    }

    pub(crate) fn var(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    pub(crate) fn contains(&self, key: &str) -> bool {
        self.vars.contains_key(key)
    }

    #[cfg(test)]
    pub(crate) fn testing(pairs: &[(&str, &str)]) -> Self {
        let vars = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        Self { vars }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub(crate) installation: InstallationConfig,
    pub(crate) network: NetworkConfig,
    pub(crate) catalog: CatalogConfig,
}

impl Config {
    /// Builds a configuration from the process environment and CLI overrides.
    ///
    /// # Errors
    /// Returns an error if a variable holds an unusable value.
    pub fn from_env(global: &GlobalOptions) -> Result<Self> {
        let snapshot = EnvSnapshot::capture();
        Self::from_snapshot(&snapshot, global)
    }

    pub(crate) fn from_snapshot(snapshot: &EnvSnapshot, global: &GlobalOptions) -> Result<Self> {
        let online = !global.offline
            && match snapshot.var("DPK_ONLINE") {
                Some(value) => {
                    let lowered = value.trim().to_ascii_lowercase();
                    !matches!(lowered.as_str(), "0" | "false" | "no" | "off")
                }
                // present but blank counts as disabled
                None => !snapshot.contains("DPK_ONLINE"),
            };
        let timeout = match snapshot.var("DPK_HTTP_TIMEOUT") {
            Some(raw) => {
                let secs: u64 = raw
                    .trim()
                    .parse()
                    .with_context(|| format!("DPK_HTTP_TIMEOUT must be whole seconds, got '{raw}'"))?;
                if secs == 0 {
                    bail!("DPK_HTTP_TIMEOUT must be positive");
                }
                Duration::from_secs(secs)
            }
            None => DEFAULT_HTTP_TIMEOUT,
        };

        let mut api_base = snapshot
            .var("DPK_GITHUB_API")
            .unwrap_or(DEFAULT_GITHUB_API)
            .trim()
            .to_string();
        if !api_base.ends_with('/') {
            api_base.push('/');
        }
        url::Url::parse(&api_base).with_context(|| format!("invalid DPK_GITHUB_API '{api_base}'"))?;

        Ok(Self {
            installation: InstallationConfig {
                root: global
                    .root
                    .clone()
                    .or_else(|| snapshot.var("DPK_ROOT").map(PathBuf::from)),
                stock_library: snapshot.var("DPK_STOCK_LIBRARY").map(PathBuf::from),
            },
            network: NetworkConfig { online, timeout },
            catalog: CatalogConfig {
                api_base,
                catalog_repo: snapshot
                    .var("DPK_CATALOG_REPO")
                    .unwrap_or(DEFAULT_CATALOG_REPO)
                    .to_string(),
                catalog_path: snapshot
                    .var("DPK_CATALOG_PATH")
                    .unwrap_or(DEFAULT_CATALOG_PATH)
                    .trim_matches('/')
                    .to_string(),
                releases_repo: snapshot
                    .var("DPK_RELEASES_REPO")
                    .unwrap_or(DEFAULT_RELEASES_REPO)
                    .to_string(),
                token: snapshot
                    .var("DPK_GITHUB_TOKEN")
                    .or_else(|| snapshot.var("GITHUB_TOKEN"))
                    .map(ToOwned::to_owned),
            },
        })
    }

    #[must_use]
    pub fn installation(&self) -> &InstallationConfig {
        &self.installation
    }

    #[must_use]
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    #[must_use]
    pub fn catalog(&self) -> &CatalogConfig {
        &self.catalog
    }
}

#[derive(Debug, Clone)]
pub struct InstallationConfig {
    pub root: Option<PathBuf>,
    pub stock_library: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkConfig {
    pub online: bool,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct CatalogConfig {
    /// API root, always ending in `/`.
    pub api_base: String,
    pub catalog_repo: String,
    pub catalog_path: String,
    pub releases_repo: String,
    pub token: Option<String>,
}

impl std::fmt::Debug for CatalogConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CatalogConfig")
            .field("api_base", &self.api_base)
            .field("catalog_repo", &self.catalog_repo)
            .field("catalog_path", &self.catalog_path)
            .field("releases_repo", &self.releases_repo)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
