//! Cluster client construction.
//!
//! A cluster identifier is resolved to a kube [`Config`] by walking the
//! configuration sources in order:
//!
//! 1. the explicit `--kubeconfig` path
//! 2. the `KUBECONFIG` environment variable
//! 3. the in-cluster service account (default cluster only)
//! 4. `~/.kube/config`
//! 5. `--master` alone (default cluster only)
//!
//! A non-empty cluster identifier selects the kubeconfig context of that name.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::{Client, Config};
use std::fmt;
use std::path::{Path, PathBuf};
use terminal_bridge::{ClientError, ClientFactory};
use tracing::{debug, info};

use crate::config::KubeSettings;

/// Where a cluster config may come from, in resolution order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigSource {
    Explicit(PathBuf),
    /// Value of `KUBECONFIG`, possibly a list of paths.
    EnvVar(String),
    InCluster,
    HomeDir(PathBuf),
    MasterOnly(String),
}

impl ConfigSource {
    /// Whether a load failure ends resolution instead of trying the next source.
    fn is_final(&self) -> bool {
        !matches!(self, ConfigSource::InCluster)
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigSource::Explicit(path) => write!(f, "kubeconfig {}", path.display()),
            ConfigSource::EnvVar(value) => write!(f, "KUBECONFIG={}", value),
            ConfigSource::InCluster => write!(f, "in-cluster service account"),
            ConfigSource::HomeDir(path) => write!(f, "kubeconfig {}", path.display()),
            ConfigSource::MasterOnly(url) => write!(f, "master {}", url),
        }
    }
}

/// Sources to try for `cluster`, most specific first.
///
/// An explicit path or `KUBECONFIG` short-circuits everything after it. The
/// home-directory kubeconfig is only listed when the file exists.
pub fn config_sources(
    cluster: &str,
    explicit: Option<&Path>,
    env_kubeconfig: Option<&str>,
    home_dir: Option<&Path>,
    master: Option<&str>,
) -> Vec<ConfigSource> {
    if let Some(path) = explicit {
        return vec![ConfigSource::Explicit(path.to_path_buf())];
    }
    if let Some(value) = env_kubeconfig.filter(|v| !v.is_empty()) {
        return vec![ConfigSource::EnvVar(value.to_string())];
    }

    let mut sources = Vec::new();
    if cluster.is_empty() {
        sources.push(ConfigSource::InCluster);
    }
    if let Some(home) = home_dir {
        let path = home.join(".kube").join("config");
        if path.is_file() {
            sources.push(ConfigSource::HomeDir(path));
        }
    }
    if let Some(master) = master.filter(|_| cluster.is_empty()) {
        sources.push(ConfigSource::MasterOnly(master.to_string()));
    }
    sources
}

/// Builds one kube [`Client`] per cluster identifier.
pub struct KubeClientFactory {
    settings: KubeSettings,
    env_kubeconfig: Option<String>,
    home_dir: Option<PathBuf>,
}

impl KubeClientFactory {
    /// Factory reading `KUBECONFIG` and the home directory of this process.
    pub fn new(settings: KubeSettings) -> Self {
        Self::with_environment(
            settings,
            std::env::var("KUBECONFIG").ok(),
            dirs::home_dir(),
        )
    }

    pub fn with_environment(
        settings: KubeSettings,
        env_kubeconfig: Option<String>,
        home_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            settings,
            env_kubeconfig,
            home_dir,
        }
    }

    /// Resolve the client configuration for `cluster`.
    pub async fn resolve_config(&self, cluster: &str) -> Result<Config, ClientError> {
        let sources = config_sources(
            cluster,
            self.settings.kubeconfig.as_deref(),
            self.env_kubeconfig.as_deref(),
            self.home_dir.as_deref(),
            self.settings.master.as_deref(),
        );

        for source in sources {
            match load_source(&source, cluster).await {
                Ok(config) => {
                    info!(cluster = %cluster, source = %source, "Resolved cluster config");
                    return self
                        .finish_config(config)
                        .map_err(|e| ClientError::config_resolution(cluster, format!("{:#}", e)));
                }
                Err(e) if source.is_final() => {
                    return Err(ClientError::config_resolution(cluster, format!("{:#}", e)));
                }
                Err(e) => debug!(cluster = %cluster, source = %source, error = %e, "Config source unavailable"),
            }
        }

        Err(ClientError::config_resolution(
            cluster,
            "could not locate a kubeconfig",
        ))
    }

    fn finish_config(&self, mut config: Config) -> Result<Config> {
        if let Some(master) = &self.settings.master {
            config.cluster_url = master
                .parse()
                .with_context(|| format!("invalid master URL {:?}", master))?;
        }
        config.connect_timeout = Some(self.settings.connect_timeout);
        // Idle shells must not trip the connection read timeout.
        config.read_timeout = None;
        Ok(config)
    }
}

async fn load_source(source: &ConfigSource, cluster: &str) -> Result<Config> {
    match source {
        ConfigSource::Explicit(path) | ConfigSource::HomeDir(path) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
            from_kubeconfig(kubeconfig, cluster).await
        }
        ConfigSource::EnvVar(value) => {
            let mut merged: Option<Kubeconfig> = None;
            for path in std::env::split_paths(value).filter(|p| !p.as_os_str().is_empty()) {
                let next = Kubeconfig::read_from(&path)
                    .with_context(|| format!("failed to read kubeconfig {}", path.display()))?;
                merged = Some(match merged {
                    Some(current) => current.merge(next)?,
                    None => next,
                });
            }
            let kubeconfig = merged.ok_or_else(|| anyhow!("KUBECONFIG names no files"))?;
            from_kubeconfig(kubeconfig, cluster).await
        }
        ConfigSource::InCluster => Ok(Config::incluster()?),
        ConfigSource::MasterOnly(url) => {
            let uri = url
                .parse()
                .with_context(|| format!("invalid master URL {:?}", url))?;
            Ok(Config::new(uri))
        }
    }
}

async fn from_kubeconfig(kubeconfig: Kubeconfig, cluster: &str) -> Result<Config> {
    let options = KubeConfigOptions {
        context: (!cluster.is_empty()).then(|| cluster.to_string()),
        ..Default::default()
    };
    Config::from_custom_kubeconfig(kubeconfig, &options)
        .await
        .with_context(|| match &options.context {
            Some(context) => format!("failed to load context {:?}", context),
            None => "failed to load current context".to_string(),
        })
}

#[async_trait]
impl ClientFactory for KubeClientFactory {
    type Client = Client;

    async fn create_client(&self, cluster: &str) -> Result<Client, ClientError> {
        let config = self.resolve_config(cluster).await?;
        Client::try_from(config).map_err(|e| ClientError::client_construction(cluster, e))
    }
}
