use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use terminal_bridge::{BridgeConfig, SessionConfig};

// =============================================================================
// File config (figment-deserialized from defaults / config file / env vars)
// =============================================================================
//
//   relay.toml:      [server]
//                    port = 9000
//
//   env var:         SHELL_RELAY_SERVER__PORT=9000   (double underscore = nesting)
//
//   CLI:             --insecure-port 9000            (wins over both)

const ENV_PREFIX: &str = "SHELL_RELAY_";

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerFileConfig,
    #[serde(default)]
    pub kube: KubeFileConfig,
    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Listener settings (lives under `[server]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerFileConfig {
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// How long in-flight sessions may keep running after a shutdown signal.
    #[serde(default = "default_shutdown_grace_secs")]
    pub shutdown_grace_secs: u64,
}

impl Default for ServerFileConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            port: default_port(),
            shutdown_grace_secs: default_shutdown_grace_secs(),
        }
    }
}

/// Cluster access settings (lives under `[kube]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KubeFileConfig {
    /// Explicit kubeconfig path. When set, no other source is consulted.
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    /// API server URL, overriding the one from the kubeconfig.
    #[serde(default)]
    pub master: Option<String>,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for KubeFileConfig {
    fn default() -> Self {
        Self {
            kubeconfig: None,
            master: None,
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Per-session settings (lives under `[session]`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SessionFileConfig {
    #[serde(default = "default_shell")]
    pub shell: Vec<String>,
    #[serde(default = "default_output_buffer_frames")]
    pub output_buffer_frames: usize,
    #[serde(default = "default_input_buffer_chunks")]
    pub input_buffer_chunks: usize,
    #[serde(default = "default_write_timeout_secs")]
    pub write_timeout_secs: u64,
}

impl Default for SessionFileConfig {
    fn default() -> Self {
        Self {
            shell: default_shell(),
            output_buffer_frames: default_output_buffer_frames(),
            input_buffer_chunks: default_input_buffer_chunks(),
            write_timeout_secs: default_write_timeout_secs(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    9090
}
fn default_shutdown_grace_secs() -> u64 {
    10
}
fn default_connect_timeout_secs() -> u64 {
    5
}
fn default_shell() -> Vec<String> {
    vec!["/bin/sh".to_string()]
}
fn default_output_buffer_frames() -> usize {
    256
}
fn default_input_buffer_chunks() -> usize {
    64
}
fn default_write_timeout_secs() -> u64 {
    10
}

/// Build a figment that layers: defaults → config file → SHELL_RELAY_* env vars.
///
/// Env vars use double-underscore for nesting into sections:
///   `SHELL_RELAY_SERVER__PORT=9000`  →  `server.port = 9000`
///   `SHELL_RELAY_KUBE__MASTER=https://10.0.0.1:6443`  →  `kube.master = ...`
pub fn load_config(config_file: Option<&Path>) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    let mut figment = Figment::from(Serialized::defaults(FileConfig::default()));
    if let Some(path) = config_file {
        figment = figment.merge(Toml::file(path));
    }
    figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
}

/// Values given on the command line. They win over every other layer.
#[derive(Clone, Debug, Default)]
pub struct CliOverrides {
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub kubeconfig: Option<PathBuf>,
    pub master: Option<String>,
}

impl CliOverrides {
    pub fn apply(self, fc: &mut FileConfig) {
        if let Some(bind_address) = self.bind_address {
            fc.server.bind_address = bind_address;
        }
        if let Some(port) = self.port {
            fc.server.port = port;
        }
        if let Some(kubeconfig) = self.kubeconfig {
            fc.kube.kubeconfig = Some(kubeconfig);
        }
        if let Some(master) = self.master {
            fc.kube.master = Some(master);
        }
    }
}

// =============================================================================
// Runtime config (derived from FileConfig, immutable once the server starts)
// =============================================================================

/// Cluster access settings (runtime view).
#[derive(Clone, Debug)]
pub struct KubeSettings {
    pub kubeconfig: Option<PathBuf>,
    pub master: Option<String>,
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct RelayConfig {
    pub listen_addr: SocketAddr,
    pub shutdown_grace: Duration,
    pub kube: KubeSettings,
    pub session: SessionConfig,
}

impl RelayConfig {
    pub fn from_file(fc: &FileConfig) -> Result<Self> {
        let ip: IpAddr = fc
            .server
            .bind_address
            .parse()
            .with_context(|| format!("Invalid bind address: {:?}", fc.server.bind_address))?;

        if fc.session.shell.is_empty() || fc.session.shell[0].is_empty() {
            bail!("session.shell must name a command");
        }
        if fc.session.write_timeout_secs == 0 {
            bail!("session.write_timeout_secs must be greater than zero");
        }

        Ok(Self {
            listen_addr: SocketAddr::new(ip, fc.server.port),
            shutdown_grace: Duration::from_secs(fc.server.shutdown_grace_secs),
            kube: KubeSettings {
                kubeconfig: fc.kube.kubeconfig.clone(),
                master: fc.kube.master.clone().filter(|m| !m.is_empty()),
                connect_timeout: Duration::from_secs(fc.kube.connect_timeout_secs),
            },
            session: SessionConfig {
                command: fc.session.shell.clone(),
                bridge: BridgeConfig {
                    input_capacity: fc.session.input_buffer_chunks.max(1),
                    output_capacity: fc.session.output_buffer_frames.max(1),
                    write_timeout: Duration::from_secs(fc.session.write_timeout_secs),
                },
            },
        })
    }
}
