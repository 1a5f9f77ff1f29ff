//! On-disk tunnel configuration.
//!
//! The file is YAML with a list of jump `nodes`, each carrying its own
//! `tunnels`, plus optional engine `settings`. Parsing is split in two steps:
//! serde produces the raw [`TunnelsFile`], then [`TunnelsFile::into_plan`]
//! validates every address, credential and host-key choice and produces a
//! [`ForwardPlan`]. Both steps are synchronous and happen before any socket is
//! opened, so a bad file never leaves half a tunnel set running.

use std::{
    collections::HashSet,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    net::{EndpointAddress, InvalidAddressError, parse_endpoint},
    settings::{EngineSettings, RestartPolicy, SessionSettings, ShutdownMode},
    ssh::{Credential, HostKeyPolicy, JumpNode, TunnelSpec},
};

/// Default configuration file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".tunnels.yaml";

const DEFAULT_RESTART_BACKOFF_MS: u64 = 500;

/// Errors raised while loading or validating the configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {origin}: {source}")]
    Parse {
        origin: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("configuration defines no jump nodes")]
    NoNodes,

    #[error("jump node {0} is defined more than once")]
    DuplicateNode(String),

    #[error("jump node {node}: {field} must not be empty")]
    EmptyField { node: String, field: &'static str },

    #[error("jump node {node}: {field}: {source}")]
    InvalidAddress {
        node: String,
        field: String,
        #[source]
        source: InvalidAddressError,
    },

    #[error("jump node {node}: {message}")]
    HostKeyPolicy { node: String, message: String },

    #[error("jump node {node}: {message}")]
    Credential { node: String, message: String },

    #[error("jump node {node} has no tunnels")]
    NoTunnels { node: String },
}

/// Raw file layout as written by the operator.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TunnelsFile {
    #[serde(default)]
    pub nodes: Vec<RawJumpNode>,
    #[serde(default)]
    pub settings: RawSettings,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawJumpNode {
    pub name: Option<String>,
    pub user: String,
    pub addr: String,
    pub private_key_path: Option<PathBuf>,
    pub passphrase_env: Option<String>,
    pub password_env: Option<String>,
    pub server_public_key: Option<String>,
    pub host_key_fingerprint: Option<String>,
    #[serde(default)]
    pub insecure_ignore_host_key: bool,
    #[serde(default)]
    pub tunnels: Vec<RawTunnel>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTunnel {
    pub local: String,
    pub target: String,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RawShutdownMode {
    Graceful,
    Immediate,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawRestart {
    pub max_restarts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_backoff_ms() -> u64 {
    DEFAULT_RESTART_BACKOFF_MS
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawSettings {
    pub shutdown: Option<RawShutdownMode>,
    pub drain_timeout_secs: Option<u64>,
    pub restart: Option<RawRestart>,
    pub connect_timeout_secs: Option<u64>,
    pub keepalive_interval_secs: Option<u64>,
    pub keepalive_max: Option<usize>,
}

/// A jump node together with the tunnels routed through it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlannedJump {
    pub node: JumpNode,
    pub tunnels: Vec<TunnelSpec>,
}

/// Validated configuration, ready to hand to the client layer and the engine.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ForwardPlan {
    pub jumps: Vec<PlannedJump>,
    pub engine: EngineSettings,
    pub session: SessionSettings,
}

impl ForwardPlan {
    pub fn tunnel_count(&self) -> usize {
        self.jumps.iter().map(|jump| jump.tunnels.len()).sum()
    }
}

impl TunnelsFile {
    /// Read and parse the file at `path`.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data, &path.display().to_string())
    }

    pub fn from_yaml_str(data: &str) -> Result<Self, ConfigError> {
        Self::parse(data, "<inline>")
    }

    fn parse(data: &str, origin: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(data).map_err(|source| ConfigError::Parse {
            origin: origin.to_string(),
            source,
        })
    }

    /// Validate every node and tunnel, producing the runtime plan.
    pub fn into_plan(self) -> Result<ForwardPlan, ConfigError> {
        if self.nodes.is_empty() {
            return Err(ConfigError::NoNodes);
        }
        let mut seen = HashSet::new();
        let mut jumps = Vec::with_capacity(self.nodes.len());
        for raw in self.nodes {
            let planned = raw.into_planned()?;
            if !seen.insert(planned.node.name.clone()) {
                return Err(ConfigError::DuplicateNode(planned.node.name));
            }
            jumps.push(planned);
        }
        Ok(ForwardPlan {
            jumps,
            engine: self.settings.engine(),
            session: self.settings.session(),
        })
    }
}

impl RawJumpNode {
    fn into_planned(self) -> Result<PlannedJump, ConfigError> {
        let name = self
            .name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| self.addr.trim())
            .to_string();
        if name.is_empty() {
            return Err(ConfigError::EmptyField {
                node: "<unnamed>".into(),
                field: "addr",
            });
        }
        let address = parse_field(&name, "addr", &self.addr)?;
        let username = self.user.trim().to_string();
        if username.is_empty() {
            return Err(ConfigError::EmptyField { node: name, field: "user" });
        }
        let credential = credential_for(&name, self.private_key_path, self.passphrase_env, self.password_env)?;
        let host_key = host_key_policy_for(
            &name,
            self.server_public_key,
            self.host_key_fingerprint,
            self.insecure_ignore_host_key,
        )?;

        if self.tunnels.is_empty() {
            return Err(ConfigError::NoTunnels { node: name });
        }
        let tunnels = self
            .tunnels
            .iter()
            .enumerate()
            .map(|(idx, raw)| {
                Ok(TunnelSpec {
                    jump: name.clone(),
                    local: parse_field(&name, &format!("tunnels[{idx}].local"), &raw.local)?,
                    target: parse_field(&name, &format!("tunnels[{idx}].target"), &raw.target)?,
                })
            })
            .collect::<Result<Vec<_>, ConfigError>>()?;

        Ok(PlannedJump {
            node: JumpNode {
                name,
                address,
                username,
                credential,
                host_key,
            },
            tunnels,
        })
    }
}

impl RawSettings {
    fn engine(&self) -> EngineSettings {
        let defaults = EngineSettings::default();
        EngineSettings {
            shutdown_mode: match self.shutdown {
                Some(RawShutdownMode::Immediate) => ShutdownMode::Immediate,
                Some(RawShutdownMode::Graceful) => ShutdownMode::Graceful,
                None => defaults.shutdown_mode,
            },
            drain_timeout: self
                .drain_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.drain_timeout),
            restart: match &self.restart {
                Some(restart) if restart.max_restarts > 0 => RestartPolicy::OnFailure {
                    max_restarts: restart.max_restarts,
                    backoff: Duration::from_millis(restart.backoff_ms),
                },
                _ => RestartPolicy::Never,
            },
        }
    }

    fn session(&self) -> SessionSettings {
        let defaults = SessionSettings::default();
        SessionSettings {
            connect_timeout: self
                .connect_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.connect_timeout),
            keepalive_interval: self
                .keepalive_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.keepalive_interval),
            keepalive_max: self.keepalive_max.unwrap_or(defaults.keepalive_max),
        }
    }
}

fn parse_field(node: &str, field: &str, value: &str) -> Result<EndpointAddress, ConfigError> {
    parse_endpoint(value).map_err(|source| ConfigError::InvalidAddress {
        node: node.to_string(),
        field: field.to_string(),
        source,
    })
}

fn credential_for(
    node: &str,
    private_key_path: Option<PathBuf>,
    passphrase_env: Option<String>,
    password_env: Option<String>,
) -> Result<Credential, ConfigError> {
    let fail = |message: &str| ConfigError::Credential {
        node: node.to_string(),
        message: message.to_string(),
    };
    match (private_key_path, password_env) {
        (Some(_), Some(_)) => Err(fail("set either private_key_path or password_env, not both")),
        (Some(path), None) => {
            if path.as_os_str().is_empty() {
                return Err(fail("private_key_path must not be empty"));
            }
            Ok(Credential::PrivateKeyFile {
                path,
                passphrase_env: passphrase_env.filter(|var| !var.trim().is_empty()),
            })
        }
        (None, Some(variable)) if !variable.trim().is_empty() => Ok(Credential::PasswordEnv {
            variable: variable.trim().to_string(),
        }),
        (None, Some(_)) => Err(fail("password_env must not be empty")),
        (None, None) => Err(fail("no credential configured; set private_key_path or password_env")),
    }
}

fn host_key_policy_for(
    node: &str,
    server_public_key: Option<String>,
    fingerprint: Option<String>,
    insecure: bool,
) -> Result<HostKeyPolicy, ConfigError> {
    let fail = |message: &str| ConfigError::HostKeyPolicy {
        node: node.to_string(),
        message: message.to_string(),
    };
    let public_key = server_public_key.map(|key| key.trim().to_string()).filter(|key| !key.is_empty());
    let fingerprint = fingerprint.map(|fp| fp.trim().to_string()).filter(|fp| !fp.is_empty());
    match (public_key, fingerprint, insecure) {
        (Some(key), None, false) => Ok(HostKeyPolicy::PublicKey(key)),
        (None, Some(fp), false) => Ok(HostKeyPolicy::Fingerprint(fp)),
        (None, None, true) => Ok(HostKeyPolicy::AcceptAny),
        (None, None, false) => Err(fail(
            "no host key policy; set server_public_key, host_key_fingerprint, or insecure_ignore_host_key: true",
        )),
        _ => Err(fail(
            "choose exactly one of server_public_key, host_key_fingerprint, insecure_ignore_host_key",
        )),
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
