use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::{ArgAction, Parser};
use tn_types::config::DEFAULT_CONFIG_FILE;

#[derive(Debug, Parser)]
#[command(
    name = "toonels",
    about = "Forward local ports to remote targets through SSH jump nodes"
)]
struct RawArgs {
    /// Tunnel configuration file (defaults to ./.tunnels.yaml)
    #[arg(short, long, value_name = "PATH", env = "TOONELS_CONFIG")]
    config: Option<PathBuf>,
    /// Log filter used when RUST_LOG is unset (e.g. debug, toonels=trace)
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
    /// Validate the configuration and credentials, print the plan, and exit
    #[arg(long, action = ArgAction::SetTrue)]
    check: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CliConfig {
    pub config_path: PathBuf,
    pub log_level: Option<String>,
    pub check: bool,
}

impl CliConfig {
    pub fn parse() -> Result<Self> {
        let args = RawArgs::parse();
        Self::try_from(args)
    }
}

impl TryFrom<RawArgs> for CliConfig {
    type Error = anyhow::Error;

    fn try_from(args: RawArgs) -> Result<Self> {
        let log_level = match args.log_level.map(|level| level.trim().to_string()) {
            Some(level) if level.is_empty() => bail!("--log-level must not be empty"),
            Some(level) => {
                if let Err(err) = tracing_subscriber::EnvFilter::try_new(&level) {
                    bail!("invalid --log-level {level:?}: {err}");
                }
                Some(level)
            }
            None => None,
        };
        Ok(Self {
            config_path: args.config.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE)),
            log_level,
            check: args.check,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    fn parse(argv: &[&str]) -> Result<CliConfig> {
        let args = RawArgs::try_parse_from(std::iter::once("toonels").chain(argv.iter().copied()))?;
        CliConfig::try_from(args)
    }

    #[test]
    fn command_definition_is_consistent() {
        RawArgs::command().debug_assert();
    }

    #[test]
    fn explicit_flags_are_honoured() {
        let cfg = parse(&["--config", "/etc/toonels.yaml", "--log-level", "debug", "--check"]).unwrap();
        assert_eq!(cfg.config_path, PathBuf::from("/etc/toonels.yaml"));
        assert_eq!(cfg.log_level.as_deref(), Some("debug"));
        assert!(cfg.check);
    }

    #[test]
    fn short_config_flag_and_directive_filters() {
        let cfg = parse(&["-c", "tunnels.yaml", "--log-level", "ssh_core=trace,info"]).unwrap();
        assert_eq!(cfg.config_path, PathBuf::from("tunnels.yaml"));
        assert!(!cfg.check);
    }

    #[test]
    fn blank_log_level_is_rejected() {
        assert!(parse(&["--config", "x.yaml", "--log-level", "  "]).is_err());
    }

    #[test]
    fn unknown_flags_are_rejected() {
        assert!(parse(&["--server"]).is_err());
    }
}
