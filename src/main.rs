mod cli;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result, bail};
use client_core::JumpConnector;
use ssh_core::{
    events::TracingEventSink,
    forwarding::{EngineReport, ForwardingEngine, JumpPlan},
};
use tn_types::config::{ForwardPlan, TunnelsFile};
use tracing::{error, info, warn};

use crate::cli::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse()?;
    init_tracing(cli.log_level.as_deref());

    let plan = load_plan(&cli.config_path)?;
    let jumps = prepare_jumps(&plan)?;
    if cli.check {
        print_plan(&plan);
        return Ok(());
    }

    run(&plan, jumps).await
}

fn init_tracing(fallback: Option<&str>) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(fallback.unwrap_or("info")));
    let _ = tracing_subscriber::fmt().with_env_filter(env_filter).try_init();
}

fn load_plan(path: &Path) -> Result<ForwardPlan> {
    let file = TunnelsFile::load(path)?;
    file.into_plan()
        .with_context(|| format!("invalid configuration in {}", path.display()))
}

/// Load every credential and host-key pin before any socket is opened.
fn prepare_jumps(plan: &ForwardPlan) -> Result<Vec<JumpPlan<JumpConnector>>> {
    plan.jumps
        .iter()
        .map(|jump| {
            let connector = JumpConnector::prepare(jump.node.clone(), &plan.session)
                .with_context(|| format!("jump node {}", jump.node.name))?;
            Ok(JumpPlan {
                connector,
                tunnels: jump.tunnels.clone(),
            })
        })
        .collect()
}

fn print_plan(plan: &ForwardPlan) {
    for jump in &plan.jumps {
        println!("{} [host key: {}]", jump.node, jump.node.host_key.describe());
        for tunnel in &jump.tunnels {
            println!("  {}", tunnel.label());
        }
    }
    println!(
        "{} jump node(s), {} tunnel(s); configuration OK",
        plan.jumps.len(),
        plan.tunnel_count()
    );
}

async fn run(plan: &ForwardPlan, jumps: Vec<JumpPlan<JumpConnector>>) -> Result<()> {
    let engine = ForwardingEngine::new(jumps, plan.engine.clone(), Arc::new(TracingEventSink));
    let mut handle = engine.start().await.context("no tunnel could be started")?;
    info!(
        tunnels = handle.tunnels().len(),
        configured = plan.tunnel_count(),
        "forwarding started; press Ctrl-C to stop"
    );

    let interrupted = tokio::select! {
        _ = handle.closed() => false,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for Ctrl-C")?;
            true
        }
    };

    if !interrupted {
        let report = handle.closed().await;
        log_failures(&report);
        bail!("all tunnels have stopped");
    }

    let mode = plan.engine.shutdown_mode;
    info!(?mode, "shutting down; press Ctrl-C again to force");
    tokio::select! {
        report = handle.shutdown(mode) => log_failures(&report),
        _ = tokio::signal::ctrl_c() => warn!("forced shutdown"),
    }
    Ok(())
}

fn log_failures(report: &EngineReport) {
    for outcome in report.failures() {
        error!(tunnel = %outcome.label, reason = %outcome.reason, "tunnel failed");
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    fn write_config(yaml: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(yaml.as_bytes()).unwrap();
        file
    }

    #[test]
    fn startup_errors_name_the_file_and_node() {
        let invalid = write_config("nodes:\n  - user: u\n    addr: 192.0.2.1\n");
        let err = load_plan(invalid.path()).unwrap_err();
        assert!(format!("{err:#}").contains(&invalid.path().display().to_string()), "{err:#}");

        let unset = write_config(
            "nodes:\n  - name: edge\n    user: u\n    addr: 192.0.2.1:22\n    password_env: TOONELS_MAIN_TEST_UNSET\n    insecure_ignore_host_key: true\n    tunnels:\n      - local: 127.0.0.1:0\n        target: 10.0.0.1:80\n",
        );
        let plan = load_plan(unset.path()).unwrap();
        let err = prepare_jumps(&plan).err().unwrap();
        let chain = format!("{err:#}");
        assert!(chain.contains("jump node edge") && chain.contains("TOONELS_MAIN_TEST_UNSET"), "{chain}");
    }

    #[test]
    fn missing_file_is_reported() {
        let err = load_plan(Path::new("/definitely/not/here/.tunnels.yaml")).unwrap_err();
        assert!(err.to_string().contains("/definitely/not/here"), "{err}");
    }
}
