use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use tn_types::{
    settings::{EngineSettings, RestartPolicy, ShutdownMode},
    ssh::TunnelSpec,
};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    traits::{DialSession, SessionConnector},
    tunnel::{Tunnel, TunnelControl, TunnelId, TunnelState},
};
use crate::{
    SshCoreError,
    events::{ForwardEvent, SharedEventSink, StopReason},
    session::SharedSession,
};

type Result<T> = crate::SshResult<T>;

/// One jump node's connector and the tunnels routed through it.
pub struct JumpPlan<C> {
    pub connector: C,
    pub tunnels: Vec<TunnelSpec>,
}

/// Snapshot of one tunnel as seen from the [`EngineHandle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelInfo {
    pub id: TunnelId,
    pub spec: TunnelSpec,
    pub local_addr: Option<SocketAddr>,
    pub state: TunnelState,
}

/// Final outcome of one tunnel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TunnelOutcome {
    pub id: TunnelId,
    pub label: String,
    pub reason: StopReason,
}

/// What the engine did, available once every tunnel has stopped.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngineReport {
    pub tunnels: Vec<TunnelOutcome>,
}

impl EngineReport {
    /// True when every tunnel stopped because it was asked to.
    pub fn all_cancelled(&self) -> bool {
        self.tunnels.iter().all(|outcome| !outcome.reason.is_failure())
    }

    pub fn failures(&self) -> impl Iterator<Item = &TunnelOutcome> {
        self.tunnels.iter().filter(|outcome| outcome.reason.is_failure())
    }
}

type Registry = Arc<Mutex<HashMap<TunnelId, TunnelEntry>>>;

struct TunnelEntry {
    spec: TunnelSpec,
    local_addr: Option<SocketAddr>,
    state: TunnelState,
    control: TunnelControl,
}

fn with_registry<T>(registry: &Registry, f: impl FnOnce(&mut HashMap<TunnelId, TunnelEntry>) -> T) -> T {
    let mut guard = registry.lock().unwrap_or_else(PoisonError::into_inner);
    f(&mut guard)
}

/// Owns every jump session and tunnel for the lifetime of a run.
pub struct ForwardingEngine<C> {
    plans: Vec<JumpPlan<C>>,
    settings: EngineSettings,
    events: SharedEventSink,
}

impl<C> ForwardingEngine<C>
where
    C: SessionConnector,
{
    pub fn new(plans: Vec<JumpPlan<C>>, settings: EngineSettings, events: SharedEventSink) -> Self {
        Self { plans, settings, events }
    }

    /// Establish every session, bind every tunnel, and hand the running
    /// tunnels to a supervisor task.
    ///
    /// A jump whose session fails only takes down its own tunnels, and a
    /// tunnel that cannot bind only itself. Fails with
    /// [`SshCoreError::NoTunnels`] when nothing ends up listening, after
    /// closing whatever sessions were opened.
    pub async fn start(self) -> Result<EngineHandle> {
        let ForwardingEngine { plans, settings, events } = self;

        let mut next_id = 0;
        let mut jumps = Vec::with_capacity(plans.len());
        let mut pending = JoinSet::new();
        for (index, plan) in plans.into_iter().enumerate() {
            let label = plan.connector.jump_label();
            let tunnels: Vec<(TunnelId, TunnelSpec)> = plan
                .tunnels
                .into_iter()
                .map(|spec| {
                    next_id += 1;
                    (TunnelId(next_id - 1), spec)
                })
                .collect();
            let connector = plan.connector;
            pending.spawn(async move { (index, connector.establish().await) });
            jumps.push((label, tunnels));
        }

        let mut sessions: Vec<Option<Result<C::Session>>> = (0..jumps.len()).map(|_| None).collect();
        while let Some(joined) = pending.join_next().await {
            match joined {
                Ok((index, result)) => sessions[index] = Some(result),
                Err(err) => debug!(?err, "session task did not complete"),
            }
        }

        let root_accept = CancellationToken::new();
        let root_relays = CancellationToken::new();
        let registry: Registry = Arc::default();
        let mut report = EngineReport::default();
        let mut supervisor = Supervisor {
            tasks: JoinSet::new(),
            jumps: HashMap::new(),
            registry: registry.clone(),
            restart: settings.restart,
            events: events.clone(),
            report: EngineReport::default(),
        };

        for ((label, specs), session) in jumps.into_iter().zip(sessions) {
            let session = match session {
                Some(Ok(session)) => {
                    events.emit(ForwardEvent::SessionEstablished { jump: label.clone() });
                    Arc::new(SharedSession::new(label.clone(), session, events.clone())) as Arc<dyn DialSession>
                }
                failed => {
                    let error = match failed {
                        Some(Err(err)) => err.to_string(),
                        _ => SshCoreError::session(label.as_str(), "session task aborted").to_string(),
                    };
                    events.emit(ForwardEvent::SessionFailed {
                        jump: label.clone(),
                        error: error.clone(),
                    });
                    for (id, spec) in specs {
                        let reason = StopReason::SessionUnavailable(error.clone());
                        events.emit(ForwardEvent::TunnelStopped {
                            tunnel: spec.label(),
                            reason: reason.clone(),
                        });
                        report.tunnels.push(TunnelOutcome {
                            id,
                            label: spec.label(),
                            reason,
                        });
                    }
                    continue;
                }
            };

            let mut active = 0;
            for (id, spec) in specs {
                let mut tunnel = Tunnel::new(id, spec.clone(), session.clone(), events.clone());
                match tunnel.bind().await {
                    Ok(local_addr) => {
                        let control = TunnelControl {
                            accept: root_accept.child_token(),
                            relays: root_relays.child_token(),
                            done: CancellationToken::new(),
                            drain_timeout: settings.drain_timeout,
                        };
                        with_registry(&registry, |entries| {
                            entries.insert(
                                id,
                                TunnelEntry {
                                    spec,
                                    local_addr: Some(local_addr),
                                    state: TunnelState::Listening,
                                    control: control.clone(),
                                },
                            );
                        });
                        supervisor.spawn(tunnel, control, None, 0);
                        active += 1;
                    }
                    Err(err) => {
                        let reason = tunnel.finish(StopReason::BindFailed(err.to_string()));
                        report.tunnels.push(TunnelOutcome {
                            id,
                            label: spec.label(),
                            reason,
                        });
                    }
                }
            }

            if active == 0 {
                session.close().await;
            } else {
                supervisor.jumps.insert(label, JumpSlot { session, active });
            }
        }

        if supervisor.tasks.is_empty() {
            report.tunnels.sort_by_key(|outcome| outcome.id);
            return Err(SshCoreError::NoTunnels(report.tunnels));
        }

        supervisor.report = report;
        let handle = tokio::spawn(supervisor.run());
        Ok(EngineHandle {
            registry,
            root_accept,
            root_relays,
            supervisor: Some(handle),
            report: None,
        })
    }
}

struct JumpSlot {
    session: Arc<dyn DialSession>,
    active: usize,
}

/// Result of one tunnel task: the tunnel is handed back for a possible restart.
struct TaskExit {
    tunnel: Tunnel,
    control: TunnelControl,
    reason: StopReason,
    restarts: u32,
}

struct Supervisor {
    tasks: JoinSet<TaskExit>,
    jumps: HashMap<String, JumpSlot>,
    registry: Registry,
    restart: RestartPolicy,
    events: SharedEventSink,
    report: EngineReport,
}

impl Supervisor {
    fn spawn(&mut self, tunnel: Tunnel, control: TunnelControl, backoff: Option<Duration>, restarts: u32) {
        let registry = self.registry.clone();
        self.tasks.spawn(run_tunnel(tunnel, control, backoff, restarts, registry));
    }

    async fn run(mut self) -> EngineReport {
        while let Some(joined) = self.tasks.join_next().await {
            let exit = match joined {
                Ok(exit) => exit,
                Err(err) => {
                    // Tunnel tasks are never aborted while the supervisor runs.
                    debug!(?err, "tunnel task did not complete");
                    continue;
                }
            };
            self.on_exit(exit).await;
        }
        self.report.tunnels.sort_by_key(|outcome| outcome.id);
        self.report
    }

    async fn on_exit(&mut self, exit: TaskExit) {
        let TaskExit {
            tunnel,
            control,
            reason,
            restarts,
        } = exit;

        if let RestartPolicy::OnFailure { max_restarts, backoff } = self.restart
            && reason.is_failure()
            && restarts < max_restarts
            && !control.accept.is_cancelled()
        {
            let attempt = restarts + 1;
            self.events.emit(ForwardEvent::TunnelRestarting {
                tunnel: tunnel.label().to_string(),
                attempt,
            });
            with_registry(&self.registry, |entries| {
                if let Some(entry) = entries.get_mut(&tunnel.id()) {
                    entry.state = TunnelState::Created;
                    entry.local_addr = None;
                }
            });
            self.spawn(tunnel, control, Some(backoff), attempt);
            return;
        }

        with_registry(&self.registry, |entries| {
            if let Some(entry) = entries.get_mut(&tunnel.id()) {
                entry.state = TunnelState::Stopped;
                entry.local_addr = None;
            }
        });
        self.report.tunnels.push(TunnelOutcome {
            id: tunnel.id(),
            label: tunnel.label().to_string(),
            reason,
        });

        let jump = &tunnel.spec().jump;
        let last = match self.jumps.get_mut(jump) {
            Some(slot) => {
                slot.active -= 1;
                slot.active == 0
            }
            None => false,
        };
        if last && let Some(slot) = self.jumps.remove(jump) {
            slot.session.close().await;
        }
        control.done.cancel();
    }
}

async fn run_tunnel(
    mut tunnel: Tunnel,
    control: TunnelControl,
    backoff: Option<Duration>,
    restarts: u32,
    registry: Registry,
) -> TaskExit {
    if let Some(backoff) = backoff {
        tokio::select! {
            _ = control.accept.cancelled() => {
                let reason = tunnel.finish(StopReason::Cancelled);
                return TaskExit { tunnel, control, reason, restarts };
            }
            _ = tokio::time::sleep(backoff) => {}
        }
        match tunnel.bind().await {
            Ok(local_addr) => with_registry(&registry, |entries| {
                if let Some(entry) = entries.get_mut(&tunnel.id()) {
                    entry.state = TunnelState::Listening;
                    entry.local_addr = Some(local_addr);
                }
            }),
            Err(err) => {
                let reason = tunnel.finish(StopReason::BindFailed(err.to_string()));
                return TaskExit {
                    tunnel,
                    control,
                    reason,
                    restarts,
                };
            }
        }
    }
    let reason = tunnel.run(&control).await;
    TaskExit {
        tunnel,
        control,
        reason,
        restarts,
    }
}

/// Control surface of a started engine.
///
/// Dropping the handle cancels every tunnel and relay without waiting.
pub struct EngineHandle {
    registry: Registry,
    root_accept: CancellationToken,
    root_relays: CancellationToken,
    supervisor: Option<JoinHandle<EngineReport>>,
    report: Option<EngineReport>,
}

impl EngineHandle {
    /// Every tunnel that was listening at start, ordered by id.
    pub fn tunnels(&self) -> Vec<TunnelInfo> {
        let mut tunnels = with_registry(&self.registry, |entries| {
            entries
                .iter()
                .map(|(id, entry)| TunnelInfo {
                    id: *id,
                    spec: entry.spec.clone(),
                    local_addr: entry.local_addr,
                    state: entry.state,
                })
                .collect::<Vec<_>>()
        });
        tunnels.sort_by_key(|info| info.id);
        tunnels
    }

    /// Address the tunnel is actually bound to, while it is listening.
    pub fn local_addr(&self, id: TunnelId) -> Option<SocketAddr> {
        with_registry(&self.registry, |entries| entries.get(&id).and_then(|entry| entry.local_addr))
    }

    /// Stop one tunnel and wait until it has been retired. Other tunnels,
    /// including those sharing its jump session, keep running.
    pub async fn stop_tunnel(&self, id: TunnelId, mode: ShutdownMode) -> Result<()> {
        let control = with_registry(&self.registry, |entries| entries.get(&id).map(|entry| entry.control.clone()))
            .ok_or_else(|| SshCoreError::Other(format!("unknown tunnel {id}")))?;
        if mode == ShutdownMode::Immediate {
            control.relays.cancel();
        }
        control.accept.cancel();
        control.done.cancelled().await;
        Ok(())
    }

    /// Resolves once every tunnel has stopped, on its own or by request.
    /// Cancel-safe; later calls return the same report.
    pub async fn closed(&mut self) -> EngineReport {
        if let Some(handle) = self.supervisor.as_mut() {
            let report = match handle.await {
                Ok(report) => report,
                Err(err) => {
                    debug!(?err, "engine supervisor did not complete");
                    EngineReport::default()
                }
            };
            self.supervisor = None;
            self.report = Some(report);
        }
        self.report.clone().unwrap_or_default()
    }

    /// Stop every tunnel, close every session, and return the final report.
    pub async fn shutdown(mut self, mode: ShutdownMode) -> EngineReport {
        if mode == ShutdownMode::Immediate {
            self.root_relays.cancel();
        }
        self.root_accept.cancel();
        self.closed().await
    }
}

impl Drop for EngineHandle {
    fn drop(&mut self) {
        self.root_accept.cancel();
        self.root_relays.cancel();
    }
}

#[cfg(test)]
#[path = "engine_tests.rs"]
mod tests;
