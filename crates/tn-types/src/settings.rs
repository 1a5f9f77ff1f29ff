//! Runtime knobs for the forwarding engine and SSH sessions.

use std::time::Duration;

/// What happens to in-flight relays when a tunnel (or the engine) is stopped.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShutdownMode {
    /// Stop accepting, let open relays finish up to the drain timeout, then force-close.
    #[default]
    Graceful,
    /// Stop accepting and force-close every open relay right away.
    Immediate,
}

/// Supervisor decision for a tunnel whose accept loop failed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum RestartPolicy {
    /// Report the failure and leave the tunnel stopped.
    #[default]
    Never,
    /// Re-bind the listener after `backoff`, at most `max_restarts` times.
    OnFailure { max_restarts: u32, backoff: Duration },
}

/// Engine-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EngineSettings {
    pub shutdown_mode: ShutdownMode,
    /// Upper bound on how long a graceful stop waits for relays to drain.
    pub drain_timeout: Duration,
    pub restart: RestartPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            shutdown_mode: ShutdownMode::Graceful,
            drain_timeout: Duration::from_secs(10),
            restart: RestartPolicy::Never,
        }
    }
}

/// SSH session settings shared by every jump node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSettings {
    pub connect_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Disconnect after this many unanswered keepalives.
    pub keepalive_max: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(15),
            keepalive_interval: Duration::from_secs(30),
            keepalive_max: 3,
        }
    }
}
