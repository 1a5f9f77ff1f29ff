mod auth;
pub mod error;
mod hostkeys;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
pub use auth::{LoadedCredential, authenticate, load_credential};
pub use error::{ClientError, ClientResult};
pub use hostkeys::{ClientHandler, HostKeyVerifier};
use russh::client;
use ssh_core::{
    SshCoreError,
    SshResult,
    forwarding::SessionConnector,
    session::SessionHandle,
};
use tn_types::{settings::SessionSettings, ssh::JumpNode};
use tracing::{info, warn};

/// Everything needed to open the session for one jump node.
///
/// Built synchronously by [`JumpConnector::prepare`]: key files, password
/// variables and pinned host keys are all resolved there, so the engine only
/// ever sees network failures.
pub struct JumpConnector {
    node: JumpNode,
    config: Arc<client::Config>,
    credential: LoadedCredential,
    verifier: Arc<HostKeyVerifier>,
    connect_timeout: Duration,
}

impl JumpConnector {
    pub fn prepare(node: JumpNode, settings: &SessionSettings) -> ClientResult<Self> {
        let credential = load_credential(&node.credential)?;
        let verifier = HostKeyVerifier::new(node.address.to_string(), &node.host_key)?;
        if matches!(node.host_key, tn_types::ssh::HostKeyPolicy::AcceptAny) {
            warn!(jump = %node, "host key verification disabled for this jump node");
        }
        let config = client::Config {
            nodelay: true,
            inactivity_timeout: None,
            keepalive_interval: Some(settings.keepalive_interval),
            keepalive_max: settings.keepalive_max,
            ..Default::default()
        };
        Ok(Self {
            node,
            config: Arc::new(config),
            credential,
            verifier: Arc::new(verifier),
            connect_timeout: settings.connect_timeout,
        })
    }

    async fn connect(&self) -> ClientResult<SessionHandle<ClientHandler>> {
        let handler = ClientHandler::new(self.verifier.clone());
        let host = self.node.address.host_string();
        let port = self.node.address.port();
        info!(
            jump = %self.node,
            host_key = self.node.host_key.describe(),
            "connecting to jump node"
        );
        let mut session = client::connect(self.config.clone(), (host.as_str(), port), handler).await?;
        authenticate(&mut session, &self.node.username, &self.credential).await?;
        Ok(session)
    }
}

#[async_trait]
impl SessionConnector for JumpConnector {
    type Session = SessionHandle<ClientHandler>;

    fn jump_label(&self) -> String {
        self.node.name.clone()
    }

    async fn establish(&self) -> SshResult<Self::Session> {
        let attempt = tokio::time::timeout(self.connect_timeout, self.connect()).await;
        let result = attempt.unwrap_or_else(|_| {
            Err(ClientError::Timeout(format!(
                "no session with {} after {:?}",
                self.node.address, self.connect_timeout
            )))
        });
        result.map_err(|err| SshCoreError::session(self.node.name.as_str(), err))
    }
}
