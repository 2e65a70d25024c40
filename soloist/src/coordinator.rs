//! InstanceCoordinator - decides which process of an application survives
//!
//! ```text
//! construct → probe segment ─┬─ Owned ──────────→ bind endpoint → Owner
//!                            ├─ AlreadyOwned ───→ challenge ─┬─ Displaced → claim again
//!                            │                               ├─ Conceded ─→ exit
//!                            │                               └─ unreachable → backoff, claim again
//!                            └─ Failed ─────────→ Unenforced
//! ```
//!
//! Nothing here terminates the process. Concession and displacement raise an
//! [`ExitReason`] that the startup routine waits on.

use std::path::{Path, PathBuf};

use tokio::sync::{Mutex, watch};
use tracing::{debug, info, warn};

use crate::config::{Config, CoordinationConfig};
use crate::error::CoordinationError;
use crate::ipc::{ChallengeOutcome, OwnerClient, OwnerServer, ResolutionScheme, ServerHandle};
use crate::key::CoordinationKey;
use crate::segment::{ClaimOutcome, OwnershipToken, try_claim_ownership};
use crate::state::{CoordinatorState, ExitReason, ExitSignal, StateCell};
use crate::version::Version;

/// What `start` settled on
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// This process holds the segment and serves the endpoint
    Owner,
    /// Another instance stays; this process has requested its own exit
    Conceded { remote_version: String },
    /// Coordination failed; running without single-instance enforcement
    Unenforced,
}

impl Resolution {
    pub fn became_owner(&self) -> bool {
        matches!(self, Resolution::Owner)
    }
}

/// Single-instance coordinator for one process
#[derive(Debug)]
pub struct InstanceCoordinator {
    key: CoordinationKey,
    version: String,
    socket_path: PathBuf,
    settings: CoordinationConfig,
    state: StateCell,
    exit: ExitSignal,
    server: Mutex<Option<ServerHandle>>,
    resolution: Mutex<Option<Resolution>>,
}

impl InstanceCoordinator {
    pub fn new(key: CoordinationKey, version: impl Into<String>, settings: CoordinationConfig) -> Self {
        let socket_path = key.socket_path_in(&settings.runtime_dir());
        let version = version.into();
        debug!(%key, %version, ?socket_path, "InstanceCoordinator::new: called");
        Self {
            key,
            version,
            socket_path,
            settings,
            state: StateCell::new(),
            exit: ExitSignal::new(),
            server: Mutex::new(None),
            resolution: Mutex::new(None),
        }
    }

    /// Build a coordinator from loaded configuration
    pub fn from_config(config: &Config, version: impl Into<String>) -> Result<Self, CoordinationError> {
        let key = CoordinationKey::new(config.key.clone())?;
        Ok(Self::new(key, version, config.coordination.clone()))
    }

    pub fn key(&self) -> &CoordinationKey {
        &self.key
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn state(&self) -> CoordinatorState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorState> {
        self.state.subscribe()
    }

    /// Client for this key's endpoint, configured with the coordinator's timeouts
    pub fn client(&self) -> OwnerClient {
        OwnerClient::new(self.socket_path.clone())
            .with_connect_timeout(self.settings.connect_timeout())
            .with_read_timeout(self.settings.read_timeout())
    }

    /// Run the probe/claim/challenge sequence once
    ///
    /// Never fails: every coordination error degrades to `Unenforced`.
    /// Calling it again returns the first result.
    pub async fn start(&self, scheme: ResolutionScheme) -> Resolution {
        let mut resolution = self.resolution.lock().await;
        if let Some(existing) = resolution.as_ref() {
            warn!(state = %self.state.get(), "Coordinator already started");
            return existing.clone();
        }

        self.state.transition(CoordinatorState::Probing);
        let settled = self.negotiate(scheme).await;
        info!(key = %self.key, ?settled, "Coordination settled");
        *resolution = Some(settled.clone());
        settled
    }

    async fn negotiate(&self, scheme: ResolutionScheme) -> Resolution {
        let local = Version::lossy(&self.version);
        let client = self.client();
        let rounds = self.settings.max_rounds.max(1);

        for round in 1..=rounds {
            debug!(round, "negotiate: claim attempt");
            if let Some(settled) = self.claim().await {
                return settled;
            }

            self.state.transition(CoordinatorState::Challenging);
            match client.challenge(scheme, &local).await {
                Ok(ChallengeOutcome::Displaced) => {
                    // The owner is gone once `ok` arrives; claim now, whatever the round budget says
                    debug!(round, "negotiate: owner displaced, claiming");
                    if let Some(settled) = self.claim().await {
                        return settled;
                    }
                    debug!(round, "negotiate: another instance claimed first");
                }
                Ok(ChallengeOutcome::Conceded { remote_version }) => {
                    self.state.transition(CoordinatorState::Conceded);
                    self.exit.request(ExitReason::Conceded);
                    return Resolution::Conceded { remote_version };
                }
                Err(e) if e.is_recoverable_by_claim() => {
                    debug!(round, error = %e, "negotiate: owner unreachable, falling back to claim");
                    tokio::time::sleep(self.settings.retry_backoff()).await;
                }
                Err(e) => {
                    warn!(error = %e, "Running without single-instance enforcement");
                    return self.unenforced();
                }
            }
        }

        warn!(key = %self.key, rounds, "Ownership did not settle; running without single-instance enforcement");
        self.unenforced()
    }

    /// One claim attempt; `None` means another live process holds the segment
    async fn claim(&self) -> Option<Resolution> {
        match try_claim_ownership(&self.key) {
            ClaimOutcome::Owned(token) => Some(self.become_owner(token).await),
            ClaimOutcome::Failed(e) => {
                warn!(error = %e, "Running without single-instance enforcement");
                Some(self.unenforced())
            }
            ClaimOutcome::AlreadyOwned => None,
        }
    }

    async fn become_owner(&self, token: OwnershipToken) -> Resolution {
        match OwnerServer::bind(self.socket_path.clone(), token, self.version.clone()) {
            Ok(server) => {
                self.state.transition(CoordinatorState::Owner);
                let handle = server.spawn(self.state.clone(), self.exit.clone());
                *self.server.lock().await = Some(handle);
                info!(key = %self.key, version = %self.version, "This instance is the owner");
                Resolution::Owner
            }
            Err(e) => {
                warn!(error = %e, "Running without single-instance enforcement");
                self.unenforced()
            }
        }
    }

    fn unenforced(&self) -> Resolution {
        self.state.transition(CoordinatorState::Unenforced);
        Resolution::Unenforced
    }

    /// Exit reason if one has been requested
    pub fn exit_requested(&self) -> Option<ExitReason> {
        self.exit.requested()
    }

    /// Wait until the coordinator asks the hosting process to exit
    pub async fn wait_for_exit(&self) -> ExitReason {
        self.exit.wait().await
    }

    /// Release the endpoint and segment if held and move to `Terminating`
    pub async fn shutdown(&self) {
        debug!(state = %self.state.get(), "InstanceCoordinator::shutdown: called");
        let handle = self.server.lock().await.take();
        if let Some(handle) = handle {
            handle.stop().await;
        }

        if self.state.get() != CoordinatorState::Unclaimed {
            self.state.transition(CoordinatorState::Terminating);
        }
    }
}
