//! Session registry.
//!
//! The registry is an index, not an owner: sessions own their queues and
//! the registry stores only the enqueue handles needed for routing. A
//! session registers itself when it enters `Established` and deregisters
//! before dropping its queues, so routing observes an unroutable target
//! rather than blocking on a dead peer.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use tether_proto::PeerRole;
use thiserror::Error;

use crate::channel::{OrderedSender, TelemetryWriter};

/// Routing handle for one established session.
///
/// Cloneable and cheap: every field is an id or a channel handle. Holding
/// a `SessionHandle` does not keep the session alive; enqueues to a closed
/// session fail fast.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    /// Server-assigned session id.
    pub session_id: String,
    /// Peer role fixed at handshake.
    pub role: PeerRole,
    /// Peer agent id from `Hello`.
    pub agent_id: String,
    /// Ordered outbound queue of the session.
    pub outbound: OrderedSender,
    /// Latest-only telemetry slot; orchestrator sessions only.
    pub telemetry: Option<TelemetryWriter>,
}

/// Errors registering a session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// A session with this id is already registered.
    #[error("session already registered: {session_id}")]
    DuplicateSession {
        /// The colliding session id.
        session_id: String,
    },

    /// Another session already holds this `(role, agent_id)` identity.
    #[error("agent already connected: {role}/{agent_id}")]
    AgentAlreadyConnected {
        /// Role of the colliding identity.
        role: &'static str,
        /// Agent id of the colliding identity.
        agent_id: String,
    },

    /// The orchestrator subscriber cap is reached.
    #[error("orchestrator limit reached ({max})")]
    OrchestratorLimitReached {
        /// The configured cap.
        max: usize,
    },
}

/// Why an action target could not be resolved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TargetResolveError {
    /// No game client is connected.
    #[error("no game client connected")]
    NoGameClient,

    /// More than one game client is connected and no target was named.
    #[error("multiple game clients connected; target_agent_id required")]
    MultipleGameClients,

    /// The named agent is not connected as a game client.
    #[error("no game client with agent_id {agent_id}")]
    UnknownAgent {
        /// The agent id that failed to resolve.
        agent_id: String,
    },
}

/// Index of established sessions by `session_id` and `(role, agent_id)`.
#[derive(Debug)]
pub struct SessionRegistry {
    max_orchestrators: usize,
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionRegistry {
    /// Creates an empty registry with the given orchestrator cap.
    #[must_use]
    pub fn new(max_orchestrators: usize) -> Self {
        Self {
            max_orchestrators,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers an established session.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError`] when the session id or `(role, agent_id)`
    /// identity is already present, or the orchestrator cap is reached.
    pub fn register(&self, handle: SessionHandle) -> Result<(), RegistryError> {
        let mut sessions = self.lock();

        if sessions.contains_key(&handle.session_id) {
            return Err(RegistryError::DuplicateSession {
                session_id: handle.session_id,
            });
        }
        if sessions
            .values()
            .any(|s| s.role == handle.role && s.agent_id == handle.agent_id)
        {
            return Err(RegistryError::AgentAlreadyConnected {
                role: handle.role.as_str_name(),
                agent_id: handle.agent_id,
            });
        }
        if handle.role == PeerRole::Orchestrator {
            let count = sessions
                .values()
                .filter(|s| s.role == PeerRole::Orchestrator)
                .count();
            if count >= self.max_orchestrators {
                return Err(RegistryError::OrchestratorLimitReached {
                    max: self.max_orchestrators,
                });
            }
        }

        sessions.insert(handle.session_id.clone(), handle);
        Ok(())
    }

    /// Removes a session. Returns whether it was present.
    pub fn deregister(&self, session_id: &str) -> bool {
        self.lock().remove(session_id).is_some()
    }

    /// Resolves the game client an action should be relayed to.
    ///
    /// An empty `target_agent_id` routes to the unique game client; a
    /// named target must match a connected game client exactly.
    ///
    /// # Errors
    ///
    /// Returns [`TargetResolveError`] when zero or multiple clients match.
    pub fn resolve_game_client(
        &self,
        target_agent_id: &str,
    ) -> Result<SessionHandle, TargetResolveError> {
        let sessions = self.lock();
        let mut game_clients = sessions
            .values()
            .filter(|s| s.role == PeerRole::GameClient);

        if target_agent_id.trim().is_empty() {
            let Some(first) = game_clients.next() else {
                return Err(TargetResolveError::NoGameClient);
            };
            if game_clients.next().is_some() {
                return Err(TargetResolveError::MultipleGameClients);
            }
            return Ok(first.clone());
        }

        game_clients
            .find(|s| s.agent_id == target_agent_id)
            .cloned()
            .ok_or_else(|| TargetResolveError::UnknownAgent {
                agent_id: target_agent_id.to_string(),
            })
    }

    /// Snapshot of every orchestrator telemetry slot, for fan-out.
    #[must_use]
    pub fn telemetry_writers(&self) -> Vec<TelemetryWriter> {
        self.lock()
            .values()
            .filter(|s| s.role == PeerRole::Orchestrator)
            .filter_map(|s| s.telemetry.clone())
            .collect()
    }

    /// Number of registered sessions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether the registry is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
