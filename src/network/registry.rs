//! Session Registry
//!
//! The lobby manager: allocates client identities, creates and looks up
//! game sessions, tracks which session each player belongs to, and
//! garbage-collects sessions once their roster empties. The maps support
//! concurrent connect/disconnect traffic from many sockets; each session
//! still serializes its own mutations behind its own lock.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

use crate::game::words::WordValidator;
use crate::network::protocol::{GameSummary, ServerMessage};
use crate::network::session::{
    arm_turn_timer, GamePhase, GameSession, PlayerId, SessionConfig, SessionError, SessionId,
    SharedSession,
};

/// Lobby failures, reported to the requester as JOIN_REJECT. Nothing is
/// mutated when one of these is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LobbyError {
    /// No session with that id.
    #[error("game not found")]
    SessionNotFound,

    /// The roster is at capacity.
    #[error("game is full")]
    SessionFull,

    /// A match is running; the session is joinable again once it ends.
    #[error("game already in progress")]
    SessionInProgress,

    /// The client already belongs to a session.
    #[error("already in a game")]
    AlreadyInSession,
}

impl From<SessionError> for LobbyError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::SessionFull => LobbyError::SessionFull,
            SessionError::MatchInProgress => LobbyError::SessionInProgress,
            SessionError::AlreadyInSession => LobbyError::AlreadyInSession,
            // add_player never reports this; treat it as a stale lookup.
            SessionError::InvalidTransition => LobbyError::SessionNotFound,
        }
    }
}

/// Registry of all live sessions.
pub struct SessionRegistry {
    validator: Arc<WordValidator>,
    config: SessionConfig,
    sessions: RwLock<HashMap<SessionId, SharedSession>>,
    memberships: RwLock<HashMap<PlayerId, SessionId>>,
}

impl SessionRegistry {
    /// Create a registry. All sessions share the validator and config.
    pub fn new(validator: Arc<WordValidator>, config: SessionConfig) -> Self {
        Self {
            validator,
            config,
            sessions: RwLock::new(HashMap::new()),
            memberships: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate an identity for a newly connected transport. Touches no
    /// session state.
    pub fn register_client(&self) -> PlayerId {
        Uuid::new_v4()
    }

    /// Create a session with the caller as host.
    pub async fn create_session(
        &self,
        host_id: PlayerId,
        host_name: String,
        game_name: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<SharedSession, LobbyError> {
        let session_id = Uuid::new_v4();
        {
            let mut memberships = self.memberships.write().await;
            if memberships.contains_key(&host_id) {
                return Err(LobbyError::AlreadyInSession);
            }
            memberships.insert(host_id, session_id);
        }

        let session = Arc::new(RwLock::new(GameSession::new(
            session_id,
            game_name,
            host_id,
            host_name,
            sender,
            self.config.clone(),
            self.validator.clone(),
        )));
        self.sessions
            .write()
            .await
            .insert(session_id, session.clone());

        info!(session = %session_id, host = %host_id, "session created");
        Ok(session)
    }

    /// Join an existing session.
    pub async fn join_session(
        &self,
        session_id: SessionId,
        player_id: PlayerId,
        player_name: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<SharedSession, LobbyError> {
        let session = self
            .session(&session_id)
            .await
            .ok_or(LobbyError::SessionNotFound)?;

        {
            let mut memberships = self.memberships.write().await;
            if memberships.contains_key(&player_id) {
                return Err(LobbyError::AlreadyInSession);
            }
            session
                .write()
                .await
                .add_player(player_id, player_name, sender)?;
            memberships.insert(player_id, session_id);
        }

        debug!(session = %session_id, player = %player_id, "player joined");
        Ok(session)
    }

    /// Sessions a client may join right now: lobby and post-game only.
    pub async fn list_sessions(&self) -> Vec<GameSummary> {
        let sessions = self.sessions.read().await;
        let mut summaries = Vec::new();
        for session in sessions.values() {
            let state = session.read().await;
            if matches!(state.phase(), GamePhase::Lobby | GamePhase::GameOver) {
                summaries.push(state.summary());
            }
        }
        summaries
    }

    /// Look up a session by id.
    pub async fn session(&self, id: &SessionId) -> Option<SharedSession> {
        self.sessions.read().await.get(id).cloned()
    }

    /// Session a player currently belongs to.
    pub async fn session_for(&self, player_id: &PlayerId) -> Option<SharedSession> {
        let session_id = *self.memberships.read().await.get(player_id)?;
        self.session(&session_id).await
    }

    /// Drop a client on disconnect: leave their session (which may force a
    /// turn advance or end the match) and garbage-collect the session once
    /// it has no players left. Losing the transport is equivalent to
    /// leaving - there is no resume.
    pub async fn unregister_client(&self, player_id: PlayerId) {
        let session_id = {
            let mut memberships = self.memberships.write().await;
            memberships.remove(&player_id)
        };
        let Some(session_id) = session_id else {
            return;
        };
        let Some(session) = self.session(&session_id).await else {
            return;
        };

        let now_empty = {
            let mut state = session.write().await;
            let outcome = state.remove_player(player_id);
            if outcome.rearm {
                arm_turn_timer(&session, &mut state);
            }
            outcome.now_empty
        };

        if now_empty {
            // remove_player already released the timer for an empty roster.
            self.sessions.write().await.remove(&session_id);
            info!(session = %session_id, "empty session garbage-collected");
        }
    }

    /// Number of live sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
