//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! All messages are JSON objects with a SCREAMING_SNAKE_CASE `type`
//! discriminator and camelCase fields.

use serde::{Deserialize, Serialize};

use crate::network::session::{GamePhase, PlayerId, PlayerStatus, SessionId};

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientMessage {
    /// Join an existing game by id.
    JoinRequest {
        /// Target game id. Kept as a string so a malformed id is a lobby
        /// rejection, not a protocol error.
        game_id: String,
        /// Display name to join under.
        player_name: String,
    },

    /// Create a new game and become its host.
    CreateGame {
        /// Display name of the creating player.
        host_name: String,
        /// Name of the new game.
        game_name: String,
    },

    /// Ask for the list of joinable games.
    ListGames,

    /// Toggle ready state while in the lobby.
    PlayerReady {
        /// Desired ready flag.
        ready: bool,
    },

    /// Ask the server to start the match (host only).
    StartGameRequest,

    /// Live keystroke echo for the current turn. Never validated.
    TurnInput {
        /// The in-progress text.
        input: String,
    },

    /// Submit a word for the current turn.
    TurnSubmit {
        /// The submitted word.
        word: String,
    },

    /// Keep-alive probe.
    Ping,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(
    tag = "type",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerMessage {
    /// Join or create succeeded.
    JoinAccept {
        /// Identity assigned to the joining player.
        player_id: PlayerId,
        /// The game that was joined.
        game_id: SessionId,
    },

    /// Join failed; no state was changed.
    JoinReject {
        /// Human-readable rejection reason.
        reason: String,
    },

    /// Reply to LIST_GAMES.
    GamesList {
        /// Joinable games (lobby or post-game).
        games: Vec<GameSummary>,
    },

    /// Full roster snapshot, sent on every roster or ready change.
    PlayerList {
        /// Players in turn-rotation order.
        players: Vec<PlayerInfo>,
        /// Current host.
        host_id: PlayerId,
    },

    /// A player left or disconnected.
    PlayerLeft {
        /// The departed player.
        player_id: PlayerId,
    },

    /// The match started.
    GameStart {
        /// Player who takes the first turn.
        first_player_id: PlayerId,
        /// Full turn duration in seconds.
        turn_duration: u64,
        /// The opening combo.
        combo: String,
    },

    /// A new turn began. Sent before the server arms the countdown so
    /// clients sync their display to a server-issued duration.
    TurnStart {
        /// Player on turn.
        player_id: PlayerId,
        /// Full turn duration in seconds.
        duration: u64,
    },

    /// Broadcast echo of what the player on turn is typing.
    TurnInput {
        /// Player on turn.
        player_id: PlayerId,
        /// The in-progress text.
        input: String,
    },

    /// Outcome of a submit or timeout.
    TurnResult {
        /// Player the result applies to.
        player_id: PlayerId,
        /// What happened.
        result: TurnVerdict,
        /// Player on turn after this result (same player on a rejection).
        next_player_id: PlayerId,
        /// New combo, present only when the combo rotated.
        #[serde(skip_serializing_if = "Option::is_none")]
        new_combo: Option<String>,
        /// The accepted word, present on CORRECT.
        #[serde(skip_serializing_if = "Option::is_none")]
        word: Option<String>,
        /// Wall-clock seconds left on the running turn, present on
        /// WRONG / ALREADY_USED so the client countdown re-syncs.
        #[serde(skip_serializing_if = "Option::is_none")]
        remaining_time: Option<f32>,
    },

    /// Lives/score/state snapshot for one player.
    PlayerUpdate {
        /// Player concerned.
        player_id: PlayerId,
        /// Remaining lives.
        lives: u8,
        /// Current score.
        score: u32,
        /// Current state.
        state: PlayerStatus,
    },

    /// A player ran out of lives.
    PlayerEliminated {
        /// The eliminated player.
        player_id: PlayerId,
    },

    /// The match ended.
    GameOver {
        /// Winner, if any.
        winner_id: Option<PlayerId>,
        /// Combos that caused at least one timeout, with example words.
        #[serde(skip_serializing_if = "Option::is_none")]
        failed_combos: Option<Vec<FailedCombo>>,
    },

    /// Keep-alive reply.
    Pong,

    /// Protocol-level problem; connection stays open.
    Error {
        /// What went wrong.
        message: String,
    },

    /// Server is shutting down.
    Shutdown {
        /// Reason for the shutdown.
        reason: String,
    },
}

// =============================================================================
// PAYLOAD TYPES
// =============================================================================

/// Result attached to a TURN_RESULT message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TurnVerdict {
    /// Word accepted; the turn passed on.
    Correct,
    /// Word rejected; same player retries on the same clock.
    Wrong,
    /// Word was played earlier this match; same player retries.
    AlreadyUsed,
    /// The countdown ran out; a life was lost.
    Timeout,
}

/// One player's entry in a PLAYER_LIST snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerInfo {
    /// Player identity.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Current state.
    pub state: PlayerStatus,
    /// Remaining lives.
    pub lives: u8,
    /// Current score.
    pub score: u32,
}

/// One entry in a GAMES_LIST reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    /// Game id, usable in JOIN_REQUEST.
    pub id: SessionId,
    /// Game name.
    pub name: String,
    /// Host display name.
    pub host_name: String,
    /// Current roster size.
    pub player_count: usize,
    /// Roster capacity.
    pub max_players: usize,
    /// Current phase.
    pub phase: GamePhase,
}

/// A combo nobody solved, with sampled example words for the post-game
/// review screen.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedCombo {
    /// The combo token.
    pub combo: String,
    /// Dictionary words that would have worked.
    pub example_words: Vec<String>,
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}
