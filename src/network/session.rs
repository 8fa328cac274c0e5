//! Game Session Management
//!
//! The per-game turn state machine: lobby assembly, turn rotation, the
//! server-authoritative countdown, word validation outcomes, elimination
//! and win detection.
//!
//! A session mutates from exactly two sources - the inbound message path
//! and its own timer task - both under the session's write lock. Every
//! operation that starts a new turn bumps `turn_generation` and aborts the
//! stored timer handle, so a timeout that was already in flight finds a
//! stale generation and does nothing.

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::debug;
use uuid::Uuid;

use crate::game::words::{WordCheck, WordValidator};
use crate::network::protocol::{FailedCombo, GameSummary, PlayerInfo, ServerMessage, TurnVerdict};
use crate::{DEFAULT_LIVES, DEFAULT_TURN_SECS, MAX_PLAYERS, MIN_PLAYERS};

/// Unique player identifier.
pub type PlayerId = Uuid;

/// Unique session identifier.
pub type SessionId = Uuid;

/// A session shared between the dispatch path and its timer task.
pub type SharedSession = Arc<RwLock<GameSession>>;

/// Example words sampled per failed combo for the post-game report.
const EXAMPLES_PER_FAILED_COMBO: usize = 3;

/// Session phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePhase {
    /// Roster assembly; players join and ready up.
    Lobby,
    /// A match is running.
    Playing,
    /// The match ended; roster is kept for the next round.
    GameOver,
}

/// State of one player within a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerStatus {
    /// In the lobby, not ready.
    Connected,
    /// In the lobby, ready to play.
    Ready,
    /// In the match with lives remaining.
    Alive,
    /// Out of lives this match.
    Eliminated,
    /// Transport lost; the roster entry is about to be dropped.
    Disconnected,
}

/// Configuration for a game session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Roster capacity.
    pub max_players: usize,
    /// Ready players required to start.
    pub min_players: usize,
    /// Lives each player starts a match with.
    pub starting_lives: u8,
    /// Full turn duration.
    pub turn_duration: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_players: MAX_PLAYERS,
            min_players: MIN_PLAYERS,
            starting_lives: DEFAULT_LIVES,
            turn_duration: Duration::from_secs(DEFAULT_TURN_SECS),
        }
    }
}

/// Session errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Roster is at capacity.
    #[error("session is full")]
    SessionFull,

    /// A match is in progress; joining must wait for it to end.
    #[error("match in progress")]
    MatchInProgress,

    /// Player is already on the roster.
    #[error("already in session")]
    AlreadyInSession,

    /// The requested transition is not legal from the current state.
    #[error("invalid transition")]
    InvalidTransition,
}

/// Outcome of a submit, telling the caller whether to re-arm the timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Word accepted; a new turn began and needs a timer.
    Advanced,
    /// Word rejected; the running turn and its timer continue.
    Rejected,
    /// The submit ended the match.
    Ended,
    /// Out-of-turn or out-of-phase message; dropped silently.
    Ignored,
}

/// Outcome of a timer firing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// A life was lost and the next turn began; the same timer task keeps
    /// counting it down.
    NextTurn,
    /// The timeout ended the match.
    GameOver,
    /// The firing was for a superseded turn; nothing happened.
    Stale,
}

/// What a player removal changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// The player was on the roster.
    pub existed: bool,
    /// The roster is now empty; the caller should garbage-collect.
    pub now_empty: bool,
    /// The removal forced a new turn that needs a timer.
    pub rearm: bool,
}

impl RemovalOutcome {
    fn not_found() -> Self {
        Self {
            existed: false,
            now_empty: false,
            rearm: false,
        }
    }
}

/// A player on a session's roster.
#[derive(Debug)]
pub struct Player {
    /// Player identity.
    pub id: PlayerId,
    /// Display name.
    pub name: String,
    /// Current state.
    pub status: PlayerStatus,
    /// Remaining lives.
    pub lives: u8,
    /// Score this match.
    pub score: u32,
    /// What the player is currently typing; cleared on every turn change.
    pub current_input: String,
    /// Outbound channel. The session never touches the socket itself.
    sender: mpsc::Sender<ServerMessage>,
}

impl Player {
    fn new(id: PlayerId, name: String, lives: u8, sender: mpsc::Sender<ServerMessage>) -> Self {
        Self {
            id,
            name,
            status: PlayerStatus::Connected,
            lives,
            score: 0,
            current_input: String::new(),
            sender,
        }
    }

    fn info(&self) -> PlayerInfo {
        PlayerInfo {
            id: self.id,
            name: self.name.clone(),
            state: self.status,
            lives: self.lives,
            score: self.score,
        }
    }
}

/// A game session.
///
/// Roster order is insertion order and defines turn rotation; the first
/// ALIVE player in roster order opens a match.
#[derive(Debug)]
pub struct GameSession {
    /// Unique session identifier.
    pub id: SessionId,
    /// Session name shown in the game list.
    pub name: String,
    config: SessionConfig,
    validator: Arc<WordValidator>,
    phase: GamePhase,
    players: Vec<Player>,
    host_id: PlayerId,
    current_combo: String,
    current_turn: Option<PlayerId>,
    /// Player whose turn opened the current combo's round. Fairness
    /// anchor: a timed-out combo survives until the turn cycles back here.
    round_start: Option<PlayerId>,
    turn_started_at: Option<Instant>,
    /// Bumped whenever a new turn begins; a timer firing with an older
    /// value is stale and ignored.
    turn_generation: u64,
    timer: Option<JoinHandle<()>>,
    used_words: HashSet<String>,
    failed_combos: BTreeSet<String>,
}

impl GameSession {
    /// Create a session with its host as the first roster entry.
    pub fn new(
        id: SessionId,
        name: String,
        host_id: PlayerId,
        host_name: String,
        host_sender: mpsc::Sender<ServerMessage>,
        config: SessionConfig,
        validator: Arc<WordValidator>,
    ) -> Self {
        let host = Player::new(host_id, host_name, config.starting_lives, host_sender);
        Self {
            id,
            name,
            config,
            validator,
            phase: GamePhase::Lobby,
            players: vec![host],
            host_id,
            current_combo: String::new(),
            current_turn: None,
            round_start: None,
            turn_started_at: None,
            turn_generation: 0,
            timer: None,
            used_words: HashSet::new(),
            failed_combos: BTreeSet::new(),
        }
    }

    // =========================================================================
    // ROSTER
    // =========================================================================

    /// Add a player. Joinable in LOBBY and GAME_OVER, rejected while
    /// PLAYING or at capacity.
    pub fn add_player(
        &mut self,
        id: PlayerId,
        name: String,
        sender: mpsc::Sender<ServerMessage>,
    ) -> Result<(), SessionError> {
        if self.phase == GamePhase::Playing {
            return Err(SessionError::MatchInProgress);
        }
        if self.players.len() >= self.config.max_players {
            return Err(SessionError::SessionFull);
        }
        if self.player(&id).is_some() {
            return Err(SessionError::AlreadyInSession);
        }

        self.players
            .push(Player::new(id, name, self.config.starting_lives, sender));
        Ok(())
    }

    /// Remove a player on leave or disconnect.
    ///
    /// Reassigns the host if needed, forces a turn advance if the removed
    /// player held the turn, and re-runs the win check - a removal can end
    /// the match by itself.
    pub fn remove_player(&mut self, id: PlayerId) -> RemovalOutcome {
        let Some(idx) = self.players.iter().position(|p| p.id == id) else {
            return RemovalOutcome::not_found();
        };
        let was_current = self.current_turn == Some(id);
        let was_host = self.host_id == id;
        self.players.remove(idx);

        self.broadcast(&ServerMessage::PlayerLeft { player_id: id });

        if self.players.is_empty() {
            self.cancel_timer();
            return RemovalOutcome {
                existed: true,
                now_empty: true,
                rearm: false,
            };
        }

        if was_host {
            self.host_id = self.players[0].id;
        }

        let mut rearm = false;
        if self.phase == GamePhase::Playing {
            if was_current {
                self.cancel_timer();
                // idx now points at the player after the removed one.
                let advanced = self.advance_from(idx % self.players.len(), false);
                if let Some(winner) = self.check_win() {
                    self.finish_game(winner);
                } else if let Some((next, rotated)) = advanced {
                    self.broadcast(&ServerMessage::TurnStart {
                        player_id: next,
                        duration: self.config.turn_duration.as_secs(),
                    });
                    if rotated {
                        debug!(session = %self.id, combo = %self.current_combo, "combo rotated on removal");
                    }
                    self.reset_turn_clock();
                    rearm = true;
                }
            } else if let Some(winner) = self.check_win() {
                self.finish_game(winner);
            }
        }

        self.broadcast_roster();
        RemovalOutcome {
            existed: true,
            now_empty: false,
            rearm,
        }
    }

    /// Toggle ready state. A PLAYER_READY received while GAME_OVER first
    /// folds the session back into the lobby.
    pub fn set_ready(&mut self, id: PlayerId, ready: bool) {
        if self.phase == GamePhase::GameOver {
            self.return_to_lobby();
        }
        if self.phase != GamePhase::Lobby {
            return;
        }
        let Some(player) = self.player_mut(&id) else {
            return;
        };
        player.status = match (player.status, ready) {
            (PlayerStatus::Connected, true) => PlayerStatus::Ready,
            (PlayerStatus::Ready, false) => PlayerStatus::Connected,
            (status, _) => status,
        };
        self.broadcast_roster();
    }

    /// Whether enough players are ready for `start` to succeed.
    pub fn can_start(&self) -> bool {
        self.players
            .iter()
            .filter(|p| p.status == PlayerStatus::Ready)
            .count()
            >= self.config.min_players
    }

    // =========================================================================
    // MATCH LIFECYCLE
    // =========================================================================

    /// Start the match. Host-only; requires `can_start()`. The caller must
    /// arm the turn timer on success.
    pub fn start(&mut self, requester: PlayerId) -> Result<(), SessionError> {
        if self.phase != GamePhase::Lobby || requester != self.host_id || !self.can_start() {
            return Err(SessionError::InvalidTransition);
        }

        self.used_words.clear();
        self.failed_combos.clear();
        for player in &mut self.players {
            if player.status == PlayerStatus::Ready {
                player.status = PlayerStatus::Alive;
                player.lives = self.config.starting_lives;
                player.score = 0;
            }
            player.current_input.clear();
        }

        let first = self
            .players
            .iter()
            .find(|p| p.status == PlayerStatus::Alive)
            .map(|p| p.id)
            .ok_or(SessionError::InvalidTransition)?;

        self.current_combo = self.validator.generate_combo();
        self.current_turn = Some(first);
        self.round_start = Some(first);
        self.phase = GamePhase::Playing;

        debug!(session = %self.id, %first, combo = %self.current_combo, "match started");

        // Clients learn the duration before the server clock starts.
        self.broadcast(&ServerMessage::GameStart {
            first_player_id: first,
            turn_duration: self.config.turn_duration.as_secs(),
            combo: self.current_combo.clone(),
        });
        self.broadcast_roster();
        self.broadcast(&ServerMessage::TurnStart {
            player_id: first,
            duration: self.config.turn_duration.as_secs(),
        });

        self.cancel_timer();
        self.reset_turn_clock();
        Ok(())
    }

    /// Reset match-scoped state and fold everyone back into the lobby.
    /// Roster and host are preserved.
    pub fn return_to_lobby(&mut self) {
        self.cancel_timer();
        self.phase = GamePhase::Lobby;
        self.current_combo.clear();
        self.current_turn = None;
        self.round_start = None;
        self.turn_started_at = None;
        self.used_words.clear();
        self.failed_combos.clear();
        for player in &mut self.players {
            player.status = PlayerStatus::Connected;
            player.lives = self.config.starting_lives;
            player.score = 0;
            player.current_input.clear();
        }
    }

    // =========================================================================
    // TURN HANDLING
    // =========================================================================

    /// Echo in-progress typing to the other players. Never validated,
    /// never affects game state.
    pub fn handle_turn_input(&mut self, id: PlayerId, text: String) {
        if !self.holds_turn(id) {
            return;
        }
        if let Some(player) = self.player_mut(&id) {
            player.current_input = text.clone();
        }
        self.broadcast_except(id, &ServerMessage::TurnInput {
            player_id: id,
            input: text,
        });
    }

    /// Resolve a submitted word for the current turn.
    pub fn handle_turn_submit(&mut self, id: PlayerId, word: &str) -> SubmitOutcome {
        if !self.holds_turn(id) {
            return SubmitOutcome::Ignored;
        }

        match self
            .validator
            .validate(word, &self.current_combo, &self.used_words)
        {
            WordCheck::Correct => self.accept_word(id, word),
            WordCheck::Wrong => self.reject_word(id, TurnVerdict::Wrong),
            WordCheck::AlreadyUsed => self.reject_word(id, TurnVerdict::AlreadyUsed),
        }
    }

    fn accept_word(&mut self, id: PlayerId, word: &str) -> SubmitOutcome {
        let normalized = self.validator.normalize_word(word);
        self.used_words.insert(normalized.clone());

        if let Some(player) = self.player_mut(&id) {
            player.score += 1;
            player.current_input.clear();
        }
        self.broadcast_player_update(id);

        // A correct answer always rotates the combo.
        let advanced = self.advance_to_next_player(true);
        let next = advanced.map(|(next, _)| next).unwrap_or(id);
        self.broadcast(&ServerMessage::TurnResult {
            player_id: id,
            result: TurnVerdict::Correct,
            next_player_id: next,
            new_combo: Some(self.current_combo.clone()),
            word: Some(normalized),
            remaining_time: None,
        });

        if let Some(winner) = self.check_win() {
            self.finish_game(winner);
            return SubmitOutcome::Ended;
        }

        self.broadcast(&ServerMessage::TurnStart {
            player_id: next,
            duration: self.config.turn_duration.as_secs(),
        });
        self.cancel_timer();
        self.reset_turn_clock();
        SubmitOutcome::Advanced
    }

    fn reject_word(&mut self, id: PlayerId, verdict: TurnVerdict) -> SubmitOutcome {
        // The turn and its clock keep running; report how much is left so
        // the client countdown re-syncs.
        self.broadcast(&ServerMessage::TurnResult {
            player_id: id,
            result: verdict,
            next_player_id: id,
            new_combo: None,
            word: None,
            remaining_time: Some(self.remaining_secs()),
        });
        SubmitOutcome::Rejected
    }

    /// Resolve a turn timeout delivered by the timer task.
    ///
    /// `generation` is the token the task was armed with; a mismatch means
    /// the turn was superseded while the firing was in flight.
    pub fn handle_timeout(&mut self, generation: u64) -> TimeoutOutcome {
        if self.phase != GamePhase::Playing || generation != self.turn_generation {
            return TimeoutOutcome::Stale;
        }
        let Some(current) = self.current_turn else {
            return TimeoutOutcome::Stale;
        };

        self.failed_combos.insert(self.current_combo.clone());

        let mut eliminated = false;
        if let Some(player) = self.player_mut(&current) {
            player.lives = player.lives.saturating_sub(1);
            player.current_input.clear();
            if player.lives == 0 {
                player.status = PlayerStatus::Eliminated;
                eliminated = true;
            }
        }
        self.broadcast_player_update(current);
        if eliminated {
            debug!(session = %self.id, player = %current, "player eliminated");
            self.broadcast(&ServerMessage::PlayerEliminated { player_id: current });
        }

        if let Some(winner) = self.check_win() {
            self.finish_game(winner);
            return TimeoutOutcome::GameOver;
        }

        let advanced = self.advance_to_next_player(false);
        let next = advanced.map(|(next, _)| next).unwrap_or(current);
        let rotated = advanced.map(|(_, rotated)| rotated).unwrap_or(false);
        self.broadcast(&ServerMessage::TurnResult {
            player_id: current,
            result: TurnVerdict::Timeout,
            next_player_id: next,
            new_combo: rotated.then(|| self.current_combo.clone()),
            word: None,
            remaining_time: None,
        });
        self.broadcast(&ServerMessage::TurnStart {
            player_id: next,
            duration: self.config.turn_duration.as_secs(),
        });

        // The firing task stays the session's active timer and keeps
        // counting the next turn down, so the handle is left in place.
        self.reset_turn_clock();
        TimeoutOutcome::NextTurn
    }

    /// Round-robin to the next ALIVE player, starting after the current
    /// one and wrapping at most once.
    ///
    /// The combo rotates when forced (correct answer) or when the turn
    /// returns to the round-start player - a full round nobody solved. If
    /// the round-start player is gone or eliminated, the newly selected
    /// player becomes the anchor of a fresh fairness window instead of
    /// triggering a rotation.
    fn advance_to_next_player(&mut self, force_combo_change: bool) -> Option<(PlayerId, bool)> {
        let current = self.current_turn?;
        let idx = self.players.iter().position(|p| p.id == current)?;
        self.advance_from((idx + 1) % self.players.len(), force_combo_change)
    }

    fn advance_from(
        &mut self,
        start_idx: usize,
        force_combo_change: bool,
    ) -> Option<(PlayerId, bool)> {
        let next_idx = self.select_next_alive(start_idx)?;
        let next = self.players[next_idx].id;

        let round_start_alive = self
            .round_start
            .and_then(|id| self.player(&id))
            .map(|p| p.status == PlayerStatus::Alive)
            .unwrap_or(false);

        let rotate = force_combo_change || (round_start_alive && self.round_start == Some(next));
        if rotate {
            self.current_combo = self.validator.generate_combo();
            self.round_start = Some(next);
        } else if !round_start_alive {
            self.round_start = Some(next);
        }

        self.current_turn = Some(next);
        self.players[next_idx].current_input.clear();
        Some((next, rotate))
    }

    fn select_next_alive(&self, start: usize) -> Option<usize> {
        let n = self.players.len();
        if n == 0 {
            return None;
        }
        (0..n)
            .map(|k| (start + k) % n)
            .find(|&i| self.players[i].status == PlayerStatus::Alive)
    }

    /// Win resolution. `Some(winner)` ends the match.
    ///
    /// A session that only ever had one player runs until that player is
    /// eliminated (no winner). With two or more players the match ends as
    /// soon as at most one remains ALIVE.
    fn check_win(&self) -> Option<Option<PlayerId>> {
        if self.phase != GamePhase::Playing {
            return None;
        }
        let alive: Vec<PlayerId> = self
            .players
            .iter()
            .filter(|p| p.status == PlayerStatus::Alive)
            .map(|p| p.id)
            .collect();

        if self.players.len() == 1 {
            return alive.is_empty().then_some(None);
        }
        (alive.len() <= 1).then(|| alive.first().copied())
    }

    fn finish_game(&mut self, winner: Option<PlayerId>) {
        self.cancel_timer();
        self.phase = GamePhase::GameOver;
        self.current_turn = None;
        self.round_start = None;
        self.turn_started_at = None;

        let failed: Vec<FailedCombo> = self
            .failed_combos
            .iter()
            .map(|combo| FailedCombo {
                combo: combo.clone(),
                example_words: self
                    .validator
                    .sample_examples(combo, EXAMPLES_PER_FAILED_COMBO),
            })
            .collect();

        debug!(session = %self.id, ?winner, "match over");
        self.broadcast(&ServerMessage::GameOver {
            winner_id: winner,
            failed_combos: (!failed.is_empty()).then_some(failed),
        });
    }

    // =========================================================================
    // TIMER PLUMBING
    // =========================================================================

    fn reset_turn_clock(&mut self) {
        self.turn_generation += 1;
        self.turn_started_at = Some(Instant::now());
    }

    fn cancel_timer(&mut self) {
        if let Some(handle) = self.timer.take() {
            handle.abort();
        }
    }

    /// Deadline of the running turn, for `tokio::time::sleep_until`.
    ///
    /// Always derived from the turn start instant, never from a counter,
    /// so tick jitter cannot accumulate into drift.
    fn turn_deadline(&self) -> Instant {
        self.turn_started_at.unwrap_or_else(Instant::now) + self.config.turn_duration
    }

    fn remaining_secs(&self) -> f32 {
        let elapsed = self
            .turn_started_at
            .map(|t| t.elapsed())
            .unwrap_or_default();
        self.config.turn_duration.saturating_sub(elapsed).as_secs_f32()
    }

    // =========================================================================
    // QUERIES AND BROADCAST
    // =========================================================================

    /// Current phase.
    pub fn phase(&self) -> GamePhase {
        self.phase
    }

    /// Current host.
    pub fn host_id(&self) -> PlayerId {
        self.host_id
    }

    /// Roster size.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Whether the roster is empty.
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Summary for the game list.
    pub fn summary(&self) -> GameSummary {
        GameSummary {
            id: self.id,
            name: self.name.clone(),
            host_name: self
                .player(&self.host_id)
                .map(|p| p.name.clone())
                .unwrap_or_default(),
            player_count: self.players.len(),
            max_players: self.config.max_players,
            phase: self.phase,
        }
    }

    /// Broadcast the full roster snapshot.
    pub fn broadcast_roster(&self) {
        self.broadcast(&ServerMessage::PlayerList {
            players: self.players.iter().map(Player::info).collect(),
            host_id: self.host_id,
        });
    }

    fn broadcast_player_update(&self, id: PlayerId) {
        if let Some(player) = self.player(&id) {
            self.broadcast(&ServerMessage::PlayerUpdate {
                player_id: player.id,
                lives: player.lives,
                score: player.score,
                state: player.status,
            });
        }
    }

    /// Best-effort fan-out: a full or closed channel is skipped, never
    /// retried, and never blocks the other recipients.
    fn broadcast(&self, message: &ServerMessage) {
        for player in &self.players {
            let _ = player.sender.try_send(message.clone());
        }
    }

    fn broadcast_except(&self, skip: PlayerId, message: &ServerMessage) {
        for player in self.players.iter().filter(|p| p.id != skip) {
            let _ = player.sender.try_send(message.clone());
        }
    }

    fn holds_turn(&self, id: PlayerId) -> bool {
        self.phase == GamePhase::Playing
            && self.current_turn == Some(id)
            && self
                .player(&id)
                .map(|p| p.status == PlayerStatus::Alive)
                .unwrap_or(false)
    }

    fn player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.iter().find(|p| &p.id == id)
    }

    fn player_mut(&mut self, id: &PlayerId) -> Option<&mut Player> {
        self.players.iter_mut().find(|p| &p.id == id)
    }
}

// =============================================================================
// TURN TIMER TASK
// =============================================================================

/// Arm the countdown for the turn that just began.
///
/// `state` must be the write guard of `session`. Any previously stored
/// timer is aborted, keeping a single live handle per session.
pub fn arm_turn_timer(session: &SharedSession, state: &mut GameSession) {
    if state.phase != GamePhase::Playing {
        return;
    }
    state.cancel_timer();
    let generation = state.turn_generation;
    let deadline = state.turn_deadline();
    state.timer = Some(tokio::spawn(turn_timer_task(
        session.clone(),
        generation,
        deadline,
    )));
}

/// One timer task per turn streak: it sleeps until the turn deadline,
/// resolves the timeout under the session lock, and keeps counting down
/// follow-up turns for as long as timeouts keep advancing the game.
/// Submits cancel it eagerly; a stale generation ends it quietly.
async fn turn_timer_task(session: SharedSession, mut generation: u64, mut deadline: Instant) {
    loop {
        tokio::time::sleep_until(deadline).await;
        let mut state = session.write().await;
        match state.handle_timeout(generation) {
            TimeoutOutcome::NextTurn => {
                generation = state.turn_generation;
                deadline = state.turn_deadline();
            }
            TimeoutOutcome::GameOver | TimeoutOutcome::Stale => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::protocol::ServerMessage as Msg;

    fn test_validator() -> Arc<WordValidator> {
        Arc::new(WordValidator::from_lists(
            ["apple", "apply", "ample", "maple", "staple", "grape"].map(String::from),
            ["ap"].map(String::from),
        ))
    }

    fn test_config() -> SessionConfig {
        SessionConfig::default()
    }

    struct Rig {
        session: GameSession,
        players: Vec<(PlayerId, mpsc::Receiver<ServerMessage>)>,
    }

    impl Rig {
        /// Session with `n` players, the first being host.
        fn new(n: usize, config: SessionConfig) -> Self {
            assert!(n >= 1);
            let host_id = Uuid::new_v4();
            let (host_tx, host_rx) = mpsc::channel(64);
            let mut session = GameSession::new(
                Uuid::new_v4(),
                "test room".to_string(),
                host_id,
                "p1".to_string(),
                host_tx,
                config,
                test_validator(),
            );
            let mut players = vec![(host_id, host_rx)];
            for i in 1..n {
                let id = Uuid::new_v4();
                let (tx, rx) = mpsc::channel(64);
                session.add_player(id, format!("p{}", i + 1), tx).unwrap();
                players.push((id, rx));
            }
            Self { session, players }
        }

        fn id(&self, idx: usize) -> PlayerId {
            self.players[idx].0
        }

        fn drain(&mut self, idx: usize) -> Vec<ServerMessage> {
            let mut out = Vec::new();
            while let Ok(msg) = self.players[idx].1.try_recv() {
                out.push(msg);
            }
            out
        }

        fn ready_all(&mut self) {
            let ids: Vec<_> = self.players.iter().map(|(id, _)| *id).collect();
            for id in ids {
                self.session.set_ready(id, true);
            }
        }

        fn start(&mut self) {
            self.ready_all();
            let host = self.id(0);
            self.session.start(host).unwrap();
            for i in 0..self.players.len() {
                self.drain(i);
            }
        }
    }

    #[tokio::test]
    async fn test_capacity_enforced() {
        let mut rig = Rig::new(1, SessionConfig {
            max_players: 2,
            ..test_config()
        });
        let (tx, _rx) = mpsc::channel(64);
        rig.session.add_player(Uuid::new_v4(), "p2".into(), tx).unwrap();

        let (tx, _rx) = mpsc::channel(64);
        let err = rig.session.add_player(Uuid::new_v4(), "p3".into(), tx);
        assert_eq!(err, Err(SessionError::SessionFull));
    }

    #[tokio::test]
    async fn test_join_rejected_while_playing_allowed_after() {
        let mut rig = Rig::new(2, test_config());
        rig.start();

        let (tx, _rx) = mpsc::channel(64);
        let err = rig.session.add_player(Uuid::new_v4(), "late".into(), tx);
        assert_eq!(err, Err(SessionError::MatchInProgress));

        // Drive the match to GAME_OVER; a post-game session is joinable.
        let p2 = rig.id(1);
        rig.session.remove_player(p2);
        loop {
            let generation = rig.session.turn_generation;
            if rig.session.handle_timeout(generation) == TimeoutOutcome::GameOver {
                break;
            }
        }
        assert_eq!(rig.session.phase(), GamePhase::GameOver);
        let (tx, _rx) = mpsc::channel(64);
        assert!(rig.session.add_player(Uuid::new_v4(), "late".into(), tx).is_ok());
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let mut rig = Rig::new(1, test_config());
        let host = rig.id(0);
        let (tx, _rx) = mpsc::channel(64);
        let err = rig.session.add_player(host, "p1 again".into(), tx);
        assert_eq!(err, Err(SessionError::AlreadyInSession));
    }

    #[tokio::test]
    async fn test_ready_toggle_gates_start() {
        let mut rig = Rig::new(2, test_config());
        let (p1, p2) = (rig.id(0), rig.id(1));

        assert!(!rig.session.can_start());
        rig.session.set_ready(p1, true);
        assert!(!rig.session.can_start());
        rig.session.set_ready(p2, true);
        assert!(rig.session.can_start());

        rig.session.set_ready(p2, false);
        assert!(!rig.session.can_start());
        assert_eq!(
            rig.session.start(p1),
            Err(SessionError::InvalidTransition)
        );
    }

    #[tokio::test]
    async fn test_start_is_host_only() {
        let mut rig = Rig::new(2, test_config());
        rig.ready_all();
        let p2 = rig.id(1);
        assert_eq!(rig.session.start(p2), Err(SessionError::InvalidTransition));
        assert_eq!(rig.session.phase(), GamePhase::Lobby);
    }

    #[tokio::test]
    async fn test_game_start_announces_first_player_and_combo() {
        let mut rig = Rig::new(2, test_config());
        rig.ready_all();
        let p1 = rig.id(0);
        rig.session.start(p1).unwrap();

        let msgs = rig.drain(1);
        let start = msgs.iter().find_map(|m| match m {
            Msg::GameStart {
                first_player_id,
                turn_duration,
                combo,
            } => Some((*first_player_id, *turn_duration, combo.clone())),
            _ => None,
        });
        let (first, duration, combo) = start.expect("GAME_START missing");
        assert_eq!(first, p1);
        assert_eq!(duration, DEFAULT_TURN_SECS);
        assert_eq!(combo, "ap");
        assert!(rig.session.used_words.is_empty());
        assert_eq!(rig.session.current_turn, Some(p1));
        assert_eq!(rig.session.round_start, Some(p1));
    }

    #[tokio::test]
    async fn test_correct_submit_advances_and_rotates() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let (p1, p2) = (rig.id(0), rig.id(1));

        let outcome = rig.session.handle_turn_submit(p1, "Apple");
        assert_eq!(outcome, SubmitOutcome::Advanced);
        assert_eq!(rig.session.current_turn, Some(p2));
        assert_eq!(rig.session.player(&p1).unwrap().score, 1);
        assert!(rig.session.used_words.contains("apple"));

        let msgs = rig.drain(1);
        let result = msgs.iter().find_map(|m| match m {
            Msg::TurnResult {
                result,
                next_player_id,
                new_combo,
                word,
                ..
            } => Some((*result, *next_player_id, new_combo.clone(), word.clone())),
            _ => None,
        });
        let (verdict, next, new_combo, word) = result.expect("TURN_RESULT missing");
        assert_eq!(verdict, TurnVerdict::Correct);
        assert_eq!(next, p2);
        assert!(new_combo.is_some());
        assert_eq!(word.as_deref(), Some("apple"));
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::TurnStart { player_id, .. } if *player_id == p2
        )));
    }

    #[tokio::test]
    async fn test_already_used_keeps_turn_and_reports_remaining() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let (p1, p2) = (rig.id(0), rig.id(1));

        rig.session.handle_turn_submit(p1, "apple");
        rig.drain(0);

        let outcome = rig.session.handle_turn_submit(p2, "APPLE");
        assert_eq!(outcome, SubmitOutcome::Rejected);
        assert_eq!(rig.session.current_turn, Some(p2));

        let msgs = rig.drain(0);
        let result = msgs.iter().find_map(|m| match m {
            Msg::TurnResult {
                result,
                next_player_id,
                remaining_time,
                ..
            } => Some((*result, *next_player_id, *remaining_time)),
            _ => None,
        });
        let (verdict, next, remaining) = result.expect("TURN_RESULT missing");
        assert_eq!(verdict, TurnVerdict::AlreadyUsed);
        assert_eq!(next, p2);
        let remaining = remaining.expect("remainingTime missing");
        assert!(remaining > 0.0 && remaining <= DEFAULT_TURN_SECS as f32);
    }

    #[tokio::test]
    async fn test_wrong_word_does_not_touch_clock() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let p1 = rig.id(0);
        let generation = rig.session.turn_generation;

        assert_eq!(
            rig.session.handle_turn_submit(p1, "wrong"),
            SubmitOutcome::Rejected
        );
        assert_eq!(rig.session.turn_generation, generation);
        assert_eq!(rig.session.current_turn, Some(p1));
        assert_eq!(rig.session.player(&p1).unwrap().score, 0);
    }

    #[tokio::test]
    async fn test_out_of_turn_submit_ignored() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let p2 = rig.id(1);

        assert_eq!(
            rig.session.handle_turn_submit(p2, "apple"),
            SubmitOutcome::Ignored
        );
        assert!(rig.session.used_words.is_empty());
        assert!(rig.drain(0).is_empty());
    }

    #[tokio::test]
    async fn test_turn_input_echoes_to_others_only() {
        let mut rig = Rig::new(3, test_config());
        rig.start();
        let p1 = rig.id(0);

        rig.session.handle_turn_input(p1, "app".into());
        assert!(rig.drain(0).is_empty());
        let msgs = rig.drain(1);
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::TurnInput { player_id, input } if *player_id == p1 && input == "app"
        )));
        assert!(!rig.drain(2).is_empty());
    }

    #[tokio::test]
    async fn test_timeout_costs_life_and_keeps_combo() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let (p1, p2) = (rig.id(0), rig.id(1));
        let combo_before = rig.session.current_combo.clone();

        let generation = rig.session.turn_generation;
        assert_eq!(
            rig.session.handle_timeout(generation),
            TimeoutOutcome::NextTurn
        );
        assert_eq!(rig.session.player(&p1).unwrap().lives, DEFAULT_LIVES - 1);
        assert_eq!(rig.session.current_turn, Some(p2));
        assert_eq!(rig.session.current_combo, combo_before);
        assert!(rig.session.failed_combos.contains(&combo_before));

        let msgs = rig.drain(1);
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::PlayerUpdate { player_id, lives, .. }
                if *player_id == p1 && *lives == DEFAULT_LIVES - 1
        )));
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::TurnResult {
                result: TurnVerdict::Timeout,
                next_player_id,
                new_combo: None,
                ..
            } if *next_player_id == p2
        )));
    }

    #[tokio::test]
    async fn test_combo_rotates_once_round_completes() {
        let mut rig = Rig::new(2, test_config());
        rig.start();

        // p1 times out: round started at p1, not yet complete.
        let generation = rig.session.turn_generation;
        rig.session.handle_timeout(generation);
        rig.drain(0);

        // p2 times out: turn returns to p1, the round-start player.
        let generation = rig.session.turn_generation;
        rig.session.handle_timeout(generation);
        let msgs = rig.drain(0);
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::TurnResult {
                result: TurnVerdict::Timeout,
                new_combo: Some(_),
                ..
            }
        )));
        assert_eq!(rig.session.round_start, rig.session.current_turn);
    }

    #[tokio::test]
    async fn test_stale_generation_is_noop() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let p1 = rig.id(0);
        let stale = rig.session.turn_generation;

        rig.session.handle_turn_submit(p1, "apple");
        assert_eq!(rig.session.handle_timeout(stale), TimeoutOutcome::Stale);
        let p2 = rig.id(1);
        assert_eq!(rig.session.player(&p2).unwrap().lives, DEFAULT_LIVES);
        assert_eq!(rig.session.current_turn, Some(p2));
    }

    #[tokio::test]
    async fn test_elimination_ends_two_player_match() {
        let mut rig = Rig::new(2, SessionConfig {
            starting_lives: 1,
            ..test_config()
        });
        rig.start();
        let (p1, p2) = (rig.id(0), rig.id(1));

        let generation = rig.session.turn_generation;
        assert_eq!(
            rig.session.handle_timeout(generation),
            TimeoutOutcome::GameOver
        );
        assert_eq!(rig.session.phase(), GamePhase::GameOver);

        let msgs = rig.drain(1);
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::PlayerEliminated { player_id } if *player_id == p1
        )));
        let game_over = msgs.iter().find_map(|m| match m {
            Msg::GameOver {
                winner_id,
                failed_combos,
            } => Some((*winner_id, failed_combos.clone())),
            _ => None,
        });
        let (winner, failed) = game_over.expect("GAME_OVER missing");
        assert_eq!(winner, Some(p2));
        let failed = failed.expect("failed combos missing");
        assert_eq!(failed[0].combo, "ap");
        assert!(!failed[0].example_words.is_empty());
    }

    #[tokio::test]
    async fn test_lone_player_elimination_has_no_winner() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let (p1, p2) = (rig.id(0), rig.id(1));

        // Opponent leaves; the match continues solo for p1.
        let outcome = rig.session.remove_player(p2);
        assert!(outcome.existed && !outcome.now_empty);
        assert_eq!(rig.session.phase(), GamePhase::Playing);

        for _ in 0..DEFAULT_LIVES - 1 {
            let generation = rig.session.turn_generation;
            assert_eq!(
                rig.session.handle_timeout(generation),
                TimeoutOutcome::NextTurn
            );
            assert_eq!(rig.session.current_turn, Some(p1));
        }
        let generation = rig.session.turn_generation;
        assert_eq!(
            rig.session.handle_timeout(generation),
            TimeoutOutcome::GameOver
        );

        let msgs = rig.drain(0);
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::GameOver { winner_id: None, .. }
        )));
    }

    #[tokio::test]
    async fn test_removing_turn_holder_advances_and_reassigns_host() {
        let mut rig = Rig::new(3, test_config());
        rig.start();
        let (p1, p2) = (rig.id(0), rig.id(1));

        let outcome = rig.session.remove_player(p1);
        assert!(outcome.existed && outcome.rearm);
        assert_eq!(rig.session.current_turn, Some(p2));
        assert_eq!(rig.session.host_id(), p2);
        assert_eq!(rig.session.phase(), GamePhase::Playing);

        let msgs = rig.drain(1);
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::PlayerLeft { player_id } if *player_id == p1
        )));
        assert!(msgs.iter().any(|m| matches!(
            m,
            Msg::PlayerList { host_id, .. } if *host_id == p2
        )));
    }

    #[tokio::test]
    async fn test_removing_last_player_empties_session() {
        let mut rig = Rig::new(1, test_config());
        let p1 = rig.id(0);
        let outcome = rig.session.remove_player(p1);
        assert!(outcome.existed && outcome.now_empty);
        assert!(rig.session.is_empty());
    }

    #[tokio::test]
    async fn test_ready_after_game_over_returns_to_lobby() {
        let mut rig = Rig::new(2, SessionConfig {
            starting_lives: 1,
            ..test_config()
        });
        rig.start();
        let p1 = rig.id(0);

        rig.session.handle_turn_submit(p1, "apple");
        let generation = rig.session.turn_generation;
        rig.session.handle_timeout(generation); // p2 eliminated, p1 wins
        assert_eq!(rig.session.phase(), GamePhase::GameOver);
        assert!(!rig.session.used_words.is_empty());

        rig.session.set_ready(p1, true);
        assert_eq!(rig.session.phase(), GamePhase::Lobby);
        assert!(rig.session.used_words.is_empty());
        assert!(rig.session.failed_combos.is_empty());
        assert_eq!(rig.session.player(&p1).unwrap().status, PlayerStatus::Ready);
        let p2 = rig.id(1);
        assert_eq!(
            rig.session.player(&p2).unwrap().status,
            PlayerStatus::Connected
        );
        assert_eq!(rig.session.player(&p2).unwrap().lives, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_task_fires_and_chains() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let (p1, p2) = (rig.id(0), rig.id(1));

        let session: SharedSession = Arc::new(RwLock::new(rig.session));
        {
            let mut state = session.write().await;
            arm_turn_timer(&session, &mut state);
        }

        tokio::time::sleep(Duration::from_secs(DEFAULT_TURN_SECS) + Duration::from_millis(50))
            .await;
        {
            let state = session.read().await;
            assert_eq!(state.player(&p1).unwrap().lives, DEFAULT_LIVES - 1);
            assert_eq!(state.current_turn, Some(p2));
        }

        // Same task keeps counting the next turn down.
        tokio::time::sleep(Duration::from_secs(DEFAULT_TURN_SECS)).await;
        {
            let state = session.read().await;
            assert_eq!(state.player(&p2).unwrap().lives, DEFAULT_LIVES - 1);
            assert_eq!(state.current_turn, Some(p1));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_submit_supersedes_pending_timer() {
        let mut rig = Rig::new(2, test_config());
        rig.start();
        let (p1, p2) = (rig.id(0), rig.id(1));

        let session: SharedSession = Arc::new(RwLock::new(rig.session));
        {
            let mut state = session.write().await;
            arm_turn_timer(&session, &mut state);
        }

        tokio::time::sleep(Duration::from_secs(5)).await;
        {
            let mut state = session.write().await;
            assert_eq!(state.handle_turn_submit(p1, "apple"), SubmitOutcome::Advanced);
            arm_turn_timer(&session, &mut state);
        }

        // Past the original deadline: the superseded timer must not fire.
        tokio::time::sleep(Duration::from_secs(6)).await;
        {
            let state = session.read().await;
            assert_eq!(state.player(&p1).unwrap().lives, DEFAULT_LIVES);
            assert_eq!(state.player(&p2).unwrap().lives, DEFAULT_LIVES);
            assert_eq!(state.current_turn, Some(p2));
        }

        // The replacement timer fires on its own schedule.
        tokio::time::sleep(Duration::from_secs(5)).await;
        {
            let state = session.read().await;
            assert_eq!(state.player(&p2).unwrap().lives, DEFAULT_LIVES - 1);
        }
    }
}
