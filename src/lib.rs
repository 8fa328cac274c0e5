//! # Word Rush Game Server
//!
//! Authoritative session server for Word Rush, a turn-based elimination
//! word game: each turn one player must type a dictionary word containing
//! the current letter combo before the countdown runs out. A wrong word
//! keeps the turn (and the clock) on the same player; a timeout costs a
//! life; running out of lives eliminates. Last player standing wins.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    WORD RUSH SERVER                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Word domain (transport-free)              │
//! │  └── words.rs    - Dictionary, combo list, validation        │
//! │                                                              │
//! │  network/        - Sessions and transport                    │
//! │  ├── protocol.rs - JSON wire messages                        │
//! │  ├── session.rs  - Per-game turn state machine + turn timer  │
//! │  ├── registry.rs - Lobby: create/join/list/garbage-collect   │
//! │  └── server.rs   - WebSocket gateway                         │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Authority Model
//!
//! All game state lives server-side and in memory. Clients only echo
//! keystrokes and submit words; the server owns the countdown, validates
//! every word, and decides eliminations. A session mutates under a single
//! write lock from exactly two sources - the inbound message path and the
//! session's own timer task - and a per-turn generation token makes any
//! late-delivered timeout a no-op.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::words::{WordCheck, WordListError, WordValidator};
pub use network::protocol::{ClientMessage, ServerMessage, TurnVerdict};
pub use network::registry::{LobbyError, SessionRegistry};
pub use network::session::{
    GamePhase, GameSession, PlayerId, PlayerStatus, SessionConfig, SessionId,
};
pub use network::server::{GameServer, GameServerError, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Maximum players per session
pub const MAX_PLAYERS: usize = 8;

/// Minimum ready players required to start a match
pub const MIN_PLAYERS: usize = 2;

/// Lives each player starts a match with
pub const DEFAULT_LIVES: u8 = 3;

/// Turn duration in seconds
pub const DEFAULT_TURN_SECS: u64 = 10;
