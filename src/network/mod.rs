//! Network Layer
//!
//! Sessions, the lobby registry, the JSON wire protocol, and the
//! WebSocket gateway. Sessions never touch sockets - they broadcast
//! through per-player channel senders handed in by the gateway.

pub mod protocol;
pub mod registry;
pub mod server;
pub mod session;

pub use protocol::{ClientMessage, GameSummary, PlayerInfo, ServerMessage, TurnVerdict};
pub use registry::{LobbyError, SessionRegistry};
pub use server::{GameServer, GameServerError, ServerConfig};
pub use session::{
    GamePhase, GameSession, PlayerId, PlayerStatus, SessionConfig, SessionError, SessionId,
};
