//! WebSocket Game Server
//!
//! Async WebSocket gateway for client connections. Owns the sockets and
//! nothing else: frames are decoded into protocol messages and dispatched
//! into the registry and sessions, which never see transport internals.
//! Each client gets a writer task fed by an mpsc channel; that channel's
//! sender is the recipient capability handed to sessions.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, RwLock};
use tokio::time::interval;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::game::words::WordValidator;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::network::registry::SessionRegistry;
use crate::network::session::{self, PlayerId, SessionConfig, SubmitOutcome};

/// Capacity of each client's outbound queue. A client that cannot drain
/// this many messages is skipped by broadcasts until it catches up.
const OUTBOUND_QUEUE: usize = 64;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Idle time after which a silent client is dropped.
    pub idle_timeout: Duration,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:9090".parse().expect("static addr"),
            max_connections: 1000,
            idle_timeout: Duration::from_secs(300),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Connected client state.
struct ConnectedClient {
    /// Identity allocated at connect time.
    player_id: PlayerId,
    /// Last inbound frame, PING included.
    last_activity: Instant,
    /// Direct line to this client.
    #[allow(dead_code)]
    sender: mpsc::Sender<ServerMessage>,
}

/// The game server.
pub struct GameServer {
    config: ServerConfig,
    registry: Arc<SessionRegistry>,
    clients: Arc<RwLock<HashMap<SocketAddr, ConnectedClient>>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl GameServer {
    /// Create a server around a loaded validator.
    pub fn new(config: ServerConfig, validator: Arc<WordValidator>) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            config,
            registry: Arc::new(SessionRegistry::new(validator, SessionConfig::default())),
            clients: Arc::new(RwLock::new(HashMap::new())),
            shutdown_tx,
        }
    }

    /// Run the accept loop until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        info!("word rush server listening on {}", self.config.bind_addr);

        let sweep_clients = self.clients.clone();
        let sweep_registry = self.registry.clone();
        let idle_timeout = self.config.idle_timeout;
        let sweep_handle = tokio::spawn(async move {
            Self::run_idle_sweep(sweep_clients, sweep_registry, idle_timeout).await;
        });

        let mut shutdown_rx = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.clients.read().await.len() >= self.config.max_connections {
                                warn!("connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            debug!("new connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("shutdown signal received");
                    break;
                }
            }
        }

        sweep_handle.abort();
        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let clients = self.clients.clone();
        let registry = self.registry.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let ws_stream = match accept_async(stream).await {
                Ok(ws) => ws,
                Err(e) => {
                    warn!("websocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();
            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(OUTBOUND_QUEUE);

            let player_id = registry.register_client();
            {
                let mut clients = clients.write().await;
                clients.insert(addr, ConnectedClient {
                    player_id,
                    last_activity: Instant::now(),
                    sender: msg_tx.clone(),
                });
            }

            // Writer task: the only place this socket is written.
            let sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("failed to serialize message: {}", e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("invalid message from {}: {}", addr, e);
                                        let _ = msg_tx.send(ServerMessage::Error {
                                            message: "unrecognized message".to_string(),
                                        }).await;
                                        continue;
                                    }
                                };

                                {
                                    let mut clients = clients.write().await;
                                    if let Some(client) = clients.get_mut(&addr) {
                                        client.last_activity = Instant::now();
                                    }
                                }

                                Self::handle_client_message(
                                    player_id,
                                    client_msg,
                                    &registry,
                                    &msg_tx,
                                ).await;
                            }
                            Some(Ok(Message::Ping(_))) => {
                                // tungstenite answers pongs at the frame level.
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("client {} disconnected", addr);
                                break;
                            }
                            Some(Err(e)) => {
                                debug!("websocket error for {}: {}", addr, e);
                                break;
                            }
                            _ => {}
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        let _ = msg_tx.send(ServerMessage::Shutdown {
                            reason: "server shutting down".to_string(),
                        }).await;
                        break;
                    }
                }
            }

            sender_task.abort();
            clients.write().await.remove(&addr);
            registry.unregister_client(player_id).await;
            debug!("client {} cleaned up", addr);
        });
    }

    /// Route one decoded message.
    ///
    /// Lobby failures answer with JOIN_REJECT; out-of-turn game messages
    /// are dropped without a reply - a stale client is not an error.
    async fn handle_client_message(
        player_id: PlayerId,
        msg: ClientMessage,
        registry: &Arc<SessionRegistry>,
        sender: &mpsc::Sender<ServerMessage>,
    ) {
        match msg {
            ClientMessage::JoinRequest {
                game_id,
                player_name,
            } => {
                let Ok(session_id) = game_id.parse() else {
                    let _ = sender
                        .send(ServerMessage::JoinReject {
                            reason: "game not found".to_string(),
                        })
                        .await;
                    return;
                };
                match registry
                    .join_session(session_id, player_id, player_name, sender.clone())
                    .await
                {
                    Ok(session) => {
                        let _ = sender
                            .send(ServerMessage::JoinAccept {
                                player_id,
                                game_id: session_id,
                            })
                            .await;
                        session.read().await.broadcast_roster();
                    }
                    Err(e) => {
                        let _ = sender
                            .send(ServerMessage::JoinReject {
                                reason: e.to_string(),
                            })
                            .await;
                    }
                }
            }

            ClientMessage::CreateGame {
                host_name,
                game_name,
            } => {
                match registry
                    .create_session(player_id, host_name, game_name, sender.clone())
                    .await
                {
                    Ok(session) => {
                        let state = session.read().await;
                        let _ = sender
                            .send(ServerMessage::JoinAccept {
                                player_id,
                                game_id: state.id,
                            })
                            .await;
                        state.broadcast_roster();
                    }
                    Err(e) => {
                        let _ = sender
                            .send(ServerMessage::JoinReject {
                                reason: e.to_string(),
                            })
                            .await;
                    }
                }
            }

            ClientMessage::ListGames => {
                let _ = sender
                    .send(ServerMessage::GamesList {
                        games: registry.list_sessions().await,
                    })
                    .await;
            }

            ClientMessage::PlayerReady { ready } => {
                if let Some(session) = registry.session_for(&player_id).await {
                    session.write().await.set_ready(player_id, ready);
                }
            }

            ClientMessage::StartGameRequest => {
                if let Some(session) = registry.session_for(&player_id).await {
                    let mut state = session.write().await;
                    match state.start(player_id) {
                        Ok(()) => session::arm_turn_timer(&session, &mut state),
                        Err(e) => debug!(player = %player_id, "start dropped: {}", e),
                    }
                }
            }

            ClientMessage::TurnInput { input } => {
                if let Some(session) = registry.session_for(&player_id).await {
                    session.write().await.handle_turn_input(player_id, input);
                }
            }

            ClientMessage::TurnSubmit { word } => {
                if let Some(session) = registry.session_for(&player_id).await {
                    let mut state = session.write().await;
                    if state.handle_turn_submit(player_id, &word) == SubmitOutcome::Advanced {
                        session::arm_turn_timer(&session, &mut state);
                    }
                }
            }

            ClientMessage::Ping => {
                let _ = sender.send(ServerMessage::Pong).await;
            }
        }
    }

    /// Drop clients that have been silent past the idle timeout.
    async fn run_idle_sweep(
        clients: Arc<RwLock<HashMap<SocketAddr, ConnectedClient>>>,
        registry: Arc<SessionRegistry>,
        idle_timeout: Duration,
    ) {
        let mut sweep = interval(Duration::from_secs(60));
        loop {
            sweep.tick().await;

            let now = Instant::now();
            let stale: Vec<(SocketAddr, PlayerId)> = {
                let clients = clients.read().await;
                clients
                    .iter()
                    .filter(|(_, c)| now.duration_since(c.last_activity) > idle_timeout)
                    .map(|(addr, c)| (*addr, c.player_id))
                    .collect()
            };

            for (addr, player_id) in stale {
                clients.write().await.remove(&addr);
                registry.unregister_client(player_id).await;
                info!("removed idle client {}", addr);
            }
        }
    }

    /// Ask the accept loop and all connections to stop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Active connection count.
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    /// Active session count.
    pub async fn session_count(&self) -> usize {
        self.registry.session_count().await
    }
}
