use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::http::{HeaderMap, header};
use axum::response::IntoResponse;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use courier_types::events::{GatewayCommand, GatewayEvent};
use courier_types::{ChatError, ChatResult, ConversationId, UserId};

use crate::GatewayState;
use crate::auth::{Authenticator, bearer_token};
use crate::store::ChatStore;

type WsSender = SplitSink<WebSocket, Message>;
type WsReceiver = SplitStream<WebSocket>;

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    /// Kept as text so a malformed id is reported over the socket instead of
    /// failing the upgrade.
    pub peer_id: Option<String>,
    /// For clients that cannot set headers on the upgrade request.
    pub token: Option<String>,
}

/// GET /gateway?peer_id=N
pub async fn ws_upgrade(
    State(state): State<GatewayState>,
    Query(params): Query<ConnectParams>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(bearer_token)
        .map(str::to_string)
        .or(params.token);
    let peer = params.peer_id;

    let sessions = state.sessions.clone();
    ws.on_upgrade(move |socket| {
        sessions.track_future(handle_connection(socket, state, token, peer))
    })
}

/// Why an active session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    TransportError,
    HeartbeatTimeout,
    Shutdown,
    Fatal,
}

/// Drive one connection through authentication and peer resolution, then
/// run its session until it closes.
pub async fn handle_connection(
    socket: WebSocket,
    state: GatewayState,
    token: Option<String>,
    peer: Option<String>,
) {
    let (mut sender, receiver) = socket.split();
    let conn_id = Uuid::new_v4();

    let user_id = match authenticate(state.auth.as_ref(), token.as_deref()).await {
        Ok(id) => id,
        Err(e) => {
            warn!("Gateway connection {} rejected: {}", conn_id, e);
            reject(&mut sender, &e).await;
            return;
        }
    };

    let (peer_id, conversation_id) =
        match resolve_peer(state.store.as_ref(), user_id, peer.as_deref()).await {
            Ok(resolved) => resolved,
            Err(e) => {
                warn!("User {} ({}) could not open a session: {}", user_id, conn_id, e);
                reject(&mut sender, &e).await;
                return;
            }
        };

    info!(
        "User {} ({}) connected to gateway, peer {} in conversation {}",
        user_id, conn_id, peer_id, conversation_id
    );

    let ready = GatewayEvent::Ready {
        user_id,
        peer_id,
        conversation_id,
    };
    if send_event(&mut sender, &ready).await.is_err() {
        return;
    }

    let session = Session {
        conn_id,
        user_id,
        peer_id,
        cancel: state.shutdown.child_token(),
    };
    let reason = session.run(sender, receiver, &state).await;

    info!("User {} ({}) disconnected from gateway: {:?}", user_id, conn_id, reason);
}

async fn authenticate(auth: &dyn Authenticator, token: Option<&str>) -> ChatResult<UserId> {
    let token = token.ok_or_else(|| ChatError::Auth("missing credential".into()))?;
    auth.verify(token).await
}

async fn resolve_peer(
    store: &dyn ChatStore,
    user_id: UserId,
    peer: Option<&str>,
) -> ChatResult<(UserId, ConversationId)> {
    let raw = peer
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .ok_or_else(|| ChatError::invalid("peer_id is required"))?;

    let peer_id: UserId = raw
        .parse()
        .ok()
        .filter(|id| *id > 0)
        .ok_or_else(|| ChatError::invalid("peer_id must be a positive integer"))?;

    if peer_id == user_id {
        return Err(ChatError::invalid("cannot open a conversation with yourself"));
    }
    if !store.user_exists(peer_id).await? {
        return Err(ChatError::not_found(format!("user {} does not exist", peer_id)));
    }

    let conversation_id = store.resolve(user_id, peer_id).await?;
    Ok((peer_id, conversation_id))
}

/// Report a handshake failure, then close.
async fn reject(sender: &mut WsSender, err: &ChatError) {
    let _ = send_event(sender, &GatewayEvent::error(err)).await;
    let _ = sender.send(Message::Close(None)).await;
}

async fn send_event(sender: &mut WsSender, event: &GatewayEvent) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).map_err(axum::Error::new)?;
    sender.send(Message::Text(text.into())).await
}

/// One live connection in the Active state.
struct Session {
    conn_id: Uuid,
    user_id: UserId,
    peer_id: UserId,
    cancel: CancellationToken,
}

impl Session {
    /// Inbound frames, unread polls and heartbeats all run on this one task,
    /// so store calls for a connection never overlap and a poll is only
    /// rescheduled after the previous one finished. Once this returns no
    /// further poll can happen.
    async fn run(
        self,
        mut sender: WsSender,
        mut receiver: WsReceiver,
        state: &GatewayState,
    ) -> CloseReason {
        let store = state.store.as_ref();
        let poll_interval = state.config.poll_interval;

        let poll = tokio::time::sleep(poll_interval);
        tokio::pin!(poll);

        let mut heartbeat = tokio::time::interval(state.config.heartbeat_interval);
        heartbeat.tick().await;
        let mut pong_received = true;
        let mut missed_heartbeats: u8 = 0;

        let reason = loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => break CloseReason::Shutdown,

                frame = receiver.next() => {
                    let Some(frame) = frame else {
                        break CloseReason::ClientClosed;
                    };
                    match frame {
                        Ok(Message::Text(text)) => {
                            let (reply, fatal) = self.handle_text(store, &text).await;
                            if send_event(&mut sender, &reply).await.is_err() {
                                break CloseReason::TransportError;
                            }
                            if fatal {
                                break CloseReason::Fatal;
                            }
                        }
                        Ok(Message::Binary(_)) => {
                            let err = ChatError::invalid("binary frames are not supported");
                            if send_event(&mut sender, &GatewayEvent::error(&err)).await.is_err() {
                                break CloseReason::TransportError;
                            }
                        }
                        Ok(Message::Pong(_)) => pong_received = true,
                        Ok(Message::Close(_)) => break CloseReason::ClientClosed,
                        Ok(Message::Ping(_)) => {}
                        Err(e) => {
                            debug!("User {} ({}) transport error: {}", self.user_id, self.conn_id, e);
                            break CloseReason::TransportError;
                        }
                    }
                }

                _ = &mut poll => {
                    if let Err(reason) = self.poll_once(store, &mut sender).await {
                        break reason;
                    }
                    poll.as_mut().reset(Instant::now() + poll_interval);
                }

                _ = heartbeat.tick() => {
                    if pong_received {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "User {} ({}) missed {} pongs, dropping connection",
                                self.user_id, self.conn_id, missed_heartbeats
                            );
                            break CloseReason::HeartbeatTimeout;
                        }
                    }
                    pong_received = false;
                    if sender.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break CloseReason::TransportError;
                    }
                }
            }
        };

        self.cancel.cancel();
        if reason != CloseReason::TransportError {
            let _ = sender.send(Message::Close(None)).await;
        }
        reason
    }

    /// Returns the reply for the client and whether the connection must close.
    async fn handle_text(&self, store: &dyn ChatStore, text: &str) -> (GatewayEvent, bool) {
        let cmd = match serde_json::from_str::<GatewayCommand>(text) {
            Ok(cmd) => cmd,
            Err(e) => {
                warn!(
                    "User {} ({}) bad command: {} -- raw: {}",
                    self.user_id,
                    self.conn_id,
                    e,
                    text.chars().take(200).collect::<String>()
                );
                let err = ChatError::invalid(format!("malformed command: {}", e));
                return (GatewayEvent::error(&err), false);
            }
        };

        match cmd {
            GatewayCommand::SendMessage(body) => {
                match store.append(self.user_id, self.peer_id, body).await {
                    Ok(msg) => {
                        debug!(
                            "User {} ({}) stored message {} for {}",
                            self.user_id, self.conn_id, msg.id, self.peer_id
                        );
                        let ack = GatewayEvent::MessageAck {
                            id: msg.id,
                            created_at: msg.created_at,
                        };
                        (ack, false)
                    }
                    Err(e) => {
                        warn!("User {} ({}) send failed: {}", self.user_id, self.conn_id, e);
                        (GatewayEvent::send_failed(&e), e.is_fatal_to_connection())
                    }
                }
            }
        }
    }

    /// One unread poll. Transient failures skip the cycle; only errors that
    /// are fatal to the connection end it.
    async fn poll_once(
        &self,
        store: &dyn ChatStore,
        sender: &mut WsSender,
    ) -> Result<(), CloseReason> {
        match store.pull_unread(self.user_id, self.peer_id).await {
            Ok(messages) if messages.is_empty() => {
                trace!("User {} ({}) poll: nothing new", self.user_id, self.conn_id);
                Ok(())
            }
            Ok(messages) => {
                debug!(
                    "Pushing {} message(s) from {} to {} ({})",
                    messages.len(),
                    self.peer_id,
                    self.user_id,
                    self.conn_id
                );
                send_event(sender, &GatewayEvent::Messages { messages })
                    .await
                    .map_err(|_| CloseReason::TransportError)
            }
            Err(e) if e.is_fatal_to_connection() => {
                warn!("User {} ({}) poll failed: {}", self.user_id, self.conn_id, e);
                let _ = send_event(sender, &GatewayEvent::error(&e)).await;
                Err(CloseReason::Fatal)
            }
            Err(e) => {
                warn!("User {} ({}) poll skipped: {}", self.user_id, self.conn_id, e);
                Ok(())
            }
        }
    }
}
