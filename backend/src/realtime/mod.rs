//! Realtime fabric: WebSocket server with room-based fan-out
//!
//! Every socket registers a user, then joins rooms: its own `user:*` room,
//! a `type:*` room, and any `ride:*` rooms it subscribes to. Events are
//! broadcast internally with their target rooms attached; each socket's
//! send task forwards only what intersects its membership. Absent
//! recipients are dropped silently; clients reconcile over REST on
//! reconnect.

mod consumer;

pub use consumer::run_notifications_consumer;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, RwLock};
use uuid::Uuid;

use crate::state::AppState;

/// Client role, which picks the `type:*` room
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum UserType {
    Rider,
    Driver,
}

impl UserType {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserType::Rider => "rider",
            UserType::Driver => "driver",
        }
    }
}

/// A broadcast group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Room {
    User(Uuid),
    Type(UserType),
    Ride(Uuid),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Room::User(id) => write!(f, "user:{}", id),
            Room::Type(t) => write!(f, "type:{}", t.as_str()),
            Room::Ride(id) => write!(f, "ride:{}", id),
        }
    }
}

/// An event addressed to a set of rooms
#[derive(Debug, Clone)]
pub struct RoomMessage {
    pub rooms: Vec<Room>,
    pub event: String,
    pub data: Value,
}

/// Per-socket registration state
#[derive(Debug, Clone, Default)]
struct ClientInfo {
    user_id: Option<Uuid>,
    user_type: Option<UserType>,
    rooms: HashSet<Room>,
}

/// Messages a client may send
#[derive(Debug, Deserialize)]
#[serde(tag = "event", content = "data")]
enum ClientMessage {
    #[serde(rename = "register")]
    Register { user_id: Uuid, user_type: UserType },

    #[serde(rename = "subscribe:ride")]
    SubscribeRide { ride_id: Uuid },

    #[serde(rename = "unsubscribe:ride")]
    UnsubscribeRide { ride_id: Uuid },

    #[serde(rename = "driver:location:update")]
    DriverLocationUpdate {
        lat: f64,
        lng: f64,
        heading: Option<f64>,
        speed: Option<f64>,
        accuracy: Option<f64>,
        ride_id: Option<Uuid>,
    },
}

/// Messages the server sends
#[derive(Debug, Serialize, Clone)]
struct ServerMessage {
    event: String,
    data: Value,
}

impl ServerMessage {
    fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }
}

/// WebSocket server state
#[derive(Clone)]
pub struct WsState {
    tx: broadcast::Sender<RoomMessage>,
    clients: Arc<RwLock<HashMap<Uuid, ClientInfo>>>,
    user_sockets: Arc<RwLock<HashMap<Uuid, HashSet<Uuid>>>>,
}

impl Default for WsState {
    fn default() -> Self {
        Self::new()
    }
}

impl WsState {
    /// Create new WebSocket state
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(256);
        Self {
            tx,
            clients: Arc::new(RwLock::new(HashMap::new())),
            user_sockets: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Emit an event into a set of rooms. Delivery is to whoever is joined
    /// right now; nobody queues.
    pub fn emit(&self, rooms: Vec<Room>, event: impl Into<String>, data: Value) {
        let message = RoomMessage {
            rooms,
            event: event.into(),
            data,
        };
        // Send only fails when no socket is connected, which is fine.
        let _ = self.tx.send(message);
    }

    /// Number of currently connected sockets
    pub async fn connection_count(&self) -> usize {
        self.clients.read().await.len()
    }

    async fn register_socket(&self, socket_id: Uuid) {
        self.clients
            .write()
            .await
            .insert(socket_id, ClientInfo::default());
    }

    async fn unregister_socket(&self, socket_id: Uuid) {
        let info = self.clients.write().await.remove(&socket_id);
        if let Some(ClientInfo {
            user_id: Some(user_id),
            ..
        }) = info
        {
            let mut user_sockets = self.user_sockets.write().await;
            if let Some(sockets) = user_sockets.get_mut(&user_id) {
                sockets.remove(&socket_id);
                if sockets.is_empty() {
                    user_sockets.remove(&user_id);
                }
            }
        }
        tracing::debug!(%socket_id, "Socket disconnected");
    }

    async fn register_user(&self, socket_id: Uuid, user_id: Uuid, user_type: UserType) {
        {
            let mut clients = self.clients.write().await;
            if let Some(info) = clients.get_mut(&socket_id) {
                info.user_id = Some(user_id);
                info.user_type = Some(user_type);
                info.rooms.insert(Room::User(user_id));
                info.rooms.insert(Room::Type(user_type));
            }
        }
        self.user_sockets
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(socket_id);
    }

    async fn join(&self, socket_id: Uuid, room: Room) -> bool {
        let mut clients = self.clients.write().await;
        match clients.get_mut(&socket_id) {
            Some(info) if info.user_id.is_some() => {
                info.rooms.insert(room);
                true
            }
            _ => false,
        }
    }

    async fn leave(&self, socket_id: Uuid, room: Room) {
        let mut clients = self.clients.write().await;
        if let Some(info) = clients.get_mut(&socket_id) {
            info.rooms.remove(&room);
        }
    }

    async fn registered_driver(&self, socket_id: Uuid) -> Option<Uuid> {
        let clients = self.clients.read().await;
        let info = clients.get(&socket_id)?;
        match (info.user_id, info.user_type) {
            (Some(user_id), Some(UserType::Driver)) => Some(user_id),
            _ => None,
        }
    }
}

/// WebSocket handler - upgrades the HTTP connection
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Handle one WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let socket_id = Uuid::new_v4();
    let ws_state = state.ws.clone();
    ws_state.register_socket(socket_id).await;

    let (mut sender, mut receiver) = socket.split();

    // Internal channel so the receive task can answer without fighting the
    // broadcast forwarder for the sink.
    let (internal_tx, mut internal_rx) = mpsc::channel::<ServerMessage>(32);

    let mut rx = ws_state.tx.subscribe();
    let ws_for_send = ws_state.clone();

    let mut send_task = tokio::spawn(async move {
        loop {
            tokio::select! {
                result = rx.recv() => {
                    let message = match result {
                        Ok(m) => m,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(%socket_id, skipped, "Socket lagged behind broadcast");
                            continue;
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    };

                    let joined = {
                        let clients = ws_for_send.clients.read().await;
                        clients
                            .get(&socket_id)
                            .map(|info| message.rooms.iter().any(|r| info.rooms.contains(r)))
                            .unwrap_or(false)
                    };
                    if !joined {
                        continue;
                    }

                    let out = ServerMessage::new(message.event.clone(), message.data.clone());
                    if let Ok(text) = serde_json::to_string(&out) {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
                Some(msg) = internal_rx.recv() => {
                    if let Ok(text) = serde_json::to_string(&msg) {
                        if sender.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                }
                else => break,
            }
        }
    });

    let ws_for_recv = ws_state.clone();
    let location = state.location.clone();
    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => {
                    let parsed: Result<ClientMessage, _> = serde_json::from_str(&text);
                    let reply = match parsed {
                        Ok(command) => {
                            handle_command(&ws_for_recv, &location, socket_id, command).await
                        }
                        Err(e) => ServerMessage::new(
                            "error",
                            json!({ "message": format!("Unrecognized message: {e}") }),
                        ),
                    };
                    if internal_tx.send(reply).await.is_err() {
                        break;
                    }
                }
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    // Whichever side finishes first tears the other down.
    tokio::select! {
        _ = (&mut send_task) => recv_task.abort(),
        _ = (&mut recv_task) => send_task.abort(),
    }

    ws_state.unregister_socket(socket_id).await;
}

async fn handle_command(
    ws: &WsState,
    location: &Arc<crate::location::LocationService>,
    socket_id: Uuid,
    command: ClientMessage,
) -> ServerMessage {
    match command {
        ClientMessage::Register { user_id, user_type } => {
            ws.register_user(socket_id, user_id, user_type).await;
            tracing::debug!(%socket_id, %user_id, user_type = user_type.as_str(), "Socket registered");
            ServerMessage::new(
                "registered",
                json!({ "user_id": user_id, "user_type": user_type }),
            )
        }
        ClientMessage::SubscribeRide { ride_id } => {
            if ws.join(socket_id, Room::Ride(ride_id)).await {
                ServerMessage::new("subscribed:ride", json!({ "ride_id": ride_id }))
            } else {
                ServerMessage::new(
                    "error",
                    json!({ "message": "Register before subscribing" }),
                )
            }
        }
        ClientMessage::UnsubscribeRide { ride_id } => {
            ws.leave(socket_id, Room::Ride(ride_id)).await;
            ServerMessage::new("unsubscribed:ride", json!({ "ride_id": ride_id }))
        }
        ClientMessage::DriverLocationUpdate {
            lat,
            lng,
            heading,
            speed,
            accuracy,
            ride_id,
        } => {
            let Some(driver_id) = ws.registered_driver(socket_id).await else {
                return ServerMessage::new(
                    "error",
                    json!({ "message": "Register as a driver before sending locations" }),
                );
            };

            if let Err(e) = location
                .record(driver_id, lat, lng, heading, speed, accuracy)
                .await
            {
                return ServerMessage::new("error", json!({ "message": e.to_string() }));
            }

            // Riders watching the ride get the position immediately; the bus
            // path covers everyone else.
            if let Some(ride_id) = ride_id {
                ws.emit(
                    vec![Room::Ride(ride_id)],
                    "driver:location:update",
                    json!({
                        "driver_id": driver_id,
                        "ride_id": ride_id,
                        "lat": lat,
                        "lng": lng,
                        "heading": heading,
                        "speed": speed,
                    }),
                );
            }

            ServerMessage::new(
                "location:ack",
                json!({ "timestamp": chrono::Utc::now() }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_display() {
        let id = Uuid::nil();
        assert_eq!(
            Room::User(id).to_string(),
            "user:00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(Room::Type(UserType::Driver).to_string(), "type:driver");
        assert_eq!(
            Room::Ride(id).to_string(),
            "ride:00000000-0000-0000-0000-000000000000"
        );
    }

    #[test]
    fn test_client_message_parsing() {
        let raw = r#"{"event":"register","data":{"user_id":"00000000-0000-0000-0000-000000000000","user_type":"driver"}}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            parsed,
            ClientMessage::Register {
                user_type: UserType::Driver,
                ..
            }
        ));

        let raw = r#"{"event":"driver:location:update","data":{"lat":12.97,"lng":77.59}}"#;
        let parsed: ClientMessage = serde_json::from_str(raw).unwrap();
        assert!(matches!(parsed, ClientMessage::DriverLocationUpdate { .. }));
    }

    #[tokio::test]
    async fn test_registration_gates_subscription() {
        let ws = WsState::new();
        let socket_id = Uuid::new_v4();
        ws.register_socket(socket_id).await;

        assert!(!ws.join(socket_id, Room::Ride(Uuid::new_v4())).await);

        ws.register_user(socket_id, Uuid::new_v4(), UserType::Rider)
            .await;
        assert!(ws.join(socket_id, Room::Ride(Uuid::new_v4())).await);
    }

    #[tokio::test]
    async fn test_unregister_clears_user_index() {
        let ws = WsState::new();
        let socket_id = Uuid::new_v4();
        let user_id = Uuid::new_v4();

        ws.register_socket(socket_id).await;
        ws.register_user(socket_id, user_id, UserType::Rider).await;
        assert_eq!(ws.connection_count().await, 1);

        ws.unregister_socket(socket_id).await;
        assert_eq!(ws.connection_count().await, 0);
        assert!(ws.user_sockets.read().await.get(&user_id).is_none());
    }
}
