//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use herald_protocol::ServerFrame;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use crate::auth::{AuthClient, AuthError, AuthRequest, AuthResponse};
use crate::socket::SocketId;
use crate::transport::Transport;

/// A recorded emission.
#[derive(Debug, Clone, PartialEq)]
pub enum Emit {
    Room(String, ServerFrame),
    RoomExcept(String, String, ServerFrame),
    Socket(String, ServerFrame),
}

impl Emit {
    pub fn frame(&self) -> &ServerFrame {
        match self {
            Emit::Room(_, f) | Emit::RoomExcept(_, _, f) | Emit::Socket(_, f) => f,
        }
    }
}

/// Transport that keeps room membership in memory and records every emit.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    rooms: Mutex<HashMap<String, HashSet<SocketId>>>,
    connected: Mutex<HashSet<SocketId>>,
    emits: Mutex<Vec<Emit>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, socket: &str) {
        self.connected.lock().unwrap().insert(socket.to_string());
    }

    /// Drop a socket from every room, as an abrupt disconnect would.
    pub fn drop_socket(&self, socket: &str) {
        self.connected.lock().unwrap().remove(socket);
        for members in self.rooms.lock().unwrap().values_mut() {
            members.remove(socket);
        }
    }

    pub fn emits(&self) -> Vec<Emit> {
        self.emits.lock().unwrap().clone()
    }

    pub fn clear(&self) {
        self.emits.lock().unwrap().clear();
    }

    pub fn events_named(&self, name: &str) -> Vec<Emit> {
        self.emits()
            .into_iter()
            .filter(|e| e.frame().event == name)
            .collect()
    }

    pub fn room(&self, room: &str) -> HashSet<SocketId> {
        self.rooms
            .lock()
            .unwrap()
            .get(room)
            .cloned()
            .unwrap_or_default()
    }
}

impl Transport for RecordingTransport {
    fn join_room(&self, socket: &str, room: &str) {
        self.connect(socket);
        self.rooms
            .lock()
            .unwrap()
            .entry(room.to_string())
            .or_default()
            .insert(socket.to_string());
    }

    fn leave_room(&self, socket: &str, room: &str) {
        if let Some(members) = self.rooms.lock().unwrap().get_mut(room) {
            members.remove(socket);
        }
    }

    fn emit_to_room(&self, room: &str, frame: ServerFrame) {
        self.emits
            .lock()
            .unwrap()
            .push(Emit::Room(room.to_string(), frame));
    }

    fn emit_to_room_except(&self, except: &str, room: &str, frame: ServerFrame) {
        self.emits.lock().unwrap().push(Emit::RoomExcept(
            except.to_string(),
            room.to_string(),
            frame,
        ));
    }

    fn emit_to_socket(&self, socket: &str, frame: ServerFrame) {
        self.emits
            .lock()
            .unwrap()
            .push(Emit::Socket(socket.to_string(), frame));
    }

    fn is_socket_in_room(&self, socket: &str, room: &str) -> bool {
        self.rooms
            .lock()
            .unwrap()
            .get(room)
            .is_some_and(|m| m.contains(socket))
    }

    fn live_sockets_in_room(&self, room: &str) -> HashSet<SocketId> {
        self.room(room)
    }

    fn is_connected(&self, socket: &str) -> bool {
        self.connected.lock().unwrap().contains(socket)
    }
}

/// Auth client that replays queued results and records requests.
#[derive(Debug, Default)]
pub struct ScriptedAuthClient {
    responses: Mutex<VecDeque<Result<AuthResponse, AuthError>>>,
    requests: Mutex<Vec<AuthRequest>>,
}

impl ScriptedAuthClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, status: u16, body: &str) -> &Self {
        self.responses.lock().unwrap().push_back(Ok(AuthResponse {
            status,
            body: body.as_bytes().to_vec(),
        }));
        self
    }

    pub fn fail(&self, error: AuthError) -> &Self {
        self.responses.lock().unwrap().push_back(Err(error));
        self
    }

    pub fn requests(&self) -> Vec<AuthRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl AuthClient for ScriptedAuthClient {
    async fn send(&self, request: AuthRequest) -> Result<AuthResponse, AuthError> {
        self.requests.lock().unwrap().push(request);
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Transport("no scripted response".into())))
    }
}
