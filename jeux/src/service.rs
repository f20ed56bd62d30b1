//! Per-connection protocol: newline-delimited JSON over the client's socket.
//!
//! A service thread owns the socket's I/O until it reads EOF, hits an I/O
//! error, or the registry shuts the socket down under it. However it exits,
//! the thread logs its player out and unregisters the handle exactly once.

use std::io::{self, BufRead, BufReader, Read, Write};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::{
    ClientHandle, ClientMessage, ClientRegistry, LoginError, PlayerRegistry, ServerMessage,
};

/// Longest accepted message line, excluding the newline.
pub const MAX_LINE: usize = u16::MAX as usize;

/// Releases everything a connection holds when its service thread ends,
/// including by panic.
struct Departure<'a> {
    clients: &'a ClientRegistry,
    players: &'a PlayerRegistry,
    handle: &'a ClientHandle,
}

impl Drop for Departure<'_> {
    fn drop(&mut self) {
        self.handle.begin_close();
        if let Some(player) = self.handle.logout() {
            info!(client = self.handle.id(), player = player.name(), "logged out");
            self.players.release(player);
        }
        self.clients.unregister(self.handle);
    }
}

/// Runs the session for `handle` on the calling thread.
pub fn serve(
    clients: Arc<ClientRegistry>,
    players: Arc<PlayerRegistry>,
    handle: Arc<ClientHandle>,
) {
    let _departure = Departure {
        clients: &clients,
        players: &players,
        handle: &handle,
    };
    info!(client = handle.id(), peer = ?handle.peer(), "client service started");

    match run_session(&clients, &players, &handle) {
        Ok(()) => info!(client = handle.id(), "client disconnected"),
        Err(e) => debug!(client = handle.id(), "client session ended: {}", e),
    }
}

fn run_session(
    clients: &ClientRegistry,
    players: &PlayerRegistry,
    handle: &ClientHandle,
) -> io::Result<()> {
    send(
        handle,
        &ServerMessage::Welcome {
            session_id: handle.session_id().to_string(),
        },
    )?;

    let mut reader = BufReader::new(handle.stream());
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let limit = MAX_LINE as u64 + 1;
        if reader.by_ref().take(limit).read_until(b'\n', &mut buf)? == 0 {
            return Ok(());
        }
        if buf.len() > MAX_LINE && buf.last() != Some(&b'\n') {
            warn!(client = handle.id(), "message exceeds {} bytes, closing", MAX_LINE);
            send(
                handle,
                &ServerMessage::Error(format!("message exceeds {} bytes", MAX_LINE)),
            )?;
            return Ok(());
        }

        let reply = match std::str::from_utf8(&buf) {
            Ok(text) if text.trim().is_empty() => continue,
            Ok(text) => match serde_json::from_str::<ClientMessage>(text.trim()) {
                Ok(message) => {
                    debug!(client = handle.id(), ?message, "received");
                    dispatch(clients, players, handle, message)
                }
                Err(e) => {
                    warn!(client = handle.id(), "malformed message: {}", e);
                    ServerMessage::Error(format!("malformed message: {}", e))
                }
            },
            Err(e) => {
                warn!(client = handle.id(), "message is not UTF-8: {}", e);
                ServerMessage::Error(format!("message is not UTF-8: {}", e))
            }
        };
        send(handle, &reply)?;
    }
}

fn dispatch(
    clients: &ClientRegistry,
    players: &PlayerRegistry,
    handle: &ClientHandle,
    message: ClientMessage,
) -> ServerMessage {
    match message {
        ClientMessage::Login { username } => match login(clients, players, handle, username.trim()) {
            Ok(reply) => reply,
            Err(e) => ServerMessage::Nack {
                reason: e.to_string(),
            },
        },
        ClientMessage::Users => {
            if handle.player().is_none() {
                return ServerMessage::Nack {
                    reason: "not logged in".to_string(),
                };
            }
            let mut players: Vec<_> = clients.all_players().iter().map(|p| p.info()).collect();
            players.sort_by(|a, b| a.username.cmp(&b.username));
            ServerMessage::Users { players }
        }
    }
}

fn login(
    clients: &ClientRegistry,
    players: &PlayerRegistry,
    handle: &ClientHandle,
    username: &str,
) -> Result<ServerMessage, LoginError> {
    if username.is_empty() {
        return Err(LoginError::EmptyName);
    }
    if let Some(current) = handle.player() {
        return Err(LoginError::AlreadyLoggedIn(current.name().to_string()));
    }

    let player = players.lookup_or_create(username);
    if let Err(e) = clients.login(handle, &player) {
        players.release(player);
        return Err(e);
    }
    Ok(ServerMessage::LoggedIn {
        username: player.name().to_string(),
        rating: player.rating(),
    })
}

fn send(handle: &ClientHandle, message: &ServerMessage) -> io::Result<()> {
    let mut json = serde_json::to_string(message)?;
    json.push('\n');
    let mut stream = handle.stream();
    stream.write_all(json.as_bytes())?;
    stream.flush()
}
