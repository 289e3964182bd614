use std::collections::BTreeMap;

use tracing::info;

use crate::net::socket::SocketName;
use crate::server::reactor::{ConnectionHandler, ConnectionId, DataOptions};

const NICK: &str = "/nick";
const WHO: &str = "/who";
const QUIT: &str = "/quit";

#[derive(Debug, Clone)]
struct Session {
    nickname: String,
}

/// Multi-user chat: every plain line is relayed to the other participants.
///
/// Commands: `/nick <name>`, `/who`, `/quit`.
#[derive(Debug, Default)]
pub struct ChatHandler {
    // ordered by connection id so `/who` lists users in arrival order
    sessions: BTreeMap<ConnectionId, Session>,
}

impl ChatHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nickname(&self, id: ConnectionId) -> Option<&str> {
        self.sessions.get(&id).map(|s| s.nickname.as_str())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    fn command(&mut self, id: ConnectionId, peer: &SocketName, command: &str, value: &str, options: &mut DataOptions) -> Vec<u8> {
        options.broadcast = false;
        match command {
            NICK => {
                let nickname = value.trim();
                if nickname.is_empty() {
                    return sys("Usage: /nick <name>");
                }
                if let Some(session) = self.sessions.get_mut(&id) {
                    session.nickname = nickname.to_string();
                }
                info!(conn = %id, peer = %peer, nickname, "nickname changed");
                sys("Successfully changed nickname.")
            }
            WHO => {
                let online: Vec<&str> = self.sessions.values().map(|s| s.nickname.as_str()).collect();
                sys(&format!("Online: {}", online.join(" ")))
            }
            _ => {
                options.keep_alive = false;
                self.sessions.remove(&id);
                info!(conn = %id, peer = %peer, "user quit");
                sys("Bye.")
            }
        }
    }
}

impl ConnectionHandler for ChatHandler {
    fn on_accept(&mut self, id: ConnectionId, peer: &SocketName) -> Option<Vec<u8>> {
        let nickname = format!("guest-{}", id.0);
        info!(conn = %id, peer = %peer, nickname = %nickname, "new chat session");

        let greeting = sys(&format!("Welcome user {nickname}."));
        self.sessions.insert(id, Session { nickname });
        Some(greeting)
    }

    fn on_data(
        &mut self,
        data: &[u8],
        id: ConnectionId,
        peer: &SocketName,
        options: &mut DataOptions,
    ) -> Option<Vec<u8>> {
        let text = String::from_utf8_lossy(data);

        let Some(session) = self.sessions.get(&id) else {
            info!(conn = %id, peer = %peer, bytes = data.len(), "data from unknown session");
            options.broadcast = false;
            options.keep_alive = false;
            return Some(sys("Expired or non-existent session."));
        };

        let (head, value) = text.split_once(' ').unwrap_or((&*text, ""));
        let command = head.trim().to_lowercase();
        if matches!(command.as_str(), NICK | WHO | QUIT) {
            return Some(self.command(id, peer, &command, value, options));
        }

        options.broadcast = true;
        options.reply_to_sender = false;
        info!(conn = %id, bytes = data.len(), "broadcasting message");
        Some(chat(&session.nickname, &text))
    }

    fn on_close(&mut self, id: ConnectionId, peer: &SocketName) {
        if self.sessions.remove(&id).is_some() {
            info!(conn = %id, peer = %peer, "chat session ended");
        }
    }
}

fn sys(message: &str) -> Vec<u8> {
    format!("[sys] {message}\r\n").into_bytes()
}

fn chat(nickname: &str, message: &str) -> Vec<u8> {
    format!("<{nickname}> {}\r\n", message.trim()).into_bytes()
}
