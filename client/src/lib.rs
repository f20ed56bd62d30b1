use std::io;

use jeux::{ClientMessage, ServerMessage, UserInfo};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpStream, ToSocketAddrs};

/// Line-protocol client for a Jeux server.
pub struct JeuxClient {
    lines: Lines<BufReader<OwnedReadHalf>>,
    writer: OwnedWriteHalf,
    session_id: String,
}

impl JeuxClient {
    /// Connects and waits for the server's welcome.
    pub async fn connect<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let (read, writer) = stream.into_split();
        let mut client = Self {
            lines: BufReader::new(read).lines(),
            writer,
            session_id: String::new(),
        };
        match client.recv().await? {
            Some(ServerMessage::Welcome { session_id }) => {
                client.session_id = session_id;
                Ok(client)
            }
            Some(other) => Err(unexpected(other)),
            None => Err(io::Error::new(
                io::ErrorKind::ConnectionAborted,
                "server closed the connection",
            )),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub async fn send(&mut self, message: &ClientMessage) -> io::Result<()> {
        let mut json = serde_json::to_string(message)?;
        json.push('\n');
        self.writer.write_all(json.as_bytes()).await
    }

    /// Next message from the server, or `None` once the server has closed
    /// the connection.
    pub async fn recv(&mut self) -> io::Result<Option<ServerMessage>> {
        loop {
            let line = match self.lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => return Ok(None),
                Err(e) if is_disconnect(&e) => return Ok(None),
                Err(e) => return Err(e),
            };
            if line.trim().is_empty() {
                continue;
            }
            return serde_json::from_str(&line).map(Some).map_err(io::Error::from);
        }
    }

    async fn request(&mut self, message: &ClientMessage) -> io::Result<ServerMessage> {
        self.send(message).await?;
        self.recv().await?.ok_or_else(|| {
            io::Error::new(io::ErrorKind::ConnectionAborted, "server closed the connection")
        })
    }

    /// Logs in as `username`. A refusal comes back as `ServerMessage::Nack`.
    pub async fn login(&mut self, username: &str) -> io::Result<ServerMessage> {
        self.request(&ClientMessage::Login {
            username: username.to_string(),
        })
        .await
    }

    pub async fn users(&mut self) -> io::Result<Vec<UserInfo>> {
        match self.request(&ClientMessage::Users).await? {
            ServerMessage::Users { players } => Ok(players),
            other => Err(unexpected(other)),
        }
    }
}

fn is_disconnect(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::ConnectionReset | io::ErrorKind::ConnectionAborted | io::ErrorKind::BrokenPipe
    )
}

fn unexpected(message: ServerMessage) -> io::Error {
    io::Error::new(
        io::ErrorKind::InvalidData,
        format!("unexpected message: {:?}", message),
    )
}
