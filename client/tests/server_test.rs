use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use client::JeuxClient;
use jeux::{ClientRegistry, PlayerRegistry, Server, ServerConfig, ServerMessage, UserInfo};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct TestServer {
    addr: SocketAddr,
    clients: Arc<ClientRegistry>,
    players: Arc<PlayerRegistry>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start() -> Self {
        let server = Server::bind(ServerConfig::local()).await.unwrap();
        let addr = server.local_addr().unwrap();
        let clients = Arc::clone(server.clients());
        let players = Arc::clone(server.players());
        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn(server.run(async move {
            let _ = stopped.await;
        }));
        Self {
            addr,
            clients,
            players,
            stop,
            task,
        }
    }

    async fn shutdown(self) {
        self.stop.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(10), self.task)
            .await
            .expect("server did not drain")
            .unwrap()
            .unwrap();
    }
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}

fn logged_in(name: &str) -> ServerMessage {
    ServerMessage::LoggedIn {
        username: name.to_string(),
        rating: jeux::INITIAL_RATING,
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_login_and_list_users() {
    let server = TestServer::start().await;
    let mut alice = JeuxClient::connect(server.addr).await.unwrap();
    let mut bob = JeuxClient::connect(server.addr).await.unwrap();
    assert_ne!(alice.session_id(), bob.session_id());

    assert_eq!(alice.login("alice").await.unwrap(), logged_in("alice"));
    assert_eq!(bob.login("bob").await.unwrap(), logged_in("bob"));

    let users = alice.users().await.unwrap();
    assert_eq!(
        users,
        vec![
            UserInfo {
                username: "alice".to_string(),
                rating: jeux::INITIAL_RATING,
            },
            UserInfo {
                username: "bob".to_string(),
                rating: jeux::INITIAL_RATING,
            },
        ]
    );
    assert_eq!(server.clients.len(), 2);
    assert_eq!(server.players.len(), 2);

    drop((alice, bob));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_duplicate_login_refused_until_release() {
    let server = TestServer::start().await;
    let mut first = JeuxClient::connect(server.addr).await.unwrap();
    let mut second = JeuxClient::connect(server.addr).await.unwrap();

    assert_eq!(first.login("carol").await.unwrap(), logged_in("carol"));
    assert!(matches!(
        second.login("carol").await.unwrap(),
        ServerMessage::Nack { .. }
    ));
    assert!(matches!(
        first.login("dave").await.unwrap(),
        ServerMessage::Nack { .. }
    ));

    drop(first);
    let players = Arc::clone(&server.players);
    eventually(|| players.ref_count("carol") == 0).await;

    assert_eq!(second.login("carol").await.unwrap(), logged_in("carol"));
    assert_eq!(server.players.ref_count("carol"), 1);

    drop(second);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_users_requires_login() {
    let server = TestServer::start().await;
    let mut client = JeuxClient::connect(server.addr).await.unwrap();

    client.send(&jeux::ClientMessage::Users).await.unwrap();
    assert!(matches!(
        client.recv().await.unwrap(),
        Some(ServerMessage::Nack { .. })
    ));
    assert!(matches!(
        client.login("   ").await.unwrap(),
        ServerMessage::Nack { .. }
    ));

    drop(client);
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_malformed_message_keeps_session_open() {
    let server = TestServer::start().await;
    let stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(read));

    let welcome = lines.next_line().await.unwrap().unwrap();
    assert!(welcome.contains("Welcome"));

    tokio::io::AsyncWriteExt::write_all(&mut write, b"not json\n{\"Login\":{\"username\":\"erin\"}}\n")
        .await
        .unwrap();
    let error: ServerMessage = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(matches!(error, ServerMessage::Error(_)));
    let reply: ServerMessage = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply, logged_in("erin"));

    drop((lines, write));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_invalid_utf8_keeps_session_open() {
    let server = TestServer::start().await;
    let stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(read));
    lines.next_line().await.unwrap().unwrap();

    tokio::io::AsyncWriteExt::write_all(&mut write, b"\xff\xfe\n{\"Login\":{\"username\":\"frank\"}}\n")
        .await
        .unwrap();
    let error: ServerMessage = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(matches!(error, ServerMessage::Error(_)));
    let reply: ServerMessage = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(reply, logged_in("frank"));

    drop((lines, write));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_oversized_line_closes_session() {
    let server = TestServer::start().await;
    let mut client = JeuxClient::connect(server.addr).await.unwrap();
    let stream = tokio::net::TcpStream::connect(server.addr).await.unwrap();
    let (read, mut write) = stream.into_split();
    let mut lines = tokio::io::AsyncBufReadExt::lines(tokio::io::BufReader::new(read));
    lines.next_line().await.unwrap().unwrap();

    let oversized = vec![b'a'; jeux::service::MAX_LINE + 1];
    tokio::io::AsyncWriteExt::write_all(&mut write, &oversized)
        .await
        .unwrap();
    let error: ServerMessage = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert!(matches!(error, ServerMessage::Error(_)));
    assert!(matches!(lines.next_line().await, Ok(None) | Err(_)));

    let clients = Arc::clone(&server.clients);
    eventually(|| clients.len() == 1).await;
    assert_eq!(client.login("grace").await.unwrap(), logged_in("grace"));

    drop((client, lines, write));
    server.shutdown().await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_shutdown_drains_connected_clients() {
    let server = TestServer::start().await;
    let mut connected = Vec::new();
    for i in 0..10 {
        let mut client = JeuxClient::connect(server.addr).await.unwrap();
        assert_eq!(
            client.login(&format!("player{}", i)).await.unwrap(),
            logged_in(&format!("player{}", i))
        );
        connected.push(client);
    }
    assert_eq!(server.clients.len(), 10);

    let addr = server.addr;
    let clients = Arc::clone(&server.clients);
    let players = Arc::clone(&server.players);
    server.shutdown().await;

    for client in &mut connected {
        assert_eq!(client.recv().await.unwrap(), None);
    }
    assert!(clients.is_empty());
    assert!(!clients.is_accepting());
    assert!(players.is_empty());
    assert!(JeuxClient::connect(addr).await.is_err());
}
