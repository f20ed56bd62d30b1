use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::{service, ClientHandle, ClientRegistry, PlayerRegistry, ServerConfig};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Accept loop and shutdown orchestration.
///
/// Listens until the shutdown future resolves, then drains: stops admissions,
/// shuts every live connection down, waits for the service threads to
/// unregister, and finalizes both registries.
pub struct Server {
    config: ServerConfig,
    listener: TcpListener,
    clients: Arc<ClientRegistry>,
    players: Arc<PlayerRegistry>,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        let addr = config.listen_addr();
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to listen on {}", addr))?;
        Ok(Self {
            config,
            listener,
            clients: Arc::new(ClientRegistry::new()),
            players: Arc::new(PlayerRegistry::new()),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn clients(&self) -> &Arc<ClientRegistry> {
        &self.clients
    }

    pub fn players(&self) -> &Arc<PlayerRegistry> {
        &self.players
    }

    pub async fn run<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let Server {
            config,
            listener,
            clients,
            players,
        } = self;
        info!(addr = %listener.local_addr()?, "Jeux server listening");

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                biased;
                _ = &mut shutdown => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer)) => admit(&clients, &players, stream, peer),
                    Err(e) => {
                        warn!("accept failed: {}", e);
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                },
            }
        }

        drop(listener);
        clients.shutdown_all();
        info!("waiting for service threads to terminate");

        let timeout = config.drain_timeout();
        let remaining = {
            let clients = Arc::clone(&clients);
            tokio::task::spawn_blocking(move || match timeout {
                Some(timeout) => clients.wait_for_empty_timeout(timeout),
                None => {
                    clients.wait_for_empty();
                    0
                }
            })
            .await?
        };
        if remaining > 0 {
            warn!(remaining, "drain timed out, abandoning service threads");
            return Ok(());
        }
        info!("all service threads terminated");

        clients.fini();
        players.fini();
        info!("Jeux server terminated");
        Ok(())
    }
}

fn admit(clients: &Arc<ClientRegistry>, players: &Arc<PlayerRegistry>, stream: TcpStream, peer: SocketAddr) {
    let stream = match stream.into_std().and_then(|s| s.set_nonblocking(false).map(|()| s)) {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%peer, "failed to prepare connection: {}", e);
            return;
        }
    };
    let handle = match clients.register(stream) {
        Ok(handle) => handle,
        Err(e) => {
            warn!(%peer, "connection refused: {}", e);
            return;
        }
    };

    start_service(clients, players, handle, spawn_detached);
}

type Spawner = fn(String, Box<dyn FnOnce() + Send>) -> io::Result<()>;

/// Runs `task` on a named OS thread. The join handle is dropped: service
/// threads only synchronize with the server through the registry.
fn spawn_detached(name: String, task: Box<dyn FnOnce() + Send>) -> io::Result<()> {
    thread::Builder::new().name(name).spawn(task).map(drop)
}

/// Hands a registered connection to its service thread. If the thread cannot
/// be started the handle is unregistered, which also closes the connection.
fn start_service(
    clients: &Arc<ClientRegistry>,
    players: &Arc<PlayerRegistry>,
    handle: Arc<ClientHandle>,
    spawn: Spawner,
) -> bool {
    let id = handle.id();
    let task: Box<dyn FnOnce() + Send> = {
        let clients = Arc::clone(clients);
        let players = Arc::clone(players);
        let handle = Arc::clone(&handle);
        Box::new(move || service::serve(clients, players, handle))
    };
    match spawn(format!("jeux-client-{}", id), task) {
        Ok(()) => true,
        Err(e) => {
            error!(client = id, "failed to spawn service thread: {}", e);
            clients.unregister(&handle);
            false
        }
    }
}
