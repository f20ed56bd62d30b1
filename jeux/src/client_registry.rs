use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{LoginError, Player, RegistryError};

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    Active,
    Closing,
    Closed,
}

/// One accepted connection and its membership in a [`ClientRegistry`].
///
/// The service thread does its I/O through [`stream`](Self::stream); the
/// registry may shut the same socket down from another thread, which makes
/// any pending or later read or write on it fail.
#[derive(Debug)]
pub struct ClientHandle {
    id: u64,
    registry: u64,
    session_id: Uuid,
    peer: Option<SocketAddr>,
    connected_at: DateTime<Utc>,
    stream: TcpStream,
    state: Mutex<HandleState>,
    player: Mutex<Option<Arc<Player>>>,
}

impl ClientHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn state(&self) -> HandleState {
        *self.state.lock()
    }

    /// Marks the handle as on its way out. No effect unless it is active.
    pub fn begin_close(&self) {
        let mut state = self.state.lock();
        if *state == HandleState::Active {
            *state = HandleState::Closing;
        }
    }

    pub fn player(&self) -> Option<Arc<Player>> {
        self.player.lock().clone()
    }

    /// Detaches the logged-in player, handing its reference back to the
    /// caller for release.
    pub fn logout(&self) -> Option<Arc<Player>> {
        self.player.lock().take()
    }

    fn close_stream(&self) {
        if let Err(e) = self.stream.shutdown(Shutdown::Both) {
            debug!(client = self.id, "socket shutdown: {}", e);
        }
    }
}

struct Clients {
    accepting: bool,
    live: HashMap<u64, Arc<ClientHandle>>,
}

/// Concurrent set of live connections with a drain barrier.
///
/// Admission and the `accepting` flag share one lock, so once
/// [`shutdown_all`](Self::shutdown_all) has run the live count can only go
/// down and [`wait_for_empty`](Self::wait_for_empty) is guaranteed to return
/// once every service thread has unregistered.
pub struct ClientRegistry {
    id: u64,
    clients: Mutex<Clients>,
    empty: Condvar,
    next_id: AtomicU64,
}

impl ClientRegistry {
    pub fn new() -> Self {
        debug!("client registry initialized");
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            clients: Mutex::new(Clients {
                accepting: true,
                live: HashMap::new(),
            }),
            empty: Condvar::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Admits a connection. When the registry is draining the connection is
    /// closed and `ShuttingDown` is returned.
    pub fn register(&self, stream: TcpStream) -> Result<Arc<ClientHandle>, RegistryError> {
        let peer = stream.peer_addr().ok();
        let mut clients = self.clients.lock();
        if !clients.accepting {
            drop(clients);
            if let Err(e) = stream.shutdown(Shutdown::Both) {
                debug!(?peer, "socket shutdown: {}", e);
            }
            warn!(?peer, "rejecting connection, server is shutting down");
            return Err(RegistryError::ShuttingDown);
        }

        let handle = Arc::new(ClientHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            registry: self.id,
            session_id: Uuid::new_v4(),
            peer,
            connected_at: Utc::now(),
            stream,
            state: Mutex::new(HandleState::Active),
            player: Mutex::new(None),
        });
        clients.live.insert(handle.id, Arc::clone(&handle));
        let count = clients.live.len();
        drop(clients);

        debug!(client = handle.id, ?peer, count, "client registered");
        Ok(handle)
    }

    /// Removes `handle` from the live set and releases its socket. A second
    /// call for the same handle does nothing.
    ///
    /// Panics if `handle` was never registered here.
    pub fn unregister(&self, handle: &ClientHandle) {
        assert_eq!(
            handle.registry, self.id,
            "unregister of client {} not registered with this registry",
            handle.id
        );
        let mut clients = self.clients.lock();
        let registered = clients
            .live
            .get(&handle.id)
            .is_some_and(|h| std::ptr::eq(h.as_ref(), handle));
        if !registered {
            drop(clients);
            debug_assert_eq!(handle.state(), HandleState::Closed);
            debug!(client = handle.id, "client already unregistered");
            return;
        }

        clients.live.remove(&handle.id);
        *handle.state.lock() = HandleState::Closed;
        let count = clients.live.len();
        if count == 0 {
            self.empty.notify_all();
        }
        drop(clients);

        handle.close_stream();
        debug!(client = handle.id, count, "client unregistered");
    }

    /// Stops admissions and shuts down every live connection. Returns without
    /// waiting for service threads; pair with `wait_for_empty`.
    pub fn shutdown_all(&self) {
        let handles: Vec<Arc<ClientHandle>> = {
            let mut clients = self.clients.lock();
            if clients.accepting {
                info!(count = clients.live.len(), "shutting down all clients");
            }
            clients.accepting = false;
            clients.live.values().cloned().collect()
        };

        for handle in &handles {
            handle.begin_close();
            handle.close_stream();
            debug!(client = handle.id, "client forcibly closed");
        }
    }

    /// Blocks until the live set is empty.
    pub fn wait_for_empty(&self) {
        let mut clients = self.clients.lock();
        while !clients.live.is_empty() {
            self.empty.wait(&mut clients);
        }
    }

    /// Like `wait_for_empty` but gives up at `timeout`. Returns the number of
    /// clients still registered, zero on success.
    pub fn wait_for_empty_timeout(&self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut clients = self.clients.lock();
        while !clients.live.is_empty() {
            if self.empty.wait_until(&mut clients, deadline).timed_out() {
                break;
            }
        }
        clients.live.len()
    }

    /// Attaches `player` to `handle`. The handle keeps its own clone of the
    /// reference; the registry reference count is not touched.
    pub fn login(&self, handle: &ClientHandle, player: &Arc<Player>) -> Result<(), LoginError> {
        let clients = self.clients.lock();
        if let Some(current) = handle.player.lock().as_ref() {
            return Err(LoginError::AlreadyLoggedIn(current.name().to_string()));
        }
        let in_use = clients.live.values().any(|other| {
            other
                .player
                .lock()
                .as_ref()
                .is_some_and(|p| p.name() == player.name())
        });
        if in_use {
            return Err(LoginError::NameInUse(player.name().to_string()));
        }
        *handle.player.lock() = Some(Arc::clone(player));
        drop(clients);

        info!(client = handle.id, player = player.name(), "logged in");
        Ok(())
    }

    /// Snapshot of every player currently logged in.
    pub fn all_players(&self) -> Vec<Arc<Player>> {
        let clients = self.clients.lock();
        clients
            .live
            .values()
            .filter_map(|handle| handle.player())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_accepting(&self) -> bool {
        self.clients.lock().accepting
    }

    /// Tears the registry down. Only valid once the live set is empty.
    pub fn fini(&self) {
        let clients = self.clients.lock();
        assert!(
            clients.live.is_empty(),
            "client registry finalized with {} live clients",
            clients.live.len()
        );
        info!("client registry finalized");
    }
}

impl Default for ClientRegistry {
    fn default() -> Self {
        Self::new()
    }
}
