use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::UserInfo;

pub const INITIAL_RATING: i32 = 1500;
const RATING_K: f64 = 32.0;

/// A player known to the server. At most one `Player` exists per name while
/// any connection holds a reference to it.
#[derive(Debug)]
pub struct Player {
    name: String,
    rating: Mutex<i32>,
    created_at: DateTime<Utc>,
}

impl Player {
    fn new(name: String) -> Self {
        Self {
            name,
            rating: Mutex::new(INITIAL_RATING),
            created_at: Utc::now(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rating(&self) -> i32 {
        *self.rating.lock()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn info(&self) -> UserInfo {
        UserInfo {
            username: self.name.clone(),
            rating: self.rating(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameOutcome {
    Draw,
    FirstWon,
    SecondWon,
}

/// Applies an Elo update to both players after a finished game.
pub fn post_result(first: &Player, second: &Player, outcome: GameOutcome) {
    assert!(
        !std::ptr::eq(first, second),
        "a player cannot play against itself"
    );
    // Lock in name order; names are unique among live players.
    let (mut r1, mut r2) = match first.name.cmp(&second.name) {
        Ordering::Greater => {
            let r2 = second.rating.lock();
            (first.rating.lock(), r2)
        }
        _ => {
            let r1 = first.rating.lock();
            (r1, second.rating.lock())
        }
    };

    let s1 = match outcome {
        GameOutcome::Draw => 0.5,
        GameOutcome::FirstWon => 1.0,
        GameOutcome::SecondWon => 0.0,
    };
    let s2 = 1.0 - s1;
    let e1 = 1.0 / (1.0 + 10f64.powf(f64::from(*r2 - *r1) / 400.0));
    let e2 = 1.0 / (1.0 + 10f64.powf(f64::from(*r1 - *r2) / 400.0));
    *r1 += (RATING_K * (s1 - e1)) as i32;
    *r2 += (RATING_K * (s2 - e2)) as i32;
    debug!(first = %first.name, second = %second.name, ?outcome, r1 = *r1, r2 = *r2, "ratings updated");
}

struct Entry {
    player: Arc<Player>,
    refs: usize,
}

/// Deduplicating, reference-counted map from player name to the canonical
/// [`Player`].
///
/// Every successful [`lookup_or_create`](Self::lookup_or_create) must be
/// balanced by exactly one [`release`](Self::release). When the count for a
/// name drops to zero the entry is removed, and a later lookup builds a
/// fresh `Player`.
pub struct PlayerRegistry {
    players: Mutex<HashMap<String, Entry>>,
}

impl PlayerRegistry {
    pub fn new() -> Self {
        debug!("player registry initialized");
        Self {
            players: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup_or_create(&self, name: &str) -> Arc<Player> {
        let mut players = self.players.lock();
        let entry = players.entry(name.to_string()).or_insert_with(|| {
            debug!(player = name, "creating player");
            Entry {
                player: Arc::new(Player::new(name.to_string())),
                refs: 0,
            }
        });
        entry.refs += 1;
        Arc::clone(&entry.player)
    }

    /// Gives back one reference obtained from `lookup_or_create`.
    ///
    /// Panics if `player` is not the canonical instance currently held by
    /// this registry.
    pub fn release(&self, player: Arc<Player>) {
        let mut players = self.players.lock();
        let entry = match players.get_mut(player.name()) {
            Some(entry) if Arc::ptr_eq(&entry.player, &player) => entry,
            _ => panic!("release of player {} not held by this registry", player.name()),
        };
        entry.refs -= 1;
        if entry.refs == 0 {
            players.remove(player.name());
            debug!(player = player.name(), "player removed");
        }
    }

    pub fn ref_count(&self, name: &str) -> usize {
        self.players.lock().get(name).map_or(0, |entry| entry.refs)
    }

    pub fn len(&self) -> usize {
        self.players.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.lock().is_empty()
    }

    /// Tears the registry down. Every reference must have been released.
    pub fn fini(&self) {
        let players = self.players.lock();
        assert!(
            players.is_empty(),
            "player registry finalized with {} referenced players",
            players.len()
        );
        info!("player registry finalized");
    }
}

impl Default for PlayerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
