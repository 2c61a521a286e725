//! Connected players and the per-recipient dedup cache
//!
//! The registry is the single source of truth for who is connected, where
//! they are, and who is It. It also remembers, per recipient, the last
//! position relayed for every other player so unchanged positions are not
//! sent twice.
//!
//! Players are kept in a `BTreeMap` keyed by their server ID. IDs only grow,
//! so iteration order is registration order; proximity scans and the
//! failsafe rely on that order being deterministic.

use log::{info, warn};
use shared::{PlayerId, ServerMessage, Vec3};
use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use tokio::sync::mpsc;

/// Outbound queue feeding a connection's writer task.
pub type Outbox = mpsc::UnboundedSender<ServerMessage>;

/// A registered player and the channel used to reach them
#[derive(Debug)]
pub struct Player {
    /// Unique ID assigned by the server at registration
    pub id: PlayerId,
    /// Peer address, for diagnostics only
    pub addr: SocketAddr,
    /// Last position reported by the client
    pub position: Vec3,
    /// False until the first valid position update arrives
    pub active: bool,
    /// Whether this player is currently It
    pub is_it: bool,
    outbox: Outbox,
}

impl Player {
    fn new(id: PlayerId, addr: SocketAddr, outbox: Outbox) -> Self {
        Self {
            id,
            addr,
            position: Vec3::ORIGIN,
            active: false,
            is_it: false,
            outbox,
        }
    }

    /// Queues a message for this player.
    ///
    /// Returns false if the connection's writer has gone away. The session
    /// notices the dead writer on its own and disconnects.
    pub fn send(&self, message: ServerMessage) -> bool {
        if self.outbox.send(message).is_err() {
            warn!("Dropped message for player {}: connection closed", self.id);
            return false;
        }
        true
    }
}

/// Read-only copy of an active player's visible state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlayerSnapshot {
    pub id: PlayerId,
    pub position: Vec3,
    pub is_it: bool,
}

/// Every connected player, keyed by server ID
pub struct Registry {
    players: BTreeMap<PlayerId, Player>,
    next_player_id: PlayerId,
    /// recipient -> sender -> last position relayed
    last_sent: HashMap<PlayerId, HashMap<PlayerId, Vec3>>,
}

impl Registry {
    /// Creates an empty registry. The first ID handed out is 1.
    pub fn new() -> Self {
        Self {
            players: BTreeMap::new(),
            next_player_id: 1,
            last_sent: HashMap::new(),
        }
    }

    /// Adds a player at the origin. The first player into an empty registry
    /// starts as It.
    pub fn register(&mut self, addr: SocketAddr, outbox: Outbox) -> PlayerId {
        let id = self.next_player_id;
        self.next_player_id += 1;

        let mut player = Player::new(id, addr, outbox);
        player.is_it = self.players.is_empty();

        info!(
            "Player {} registered from {}{}",
            id,
            addr,
            if player.is_it { " as It" } else { "" }
        );
        self.players.insert(id, player);
        id
    }

    /// Removes a player along with every dedup row that mentions them.
    pub fn unregister(&mut self, id: PlayerId) -> Option<Player> {
        let player = self.players.remove(&id)?;

        self.last_sent.remove(&id);
        for row in self.last_sent.values_mut() {
            row.remove(&id);
        }

        info!(
            "Player {} unregistered{}",
            id,
            if player.is_it { " while It" } else { "" }
        );
        Some(player)
    }

    /// Looks up a player by ID.
    ///
    /// Returns None once the player has been unregistered.
    pub fn get(&self, id: PlayerId) -> Option<&Player> {
        self.players.get(&id)
    }

    /// Mutable access to a player, for position and It changes
    pub fn get_mut(&mut self, id: PlayerId) -> Option<&mut Player> {
        self.players.get_mut(&id)
    }

    /// Players in registration order.
    pub fn players(&self) -> impl Iterator<Item = &Player> {
        self.players.values()
    }

    /// IDs of every registered player in registration order.
    ///
    /// Returned as an owned list so callers can mutate the registry while
    /// walking it.
    pub fn ids(&self) -> Vec<PlayerId> {
        self.players.keys().copied().collect()
    }

    /// Active players only, in registration order.
    pub fn snapshot(&self) -> Vec<PlayerSnapshot> {
        self.players
            .values()
            .filter(|p| p.active)
            .map(|p| PlayerSnapshot {
                id: p.id,
                position: p.position,
                is_it: p.is_it,
            })
            .collect()
    }

    /// The first It player in registration order.
    pub fn it_player(&self) -> Option<PlayerId> {
        self.players.values().find(|p| p.is_it).map(|p| p.id)
    }

    /// Number of players flagged as It. Never more than one.
    #[cfg(test)]
    pub(crate) fn it_count(&self) -> usize {
        self.players.values().filter(|p| p.is_it).count()
    }

    /// Last position relayed to `recipient` for `sender`. Players nobody has
    /// heard about yet are assumed to be at the origin.
    pub fn last_sent(&self, recipient: PlayerId, sender: PlayerId) -> Vec3 {
        self.last_sent
            .get(&recipient)
            .and_then(|row| row.get(&sender))
            .copied()
            .unwrap_or(Vec3::ORIGIN)
    }

    /// Records that `recipient` has been told `sender` is at `position`.
    pub fn remember_sent(&mut self, recipient: PlayerId, sender: PlayerId, position: Vec3) {
        self.last_sent
            .entry(recipient)
            .or_default()
            .insert(sender, position);
    }

    /// Number of (recipient, sender) pairs in the dedup cache.
    pub fn dedup_entries(&self) -> usize {
        self.last_sent.values().map(HashMap::len).sum()
    }

    /// Number of registered players, active or not
    pub fn len(&self) -> usize {
        self.players.len()
    }

    /// True when nobody is connected
    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}
