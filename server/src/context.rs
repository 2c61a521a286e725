//! Shared server state handed to every task
//!
//! Holds the two locks of the server: the registry lock (players and dedup
//! cache) and the tag lock (scan schedule, cooldown, failsafe RNG and every
//! change of who is It). When both are needed the tag lock is taken first.

use crate::broadcast;
use crate::config::ServerConfig;
use crate::registry::{Outbox, PlayerSnapshot, Registry};
use crate::tag::{self, TagState};
use log::debug;
use shared::{PlayerId, Vec3};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

/// State shared by the accept loop, every session and the tagging tasks
pub struct ServerContext {
    config: ServerConfig,
    registry: Mutex<Registry>,
    tag: Mutex<TagState>,
}

impl ServerContext {
    /// Creates an empty context. The failsafe RNG is seeded from
    /// `config.rng_seed` when set, from entropy otherwise.
    pub fn new(config: ServerConfig) -> Self {
        let tag = TagState::new(config.first_scan_delay, config.rng_seed);

        Self {
            config,
            registry: Mutex::new(Registry::new()),
            tag: Mutex::new(tag),
        }
    }

    /// Settings the server was started with
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Sends the newcomer the current game state, then registers them. Both
    /// happen in one critical section so no update falls in between.
    pub async fn join(&self, addr: SocketAddr, outbox: Outbox) -> PlayerId {
        let _tag = self.tag.lock().await;
        let mut registry = self.registry.lock().await;

        let sent = broadcast::send_initial_state(&registry, &outbox);
        let id = registry.register(addr, outbox);
        for (sender, position) in sent {
            registry.remember_sent(id, sender, position);
        }

        id
    }

    /// Stores the position and relays it to players who have not seen it.
    pub async fn update_position(&self, id: PlayerId, position: Vec3) -> usize {
        let mut registry = self.registry.lock().await;

        if !broadcast::record_position(&mut registry, id, position) {
            return 0;
        }
        broadcast::broadcast_position(&mut registry, id)
    }

    /// Announces the departure and removes the player. If they were It,
    /// nobody is until the failsafe runs.
    pub async fn leave(&self, id: PlayerId) -> bool {
        let _tag = self.tag.lock().await;
        let mut registry = self.registry.lock().await;

        let notified = broadcast::broadcast_leave(&registry, id);
        debug!("Player {} left, {} players notified", id, notified);
        registry.unregister(id).is_some()
    }

    /// How long the proximity scanner should sleep before its next pass.
    ///
    /// Starts at the first-scan delay and is rewritten by every scan: the
    /// regular interval after a miss, the cooldown after a tag.
    pub async fn next_scan_delay(&self) -> Duration {
        self.tag.lock().await.next_scan()
    }

    /// One pass of the proximity scanner. Returns the newly tagged player.
    pub async fn scan_for_tag(&self) -> Option<PlayerId> {
        let mut tag = self.tag.lock().await;
        let now = Instant::now();

        if let Some(remaining) = tag.cooldown_remaining(now) {
            tag.set_next_scan(remaining);
            return None;
        }

        let mut registry = self.registry.lock().await;
        match tag::find_tag(&registry, self.config.tag_distance) {
            Some((from, to)) => {
                tag::apply_tag(&mut registry, from, to);
                tag.start_cooldown(now, self.config.tag_cooldown);
                Some(to)
            }
            None => {
                tag.set_next_scan(self.config.scan_interval);
                None
            }
        }
    }

    /// Checks whether `id` just moved into range of It (or, being It, into
    /// range of someone else). Respects the post-tag cooldown.
    pub async fn check_tag_after_move(&self, id: PlayerId) -> Option<PlayerId> {
        if !self.config.event_driven_tagging {
            return None;
        }

        let mut tag = self.tag.lock().await;
        let now = Instant::now();
        if tag.cooldown_remaining(now).is_some() {
            return None;
        }

        let mut registry = self.registry.lock().await;
        let (from, to) = tag::find_tag_for(&registry, id, self.config.tag_distance)?;
        tag::apply_tag(&mut registry, from, to);
        tag.start_cooldown(now, self.config.tag_cooldown);
        Some(to)
    }

    /// Hands It to a random player if nobody holds it.
    pub async fn ensure_it(&self) -> Option<PlayerId> {
        let mut tag = self.tag.lock().await;
        let mut registry = self.registry.lock().await;

        let chosen = tag.choose_failsafe(&registry)?;
        tag::assign_it(&mut registry, chosen);
        Some(chosen)
    }

    /// Number of registered players, active or not
    pub async fn player_count(&self) -> usize {
        self.registry.lock().await.len()
    }

    /// Every player currently flagged as It, in registration order.
    pub async fn it_players(&self) -> Vec<PlayerId> {
        self.registry
            .lock()
            .await
            .players()
            .filter(|p| p.is_it)
            .map(|p| p.id)
            .collect()
    }

    /// Visible state of every active player, in registration order
    pub async fn snapshot(&self) -> Vec<PlayerSnapshot> {
        self.registry.lock().await.snapshot()
    }

    /// Size of the dedup cache, in (recipient, sender) pairs
    pub async fn dedup_entries(&self) -> usize {
        self.registry.lock().await.dedup_entries()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::tests::test_addr;
    use shared::ServerMessage;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn test_context() -> ServerContext {
        ServerContext::new(ServerConfig {
            rng_seed: Some(1),
            ..ServerConfig::default()
        })
    }

    async fn connect(ctx: &ServerContext) -> (PlayerId, UnboundedReceiver<ServerMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (ctx.join(test_addr(), tx).await, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<ServerMessage>) -> Vec<ServerMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = rx.try_recv() {
            messages.push(message);
        }
        messages
    }

    #[tokio::test]
    async fn test_join_sends_state_before_registering() {
        let ctx = test_context();
        let (id1, mut rx1) = connect(&ctx).await;
        assert!(drain(&mut rx1).is_empty());

        ctx.update_position(id1, Vec3::new(5.0, 0.0, 0.0)).await;
        let (id2, mut rx2) = connect(&ctx).await;

        assert_eq!(
            drain(&mut rx2),
            vec![
                ServerMessage::position_update(id1, Vec3::new(5.0, 0.0, 0.0)),
                ServerMessage::player_tagged(id1),
            ]
        );
        assert!(drain(&mut rx1).is_empty());
        assert_eq!(ctx.player_count().await, 2);

        // Already seen in the initial state
        assert_eq!(ctx.update_position(id1, Vec3::new(5.0, 0.0, 0.0)).await, 0);
        assert_ne!(id1, id2);
    }

    #[tokio::test]
    async fn test_leave_does_not_reassign_it() {
        let ctx = test_context();
        let (id1, _rx1) = connect(&ctx).await;
        let (_id2, mut rx2) = connect(&ctx).await;
        drain(&mut rx2);

        ctx.update_position(id1, Vec3::new(9.0, 0.0, 0.0)).await;
        assert!(ctx.leave(id1).await);

        assert_eq!(
            drain(&mut rx2),
            vec![
                ServerMessage::position_update(id1, Vec3::new(9.0, 0.0, 0.0)),
                ServerMessage::player_left(id1),
            ]
        );
        assert!(ctx.it_players().await.is_empty());
        assert_eq!(ctx.dedup_entries().await, 0);
        assert!(!ctx.leave(id1).await);
    }

    #[tokio::test]
    async fn test_failsafe_restores_it() {
        let ctx = test_context();
        let (id1, _rx1) = connect(&ctx).await;
        let (id2, mut rx2) = connect(&ctx).await;
        drain(&mut rx2);

        assert_eq!(ctx.ensure_it().await, None);

        ctx.leave(id1).await;
        assert_eq!(ctx.ensure_it().await, Some(id2));
        assert_eq!(ctx.it_players().await, vec![id2]);
        assert_eq!(drain(&mut rx2), vec![ServerMessage::you_are_it()]);
    }

    #[tokio::test]
    async fn test_failsafe_on_empty_registry() {
        let ctx = test_context();
        assert_eq!(ctx.ensure_it().await, None);
    }

    #[tokio::test]
    async fn test_scan_tags_then_cools_down() {
        let ctx = test_context();
        let (_id1, _rx1) = connect(&ctx).await;
        let (id2, _rx2) = connect(&ctx).await;

        // Both sit at the origin
        assert_eq!(ctx.next_scan_delay().await, Duration::from_millis(20));
        assert_eq!(ctx.scan_for_tag().await, Some(id2));
        assert_eq!(ctx.it_players().await, vec![id2]);
        assert_eq!(ctx.next_scan_delay().await, Duration::from_secs(3));

        // Still cooling down, nothing changes hands
        assert_eq!(ctx.scan_for_tag().await, None);
        assert_eq!(ctx.it_players().await, vec![id2]);
        assert!(ctx.next_scan_delay().await <= Duration::from_secs(3));
    }

    #[tokio::test]
    async fn test_scan_without_tag_uses_regular_interval() {
        let ctx = test_context();
        let (_id1, _rx1) = connect(&ctx).await;
        let (id2, _rx2) = connect(&ctx).await;
        ctx.update_position(id2, Vec3::new(50.0, 0.0, 0.0)).await;

        assert_eq!(ctx.scan_for_tag().await, None);
        assert_eq!(ctx.next_scan_delay().await, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_move_into_range_tags() {
        let ctx = test_context();
        let (id1, mut rx1) = connect(&ctx).await;
        let (id2, mut rx2) = connect(&ctx).await;

        ctx.update_position(id2, Vec3::new(10.0, 0.0, 0.0)).await;
        assert_eq!(ctx.check_tag_after_move(id2).await, None);

        ctx.update_position(id2, Vec3::new(2.0, 0.0, 0.0)).await;
        assert_eq!(ctx.check_tag_after_move(id2).await, Some(id2));

        assert_eq!(ctx.it_players().await, vec![id2]);
        assert!(drain(&mut rx1).contains(&ServerMessage::player_tagged(id2)));
        assert!(drain(&mut rx2).contains(&ServerMessage::you_are_it()));

        // Cooldown blocks an immediate tag back
        ctx.update_position(id1, Vec3::new(2.0, 0.0, 0.0)).await;
        assert_eq!(ctx.check_tag_after_move(id1).await, None);
    }

    #[tokio::test]
    async fn test_event_tagging_can_be_disabled() {
        let ctx = ServerContext::new(ServerConfig {
            event_driven_tagging: false,
            ..ServerConfig::default()
        });
        let (_id1, _rx1) = connect(&ctx).await;
        let (id2, _rx2) = connect(&ctx).await;

        ctx.update_position(id2, Vec3::new(1.0, 0.0, 0.0)).await;
        assert_eq!(ctx.check_tag_after_move(id2).await, None);
    }

    #[tokio::test]
    async fn test_concurrent_joins_get_unique_ids() {
        let ctx = std::sync::Arc::new(test_context());
        let mut handles = Vec::new();

        for _ in 0..32 {
            let ctx = std::sync::Arc::clone(&ctx);
            handles.push(tokio::spawn(async move {
                let (tx, _rx) = mpsc::unbounded_channel();
                ctx.join(test_addr(), tx).await
            }));
        }

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap());
        }
        ids.sort_unstable();
        ids.dedup();

        assert_eq!(ids.len(), 32);
        assert_eq!(ctx.it_players().await.len(), 1);
    }
}
