//! Who is It, and how that changes
//!
//! Two background tasks keep exactly one It player in the game:
//!
//! - The **proximity scanner** wakes up on a variable schedule (20 ms for the
//!   first scan, 100 ms while nothing happens, a 3 s cooldown after a tag)
//!   and passes It from the first It player to the first other player within
//!   range, both in registration order.
//! - The **failsafe** periodically hands It to a random player when nobody
//!   holds it, which is how the game recovers after the It player leaves.
//!
//! Position updates can also trigger an immediate check of just the moving
//! player, so the scanner mostly acts as a fallback.
//!
//! All `is_it` flips happen while the tag lock is held, and the registry lock
//! is only ever taken after it.

use crate::broadcast;
use crate::context::ServerContext;
use crate::registry::{Player, Registry};
use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use shared::PlayerId;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, sleep, Instant, MissedTickBehavior};

/// Mutable state guarded by the tag lock
pub struct TagState {
    next_scan: Duration,
    cooldown_until: Option<Instant>,
    rng: StdRng,
}

impl TagState {
    pub fn new(first_scan_delay: Duration, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        Self {
            next_scan: first_scan_delay,
            cooldown_until: None,
            rng,
        }
    }

    /// How long the scanner should sleep before its next pass.
    pub fn next_scan(&self) -> Duration {
        self.next_scan
    }

    pub fn set_next_scan(&mut self, delay: Duration) {
        self.next_scan = delay;
    }

    /// Time left before tagging is allowed again, if any.
    pub fn cooldown_remaining(&self, now: Instant) -> Option<Duration> {
        self.cooldown_until
            .filter(|until| *until > now)
            .map(|until| until.duration_since(now))
    }

    /// Starts the post-tag cooldown. The scanner sleeps through all of it.
    pub fn start_cooldown(&mut self, now: Instant, cooldown: Duration) {
        self.cooldown_until = Some(now + cooldown);
        self.next_scan = cooldown;
    }

    /// Picks a random player to become It, but only when nobody is.
    pub fn choose_failsafe(&mut self, registry: &Registry) -> Option<PlayerId> {
        if registry.is_empty() || registry.it_player().is_some() {
            return None;
        }

        let ids = registry.ids();
        Some(ids[self.rng.gen_range(0..ids.len())])
    }
}

fn within(a: &Player, b: &Player, tag_distance: f32) -> bool {
    a.position.distance(&b.position) <= tag_distance
}

/// Full scan over ordered pairs in registration order. Returns the first
/// `(it, target)` pair in range, which is not necessarily the closest one.
pub fn find_tag(registry: &Registry, tag_distance: f32) -> Option<(PlayerId, PlayerId)> {
    registry.players().filter(|p| p.is_it).find_map(|it| {
        registry
            .players()
            .find(|p| !p.is_it && within(it, p, tag_distance))
            .map(|target| (it.id, target.id))
    })
}

/// Checks only pairs involving `mover`.
pub fn find_tag_for(
    registry: &Registry,
    mover: PlayerId,
    tag_distance: f32,
) -> Option<(PlayerId, PlayerId)> {
    let mover = registry.get(mover)?;

    if mover.is_it {
        registry
            .players()
            .find(|p| !p.is_it && within(mover, p, tag_distance))
            .map(|target| (mover.id, target.id))
    } else {
        registry
            .players()
            .find(|p| p.is_it && within(p, mover, tag_distance))
            .map(|it| (it.id, mover.id))
    }
}

/// Moves It from `from` to `to` and tells everyone.
pub fn apply_tag(registry: &mut Registry, from: PlayerId, to: PlayerId) -> usize {
    if let Some(player) = registry.get_mut(from) {
        player.is_it = false;
    }
    if let Some(player) = registry.get_mut(to) {
        player.is_it = true;
    }

    info!("Player {} tagged player {}, you're it!", from, to);
    broadcast::broadcast_tag(registry, to)
}

/// Makes `id` It without touching anyone else. Only valid when nobody is It.
pub fn assign_it(registry: &mut Registry, id: PlayerId) -> usize {
    match registry.get_mut(id) {
        Some(player) => player.is_it = true,
        None => return 0,
    }

    info!("No one was tagged. Assigning player {} as It", id);
    broadcast::broadcast_tag(registry, id)
}

/// Runs the proximity scanner until shutdown is signalled.
pub async fn run_proximity_scanner(ctx: Arc<ServerContext>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let delay = ctx.next_scan_delay().await;

        tokio::select! {
            _ = sleep(delay) => {}
            _ = shutdown.changed() => break,
        }

        ctx.scan_for_tag().await;
    }

    debug!("Proximity scanner stopped");
}

/// Runs the failsafe assigner until shutdown is signalled.
pub async fn run_failsafe(ctx: Arc<ServerContext>, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(ctx.config().failsafe_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // Skip the first tick since it fires immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                ctx.ensure_it().await;
            }
            _ = shutdown.changed() => break,
        }
    }

    debug!("Failsafe assigner stopped");
}
