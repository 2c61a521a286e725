//! Outbound fan-out built on top of the registry
//!
//! Every function here takes the already-locked registry, so a multi-step
//! broadcast observes one consistent view of the players and recipients see
//! messages in registration order.

use crate::registry::{Outbox, Registry};
use log::{debug, warn};
use shared::{PlayerId, ServerMessage, Vec3};

/// Stores a new position for `id`. The first update marks the player active,
/// which makes them visible to everyone else.
///
/// Returns false if the player is not registered.
pub fn record_position(registry: &mut Registry, id: PlayerId, position: Vec3) -> bool {
    let Some(player) = registry.get_mut(id) else {
        return false;
    };

    player.position = position;
    if !player.active {
        debug!("Player {} is now active", id);
        player.active = true;
    }
    true
}

/// Relays the sender's current position to every other player whose last
/// known copy differs. Returns the number of messages queued.
pub fn broadcast_position(registry: &mut Registry, sender: PlayerId) -> usize {
    let position = match registry.get(sender) {
        Some(player) if player.active => player.position,
        Some(_) => {
            debug!("Not relaying position of inactive player {}", sender);
            return 0;
        }
        None => return 0,
    };

    let message = ServerMessage::position_update(sender, position);
    let mut sent = 0;

    for recipient in registry.ids() {
        if recipient == sender || registry.last_sent(recipient, sender) == position {
            continue;
        }
        registry.remember_sent(recipient, sender, position);

        if let Some(player) = registry.get(recipient) {
            if player.send(message) {
                sent += 1;
            }
        }
    }

    sent
}

/// Sends the joining player a picture of the current game: one position per
/// active player, then who is It. Must run before the newcomer is registered
/// so it never describes them.
///
/// Returns the positions sent so the caller can seed the dedup cache once the
/// newcomer has an ID.
pub fn send_initial_state(registry: &Registry, outbox: &Outbox) -> Vec<(PlayerId, Vec3)> {
    let mut sent = Vec::new();

    for player in registry.snapshot() {
        let message = ServerMessage::position_update(player.id, player.position);
        if !send_to_newcomer(outbox, message) {
            return sent;
        }
        sent.push((player.id, player.position));
    }

    if let Some(it) = registry.it_player() {
        send_to_newcomer(outbox, ServerMessage::player_tagged(it));
    }

    sent
}

fn send_to_newcomer(outbox: &Outbox, message: ServerMessage) -> bool {
    if outbox.send(message).is_err() {
        warn!("Dropped initial state for joining player: connection closed");
        return false;
    }
    true
}

/// Tells everyone else that `id` has left. Players that never became active
/// were never announced, so nothing is sent for them.
pub fn broadcast_leave(registry: &Registry, id: PlayerId) -> usize {
    match registry.get(id) {
        Some(player) if player.active => {}
        _ => return 0,
    }

    let message = ServerMessage::player_left(id);
    registry
        .players()
        .filter(|p| p.id != id)
        .filter(|p| p.send(message))
        .count()
}

/// Announces the new It. The tagged player is told with the `-1` sentinel,
/// everyone else gets their ID.
pub fn broadcast_tag(registry: &Registry, new_it: PlayerId) -> usize {
    let announcement = ServerMessage::player_tagged(new_it);

    registry
        .players()
        .filter(|p| {
            if p.id == new_it {
                p.send(ServerMessage::you_are_it())
            } else {
                p.send(announcement)
            }
        })
        .count()
}
