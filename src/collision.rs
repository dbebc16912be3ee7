//! Connection-attempt collision handling
//!
//! When both sides dial each other at the same time, the lower layers
//! report a collision keyed by peer address. If that peer belongs to a
//! record in the middle of an outgoing attempt, the attempt is aborted
//! outside the transition tables: the record is forced back to `Init`, its
//! discovery is canceled, its servers come back up so the peer's attempt
//! can land, and a back-off timer schedules one retry. A collision for a
//! record in any other state, or for an unknown peer, is ignored.

use crate::callout::Callouts;
use crate::constants::COLLISION_TIMEOUT_MS;
use crate::event::AgEvent;
use crate::sm::{self, AgContext, AgState};
use crate::BluetoothAddress;

/// Which layer detected the collision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum CollisionSource {
    /// Link-level (ACL) connection collision
    Acl,
    /// Session-level (RFCOMM) connection collision
    Rfcomm,
}

/// Abort the outgoing attempt that collided with the peer's and schedule
/// its retry.
pub(crate) fn on_collision<C: Callouts>(
    ctx: &mut AgContext<'_, C>,
    peer_addr: BluetoothAddress,
    source: CollisionSource,
) {
    let Some(handle) = ctx.pool.lookup_by_peer(peer_addr) else {
        debug!("ag: collision for unknown peer ignored");
        return;
    };
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    if scb.state != AgState::Opening {
        debug!("ag: collision for scb {} outside opening ignored", handle);
        return;
    }
    match source {
        CollisionSource::Acl => warn!("ag: acl collision, aborting open on scb {}", handle),
        CollisionSource::Rfcomm => warn!("ag: rfcomm collision, aborting open on scb {}", handle),
    }

    // Exceptional abort path: the state is forced, not table-driven.
    scb.state = AgState::Init;
    let session = scb.disc_session.take();
    let services = (!scb.servers_active).then_some(scb.services);
    if services.is_some() {
        scb.servers_active = true;
    }
    let token = scb.timers.collision.arm(scb.handle, scb.generation);

    if let Some(session) = session {
        ctx.callouts.cancel_discovery(session);
    }
    if let Some(services) = services {
        ctx.callouts.start_servers(handle, services);
    }
    ctx.callouts.start_timer(token, COLLISION_TIMEOUT_MS);
}

/// Back-off expired: resume the interrupted attempt if the record is still
/// idle.
pub(crate) fn resume_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    if scb.state != AgState::Init {
        debug!("ag: scb {} no longer idle, not resuming open", handle);
        return;
    }
    let Some(peer_addr) = scb.peer_addr else {
        return;
    };
    debug!("ag: resuming open to {} on scb {}", peer_addr.format_hex().as_str(), handle);
    sm::execute(ctx, handle, &AgEvent::Open { peer_addr });
}
