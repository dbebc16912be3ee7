//! Action routines the transition tables refer to
//!
//! Every action receives the dispatch context, the target record handle and
//! the triggering event. Actions run after the next state has been
//! committed, so reading `scb.state` observes the post-transition state.
//! Failures are signaled by posting a follow-up event or a notification,
//! never by a return value.

use super::{post, Action, AgContext, AgState};
use crate::callout::Callouts;
use crate::constants::{CODEC_NEGOTIATION_TIMEOUT_MS, INVALID_SCO_INDEX, RING_TIMEOUT_MS};
use crate::event::{result, AgEvent};
use crate::scb::Codec;
use crate::{AgNotification, AgStatus, ParseMode, Profile};

/// Run one action. The match is exhaustive over the registry; adding an
/// action without a body is a compile error.
pub(super) fn run<C: Callouts>(
    ctx: &mut AgContext<'_, C>,
    handle: u16,
    action: Action,
    event: &AgEvent,
) {
    match action {
        Action::Register => register(ctx, handle, event),
        Action::Deregister => deregister(ctx, handle),
        Action::StartOpen => start_open(ctx, handle, event),
        Action::RfcDoOpen => rfc_do_open(ctx, handle),
        Action::RfcDoClose => rfc_do_close(ctx, handle),
        Action::StartDereg => start_dereg(ctx, handle),
        Action::StartClose => start_close(ctx, handle),
        Action::RfcOpen => rfc_open(ctx, handle, event),
        Action::OpenFail => open_fail(ctx, handle),
        Action::RfcAcpOpen => rfc_acp_open(ctx, handle, event),
        Action::RfcClose => rfc_close(ctx, handle),
        Action::RfcFail => rfc_fail(ctx, handle),
        Action::RfcData => rfc_data(ctx, handle, event),
        Action::DiscIntRes => disc_int_res(ctx, handle, event),
        Action::DiscFail => disc_fail(ctx, handle),
        Action::DiscAcpRes => disc_acp_res(ctx, handle),
        Action::FreeDb => free_db(ctx, handle),
        Action::ScoConnOpen => sco_conn_open(ctx, handle, event),
        Action::ScoConnClose => sco_conn_close(ctx, handle),
        Action::ScoListen => sco_listen(ctx, handle),
        Action::ScoOpen => sco_open(ctx, handle),
        Action::ScoClose => sco_close(ctx, handle),
        Action::ScoShutdown => sco_shutdown(ctx, handle),
        Action::PostScoOpen => post_sco_open(ctx, handle),
        Action::PostScoClose => post_sco_close(ctx, handle),
        Action::SvcConnOpen => svc_conn_open(ctx, handle),
        Action::Result => send_result(ctx, handle, event),
        Action::SetCodec => set_codec(ctx, handle, event),
        Action::SendRing => send_ring(ctx, handle),
        Action::CiScoData => ci_sco_data(ctx, handle),
        Action::CiRxData => ci_rx_data(ctx, handle, event),
        Action::SlcReady => slc_ready(ctx, handle),
    }
}

/// Release the record and stop its timers. Emits the one-time `Disabled`
/// notification when this was the last record and the gateway is no longer
/// registered.
pub(crate) fn deallocate<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    for token in ctx.pool.deallocate(handle) {
        ctx.callouts.stop_timer(token);
    }
    if !ctx.registered && ctx.pool.none_in_use() {
        ctx.callouts.notify(AgNotification::Disabled);
    }
}

fn register<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let AgEvent::Register(payload) = event else {
        return;
    };
    let services = payload.services;
    if let Some(scb) = ctx.pool.get_mut(handle) {
        scb.services = services;
        scb.features = payload.features;
        scb.servers_active = true;
    }
    ctx.callouts.start_servers(handle, services);
    ctx.callouts.notify(AgNotification::Register {
        handle,
        status: AgStatus::Success,
    });
}

fn deregister<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let services = match ctx.pool.get_mut(handle) {
        Some(scb) if scb.servers_active => {
            scb.servers_active = false;
            Some(scb.services)
        }
        _ => None,
    };
    if let Some(services) = services {
        ctx.callouts.close_servers(handle, services);
    }
    deallocate(ctx, handle);
}

fn start_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    if let AgEvent::Open { peer_addr } = event {
        scb.peer_addr = Some(*peer_addr);
    }
    let Some(peer_addr) = scb.peer_addr else {
        warn!("ag: scb {} open request without a peer", handle);
        return;
    };
    let services = scb.services;
    let session = ctx.callouts.start_discovery(handle, peer_addr, services);
    if let Some(scb) = ctx.pool.get_mut(handle) {
        scb.disc_session = Some(session);
    }
}

fn rfc_do_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    let Some(peer_addr) = scb.peer_addr else {
        return;
    };
    // The listeners come down before dialing out so the peer cannot cross
    // onto a server channel mid-attempt.
    let services = scb.servers_active.then_some(scb.services);
    scb.servers_active = false;
    if let Some(services) = services {
        ctx.callouts.close_servers(handle, services);
    }
    ctx.callouts.rfc_connect(handle, peer_addr);
}

fn rfc_do_close<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let rfc_handle = ctx.pool.get(handle).map_or(0, |scb| scb.rfc_handle);
    if rfc_handle != 0 {
        ctx.callouts.rfc_disconnect(handle);
    } else {
        // No transport yet; fake the close so the record still walks the
        // Closing path to Init.
        post(ctx, handle, AgEvent::RfcClose);
    }
}

fn start_dereg<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    if let Some(scb) = ctx.pool.get_mut(handle) {
        scb.dereg = true;
    }
}

fn start_close<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    let ring = scb.timers.ring.cancel();
    let has_sco = scb.has_sco();
    if let Some(token) = ring {
        ctx.callouts.stop_timer(token);
    }
    if has_sco {
        ctx.callouts.sco_close(handle);
    }
    ctx.callouts.rfc_disconnect(handle);
}

fn rfc_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    if let AgEvent::RfcOpen { rfc_handle, .. } = event {
        scb.rfc_handle = *rfc_handle;
    }
    scb.disc_session = None;
    ctx.callouts.notify(AgNotification::Open {
        handle,
        status: AgStatus::Success,
    });
}

fn open_fail<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    ctx.callouts.notify(AgNotification::Open {
        handle,
        status: AgStatus::Failed,
    });
}

fn rfc_acp_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    let AgEvent::RfcOpen {
        rfc_handle,
        peer_addr,
    } = event
    else {
        return;
    };
    // A pending collision back-off means this record still owes the peer it
    // collided with an outgoing retry. The incoming side just claimed the
    // record, so the retry is either satisfied (same peer) or has to move.
    let deferred = scb
        .timers
        .collision
        .cancel()
        .map(|token| (token, scb.peer_addr));
    scb.rfc_handle = *rfc_handle;
    scb.peer_addr = Some(*peer_addr);

    if let Some((token, retry_peer)) = deferred {
        ctx.callouts.stop_timer(token);
        match retry_peer {
            Some(retry) if retry != *peer_addr => {
                if let Some(idle) = ctx.pool.any_other_idle(handle) {
                    post(ctx, idle, AgEvent::Open { peer_addr: retry });
                } else {
                    warn!("ag: scb {} dropping deferred open, no idle record", handle);
                }
            }
            _ => {}
        }
    }
    ctx.callouts.notify(AgNotification::Open {
        handle,
        status: AgStatus::Success,
    });
}

fn rfc_close<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    let ring = scb.timers.ring.cancel();
    let dereg = scb.dereg;
    let services = scb.services;
    scb.rfc_handle = 0;
    scb.svc_conn = false;
    scb.codec_updated = false;
    scb.codec_fallback = false;
    scb.sco_codec = Codec::Cvsd;

    if let Some(token) = ring {
        ctx.callouts.stop_timer(token);
    }
    sco_shutdown(ctx, handle);
    ctx.callouts.notify(AgNotification::Close { handle });

    if dereg {
        if ctx.registered {
            ctx.callouts.close_servers(handle, services);
        }
        deallocate(ctx, handle);
    } else {
        // Record stays registered; accept the next peer.
        if let Some(scb) = ctx.pool.get_mut(handle) {
            scb.servers_active = true;
        }
        ctx.callouts.start_servers(handle, services);
    }
}

fn rfc_fail<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    scb.rfc_handle = 0;
    scb.disc_session = None;
    let services = scb.services;
    scb.servers_active = true;
    ctx.callouts.notify(AgNotification::Open {
        handle,
        status: AgStatus::Failed,
    });
    ctx.callouts.start_servers(handle, services);
}

fn rfc_data<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let AgEvent::RfcData(data) = event else {
        return;
    };
    match ctx.parse_mode {
        ParseMode::Full => ctx.callouts.parse_rx(handle, data),
        ParseMode::Passthrough => ctx.callouts.forward_rx(handle, data),
    }
}

fn disc_int_res<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let AgEvent::DiscIntRes { services } = event else {
        return;
    };
    if services.is_empty() {
        post(ctx, handle, AgEvent::DiscFail);
    } else {
        post(ctx, handle, AgEvent::DiscOk);
    }
}

fn disc_fail<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    scb.disc_session = None;
    let services = scb.services;
    scb.servers_active = true;
    ctx.callouts.notify(AgNotification::Open {
        handle,
        status: AgStatus::Failed,
    });
    ctx.callouts.start_servers(handle, services);
}

fn disc_acp_res<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    free_db(ctx, handle);
}

fn free_db<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let session = ctx.pool.get_mut(handle).and_then(|scb| scb.disc_session.take());
    if let Some(session) = session {
        ctx.callouts.cancel_discovery(session);
    }
}

fn sco_conn_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    if let AgEvent::ScoOpen { sco_index } = event {
        scb.sco_index = *sco_index;
    }
    scb.codec_fallback = false;
    ctx.callouts.notify(AgNotification::AudioOpen { handle });
}

fn sco_conn_close<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    scb.sco_index = INVALID_SCO_INDEX;
    // A failed mSBC channel is retried on CVSD, but only while the signaling
    // connection is still up (the state was committed before this ran).
    if scb.codec_fallback && scb.state == AgState::Open {
        scb.codec_fallback = false;
        scb.sco_codec = Codec::Cvsd;
        let settings = scb.msbc_settings;
        ctx.callouts.sco_open(handle, Codec::Cvsd, settings);
    } else {
        ctx.callouts.notify(AgNotification::AudioClose { handle });
    }
}

fn sco_listen<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    ctx.callouts.sco_listen(handle);
}

fn sco_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    // HSP never negotiates a codec; its channel is always CVSD.
    let codec = match scb.services.profile() {
        Profile::Hsp => Codec::Cvsd,
        Profile::Hfp => scb.sco_codec,
    };
    let settings = scb.msbc_settings;
    if codec == Codec::Msbc {
        let token = scb
            .timers
            .codec_negotiation
            .arm(scb.handle, scb.generation);
        ctx.callouts.start_timer(token, CODEC_NEGOTIATION_TIMEOUT_MS);
    }
    ctx.callouts.sco_open(handle, codec, settings);
}

fn sco_close<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let token = ctx
        .pool
        .get_mut(handle)
        .and_then(|scb| scb.timers.codec_negotiation.cancel());
    if let Some(token) = token {
        ctx.callouts.stop_timer(token);
    }
    ctx.callouts.sco_close(handle);
}

fn sco_shutdown<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    if ctx.pool.any_other_open(handle) {
        debug!("ag: scb {} leaves the sco listener up for others", handle);
    } else {
        ctx.callouts.sco_shutdown(handle);
    }
    if let Some(scb) = ctx.pool.get_mut(handle) {
        scb.sco_index = INVALID_SCO_INDEX;
    }
}

fn post_sco_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let token = ctx
        .pool
        .get_mut(handle)
        .and_then(|scb| scb.timers.codec_negotiation.cancel());
    if let Some(token) = token {
        ctx.callouts.stop_timer(token);
    }
}

fn post_sco_close<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    if let Some(scb) = ctx.pool.get_mut(handle) {
        scb.codec_updated = false;
    }
}

fn svc_conn_open<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    if scb.svc_conn {
        return;
    }
    scb.svc_conn = true;
    ctx.callouts.notify(AgNotification::Connected { handle });
}

fn send_result<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let AgEvent::Result(payload) = event else {
        return;
    };
    ctx.callouts.send_result(handle, payload.code, payload.value);
    match payload.code {
        result::IN_CALL => {
            // Kick off the ring cadence; SendRing keeps it going.
            ctx.callouts.send_ring(handle);
            arm_ring(ctx, handle);
        }
        result::IN_CALL_CONN | result::CALL_CANCEL | result::END_CALL => {
            let token = ctx
                .pool
                .get_mut(handle)
                .and_then(|scb| scb.timers.ring.cancel());
            if let Some(token) = token {
                ctx.callouts.stop_timer(token);
            }
        }
        _ => {}
    }
}

fn set_codec<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let AgEvent::SetCodec { codec } = event else {
        return;
    };
    let Some(scb) = ctx.pool.get_mut(handle) else {
        return;
    };
    if scb.peer_codecs.supports(*codec) {
        scb.sco_codec = *codec;
        scb.codec_updated = true;
    } else {
        warn!("ag: scb {} peer does not support requested codec", handle);
    }
}

fn send_ring<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    ctx.callouts.send_ring(handle);
    arm_ring(ctx, handle);
}

fn arm_ring<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    let token = ctx
        .pool
        .get_mut(handle)
        .map(|scb| scb.timers.ring.arm(scb.handle, scb.generation));
    if let Some(token) = token {
        ctx.callouts.start_timer(token, RING_TIMEOUT_MS);
    }
}

fn ci_sco_data<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    ctx.callouts.sco_data(handle);
}

fn ci_rx_data<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let AgEvent::RxWrite(data) = event else {
        return;
    };
    ctx.callouts.rfc_send(handle, data);
}

// The command processor posts SlcReady once the setup handshake finishes;
// in pass-through mode the application posts it instead.
fn slc_ready<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16) {
    svc_conn_open(ctx, handle);
}
