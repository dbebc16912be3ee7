//! Top-level event router
//!
//! [`AudioGateway`] owns the record pool, the gateway-wide options and the
//! call-out implementation. Every inbound [`AgMessage`] passes through
//! [`AudioGateway::handle_message`], which either performs a gateway-wide
//! operation (enable, disable, register, broadcast result, collision and
//! back-off handling) or resolves the target record and hands the event to
//! the per-record state machine. Follow-up events queued by actions are
//! drained before the call returns, so one inbound message settles
//! completely before the next is taken.

use crate::callout::Callouts;
use crate::collision;
use crate::constants::{HANDLE_ALL, MAX_PENDING_EVENTS, MAX_SCBS};
use crate::event::{AgEvent, AgMessage};
use crate::scb::{Scb, ScbPool};
use crate::sm::{self, AgContext};
use crate::timer::{TimerKind, TimerToken};
use crate::{AgError, AgNotification, AgOptions, AgStatus, ParseMode};
use heapless::Deque;
use heapless::Vec;

/// The audio gateway: record pool, options and call-outs under one owner.
///
/// All of the gateway's state lives here; constructing one per enable and
/// dropping it on disable gives the lifecycle explicit ownership. The
/// gateway must only be driven from one serialized context (see
/// [`processor`](crate::processor)).
pub struct AudioGateway<C: Callouts> {
    pool: ScbPool,
    options: AgOptions,
    registered: bool,
    collision_registered: bool,
    pending: Deque<AgMessage, MAX_PENDING_EVENTS>,
    callouts: C,
}

impl<C: Callouts> AudioGateway<C> {
    /// Create a gateway with default options
    #[must_use]
    pub fn new(callouts: C) -> Self {
        Self::with_options(callouts, AgOptions::default())
    }

    /// Create a gateway with the given options
    #[must_use]
    pub fn with_options(callouts: C, options: AgOptions) -> Self {
        Self {
            pool: ScbPool::new(),
            options,
            registered: false,
            collision_registered: false,
            pending: Deque::new(),
            callouts,
        }
    }

    /// Borrow the call-out implementation
    pub fn callouts(&self) -> &C {
        &self.callouts
    }

    /// Mutably borrow the call-out implementation
    pub fn callouts_mut(&mut self) -> &mut C {
        &mut self.callouts
    }

    /// Borrow a connection record, if the handle resolves
    #[must_use]
    pub fn record(&self, handle: u16) -> Option<&Scb> {
        self.pool.get(handle)
    }

    /// Route one inbound message, then drain every follow-up event the
    /// dispatched actions queued.
    ///
    /// # Errors
    /// Returns the routing error for the inbound message itself; follow-up
    /// events never fail routing, they are dropped with a log line when
    /// their target has gone away.
    pub fn handle_message(&mut self, msg: AgMessage) -> Result<(), AgError> {
        let outcome = self.route(msg);
        while let Some(follow_up) = self.pending.pop_front() {
            if let Err(_e) = self.route(follow_up) {
                debug!("ag: follow-up event dropped");
            }
        }
        outcome
    }

    fn route(&mut self, msg: AgMessage) -> Result<(), AgError> {
        trace!("ag: routing [{}]", msg.event.name());
        match msg.event {
            AgEvent::Enable { parse_mode } => {
                self.enable(parse_mode);
                Ok(())
            }
            AgEvent::Disable => self.disable(),
            AgEvent::Register(_) => self.register(&msg.event),
            AgEvent::Result(_) if msg.handle == HANDLE_ALL => {
                self.broadcast_result(&msg.event);
                Ok(())
            }
            AgEvent::Collision { peer_addr, source } => {
                if self.collision_registered {
                    collision::on_collision(&mut self.context(), peer_addr, source);
                }
                Ok(())
            }
            AgEvent::CollisionBackoff(token) => {
                self.collision_backoff(token);
                Ok(())
            }
            AgEvent::CodecNegTimeout(token) => {
                self.codec_neg_timeout(token);
                Ok(())
            }
            AgEvent::RingTimeout(token) => {
                if self.take_expired(token, TimerKind::Ring) {
                    self.dispatch(token.handle, &AgEvent::RingTimeout(token));
                }
                Ok(())
            }
            _ => {
                // Targeted events: stale handles are dropped, not fatal.
                if self.pool.get(msg.handle).is_none() {
                    debug!(
                        "ag: dropping [{}] for stale handle {}",
                        msg.event.name(),
                        msg.handle
                    );
                    return Err(AgError::UnknownTarget);
                }
                self.dispatch(msg.handle, &msg.event);
                Ok(())
            }
        }
    }

    /// Reset everything and bring the gateway up. Nothing survives from a
    /// previous enable/disable cycle.
    fn enable(&mut self, parse_mode: ParseMode) {
        let tokens = self.pool.release_all();
        for token in tokens {
            self.callouts.stop_timer(token);
        }
        self.pending.clear();
        self.options.parse_mode = parse_mode;
        self.registered = true;
        self.collision_registered = true;
        self.callouts.init();
        self.callouts.notify(AgNotification::Enabled);
    }

    /// Walk every record through its deregistration path. The last
    /// deallocation emits the `Disabled` notification; with no records it
    /// is emitted here directly.
    fn disable(&mut self) -> Result<(), AgError> {
        if !self.registered {
            warn!("ag: disable while not enabled");
            return Err(AgError::AlreadyDisabled);
        }
        self.registered = false;
        self.collision_registered = false;
        let handles = self.pool.in_use_handles();
        if handles.is_empty() {
            self.callouts.notify(AgNotification::Disabled);
            return Ok(());
        }
        for handle in handles {
            self.dispatch(handle, &AgEvent::Deregister);
        }
        Ok(())
    }

    /// Allocate a record and forward the registration into its state
    /// machine. Exhaustion is reported to the application and touches no
    /// existing record.
    fn register(&mut self, event: &AgEvent) -> Result<(), AgError> {
        let handle = match self.pool.allocate() {
            Ok(scb) => scb.handle,
            Err(e) => {
                self.callouts.notify(AgNotification::Register {
                    handle: 0,
                    status: AgStatus::OutOfResources,
                });
                return Err(e);
            }
        };
        self.dispatch(handle, event);
        Ok(())
    }

    /// Fan a broadcast result out to every record with an established
    /// service connection. Single-handle results bypass this check.
    fn broadcast_result(&mut self, event: &AgEvent) {
        let mut targets: Vec<u16, MAX_SCBS> = Vec::new();
        for scb in self.pool.iter() {
            if scb.svc_conn {
                targets.push(scb.handle).ok();
            }
        }
        for handle in targets {
            self.dispatch(handle, event);
        }
    }

    fn collision_backoff(&mut self, token: TimerToken) {
        if !self.take_expired(token, TimerKind::Collision) {
            return;
        }
        collision::resume_open(&mut self.context(), token.handle);
    }

    /// mSBC negotiation took too long; mark the record for CVSD fallback
    /// and tear the attempt down. The resulting voice-channel close event
    /// performs the retry.
    fn codec_neg_timeout(&mut self, token: TimerToken) {
        if !self.take_expired(token, TimerKind::CodecNegotiation) {
            return;
        }
        let handle = token.handle;
        if let Some(scb) = self.pool.get_mut(handle) {
            warn!("ag: codec negotiation timed out on scb {}", handle);
            scb.codec_fallback = true;
        }
        self.callouts.sco_close(handle);
    }

    /// Validate an expiry token against the record's timer and disarm it.
    /// Stale tokens (deallocated record, recycled generation, canceled or
    /// re-armed timer) are dropped.
    fn take_expired(&mut self, token: TimerToken, kind: TimerKind) -> bool {
        let Some(scb) = self.pool.get_mut(token.handle) else {
            debug!("ag: expiry for deallocated scb {} dropped", token.handle);
            return false;
        };
        if scb.generation != token.generation || !scb.timers.get(kind).matches(&token) {
            debug!("ag: stale timer expiry for scb {} dropped", token.handle);
            return false;
        }
        scb.timers.get_mut(kind).cancel();
        true
    }

    fn dispatch(&mut self, handle: u16, event: &AgEvent) {
        sm::execute(&mut self.context(), handle, event);
    }

    /// Borrow the gateway's fields as a dispatch context
    fn context(&mut self) -> AgContext<'_, C> {
        AgContext {
            pool: &mut self.pool,
            parse_mode: self.options.parse_mode,
            registered: self.registered,
            callouts: &mut self.callouts,
            pending: &mut self.pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callout::recording::{CalloutCall, RecordingCallouts};
    use crate::collision::CollisionSource;
    use crate::constants::{COLLISION_TIMEOUT_MS, RING_TIMEOUT_MS};
    use crate::event::{result, RegisterPayload, ResultPayload};
    use crate::scb::{Codec, CodecMask};
    use crate::sm::AgState;
    use crate::{BluetoothAddress, ServiceMask};

    const PEER: BluetoothAddress = BluetoothAddress::new([0x00, 0x1B, 0xDC, 0x07, 0x31, 0x88]);

    fn enabled_gateway() -> AudioGateway<RecordingCallouts> {
        let mut gw = AudioGateway::new(RecordingCallouts::new());
        gw.handle_message(AgMessage::global(AgEvent::Enable {
            parse_mode: ParseMode::Full,
        }))
        .unwrap();
        gw.callouts_mut().clear();
        gw
    }

    fn register_one(gw: &mut AudioGateway<RecordingCallouts>) -> u16 {
        gw.handle_message(AgMessage::global(AgEvent::Register(RegisterPayload {
            services: ServiceMask::HFP,
            features: 0,
        })))
        .unwrap();
        let handle = match gw.callouts().notifications.last() {
            Some(AgNotification::Register { handle, .. }) => *handle,
            other => panic!("expected register notification, got {other:?}"),
        };
        gw.callouts_mut().clear();
        handle
    }

    fn open_record(gw: &mut AudioGateway<RecordingCallouts>) -> u16 {
        let handle = register_one(gw);
        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::RfcOpen {
                rfc_handle: 40 + handle,
                peer_addr: PEER,
            },
        ))
        .unwrap();
        gw.callouts_mut().clear();
        handle
    }

    #[test]
    fn test_enable_notifies_and_initializes() {
        let mut gw = AudioGateway::new(RecordingCallouts::new());
        gw.handle_message(AgMessage::global(AgEvent::Enable {
            parse_mode: ParseMode::Full,
        }))
        .unwrap();

        assert_eq!(gw.callouts().calls.as_slice(), &[CalloutCall::Init]);
        assert_eq!(
            gw.callouts().notifications.as_slice(),
            &[AgNotification::Enabled]
        );
    }

    #[test]
    fn test_register_starts_servers_and_reports_success() {
        let mut gw = enabled_gateway();
        gw.handle_message(AgMessage::global(AgEvent::Register(RegisterPayload {
            services: ServiceMask::HFP,
            features: 0x3F,
        })))
        .unwrap();

        assert_eq!(
            gw.callouts().calls.as_slice(),
            &[CalloutCall::StartServers(1, ServiceMask::HFP)]
        );
        assert_eq!(
            gw.callouts().notifications.as_slice(),
            &[AgNotification::Register {
                handle: 1,
                status: AgStatus::Success,
            }]
        );
        let scb = gw.record(1).unwrap();
        assert_eq!(scb.features, 0x3F);
        assert!(scb.servers_active);
    }

    #[test]
    fn test_pool_exhaustion_leaves_existing_records_untouched() {
        let mut gw = enabled_gateway();
        for _ in 0..MAX_SCBS {
            register_one(&mut gw);
        }

        let err = gw.handle_message(AgMessage::global(AgEvent::Register(RegisterPayload {
            services: ServiceMask::HSP,
            features: 0,
        })));
        assert_eq!(err, Err(AgError::ResourceExhausted));
        assert_eq!(
            gw.callouts().notifications.as_slice(),
            &[AgNotification::Register {
                handle: 0,
                status: AgStatus::OutOfResources,
            }]
        );
        for handle in 1..=MAX_SCBS as u16 {
            let scb = gw.record(handle).unwrap();
            assert_eq!(scb.services, ServiceMask::HFP);
            assert_eq!(scb.state, AgState::Init);
        }
    }

    #[test]
    fn test_peer_transport_open_runs_accept_then_sco_listen() {
        let mut gw = enabled_gateway();
        let handle = register_one(&mut gw);

        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::RfcOpen {
                rfc_handle: 41,
                peer_addr: PEER,
            },
        ))
        .unwrap();

        assert_eq!(gw.record(handle).unwrap().state, AgState::Open);
        assert_eq!(gw.record(handle).unwrap().rfc_handle, 41);
        assert_eq!(
            gw.callouts().notifications.as_slice(),
            &[AgNotification::Open {
                handle,
                status: AgStatus::Success,
            }]
        );
        assert_eq!(
            gw.callouts().calls.as_slice(),
            &[CalloutCall::ScoListen(handle)]
        );
    }

    #[test]
    fn test_deregister_walks_closing_then_deallocates() {
        let mut gw = enabled_gateway();
        let handle = open_record(&mut gw);

        gw.handle_message(AgMessage::to(handle, AgEvent::Deregister))
            .unwrap();
        assert_eq!(gw.record(handle).unwrap().state, AgState::Closing);
        assert!(gw.record(handle).unwrap().dereg);
        assert!(
            gw.callouts()
                .calls
                .contains(&CalloutCall::RfcDisconnect(handle))
        );

        gw.handle_message(AgMessage::to(handle, AgEvent::RfcClose))
            .unwrap();
        assert!(gw.record(handle).is_none());
        assert!(
            gw.callouts()
                .notifications
                .contains(&AgNotification::Close { handle })
        );
    }

    #[test]
    fn test_disable_with_no_records_reports_immediately() {
        let mut gw = enabled_gateway();
        gw.handle_message(AgMessage::global(AgEvent::Disable))
            .unwrap();
        assert_eq!(
            gw.callouts().notifications.as_slice(),
            &[AgNotification::Disabled]
        );

        assert_eq!(
            gw.handle_message(AgMessage::global(AgEvent::Disable)),
            Err(AgError::AlreadyDisabled)
        );
    }

    #[test]
    fn test_disable_completeness_over_open_records() {
        let mut gw = enabled_gateway();
        let h1 = open_record(&mut gw);
        let h2 = register_one(&mut gw);

        gw.handle_message(AgMessage::global(AgEvent::Disable))
            .unwrap();
        // The idle record deallocates immediately; the open one waits for
        // its transport to close.
        assert!(gw.record(h2).is_none());
        assert!(gw.record(h1).is_some());
        assert!(
            !gw.callouts()
                .notifications
                .contains(&AgNotification::Disabled)
        );

        gw.handle_message(AgMessage::to(h1, AgEvent::RfcClose))
            .unwrap();
        assert!(gw.record(h1).is_none());
        let disabled = gw
            .callouts()
            .notifications
            .iter()
            .filter(|n| **n == AgNotification::Disabled)
            .count();
        assert_eq!(disabled, 1);
    }

    #[test]
    fn test_outbound_open_flow() {
        let mut gw = enabled_gateway();
        let handle = register_one(&mut gw);

        gw.handle_message(AgMessage::to(handle, AgEvent::Open { peer_addr: PEER }))
            .unwrap();
        assert_eq!(gw.record(handle).unwrap().state, AgState::Opening);
        assert!(gw.record(handle).unwrap().disc_session.is_some());
        assert!(gw.callouts().calls.contains(&CalloutCall::StartDiscovery(
            handle,
            PEER,
            ServiceMask::HFP
        )));

        // Discovery found the service: the follow-up event connects the
        // transport within the same routed message.
        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::DiscIntRes {
                services: ServiceMask::HFP,
            },
        ))
        .unwrap();
        assert!(
            gw.callouts()
                .calls
                .contains(&CalloutCall::RfcConnect(handle, PEER))
        );
        assert!(
            gw.callouts()
                .calls
                .contains(&CalloutCall::CloseServers(handle, ServiceMask::HFP))
        );

        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::RfcOpen {
                rfc_handle: 42,
                peer_addr: PEER,
            },
        ))
        .unwrap();
        assert_eq!(gw.record(handle).unwrap().state, AgState::Open);
        assert!(gw.callouts().notifications.contains(&AgNotification::Open {
            handle,
            status: AgStatus::Success,
        }));
    }

    #[test]
    fn test_empty_discovery_fails_the_open() {
        let mut gw = enabled_gateway();
        let handle = register_one(&mut gw);
        gw.handle_message(AgMessage::to(handle, AgEvent::Open { peer_addr: PEER }))
            .unwrap();
        gw.callouts_mut().clear();

        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::DiscIntRes {
                services: ServiceMask::NONE,
            },
        ))
        .unwrap();

        assert_eq!(gw.record(handle).unwrap().state, AgState::Init);
        assert!(gw.callouts().notifications.contains(&AgNotification::Open {
            handle,
            status: AgStatus::Failed,
        }));
        assert!(
            gw.callouts()
                .calls
                .contains(&CalloutCall::StartServers(handle, ServiceMask::HFP))
        );
    }

    #[test]
    fn test_broadcast_result_reaches_only_service_connected_records() {
        let mut gw = enabled_gateway();
        let h1 = open_record(&mut gw);
        let h2 = open_record(&mut gw);
        gw.handle_message(AgMessage::to(h1, AgEvent::SlcReady))
            .unwrap();
        gw.callouts_mut().clear();

        let payload = ResultPayload { code: 2, value: 0 };
        gw.handle_message(AgMessage::to(HANDLE_ALL, AgEvent::Result(payload)))
            .unwrap();
        assert_eq!(
            gw.callouts().calls.as_slice(),
            &[CalloutCall::SendResult(h1, 2, 0)]
        );

        // A single-handle result skips the service-connection check.
        gw.callouts_mut().clear();
        gw.handle_message(AgMessage::to(h2, AgEvent::Result(payload)))
            .unwrap();
        assert_eq!(
            gw.callouts().calls.as_slice(),
            &[CalloutCall::SendResult(h2, 2, 0)]
        );
    }

    #[test]
    fn test_ring_cadence_arms_and_rearms() {
        let mut gw = enabled_gateway();
        let handle = open_record(&mut gw);

        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::Result(ResultPayload {
                code: result::IN_CALL,
                value: 0,
            }),
        ))
        .unwrap();
        let token = gw.record(handle).unwrap().timers.ring.token().unwrap();
        assert!(gw.callouts().calls.contains(&CalloutCall::SendRing(handle)));
        assert!(
            gw.callouts()
                .calls
                .contains(&CalloutCall::StartTimer(token, RING_TIMEOUT_MS))
        );

        gw.callouts_mut().clear();
        gw.handle_message(AgMessage::global(AgEvent::RingTimeout(token)))
            .unwrap();
        assert!(gw.callouts().calls.contains(&CalloutCall::SendRing(handle)));

        // Answering the call stops the cadence.
        gw.callouts_mut().clear();
        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::Result(ResultPayload {
                code: result::IN_CALL_CONN,
                value: 0,
            }),
        ))
        .unwrap();
        assert!(!gw.record(handle).unwrap().timers.ring.is_armed());
    }

    #[test]
    fn test_stale_ring_expiry_is_dropped() {
        let mut gw = enabled_gateway();
        let handle = open_record(&mut gw);
        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::Result(ResultPayload {
                code: result::IN_CALL,
                value: 0,
            }),
        ))
        .unwrap();
        let token = gw.record(handle).unwrap().timers.ring.token().unwrap();

        // Tear the record down, then deliver the expiry late.
        gw.handle_message(AgMessage::to(handle, AgEvent::Deregister))
            .unwrap();
        gw.handle_message(AgMessage::to(handle, AgEvent::RfcClose))
            .unwrap();
        assert!(gw.record(handle).is_none());
        gw.callouts_mut().clear();

        gw.handle_message(AgMessage::global(AgEvent::RingTimeout(token)))
            .unwrap();
        assert!(gw.callouts().calls.is_empty());
    }

    #[test]
    fn test_collision_aborts_and_resumes_open() {
        let mut gw = enabled_gateway();
        let handle = register_one(&mut gw);
        gw.handle_message(AgMessage::to(handle, AgEvent::Open { peer_addr: PEER }))
            .unwrap();
        gw.callouts_mut().clear();

        gw.handle_message(AgMessage::global(AgEvent::Collision {
            peer_addr: PEER,
            source: CollisionSource::Rfcomm,
        }))
        .unwrap();
        let scb = gw.record(handle).unwrap();
        assert_eq!(scb.state, AgState::Init);
        assert!(scb.disc_session.is_none());
        assert!(scb.servers_active);
        let token = scb.timers.collision.token().unwrap();
        assert!(
            gw.callouts()
                .calls
                .contains(&CalloutCall::StartTimer(token, COLLISION_TIMEOUT_MS))
        );

        gw.callouts_mut().clear();
        gw.handle_message(AgMessage::global(AgEvent::CollisionBackoff(token)))
            .unwrap();
        assert_eq!(gw.record(handle).unwrap().state, AgState::Opening);
        assert!(gw.callouts().calls.iter().any(|c| matches!(
            c,
            CalloutCall::StartDiscovery(h, addr, _) if *h == handle && *addr == PEER
        )));
    }

    #[test]
    fn test_collision_ignored_outside_opening_and_for_unknown_peer() {
        let mut gw = enabled_gateway();
        let handle = open_record(&mut gw);

        gw.handle_message(AgMessage::global(AgEvent::Collision {
            peer_addr: PEER,
            source: CollisionSource::Acl,
        }))
        .unwrap();
        assert_eq!(gw.record(handle).unwrap().state, AgState::Open);

        gw.handle_message(AgMessage::global(AgEvent::Collision {
            peer_addr: BluetoothAddress::new([9; 6]),
            source: CollisionSource::Acl,
        }))
        .unwrap();
        assert!(gw.callouts().calls.is_empty());
    }

    #[test]
    fn test_codec_negotiation_timeout_falls_back_to_cvsd() {
        let mut gw = enabled_gateway();
        let handle = open_record(&mut gw);
        gw.pool.get_mut(handle).unwrap().peer_codecs = CodecMask::CVSD_MSBC;

        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::SetCodec { codec: Codec::Msbc },
        ))
        .unwrap();
        gw.handle_message(AgMessage::to(handle, AgEvent::AudioOpen))
            .unwrap();
        let scb = gw.record(handle).unwrap();
        assert_eq!(scb.sco_codec, Codec::Msbc);
        let token = scb.timers.codec_negotiation.token().unwrap();

        gw.handle_message(AgMessage::global(AgEvent::CodecNegTimeout(token)))
            .unwrap();
        assert!(gw.record(handle).unwrap().codec_fallback);
        assert!(gw.callouts().calls.contains(&CalloutCall::ScoClose(handle)));

        // The close event completes the retry on CVSD.
        gw.callouts_mut().clear();
        gw.handle_message(AgMessage::to(handle, AgEvent::ScoClose))
            .unwrap();
        let scb = gw.record(handle).unwrap();
        assert_eq!(scb.sco_codec, Codec::Cvsd);
        assert!(!scb.codec_fallback);
        assert!(gw.callouts().calls.iter().any(|c| matches!(
            c,
            CalloutCall::ScoOpen(h, Codec::Cvsd, _) if *h == handle
        )));
    }

    #[test]
    fn test_unknown_handle_is_dropped_with_error() {
        let mut gw = enabled_gateway();
        assert_eq!(
            gw.handle_message(AgMessage::to(3, AgEvent::RfcClose)),
            Err(AgError::UnknownTarget)
        );
    }

    #[test]
    fn test_service_timeout_walks_close_path_back_to_init() {
        let mut gw = enabled_gateway();
        let handle = open_record(&mut gw);
        // An active ring cadence has to stop on the way down.
        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::Result(ResultPayload {
                code: result::IN_CALL,
                value: 0,
            }),
        ))
        .unwrap();
        let ring = gw.record(handle).unwrap().timers.ring.token().unwrap();
        gw.callouts_mut().clear();

        gw.handle_message(AgMessage::to(handle, AgEvent::SvcTimeout))
            .unwrap();
        let scb = gw.record(handle).unwrap();
        assert_eq!(scb.state, AgState::Closing);
        assert!(!scb.timers.ring.is_armed());
        assert!(gw.callouts().calls.contains(&CalloutCall::StopTimer(ring)));
        assert!(
            gw.callouts()
                .calls
                .contains(&CalloutCall::RfcDisconnect(handle))
        );

        // The transport close lands the record back in Init, still
        // registered and accepting.
        gw.callouts_mut().clear();
        gw.handle_message(AgMessage::to(handle, AgEvent::RfcClose))
            .unwrap();
        let scb = gw.record(handle).unwrap();
        assert_eq!(scb.state, AgState::Init);
        assert_eq!(scb.rfc_handle, 0);
        assert!(scb.servers_active);
        assert!(
            gw.callouts()
                .calls
                .contains(&CalloutCall::StartServers(handle, ServiceMask::HFP))
        );
        assert!(
            gw.callouts()
                .notifications
                .contains(&AgNotification::Close { handle })
        );
    }

    #[test]
    fn test_collision_after_disable_is_ignored() {
        let mut gw = enabled_gateway();
        let handle = open_record(&mut gw);

        gw.handle_message(AgMessage::global(AgEvent::Disable))
            .unwrap();
        assert_eq!(gw.record(handle).unwrap().state, AgState::Closing);
        assert!(!gw.collision_registered);
        gw.callouts_mut().clear();

        gw.handle_message(AgMessage::global(AgEvent::Collision {
            peer_addr: PEER,
            source: CollisionSource::Acl,
        }))
        .unwrap();
        assert_eq!(gw.record(handle).unwrap().state, AgState::Closing);
        assert!(gw.callouts().calls.is_empty());
    }

    #[test]
    fn test_hsp_audio_opens_on_cvsd_without_negotiation() {
        let mut gw = enabled_gateway();
        gw.handle_message(AgMessage::global(AgEvent::Register(RegisterPayload {
            services: ServiceMask::HSP,
            features: 0,
        })))
        .unwrap();
        let handle = match gw.callouts().notifications.last() {
            Some(AgNotification::Register { handle, .. }) => *handle,
            other => panic!("expected register notification, got {other:?}"),
        };
        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::RfcOpen {
                rfc_handle: 44,
                peer_addr: PEER,
            },
        ))
        .unwrap();
        // Even with an mSBC preference on record, HSP stays on CVSD.
        gw.pool.get_mut(handle).unwrap().peer_codecs = CodecMask::CVSD_MSBC;
        gw.handle_message(AgMessage::to(
            handle,
            AgEvent::SetCodec { codec: Codec::Msbc },
        ))
        .unwrap();
        gw.callouts_mut().clear();

        gw.handle_message(AgMessage::to(handle, AgEvent::AudioOpen))
            .unwrap();
        assert!(
            !gw.record(handle)
                .unwrap()
                .timers
                .codec_negotiation
                .is_armed()
        );
        assert!(gw.callouts().calls.iter().any(|c| matches!(
            c,
            CalloutCall::ScoOpen(h, Codec::Cvsd, _) if *h == handle
        )));
        assert!(
            !gw.callouts()
                .calls
                .iter()
                .any(|c| matches!(c, CalloutCall::StartTimer(..)))
        );
    }

    #[test]
    fn test_incoming_open_moves_deferred_retry_to_idle_record() {
        const OTHER: BluetoothAddress =
            BluetoothAddress::new([0xA0, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let mut gw = enabled_gateway();
        let h1 = register_one(&mut gw);
        let h2 = register_one(&mut gw);

        // h1 dials out, collides and backs off with a retry pending.
        gw.handle_message(AgMessage::to(h1, AgEvent::Open { peer_addr: PEER }))
            .unwrap();
        gw.handle_message(AgMessage::global(AgEvent::Collision {
            peer_addr: PEER,
            source: CollisionSource::Rfcomm,
        }))
        .unwrap();
        assert!(gw.record(h1).unwrap().timers.collision.is_armed());
        gw.callouts_mut().clear();

        // A different device claims h1 before the back-off fires.
        gw.handle_message(AgMessage::to(
            h1,
            AgEvent::RfcOpen {
                rfc_handle: 51,
                peer_addr: OTHER,
            },
        ))
        .unwrap();

        let scb = gw.record(h1).unwrap();
        assert_eq!(scb.state, AgState::Open);
        assert_eq!(scb.peer_addr, Some(OTHER));
        assert!(!scb.timers.collision.is_armed());
        // The interrupted attempt migrated to the idle record.
        assert_eq!(gw.record(h2).unwrap().state, AgState::Opening);
        assert!(gw.callouts().calls.iter().any(|c| matches!(
            c,
            CalloutCall::StartDiscovery(h, addr, _) if *h == h2 && *addr == PEER
        )));
    }

    #[test]
    fn test_passthrough_mode_forwards_raw_data() {
        let mut gw = AudioGateway::new(RecordingCallouts::new());
        gw.handle_message(AgMessage::global(AgEvent::Enable {
            parse_mode: ParseMode::Passthrough,
        }))
        .unwrap();
        let handle = open_record(&mut gw);

        let data = Vec::from_slice(b"AT+BRSF=191\r").unwrap();
        gw.handle_message(AgMessage::to(handle, AgEvent::RfcData(data)))
            .unwrap();
        assert!(gw.callouts().calls.iter().any(|c| matches!(
            c,
            CalloutCall::ForwardRx(h, d) if *h == handle && d.as_slice() == b"AT+BRSF=191\r"
        )));
    }
}
