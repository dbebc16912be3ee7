//! Call-outs from the gateway to its collaborators
//!
//! The state machine never talks to a transport, a voice channel or a timer
//! service directly. Every outward effect goes through the [`Callouts`]
//! trait, which the integration implements over its actual RFCOMM, SCO,
//! discovery and timer plumbing. Call-outs must not re-enter the gateway
//! synchronously; anything a collaborator wants to report comes back as an
//! [`AgEvent`](crate::AgEvent) posted into the serialized stream.

use crate::scb::{Codec, DiscoverySession, MsbcSettings};
use crate::timer::TimerToken;
use crate::{AgNotification, BluetoothAddress, ServiceMask};

/// Outward interface of the gateway.
///
/// Implementations hold whatever state their transport and timer services
/// need; the gateway only ever borrows them mutably for the duration of one
/// dispatched event.
pub trait Callouts {
    /// One-time setup when the gateway is enabled
    fn init(&mut self);

    /// Deliver a lifecycle notification to the application
    fn notify(&mut self, notification: AgNotification);

    /// Bring up the transport servers that accept peer connections for the
    /// given services
    fn start_servers(&mut self, handle: u16, services: ServiceMask);

    /// Tear down the record's transport servers
    fn close_servers(&mut self, handle: u16, services: ServiceMask);

    /// Start an outgoing transport connection to the peer
    fn rfc_connect(&mut self, handle: u16, peer_addr: BluetoothAddress);

    /// Close the record's transport connection
    fn rfc_disconnect(&mut self, handle: u16);

    /// Transmit raw data over the transport connection
    fn rfc_send(&mut self, handle: u16, data: &[u8]);

    /// Hand received transport data to the command processor
    fn parse_rx(&mut self, handle: u16, data: &[u8]);

    /// Deliver received transport data to the application unparsed
    /// (pass-through parse mode)
    fn forward_rx(&mut self, handle: u16, data: &[u8]);

    /// Send a protocol result code to the peer
    fn send_result(&mut self, handle: u16, code: u8, value: u16);

    /// Send one RING to the peer
    fn send_ring(&mut self, handle: u16);

    /// Start listening for a peer-initiated voice channel
    fn sco_listen(&mut self, handle: u16);

    /// Open the voice channel with the given codec
    fn sco_open(&mut self, handle: u16, codec: Codec, settings: MsbcSettings);

    /// Close the record's voice channel
    fn sco_close(&mut self, handle: u16);

    /// Fully shut down the record's voice channel, including the listener
    fn sco_shutdown(&mut self, handle: u16);

    /// Voice data is ready for the record's channel
    fn sco_data(&mut self, handle: u16);

    /// Start service discovery on the peer; the returned session identifies
    /// the operation for a later cancel
    fn start_discovery(
        &mut self,
        handle: u16,
        peer_addr: BluetoothAddress,
        services: ServiceMask,
    ) -> DiscoverySession;

    /// Cancel an outstanding discovery operation
    fn cancel_discovery(&mut self, session: DiscoverySession);

    /// Start a countdown of `ms` milliseconds; on expiry the timer service
    /// posts the matching timer event carrying `token`
    fn start_timer(&mut self, token: TimerToken, ms: u32);

    /// Stop the countdown identified by `token`, if still running
    fn stop_timer(&mut self, token: TimerToken);
}

#[cfg(test)]
pub(crate) mod recording {
    //! A call-out recorder shared by the crate's tests

    use super::*;
    use heapless::Vec;

    /// One recorded call-out
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum CalloutCall {
        Init,
        StartServers(u16, ServiceMask),
        CloseServers(u16, ServiceMask),
        RfcConnect(u16, BluetoothAddress),
        RfcDisconnect(u16),
        RfcSend(u16, Vec<u8, 64>),
        ParseRx(u16, Vec<u8, 64>),
        ForwardRx(u16, Vec<u8, 64>),
        SendResult(u16, u8, u16),
        SendRing(u16),
        ScoListen(u16),
        ScoOpen(u16, Codec, MsbcSettings),
        ScoClose(u16),
        ScoShutdown(u16),
        ScoData(u16),
        StartDiscovery(u16, BluetoothAddress, ServiceMask),
        CancelDiscovery(DiscoverySession),
        StartTimer(TimerToken, u32),
        StopTimer(TimerToken),
    }

    /// Records every call-out and notification for later assertions
    #[derive(Debug, Default)]
    pub struct RecordingCallouts {
        pub calls: Vec<CalloutCall, 64>,
        pub notifications: Vec<AgNotification, 32>,
        next_session: u16,
    }

    impl RecordingCallouts {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn clear(&mut self) {
            self.calls.clear();
            self.notifications.clear();
        }

        fn record(&mut self, call: CalloutCall) {
            self.calls.push(call).unwrap();
        }
    }

    impl Callouts for RecordingCallouts {
        fn init(&mut self) {
            self.record(CalloutCall::Init);
        }

        fn notify(&mut self, notification: AgNotification) {
            self.notifications.push(notification).unwrap();
        }

        fn start_servers(&mut self, handle: u16, services: ServiceMask) {
            self.record(CalloutCall::StartServers(handle, services));
        }

        fn close_servers(&mut self, handle: u16, services: ServiceMask) {
            self.record(CalloutCall::CloseServers(handle, services));
        }

        fn rfc_connect(&mut self, handle: u16, peer_addr: BluetoothAddress) {
            self.record(CalloutCall::RfcConnect(handle, peer_addr));
        }

        fn rfc_disconnect(&mut self, handle: u16) {
            self.record(CalloutCall::RfcDisconnect(handle));
        }

        fn rfc_send(&mut self, handle: u16, data: &[u8]) {
            let data = Vec::from_slice(data).unwrap();
            self.record(CalloutCall::RfcSend(handle, data));
        }

        fn parse_rx(&mut self, handle: u16, data: &[u8]) {
            let data = Vec::from_slice(data).unwrap();
            self.record(CalloutCall::ParseRx(handle, data));
        }

        fn forward_rx(&mut self, handle: u16, data: &[u8]) {
            let data = Vec::from_slice(data).unwrap();
            self.record(CalloutCall::ForwardRx(handle, data));
        }

        fn send_result(&mut self, handle: u16, code: u8, value: u16) {
            self.record(CalloutCall::SendResult(handle, code, value));
        }

        fn send_ring(&mut self, handle: u16) {
            self.record(CalloutCall::SendRing(handle));
        }

        fn sco_listen(&mut self, handle: u16) {
            self.record(CalloutCall::ScoListen(handle));
        }

        fn sco_open(&mut self, handle: u16, codec: Codec, settings: MsbcSettings) {
            self.record(CalloutCall::ScoOpen(handle, codec, settings));
        }

        fn sco_close(&mut self, handle: u16) {
            self.record(CalloutCall::ScoClose(handle));
        }

        fn sco_shutdown(&mut self, handle: u16) {
            self.record(CalloutCall::ScoShutdown(handle));
        }

        fn sco_data(&mut self, handle: u16) {
            self.record(CalloutCall::ScoData(handle));
        }

        fn start_discovery(
            &mut self,
            handle: u16,
            peer_addr: BluetoothAddress,
            services: ServiceMask,
        ) -> DiscoverySession {
            self.record(CalloutCall::StartDiscovery(handle, peer_addr, services));
            self.next_session += 1;
            DiscoverySession(self.next_session)
        }

        fn cancel_discovery(&mut self, session: DiscoverySession) {
            self.record(CalloutCall::CancelDiscovery(session));
        }

        fn start_timer(&mut self, token: TimerToken, ms: u32) {
            self.record(CalloutCall::StartTimer(token, ms));
        }

        fn stop_timer(&mut self, token: TimerToken) {
            self.record(CalloutCall::StopTimer(token));
        }
    }
}
