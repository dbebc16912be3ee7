//! AG events and messages
//!
//! [`AgEvent`] is the tagged union every layer posts into the gateway:
//! application requests, transport call-ins, voice-channel call-ins,
//! discovery results and timer expirations. Table-driven events map onto
//! the contiguous [`EventKind`] enumeration that indexes the transition
//! tables; the gateway-wide events (`Enable`, `Disable`, `Collision`, the
//! back-off and codec timers) are routed before the tables and have no
//! kind.

use crate::collision::CollisionSource;
use crate::constants::MAX_RFC_DATA;
use crate::scb::Codec;
use crate::timer::TimerToken;
use crate::{BluetoothAddress, ParseMode, ServiceMask};
use heapless::Vec;

/// Number of table-driven event kinds; every transition table has exactly
/// this many rows.
pub const NUM_EVENT_KINDS: usize = 23;

/// Contiguous enumeration of the table-driven events. The discriminants
/// index the transition tables directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum EventKind {
    /// Application registers a new service instance
    ApiRegister = 0,
    /// Application deregisters a service instance
    ApiDeregister = 1,
    /// Application requests a connection to a peer
    ApiOpen = 2,
    /// Application requests closing the connection
    ApiClose = 3,
    /// Application requests opening the voice channel
    ApiAudioOpen = 4,
    /// Application requests closing the voice channel
    ApiAudioClose = 5,
    /// Application supplies a protocol result
    ApiResult = 6,
    /// Application selects a voice codec
    ApiSetCodec = 7,
    /// Transport connection opened
    RfcOpen = 8,
    /// Transport connection closed
    RfcClose = 9,
    /// Transport server closed
    RfcSrvClose = 10,
    /// Transport data received
    RfcData = 11,
    /// Voice channel opened
    ScoOpen = 12,
    /// Voice channel closed
    ScoClose = 13,
    /// Discovery result, peer-initiated connection
    DiscAcpRes = 14,
    /// Discovery result, locally-initiated connection
    DiscIntRes = 15,
    /// Discovery succeeded
    DiscOk = 16,
    /// Discovery failed
    DiscFail = 17,
    /// Pass-through data ready to transmit
    RxWrite = 18,
    /// Ring cadence timer expired
    RingTimeout = 19,
    /// Service-level connection setup timed out
    SvcTimeout = 20,
    /// Voice data call-in
    ScoData = 21,
    /// Service-level connection ready (pass-through parse mode)
    SlcReady = 22,
}

impl EventKind {
    /// Convert a raw event kind, rejecting values outside the table
    /// enumeration.
    ///
    /// # Errors
    /// Returns `AgError::EventOutOfRange` for kinds no table row exists for.
    pub fn from_raw(raw: u8) -> Result<Self, crate::AgError> {
        Ok(match raw {
            0 => Self::ApiRegister,
            1 => Self::ApiDeregister,
            2 => Self::ApiOpen,
            3 => Self::ApiClose,
            4 => Self::ApiAudioOpen,
            5 => Self::ApiAudioClose,
            6 => Self::ApiResult,
            7 => Self::ApiSetCodec,
            8 => Self::RfcOpen,
            9 => Self::RfcClose,
            10 => Self::RfcSrvClose,
            11 => Self::RfcData,
            12 => Self::ScoOpen,
            13 => Self::ScoClose,
            14 => Self::DiscAcpRes,
            15 => Self::DiscIntRes,
            16 => Self::DiscOk,
            17 => Self::DiscFail,
            18 => Self::RxWrite,
            19 => Self::RingTimeout,
            20 => Self::SvcTimeout,
            21 => Self::ScoData,
            22 => Self::SlcReady,
            _ => return Err(crate::AgError::EventOutOfRange),
        })
    }
}

/// Protocol result codes with connection-lifecycle side effects. All other
/// codes pass through this core opaquely.
pub mod result {
    /// Incoming call: starts the in-band ring cadence
    pub const IN_CALL: u8 = 11;
    /// Incoming call answered: stops the ring cadence
    pub const IN_CALL_CONN: u8 = 12;
    /// Incoming call canceled: stops the ring cadence
    pub const CALL_CANCEL: u8 = 17;
    /// Call terminated: stops the ring cadence
    pub const END_CALL: u8 = 18;
}

/// Payload of a registration request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegisterPayload {
    /// Services the record will listen for
    pub services: ServiceMask,
    /// Profile feature bits, passed through to the command layer
    pub features: u32,
}

/// Payload of an application protocol result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ResultPayload {
    /// Opaque result code (see [`result`] for the codes this core reacts to)
    pub code: u8,
    /// Opaque numeric argument
    pub value: u16,
}

/// Every event the gateway consumes
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AgEvent {
    /// Enable the gateway
    Enable {
        /// Parse mode for received transport data
        parse_mode: ParseMode,
    },
    /// Disable the gateway and release every record
    Disable,
    /// Register a new service instance (allocates a record)
    Register(RegisterPayload),
    /// Deregister the target record
    Deregister,
    /// Connect to a peer
    Open {
        /// Peer device address
        peer_addr: BluetoothAddress,
    },
    /// Close the connection
    Close,
    /// Open the voice channel
    AudioOpen,
    /// Close the voice channel
    AudioClose,
    /// Application protocol result, targeted or broadcast via
    /// [`HANDLE_ALL`](crate::constants::HANDLE_ALL)
    Result(ResultPayload),
    /// Select the voice codec
    SetCodec {
        /// Requested codec
        codec: Codec,
    },
    /// Transport connection opened
    RfcOpen {
        /// Transport session handle
        rfc_handle: u16,
        /// Peer the transport connected to
        peer_addr: BluetoothAddress,
    },
    /// Transport connection closed
    RfcClose,
    /// Transport server closed
    RfcSrvClose,
    /// Transport data received
    RfcData(Vec<u8, MAX_RFC_DATA>),
    /// Voice channel opened
    ScoOpen {
        /// Index of the voice channel that opened
        sco_index: u16,
    },
    /// Voice channel closed
    ScoClose,
    /// Discovery result for a peer-initiated connection
    DiscAcpRes {
        /// Services the peer supports
        services: ServiceMask,
    },
    /// Discovery result for a locally-initiated connection
    DiscIntRes {
        /// Services the peer supports
        services: ServiceMask,
    },
    /// Discovery completed successfully
    DiscOk,
    /// Discovery failed
    DiscFail,
    /// Pass-through data ready to transmit to the peer
    RxWrite(Vec<u8, MAX_RFC_DATA>),
    /// Ring cadence timer expired
    RingTimeout(TimerToken),
    /// Service-level connection setup timed out. Posted by the external
    /// command layer, which owns that timer; no token to validate.
    SvcTimeout,
    /// Voice data call-in
    ScoData,
    /// Service-level connection ready. Posted by the command processor once
    /// the setup handshake finishes, or by the application in pass-through
    /// parse mode
    SlcReady,
    /// Connection-attempt collision notification
    Collision {
        /// Peer both sides tried to connect to/from
        peer_addr: BluetoothAddress,
        /// Layer that detected the collision
        source: CollisionSource,
    },
    /// Collision back-off timer expired; resume the interrupted attempt
    CollisionBackoff(TimerToken),
    /// Codec negotiation deadline expired; fall back to CVSD
    CodecNegTimeout(TimerToken),
}

impl AgEvent {
    /// The table index of this event, or `None` for gateway-wide events
    /// that are routed before the transition tables.
    #[must_use]
    pub fn kind(&self) -> Option<EventKind> {
        Some(match self {
            AgEvent::Register(_) => EventKind::ApiRegister,
            AgEvent::Deregister => EventKind::ApiDeregister,
            AgEvent::Open { .. } => EventKind::ApiOpen,
            AgEvent::Close => EventKind::ApiClose,
            AgEvent::AudioOpen => EventKind::ApiAudioOpen,
            AgEvent::AudioClose => EventKind::ApiAudioClose,
            AgEvent::Result(_) => EventKind::ApiResult,
            AgEvent::SetCodec { .. } => EventKind::ApiSetCodec,
            AgEvent::RfcOpen { .. } => EventKind::RfcOpen,
            AgEvent::RfcClose => EventKind::RfcClose,
            AgEvent::RfcSrvClose => EventKind::RfcSrvClose,
            AgEvent::RfcData(_) => EventKind::RfcData,
            AgEvent::ScoOpen { .. } => EventKind::ScoOpen,
            AgEvent::ScoClose => EventKind::ScoClose,
            AgEvent::DiscAcpRes { .. } => EventKind::DiscAcpRes,
            AgEvent::DiscIntRes { .. } => EventKind::DiscIntRes,
            AgEvent::DiscOk => EventKind::DiscOk,
            AgEvent::DiscFail => EventKind::DiscFail,
            AgEvent::RxWrite(_) => EventKind::RxWrite,
            AgEvent::RingTimeout(_) => EventKind::RingTimeout,
            AgEvent::SvcTimeout => EventKind::SvcTimeout,
            AgEvent::ScoData => EventKind::ScoData,
            AgEvent::SlcReady => EventKind::SlcReady,
            AgEvent::Enable { .. }
            | AgEvent::Disable
            | AgEvent::Collision { .. }
            | AgEvent::CollisionBackoff(_)
            | AgEvent::CodecNegTimeout(_) => return None,
        })
    }

    /// Human-readable event name for the debug logging path
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            AgEvent::Enable { .. } => "Enable AG",
            AgEvent::Disable => "Disable AG",
            AgEvent::Register(_) => "Register Request",
            AgEvent::Deregister => "Deregister Request",
            AgEvent::Open { .. } => "Open SLC Request",
            AgEvent::Close => "Close SLC Request",
            AgEvent::AudioOpen => "Open Audio Request",
            AgEvent::AudioClose => "Close Audio Request",
            AgEvent::Result(_) => "AT Result",
            AgEvent::SetCodec { .. } => "Set Codec Request",
            AgEvent::RfcOpen { .. } => "RFC Opened",
            AgEvent::RfcClose => "RFC Closed",
            AgEvent::RfcSrvClose => "RFC SRV Closed",
            AgEvent::RfcData(_) => "RFC Data",
            AgEvent::ScoOpen { .. } => "Audio Opened",
            AgEvent::ScoClose => "Audio Closed",
            AgEvent::DiscAcpRes { .. } => "Discovery ACP Result",
            AgEvent::DiscIntRes { .. } => "Discovery INT Result",
            AgEvent::DiscOk => "Discovery OK",
            AgEvent::DiscFail => "Discovery Failed",
            AgEvent::RxWrite(_) => "RX Write",
            AgEvent::RingTimeout(_) => "Ring Timeout",
            AgEvent::SvcTimeout => "Service Timeout",
            AgEvent::ScoData => "SCO Data Call-in",
            AgEvent::SlcReady => "SLC Ready Call-in",
            AgEvent::Collision { .. } => "Collision",
            AgEvent::CollisionBackoff(_) => "Collision Back-off",
            AgEvent::CodecNegTimeout(_) => "Codec Negotiation Timeout",
        }
    }
}

/// An event together with its target record
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AgMessage {
    /// Target record handle; 0 for gateway-wide events,
    /// [`HANDLE_ALL`](crate::constants::HANDLE_ALL) for a broadcast result
    pub handle: u16,
    /// The event itself
    pub event: AgEvent,
}

impl AgMessage {
    /// Message targeted at one record
    #[must_use]
    pub fn to(handle: u16, event: AgEvent) -> Self {
        Self { handle, event }
    }

    /// Gateway-wide message not bound to a record
    #[must_use]
    pub fn global(event: AgEvent) -> Self {
        Self { handle: 0, event }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_is_contiguous() {
        for raw in 0..NUM_EVENT_KINDS as u8 {
            let kind = EventKind::from_raw(raw).unwrap();
            assert_eq!(kind as u8, raw);
        }
    }

    #[test]
    fn test_from_raw_rejects_out_of_range() {
        assert_eq!(
            EventKind::from_raw(NUM_EVENT_KINDS as u8),
            Err(crate::AgError::EventOutOfRange)
        );
        assert_eq!(
            EventKind::from_raw(0xFF),
            Err(crate::AgError::EventOutOfRange)
        );
    }

    #[test]
    fn test_global_events_have_no_kind() {
        assert_eq!(
            AgEvent::Enable {
                parse_mode: ParseMode::Full
            }
            .kind(),
            None
        );
        assert_eq!(AgEvent::Disable.kind(), None);
        assert_eq!(
            AgEvent::Collision {
                peer_addr: BluetoothAddress::new([0; 6]),
                source: CollisionSource::Acl,
            }
            .kind(),
            None
        );
    }

    #[test]
    fn test_targeted_events_map_to_their_row() {
        assert_eq!(AgEvent::Deregister.kind(), Some(EventKind::ApiDeregister));
        assert_eq!(
            AgEvent::RfcOpen {
                rfc_handle: 7,
                peer_addr: BluetoothAddress::new([1; 6]),
            }
            .kind(),
            Some(EventKind::RfcOpen)
        );
        assert_eq!(AgEvent::SlcReady.kind(), Some(EventKind::SlcReady));
    }

    #[test]
    fn test_message_constructors() {
        let msg = AgMessage::to(2, AgEvent::Close);
        assert_eq!(msg.handle, 2);
        let msg = AgMessage::global(AgEvent::Disable);
        assert_eq!(msg.handle, 0);
    }
}
