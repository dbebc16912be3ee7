#![no_std]
#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

// This mod MUST go first, so that the others see its macros.
#[macro_use]
mod fmt;

mod address;
pub mod callout;
pub mod collision;
pub mod constants;
pub mod event;
pub mod processor;
pub mod router;
pub mod scb;
pub mod sm;
pub mod timer;

pub use address::BluetoothAddress;
pub use callout::Callouts;
pub use event::{AgEvent, AgMessage, EventKind};
pub use router::AudioGateway;
pub use scb::{Codec, CodecMask, MsbcSettings, Scb, ScbPool};
pub use sm::AgState;
pub use timer::{TimerKind, TimerToken};

/// AG errors reported by the router and the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AgError {
    /// Every connection record is in use; the registration was rejected
    /// without touching any existing record
    ResourceExhausted,
    /// The event's handle or peer address does not resolve to an in-use
    /// record; the event was dropped
    UnknownTarget,
    /// A device address string or byte slice is malformed
    InvalidAddress,
    /// The raw event kind is outside the table enumeration; the event was
    /// rejected before table lookup
    EventOutOfRange,
    /// Disable was requested while the gateway is not enabled
    AlreadyDisabled,
}

/// Status delivered with registration and connection notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AgStatus {
    /// The operation succeeded
    Success,
    /// The operation failed
    Failed,
    /// The operation failed because the record pool is exhausted
    OutOfResources,
}

/// Notifications delivered to the application layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AgNotification {
    /// The gateway is enabled and ready for registrations
    Enabled,
    /// The gateway is disabled and every record has been released.
    /// Emitted exactly once per disable
    Disabled,
    /// Outcome of a service registration; `handle` is 0 when no record
    /// could be allocated
    Register {
        /// Record handle, 0 on allocation failure
        handle: u16,
        /// Registration outcome
        status: AgStatus,
    },
    /// Outcome of a service-level connection attempt
    Open {
        /// Record handle
        handle: u16,
        /// Connection outcome
        status: AgStatus,
    },
    /// The signaling connection to the peer closed
    Close {
        /// Record handle
        handle: u16,
    },
    /// The service-level connection is fully established
    Connected {
        /// Record handle
        handle: u16,
    },
    /// The voice channel opened
    AudioOpen {
        /// Record handle
        handle: u16,
    },
    /// The voice channel closed
    AudioClose {
        /// Record handle
        handle: u16,
    },
}

/// How received transport data is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ParseMode {
    /// The external command processor parses AT commands on behalf of the
    /// application
    #[default]
    Full,
    /// Received data is passed through to the application unparsed; the
    /// application signals SLC establishment itself via the SLC-ready
    /// call-in
    Passthrough,
}

/// Options for configuring an [`AudioGateway`] instance
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AgOptions {
    /// Parse mode installed at enable time and read by every subsequent
    /// dispatch
    pub parse_mode: ParseMode,
}

/// Bit mask of the AG services a record is registered for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ServiceMask(u8);

impl ServiceMask {
    /// No services
    pub const NONE: ServiceMask = ServiceMask(0);
    /// Headset Profile service
    pub const HSP: ServiceMask = ServiceMask(0x01);
    /// Hands-Free Profile service
    pub const HFP: ServiceMask = ServiceMask(0x02);

    /// Create a mask from raw bits
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw bits of the mask
    #[must_use]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether every service in `other` is present in this mask
    #[must_use]
    pub const fn contains(self, other: ServiceMask) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether the mask holds no services
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Union of two masks
    #[must_use]
    pub const fn union(self, other: ServiceMask) -> ServiceMask {
        ServiceMask(self.0 | other.0)
    }

    /// The profile a record with this mask operates as. HFP wins when both
    /// services are registered.
    #[must_use]
    pub const fn profile(self) -> Profile {
        if self.contains(ServiceMask::HFP) {
            Profile::Hfp
        } else {
            Profile::Hsp
        }
    }
}

/// AG profile selected by a record's service mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Profile {
    /// Hands-Free Profile
    Hfp,
    /// Headset Profile
    Hsp,
}
