//! `hfp-ag` Constants
//!
//! This module contains all the constants used throughout the `hfp-ag`
//! library: pool sizing, sentinel values and the protocol timeouts of the
//! Audio Gateway role.

/// Number of connection records in the fixed pool, i.e. the maximum number
/// of simultaneously registered AG service instances.
pub const MAX_SCBS: usize = 4;

/// Handle value addressing every service-connected record at once in an
/// application `Result` event.
pub const HANDLE_ALL: u16 = 0xFFFF;

/// Sentinel for "no voice channel": a record whose `sco_index` equals this
/// value owns no SCO link.
pub const INVALID_SCO_INDEX: u16 = 0xFFFF;

/// Back-off before retrying a connection attempt aborted by a collision,
/// in milliseconds.
pub const COLLISION_TIMEOUT_MS: u32 = 2000;

/// In-band ring cadence: interval between RING bursts sent to the peer,
/// in milliseconds.
pub const RING_TIMEOUT_MS: u32 = 5000;

/// Deadline for the peer to answer a codec negotiation before the AG falls
/// back to CVSD, in milliseconds.
pub const CODEC_NEGOTIATION_TIMEOUT_MS: u32 = 3000;

/// Maximum number of bytes carried by one transport data event.
pub const MAX_RFC_DATA: usize = 256;

/// Capacity of the pending-event queue actions post follow-up events into.
pub const MAX_PENDING_EVENTS: usize = 8;

/// Depth of the inbound event channel feeding the processing loop.
pub const EVENT_CHANNEL_DEPTH: usize = 16;

/// Depth of the out-of-band collision notification channel.
pub const COLLISION_CHANNEL_DEPTH: usize = 4;
