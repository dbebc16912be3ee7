//! Connection records and the fixed record pool
//!
//! One [`Scb`] (service control block) exists per potential peer
//! connection. Records live in a fixed pool of [`MAX_SCBS`] slots; handles
//! are 1-based slot positions, stable while the record stays allocated and
//! recycled afterwards. Each slot carries a generation counter bumped at
//! deallocation, which is what lets stale timer tokens be told apart from
//! live ones.

use crate::AgError;
use crate::BluetoothAddress;
use crate::ServiceMask;
use crate::constants::{INVALID_SCO_INDEX, MAX_SCBS};
use crate::sm::AgState;
use crate::timer::{TimerSet, TimerToken};
use heapless::Vec;

/// Voice codec of the synchronous channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Codec {
    /// CVSD, mandatory baseline codec
    #[default]
    Cvsd,
    /// mSBC wide-band codec
    Msbc,
}

/// Bit mask of codecs a peer supports. CVSD is always present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CodecMask(u8);

impl CodecMask {
    /// CVSD only
    pub const CVSD: CodecMask = CodecMask(0x01);
    /// CVSD and mSBC
    pub const CVSD_MSBC: CodecMask = CodecMask(0x03);

    /// Whether the mask includes the given codec
    #[must_use]
    pub const fn supports(self, codec: Codec) -> bool {
        match codec {
            Codec::Cvsd => self.0 & 0x01 != 0,
            Codec::Msbc => self.0 & 0x02 != 0,
        }
    }
}

impl Default for CodecMask {
    fn default() -> Self {
        Self::CVSD
    }
}

/// eSCO parameter set used for mSBC voice channels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum MsbcSettings {
    /// Safe settings, fallback
    T1,
    /// Preferred settings
    #[default]
    T2,
}

/// Opaque handle of an outstanding discovery operation, issued by the
/// discovery collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoverySession(pub u16);

/// One per-peer connection record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scb {
    /// Pool handle, 1-based, stable while allocated
    pub handle: u16,
    /// Pool generation this record was allocated under
    pub generation: u16,
    /// Current connection state
    pub state: AgState,
    /// Peer device address, set once a connection attempt targets a peer
    pub peer_addr: Option<BluetoothAddress>,
    /// Transport session handle, 0 while no transport connection exists
    pub rfc_handle: u16,
    /// Voice channel index, [`INVALID_SCO_INDEX`] while no channel exists
    pub sco_index: u16,
    /// Codecs the peer supports
    pub peer_codecs: CodecMask,
    /// Codec selected for the next voice channel
    pub sco_codec: Codec,
    /// The application changed the codec since the last voice channel
    pub codec_updated: bool,
    /// A failed mSBC negotiation requires retrying with CVSD
    pub codec_fallback: bool,
    /// Preferred eSCO parameter set for mSBC
    pub msbc_settings: MsbcSettings,
    /// Services this record is registered for
    pub services: ServiceMask,
    /// Profile feature bits supplied at registration
    pub features: u32,
    /// Whether the record's listening servers are currently up
    pub servers_active: bool,
    /// Whether the service-level connection is established
    pub svc_conn: bool,
    /// Deregistration in progress; deallocate once the transport closes
    pub dereg: bool,
    /// Outstanding discovery operation, if any
    pub disc_session: Option<DiscoverySession>,
    /// The record's three deadline timers
    pub timers: TimerSet,
}

impl Scb {
    fn new(handle: u16, generation: u16) -> Self {
        Self {
            handle,
            generation,
            state: AgState::Init,
            peer_addr: None,
            rfc_handle: 0,
            sco_index: INVALID_SCO_INDEX,
            peer_codecs: CodecMask::CVSD,
            sco_codec: Codec::Cvsd,
            codec_updated: false,
            codec_fallback: false,
            msbc_settings: MsbcSettings::T2,
            services: ServiceMask::NONE,
            features: 0,
            servers_active: false,
            svc_conn: false,
            dereg: false,
            disc_session: None,
            timers: TimerSet::new(),
        }
    }

    /// Whether the record currently owns a voice channel
    #[must_use]
    pub fn has_sco(&self) -> bool {
        self.sco_index != INVALID_SCO_INDEX
    }
}

#[derive(Debug)]
struct Slot {
    generation: u16,
    scb: Option<Scb>,
}

impl Slot {
    const EMPTY: Slot = Slot {
        generation: 0,
        scb: None,
    };
}

/// Fixed-capacity pool of connection records
#[derive(Debug)]
pub struct ScbPool {
    slots: [Slot; MAX_SCBS],
}

impl ScbPool {
    /// Create an empty pool
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [Slot::EMPTY; MAX_SCBS],
        }
    }

    /// Allocate the first free record, initialized to defaults (state
    /// `Init`, CVSD codec, T2 eSCO settings, no voice channel).
    ///
    /// # Errors
    /// Returns `AgError::ResourceExhausted` when every slot is in use; no
    /// existing record is touched in that case.
    pub fn allocate(&mut self) -> Result<&mut Scb, AgError> {
        let Some(idx) = self.slots.iter().position(|s| s.scb.is_none()) else {
            warn!("ag: out of scbs");
            return Err(AgError::ResourceExhausted);
        };
        let slot = &mut self.slots[idx];
        let handle = idx as u16 + 1;
        debug!("ag: allocated scb {}", handle);
        Ok(slot.scb.insert(Scb::new(handle, slot.generation)))
    }

    /// Release the record: cancel its timers, clear the slot and bump the
    /// slot generation so outstanding timer tokens go stale. Returns the
    /// canceled tokens so the caller can stop the external timers.
    /// Deallocating a vacant or out-of-range handle is a no-op.
    pub fn deallocate(&mut self, handle: u16) -> Vec<TimerToken, 3> {
        let mut tokens = Vec::new();
        if handle == 0 || handle as usize > MAX_SCBS {
            return tokens;
        }
        let slot = &mut self.slots[handle as usize - 1];
        if let Some(mut scb) = slot.scb.take() {
            tokens = scb.timers.cancel_all();
            slot.generation = slot.generation.wrapping_add(1);
            debug!("ag: deallocated scb {}", handle);
        }
        tokens
    }

    /// Look up a record by handle. Out-of-range handles and vacant slots
    /// both yield `None`; they are distinguished only in the logs.
    #[must_use]
    pub fn get(&self, handle: u16) -> Option<&Scb> {
        if handle == 0 || handle as usize > MAX_SCBS {
            debug!("ag: scb handle {} out of range", handle);
            return None;
        }
        let scb = self.slots[handle as usize - 1].scb.as_ref();
        if scb.is_none() {
            warn!("ag: scb {} not allocated", handle);
        }
        scb
    }

    /// Mutable record lookup; same resolution rules as [`Self::get`]
    pub fn get_mut(&mut self, handle: u16) -> Option<&mut Scb> {
        if handle == 0 || handle as usize > MAX_SCBS {
            return None;
        }
        self.slots[handle as usize - 1].scb.as_mut()
    }

    /// Find the in-use record connected to (or connecting to) the peer
    #[must_use]
    pub fn lookup_by_peer(&self, peer_addr: BluetoothAddress) -> Option<u16> {
        self.slots
            .iter()
            .enumerate()
            .find(|(_, slot)| {
                slot.scb
                    .as_ref()
                    .is_some_and(|scb| scb.peer_addr == Some(peer_addr))
            })
            .map(|(idx, _)| idx as u16 + 1)
    }

    /// Whether any record other than `excluding` is in the `Open` state
    #[must_use]
    pub fn any_other_open(&self, excluding: u16) -> bool {
        self.iter()
            .any(|scb| scb.handle != excluding && scb.state == AgState::Open)
    }

    /// Handle of a record other than `excluding` sitting idle in `Init`
    #[must_use]
    pub fn any_other_idle(&self, excluding: u16) -> Option<u16> {
        self.iter()
            .find(|scb| scb.handle != excluding && scb.state == AgState::Init)
            .map(|scb| scb.handle)
    }

    /// Whether no record is allocated
    #[must_use]
    pub fn none_in_use(&self) -> bool {
        self.slots.iter().all(|slot| slot.scb.is_none())
    }

    /// Iterate over the allocated records
    pub fn iter(&self) -> impl Iterator<Item = &Scb> {
        self.slots.iter().filter_map(|slot| slot.scb.as_ref())
    }

    /// Handles of every allocated record
    #[must_use]
    pub fn in_use_handles(&self) -> Vec<u16, MAX_SCBS> {
        let mut handles = Vec::new();
        for scb in self.iter() {
            handles.push(scb.handle).ok();
        }
        handles
    }

    /// Release every record, returning the timer tokens to stop. Used by
    /// the enable path to reset the pool.
    pub fn release_all(&mut self) -> Vec<TimerToken, { 3 * MAX_SCBS }> {
        let mut tokens = Vec::new();
        for handle in 1..=MAX_SCBS as u16 {
            for token in self.deallocate(handle) {
                tokens.push(token).ok();
            }
        }
        tokens
    }
}

impl Default for ScbPool {
    fn default() -> Self {
        Self::new()
    }
}
