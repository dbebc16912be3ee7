//! Per-record connection state machine
//!
//! Each connection record moves through four states (`Init`, `Opening`,
//! `Open`, `Closing`); the reaction to a table-driven event is a fixed row
//! of up to two actions plus a next state. The engine commits the next
//! state first and only then runs the actions, so an action that inspects
//! its own record observes the post-transition state.

mod actions;
mod tables;

pub use tables::transition;

use crate::callout::Callouts;
use crate::constants::MAX_PENDING_EVENTS;
use crate::event::{AgEvent, AgMessage};
use crate::scb::ScbPool;
use crate::ParseMode;
use heapless::Deque;

/// Connection state of one record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AgState {
    /// No connection; servers may be listening
    #[default]
    Init,
    /// Connection setup in progress
    Opening,
    /// Connection established
    Open,
    /// Connection teardown in progress
    Closing,
}

impl AgState {
    /// Human-readable state name for the debug logging path
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            AgState::Init => "Init",
            AgState::Opening => "Opening",
            AgState::Open => "Open",
            AgState::Closing => "Closing",
        }
    }
}

/// The distinct action routines the transition tables refer to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Action {
    /// Install a registration on the record and start its servers
    Register,
    /// Tear the record down from the idle state
    Deregister,
    /// Begin an outgoing connection: remember the peer, run discovery
    StartOpen,
    /// Discovery succeeded; connect the transport
    RfcDoOpen,
    /// Close the transport, or short-circuit if none is up
    RfcDoClose,
    /// Mark the record for deallocation once the transport closes
    StartDereg,
    /// Begin an orderly close of an established connection
    StartClose,
    /// Locally-initiated transport came up
    RfcOpen,
    /// Reject a connection request the record cannot serve
    OpenFail,
    /// Peer-initiated transport came up
    RfcAcpOpen,
    /// Transport closed; release or re-arm the record
    RfcClose,
    /// Transport setup failed
    RfcFail,
    /// Transport data arrived
    RfcData,
    /// Discovery result for a locally-initiated connection
    DiscIntRes,
    /// Discovery failed for a locally-initiated connection
    DiscFail,
    /// Discovery result for a peer-initiated connection
    DiscAcpRes,
    /// Release the discovery record
    FreeDb,
    /// Voice channel came up
    ScoConnOpen,
    /// Voice channel went down
    ScoConnClose,
    /// Start listening for a peer-initiated voice channel
    ScoListen,
    /// Open the voice channel
    ScoOpen,
    /// Close the voice channel
    ScoClose,
    /// Fully shut down the voice channel
    ScoShutdown,
    /// Follow-up after the voice channel opened
    PostScoOpen,
    /// Follow-up after the voice channel closed
    PostScoClose,
    /// The service-level connection came up
    SvcConnOpen,
    /// Forward an application protocol result to the peer
    Result,
    /// Install the application's codec choice
    SetCodec,
    /// Send one RING and re-arm the cadence timer
    SendRing,
    /// Voice data call-in
    CiScoData,
    /// Pass-through data ready to transmit
    CiRxData,
    /// The application reported the service-level connection ready
    SlcReady,
}

/// One row of a transition table: up to two actions, then the next state.
/// Action execution stops at the first empty slot.
#[derive(Debug, Clone, Copy)]
pub struct Transition {
    /// Actions to run, in order, after the state is committed
    pub actions: [Option<Action>; 2],
    /// State the record is committed to before the actions run
    pub next: AgState,
}

/// Everything one dispatched event may touch.
///
/// The fields borrow disjoint parts of the gateway, so actions can mutate a
/// record, invoke call-outs and queue follow-up events through the one
/// context borrow.
pub struct AgContext<'a, C: Callouts> {
    /// The connection record pool
    pub pool: &'a mut ScbPool,
    /// Parse mode installed at enable time
    pub parse_mode: ParseMode,
    /// Whether the gateway is currently enabled
    pub registered: bool,
    /// The outward interface
    pub callouts: &'a mut C,
    /// Follow-up events queued by actions, drained by the router after the
    /// current event completes
    pub pending: &'a mut Deque<AgMessage, MAX_PENDING_EVENTS>,
}

/// Queue a follow-up event behind the one being dispatched
pub(crate) fn post<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: AgEvent) {
    if ctx.pending.push_back(AgMessage::to(handle, event)).is_err() {
        error!("ag: pending event queue full, dropping event for scb {}", handle);
    }
}

/// Dispatch one table-driven event to the record's state machine.
///
/// Looks up the row for the record's current state, commits the next state,
/// then runs the row's actions in order. Events with no table kind are
/// rejected before lookup.
pub fn execute<C: Callouts>(ctx: &mut AgContext<'_, C>, handle: u16, event: &AgEvent) {
    let Some(kind) = event.kind() else {
        error!("ag: event {} is not table-driven", event.name());
        return;
    };

    let row = {
        let Some(scb) = ctx.pool.get_mut(handle) else {
            return;
        };
        let previous = scb.state;
        let row = transition(previous, kind);
        scb.state = row.next;
        if previous != row.next && !matches!(event, AgEvent::ScoData) {
            debug!(
                "ag: scb {} [{}] -> [{}] after [{}]",
                handle,
                previous.name(),
                row.next.name(),
                event.name()
            );
        }
        row
    };

    for action in row.actions.iter() {
        let Some(action) = action else { break };
        actions::run(ctx, handle, *action, event);
    }
}
