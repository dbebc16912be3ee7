//! The four transition tables
//!
//! One table per state, one row per [`EventKind`], indexed by the event's
//! discriminant. Rows with no actions leave the state unchanged and are how
//! an event is ignored in a state.

use super::Action::*;
use super::{Action, AgState, Transition};
use crate::event::{EventKind, NUM_EVENT_KINDS};

const fn t(a1: Option<Action>, a2: Option<Action>, next: AgState) -> Transition {
    Transition {
        actions: [a1, a2],
        next,
    }
}

const fn ignore(next: AgState) -> Transition {
    t(None, None, next)
}

#[rustfmt::skip]
static INIT: [Transition; NUM_EVENT_KINDS] = [
    /* ApiRegister */   t(Some(Register), None, AgState::Init),
    /* ApiDeregister */ t(Some(Deregister), None, AgState::Init),
    /* ApiOpen */       t(Some(StartOpen), None, AgState::Opening),
    /* ApiClose */      ignore(AgState::Init),
    /* ApiAudioOpen */  ignore(AgState::Init),
    /* ApiAudioClose */ ignore(AgState::Init),
    /* ApiResult */     ignore(AgState::Init),
    /* ApiSetCodec */   ignore(AgState::Init),
    /* RfcOpen */       t(Some(RfcAcpOpen), Some(ScoListen), AgState::Open),
    /* RfcClose */      ignore(AgState::Init),
    /* RfcSrvClose */   ignore(AgState::Init),
    /* RfcData */       ignore(AgState::Init),
    /* ScoOpen */       t(Some(ScoConnOpen), None, AgState::Init),
    /* ScoClose */      t(Some(ScoConnClose), None, AgState::Init),
    /* DiscAcpRes */    t(Some(FreeDb), None, AgState::Init),
    /* DiscIntRes */    ignore(AgState::Init),
    /* DiscOk */        ignore(AgState::Init),
    /* DiscFail */      ignore(AgState::Init),
    /* RxWrite */       ignore(AgState::Init),
    /* RingTimeout */   ignore(AgState::Init),
    /* SvcTimeout */    ignore(AgState::Init),
    /* ScoData */       ignore(AgState::Init),
    /* SlcReady */      ignore(AgState::Init),
];

#[rustfmt::skip]
static OPENING: [Transition; NUM_EVENT_KINDS] = [
    /* ApiRegister */   ignore(AgState::Opening),
    /* ApiDeregister */ t(Some(RfcDoClose), Some(StartDereg), AgState::Closing),
    /* ApiOpen */       t(Some(OpenFail), None, AgState::Opening),
    /* ApiClose */      t(Some(RfcDoClose), None, AgState::Closing),
    /* ApiAudioOpen */  ignore(AgState::Opening),
    /* ApiAudioClose */ ignore(AgState::Opening),
    /* ApiResult */     ignore(AgState::Opening),
    /* ApiSetCodec */   ignore(AgState::Opening),
    /* RfcOpen */       t(Some(RfcOpen), Some(ScoListen), AgState::Open),
    /* RfcClose */      t(Some(RfcFail), None, AgState::Init),
    /* RfcSrvClose */   ignore(AgState::Opening),
    /* RfcData */       ignore(AgState::Opening),
    /* ScoOpen */       t(Some(ScoConnOpen), None, AgState::Opening),
    /* ScoClose */      t(Some(ScoConnClose), None, AgState::Opening),
    /* DiscAcpRes */    ignore(AgState::Opening),
    /* DiscIntRes */    t(Some(DiscIntRes), None, AgState::Opening),
    /* DiscOk */        t(Some(RfcDoOpen), None, AgState::Opening),
    /* DiscFail */      t(Some(DiscFail), None, AgState::Init),
    /* RxWrite */       ignore(AgState::Opening),
    /* RingTimeout */   ignore(AgState::Opening),
    /* SvcTimeout */    ignore(AgState::Opening),
    /* ScoData */       ignore(AgState::Opening),
    /* SlcReady */      ignore(AgState::Opening),
];

#[rustfmt::skip]
static OPEN: [Transition; NUM_EVENT_KINDS] = [
    /* ApiRegister */   ignore(AgState::Open),
    /* ApiDeregister */ t(Some(StartClose), Some(StartDereg), AgState::Closing),
    /* ApiOpen */       t(Some(OpenFail), None, AgState::Open),
    /* ApiClose */      t(Some(StartClose), None, AgState::Closing),
    /* ApiAudioOpen */  t(Some(ScoOpen), None, AgState::Open),
    /* ApiAudioClose */ t(Some(ScoClose), None, AgState::Open),
    /* ApiResult */     t(Some(Result), None, AgState::Open),
    /* ApiSetCodec */   t(Some(SetCodec), None, AgState::Open),
    /* RfcOpen */       ignore(AgState::Open),
    /* RfcClose */      t(Some(RfcClose), None, AgState::Init),
    /* RfcSrvClose */   ignore(AgState::Open),
    /* RfcData */       t(Some(RfcData), None, AgState::Open),
    /* ScoOpen */       t(Some(ScoConnOpen), Some(PostScoOpen), AgState::Open),
    /* ScoClose */      t(Some(ScoConnClose), Some(PostScoClose), AgState::Open),
    /* DiscAcpRes */    t(Some(DiscAcpRes), None, AgState::Open),
    /* DiscIntRes */    ignore(AgState::Open),
    /* DiscOk */        ignore(AgState::Open),
    /* DiscFail */      ignore(AgState::Open),
    /* RxWrite */       t(Some(CiRxData), None, AgState::Open),
    /* RingTimeout */   t(Some(SendRing), None, AgState::Open),
    /* SvcTimeout */    t(Some(StartClose), None, AgState::Closing),
    /* ScoData */       t(Some(CiScoData), None, AgState::Open),
    /* SlcReady */      t(Some(SlcReady), None, AgState::Open),
];

#[rustfmt::skip]
static CLOSING: [Transition; NUM_EVENT_KINDS] = [
    /* ApiRegister */   ignore(AgState::Closing),
    /* ApiDeregister */ t(Some(StartDereg), None, AgState::Closing),
    /* ApiOpen */       t(Some(OpenFail), None, AgState::Closing),
    /* ApiClose */      ignore(AgState::Closing),
    /* ApiAudioOpen */  ignore(AgState::Closing),
    /* ApiAudioClose */ ignore(AgState::Closing),
    /* ApiResult */     ignore(AgState::Closing),
    /* ApiSetCodec */   ignore(AgState::Closing),
    /* RfcOpen */       ignore(AgState::Closing),
    /* RfcClose */      t(Some(RfcClose), None, AgState::Init),
    /* RfcSrvClose */   ignore(AgState::Closing),
    /* RfcData */       ignore(AgState::Closing),
    /* ScoOpen */       t(Some(ScoConnOpen), None, AgState::Closing),
    /* ScoClose */      t(Some(ScoConnClose), Some(PostScoClose), AgState::Closing),
    /* DiscAcpRes */    t(Some(FreeDb), None, AgState::Closing),
    /* DiscIntRes */    t(Some(FreeDb), None, AgState::Init),
    /* DiscOk */        ignore(AgState::Closing),
    /* DiscFail */      ignore(AgState::Closing),
    /* RxWrite */       ignore(AgState::Closing),
    /* RingTimeout */   ignore(AgState::Closing),
    /* SvcTimeout */    ignore(AgState::Closing),
    /* ScoData */       ignore(AgState::Closing),
    /* SlcReady */      ignore(AgState::Closing),
];

/// The transition row for `state` and `kind`
#[must_use]
pub fn transition(state: AgState, kind: EventKind) -> &'static Transition {
    let table = match state {
        AgState::Init => &INIT,
        AgState::Opening => &OPENING,
        AgState::Open => &OPEN,
        AgState::Closing => &CLOSING,
    };
    &table[kind as usize]
}
