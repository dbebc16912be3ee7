//! Per-record deadline timers
//!
//! Every connection record owns three timers: the in-band ring cadence, the
//! collision back-off and the codec negotiation deadline. The crate never
//! blocks on time itself: arming a timer hands a [`TimerToken`] to the
//! [`Callouts`](crate::Callouts) implementation, which posts the matching
//! expiry event back into the serialized stream when the deadline passes.
//!
//! Tokens are generation-tagged. A record that is deallocated and reused
//! keeps its pool position but gets a new generation, so an expiry posted
//! for the old incarnation no longer matches and is dropped by the router
//! instead of acting on the wrong record.

/// Which of a record's three timers a token refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TimerKind {
    /// In-band ring cadence timer
    Ring,
    /// Collision back-off timer
    Collision,
    /// Codec negotiation deadline timer
    CodecNegotiation,
}

/// Proof of an armed timer: record handle, allocation generation and timer
/// kind. Carried by timer expiry events and validated before dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TimerToken {
    /// Handle of the record that armed the timer
    pub handle: u16,
    /// Pool generation of the record at arming time
    pub generation: u16,
    /// Which timer was armed
    pub kind: TimerKind,
}

/// One deadline timer of a connection record.
///
/// The timer only tracks armed state and the outstanding token; the actual
/// countdown runs in the external timer service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timer {
    kind: TimerKind,
    token: Option<TimerToken>,
}

impl Timer {
    /// Create an unarmed timer of the given kind
    #[must_use]
    pub const fn new(kind: TimerKind) -> Self {
        Self { kind, token: None }
    }

    /// Arm the timer, replacing any outstanding token. The returned token
    /// must be handed to the external timer service.
    pub fn arm(&mut self, handle: u16, generation: u16) -> TimerToken {
        let token = TimerToken {
            handle,
            generation,
            kind: self.kind,
        };
        self.token = Some(token);
        token
    }

    /// Cancel the timer. Idempotent: canceling an unarmed timer is a no-op.
    /// Returns the token to stop in the external timer service, if any.
    pub fn cancel(&mut self) -> Option<TimerToken> {
        self.token.take()
    }

    /// Whether the timer is currently armed
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.token.is_some()
    }

    /// The outstanding token, if the timer is armed
    #[must_use]
    pub fn token(&self) -> Option<TimerToken> {
        self.token
    }

    /// Whether `token` is the outstanding token of this timer. A token from
    /// an earlier generation or an already-canceled arming does not match.
    #[must_use]
    pub fn matches(&self, token: &TimerToken) -> bool {
        self.token.as_ref() == Some(token)
    }
}

/// The three timers of one connection record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerSet {
    /// In-band ring cadence
    pub ring: Timer,
    /// Collision back-off
    pub collision: Timer,
    /// Codec negotiation deadline
    pub codec_negotiation: Timer,
}

impl TimerSet {
    /// Create a set of unarmed timers
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ring: Timer::new(TimerKind::Ring),
            collision: Timer::new(TimerKind::Collision),
            codec_negotiation: Timer::new(TimerKind::CodecNegotiation),
        }
    }

    /// Borrow the timer of the given kind
    #[must_use]
    pub fn get(&self, kind: TimerKind) -> &Timer {
        match kind {
            TimerKind::Ring => &self.ring,
            TimerKind::Collision => &self.collision,
            TimerKind::CodecNegotiation => &self.codec_negotiation,
        }
    }

    /// Mutably borrow the timer of the given kind
    pub fn get_mut(&mut self, kind: TimerKind) -> &mut Timer {
        match kind {
            TimerKind::Ring => &mut self.ring,
            TimerKind::Collision => &mut self.collision,
            TimerKind::CodecNegotiation => &mut self.codec_negotiation,
        }
    }

    /// Cancel every armed timer, returning the tokens to stop externally.
    /// Called exactly once per record lifetime, at deallocation.
    pub fn cancel_all(&mut self) -> heapless::Vec<TimerToken, 3> {
        let mut tokens = heapless::Vec::new();
        for timer in [
            &mut self.ring,
            &mut self.collision,
            &mut self.codec_negotiation,
        ] {
            if let Some(token) = timer.cancel() {
                tokens.push(token).ok();
            }
        }
        tokens
    }
}

impl Default for TimerSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_arm_and_match() {
        let mut timer = Timer::new(TimerKind::Ring);
        assert!(!timer.is_armed());

        let token = timer.arm(1, 0);
        assert!(timer.is_armed());
        assert!(timer.matches(&token));
        assert_eq!(token.handle, 1);
        assert_eq!(token.kind, TimerKind::Ring);
    }

    #[test]
    fn test_cancel_is_idempotent() {
        let mut timer = Timer::new(TimerKind::Collision);
        let token = timer.arm(2, 5);

        assert_eq!(timer.cancel(), Some(token));
        assert_eq!(timer.cancel(), None);
        assert_eq!(timer.cancel(), None);
        assert!(!timer.is_armed());
    }

    #[test]
    fn test_stale_generation_does_not_match() {
        let mut timer = Timer::new(TimerKind::Ring);
        let stale = timer.arm(1, 0);

        // Re-arm as a later incarnation of the same slot.
        let fresh = timer.arm(1, 1);
        assert!(!timer.matches(&stale));
        assert!(timer.matches(&fresh));
    }

    #[test]
    fn test_rearm_replaces_token() {
        let mut timer = Timer::new(TimerKind::Ring);
        let first = timer.arm(1, 0);
        let second = timer.arm(1, 0);

        assert_eq!(first, second);
        assert_eq!(timer.cancel(), Some(second));
        assert!(!timer.matches(&first));
    }

    #[test]
    fn test_cancel_all_returns_only_armed() {
        let mut timers = TimerSet::new();
        timers.ring.arm(3, 1);
        timers.codec_negotiation.arm(3, 1);

        let tokens = timers.cancel_all();
        assert_eq!(tokens.len(), 2);
        assert!(tokens.iter().any(|t| t.kind == TimerKind::Ring));
        assert!(
            tokens
                .iter()
                .any(|t| t.kind == TimerKind::CodecNegotiation)
        );
        assert!(timers.cancel_all().is_empty());
    }

    #[test]
    fn test_timer_set_lookup_by_kind() {
        let mut timers = TimerSet::new();
        let token = timers.get_mut(TimerKind::Collision).arm(1, 0);
        assert!(timers.get(TimerKind::Collision).matches(&token));
        assert!(!timers.get(TimerKind::Ring).is_armed());
    }
}
