//! # Lifecycle states and the legal transition table.
//!
//! ```text
//!                 ┌──────────────┐
//!                 │  Specialize  │ (initial, no pending form)
//!                 └──────┬───────┘
//!                        ▼
//!   PendingX ──(pending callback + presets)──► X      for X in
//!                                                      Activate, Ready, Hibernate,
//!                                                      Offline, Fail, Destroy
//! ```
//!
//! ## Rules
//! - A pending state always precedes its persistent state.
//! - Destroy is terminal: it has no outgoing transitions.
//! - Specialize is never a transition target.

use std::fmt;

/// Lifecycle state of a managed object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleState {
    /// Initial state: the object specializes itself (discovers its concrete shape).
    Specialize,
    /// Acquiring resources and bringing the object up.
    Activate,
    /// Serving.
    Ready,
    /// Parked with minimal resource use.
    Hibernate,
    /// Administratively or physically offline.
    Offline,
    /// Failed; waiting for repair.
    Fail,
    /// Tearing down. Terminal.
    Destroy,
    /// Transition to [`LifecycleState::Activate`] requested.
    PendingActivate,
    /// Transition to [`LifecycleState::Ready`] requested.
    PendingReady,
    /// Transition to [`LifecycleState::Hibernate`] requested.
    PendingHibernate,
    /// Transition to [`LifecycleState::Offline`] requested.
    PendingOffline,
    /// Transition to [`LifecycleState::Fail`] requested.
    PendingFail,
    /// Transition to [`LifecycleState::Destroy`] requested.
    PendingDestroy,
}

/// Number of persistent states; the length of per-state tables.
pub(crate) const PERSISTENT_COUNT: usize = 7;

impl LifecycleState {
    /// Persistent states in table order.
    pub const PERSISTENT: [LifecycleState; PERSISTENT_COUNT] = [
        LifecycleState::Specialize,
        LifecycleState::Activate,
        LifecycleState::Ready,
        LifecycleState::Hibernate,
        LifecycleState::Offline,
        LifecycleState::Fail,
        LifecycleState::Destroy,
    ];

    /// True for the `Pending*` variants.
    pub fn is_pending(self) -> bool {
        self.persistent() != self
    }

    /// The persistent state a pending state leads to; persistent states map to themselves.
    pub fn persistent(self) -> LifecycleState {
        match self {
            LifecycleState::PendingActivate => LifecycleState::Activate,
            LifecycleState::PendingReady => LifecycleState::Ready,
            LifecycleState::PendingHibernate => LifecycleState::Hibernate,
            LifecycleState::PendingOffline => LifecycleState::Offline,
            LifecycleState::PendingFail => LifecycleState::Fail,
            LifecycleState::PendingDestroy => LifecycleState::Destroy,
            other => other,
        }
    }

    /// The pending form of a persistent state.
    ///
    /// `None` for Specialize and for states that are already pending.
    pub fn pending(self) -> Option<LifecycleState> {
        match self {
            LifecycleState::Activate => Some(LifecycleState::PendingActivate),
            LifecycleState::Ready => Some(LifecycleState::PendingReady),
            LifecycleState::Hibernate => Some(LifecycleState::PendingHibernate),
            LifecycleState::Offline => Some(LifecycleState::PendingOffline),
            LifecycleState::Fail => Some(LifecycleState::PendingFail),
            LifecycleState::Destroy => Some(LifecycleState::PendingDestroy),
            _ => None,
        }
    }

    /// Index into per-state tables (pending states share their destination's slot).
    pub(crate) fn index(self) -> usize {
        match self.persistent() {
            LifecycleState::Specialize => 0,
            LifecycleState::Activate => 1,
            LifecycleState::Ready => 2,
            LifecycleState::Hibernate => 3,
            LifecycleState::Offline => 4,
            LifecycleState::Fail => 5,
            _ => 6,
        }
    }

    fn legal_targets(self) -> &'static [LifecycleState] {
        use LifecycleState::*;
        match self.persistent() {
            Specialize => &[Activate, Ready, Fail, Destroy],
            Activate => &[Ready, Hibernate, Offline, Fail, Destroy],
            Ready => &[Activate, Hibernate, Offline, Fail, Destroy],
            Hibernate => &[Activate, Ready, Offline, Fail, Destroy],
            Offline => &[Activate, Fail, Destroy],
            Fail => &[Activate, Destroy],
            _ => &[],
        }
    }

    /// True if the transition table allows moving to `target` (or its persistent form).
    ///
    /// # Example
    /// ```
    /// use lifecrank::LifecycleState;
    ///
    /// assert!(LifecycleState::Ready.can_transition_to(LifecycleState::PendingFail));
    /// assert!(!LifecycleState::Destroy.can_transition_to(LifecycleState::Ready));
    /// ```
    pub fn can_transition_to(self, target: LifecycleState) -> bool {
        self.legal_targets().contains(&target.persistent())
    }

    /// Stable upper-case name used in trace output.
    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleState::Specialize => "SPECIALIZE",
            LifecycleState::Activate => "ACTIVATE",
            LifecycleState::Ready => "READY",
            LifecycleState::Hibernate => "HIBERNATE",
            LifecycleState::Offline => "OFFLINE",
            LifecycleState::Fail => "FAIL",
            LifecycleState::Destroy => "DESTROY",
            LifecycleState::PendingActivate => "PENDING_ACTIVATE",
            LifecycleState::PendingReady => "PENDING_READY",
            LifecycleState::PendingHibernate => "PENDING_HIBERNATE",
            LifecycleState::PendingOffline => "PENDING_OFFLINE",
            LifecycleState::PendingFail => "PENDING_FAIL",
            LifecycleState::PendingDestroy => "PENDING_DESTROY",
        }
    }

    /// Default crank interval for a state when the class does not set one.
    ///
    /// Transitional states are cranked briskly, settled ones lazily.
    pub(crate) fn default_reschedule_ms(self) -> u32 {
        match self.persistent() {
            LifecycleState::Specialize | LifecycleState::Activate | LifecycleState::Destroy => 100,
            _ => 3000,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_round_trip() {
        for state in LifecycleState::PERSISTENT {
            match state.pending() {
                Some(pending) => {
                    assert!(pending.is_pending());
                    assert_eq!(pending.persistent(), state);
                    assert_eq!(pending.index(), state.index());
                }
                None => assert_eq!(state, LifecycleState::Specialize),
            }
            assert!(!state.is_pending());
        }
    }

    #[test]
    fn test_destroy_is_terminal() {
        for state in LifecycleState::PERSISTENT {
            assert!(!LifecycleState::Destroy.can_transition_to(state));
        }
    }

    #[test]
    fn test_specialize_never_a_target() {
        for state in LifecycleState::PERSISTENT {
            assert!(!state.can_transition_to(LifecycleState::Specialize));
        }
    }

    #[test]
    fn test_every_live_state_can_fail_or_destroy() {
        for state in &LifecycleState::PERSISTENT[..PERSISTENT_COUNT - 1] {
            assert!(state.can_transition_to(LifecycleState::Destroy), "{state}");
            if *state != LifecycleState::Fail {
                assert!(state.can_transition_to(LifecycleState::Fail), "{state}");
            }
        }
    }

    #[test]
    fn test_indices_are_distinct() {
        let mut seen = [false; PERSISTENT_COUNT];
        for state in LifecycleState::PERSISTENT {
            assert!(!seen[state.index()]);
            seen[state.index()] = true;
        }
    }
}
