//! Session lifecycle state.

use std::sync::atomic::{AtomicU8, Ordering};

use serde::Serialize;

/// Lifecycle of a session.
///
/// `Active → Draining → Removed`. A session never goes back to `Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionState {
    /// Registered, sends allowed.
    Active,
    /// A fatal error or close request was observed; queued sends are being
    /// flushed or aborted.
    Draining,
    /// Transport released. Terminal.
    Removed,
}

impl SessionState {
    const fn as_u8(self) -> u8 {
        match self {
            Self::Active => 0,
            Self::Draining => 1,
            Self::Removed => 2,
        }
    }

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Active,
            1 => Self::Draining,
            _ => Self::Removed,
        }
    }
}

/// Atomic cell holding a [`SessionState`]; only moves forward.
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU8);

impl StateCell {
    pub(crate) fn new() -> Self {
        Self(AtomicU8::new(SessionState::Active.as_u8()))
    }

    pub(crate) fn get(&self) -> SessionState {
        SessionState::from_u8(self.0.load(Ordering::Acquire))
    }

    /// Moves `Active → Draining`. Returns true only for the call that made
    /// the transition.
    pub(crate) fn begin_draining(&self) -> bool {
        self.0
            .compare_exchange(
                SessionState::Active.as_u8(),
                SessionState::Draining.as_u8(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    pub(crate) fn mark_removed(&self) {
        self.0
            .fetch_max(SessionState::Removed.as_u8(), Ordering::AcqRel);
    }
}
