//! Shared rejection type for the closed state machines.

use thiserror::Error;

/// A `(state, event)` pair the state machine does not define.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{machine} in state '{from}' does not accept '{event}'")]
pub struct InvalidTransition {
    machine: &'static str,
    from: &'static str,
    event: &'static str,
}

impl InvalidTransition {
    /// Record a rejected transition.
    #[must_use]
    pub const fn new(machine: &'static str, from: &'static str, event: &'static str) -> Self {
        Self {
            machine,
            from,
            event,
        }
    }

    /// Name of the machine that rejected the event
    #[must_use]
    pub const fn machine(&self) -> &'static str {
        self.machine
    }

    /// Storage name of the state the entity was in
    #[must_use]
    pub const fn state(&self) -> &'static str {
        self.from
    }

    /// Name of the rejected event
    #[must_use]
    pub const fn event(&self) -> &'static str {
        self.event
    }
}
