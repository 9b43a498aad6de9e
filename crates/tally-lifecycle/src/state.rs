// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Guarded lifecycle transitions.
//!
//! ```text
//! Discovered -> Validated -> Verified -> Installing -> Installed
//! Installed -> Updating -> Installed
//! Installed -> Removing -> Removed
//! ```
//!
//! Every transient state rolls back to the state it came from on failure.

use dashmap::DashMap;
use tally_core::{LifecycleState, TallyError};
use tracing::debug;

/// In-flight lifecycle state per plugin name.
///
/// Only operations in progress are tracked here; the resting state of an
/// installed plugin lives in its persisted record.
#[derive(Debug, Default)]
pub struct StateTracker {
    states: DashMap<String, LifecycleState>,
}

impl StateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking `name` at `initial`.
    pub fn begin(&self, name: &str, initial: LifecycleState) {
        self.states.insert(name.to_string(), initial);
        debug!(plugin = name, state = %initial, "lifecycle started");
    }

    /// Move `name` to `next`, rejecting transitions the state machine forbids.
    pub fn advance(&self, name: &str, next: LifecycleState) -> Result<(), TallyError> {
        let mut entry = self
            .states
            .get_mut(name)
            .ok_or_else(|| TallyError::Internal(format!("no lifecycle in progress for `{name}`")))?;
        let current = *entry;
        if !current.can_transition_to(next) {
            return Err(TallyError::Internal(format!(
                "illegal lifecycle transition for `{name}`: {current} -> {next}"
            )));
        }
        *entry = next;
        debug!(plugin = name, from = %current, to = %next, "lifecycle transition");
        Ok(())
    }

    /// Roll `name` back from its current transient state and stop tracking it.
    /// Returns the state rolled back to.
    pub fn roll_back(&self, name: &str) -> Option<LifecycleState> {
        let (_, current) = self.states.remove(name)?;
        let target = current.rollback_target();
        debug!(plugin = name, from = %current, to = ?target, "lifecycle rolled back");
        target
    }

    /// Stop tracking `name` after it reached a resting state.
    pub fn finish(&self, name: &str) {
        self.states.remove(name);
    }

    pub fn current(&self, name: &str) -> Option<LifecycleState> {
        self.states.get(name).map(|s| *s)
    }
}
