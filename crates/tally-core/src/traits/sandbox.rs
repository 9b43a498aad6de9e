// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sandboxing capability trait.

/// Reports whether plugins can be confined at runtime.
pub trait Sandbox: Send + Sync + 'static {
    /// Name of the sandboxing mechanism (e.g. "bubblewrap").
    fn name(&self) -> &str;

    /// Whether the mechanism is usable on this host.
    fn is_available(&self) -> bool;
}
