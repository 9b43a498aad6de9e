// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence for the Tally plugin registry.
//!
//! Installed plugin records live in one WAL-mode SQLite file. Schema is
//! managed by embedded refinery migrations, and every statement runs on the
//! single background thread owned by `tokio-rusqlite`.

pub mod database;
pub mod migrations;
pub mod store;

pub use database::Database;
pub use store::InstallationStore;
