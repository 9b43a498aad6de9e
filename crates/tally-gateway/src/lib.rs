// SPDX-FileCopyrightText: 2026 Tally Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP API over the Tally plugin registry.
//!
//! Every registry operation is exposed as a JSON endpoint under `/v1`.
//! Errors carry the registry error code and map onto HTTP statuses.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod server;

pub use error::{ApiError, ErrorResponse};
pub use server::{GatewayState, ServerConfig, router, start_server};
