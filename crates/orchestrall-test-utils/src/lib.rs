// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Test utilities for Orchestrall integration tests.
//!
//! Provides scriptable mocks for the capability traits so lifecycle and
//! tenancy behaviour can be tested deterministically, without real plugins
//! or databases.
//!
//! # Components
//!
//! - [`MockPlugin`] - Plugin implementation with scripted health results,
//!   hook counters and failure injection
//! - [`MockConnectionFactory`] - Connection factory with connect counters,
//!   failure injection, slow connects and per-target liveness control

pub mod mock_connection;
pub mod mock_plugin;

pub use mock_connection::{MockConnection, MockConnectionFactory};
pub use mock_plugin::MockPlugin;
