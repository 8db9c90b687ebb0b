// SPDX-FileCopyrightText: 2026 Orchestrall Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Capability traits at the seams of the core.
//!
//! Plugins implement [`PluginCapability`]; connection backends implement
//! [`DataConnection`] and [`ConnectionFactory`]. All use `#[async_trait]` for
//! dynamic dispatch compatibility.

pub mod connection;
pub mod plugin;

pub use connection::{ConnectionFactory, ConnectionTarget, DataConnection};
pub use plugin::{PluginCapability, PluginContext};
