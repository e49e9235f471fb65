//! freshdesk-sync: a streaming synchronization connector for the Freshdesk
//! REST API.
//!
//! The connector exposes every Freshdesk resource path as a cursor-based,
//! rate-limit-safe, hierarchically-expanded JSON array stream, and forwards
//! successful mutations to downstream receivers. See the `resource` module
//! for the scan engine and the `upstream` module for the API session.

pub mod config;
pub mod error;
pub mod resource;
pub mod server;
pub mod stream;
pub mod upstream;
