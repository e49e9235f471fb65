//! Resource abstraction layer
//!
//! This module provides a data-driven approach to scanning and mutating
//! upstream resources. Per-resource behavior (cursor support, hierarchy,
//! extension partitions, forwarding targets) is loaded from JSON at compile
//! time, so new resource types need no code changes.
//!
//! # Architecture
//!
//! - [`registry`] - Loads resource definitions from embedded JSON
//! - [`params`] - Resolves pull-protocol parameters into upstream parameters
//! - [`canonical`] - Normalizes raw records into the connector entity shape
//! - [`fetch`] - The paginated scan engine with hierarchy expansion
//! - [`forward`] - Best-effort downstream delivery of successful mutations
//!
//! # Resource Definitions
//!
//! Resources are defined in JSON files under `src/resources/`, keyed by
//! UriTemplate (`tickets`, `solutions/categories/_id_/folders`, ...).

pub mod canonical;
pub mod fetch;
pub mod forward;
pub mod params;
pub mod registry;

pub use fetch::{ExecutionState, FetchEngine};
pub use forward::{forward_change, Change};
pub use params::{is_search_class, resolve, resolve_for_mutation, uri_template, ResolvedParams};
pub use registry::{ChildDef, ExtensionDef, Registry, ResourceDef, SyncDef};
