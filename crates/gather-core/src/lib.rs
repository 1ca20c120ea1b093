//! Gather Core Library
//!
//! Turns templated source descriptors into fetched content plus metadata
//! that can be pinned to the exact commit or digest retrieved.
//!
//! A descriptor flows through three stages:
//! 1. [`resolver`] expands `{{ name "argument" }}` macros,
//! 2. [`classify`] maps the resolved string to a [`Protocol`](classify::Protocol),
//! 3. [`gather`] dispatches to the gatherer registered for that protocol.
//!
//! [`service::GatherService`] wires the stages together.

pub mod classify;
pub mod cluster;
pub mod config;
pub mod context;
pub mod error;
pub mod expand;
pub mod fs;
pub mod gather;
pub mod metadata;
pub mod resolver;
pub mod service;

/// Re-exports of commonly used types
pub mod prelude {
    // Stages
    pub use crate::classify::{Protocol, classify};
    pub use crate::gather::{Gatherer, GathererRegistry};
    pub use crate::resolver::{Resolver, ResolverRegistry};
    pub use crate::service::{GatherService, Gathered};

    // Results
    pub use crate::error::{GatherError, PinError, Result};
    pub use crate::metadata::{
        Attributes, ClusterMetadata, FileMetadata, GitMetadata, HttpMetadata, Metadata,
        OciMetadata,
    };

    // Plumbing
    pub use crate::cluster::ClusterClient;
    pub use crate::config::GatherConfig;
    pub use crate::context::GatherContext;
    pub use crate::expand::{Expander, expander_for};
}
