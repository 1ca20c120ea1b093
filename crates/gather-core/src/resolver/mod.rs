//! Pluggable resolvers for macros embedded in source descriptors.
//!
//! A descriptor such as
//! `{{ k8sConfigMapKey "policies/sources/main" }}` is expanded by invoking the
//! named [`Resolver`] and substituting its output. See [`template`] for the
//! syntax and expansion rules.

pub mod template;

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::cluster::{ClusterClient, ConfigMapKeyResolver};
use crate::context::GatherContext;
use crate::error::{GatherError, Result};

pub use template::{Segment, Template};

/// A named capability that turns a macro argument into a literal string.
///
/// Implementations may perform I/O and must honour `ctx`. They are invoked
/// concurrently from independent calls.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, ctx: &GatherContext, argument: &str) -> anyhow::Result<String>;
}

/// Name-to-resolver mapping, built once during startup and read-only after.
#[derive(Default, Clone)]
pub struct ResolverRegistry {
    resolvers: BTreeMap<String, Arc<dyn Resolver>>,
}

impl fmt::Debug for ResolverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolverRegistry")
            .field("names", &self.names())
            .finish()
    }
}

impl ResolverRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the built-in resolvers.
    pub fn with_default_resolvers(client: Arc<dyn ClusterClient>) -> Result<Self> {
        let mut registry = Self::new();
        registry.register(
            ConfigMapKeyResolver::NAME,
            Arc::new(ConfigMapKeyResolver::new(client)),
        )?;
        Ok(registry)
    }

    /// Register a resolver. Fails if `name` is already taken.
    pub fn register(&mut self, name: impl Into<String>, resolver: Arc<dyn Resolver>) -> Result<()> {
        let name = name.into();
        if self.resolvers.contains_key(&name) {
            return Err(GatherError::DuplicateResolver { name });
        }
        tracing::debug!(resolver = %name, "registered resolver");
        self.resolvers.insert(name, resolver);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Resolver>> {
        self.resolvers.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.resolvers.contains_key(name)
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.resolvers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}
