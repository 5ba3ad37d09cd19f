//! EntrypointRegistry - entrypoint name -> handler
//!
//! # 設計
//! - Built before the manager runs (mutable).
//! - Shared read-only with every dispatch task while it runs.
//!   No locks: the two phases never overlap.

use std::collections::HashMap;

use super::entrypoint::Entrypoint;
use crate::domain::QueueError;

#[derive(Debug, Default, Clone)]
pub struct EntrypointRegistry {
    entrypoints: HashMap<String, Entrypoint>,
}

impl EntrypointRegistry {
    pub fn new() -> Self {
        Self {
            entrypoints: HashMap::new(),
        }
    }

    /// Register `entrypoint` under `name`.
    ///
    /// A second registration under the same name fails and leaves the first
    /// one in place.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        entrypoint: Entrypoint,
    ) -> Result<(), QueueError> {
        let name = name.into();
        if self.entrypoints.contains_key(&name) {
            return Err(QueueError::DuplicateEntrypoint(name));
        }
        self.entrypoints.insert(name, entrypoint);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Entrypoint> {
        self.entrypoints.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entrypoints.contains_key(name)
    }

    /// Registered names, sorted. This is the entrypoint filter for `dequeue`.
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entrypoints.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.entrypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entrypoints.is_empty()
    }
}
