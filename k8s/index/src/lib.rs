//! The routing table: authorized public keys fanned out to the access
//! configurations they activate.
//!
//! The table is the only mutable state shared between the reconciler and the
//! SSH authenticator. The reconciler calls [`RoutingTable::set`] and
//! [`RoutingTable::delete`] as `IngreSsh` resources change; authentication
//! calls [`RoutingTable::get`] on the hot path for every public-key offer.
//! A single reader-writer lock covers both indices, so every `get` observes
//! a consistent point-in-time snapshot of the fan-out.
//!
//! Configs are owned by an arena keyed by [`RouteId`]; the per-key buckets
//! hold `RouteId` handles rather than references. A `set` that replaces a
//! config overwrites the arena entry in place, so handles in untouched
//! buckets keep resolving to the freshest value, and `get` returns owned
//! copies that stay valid after the lock is released.

#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

#[cfg(test)]
mod tests;

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use ingressh_core::AccessConfig;
use parking_lot::RwLock;
use std::sync::Arc;

pub type SharedRoutes = Arc<RwLock<RoutingTable>>;

/// Stable identity of a route: the `(name, namespace)` of the resource that
/// contributed it.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RouteId {
    pub name: String,
    pub namespace: String,
}

impl RouteId {
    pub fn of(config: &AccessConfig) -> Self {
        Self {
            name: config.name.clone(),
            namespace: config.namespace.clone(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    /// The presented key maps to no configuration.
    #[error("authentication failure")]
    AuthenticationFailed,
}

/// Maps authorized keys to the relevant configurations for fast search.
#[derive(Debug, Default)]
pub struct RoutingTable {
    configs: HashMap<RouteId, AccessConfig>,
    routes: HashMap<String, Vec<RouteId>>,
}

impl RoutingTable {
    pub fn shared() -> SharedRoutes {
        Arc::new(RwLock::new(Self::default()))
    }

    /// Upserts the routes for the given config.
    ///
    /// The authorized-key delta against the previously stored config decides
    /// which buckets change: keys only in the new config gain a handle, keys
    /// only in the old config lose theirs, keys in both are untouched (the
    /// arena entry is replaced in place, so their handles already resolve to
    /// the new value).
    pub fn set(&mut self, config: AccessConfig) {
        let id = RouteId::of(&config);

        let new_keys: HashSet<&str> = config
            .authorized_keys
            .iter()
            .map(|key| key.trim())
            .filter(|key| !key.is_empty())
            .collect();

        let mut removed: Vec<String> = Vec::new();
        let mut added: HashSet<&str> = new_keys.clone();
        if let Some(existing) = self.configs.get(&id) {
            for key in &existing.authorized_keys {
                let key = key.trim();
                if new_keys.contains(key) {
                    added.remove(key);
                } else {
                    removed.push(key.to_string());
                }
            }
        }

        let added: Vec<String> = added.into_iter().map(String::from).collect();
        self.configs.insert(id.clone(), config);

        for key in added {
            let bucket = self.routes.entry(key).or_default();
            if !bucket.contains(&id) {
                bucket.push(id.clone());
            }
        }
        for key in removed {
            self.remove_route(&key, &id);
        }
    }

    /// Returns the configurations activated by the given authorized key.
    ///
    /// The returned configs are value copies; callers hold nothing that
    /// outlives the lock.
    pub fn get(&self, authorized_key: &str) -> Result<Vec<AccessConfig>, RouteError> {
        let ids = self
            .routes
            .get(authorized_key.trim())
            .ok_or(RouteError::AuthenticationFailed)?;
        Ok(ids
            .iter()
            .filter_map(|id| self.configs.get(id).cloned())
            .collect())
    }

    /// Drops the route and every key reference to it.
    pub fn delete(&mut self, id: &RouteId) {
        let Some(config) = self.configs.remove(id) else {
            tracing::debug!(name = %id.name, namespace = %id.namespace, "no such route");
            return;
        };
        for key in &config.authorized_keys {
            self.remove_route(key.trim(), id);
        }
    }

    fn remove_route(&mut self, authorized_key: &str, id: &RouteId) {
        if let Some(bucket) = self.routes.get_mut(authorized_key) {
            bucket.retain(|existing| existing != id);
            if bucket.is_empty() {
                self.routes.remove(authorized_key);
            }
        }
    }
}
