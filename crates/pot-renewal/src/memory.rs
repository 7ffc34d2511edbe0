//! In-memory collaborators.
//!
//! [`InMemoryConfigStore`] stands in for the remote configuration service:
//! it decodes and merges every push, keeps an ordered trace of successful
//! writes and deletes, and supports per-endpoint fault injection and an
//! artificial round-trip latency. [`StaticResolver`] maps hops to endpoints
//! from a table. Both back the integration tests and `pot-sim`.
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::external::{ConfigWriter, HopResolver};
use crate::profile::{HopPayload, HopProfile};
use crate::record::ConfigTarget;
use crate::types::{ConfigKey, EndpointId, HopName, ProfileIndex};
use crate::util::lock;

/// One successful remote operation, in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    Push {
        endpoint: EndpointId,
        key: ConfigKey,
        profile_index: ProfileIndex,
        activate: Option<ProfileIndex>,
    },
    Delete {
        endpoint: EndpointId,
        key: ConfigKey,
    },
}

impl WriteOp {
    pub fn endpoint(&self) -> &EndpointId {
        match self {
            WriteOp::Push { endpoint, .. } | WriteOp::Delete { endpoint, .. } => endpoint,
        }
    }

    pub fn is_activation(&self) -> bool {
        matches!(self, WriteOp::Push { activate: Some(_), .. })
    }
}

/// Merged configuration held by one `(endpoint, key)`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HopConfig {
    pub profiles: BTreeMap<ProfileIndex, HopProfile>,
    pub active: Option<ProfileIndex>,
}

#[derive(Debug, Default)]
pub struct InMemoryConfigStore {
    configs: Mutex<HashMap<ConfigTarget, HopConfig>>,
    trace: Mutex<Vec<WriteOp>>,
    failing: Mutex<HashSet<EndpointId>>,
    fail_deletes: AtomicBool,
    latency: Mutex<Option<Duration>>,
    failed_pushes: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl InMemoryConfigStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every push to `endpoint` fail until healed.
    pub fn fail_endpoint(&self, endpoint: EndpointId) {
        lock(&self.failing).insert(endpoint);
    }

    pub fn heal_endpoint(&self, endpoint: &EndpointId) {
        lock(&self.failing).remove(endpoint);
    }

    pub fn set_fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    /// Delay every remote operation by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *lock(&self.latency) = latency;
    }

    /// Successful operations, in order.
    pub fn trace(&self) -> Vec<WriteOp> {
        lock(&self.trace).clone()
    }

    pub fn clear_trace(&self) {
        lock(&self.trace).clear();
    }

    pub fn push_count(&self) -> usize {
        lock(&self.trace)
            .iter()
            .filter(|op| matches!(op, WriteOp::Push { .. }))
            .count()
    }

    pub fn delete_count(&self) -> usize {
        lock(&self.trace)
            .iter()
            .filter(|op| matches!(op, WriteOp::Delete { .. }))
            .count()
    }

    pub fn failed_pushes(&self) -> usize {
        self.failed_pushes.load(Ordering::SeqCst)
    }

    /// Highest number of operations ever in flight at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn config(&self, endpoint: &EndpointId, key: &ConfigKey) -> Option<HopConfig> {
        let target = ConfigTarget {
            endpoint: endpoint.clone(),
            key: key.clone(),
        };
        lock(&self.configs).get(&target).cloned()
    }

    /// Number of `(endpoint, key)` entries currently held.
    pub fn len(&self) -> usize {
        lock(&self.configs).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.configs).is_empty()
    }

    async fn round_trip(&self) {
        let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(current, Ordering::SeqCst);
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn done(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl ConfigWriter for InMemoryConfigStore {
    async fn push_config(
        &self,
        endpoint: &EndpointId,
        key: &ConfigKey,
        payload: &[u8],
    ) -> Result<(), String> {
        self.round_trip().await;
        let result = self.apply_push(endpoint, key, payload);
        self.done();
        if result.is_err() {
            self.failed_pushes.fetch_add(1, Ordering::SeqCst);
        }
        result
    }

    async fn delete_config(&self, endpoint: &EndpointId, key: &ConfigKey) -> Result<(), String> {
        self.round_trip().await;
        self.done();
        if self.fail_deletes.load(Ordering::SeqCst) {
            return Err(format!("{endpoint}: delete rejected"));
        }
        let target = ConfigTarget {
            endpoint: endpoint.clone(),
            key: key.clone(),
        };
        lock(&self.configs).remove(&target);
        lock(&self.trace).push(WriteOp::Delete {
            endpoint: endpoint.clone(),
            key: key.clone(),
        });
        Ok(())
    }
}

impl InMemoryConfigStore {
    fn apply_push(
        &self,
        endpoint: &EndpointId,
        key: &ConfigKey,
        payload: &[u8],
    ) -> Result<(), String> {
        if lock(&self.failing).contains(endpoint) {
            return Err(format!("{endpoint}: unreachable"));
        }
        let payload = HopPayload::from_bytes(payload).map_err(|e| e.to_string())?;

        let target = ConfigTarget {
            endpoint: endpoint.clone(),
            key: key.clone(),
        };
        {
            let mut configs = lock(&self.configs);
            let config = configs.entry(target).or_default();
            config
                .profiles
                .insert(payload.profile_index, payload.profile);
            if payload.activate.is_some() {
                config.active = payload.activate;
            }
        }
        lock(&self.trace).push(WriteOp::Push {
            endpoint: endpoint.clone(),
            key: key.clone(),
            profile_index: payload.profile_index,
            activate: payload.activate,
        });
        Ok(())
    }
}

/// Table-driven hop resolver. Entries can change at runtime.
#[derive(Debug, Default)]
pub struct StaticResolver {
    table: Mutex<HashMap<HopName, EndpointId>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve every hop to an endpoint named `ep-<hop>`.
    pub fn for_hops<'a>(hops: impl IntoIterator<Item = &'a HopName>) -> Self {
        let resolver = Self::new();
        for hop in hops {
            resolver.insert(hop.clone(), EndpointId::new(format!("ep-{hop}")));
        }
        resolver
    }

    pub fn insert(&self, hop: HopName, endpoint: EndpointId) {
        lock(&self.table).insert(hop, endpoint);
    }

    pub fn remove(&self, hop: &HopName) {
        lock(&self.table).remove(hop);
    }
}

impl HopResolver for StaticResolver {
    fn resolve(&self, hop: &HopName) -> Option<EndpointId> {
        lock(&self.table).get(hop).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profile::{HopShare, HopProfile};
    use crate::types::PathId;

    fn payload(profile_index: ProfileIndex, activate: Option<ProfileIndex>) -> Vec<u8> {
        HopPayload {
            path: PathId::new("P1"),
            hop_index: 0,
            profile_index,
            profile: HopProfile {
                prime: 65_521,
                bit_width: 16,
                share: HopShare {
                    lpc: 1,
                    share: 2,
                    public_coefficient: 3,
                },
                validator_secret: None,
            },
            activate,
        }
        .to_bytes()
        .unwrap()
    }

    #[tokio::test]
    async fn pushes_merge_under_one_key() {
        let store = InMemoryConfigStore::new();
        let ep = EndpointId::new("ep1");
        let key = ConfigKey::for_path(&PathId::new("P1"));

        store.push_config(&ep, &key, &payload(0, None)).await.unwrap();
        store.push_config(&ep, &key, &payload(1, None)).await.unwrap();
        store.push_config(&ep, &key, &payload(0, Some(0))).await.unwrap();

        let config = store.config(&ep, &key).unwrap();
        assert_eq!(config.profiles.len(), 2);
        assert_eq!(config.active, Some(0));
        assert_eq!(store.len(), 1);
        assert_eq!(store.push_count(), 3);
        assert!(store.trace()[2].is_activation());
    }

    #[tokio::test]
    async fn failing_endpoint_rejects_and_heals() {
        let store = InMemoryConfigStore::new();
        let ep = EndpointId::new("ep1");
        let key = ConfigKey::for_path(&PathId::new("P1"));

        store.fail_endpoint(ep.clone());
        assert!(store.push_config(&ep, &key, &payload(0, None)).await.is_err());
        assert_eq!(store.failed_pushes(), 1);
        assert!(store.trace().is_empty());

        store.heal_endpoint(&ep);
        assert!(store.push_config(&ep, &key, &payload(0, None)).await.is_ok());
    }

    #[tokio::test]
    async fn garbage_payload_is_rejected() {
        let store = InMemoryConfigStore::new();
        let ep = EndpointId::new("ep1");
        let key = ConfigKey::for_path(&PathId::new("P1"));
        assert!(store.push_config(&ep, &key, b"\xc1").await.is_err());
    }

    #[tokio::test]
    async fn delete_removes_config() {
        let store = InMemoryConfigStore::new();
        let ep = EndpointId::new("ep1");
        let key = ConfigKey::for_path(&PathId::new("P1"));
        store.push_config(&ep, &key, &payload(0, None)).await.unwrap();

        store.delete_config(&ep, &key).await.unwrap();
        assert!(store.is_empty());
        assert_eq!(store.delete_count(), 1);

        store.set_fail_deletes(true);
        assert!(store.delete_config(&ep, &key).await.is_err());
    }

    #[test]
    fn static_resolver() {
        let hops = [HopName::new("a"), HopName::new("b")];
        let resolver = StaticResolver::for_hops(&hops);
        assert_eq!(resolver.resolve(&hops[0]), Some(EndpointId::new("ep-a")));
        resolver.remove(&hops[1]);
        assert_eq!(resolver.resolve(&hops[1]), None);
    }
}
