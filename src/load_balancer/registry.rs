//! Live target registry.
//!
//! # Responsibilities
//! - Map each registered control connection to the Target it advertised
//! - Keep the selection queue (registration order of connections)
//! - Answer "which target serves this path" through the configured LoadBalancer
//!
//! # Design Decisions
//! - One mutex guards map, queue and selection counters together, so a
//!   selection never observes a half-applied registration
//! - Removal only touches the map; stale queue entries are purged during
//!   the next selection (amortised O(1) removal)
//! - Selection returns a snapshot; the registry stays the only owner

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::load_balancer::{round_robin::WeightedRoundRobin, target::Target, LoadBalancer};
use crate::net::ConnectionId;
use crate::observability::metrics;

#[derive(Debug, Default)]
struct RegistryState {
    hosts: HashMap<ConnectionId, Target>,
    queue: Vec<ConnectionId>,
}

/// Shared table of live backends, keyed by control connection.
#[derive(Debug)]
pub struct TargetRegistry {
    state: Mutex<RegistryState>,
    balancer: Box<dyn LoadBalancer>,
}

impl TargetRegistry {
    /// Create an empty registry using the given selection strategy.
    pub fn new(balancer: Box<dyn LoadBalancer>) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            balancer,
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `target` under `key`. The first registration for a key wins.
    pub fn add_host(&self, key: ConnectionId, mut target: Target) {
        let mut state = self.lock();
        if state.hosts.contains_key(&key) {
            tracing::debug!(connection_id = %key, agent_id = %target.id, "Connection already registered, ignoring");
            return;
        }

        target.reset_usage();
        tracing::info!(
            connection_id = %key,
            agent_id = %target.id,
            rule = %target.rule,
            target = %target.address,
            version = %target.protocol_version,
            "Target registered"
        );
        state.hosts.insert(key, target);

        let RegistryState { hosts, queue } = &mut *state;
        if queue.len() > hosts.len() * 2 {
            queue.retain(|id| hosts.contains_key(id));
        }
        queue.push(key);

        metrics::record_registered_targets(hosts.len());
    }

    /// Remove the entry for `key`, if any.
    pub fn remove_host(&self, key: ConnectionId) -> Option<Target> {
        let mut state = self.lock();
        let removed = state.hosts.remove(&key);
        if let Some(target) = &removed {
            tracing::info!(
                connection_id = %key,
                agent_id = %target.id,
                target = %target.address,
                "Target deregistered"
            );
            metrics::record_registered_targets(state.hosts.len());
        }
        removed
    }

    /// Drop every entry and the whole selection queue.
    pub fn clean_host(&self) {
        let mut state = self.lock();
        state.hosts.clear();
        state.queue.clear();
        metrics::record_registered_targets(0);
    }

    /// Select the target serving `path`, or None if nothing matches.
    pub fn get_target_host(&self, path: &str) -> Option<Target> {
        let mut state = self.lock();
        let RegistryState { hosts, queue } = &mut *state;
        if queue.is_empty() {
            return None;
        }

        queue.retain(|id| hosts.contains_key(id));

        let mut by_id: HashMap<ConnectionId, &mut Target> =
            hosts.iter_mut().map(|(id, target)| (*id, target)).collect();
        let mut live: Vec<&mut Target> = queue.iter().filter_map(|id| by_id.remove(id)).collect();

        let chosen = self.balancer.next_target(path, &mut live)?;
        Some(live[chosen].clone())
    }

    /// Number of registered targets.
    pub fn len(&self) -> usize {
        self.lock().hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().hosts.is_empty()
    }

    /// Length of the selection queue, stale entries included.
    pub fn queue_len(&self) -> usize {
        self.lock().queue.len()
    }

    pub fn contains(&self, key: ConnectionId) -> bool {
        self.lock().hosts.contains_key(&key)
    }

    /// Registered targets in queue order.
    pub fn snapshot(&self) -> Vec<(ConnectionId, Target)> {
        let state = self.lock();
        state
            .queue
            .iter()
            .filter_map(|id| state.hosts.get(id).map(|t| (*id, t.clone())))
            .collect()
    }
}

impl Default for TargetRegistry {
    fn default() -> Self {
        Self::new(Box::new(WeightedRoundRobin::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::load_balancer::target::TargetAddress;
    use crate::routing::RouteRule;
    use rand::Rng;
    use std::sync::Arc;

    fn target(id: &str, rule: &str, port: u16) -> Target {
        Target::new(id, RouteRule::new(rule).unwrap(), TargetAddress::new("localhost", port), "1.0.0")
    }

    #[test]
    fn test_first_registration_wins() {
        let registry = TargetRegistry::default();
        let key = ConnectionId::new();

        registry.add_host(key, target("first", "/", 4242));
        registry.add_host(key, target("second", "/", 4243));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get_target_host("/").unwrap().id, "first");

        assert!(registry.remove_host(key).is_some());
        assert!(registry.get_target_host("/").is_none());
    }

    #[test]
    fn test_remove_absent_is_noop() {
        let registry = TargetRegistry::default();
        assert!(registry.remove_host(ConnectionId::new()).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_resets_counters() {
        let registry = TargetRegistry::default();
        let mut t = target("web", "/", 1);
        t.use_counter = 42;
        t.pending = true;
        let key = ConnectionId::new();
        registry.add_host(key, t);

        let (_, stored) = registry.snapshot().remove(0);
        assert_eq!(stored.use_counter, 0);
        assert!(!stored.pending);
    }

    #[test]
    fn test_stale_queue_entries_are_skipped_and_purged() {
        let registry = TargetRegistry::default();
        let gone = ConnectionId::new();
        let live = ConnectionId::new();
        registry.add_host(gone, target("gone", "/", 1));
        registry.add_host(live, target("live", "/", 2));

        registry.remove_host(gone);
        assert_eq!(registry.queue_len(), 2);

        for _ in 0..5 {
            assert_eq!(registry.get_target_host("/").unwrap().id, "live");
        }
        assert_eq!(registry.queue_len(), 1);
    }

    #[test]
    fn test_queue_compacts_without_selections() {
        let registry = TargetRegistry::default();
        for i in 0..50 {
            let key = ConnectionId::new();
            registry.add_host(key, target("churn", "/", i));
            registry.remove_host(key);
        }
        assert!(registry.queue_len() <= 2);
    }

    #[test]
    fn test_rule_specificity() {
        let registry = TargetRegistry::default();
        registry.add_host(ConnectionId::new(), target("WEB001", "/", 4242));
        registry.add_host(ConnectionId::new(), target("WEB002", "/test", 4243));

        for _ in 0..10 {
            assert_eq!(registry.get_target_host("/test/x").unwrap().address.port, 4243);
        }
        assert_eq!(registry.get_target_host("/testing").unwrap().address.port, 4242);
        assert_eq!(registry.get_target_host("/other").unwrap().address.port, 4242);
    }

    #[test]
    fn test_round_robin_fairness() {
        let registry = TargetRegistry::default();
        registry.add_host(ConnectionId::new(), target("a", "/", 1));
        registry.add_host(ConnectionId::new(), target("b", "/", 2));

        let mut hits = HashMap::new();
        for _ in 0..1000 {
            let t = registry.get_target_host("/").unwrap();
            *hits.entry(t.id).or_insert(0) += 1;
        }
        assert_eq!(hits["a"], 500);
        assert_eq!(hits["b"], 500);
    }

    #[test]
    fn test_clean_slate() {
        let registry = TargetRegistry::default();
        for i in 0..5 {
            registry.add_host(ConnectionId::new(), target("web", "/", i));
        }
        registry.clean_host();

        assert!(registry.get_target_host("/").is_none());
        assert_eq!(registry.queue_len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_mutation_and_selection() {
        let registry = Arc::new(TargetRegistry::default());
        let mut handles = Vec::new();

        for worker in 0..8u16 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut owned = Vec::new();
                for i in 0..500u16 {
                    if owned.is_empty() || rng.gen_bool(0.6) {
                        let key = ConnectionId::new();
                        registry.add_host(key, target("stress", "/", worker * 1000 + i));
                        owned.push(key);
                    } else {
                        let idx = rng.gen_range(0..owned.len());
                        let key = owned.swap_remove(idx);
                        assert!(registry.remove_host(key).is_some());
                        assert!(!registry.contains(key));
                    }
                }
                for key in owned {
                    registry.remove_host(key);
                }
            }));
        }

        for _ in 0..4 {
            let registry = registry.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..2000 {
                    if let Some(t) = registry.get_target_host("/any") {
                        assert_eq!(t.id, "stress");
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }
        assert!(registry.is_empty());
        assert!(registry.get_target_host("/").is_none());
    }

    #[test]
    fn test_never_returns_removed_target() {
        let registry = TargetRegistry::default();
        let keys: Vec<ConnectionId> = (0..10).map(|_| ConnectionId::new()).collect();
        for (i, key) in keys.iter().enumerate() {
            registry.add_host(*key, target(&format!("web{}", i), "/", i as u16));
        }
        for key in keys.iter().step_by(2) {
            registry.remove_host(*key);
        }
        for _ in 0..100 {
            let t = registry.get_target_host("/").unwrap();
            let index: usize = t.id.trim_start_matches("web").parse().unwrap();
            assert_eq!(index % 2, 1, "selected removed target {}", t.id);
        }
    }
}
