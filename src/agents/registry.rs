//! Capability registry
//!
//! Holds one [`AgentDescriptor`] per agent. The map is copy-on-write behind
//! an [`ArcSwap`]: readers take a lock-free [`RegistrySnapshot`] and never
//! observe a half-applied update. Health, last probe time and load are
//! written only through [`CapabilityRegistry::update_health`] and
//! [`CapabilityRegistry::report_load`], which the health monitor drives.

use crate::types::{AgentDescriptor, Domain, HealthStatus};
use arc_swap::ArcSwap;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

type DescriptorMap = HashMap<String, AgentDescriptor>;

pub struct CapabilityRegistry {
    descriptors: ArcSwap<DescriptorMap>,
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self {
            descriptors: ArcSwap::from_pointee(HashMap::new()),
        }
    }

    /// Insert or replace a descriptor keyed by `agent_id`.
    ///
    /// Idempotent. When the agent is already known its monitor-owned fields
    /// (health, last probe, load) are kept.
    pub fn register(&self, descriptor: AgentDescriptor) {
        let agent_id = descriptor.agent_id.clone();
        self.descriptors.rcu(|current| {
            let mut next = DescriptorMap::clone(current);
            let mut incoming = descriptor.clone();
            if let Some(existing) = current.get(&incoming.agent_id) {
                incoming.health_status = existing.health_status;
                incoming.last_probe_at = existing.last_probe_at;
                incoming.load = existing.load;
            }
            next.insert(incoming.agent_id.clone(), incoming);
            next
        });
        info!(%agent_id, "agent registered");
    }

    /// Remove an agent. Returns whether it was present.
    pub fn deregister(&self, agent_id: &str) -> bool {
        let mut removed = false;
        self.descriptors.rcu(|current| {
            let mut next = DescriptorMap::clone(current);
            removed = next.remove(agent_id).is_some();
            next
        });
        if removed {
            info!(%agent_id, "agent deregistered");
        }
        removed
    }

    /// Eligible agents for `domain`: never Unreachable, ascending load, ties by id.
    pub fn list(&self, domain: Domain) -> Vec<AgentDescriptor> {
        self.snapshot().list(domain)
    }

    pub fn get(&self, agent_id: &str) -> Option<AgentDescriptor> {
        self.descriptors.load().get(agent_id).cloned()
    }

    /// Record a probe outcome. Unknown agents are ignored.
    pub fn update_health(&self, agent_id: &str, status: HealthStatus) {
        let mut changed_from = None;
        self.descriptors.rcu(|current| {
            let mut next = DescriptorMap::clone(current);
            if let Some(d) = next.get_mut(agent_id) {
                changed_from = (d.health_status != status).then_some(d.health_status);
                d.health_status = status;
                d.last_probe_at = Some(Utc::now());
            }
            next
        });
        if let Some(from) = changed_from {
            info!(%agent_id, %from, to = %status, "agent health changed");
        }
    }

    pub fn report_load(&self, agent_id: &str, load: u32) {
        self.descriptors.rcu(|current| {
            let mut next = DescriptorMap::clone(current);
            if let Some(d) = next.get_mut(agent_id) {
                d.load = load;
            }
            next
        });
        debug!(%agent_id, load, "agent load reported");
    }

    /// Point-in-time immutable view.
    pub fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            descriptors: self.descriptors.load_full(),
        }
    }

    pub fn len(&self) -> usize {
        self.descriptors.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable registry view used for routing one request.
#[derive(Clone, Debug)]
pub struct RegistrySnapshot {
    descriptors: Arc<DescriptorMap>,
}

impl RegistrySnapshot {
    /// Build a snapshot directly from descriptors.
    pub fn from_descriptors(descriptors: impl IntoIterator<Item = AgentDescriptor>) -> Self {
        Self {
            descriptors: Arc::new(
                descriptors
                    .into_iter()
                    .map(|d| (d.agent_id.clone(), d))
                    .collect(),
            ),
        }
    }

    pub fn list(&self, domain: Domain) -> Vec<AgentDescriptor> {
        let mut eligible: Vec<AgentDescriptor> = self
            .descriptors
            .values()
            .filter(|d| d.serves(domain) && d.health_status != HealthStatus::Unreachable)
            .cloned()
            .collect();
        eligible.sort_by(|a, b| a.load.cmp(&b.load).then_with(|| a.agent_id.cmp(&b.agent_id)));
        eligible
    }

    pub fn get(&self, agent_id: &str) -> Option<&AgentDescriptor> {
        self.descriptors.get(agent_id)
    }

    /// Every descriptor, Unreachable included, ordered by id.
    pub fn all(&self) -> Vec<AgentDescriptor> {
        let mut all: Vec<_> = self.descriptors.values().cloned().collect();
        all.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        all
    }
}
