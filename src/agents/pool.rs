//! Live agent instances and their in-flight counts
//!
//! The registry only holds descriptors. The pool maps `agent_id` to the
//! executing instance and tracks how many steps each agent is running;
//! the health monitor samples that count as the agent's load.

use super::Agent;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

struct PoolEntry {
    agent: Arc<dyn Agent>,
    in_flight: Arc<AtomicU32>,
}

#[derive(Default)]
pub struct AgentPool {
    entries: RwLock<HashMap<String, PoolEntry>>,
}

impl AgentPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace the instance for its `agent_id`.
    pub fn insert(&self, agent: Arc<dyn Agent>) {
        let id = agent.agent_id().to_string();
        let mut entries = self.entries.write();
        let in_flight = entries
            .get(&id)
            .map(|e| Arc::clone(&e.in_flight))
            .unwrap_or_default();
        entries.insert(id, PoolEntry { agent, in_flight });
    }

    pub fn remove(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.entries.write().remove(agent_id).map(|e| e.agent)
    }

    pub fn get(&self, agent_id: &str) -> Option<Arc<dyn Agent>> {
        self.entries.read().get(agent_id).map(|e| Arc::clone(&e.agent))
    }

    /// Check an agent out for one step. The in-flight count drops with the lease.
    pub fn acquire(&self, agent_id: &str) -> Option<AgentLease> {
        let entries = self.entries.read();
        let entry = entries.get(agent_id)?;
        entry.in_flight.fetch_add(1, Ordering::SeqCst);
        Some(AgentLease {
            agent: Arc::clone(&entry.agent),
            in_flight: Arc::clone(&entry.in_flight),
        })
    }

    pub fn in_flight(&self, agent_id: &str) -> u32 {
        self.entries
            .read()
            .get(agent_id)
            .map(|e| e.in_flight.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// All instances, ordered by `agent_id`.
    pub fn agents(&self) -> Vec<Arc<dyn Agent>> {
        let entries = self.entries.read();
        let mut agents: Vec<_> = entries.values().map(|e| Arc::clone(&e.agent)).collect();
        agents.sort_by(|a, b| a.agent_id().cmp(b.agent_id()));
        agents
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Guard that releases the agent's in-flight slot when dropped
pub struct AgentLease {
    agent: Arc<dyn Agent>,
    in_flight: Arc<AtomicU32>,
}

impl AgentLease {
    pub fn agent(&self) -> &Arc<dyn Agent> {
        &self.agent
    }
}

impl Drop for AgentLease {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl std::ops::Deref for AgentLease {
    type Target = dyn Agent;

    fn deref(&self) -> &Self::Target {
        self.agent.as_ref()
    }
}
