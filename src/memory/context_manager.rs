use super::{slot_memory_entries, DEFAULT_MAX_TURNS, SLOT_KEY_PREFIX};
use crate::types::{Domain, MessageRole, Slots, Turn};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// A working-memory value with an optional expiry.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryEntry {
    pub value: serde_json::Value,
    pub expires_at: Option<Instant>,
}

impl MemoryEntry {
    pub fn new(value: serde_json::Value, ttl: Option<Duration>) -> Self {
        Self {
            value,
            expires_at: ttl.map(|ttl| Instant::now() + ttl),
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at
            .map(|exp| Instant::now() >= exp)
            .unwrap_or(false)
    }
}

/// Short-term state of one conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct ConversationContext {
    pub conversation_id: String,
    /// Oldest first, bounded by the manager's window.
    pub turns: VecDeque<Turn>,
    pub working_memory: BTreeMap<String, MemoryEntry>,
}

impl ConversationContext {
    pub fn new(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            turns: VecDeque::new(),
            working_memory: BTreeMap::new(),
        }
    }

    /// Live value for `key`; expired entries read as absent.
    pub fn recall(&self, key: &str) -> Option<&serde_json::Value> {
        self.working_memory
            .get(key)
            .filter(|e| !e.is_expired())
            .map(|e| &e.value)
    }

    /// Domains routed on the most recent assistant turn.
    pub fn last_routed_domains(&self) -> &[Domain] {
        self.turns
            .iter()
            .rev()
            .find(|t| t.role == MessageRole::Assistant)
            .map(|t| t.domains.as_slice())
            .unwrap_or(&[])
    }

    /// Slots remembered from earlier turns.
    pub fn remembered_slots(&self) -> Slots {
        self.working_memory
            .iter()
            .filter(|(_, e)| !e.is_expired())
            .filter_map(|(k, e)| {
                let name = k.strip_prefix(SLOT_KEY_PREFIX)?;
                let value = e.value.as_str()?;
                Some((name.to_string(), value.to_string()))
            })
            .collect()
    }

    pub fn turns_vec(&self) -> Vec<Turn> {
        self.turns.iter().cloned().collect()
    }

    fn purge_expired(&mut self) -> usize {
        let before = self.working_memory.len();
        self.working_memory.retain(|_, e| !e.is_expired());
        before - self.working_memory.len()
    }
}

/// A conversation plus the last time anything touched it.
struct Tracked {
    context: ConversationContext,
    last_active: Instant,
}

impl Tracked {
    fn touch(&mut self) -> &mut ConversationContext {
        self.last_active = Instant::now();
        &mut self.context
    }
}

/// Per-conversation short-term memory.
///
/// Each conversation has its own lock, so concurrent requests on the same
/// conversation serialize their mutations while other conversations proceed.
/// With an idle TTL, conversations untouched for longer are evicted whenever
/// a new one is opened.
pub struct ContextManager {
    conversations: RwLock<HashMap<String, Arc<Mutex<Tracked>>>>,
    max_turns: usize,
    default_ttl: Option<Duration>,
    idle_ttl: Option<Duration>,
}

impl Default for ContextManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS, None)
    }
}

impl ContextManager {
    pub fn new(max_turns: usize, default_ttl: Option<Duration>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            max_turns: max_turns.max(1),
            default_ttl,
            idle_ttl: None,
        }
    }

    /// Evict conversations idle for longer than `idle_ttl`.
    pub fn with_idle_ttl(mut self, idle_ttl: Option<Duration>) -> Self {
        self.idle_ttl = idle_ttl;
        self
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    fn entry(&self, conversation_id: &str) -> Arc<Mutex<Tracked>> {
        if let Some(tracked) = self.conversations.read().get(conversation_id) {
            return Arc::clone(tracked);
        }
        let mut conversations = self.conversations.write();
        if !conversations.contains_key(conversation_id) {
            let evicted = self.evict_idle_locked(&mut conversations);
            if evicted > 0 {
                debug!(evicted, "evicted idle conversations");
            }
        }
        Arc::clone(conversations.entry(conversation_id.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Tracked {
                context: ConversationContext::new(conversation_id),
                last_active: Instant::now(),
            }))
        }))
    }

    fn evict_idle_locked(&self, conversations: &mut HashMap<String, Arc<Mutex<Tracked>>>) -> usize {
        let Some(idle_ttl) = self.idle_ttl else {
            return 0;
        };
        let before = conversations.len();
        conversations.retain(|_, tracked| {
            // Held elsewhere means a request is using it right now.
            if Arc::strong_count(tracked) > 1 {
                return true;
            }
            match tracked.try_lock() {
                Some(t) => t.last_active.elapsed() < idle_ttl,
                None => true,
            }
        });
        before - conversations.len()
    }

    /// Drop every conversation idle for longer than the idle TTL.
    pub fn evict_idle(&self) -> usize {
        let mut conversations = self.conversations.write();
        self.evict_idle_locked(&mut conversations)
    }

    /// Snapshot of the conversation, created empty on first use.
    pub fn load(&self, conversation_id: &str) -> ConversationContext {
        let entry = self.entry(conversation_id);
        let mut tracked = entry.lock();
        let ctx = tracked.touch();
        let purged = ctx.purge_expired();
        if purged > 0 {
            debug!(%conversation_id, purged, "expired working memory entries");
        }
        ctx.clone()
    }

    /// Append a turn, evicting the oldest beyond the window.
    pub fn append_turn(&self, conversation_id: &str, turn: Turn) {
        let entry = self.entry(conversation_id);
        let mut tracked = entry.lock();
        let ctx = tracked.touch();
        ctx.turns.push_back(turn);
        while ctx.turns.len() > self.max_turns {
            ctx.turns.pop_front();
        }
    }

    /// Store a working-memory value. `None` uses the manager's default TTL.
    pub fn remember(
        &self,
        conversation_id: &str,
        key: impl Into<String>,
        value: serde_json::Value,
        ttl: Option<Duration>,
    ) {
        let entry = self.entry(conversation_id);
        let mut tracked = entry.lock();
        tracked
            .touch()
            .working_memory
            .insert(key.into(), MemoryEntry::new(value, ttl.or(self.default_ttl)));
    }

    /// Replace every remembered slot with `slots`.
    pub fn replace_slots(&self, conversation_id: &str, slots: &Slots, ttl: Option<Duration>) {
        let entry = self.entry(conversation_id);
        let mut tracked = entry.lock();
        let memory = &mut tracked.touch().working_memory;
        memory.retain(|key, _| !key.starts_with(SLOT_KEY_PREFIX));
        for (key, value) in slot_memory_entries(slots) {
            memory.insert(
                key,
                MemoryEntry::new(serde_json::Value::String(value), ttl.or(self.default_ttl)),
            );
        }
    }

    /// Read a working-memory value. Expired entries are dropped on read.
    pub fn recall(&self, conversation_id: &str, key: &str) -> Option<serde_json::Value> {
        let entry = self.conversations.read().get(conversation_id).cloned()?;
        let mut tracked = entry.lock();
        let ctx = tracked.touch();
        if ctx.working_memory.get(key)?.is_expired() {
            ctx.working_memory.remove(key);
            return None;
        }
        ctx.working_memory.get(key).map(|e| e.value.clone())
    }

    /// Drop the conversation entirely.
    pub fn clear(&self, conversation_id: &str) -> bool {
        self.conversations.write().remove(conversation_id).is_some()
    }

    pub fn conversation_count(&self) -> usize {
        self.conversations.read().len()
    }
}
