use std::collections::hash_map::Entry;
use std::collections::HashMap;

use voxcal_core::{expiry_after, is_expired_unix};

use crate::slot_context::SlotFillingContext;

#[derive(Debug, Clone)]
struct ConversationEntry {
    context: SlotFillingContext,
    last_active_unix: u64,
}

#[derive(Debug, Clone)]
/// Slot-filling contexts keyed by conversation id, evicted after inactivity.
pub struct ConversationStore {
    ttl_secs: u64,
    conversations: HashMap<String, ConversationEntry>,
}

impl ConversationStore {
    /// `ttl_secs == 0` keeps conversations until they are evicted explicitly.
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            ttl_secs,
            conversations: HashMap::new(),
        }
    }

    pub fn ttl_secs(&self) -> u64 {
        self.ttl_secs
    }

    pub fn len(&self) -> usize {
        self.conversations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.conversations.is_empty()
    }

    pub fn contains(&self, conversation_id: &str) -> bool {
        self.conversations.contains_key(conversation_id)
    }

    pub fn get(&self, conversation_id: &str) -> Option<&SlotFillingContext> {
        self.conversations
            .get(conversation_id)
            .map(|entry| &entry.context)
    }

    pub fn get_mut(&mut self, conversation_id: &str) -> Option<&mut SlotFillingContext> {
        self.conversations
            .get_mut(conversation_id)
            .map(|entry| &mut entry.context)
    }

    /// Starts a fresh context, replacing any existing one for the id.
    pub fn open(&mut self, conversation_id: &str, now_unix: u64) -> &mut SlotFillingContext {
        let entry = ConversationEntry {
            context: SlotFillingContext::new(),
            last_active_unix: now_unix,
        };
        tracing::debug!(conversation_id, "conversation opened");
        let slot = match self.conversations.entry(conversation_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                occupied.insert(entry);
                occupied.into_mut()
            }
            Entry::Vacant(vacant) => vacant.insert(entry),
        };
        &mut slot.context
    }

    /// Existing context with its activity refreshed, or a fresh one.
    ///
    /// A context that already expired is replaced rather than resumed.
    pub fn get_or_open(&mut self, conversation_id: &str, now_unix: u64) -> &mut SlotFillingContext {
        let expired = self
            .conversations
            .get(conversation_id)
            .is_some_and(|entry| self.is_entry_expired(entry, now_unix));
        if expired {
            tracing::debug!(conversation_id, "conversation expired; starting over");
            return self.open(conversation_id, now_unix);
        }
        let entry = self
            .conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| ConversationEntry {
                context: SlotFillingContext::new(),
                last_active_unix: now_unix,
            });
        entry.last_active_unix = now_unix;
        &mut entry.context
    }

    pub fn evict(&mut self, conversation_id: &str) -> bool {
        self.conversations.remove(conversation_id).is_some()
    }

    /// Drops every conversation idle for at least the TTL; returns how many.
    pub fn evict_expired(&mut self, now_unix: u64) -> usize {
        let ttl_secs = self.ttl_secs;
        let before = self.conversations.len();
        self.conversations.retain(|_, entry| {
            !is_expired_unix(expiry_after(entry.last_active_unix, ttl_secs), now_unix)
        });
        let evicted = before - self.conversations.len();
        if evicted > 0 {
            tracing::debug!(evicted, remaining = self.conversations.len(), "evicted idle conversations");
        }
        evicted
    }

    fn is_entry_expired(&self, entry: &ConversationEntry, now_unix: u64) -> bool {
        is_expired_unix(expiry_after(entry.last_active_unix, self.ttl_secs), now_unix)
    }
}
