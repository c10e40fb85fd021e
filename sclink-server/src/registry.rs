use std::collections::HashMap;
use std::sync::{Arc, Weak};

use sclink_osc::Message;

/// Receives server feedback addressed to one resource.
pub trait FeedbackSink: Send + Sync {
    fn deliver_feedback(&self, msg: &Message);
}

/// Id -> handle routing table for inbound replies.
///
/// Entries are weak so the table never keeps a handle alive. Entries whose
/// handle has been dropped are pruned on lookup.
pub struct Registry<T: ?Sized> {
    entries: HashMap<i32, Weak<T>>,
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Routes `id` to `handle`, replacing any previous entry.
    pub fn attach(&mut self, id: i32, handle: Weak<T>) {
        self.entries.insert(id, handle);
    }

    pub fn detach(&mut self, id: i32) -> bool {
        self.entries.remove(&id).is_some()
    }

    pub fn get(&mut self, id: i32) -> Option<Arc<T>> {
        let found = self.entries.get(&id)?.upgrade();
        if found.is_none() {
            self.entries.remove(&id);
        }
        found
    }

    /// Every handle still alive.
    pub fn live(&mut self) -> Vec<Arc<T>> {
        let mut out = Vec::with_capacity(self.entries.len());
        self.entries.retain(|_, weak| match weak.upgrade() {
            Some(strong) => {
                out.push(strong);
                true
            }
            None => false,
        });
        out
    }

    pub fn contains(&self, id: i32) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl<T: ?Sized> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}
