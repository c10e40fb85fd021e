use crossbeam_channel::{Receiver, Sender};
use sclink_osc::Message;

use crate::heartbeat::StatusReply;

/// Session-level notifications, delivered to every subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// First qualifying `/status.reply` after start or after a loss.
    Booted(StatusReply),
    /// Too many `/status` polls went unanswered.
    ServerLost,
    /// `/done /d_loadDir` arrived.
    Initialized,
    /// Any `/done` reply, with the completed command and its extra arguments.
    Done { command: String, message: Message },
    Failed { command: String, reason: String },
    SynthDefRemoved(String),
    /// `/g_queryTree.reply`; also delivered to every live node.
    QueryTree(Message),
    /// An inbound message nothing else claimed.
    Message(Message),
}

/// Fan-out to any number of channel receivers. Disconnected receivers are
/// dropped on the next emit.
pub(crate) struct Subscribers<T> {
    senders: Vec<Sender<T>>,
}

impl<T: Clone> Subscribers<T> {
    pub fn new() -> Self {
        Self {
            senders: Vec::new(),
        }
    }

    pub fn subscribe(&mut self) -> Receiver<T> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.senders.push(tx);
        rx
    }

    pub fn emit(&mut self, item: T) {
        self.senders.retain(|tx| tx.send(item.clone()).is_ok());
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.senders.len()
    }
}
