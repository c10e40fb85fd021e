//! Creation state shared by every server-side resource handle.
//!
//! A handle's id is reserved before the server knows about it. Mutations
//! issued while creation is in flight are queued and flushed, in order, once
//! the server confirms creation.

use std::collections::VecDeque;

use sclink_osc::Message;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Id reserved, no creation message sent yet.
    Unallocated,
    /// Creation sent, waiting for the server to confirm.
    Pending,
    Live,
    Freed,
}

/// What to do with a mutation message.
#[derive(Debug, Clone, PartialEq)]
pub enum Dispatch {
    /// Send it now.
    Send(Message),
    /// Queued until creation is confirmed.
    Buffered,
    /// The resource is gone; the message was discarded.
    Dropped(Message),
}

/// Outcome of releasing a resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Release {
    /// The server knows about the resource. Send `pending` and then the
    /// resource's free command.
    Teardown { pending: Vec<Message> },
    /// Never created on the server; nothing to send.
    Discard,
    AlreadyFreed,
}

#[derive(Debug)]
pub struct Lifecycle {
    id: i32,
    state: LifecycleState,
    pending: VecDeque<Message>,
}

impl Lifecycle {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            state: LifecycleState::Unallocated,
            pending: VecDeque::new(),
        }
    }

    /// For resources that exist as soon as their id is reserved (buses).
    pub fn live(id: i32) -> Self {
        Self {
            id,
            state: LifecycleState::Live,
            pending: VecDeque::new(),
        }
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Moves to `Pending`. Returns false unless the resource is still
    /// unallocated; only one creation message ever goes out.
    pub fn begin_create(&mut self) -> bool {
        match self.state {
            LifecycleState::Unallocated => {
                self.state = LifecycleState::Pending;
                true
            }
            LifecycleState::Pending | LifecycleState::Live | LifecycleState::Freed => false,
        }
    }

    pub fn buffer_or_flush(&mut self, msg: Message) -> Dispatch {
        match self.state {
            LifecycleState::Live => Dispatch::Send(msg),
            LifecycleState::Unallocated | LifecycleState::Pending => {
                self.pending.push_back(msg);
                Dispatch::Buffered
            }
            LifecycleState::Freed => Dispatch::Dropped(msg),
        }
    }

    /// Creation confirmed. Returns the queued messages in submission order.
    /// A confirmation for a freed resource changes nothing.
    pub fn acknowledge(&mut self) -> Vec<Message> {
        match self.state {
            LifecycleState::Unallocated | LifecycleState::Pending => {
                self.state = LifecycleState::Live;
                self.pending.drain(..).collect()
            }
            LifecycleState::Live | LifecycleState::Freed => Vec::new(),
        }
    }

    pub fn release(&mut self) -> Release {
        let previous = std::mem::replace(&mut self.state, LifecycleState::Freed);
        let pending: Vec<Message> = self.pending.drain(..).collect();
        match previous {
            LifecycleState::Pending | LifecycleState::Live => Release::Teardown { pending },
            LifecycleState::Unallocated => Release::Discard,
            LifecycleState::Freed => Release::AlreadyFreed,
        }
    }

    /// The server ended the resource on its own.
    pub fn mark_ended(&mut self) {
        self.state = LifecycleState::Freed;
        self.pending.clear();
    }
}
