use std::sync::Arc;

use sclink_osc::Message;

use crate::error::SessionResult;
use crate::node::{AddAction, Node, NodeCore, NodeKind, DEFAULT_GROUP};
use crate::session::Session;

/// Handle to a group node.
pub struct Group {
    core: Arc<NodeCore>,
}

impl Group {
    /// Reserves a node id. Nothing is sent until [`Group::create`].
    pub fn new(session: &Session) -> Self {
        Self {
            core: NodeCore::new(session, NodeKind::Group),
        }
    }

    /// /g_new nodeID addAction targetID
    pub fn create(&self, action: AddAction, target: i32) -> SessionResult {
        self.core.send_create(|id| {
            Message::new("/g_new")
                .arg(id)
                .arg(action.code())
                .arg(target)
        })
    }

    /// /p_new nodeID addAction targetID
    /// A group whose children may be evaluated in parallel (supernova).
    pub fn create_parallel(&self, action: AddAction, target: i32) -> SessionResult {
        self.core.send_create(|id| {
            Message::new("/p_new")
                .arg(id)
                .arg(action.code())
                .arg(target)
        })
    }

    pub fn add_to_head(&self, group: i32) -> SessionResult {
        self.create(AddAction::Head, group)
    }

    pub fn add_to_tail(&self, group: i32) -> SessionResult {
        self.create(AddAction::Tail, group)
    }

    /// Tail of the server's default group.
    pub fn add_to_default(&self) -> SessionResult {
        self.create(AddAction::Tail, DEFAULT_GROUP)
    }

    /// /g_freeAll groupID
    /// Frees the group's immediate children.
    pub fn free_all(&self) -> SessionResult {
        self.core
            .mutate(Message::new("/g_freeAll").arg(self.core.id()))
    }

    /// /g_deepFree groupID
    /// Frees every synth below this group, keeping nested groups.
    pub fn deep_free(&self) -> SessionResult {
        self.core
            .mutate(Message::new("/g_deepFree").arg(self.core.id()))
    }

    /// /g_queryTree groupID flag
    /// The reply reaches every live node's feedback and the session events.
    pub fn query_tree(&self, include_controls: bool) -> SessionResult {
        self.core.mutate(
            Message::new("/g_queryTree")
                .arg(self.core.id())
                .arg(include_controls as i32),
        )
    }
}

impl Node for Group {
    fn core(&self) -> &Arc<NodeCore> {
        &self.core
    }
}
