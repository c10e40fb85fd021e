use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crossbeam_channel::Receiver;
use log::{debug, warn};
use sclink_osc::Message;

use crate::error::SessionResult;
use crate::events::Subscribers;
use crate::lifecycle::{Dispatch, Lifecycle, LifecycleState, Release};
use crate::registry::FeedbackSink;
use crate::session::Session;
use crate::sync::lock;

/// The server's root node.
pub const ROOT_NODE: i32 = 0;
/// The default group every booted server creates under the root.
pub const DEFAULT_GROUP: i32 = 1;

/// Where a new or moved node goes relative to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AddAction {
    /// Head of the target group.
    #[default]
    Head = 0,
    /// Tail of the target group.
    Tail = 1,
    /// Just before the target node.
    Before = 2,
    /// Just after the target node.
    After = 3,
    /// Replace the target node, which is freed.
    Replace = 4,
}

impl AddAction {
    pub fn code(self) -> i32 {
        self as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Synth,
    Group,
}

/// State shared by synth and group handles.
///
/// The node id is taken from the session counter when the handle is built.
/// Mutations before the server's `/n_go` are queued and flushed in order;
/// dropping the last reference frees the node on the server.
pub struct NodeCore {
    session: Session,
    kind: NodeKind,
    lifecycle: Mutex<Lifecycle>,
    running: AtomicBool,
    feedback: Mutex<Subscribers<Message>>,
}

impl NodeCore {
    pub(crate) fn new(session: &Session, kind: NodeKind) -> Arc<Self> {
        let id = session.next_node_id();
        Arc::new(Self {
            session: session.clone(),
            kind,
            lifecycle: Mutex::new(Lifecycle::new(id)),
            running: AtomicBool::new(false),
            feedback: Mutex::new(Subscribers::new()),
        })
    }

    pub fn id(&self) -> i32 {
        lock(&self.lifecycle).id()
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.lifecycle).state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// True between `/n_go` (or `/n_on`) and `/n_off` or `/n_end`.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Sends the creation message built by `build` unless the node already
    /// exists. The node starts receiving feedback before the message leaves.
    pub(crate) fn send_create(
        self: &Arc<Self>,
        build: impl FnOnce(i32) -> Message,
    ) -> SessionResult {
        let mut lifecycle = lock(&self.lifecycle);
        let id = lifecycle.id();
        if !lifecycle.begin_create() {
            warn!(target: "server::node", "node {id} is {:?}, not creating it again", lifecycle.state());
            return Ok(());
        }
        let sink: Weak<dyn FeedbackSink> = Arc::downgrade(self) as Weak<dyn FeedbackSink>;
        self.session.attach_node(id, sink);
        self.session.send(build(id))
    }

    /// Sends `msg` once the node is live; queues it while creation is pending.
    pub(crate) fn mutate(&self, msg: Message) -> SessionResult {
        let mut lifecycle = lock(&self.lifecycle);
        match lifecycle.buffer_or_flush(msg) {
            Dispatch::Send(msg) => self.session.send(msg),
            Dispatch::Buffered => Ok(()),
            Dispatch::Dropped(msg) => {
                debug!(target: "server::node", "node {} is freed, dropping {}", lifecycle.id(), msg.addr);
                Ok(())
            }
        }
    }

    /// /n_free nodeID
    pub fn free(&self) -> SessionResult {
        let mut lifecycle = lock(&self.lifecycle);
        let id = lifecycle.id();
        match lifecycle.release() {
            Release::Teardown { pending } => {
                self.session.detach_node(id);
                self.running.store(false, Ordering::Release);
                let free = Message::new("/n_free").arg(id);
                self.session.send_all(pending.into_iter().chain(Some(free)))
            }
            Release::Discard => {
                self.session.detach_node(id);
                Ok(())
            }
            Release::AlreadyFreed => Ok(()),
        }
    }

    pub fn feedback(&self) -> Receiver<Message> {
        lock(&self.feedback).subscribe()
    }

    fn on_started(&self) {
        self.running.store(true, Ordering::Release);
        let mut lifecycle = lock(&self.lifecycle);
        let pending = lifecycle.acknowledge();
        for msg in pending {
            if let Err(e) = self.session.send(msg) {
                warn!(target: "server::node", "node {}: queued message not sent: {e}", lifecycle.id());
            }
        }
    }

    fn on_ended(&self) {
        self.running.store(false, Ordering::Release);
        let mut lifecycle = lock(&self.lifecycle);
        lifecycle.mark_ended();
        self.session.detach_node(lifecycle.id());
    }
}

impl FeedbackSink for NodeCore {
    fn deliver_feedback(&self, msg: &Message) {
        match msg.addr.as_str() {
            "/n_go" => self.on_started(),
            "/n_end" => self.on_ended(),
            "/n_off" => self.running.store(false, Ordering::Release),
            "/n_on" => self.running.store(true, Ordering::Release),
            _ => {}
        }
        lock(&self.feedback).emit(msg.clone());
    }
}

impl Drop for NodeCore {
    fn drop(&mut self) {
        if let Err(e) = self.free() {
            warn!(target: "server::node", "node {}: free on drop failed: {e}", self.id());
        }
    }
}

/// Operations shared by synths and groups.
pub trait Node {
    fn core(&self) -> &Arc<NodeCore>;

    fn id(&self) -> i32 {
        self.core().id()
    }

    fn state(&self) -> LifecycleState {
        self.core().state()
    }

    fn is_running(&self) -> bool {
        self.core().is_running()
    }

    /// /n_run nodeID flag
    fn run(&self, running: bool) -> SessionResult {
        let core = self.core();
        core.mutate(Message::new("/n_run").arg(core.id()).arg(running as i32))
    }

    /// /n_order addAction targetID nodeID
    fn order(&self, action: AddAction, target: i32) -> SessionResult {
        let core = self.core();
        core.mutate(
            Message::new("/n_order")
                .arg(action.code())
                .arg(target)
                .arg(core.id()),
        )
    }

    /// /n_before nodeID targetID
    fn move_before(&self, target: &dyn Node) -> SessionResult {
        let core = self.core();
        core.mutate(Message::new("/n_before").arg(core.id()).arg(target.id()))
    }

    /// /n_after nodeID targetID
    fn move_after(&self, target: &dyn Node) -> SessionResult {
        let core = self.core();
        core.mutate(Message::new("/n_after").arg(core.id()).arg(target.id()))
    }

    /// /n_query nodeID
    /// The server answers with /n_info, delivered through [`Node::feedback`].
    fn query(&self) -> SessionResult {
        let core = self.core();
        core.mutate(Message::new("/n_query").arg(core.id()))
    }

    /// Idempotent. Queued mutations go out before the free.
    fn free(&self) -> SessionResult {
        self.core().free()
    }

    /// Every server message routed to this node, from now on.
    fn feedback(&self) -> Receiver<Message> {
        self.core().feedback()
    }
}
