use std::path::Path;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crossbeam_channel::Receiver;
use log::{debug, info, trace, warn};
use sclink_osc::{Arg, Bundle, Message, Packet, Transport};

use crate::alloc::IdAllocator;
use crate::buffer::{BufferCore, BufferInfo};
use crate::bus::{BusCore, Rate};
use crate::config::SessionConfig;
use crate::error::{AllocError, SessionError, SessionResult};
use crate::events::{SessionEvent, Subscribers};
use crate::heartbeat::{Heartbeat, HeartbeatEvent, StatusReply};
use crate::link::Link;
use crate::outbound::Outbound;
use crate::registry::{FeedbackSink, Registry};
use crate::sync::lock;

/// Replies routed to a node by the id in their first argument.
const NODE_REPLIES: &[&str] = &["/n_go", "/n_end", "/n_off", "/n_on", "/n_move", "/n_info", "/tr"];

/// Commands whose `/done` confirms a buffer allocation.
const BUFFER_ALLOC_COMMANDS: &[&str] = &["/b_alloc", "/b_allocRead", "/b_allocReadChannel"];

/// Client-side view of one SuperCollider server.
///
/// Owns the link, the id allocators and the routing tables that deliver
/// server replies to the handle they concern. Cheap to clone; every handle
/// keeps a clone. Inbound traffic is only processed by [`Session::tick`], so
/// the caller decides which thread sees handle callbacks.
#[derive(Clone)]
pub struct Session {
    inner: Arc<Inner>,
}

struct Inner {
    config: SessionConfig,
    link: Mutex<Box<dyn Link>>,
    pools: Mutex<Pools>,
    next_node_id: AtomicI32,
    routes: Mutex<Routes>,
    outbound: Mutex<Outbound>,
    heartbeat: Mutex<Heartbeat>,
    events: Mutex<Subscribers<SessionEvent>>,
}

struct Pools {
    audio_buses: IdAllocator,
    control_buses: IdAllocator,
    buffers: IdAllocator,
}

impl Pools {
    fn buses(&mut self, rate: Rate) -> &mut IdAllocator {
        match rate {
            Rate::Audio => &mut self.audio_buses,
            Rate::Control => &mut self.control_buses,
        }
    }
}

#[derive(Default)]
struct Routes {
    nodes: Registry<dyn FeedbackSink>,
    control_buses: Registry<BusCore>,
    buffers: Registry<BufferCore>,
}

impl Session {
    /// Session over a UDP transport built from `config.osc`. Opens it right
    /// away when `auto_start` is set.
    pub fn new(config: SessionConfig) -> SessionResult<Self> {
        let auto_start = config.osc.auto_start;
        let transport = Transport::new(config.osc.clone());
        let session = Self::with_link(config, Box::new(transport));
        if auto_start {
            session.start()?;
        }
        Ok(session)
    }

    /// Session on the local server using [`SessionConfig::load`].
    pub fn local() -> SessionResult<Self> {
        Self::new(SessionConfig::load())
    }

    /// Session over any link. Does not open it.
    pub fn with_link(config: SessionConfig, link: Box<dyn Link>) -> Self {
        let alloc = &config.allocators;
        let pools = Pools {
            audio_buses: IdAllocator::with_reserved(alloc.audio_buses, alloc.reserved_audio_buses),
            control_buses: IdAllocator::new(alloc.control_buses),
            buffers: IdAllocator::new(alloc.buffers),
        };
        let node_id_base = alloc.node_id_base;
        let outbound = Outbound::new(
            config.outbound.max_held_messages,
            config.outbound.latency(),
        );
        let heartbeat = Heartbeat::new(
            config.heartbeat.boot_policy,
            config.heartbeat.max_missed_replies,
        );
        Self {
            inner: Arc::new(Inner {
                link: Mutex::new(link),
                pools: Mutex::new(pools),
                next_node_id: AtomicI32::new(node_id_base),
                routes: Mutex::new(Routes::default()),
                outbound: Mutex::new(outbound),
                heartbeat: Mutex::new(heartbeat),
                events: Mutex::new(Subscribers::new()),
                config,
            }),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    pub fn start(&self) -> SessionResult {
        let mut link = lock(&self.inner.link);
        if !link.is_open() {
            link.open()?;
            info!(target: "server::session", "session started");
        }
        Ok(())
    }

    /// Sends anything held, closes the link and forgets boot state.
    pub fn stop(&self) {
        if let Err(e) = self.flush() {
            warn!(target: "server::session", "dropping held messages on stop: {e}");
        }
        lock(&self.inner.link).close();
        lock(&self.inner.heartbeat).reset();
        info!(target: "server::session", "session stopped");
    }

    pub fn is_open(&self) -> bool {
        lock(&self.inner.link).is_open()
    }

    pub fn is_booted(&self) -> bool {
        lock(&self.inner.heartbeat).is_booted()
    }

    /// Booted and synthdefs loaded with `/d_loadDir`.
    pub fn is_initialized(&self) -> bool {
        lock(&self.inner.heartbeat).is_initialized()
    }

    /// Most recent `/status.reply`.
    pub fn status(&self) -> Option<StatusReply> {
        lock(&self.inner.heartbeat).last_status()
    }

    pub fn subscribe(&self) -> Receiver<SessionEvent> {
        lock(&self.inner.events).subscribe()
    }

    /// Sends through hold mode and latency stamping.
    pub fn send(&self, msg: Message) -> SessionResult {
        self.submit(Packet::Message(msg))
    }

    pub fn send_bundle(&self, bundle: Bundle) -> SessionResult {
        self.submit(Packet::Bundle(bundle))
    }

    /// Sends straight to the link, bypassing hold mode and latency.
    pub fn send_now(&self, packet: &Packet) -> SessionResult {
        lock(&self.inner.link).send(packet)
    }

    /// Sends every message even if some fail; returns the first failure.
    pub(crate) fn send_all(&self, msgs: impl IntoIterator<Item = Message>) -> SessionResult {
        let mut first_err = None;
        for msg in msgs {
            let addr = msg.addr.clone();
            if let Err(e) = self.send(msg) {
                warn!(target: "server::session", "{addr} not sent: {e}");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn submit(&self, packet: Packet) -> SessionResult {
        let ready = lock(&self.inner.outbound).submit(packet);
        for packet in &ready {
            self.send_now(packet)?;
        }
        Ok(())
    }

    /// While holding, everything sent is collected into one bundle. Turning
    /// hold off sends it.
    pub fn set_hold(&self, hold: bool) -> SessionResult {
        let flushed = lock(&self.inner.outbound).set_hold(hold);
        match flushed {
            Some(packet) => self.send_now(&packet),
            None => Ok(()),
        }
    }

    pub fn is_holding(&self) -> bool {
        lock(&self.inner.outbound).is_holding()
    }

    /// Sends the held bundle now without leaving hold mode.
    pub fn flush(&self) -> SessionResult {
        let flushed = lock(&self.inner.outbound).flush();
        match flushed {
            Some(packet) => self.send_now(&packet),
            None => Ok(()),
        }
    }

    /// `Some(d)` wraps outgoing messages in bundles scheduled `d` from now.
    pub fn set_latency(&self, latency: Option<Duration>) {
        lock(&self.inner.outbound).set_latency(latency);
    }

    pub fn latency(&self) -> Option<Duration> {
        lock(&self.inner.outbound).latency()
    }

    /// /notify flag
    /// Ask the server to (not) send node notifications to this client.
    pub fn notify(&self, enabled: bool) -> SessionResult {
        self.send_now(&Packet::Message(
            Message::new("/notify").arg(enabled as i32),
        ))
    }

    /// /d_loadDir path
    pub fn load_synthdef_dir(&self, dir: impl AsRef<Path>) -> SessionResult {
        let dir = dir.as_ref();
        let path = dir
            .to_str()
            .ok_or_else(|| SessionError::NonUtf8Path(dir.to_path_buf()))?;
        self.send(Message::new("/d_loadDir").arg(path))
    }

    /// Sends one `/status` poll and processes every queued reply.
    ///
    /// Call periodically from the thread that should observe handle
    /// callbacks; each call counts as one poll for loss detection.
    pub fn tick(&self) {
        if !self.is_open() {
            return;
        }
        self.poll_status();
        let inbound = lock(&self.inner.link).drain();
        for msg in inbound {
            self.dispatch(msg);
        }
    }

    fn poll_status(&self) {
        if let Err(e) = self.send_now(&Packet::Message(Message::new("/status"))) {
            debug!(target: "server::session", "status poll not sent: {e}");
        }
        let event = lock(&self.inner.heartbeat).on_status_sent();
        if event == Some(HeartbeatEvent::Lost) {
            self.emit(SessionEvent::ServerLost);
        }
    }

    fn dispatch(&self, msg: Message) {
        trace!(target: "server::session", "<- {} {:?}", msg.addr, msg.args);
        let addr = msg.addr.clone();
        match addr.as_str() {
            "/status.reply" => self.on_status_reply(&msg),
            "/done" => self.on_done(msg),
            "/fail" => self.on_fail(msg),
            "/d_removed" => {
                let name = msg.str_at(0).unwrap_or_default().to_string();
                self.emit(SessionEvent::SynthDefRemoved(name));
            }
            "/b_info" => self.on_buffer_info(&msg),
            "/c_set" => self.on_control_values(&msg),
            "/g_queryTree.reply" => self.on_query_tree(msg),
            addr if NODE_REPLIES.contains(&addr) => {
                if !self.route_to_node(&msg) {
                    debug!(
                        target: "server::node",
                        "{addr} for untracked node {:?}",
                        msg.int_at(0)
                    );
                }
            }
            _ => {
                if !self.route_to_node(&msg) {
                    self.emit(SessionEvent::Message(msg));
                }
            }
        }
    }

    fn on_status_reply(&self, msg: &Message) {
        let Some(status) = StatusReply::parse(msg) else {
            warn!(target: "server::session", "malformed /status.reply: {:?}", msg.args);
            return;
        };
        let event = lock(&self.inner.heartbeat).on_status_reply(status);
        if event == Some(HeartbeatEvent::Booted) {
            self.on_boot(status);
        }
    }

    fn on_boot(&self, status: StatusReply) {
        self.emit(SessionEvent::Booted(status));
        let heartbeat = &self.inner.config.heartbeat;
        if heartbeat.notify_on_boot {
            if let Err(e) = self.notify(true) {
                warn!(target: "server::session", "couldn't request notifications: {e}");
            }
        }
        if let Some(dir) = &heartbeat.synthdef_dir {
            if let Err(e) = self.load_synthdef_dir(dir) {
                warn!(target: "server::session", "couldn't load synthdefs from {}: {e}", dir.display());
            }
        }
    }

    fn on_done(&self, msg: Message) {
        let command = msg.str_at(0).unwrap_or_default().to_string();
        if command == "/d_loadDir" {
            lock(&self.inner.heartbeat).on_synthdefs_loaded();
            info!(target: "server::session", "synthdefs loaded");
            self.emit(SessionEvent::Initialized);
        } else if BUFFER_ALLOC_COMMANDS.contains(&command.as_str()) {
            match msg.int_at(1) {
                Some(bufnum) => self.on_buffer_allocated(bufnum),
                None => warn!(target: "server::buffer", "{command} done without a buffer number"),
            }
        }
        self.emit(SessionEvent::Done {
            command,
            message: msg,
        });
    }

    fn on_fail(&self, msg: Message) {
        let command = msg.str_at(0).unwrap_or_default().to_string();
        let reason = msg
            .args
            .iter()
            .skip(1)
            .filter_map(Arg::as_str)
            .collect::<Vec<_>>()
            .join(" ");
        warn!(target: "server::session", "server failed {command}: {reason}");
        self.emit(SessionEvent::Failed { command, reason });
    }

    fn on_buffer_allocated(&self, bufnum: i32) {
        let buffer = lock(&self.inner.routes).buffers.get(bufnum);
        match buffer {
            Some(buffer) => buffer.acknowledge(),
            None => debug!(target: "server::buffer", "allocation done for untracked buffer {bufnum}"),
        }
    }

    /// /b_info is a sequence of (bufnum, frames, channels, sample rate).
    fn on_buffer_info(&self, msg: &Message) {
        for entry in msg.args.chunks(4) {
            let [bufnum, frames, channels, sample_rate] = entry else {
                warn!(target: "server::buffer", "ignoring incomplete /b_info entry {entry:?}");
                break;
            };
            let (Some(bufnum), Some(frames), Some(channels), Some(sample_rate)) = (
                bufnum.as_int(),
                frames.as_int(),
                channels.as_int(),
                sample_rate.as_float(),
            ) else {
                warn!(target: "server::buffer", "ignoring malformed /b_info entry {entry:?}");
                continue;
            };
            let buffer = lock(&self.inner.routes).buffers.get(bufnum);
            if let Some(buffer) = buffer {
                buffer.apply_info(BufferInfo {
                    frames,
                    channels,
                    sample_rate,
                });
            }
        }
    }

    /// Routed by the first bus index; see [`BusCore::apply_values`].
    fn on_control_values(&self, msg: &Message) {
        let Some(first) = msg.int_at(0) else {
            warn!(target: "server::bus", "/c_set reply without a bus index");
            return;
        };
        let bus = lock(&self.inner.routes).control_buses.get(first);
        match bus {
            Some(bus) => {
                bus.apply_values(msg, self.inner.config.allocators.control_buses);
            }
            None => debug!(target: "server::bus", "/c_set for untracked control bus {first}"),
        }
    }

    /// The reply carries no usable routing key, so every live node sees it.
    fn on_query_tree(&self, msg: Message) {
        let nodes = lock(&self.inner.routes).nodes.live();
        for node in nodes {
            node.deliver_feedback(&msg);
        }
        self.emit(SessionEvent::QueryTree(msg));
    }

    fn route_to_node(&self, msg: &Message) -> bool {
        let Some(id) = msg.int_at(0) else {
            return false;
        };
        let node = lock(&self.inner.routes).nodes.get(id);
        match node {
            Some(node) => {
                node.deliver_feedback(msg);
                true
            }
            None => false,
        }
    }

    fn emit(&self, event: SessionEvent) {
        lock(&self.inner.events).emit(event);
    }

    /// Number of nodes currently receiving feedback.
    pub fn tracked_nodes(&self) -> usize {
        let nodes = lock(&self.inner.routes).nodes.live();
        nodes.len()
    }

    pub fn buses_in_use(&self, rate: Rate) -> usize {
        lock(&self.inner.pools).buses(rate).in_use()
    }

    pub fn buffers_in_use(&self) -> usize {
        lock(&self.inner.pools).buffers.in_use()
    }

    pub(crate) fn next_node_id(&self) -> i32 {
        self.inner.next_node_id.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn attach_node(&self, id: i32, node: Weak<dyn FeedbackSink>) {
        lock(&self.inner.routes).nodes.attach(id, node);
    }

    pub(crate) fn detach_node(&self, id: i32) {
        lock(&self.inner.routes).nodes.detach(id);
    }

    pub(crate) fn alloc_bus(&self, rate: Rate, channels: usize) -> Result<i32, AllocError> {
        let mut pools = lock(&self.inner.pools);
        let pool = pools.buses(rate);
        let base = pool.alloc(channels)?;
        to_id(pool, base, channels)
    }

    pub(crate) fn free_bus(&self, rate: Rate, index: i32) {
        if let Ok(base) = usize::try_from(index) {
            lock(&self.inner.pools).buses(rate).free(base);
        }
    }

    pub(crate) fn alloc_buffer_id(&self) -> Result<i32, AllocError> {
        let mut pools = lock(&self.inner.pools);
        let base = pools.buffers.alloc(1)?;
        to_id(&mut pools.buffers, base, 1)
    }

    pub(crate) fn free_buffer_id(&self, bufnum: i32) {
        if let Ok(base) = usize::try_from(bufnum) {
            lock(&self.inner.pools).buffers.free(base);
        }
    }

    pub(crate) fn attach_control_bus(&self, index: i32, bus: Weak<BusCore>) {
        lock(&self.inner.routes).control_buses.attach(index, bus);
    }

    pub(crate) fn detach_control_bus(&self, index: i32) {
        lock(&self.inner.routes).control_buses.detach(index);
    }

    pub(crate) fn attach_buffer(&self, bufnum: i32, buffer: Weak<BufferCore>) {
        lock(&self.inner.routes).buffers.attach(bufnum, buffer);
    }

    pub(crate) fn detach_buffer(&self, bufnum: i32) {
        lock(&self.inner.routes).buffers.detach(bufnum);
    }
}

/// Ids go on the wire as `i32`; give the range back if one doesn't fit.
fn to_id(pool: &mut IdAllocator, base: usize, size: usize) -> Result<i32, AllocError> {
    i32::try_from(base).map_err(|_| {
        pool.free(base);
        AllocError::Exhausted {
            size,
            capacity: pool.capacity(),
        }
    })
}
