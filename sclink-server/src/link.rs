//! The seam between a session and the wire.
//!
//! `Link` captures the few things a session needs from a transport so that
//! session and handle logic can be exercised without a running server.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use sclink_osc::{Message, Packet, Transport, TransportError};

use crate::error::SessionResult;
use crate::sync::lock;

pub trait Link: Send {
    fn open(&mut self) -> SessionResult;

    fn close(&mut self);

    fn is_open(&self) -> bool;

    fn send(&self, packet: &Packet) -> SessionResult;

    /// Every message received since the last call, in arrival order.
    fn drain(&self) -> Vec<Message>;
}

impl Link for Transport {
    fn open(&mut self) -> SessionResult {
        Ok(Transport::open(self)?)
    }

    fn close(&mut self) {
        Transport::close(self)
    }

    fn is_open(&self) -> bool {
        Transport::is_open(self)
    }

    fn send(&self, packet: &Packet) -> SessionResult {
        Ok(self.send_packet(packet)?)
    }

    fn drain(&self) -> Vec<Message> {
        Transport::drain(self)
    }
}

/// Link that records every outbound packet and replays injected replies.
///
/// Uses `Mutex` for interior mutability so it can be shared through
/// [`SharedTestLink`] while a session owns it.
pub struct TestLink {
    sent: Mutex<Vec<Packet>>,
    inbound: Mutex<VecDeque<Message>>,
    open: Mutex<bool>,
    rejected: Mutex<Option<String>>,
}

impl TestLink {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            inbound: Mutex::new(VecDeque::new()),
            open: Mutex::new(true),
            rejected: Mutex::new(None),
        }
    }

    /// Packets in send order.
    pub fn sent(&self) -> Vec<Packet> {
        lock(&self.sent).clone()
    }

    /// Sent messages with bundles flattened.
    pub fn sent_messages(&self) -> Vec<Message> {
        self.sent()
            .into_iter()
            .flat_map(Packet::into_messages)
            .collect()
    }

    pub fn addresses(&self) -> Vec<String> {
        self.sent_messages().into_iter().map(|m| m.addr).collect()
    }

    pub fn count<F: Fn(&Message) -> bool>(&self, f: F) -> usize {
        self.sent_messages().iter().filter(|m| f(m)).count()
    }

    pub fn find<F: Fn(&Message) -> bool>(&self, f: F) -> Option<Message> {
        self.sent_messages().into_iter().find(|m| f(m))
    }

    pub fn clear(&self) {
        lock(&self.sent).clear();
    }

    /// Fail every later send of a packet containing `addr`, without recording it.
    pub fn reject(&self, addr: &str) {
        *lock(&self.rejected) = Some(addr.to_string());
    }

    /// Queue a message as if the server had sent it.
    pub fn inject(&self, msg: Message) {
        lock(&self.inbound).push_back(msg);
    }
}

impl Default for TestLink {
    fn default() -> Self {
        Self::new()
    }
}

impl Link for TestLink {
    fn open(&mut self) -> SessionResult {
        *lock(&self.open) = true;
        Ok(())
    }

    fn close(&mut self) {
        *lock(&self.open) = false;
    }

    fn is_open(&self) -> bool {
        *lock(&self.open)
    }

    fn send(&self, packet: &Packet) -> SessionResult {
        if let Some(addr) = lock(&self.rejected).as_deref() {
            if packet.clone().into_messages().iter().any(|m| m.addr == addr) {
                return Err(TransportError::NotOpen.into());
            }
        }
        lock(&self.sent).push(packet.clone());
        Ok(())
    }

    fn drain(&self) -> Vec<Message> {
        lock(&self.inbound).drain(..).collect()
    }
}

/// Wraps `Arc<TestLink>` so a test can keep inspecting the link a session owns.
pub struct SharedTestLink(pub Arc<TestLink>);

impl Link for SharedTestLink {
    fn open(&mut self) -> SessionResult {
        *lock(&self.0.open) = true;
        Ok(())
    }

    fn close(&mut self) {
        *lock(&self.0.open) = false;
    }

    fn is_open(&self) -> bool {
        self.0.is_open()
    }

    fn send(&self, packet: &Packet) -> SessionResult {
        self.0.send(packet)
    }

    fn drain(&self) -> Vec<Message> {
        self.0.drain()
    }
}
