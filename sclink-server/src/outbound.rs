use std::time::Duration;

use sclink_osc::{Bundle, Packet, Timetag};

/// Outbound shaping for a session: optional hold mode and latency stamping.
///
/// While holding, submitted messages are collected into one bundle instead of
/// going out. The held bundle is emitted when hold is switched off, on
/// [`Outbound::flush`], or before it would exceed `max_held` messages.
#[derive(Debug)]
pub struct Outbound {
    hold: bool,
    held: Vec<Packet>,
    held_messages: usize,
    max_held: usize,
    latency: Option<Duration>,
}

impl Outbound {
    pub fn new(max_held: usize, latency: Option<Duration>) -> Self {
        Self {
            hold: false,
            held: Vec::new(),
            held_messages: 0,
            max_held: max_held.max(1),
            latency,
        }
    }

    pub fn is_holding(&self) -> bool {
        self.hold
    }

    pub fn held_messages(&self) -> usize {
        self.held_messages
    }

    pub fn latency(&self) -> Option<Duration> {
        self.latency
    }

    pub fn set_latency(&mut self, latency: Option<Duration>) {
        self.latency = latency;
    }

    /// Switching hold off returns the held bundle, if any.
    pub fn set_hold(&mut self, hold: bool) -> Option<Packet> {
        let flushed = if hold { None } else { self.take_held() };
        self.hold = hold;
        flushed
    }

    pub fn flush(&mut self) -> Option<Packet> {
        self.take_held()
    }

    /// Returns the packets that should go out now, in order.
    pub fn submit(&mut self, packet: Packet) -> Vec<Packet> {
        let incoming = packet.message_count();
        let mut ready = Vec::new();
        if self.held_messages > 0 && self.held_messages + incoming > self.max_held {
            ready.extend(self.take_held());
        }
        if self.hold {
            self.held_messages += incoming;
            match packet {
                Packet::Bundle(bundle) => self.held.extend(bundle.content),
                message => self.held.push(message),
            }
        } else {
            ready.push(self.stamp(packet));
        }
        ready
    }

    fn stamp(&self, packet: Packet) -> Packet {
        let Some(latency) = self.latency else {
            return packet;
        };
        match packet {
            Packet::Message(msg) => {
                let mut bundle = Bundle::new(Timetag::from_now(latency));
                bundle.push(msg);
                Packet::Bundle(bundle)
            }
            Packet::Bundle(mut bundle) if bundle.timetag.is_immediate() => {
                bundle.timetag = Timetag::from_now(latency);
                Packet::Bundle(bundle)
            }
            scheduled => scheduled,
        }
    }

    fn take_held(&mut self) -> Option<Packet> {
        if self.held.is_empty() {
            return None;
        }
        let timetag = self
            .latency
            .map(Timetag::from_now)
            .unwrap_or(Timetag::IMMEDIATE);
        self.held_messages = 0;
        Some(Packet::Bundle(Bundle {
            timetag,
            content: std::mem::take(&mut self.held),
        }))
    }
}
