use std::sync::{Arc, Mutex};

use log::{debug, warn};
use sclink_osc::Message;

use crate::error::{SessionError, SessionResult};
use crate::lifecycle::{Dispatch, Lifecycle, LifecycleState, Release};
use crate::session::Session;
use crate::sync::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Rate {
    Audio,
    Control,
}

/// Handle to a range of consecutive buses.
///
/// Bus indices are purely client-side bookkeeping, so the bus is live as soon
/// as its range is allocated. Control buses cache the last values reported
/// by the server.
pub struct Bus {
    core: Arc<BusCore>,
}

pub(crate) struct BusCore {
    session: Session,
    rate: Rate,
    channels: usize,
    lifecycle: Mutex<Lifecycle>,
    values: Mutex<Vec<f32>>,
}

impl Bus {
    pub fn new(session: &Session, rate: Rate, channels: usize) -> SessionResult<Self> {
        let index = session.alloc_bus(rate, channels)?;
        let cached = match rate {
            Rate::Control => channels,
            Rate::Audio => 0,
        };
        let core = Arc::new(BusCore {
            session: session.clone(),
            rate,
            channels,
            lifecycle: Mutex::new(Lifecycle::live(index)),
            values: Mutex::new(vec![0.0; cached]),
        });
        if rate == Rate::Control {
            session.attach_control_bus(index, Arc::downgrade(&core));
        }
        Ok(Self { core })
    }

    pub fn audio(session: &Session, channels: usize) -> SessionResult<Self> {
        Self::new(session, Rate::Audio, channels)
    }

    pub fn control(session: &Session, channels: usize) -> SessionResult<Self> {
        Self::new(session, Rate::Control, channels)
    }

    /// First bus index.
    pub fn index(&self) -> i32 {
        self.core.index()
    }

    pub fn channels(&self) -> usize {
        self.core.channels
    }

    pub fn rate(&self) -> Rate {
        self.core.rate
    }

    pub fn state(&self) -> LifecycleState {
        lock(&self.core.lifecycle).state()
    }

    /// Synth argument string mapping a control to this bus: `"a<index>"` or
    /// `"c<index>"`.
    pub fn map_arg(&self) -> String {
        match self.core.rate {
            Rate::Audio => format!("a{}", self.index()),
            Rate::Control => format!("c{}", self.index()),
        }
    }

    /// /c_set index value
    pub fn set(&self, value: f32) -> SessionResult {
        self.control_only("set")?;
        self.core
            .mutate(Message::new("/c_set").arg(self.index()).arg(value))
    }

    /// /c_setn index count values...
    pub fn set_channels(&self, values: &[f32]) -> SessionResult {
        self.control_only("set_channels")?;
        let count = values.len().min(self.core.channels);
        let mut msg = Message::new("/c_setn")
            .arg(self.index())
            .arg(count as i32);
        for v in &values[..count] {
            msg.push(*v);
        }
        self.core.mutate(msg)
    }

    /// /c_fill index count value
    pub fn fill(&self, value: f32) -> SessionResult {
        self.control_only("fill")?;
        self.core.mutate(
            Message::new("/c_fill")
                .arg(self.index())
                .arg(self.core.channels as i32)
                .arg(value),
        )
    }

    /// /c_get index...
    /// One index per channel; the `/c_set` reply updates [`Bus::values`].
    pub fn request_values(&self) -> SessionResult {
        self.control_only("request_values")?;
        let first = self.index();
        let mut msg = Message::new("/c_get");
        for offset in 0..self.core.channels as i32 {
            msg.push(first + offset);
        }
        self.core.mutate(msg)
    }

    /// Last values reported by the server, one per channel.
    pub fn values(&self) -> Vec<f32> {
        lock(&self.core.values).clone()
    }

    pub fn value(&self) -> Option<f32> {
        lock(&self.core.values).first().copied()
    }

    /// Returns the range to the allocator. Idempotent.
    pub fn free(&self) {
        self.core.free();
    }

    fn control_only(&self, op: &'static str) -> SessionResult {
        match self.core.rate {
            Rate::Control => Ok(()),
            Rate::Audio => Err(SessionError::ControlRateOnly(op)),
        }
    }
}

impl BusCore {
    fn index(&self) -> i32 {
        lock(&self.lifecycle).id()
    }

    fn mutate(&self, msg: Message) -> SessionResult {
        let mut lifecycle = lock(&self.lifecycle);
        match lifecycle.buffer_or_flush(msg) {
            Dispatch::Send(msg) => self.session.send(msg),
            Dispatch::Buffered => Ok(()),
            Dispatch::Dropped(msg) => {
                debug!(target: "server::bus", "bus {} is freed, dropping {}", lifecycle.id(), msg.addr);
                Ok(())
            }
        }
    }

    fn free(&self) {
        let mut lifecycle = lock(&self.lifecycle);
        let index = lifecycle.id();
        if lifecycle.release() == Release::AlreadyFreed {
            return;
        }
        if self.rate == Rate::Control {
            self.session.detach_control_bus(index);
        }
        self.session.free_bus(self.rate, index);
    }

    /// Applies a `/c_set index value ...` reply routed here by its first
    /// index. Pairs outside the control bus space or outside this bus are
    /// skipped. Returns how many values were stored.
    pub(crate) fn apply_values(&self, msg: &Message, capacity: usize) -> usize {
        let first = self.index();
        let mut values = lock(&self.values);
        let mut applied = 0;
        for pair in msg.args.chunks(2) {
            let (index, value) = match pair {
                [index, value] => (index.as_int(), value.as_float()),
                _ => {
                    warn!(target: "server::bus", "/c_set reply has a dangling argument");
                    continue;
                }
            };
            let (Some(index), Some(value)) = (index, value) else {
                warn!(target: "server::bus", "/c_set reply has a non-numeric pair {pair:?}");
                continue;
            };
            if index < 0 || index as usize >= capacity {
                warn!(target: "server::bus", "/c_set index {index} outside the control bus space");
                continue;
            }
            let offset = index - first;
            match usize::try_from(offset).ok().and_then(|o| values.get_mut(o)) {
                Some(slot) => {
                    *slot = value;
                    applied += 1;
                }
                None => {
                    warn!(target: "server::bus", "/c_set index {index} is not part of bus {first}");
                }
            }
        }
        applied
    }
}

impl Drop for BusCore {
    fn drop(&mut self) {
        self.free();
    }
}

#[cfg(test)]
mod tests {
    use crate::config::SessionConfig;
    use crate::link::TestLink;

    use super::*;

    fn session() -> Session {
        Session::with_link(SessionConfig::default(), Box::new(TestLink::new()))
    }

    #[test]
    fn audio_buses_skip_hardware_channels() {
        let session = session();
        let bus = Bus::audio(&session, 2).unwrap();
        assert_eq!(bus.index(), 64);
        assert_eq!(bus.map_arg(), "a64");
        assert_eq!(bus.state(), LifecycleState::Live);
    }

    #[test]
    fn control_operations_refused_on_audio_bus() {
        let session = session();
        let bus = Bus::audio(&session, 1).unwrap();
        assert!(matches!(bus.set(1.0), Err(SessionError::ControlRateOnly("set"))));
        assert!(bus.request_values().is_err());
    }

    #[test]
    fn free_is_idempotent_and_returns_range() {
        let session = session();
        let bus = Bus::control(&session, 4).unwrap();
        assert_eq!(session.buses_in_use(Rate::Control), 4);
        bus.free();
        bus.free();
        assert_eq!(session.buses_in_use(Rate::Control), 0);
        assert_eq!(bus.state(), LifecycleState::Freed);
        drop(bus);
        assert_eq!(session.buses_in_use(Rate::Control), 0);
    }

    #[test]
    fn drop_frees_range() {
        let session = session();
        {
            let _bus = Bus::control(&session, 2).unwrap();
            assert_eq!(session.buses_in_use(Rate::Control), 2);
        }
        assert_eq!(session.buses_in_use(Rate::Control), 0);
    }

    #[test]
    fn apply_values_skips_bad_entries() {
        let session = session();
        let _pad = Bus::control(&session, 3).unwrap();
        let bus = Bus::control(&session, 2).unwrap();
        let first = bus.index();
        let msg = Message::new("/c_set")
            .arg(first)
            .arg(0.5f32)
            .arg(first + 5)
            .arg(9.0f32)
            .arg(-1)
            .arg(1.0f32)
            .arg(first + 1)
            .arg(0.25f32)
            .arg(first);
        assert_eq!(bus.core.apply_values(&msg, 4096), 2);
        assert_eq!(bus.values(), vec![0.5, 0.25]);
    }
}
