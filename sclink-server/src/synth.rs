use std::sync::{Arc, Mutex};

use sclink_osc::Message;

use crate::bus::{Bus, Rate};
use crate::error::SessionResult;
use crate::lifecycle::LifecycleState;
use crate::node::{AddAction, Node, NodeCore, NodeKind, DEFAULT_GROUP};
use crate::session::Session;
use crate::sync::lock;

/// A value for a named synth control.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlValue {
    Float(f32),
    Int(i32),
    Floats(Vec<f32>),
    Ints(Vec<i32>),
    /// Passed through as a string, e.g. `"c12"` to map a control bus.
    Str(String),
    /// Map the control to `channels` consecutive audio buses from `index`.
    AudioBus { index: i32, channels: i32 },
}

impl From<f32> for ControlValue {
    fn from(v: f32) -> Self {
        ControlValue::Float(v)
    }
}

impl From<f64> for ControlValue {
    fn from(v: f64) -> Self {
        ControlValue::Float(v as f32)
    }
}

impl From<i32> for ControlValue {
    fn from(v: i32) -> Self {
        ControlValue::Int(v)
    }
}

impl From<Vec<f32>> for ControlValue {
    fn from(v: Vec<f32>) -> Self {
        ControlValue::Floats(v)
    }
}

impl From<&[f32]> for ControlValue {
    fn from(v: &[f32]) -> Self {
        ControlValue::Floats(v.to_vec())
    }
}

impl From<Vec<i32>> for ControlValue {
    fn from(v: Vec<i32>) -> Self {
        ControlValue::Ints(v)
    }
}

impl From<&str> for ControlValue {
    fn from(v: &str) -> Self {
        ControlValue::Str(v.to_string())
    }
}

impl From<String> for ControlValue {
    fn from(v: String) -> Self {
        ControlValue::Str(v)
    }
}

impl ControlValue {
    /// Appends this value as `/s_new` control arguments. Vectors become
    /// arrays; audio bus maps become `"a<index>"` strings.
    fn push_creation_args(&self, msg: &mut Message) {
        match self {
            ControlValue::Float(v) => {
                msg.push(*v);
            }
            ControlValue::Int(v) => {
                msg.push(*v);
            }
            ControlValue::Floats(values) => {
                msg.begin_array();
                for v in values {
                    msg.push(*v);
                }
                msg.end_array();
            }
            ControlValue::Ints(values) => {
                msg.begin_array();
                for v in values {
                    msg.push(*v);
                }
                msg.end_array();
            }
            ControlValue::Str(s) => {
                msg.push(s.as_str());
            }
            ControlValue::AudioBus { index, channels } if *channels <= 1 => {
                msg.push(format!("a{index}"));
            }
            ControlValue::AudioBus { index, channels } => {
                msg.begin_array();
                for offset in 0..*channels {
                    msg.push(format!("a{}", index + offset));
                }
                msg.end_array();
            }
        }
    }

    /// The message that changes this control on a running node.
    fn live_message(&self, id: i32, name: &str) -> Message {
        let msg = |addr: &str| Message::new(addr).arg(id).arg(name);
        match self {
            ControlValue::Float(v) => msg("/n_set").arg(*v),
            ControlValue::Int(v) => msg("/n_set").arg(*v),
            ControlValue::Str(s) => msg("/n_set").arg(s.as_str()),
            ControlValue::Floats(values) => {
                let mut m = msg("/n_setn").arg(values.len() as i32);
                for v in values {
                    m.push(*v);
                }
                m
            }
            ControlValue::Ints(values) => {
                let mut m = msg("/n_setn").arg(values.len() as i32);
                for v in values {
                    m.push(*v);
                }
                m
            }
            ControlValue::AudioBus { index, channels } if *channels <= 1 => {
                msg("/n_mapa").arg(*index)
            }
            ControlValue::AudioBus { index, channels } => {
                msg("/n_mapan").arg(*index).arg(*channels)
            }
        }
    }
}

/// Handle to a synth node.
///
/// Controls set before [`Synth::create`] travel inside the `/s_new` message;
/// later changes use `/n_set` and friends, queued until the server confirms
/// creation.
pub struct Synth {
    core: Arc<NodeCore>,
    def_name: String,
    initial: Mutex<Vec<(String, ControlValue)>>,
}

impl Synth {
    /// Reserves a node id. Nothing is sent until [`Synth::create`].
    pub fn new(session: &Session, def_name: impl Into<String>) -> Self {
        Self {
            core: NodeCore::new(session, NodeKind::Synth),
            def_name: def_name.into(),
            initial: Mutex::new(Vec::new()),
        }
    }

    pub fn def_name(&self) -> &str {
        &self.def_name
    }

    /// /s_new defName nodeID addAction targetID [controlName value]...
    pub fn create(&self, action: AddAction, target: i32) -> SessionResult {
        self.core.send_create(|id| {
            let mut msg = Message::new("/s_new")
                .arg(self.def_name.as_str())
                .arg(id)
                .arg(action.code())
                .arg(target);
            for (name, value) in lock(&self.initial).drain(..) {
                msg.push(name);
                value.push_creation_args(&mut msg);
            }
            msg
        })
    }

    pub fn add_to_head(&self, group: i32) -> SessionResult {
        self.create(AddAction::Head, group)
    }

    pub fn add_to_tail(&self, group: i32) -> SessionResult {
        self.create(AddAction::Tail, group)
    }

    pub fn add_before(&self, node: &dyn Node) -> SessionResult {
        self.create(AddAction::Before, node.id())
    }

    pub fn add_after(&self, node: &dyn Node) -> SessionResult {
        self.create(AddAction::After, node.id())
    }

    pub fn replace(&self, node: &dyn Node) -> SessionResult {
        self.create(AddAction::Replace, node.id())
    }

    /// Head of the server's default group.
    pub fn play(&self) -> SessionResult {
        self.create(AddAction::Head, DEFAULT_GROUP)
    }

    /// Sets a control. Before creation the value is folded into `/s_new`,
    /// replacing any earlier value for the same name.
    pub fn set(&self, name: &str, value: impl Into<ControlValue>) -> SessionResult {
        let value = value.into();
        if self.core.state() == LifecycleState::Unallocated {
            let mut initial = lock(&self.initial);
            match initial.iter_mut().find(|(n, _)| n == name) {
                Some(slot) => slot.1 = value,
                None => initial.push((name.to_string(), value)),
            }
            return Ok(());
        }
        self.core.mutate(value.live_message(self.core.id(), name))
    }

    /// /n_fill nodeID controlName count value
    pub fn fill(&self, name: &str, count: usize, value: f32) -> SessionResult {
        if self.core.state() == LifecycleState::Unallocated {
            return self.set(name, vec![value; count]);
        }
        self.core.mutate(
            Message::new("/n_fill")
                .arg(self.core.id())
                .arg(name)
                .arg(count as i32)
                .arg(value),
        )
    }

    /// /n_mapa nodeID controlName bus
    pub fn map_audio(&self, name: &str, bus: i32) -> SessionResult {
        self.set(name, ControlValue::AudioBus { index: bus, channels: 1 })
    }

    /// /n_mapan nodeID controlName bus count
    pub fn map_audio_n(&self, name: &str, bus: i32, count: i32) -> SessionResult {
        self.set(name, ControlValue::AudioBus { index: bus, channels: count })
    }

    /// /n_map nodeID controlName bus
    pub fn map_control(&self, name: &str, bus: i32) -> SessionResult {
        if self.core.state() == LifecycleState::Unallocated {
            return self.set(name, format!("c{bus}"));
        }
        self.core.mutate(
            Message::new("/n_map")
                .arg(self.core.id())
                .arg(name)
                .arg(bus),
        )
    }

    /// Maps `name` to `bus`, whatever its rate and width.
    pub fn map_bus(&self, name: &str, bus: &Bus) -> SessionResult {
        let index = bus.index();
        let channels = bus.channels() as i32;
        match (bus.rate(), channels) {
            (Rate::Audio, _) => self.map_audio_n(name, index, channels),
            (Rate::Control, 1) => self.map_control(name, index),
            (Rate::Control, _) => self.core.mutate(
                Message::new("/n_mapn")
                    .arg(self.core.id())
                    .arg(name)
                    .arg(index)
                    .arg(channels),
            ),
        }
    }

    /// A ready `/n_set` message for this node, for callers assembling their
    /// own bundles.
    pub fn set_message(&self, name: &str, value: impl Into<ControlValue>) -> Message {
        value.into().live_message(self.core.id(), name)
    }

    /// Plays `def_name` as a fire-and-forget node (id -1) that can't be
    /// addressed afterwards.
    pub fn grain(
        session: &Session,
        def_name: &str,
        controls: &[(&str, ControlValue)],
        action: AddAction,
        target: i32,
    ) -> SessionResult {
        let mut msg = Message::new("/s_new")
            .arg(def_name)
            .arg(-1)
            .arg(action.code())
            .arg(target);
        for (name, value) in controls {
            msg.push(*name);
            value.push_creation_args(&mut msg);
        }
        session.send(msg)
    }

    /// Controls waiting for `/s_new`.
    pub fn initial_controls(&self) -> Vec<(String, ControlValue)> {
        lock(&self.initial).clone()
    }
}

impl Node for Synth {
    fn core(&self) -> &Arc<NodeCore> {
        &self.core
    }
}
