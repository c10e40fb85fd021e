use std::net::SocketAddr;

use rosc::{OscArray, OscBundle, OscColor, OscMessage, OscMidiMessage, OscPacket, OscType};

use crate::error::CodecError;
use crate::tags::{self, TagFixup};
use crate::timetag::Timetag;

/// Marker argument opening an array (`[` on the wire).
pub const ARRAY_BEGIN: char = '[';
/// Marker argument closing an array (`]` on the wire).
pub const ARRAY_END: char = ']';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rgba {
    pub red: u8,
    pub green: u8,
    pub blue: u8,
    pub alpha: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidiMessage {
    pub port: u8,
    pub status: u8,
    pub data1: u8,
    pub data2: u8,
}

/// One typed OSC argument.
///
/// Arrays are represented flat: `Char('[')`, the elements, `Char(']')`.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Str(String),
    Symbol(String),
    Char(char),
    Bool(bool),
    Nil,
    Inf,
    Time(Timetag),
    Color(Rgba),
    Midi(MidiMessage),
    Blob(Vec<u8>),
}

impl Arg {
    /// The OSC type tag this argument is written with.
    pub fn type_tag(&self) -> char {
        match self {
            Arg::Int(_) => 'i',
            Arg::Long(_) => 'h',
            Arg::Float(_) => 'f',
            Arg::Double(_) => 'd',
            Arg::Str(_) => 's',
            Arg::Symbol(_) => 'S',
            Arg::Char(ARRAY_BEGIN) => '[',
            Arg::Char(ARRAY_END) => ']',
            Arg::Char(_) => 'c',
            Arg::Bool(true) => 'T',
            Arg::Bool(false) => 'F',
            Arg::Nil => 'N',
            Arg::Inf => 'I',
            Arg::Time(_) => 't',
            Arg::Color(_) => 'r',
            Arg::Midi(_) => 'm',
            Arg::Blob(_) => 'b',
        }
    }

    pub fn as_int(&self) -> Option<i32> {
        match self {
            Arg::Int(v) => Some(*v),
            Arg::Long(v) => i32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Any numeric argument as `f32`.
    pub fn as_float(&self) -> Option<f32> {
        self.as_number().map(|v| v as f32)
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Arg::Int(v) => Some(*v as f64),
            Arg::Long(v) => Some(*v as f64),
            Arg::Float(v) => Some(*v as f64),
            Arg::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// String or symbol contents.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Arg::Str(s) | Arg::Symbol(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_array_marker(&self) -> bool {
        matches!(self, Arg::Char(ARRAY_BEGIN) | Arg::Char(ARRAY_END))
    }
}

impl From<i32> for Arg {
    fn from(v: i32) -> Self {
        Arg::Int(v)
    }
}

impl From<i64> for Arg {
    fn from(v: i64) -> Self {
        Arg::Long(v)
    }
}

impl From<f32> for Arg {
    fn from(v: f32) -> Self {
        Arg::Float(v)
    }
}

impl From<f64> for Arg {
    fn from(v: f64) -> Self {
        Arg::Double(v)
    }
}

impl From<bool> for Arg {
    fn from(v: bool) -> Self {
        Arg::Bool(v)
    }
}

impl From<char> for Arg {
    fn from(v: char) -> Self {
        Arg::Char(v)
    }
}

impl From<&str> for Arg {
    fn from(v: &str) -> Self {
        Arg::Str(v.to_string())
    }
}

impl From<String> for Arg {
    fn from(v: String) -> Self {
        Arg::Str(v)
    }
}

impl From<Timetag> for Arg {
    fn from(v: Timetag) -> Self {
        Arg::Time(v)
    }
}

impl From<Rgba> for Arg {
    fn from(v: Rgba) -> Self {
        Arg::Color(v)
    }
}

impl From<MidiMessage> for Arg {
    fn from(v: MidiMessage) -> Self {
        Arg::Midi(v)
    }
}

impl From<Vec<u8>> for Arg {
    fn from(v: Vec<u8>) -> Self {
        Arg::Blob(v)
    }
}

/// An OSC message. `sender` is filled in for received messages only.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Message {
    pub addr: String,
    pub args: Vec<Arg>,
    pub sender: Option<SocketAddr>,
}

impl Message {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            args: Vec::new(),
            sender: None,
        }
    }

    /// Builder-style append.
    pub fn arg(mut self, arg: impl Into<Arg>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn push(&mut self, arg: impl Into<Arg>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    pub fn begin_array(&mut self) -> &mut Self {
        self.push(ARRAY_BEGIN)
    }

    pub fn end_array(&mut self) -> &mut Self {
        self.push(ARRAY_END)
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn int_at(&self, index: usize) -> Option<i32> {
        self.args.get(index).and_then(Arg::as_int)
    }

    pub fn float_at(&self, index: usize) -> Option<f32> {
        self.args.get(index).and_then(Arg::as_float)
    }

    pub fn number_at(&self, index: usize) -> Option<f64> {
        self.args.get(index).and_then(Arg::as_number)
    }

    pub fn str_at(&self, index: usize) -> Option<&str> {
        self.args.get(index).and_then(Arg::as_str)
    }
}

/// A time-tagged group of packets, delivered atomically by the server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Bundle {
    pub timetag: Timetag,
    pub content: Vec<Packet>,
}

impl Bundle {
    pub fn new(timetag: Timetag) -> Self {
        Self {
            timetag,
            content: Vec::new(),
        }
    }

    pub fn immediate() -> Self {
        Self::new(Timetag::IMMEDIATE)
    }

    pub fn push(&mut self, packet: impl Into<Packet>) -> &mut Self {
        self.content.push(packet.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    /// Number of messages, counting nested bundles recursively.
    pub fn message_count(&self) -> usize {
        self.content.iter().map(Packet::message_count).sum()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Message(Message),
    Bundle(Bundle),
}

impl Packet {
    pub fn message_count(&self) -> usize {
        match self {
            Packet::Message(_) => 1,
            Packet::Bundle(b) => b.message_count(),
        }
    }

    /// All messages in depth-first order, bundles removed.
    pub fn into_messages(self) -> Vec<Message> {
        let mut out = Vec::new();
        flatten_into(self, &mut out);
        out
    }
}

fn flatten_into(packet: Packet, out: &mut Vec<Message>) {
    match packet {
        Packet::Message(m) => out.push(m),
        Packet::Bundle(b) => {
            for p in b.content {
                flatten_into(p, out);
            }
        }
    }
}

impl From<Message> for Packet {
    fn from(m: Message) -> Self {
        Packet::Message(m)
    }
}

impl From<Bundle> for Packet {
    fn from(b: Bundle) -> Self {
        Packet::Bundle(b)
    }
}

pub fn encode(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    match packet {
        Packet::Message(m) => encode_message(m),
        Packet::Bundle(b) => encode_bundle(b),
    }
}

pub fn encode_message(msg: &Message) -> Result<Vec<u8>, CodecError> {
    let wire = OscPacket::Message(wire_message(msg)?);
    encode_wire(&wire, vec![symbol_positions(&msg.args)])
}

pub fn encode_bundle(bundle: &Bundle) -> Result<Vec<u8>, CodecError> {
    let wire = OscPacket::Bundle(wire_bundle(bundle)?);
    let mut symbols = Vec::new();
    for packet in &bundle.content {
        collect_symbols(packet, &mut symbols);
    }
    encode_wire(&wire, symbols)
}

/// Decodes one datagram. Trailing bytes after a complete packet are ignored.
pub fn decode(bytes: &[u8]) -> Result<Packet, CodecError> {
    let mut buf = bytes.to_vec();
    let mut fixups = Vec::new();
    tags::for_each_message(&mut buf, &mut |addr, tags| {
        fixups.push(tags::normalize(addr, tags)?);
        Ok(())
    })?;
    let (_, wire) =
        rosc::decoder::decode_udp(&buf).map_err(|e| CodecError::Wire(e.to_string()))?;
    let mut fixups = fixups.into_iter();
    Ok(from_wire(wire, &mut fixups))
}

fn encode_wire(wire: &OscPacket, symbols: Vec<Vec<usize>>) -> Result<Vec<u8>, CodecError> {
    let mut bytes = rosc::encoder::encode(wire).map_err(|e| CodecError::Wire(e.to_string()))?;
    if symbols.iter().any(|s| !s.is_empty()) {
        let mut per_message = symbols.into_iter();
        tags::for_each_message(&mut bytes, &mut |_, tags| {
            for i in per_message.next().unwrap_or_default() {
                if let Some(tag) = tags.get_mut(i) {
                    *tag = b'S';
                }
            }
            Ok(())
        })?;
    }
    Ok(bytes)
}

fn symbol_positions(args: &[Arg]) -> Vec<usize> {
    args.iter()
        .enumerate()
        .filter(|(_, a)| matches!(a, Arg::Symbol(_)))
        .map(|(i, _)| i)
        .collect()
}

fn collect_symbols(packet: &Packet, out: &mut Vec<Vec<usize>>) {
    match packet {
        Packet::Message(m) => out.push(symbol_positions(&m.args)),
        Packet::Bundle(b) => {
            for p in &b.content {
                collect_symbols(p, out);
            }
        }
    }
}

fn check_address(addr: &str) -> Result<(), CodecError> {
    if addr.is_empty() {
        return Err(CodecError::EmptyAddress);
    }
    if !addr.starts_with('/') {
        return Err(CodecError::InvalidAddress(addr.to_string()));
    }
    Ok(())
}

fn wire_packet(packet: &Packet) -> Result<OscPacket, CodecError> {
    Ok(match packet {
        Packet::Message(m) => OscPacket::Message(wire_message(m)?),
        Packet::Bundle(b) => OscPacket::Bundle(wire_bundle(b)?),
    })
}

fn wire_bundle(bundle: &Bundle) -> Result<OscBundle, CodecError> {
    let content = bundle
        .content
        .iter()
        .map(wire_packet)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(OscBundle {
        timetag: bundle.timetag.into(),
        content,
    })
}

fn wire_message(msg: &Message) -> Result<OscMessage, CodecError> {
    check_address(&msg.addr)?;
    Ok(OscMessage {
        addr: msg.addr.clone(),
        args: wire_args(&msg.addr, &msg.args)?,
    })
}

/// Folds the flat array markers into nested `OscType::Array` values.
fn wire_args(addr: &str, args: &[Arg]) -> Result<Vec<OscType>, CodecError> {
    let mut stack: Vec<Vec<OscType>> = vec![Vec::new()];
    for arg in args {
        match arg {
            Arg::Char(ARRAY_BEGIN) => stack.push(Vec::new()),
            Arg::Char(ARRAY_END) => {
                let content = match stack.pop() {
                    Some(content) if !stack.is_empty() => content,
                    _ => return Err(CodecError::UnbalancedArray(addr.to_string())),
                };
                if let Some(top) = stack.last_mut() {
                    top.push(OscType::Array(OscArray { content }));
                }
            }
            other => {
                if let Some(top) = stack.last_mut() {
                    top.push(wire_arg(other));
                }
            }
        }
    }
    match (stack.pop(), stack.is_empty()) {
        (Some(top), true) => Ok(top),
        _ => Err(CodecError::UnbalancedArray(addr.to_string())),
    }
}

fn wire_arg(arg: &Arg) -> OscType {
    match arg {
        Arg::Int(v) => OscType::Int(*v),
        Arg::Long(v) => OscType::Long(*v),
        Arg::Float(v) => OscType::Float(*v),
        Arg::Double(v) => OscType::Double(*v),
        // Symbols go out as strings; the tag byte is patched afterwards.
        Arg::Str(s) | Arg::Symbol(s) => OscType::String(s.clone()),
        Arg::Char(c) => OscType::Char(*c),
        Arg::Bool(b) => OscType::Bool(*b),
        Arg::Nil => OscType::Nil,
        Arg::Inf => OscType::Inf,
        Arg::Time(t) => OscType::Time((*t).into()),
        Arg::Color(c) => OscType::Color(OscColor {
            red: c.red,
            green: c.green,
            blue: c.blue,
            alpha: c.alpha,
        }),
        Arg::Midi(m) => OscType::Midi(OscMidiMessage {
            port: m.port,
            status: m.status,
            data1: m.data1,
            data2: m.data2,
        }),
        Arg::Blob(b) => OscType::Blob(b.clone()),
    }
}

fn from_wire(packet: OscPacket, fixups: &mut impl Iterator<Item = TagFixup>) -> Packet {
    match packet {
        OscPacket::Message(m) => {
            let fixup = fixups.next().unwrap_or_default();
            Packet::Message(message_from_wire(m, fixup))
        }
        OscPacket::Bundle(b) => Packet::Bundle(Bundle {
            timetag: b.timetag.into(),
            content: b
                .content
                .into_iter()
                .map(|p| from_wire(p, fixups))
                .collect(),
        }),
    }
}

fn message_from_wire(msg: OscMessage, fixup: TagFixup) -> Message {
    let mut args = Vec::with_capacity(msg.args.len());
    for arg in msg.args {
        push_flat(arg, &mut args);
    }
    if let Some(keep) = fixup.keep {
        args.truncate(keep);
    }
    for i in fixup.symbols {
        if let Some(Arg::Str(s)) = args.get_mut(i) {
            let name = std::mem::take(s);
            args[i] = Arg::Symbol(name);
        }
    }
    Message {
        addr: msg.addr,
        args,
        sender: None,
    }
}

fn push_flat(arg: OscType, out: &mut Vec<Arg>) {
    let flat = match arg {
        OscType::Int(v) => Arg::Int(v),
        OscType::Long(v) => Arg::Long(v),
        OscType::Float(v) => Arg::Float(v),
        OscType::Double(v) => Arg::Double(v),
        OscType::String(s) => Arg::Str(s),
        OscType::Char(c) => Arg::Char(c),
        OscType::Bool(b) => Arg::Bool(b),
        OscType::Nil => Arg::Nil,
        OscType::Inf => Arg::Inf,
        OscType::Time(t) => Arg::Time(t.into()),
        OscType::Color(c) => Arg::Color(Rgba {
            red: c.red,
            green: c.green,
            blue: c.blue,
            alpha: c.alpha,
        }),
        OscType::Midi(m) => Arg::Midi(MidiMessage {
            port: m.port,
            status: m.status,
            data1: m.data1,
            data2: m.data2,
        }),
        OscType::Blob(b) => Arg::Blob(b),
        OscType::Array(array) => {
            out.push(Arg::Char(ARRAY_BEGIN));
            for inner in array.content {
                push_flat(inner, out);
            }
            Arg::Char(ARRAY_END)
        }
    };
    out.push(flat);
}
