//! OSC 1.0 codec and UDP transport for SuperCollider's `scsynth`.
//!
//! Encoding and decoding go through `rosc`, with two additions the server
//! relies on: symbol arguments (`S`) and tolerant decoding of unknown type
//! tags. Arrays are carried as flat `[`/`]` marker arguments inside
//! [`Message::args`].

pub mod codec;
pub mod error;
mod tags;
pub mod timetag;
pub mod transport;

pub use codec::{
    decode, encode, encode_bundle, encode_message, Arg, Bundle, Message, MidiMessage, Packet,
    Rgba, ARRAY_BEGIN, ARRAY_END,
};
pub use error::{CodecError, TransportError};
pub use timetag::Timetag;
pub use transport::{Transport, TransportConfig};
