//! Client-side session for a SuperCollider server.
//!
//! A [`Session`] owns the OSC link, hands out node ids, bus ranges and buffer
//! numbers, watches server liveness through `/status` polls, and routes
//! replies to the [`Synth`], [`Group`], [`Bus`] and [`Buffer`] handles they
//! concern. Handles free their server resources when dropped.

pub mod alloc;
pub mod buffer;
pub mod bus;
pub mod config;
pub mod error;
pub mod events;
pub mod group;
pub mod heartbeat;
pub mod lifecycle;
pub mod link;
pub mod node;
pub mod outbound;
pub mod registry;
pub mod session;
mod sync;
pub mod synth;

pub use alloc::IdAllocator;
pub use buffer::{Buffer, BufferInfo};
pub use bus::{Bus, Rate};
pub use config::{AllocatorConfig, HeartbeatConfig, OutboundConfig, SessionConfig};
pub use error::{AllocError, ConfigError, SessionError, SessionResult};
pub use events::SessionEvent;
pub use group::Group;
pub use heartbeat::{BootPolicy, StatusReply};
pub use lifecycle::LifecycleState;
pub use link::{Link, SharedTestLink, TestLink};
pub use node::{AddAction, Node, NodeKind, DEFAULT_GROUP, ROOT_NODE};
pub use session::Session;
pub use synth::{ControlValue, Synth};

pub use sclink_osc as osc;
