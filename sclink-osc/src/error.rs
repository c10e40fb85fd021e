use std::io;

use thiserror::Error;

/// Failures while turning packets into bytes or bytes into packets.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("message address is empty")]
    EmptyAddress,
    #[error("message address {0:?} must start with '/'")]
    InvalidAddress(String),
    #[error("unbalanced array markers in arguments of {0}")]
    UnbalancedArray(String),
    #[error("malformed packet: {0}")]
    Malformed(&'static str),
    #[error("unknown type tag '{tag}' in {addr} leaves no room to close open arrays")]
    UnrecoverableTag { addr: String, tag: char },
    #[error("wire format error: {0}")]
    Wire(String),
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("couldn't create sender: host is empty")]
    EmptyHost,
    #[error("couldn't resolve host {host}: {reason}")]
    InvalidHost { host: String, reason: String },
    #[error("couldn't bind receiver on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },
    #[error("couldn't start receive thread: {0}")]
    Spawn(#[source] io::Error),
    #[error("transport is not open")]
    NotOpen,
    #[error("send failed: {0}")]
    Send(#[from] io::Error),
    #[error(transparent)]
    Codec(#[from] CodecError),
}
