#![allow(dead_code)]
//! Test harness utilities for sclink-server integration tests.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::Receiver;
use sclink_server::osc::Message;
use sclink_server::{Session, SessionConfig, SessionEvent, SharedTestLink, TestLink};

/// A session over a recording link, plus the link for assertions.
pub fn test_session() -> (Session, Arc<TestLink>) {
    test_session_with(SessionConfig::default())
}

pub fn test_session_with(config: SessionConfig) -> (Session, Arc<TestLink>) {
    let link = Arc::new(TestLink::new());
    let session = Session::with_link(config, Box::new(SharedTestLink(Arc::clone(&link))));
    (session, link)
}

/// `/status.reply` with the counts boot detection looks at.
pub fn status_reply(synths: i32, groups: i32, synthdefs: i32) -> Message {
    Message::new("/status.reply")
        .arg(1)
        .arg(0)
        .arg(synths)
        .arg(groups)
        .arg(synthdefs)
        .arg(0.1f32)
        .arg(0.2f32)
        .arg(44100.0f64)
        .arg(44100.0f64)
}

/// Feed a fresh-server status reply and process it.
pub fn boot(session: &Session, link: &TestLink) {
    link.inject(status_reply(0, 1, 0));
    session.tick();
    assert!(session.is_booted());
}

/// Inject a reply and run one tick.
pub fn reply(session: &Session, link: &TestLink, msg: Message) {
    link.inject(msg);
    session.tick();
}

/// Sent addresses, without heartbeat polls.
pub fn sent_commands(link: &TestLink) -> Vec<Message> {
    link.sent_messages()
        .into_iter()
        .filter(|m| m.addr != "/status")
        .collect()
}

pub fn drain_events(rx: &Receiver<SessionEvent>) -> Vec<SessionEvent> {
    rx.try_iter().collect()
}

/// Tick the session until `done` holds, or panic after `timeout`.
pub fn drive_until<F: Fn(&Session) -> bool>(session: &Session, timeout: Duration, done: F) {
    let start = Instant::now();
    while start.elapsed() < timeout {
        session.tick();
        if done(session) {
            return;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    panic!("Timed out driving session");
}
