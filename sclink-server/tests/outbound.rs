mod common;

use std::time::Duration;

use common::*;
use sclink_server::osc::{Message, Packet};
use sclink_server::{Group, Node, SessionConfig, Synth};

fn bundles(packets: &[Packet]) -> Vec<(bool, usize)> {
    packets
        .iter()
        .filter_map(|p| match p {
            Packet::Bundle(b) => Some((b.timetag.is_immediate(), b.message_count())),
            Packet::Message(_) => None,
        })
        .collect()
}

#[test]
fn hold_mode_collects_one_bundle() {
    let (session, link) = test_session();
    session.set_hold(true).unwrap();
    assert!(session.is_holding());

    let group = Group::new(&session);
    group.add_to_default().unwrap();
    let synth = Synth::new(&session, "sine");
    synth.add_to_head(group.id()).unwrap();
    assert!(link.sent().is_empty());

    session.set_hold(false).unwrap();
    assert_eq!(bundles(&link.sent()), vec![(true, 2)]);
    assert_eq!(link.addresses(), vec!["/g_new", "/s_new"]);
}

#[test]
fn status_polls_bypass_hold_mode() {
    let (session, link) = test_session();
    session.set_hold(true).unwrap();
    session.send(Message::new("/sync").arg(1)).unwrap();
    session.tick();
    assert_eq!(link.addresses(), vec!["/status"]);

    session.flush().unwrap();
    assert!(session.is_holding());
    assert_eq!(link.addresses(), vec!["/status", "/sync"]);
}

#[test]
fn full_hold_buffer_is_sent_early() {
    let mut config = SessionConfig::default();
    config.outbound.max_held_messages = 3;
    let (session, link) = test_session_with(config);
    session.set_hold(true).unwrap();
    for i in 0..4 {
        session.send(Message::new("/c_set").arg(i).arg(0.0f32)).unwrap();
    }
    assert_eq!(bundles(&link.sent()), vec![(true, 3)]);

    session.set_hold(false).unwrap();
    assert_eq!(bundles(&link.sent()), vec![(true, 3), (true, 1)]);
}

#[test]
fn latency_schedules_messages_ahead() {
    let (session, link) = test_session();
    session.send(Message::new("/c_set").arg(0).arg(1.0f32)).unwrap();
    assert!(matches!(link.sent()[0], Packet::Message(_)));

    session.set_latency(Some(Duration::from_millis(100)));
    session.send(Message::new("/c_set").arg(0).arg(2.0f32)).unwrap();
    assert_eq!(bundles(&link.sent()), vec![(false, 1)]);
    assert_eq!(session.latency(), Some(Duration::from_millis(100)));
}

#[test]
fn latency_from_config() {
    let mut config = SessionConfig::default();
    config.outbound.use_latency = true;
    config.outbound.latency_secs = 0.5;
    let (session, link) = test_session_with(config);
    assert_eq!(session.latency(), Some(Duration::from_millis(500)));

    session.send(Message::new("/n_free").arg(5)).unwrap();
    assert_eq!(bundles(&link.sent()), vec![(false, 1)]);
}

#[test]
fn infinite_latency_in_config_does_not_stop_session_startup() {
    let config =
        SessionConfig::from_toml_str("[outbound]\nuse_latency = true\nlatency_secs = inf\n")
            .unwrap();
    let (session, link) = test_session_with(config);
    assert_eq!(session.latency(), Some(Duration::from_millis(200)));
    session.send(Message::new("/n_free").arg(5)).unwrap();
    assert_eq!(bundles(&link.sent()), vec![(false, 1)]);
}
