mod common;

use common::*;
use sclink_server::osc::Message;
use sclink_server::{
    AllocError, Buffer, BufferInfo, Bus, IdAllocator, LifecycleState, Rate, SessionConfig,
    SessionError, SessionEvent, Synth,
};

#[test]
fn allocator_ranges_are_disjoint_and_reused() {
    let mut pool = IdAllocator::new(64);
    let x = pool.alloc(2).unwrap();
    let y = pool.alloc(2).unwrap();
    assert!(y >= x + 2 || x >= y + 2);

    assert!(pool.free(x));
    let z = pool.alloc(2).unwrap();
    assert_eq!(z, x);
    assert_eq!(pool.in_use(), 4);
}

#[test]
fn allocator_reports_exhaustion() {
    let mut pool = IdAllocator::new(64);
    assert_eq!(
        pool.alloc(65),
        Err(AllocError::Exhausted {
            size: 65,
            capacity: 64
        })
    );
    assert_eq!(pool.alloc(0), Err(AllocError::ZeroSize));
    assert_eq!(pool.alloc(64), Ok(0));
    assert!(pool.alloc(1).is_err());
}

#[test]
fn bus_ranges_return_to_the_pool_on_drop() {
    let (session, _link) = test_session();
    let first = Bus::control(&session, 2).unwrap();
    let second = Bus::control(&session, 2).unwrap();
    let first_index = first.index();
    assert!(second.index() >= first_index + 2);

    drop(first);
    let third = Bus::control(&session, 2).unwrap();
    assert_eq!(third.index(), first_index);
    assert_eq!(session.buses_in_use(Rate::Control), 4);
}

#[test]
fn bus_pool_exhaustion_is_an_error() {
    let mut config = SessionConfig::default();
    config.allocators.control_buses = 4;
    let (session, _link) = test_session_with(config);
    let _all = Bus::control(&session, 4).unwrap();
    assert!(matches!(
        Bus::control(&session, 1),
        Err(SessionError::Alloc(AllocError::Exhausted { .. }))
    ));
}

#[test]
fn control_bus_commands() {
    let (session, link) = test_session();
    let bus = Bus::control(&session, 2).unwrap();
    bus.set(0.5).unwrap();
    bus.set_channels(&[0.1, 0.2, 0.3]).unwrap();
    bus.fill(1.0).unwrap();
    bus.request_values().unwrap();
    assert_eq!(
        sent_commands(&link),
        vec![
            Message::new("/c_set").arg(0).arg(0.5f32),
            Message::new("/c_setn").arg(0).arg(2).arg(0.1f32).arg(0.2f32),
            Message::new("/c_fill").arg(0).arg(2).arg(1.0f32),
            Message::new("/c_get").arg(0).arg(1),
        ]
    );
}

#[test]
fn control_values_come_back_through_tick() {
    let (session, link) = test_session();
    let bus = Bus::control(&session, 2).unwrap();
    reply(
        &session,
        &link,
        Message::new("/c_set").arg(0).arg(0.5f32).arg(1).arg(0.75f32),
    );
    assert_eq!(bus.values(), vec![0.5, 0.75]);
    assert_eq!(bus.value(), Some(0.5));
}

#[test]
fn malformed_control_values_are_skipped() {
    let (session, link) = test_session();
    let bus = Bus::control(&session, 2).unwrap();
    reply(
        &session,
        &link,
        Message::new("/c_set")
            .arg(0)
            .arg("loud")
            .arg(99_999)
            .arg(1.0f32)
            .arg(1)
            .arg(0.25f32),
    );
    assert_eq!(bus.values(), vec![0.0, 0.25]);

    // Untracked first index and an empty reply change nothing.
    reply(&session, &link, Message::new("/c_set").arg(40).arg(3.0f32));
    reply(&session, &link, Message::new("/c_set"));
    assert_eq!(bus.values(), vec![0.0, 0.25]);
}

#[test]
fn synth_controls_map_to_buses() {
    let (session, link) = test_session();
    let audio = Bus::audio(&session, 2).unwrap();
    let control = Bus::control(&session, 1).unwrap();
    let synth = Synth::new(&session, "filter");
    synth.map_bus("in", &audio).unwrap();
    synth.map_bus("cutoff", &control).unwrap();
    synth.play().unwrap();

    let mut expected = Message::new("/s_new")
        .arg("filter")
        .arg(2000)
        .arg(0)
        .arg(1)
        .arg("in");
    expected.begin_array().push("a64").push("a65").end_array();
    expected.push("cutoff").push("c0");
    assert_eq!(link.find(|m| m.addr == "/s_new"), Some(expected));
}

#[test]
fn buffer_commands_wait_for_allocation() {
    let (session, link) = test_session();
    let events = session.subscribe();
    let buffer = Buffer::new(&session).unwrap();
    assert_eq!(buffer.bufnum(), 0);

    buffer.alloc(44100, 2).unwrap();
    buffer.zero().unwrap();
    assert_eq!(
        sent_commands(&link),
        vec![Message::new("/b_alloc").arg(0).arg(44100).arg(2)]
    );
    assert_eq!(buffer.state(), LifecycleState::Pending);

    reply(&session, &link, Message::new("/done").arg("/b_alloc").arg(0));
    assert_eq!(buffer.state(), LifecycleState::Live);
    assert_eq!(
        sent_commands(&link)[1..],
        [
            Message::new("/b_zero").arg(0),
            Message::new("/b_query").arg(0),
        ]
    );
    assert!(drain_events(&events).iter().any(|e| matches!(
        e,
        SessionEvent::Done { command, .. } if command == "/b_alloc"
    )));

    assert!(!buffer.is_ready());
    reply(
        &session,
        &link,
        Message::new("/b_info").arg(0).arg(44100).arg(2).arg(44100.0f32),
    );
    assert_eq!(
        buffer.info(),
        Some(BufferInfo {
            frames: 44100,
            channels: 2,
            sample_rate: 44100.0,
        })
    );
    assert_eq!(buffer.info().map(|i| i.duration_secs()), Some(1.0));
}

#[test]
fn buffer_reads_whole_files() {
    let (session, link) = test_session();
    let buffer = Buffer::new(&session).unwrap();
    buffer.read("/tmp/sample.wav").unwrap();
    assert_eq!(
        sent_commands(&link),
        vec![Message::new("/b_allocRead")
            .arg(0)
            .arg("/tmp/sample.wav")
            .arg(0)
            .arg(0)]
    );
    assert_eq!(buffer.path().as_deref(), Some(std::path::Path::new("/tmp/sample.wav")));
}

#[test]
fn buffer_free_is_idempotent_and_releases_the_number() {
    let (session, link) = test_session();
    let buffer = Buffer::new(&session).unwrap();
    buffer.alloc(512, 1).unwrap();
    assert_eq!(session.buffers_in_use(), 1);

    buffer.free().unwrap();
    buffer.free().unwrap();
    drop(buffer);
    assert_eq!(link.count(|m| m.addr == "/b_free"), 1);
    assert_eq!(session.buffers_in_use(), 0);

    let next = Buffer::new(&session).unwrap();
    assert_eq!(next.bufnum(), 0);
}

#[test]
fn failed_flush_still_sends_b_free() {
    let (session, link) = test_session();
    let buffer = Buffer::new(&session).unwrap();
    buffer.alloc(512, 1).unwrap();
    buffer.zero().unwrap();
    link.reject("/b_zero");

    assert!(buffer.free().is_err());
    assert_eq!(link.addresses(), vec!["/b_alloc", "/b_free"]);
    assert_eq!(buffer.state(), LifecycleState::Freed);
    assert_eq!(session.buffers_in_use(), 0);
}

#[test]
fn unused_buffer_number_is_released_on_drop() {
    let (session, link) = test_session();
    drop(Buffer::new(&session).unwrap());
    assert_eq!(session.buffers_in_use(), 0);
    assert!(link.sent().is_empty());
}
