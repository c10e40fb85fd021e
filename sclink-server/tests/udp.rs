//! A session over a real UDP transport, with a socket standing in for scsynth.

mod common;

use std::net::UdpSocket;
use std::time::Duration;

use common::*;
use sclink_server::osc::{decode, encode_message, Packet, TransportConfig};
use sclink_server::{Session, SessionConfig};

#[test]
fn boots_against_a_fake_server() {
    let server = UdpSocket::bind("127.0.0.1:0").unwrap();
    server
        .set_read_timeout(Some(Duration::from_millis(20)))
        .unwrap();
    let port = server.local_addr().unwrap().port();

    let config = SessionConfig {
        osc: TransportConfig::new("127.0.0.1", port, 0),
        ..SessionConfig::default()
    };
    let session = Session::new(config).unwrap();
    assert!(session.is_open());

    let responder = std::thread::spawn(move || {
        let mut buf = [0u8; 1024];
        let mut saw_notify = false;
        for _ in 0..200 {
            let Ok((n, from)) = server.recv_from(&mut buf) else {
                continue;
            };
            match decode(&buf[..n]) {
                Ok(Packet::Message(msg)) if msg.addr == "/status" => {
                    let reply = encode_message(&status_reply(0, 1, 0)).unwrap();
                    server.send_to(&reply, from).unwrap();
                }
                Ok(Packet::Message(msg)) if msg.addr == "/notify" => {
                    saw_notify = msg.int_at(0) == Some(1);
                    break;
                }
                _ => {}
            }
        }
        saw_notify
    });

    drive_until(&session, Duration::from_secs(3), |s| s.is_booted());
    assert!(responder.join().unwrap());
    session.stop();
    assert!(!session.is_open());
}
