//! Round trips through a real UDP socket standing in for the server.

use std::net::UdpSocket;
use std::time::{Duration, Instant};

use sclink_osc::{decode, encode_message, Arg, Bundle, Message, Packet, Timetag, Transport, TransportConfig};

struct FakeServer {
    socket: UdpSocket,
}

impl FakeServer {
    fn bind() -> Self {
        let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
        socket.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        Self { socket }
    }

    fn port(&self) -> u16 {
        self.socket.local_addr().unwrap().port()
    }

    fn recv(&self) -> (Vec<u8>, std::net::SocketAddr) {
        let mut buf = [0u8; 2048];
        let (n, from) = self.socket.recv_from(&mut buf).unwrap();
        (buf[..n].to_vec(), from)
    }
}

fn client_for(server: &FakeServer) -> Transport {
    Transport::connect(TransportConfig::new("127.0.0.1", server.port(), 0)).unwrap()
}

fn receive_within(transport: &Transport, timeout: Duration) -> Option<Message> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Some(msg) = transport.try_receive() {
            return Some(msg);
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    None
}

#[test]
fn sends_canonical_bytes_from_the_listen_port() {
    let server = FakeServer::bind();
    let client = client_for(&server);
    let msg = Message::new("/s_new").arg("sine").arg(2001).arg(0).arg(1);
    client.send_message(&msg).unwrap();

    let (bytes, from) = server.recv();
    assert_eq!(bytes, encode_message(&msg).unwrap());
    assert_eq!(from.port(), client.local_addr().unwrap().port());
}

#[test]
fn replies_are_queued_with_sender() {
    let server = FakeServer::bind();
    let client = client_for(&server);
    client.send_message(&Message::new("/status")).unwrap();
    let (_, client_addr) = server.recv();

    let reply = Message::new("/status.reply").arg(1).arg(0).arg(0).arg(1).arg(0);
    server
        .socket
        .send_to(&encode_message(&reply).unwrap(), client_addr)
        .unwrap();

    let got = receive_within(&client, Duration::from_secs(2)).expect("reply");
    assert_eq!(got.addr, "/status.reply");
    assert_eq!(got.args, reply.args);
    assert_eq!(got.sender, Some(server.socket.local_addr().unwrap()));
}

#[test]
fn inbound_bundles_are_flattened_in_order() {
    let server = FakeServer::bind();
    let client = client_for(&server);
    client.send_message(&Message::new("/notify").arg(1)).unwrap();
    let (_, client_addr) = server.recv();

    let mut bundle = Bundle::new(Timetag::IMMEDIATE);
    bundle
        .push(Message::new("/n_go").arg(2001))
        .push(Message::new("/n_end").arg(2001));
    let bytes = sclink_osc::encode(&Packet::Bundle(bundle)).unwrap();
    server.socket.send_to(&bytes, client_addr).unwrap();

    let first = receive_within(&client, Duration::from_secs(2)).expect("first");
    let second = receive_within(&client, Duration::from_secs(2)).expect("second");
    assert_eq!(first.addr, "/n_go");
    assert_eq!(second.addr, "/n_end");
    assert_eq!(second.args, vec![Arg::Int(2001)]);
}

#[test]
fn garbage_does_not_stop_the_receive_loop() {
    let server = FakeServer::bind();
    let client = client_for(&server);
    client.send_message(&Message::new("/status")).unwrap();
    let (_, client_addr) = server.recv();

    server.socket.send_to(b"\xff\xfe garbage", client_addr).unwrap();
    let ok = Message::new("/done").arg("/d_loadDir");
    server
        .socket
        .send_to(&encode_message(&ok).unwrap(), client_addr)
        .unwrap();

    let got = receive_within(&client, Duration::from_secs(2)).expect("valid message after garbage");
    assert_eq!(got.addr, "/done");
    assert!(decode(b"\xff\xfe garbage").is_err());
}

/// A datagram of bundles nested `levels` deep around one `/x` message.
fn nested_bundles(levels: usize) -> Vec<u8> {
    let mut packet = encode_message(&Message::new("/x")).unwrap();
    for _ in 0..levels {
        let mut outer = b"#bundle\0".to_vec();
        outer.extend_from_slice(&1u64.to_be_bytes());
        outer.extend_from_slice(&(packet.len() as u32).to_be_bytes());
        outer.extend(packet);
        packet = outer;
    }
    packet
}

#[test]
fn deeply_nested_bundle_is_dropped_and_loop_continues() {
    let server = FakeServer::bind();
    let client = client_for(&server);
    client.send_message(&Message::new("/status")).unwrap();
    let (_, client_addr) = server.recv();

    let hostile = nested_bundles(3000);
    assert!(hostile.len() < 65_000);
    server.socket.send_to(&hostile, client_addr).unwrap();
    let ok = Message::new("/status.reply").arg(1);
    server
        .socket
        .send_to(&encode_message(&ok).unwrap(), client_addr)
        .unwrap();

    let got = receive_within(&client, Duration::from_secs(2)).expect("message after nested bundle");
    assert_eq!(got.addr, "/status.reply");
    assert!(client.try_receive().is_none());
}

#[test]
fn close_stops_receiving() {
    let server = FakeServer::bind();
    let mut client = client_for(&server);
    client.close();
    assert!(!client.is_open());
    assert!(client.send(b"/x\0\0,\0\0\0").is_err());
    client.open().unwrap();
    assert!(client.is_open());
}
