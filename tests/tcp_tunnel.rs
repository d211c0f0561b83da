//! TCP tunnel integration: byte-level wire assertions and a full
//! context-to-context loop over localhost.
use artie_can::core::CanContext;
use artie_can::error::ProtocolError;
use artie_can::infra::backend::tcp_tunnel::{
    TcpTunnelBackend, TunnelConfig, WIRE_FRAME_LEN, WIRE_MSG_LEN,
};
use artie_can::protocol::rtacp::RtacpMessage;
use artie_can::protocol::transport::can_id::Priority;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::thread;
use std::time::Duration;

/// The canonical unicast frame on the tunnel wire:
/// `[00 00 00 0E][03 01 0B FF][05][48 65 6C 6C 6F 00 00 00][01]`.
const HELLO_WIRE: [u8; WIRE_MSG_LEN] = [
    0x00, 0x00, 0x00, 0x0E, // length prefix, always the frame size
    0x03, 0x01, 0x0B, 0xFF, // 29-bit identifier, big endian
    0x05, // dlc
    0x48, 0x65, 0x6C, 0x6C, 0x6F, 0x00, 0x00, 0x00, // "Hello" padded
    0x01, // extended flag
];

#[test]
/// A frame sent by a tunneled context shows up on the raw socket exactly as
/// `[4-byte BE length][frame encoding]`.
fn test_wire_bytes_on_send() {
    let config = TunnelConfig::new("127.0.0.1", 58611, true);
    let mut server =
        CanContext::init_custom(0x01, TcpTunnelBackend::new(config)).expect("server init");

    let mut peer = TcpStream::connect(("127.0.0.1", 58611)).expect("connect");
    peer.set_read_timeout(Some(Duration::from_secs(2)))
        .expect("read timeout");

    let msg = RtacpMessage::new(Priority::MedLow, 0x01, 0x02, b"Hello").expect("message");
    // The first send may report backpressure while the accept completes.
    let mut attempts = 0;
    loop {
        match server.rtacp_send(&msg, false) {
            Ok(()) => break,
            Err(ProtocolError::Backend(artie_can::error::BackendError::Backpressure))
                if attempts < 100 =>
            {
                attempts += 1;
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => panic!("send failed: {err:?}"),
        }
    }

    let mut wire = [0u8; WIRE_MSG_LEN];
    peer.read_exact(&mut wire).expect("read frame");
    assert_eq!(wire, HELLO_WIRE);
    server.close().expect("close");
}

#[test]
/// Raw wire bytes pushed by a peer decode into the identical message at the
/// tunneled context.
fn test_wire_bytes_on_receive() {
    let config = TunnelConfig::new("127.0.0.1", 58627, true);
    let mut server =
        CanContext::init_custom(0x02, TcpTunnelBackend::new(config)).expect("server init");

    let mut peer = TcpStream::connect(("127.0.0.1", 58627)).expect("connect");
    peer.write_all(&HELLO_WIRE).expect("write frame");

    let received = server.rtacp_receive(2000).expect("receive");
    assert_eq!(received.sender, 0x01);
    assert_eq!(received.target, 0x02);
    assert_eq!(received.priority, Priority::MedLow);
    assert_eq!(received.payload(), b"Hello");
    server.close().expect("close");
}

#[test]
/// Two contexts tunnel frames both ways over one localhost connection,
/// byte-identical to what the sender encoded.
fn test_context_loop() {
    let server_config = TunnelConfig::new("127.0.0.1", 58643, true);
    let mut server =
        CanContext::init_custom(0x02, TcpTunnelBackend::new(server_config)).expect("server init");

    let client_config = TunnelConfig::new("127.0.0.1", 58643, false);
    let mut client =
        CanContext::init_custom(0x01, TcpTunnelBackend::new(client_config)).expect("client init");

    // Client → server. The non-blocking connect finishes on the first
    // operations, so allow a little backpressure while it settles.
    let msg = RtacpMessage::new(Priority::MedLow, 0x01, 0x02, b"Hello").expect("message");
    let mut attempts = 0;
    loop {
        match client.rtacp_send(&msg, false) {
            Ok(()) => break,
            Err(ProtocolError::Backend(artie_can::error::BackendError::Backpressure))
                if attempts < 100 =>
            {
                attempts += 1;
                thread::sleep(Duration::from_millis(10));
            }
            Err(err) => panic!("client send failed: {err:?}"),
        }
    }

    let at_server = server.rtacp_receive(2000).expect("server receive");
    assert_eq!(at_server.sender, 0x01);
    assert_eq!(at_server.target, 0x02);
    assert_eq!(at_server.payload(), b"Hello");

    // The delivery above auto-acknowledged; the ACK reaches the client
    // first, then the reply.
    let ack = client.rtacp_receive(2000).expect("ack");
    assert_eq!(ack.kind, artie_can::protocol::rtacp::RtacpKind::Ack);
    assert_eq!(ack.payload(), b"Hello");

    // Server → client.
    let reply = RtacpMessage::new(Priority::High, 0x02, 0x01, b"ok").expect("message");
    server.rtacp_send(&reply, false).expect("server send");
    let at_client = client.rtacp_receive(2000).expect("client receive");
    assert_eq!(at_client.sender, 0x02);
    assert_eq!(at_client.payload(), b"ok");

    client.close().expect("close client");
    server.close().expect("close server");
}

#[test]
/// A corrupted length prefix closes the stream as fatal.
fn test_corrupted_length_prefix() {
    let config = TunnelConfig::new("127.0.0.1", 58659, true);
    let mut backend = TcpTunnelBackend::new(config);
    use artie_can::protocol::transport::traits::can_backend::CanBackend;
    backend.init().expect("init");

    let mut peer = TcpStream::connect(("127.0.0.1", 58659)).expect("connect");
    let mut bogus = HELLO_WIRE;
    bogus[3] = (WIRE_FRAME_LEN + 1) as u8;
    peer.write_all(&bogus).expect("write frame");

    assert_eq!(
        backend.receive(2000),
        Err(artie_can::error::BackendError::TransportFault)
    );
    // The backend is unusable afterwards.
    assert_eq!(
        backend.receive(0),
        Err(artie_can::error::BackendError::NotOpen)
    );
}
