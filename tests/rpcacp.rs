//! RPCACP integration: the full call/ACK/respond handshake between two
//! contexts, including NACK refusal and nonce correlation.
mod helpers;

use artie_can::core::CanContext;
use artie_can::error::ProtocolError;
use artie_can::protocol::rpcacp::{nack_code, RpcacpMessage};
use artie_can::protocol::transport::can_id::Priority;
use helpers::PipeBackend;
use std::thread;

#[test]
/// Caller and callee complete a synchronous RPC: request, ACK, response.
fn test_synchronous_call_roundtrip() {
    let (end_a, end_b) = PipeBackend::create_pair();
    let mut caller = CanContext::init_custom(0x01, end_a).expect("init caller");
    let mut callee = CanContext::init_custom(0x02, end_b).expect("init callee");

    let server = thread::spawn(move || {
        let request = callee.rpc_receive(2000).expect("request");
        let RpcacpMessage::Request {
            sender,
            priority,
            nonce,
            synchronous,
            procedure_id,
            payload,
            ..
        } = request
        else {
            panic!("expected a request, got {request:?}");
        };
        assert_eq!(sender, 0x01);
        assert!(synchronous);
        assert_eq!(procedure_id, 5);
        assert_eq!(payload.as_slice(), &[0x01, 0x02, 0x03]);

        callee.rpc_send_ack(sender, priority, nonce).expect("ack");

        // Echo the payload back, doubled, as the return value.
        let mut doubled = [0u8; 3];
        for (out, byte) in doubled.iter_mut().zip(payload.as_slice()) {
            *out = byte.wrapping_mul(2);
        }
        callee
            .rpc_respond(sender, priority, procedure_id, nonce, &doubled)
            .expect("respond");
        nonce
    });

    let nonce = caller
        .rpc_call(0x02, Priority::MedHigh, true, 5, &[0x01, 0x02, 0x03])
        .expect("acknowledged call");
    let response = caller.rpc_wait_response(nonce, 2000).expect("response");
    assert_eq!(response.as_slice(), &[0x02, 0x04, 0x06]);

    // The nonce travelled the whole exchange unchanged.
    let server_nonce = server.join().expect("server thread");
    assert_eq!(server_nonce, nonce);
}

#[test]
/// A refused call surfaces the peer's errno-style NACK code.
fn test_nack_refusal() {
    let (end_a, end_b) = PipeBackend::create_pair();
    let mut caller = CanContext::init_custom(0x01, end_a).expect("init caller");
    let mut callee = CanContext::init_custom(0x02, end_b).expect("init callee");

    let server = thread::spawn(move || {
        let request = callee.rpc_receive(2000).expect("request");
        let RpcacpMessage::Request {
            sender,
            priority,
            nonce,
            ..
        } = request
        else {
            panic!("expected a request, got {request:?}");
        };
        callee
            .rpc_send_nack(sender, priority, nonce, nack_code::PERM)
            .expect("nack");
    });

    let result = caller.rpc_call(0x02, Priority::High, false, 9, &[0xFF]);
    assert_eq!(
        result,
        Err(ProtocolError::NackReceived {
            code: nack_code::PERM
        })
    );
    server.join().expect("server thread");
}

#[test]
/// A multi-frame request and a multi-frame response both reassemble across
/// the pipe.
fn test_multi_frame_roundtrip() {
    let (end_a, end_b) = PipeBackend::create_pair();
    let mut caller = CanContext::init_custom(0x01, end_a).expect("init caller");
    let mut callee = CanContext::init_custom(0x02, end_b).expect("init callee");

    let request_payload: Vec<u8> = (0..100u16).map(|value| value as u8).collect();
    let expected = request_payload.clone();

    let server = thread::spawn(move || {
        let request = callee.rpc_receive(2000).expect("request");
        let RpcacpMessage::Request {
            sender,
            priority,
            nonce,
            procedure_id,
            payload,
            ..
        } = request
        else {
            panic!("expected a request, got {request:?}");
        };
        assert_eq!(payload.as_slice(), expected.as_slice());

        callee.rpc_send_ack(sender, priority, nonce).expect("ack");
        callee
            .rpc_respond(sender, priority, procedure_id, nonce, payload.as_slice())
            .expect("respond");
    });

    let nonce = caller
        .rpc_call(0x02, Priority::MedLow, true, 17, &request_payload)
        .expect("acknowledged call");
    let response = caller.rpc_wait_response(nonce, 2000).expect("response");
    assert_eq!(response.as_slice(), request_payload.as_slice());
    server.join().expect("server thread");
}

#[test]
/// Broadcast remains forbidden at the integration surface.
fn test_broadcast_forbidden() {
    let (end_a, _end_b) = PipeBackend::create_pair();
    let mut caller = CanContext::init_custom(0x01, end_a).expect("init caller");
    assert!(matches!(
        caller.rpc_call(0x00, Priority::High, true, 1, &[]),
        Err(ProtocolError::InvalidArgument)
    ));
}
