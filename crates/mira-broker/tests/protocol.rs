//! End-to-end protocol exercise: a real client against the real serve loop
//! over a socketpair, with shared-memory surfaces and descriptor transfer.

use std::io::Write;
use std::os::unix::net::UnixStream;
use std::thread;
use std::time::Duration;

use mira_broker::serve::serve_connection;
use mira_broker::session::BrokerState;
use mira_broker::shm::ShmCompositor;
use mira_ipc::{wire, BrokerDisplay, IpcError};

fn spawn_broker(
    sessions: Vec<UnixStream>,
) -> thread::JoinHandle<BrokerState<ShmCompositor>> {
    thread::spawn(move || {
        let mut state = BrokerState::new(ShmCompositor::new(true));
        for stream in sessions {
            serve_connection(stream, &mut state);
        }
        state
    })
}

#[test]
fn full_session_lifecycle() {
    let (client_one, server_one) = UnixStream::pair().unwrap();
    let (client_two, server_two) = UnixStream::pair().unwrap();
    let broker = spawn_broker(vec![server_one, server_two]);

    let mut display = BrokerDisplay::from_stream(client_one);

    // two surfaces fit, the third does not
    let root = display.create_buffer(800, 480).unwrap();
    assert_eq!(root.id, 1);
    let cursor = display.create_buffer(32, 32).unwrap();
    assert_eq!(cursor.id, 2);
    match display.create_buffer(16, 16) {
        Err(IpcError::Rejected(result)) => assert_eq!(result, -1),
        other => panic!("expected capacity rejection, got {other:?}"),
    }

    // lock hands back geometry plus a writable mapping of the real buffer
    let mut locked = display.lock_buffer(&root).unwrap();
    assert_eq!(locked.geometry.width, 800);
    assert_eq!(locked.geometry.height, 480);
    assert!(locked.geometry.stride >= 800);
    let expected_len = locked.geometry.stride as usize * 480 * 4;
    assert_eq!(locked.bytes().len(), expected_len);
    locked.bytes_mut().fill(0x7f);
    drop(locked);
    display.unlock_and_post(&root).unwrap();

    // reposition works any time and round-trips a result
    display.update_buffer(&cursor, 50, 60).unwrap();

    // invalid ids are rejected without killing the session
    let bogus = mira_ipc::RemoteBuffer {
        id: 99,
        width: 1,
        height: 1,
    };
    assert!(matches!(
        display.update_buffer(&bogus, 0, 0),
        Err(IpcError::Rejected(-1))
    ));
    assert!(matches!(
        display.lock_buffer(&bogus),
        Err(IpcError::Rejected(-1))
    ));
    display.update_buffer(&root, 0, 0).unwrap();

    // disconnect purges; the next session starts from id 1 again
    drop(display);
    let mut second = BrokerDisplay::from_stream(client_two);
    let fresh = second.create_buffer(640, 400).unwrap();
    assert_eq!(fresh.id, 1);
    drop(second);

    let state = broker.join().unwrap();
    assert_eq!(state.surface_count(), 0);
}

#[test]
fn unknown_opcodes_are_ignored_and_the_session_survives() {
    let (mut client, server) = UnixStream::pair().unwrap();
    let broker = spawn_broker(vec![server]);

    // protocol drift: an opcode this broker has never heard of
    client.write_all(&0xdead_beefu32.to_ne_bytes()).unwrap();

    let mut display = BrokerDisplay::from_stream(client);
    let buf = display.create_buffer(128, 128).unwrap();
    assert_eq!(buf.id, 1);

    drop(display);
    let state = broker.join().unwrap();
    assert_eq!(state.surface_count(), 0);
}

#[test]
fn split_request_headers_are_reassembled() {
    let (mut client, server) = UnixStream::pair().unwrap();
    let broker = spawn_broker(vec![server]);

    // opcode word arrives in two reads; the broker must wait for the rest
    // instead of dropping the session
    let opcode = wire::OP_CREATE_BUFFER.to_ne_bytes();
    client.write_all(&opcode[..2]).unwrap();
    thread::sleep(Duration::from_millis(20));
    client.write_all(&opcode[2..]).unwrap();
    wire::write_record(
        &mut client,
        &wire::CreateBufferRequest {
            width: 64,
            height: 64,
        },
    )
    .unwrap();

    let response: wire::CreateBufferResponse = wire::read_record(&mut client).unwrap();
    assert_eq!(response.result, 0);
    assert_eq!(response.id, 1);

    drop(client);
    let state = broker.join().unwrap();
    assert_eq!(state.surface_count(), 0);
}

#[test]
fn disconnect_mid_header_purges_the_session() {
    let (mut client, server) = UnixStream::pair().unwrap();
    let broker = spawn_broker(vec![server]);

    client
        .write_all(&wire::OP_CREATE_BUFFER.to_ne_bytes())
        .unwrap();
    wire::write_record(
        &mut client,
        &wire::CreateBufferRequest {
            width: 64,
            height: 64,
        },
    )
    .unwrap();
    let response: wire::CreateBufferResponse = wire::read_record(&mut client).unwrap();
    assert_eq!(response.result, 0);

    // hang up half way through the next opcode word
    client
        .write_all(&wire::OP_UPDATE_BUFFER.to_ne_bytes()[..2])
        .unwrap();
    drop(client);

    let state = broker.join().unwrap();
    assert_eq!(state.surface_count(), 0);
}
