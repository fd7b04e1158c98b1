//! Socket serve loop.
//!
//! One client at a time, strictly sequential: read an opcode word, read that
//! operation's request record, answer, repeat. End-of-stream is the only
//! cancellation signal and triggers a full purge of the session. Malformed
//! traffic is logged and tolerated so protocol drift never takes the broker
//! down.

use std::io::{self, Read};
use std::os::fd::{AsFd, AsRawFd, OwnedFd};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;

use anyhow::{Context, Result};
use mira_ipc::fdpass;
use mira_ipc::wire::{
    self, CreateBufferResponse, LockBufferResponse, UpdateBufferResponse,
};
use nix::sys::socket::{self, Backlog, SockFlag, SockType, UnixAddr};
use tracing::{debug, info, warn};

use crate::provider::SurfaceProvider;
use crate::session::BrokerState;

/// Bind the broker's listening socket with a backlog of one pending session.
pub fn bind_listener(path: &Path) -> Result<UnixListener> {
    if path.exists() {
        std::fs::remove_file(path)
            .with_context(|| format!("failed to remove stale socket {path:?}"))?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let sock: OwnedFd = socket::socket(
        socket::AddressFamily::Unix,
        SockType::Stream,
        SockFlag::empty(),
        None,
    )
    .context("failed to create socket")?;
    let addr = UnixAddr::new(path).context("invalid socket path")?;
    socket::bind(sock.as_raw_fd(), &addr).context("failed to bind socket")?;
    socket::listen(&sock, Backlog::new(1)?).context("failed to listen on socket")?;

    Ok(UnixListener::from(sock))
}

/// Accept and serve sessions forever, one at a time.
pub fn run<P: SurfaceProvider>(listener: &UnixListener, state: &mut BrokerState<P>) -> Result<()> {
    loop {
        let (stream, _) = listener.accept().context("accept failed")?;
        info!("capture producer connected");
        serve_connection(stream, state);
    }
}

/// Serve one session until the producer disconnects. All session surfaces
/// are purged before returning.
pub fn serve_connection<P: SurfaceProvider>(mut stream: UnixStream, state: &mut BrokerState<P>) {
    loop {
        let mut opcode_bytes = [0u8; 4];
        let n = match stream.read(&mut opcode_bytes) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                warn!("failed to read request header: {e}");
                continue;
            }
        };
        if n == 0 {
            info!("producer closed the connection, purging session");
            state.purge();
            return;
        }
        if n < opcode_bytes.len() {
            match stream.read_exact(&mut opcode_bytes[n..]) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                    info!("producer disconnected mid-header, purging session");
                    state.purge();
                    return;
                }
                Err(e) => {
                    warn!("failed to read request header: {e}");
                    continue;
                }
            }
        }

        let opcode = u32::from_ne_bytes(opcode_bytes);
        let outcome = match opcode {
            wire::OP_CREATE_BUFFER => create_buffer(&mut stream, state),
            wire::OP_UPDATE_BUFFER => update_buffer(&mut stream, state),
            wire::OP_LOCK_BUFFER => lock_buffer(&mut stream, state),
            wire::OP_UNLOCK_AND_POST_BUFFER => unlock_and_post(&mut stream, state),
            other => {
                // Tolerated: log and keep the connection open, no reply.
                warn!("unrecognized request opcode {other}");
                Ok(())
            }
        };

        match outcome {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                info!("producer disconnected mid-request, purging session");
                state.purge();
                return;
            }
            Err(e) => warn!("request failed: {e}"),
        }
    }
}

fn create_buffer<P: SurfaceProvider>(
    stream: &mut UnixStream,
    state: &mut BrokerState<P>,
) -> io::Result<()> {
    let request: wire::CreateBufferRequest = wire::read_record(stream)?;
    debug!("create request: {}x{}", request.width, request.height);

    let (id, result) = state.create_buffer(request.width, request.height);
    wire::write_record(stream, &CreateBufferResponse { id, result })
}

fn update_buffer<P: SurfaceProvider>(
    stream: &mut UnixStream,
    state: &mut BrokerState<P>,
) -> io::Result<()> {
    let request: wire::UpdateBufferRequest = wire::read_record(stream)?;
    debug!(
        "update request: id {} -> ({}, {})",
        request.id, request.xpos, request.ypos
    );

    let result = state.update_buffer(request.id, request.xpos, request.ypos);
    wire::write_record(stream, &UpdateBufferResponse { result })
}

fn lock_buffer<P: SurfaceProvider>(
    stream: &mut UnixStream,
    state: &mut BrokerState<P>,
) -> io::Result<()> {
    let request: wire::LockBufferRequest = wire::read_record(stream)?;
    debug!("lock request: id {}", request.id);

    match state.lock_buffer(request.id) {
        Some(locked) => {
            let response = LockBufferResponse {
                geometry: locked.geometry,
                result: 0,
            };
            // Payload and descriptor must travel in the same sendmsg.
            fdpass::send_with_fd(
                stream.as_fd(),
                bytemuck::bytes_of(&response),
                Some(locked.fd.as_fd()),
            )
            .map(|_| ())
            .map_err(io::Error::from)
        }
        None => wire::write_record(stream, &LockBufferResponse {
            result: -1,
            ..Default::default()
        }),
    }
}

fn unlock_and_post<P: SurfaceProvider>(
    stream: &mut UnixStream,
    state: &mut BrokerState<P>,
) -> io::Result<()> {
    let request: wire::UnlockBufferRequest = wire::read_record(stream)?;
    debug!("unlock request: id {}", request.id);

    // No reply record for this operation; failures are only logged here and
    // the producer observes the effect through its next lock.
    state.unlock_and_post(request.id);
    Ok(())
}
