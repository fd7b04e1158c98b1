//! Producer-side protocol client.
//!
//! Mirrors the broker's request/response contract one call at a time: every
//! request is written in full and its reply read in full before the next one
//! is issued. `lock_buffer` maps the transferred descriptor into this
//! process, giving the producer a direct write window into the compositor's
//! buffer; no pixel data ever crosses the socket itself.

use std::fs::File;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::net::UnixStream;

use memmap2::{MmapMut, MmapOptions};
use tracing::debug;

use crate::fdpass;
use crate::wire::{
    self, BufferGeometry, CreateBufferRequest, CreateBufferResponse, LockBufferRequest,
    LockBufferResponse, UnlockBufferRequest, UpdateBufferRequest, UpdateBufferResponse,
};
use crate::IpcError;

/// A buffer allocated on the broker, addressed by its stable 1-based id.
#[derive(Debug, Clone, Copy)]
pub struct RemoteBuffer {
    pub id: i32,
    pub width: u32,
    pub height: u32,
}

/// A write mapping of a locked buffer, valid until unlock-and-post.
pub struct LockedBufferMap {
    pub geometry: BufferGeometry,
    map: MmapMut,
}

impl LockedBufferMap {
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map
    }
}

/// Connection to the surface broker.
pub struct BrokerDisplay {
    stream: UnixStream,
}

impl BrokerDisplay {
    /// Connect to the broker at its well-known socket address.
    pub fn connect() -> Result<Self, IpcError> {
        let path = crate::socket_path();
        debug!("connecting to broker at {:?}", path);
        let stream = UnixStream::connect(&path)?;
        Ok(Self { stream })
    }

    /// Wrap an already-connected stream (socketpair setups and tests).
    pub fn from_stream(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Ask the broker for a new surface-backed buffer.
    pub fn create_buffer(&mut self, width: u32, height: u32) -> Result<RemoteBuffer, IpcError> {
        wire::write_record(&mut self.stream, &wire::OP_CREATE_BUFFER)?;
        wire::write_record(&mut self.stream, &CreateBufferRequest { width, height })?;

        let reply: CreateBufferResponse = read_reply(&mut self.stream)?;
        if reply.result < 0 || reply.id <= 0 {
            return Err(IpcError::Rejected(reply.result));
        }
        Ok(RemoteBuffer {
            id: reply.id,
            width,
            height,
        })
    }

    /// Move a buffer's surface to (x, y) on screen. Contents and geometry are
    /// untouched.
    pub fn update_buffer(&mut self, buf: &RemoteBuffer, x: i32, y: i32) -> Result<(), IpcError> {
        wire::write_record(&mut self.stream, &wire::OP_UPDATE_BUFFER)?;
        wire::write_record(
            &mut self.stream,
            &UpdateBufferRequest {
                id: buf.id,
                xpos: x,
                ypos: y,
            },
        )?;

        let reply: UpdateBufferResponse = read_reply(&mut self.stream)?;
        if reply.result < 0 {
            return Err(IpcError::Rejected(reply.result));
        }
        Ok(())
    }

    /// Obtain an exclusive write mapping of the buffer.
    ///
    /// The caller must pair this with [`unlock_and_post`](Self::unlock_and_post)
    /// before locking again; the broker does not enforce the discipline.
    pub fn lock_buffer(&mut self, buf: &RemoteBuffer) -> Result<LockedBufferMap, IpcError> {
        wire::write_record(&mut self.stream, &wire::OP_LOCK_BUFFER)?;
        wire::write_record(&mut self.stream, &LockBufferRequest { id: buf.id })?;

        // The reply payload and the descriptor arrive in the same sendmsg,
        // but recvmsg may still hand the bytes back in pieces.
        let mut reply = LockBufferResponse::default();
        let bytes = bytemuck::bytes_of_mut(&mut reply);
        let mut filled = 0;
        let mut descriptor = None;
        while filled < bytes.len() {
            let (n, fd) = fdpass::recv_with_fd(self.stream.as_fd(), &mut bytes[filled..])?;
            if n == 0 {
                return Err(IpcError::Disconnected);
            }
            filled += n;
            if fd.is_some() {
                descriptor = fd;
            }
        }

        if reply.result < 0 {
            return Err(IpcError::Rejected(reply.result));
        }
        let fd = descriptor.ok_or(IpcError::MissingDescriptor)?;

        let len = reply.geometry.stride as usize * reply.geometry.height as usize * 4;
        let file = File::from(fd);
        let map = unsafe { MmapOptions::new().len(len).map_mut(&file) }?;
        Ok(LockedBufferMap {
            geometry: reply.geometry,
            map,
        })
    }

    /// Commit the locked contents for display. The broker sends no reply;
    /// synchronization comes from the next lock round trip.
    pub fn unlock_and_post(&mut self, buf: &RemoteBuffer) -> Result<(), IpcError> {
        wire::write_record(&mut self.stream, &wire::OP_UNLOCK_AND_POST_BUFFER)?;
        wire::write_record(&mut self.stream, &UnlockBufferRequest { id: buf.id })?;
        Ok(())
    }
}

fn read_reply<T: bytemuck::Pod + bytemuck::Zeroable>(
    stream: &mut UnixStream,
) -> Result<T, IpcError> {
    wire::read_record(stream).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            IpcError::Disconnected
        } else {
            IpcError::Io(e)
        }
    })
}
