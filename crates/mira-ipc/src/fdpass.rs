//! Descriptor transfer over the protocol socket.
//!
//! A lock response must carry the buffer's memory descriptor atomically with
//! its payload, so both travel in a single `sendmsg` with an SCM_RIGHTS
//! control message. The kernel requires at least one byte of ordinary data in
//! that call; lock responses are 16 bytes, which satisfies it. This module is
//! the one seam to replace if the transport ever lacks fd passing.

use std::io::{IoSlice, IoSliceMut};
use std::os::fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd};

use nix::sys::socket::{self, ControlMessage, ControlMessageOwned, MsgFlags, UnixAddr};

/// Send `bytes` on `sock`, attaching `fd` as ancillary data when present.
pub fn send_with_fd(
    sock: BorrowedFd<'_>,
    bytes: &[u8],
    fd: Option<BorrowedFd<'_>>,
) -> Result<usize, nix::errno::Errno> {
    let iov = [IoSlice::new(bytes)];
    let raw_fds: Vec<RawFd> = fd.iter().map(|f| f.as_raw_fd()).collect();
    let cmsgs = if raw_fds.is_empty() {
        Vec::new()
    } else {
        vec![ControlMessage::ScmRights(&raw_fds)]
    };

    socket::sendmsg::<()>(sock.as_raw_fd(), &iov, &cmsgs, MsgFlags::empty(), None)
}

/// Receive into `buf`, returning the byte count and the transferred
/// descriptor, if any arrived with this chunk.
pub fn recv_with_fd(
    sock: BorrowedFd<'_>,
    buf: &mut [u8],
) -> Result<(usize, Option<OwnedFd>), nix::errno::Errno> {
    let mut iov = [IoSliceMut::new(buf)];
    let mut cmsg_space = nix::cmsg_space!([RawFd; 1]);

    let msg = socket::recvmsg::<UnixAddr>(
        sock.as_raw_fd(),
        &mut iov,
        Some(&mut cmsg_space),
        MsgFlags::empty(),
    )?;

    let bytes = msg.bytes;
    let mut transferred = None;
    for cmsg in msg.cmsgs()? {
        if let ControlMessageOwned::ScmRights(fds) = cmsg {
            for raw in fds {
                if raw < 0 {
                    continue;
                }
                let owned = unsafe { OwnedFd::from_raw_fd(raw) };
                if transferred.is_none() {
                    transferred = Some(owned);
                }
                // extra descriptors are closed by dropping `owned`
            }
        }
    }

    Ok((bytes, transferred))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom, Write};
    use std::os::fd::AsFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn payload_and_descriptor_arrive_together() {
        let (a, b) = UnixStream::pair().unwrap();

        let memfd = memfd::MemfdOptions::default().create("fdpass-test").unwrap();
        memfd.as_file().set_len(16).unwrap();
        memfd.as_file().write_all(b"through the side").unwrap();

        let sent = send_with_fd(a.as_fd(), b"hello", Some(memfd.as_file().as_fd())).unwrap();
        assert_eq!(sent, 5);

        let mut buf = [0u8; 16];
        let (n, fd) = recv_with_fd(b.as_fd(), &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");

        let mut file = File::from(fd.expect("descriptor should transfer"));
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "through the side");
    }

    #[test]
    fn plain_payload_has_no_descriptor() {
        let (a, b) = UnixStream::pair().unwrap();
        send_with_fd(a.as_fd(), b"plain", None).unwrap();

        let mut buf = [0u8; 8];
        let (n, fd) = recv_with_fd(b.as_fd(), &mut buf).unwrap();
        assert_eq!(n, 5);
        assert!(fd.is_none());
    }
}
