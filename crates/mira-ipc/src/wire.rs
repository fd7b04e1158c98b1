//! Fixed-size binary records for the buffer protocol.
//!
//! Every exchange starts with a `u32` opcode word, followed by the request
//! record for that operation. Responses are fixed-size records with no length
//! prefix; message identity is inferred purely from the opcode and the known
//! reply sizes. All fields are native-endian, `#[repr(C)]` with no padding.

use std::io::{self, Read, Write};

use bytemuck::{Pod, Zeroable};

pub const OP_CREATE_BUFFER: u32 = 1;
pub const OP_UPDATE_BUFFER: u32 = 2;
pub const OP_LOCK_BUFFER: u32 = 3;
pub const OP_UNLOCK_AND_POST_BUFFER: u32 = 4;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct CreateBufferRequest {
    pub width: u32,
    pub height: u32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct CreateBufferResponse {
    /// 1-based buffer id; 0 or negative means the create failed.
    pub id: i32,
    /// 0 on success, -1 on failure.
    pub result: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct UpdateBufferRequest {
    pub id: i32,
    pub xpos: i32,
    pub ypos: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct UpdateBufferResponse {
    pub result: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct LockBufferRequest {
    pub id: i32,
}

/// Geometry of a locked buffer. `stride` is in pixels and is >= `width`;
/// the compositor decides the padding.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct BufferGeometry {
    pub width: u32,
    pub height: u32,
    pub stride: u32,
}

/// Reply to a lock request. On success (`result == 0`) the same sendmsg
/// carries exactly one file descriptor for the buffer's memory as ancillary
/// data; the pixel bytes themselves never travel over the socket.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct LockBufferResponse {
    pub geometry: BufferGeometry,
    pub result: i32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default, Pod, Zeroable)]
pub struct UnlockBufferRequest {
    pub id: i32,
}

/// Read one fixed-size record in full.
pub fn read_record<T: Pod + Zeroable>(reader: &mut impl Read) -> io::Result<T> {
    let mut record = T::zeroed();
    reader.read_exact(bytemuck::bytes_of_mut(&mut record))?;
    Ok(record)
}

/// Write one fixed-size record in full.
pub fn write_record<T: Pod>(writer: &mut impl Write, record: &T) -> io::Result<()> {
    writer.write_all(bytemuck::bytes_of(record))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn record_sizes_are_fixed() {
        assert_eq!(std::mem::size_of::<CreateBufferRequest>(), 8);
        assert_eq!(std::mem::size_of::<CreateBufferResponse>(), 8);
        assert_eq!(std::mem::size_of::<UpdateBufferRequest>(), 12);
        assert_eq!(std::mem::size_of::<UpdateBufferResponse>(), 4);
        assert_eq!(std::mem::size_of::<LockBufferRequest>(), 4);
        assert_eq!(std::mem::size_of::<BufferGeometry>(), 12);
        assert_eq!(std::mem::size_of::<LockBufferResponse>(), 16);
        assert_eq!(std::mem::size_of::<UnlockBufferRequest>(), 4);
    }

    #[test]
    fn record_roundtrip() {
        let req = UpdateBufferRequest {
            id: 2,
            xpos: -7,
            ypos: 60,
        };
        let mut buf = Vec::new();
        write_record(&mut buf, &req).unwrap();
        assert_eq!(buf.len(), 12);

        let back: UpdateBufferRequest = read_record(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back.id, 2);
        assert_eq!(back.xpos, -7);
        assert_eq!(back.ypos, 60);
    }

    #[test]
    fn short_read_is_an_error() {
        let buf = [0u8; 3];
        let err = read_record::<LockBufferRequest>(&mut Cursor::new(&buf[..])).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
