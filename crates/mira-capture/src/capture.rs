//! Root framebuffer and cursor capture via X11 Damage and XFixes.

use anyhow::{bail, Context, Result};
use tracing::{debug, info};
use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::damage::{self, ConnectionExt as _};
use x11rb::protocol::xfixes::{self, ConnectionExt as _};
use x11rb::protocol::xproto::{ConnectionExt as _, ImageFormat};
use x11rb::protocol::Event;
use x11rb::rust_connection::RustConnection;

/// One full-screen framebuffer snapshot.
pub struct FrameSnapshot {
    pub width: u32,
    pub height: u32,
    pub stride_bytes: usize,
    pub data: Vec<u8>,
}

/// Cursor image and position as reported by the capture side.
pub struct CursorSnapshot {
    pub x: i32,
    pub y: i32,
    pub xhot: i32,
    pub yhot: i32,
    pub width: u32,
    pub height: u32,
    /// Changes whenever the cursor shape changes.
    pub serial: u32,
    /// ARGB, row-major, `width * height` pixels.
    pub pixels: Vec<u32>,
}

/// What the producer loop needs from the windowing system.
pub trait CaptureSource {
    fn root_size(&self) -> (u32, u32);

    /// Non-blocking: did the root surface change since the last poll?
    fn poll_damage(&mut self) -> Result<bool>;

    fn snapshot_frame(&mut self) -> Result<FrameSnapshot>;

    fn query_cursor(&mut self) -> Result<CursorSnapshot>;
}

/// X11 capture source: a Damage object on the root window plus XFixes
/// cursor queries.
pub struct X11Capture {
    conn: RustConnection,
    root: u32,
    width: u16,
    height: u16,
}

impl X11Capture {
    pub fn new() -> Result<Self> {
        let (conn, screen_num) =
            RustConnection::connect(None).context("failed to connect to X server")?;
        let screen = &conn.setup().roots[screen_num];
        let root = screen.root;
        let width = screen.width_in_pixels;
        let height = screen.height_in_pixels;

        if conn
            .extension_information(damage::X11_EXTENSION_NAME)?
            .is_none()
        {
            bail!("Damage extension unavailable");
        }
        let damage_version = conn.damage_query_version(1, 1)?.reply()?;
        debug!(
            "Damage extension {}.{}",
            damage_version.major_version, damage_version.minor_version
        );

        if conn
            .extension_information(xfixes::X11_EXTENSION_NAME)?
            .is_none()
        {
            bail!("XFixes extension unavailable");
        }
        let xfixes_version = conn.xfixes_query_version(5, 0)?.reply()?;
        debug!(
            "XFixes extension {}.{}",
            xfixes_version.major_version, xfixes_version.minor_version
        );

        let damage_id = conn.generate_id()?;
        conn.damage_create(damage_id, root, damage::ReportLevel::RAW_RECTANGLES)?;
        conn.flush()?;

        info!("capturing root window {root} at {width}x{height}");
        Ok(Self {
            conn,
            root,
            width,
            height,
        })
    }
}

impl CaptureSource for X11Capture {
    fn root_size(&self) -> (u32, u32) {
        (u32::from(self.width), u32::from(self.height))
    }

    fn poll_damage(&mut self) -> Result<bool> {
        let mut damaged = false;
        while let Some(event) = self.conn.poll_for_event()? {
            if let Event::DamageNotify(notify) = event {
                damaged = true;
                // subtract, or the server stops reporting further damage
                self.conn
                    .damage_subtract(notify.damage, x11rb::NONE, x11rb::NONE)?;
            }
        }
        if damaged {
            self.conn.flush()?;
        }
        Ok(damaged)
    }

    fn snapshot_frame(&mut self) -> Result<FrameSnapshot> {
        let reply = self
            .conn
            .get_image(
                ImageFormat::Z_PIXMAP,
                self.root,
                0,
                0,
                self.width,
                self.height,
                !0,
            )?
            .reply()
            .context("GetImage on the root window failed")?;

        let height = u32::from(self.height);
        let stride_bytes = if height > 0 {
            reply.data.len() / height as usize
        } else {
            0
        };
        Ok(FrameSnapshot {
            width: u32::from(self.width),
            height,
            stride_bytes,
            data: reply.data,
        })
    }

    fn query_cursor(&mut self) -> Result<CursorSnapshot> {
        let image = self
            .conn
            .xfixes_get_cursor_image()?
            .reply()
            .context("XFixes cursor query failed")?;
        Ok(CursorSnapshot {
            x: i32::from(image.x),
            y: i32::from(image.y),
            xhot: i32::from(image.xhot),
            yhot: i32::from(image.yhot),
            width: u32::from(image.width),
            height: u32::from(image.height),
            serial: image.cursor_serial,
            pixels: image.cursor_image,
        })
    }
}
