//! Producer-side cursor cache.

use crate::capture::CursorSnapshot;

/// Last observed cursor state, owned by the capture loop (one instance per
/// session). Detects movement and shape changes between polls.
#[derive(Default)]
pub struct CursorCache {
    last_x: i32,
    last_y: i32,
    serial: Option<u32>,
}

impl CursorCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position_changed(&self, cursor: &CursorSnapshot) -> bool {
        cursor.x != self.last_x || cursor.y != self.last_y
    }

    pub fn shape_changed(&self, cursor: &CursorSnapshot) -> bool {
        self.serial != Some(cursor.serial)
    }

    pub fn note(&mut self, cursor: &CursorSnapshot) {
        self.last_x = cursor.x;
        self.last_y = cursor.y;
        self.serial = Some(cursor.serial);
    }
}

/// On-screen placement for the cursor sprite: hotspot-adjusted top-left,
/// clamped to >= 0 because the remote compositor rejects negative surface
/// positions.
pub fn placement(cursor: &CursorSnapshot) -> (i32, i32) {
    let x = (cursor.x - cursor.xhot).max(0);
    let y = (cursor.y - cursor.yhot).max(0);
    (x, y)
}

/// Lower bound on the cursor surface, so later shapes larger than the one
/// observed at startup still fit without clipping.
const MIN_SURFACE_SIZE: u32 = 64;

/// Size of the cursor surface to allocate for a session, derived from the
/// first observed cursor image. The surface is created once, so it must
/// accommodate the common larger shapes too.
pub fn surface_size(cursor: &CursorSnapshot) -> (u32, u32) {
    (
        cursor.width.max(MIN_SURFACE_SIZE),
        cursor.height.max(MIN_SURFACE_SIZE),
    )
}
