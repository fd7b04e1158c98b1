//! Pixel copies between the capture snapshot and locked surface memory.

pub const BYTES_PER_PIXEL: usize = 4;

/// Row-by-row copy that adjusts for differing strides on either side.
///
/// Only `width * 4` bytes are copied per row: source row padding is never
/// read, destination row padding is never written. Rows that would run past
/// either buffer are skipped.
pub fn copy_rows(
    dst: &mut [u8],
    dst_stride_px: u32,
    src: &[u8],
    src_stride_bytes: usize,
    width_px: u32,
    row_start: u32,
    row_end: u32,
) {
    let row_bytes = width_px as usize * BYTES_PER_PIXEL;
    let dst_stride_bytes = dst_stride_px as usize * BYTES_PER_PIXEL;

    for y in row_start..row_end {
        let src_off = y as usize * src_stride_bytes;
        let dst_off = y as usize * dst_stride_bytes;
        if src_off + row_bytes > src.len() || dst_off + row_bytes > dst.len() {
            break;
        }
        dst[dst_off..dst_off + row_bytes].copy_from_slice(&src[src_off..src_off + row_bytes]);
    }
}

/// Composite a cursor bitmap into surface memory.
///
/// Binary alpha: a pixel is copied only when its alpha channel is fully
/// opaque, everything else leaves the destination untouched. The destination
/// is never read back, so there is no blending. Pixels outside the surface
/// are clipped.
pub fn composite_cursor(
    dst: &mut [u8],
    dst_width: u32,
    dst_height: u32,
    dst_stride_px: u32,
    cursor_pixels: &[u32],
    cursor_width: u32,
    cursor_height: u32,
) {
    for cur_y in 0..cursor_height {
        if cur_y >= dst_height {
            break;
        }
        for cur_x in 0..cursor_width {
            if cur_x >= dst_width {
                break;
            }
            let Some(&pixel) = cursor_pixels.get((cur_y * cursor_width + cur_x) as usize) else {
                return;
            };
            if (pixel >> 24) as u8 != 0xff {
                continue;
            }
            let off = (cur_y * dst_stride_px + cur_x) as usize * BYTES_PER_PIXEL;
            dst[off..off + BYTES_PER_PIXEL].copy_from_slice(&pixel.to_ne_bytes());
        }
    }
}

/// Redraw the cursor surface for a new shape.
///
/// Binary compositing never writes non-opaque source pixels, so pixels of
/// the previous shape would survive wherever the new shape is transparent.
/// The surface is cleared to fully transparent first.
pub fn recomposite_cursor(
    dst: &mut [u8],
    dst_width: u32,
    dst_height: u32,
    dst_stride_px: u32,
    cursor_pixels: &[u32],
    cursor_width: u32,
    cursor_height: u32,
) {
    dst.fill(0);
    composite_cursor(
        dst,
        dst_width,
        dst_height,
        dst_stride_px,
        cursor_pixels,
        cursor_width,
        cursor_height,
    );
}
