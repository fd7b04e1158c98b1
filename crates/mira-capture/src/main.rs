//! Mira capture producer.
//!
//! Mirrors the X11 root framebuffer and cursor sprite onto broker surfaces:
//! one buffer for the root mirror, one for the cursor, refreshed from a
//! cooperative single-threaded tick loop.

mod blit;
mod capture;
mod cursor;

use std::time::Duration;

use anyhow::{Context, Result};
use mira_ipc::{BrokerDisplay, RemoteBuffer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use capture::{CaptureSource, CursorSnapshot, X11Capture};
use cursor::CursorCache;

const TICK: Duration = Duration::from_millis(16);

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "mira_capture=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Both provider connections are required; failing either aborts.
    let mut source = X11Capture::new().context("capture source unavailable")?;
    let mut display = BrokerDisplay::connect().context("surface broker unavailable")?;

    let (root_width, root_height) = source.root_size();
    let root_buf = display
        .create_buffer(root_width, root_height)
        .context("failed to create root mirror buffer")?;
    info!("root mirror buffer id {}", root_buf.id);

    let first_cursor = source.query_cursor()?;
    let (cursor_width, cursor_height) = cursor::surface_size(&first_cursor);
    let cursor_buf = display
        .create_buffer(cursor_width, cursor_height)
        .context("failed to create cursor sprite buffer")?;
    info!("cursor sprite buffer id {}", cursor_buf.id);

    let mut cache = CursorCache::new();
    if let Err(e) = render_cursor(&mut display, &cursor_buf, &first_cursor) {
        warn!("failed to render initial cursor sprite: {e}");
    }
    let (x, y) = cursor::placement(&first_cursor);
    if let Err(e) = display.update_buffer(&cursor_buf, x, y) {
        warn!("failed to place cursor sprite: {e}");
    }
    cache.note(&first_cursor);

    // first frame before any damage arrives
    if let Err(e) = recapture(&mut source, &mut display, &root_buf) {
        warn!("initial capture failed: {e}");
    }

    loop {
        if source.poll_damage()? {
            if let Err(e) = recapture(&mut source, &mut display, &root_buf) {
                warn!("recapture failed: {e}");
            }
        }

        let cursor = source.query_cursor()?;
        if cache.position_changed(&cursor) {
            let (x, y) = cursor::placement(&cursor);
            if let Err(e) = display.update_buffer(&cursor_buf, x, y) {
                warn!("cursor reposition failed: {e}");
            }
        }
        if cache.shape_changed(&cursor) {
            if let Err(e) = render_cursor(&mut display, &cursor_buf, &cursor) {
                warn!("cursor recomposite failed: {e}");
            }
        }
        cache.note(&cursor);

        std::thread::sleep(TICK);
    }
}

/// Full recapture of the root framebuffer into the primary surface:
/// lock, row-copy, unlock-and-post.
fn recapture(
    source: &mut impl CaptureSource,
    display: &mut BrokerDisplay,
    buf: &RemoteBuffer,
) -> Result<()> {
    let frame = source.snapshot_frame()?;
    let mut locked = display.lock_buffer(buf)?;

    let width = frame.width.min(locked.geometry.width);
    let rows = frame.height.min(locked.geometry.height);
    let stride = locked.geometry.stride;
    blit::copy_rows(
        locked.bytes_mut(),
        stride,
        &frame.data,
        frame.stride_bytes,
        width,
        0,
        rows,
    );

    drop(locked);
    display.unlock_and_post(buf)?;
    Ok(())
}

/// Re-render the cursor bitmap into the cursor surface with binary alpha.
fn render_cursor(
    display: &mut BrokerDisplay,
    buf: &RemoteBuffer,
    cursor: &CursorSnapshot,
) -> Result<()> {
    let mut locked = display.lock_buffer(buf)?;

    let (width, height, stride) = (
        locked.geometry.width,
        locked.geometry.height,
        locked.geometry.stride,
    );
    blit::recomposite_cursor(
        locked.bytes_mut(),
        width,
        height,
        stride,
        &cursor.pixels,
        cursor.width,
        cursor.height,
    );

    drop(locked);
    display.unlock_and_post(buf)?;
    Ok(())
}
