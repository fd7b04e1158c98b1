//! Shared-memory surface provider.
//!
//! A software compositor backend: each surface is an anonymous memfd the
//! broker maps locally and hands to the producer on lock. Presenting
//! snapshots the mapping into a committed front copy, so content written
//! between lock and unlock-and-post is exactly what becomes visible and
//! later writes stay invisible until the next cycle.

use std::collections::HashMap;
use std::os::fd::OwnedFd;

use memmap2::MmapMut;
use mira_ipc::BufferGeometry;
use tracing::debug;

use crate::provider::{
    LockedSurface, OutputTarget, ProviderError, SurfaceHandle, SurfaceProvider,
};

/// Row stride is padded to this many pixels, like a real compositor would
/// pad for its scanout alignment.
const STRIDE_ALIGN_PX: u32 = 16;

fn aligned_stride(width: u32) -> u32 {
    width.div_ceil(STRIDE_ALIGN_PX) * STRIDE_ALIGN_PX
}

struct ShmSurface {
    memfd: memfd::Memfd,
    map: MmapMut,
    geometry: BufferGeometry,
    front: Vec<u8>,
    position: (i32, i32),
    layer: i32,
    group: Option<OutputTarget>,
    visible: bool,
}

/// Software compositor keeping every surface in anonymous shared memory.
pub struct ShmCompositor {
    surfaces: HashMap<u32, ShmSurface>,
    next_handle: u32,
    external_connected: bool,
}

impl ShmCompositor {
    /// External-output detection comes from the environment; the stand-in
    /// has no display hardware to probe.
    pub fn from_env() -> Self {
        Self::new(std::env::var_os("MIRA_EXTERNAL_OUTPUT").is_some())
    }

    pub fn new(external_connected: bool) -> Self {
        Self {
            surfaces: HashMap::new(),
            next_handle: 0,
            external_connected,
        }
    }

    fn surface_mut(&mut self, h: SurfaceHandle) -> Result<&mut ShmSurface, ProviderError> {
        self.surfaces
            .get_mut(&h.0)
            .ok_or(ProviderError::UnknownHandle(h))
    }

    /// Committed front contents of a surface.
    pub fn presented(&self, h: SurfaceHandle) -> Option<&[u8]> {
        self.surfaces.get(&h.0).map(|s| s.front.as_slice())
    }

    pub fn position(&self, h: SurfaceHandle) -> Option<(i32, i32)> {
        self.surfaces.get(&h.0).map(|s| s.position)
    }

    pub fn geometry(&self, h: SurfaceHandle) -> Option<BufferGeometry> {
        self.surfaces.get(&h.0).map(|s| s.geometry)
    }

    pub fn layer(&self, h: SurfaceHandle) -> Option<i32> {
        self.surfaces.get(&h.0).map(|s| s.layer)
    }

    pub fn group(&self, h: SurfaceHandle) -> Option<OutputTarget> {
        self.surfaces.get(&h.0).and_then(|s| s.group)
    }

    pub fn is_visible(&self, h: SurfaceHandle) -> bool {
        self.surfaces.get(&h.0).is_some_and(|s| s.visible)
    }
}

impl SurfaceProvider for ShmCompositor {
    fn resolve_output_target(&mut self) -> OutputTarget {
        if self.external_connected {
            OutputTarget::External
        } else {
            OutputTarget::Primary
        }
    }

    fn create_surface(
        &mut self,
        width: u32,
        height: u32,
    ) -> Result<SurfaceHandle, ProviderError> {
        if width == 0 || height == 0 {
            return Err(ProviderError::Allocation(format!(
                "degenerate surface size {width}x{height}"
            )));
        }

        let stride = aligned_stride(width);
        let len = u64::from(stride) * u64::from(height) * 4;

        self.next_handle += 1;
        let memfd = memfd::MemfdOptions::default()
            .create(format!("mira-surface-{}", self.next_handle))
            .map_err(|e| ProviderError::Allocation(e.to_string()))?;
        memfd
            .as_file()
            .set_len(len)
            .map_err(|e| ProviderError::Allocation(e.to_string()))?;
        let map = unsafe { MmapMut::map_mut(memfd.as_file()) }
            .map_err(|e| ProviderError::Allocation(e.to_string()))?;

        debug!(
            "allocated surface {}: {width}x{height} stride {stride}",
            self.next_handle
        );
        self.surfaces.insert(
            self.next_handle,
            ShmSurface {
                memfd,
                map,
                geometry: BufferGeometry {
                    width,
                    height,
                    stride,
                },
                front: vec![0; len as usize],
                position: (0, 0),
                layer: 0,
                group: None,
                visible: false,
            },
        );
        Ok(SurfaceHandle(self.next_handle))
    }

    fn set_layer(&mut self, h: SurfaceHandle, layer: i32) -> Result<(), ProviderError> {
        self.surface_mut(h)?.layer = layer;
        Ok(())
    }

    fn set_layer_group(
        &mut self,
        h: SurfaceHandle,
        target: OutputTarget,
    ) -> Result<(), ProviderError> {
        self.surface_mut(h)?.group = Some(target);
        Ok(())
    }

    fn show(&mut self, h: SurfaceHandle) -> Result<(), ProviderError> {
        self.surface_mut(h)?.visible = true;
        Ok(())
    }

    fn set_position(&mut self, h: SurfaceHandle, x: i32, y: i32) -> Result<(), ProviderError> {
        self.surface_mut(h)?.position = (x, y);
        Ok(())
    }

    fn lock_for_write(&mut self, h: SurfaceHandle) -> Result<LockedSurface, ProviderError> {
        let surface = self.surface_mut(h)?;
        let fd: OwnedFd = surface
            .memfd
            .as_file()
            .try_clone()
            .map_err(|e| ProviderError::Lock(e.to_string()))?
            .into();
        Ok(LockedSurface {
            fd,
            geometry: surface.geometry,
        })
    }

    fn unlock_and_present(&mut self, h: SurfaceHandle) -> Result<(), ProviderError> {
        let surface = self.surface_mut(h)?;
        surface.front.copy_from_slice(&surface.map);
        Ok(())
    }

    fn release_surface(&mut self, h: SurfaceHandle) -> Result<(), ProviderError> {
        self.surfaces
            .remove(&h.0)
            .map(|_| ())
            .ok_or(ProviderError::UnknownHandle(h))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::File;

    fn write_through_lock(comp: &mut ShmCompositor, h: SurfaceHandle, byte: u8) {
        let locked = comp.lock_for_write(h).unwrap();
        let file = File::from(locked.fd);
        let mut map = unsafe { MmapMut::map_mut(&file) }.unwrap();
        map.fill(byte);
        map.flush().unwrap();
    }

    #[test]
    fn stride_is_padded_but_never_below_width() {
        assert_eq!(aligned_stride(800), 800);
        assert_eq!(aligned_stride(801), 816);
        assert_eq!(aligned_stride(1), 16);

        let mut comp = ShmCompositor::new(false);
        let h = comp.create_surface(33, 10).unwrap();
        let geometry = comp.geometry(h).unwrap();
        assert!(geometry.stride >= geometry.width);
        assert_eq!(geometry.stride % STRIDE_ALIGN_PX, 0);
    }

    #[test]
    fn present_commits_exactly_the_locked_writes() {
        let mut comp = ShmCompositor::new(false);
        let h = comp.create_surface(16, 4).unwrap();

        write_through_lock(&mut comp, h, 0x5a);
        comp.unlock_and_present(h).unwrap();
        assert!(comp.presented(h).unwrap().iter().all(|&b| b == 0x5a));

        // writes after unlock stay invisible until the next cycle
        write_through_lock(&mut comp, h, 0x33);
        assert!(comp.presented(h).unwrap().iter().all(|&b| b == 0x5a));

        comp.unlock_and_present(h).unwrap();
        assert!(comp.presented(h).unwrap().iter().all(|&b| b == 0x33));
    }

    #[test]
    fn transactions_update_surface_placement() {
        let mut comp = ShmCompositor::new(true);
        let h = comp.create_surface(32, 32).unwrap();

        assert_eq!(comp.resolve_output_target(), OutputTarget::External);
        comp.set_layer(h, 0x7fff_fff1).unwrap();
        comp.set_layer_group(h, OutputTarget::External).unwrap();
        comp.set_position(h, 50, 60).unwrap();
        comp.show(h).unwrap();

        assert_eq!(comp.layer(h), Some(0x7fff_fff1));
        assert_eq!(comp.group(h), Some(OutputTarget::External));
        assert_eq!(comp.position(h), Some((50, 60)));
        assert!(comp.is_visible(h));
    }

    #[test]
    fn degenerate_sizes_are_rejected() {
        let mut comp = ShmCompositor::new(false);
        assert!(comp.create_surface(0, 32).is_err());
        assert!(comp.create_surface(32, 0).is_err());
    }

    #[test]
    fn released_surfaces_are_gone() {
        let mut comp = ShmCompositor::new(false);
        let h = comp.create_surface(8, 8).unwrap();
        comp.release_surface(h).unwrap();
        assert!(comp.presented(h).is_none());
        assert!(comp.release_surface(h).is_err());
    }
}
