//! Surface provider interface.
//!
//! The broker talks to the real compositor exclusively through this trait:
//! surface allocation, layer/output assignment, positioning, the
//! lock/present cycle, and release. Handles are opaque and only meaningful
//! to the provider that issued them.

use std::os::fd::OwnedFd;

use mira_ipc::BufferGeometry;
use thiserror::Error;

/// Opaque provider-issued surface handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SurfaceHandle(pub u32);

/// The display group a session's surfaces attach to. Resolved once per
/// session; an external output is preferred when one is connected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputTarget {
    Primary,
    External,
}

/// An exclusive write window into a surface's backing memory. The descriptor
/// is transferable to another process; the geometry describes the mapping.
pub struct LockedSurface {
    pub fd: OwnedFd,
    pub geometry: BufferGeometry,
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("surface allocation failed: {0}")]
    Allocation(String),

    #[error("buffer lock failed: {0}")]
    Lock(String),

    #[error("compositor transaction failed: {0}")]
    Transaction(String),

    #[error("unknown surface handle {0:?}")]
    UnknownHandle(SurfaceHandle),
}

pub trait SurfaceProvider {
    /// Pick the output new surfaces should attach to. Called lazily, once
    /// per session, on the first surface creation.
    fn resolve_output_target(&mut self) -> OutputTarget;

    fn create_surface(&mut self, width: u32, height: u32)
        -> Result<SurfaceHandle, ProviderError>;

    fn set_layer(&mut self, surface: SurfaceHandle, layer: i32) -> Result<(), ProviderError>;

    fn set_layer_group(
        &mut self,
        surface: SurfaceHandle,
        target: OutputTarget,
    ) -> Result<(), ProviderError>;

    fn show(&mut self, surface: SurfaceHandle) -> Result<(), ProviderError>;

    fn set_position(&mut self, surface: SurfaceHandle, x: i32, y: i32)
        -> Result<(), ProviderError>;

    fn lock_for_write(&mut self, surface: SurfaceHandle) -> Result<LockedSurface, ProviderError>;

    fn unlock_and_present(&mut self, surface: SurfaceHandle) -> Result<(), ProviderError>;

    fn release_surface(&mut self, surface: SurfaceHandle) -> Result<(), ProviderError>;
}
