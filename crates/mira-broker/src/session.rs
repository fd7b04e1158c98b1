//! Session state machine: abstract buffer ids → provider surfaces.

use tracing::{debug, warn};

use crate::provider::{LockedSurface, OutputTarget, SurfaceHandle, SurfaceProvider};

/// A session holds at most two surfaces: the root mirror and the cursor
/// sprite, in creation order.
pub const MAX_SURFACES: usize = 2;

/// Base layer for session surfaces. A very large value keeps them above any
/// unrelated content on the target output; later surfaces stack higher.
const LAYER_BASE: i32 = 0x7fff_fff0;

/// Broker-side state for the single active display session.
///
/// Buffer ids are 1-based and map to slots in creation order
/// (`id == slot + 1`). Every externally supplied id is bounds-checked before
/// any provider call; invalid ids fail without side effects.
///
/// The lock/unlock requests are the only synchronization over the shared
/// buffer memory. Locking twice without an intervening unlock-and-post is a
/// caller contract violation the broker does not detect.
pub struct BrokerState<P> {
    provider: P,
    surfaces: Vec<SurfaceHandle>,
    output_target: Option<OutputTarget>,
}

impl<P: SurfaceProvider> BrokerState<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider,
            surfaces: Vec::with_capacity(MAX_SURFACES),
            output_target: None,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    pub fn surface_count(&self) -> usize {
        self.surfaces.len()
    }

    fn slot_for(&self, id: i32) -> Option<usize> {
        let idx = id.checked_sub(1)?;
        usize::try_from(idx).ok().filter(|i| *i < self.surfaces.len())
    }

    /// Allocate a surface and return its `(id, result)` pair: a 1-based id
    /// with result 0, or `(-1, -1)` on failure.
    pub fn create_buffer(&mut self, width: u32, height: u32) -> (i32, i32) {
        if self.surfaces.len() >= MAX_SURFACES {
            warn!("create rejected: session already holds {MAX_SURFACES} surfaces");
            return (-1, -1);
        }

        // First surface of the session picks the output for all of them.
        let target = match self.output_target {
            Some(t) => t,
            None => {
                let t = self.provider.resolve_output_target();
                debug!("session output target resolved: {t:?}");
                self.output_target = Some(t);
                t
            }
        };

        let slot = self.surfaces.len();
        let handle = match self.provider.create_surface(width, height) {
            Ok(h) => h,
            Err(e) => {
                warn!("surface creation failed: {e}");
                return (-1, -1);
            }
        };

        let activated = self
            .provider
            .set_layer(handle, LAYER_BASE + slot as i32)
            .and_then(|_| self.provider.set_layer_group(handle, target))
            .and_then(|_| self.provider.set_position(handle, 0, 0))
            .and_then(|_| self.provider.show(handle));
        if let Err(e) = activated {
            warn!("surface activation failed: {e}");
            if let Err(e) = self.provider.release_surface(handle) {
                warn!("failed to release half-activated surface: {e}");
            }
            return (-1, -1);
        }

        self.surfaces.push(handle);
        (slot as i32 + 1, 0)
    }

    /// Reposition a surface. Valid in any lock state; geometry and contents
    /// are untouched.
    pub fn update_buffer(&mut self, id: i32, x: i32, y: i32) -> i32 {
        let Some(slot) = self.slot_for(id) else {
            warn!("update rejected: invalid buffer id {id}");
            return -1;
        };
        match self.provider.set_position(self.surfaces[slot], x, y) {
            Ok(()) => 0,
            Err(e) => {
                warn!("reposition failed for buffer {id}: {e}");
                -1
            }
        }
    }

    /// Obtain an exclusive write mapping for the buffer, to be handed to the
    /// producer along with its geometry.
    pub fn lock_buffer(&mut self, id: i32) -> Option<LockedSurface> {
        let Some(slot) = self.slot_for(id) else {
            warn!("lock rejected: invalid buffer id {id}");
            return None;
        };
        match self.provider.lock_for_write(self.surfaces[slot]) {
            Ok(locked) => Some(locked),
            Err(e) => {
                warn!("lock failed for buffer {id}: {e}");
                None
            }
        }
    }

    /// Commit the locked contents as the visible surface contents.
    pub fn unlock_and_post(&mut self, id: i32) -> i32 {
        let Some(slot) = self.slot_for(id) else {
            warn!("unlock rejected: invalid buffer id {id}");
            return -1;
        };
        match self.provider.unlock_and_present(self.surfaces[slot]) {
            Ok(()) => 0,
            Err(e) => {
                warn!("unlock-and-present failed for buffer {id}: {e}");
                -1
            }
        }
    }

    /// Release all session surfaces in reverse creation order and forget the
    /// output target so the next session re-resolves it. Release failures
    /// are logged; the remaining surfaces are still released.
    pub fn purge(&mut self) {
        while let Some(handle) = self.surfaces.pop() {
            if let Err(e) = self.provider.release_surface(handle) {
                warn!("failed to release surface {handle:?}: {e}");
            }
        }
        self.output_target = None;
    }

    #[cfg(test)]
    fn handle_for(&self, id: i32) -> Option<SurfaceHandle> {
        self.slot_for(id).map(|slot| self.surfaces[slot])
    }
}
