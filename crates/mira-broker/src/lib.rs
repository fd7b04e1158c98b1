//! Mira surface broker
//!
//! Serves one capture producer at a time over a unix socket, mapping the
//! protocol's abstract buffer ids onto native surfaces obtained from a
//! [`provider::SurfaceProvider`]. Request handling is strictly sequential:
//! each request is fully read and fully answered before the next one, so no
//! locking guards the session state.

pub mod provider;
pub mod serve;
pub mod session;
pub mod shm;
