//! Dynamically created, double-buffered virtual framebuffer devices.
//!
//! A [`Registry`] hands out [`DeviceHandle`]s, one per open instance. Each instance negotiates a
//! single resolution from its mode list, owns a pixel buffer twice the visible height (the two
//! halves are selected by panning), and resizes out of place: a buffer that is mapped or being
//! read or written is never freed or replaced until it is released.
//!
//! ```
//! use vgfb::{ModeRequest, Registry, VgfbConfig};
//!
//! let registry = Registry::new(VgfbConfig::default());
//! let handle = registry.open_new()?;
//! let mode = handle.set_geometry(&ModeRequest::new(800, 600, 32))?;
//! assert_eq!(mode.yres_virtual, 1200);
//!
//! // Draw into the hidden half, then flip to it.
//! let grant = handle.map()?;
//! grant.memory().fill(mode.line_length() * 600, 4, 0xff)?;
//! handle.pan(0, 600)?;
//! handle.unmap(grant)?;
//! handle.close()?;
//! # Ok::<(), vgfb::VgfbError>(())
//! ```

mod buffer;
pub mod config;
pub mod control;
mod display;
mod error;
mod handle;
mod mapping;
pub mod mode;
mod registry;

use std::sync::{Mutex, MutexGuard};

pub use buffer::FrameBuffer;
pub use config::{ConfigError, ParseResolutionError, Resolution, VgfbConfig};
pub use control::{ControlReply, ControlRequest};
pub use display::{DisplayId, DisplayStats, UseRef, VirtualDisplay};
pub use error::{ErrorKind, Result, VgfbError};
pub use handle::DeviceHandle;
pub use mapping::{MappingGrant, RemapNotice};
pub use mode::{Mode, ModeList, ModeRequest, PixelLayout, VideoMode};
pub use registry::Registry;

/// Lock `mutex`, recovering the guard if a previous holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
