//! One virtual display instance: its mode, mode list, buffers and reference counts.
//!
//! All mutable instance state sits behind a single mutex. Buffer allocation happens outside it,
//! serialized per instance by a second lock held only by geometry changes. Remap notices are sent
//! and retired buffers are dropped after the state lock is released.

use std::sync::{Arc, Mutex, Weak};

use crossbeam_channel::Receiver;
use tracing::{debug, error, info, warn};
use vgfb_protocol::{
    FbFixScreenInfo, FB_ACCEL_NONE, FB_ID, FB_TYPE_PACKED_PIXELS, FB_VISUAL_TRUECOLOR,
};

use crate::buffer::{BufferSlots, FrameBuffer, Installed, Switched};
use crate::config::{VgfbConfig, BUFFER_BYTES_CEILING};
use crate::error::{Result, VgfbError};
use crate::lock;
use crate::mapping::{MapCounter, MappingGrant, RemapNotice, RemapNotifier};
use crate::mode::{validate_and_commit, Mode, ModeList, ModeRequest};
use crate::registry;

pub type DisplayId = u32;

/// Point-in-time counters of one instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayStats {
    pub use_count: u64,
    pub mappings: u64,
    pub io_in_flight: u64,
    pub buffer_len: u64,
    pub pending: bool,
    pub swaps: u64,
    pub notices: u64,
    pub closed: bool,
}

#[derive(Debug)]
struct DisplayState {
    mode: Mode,
    modes: ModeList,
    slots: BufferSlots,
    uses: u64,
    maps: MapCounter,
    io_in_flight: u64,
    notices: u64,
    closed: bool,
    /// The owning registry shut down; the open reference is still outstanding.
    revoked: bool,
    torn_down: bool,
    /// A reference-count invariant was violated; the instance refuses further work.
    poisoned: bool,
}

impl DisplayState {
    fn pinned(&self) -> bool {
        self.maps.is_mapped() || self.io_in_flight > 0
    }

    fn check_usable(&self) -> Result<()> {
        if self.poisoned {
            return Err(VgfbError::InvariantViolation("instance poisoned"));
        }
        if self.closed || self.revoked || self.torn_down {
            return Err(VgfbError::Gone);
        }
        Ok(())
    }

    /// Adopt the pending buffer if nothing pins the current one.
    fn switch(&mut self) -> Option<Switched> {
        let pinned = self.pinned();
        let switched = self.slots.try_switch(pinned)?;
        if switched.notify {
            self.notices += 1;
        }
        Some(switched)
    }
}

#[derive(Debug)]
pub struct VirtualDisplay {
    id: DisplayId,
    max_buffer_bytes: usize,
    state: Mutex<DisplayState>,
    /// Serializes `set_geometry`/`reallocate` so allocation can run without the state lock.
    geometry: Mutex<()>,
    notifier: RemapNotifier,
    registry: Option<Weak<registry::Shared>>,
}

/// A use-reference held for the duration of one operation.
#[derive(Debug)]
pub struct UseRef<'a> {
    display: &'a VirtualDisplay,
}

impl Drop for UseRef<'_> {
    fn drop(&mut self) {
        // Underflow is reported by `release` itself.
        let _ = self.display.release();
    }
}

/// Marks a read or write in flight against `buffer`, pinning it like a mapping does.
struct IoGuard<'a> {
    display: &'a VirtualDisplay,
    buffer: Arc<FrameBuffer>,
}

impl Drop for IoGuard<'_> {
    fn drop(&mut self) {
        let switched = {
            let mut st = lock(&self.display.state);
            if st.io_in_flight == 0 {
                st.poisoned = true;
                error!(display = self.display.id, "io-count underflow");
                return;
            }
            st.io_in_flight -= 1;
            st.switch()
        };
        self.display.finish_switch(switched);
    }
}

impl VirtualDisplay {
    /// A standalone instance not tracked by any registry. Starts with one use-reference, owned
    /// by the caller and given back with [`VirtualDisplay::close`].
    pub fn new(id: DisplayId, config: &VgfbConfig) -> Arc<Self> {
        Self::create(id, config, None)
    }

    pub(crate) fn with_registry(
        id: DisplayId,
        config: &VgfbConfig,
        registry: Weak<registry::Shared>,
    ) -> Arc<Self> {
        Self::create(id, config, Some(registry))
    }

    fn create(id: DisplayId, config: &VgfbConfig, registry: Option<Weak<registry::Shared>>) -> Arc<Self> {
        let state = DisplayState {
            mode: Mode::placeholder(config.refresh_hz),
            modes: ModeList::new(&config.modes, config.refresh_hz),
            slots: BufferSlots::new(),
            uses: 1,
            maps: MapCounter::default(),
            io_in_flight: 0,
            notices: 0,
            closed: false,
            revoked: false,
            torn_down: false,
            poisoned: false,
        };
        info!(display = id, modes = config.modes.len(), "device opened");
        Arc::new(Self {
            id,
            max_buffer_bytes: config.max_buffer_bytes.min(BUFFER_BYTES_CEILING),
            state: Mutex::new(state),
            geometry: Mutex::new(()),
            notifier: RemapNotifier::new(),
            registry,
        })
    }

    pub fn id(&self) -> DisplayId {
        self.id
    }

    /// Take a use-reference. Adopts a waiting buffer first if nothing pins the current one.
    pub fn acquire(&self) -> Result<UseRef<'_>> {
        let switched = {
            let mut st = lock(&self.state);
            st.check_usable()?;
            st.uses = st
                .uses
                .checked_add(1)
                .ok_or(VgfbError::InvariantViolation("use-count overflow"))?;
            st.switch()
        };
        self.finish_switch(switched);
        Ok(UseRef { display: self })
    }

    /// Give back one use-reference. Dropping the last one destroys the instance.
    ///
    /// Releasing more references than were taken poisons the instance and is refused.
    pub fn release(&self) -> Result<()> {
        let (current, pending) = {
            let mut st = lock(&self.state);
            if st.uses == 0 {
                st.poisoned = true;
                error!(display = self.id, "use-count underflow; use-after-free");
                return Err(VgfbError::InvariantViolation("use-count underflow"));
            }
            st.uses -= 1;
            if st.uses > 0 {
                return Ok(());
            }
            st.torn_down = true;
            st.slots.clear()
        };
        drop((current, pending));

        if let Some(shared) = self.registry.as_ref().and_then(Weak::upgrade) {
            shared.forget(self.id, self);
        }
        info!(display = self.id, "device destroyed");
        Ok(())
    }

    /// Drop the open reference. The instance is destroyed once in-flight operations finish.
    pub fn close(&self) -> Result<()> {
        {
            let mut st = lock(&self.state);
            if st.closed {
                error!(display = self.id, "device closed twice");
                return Err(VgfbError::InvariantViolation("instance closed twice"));
            }
            st.closed = true;
        }
        info!(display = self.id, "device closed");
        self.release()
    }

    /// Refuse new operations without dropping the open reference.
    pub(crate) fn revoke(&self) {
        lock(&self.state).revoked = true;
    }

    fn begin_io(&self) -> IoGuard<'_> {
        let mut st = lock(&self.state);
        st.io_in_flight += 1;
        IoGuard {
            display: self,
            buffer: Arc::clone(st.slots.current()),
        }
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let _use = self.acquire()?;
        let io = self.begin_io();
        io.buffer.read(offset, len)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        let _use = self.acquire()?;
        let io = self.begin_io();
        io.buffer.write_at(offset, data)
    }

    /// Negotiate a new mode and size the buffer for it.
    ///
    /// The mode and the narrowed mode list are committed only once the buffer for the new mode
    /// exists; on any failure the instance keeps its previous mode, list and buffer. While the
    /// current buffer is pinned the new buffer waits and is adopted at the next safe point.
    pub fn set_geometry(&self, req: &ModeRequest) -> Result<Mode> {
        let _use = self.acquire()?;
        let _serial = lock(&self.geometry);

        let (current, mut modes) = {
            let st = lock(&self.state);
            (st.mode, st.modes.clone())
        };
        let mode = validate_and_commit(req, &current, &mut modes)?;
        self.reallocate(mode, modes)?;
        debug!(
            display = self.id,
            xres = mode.xres,
            yres = mode.yres,
            bpp = mode.bits_per_pixel,
            "geometry committed"
        );
        Ok(mode)
    }

    /// Allocate a buffer sized for `mode`, then commit `mode`, `modes` and the buffer together.
    /// Nothing is committed if allocation fails. Callers hold `self.geometry`.
    pub(crate) fn reallocate(&self, mode: Mode, modes: ModeList) -> Result<()> {
        let len = mode.buffer_len();
        let fresh = if lock(&self.state).slots.target_len() == len {
            None
        } else {
            match FrameBuffer::allocate(len, self.max_buffer_bytes) {
                Ok(fb) => Some(fb),
                Err(err) => {
                    warn!(display = self.id, bytes = len, "framebuffer allocation failed");
                    return Err(err);
                }
            }
        };

        let outcome = {
            let mut st = lock(&self.state);
            st.mode = mode;
            st.modes = modes;
            let Some(fresh) = fresh else {
                return Ok(());
            };
            let pinned = st.pinned();
            let mapped = st.maps.is_mapped();
            st.slots.install(fresh, pinned, mapped)
        };

        match outcome {
            Installed::Immediate { retired } => {
                debug!(display = self.id, bytes = len, retired = retired.len(), "framebuffer replaced");
            }
            Installed::Deferred { displaced } => {
                debug!(
                    display = self.id,
                    bytes = len,
                    displaced = displaced.is_some(),
                    "framebuffer swap deferred"
                );
            }
        }
        Ok(())
    }

    /// Adopt a pending buffer if one is waiting and nothing pins the current one. Never blocks
    /// on anything but the state lock; returns whether a swap happened.
    pub fn poll_switch(&self) -> bool {
        let switched = lock(&self.state).switch();
        self.finish_switch(switched)
    }

    fn finish_switch(&self, switched: Option<Switched>) -> bool {
        let Some(switched) = switched else {
            return false;
        };
        debug!(
            display = self.id,
            bytes = switched.new_len,
            retired = switched.retired.len(),
            "adopted pending framebuffer"
        );
        if switched.notify {
            self.notifier.notify(RemapNotice {
                display: self.id,
                buffer_len: switched.new_len,
            });
        }
        true
    }

    /// Flip: move the visible window to `yoffset`. Horizontal panning is refused.
    pub fn pan(&self, xoffset: u32, yoffset: u32) -> Result<Mode> {
        let _use = self.acquire()?;
        if xoffset != 0 {
            return Err(VgfbError::NonZeroXOffset(xoffset));
        }
        let mode = {
            let mut st = lock(&self.state);
            let limit = st.mode.max_yoffset();
            if yoffset > limit {
                return Err(VgfbError::YOffsetOutOfRange { yoffset, limit });
            }
            st.mode.yoffset = yoffset;
            st.mode
        };
        debug!(display = self.id, yoffset, "panned");
        Ok(mode)
    }

    pub fn geometry(&self) -> Result<Mode> {
        let _use = self.acquire()?;
        let mode = lock(&self.state).mode;
        Ok(mode)
    }

    pub fn mode_list(&self) -> Result<ModeList> {
        let _use = self.acquire()?;
        let modes = lock(&self.state).modes.clone();
        Ok(modes)
    }

    pub fn fixed_info(&self) -> Result<FbFixScreenInfo> {
        let _use = self.acquire()?;
        let st = lock(&self.state);

        let smem_len = u32::try_from(st.slots.current().len())
            .map_err(|_| VgfbError::InvariantViolation("buffer length exceeds u32"))?;
        let line_length = u32::try_from(st.mode.line_length())
            .map_err(|_| VgfbError::InvariantViolation("line length exceeds u32"))?;
        let mut id = [0u8; 16];
        id[..FB_ID.len()].copy_from_slice(FB_ID);
        Ok(FbFixScreenInfo {
            id,
            smem_len,
            type_: FB_TYPE_PACKED_PIXELS,
            visual: FB_VISUAL_TRUECOLOR,
            xpanstep: 0,
            ypanstep: 1,
            ywrapstep: 0,
            line_length,
            accel: FB_ACCEL_NONE,
            ..FbFixScreenInfo::default()
        })
    }

    /// Map the current buffer. Fails with [`VgfbError::NoBuffer`] before a mode is negotiated.
    pub fn acquire_mapping(self: &Arc<Self>) -> Result<MappingGrant> {
        let _use = self.acquire()?;
        let buffer = {
            let mut st = lock(&self.state);
            let buffer = Arc::clone(st.slots.current());
            if buffer.is_empty() {
                return Err(VgfbError::NoBuffer);
            }
            st.maps.acquire()?;
            st.slots.note_mapped();
            buffer
        };
        Ok(MappingGrant::new(Arc::clone(self), buffer))
    }

    /// Give back one mapping; the last one adopts a waiting buffer.
    ///
    /// Works on a closed instance: a mapping may outlive the handle it came from.
    pub fn release_mapping(&self) -> Result<()> {
        let switched = {
            let mut st = lock(&self.state);
            match st.maps.release() {
                Ok(true) => st.switch(),
                Ok(false) => None,
                Err(err) => {
                    st.poisoned = true;
                    error!(display = self.id, "mapping-count underflow");
                    return Err(err);
                }
            }
        };
        self.finish_switch(switched);
        Ok(())
    }

    pub(crate) fn is_current_buffer(&self, buffer: &Arc<FrameBuffer>) -> bool {
        Arc::ptr_eq(lock(&self.state).slots.current(), buffer)
    }

    /// Stale-mapping notices for this instance.
    pub fn remap_notices(&self) -> Receiver<RemapNotice> {
        self.notifier.subscribe()
    }

    pub fn stats(&self) -> DisplayStats {
        let st = lock(&self.state);
        DisplayStats {
            use_count: st.uses,
            mappings: st.maps.get(),
            io_in_flight: st.io_in_flight,
            buffer_len: st.slots.current().len(),
            pending: st.slots.has_pending(),
            swaps: st.slots.swaps(),
            notices: st.notices,
            closed: st.closed,
        }
    }
}
