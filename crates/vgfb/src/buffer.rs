//! Pixel memory and the current/pending buffer hand-off.
//!
//! A resize never rewrites memory a consumer may still be looking at. The replacement buffer is
//! allocated out of place; if the current buffer is pinned (mapped, or in use by a read/write)
//! the replacement parks in a single pending slot and is adopted at the next safe point.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::error::{Result, VgfbError};

/// Backing memory of one virtual surface.
///
/// Bytes are individually atomic so concurrent readers and writers of the raw pixels never race
/// in the language sense; ordering between them is the consumers' business.
#[derive(Debug)]
pub struct FrameBuffer {
    bytes: Box<[AtomicU8]>,
}

impl FrameBuffer {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            bytes: Box::new([]),
        })
    }

    /// Allocate a zero-filled buffer of `len` bytes.
    ///
    /// Fails with [`VgfbError::OutOfMemory`] if `len` exceeds `limit` or the allocator refuses.
    pub fn allocate(len: u64, limit: usize) -> Result<Arc<Self>> {
        let oom = VgfbError::OutOfMemory { bytes: len };
        let len = match usize::try_from(len) {
            Ok(len) if len <= limit => len,
            _ => return Err(oom),
        };

        let mut bytes = Vec::new();
        bytes.try_reserve_exact(len).map_err(|_| oom)?;
        bytes.resize_with(len, || AtomicU8::new(0));
        Ok(Arc::new(Self {
            bytes: bytes.into_boxed_slice(),
        }))
    }

    pub fn len(&self) -> u64 {
        self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    fn window(&self, offset: u64, len: usize) -> Result<&[AtomicU8]> {
        let err = VgfbError::OutOfBounds {
            offset,
            len: len as u64,
            size: self.len(),
        };
        let start = usize::try_from(offset).map_err(|_| err.clone())?;
        let end = start.checked_add(len).ok_or_else(|| err.clone())?;
        self.bytes.get(start..end).ok_or(err)
    }

    pub fn read_at(&self, offset: u64, out: &mut [u8]) -> Result<()> {
        let src = self.window(offset, out.len())?;
        for (dst, byte) in out.iter_mut().zip(src) {
            *dst = byte.load(Ordering::Relaxed);
        }
        Ok(())
    }

    pub fn write_at(&self, offset: u64, data: &[u8]) -> Result<()> {
        let dst = self.window(offset, data.len())?;
        for (byte, &value) in dst.iter().zip(data) {
            byte.store(value, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Bounds-checked read that allocates the output only after the range is validated.
    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let src = self.window(offset, len)?;
        Ok(src.iter().map(|b| b.load(Ordering::Relaxed)).collect())
    }

    pub fn fill(&self, offset: u64, len: usize, value: u8) -> Result<()> {
        for byte in self.window(offset, len)? {
            byte.store(value, Ordering::Relaxed);
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Pending {
    buffer: Arc<FrameBuffer>,
    /// A mapping of the current buffer was live while this buffer waited.
    invalidates_mapping: bool,
}

/// Outcome of [`BufferSlots::install`].
#[derive(Debug)]
pub(crate) enum Installed {
    /// The new buffer is current; the old one is returned for release outside any lock.
    Immediate { retired: Arc<FrameBuffer> },
    /// The new buffer waits in the pending slot. A pending buffer it displaced is returned.
    Deferred { displaced: Option<Arc<FrameBuffer>> },
}

/// A completed pending-to-current promotion.
#[derive(Debug)]
pub(crate) struct Switched {
    pub retired: Arc<FrameBuffer>,
    pub new_len: u64,
    /// The owner of a mapping must be told to remap.
    pub notify: bool,
}

#[derive(Debug)]
pub(crate) struct BufferSlots {
    current: Arc<FrameBuffer>,
    pending: Option<Pending>,
    swaps: u64,
}

impl BufferSlots {
    pub fn new() -> Self {
        Self {
            current: FrameBuffer::empty(),
            pending: None,
            swaps: 0,
        }
    }

    pub fn current(&self) -> &Arc<FrameBuffer> {
        &self.current
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn swaps(&self) -> u64 {
        self.swaps
    }

    /// Length the instance converges to once any pending hand-off completes.
    pub fn target_len(&self) -> u64 {
        self.pending
            .as_ref()
            .map_or_else(|| self.current.len(), |p| p.buffer.len())
    }

    /// Record that the current buffer was mapped; if a replacement is already waiting, that
    /// mapping goes stale when the replacement is adopted.
    pub fn note_mapped(&mut self) {
        if let Some(pending) = &mut self.pending {
            pending.invalidates_mapping = true;
        }
    }

    pub fn install(&mut self, fresh: Arc<FrameBuffer>, pinned: bool, mapped: bool) -> Installed {
        if pinned {
            let inherited = self.pending.as_ref().is_some_and(|p| p.invalidates_mapping);
            let displaced = self
                .pending
                .replace(Pending {
                    buffer: fresh,
                    invalidates_mapping: mapped || inherited,
                })
                .map(|old| old.buffer);
            return Installed::Deferred { displaced };
        }

        // Nothing pins the current buffer, so any waiting replacement is superseded too.
        self.pending = None;
        self.swaps += 1;
        Installed::Immediate {
            retired: std::mem::replace(&mut self.current, fresh),
        }
    }

    /// Promote the pending buffer if there is one and nothing pins the current buffer.
    pub fn try_switch(&mut self, pinned: bool) -> Option<Switched> {
        if pinned {
            return None;
        }
        let pending = self.pending.take()?;
        let new_len = pending.buffer.len();
        let retired = std::mem::replace(&mut self.current, pending.buffer);
        self.swaps += 1;
        Some(Switched {
            retired,
            new_len,
            notify: pending.invalidates_mapping,
        })
    }

    /// Drop both slots, returning what was held so it can be freed outside any lock.
    pub fn clear(&mut self) -> (Arc<FrameBuffer>, Option<Arc<FrameBuffer>>) {
        let current = std::mem::replace(&mut self.current, FrameBuffer::empty());
        (current, self.pending.take().map(|p| p.buffer))
    }
}
