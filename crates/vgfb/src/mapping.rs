//! Memory-mapping grants and the stale-mapping notification channel.
//!
//! A grant pins the current buffer: while any grant is outstanding no pending replacement is
//! adopted. Releasing the last grant adopts a waiting replacement immediately, and if a grant was
//! live against the buffer that just got retired, exactly one [`RemapNotice`] is queued for the
//! instance's owner.

use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use tracing::warn;

use crate::buffer::FrameBuffer;
use crate::display::{DisplayId, VirtualDisplay};
use crate::error::{Result, VgfbError};
use crate::lock;

/// Count of outstanding mapping grants on the current buffer.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MapCounter {
    count: u64,
}

impl MapCounter {
    pub fn get(&self) -> u64 {
        self.count
    }

    pub fn is_mapped(&self) -> bool {
        self.count > 0
    }

    pub fn acquire(&mut self) -> Result<()> {
        self.count = self
            .count
            .checked_add(1)
            .ok_or(VgfbError::InvariantViolation("mapping-count overflow"))?;
        Ok(())
    }

    /// Returns `true` when the count reached zero.
    pub fn release(&mut self) -> Result<bool> {
        if self.count == 0 {
            return Err(VgfbError::InvariantViolation("mapping-count underflow"));
        }
        self.count -= 1;
        Ok(self.count == 0)
    }
}

/// "Your mapping is stale, unmap and map again."
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemapNotice {
    pub display: DisplayId,
    /// Length of the buffer that replaced the mapped one.
    pub buffer_len: u64,
}

/// Fans each notice out to every live subscriber. Subscribers that dropped their receiver are
/// pruned on the next notice.
#[derive(Debug, Default)]
pub(crate) struct RemapNotifier {
    subscribers: Mutex<Vec<Sender<RemapNotice>>>,
}

impl RemapNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> Receiver<RemapNotice> {
        let (tx, rx) = crossbeam_channel::unbounded();
        lock(&self.subscribers).push(tx);
        rx
    }

    pub fn notify(&self, notice: RemapNotice) {
        let mut subscribers = lock(&self.subscribers);
        subscribers.retain(|tx| tx.send(notice).is_ok());
        if subscribers.is_empty() {
            warn!(display = notice.display, "dropping remap notice: no receiver");
        }
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

/// A live view of an instance's current buffer.
///
/// Released exactly once, either explicitly with [`MappingGrant::release`] or on drop.
#[derive(Debug)]
pub struct MappingGrant {
    display: Arc<VirtualDisplay>,
    buffer: Arc<FrameBuffer>,
    released: bool,
}

impl MappingGrant {
    pub(crate) fn new(display: Arc<VirtualDisplay>, buffer: Arc<FrameBuffer>) -> Self {
        Self {
            display,
            buffer,
            released: false,
        }
    }

    pub fn display_id(&self) -> DisplayId {
        self.display.id()
    }

    /// The mapped memory. Stays valid for the lifetime of the grant, even across a resize.
    pub fn memory(&self) -> &FrameBuffer {
        &self.buffer
    }

    pub fn len(&self) -> u64 {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub(crate) fn belongs_to(&self, display: &Arc<VirtualDisplay>) -> bool {
        Arc::ptr_eq(&self.display, display)
    }

    /// Whether the mapped buffer is still the instance's current buffer.
    pub fn is_current(&self) -> bool {
        self.display.is_current_buffer(&self.buffer)
    }

    pub fn release(mut self) -> Result<()> {
        self.released = true;
        self.display.release_mapping()
    }
}

impl Drop for MappingGrant {
    fn drop(&mut self) {
        if !self.released {
            self.released = true;
            // Violations are already reported by `release_mapping`.
            let _ = self.display.release_mapping();
        }
    }
}
