//! The set of live instances, keyed by identifier.
//!
//! A registry is an explicitly constructed object; nothing in this crate keeps process-global
//! device state. Registry mutation is serialized by its own lock and never runs while any
//! instance lock is held.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use tracing::info;

use crate::config::VgfbConfig;
use crate::display::{DisplayId, VirtualDisplay};
use crate::error::{Result, VgfbError};
use crate::handle::DeviceHandle;
use crate::lock;

#[derive(Debug, Default)]
struct RegistryState {
    displays: BTreeMap<DisplayId, Arc<VirtualDisplay>>,
    shut_down: bool,
}

#[derive(Debug)]
pub(crate) struct Shared {
    config: VgfbConfig,
    state: Mutex<RegistryState>,
}

impl Shared {
    /// Called by an instance on destruction. Only removes the entry if it is still `display`:
    /// the identifier may already belong to a newer instance.
    pub(crate) fn forget(&self, id: DisplayId, display: &VirtualDisplay) {
        let removed = {
            let mut st = lock(&self.state);
            let is_live = st
                .displays
                .get(&id)
                .is_some_and(|live| std::ptr::eq(Arc::as_ptr(live), display));
            if is_live {
                st.displays.remove(&id)
            } else {
                None
            }
        };
        drop(removed);
    }
}

/// Smallest identifier not present in `used`, which must iterate in ascending order.
fn lowest_free_id<'a>(used: impl Iterator<Item = &'a DisplayId>) -> Option<DisplayId> {
    let mut want: DisplayId = 0;
    for &id in used {
        if id != want {
            break;
        }
        want = want.checked_add(1)?;
    }
    Some(want)
}

#[derive(Debug, Clone)]
pub struct Registry {
    shared: Arc<Shared>,
}

impl Registry {
    pub fn new(config: VgfbConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                state: Mutex::new(RegistryState::default()),
            }),
        }
    }

    pub fn config(&self) -> &VgfbConfig {
        &self.shared.config
    }

    /// Create an instance under the lowest free identifier.
    pub fn open_new(&self) -> Result<DeviceHandle> {
        let config = &self.shared.config;
        let display = {
            let mut st = lock(&self.shared.state);
            if st.shut_down {
                return Err(VgfbError::Gone);
            }
            if st.displays.len() >= config.max_devices {
                return Err(VgfbError::TooManyDevices(config.max_devices));
            }
            let id = lowest_free_id(st.displays.keys())
                .ok_or(VgfbError::TooManyDevices(config.max_devices))?;
            let display = VirtualDisplay::with_registry(id, config, Arc::downgrade(&self.shared));
            st.displays.insert(id, Arc::clone(&display));
            display
        };
        Ok(DeviceHandle::new(display, self.clone()))
    }

    /// Remove `display` from the live set and drop its open reference. The instance itself is
    /// destroyed once its in-flight operations finish.
    pub fn close(&self, display: &Arc<VirtualDisplay>) -> Result<()> {
        let removed = {
            let mut st = lock(&self.shared.state);
            let is_live = st
                .displays
                .get(&display.id())
                .is_some_and(|live| Arc::ptr_eq(live, display));
            if is_live {
                st.displays.remove(&display.id())
            } else {
                None
            }
        };
        drop(removed);
        display.close()
    }

    pub fn get(&self, id: DisplayId) -> Result<Arc<VirtualDisplay>> {
        lock(&self.shared.state)
            .displays
            .get(&id)
            .cloned()
            .ok_or(VgfbError::NoSuchDevice(id))
    }

    pub fn ids(&self) -> Vec<DisplayId> {
        lock(&self.shared.state).displays.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        lock(&self.shared.state).displays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stop accepting opens and revoke every live instance. Returns how many were revoked.
    ///
    /// Handles still own their open references; closing them afterwards destroys the instances.
    pub fn shutdown(&self) -> usize {
        let displays = {
            let mut st = lock(&self.shared.state);
            st.shut_down = true;
            std::mem::take(&mut st.displays)
        };
        for display in displays.values() {
            display.revoke();
        }
        info!(revoked = displays.len(), "registry shut down");
        displays.len()
    }
}
