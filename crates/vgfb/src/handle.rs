use std::sync::Arc;

use crossbeam_channel::Receiver;
use vgfb_protocol::FbFixScreenInfo;

use crate::control::{self, ControlRequest};
use crate::display::{DisplayId, DisplayStats, VirtualDisplay};
use crate::error::{Result, VgfbError};
use crate::mapping::{MappingGrant, RemapNotice};
use crate::mode::{Mode, ModeRequest};
use crate::registry::Registry;

/// An open instance, as seen by one consumer. Dropping the handle closes it.
#[derive(Debug)]
pub struct DeviceHandle {
    display: Arc<VirtualDisplay>,
    registry: Registry,
    closed: bool,
}

impl DeviceHandle {
    pub(crate) fn new(display: Arc<VirtualDisplay>, registry: Registry) -> Self {
        Self {
            display,
            registry,
            closed: false,
        }
    }

    pub fn id(&self) -> DisplayId {
        self.display.id()
    }

    pub fn display(&self) -> &Arc<VirtualDisplay> {
        &self.display
    }

    pub fn read(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        self.display.read(offset, len)
    }

    pub fn write(&self, offset: u64, data: &[u8]) -> Result<()> {
        self.display.write(offset, data)
    }

    /// Raw control entry point: `cmd` is a request code, `payload` its encoded argument.
    /// Returns the encoded reply, empty for requests without one.
    pub fn control(&self, cmd: u32, payload: &[u8]) -> Result<Vec<u8>> {
        let req = ControlRequest::decode(cmd, payload)?;
        Ok(control::dispatch(&self.display, req)?.into_bytes())
    }

    pub fn map(&self) -> Result<MappingGrant> {
        self.display.acquire_mapping()
    }

    /// Give back a grant obtained from this handle's instance.
    ///
    /// A grant from another instance is refused with [`VgfbError::NoSuchDevice`] and is then
    /// released against its own instance as it drops.
    pub fn unmap(&self, grant: MappingGrant) -> Result<()> {
        if !grant.belongs_to(&self.display) {
            return Err(VgfbError::NoSuchDevice(grant.display_id()));
        }
        grant.release()
    }

    pub fn geometry(&self) -> Result<Mode> {
        self.display.geometry()
    }

    pub fn fixed_info(&self) -> Result<FbFixScreenInfo> {
        self.display.fixed_info()
    }

    pub fn set_geometry(&self, req: &ModeRequest) -> Result<Mode> {
        self.display.set_geometry(req)
    }

    pub fn pan(&self, xoffset: u32, yoffset: u32) -> Result<Mode> {
        self.display.pan(xoffset, yoffset)
    }

    pub fn remap_notices(&self) -> Receiver<RemapNotice> {
        self.display.remap_notices()
    }

    pub fn stats(&self) -> DisplayStats {
        self.display.stats()
    }

    pub fn close(mut self) -> Result<()> {
        self.closed = true;
        self.registry.close(&self.display)
    }
}

impl Drop for DeviceHandle {
    fn drop(&mut self) {
        if !self.closed {
            self.closed = true;
            let _ = self.registry.close(&self.display);
        }
    }
}
