//! Control request decoding and dispatch.

use tracing::trace;
use vgfb_protocol::{encode_index, request, FbFixScreenInfo, FbVarScreenInfo, Payload};

use crate::display::VirtualDisplay;
use crate::error::{Result, VgfbError};
use crate::mode::ModeRequest;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlRequest {
    GetVarScreenInfo,
    PutVarScreenInfo(FbVarScreenInfo),
    GetFixScreenInfo,
    PanDisplay(FbVarScreenInfo),
    /// Accepted and ignored.
    Blank,
    /// The instance's externally visible index.
    GetIndex,
    /// Color map, cursor and console mapping requests.
    Unsupported(&'static str),
}

impl ControlRequest {
    pub fn decode(cmd: u32, payload: &[u8]) -> Result<Self> {
        let req = match cmd {
            request::FBIOGET_VSCREENINFO => Self::GetVarScreenInfo,
            request::FBIOPUT_VSCREENINFO => {
                Self::PutVarScreenInfo(FbVarScreenInfo::read_from(payload)?)
            }
            request::FBIOGET_FSCREENINFO => Self::GetFixScreenInfo,
            request::FBIOPAN_DISPLAY => Self::PanDisplay(FbVarScreenInfo::read_from(payload)?),
            request::FBIOBLANK => Self::Blank,
            request::VGFBM_GET_FB_MINOR => Self::GetIndex,
            request::FBIOGETCMAP
            | request::FBIOPUTCMAP
            | request::FBIO_CURSOR
            | request::FBIOGET_CON2FBMAP
            | request::FBIOPUT_CON2FBMAP => {
                Self::Unsupported(request::name(cmd).unwrap_or("unsupported"))
            }
            other => return Err(VgfbError::UnknownRequest(other)),
        };
        Ok(req)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlReply {
    Var(FbVarScreenInfo),
    Fix(FbFixScreenInfo),
    Index(u32),
    None,
}

impl ControlReply {
    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Self::Var(var) => var.as_bytes().to_vec(),
            Self::Fix(fix) => fix.as_bytes().to_vec(),
            Self::Index(index) => encode_index(index).to_vec(),
            Self::None => Vec::new(),
        }
    }
}

/// Run `req` against `display`. Setting the variable info replies with the committed mode.
pub fn dispatch(display: &VirtualDisplay, req: ControlRequest) -> Result<ControlReply> {
    let id = display.id();
    trace!(display = id, ?req, "control request");
    let reply = match req {
        ControlRequest::GetVarScreenInfo => ControlReply::Var(display.geometry()?.to_var_screeninfo()),
        ControlRequest::PutVarScreenInfo(var) => {
            let mode = display.set_geometry(&ModeRequest::from(&var))?;
            ControlReply::Var(mode.to_var_screeninfo())
        }
        ControlRequest::GetFixScreenInfo => ControlReply::Fix(display.fixed_info()?),
        ControlRequest::PanDisplay(var) => {
            display.pan(var.xoffset, var.yoffset)?;
            ControlReply::None
        }
        ControlRequest::Blank => {
            let _use = display.acquire()?;
            ControlReply::None
        }
        ControlRequest::GetIndex => {
            let _use = display.acquire()?;
            ControlReply::Index(id)
        }
        ControlRequest::Unsupported(name) => return Err(VgfbError::Unsupported(name)),
    };
    Ok(reply)
}
