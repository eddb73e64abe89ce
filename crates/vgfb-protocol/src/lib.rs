//! Consumer-facing ABI of the virtual framebuffer multiplexer.
//!
//! Existing framebuffer consumers talk to a device with the Linux `fbdev` control requests and
//! exchange `fb_var_screeninfo` / `fb_fix_screeninfo` payloads. The structs in this crate are
//! `#[repr(C)]` plain-old-data mirrors of those layouts (x86_64 / LP64), so a payload produced
//! here can be handed to, or read from, an unmodified consumer byte-for-byte.

use bytemuck::{Pod, Zeroable};
use thiserror::Error;

pub mod request {
    //! Numeric control request codes.
    //!
    //! The `FBIO*` values are the Linux `<linux/fb.h>` ioctl numbers. `FBIO_CURSOR` includes the
    //! LP64 `sizeof(struct fb_cursor)` in its size field.

    pub const FBIOGET_VSCREENINFO: u32 = 0x4600;
    pub const FBIOPUT_VSCREENINFO: u32 = 0x4601;
    pub const FBIOGET_FSCREENINFO: u32 = 0x4602;
    pub const FBIOGETCMAP: u32 = 0x4604;
    pub const FBIOPUTCMAP: u32 = 0x4605;
    pub const FBIOPAN_DISPLAY: u32 = 0x4606;
    pub const FBIO_CURSOR: u32 = 0xC068_4608;
    pub const FBIOGET_CON2FBMAP: u32 = 0x460F;
    pub const FBIOPUT_CON2FBMAP: u32 = 0x4610;
    pub const FBIOBLANK: u32 = 0x4611;

    /// `_IOR('V', 1, int)`: query the externally visible index of an instance.
    pub const VGFBM_GET_FB_MINOR: u32 = 0x8004_5601;

    /// Human readable name for a request code, used in diagnostics.
    pub fn name(cmd: u32) -> Option<&'static str> {
        Some(match cmd {
            FBIOGET_VSCREENINFO => "FBIOGET_VSCREENINFO",
            FBIOPUT_VSCREENINFO => "FBIOPUT_VSCREENINFO",
            FBIOGET_FSCREENINFO => "FBIOGET_FSCREENINFO",
            FBIOGETCMAP => "FBIOGETCMAP",
            FBIOPUTCMAP => "FBIOPUTCMAP",
            FBIOPAN_DISPLAY => "FBIOPAN_DISPLAY",
            FBIO_CURSOR => "FBIO_CURSOR",
            FBIOGET_CON2FBMAP => "FBIOGET_CON2FBMAP",
            FBIOPUT_CON2FBMAP => "FBIOPUT_CON2FBMAP",
            FBIOBLANK => "FBIOBLANK",
            VGFBM_GET_FB_MINOR => "VGFBM_GET_FB_MINOR",
            _ => return None,
        })
    }
}

pub const FB_TYPE_PACKED_PIXELS: u32 = 0;
pub const FB_VISUAL_TRUECOLOR: u32 = 2;
pub const FB_ACCEL_NONE: u32 = 0;
pub const FB_ACTIVATE_NOW: u32 = 0;
pub const FB_VMODE_NONINTERLACED: u32 = 0;

/// Identification string reported in [`FbFixScreenInfo::id`].
pub const FB_ID: &[u8] = b"vgfb";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("payload too short: need {expected} bytes, got {actual}")]
    TooShort { expected: usize, actual: usize },
}

/// Position of one color channel inside a pixel (`struct fb_bitfield`).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FbBitfield {
    /// Bit offset of the channel's least significant bit.
    pub offset: u32,
    pub length: u32,
    /// Non-zero if the most significant bit is on the right.
    pub msb_right: u32,
}

impl FbBitfield {
    pub const NONE: Self = Self::new(0, 0);

    pub const fn new(offset: u32, length: u32) -> Self {
        Self {
            offset,
            length,
            msb_right: 0,
        }
    }
}

/// Variable screen information (`struct fb_var_screeninfo`, 160 bytes).
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FbVarScreenInfo {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub grayscale: u32,
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
    pub nonstd: u32,
    pub activate: u32,
    /// Height of the picture in mm.
    pub height: u32,
    /// Width of the picture in mm.
    pub width: u32,
    pub accel_flags: u32,
    /// Pixel clock in picoseconds.
    pub pixclock: u32,
    pub left_margin: u32,
    pub right_margin: u32,
    pub upper_margin: u32,
    pub lower_margin: u32,
    pub hsync_len: u32,
    pub vsync_len: u32,
    pub sync: u32,
    pub vmode: u32,
    pub rotate: u32,
    pub colorspace: u32,
    pub reserved: [u32; 4],
}

/// Fixed screen information (`struct fb_fix_screeninfo`, 80 bytes on LP64).
///
/// The `_pad*` fields make the compiler-inserted padding of the C layout explicit.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct FbFixScreenInfo {
    pub id: [u8; 16],
    pub smem_start: u64,
    pub smem_len: u32,
    pub type_: u32,
    pub type_aux: u32,
    pub visual: u32,
    pub xpanstep: u16,
    pub ypanstep: u16,
    pub ywrapstep: u16,
    pub _pad0: u16,
    pub line_length: u32,
    pub _pad1: u32,
    pub mmio_start: u64,
    pub mmio_len: u32,
    pub accel: u32,
    pub capabilities: u16,
    pub reserved: [u16; 2],
    pub _pad2: u16,
}

impl FbFixScreenInfo {
    /// `id` as a string, trimmed at the first NUL.
    pub fn id_str(&self) -> &str {
        let end = self.id.iter().position(|&b| b == 0).unwrap_or(self.id.len());
        core::str::from_utf8(&self.id[..end]).unwrap_or("")
    }
}

/// Fixed-size payloads that can be moved across the control boundary.
pub trait Payload: Pod {
    const SIZE: usize = core::mem::size_of::<Self>();

    fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(self)
    }

    /// Decode from the front of `bytes`. Trailing bytes are ignored.
    fn read_from(bytes: &[u8]) -> Result<Self, PayloadError> {
        let head = bytes.get(..Self::SIZE).ok_or(PayloadError::TooShort {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        Ok(bytemuck::pod_read_unaligned(head))
    }
}

impl Payload for FbVarScreenInfo {}
impl Payload for FbFixScreenInfo {}

/// Reply of [`request::VGFBM_GET_FB_MINOR`]: a native-endian C `int`.
pub fn encode_index(index: u32) -> [u8; 4] {
    // Identifiers are bounded by the registry's device limit, far below `i32::MAX`.
    (index as i32).to_ne_bytes()
}

pub fn decode_index(bytes: &[u8]) -> Result<i32, PayloadError> {
    let head: [u8; 4] = bytes
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .ok_or(PayloadError::TooShort {
            expected: 4,
            actual: bytes.len(),
        })?;
    Ok(i32::from_ne_bytes(head))
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::mem::{offset_of, size_of};
    use pretty_assertions::assert_eq;

    #[test]
    fn var_screeninfo_matches_linux_layout() {
        assert_eq!(size_of::<FbBitfield>(), 12);
        assert_eq!(size_of::<FbVarScreenInfo>(), 160);
        assert_eq!(offset_of!(FbVarScreenInfo, bits_per_pixel), 24);
        assert_eq!(offset_of!(FbVarScreenInfo, red), 32);
        assert_eq!(offset_of!(FbVarScreenInfo, transp), 68);
        assert_eq!(offset_of!(FbVarScreenInfo, pixclock), 100);
        assert_eq!(offset_of!(FbVarScreenInfo, vmode), 132);
        assert_eq!(offset_of!(FbVarScreenInfo, reserved), 144);
    }

    #[test]
    fn fix_screeninfo_matches_linux_layout() {
        assert_eq!(size_of::<FbFixScreenInfo>(), 80);
        assert_eq!(offset_of!(FbFixScreenInfo, smem_start), 16);
        assert_eq!(offset_of!(FbFixScreenInfo, smem_len), 24);
        assert_eq!(offset_of!(FbFixScreenInfo, visual), 36);
        assert_eq!(offset_of!(FbFixScreenInfo, ywrapstep), 44);
        assert_eq!(offset_of!(FbFixScreenInfo, line_length), 48);
        assert_eq!(offset_of!(FbFixScreenInfo, mmio_start), 56);
        assert_eq!(offset_of!(FbFixScreenInfo, capabilities), 72);
    }

    #[test]
    fn read_from_rejects_short_payloads_and_ignores_trailing_bytes() {
        let var = FbVarScreenInfo {
            xres: 800,
            yres: 600,
            bits_per_pixel: 32,
            ..Default::default()
        };

        let mut bytes = var.as_bytes().to_vec();
        assert_eq!(
            FbVarScreenInfo::read_from(&bytes[..100]),
            Err(PayloadError::TooShort {
                expected: 160,
                actual: 100
            })
        );

        bytes.extend_from_slice(&[0xAA; 8]);
        assert_eq!(FbVarScreenInfo::read_from(&bytes), Ok(var));
    }

    #[test]
    fn fixed_id_is_nul_trimmed() {
        let mut fix = FbFixScreenInfo::default();
        fix.id[..FB_ID.len()].copy_from_slice(FB_ID);
        assert_eq!(fix.id_str(), "vgfb");
    }

    #[test]
    fn request_names_cover_the_dispatch_table() {
        assert_eq!(request::name(request::FBIOPAN_DISPLAY), Some("FBIOPAN_DISPLAY"));
        assert_eq!(request::name(request::VGFBM_GET_FB_MINOR), Some("VGFBM_GET_FB_MINOR"));
        assert_eq!(request::name(0xdead), None);
    }

    #[test]
    fn index_reply_is_a_native_int() {
        assert_eq!(decode_index(&encode_index(7)), Ok(7));
        assert!(decode_index(&[1, 2]).is_err());
    }
}
