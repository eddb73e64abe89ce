//! Mode negotiation: validating a requested geometry against policy and the instance's mode
//! list, and deriving the committed geometry plus channel layout.
//!
//! Negotiation narrows: the first successful switch to a listed resolution discards every other
//! concrete entry of the mode list, so an instance settles on one resolution for its lifetime.
//! Re-requesting the current resolution (e.g. only to change the pixel depth) never consults
//! the list.

use vgfb_protocol::{FbBitfield, FbVarScreenInfo, FB_ACTIVATE_NOW, FB_VMODE_NONINTERLACED};

use crate::config::Resolution;
use crate::error::{Result, VgfbError};

/// One entry of an instance's mode list.
///
/// An entry with `xres == 0` is a placeholder for "not yet committed"; it is never matched and
/// never pruned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoMode {
    pub xres: u32,
    pub yres: u32,
    pub refresh_hz: u32,
}

impl VideoMode {
    pub const fn placeholder(refresh_hz: u32) -> Self {
        Self {
            xres: 0,
            yres: 0,
            refresh_hz,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.xres == 0
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.xres, self.yres)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModeList {
    entries: Vec<VideoMode>,
}

impl ModeList {
    /// Placeholder entry followed by `modes`, all at `refresh_hz`.
    pub fn new(modes: &[Resolution], refresh_hz: u32) -> Self {
        let entries = core::iter::once(VideoMode::placeholder(refresh_hz))
            .chain(modes.iter().map(|res| VideoMode {
                xres: res.xres,
                yres: res.yres,
                refresh_hz,
            }))
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[VideoMode] {
        &self.entries
    }

    pub fn contains(&self, res: Resolution) -> bool {
        self.entries
            .iter()
            .any(|m| !m.is_placeholder() && m.resolution() == res)
    }

    /// Concrete (non-placeholder) resolutions, in list order.
    pub fn resolutions(&self) -> impl Iterator<Item = Resolution> + '_ {
        self.entries
            .iter()
            .filter(|m| !m.is_placeholder())
            .map(VideoMode::resolution)
    }

    /// Find `res` and, if present, drop every other concrete entry.
    ///
    /// Returns the matching entry. The list is untouched when `res` is absent.
    fn select(&mut self, res: Resolution) -> Option<VideoMode> {
        let hit = self
            .entries
            .iter()
            .copied()
            .find(|m| !m.is_placeholder() && m.resolution() == res)?;
        self.entries
            .retain(|m| m.is_placeholder() || m.resolution() == res);
        Some(hit)
    }
}

/// Bit positions of the color channels inside one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelLayout {
    pub red: FbBitfield,
    pub green: FbBitfield,
    pub blue: FbBitfield,
    pub transp: FbBitfield,
}

impl PixelLayout {
    pub const RGB888: Self = Self {
        red: FbBitfield::new(0, 8),
        green: FbBitfield::new(8, 8),
        blue: FbBitfield::new(16, 8),
        transp: FbBitfield::NONE,
    };

    /// RGB888 plus an alpha lane in the byte above blue.
    pub const RGBA8888: Self = Self {
        transp: FbBitfield::new(24, 8),
        ..Self::RGB888
    };

    /// Layout for a supported depth; `None` for anything but 24 and 32 bpp.
    pub fn for_depth(bits_per_pixel: u32) -> Option<Self> {
        match bits_per_pixel {
            24 => Some(Self::RGB888),
            32 => Some(Self::RGBA8888),
            _ => None,
        }
    }
}

/// Geometry fields of a set-geometry request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModeRequest {
    pub xres: u32,
    pub yres: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
}

impl ModeRequest {
    pub fn new(xres: u32, yres: u32, bits_per_pixel: u32) -> Self {
        Self {
            xres,
            yres,
            xoffset: 0,
            yoffset: 0,
            bits_per_pixel,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.xres, self.yres)
    }
}

impl From<&FbVarScreenInfo> for ModeRequest {
    fn from(var: &FbVarScreenInfo) -> Self {
        Self {
            xres: var.xres,
            yres: var.yres,
            xoffset: var.xoffset,
            yoffset: var.yoffset,
            bits_per_pixel: var.bits_per_pixel,
        }
    }
}

/// A committed mode. `yres_virtual` is always twice `yres`: the surface is double buffered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Mode {
    pub xres: u32,
    pub yres: u32,
    pub xres_virtual: u32,
    pub yres_virtual: u32,
    pub xoffset: u32,
    pub yoffset: u32,
    pub bits_per_pixel: u32,
    pub layout: PixelLayout,
    pub refresh_hz: u32,
}

impl Mode {
    /// The uncommitted mode a fresh instance starts in: no pixels, 32bpp layout.
    pub fn placeholder(refresh_hz: u32) -> Self {
        Self {
            xres: 0,
            yres: 0,
            xres_virtual: 0,
            yres_virtual: 0,
            xoffset: 0,
            yoffset: 0,
            bits_per_pixel: 32,
            layout: PixelLayout::RGBA8888,
            refresh_hz,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.xres, self.yres)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        self.bits_per_pixel / 8
    }

    pub fn line_length(&self) -> u64 {
        u64::from(self.xres_virtual) * u64::from(self.bytes_per_pixel())
    }

    /// Size of the whole virtual surface in bytes, `None` if it does not fit in a `u64`.
    pub fn checked_buffer_len(&self) -> Option<u64> {
        self.line_length().checked_mul(u64::from(self.yres_virtual))
    }

    /// Size of the whole virtual surface in bytes. Saturates at `u64::MAX`, a size no buffer
    /// can be allocated for; modes from [`validate_and_commit`] never saturate.
    pub fn buffer_len(&self) -> u64 {
        self.checked_buffer_len().unwrap_or(u64::MAX)
    }

    /// Largest yoffset that keeps the visible window inside the virtual surface.
    pub fn max_yoffset(&self) -> u32 {
        self.yres_virtual.saturating_sub(self.yres)
    }

    /// Pixel clock in picoseconds for the mode's refresh rate, 0 when unknown.
    pub fn pixclock(&self) -> u32 {
        let pixels_per_sec = u64::from(self.xres)
            .saturating_mul(u64::from(self.yres))
            .saturating_mul(u64::from(self.refresh_hz));
        if pixels_per_sec == 0 {
            return 0;
        }
        u32::try_from(1_000_000_000_000u64 / pixels_per_sec).unwrap_or(u32::MAX)
    }

    pub fn to_var_screeninfo(&self) -> FbVarScreenInfo {
        FbVarScreenInfo {
            xres: self.xres,
            yres: self.yres,
            xres_virtual: self.xres_virtual,
            yres_virtual: self.yres_virtual,
            xoffset: self.xoffset,
            yoffset: self.yoffset,
            bits_per_pixel: self.bits_per_pixel,
            red: self.layout.red,
            green: self.layout.green,
            blue: self.layout.blue,
            transp: self.layout.transp,
            activate: FB_ACTIVATE_NOW,
            pixclock: self.pixclock(),
            vmode: FB_VMODE_NONINTERLACED,
            ..Default::default()
        }
    }
}

/// Validate `req` and derive the mode it would commit to.
///
/// `current` is the instance's committed mode; `modes` is its mode list, which is narrowed to the
/// chosen resolution when the request switches resolution. Callers that must not observe the
/// narrowing on a later failure pass a copy and adopt it only on success.
pub fn validate_and_commit(req: &ModeRequest, current: &Mode, modes: &mut ModeList) -> Result<Mode> {
    let layout = PixelLayout::for_depth(req.bits_per_pixel)
        .ok_or(VgfbError::InvalidBitsPerPixel(req.bits_per_pixel))?;

    if req.xoffset != 0 {
        return Err(VgfbError::NonZeroXOffset(req.xoffset));
    }
    if req.yoffset > req.yres {
        return Err(VgfbError::YOffsetOutOfRange {
            yoffset: req.yoffset,
            limit: req.yres,
        });
    }

    let yres_virtual = req
        .yres
        .checked_mul(2)
        .ok_or(VgfbError::UnknownResolution {
            xres: req.xres,
            yres: req.yres,
        })?;
    // xres * 4 fits in a u64; only the product with the virtual height can overflow.
    let line_length = u64::from(req.xres) * u64::from(req.bits_per_pixel / 8);
    if line_length.checked_mul(u64::from(yres_virtual)).is_none() {
        return Err(VgfbError::OutOfMemory { bytes: u64::MAX });
    }

    let refresh_hz = if req.resolution() == current.resolution() {
        current.refresh_hz
    } else {
        modes
            .select(req.resolution())
            .ok_or(VgfbError::UnknownResolution {
                xres: req.xres,
                yres: req.yres,
            })?
            .refresh_hz
    };

    Ok(Mode {
        xres: req.xres,
        yres: req.yres,
        xres_virtual: req.xres,
        yres_virtual,
        xoffset: req.xoffset,
        yoffset: req.yoffset,
        bits_per_pixel: req.bits_per_pixel,
        layout,
        refresh_hz,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn list() -> ModeList {
        ModeList::new(
            &[
                Resolution::new(640, 480),
                Resolution::new(800, 600),
                Resolution::new(1024, 768),
            ],
            60,
        )
    }

    #[test]
    fn commits_listed_resolution_with_double_height() {
        let mut modes = list();
        let mode = validate_and_commit(
            &ModeRequest::new(800, 600, 32),
            &Mode::placeholder(60),
            &mut modes,
        )
        .unwrap();

        assert_eq!(mode.xres, 800);
        assert_eq!(mode.yres, 600);
        assert_eq!(mode.xres_virtual, 800);
        assert_eq!(mode.yres_virtual, 1200);
        assert_eq!(mode.buffer_len(), 800 * 1200 * 4);
        assert_eq!(mode.line_length(), 3200);
    }

    #[test]
    fn switching_resolution_prunes_alternatives_but_keeps_placeholder() {
        let mut modes = list();
        validate_and_commit(
            &ModeRequest::new(1024, 768, 24),
            &Mode::placeholder(60),
            &mut modes,
        )
        .unwrap();

        assert_eq!(
            modes.entries(),
            &[
                VideoMode::placeholder(60),
                VideoMode {
                    xres: 1024,
                    yres: 768,
                    refresh_hz: 60
                }
            ]
        );
        assert!(!modes.contains(Resolution::new(640, 480)));
    }

    #[test]
    fn unknown_resolution_fails_and_leaves_list_alone() {
        let mut modes = list();
        let err = validate_and_commit(
            &ModeRequest::new(1000, 1000, 32),
            &Mode::placeholder(60),
            &mut modes,
        )
        .unwrap_err();

        assert_eq!(
            err,
            VgfbError::UnknownResolution {
                xres: 1000,
                yres: 1000
            }
        );
        assert_eq!(modes, list());
    }

    #[test]
    fn same_resolution_skips_the_mode_list() {
        let mut modes = list();
        let current =
            validate_and_commit(&ModeRequest::new(800, 600, 32), &Mode::placeholder(60), &mut modes)
                .unwrap();

        // 800x600 is the only concrete entry left; an empty list must not matter either.
        let mut empty = ModeList::default();
        let repacked =
            validate_and_commit(&ModeRequest::new(800, 600, 24), &current, &mut empty).unwrap();
        assert_eq!(repacked.bits_per_pixel, 24);
        assert_eq!(repacked.layout.transp, FbBitfield::NONE);
        assert_eq!(repacked.buffer_len(), 800 * 1200 * 3);
    }

    #[test]
    fn depth_selects_distinct_layouts() {
        let rgb = PixelLayout::for_depth(24).unwrap();
        let rgba = PixelLayout::for_depth(32).unwrap();

        assert_eq!(rgb.red, FbBitfield::new(0, 8));
        assert_eq!(rgb.green, FbBitfield::new(8, 8));
        assert_eq!(rgb.blue, FbBitfield::new(16, 8));
        assert_eq!(rgb.transp, FbBitfield::NONE);
        assert_eq!(rgba.transp, FbBitfield::new(24, 8));
        assert_eq!(
            PixelLayout {
                transp: FbBitfield::NONE,
                ..rgba
            },
            rgb
        );
        assert_eq!(PixelLayout::for_depth(16), None);
    }

    #[test]
    fn policy_rejections() {
        let current = Mode::placeholder(60);

        let mut req = ModeRequest::new(800, 600, 16);
        assert_eq!(
            validate_and_commit(&req, &current, &mut list()),
            Err(VgfbError::InvalidBitsPerPixel(16))
        );

        req.bits_per_pixel = 32;
        req.xoffset = 8;
        assert_eq!(
            validate_and_commit(&req, &current, &mut list()),
            Err(VgfbError::NonZeroXOffset(8))
        );

        req.xoffset = 0;
        req.yoffset = 601;
        assert_eq!(
            validate_and_commit(&req, &current, &mut list()),
            Err(VgfbError::YOffsetOutOfRange {
                yoffset: 601,
                limit: 600
            })
        );

        req.yoffset = 600;
        assert_eq!(
            validate_and_commit(&req, &current, &mut list()).map(|m| m.yoffset),
            Ok(600)
        );
    }

    #[test]
    fn unrepresentable_size_is_refused_before_narrowing() {
        let huge = Resolution::new(u32::MAX, 1 << 30);
        let mut modes = ModeList::new(&[huge, Resolution::new(640, 480)], 60);
        let before = modes.clone();

        assert_eq!(
            validate_and_commit(
                &ModeRequest::new(huge.xres, huge.yres, 32),
                &Mode::placeholder(60),
                &mut modes,
            ),
            Err(VgfbError::OutOfMemory { bytes: u64::MAX })
        );
        assert_eq!(modes, before);

        let mode = Mode {
            xres_virtual: u32::MAX,
            yres_virtual: u32::MAX,
            ..Mode::placeholder(60)
        };
        assert_eq!(mode.checked_buffer_len(), None);
        assert_eq!(mode.buffer_len(), u64::MAX);
    }

    #[test]
    fn var_screeninfo_reflects_mode() {
        let mode = validate_and_commit(
            &ModeRequest::new(640, 480, 32),
            &Mode::placeholder(60),
            &mut list(),
        )
        .unwrap();
        let var = mode.to_var_screeninfo();

        assert_eq!(var.yres_virtual, 960);
        assert_eq!(var.transp, FbBitfield::new(24, 8));
        // 1e12 / (640 * 480 * 60)
        assert_eq!(var.pixclock, 54_253);
        assert_eq!(Mode::placeholder(60).pixclock(), 0);
    }
}
