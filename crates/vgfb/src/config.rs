use core::fmt;
use core::str::FromStr;

use thiserror::Error;

/// A visible resolution in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Resolution {
    pub xres: u32,
    pub yres: u32,
}

impl Resolution {
    pub const fn new(xres: u32, yres: u32) -> Self {
        Self { xres, yres }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.xres, self.yres)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid resolution {0:?}, expected WIDTHxHEIGHT")]
pub struct ParseResolutionError(String);

impl FromStr for Resolution {
    type Err = ParseResolutionError;

    /// Parses `WxH`, e.g. `1024x768`. Both sides must be non-zero.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseResolutionError(s.to_owned());
        let (w, h) = s.trim().split_once(['x', 'X']).ok_or_else(err)?;
        let xres = w.trim().parse::<u32>().map_err(|_| err())?;
        let yres = h.trim().parse::<u32>().map_err(|_| err())?;
        if xres == 0 || yres == 0 {
            return Err(err());
        }
        Ok(Self { xres, yres })
    }
}

/// Resolutions offered to every new instance unless overridden.
pub const DEFAULT_MODES: &[Resolution] = &[
    Resolution::new(640, 480),
    Resolution::new(800, 600),
    Resolution::new(1024, 768),
    Resolution::new(1280, 720),
    Resolution::new(1280, 1024),
    Resolution::new(1366, 768),
    Resolution::new(1600, 900),
    Resolution::new(1920, 1080),
];

pub const DEFAULT_REFRESH_HZ: u32 = 60;

/// 64MiB: a 1920x1080 double buffer at 32bpp is ~16MiB.
pub const DEFAULT_MAX_BUFFER_BYTES: usize = 64 * 1024 * 1024;

pub const DEFAULT_MAX_DEVICES: usize = 64;

/// Buffer lengths are reported as `u32` in the fixed screen info.
pub const BUFFER_BYTES_CEILING: usize = u32::MAX as usize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VgfbConfig {
    /// Resolutions a fresh instance may negotiate, in mode-list order.
    pub modes: Vec<Resolution>,
    pub refresh_hz: u32,
    /// Upper bound on a single instance's pixel buffer (both halves). Clamped to
    /// [`BUFFER_BYTES_CEILING`].
    pub max_buffer_bytes: usize,
    /// Upper bound on simultaneously live instances.
    pub max_devices: usize,
}

impl Default for VgfbConfig {
    fn default() -> Self {
        Self {
            modes: DEFAULT_MODES.to_vec(),
            refresh_hz: DEFAULT_REFRESH_HZ,
            max_buffer_bytes: DEFAULT_MAX_BUFFER_BYTES,
            max_devices: DEFAULT_MAX_DEVICES,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for env var {0}")]
    InvalidEnv(&'static str),
}

impl VgfbConfig {
    /// Build a config from `VGFB_*` environment variables, falling back to defaults for unset
    /// variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`VgfbConfig::from_env`], with an injectable variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Some(raw) = lookup("VGFB_MODES") {
            cfg.modes = parse_modes(&raw).ok_or(ConfigError::InvalidEnv("VGFB_MODES"))?;
        }
        if let Some(raw) = lookup("VGFB_REFRESH_HZ") {
            cfg.refresh_hz = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|&hz| hz > 0)
                .ok_or(ConfigError::InvalidEnv("VGFB_REFRESH_HZ"))?;
        }
        if let Some(raw) = lookup("VGFB_MAX_BUFFER_BYTES") {
            cfg.max_buffer_bytes = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n <= BUFFER_BYTES_CEILING)
                .ok_or(ConfigError::InvalidEnv("VGFB_MAX_BUFFER_BYTES"))?;
        }
        if let Some(raw) = lookup("VGFB_MAX_DEVICES") {
            cfg.max_devices = raw
                .trim()
                .parse::<usize>()
                .ok()
                .filter(|&n| n > 0)
                .ok_or(ConfigError::InvalidEnv("VGFB_MAX_DEVICES"))?;
        }

        Ok(cfg)
    }
}

/// Parses a comma separated `WxH` list. Empty entries are skipped; an empty list is rejected.
pub fn parse_modes(raw: &str) -> Option<Vec<Resolution>> {
    let mut modes = Vec::new();
    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let res = entry.parse::<Resolution>().ok()?;
        if !modes.contains(&res) {
            modes.push(res);
        }
    }
    (!modes.is_empty()).then_some(modes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn unset_env_yields_defaults() {
        let cfg = VgfbConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(cfg, VgfbConfig::default());
        assert!(cfg.modes.contains(&Resolution::new(800, 600)));
    }

    #[test]
    fn env_overrides_are_applied() {
        let cfg = VgfbConfig::from_lookup(lookup(&[
            ("VGFB_MODES", " 320x200, 800X600 ,,320x200"),
            ("VGFB_REFRESH_HZ", "75"),
            ("VGFB_MAX_BUFFER_BYTES", "4096"),
            ("VGFB_MAX_DEVICES", "2"),
        ]))
        .unwrap();

        assert_eq!(
            cfg.modes,
            vec![Resolution::new(320, 200), Resolution::new(800, 600)]
        );
        assert_eq!(cfg.refresh_hz, 75);
        assert_eq!(cfg.max_buffer_bytes, 4096);
        assert_eq!(cfg.max_devices, 2);
    }

    #[test]
    fn resolution_parse_errors_name_the_input() {
        assert_eq!("1024x768".parse(), Ok(Resolution::new(1024, 768)));
        assert_eq!(" 8 X 4 ".parse(), Ok(Resolution::new(8, 4)));

        let err = "640".parse::<Resolution>().unwrap_err();
        assert_eq!(err, ParseResolutionError("640".to_owned()));
        assert_eq!(
            err.to_string(),
            "invalid resolution \"640\", expected WIDTHxHEIGHT"
        );
        assert!("0x600".parse::<Resolution>().is_err());
        assert!("axb".parse::<Resolution>().is_err());
    }

    #[test]
    fn invalid_env_values_are_rejected() {
        for (var, value) in [
            ("VGFB_MODES", "800by600"),
            ("VGFB_MODES", "0x600"),
            ("VGFB_MODES", ","),
            ("VGFB_REFRESH_HZ", "0"),
            ("VGFB_MAX_BUFFER_BYTES", "-1"),
            ("VGFB_MAX_BUFFER_BYTES", "4294967296"),
            ("VGFB_MAX_DEVICES", "many"),
        ] {
            let err = VgfbConfig::from_lookup(lookup(&[(var, value)])).unwrap_err();
            let ConfigError::InvalidEnv(name) = err;
            assert_eq!(name, var);
        }
    }
}
