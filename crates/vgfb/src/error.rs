use thiserror::Error;
use vgfb_protocol::PayloadError;

pub type Result<T> = core::result::Result<T, VgfbError>;

/// Coarse classification every [`VgfbError`] falls into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    ResourceExhausted,
    NotFound,
    Gone,
    InvariantViolation,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VgfbError {
    #[error("unsupported bits per pixel {0} (expected 24 or 32)")]
    InvalidBitsPerPixel(u32),

    #[error("horizontal panning is not supported (xoffset {0})")]
    NonZeroXOffset(u32),

    #[error("yoffset {yoffset} exceeds limit {limit}")]
    YOffsetOutOfRange { yoffset: u32, limit: u32 },

    #[error("resolution {xres}x{yres} is not in the mode list")]
    UnknownResolution { xres: u32, yres: u32 },

    #[error("out of bounds access: offset {offset} len {len} size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("control request {0} is not supported")]
    Unsupported(&'static str),

    #[error("unknown control request {0:#x}")]
    UnknownRequest(u32),

    #[error("malformed control payload: {0}")]
    MalformedPayload(#[from] PayloadError),

    #[error("failed to allocate {bytes} byte framebuffer")]
    OutOfMemory { bytes: u64 },

    #[error("device limit of {0} instances reached")]
    TooManyDevices(usize),

    #[error("no device instance {0}")]
    NoSuchDevice(u32),

    #[error("device has no framebuffer to map")]
    NoBuffer,

    #[error("device is being torn down")]
    Gone,

    #[error("reference count invariant violated: {0}")]
    InvariantViolation(&'static str),
}

impl VgfbError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidBitsPerPixel(_)
            | Self::NonZeroXOffset(_)
            | Self::YOffsetOutOfRange { .. }
            | Self::UnknownResolution { .. }
            | Self::OutOfBounds { .. }
            | Self::Unsupported(_)
            | Self::UnknownRequest(_)
            | Self::MalformedPayload(_) => ErrorKind::InvalidArgument,
            Self::OutOfMemory { .. } | Self::TooManyDevices(_) => ErrorKind::ResourceExhausted,
            Self::NoSuchDevice(_) | Self::NoBuffer => ErrorKind::NotFound,
            Self::Gone => ErrorKind::Gone,
            Self::InvariantViolation(_) => ErrorKind::InvariantViolation,
        }
    }

    /// Negative errno value a character-device transport returns for this error.
    pub fn errno(&self) -> i32 {
        const EINVAL: i32 = 22;
        const ENOMEM: i32 = 12;
        const ENODEV: i32 = 19;
        const ENFILE: i32 = 23;
        const EFAULT: i32 = 14;
        const EIO: i32 = 5;
        let errno = match self {
            Self::MalformedPayload(_) => EFAULT,
            Self::TooManyDevices(_) => ENFILE,
            _ => match self.kind() {
                ErrorKind::InvalidArgument => EINVAL,
                ErrorKind::ResourceExhausted => ENOMEM,
                ErrorKind::NotFound | ErrorKind::Gone => ENODEV,
                ErrorKind::InvariantViolation => EIO,
            },
        };
        -errno
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_follows_kind() {
        assert_eq!(VgfbError::InvalidBitsPerPixel(16).errno(), -22);
        assert_eq!(VgfbError::OutOfMemory { bytes: 1 }.errno(), -12);
        assert_eq!(VgfbError::Gone.errno(), -19);
        assert_eq!(VgfbError::NoBuffer.kind(), ErrorKind::NotFound);
        assert_eq!(
            VgfbError::InvariantViolation("use-count underflow").kind(),
            ErrorKind::InvariantViolation
        );
    }
}
