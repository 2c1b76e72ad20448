//! Error types for the overlay core
//!
//! Each subsystem has its own error enum so that a failure stays scoped to
//! the feature that produced it. [`Error`] collects them for callers that
//! only need a single type.

use std::path::PathBuf;

use thiserror::Error;

use crate::input::HookKind;
use crate::region::Region;

/// Result type for crate operations
pub type Result<T> = std::result::Result<T, Error>;

/// Screen capture failures. Recoverable: the scan tick is skipped.
#[derive(Debug, Error)]
pub enum CaptureError {
    /// The requested region does not intersect the virtual desktop
    #[error("capture region {0} lies entirely outside the virtual desktop")]
    RegionOffscreen(Region),
    /// The requested region has zero width or height
    #[error("capture region has zero area")]
    EmptyRegion,
    /// The OS capture call failed
    #[error("screen capture failed: {0}")]
    Platform(String),
    /// No capture backend is available on this platform
    #[error("screen capture is not supported on this platform")]
    Unsupported,
}

/// Malformed template. The owning scan target is disabled.
#[derive(Debug, Error)]
pub enum MatchError {
    #[error("template `{0}` has no pixels")]
    EmptyTemplate(String),
    #[error("template `{0}` has uniform intensity and cannot be correlated")]
    FlatTemplate(String),
    #[error("failed to load template `{id}` from {}: {source}", .path.display())]
    Load {
        id: String,
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

/// The OS refused a low-level hook. Fatal to the dependent features only.
#[derive(Debug, Error)]
pub enum HookInstallError {
    #[error("{kind} hook registration denied: {reason}")]
    Denied { kind: HookKind, reason: String },
    #[error("{0} hook is already installed")]
    AlreadyInstalled(HookKind),
    #[error("{0} hook thread did not report readiness")]
    Timeout(HookKind),
    #[error("low-level hooks are not supported on this platform")]
    Unsupported,
}

/// Overlay window creation failure. The entity is hidden until re-enabled.
#[derive(Debug, Error)]
pub enum WindowCreateError {
    #[error("overlay window creation failed: {0}")]
    Platform(String),
    #[error("overlay backend is unavailable")]
    Disconnected,
    #[error("overlay windows are not supported on this platform")]
    Unsupported,
}

/// Synthetic input injection failure
#[derive(Debug, Error)]
pub enum SynthError {
    #[error("SendInput injected {sent} of {expected} events")]
    Partial { sent: u32, expected: u32 },
    #[error("input synthesis failed: {0}")]
    Platform(String),
    #[error("input synthesis is not supported on this platform")]
    Unsupported,
}

/// Settings or library loading failure
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid settings file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("invalid library file: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Umbrella error for engine level operations
#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Match(#[from] MatchError),
    #[error(transparent)]
    Hook(#[from] HookInstallError),
    #[error(transparent)]
    Window(#[from] WindowCreateError),
    #[error(transparent)]
    Synth(#[from] SynthError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("engine is already running")]
    AlreadyRunning,
    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_error_display() {
        let err = CaptureError::RegionOffscreen(Region::new(-500, -500, 10, 10));
        assert!(err.to_string().contains("-500"));
    }

    #[test]
    fn test_umbrella_conversion() {
        let err: Error = MatchError::FlatTemplate("life".into()).into();
        assert!(matches!(err, Error::Match(MatchError::FlatTemplate(_))));
        assert!(err.to_string().contains("life"));
    }
}
