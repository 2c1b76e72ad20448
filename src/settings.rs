//! Tunable settings
//!
//! Loaded from TOML. Every field has a default so partial files are valid.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;
use crate::input::Key;
use crate::matcher::MatchMethod;
use crate::region::{Point, Region};
use crate::state::{Feature, FeatureFlags};

/// Top level settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub scan: ScanSettings,
    pub roi: RoiSettings,
    pub input: InputSettings,
    pub actions: ActionSettings,
    pub focus: FocusSettings,
    pub overlay: OverlaySettings,
    /// Features enabled at startup
    pub features: FeatureFlags,
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let settings = Self::from_toml(&text)?;
        log::debug!("Loaded settings from {}", path.as_ref().display());
        Ok(settings)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let settings: Settings = toml::from_str(text)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reject values the runtime cannot work with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.scan.threshold) {
            return Err(ConfigError::Invalid(format!(
                "scan.threshold must be within 0..1, got {}",
                self.scan.threshold
            )));
        }
        if self.scan.interval_ms == 0 {
            return Err(ConfigError::Invalid("scan.interval_ms must be positive".into()));
        }
        if self.roi.width == 0 || self.roi.height == 0 {
            return Err(ConfigError::Invalid("roi width and height must be positive".into()));
        }
        if self.input.queue_capacity == 0 {
            return Err(ConfigError::Invalid("input.queue_capacity must be positive".into()));
        }
        if self.overlay.min_size == 0 {
            return Err(ConfigError::Invalid("overlay.min_size must be positive".into()));
        }
        self.actions.key_sequence()?;
        for binding in &self.input.hotkeys {
            Key::from_str(&binding.key).map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }
}

/// Scan loop tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanSettings {
    /// Minimum score for a match to count
    pub threshold: f32,
    /// Delay between scan ticks
    pub interval_ms: u64,
    /// Skip ticks while the game is not focused
    pub requires_focus: bool,
    pub method: MatchMethod,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            threshold: 0.9,
            interval_ms: 100,
            requires_focus: false,
            method: MatchMethod::default(),
        }
    }
}

/// How the ROI is anchored on the desktop
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoiMode {
    /// Anchored to the top-right corner, `left` is ignored
    #[default]
    TopRight,
    /// Placed at `left`/`top`
    Absolute,
}

/// Region of interest for buff/debuff scanning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiSettings {
    pub mode: RoiMode,
    pub left: i32,
    pub top: i32,
    pub width: u32,
    pub height: u32,
}

impl Default for RoiSettings {
    fn default() -> Self {
        Self {
            mode: RoiMode::TopRight,
            left: 0,
            top: 0,
            width: 400,
            height: 180,
        }
    }
}

impl RoiSettings {
    /// Absolute ROI at the given rectangle
    pub fn absolute(region: Region) -> Self {
        Self {
            mode: RoiMode::Absolute,
            left: region.x,
            top: region.y,
            width: region.width,
            height: region.height,
        }
    }

    /// Resolve to a screen region that fits inside `desktop`
    pub fn resolve(&self, desktop: &Region) -> Region {
        let width = self.width.min(desktop.width).max(1);
        let height = self.height.min(desktop.height).max(1);
        let origin = match self.mode {
            RoiMode::TopRight => Point::new(
                (desktop.right() - width as i64) as i32,
                desktop.y.saturating_add(self.top.max(0)),
            ),
            RoiMode::Absolute => Point::new(self.left, self.top),
        };
        Region::new(origin.x, origin.y, width, height).fit_within(desktop)
    }
}

/// Binds a key to a feature toggle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HotkeyBinding {
    pub key: String,
    pub feature: Feature,
}

/// Input classification tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InputSettings {
    /// Max gap between Ctrl release and the next press for a double tap
    pub double_tap_window_ms: u64,
    /// Wheel ticks closer together than this belong to one burst
    pub burst_window_ms: u64,
    /// Repeats of the same hotkey within this window are ignored
    pub hotkey_debounce_ms: u64,
    /// Capacity of the hook event queue
    pub queue_capacity: usize,
    pub hotkeys: Vec<HotkeyBinding>,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            double_tap_window_ms: 400,
            burst_window_ms: 150,
            hotkey_debounce_ms: 150,
            queue_capacity: 256,
            hotkeys: Vec::new(),
        }
    }
}

/// Synthetic input tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActionSettings {
    /// Comma separated keys sent on wheel-down, e.g. "1,2,3,4"
    pub key_sequence: String,
    pub key_delay_ms: u64,
    /// Interval of emulated left clicks while Ctrl is held
    pub click_interval_ms: u64,
    /// Pause between the right and left click of a quick craft
    pub quick_craft_delay_ms: u64,
}

impl Default for ActionSettings {
    fn default() -> Self {
        Self {
            key_sequence: "1,2,3,4".to_string(),
            key_delay_ms: 50,
            click_interval_ms: 50,
            quick_craft_delay_ms: 30,
        }
    }
}

impl ActionSettings {
    /// Parse the wheel key sequence. Only flask keys 1-4 and Q/W/E/R are accepted.
    pub fn key_sequence(&self) -> Result<Vec<Key>, ConfigError> {
        let mut keys = Vec::new();
        for token in self.key_sequence.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            let key = Key::from_str(token).map_err(ConfigError::Invalid)?;
            if !key.is_sequence_key() {
                return Err(ConfigError::Invalid(format!(
                    "key `{}` is not allowed in a wheel sequence",
                    token
                )));
            }
            keys.push(key);
        }
        Ok(keys)
    }
}

/// Focus gating policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FocusSettings {
    /// When false every action is allowed regardless of focus
    pub enforce: bool,
    /// Process executable names allowed to receive synthetic input
    pub allow_list: Vec<String>,
    /// Also allow actions while this application itself is focused
    pub allow_self: bool,
}

impl Default for FocusSettings {
    fn default() -> Self {
        Self {
            enforce: true,
            allow_list: vec![
                "PathOfExile.exe".to_string(),
                "PathOfExile_x64.exe".to_string(),
                "PathOfExileSteam.exe".to_string(),
                "PathOfExile_x64Steam.exe".to_string(),
            ],
            allow_self: false,
        }
    }
}

/// Overlay geometry tunables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlaySettings {
    /// Smallest side length reachable by wheel resize
    pub min_size: u32,
    /// Pixels added or removed per wheel notch
    pub resize_step: u32,
    pub grid_size: u32,
    pub snap_threshold: u32,
    /// Opacity used for the dock
    pub dock_opacity: f32,
}

impl Default for OverlaySettings {
    fn default() -> Self {
        Self {
            min_size: 8,
            resize_step: 4,
            grid_size: 16,
            snap_threshold: 8,
            dock_opacity: 0.85,
        }
    }
}
