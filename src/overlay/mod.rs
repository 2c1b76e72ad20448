//! Overlay windows
//!
//! Every visible library entity maps to exactly one window. Windows never
//! take focus; clickable overlays receive clicks through the mouse hook.

mod headless;
mod manager;
mod snap;
#[cfg(target_os = "windows")]
mod win32;

pub use headless::{HeadlessBackend, HeadlessWindow, WindowOp};
pub use manager::{OverlayManager, OverlayShield};
pub use snap::snap_origin;
#[cfg(target_os = "windows")]
pub use win32::Win32WindowBackend;

use image::RgbaImage;
use std::fmt;
use std::str::FromStr;

use crate::error::WindowCreateError;
use crate::region::{Point, Region};

/// Library entity that owns an overlay window
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EntityId {
    ScanTarget(String),
    CopyArea(String),
    Currency(String),
    Dock,
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityId::ScanTarget(id) => write!(f, "scan:{}", id),
            EntityId::CopyArea(id) => write!(f, "copy:{}", id),
            EntityId::Currency(id) => write!(f, "currency:{}", id),
            EntityId::Dock => write!(f, "dock"),
        }
    }
}

impl FromStr for EntityId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s == "dock" {
            return Ok(EntityId::Dock);
        }
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| format!("Invalid overlay key: {}", s))?;
        if id.is_empty() {
            return Err(format!("Invalid overlay key: {}", s));
        }
        match kind {
            "scan" => Ok(EntityId::ScanTarget(id.to_string())),
            "copy" => Ok(EntityId::CopyArea(id.to_string())),
            "currency" => Ok(EntityId::Currency(id.to_string())),
            _ => Err(format!("Invalid overlay key: {}", s)),
        }
    }
}

/// How an overlay treats the mouse
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayStyle {
    /// Mouse passes through to the window below
    ClickThrough,
    /// Receives clicks but never activates
    ClickableNoActivate,
}

/// Everything a backend needs to create one window
#[derive(Debug, Clone, PartialEq)]
pub struct WindowSpec {
    pub entity: EntityId,
    pub region: Region,
    pub opacity: f32,
    pub style: OverlayStyle,
    /// Initial click-through flag, false for every window in positioning mode
    pub click_through: bool,
}

/// Backend-assigned window identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WindowHandle(pub u64);

/// Window-system capability used by [`OverlayManager`].
///
/// `show` must never activate the window or steal focus.
pub trait WindowBackend: Send {
    fn create(&mut self, spec: &WindowSpec) -> Result<WindowHandle, WindowCreateError>;
    fn set_geometry(&mut self, handle: WindowHandle, region: Region);
    fn set_opacity(&mut self, handle: WindowHandle, opacity: f32);
    fn set_click_through(&mut self, handle: WindowHandle, click_through: bool);
    fn set_content(&mut self, handle: WindowHandle, image: &RgbaImage);
    fn show(&mut self, handle: WindowHandle);
    fn hide(&mut self, handle: WindowHandle);
    fn destroy(&mut self, handle: WindowHandle);

    /// Whether windows are invisible to screen capture
    fn excludes_from_capture(&self) -> bool;
}

/// Screen areas the input classifier tests raw mouse events against
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HitRegions {
    /// Visible clickable overlays
    pub clickable: Vec<(EntityId, Region)>,
    /// Every overlay while positioning mode is on
    pub positioning: Vec<(EntityId, Region)>,
    pub positioning_active: bool,
}

impl HitRegions {
    pub fn clickable_at(&self, point: Point) -> Option<&EntityId> {
        self.clickable
            .iter()
            .find(|(_, region)| region.contains(point))
            .map(|(entity, _)| entity)
    }

    pub fn positioning_at(&self, point: Point) -> Option<&EntityId> {
        self.positioning
            .iter()
            .find(|(_, region)| region.contains(point))
            .map(|(entity, _)| entity)
    }
}

/// Window backend of the running platform
pub fn native_windows() -> Result<Box<dyn WindowBackend>, WindowCreateError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(Win32WindowBackend::new()?))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(WindowCreateError::Unsupported)
    }
}
