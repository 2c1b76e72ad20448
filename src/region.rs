//! Screen geometry
//!
//! All coordinates are virtual-desktop pixels. Regions use signed origins
//! because monitors left of or above the primary have negative coordinates.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Desktop size assumed when the OS cannot report one
pub const FALLBACK_DESKTOP: Region = Region {
    x: 0,
    y: 0,
    width: 1920,
    height: 1080,
};

/// A point in screen coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Offset this point by another point treated as a vector
    pub fn offset(self, by: Point) -> Point {
        Point::new(self.x.saturating_add(by.x), self.y.saturating_add(by.y))
    }
}

impl fmt::Display for Point {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Rectangle in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Region {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Region {
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Square region anchored at `origin`
    pub const fn square(origin: Point, side: u32) -> Self {
        Self::new(origin.x, origin.y, side, side)
    }

    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Exclusive right edge
    pub fn right(&self) -> i64 {
        self.x as i64 + self.width as i64
    }

    /// Exclusive bottom edge
    pub fn bottom(&self) -> i64 {
        self.y as i64 + self.height as i64
    }

    pub fn center(&self) -> Point {
        Point::new(
            (self.x as i64 + self.width as i64 / 2) as i32,
            (self.y as i64 + self.height as i64 / 2) as i32,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn is_square(&self) -> bool {
        self.width == self.height
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Whether the point lies inside (left/top inclusive, right/bottom exclusive)
    pub fn contains(&self, p: Point) -> bool {
        let (px, py) = (p.x as i64, p.y as i64);
        px >= self.x as i64 && px < self.right() && py >= self.y as i64 && py < self.bottom()
    }

    /// Overlap of two regions, `None` when they do not intersect
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let left = (self.x as i64).max(other.x as i64);
        let top = (self.y as i64).max(other.y as i64);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return None;
        }
        Some(Region::new(
            left as i32,
            top as i32,
            (right - left) as u32,
            (bottom - top) as u32,
        ))
    }

    /// Clamp to desktop bounds. `None` when nothing is left.
    pub fn clamp_to(&self, bounds: &Region) -> Option<Region> {
        self.intersect(bounds)
    }

    pub fn translate(&self, dx: i32, dy: i32) -> Region {
        Region::new(
            self.x.saturating_add(dx),
            self.y.saturating_add(dy),
            self.width,
            self.height,
        )
    }

    pub fn with_origin(&self, origin: Point) -> Region {
        Region::new(origin.x, origin.y, self.width, self.height)
    }

    /// Grow or shrink both sides by the same `delta`.
    ///
    /// The delta is clamped so the smaller side never drops below
    /// `min_side` and the larger side never exceeds `max_side`. Because one
    /// delta applies to both sides, a square stays square.
    pub fn resize_uniform(&self, delta: i32, min_side: u32, max_side: u32) -> Region {
        let min_side = min_side.max(1) as i64;
        let max_side = (max_side as i64).max(min_side);
        let small = self.width.min(self.height) as i64;
        let large = self.width.max(self.height) as i64;

        let lo = min_side - small;
        let hi = max_side - large;
        let applied = if lo > hi { 0 } else { (delta as i64).clamp(lo, hi) };

        Region::new(
            self.x,
            self.y,
            (self.width as i64 + applied) as u32,
            (self.height as i64 + applied) as u32,
        )
    }

    /// Move the region so that it lies inside `bounds`, keeping its size
    /// where possible and shrinking it otherwise.
    pub fn fit_within(&self, bounds: &Region) -> Region {
        let width = self.width.min(bounds.width);
        let height = self.height.min(bounds.height);
        let max_x = bounds.right() - width as i64;
        let max_y = bounds.bottom() - height as i64;
        let x = (self.x as i64).clamp(bounds.x as i64, max_x);
        let y = (self.y as i64).clamp(bounds.y as i64, max_y);
        Region::new(x as i32, y as i32, width, height)
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {}x{})",
            self.x, self.y, self.width, self.height
        )
    }
}

/// Bounds of the virtual desktop spanning all monitors
#[cfg(target_os = "windows")]
pub fn virtual_desktop() -> Region {
    use windows::Win32::UI::WindowsAndMessaging::{
        GetSystemMetrics, SM_CXVIRTUALSCREEN, SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN,
        SM_YVIRTUALSCREEN,
    };

    let (x, y, w, h) = unsafe {
        (
            GetSystemMetrics(SM_XVIRTUALSCREEN),
            GetSystemMetrics(SM_YVIRTUALSCREEN),
            GetSystemMetrics(SM_CXVIRTUALSCREEN),
            GetSystemMetrics(SM_CYVIRTUALSCREEN),
        )
    };
    if w <= 0 || h <= 0 {
        log::warn!("Virtual screen metrics unavailable, assuming {}", FALLBACK_DESKTOP);
        return FALLBACK_DESKTOP;
    }
    Region::new(x, y, w as u32, h as u32)
}

/// Bounds of the virtual desktop spanning all monitors
#[cfg(not(target_os = "windows"))]
pub fn virtual_desktop() -> Region {
    FALLBACK_DESKTOP
}
