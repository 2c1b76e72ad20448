//! Screen capture
//!
//! A [`CaptureSource`] grabs arbitrary desktop rectangles. The provided
//! [`CaptureSource::capture`] clamps the request to the virtual desktop
//! before the backend sees it, so backends only ever receive valid regions.

mod replay;
#[cfg(target_os = "windows")]
mod screen;

pub use replay::ImageDesktop;
#[cfg(target_os = "windows")]
pub use screen::ScreenCapture;

use image::{GrayImage, RgbaImage};
use std::sync::Arc;

use crate::error::CaptureError;
use crate::region::{Point, Region};

/// A captured bitmap and the screen position of its top-left pixel
#[derive(Debug, Clone)]
pub struct Frame {
    origin: Point,
    image: RgbaImage,
}

impl Frame {
    pub fn new(origin: Point, image: RgbaImage) -> Self {
        Self { origin, image }
    }

    pub fn origin(&self) -> Point {
        self.origin
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    /// Screen rectangle covered by this frame
    pub fn region(&self) -> Region {
        Region::new(
            self.origin.x,
            self.origin.y,
            self.image.width(),
            self.image.height(),
        )
    }

    /// Luma conversion used by the matcher
    pub fn gray(&self) -> GrayImage {
        image::imageops::grayscale(&self.image)
    }

    /// Convert a frame-local pixel position to screen coordinates
    pub fn to_screen(&self, local: Point) -> Point {
        self.origin.offset(local)
    }

    /// Copy out the part of `area` (screen coordinates) covered by this frame
    pub fn crop(&self, area: Region) -> Option<RgbaImage> {
        let visible = area.intersect(&self.region())?;
        let x = (visible.x - self.origin.x) as u32;
        let y = (visible.y - self.origin.y) as u32;
        Some(image::imageops::crop_imm(&self.image, x, y, visible.width, visible.height).to_image())
    }
}

/// Source of desktop pixels
pub trait CaptureSource: Send {
    /// Bounds of the capturable desktop
    fn bounds(&self) -> Region;

    /// Grab a region already clamped to [`CaptureSource::bounds`]
    fn grab(&mut self, region: Region) -> Result<RgbaImage, CaptureError>;

    /// Capture a region, clamping partially offscreen requests
    fn capture(&mut self, region: Region) -> Result<Frame, CaptureError> {
        if region.is_empty() {
            return Err(CaptureError::EmptyRegion);
        }
        let bounds = self.bounds();
        let clamped = region
            .clamp_to(&bounds)
            .ok_or(CaptureError::RegionOffscreen(region))?;
        if clamped != region {
            log::trace!("Capture region {} clamped to {}", region, clamped);
        }
        let image = self.grab(clamped)?;
        Ok(Frame::new(clamped.origin(), image))
    }
}

impl<C: CaptureSource + ?Sized> CaptureSource for Box<C> {
    fn bounds(&self) -> Region {
        (**self).bounds()
    }

    fn grab(&mut self, region: Region) -> Result<RgbaImage, CaptureError> {
        (**self).grab(region)
    }
}

/// Keeps the application's own overlays out of captured frames
pub trait CaptureShield: Send + Sync {
    /// True when overlays are already invisible to screen capture
    fn excluded_from_capture(&self) -> bool;

    /// Hide every visible overlay for the duration of a capture
    fn conceal(&self);

    /// Restore what [`CaptureShield::conceal`] hid
    fn reveal(&self);
}

/// Wraps a source so overlays never appear in its frames.
///
/// When the overlay backend cannot mark windows as excluded from capture,
/// overlays are hidden around each grab and restored afterwards.
pub struct ShieldedCapture<C> {
    inner: C,
    shield: Arc<dyn CaptureShield>,
}

impl<C: CaptureSource> ShieldedCapture<C> {
    pub fn new(inner: C, shield: Arc<dyn CaptureShield>) -> Self {
        Self { inner, shield }
    }

    pub fn into_inner(self) -> C {
        self.inner
    }
}

impl<C: CaptureSource> CaptureSource for ShieldedCapture<C> {
    fn bounds(&self) -> Region {
        self.inner.bounds()
    }

    fn grab(&mut self, region: Region) -> Result<RgbaImage, CaptureError> {
        if self.shield.excluded_from_capture() {
            return self.inner.grab(region);
        }
        self.shield.conceal();
        let result = self.inner.grab(region);
        self.shield.reveal();
        result
    }
}

/// Platform screen capture, or an error on platforms without one
#[cfg(target_os = "windows")]
pub fn native_capture() -> Result<Box<dyn CaptureSource>, CaptureError> {
    Ok(Box::new(ScreenCapture::new()))
}

/// Platform screen capture, or an error on platforms without one
#[cfg(not(target_os = "windows"))]
pub fn native_capture() -> Result<Box<dyn CaptureSource>, CaptureError> {
    Err(CaptureError::Unsupported)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;
    use parking_lot::Mutex;

    fn desktop() -> ImageDesktop {
        let img = RgbaImage::from_fn(200, 100, |x, y| Rgba([x as u8, y as u8, 0, 255]));
        ImageDesktop::new(img)
    }

    #[test]
    fn test_capture_clamps_partial_region() {
        let mut src = desktop();
        let frame = src.capture(Region::new(190, 90, 20, 20)).unwrap();
        assert_eq!(frame.region(), Region::new(190, 90, 10, 10));
        assert_eq!(frame.image().get_pixel(0, 0), &Rgba([190, 90, 0, 255]));
    }

    #[test]
    fn test_capture_offscreen_fails() {
        let mut src = desktop();
        let err = src.capture(Region::new(500, 500, 10, 10)).unwrap_err();
        assert!(matches!(err, CaptureError::RegionOffscreen(_)));
        assert!(matches!(
            src.capture(Region::new(0, 0, 0, 5)),
            Err(CaptureError::EmptyRegion)
        ));
    }

    #[test]
    fn test_frame_crop_and_to_screen() {
        let mut src = desktop();
        let frame = src.capture(Region::new(100, 50, 50, 50)).unwrap();
        assert_eq!(frame.to_screen(Point::new(3, 4)), Point::new(103, 54));

        let crop = frame.crop(Region::new(140, 90, 20, 20)).unwrap();
        assert_eq!(crop.dimensions(), (10, 10));
        assert_eq!(crop.get_pixel(0, 0), &Rgba([140, 90, 0, 255]));
        assert!(frame.crop(Region::new(0, 0, 10, 10)).is_none());
    }

    #[derive(Default)]
    struct RecordingShield {
        excluded: bool,
        calls: Mutex<Vec<&'static str>>,
    }

    impl CaptureShield for RecordingShield {
        fn excluded_from_capture(&self) -> bool {
            self.excluded
        }
        fn conceal(&self) {
            self.calls.lock().push("conceal");
        }
        fn reveal(&self) {
            self.calls.lock().push("reveal");
        }
    }

    #[test]
    fn test_shield_hides_overlays_around_grab() {
        let shield = Arc::new(RecordingShield::default());
        let mut src = ShieldedCapture::new(desktop(), shield.clone());
        src.capture(Region::new(0, 0, 10, 10)).unwrap();
        assert_eq!(*shield.calls.lock(), vec!["conceal", "reveal"]);
    }

    #[test]
    fn test_shield_skipped_when_excluded() {
        let shield = Arc::new(RecordingShield {
            excluded: true,
            ..Default::default()
        });
        let mut src = ShieldedCapture::new(desktop(), shield.clone());
        src.capture(Region::new(0, 0, 10, 10)).unwrap();
        assert!(shield.calls.lock().is_empty());
    }
}
