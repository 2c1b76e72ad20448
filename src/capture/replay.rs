//! In-memory desktop for replaying recorded screens

use image::RgbaImage;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::CaptureSource;
use crate::error::CaptureError;
use crate::region::{Point, Region};

/// Serves captures from one or more full-desktop images.
///
/// Each grab reads the current image and then advances to the next one;
/// the last image repeats once the sequence is exhausted (or the sequence
/// wraps when looping is enabled).
pub struct ImageDesktop {
    origin: Point,
    frames: Vec<RgbaImage>,
    cursor: usize,
    looping: bool,
    grabs: Arc<AtomicUsize>,
}

impl ImageDesktop {
    /// A desktop showing a single image at (0, 0)
    pub fn new(image: RgbaImage) -> Self {
        Self::sequence(vec![image])
    }

    /// A desktop stepping through `frames` one grab at a time
    pub fn sequence(frames: Vec<RgbaImage>) -> Self {
        Self {
            origin: Point::default(),
            frames,
            cursor: 0,
            looping: false,
            grabs: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Load every png/bmp/jpg file of a directory, in file name order
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self, CaptureError> {
        let dir = dir.as_ref();
        let mut paths: Vec<_> = std::fs::read_dir(dir)
            .map_err(|e| CaptureError::Platform(format!("{}: {}", dir.display(), e)))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| {
                matches!(
                    p.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref(),
                    Some("png") | Some("bmp") | Some("jpg") | Some("jpeg")
                )
            })
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in &paths {
            let img = image::open(path)
                .map_err(|e| CaptureError::Platform(format!("{}: {}", path.display(), e)))?;
            frames.push(img.to_rgba8());
        }
        if frames.is_empty() {
            return Err(CaptureError::Platform(format!(
                "no frames found in {}",
                dir.display()
            )));
        }
        log::info!("Loaded {} replay frames from {}", frames.len(), dir.display());
        Ok(Self::sequence(frames))
    }

    /// Place the desktop at a different screen origin
    pub fn with_origin(mut self, origin: Point) -> Self {
        self.origin = origin;
        self
    }

    /// Restart from the first frame after the last one
    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    /// Shared counter of grabs served so far
    pub fn grab_counter(&self) -> Arc<AtomicUsize> {
        self.grabs.clone()
    }

    fn current(&self) -> Option<&RgbaImage> {
        self.frames.get(self.cursor)
    }

    fn advance(&mut self) {
        if self.cursor + 1 < self.frames.len() {
            self.cursor += 1;
        } else if self.looping {
            self.cursor = 0;
        }
    }
}

impl CaptureSource for ImageDesktop {
    fn bounds(&self) -> Region {
        let (w, h) = self.current().map(|f| f.dimensions()).unwrap_or((0, 0));
        Region::new(self.origin.x, self.origin.y, w, h)
    }

    fn grab(&mut self, region: Region) -> Result<RgbaImage, CaptureError> {
        let bounds = self.bounds();
        let visible = region
            .clamp_to(&bounds)
            .ok_or(CaptureError::RegionOffscreen(region))?;
        let frame = self.current().ok_or(CaptureError::Unsupported)?;
        let x = (visible.x - self.origin.x) as u32;
        let y = (visible.y - self.origin.y) as u32;
        let out = image::imageops::crop_imm(frame, x, y, visible.width, visible.height).to_image();
        self.grabs.fetch_add(1, Ordering::SeqCst);
        self.advance();
        Ok(out)
    }
}
