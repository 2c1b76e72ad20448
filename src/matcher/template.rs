//! Template images

use image::{GrayImage, RgbaImage};
use std::path::{Path, PathBuf};

use crate::error::MatchError;

/// A grayscale reference image with precomputed correlation terms
#[derive(Debug, Clone)]
pub struct Template {
    id: String,
    path: Option<PathBuf>,
    gray: GrayImage,
    /// Pixel values minus their mean, row-major
    centered: Vec<f64>,
    /// Euclidean norm of `centered`
    norm: f64,
}

impl Template {
    /// Load a template from an image file
    pub fn load(id: impl Into<String>, path: impl AsRef<Path>) -> Result<Self, MatchError> {
        let id = id.into();
        let path = path.as_ref();
        let image = image::open(path).map_err(|source| MatchError::Load {
            id: id.clone(),
            path: path.to_path_buf(),
            source,
        })?;
        let mut template = Self::from_gray(id, image.to_luma8())?;
        template.path = Some(path.to_path_buf());
        log::debug!(
            "Loaded template `{}` ({}x{}) from {}",
            template.id,
            template.width(),
            template.height(),
            path.display()
        );
        Ok(template)
    }

    pub fn from_rgba(id: impl Into<String>, image: &RgbaImage) -> Result<Self, MatchError> {
        Self::from_gray(id, image::imageops::grayscale(image))
    }

    /// Build from a grayscale image. Empty and uniform images are rejected.
    pub fn from_gray(id: impl Into<String>, gray: GrayImage) -> Result<Self, MatchError> {
        let id = id.into();
        if gray.width() == 0 || gray.height() == 0 {
            return Err(MatchError::EmptyTemplate(id));
        }

        let n = (gray.width() * gray.height()) as f64;
        let mean = gray.pixels().map(|p| p[0] as f64).sum::<f64>() / n;
        let centered: Vec<f64> = gray.pixels().map(|p| p[0] as f64 - mean).collect();
        let norm = centered.iter().map(|v| v * v).sum::<f64>().sqrt();
        if norm < 1e-6 {
            return Err(MatchError::FlatTemplate(id));
        }

        Ok(Self {
            id,
            path: None,
            gray,
            centered,
            norm,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    pub fn gray(&self) -> &GrayImage {
        &self.gray
    }

    pub(crate) fn centered(&self) -> &[f64] {
        &self.centered
    }

    pub(crate) fn norm(&self) -> f64 {
        self.norm
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_empty_template_rejected() {
        let err = Template::from_gray("empty", GrayImage::new(0, 4)).unwrap_err();
        assert!(matches!(err, MatchError::EmptyTemplate(id) if id == "empty"));
    }

    #[test]
    fn test_flat_template_rejected() {
        let flat = GrayImage::from_pixel(8, 8, Luma([128]));
        assert!(matches!(
            Template::from_gray("flat", flat),
            Err(MatchError::FlatTemplate(_))
        ));
    }

    #[test]
    fn test_missing_file_is_load_error() {
        let err = Template::load("ghost", "/nonexistent/ghost.png").unwrap_err();
        assert!(matches!(err, MatchError::Load { .. }));
    }

    #[test]
    fn test_centered_sums_to_zero() {
        let img = GrayImage::from_fn(4, 3, |x, y| Luma([(x * 40 + y * 7) as u8]));
        let tpl = Template::from_gray("g", img).unwrap();
        let sum: f64 = tpl.centered().iter().sum();
        assert!(sum.abs() < 1e-9);
        assert!(tpl.norm() > 0.0);
    }
}
