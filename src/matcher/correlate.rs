//! Correlation search kernels

use image::{GrayImage, Luma};
use imageproc::definitions::Image;
use imageproc::integral_image::{integral_image, integral_squared_image};
use imageproc::template_matching::{match_template, MatchTemplateMethod};

use super::{MatchScore, Template};
use crate::region::Point;

/// Windows with less intensity variance than this score zero
const FLAT_WINDOW_VARIANCE: f64 = 1e-6;

/// Zero-mean normalized cross-correlation over every placement.
///
/// Window sums come from integral images, so only the cross term is
/// computed per template pixel. Scores are clamped to `0..=1`; negative
/// correlation counts as no similarity. Positions are visited in raster
/// order and only a strictly greater score replaces the current best.
pub(crate) fn zncc(frame: &GrayImage, template: &Template) -> Option<MatchScore> {
    let (fw, fh) = frame.dimensions();
    let (tw, th) = (template.width(), template.height());
    if tw > fw || th > fh {
        return None;
    }

    let sums: Image<Luma<u64>> = integral_image(frame);
    let squares: Image<Luma<u64>> = integral_squared_image(frame);
    let n = (tw * th) as f64;
    let centered = template.centered();
    let t_norm = template.norm();
    let raw = frame.as_raw();
    let stride = fw as usize;

    let mut best: Option<MatchScore> = None;
    for y in 0..=(fh - th) {
        for x in 0..=(fw - tw) {
            let sum = window_sum(&sums, x, y, tw, th) as f64;
            let sum_sq = window_sum(&squares, x, y, tw, th) as f64;
            let variance = sum_sq - sum * sum / n;
            let score = if variance <= FLAT_WINDOW_VARIANCE {
                0.0
            } else {
                let mut cross = 0.0f64;
                for row in 0..th as usize {
                    let start = (y as usize + row) * stride + x as usize;
                    let pixels = &raw[start..start + tw as usize];
                    let weights = &centered[row * tw as usize..(row + 1) * tw as usize];
                    cross += pixels
                        .iter()
                        .zip(weights)
                        .map(|(&p, &w)| p as f64 * w)
                        .sum::<f64>();
                }
                (cross / (t_norm * variance.sqrt())).clamp(0.0, 1.0)
            };

            let score = score as f32;
            if best.map_or(true, |b| score > b.score) {
                best = Some(MatchScore {
                    score,
                    position: Point::new(x as i32, y as i32),
                });
            }
        }
    }
    best
}

/// Plain normalized cross-correlation through imageproc.
///
/// Cheaper to reason about but biased towards bright regions, so it is
/// only suitable for icons on dark backgrounds.
pub(crate) fn ncc(frame: &GrayImage, template: &Template) -> Option<MatchScore> {
    if template.width() > frame.width() || template.height() > frame.height() {
        return None;
    }
    let scores = match_template(
        frame,
        template.gray(),
        MatchTemplateMethod::CrossCorrelationNormalized,
    );

    let mut best: Option<MatchScore> = None;
    for (x, y, p) in scores.enumerate_pixels() {
        let score = if p[0].is_finite() { p[0].clamp(0.0, 1.0) } else { 0.0 };
        if best.map_or(true, |b| score > b.score) {
            best = Some(MatchScore {
                score,
                position: Point::new(x as i32, y as i32),
            });
        }
    }
    best
}

fn window_sum(integral: &Image<Luma<u64>>, x: u32, y: u32, w: u32, h: u32) -> u64 {
    let a = integral.get_pixel(x, y)[0];
    let b = integral.get_pixel(x + w, y)[0];
    let c = integral.get_pixel(x, y + h)[0];
    let d = integral.get_pixel(x + w, y + h)[0];
    (a + d) - (b + c)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noise(w: u32, h: u32, seed: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            let mut v = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263) ^ seed;
            v = (v ^ (v >> 13)).wrapping_mul(1_274_126_177);
            Luma([(v >> 24) as u8])
        })
    }

    fn paste(frame: &mut GrayImage, patch: &GrayImage, at: (u32, u32)) {
        image::imageops::replace(frame, patch, at.0 as i64, at.1 as i64);
    }

    #[test]
    fn test_window_sum_matches_direct_sum() {
        let img = noise(9, 7, 3);
        let ii: Image<Luma<u64>> = integral_image(&img);
        let direct: u64 = (2..6)
            .flat_map(|y| (1..4).map(move |x| (x, y)))
            .map(|(x, y)| img.get_pixel(x, y)[0] as u64)
            .sum();
        assert_eq!(window_sum(&ii, 1, 2, 3, 4), direct);
    }

    #[test]
    fn test_zncc_finds_exact_copy() {
        let patch = noise(12, 10, 99);
        let mut frame = noise(80, 60, 7);
        paste(&mut frame, &patch, (37, 21));
        let tpl = Template::from_gray("p", patch).unwrap();

        let best = zncc(&frame, &tpl).unwrap();
        assert_eq!(best.position, Point::new(37, 21));
        assert!(best.score > 0.999, "score {}", best.score);
    }

    #[test]
    fn test_zncc_is_brightness_invariant() {
        let patch = noise(8, 8, 5);
        let brighter = GrayImage::from_fn(8, 8, |x, y| {
            Luma([(patch.get_pixel(x, y)[0] / 2).saturating_add(100)])
        });
        let mut frame = noise(40, 40, 11);
        paste(&mut frame, &brighter, (10, 12));
        let tpl = Template::from_gray("p", patch).unwrap();
        let best = zncc(&frame, &tpl).unwrap();
        assert_eq!(best.position, Point::new(10, 12));
        assert!(best.score > 0.95);
    }

    #[test]
    fn test_zncc_ties_resolve_in_raster_order() {
        let patch = noise(6, 6, 42);
        let mut frame = GrayImage::new(60, 40);
        paste(&mut frame, &patch, (5, 20));
        paste(&mut frame, &patch, (30, 5));
        let tpl = Template::from_gray("p", patch).unwrap();
        let best = zncc(&frame, &tpl).unwrap();
        assert_eq!(best.position, Point::new(30, 5));
    }

    #[test]
    fn test_template_larger_than_frame() {
        let tpl = Template::from_gray("big", noise(20, 20, 1)).unwrap();
        assert!(zncc(&noise(10, 30, 2), &tpl).is_none());
        assert!(ncc(&noise(10, 30, 2), &tpl).is_none());
    }

    #[test]
    fn test_flat_frame_scores_zero() {
        let tpl = Template::from_gray("p", noise(4, 4, 8)).unwrap();
        let frame = GrayImage::from_pixel(10, 10, Luma([77]));
        let best = zncc(&frame, &tpl).unwrap();
        assert_eq!(best.score, 0.0);
        assert_eq!(best.position, Point::new(0, 0));
    }

    #[test]
    fn test_ncc_finds_exact_copy() {
        let patch = noise(10, 10, 17);
        let mut frame = GrayImage::new(50, 50);
        paste(&mut frame, &patch, (22, 9));
        let tpl = Template::from_gray("p", patch).unwrap();
        let best = ncc(&frame, &tpl).unwrap();
        assert_eq!(best.position, Point::new(22, 9));
        assert!(best.score > 0.99);
    }
}
