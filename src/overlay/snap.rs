//! Grid and edge snapping for dragged overlays

use crate::region::{Point, Region};

fn round_to_grid(value: i32, grid: u32) -> i32 {
    if grid <= 1 {
        return value;
    }
    let grid = grid as f64;
    ((value as f64 / grid).round() * grid) as i32
}

/// Snap one axis against a neighbour spanning `[start, start + span)`
fn snap_axis(pos: i32, size: u32, start: i32, span: u32, threshold: i64) -> i32 {
    let (pos, size, start, span) = (pos as i64, size as i64, start as i64, span as i64);
    let end = start + span;
    let snapped = if (pos - start).abs() <= threshold {
        start
    } else if (pos - end).abs() <= threshold {
        end
    } else if (pos + size - start).abs() <= threshold {
        start - size
    } else if (pos + size - end).abs() <= threshold {
        end - size
    } else {
        pos
    };
    snapped as i32
}

/// Snap a dragged region's origin.
///
/// The origin is rounded to `grid` first, then each neighbour in turn may
/// pull an edge of the region onto one of its own edges when they are
/// within `threshold` pixels.
pub fn snap_origin(region: Region, neighbours: &[Region], grid: u32, threshold: u32) -> Point {
    let mut x = round_to_grid(region.x, grid);
    let mut y = round_to_grid(region.y, grid);
    let threshold = threshold as i64;
    for other in neighbours {
        x = snap_axis(x, region.width, other.x, other.width, threshold);
        y = snap_axis(y, region.height, other.y, other.height, threshold);
    }
    Point::new(x, y)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_rounding() {
        let r = Region::new(23, 41, 10, 10);
        assert_eq!(snap_origin(r, &[], 16, 8), Point::new(16, 48));
        assert_eq!(snap_origin(r, &[], 0, 8), Point::new(23, 41));
    }

    #[test]
    fn test_snaps_to_neighbour_edges() {
        let neighbour = Region::new(200, 300, 50, 50);
        // left edge onto neighbour's right edge
        let r = Region::new(254, 500, 20, 20);
        assert_eq!(snap_origin(r, &[neighbour], 1, 8).x, 250);
        // right edge onto neighbour's left edge
        let r = Region::new(175, 500, 20, 20);
        assert_eq!(snap_origin(r, &[neighbour], 1, 8).x, 180);
        // top aligned with neighbour's top
        let r = Region::new(0, 305, 20, 20);
        assert_eq!(snap_origin(r, &[neighbour], 1, 8).y, 300);
        // too far away
        let r = Region::new(100, 100, 20, 20);
        assert_eq!(snap_origin(r, &[neighbour], 1, 8), Point::new(100, 100));
    }
}
