//! GDI desktop capture

use image::RgbaImage;
use windows::Win32::Foundation::HWND;
use windows::Win32::Graphics::Gdi::{
    BitBlt, CreateCompatibleBitmap, CreateCompatibleDC, DeleteDC, DeleteObject, GetDC, GetDIBits,
    ReleaseDC, SelectObject, BITMAPINFO, BITMAPINFOHEADER, BI_RGB, DIB_RGB_COLORS, HGDIOBJ,
    SRCCOPY,
};

use super::CaptureSource;
use crate::error::CaptureError;
use crate::region::{virtual_desktop, Region};

/// Captures the live desktop with BitBlt
pub struct ScreenCapture {
    bounds: Region,
}

impl ScreenCapture {
    pub fn new() -> Self {
        Self {
            bounds: virtual_desktop(),
        }
    }

    /// Re-read the virtual desktop after a display change
    pub fn refresh_bounds(&mut self) {
        self.bounds = virtual_desktop();
    }
}

impl Default for ScreenCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for ScreenCapture {
    fn bounds(&self) -> Region {
        self.bounds
    }

    fn grab(&mut self, region: Region) -> Result<RgbaImage, CaptureError> {
        let width = region.width as i32;
        let height = region.height as i32;

        unsafe {
            let screen_dc = GetDC(HWND::default());
            if screen_dc.0.is_null() {
                return Err(CaptureError::Platform("GetDC failed".into()));
            }
            let mem_dc = CreateCompatibleDC(screen_dc);
            if mem_dc.0.is_null() {
                let _ = ReleaseDC(HWND::default(), screen_dc);
                return Err(CaptureError::Platform("CreateCompatibleDC failed".into()));
            }
            let bmp = CreateCompatibleBitmap(screen_dc, width, height);
            if bmp.0.is_null() {
                let _ = DeleteDC(mem_dc);
                let _ = ReleaseDC(HWND::default(), screen_dc);
                return Err(CaptureError::Platform("CreateCompatibleBitmap failed".into()));
            }

            let old_obj = SelectObject(mem_dc, HGDIOBJ(bmp.0));
            let blit = BitBlt(
                mem_dc, 0, 0, width, height, screen_dc, region.x, region.y, SRCCOPY,
            );

            let mut bgra = vec![0u8; region.width as usize * region.height as usize * 4];
            let rows = if blit.is_ok() {
                let mut bmi = BITMAPINFO::default();
                bmi.bmiHeader = BITMAPINFOHEADER {
                    biSize: std::mem::size_of::<BITMAPINFOHEADER>() as u32,
                    biWidth: width,
                    biHeight: -height,
                    biPlanes: 1,
                    biBitCount: 32,
                    biCompression: BI_RGB.0,
                    ..Default::default()
                };
                GetDIBits(
                    mem_dc,
                    bmp,
                    0,
                    region.height,
                    Some(bgra.as_mut_ptr() as *mut _),
                    &mut bmi,
                    DIB_RGB_COLORS,
                )
            } else {
                0
            };

            let _ = SelectObject(mem_dc, old_obj);
            let _ = DeleteObject(bmp);
            let _ = DeleteDC(mem_dc);
            let _ = ReleaseDC(HWND::default(), screen_dc);

            if let Err(e) = blit {
                return Err(CaptureError::Platform(format!("BitBlt failed: {}", e)));
            }
            if rows == 0 {
                return Err(CaptureError::Platform("GetDIBits failed".into()));
            }

            for px in bgra.chunks_exact_mut(4) {
                px.swap(0, 2);
                px[3] = 255;
            }
            RgbaImage::from_raw(region.width, region.height, bgra)
                .ok_or_else(|| CaptureError::Platform("captured buffer size mismatch".into()))
        }
    }
}
