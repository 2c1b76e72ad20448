//! Layered, non-activating tool windows
//!
//! Win32 windows belong to the thread that created them, so every window
//! lives on one UI thread. The backend forwards calls to it over a channel.

use image::RgbaImage;
use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Once};
use std::thread::JoinHandle;
use std::time::Duration;

use windows::core::PCWSTR;
use windows::Win32::Foundation::{COLORREF, HWND, LPARAM, LRESULT, RECT, WPARAM};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, EndPaint,
    InvalidateRect, SelectObject, StretchBlt, BITMAPINFO, BITMAPINFOHEADER, BI_RGB,
    DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, PAINTSTRUCT, SRCCOPY,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetClientRect,
    GetWindowLongPtrW, PeekMessageW, RegisterClassW, SetLayeredWindowAttributes,
    SetWindowDisplayAffinity, SetWindowLongPtrW, SetWindowPos, ShowWindow, TranslateMessage,
    GWL_EXSTYLE, HWND_TOPMOST, LWA_ALPHA, MA_NOACTIVATE, MSG, PM_NOREMOVE, PM_REMOVE,
    SWP_NOACTIVATE, SWP_NOMOVE, SWP_NOSIZE, SW_HIDE, SW_SHOWNOACTIVATE, WDA_EXCLUDEFROMCAPTURE,
    WINDOW_EX_STYLE, WINDOW_STYLE, WM_ERASEBKGND, WM_MOUSEACTIVATE, WM_PAINT, WM_QUIT, WNDCLASSW,
    WS_EX_LAYERED, WS_EX_NOACTIVATE, WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_EX_TRANSPARENT,
    WS_POPUP,
};

use super::{OverlayStyle, WindowBackend, WindowHandle, WindowSpec};
use crate::error::WindowCreateError;
use crate::region::Region;

const CLASS_NAME: &str = "PoqOverlayWindow";

static REGISTER_CLASS: Once = Once::new();

thread_local! {
    /// Window to (memory DC, bitmap width, bitmap height), read by WM_PAINT
    static PAINT_SOURCES: RefCell<HashMap<isize, (isize, i32, i32)>> = RefCell::new(HashMap::new());
}

enum Command {
    Create(
        WindowSpec,
        mpsc::SyncSender<Result<WindowHandle, WindowCreateError>>,
    ),
    Geometry(WindowHandle, Region),
    Opacity(WindowHandle, f32),
    ClickThrough(WindowHandle, bool),
    Content(WindowHandle, RgbaImage),
    Show(WindowHandle),
    Hide(WindowHandle),
    Destroy(WindowHandle),
    Quit,
}

/// Overlay windows owned by a dedicated UI thread
pub struct Win32WindowBackend {
    tx: mpsc::Sender<Command>,
    join: Option<JoinHandle<()>>,
    excluded: Arc<AtomicBool>,
}

impl Win32WindowBackend {
    pub fn new() -> Result<Self, WindowCreateError> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<u32>(1);
        let excluded = Arc::new(AtomicBool::new(true));
        let thread_excluded = excluded.clone();
        let join = std::thread::Builder::new()
            .name("poq-overlay-ui".into())
            .spawn(move || run_ui_thread(rx, ready_tx, thread_excluded))
            .map_err(|e| WindowCreateError::Platform(e.to_string()))?;

        ready_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| WindowCreateError::Disconnected)?;
        log::info!("Overlay UI thread started");
        Ok(Self {
            tx,
            join: Some(join),
            excluded,
        })
    }

    fn send(&self, command: Command) {
        if self.tx.send(command).is_err() {
            log::warn!("Overlay UI thread is gone");
        }
    }
}

impl WindowBackend for Win32WindowBackend {
    fn create(&mut self, spec: &WindowSpec) -> Result<WindowHandle, WindowCreateError> {
        let (reply_tx, reply_rx) = mpsc::sync_channel(1);
        self.tx
            .send(Command::Create(spec.clone(), reply_tx))
            .map_err(|_| WindowCreateError::Disconnected)?;
        reply_rx
            .recv_timeout(Duration::from_secs(2))
            .map_err(|_| WindowCreateError::Disconnected)?
    }

    fn set_geometry(&mut self, handle: WindowHandle, region: Region) {
        self.send(Command::Geometry(handle, region));
    }

    fn set_opacity(&mut self, handle: WindowHandle, opacity: f32) {
        self.send(Command::Opacity(handle, opacity));
    }

    fn set_click_through(&mut self, handle: WindowHandle, click_through: bool) {
        self.send(Command::ClickThrough(handle, click_through));
    }

    fn set_content(&mut self, handle: WindowHandle, image: &RgbaImage) {
        self.send(Command::Content(handle, image.clone()));
    }

    fn show(&mut self, handle: WindowHandle) {
        self.send(Command::Show(handle));
    }

    fn hide(&mut self, handle: WindowHandle) {
        self.send(Command::Hide(handle));
    }

    fn destroy(&mut self, handle: WindowHandle) {
        self.send(Command::Destroy(handle));
    }

    fn excludes_from_capture(&self) -> bool {
        self.excluded.load(Ordering::Relaxed)
    }
}

impl Drop for Win32WindowBackend {
    fn drop(&mut self) {
        let _ = self.tx.send(Command::Quit);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

struct NativeWindow {
    hwnd: HWND,
    mem_dc: HDC,
    bitmap: HBITMAP,
    old_bitmap: HGDIOBJ,
}

impl NativeWindow {
    fn release(&mut self) {
        unsafe {
            if !self.bitmap.0.is_null() {
                SelectObject(self.mem_dc, self.old_bitmap);
                let _ = DeleteObject(self.bitmap);
            }
            let _ = DeleteDC(self.mem_dc);
            let _ = DestroyWindow(self.hwnd);
        }
        PAINT_SOURCES.with(|s| s.borrow_mut().remove(&(self.hwnd.0 as isize)));
    }
}

fn widestring(value: &str) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    std::ffi::OsStr::new(value)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn alpha(opacity: f32) -> u8 {
    (opacity.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn ex_style(click_through: bool) -> WINDOW_EX_STYLE {
    let base = WS_EX_LAYERED | WS_EX_TOPMOST | WS_EX_TOOLWINDOW | WS_EX_NOACTIVATE;
    if click_through {
        base | WS_EX_TRANSPARENT
    } else {
        base
    }
}

fn run_ui_thread(
    rx: mpsc::Receiver<Command>,
    ready: mpsc::SyncSender<u32>,
    excluded: Arc<AtomicBool>,
) {
    let mut msg = MSG::default();
    unsafe {
        let _ = PeekMessageW(&mut msg, None, 0, 0, PM_NOREMOVE);
    }
    let _ = ready.send(unsafe { GetCurrentThreadId() });

    let mut windows: HashMap<u64, NativeWindow> = HashMap::new();
    let mut next = 0u64;

    'outer: loop {
        unsafe {
            while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                if msg.message == WM_QUIT {
                    break 'outer;
                }
                let _ = TranslateMessage(&msg);
                DispatchMessageW(&msg);
            }
        }

        let command = match rx.recv_timeout(Duration::from_millis(8)) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match command {
            Command::Create(spec, reply) => {
                let result = create_window(&spec, &excluded).map(|window| {
                    next += 1;
                    windows.insert(next, window);
                    WindowHandle(next)
                });
                let _ = reply.send(result);
            }
            Command::Quit => break,
            Command::Destroy(handle) => {
                if let Some(mut window) = windows.remove(&handle.0) {
                    window.release();
                }
            }
            command => apply(&mut windows, command),
        }
    }

    for (_, mut window) in windows.drain() {
        window.release();
    }
    log::info!("Overlay UI thread stopped");
}

fn create_window(
    spec: &WindowSpec,
    excluded: &AtomicBool,
) -> Result<NativeWindow, WindowCreateError> {
    let class_name = widestring(CLASS_NAME);
    let hinstance = unsafe { GetModuleHandleW(PCWSTR::null()) }
        .map_err(|e| WindowCreateError::Platform(e.to_string()))?;

    REGISTER_CLASS.call_once(|| unsafe {
        let wc = WNDCLASSW {
            hInstance: hinstance.into(),
            lpszClassName: PCWSTR(class_name.as_ptr()),
            lpfnWndProc: Some(overlay_wndproc),
            ..Default::default()
        };
        let _ = RegisterClassW(&wc);
    });

    let click_through = spec.style == OverlayStyle::ClickThrough && spec.click_through;
    let region = spec.region;
    let hwnd = unsafe {
        CreateWindowExW(
            ex_style(click_through),
            PCWSTR(class_name.as_ptr()),
            PCWSTR::null(),
            WINDOW_STYLE(WS_POPUP.0),
            region.x,
            region.y,
            region.width as i32,
            region.height as i32,
            None,
            None,
            hinstance,
            None,
        )
    }
    .map_err(|e| WindowCreateError::Platform(e.to_string()))?;

    unsafe {
        if let Err(e) = SetLayeredWindowAttributes(hwnd, COLORREF(0), alpha(spec.opacity), LWA_ALPHA) {
            let _ = DestroyWindow(hwnd);
            return Err(WindowCreateError::Platform(e.to_string()));
        }
        if SetWindowDisplayAffinity(hwnd, WDA_EXCLUDEFROMCAPTURE).is_err() {
            if excluded.swap(false, Ordering::Relaxed) {
                log::warn!("Overlays cannot be excluded from capture, hiding them during scans");
            }
        }
    }

    let mem_dc = unsafe { CreateCompatibleDC(HDC::default()) };
    if mem_dc.0.is_null() {
        unsafe {
            let _ = DestroyWindow(hwnd);
        }
        return Err(WindowCreateError::Platform("CreateCompatibleDC failed".into()));
    }

    log::debug!("Created overlay window for {} at {}", spec.entity, region);
    Ok(NativeWindow {
        hwnd,
        mem_dc,
        bitmap: HBITMAP::default(),
        old_bitmap: HGDIOBJ::default(),
    })
}

fn apply(windows: &mut HashMap<u64, NativeWindow>, command: Command) {
    let handle = match &command {
        Command::Geometry(h, _)
        | Command::Opacity(h, _)
        | Command::ClickThrough(h, _)
        | Command::Content(h, _)
        | Command::Show(h)
        | Command::Hide(h)
        | Command::Destroy(h) => *h,
        Command::Create(..) | Command::Quit => return,
    };
    let Some(window) = windows.get_mut(&handle.0) else {
        log::warn!("Overlay command for unknown window {:?}", handle);
        return;
    };
    let hwnd = window.hwnd;

    unsafe {
        match command {
            Command::Geometry(_, region) => {
                let _ = SetWindowPos(
                    hwnd,
                    HWND_TOPMOST,
                    region.x,
                    region.y,
                    region.width as i32,
                    region.height as i32,
                    SWP_NOACTIVATE,
                );
                let _ = InvalidateRect(hwnd, None, false);
            }
            Command::Opacity(_, opacity) => {
                let _ = SetLayeredWindowAttributes(hwnd, COLORREF(0), alpha(opacity), LWA_ALPHA);
            }
            Command::ClickThrough(_, click_through) => {
                let style = GetWindowLongPtrW(hwnd, GWL_EXSTYLE);
                let transparent = WS_EX_TRANSPARENT.0 as isize;
                let updated = if click_through {
                    style | transparent
                } else {
                    style & !transparent
                };
                SetWindowLongPtrW(hwnd, GWL_EXSTYLE, updated);
            }
            Command::Content(_, image) => load_content(window, &image),
            Command::Show(_) => {
                let _ = ShowWindow(hwnd, SW_SHOWNOACTIVATE);
                let _ = SetWindowPos(
                    hwnd,
                    HWND_TOPMOST,
                    0,
                    0,
                    0,
                    0,
                    SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
                );
            }
            Command::Hide(_) => {
                let _ = ShowWindow(hwnd, SW_HIDE);
            }
            Command::Create(..) | Command::Destroy(_) | Command::Quit => {}
        }
    }
}

/// Copy an RGBA image into a fresh DIB selected into the window's memory DC
fn load_content(window: &mut NativeWindow, image: &RgbaImage) {
    let (width, height) = (image.width() as i32, image.height() as i32);
    if width == 0 || height == 0 {
        return;
    }
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

    let mut bits: *mut core::ffi::c_void = std::ptr::null_mut();
    let bitmap = match unsafe {
        CreateDIBSection(
            window.mem_dc,
            &bmi,
            DIB_RGB_COLORS,
            &mut bits,
            windows::Win32::Foundation::HANDLE::default(),
            0,
        )
    } {
        Ok(bitmap) if !bits.is_null() => bitmap,
        Ok(bitmap) => {
            unsafe {
                let _ = DeleteObject(bitmap);
            }
            return;
        }
        Err(e) => {
            log::warn!("CreateDIBSection failed: {}", e);
            return;
        }
    };

    let len = image.as_raw().len();
    let dst = unsafe { std::slice::from_raw_parts_mut(bits as *mut u8, len) };
    for (d, s) in dst.chunks_exact_mut(4).zip(image.as_raw().chunks_exact(4)) {
        d[0] = s[2];
        d[1] = s[1];
        d[2] = s[0];
        d[3] = s[3];
    }

    unsafe {
        let previous = SelectObject(window.mem_dc, bitmap);
        if window.bitmap.0.is_null() {
            window.old_bitmap = previous;
        } else {
            let _ = DeleteObject(window.bitmap);
        }
    }
    window.bitmap = bitmap;

    let key = window.hwnd.0 as isize;
    let source = (window.mem_dc.0 as isize, width, height);
    PAINT_SOURCES.with(|s| s.borrow_mut().insert(key, source));
    unsafe {
        let _ = InvalidateRect(window.hwnd, None, false);
    }
}

unsafe extern "system" fn overlay_wndproc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_MOUSEACTIVATE => LRESULT(MA_NOACTIVATE as isize),
        WM_ERASEBKGND => LRESULT(1),
        WM_PAINT => {
            let mut ps = PAINTSTRUCT::default();
            let hdc = BeginPaint(hwnd, &mut ps);
            let source = PAINT_SOURCES.with(|s| s.borrow().get(&(hwnd.0 as isize)).copied());
            if let (false, Some((mem_dc, width, height))) = (hdc.0.is_null(), source) {
                let mut client = RECT::default();
                if GetClientRect(hwnd, &mut client).is_ok() {
                    let _ = StretchBlt(
                        hdc,
                        0,
                        0,
                        client.right - client.left,
                        client.bottom - client.top,
                        HDC(mem_dc as *mut _),
                        0,
                        0,
                        width,
                        height,
                        SRCCOPY,
                    );
                }
            }
            let _ = EndPaint(hwnd, &ps);
            LRESULT(0)
        }
        _ => DefWindowProcW(hwnd, msg, wparam, lparam),
    }
}
