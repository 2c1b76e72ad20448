//! Win32 foreground window lookup

use windows::core::PWSTR;
use windows::Win32::Foundation::CloseHandle;
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_FORMAT,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::WindowsAndMessaging::{GetForegroundWindow, GetWindowThreadProcessId};

use super::{ForegroundProbe, ForegroundWindow};

/// Resolves the executable owning the foreground window
pub struct Win32ForegroundProbe;

impl ForegroundProbe for Win32ForegroundProbe {
    fn foreground(&self) -> Option<ForegroundWindow> {
        unsafe {
            let hwnd = GetForegroundWindow();
            if hwnd.0.is_null() {
                return None;
            }
            let mut pid = 0u32;
            let _ = GetWindowThreadProcessId(hwnd, Some(&mut pid));
            if pid == 0 {
                return None;
            }

            let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid).ok()?;
            let mut buffer = vec![0u16; 1024];
            let mut size = buffer.len() as u32;
            let queried = QueryFullProcessImageNameW(
                handle,
                PROCESS_NAME_FORMAT(0),
                PWSTR(buffer.as_mut_ptr()),
                &mut size,
            )
            .is_ok();
            let _ = CloseHandle(handle);
            if !queried || size == 0 {
                log::trace!("Could not query image name of pid {}", pid);
                return None;
            }

            let path = String::from_utf16_lossy(&buffer[..size as usize]);
            let name = path.rsplit('\\').next().unwrap_or(&path).to_string();
            Some(ForegroundWindow::new(name, pid))
        }
    }
}
