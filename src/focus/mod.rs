//! Focus gating
//!
//! Synthetic input is only produced while an allowed process owns the
//! foreground window. The foreground is read fresh on every check.

#[cfg(target_os = "windows")]
mod foreground;

#[cfg(target_os = "windows")]
pub use foreground::Win32ForegroundProbe;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::settings::FocusSettings;

/// Owner of the current foreground window
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForegroundWindow {
    /// Executable file name, e.g. `PathOfExile.exe`
    pub process_name: String,
    pub pid: u32,
}

impl ForegroundWindow {
    pub fn new(process_name: impl Into<String>, pid: u32) -> Self {
        Self {
            process_name: process_name.into(),
            pid,
        }
    }
}

/// Reads the current foreground window
pub trait ForegroundProbe: Send + Sync {
    /// `None` when no window has focus or its owner cannot be inspected
    fn foreground(&self) -> Option<ForegroundWindow>;

    /// Process id of this application
    fn self_pid(&self) -> u32 {
        std::process::id()
    }
}

/// Result of one focus check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FocusState {
    pub foreground_process: Option<String>,
    pub in_allow_list: bool,
    pub self_focused: bool,
}

/// Allow-list decision, built from the current focus settings
#[derive(Debug, Clone)]
pub struct FocusPolicy {
    enforce: bool,
    allow_list: Vec<String>,
    allow_self: bool,
}

impl FocusPolicy {
    pub fn new(settings: &FocusSettings) -> Self {
        Self {
            enforce: settings.enforce,
            allow_list: settings
                .allow_list
                .iter()
                .map(|name| normalize_process_name(name))
                .filter(|name| !name.is_empty())
                .collect(),
            allow_self: settings.allow_self,
        }
    }

    /// Allow everything
    pub fn permissive() -> Self {
        Self {
            enforce: false,
            allow_list: Vec::new(),
            allow_self: true,
        }
    }

    /// Case-insensitive, with or without the `.exe` suffix
    pub fn is_allowed_process(&self, name: &str) -> bool {
        let name = normalize_process_name(name);
        self.allow_list.iter().any(|allowed| *allowed == name)
    }

    /// Read the foreground and compute a fresh [`FocusState`]
    pub fn observe(&self, probe: &dyn ForegroundProbe) -> FocusState {
        match probe.foreground() {
            Some(window) => FocusState {
                in_allow_list: self.is_allowed_process(&window.process_name),
                self_focused: window.pid == probe.self_pid(),
                foreground_process: Some(window.process_name),
            },
            None => FocusState {
                foreground_process: None,
                in_allow_list: false,
                self_focused: false,
            },
        }
    }

    pub fn permits(&self, state: &FocusState) -> bool {
        !self.enforce || state.in_allow_list || (self.allow_self && state.self_focused)
    }
}

fn normalize_process_name(name: &str) -> String {
    let name = name.trim();
    let file = name.rsplit(['\\', '/']).next().unwrap_or(name);
    let lower = file.to_ascii_lowercase();
    lower
        .strip_suffix(".exe")
        .map(str::to_string)
        .unwrap_or(lower)
}

/// Probe returning a settable foreground window
#[derive(Default)]
pub struct StaticProbe {
    window: Mutex<Option<ForegroundWindow>>,
    self_pid: u32,
}

impl StaticProbe {
    pub fn new(window: Option<ForegroundWindow>) -> Self {
        Self {
            window: Mutex::new(window),
            self_pid: std::process::id(),
        }
    }

    /// Probe reporting `process_name` in the foreground, owned by another process
    pub fn focused(process_name: &str) -> Self {
        Self::new(Some(ForegroundWindow::new(process_name, u32::MAX)))
    }

    pub fn with_self_pid(mut self, pid: u32) -> Self {
        self.self_pid = pid;
        self
    }

    pub fn set(&self, window: Option<ForegroundWindow>) {
        *self.window.lock() = window;
    }
}

impl ForegroundProbe for StaticProbe {
    fn foreground(&self) -> Option<ForegroundWindow> {
        self.window.lock().clone()
    }

    fn self_pid(&self) -> u32 {
        self.self_pid
    }
}

/// Foreground probe of the running platform, `None` where unsupported
pub fn native_probe() -> Option<Box<dyn ForegroundProbe>> {
    #[cfg(target_os = "windows")]
    {
        Some(Box::new(Win32ForegroundProbe))
    }
    #[cfg(not(target_os = "windows"))]
    {
        None
    }
}
