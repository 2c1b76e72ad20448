//! WH_KEYBOARD_LL / WH_MOUSE_LL hooks
//!
//! Each hook lives on its own thread with a message loop. The hook procs
//! only translate the message and `try_send` it; they never wait on a lock.

use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::Duration;

use windows::Win32::Foundation::{LPARAM, LRESULT, WPARAM};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::System::Threading::GetCurrentThreadId;
use windows::Win32::UI::WindowsAndMessaging::{
    CallNextHookEx, DispatchMessageW, GetMessageW, PeekMessageW, PostThreadMessageW,
    SetWindowsHookExW, TranslateMessage, UnhookWindowsHookEx, HC_ACTION, HHOOK, KBDLLHOOKSTRUCT,
    KBDLLHOOKSTRUCT_FLAGS, MSG, MSLLHOOKSTRUCT, PM_NOREMOVE, WH_KEYBOARD_LL, WH_MOUSE_LL,
    WINDOWS_HOOK_ID, WM_KEYDOWN, WM_KEYUP, WM_LBUTTONDOWN, WM_LBUTTONUP, WM_MBUTTONDOWN,
    WM_MBUTTONUP, WM_MOUSEMOVE, WM_MOUSEWHEEL, WM_QUIT, WM_RBUTTONDOWN, WM_RBUTTONUP,
    WM_SYSKEYDOWN, WM_SYSKEYUP,
};

use super::{
    ButtonPhase, HookBackend, HookKind, HookSink, Key, MouseButton, RawInput, RawKind,
    WheelDirection,
};
use crate::error::HookInstallError;
use crate::region::Point;

static KEYBOARD_SINK: Lazy<RwLock<Option<HookSink>>> = Lazy::new(|| RwLock::new(None));
static MOUSE_SINK: Lazy<RwLock<Option<HookSink>>> = Lazy::new(|| RwLock::new(None));

const LLKHF_INJECTED: u32 = 0x10;
const LLMHF_INJECTED: u32 = 0x1;
const LLMHF_LOWER_IL_INJECTED: u32 = 0x2;

fn sink_for(kind: HookKind) -> &'static RwLock<Option<HookSink>> {
    match kind {
        HookKind::Keyboard => &KEYBOARD_SINK,
        HookKind::Mouse => &MOUSE_SINK,
    }
}

/// Offer without blocking the hook thread
fn offer(kind: HookKind, input: RawInput) {
    if let Some(guard) = sink_for(kind).try_read() {
        if let Some(sink) = guard.as_ref() {
            sink.offer(input);
        }
    }
}

struct HookThread {
    thread_id: u32,
    join: JoinHandle<()>,
}

/// Low-level hooks on dedicated message-loop threads
#[derive(Default)]
pub struct Win32HookBackend {
    threads: HashMap<HookKind, HookThread>,
}

impl Win32HookBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HookBackend for Win32HookBackend {
    fn install(&mut self, kind: HookKind, sink: HookSink) -> Result<(), HookInstallError> {
        if self.threads.contains_key(&kind) {
            return Err(HookInstallError::AlreadyInstalled(kind));
        }
        *sink_for(kind).write() = Some(sink);

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32, String>>(1);
        let join = std::thread::Builder::new()
            .name(format!("poq-{}-hook", kind))
            .spawn(move || run_hook_thread(kind, ready_tx))
            .map_err(|e| HookInstallError::Denied {
                kind,
                reason: e.to_string(),
            })?;

        match ready_rx.recv_timeout(Duration::from_secs(2)) {
            Ok(Ok(thread_id)) => {
                log::info!("Installed {} hook", kind);
                self.threads.insert(kind, HookThread { thread_id, join });
                Ok(())
            }
            Ok(Err(reason)) => {
                *sink_for(kind).write() = None;
                let _ = join.join();
                Err(HookInstallError::Denied { kind, reason })
            }
            Err(_) => {
                *sink_for(kind).write() = None;
                Err(HookInstallError::Timeout(kind))
            }
        }
    }

    fn uninstall(&mut self, kind: HookKind) {
        if let Some(thread) = self.threads.remove(&kind) {
            unsafe {
                let _ = PostThreadMessageW(thread.thread_id, WM_QUIT, WPARAM(0), LPARAM(0));
            }
            let _ = thread.join.join();
            log::info!("Removed {} hook", kind);
        }
        *sink_for(kind).write() = None;
    }

    fn is_installed(&self, kind: HookKind) -> bool {
        self.threads.contains_key(&kind)
    }
}

impl Drop for Win32HookBackend {
    fn drop(&mut self) {
        for kind in [HookKind::Keyboard, HookKind::Mouse] {
            self.uninstall(kind);
        }
    }
}

fn run_hook_thread(kind: HookKind, ready: mpsc::SyncSender<Result<u32, String>>) {
    let mut msg = MSG::default();
    unsafe {
        // Creates the thread message queue before anyone posts to it
        let _ = PeekMessageW(&mut msg, None, 0, 0, PM_NOREMOVE);
    }
    let thread_id = unsafe { GetCurrentThreadId() };

    let hmodule = match unsafe { GetModuleHandleW(None) } {
        Ok(h) => h,
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };

    let (id, proc_fn): (WINDOWS_HOOK_ID, _) = match kind {
        HookKind::Keyboard => (
            WH_KEYBOARD_LL,
            keyboard_proc as unsafe extern "system" fn(i32, WPARAM, LPARAM) -> LRESULT,
        ),
        HookKind::Mouse => (WH_MOUSE_LL, mouse_proc as _),
    };

    let hook = match unsafe { SetWindowsHookExW(id, Some(proc_fn), hmodule, 0) } {
        Ok(h) if !h.0.is_null() => h,
        Ok(_) => {
            let _ = ready.send(Err(windows::core::Error::from_win32().to_string()));
            return;
        }
        Err(e) => {
            let _ = ready.send(Err(e.to_string()));
            return;
        }
    };
    let _ = ready.send(Ok(thread_id));

    loop {
        let r = unsafe { GetMessageW(&mut msg, None, 0, 0) };
        if r.0 == 0 || r.0 == -1 {
            break;
        }
        unsafe {
            let _ = TranslateMessage(&msg);
            DispatchMessageW(&msg);
        }
    }

    unsafe {
        let _ = UnhookWindowsHookEx(hook);
    }
}

unsafe extern "system" fn keyboard_proc(code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32 {
        let info = &*(l_param.0 as *const KBDLLHOOKSTRUCT);
        let key = Key::from_vk(info.vkCode);
        let kind = match w_param.0 as u32 {
            WM_KEYDOWN | WM_SYSKEYDOWN => Some(RawKind::KeyDown(key)),
            WM_KEYUP | WM_SYSKEYUP => Some(RawKind::KeyUp(key)),
            _ => None,
        };
        if let Some(kind) = kind {
            let mut input = RawInput::now(kind);
            input.injected =
                (info.flags & KBDLLHOOKSTRUCT_FLAGS(LLKHF_INJECTED)) != KBDLLHOOKSTRUCT_FLAGS(0);
            offer(HookKind::Keyboard, input);
        }
    }
    CallNextHookEx(HHOOK(std::ptr::null_mut()), code, w_param, l_param)
}

unsafe extern "system" fn mouse_proc(code: i32, w_param: WPARAM, l_param: LPARAM) -> LRESULT {
    if code == HC_ACTION as i32 {
        let info = &*(l_param.0 as *const MSLLHOOKSTRUCT);
        let point = Point::new(info.pt.x, info.pt.y);
        let button = |button, phase| Some(RawKind::MouseButton { button, phase, point });
        let kind = match w_param.0 as u32 {
            WM_MOUSEMOVE => Some(RawKind::MouseMove(point)),
            WM_LBUTTONDOWN => button(MouseButton::Left, ButtonPhase::Down),
            WM_LBUTTONUP => button(MouseButton::Left, ButtonPhase::Up),
            WM_RBUTTONDOWN => button(MouseButton::Right, ButtonPhase::Down),
            WM_RBUTTONUP => button(MouseButton::Right, ButtonPhase::Up),
            WM_MBUTTONDOWN => button(MouseButton::Middle, ButtonPhase::Down),
            WM_MBUTTONUP => button(MouseButton::Middle, ButtonPhase::Up),
            WM_MOUSEWHEEL => {
                // High word holds the signed wheel delta
                let delta = ((info.mouseData >> 16) & 0xFFFF) as i16;
                WheelDirection::from_delta(delta)
                    .map(|direction| RawKind::MouseWheel { direction, point })
            }
            _ => None,
        };
        if let Some(kind) = kind {
            let mut input = RawInput::now(kind);
            input.injected = info.flags & (LLMHF_INJECTED | LLMHF_LOWER_IL_INJECTED) != 0;
            offer(HookKind::Mouse, input);
        }
    }
    CallNextHookEx(HHOOK(std::ptr::null_mut()), code, w_param, l_param)
}
