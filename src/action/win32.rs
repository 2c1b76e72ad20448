//! SendInput based synthesis

use windows::Win32::Foundation::POINT;
use windows::Win32::UI::Input::KeyboardAndMouse::{
    GetAsyncKeyState, SendInput, INPUT, INPUT_0, INPUT_KEYBOARD, INPUT_MOUSE, KEYBDINPUT, KEYBD_EVENT_FLAGS,
    KEYEVENTF_KEYUP, MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP, MOUSEEVENTF_MIDDLEDOWN,
    MOUSEEVENTF_MIDDLEUP, MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP, MOUSEINPUT,
    MOUSE_EVENT_FLAGS, VIRTUAL_KEY,
};
use windows::Win32::UI::WindowsAndMessaging::{GetCursorPos, SetCursorPos};

use super::InputSynth;
use crate::error::SynthError;
use crate::input::{Key, MouseButton};
use crate::region::Point;

fn mouse(flags: MOUSE_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_MOUSE,
        Anonymous: INPUT_0 {
            mi: MOUSEINPUT {
                dx: 0,
                dy: 0,
                mouseData: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn keyboard(vk: u16, flags: KEYBD_EVENT_FLAGS) -> INPUT {
    INPUT {
        r#type: INPUT_KEYBOARD,
        Anonymous: INPUT_0 {
            ki: KEYBDINPUT {
                wVk: VIRTUAL_KEY(vk),
                wScan: 0,
                dwFlags: flags,
                time: 0,
                dwExtraInfo: 0,
            },
        },
    }
}

fn send(inputs: &[INPUT]) -> Result<(), SynthError> {
    let sent = unsafe { SendInput(inputs, std::mem::size_of::<INPUT>() as i32) };
    if sent as usize != inputs.len() {
        return Err(SynthError::Partial {
            sent,
            expected: inputs.len() as u32,
        });
    }
    Ok(())
}

/// Win32 `SendInput` synthesizer. Injected events carry the injected flag,
/// which the hooks use to ignore them.
#[derive(Debug, Default)]
pub struct Win32Synth;

impl Win32Synth {
    pub fn new() -> Self {
        Self
    }
}

impl InputSynth for Win32Synth {
    fn cursor_position(&self) -> Option<Point> {
        let mut point = POINT::default();
        unsafe { GetCursorPos(&mut point) }
            .ok()
            .map(|_| Point::new(point.x, point.y))
    }

    fn click(&self, button: MouseButton, at: Point) -> Result<(), SynthError> {
        unsafe { SetCursorPos(at.x, at.y) }.map_err(|e| SynthError::Platform(e.to_string()))?;
        let (down, up) = match button {
            MouseButton::Left => (MOUSEEVENTF_LEFTDOWN, MOUSEEVENTF_LEFTUP),
            MouseButton::Right => (MOUSEEVENTF_RIGHTDOWN, MOUSEEVENTF_RIGHTUP),
            MouseButton::Middle => (MOUSEEVENTF_MIDDLEDOWN, MOUSEEVENTF_MIDDLEUP),
        };
        send(&[mouse(down), mouse(up)])
    }

    fn tap_key(&self, key: Key) -> Result<(), SynthError> {
        let vk = key.vk();
        send(&[
            keyboard(vk, KEYBD_EVENT_FLAGS(0)),
            keyboard(vk, KEYEVENTF_KEYUP),
        ])
    }

    fn key_held(&self, key: Key) -> Option<bool> {
        Some(unsafe { GetAsyncKeyState(key.vk() as i32) } < 0)
    }
}
