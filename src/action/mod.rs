//! Synthetic input and the actions built on it

mod dispatcher;
#[cfg(target_os = "windows")]
mod win32;

pub use dispatcher::{ActionDispatcher, DispatchOutcome, SuppressReason};
#[cfg(target_os = "windows")]
pub use win32::Win32Synth;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;

use crate::error::SynthError;
use crate::input::{Key, MouseButton};
use crate::region::Point;

/// Injects mouse and keyboard input
pub trait InputSynth: Send + Sync {
    fn cursor_position(&self) -> Option<Point>;

    /// Press and release `button` at `at`
    fn click(&self, button: MouseButton, at: Point) -> Result<(), SynthError>;

    /// Press and release `key`
    fn tap_key(&self, key: Key) -> Result<(), SynthError>;

    /// Physical state of `key`, `None` when it cannot be read
    fn key_held(&self, _key: Key) -> Option<bool> {
        None
    }
}

/// One synthesized action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SynthAction {
    Click { button: MouseButton, at: Point },
    Key(Key),
}

/// Records actions instead of sending them
#[derive(Default)]
pub struct RecordingSynth {
    actions: Mutex<Vec<(SynthAction, Instant)>>,
    cursor: Mutex<Point>,
    held: Mutex<HashMap<Key, bool>>,
}

impl RecordingSynth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_cursor(&self, point: Point) {
        *self.cursor.lock() = point;
    }

    /// Report `key` as physically held or released
    pub fn set_key_held(&self, key: Key, held: bool) {
        self.held.lock().insert(key, held);
    }

    pub fn actions(&self) -> Vec<SynthAction> {
        self.actions.lock().iter().map(|(a, _)| *a).collect()
    }

    /// Actions with the time they were sent
    pub fn timed_actions(&self) -> Vec<(SynthAction, Instant)> {
        self.actions.lock().clone()
    }

    pub fn clear(&self) {
        self.actions.lock().clear();
    }
}

impl InputSynth for RecordingSynth {
    fn cursor_position(&self) -> Option<Point> {
        Some(*self.cursor.lock())
    }

    fn click(&self, button: MouseButton, at: Point) -> Result<(), SynthError> {
        *self.cursor.lock() = at;
        self.actions
            .lock()
            .push((SynthAction::Click { button, at }, Instant::now()));
        Ok(())
    }

    fn tap_key(&self, key: Key) -> Result<(), SynthError> {
        self.actions
            .lock()
            .push((SynthAction::Key(key), Instant::now()));
        Ok(())
    }

    fn key_held(&self, key: Key) -> Option<bool> {
        self.held.lock().get(&key).copied()
    }
}

/// Input synthesis of the running platform
pub fn native_synth() -> Result<Box<dyn InputSynth>, SynthError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(Win32Synth::new()))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(SynthError::Unsupported)
    }
}
