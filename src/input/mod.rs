//! Low-level input hooks and event classification
//!
//! OS hook callbacks only convert the raw message into a [`RawInput`] and
//! offer it to a bounded [`HookQueue`]. Classification into
//! [`InputEvent`]s happens on the dispatcher thread.

mod classify;
mod hooks;
mod keys;
mod queue;
#[cfg(target_os = "windows")]
mod win32;

pub use classify::{
    Classifier, DoubleTapDetector, HotkeyDebouncer, InputEvent, WheelBurstFilter,
};
pub use hooks::{native_hooks, HookBackend, MockHookBackend};
pub use keys::Key;
pub use queue::{HookQueue, HookSink};
#[cfg(target_os = "windows")]
pub use win32::Win32HookBackend;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;

use crate::region::Point;

/// Which low-level hook an event or error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HookKind {
    Keyboard,
    Mouse,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookKind::Keyboard => write!(f, "keyboard"),
            HookKind::Mouse => write!(f, "mouse"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ButtonPhase {
    Down,
    Up,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WheelDirection {
    /// Towards the user
    Down,
    Up,
}

impl WheelDirection {
    /// Sign of a raw wheel delta, `None` for zero
    pub fn from_delta(delta: i16) -> Option<Self> {
        match delta {
            d if d < 0 => Some(WheelDirection::Down),
            d if d > 0 => Some(WheelDirection::Up),
            _ => None,
        }
    }

    /// +1 for up, -1 for down
    pub fn notches(self) -> i32 {
        match self {
            WheelDirection::Up => 1,
            WheelDirection::Down => -1,
        }
    }
}

/// Unclassified hook event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    KeyDown(Key),
    KeyUp(Key),
    MouseWheel {
        direction: WheelDirection,
        point: Point,
    },
    MouseMove(Point),
    MouseButton {
        button: MouseButton,
        phase: ButtonPhase,
        point: Point,
    },
}

/// Hook event stamped with the monotonic clock on arrival
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawInput {
    pub kind: RawKind,
    pub at: Instant,
    /// Produced by SendInput rather than a physical device
    pub injected: bool,
}

impl RawInput {
    pub fn new(kind: RawKind, at: Instant) -> Self {
        Self {
            kind,
            at,
            injected: false,
        }
    }

    pub fn now(kind: RawKind) -> Self {
        Self::new(kind, Instant::now())
    }

    pub fn injected(mut self) -> Self {
        self.injected = true;
        self
    }

    /// Hook that delivers this kind of event
    pub fn hook(&self) -> HookKind {
        match self.kind {
            RawKind::KeyDown(_) | RawKind::KeyUp(_) => HookKind::Keyboard,
            _ => HookKind::Mouse,
        }
    }
}
