//! PathOfQuality overlay core
//!
//! Screen template scanning, non-activating overlay windows and low-level
//! input automation for a game overlay. Scanning runs on its own thread;
//! hook events are classified and dispatched on another. Every platform
//! service sits behind a trait with an in-memory implementation, so the
//! whole engine runs headless in tests.
//!
//! This crate can be used as:
//! - A Rust library (rlib) for direct integration
//! - A dynamic library (cdylib) loaded by the configuration UI

pub mod action;
pub mod capture;
pub mod context;
pub mod engine;
pub mod error;
pub mod focus;
pub mod input;
pub mod library;
pub mod matcher;
pub mod overlay;
pub mod region;
pub mod scan;
pub mod settings;
pub mod state;

#[cfg(feature = "ffi")]
pub mod ffi;

// Re-export commonly used types
pub use action::{ActionDispatcher, DispatchOutcome, InputSynth, RecordingSynth, SuppressReason};
pub use capture::{CaptureSource, Frame, ImageDesktop};
pub use context::EngineContext;
pub use engine::{Engine, EnginePlatform};
pub use error::{Error, Result};
pub use focus::{FocusPolicy, ForegroundProbe, StaticProbe};
pub use input::{InputEvent, Key, MockHookBackend};
pub use library::Library;
pub use matcher::{MatchMethod, Matcher, Template, TemplateMatcher};
pub use overlay::{EntityId, HeadlessBackend, OverlayManager, WindowBackend};
pub use region::{Point, Region};
pub use scan::{ScanLoop, ScanReport, ScanScheduler};
pub use settings::Settings;
pub use state::{Feature, FeatureFlags, RuntimeState, StateStore};
