//! Quick craft, wheel key sequences and Ctrl click emulation

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::InputSynth;
use crate::context::EngineContext;
use crate::error::SynthError;
use crate::input::{Key, MouseButton};
use crate::region::Point;
use crate::state::Feature;

/// Why an action was not sent
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    /// The foreground window is not an allowed game window
    Focus,
    FeatureDisabled,
    /// A wheel sequence is still being sent
    InFlight,
    /// Click emulation is already running
    AlreadyActive,
    /// The clicked entity is not in the library
    UnknownEntity,
    /// The configured key sequence does not parse
    InvalidSequence,
}

impl fmt::Display for SuppressReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SuppressReason::Focus => "focus",
            SuppressReason::FeatureDisabled => "feature disabled",
            SuppressReason::InFlight => "sequence in flight",
            SuppressReason::AlreadyActive => "already active",
            SuppressReason::UnknownEntity => "unknown entity",
            SuppressReason::InvalidSequence => "invalid key sequence",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Dispatched,
    Suppressed(SuppressReason),
}

impl DispatchOutcome {
    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched)
    }
}

struct ClickEmulation {
    stop: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

/// Turns classified input into synthetic input.
///
/// Focus is checked right before anything is sent, and again before each
/// key of a sequence and each emulated click.
pub struct ActionDispatcher {
    context: Arc<EngineContext>,
    synth: Arc<dyn InputSynth>,
    /// Shared with the wheel burst filter
    wheel_in_flight: Arc<AtomicBool>,
    wheel_worker: Option<JoinHandle<()>>,
    clicker: Option<ClickEmulation>,
}

impl ActionDispatcher {
    pub fn new(context: Arc<EngineContext>, synth: Arc<dyn InputSynth>) -> Self {
        Self {
            context,
            synth,
            wheel_in_flight: Arc::new(AtomicBool::new(false)),
            wheel_worker: None,
            clicker: None,
        }
    }

    /// Flag raised while a wheel sequence is being sent
    pub fn wheel_in_flight(&self) -> Arc<AtomicBool> {
        self.wheel_in_flight.clone()
    }

    fn gate(&self, feature: Feature) -> Option<SuppressReason> {
        if !self.context.state().feature_enabled(feature) {
            return Some(SuppressReason::FeatureDisabled);
        }
        if !self.context.check_focus() {
            return Some(SuppressReason::Focus);
        }
        None
    }

    /// Right-click the currency in the stash, then left-click `target`
    pub fn quick_craft(
        &self,
        currency_id: &str,
        target: Point,
    ) -> Result<DispatchOutcome, SynthError> {
        let library = self.context.library();
        let currency = match library.currency(currency_id) {
            Some(currency) if currency.active => currency,
            _ => return Ok(DispatchOutcome::Suppressed(SuppressReason::UnknownEntity)),
        };
        if let Some(reason) = self.gate(Feature::QuickCraft) {
            log::debug!("Quick craft `{}` suppressed: {}", currency_id, reason);
            return Ok(DispatchOutcome::Suppressed(reason));
        }

        let delay = Duration::from_millis(self.context.settings().actions.quick_craft_delay_ms);
        self.synth.click(MouseButton::Right, currency.source_point())?;
        thread::sleep(delay);
        self.synth.click(MouseButton::Left, target)?;
        log::info!("Quick craft `{}` applied at {}", currency_id, target);
        Ok(DispatchOutcome::Dispatched)
    }

    /// Send the configured key sequence on a worker thread
    pub fn wheel_sequence(&mut self) -> Result<DispatchOutcome, SynthError> {
        if self.wheel_in_flight.load(Ordering::SeqCst) {
            return Ok(DispatchOutcome::Suppressed(SuppressReason::InFlight));
        }
        if let Some(reason) = self.gate(Feature::WheelKeys) {
            log::debug!("Wheel sequence suppressed: {}", reason);
            return Ok(DispatchOutcome::Suppressed(reason));
        }
        let settings = self.context.settings().actions;
        let keys = match settings.key_sequence() {
            Ok(keys) if !keys.is_empty() => keys,
            Ok(_) => return Ok(DispatchOutcome::Suppressed(SuppressReason::InvalidSequence)),
            Err(e) => {
                log::warn!("Wheel sequence not sent: {}", e);
                return Ok(DispatchOutcome::Suppressed(SuppressReason::InvalidSequence));
            }
        };
        if let Some(handle) = self.wheel_worker.take() {
            let _ = handle.join();
        }

        self.wheel_in_flight.store(true, Ordering::SeqCst);
        self.context.state().set_wheel_in_flight(true);
        let context = self.context.clone();
        let synth = self.synth.clone();
        let in_flight = self.wheel_in_flight.clone();
        let delay = Duration::from_millis(settings.key_delay_ms);
        let spawned = thread::Builder::new()
            .name("poq-wheel-keys".to_string())
            .spawn(move || {
                send_sequence(&context, synth.as_ref(), &keys, delay);
                in_flight.store(false, Ordering::SeqCst);
                context.state().set_wheel_in_flight(false);
            });
        match spawned {
            Ok(handle) => {
                self.wheel_worker = Some(handle);
                Ok(DispatchOutcome::Dispatched)
            }
            Err(e) => {
                self.wheel_in_flight.store(false, Ordering::SeqCst);
                self.context.state().set_wheel_in_flight(false);
                Err(SynthError::Platform(e.to_string()))
            }
        }
    }

    /// Start emitting left clicks at the cursor until Ctrl is released
    pub fn start_click_emulation(&mut self) -> Result<DispatchOutcome, SynthError> {
        if let Some(clicker) = &self.clicker {
            if !clicker.handle.is_finished() {
                return Ok(DispatchOutcome::Suppressed(SuppressReason::AlreadyActive));
            }
            self.stop_click_emulation();
        }
        if let Some(reason) = self.gate(Feature::DoubleCtrl) {
            log::debug!("Click emulation suppressed: {}", reason);
            return Ok(DispatchOutcome::Suppressed(reason));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let interval = Duration::from_millis(
            self.context.settings().actions.click_interval_ms.max(1),
        );
        let context = self.context.clone();
        let synth = self.synth.clone();
        let flag = stop.clone();
        self.context.state().set_click_emulation(true);
        let spawned = thread::Builder::new()
            .name("poq-click-emulation".to_string())
            .spawn(move || {
                emulate_clicks(&context, synth.as_ref(), &flag, interval);
                context.state().set_click_emulation(false);
            });
        match spawned {
            Ok(handle) => {
                log::info!("Click emulation started");
                self.clicker = Some(ClickEmulation { stop, handle });
                Ok(DispatchOutcome::Dispatched)
            }
            Err(e) => {
                self.context.state().set_click_emulation(false);
                Err(SynthError::Platform(e.to_string()))
            }
        }
    }

    /// Stop click emulation and wait for its thread
    pub fn stop_click_emulation(&mut self) {
        if let Some(clicker) = self.clicker.take() {
            clicker.stop.store(true, Ordering::SeqCst);
            let _ = clicker.handle.join();
            self.context.state().set_click_emulation(false);
            log::info!("Click emulation stopped");
        }
    }

    pub fn click_emulation_active(&self) -> bool {
        self.clicker
            .as_ref()
            .map(|c| !c.handle.is_finished())
            .unwrap_or(false)
    }

    /// Wait for a pending wheel sequence
    pub fn wait_idle(&mut self) {
        if let Some(handle) = self.wheel_worker.take() {
            let _ = handle.join();
        }
    }

    pub fn shutdown(&mut self) {
        self.stop_click_emulation();
        self.wait_idle();
    }
}

impl Drop for ActionDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn send_sequence(context: &EngineContext, synth: &dyn InputSynth, keys: &[Key], delay: Duration) {
    for (i, key) in keys.iter().enumerate() {
        if i > 0 {
            thread::sleep(delay);
        }
        if !context.state().feature_enabled(Feature::WheelKeys) || !context.check_focus() {
            log::debug!("Wheel sequence aborted after {} keys", i);
            return;
        }
        if let Err(e) = synth.tap_key(*key) {
            log::warn!("Wheel sequence key {:?} failed: {}", key, e);
            return;
        }
    }
}

fn emulate_clicks(
    context: &EngineContext,
    synth: &dyn InputSynth,
    stop: &AtomicBool,
    interval: Duration,
) {
    while !stop.load(Ordering::SeqCst) {
        if !context.state().feature_enabled(Feature::DoubleCtrl) || !context.check_focus() {
            break;
        }
        // a Ctrl release lost before reaching the dispatcher
        if synth.key_held(Key::Ctrl) == Some(false) {
            log::debug!("Ctrl no longer held, ending click emulation");
            break;
        }
        let Some(point) = synth.cursor_position() else {
            break;
        };
        if let Err(e) = synth.click(MouseButton::Left, point) {
            log::warn!("Emulated click failed: {}", e);
            break;
        }
        let deadline = Instant::now() + interval;
        while !stop.load(Ordering::SeqCst) {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep((deadline - now).min(Duration::from_millis(5)));
        }
    }
}
