//! Engine lifecycle
//!
//! Wires the capture source, overlay windows, hooks and input synthesis
//! together and runs the scan thread and the dispatch thread.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::action::{native_synth, ActionDispatcher, InputSynth, RecordingSynth};
use crate::capture::{native_capture, CaptureSource, ShieldedCapture};
use crate::context::EngineContext;
use crate::error::{Error, Result};
use crate::focus::{native_probe, ForegroundProbe, StaticProbe};
use crate::input::{
    native_hooks, Classifier, HookBackend, HookKind, HookQueue, InputEvent, MockHookBackend,
};
use crate::library::Library;
use crate::matcher::Matcher;
use crate::overlay::{
    native_windows, EntityId, HeadlessBackend, OverlayManager, OverlayShield, WindowBackend,
};
use crate::region::Region;
use crate::scan::{ScanLoop, ScanReport, ScanScheduler, TemplateLoader};
use crate::settings::Settings;
use crate::state::{Feature, RuntimeState};

/// Platform services the engine drives
pub struct EnginePlatform {
    pub capture: Box<dyn CaptureSource>,
    pub windows: Box<dyn WindowBackend>,
    pub hooks: Box<dyn HookBackend>,
    pub synth: Arc<dyn InputSynth>,
    pub probe: Arc<dyn ForegroundProbe>,
}

impl EnginePlatform {
    /// Screen capture, layered windows, low-level hooks and `SendInput`
    pub fn native() -> Result<Self> {
        let probe: Arc<dyn ForegroundProbe> = match native_probe() {
            Some(probe) => Arc::from(probe),
            None => {
                log::warn!("No foreground probe on this platform, actions stay suppressed");
                Arc::new(StaticProbe::default())
            }
        };
        Ok(Self {
            capture: native_capture()?,
            windows: native_windows()?,
            hooks: native_hooks()?,
            synth: Arc::from(native_synth()?),
            probe,
        })
    }

    /// In-memory windows, hooks and synthesis around `capture`
    pub fn headless(capture: Box<dyn CaptureSource>, probe: Arc<dyn ForegroundProbe>) -> Self {
        Self {
            capture,
            windows: Box::new(HeadlessBackend::new()),
            hooks: Box::new(MockHookBackend::new()),
            synth: Arc::new(RecordingSynth::new()),
            probe,
        }
    }
}

/// Features that stop working without a hook
fn hook_dependents(kind: HookKind) -> &'static [Feature] {
    match kind {
        HookKind::Keyboard => &[Feature::DoubleCtrl],
        HookKind::Mouse => &[Feature::QuickCraft, Feature::WheelKeys],
    }
}

/// The overlay core: scanning, overlays and input automation
pub struct Engine {
    context: Arc<EngineContext>,
    overlays: Arc<Mutex<OverlayManager>>,
    hooks: Box<dyn HookBackend>,
    synth: Arc<dyn InputSynth>,
    /// Idle scan loop, handed to the scheduler while running
    scan: Option<ScanLoop>,
    scheduler: ScanScheduler,
    running: Arc<AtomicBool>,
    dispatch: Option<JoinHandle<()>>,
}

impl Engine {
    pub fn new(settings: Settings, library: Library, platform: EnginePlatform) -> Result<Self> {
        settings.validate()?;
        library.validate()?;

        let desktop = platform.capture.bounds();
        let overlay_settings = settings.overlay.clone();
        let context = Arc::new(EngineContext::new(settings, library, platform.probe));
        let overlays = Arc::new(Mutex::new(OverlayManager::new(
            platform.windows,
            overlay_settings,
            desktop,
            context.state().clone(),
        )));
        sync_overlays(&context, &overlays);

        let shield = Arc::new(OverlayShield::new(overlays.clone()));
        let capture = ShieldedCapture::new(platform.capture, shield);
        let scan = ScanLoop::new(context.clone(), Box::new(capture));

        log::info!(
            "Engine created, desktop {}, {} scan target(s)",
            desktop,
            context.library().scan_targets.len()
        );
        Ok(Self {
            context,
            overlays,
            hooks: platform.hooks,
            synth: platform.synth,
            scan: Some(scan),
            scheduler: ScanScheduler::new(),
            running: Arc::new(AtomicBool::new(false)),
            dispatch: None,
        })
    }

    /// Score targets with `matcher` instead of the configured method
    pub fn with_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.scan = self.scan.take().map(|scan| scan.with_matcher(matcher));
        self
    }

    pub fn with_template_loader(mut self, loader: TemplateLoader) -> Self {
        self.scan = self.scan.take().map(|scan| scan.with_template_loader(loader));
        self
    }

    pub fn context(&self) -> &Arc<EngineContext> {
        &self.context
    }

    pub fn overlays(&self) -> &Arc<Mutex<OverlayManager>> {
        &self.overlays
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Install hooks, then start the scan and dispatch threads.
    ///
    /// A hook the OS refuses disables only the features that need it.
    pub fn start(&mut self) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        let settings = self.context.settings();
        let state = self.context.state().clone();

        let queue = HookQueue::bounded(settings.input.queue_capacity);
        for kind in [HookKind::Keyboard, HookKind::Mouse] {
            if let Err(e) = self.hooks.install(kind, queue.sink()) {
                log::error!("Failed to install {} hook: {}", kind, e);
                state.record_hook_error(kind.to_string(), e.to_string());
                for feature in hook_dependents(kind) {
                    state.set_feature(*feature, false);
                }
            }
        }
        sync_overlays(&self.context, &self.overlays);

        let mut actions = ActionDispatcher::new(self.context.clone(), self.synth.clone());
        let classifier = Classifier::new(
            &settings.input,
            self.overlays.lock().hit_regions(),
            actions.wheel_in_flight(),
        );

        self.running.store(true, Ordering::SeqCst);
        let running = self.running.clone();
        let context = self.context.clone();
        let overlays = self.overlays.clone();
        let spawned = thread::Builder::new()
            .name("poq-dispatch".to_string())
            .spawn(move || {
                run_dispatch_loop(&running, &context, &overlays, queue, classifier, &mut actions);
                actions.shutdown();
            });
        match spawned {
            Ok(handle) => self.dispatch = Some(handle),
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                self.uninstall_hooks();
                return Err(e.into());
            }
        }

        match self.scan.take() {
            Some(scan) => {
                let context = self.context.clone();
                let overlays = self.overlays.clone();
                self.scheduler.set_callback(move |report: &ScanReport| {
                    overlays.lock().apply_scan(&context.library(), report);
                });
                if let Err(e) = self.scheduler.start(scan) {
                    log::error!("Scan thread not started: {}", e);
                    self.stop();
                    return Err(e);
                }
            }
            None => log::error!("Scan loop unavailable, running without scanning"),
        }

        state.set_running(true);
        log::info!("Engine started");
        Ok(())
    }

    /// Stop both threads and release the hooks
    pub fn stop(&mut self) {
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Some(scan) = self.scheduler.stop() {
            self.scan = Some(scan);
        }
        if let Some(handle) = self.dispatch.take() {
            if handle.join().is_err() {
                log::error!("Dispatch thread panicked");
            }
        }
        self.uninstall_hooks();
        self.context.state().set_running(false);
        if was_running {
            log::info!("Engine stopped");
        }
    }

    fn uninstall_hooks(&mut self) {
        for kind in [HookKind::Keyboard, HookKind::Mouse] {
            if self.hooks.is_installed(kind) {
                self.hooks.uninstall(kind);
            }
        }
    }

    /// Run one scan tick on the calling thread. Only while stopped.
    pub fn scan_once(&mut self) -> Option<ScanReport> {
        let scan = self.scan.as_mut()?;
        let report = scan.tick_once();
        self.overlays
            .lock()
            .apply_scan(&self.context.library(), &report);
        Some(report)
    }

    /// Returns the previous value
    pub fn set_feature(&self, feature: Feature, enabled: bool) -> bool {
        set_feature(&self.context, &self.overlays, feature, enabled)
    }

    /// Swap the library snapshot. Overlays of removed entities are destroyed.
    pub fn reload_library(&self, library: Library) -> Result<()> {
        library.validate()?;
        self.context.set_library(library);
        sync_overlays(&self.context, &self.overlays);
        log::info!("Library reloaded");
        Ok(())
    }

    /// Replace the tunables. Input timing applies on the next start.
    pub fn update_settings(&self, settings: Settings) -> Result<()> {
        settings.validate()?;
        self.overlays.lock().set_settings(settings.overlay.clone());
        self.context.set_settings(settings);
        Ok(())
    }

    /// Enter or leave positioning mode; leaving returns the moved overlays
    pub fn set_positioning(&self, on: bool) -> Vec<(EntityId, Region)> {
        self.overlays.lock().set_positioning(on)
    }

    pub fn state(&self) -> RuntimeState {
        self.context.state().snapshot()
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sync_overlays(context: &EngineContext, overlays: &Mutex<OverlayManager>) {
    let library = context.library();
    let state = context.state();
    overlays
        .lock()
        .sync_library(&library, state.features(), &|id| state.is_matched(id));
}

fn set_feature(
    context: &EngineContext,
    overlays: &Mutex<OverlayManager>,
    feature: Feature,
    enabled: bool,
) -> bool {
    let previous = context.state().set_feature(feature, enabled);
    if previous != enabled {
        log::info!("{} {}", feature, if enabled { "enabled" } else { "disabled" });
        sync_overlays(context, overlays);
    }
    previous
}

fn run_dispatch_loop(
    running: &AtomicBool,
    context: &EngineContext,
    overlays: &Mutex<OverlayManager>,
    queue: HookQueue,
    mut classifier: Classifier,
    actions: &mut ActionDispatcher,
) {
    log::debug!("Dispatch thread started");
    let mut reported_drops = 0;
    let mut last_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        if let Some(input) = queue.recv_timeout(Duration::from_millis(20)) {
            for event in classifier.classify(&input) {
                route(event, context, overlays, actions);
            }
        }

        let dropped = queue.dropped();
        if dropped != reported_drops {
            context.state().set_dropped_input_events(dropped);
            if last_log.elapsed() >= Duration::from_secs(5) {
                log::warn!("Input queue full, {} event(s) dropped so far", dropped);
                last_log = Instant::now();
            }
            reported_drops = dropped;
        }
    }
    log::debug!("Dispatch thread exiting");
}

fn route(
    event: InputEvent,
    context: &EngineContext,
    overlays: &Mutex<OverlayManager>,
    actions: &mut ActionDispatcher,
) {
    let outcome = match event {
        InputEvent::DoubleTapDetected { .. } => actions.start_click_emulation(),
        InputEvent::CtrlReleased { .. } => {
            actions.stop_click_emulation();
            return;
        }
        InputEvent::WheelBurst { .. } => actions.wheel_sequence(),
        InputEvent::OverlayClicked {
            entity: EntityId::Currency(id),
            point,
        } => actions.quick_craft(&id, point),
        InputEvent::OverlayClicked {
            entity: EntityId::Dock,
            ..
        } => {
            let enabled = !context.state().feature_enabled(Feature::DoubleCtrl);
            set_feature(context, overlays, Feature::DoubleCtrl, enabled);
            if !enabled {
                actions.stop_click_emulation();
            }
            return;
        }
        InputEvent::OverlayClicked { entity, .. } => {
            log::trace!("Click on {} ignored", entity);
            return;
        }
        InputEvent::DragStart { entity, point } => {
            overlays.lock().drag_start(&entity, point);
            return;
        }
        InputEvent::Drag { entity, point } => {
            overlays.lock().drag_to(&entity, point);
            return;
        }
        InputEvent::DragEnd { entity, point } => {
            overlays.lock().drag_end(&entity, point);
            return;
        }
        InputEvent::ResizeWheel { entity, notches } => {
            overlays.lock().resize(&entity, notches);
            return;
        }
        InputEvent::PointerMoved(point) => {
            overlays.lock().pointer_moved(point);
            return;
        }
        InputEvent::HotkeyToggle(feature) => {
            let enabled = !context.state().feature_enabled(feature);
            set_feature(context, overlays, feature, enabled);
            return;
        }
    };
    if let Err(e) = outcome {
        log::warn!("Synthetic input failed: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageDesktop;
    use crate::input::{ButtonPhase, Key, MouseButton, RawInput, RawKind};
    use crate::region::Point;
    use image::RgbaImage;

    fn library() -> Library {
        Library::from_json(
            r#"{"currencies": [{"id": "chaos", "image_path": "missing.png",
                "capture": {"x": 290, "y": 190, "width": 20, "height": 20},
                "display": {"x": 10, "y": 10, "width": 32, "height": 32}}],
                "dock": {"x": 100, "y": 10, "width": 40, "height": 40}}"#,
            "",
        )
        .unwrap()
    }

    fn engine(hooks: MockHookBackend, windows: HeadlessBackend) -> Engine {
        let mut settings = Settings::default();
        settings.focus.enforce = false;
        for feature in Feature::ALL {
            settings.features.set(feature, true);
        }
        let mut platform = EnginePlatform::headless(
            Box::new(ImageDesktop::new(RgbaImage::new(640, 480))),
            Arc::new(StaticProbe::default()),
        );
        platform.hooks = Box::new(hooks);
        platform.windows = Box::new(windows);
        Engine::new(settings, library(), platform).unwrap()
    }

    fn wait_for(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(2);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        false
    }

    #[test]
    fn test_start_stop_lifecycle() {
        let hooks = MockHookBackend::new();
        let mut engine = engine(hooks.clone(), HeadlessBackend::new());
        engine.start().unwrap();
        assert!(engine.is_running());
        assert!(engine.state().running);
        assert!(matches!(engine.start(), Err(Error::AlreadyRunning)));
        assert!(hooks.emit(RawInput::now(RawKind::KeyDown(Key::Ctrl))));

        engine.stop();
        assert!(!engine.is_running());
        assert!(!engine.state().running);
        assert_eq!(hooks.uninstall_calls(), 2);
        assert!(!hooks.emit(RawInput::now(RawKind::KeyDown(Key::Ctrl))));

        engine.start().unwrap();
        assert!(engine.state().running);
    }

    #[test]
    fn test_denied_hook_disables_dependents_only() {
        let hooks = MockHookBackend::new().deny(HookKind::Mouse);
        let windows = HeadlessBackend::new();
        let mut engine = engine(hooks, windows.clone());
        assert!(windows.is_visible(&EntityId::Currency("chaos".into())));

        engine.start().unwrap();
        let state = engine.state();
        assert!(state.hook_errors.contains_key("mouse"));
        assert!(!state.features.quick_craft);
        assert!(!state.features.wheel_keys);
        assert!(state.features.double_ctrl);
        assert!(state.features.scanning);
        assert!(!windows.is_visible(&EntityId::Currency("chaos".into())));
    }

    #[test]
    fn test_dock_click_toggles_click_emulation() {
        let hooks = MockHookBackend::new();
        let mut engine = engine(hooks.clone(), HeadlessBackend::new());
        engine.start().unwrap();
        assert!(engine.state().features.double_ctrl);

        let click = |phase| {
            RawInput::now(RawKind::MouseButton {
                button: MouseButton::Left,
                phase,
                point: Point::new(110, 20),
            })
        };
        hooks.emit(click(ButtonPhase::Down));
        hooks.emit(click(ButtonPhase::Up));
        assert!(wait_for(|| !engine.state().features.double_ctrl));
    }

    #[test]
    fn test_reload_library_removes_overlays() {
        let windows = HeadlessBackend::new();
        let engine = engine(MockHookBackend::new(), windows.clone());
        assert_eq!(windows.window_count(), 2);
        engine.reload_library(Library::default()).unwrap();
        assert_eq!(windows.window_count(), 0);
        assert!(engine.state().overlays.is_empty());
    }

    #[test]
    fn test_feature_toggle_hides_overlays() {
        let windows = HeadlessBackend::new();
        let engine = engine(MockHookBackend::new(), windows.clone());
        let chaos = EntityId::Currency("chaos".into());
        assert!(engine.set_feature(Feature::QuickCraft, false));
        assert!(!windows.is_visible(&chaos));
        assert!(!engine.set_feature(Feature::QuickCraft, true));
        assert!(windows.is_visible(&chaos));
    }
}
