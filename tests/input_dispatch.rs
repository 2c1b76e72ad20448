//! Hook events through the dispatch thread to synthetic input

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use image::RgbaImage;
use poq_core::action::SynthAction;
use poq_core::focus::ForegroundWindow;
use poq_core::input::{ButtonPhase, MouseButton, RawInput, RawKind, WheelDirection};
use poq_core::{
    Engine, EnginePlatform, Feature, ImageDesktop, Key, Library, MockHookBackend, Point,
    RecordingSynth, Settings, StaticProbe,
};

struct Harness {
    engine: Engine,
    hooks: MockHookBackend,
    synth: Arc<RecordingSynth>,
    probe: Arc<StaticProbe>,
}

fn library() -> Library {
    Library::from_json(
        r#"{"currencies": [{"id": "chaos", "image_path": "chaos.png",
            "capture": {"x": 290, "y": 190, "width": 20, "height": 20},
            "display": {"x": 480, "y": 380, "width": 40, "height": 40}}]}"#,
        "",
    )
    .unwrap()
}

fn harness(process: &str) -> Harness {
    harness_with_queue(process, 256)
}

fn harness_with_queue(process: &str, queue_capacity: usize) -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut settings = Settings::default();
    settings.input.queue_capacity = queue_capacity;
    settings.actions.key_delay_ms = 5;
    settings.actions.click_interval_ms = 10;
    settings.actions.quick_craft_delay_ms = 15;
    for feature in Feature::ALL {
        settings.features.set(feature, true);
    }

    let hooks = MockHookBackend::new();
    let synth = Arc::new(RecordingSynth::new());
    let probe = Arc::new(StaticProbe::focused(process));
    let platform = EnginePlatform {
        hooks: Box::new(hooks.clone()),
        synth: synth.clone(),
        ..EnginePlatform::headless(
            Box::new(ImageDesktop::new(RgbaImage::new(1280, 720))),
            probe.clone(),
        )
    };
    let mut engine = Engine::new(settings, library(), platform).unwrap();
    engine.start().unwrap();
    Harness {
        engine,
        hooks,
        synth,
        probe,
    }
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

fn key(down: bool) -> RawInput {
    RawInput::now(if down {
        RawKind::KeyDown(Key::Ctrl)
    } else {
        RawKind::KeyUp(Key::Ctrl)
    })
}

fn wheel_down() -> RawInput {
    RawInput::now(RawKind::MouseWheel {
        direction: WheelDirection::Down,
        point: Point::new(640, 360),
    })
}

fn left(phase: ButtonPhase, point: Point) -> RawInput {
    RawInput::now(RawKind::MouseButton {
        button: MouseButton::Left,
        phase,
        point,
    })
}

#[test]
fn test_wheel_burst_sends_one_sequence() {
    let h = harness("PathOfExile_x64.exe");
    for _ in 0..6 {
        assert!(h.hooks.emit(wheel_down()));
    }
    assert!(wait_for(|| h.synth.actions().len() == 4));
    thread::sleep(Duration::from_millis(100));
    assert_eq!(
        h.synth.actions(),
        (1..=4)
            .map(|d| SynthAction::Key(Key::Digit(d)))
            .collect::<Vec<_>>()
    );
}

#[test]
fn test_double_ctrl_clicks_until_release() {
    let h = harness("PathOfExile_x64.exe");
    h.synth.set_cursor(Point::new(700, 300));
    h.hooks.emit(key(true));
    h.hooks.emit(key(false));
    h.hooks.emit(key(true));

    assert!(wait_for(|| h.synth.actions().len() >= 3));
    assert!(h.engine.state().click_emulation_active);

    h.hooks.emit(key(false));
    assert!(wait_for(|| !h.engine.state().click_emulation_active));
    let count = h.synth.actions().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.synth.actions().len(), count);
    assert!(h.synth.actions().iter().all(|a| *a
        == SynthAction::Click {
            button: MouseButton::Left,
            at: Point::new(700, 300)
        }));
}

#[test]
fn test_slow_double_ctrl_does_nothing() {
    let h = harness("PathOfExile_x64.exe");
    let start = Instant::now();
    let at = |ms| start + Duration::from_millis(ms);
    h.hooks.emit(RawInput::new(RawKind::KeyDown(Key::Ctrl), at(0)));
    h.hooks.emit(RawInput::new(RawKind::KeyUp(Key::Ctrl), at(50)));
    h.hooks.emit(RawInput::new(RawKind::KeyDown(Key::Ctrl), at(500)));
    thread::sleep(Duration::from_millis(80));
    assert!(h.synth.actions().is_empty());
    assert!(!h.engine.state().click_emulation_active);
}

#[test]
fn test_quick_craft_click() {
    let h = harness("PathOfExile_x64.exe");
    h.hooks.emit(left(ButtonPhase::Down, Point::new(500, 400)));
    h.hooks.emit(left(ButtonPhase::Up, Point::new(500, 400)));
    assert!(wait_for(|| h.synth.actions().len() == 2));
    assert_eq!(
        h.synth.actions(),
        vec![
            SynthAction::Click {
                button: MouseButton::Right,
                at: Point::new(300, 200)
            },
            SynthAction::Click {
                button: MouseButton::Left,
                at: Point::new(500, 400)
            },
        ]
    );
}

#[test]
fn test_unfocused_game_gets_no_input() {
    let h = harness("notepad.exe");
    h.hooks.emit(wheel_down());
    h.hooks.emit(key(true));
    h.hooks.emit(key(false));
    h.hooks.emit(key(true));
    h.hooks.emit(left(ButtonPhase::Down, Point::new(500, 400)));
    h.hooks.emit(left(ButtonPhase::Up, Point::new(500, 400)));
    thread::sleep(Duration::from_millis(120));
    assert!(h.synth.actions().is_empty());

    let focus = h.engine.state().focus.unwrap();
    assert_eq!(focus.foreground_process.as_deref(), Some("notepad.exe"));
    assert!(!focus.in_allow_list);
}

#[test]
fn test_focus_regained_allows_input() {
    let h = harness("notepad.exe");
    h.hooks.emit(wheel_down());
    thread::sleep(Duration::from_millis(50));
    assert!(h.synth.actions().is_empty());

    h.probe
        .set(Some(ForegroundWindow::new("PathOfExile.exe", 4242)));
    thread::sleep(Duration::from_millis(200));
    h.hooks.emit(wheel_down());
    assert!(wait_for(|| h.synth.actions().len() == 4));
}

#[test]
fn test_injected_events_are_ignored() {
    let h = harness("PathOfExile.exe");
    h.hooks.emit(wheel_down().injected());
    h.hooks
        .emit(left(ButtonPhase::Down, Point::new(500, 400)).injected());
    thread::sleep(Duration::from_millis(80));
    assert!(h.synth.actions().is_empty());
}

#[test]
fn test_disabled_feature_stops_sequence_dispatch() {
    let h = harness("PathOfExile.exe");
    h.engine.set_feature(Feature::WheelKeys, false);
    h.hooks.emit(wheel_down());
    thread::sleep(Duration::from_millis(80));
    assert!(h.synth.actions().is_empty());
}

fn mouse_move(x: i32) -> RawInput {
    RawInput::now(RawKind::MouseMove(Point::new(x, 300)))
}

fn start_emulation(h: &Harness) {
    h.synth.set_key_held(Key::Ctrl, true);
    h.hooks.emit(key(true));
    h.hooks.emit(key(false));
    h.hooks.emit(key(true));
    assert!(wait_for(|| h.engine.state().click_emulation_active));
}

#[test]
fn test_ctrl_release_survives_full_queue() {
    let h = harness_with_queue("PathOfExile.exe", 4);
    start_emulation(&h);

    let overlays = h.engine.overlays().lock();
    for x in 0..60 {
        h.hooks.emit(mouse_move(x));
    }
    assert!(h.hooks.emit(key(false)));
    drop(overlays);

    assert!(wait_for(|| !h.engine.state().click_emulation_active));
    assert!(wait_for(|| h.engine.state().dropped_input_events > 0));
}

#[test]
fn test_physical_release_ends_emulation_while_dispatch_stalled() {
    let h = harness_with_queue("PathOfExile.exe", 4);
    start_emulation(&h);

    let overlays = h.engine.overlays().lock();
    h.hooks.emit(mouse_move(1));
    h.synth.set_key_held(Key::Ctrl, false);
    assert!(wait_for(|| !h.engine.state().click_emulation_active));
    let count = h.synth.actions().len();
    thread::sleep(Duration::from_millis(50));
    assert_eq!(h.synth.actions().len(), count);
    drop(overlays);
}
