//! Raw hook events to logical input events
//!
//! Everything here runs on the single dispatcher thread, in queue order,
//! and only looks at the timestamps carried by the events.

use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{ButtonPhase, Key, MouseButton, RawInput, RawKind, WheelDirection};
use crate::overlay::{EntityId, HitRegions};
use crate::region::Point;
use crate::settings::InputSettings;
use crate::state::Feature;

/// Classified event consumed by the action dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputEvent {
    /// Ctrl pressed again shortly after being released
    DoubleTapDetected { at: Instant },
    /// Ctrl went up
    CtrlReleased { at: Instant },
    /// First wheel-down tick of a burst
    WheelBurst { at: Instant },
    /// Left button pressed on a clickable overlay
    OverlayClicked { entity: EntityId, point: Point },
    DragStart { entity: EntityId, point: Point },
    Drag { entity: EntityId, point: Point },
    DragEnd { entity: EntityId, point: Point },
    /// Wheel over an overlay in positioning mode
    ResizeWheel { entity: EntityId, notches: i32 },
    PointerMoved(Point),
    HotkeyToggle(Feature),
}

/// Detects a Ctrl press following a Ctrl release within a window
#[derive(Debug, Clone)]
pub struct DoubleTapDetector {
    window: Duration,
    held: bool,
    last_release: Option<Instant>,
    /// The current press completed a double tap; its release does not arm
    consumed: bool,
}

impl DoubleTapDetector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            held: false,
            last_release: None,
            consumed: false,
        }
    }

    /// Returns true when this press completes a double tap.
    /// Auto-repeat presses while held are ignored.
    pub fn press(&mut self, at: Instant) -> bool {
        if self.held {
            return false;
        }
        self.held = true;
        match self.last_release.take() {
            Some(released) if at.saturating_duration_since(released) <= self.window => {
                self.consumed = true;
                true
            }
            _ => false,
        }
    }

    /// Returns true when the key was held
    pub fn release(&mut self, at: Instant) -> bool {
        let was_held = std::mem::replace(&mut self.held, false);
        if std::mem::replace(&mut self.consumed, false) {
            self.last_release = None;
        } else {
            self.last_release = Some(at);
        }
        was_held
    }
}

/// Collapses wheel ticks into bursts
#[derive(Debug, Clone)]
pub struct WheelBurstFilter {
    window: Duration,
    last_tick: Option<Instant>,
    in_flight: Arc<AtomicBool>,
}

impl WheelBurstFilter {
    /// `in_flight` is raised by the dispatcher while a key sequence runs
    pub fn new(window: Duration, in_flight: Arc<AtomicBool>) -> Self {
        Self {
            window,
            last_tick: None,
            in_flight,
        }
    }

    /// Whether this tick starts a new burst
    pub fn accept(&mut self, at: Instant) -> bool {
        let previous = self.last_tick.replace(at);
        if self.in_flight.load(Ordering::Acquire) {
            return false;
        }
        match previous {
            Some(prev) => at.saturating_duration_since(prev) >= self.window,
            None => true,
        }
    }
}

/// Maps hotkeys to feature toggles, ignoring repeats
#[derive(Debug, Clone)]
pub struct HotkeyDebouncer {
    bindings: HashMap<Key, Feature>,
    window: Duration,
    last_fired: HashMap<Key, Instant>,
    held: HashSet<Key>,
}

impl HotkeyDebouncer {
    pub fn new(bindings: HashMap<Key, Feature>, window: Duration) -> Self {
        Self {
            bindings,
            window,
            last_fired: HashMap::new(),
            held: HashSet::new(),
        }
    }

    pub fn press(&mut self, key: Key, at: Instant) -> Option<Feature> {
        let feature = *self.bindings.get(&key)?;
        if !self.held.insert(key) {
            return None;
        }
        if let Some(last) = self.last_fired.get(&key) {
            if at.saturating_duration_since(*last) < self.window {
                return None;
            }
        }
        self.last_fired.insert(key, at);
        Some(feature)
    }

    pub fn release(&mut self, key: Key) {
        self.held.remove(&key);
    }
}

/// Turns the raw event stream into [`InputEvent`]s
pub struct Classifier {
    double_tap: DoubleTapDetector,
    wheel: WheelBurstFilter,
    hotkeys: HotkeyDebouncer,
    hits: Arc<RwLock<HitRegions>>,
    drag: Option<EntityId>,
}

impl Classifier {
    pub fn new(
        settings: &InputSettings,
        hits: Arc<RwLock<HitRegions>>,
        wheel_in_flight: Arc<AtomicBool>,
    ) -> Self {
        let bindings = settings
            .hotkeys
            .iter()
            .filter_map(|binding| match binding.key.parse::<Key>() {
                Ok(key) => Some((key, binding.feature)),
                Err(e) => {
                    log::warn!("Ignoring hotkey for {}: {}", binding.feature, e);
                    None
                }
            })
            .collect();
        Self {
            double_tap: DoubleTapDetector::new(Duration::from_millis(settings.double_tap_window_ms)),
            wheel: WheelBurstFilter::new(
                Duration::from_millis(settings.burst_window_ms),
                wheel_in_flight,
            ),
            hotkeys: HotkeyDebouncer::new(
                bindings,
                Duration::from_millis(settings.hotkey_debounce_ms),
            ),
            hits,
            drag: None,
        }
    }

    pub fn classify(&mut self, input: &RawInput) -> Vec<InputEvent> {
        if input.injected {
            return Vec::new();
        }
        let mut events = Vec::new();
        match input.kind {
            RawKind::KeyDown(key) => {
                if key.is_ctrl() && self.double_tap.press(input.at) {
                    events.push(InputEvent::DoubleTapDetected { at: input.at });
                }
                if let Some(feature) = self.hotkeys.press(key, input.at) {
                    events.push(InputEvent::HotkeyToggle(feature));
                }
            }
            RawKind::KeyUp(key) => {
                self.hotkeys.release(key);
                if key.is_ctrl() && self.double_tap.release(input.at) {
                    events.push(InputEvent::CtrlReleased { at: input.at });
                }
            }
            RawKind::MouseMove(point) => {
                if let Some(entity) = &self.drag {
                    events.push(InputEvent::Drag {
                        entity: entity.clone(),
                        point,
                    });
                }
                events.push(InputEvent::PointerMoved(point));
            }
            RawKind::MouseButton {
                button: MouseButton::Left,
                phase,
                point,
            } => self.left_button(phase, point, &mut events),
            RawKind::MouseButton { .. } => {}
            RawKind::MouseWheel { direction, point } => {
                let resize_target = {
                    let hits = self.hits.read();
                    if hits.positioning_active {
                        hits.positioning_at(point).cloned()
                    } else {
                        None
                    }
                };
                if let Some(entity) = resize_target {
                    events.push(InputEvent::ResizeWheel {
                        entity,
                        notches: direction.notches(),
                    });
                } else if direction == WheelDirection::Down && self.wheel.accept(input.at) {
                    events.push(InputEvent::WheelBurst { at: input.at });
                }
            }
        }
        events
    }

    fn left_button(&mut self, phase: ButtonPhase, point: Point, events: &mut Vec<InputEvent>) {
        match phase {
            ButtonPhase::Down => {
                let hits = self.hits.read();
                if hits.positioning_active {
                    if let Some(entity) = hits.positioning_at(point) {
                        self.drag = Some(entity.clone());
                        events.push(InputEvent::DragStart {
                            entity: entity.clone(),
                            point,
                        });
                    }
                } else if let Some(entity) = hits.clickable_at(point) {
                    events.push(InputEvent::OverlayClicked {
                        entity: entity.clone(),
                        point,
                    });
                }
            }
            ButtonPhase::Up => {
                if let Some(entity) = self.drag.take() {
                    events.push(InputEvent::DragEnd { entity, point });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::Region;

    fn ms(base: Instant, offset: u64) -> Instant {
        base + Duration::from_millis(offset)
    }

    #[test]
    fn test_double_tap_within_window() {
        let t0 = Instant::now();
        let mut dt = DoubleTapDetector::new(Duration::from_millis(400));
        assert!(!dt.press(t0));
        dt.release(ms(t0, 50));
        assert!(dt.press(ms(t0, 300)));
        // auto-repeat while held
        assert!(!dt.press(ms(t0, 330)));
        assert!(!dt.press(ms(t0, 360)));
    }

    #[test]
    fn test_double_tap_outside_window() {
        let t0 = Instant::now();
        let mut dt = DoubleTapDetector::new(Duration::from_millis(400));
        for gap in [401u64, 500, 1000, 5000] {
            dt.press(t0);
            dt.release(ms(t0, 10));
            assert!(!dt.press(ms(t0, 10 + gap)), "gap {}", gap);
            dt.release(ms(t0, 20 + gap));
            // reset history for the next iteration
            dt = DoubleTapDetector::new(Duration::from_millis(400));
        }
    }

    #[test]
    fn test_release_after_double_tap_does_not_arm() {
        let t0 = Instant::now();
        let mut dt = DoubleTapDetector::new(Duration::from_millis(400));
        dt.press(t0);
        dt.release(ms(t0, 20));
        assert!(dt.press(ms(t0, 100)));
        dt.release(ms(t0, 900));
        assert!(!dt.press(ms(t0, 950)));
        dt.release(ms(t0, 980));
        assert!(dt.press(ms(t0, 1000)));
    }

    #[test]
    fn test_wheel_burst_filter() {
        let t0 = Instant::now();
        let in_flight = Arc::new(AtomicBool::new(false));
        let mut filter = WheelBurstFilter::new(Duration::from_millis(150), in_flight.clone());
        assert!(filter.accept(t0));
        assert!(!filter.accept(ms(t0, 40)));
        assert!(!filter.accept(ms(t0, 180)));
        assert!(filter.accept(ms(t0, 400)));

        in_flight.store(true, Ordering::Release);
        assert!(!filter.accept(ms(t0, 1000)));
        in_flight.store(false, Ordering::Release);
        assert!(!filter.accept(ms(t0, 1100)));
        assert!(filter.accept(ms(t0, 1300)));
    }

    #[test]
    fn test_hotkey_debounce() {
        let t0 = Instant::now();
        let bindings = HashMap::from([(Key::Function(2), Feature::WheelKeys)]);
        let mut hk = HotkeyDebouncer::new(bindings, Duration::from_millis(150));
        assert_eq!(hk.press(Key::Function(2), t0), Some(Feature::WheelKeys));
        assert_eq!(hk.press(Key::Function(2), ms(t0, 30)), None);
        hk.release(Key::Function(2));
        assert_eq!(hk.press(Key::Function(2), ms(t0, 100)), None);
        hk.release(Key::Function(2));
        assert_eq!(hk.press(Key::Function(2), ms(t0, 200)), Some(Feature::WheelKeys));
        assert_eq!(hk.press(Key::Function(3), ms(t0, 400)), None);
    }

    fn classifier(hits: HitRegions) -> Classifier {
        Classifier::new(
            &InputSettings::default(),
            Arc::new(RwLock::new(hits)),
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[test]
    fn test_overlay_click_hit_test() {
        let mut hits = HitRegions::default();
        hits.clickable
            .push((EntityId::Currency("chaos".into()), Region::new(480, 380, 40, 40)));
        let mut c = classifier(hits);
        let down = |x, y| {
            RawInput::now(RawKind::MouseButton {
                button: MouseButton::Left,
                phase: ButtonPhase::Down,
                point: Point::new(x, y),
            })
        };
        assert_eq!(
            c.classify(&down(500, 400)),
            vec![InputEvent::OverlayClicked {
                entity: EntityId::Currency("chaos".into()),
                point: Point::new(500, 400)
            }]
        );
        assert!(c.classify(&down(10, 10)).is_empty());
    }

    #[test]
    fn test_injected_events_ignored() {
        let mut c = classifier(HitRegions::default());
        let t0 = Instant::now();
        c.classify(&RawInput::new(RawKind::KeyDown(Key::Ctrl), t0));
        c.classify(&RawInput::new(RawKind::KeyUp(Key::Ctrl), ms(t0, 10)));
        let injected = RawInput::new(RawKind::KeyDown(Key::Ctrl), ms(t0, 50)).injected();
        assert!(c.classify(&injected).is_empty());
    }

    #[test]
    fn test_positioning_drag_and_resize() {
        let mut hits = HitRegions::default();
        hits.positioning_active = true;
        hits.positioning
            .push((EntityId::ScanTarget("a".into()), Region::new(0, 0, 50, 50)));
        let mut c = classifier(hits);
        let entity = EntityId::ScanTarget("a".into());

        let events = c.classify(&RawInput::now(RawKind::MouseButton {
            button: MouseButton::Left,
            phase: ButtonPhase::Down,
            point: Point::new(10, 10),
        }));
        assert_eq!(
            events,
            vec![InputEvent::DragStart {
                entity: entity.clone(),
                point: Point::new(10, 10)
            }]
        );

        let events = c.classify(&RawInput::now(RawKind::MouseMove(Point::new(30, 40))));
        assert_eq!(events[0], InputEvent::Drag { entity: entity.clone(), point: Point::new(30, 40) });

        let events = c.classify(&RawInput::now(RawKind::MouseButton {
            button: MouseButton::Left,
            phase: ButtonPhase::Up,
            point: Point::new(30, 40),
        }));
        assert_eq!(events, vec![InputEvent::DragEnd { entity: entity.clone(), point: Point::new(30, 40) }]);

        let events = c.classify(&RawInput::now(RawKind::MouseWheel {
            direction: WheelDirection::Down,
            point: Point::new(5, 5),
        }));
        assert_eq!(events, vec![InputEvent::ResizeWheel { entity, notches: -1 }]);
    }
}
