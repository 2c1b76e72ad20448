//! Runtime state shared between the scan loop, the dispatcher and the UI
//!
//! All mutation goes through [`StateStore`]; readers take snapshots.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::focus::FocusState;
use crate::region::Region;

/// Independently switchable features
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Feature {
    /// Buff/debuff scanning and scan mirrors
    Scanning,
    /// Copy area mirrors
    CopyAreas,
    /// Quick craft icons
    QuickCraft,
    /// Wheel-down key sequence
    WheelKeys,
    /// Double Ctrl click emulation
    DoubleCtrl,
}

impl Feature {
    pub const ALL: [Feature; 5] = [
        Feature::Scanning,
        Feature::CopyAreas,
        Feature::QuickCraft,
        Feature::WheelKeys,
        Feature::DoubleCtrl,
    ];
}

impl FromStr for Feature {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scanning" | "scan" => Ok(Feature::Scanning),
            "copy_areas" | "copy" => Ok(Feature::CopyAreas),
            "quick_craft" | "quickcraft" => Ok(Feature::QuickCraft),
            "wheel_keys" | "wheel" => Ok(Feature::WheelKeys),
            "double_ctrl" | "ctrl" => Ok(Feature::DoubleCtrl),
            _ => Err(format!("Unknown feature: {}", s)),
        }
    }
}

impl fmt::Display for Feature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Feature::Scanning => write!(f, "scanning"),
            Feature::CopyAreas => write!(f, "copy_areas"),
            Feature::QuickCraft => write!(f, "quick_craft"),
            Feature::WheelKeys => write!(f, "wheel_keys"),
            Feature::DoubleCtrl => write!(f, "double_ctrl"),
        }
    }
}

/// Enable flag per feature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureFlags {
    pub scanning: bool,
    pub copy_areas: bool,
    pub quick_craft: bool,
    pub wheel_keys: bool,
    pub double_ctrl: bool,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        Self {
            scanning: true,
            copy_areas: true,
            quick_craft: false,
            wheel_keys: false,
            double_ctrl: false,
        }
    }
}

impl FeatureFlags {
    pub fn get(&self, feature: Feature) -> bool {
        match feature {
            Feature::Scanning => self.scanning,
            Feature::CopyAreas => self.copy_areas,
            Feature::QuickCraft => self.quick_craft,
            Feature::WheelKeys => self.wheel_keys,
            Feature::DoubleCtrl => self.double_ctrl,
        }
    }

    pub fn set(&mut self, feature: Feature, enabled: bool) {
        let slot = match feature {
            Feature::Scanning => &mut self.scanning,
            Feature::CopyAreas => &mut self.copy_areas,
            Feature::QuickCraft => &mut self.quick_craft,
            Feature::WheelKeys => &mut self.wheel_keys,
            Feature::DoubleCtrl => &mut self.double_ctrl,
        };
        *slot = enabled;
    }
}

/// Rendering state of one overlay, exposed for UI display
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlayStatus {
    pub region: Region,
    pub visible: bool,
    pub opacity: f32,
    /// Window creation failed; hidden until the entity is re-enabled
    pub failed: bool,
}

/// Snapshot of everything collaborators may display
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuntimeState {
    pub running: bool,
    /// Scan target id to matched flag, replaced every scan tick
    pub matched: BTreeMap<String, bool>,
    /// Overlay key (see `EntityId`'s display form) to status
    pub overlays: BTreeMap<String, OverlayStatus>,
    pub features: FeatureFlags,
    pub click_emulation_active: bool,
    pub wheel_sequence_in_flight: bool,
    pub positioning: bool,
    pub focus: Option<FocusState>,
    /// Hook install failures keyed by hook kind
    pub hook_errors: BTreeMap<String, String>,
    pub dropped_input_events: u64,
    pub scan_ticks: u64,
    pub skipped_scan_ticks: u64,
}

/// Lock-guarded [`RuntimeState`] with named mutation points
#[derive(Debug, Default)]
pub struct StateStore {
    inner: Mutex<RuntimeState>,
}

impl StateStore {
    pub fn new(features: FeatureFlags) -> Self {
        Self {
            inner: Mutex::new(RuntimeState {
                features,
                ..Default::default()
            }),
        }
    }

    pub fn snapshot(&self) -> RuntimeState {
        self.inner.lock().clone()
    }

    pub fn set_running(&self, running: bool) {
        self.inner.lock().running = running;
    }

    pub fn feature_enabled(&self, feature: Feature) -> bool {
        self.inner.lock().features.get(feature)
    }

    /// Returns the previous value
    pub fn set_feature(&self, feature: Feature, enabled: bool) -> bool {
        let mut state = self.inner.lock();
        let previous = state.features.get(feature);
        state.features.set(feature, enabled);
        previous
    }

    pub fn features(&self) -> FeatureFlags {
        self.inner.lock().features
    }

    /// Replace scan results after a tick
    pub fn publish_scan<I>(&self, results: I)
    where
        I: IntoIterator<Item = (String, bool)>,
    {
        let mut state = self.inner.lock();
        state.matched = results.into_iter().collect();
        state.scan_ticks += 1;
    }

    pub fn record_skipped_scan(&self) {
        self.inner.lock().skipped_scan_ticks += 1;
    }

    pub fn is_matched(&self, target_id: &str) -> bool {
        self.inner
            .lock()
            .matched
            .get(target_id)
            .copied()
            .unwrap_or(false)
    }

    pub fn set_overlay(&self, key: String, status: OverlayStatus) {
        self.inner.lock().overlays.insert(key, status);
    }

    pub fn remove_overlay(&self, key: &str) {
        self.inner.lock().overlays.remove(key);
    }

    pub fn set_click_emulation(&self, active: bool) {
        self.inner.lock().click_emulation_active = active;
    }

    pub fn click_emulation_active(&self) -> bool {
        self.inner.lock().click_emulation_active
    }

    pub fn set_wheel_in_flight(&self, in_flight: bool) {
        self.inner.lock().wheel_sequence_in_flight = in_flight;
    }

    pub fn set_positioning(&self, positioning: bool) {
        self.inner.lock().positioning = positioning;
    }

    pub fn record_focus(&self, focus: FocusState) {
        self.inner.lock().focus = Some(focus);
    }

    pub fn record_hook_error(&self, kind: impl Into<String>, message: impl Into<String>) {
        self.inner
            .lock()
            .hook_errors
            .insert(kind.into(), message.into());
    }

    pub fn set_dropped_input_events(&self, dropped: u64) {
        self.inner.lock().dropped_input_events = dropped;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_roundtrip_names() {
        for feature in Feature::ALL {
            assert_eq!(feature.to_string().parse::<Feature>().unwrap(), feature);
        }
        assert!("teleport".parse::<Feature>().is_err());
    }

    #[test]
    fn test_set_feature_returns_previous() {
        let store = StateStore::new(FeatureFlags::default());
        assert!(!store.set_feature(Feature::WheelKeys, true));
        assert!(store.set_feature(Feature::WheelKeys, false));
        assert!(!store.feature_enabled(Feature::WheelKeys));
        assert!(store.feature_enabled(Feature::Scanning));
    }

    #[test]
    fn test_publish_scan_replaces_map() {
        let store = StateStore::default();
        store.publish_scan(vec![("a".to_string(), true), ("b".to_string(), false)]);
        store.publish_scan(vec![("b".to_string(), true)]);
        let snap = store.snapshot();
        assert_eq!(snap.matched.len(), 1);
        assert!(store.is_matched("b"));
        assert!(!store.is_matched("a"));
        assert_eq!(snap.scan_ticks, 2);
    }

    #[test]
    fn test_snapshot_serializes() {
        let store = StateStore::new(FeatureFlags::default());
        store.set_click_emulation(true);
        let json = serde_json::to_string(&store.snapshot()).unwrap();
        assert!(json.contains("\"click_emulation_active\":true"));
        assert!(json.contains("\"scanning\":true"));
    }
}
