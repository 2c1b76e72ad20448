//! Library of configured entities
//!
//! The library is owned by the configuration collaborator and handed to the
//! core as an immutable snapshot. The core never writes it back; runtime
//! state such as matched flags lives in [`crate::state::RuntimeState`].

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::ConfigError;
use crate::region::{Point, Region};

fn default_true() -> bool {
    true
}

fn default_opacity() -> f32 {
    1.0
}

/// Whether a scan target tracks a buff or a debuff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    #[default]
    Buff,
    Debuff,
}

/// Icon searched for inside the ROI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanTargetEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: TargetKind,
    /// Template image, relative to the library directory
    pub image_path: PathBuf,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Where the mirror overlay is shown while matched
    pub display: Region,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Extra rows below the match included in the mirror (stack counters)
    #[serde(default)]
    pub extend_bottom: u32,
}

/// Visibility rule of a copy area
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VisibilityRule {
    #[default]
    Always,
    /// Visible only while the referenced scan target is not matched
    ShowWhenAbsent,
}

/// Screen area mirrored into an overlay
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CopyAreaEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Source rectangle on screen
    pub capture: Region,
    /// Where the mirror overlay is shown
    pub display: Region,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default = "default_true")]
    pub active: bool,
    /// Scan target controlling visibility
    #[serde(default)]
    pub reference: Option<String>,
    #[serde(default)]
    pub rule: VisibilityRule,
}

/// Quick craft currency item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrencyEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub image_path: PathBuf,
    /// Location of the currency icon in the game stash
    pub capture: Region,
    /// Explicit right-click point, defaults to the center of `capture`
    #[serde(default)]
    pub source_point: Option<Point>,
    /// Where the clickable icon overlay is shown
    pub display: Region,
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    #[serde(default = "default_true")]
    pub active: bool,
}

impl CurrencyEntry {
    /// Point right-clicked to pick up the currency
    pub fn source_point(&self) -> Point {
        self.source_point.unwrap_or_else(|| self.capture.center())
    }
}

/// Snapshot of every configured entity
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Library {
    pub scan_targets: Vec<ScanTargetEntry>,
    pub copy_areas: Vec<CopyAreaEntry>,
    pub currencies: Vec<CurrencyEntry>,
    /// Floating dock placement, no dock when absent
    pub dock: Option<Region>,
    /// Directory template paths are resolved against
    #[serde(skip)]
    pub base_dir: PathBuf,
}

impl Library {
    /// Load a JSON library; relative image paths resolve against its directory
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let base = path.parent().map(Path::to_path_buf).unwrap_or_default();
        let library = Self::from_json(&text, base)?;
        log::info!(
            "Loaded library from {}: {} scan targets, {} copy areas, {} currencies",
            path.display(),
            library.scan_targets.len(),
            library.copy_areas.len(),
            library.currencies.len()
        );
        Ok(library)
    }

    /// Parse and validate a JSON library
    pub fn from_json(text: &str, base_dir: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut library: Library = serde_json::from_str(text)?;
        library.base_dir = base_dir.into();
        library.validate()?;
        Ok(library)
    }

    /// Check id uniqueness and geometry
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unique("scan target", self.scan_targets.iter().map(|t| t.id.as_str()))?;
        check_unique("copy area", self.copy_areas.iter().map(|c| c.id.as_str()))?;
        check_unique("currency", self.currencies.iter().map(|c| c.id.as_str()))?;

        let displays = self
            .scan_targets
            .iter()
            .map(|t| (&t.id, t.display))
            .chain(self.copy_areas.iter().map(|c| (&c.id, c.display)))
            .chain(self.copy_areas.iter().map(|c| (&c.id, c.capture)))
            .chain(self.currencies.iter().map(|c| (&c.id, c.display)))
            .chain(self.currencies.iter().map(|c| (&c.id, c.capture)));
        for (id, region) in displays {
            if region.is_empty() {
                return Err(ConfigError::Invalid(format!("`{}` has an empty region", id)));
            }
        }

        for area in &self.copy_areas {
            if let Some(reference) = &area.reference {
                if self.scan_target(reference).is_none() {
                    log::warn!(
                        "Copy area `{}` references unknown scan target `{}`",
                        area.id,
                        reference
                    );
                }
            }
        }
        Ok(())
    }

    pub fn scan_target(&self, id: &str) -> Option<&ScanTargetEntry> {
        self.scan_targets.iter().find(|t| t.id == id)
    }

    pub fn copy_area(&self, id: &str) -> Option<&CopyAreaEntry> {
        self.copy_areas.iter().find(|c| c.id == id)
    }

    pub fn currency(&self, id: &str) -> Option<&CurrencyEntry> {
        self.currencies.iter().find(|c| c.id == id)
    }

    /// Absolute path of a template image
    pub fn resolve_path(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Index of copy areas by the scan target they depend on
    pub fn dependencies(&self) -> DependencyRegistry {
        DependencyRegistry::build(self)
    }
}

fn check_unique<'a>(
    what: &str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.is_empty() {
            return Err(ConfigError::Invalid(format!("{} with empty id", what)));
        }
        if !seen.insert(id) {
            return Err(ConfigError::Invalid(format!("duplicate {} id `{}`", what, id)));
        }
    }
    Ok(())
}

/// Scan target id to dependent copy area ids
#[derive(Debug, Clone, Default)]
pub struct DependencyRegistry {
    dependents: HashMap<String, Vec<String>>,
}

impl DependencyRegistry {
    pub fn build(library: &Library) -> Self {
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        for area in &library.copy_areas {
            if let Some(target) = &area.reference {
                dependents
                    .entry(target.clone())
                    .or_default()
                    .push(area.id.clone());
            }
        }
        Self { dependents }
    }

    /// Copy areas whose visibility follows `target_id`
    pub fn dependents(&self, target_id: &str) -> &[String] {
        self.dependents
            .get(target_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "scan_targets": [
            {"id": "onslaught", "image_path": "buffs/onslaught.png",
             "display": {"x": 10, "y": 10, "width": 32, "height": 32}, "extend_bottom": 6},
            {"id": "bleed", "kind": "debuff", "image_path": "/abs/bleed.png",
             "display": {"x": 50, "y": 10, "width": 32, "height": 32}, "active": false}
        ],
        "copy_areas": [
            {"id": "flasks", "capture": {"x": 300, "y": 1000, "width": 120, "height": 60},
             "display": {"x": 800, "y": 500, "width": 120, "height": 60},
             "reference": "onslaught", "rule": "show_when_absent"}
        ],
        "currencies": [
            {"id": "chaos", "image_path": "chaos.png",
             "capture": {"x": 290, "y": 190, "width": 20, "height": 20},
             "display": {"x": 0, "y": 0, "width": 40, "height": 40}}
        ]
    }"#;

    #[test]
    fn test_parse_sample() {
        let library = Library::from_json(SAMPLE, "/data/lib").unwrap();
        assert_eq!(library.scan_targets.len(), 2);
        assert!(library.scan_targets[0].active);
        assert!(!library.scan_targets[1].active);
        assert_eq!(library.scan_targets[1].kind, TargetKind::Debuff);
        assert_eq!(library.copy_areas[0].rule, VisibilityRule::ShowWhenAbsent);
        assert_eq!(library.copy_areas[0].opacity, 1.0);
    }

    #[test]
    fn test_resolve_path() {
        let library = Library::from_json(SAMPLE, "/data/lib").unwrap();
        let target = library.scan_target("onslaught").unwrap();
        assert_eq!(
            library.resolve_path(&target.image_path),
            PathBuf::from("/data/lib/buffs/onslaught.png")
        );
    }

    #[test]
    fn test_currency_source_point_defaults_to_center() {
        let library = Library::from_json(SAMPLE, "").unwrap();
        let chaos = library.currency("chaos").unwrap();
        assert_eq!(chaos.source_point(), Point::new(300, 200));
    }

    #[test]
    fn test_dependency_registry() {
        let library = Library::from_json(SAMPLE, "").unwrap();
        let deps = library.dependencies();
        assert_eq!(deps.dependents("onslaught"), &["flasks".to_string()]);
        assert!(deps.dependents("bleed").is_empty());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let text = r#"{"currencies": [
            {"id": "a", "image_path": "a.png", "capture": {"x":0,"y":0,"width":1,"height":1},
             "display": {"x":0,"y":0,"width":1,"height":1}},
            {"id": "a", "image_path": "b.png", "capture": {"x":0,"y":0,"width":1,"height":1},
             "display": {"x":0,"y":0,"width":1,"height":1}}
        ]}"#;
        assert!(matches!(
            Library::from_json(text, ""),
            Err(ConfigError::Invalid(_))
        ));
    }
}
