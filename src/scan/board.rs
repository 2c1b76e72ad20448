//! Per-target scan state

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::capture::Frame;
use crate::error::MatchError;
use crate::library::{Library, ScanTargetEntry};
use crate::matcher::{Matcher, Template};
use crate::region::{Point, Region};

/// Lifecycle of a scan target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScanPhase {
    /// Scanning disabled, target inactive or template unusable
    Inactive,
    /// Scanned every tick, currently absent
    Polling,
    /// Scanned every tick, currently present
    Matched,
}

impl fmt::Display for ScanPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScanPhase::Inactive => write!(f, "inactive"),
            ScanPhase::Polling => write!(f, "polling"),
            ScanPhase::Matched => write!(f, "matched"),
        }
    }
}

/// Where a template was found, in screen coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchHit {
    pub score: f32,
    pub position: Point,
    /// Matched rectangle (template size at `position`)
    pub area: Region,
}

/// Emitted when a target's matched flag changes
#[derive(Debug, Clone, PartialEq)]
pub struct ScanTransition {
    pub target_id: String,
    pub from: ScanPhase,
    pub to: ScanPhase,
    /// Present when `to` is [`ScanPhase::Matched`]
    pub hit: Option<MatchHit>,
    pub at: Instant,
}

impl ScanTransition {
    pub fn is_match(&self) -> bool {
        self.to == ScanPhase::Matched
    }
}

/// Loads a template for a scan target id
pub type TemplateLoader = Arc<dyn Fn(&str, &Path) -> Result<Template, MatchError> + Send + Sync>;

struct TargetSlot {
    entry: ScanTargetEntry,
    template: Option<Template>,
    phase: ScanPhase,
    hit: Option<MatchHit>,
    /// Path whose template failed to load; not retried until it changes
    failed: Option<PathBuf>,
}

impl TargetSlot {
    fn usable(&self) -> bool {
        self.entry.active && self.template.is_some()
    }
}

/// Matched state of every scan target in the library
pub struct ScanBoard {
    slots: Vec<TargetSlot>,
    loader: TemplateLoader,
}

impl ScanBoard {
    /// Board loading templates from disk
    pub fn new() -> Self {
        Self::with_loader(Arc::new(|id: &str, path: &Path| Template::load(id, path)))
    }

    /// Board with a custom template loader
    pub fn with_loader(loader: TemplateLoader) -> Self {
        Self {
            slots: Vec::new(),
            loader,
        }
    }

    /// Reconcile with a library snapshot.
    ///
    /// New targets start inactive, removed or deactivated targets leave.
    /// A target that was matched when it left produces a transition to
    /// [`ScanPhase::Inactive`].
    pub fn sync(&mut self, library: &Library, now: Instant) -> Vec<ScanTransition> {
        let mut transitions = Vec::new();
        let mut previous: HashMap<String, TargetSlot> = self
            .slots
            .drain(..)
            .map(|slot| (slot.entry.id.clone(), slot))
            .collect();

        for entry in &library.scan_targets {
            let path = library.resolve_path(&entry.image_path);
            let mut slot = match previous.remove(&entry.id) {
                Some(mut slot) => {
                    if slot.entry.image_path != entry.image_path {
                        slot.template = None;
                        slot.failed = None;
                    }
                    slot.entry = entry.clone();
                    slot
                }
                None => TargetSlot {
                    entry: entry.clone(),
                    template: None,
                    phase: ScanPhase::Inactive,
                    hit: None,
                    failed: None,
                },
            };

            if slot.entry.active && slot.template.is_none() && slot.failed.as_ref() != Some(&path)
            {
                match (self.loader)(&entry.id, &path) {
                    Ok(template) => slot.template = Some(template),
                    Err(e) => {
                        log::error!("Disabling scan target `{}`: {}", entry.id, e);
                        slot.failed = Some(path);
                    }
                }
            }

            if !slot.usable() && slot.phase != ScanPhase::Inactive {
                transitions.extend(Self::set_phase(&mut slot, ScanPhase::Inactive, None, now));
            }
            self.slots.push(slot);
        }

        for (_, mut slot) in previous {
            log::debug!("Scan target `{}` removed", slot.entry.id);
            transitions.extend(Self::set_phase(&mut slot, ScanPhase::Inactive, None, now));
        }
        transitions
    }

    /// Score every usable target against one frame
    pub fn tick(
        &mut self,
        frame: &Frame,
        matcher: &dyn Matcher,
        threshold: f32,
        now: Instant,
    ) -> Vec<ScanTransition> {
        let gray = frame.gray();
        let mut transitions = Vec::new();

        for slot in &mut self.slots {
            if !slot.usable() {
                continue;
            }
            let Some(template) = slot.template.as_ref() else {
                continue;
            };
            let hit = matcher
                .find(&gray, template, threshold)
                .map(|m| {
                    let position = frame.to_screen(m.position);
                    MatchHit {
                        score: m.score,
                        position,
                        area: Region::new(
                            position.x,
                            position.y,
                            template.width(),
                            template.height(),
                        ),
                    }
                });

            let next = if hit.is_some() {
                ScanPhase::Matched
            } else {
                ScanPhase::Polling
            };
            if let Some(transition) = Self::set_phase(slot, next, hit, now) {
                log::debug!(
                    "Scan target `{}` {} -> {}",
                    transition.target_id,
                    transition.from,
                    transition.to
                );
                transitions.push(transition);
            }
        }
        transitions
    }

    /// Move every target to [`ScanPhase::Inactive`]
    pub fn deactivate_all(&mut self, now: Instant) -> Vec<ScanTransition> {
        self.slots
            .iter_mut()
            .filter_map(|slot| Self::set_phase(slot, ScanPhase::Inactive, None, now))
            .collect()
    }

    pub fn phase(&self, target_id: &str) -> Option<ScanPhase> {
        self.slot(target_id).map(|s| s.phase)
    }

    pub fn hit(&self, target_id: &str) -> Option<MatchHit> {
        self.slot(target_id).and_then(|s| s.hit)
    }

    /// Whether the target's template failed to load
    pub fn is_disabled(&self, target_id: &str) -> bool {
        self.slot(target_id).map_or(false, |s| s.failed.is_some())
    }

    /// Target id to matched flag for every known target
    pub fn results(&self) -> HashMap<String, bool> {
        self.slots
            .iter()
            .map(|s| (s.entry.id.clone(), s.phase == ScanPhase::Matched))
            .collect()
    }

    /// Currently matched targets with their entries
    pub fn matched(&self) -> impl Iterator<Item = (&ScanTargetEntry, MatchHit)> {
        self.slots
            .iter()
            .filter(|s| s.phase == ScanPhase::Matched)
            .filter_map(|s| s.hit.map(|hit| (&s.entry, hit)))
    }

    fn slot(&self, target_id: &str) -> Option<&TargetSlot> {
        self.slots.iter().find(|s| s.entry.id == target_id)
    }

    /// Update a slot and report a transition if the matched flag changed
    fn set_phase(
        slot: &mut TargetSlot,
        next: ScanPhase,
        hit: Option<MatchHit>,
        now: Instant,
    ) -> Option<ScanTransition> {
        let from = slot.phase;
        slot.phase = next;
        slot.hit = hit;
        let was_matched = from == ScanPhase::Matched;
        let is_matched = next == ScanPhase::Matched;
        if was_matched == is_matched {
            return None;
        }
        Some(ScanTransition {
            target_id: slot.entry.id.clone(),
            from,
            to: next,
            hit,
            at: now,
        })
    }
}

impl Default for ScanBoard {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::{MatchScore, ScriptedMatcher};
    use image::{GrayImage, Luma, RgbaImage};

    fn entry(id: &str) -> ScanTargetEntry {
        ScanTargetEntry {
            id: id.to_string(),
            name: id.to_string(),
            kind: Default::default(),
            image_path: PathBuf::from(format!("{}.png", id)),
            active: true,
            display: Region::new(0, 0, 32, 32),
            opacity: 1.0,
            extend_bottom: 0,
        }
    }

    fn library(entries: Vec<ScanTargetEntry>) -> Library {
        Library {
            scan_targets: entries,
            ..Default::default()
        }
    }

    fn loader() -> TemplateLoader {
        Arc::new(|id: &str, _path: &Path| {
            if id == "broken" {
                return Template::from_gray(id, GrayImage::from_pixel(4, 4, Luma([9])));
            }
            Template::from_gray(id, GrayImage::from_fn(4, 4, |x, y| Luma([(x * 50 + y) as u8])))
        })
    }

    fn frame() -> Frame {
        Frame::new(Point::new(100, 100), RgbaImage::new(50, 50))
    }

    #[test]
    fn test_first_match_is_single_transition() {
        let now = Instant::now();
        let mut board = ScanBoard::with_loader(loader());
        assert!(board.sync(&library(vec![entry("a")]), now).is_empty());
        assert_eq!(board.phase("a"), Some(ScanPhase::Inactive));

        let matcher = ScriptedMatcher::new().with_script(
            "a",
            [Some(MatchScore::new(0.95, Point::new(20, 10))), Some(MatchScore::new(0.95, Point::new(20, 10)))],
        );
        let t = board.tick(&frame(), &matcher, 0.9, now);
        assert_eq!(t.len(), 1);
        assert_eq!((t[0].from, t[0].to), (ScanPhase::Inactive, ScanPhase::Matched));
        assert_eq!(t[0].hit.unwrap().position, Point::new(120, 110));
        assert_eq!(t[0].hit.unwrap().area, Region::new(120, 110, 4, 4));

        assert!(board.tick(&frame(), &matcher, 0.9, now).is_empty());
    }

    #[test]
    fn test_polling_entry_is_silent() {
        let now = Instant::now();
        let mut board = ScanBoard::with_loader(loader());
        board.sync(&library(vec![entry("a")]), now);
        let matcher = ScriptedMatcher::new();
        assert!(board.tick(&frame(), &matcher, 0.9, now).is_empty());
        assert_eq!(board.phase("a"), Some(ScanPhase::Polling));
    }

    #[test]
    fn test_broken_template_disables_only_that_target() {
        let now = Instant::now();
        let mut board = ScanBoard::with_loader(loader());
        board.sync(&library(vec![entry("broken"), entry("a")]), now);
        assert!(board.is_disabled("broken"));

        let matcher = ScriptedMatcher::new()
            .with_script("a", [Some(MatchScore::new(1.0, Point::new(0, 0)))])
            .with_script("broken", [Some(MatchScore::new(1.0, Point::new(0, 0)))]);
        let t = board.tick(&frame(), &matcher, 0.9, now);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].target_id, "a");
        assert_eq!(board.phase("broken"), Some(ScanPhase::Inactive));
    }

    #[test]
    fn test_removal_and_deactivation_emit_inactive() {
        let now = Instant::now();
        let mut board = ScanBoard::with_loader(loader());
        board.sync(&library(vec![entry("a"), entry("b")]), now);
        let matcher = ScriptedMatcher::new()
            .with_script("a", [Some(MatchScore::new(1.0, Point::new(0, 0)))])
            .with_script("b", [Some(MatchScore::new(1.0, Point::new(0, 0)))]);
        assert_eq!(board.tick(&frame(), &matcher, 0.9, now).len(), 2);

        let mut inactive_b = entry("b");
        inactive_b.active = false;
        let t = board.sync(&library(vec![inactive_b]), now);
        assert_eq!(t.len(), 2);
        assert!(t.iter().all(|t| t.to == ScanPhase::Inactive && t.from == ScanPhase::Matched));
        assert_eq!(board.phase("a"), None);
        assert_eq!(board.phase("b"), Some(ScanPhase::Inactive));
    }

    #[test]
    fn test_deactivate_all() {
        let now = Instant::now();
        let mut board = ScanBoard::with_loader(loader());
        board.sync(&library(vec![entry("a"), entry("b")]), now);
        let matcher =
            ScriptedMatcher::new().with_script("a", [Some(MatchScore::new(1.0, Point::new(0, 0)))]);
        board.tick(&frame(), &matcher, 0.9, now);

        let t = board.deactivate_all(now);
        assert_eq!(t.len(), 1);
        assert_eq!(t[0].target_id, "a");
        assert_eq!(board.results().get("b"), Some(&false));
    }
}
