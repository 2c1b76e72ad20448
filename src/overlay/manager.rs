//! Entity to window bookkeeping, visibility rules and positioning mode

use image::RgbaImage;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use super::snap::snap_origin;
use super::{EntityId, HitRegions, OverlayStyle, WindowBackend, WindowHandle, WindowSpec};
use crate::capture::CaptureShield;
use crate::error::WindowCreateError;
use crate::library::{CopyAreaEntry, DependencyRegistry, Library, VisibilityRule};
use crate::region::{Point, Region};
use crate::scan::ScanReport;
use crate::settings::OverlaySettings;
use crate::state::{Feature, FeatureFlags, OverlayStatus, StateStore};

struct Overlay {
    style: OverlayStyle,
    region: Region,
    opacity: f32,
    /// Visibility requested by the entity's rules
    wanted: bool,
    /// Pointer inside a click-through mirror
    hovered: bool,
    /// Creation failed; cleared by the next enable toggle
    failed: bool,
    handle: Option<WindowHandle>,
    shown: bool,
    applied_opacity: f32,
    content: Option<RgbaImage>,
}

impl Overlay {
    fn new(region: Region, opacity: f32, style: OverlayStyle) -> Self {
        Self {
            style,
            region,
            opacity,
            wanted: false,
            hovered: false,
            failed: false,
            handle: None,
            shown: false,
            applied_opacity: opacity,
            content: None,
        }
    }

    fn status(&self) -> OverlayStatus {
        OverlayStatus {
            region: self.region,
            visible: self.shown && self.applied_opacity > 0.0,
            opacity: self.opacity,
            failed: self.failed,
        }
    }
}

struct Positioning {
    start: HashMap<EntityId, Region>,
    /// Dragged entity and the grab offset from its origin
    grab: Option<(EntityId, Point)>,
}

/// Whether a copy area's rule currently asks for it to be shown
pub(crate) fn copy_area_visible(
    area: &CopyAreaEntry,
    enabled: bool,
    matched: &dyn Fn(&str) -> bool,
) -> bool {
    if !enabled || !area.active {
        return false;
    }
    match area.rule {
        VisibilityRule::Always => true,
        VisibilityRule::ShowWhenAbsent => area.reference.as_deref().map_or(true, |r| !matched(r)),
    }
}

/// Owns every overlay window and applies visibility, hover and
/// positioning rules through a [`WindowBackend`]
pub struct OverlayManager {
    backend: Box<dyn WindowBackend>,
    settings: OverlaySettings,
    desktop: Region,
    state: Arc<StateStore>,
    hits: Arc<RwLock<HitRegions>>,
    windows: BTreeMap<EntityId, Overlay>,
    registry: DependencyRegistry,
    positioning: Option<Positioning>,
    concealed: Vec<WindowHandle>,
}

impl OverlayManager {
    pub fn new(
        backend: Box<dyn WindowBackend>,
        settings: OverlaySettings,
        desktop: Region,
        state: Arc<StateStore>,
    ) -> Self {
        Self {
            backend,
            settings,
            desktop,
            state,
            hits: Arc::new(RwLock::new(HitRegions::default())),
            windows: BTreeMap::new(),
            registry: DependencyRegistry::default(),
            positioning: None,
            concealed: Vec::new(),
        }
    }

    /// Shared hit regions read by the input classifier
    pub fn hit_regions(&self) -> Arc<RwLock<HitRegions>> {
        self.hits.clone()
    }

    pub fn set_settings(&mut self, settings: OverlaySettings) {
        self.settings = settings;
    }

    pub fn excludes_from_capture(&self) -> bool {
        self.backend.excludes_from_capture()
    }

    pub fn is_positioning(&self) -> bool {
        self.positioning.is_some()
    }

    pub fn region(&self, entity: &EntityId) -> Option<Region> {
        self.windows.get(entity).map(|o| o.region)
    }

    /// Shown and not hidden by hover
    pub fn is_visible(&self, entity: &EntityId) -> bool {
        self.windows
            .get(entity)
            .map_or(false, |o| o.shown && o.applied_opacity > 0.0)
    }

    pub fn is_failed(&self, entity: &EntityId) -> bool {
        self.windows.get(entity).map_or(false, |o| o.failed)
    }

    /// Register an entity or update its configured geometry.
    ///
    /// Geometry from the library is ignored while positioning mode is on,
    /// the user's drag wins until the session ends.
    pub fn place(&mut self, entity: EntityId, region: Region, opacity: f32, style: OverlayStyle) {
        let positioning = self.positioning.is_some();
        match self.windows.get_mut(&entity) {
            Some(overlay) => {
                if !positioning && overlay.region != region {
                    overlay.region = region;
                    if let Some(handle) = overlay.handle {
                        self.backend.set_geometry(handle, region);
                    }
                }
                overlay.opacity = opacity;
                overlay.style = style;
            }
            None => {
                log::debug!("Overlay {} registered at {}", entity, region);
                self.windows
                    .insert(entity, Overlay::new(region, opacity, style));
            }
        }
    }

    /// Request an entity shown or hidden.
    ///
    /// Turning a failed entity back on retries window creation.
    pub fn set_visible(&mut self, entity: &EntityId, visible: bool) -> Result<(), WindowCreateError> {
        let Some(overlay) = self.windows.get_mut(entity) else {
            return Ok(());
        };
        if visible && !overlay.wanted && overlay.failed {
            log::info!("Retrying window creation for {}", entity);
            overlay.failed = false;
        }
        overlay.wanted = visible;
        let result = self.render(entity);
        self.publish_hits();
        result
    }

    /// Replace the image an overlay displays
    pub fn set_content(&mut self, entity: &EntityId, image: RgbaImage) {
        let Some(overlay) = self.windows.get_mut(entity) else {
            return;
        };
        if let Some(handle) = overlay.handle {
            self.backend.set_content(handle, &image);
        }
        overlay.content = Some(image);
    }

    pub fn has_content(&self, entity: &EntityId) -> bool {
        self.windows
            .get(entity)
            .map_or(false, |o| o.content.is_some())
    }

    pub fn remove(&mut self, entity: &EntityId) {
        if let Some(overlay) = self.windows.remove(entity) {
            if let Some(handle) = overlay.handle {
                self.backend.destroy(handle);
            }
            self.concealed.retain(|h| Some(*h) != overlay.handle);
            self.state.remove_overlay(&entity.to_string());
            log::debug!("Overlay {} destroyed", entity);
        }
    }

    /// Destroy every window
    pub fn clear(&mut self) {
        let entities: Vec<EntityId> = self.windows.keys().cloned().collect();
        for entity in &entities {
            self.remove(entity);
        }
        if self.positioning.take().is_some() {
            self.state.set_positioning(false);
        }
        self.publish_hits();
    }

    /// Reconcile windows with a library snapshot and the feature flags.
    ///
    /// Entities missing from the library lose their windows. Window
    /// creation failures are not returned; `render` logs them and the
    /// overlay status keeps them as `failed`.
    pub fn sync_library(
        &mut self,
        library: &Library,
        features: FeatureFlags,
        matched: &dyn Fn(&str) -> bool,
    ) {
        let mut keep = HashSet::new();

        for target in library.scan_targets.iter().filter(|t| t.active) {
            let entity = EntityId::ScanTarget(target.id.clone());
            self.place(
                entity.clone(),
                target.display,
                target.opacity,
                OverlayStyle::ClickThrough,
            );
            let _ = self.set_visible(&entity, features.scanning && matched(&target.id));
            keep.insert(entity);
        }

        for area in library.copy_areas.iter().filter(|a| a.active) {
            let entity = EntityId::CopyArea(area.id.clone());
            self.place(
                entity.clone(),
                area.display,
                area.opacity,
                OverlayStyle::ClickThrough,
            );
            let _ = self.set_visible(&entity, copy_area_visible(area, features.copy_areas, matched));
            keep.insert(entity);
        }

        for currency in library.currencies.iter().filter(|c| c.active) {
            let entity = EntityId::Currency(currency.id.clone());
            self.place(
                entity.clone(),
                currency.display,
                currency.opacity,
                OverlayStyle::ClickableNoActivate,
            );
            if !self.has_content(&entity) {
                let path = library.resolve_path(&currency.image_path);
                match image::open(&path) {
                    Ok(icon) => self.set_content(&entity, icon.to_rgba8()),
                    Err(e) => log::warn!("No icon for currency `{}` ({}): {}", currency.id, path.display(), e),
                }
            }
            let _ = self.set_visible(&entity, features.quick_craft);
            keep.insert(entity);
        }

        if let Some(dock) = library.dock {
            let opacity = self.settings.dock_opacity;
            self.place(EntityId::Dock, dock, opacity, OverlayStyle::ClickableNoActivate);
            let _ = self.set_visible(&EntityId::Dock, true);
            keep.insert(EntityId::Dock);
        }

        let stale: Vec<EntityId> = self
            .windows
            .keys()
            .filter(|e| !keep.contains(*e))
            .cloned()
            .collect();
        for entity in &stale {
            self.remove(entity);
        }

        self.registry = library.dependencies();
        self.publish_hits();
    }

    /// Apply one scan tick: mirror visibility, mirror content and the
    /// copy areas that depend on targets which changed. Creation failures
    /// are handled as in [`OverlayManager::sync_library`].
    pub fn apply_scan(&mut self, library: &Library, report: &ScanReport) {
        for transition in &report.transitions {
            let entity = EntityId::ScanTarget(transition.target_id.clone());
            let _ = self.set_visible(&entity, transition.is_match());
        }

        if let Some(frame) = &report.frame {
            for (id, hit) in &report.hits {
                let extend = library.scan_target(id).map_or(0, |t| t.extend_bottom);
                let area = Region::new(
                    hit.area.x,
                    hit.area.y,
                    hit.area.width,
                    hit.area.height.saturating_add(extend),
                );
                if let Some(crop) = frame.crop(area) {
                    self.set_content(&EntityId::ScanTarget(id.clone()), crop);
                }
            }
        }

        for (id, frame) in &report.copies {
            self.set_content(&EntityId::CopyArea(id.clone()), frame.image().clone());
        }

        let dependents: Vec<String> = report
            .transitions
            .iter()
            .flat_map(|t| self.registry.dependents(&t.target_id).to_vec())
            .collect();
        if dependents.is_empty() {
            return;
        }
        let enabled = self.state.feature_enabled(Feature::CopyAreas);
        let matched = |id: &str| report.results.get(id).copied().unwrap_or(false);
        for id in dependents {
            if let Some(area) = library.copy_area(&id) {
                let visible = copy_area_visible(area, enabled, &matched);
                let _ = self.set_visible(&EntityId::CopyArea(id), visible);
            }
        }
    }

    /// Hide click-through mirrors under the pointer, restore the rest
    pub fn pointer_moved(&mut self, point: Point) {
        if self.positioning.is_some() {
            return;
        }
        let changed: Vec<EntityId> = self
            .windows
            .iter_mut()
            .filter(|(_, o)| o.style == OverlayStyle::ClickThrough)
            .filter_map(|(entity, o)| {
                let inside = o.wanted && o.region.contains(point);
                if inside != o.hovered {
                    o.hovered = inside;
                    Some(entity.clone())
                } else {
                    None
                }
            })
            .collect();
        for entity in &changed {
            let _ = self.render(entity);
        }
    }

    /// Enter or leave positioning mode.
    ///
    /// While on, every registered overlay is shown and receives the mouse.
    /// Leaving returns the overlays whose region changed during the session.
    pub fn set_positioning(&mut self, on: bool) -> Vec<(EntityId, Region)> {
        if on == self.positioning.is_some() {
            return Vec::new();
        }

        if on {
            let start = self
                .windows
                .iter()
                .map(|(entity, o)| (entity.clone(), o.region))
                .collect();
            self.positioning = Some(Positioning { start, grab: None });
            for overlay in self.windows.values_mut() {
                overlay.hovered = false;
                if let (Some(handle), OverlayStyle::ClickThrough) = (overlay.handle, overlay.style) {
                    self.backend.set_click_through(handle, false);
                }
            }
            self.render_all();
            self.state.set_positioning(true);
            self.publish_hits();
            log::info!("Positioning mode on");
            return Vec::new();
        }

        let Some(session) = self.positioning.take() else {
            return Vec::new();
        };
        for overlay in self.windows.values_mut() {
            if let (Some(handle), OverlayStyle::ClickThrough) = (overlay.handle, overlay.style) {
                self.backend.set_click_through(handle, true);
            }
        }
        self.render_all();
        self.state.set_positioning(false);
        self.publish_hits();

        let moved: Vec<(EntityId, Region)> = self
            .windows
            .iter()
            .filter(|(entity, o)| session.start.get(*entity) != Some(&o.region))
            .map(|(entity, o)| (entity.clone(), o.region))
            .collect();
        log::info!("Positioning mode off, {} overlay(s) moved", moved.len());
        moved
    }

    pub fn drag_start(&mut self, entity: &EntityId, point: Point) {
        let Some(session) = self.positioning.as_mut() else {
            return;
        };
        if let Some(overlay) = self.windows.get(entity) {
            let offset = Point::new(
                point.x.saturating_sub(overlay.region.x),
                point.y.saturating_sub(overlay.region.y),
            );
            session.grab = Some((entity.clone(), offset));
        }
    }

    /// Move the grabbed overlay so the grab point follows the pointer,
    /// snapped to the grid and neighbouring overlays
    pub fn drag_to(&mut self, entity: &EntityId, point: Point) {
        let Some((grabbed, offset)) = self.positioning.as_ref().and_then(|s| s.grab.clone()) else {
            return;
        };
        if &grabbed != entity {
            return;
        }
        let neighbours: Vec<Region> = self
            .windows
            .iter()
            .filter(|(other, _)| *other != entity)
            .map(|(_, o)| o.region)
            .collect();
        let Some(overlay) = self.windows.get_mut(entity) else {
            return;
        };
        let moved = overlay.region.with_origin(Point::new(
            point.x.saturating_sub(offset.x),
            point.y.saturating_sub(offset.y),
        ));
        let origin = snap_origin(
            moved,
            &neighbours,
            self.settings.grid_size,
            self.settings.snap_threshold,
        );
        let placed = moved.with_origin(origin).fit_within(&self.desktop);
        self.apply_region(entity, placed);
    }

    pub fn drag_end(&mut self, entity: &EntityId, point: Point) {
        self.drag_to(entity, point);
        if let Some(session) = self.positioning.as_mut() {
            session.grab = None;
        }
    }

    /// Grow (positive) or shrink (negative) an overlay by whole wheel notches
    pub fn resize(&mut self, entity: &EntityId, notches: i32) {
        if self.positioning.is_none() {
            return;
        }
        let Some(overlay) = self.windows.get(entity) else {
            return;
        };
        let delta = notches.saturating_mul(self.settings.resize_step as i32);
        let max_side = self.desktop.width.min(self.desktop.height);
        let resized = overlay
            .region
            .resize_uniform(delta, self.settings.min_size, max_side)
            .fit_within(&self.desktop);
        self.apply_region(entity, resized);
    }

    /// Hide shown windows for a screen grab
    pub fn conceal(&mut self) {
        for overlay in self.windows.values() {
            if let (true, Some(handle)) = (overlay.shown, overlay.handle) {
                self.backend.hide(handle);
                self.concealed.push(handle);
            }
        }
    }

    /// Re-show what [`OverlayManager::conceal`] hid.
    ///
    /// Windows hidden or destroyed since the conceal stay hidden.
    pub fn reveal(&mut self) {
        let concealed = std::mem::take(&mut self.concealed);
        for handle in concealed {
            let still_shown = self
                .windows
                .values()
                .any(|o| o.shown && o.handle == Some(handle));
            if still_shown {
                self.backend.show(handle);
            }
        }
    }

    fn apply_region(&mut self, entity: &EntityId, region: Region) {
        let Some(overlay) = self.windows.get_mut(entity) else {
            return;
        };
        if overlay.region == region {
            return;
        }
        overlay.region = region;
        if let Some(handle) = overlay.handle {
            self.backend.set_geometry(handle, region);
        }
        self.state.set_overlay(entity.to_string(), overlay.status());
        self.publish_hits();
    }

    fn render_all(&mut self) {
        let entities: Vec<EntityId> = self.windows.keys().cloned().collect();
        for entity in &entities {
            let _ = self.render(entity);
        }
    }

    /// Bring the backend window in line with the overlay's wanted state
    fn render(&mut self, entity: &EntityId) -> Result<(), WindowCreateError> {
        let positioning = self.positioning.is_some();
        let Some(overlay) = self.windows.get_mut(entity) else {
            return Ok(());
        };
        let show = positioning || overlay.wanted;
        let mut result = Ok(());

        if show && overlay.handle.is_none() && !overlay.failed {
            let spec = WindowSpec {
                entity: entity.clone(),
                region: overlay.region,
                opacity: overlay.opacity,
                style: overlay.style,
                click_through: overlay.style == OverlayStyle::ClickThrough && !positioning,
            };
            match self.backend.create(&spec) {
                Ok(handle) => {
                    overlay.handle = Some(handle);
                    overlay.applied_opacity = overlay.opacity;
                    overlay.shown = false;
                    if let Some(content) = &overlay.content {
                        self.backend.set_content(handle, content);
                    }
                }
                Err(e) => {
                    log::error!("Overlay {} hidden: {}", entity, e);
                    overlay.failed = true;
                    result = Err(e);
                }
            }
        }

        if let Some(handle) = overlay.handle {
            let opacity = if overlay.hovered && !positioning {
                0.0
            } else {
                overlay.opacity
            };
            if show {
                if overlay.applied_opacity != opacity {
                    self.backend.set_opacity(handle, opacity);
                    overlay.applied_opacity = opacity;
                }
                if !overlay.shown {
                    self.backend.show(handle);
                    overlay.shown = true;
                }
            } else if overlay.shown {
                self.backend.hide(handle);
                overlay.shown = false;
            }
        }

        self.state.set_overlay(entity.to_string(), overlay.status());
        result
    }

    fn publish_hits(&self) {
        let positioning_active = self.positioning.is_some();
        let mut hits = HitRegions {
            positioning_active,
            ..Default::default()
        };
        for (entity, overlay) in &self.windows {
            if !overlay.shown || overlay.handle.is_none() {
                continue;
            }
            if positioning_active {
                hits.positioning.push((entity.clone(), overlay.region));
            } else if overlay.style == OverlayStyle::ClickableNoActivate {
                hits.clickable.push((entity.clone(), overlay.region));
            }
        }
        *self.hits.write() = hits;
    }
}

impl Drop for OverlayManager {
    fn drop(&mut self) {
        for overlay in self.windows.values() {
            if let Some(handle) = overlay.handle {
                self.backend.destroy(handle);
            }
        }
    }
}

/// Hides overlays around screen grabs when the backend cannot exclude them
pub struct OverlayShield {
    manager: Arc<Mutex<OverlayManager>>,
}

impl OverlayShield {
    pub fn new(manager: Arc<Mutex<OverlayManager>>) -> Self {
        Self { manager }
    }
}

impl CaptureShield for OverlayShield {
    fn excluded_from_capture(&self) -> bool {
        self.manager.lock().excludes_from_capture()
    }

    fn conceal(&self) {
        self.manager.lock().conceal();
    }

    fn reveal(&self) {
        self.manager.lock().reveal();
    }
}
