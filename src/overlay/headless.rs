//! In-memory window backend
//!
//! Keeps window state and an operation log so overlay behaviour can be
//! asserted without a window system.

use image::RgbaImage;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use super::{EntityId, OverlayStyle, WindowBackend, WindowHandle, WindowSpec};
use crate::error::WindowCreateError;
use crate::region::Region;

/// Backend call, in the order received
#[derive(Debug, Clone, PartialEq)]
pub enum WindowOp {
    Create(EntityId),
    Geometry(EntityId, Region),
    Opacity(EntityId, f32),
    ClickThrough(EntityId, bool),
    Content(EntityId),
    Show(EntityId),
    Hide(EntityId),
    Destroy(EntityId),
}

/// State of one headless window
#[derive(Debug, Clone, PartialEq)]
pub struct HeadlessWindow {
    pub entity: EntityId,
    pub region: Region,
    pub opacity: f32,
    pub style: OverlayStyle,
    pub click_through: bool,
    pub visible: bool,
    /// Size of the last content image
    pub content: Option<(u32, u32)>,
}

#[derive(Default)]
struct Inner {
    next: u64,
    windows: BTreeMap<u64, HeadlessWindow>,
    ops: Vec<WindowOp>,
    failing: HashSet<EntityId>,
    excludes_from_capture: bool,
}

impl Inner {
    fn window(&mut self, handle: WindowHandle) -> Option<&mut HeadlessWindow> {
        self.windows.get_mut(&handle.0)
    }
}

/// Window backend that keeps everything in memory. Clones share state.
#[derive(Clone, Default)]
pub struct HeadlessBackend {
    inner: Arc<Mutex<Inner>>,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report windows as excluded from screen capture
    pub fn with_capture_exclusion(self, excluded: bool) -> Self {
        self.inner.lock().excludes_from_capture = excluded;
        self
    }

    /// Make window creation for `entity` fail until [`HeadlessBackend::allow_create`]
    pub fn fail_create(&self, entity: EntityId) {
        self.inner.lock().failing.insert(entity);
    }

    pub fn allow_create(&self, entity: &EntityId) {
        self.inner.lock().failing.remove(entity);
    }

    /// Current window of an entity, if one exists
    pub fn window(&self, entity: &EntityId) -> Option<HeadlessWindow> {
        self.inner
            .lock()
            .windows
            .values()
            .find(|w| &w.entity == entity)
            .cloned()
    }

    /// Whether the entity has a shown window with non-zero opacity
    pub fn is_visible(&self, entity: &EntityId) -> bool {
        self.window(entity)
            .map_or(false, |w| w.visible && w.opacity > 0.0)
    }

    pub fn window_count(&self) -> usize {
        self.inner.lock().windows.len()
    }

    pub fn ops(&self) -> Vec<WindowOp> {
        self.inner.lock().ops.clone()
    }

    pub fn clear_ops(&self) {
        self.inner.lock().ops.clear();
    }

    fn apply<F>(&self, handle: WindowHandle, op: impl FnOnce(EntityId) -> WindowOp, f: F)
    where
        F: FnOnce(&mut HeadlessWindow),
    {
        let mut inner = self.inner.lock();
        let Some(window) = inner.window(handle) else {
            log::warn!("Headless backend: unknown window {:?}", handle);
            return;
        };
        f(window);
        let entity = window.entity.clone();
        inner.ops.push(op(entity));
    }
}

impl WindowBackend for HeadlessBackend {
    fn create(&mut self, spec: &WindowSpec) -> Result<WindowHandle, WindowCreateError> {
        let mut inner = self.inner.lock();
        if inner.failing.contains(&spec.entity) {
            return Err(WindowCreateError::Platform(format!(
                "creation refused for {}",
                spec.entity
            )));
        }
        inner.next += 1;
        let handle = inner.next;
        inner.windows.insert(
            handle,
            HeadlessWindow {
                entity: spec.entity.clone(),
                region: spec.region,
                opacity: spec.opacity,
                style: spec.style,
                click_through: spec.click_through,
                visible: false,
                content: None,
            },
        );
        inner.ops.push(WindowOp::Create(spec.entity.clone()));
        Ok(WindowHandle(handle))
    }

    fn set_geometry(&mut self, handle: WindowHandle, region: Region) {
        self.apply(handle, |e| WindowOp::Geometry(e, region), |w| w.region = region);
    }

    fn set_opacity(&mut self, handle: WindowHandle, opacity: f32) {
        self.apply(handle, |e| WindowOp::Opacity(e, opacity), |w| w.opacity = opacity);
    }

    fn set_click_through(&mut self, handle: WindowHandle, click_through: bool) {
        self.apply(
            handle,
            |e| WindowOp::ClickThrough(e, click_through),
            |w| w.click_through = click_through,
        );
    }

    fn set_content(&mut self, handle: WindowHandle, image: &RgbaImage) {
        let size = image.dimensions();
        self.apply(handle, WindowOp::Content, |w| w.content = Some(size));
    }

    fn show(&mut self, handle: WindowHandle) {
        self.apply(handle, WindowOp::Show, |w| w.visible = true);
    }

    fn hide(&mut self, handle: WindowHandle) {
        self.apply(handle, WindowOp::Hide, |w| w.visible = false);
    }

    fn destroy(&mut self, handle: WindowHandle) {
        let mut inner = self.inner.lock();
        if let Some(window) = inner.windows.remove(&handle.0) {
            inner.ops.push(WindowOp::Destroy(window.entity));
        }
    }

    fn excludes_from_capture(&self) -> bool {
        self.inner.lock().excludes_from_capture
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(entity: EntityId) -> WindowSpec {
        WindowSpec {
            entity,
            region: Region::new(0, 0, 32, 32),
            opacity: 1.0,
            style: OverlayStyle::ClickThrough,
            click_through: true,
        }
    }

    #[test]
    fn test_create_show_destroy() {
        let mut backend = HeadlessBackend::new();
        let probe = backend.clone();
        let entity = EntityId::ScanTarget("a".into());
        let handle = backend.create(&spec(entity.clone())).unwrap();
        assert!(!probe.is_visible(&entity));
        backend.show(handle);
        assert!(probe.is_visible(&entity));
        backend.set_opacity(handle, 0.0);
        assert!(!probe.is_visible(&entity));
        backend.destroy(handle);
        assert_eq!(probe.window_count(), 0);
        assert_eq!(
            probe.ops(),
            vec![
                WindowOp::Create(entity.clone()),
                WindowOp::Show(entity.clone()),
                WindowOp::Opacity(entity.clone(), 0.0),
                WindowOp::Destroy(entity),
            ]
        );
    }

    #[test]
    fn test_injected_create_failure() {
        let mut backend = HeadlessBackend::new();
        backend.fail_create(EntityId::Dock);
        assert!(backend.create(&spec(EntityId::Dock)).is_err());
        backend.allow_create(&EntityId::Dock);
        assert!(backend.create(&spec(EntityId::Dock)).is_ok());
    }
}
