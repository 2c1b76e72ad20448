//! Handles shared by the scan thread and the dispatcher thread

use parking_lot::RwLock;
use std::sync::Arc;

use crate::focus::{FocusPolicy, ForegroundProbe};
use crate::library::Library;
use crate::settings::Settings;
use crate::state::StateStore;

/// Settings, library snapshot, runtime state and foreground probe.
///
/// Readers clone what they need at each decision point, so edits made
/// through [`EngineContext::set_library`] apply on the next tick or event.
pub struct EngineContext {
    settings: RwLock<Settings>,
    library: RwLock<Arc<Library>>,
    state: Arc<StateStore>,
    probe: Arc<dyn ForegroundProbe>,
}

impl EngineContext {
    pub fn new(settings: Settings, library: Library, probe: Arc<dyn ForegroundProbe>) -> Self {
        let state = Arc::new(StateStore::new(settings.features));
        Self {
            settings: RwLock::new(settings),
            library: RwLock::new(Arc::new(library)),
            state,
            probe,
        }
    }

    pub fn settings(&self) -> Settings {
        self.settings.read().clone()
    }

    pub fn set_settings(&self, settings: Settings) {
        *self.settings.write() = settings;
    }

    /// Current library snapshot
    pub fn library(&self) -> Arc<Library> {
        self.library.read().clone()
    }

    pub fn set_library(&self, library: Library) {
        *self.library.write() = Arc::new(library);
    }

    pub fn state(&self) -> &Arc<StateStore> {
        &self.state
    }

    /// Whether synthetic input may be sent right now.
    ///
    /// Reads the foreground window fresh and records the observation.
    pub fn check_focus(&self) -> bool {
        let policy = FocusPolicy::new(&self.settings.read().focus);
        let focus = policy.observe(self.probe.as_ref());
        let allowed = policy.permits(&focus);
        if !allowed {
            log::trace!("Focus check failed: {:?}", focus.foreground_process);
        }
        self.state.record_focus(focus);
        allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::focus::{ForegroundWindow, StaticProbe};

    #[test]
    fn test_check_focus_reads_probe_every_time() {
        let probe = Arc::new(StaticProbe::focused("PathOfExile_x64.exe"));
        let ctx = EngineContext::new(Settings::default(), Library::default(), probe.clone());
        assert!(ctx.check_focus());

        probe.set(Some(ForegroundWindow::new("notepad.exe", 42)));
        assert!(!ctx.check_focus());
        let focus = ctx.state().snapshot().focus.unwrap();
        assert_eq!(focus.foreground_process.as_deref(), Some("notepad.exe"));
        assert!(!focus.in_allow_list);
    }

    #[test]
    fn test_library_swap() {
        let ctx = EngineContext::new(
            Settings::default(),
            Library::default(),
            Arc::new(StaticProbe::default()),
        );
        let before = ctx.library();
        ctx.set_library(Library {
            dock: Some(crate::region::Region::new(0, 0, 10, 10)),
            ..Default::default()
        });
        assert!(before.dock.is_none());
        assert!(ctx.library().dock.is_some());
    }
}
