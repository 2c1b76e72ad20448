//! Hook installation seam

use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use super::{HookKind, HookSink, RawInput};
use crate::error::HookInstallError;

/// Installs process-wide low-level hooks feeding a [`HookSink`]
pub trait HookBackend: Send {
    fn install(&mut self, kind: HookKind, sink: HookSink) -> Result<(), HookInstallError>;
    fn uninstall(&mut self, kind: HookKind);
    fn is_installed(&self, kind: HookKind) -> bool;
}

#[derive(Default)]
struct MockHooks {
    installed: HashSet<HookKind>,
    denied: HashSet<HookKind>,
    sinks: Vec<(HookKind, HookSink)>,
    install_calls: usize,
    uninstall_calls: usize,
}

/// In-memory hooks; tests inject events with [`MockHookBackend::emit`]
#[derive(Clone, Default)]
pub struct MockHookBackend {
    inner: Arc<Mutex<MockHooks>>,
}

impl MockHookBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make installing `kind` fail as if the OS refused it
    pub fn deny(self, kind: HookKind) -> Self {
        self.inner.lock().denied.insert(kind);
        self
    }

    /// Deliver an event through whichever installed hook handles it
    pub fn emit(&self, input: RawInput) -> bool {
        let hook = input.hook();
        let inner = self.inner.lock();
        if !inner.installed.contains(&hook) {
            return false;
        }
        inner
            .sinks
            .iter()
            .filter(|(kind, _)| *kind == hook)
            .any(|(_, sink)| sink.offer(input))
    }

    pub fn install_calls(&self) -> usize {
        self.inner.lock().install_calls
    }

    pub fn uninstall_calls(&self) -> usize {
        self.inner.lock().uninstall_calls
    }
}

impl HookBackend for MockHookBackend {
    fn install(&mut self, kind: HookKind, sink: HookSink) -> Result<(), HookInstallError> {
        let mut inner = self.inner.lock();
        inner.install_calls += 1;
        if inner.denied.contains(&kind) {
            return Err(HookInstallError::Denied {
                kind,
                reason: "denied by mock".into(),
            });
        }
        if !inner.installed.insert(kind) {
            return Err(HookInstallError::AlreadyInstalled(kind));
        }
        inner.sinks.push((kind, sink));
        Ok(())
    }

    fn uninstall(&mut self, kind: HookKind) {
        let mut inner = self.inner.lock();
        inner.uninstall_calls += 1;
        inner.installed.remove(&kind);
        inner.sinks.retain(|(k, _)| *k != kind);
    }

    fn is_installed(&self, kind: HookKind) -> bool {
        self.inner.lock().installed.contains(&kind)
    }
}

/// Hook backend of the running platform
pub fn native_hooks() -> Result<Box<dyn HookBackend>, HookInstallError> {
    #[cfg(target_os = "windows")]
    {
        Ok(Box::new(super::Win32HookBackend::new()))
    }
    #[cfg(not(target_os = "windows"))]
    {
        Err(HookInstallError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::input::{HookQueue, Key, RawKind};

    #[test]
    fn test_mock_install_and_emit() {
        let queue = HookQueue::bounded(8);
        let mut hooks = MockHookBackend::new();
        hooks.install(HookKind::Keyboard, queue.sink()).unwrap();
        assert!(hooks.is_installed(HookKind::Keyboard));
        assert!(matches!(
            hooks.install(HookKind::Keyboard, queue.sink()),
            Err(HookInstallError::AlreadyInstalled(HookKind::Keyboard))
        ));

        assert!(hooks.emit(RawInput::now(RawKind::KeyDown(Key::Ctrl))));
        assert!(!hooks.emit(RawInput::now(RawKind::MouseMove(Default::default()))));
        assert_eq!(queue.try_recv().unwrap().kind, RawKind::KeyDown(Key::Ctrl));

        hooks.uninstall(HookKind::Keyboard);
        assert!(!hooks.emit(RawInput::now(RawKind::KeyDown(Key::Ctrl))));
        assert_eq!(hooks.install_calls(), 2);
        assert_eq!(hooks.uninstall_calls(), 1);
    }

    #[test]
    fn test_mock_denied() {
        let queue = HookQueue::bounded(8);
        let mut hooks = MockHookBackend::new().deny(HookKind::Mouse);
        assert!(matches!(
            hooks.install(HookKind::Mouse, queue.sink()),
            Err(HookInstallError::Denied { kind: HookKind::Mouse, .. })
        ));
        assert!(hooks.install(HookKind::Keyboard, queue.sink()).is_ok());
    }
}
