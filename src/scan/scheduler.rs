//! Scan thread

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::{ScanLoop, ScanReport};
use crate::error::{Error, Result};

/// Callback receiving every tick's report on the scan thread
pub type ScanCallback = Arc<dyn Fn(&ScanReport) + Send + Sync>;

/// Runs a [`ScanLoop`] at its configured interval on a worker thread
pub struct ScanScheduler {
    /// Running flag
    running: Arc<AtomicBool>,
    /// Worker thread handle, yields the loop back when it exits
    worker: Option<JoinHandle<ScanLoop>>,
    callback: Option<ScanCallback>,
}

impl ScanScheduler {
    pub fn new() -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            worker: None,
            callback: None,
        }
    }

    /// Set callback for scan reports
    pub fn set_callback<F>(&mut self, callback: F)
    where
        F: Fn(&ScanReport) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
    }

    pub fn start(&mut self, scan: ScanLoop) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(Error::AlreadyRunning);
        }
        self.running.store(true, Ordering::SeqCst);

        let running = self.running.clone();
        let callback = self.callback.clone();
        let spawned = thread::Builder::new()
            .name("poq-scan".to_string())
            .spawn(move || run_scan_loop(running, scan, callback));
        match spawned {
            Ok(handle) => {
                self.worker = Some(handle);
                log::info!("Scan scheduler started");
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e.into())
            }
        }
    }

    /// Stop and join the worker. Matched targets are reported inactive.
    ///
    /// Returns the loop so a later [`ScanScheduler::start`] can reuse it.
    pub fn stop(&mut self) -> Option<ScanLoop> {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.worker.take()?;
        match handle.join() {
            Ok(scan) => {
                log::info!("Scan scheduler stopped");
                Some(scan)
            }
            Err(_) => {
                log::error!("Scan thread panicked");
                None
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

impl Default for ScanScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ScanScheduler {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn run_scan_loop(
    running: Arc<AtomicBool>,
    mut scan: ScanLoop,
    callback: Option<ScanCallback>,
) -> ScanLoop {
    let mut ticks: u64 = 0;
    let mut last_log = Instant::now();

    while running.load(Ordering::SeqCst) {
        let started = Instant::now();
        let report = scan.tick_once();
        ticks += 1;
        if let Some(cb) = &callback {
            cb(&report);
        }

        if last_log.elapsed() >= Duration::from_secs(30) {
            log::debug!("Scan: {} ticks", ticks);
            last_log = Instant::now();
        }

        let interval = scan.interval();
        let elapsed = started.elapsed();
        if elapsed < interval {
            sleep_while_running(&running, interval - elapsed);
        } else {
            log::trace!("Scan tick overran its interval ({:?})", elapsed);
        }
    }

    let report = scan.shutdown();
    if let Some(cb) = &callback {
        cb(&report);
    }
    scan
}

/// Sleep in short slices so `stop` is not delayed by a long interval
fn sleep_while_running(running: &AtomicBool, total: Duration) {
    let deadline = Instant::now() + total;
    while running.load(Ordering::SeqCst) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(10)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::ImageDesktop;
    use crate::context::EngineContext;
    use crate::focus::StaticProbe;
    use crate::library::Library;
    use crate::settings::Settings;
    use image::RgbaImage;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_scheduler_ticks_until_stopped() {
        let mut settings = Settings::default();
        settings.scan.interval_ms = 5;
        let ctx = Arc::new(EngineContext::new(
            settings,
            Library::default(),
            Arc::new(StaticProbe::default()),
        ));
        let desktop = ImageDesktop::new(RgbaImage::new(800, 600));
        let grabs = desktop.grab_counter();

        let reports = Arc::new(AtomicUsize::new(0));
        let seen = reports.clone();
        let mut scheduler = ScanScheduler::new();
        scheduler.set_callback(move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });
        scheduler
            .start(ScanLoop::new(ctx.clone(), Box::new(desktop)))
            .unwrap();
        assert!(matches!(
            scheduler.start(ScanLoop::new(
                ctx.clone(),
                Box::new(ImageDesktop::new(RgbaImage::new(1, 1)))
            )),
            Err(Error::AlreadyRunning)
        ));

        thread::sleep(Duration::from_millis(60));
        let scan = scheduler.stop();
        assert!(scan.is_some());
        assert!(!scheduler.is_running());
        let after_stop = reports.load(Ordering::SeqCst);
        assert!(after_stop >= 2);
        assert!(grabs.load(Ordering::SeqCst) >= 1);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(reports.load(Ordering::SeqCst), after_stop);
    }
}
