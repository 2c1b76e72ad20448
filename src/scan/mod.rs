//! Periodic ROI scanning
//!
//! One tick captures the ROI once, scores every usable target against that
//! frame and reports the targets whose matched flag changed.

mod board;
mod scheduler;

pub use board::{MatchHit, ScanBoard, ScanPhase, ScanTransition, TemplateLoader};
pub use scheduler::{ScanCallback, ScanScheduler};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::capture::{CaptureSource, Frame};
use crate::context::EngineContext;
use crate::matcher::{Matcher, TemplateMatcher};
use crate::state::Feature;

/// Outcome of one scan tick
#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    /// Targets whose matched flag changed, in library order
    pub transitions: Vec<ScanTransition>,
    /// The ROI frame, absent when the tick was skipped
    pub frame: Option<Frame>,
    /// Every currently matched target
    pub hits: Vec<(String, MatchHit)>,
    /// Fresh captures of active copy areas
    pub copies: Vec<(String, Frame)>,
    /// Target id to matched flag
    pub results: HashMap<String, bool>,
}

impl ScanReport {
    pub fn skipped(&self) -> bool {
        self.frame.is_none()
    }
}

/// Capture source, matcher and per-target state driven by the scheduler
pub struct ScanLoop {
    context: Arc<EngineContext>,
    capture: Box<dyn CaptureSource>,
    matcher: Option<Box<dyn Matcher>>,
    board: ScanBoard,
}

impl ScanLoop {
    pub fn new(context: Arc<EngineContext>, capture: Box<dyn CaptureSource>) -> Self {
        Self {
            context,
            capture,
            matcher: None,
            board: ScanBoard::new(),
        }
    }

    /// Use a fixed matcher instead of the one named in the settings
    pub fn with_matcher(mut self, matcher: Box<dyn Matcher>) -> Self {
        self.matcher = Some(matcher);
        self
    }

    pub fn with_template_loader(mut self, loader: TemplateLoader) -> Self {
        self.board = ScanBoard::with_loader(loader);
        self
    }

    pub fn board(&self) -> &ScanBoard {
        &self.board
    }

    /// Current tick interval from the settings
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.context.settings().scan.interval_ms.max(1))
    }

    /// Run one tick
    pub fn tick_once(&mut self) -> ScanReport {
        let now = Instant::now();
        let library = self.context.library();
        let settings = self.context.settings();
        let state = self.context.state().clone();

        let mut report = ScanReport {
            transitions: self.board.sync(&library, now),
            ..Default::default()
        };

        if !state.feature_enabled(Feature::Scanning) {
            report.transitions.extend(self.board.deactivate_all(now));
            report.results = self.board.results();
            if !report.transitions.is_empty() {
                state.publish_scan(report.results.clone());
            }
            return report;
        }

        if settings.scan.requires_focus && !self.context.check_focus() {
            log::trace!("Scan tick skipped, game not focused");
            state.record_skipped_scan();
            report.results = self.board.results();
            return report;
        }

        let roi = settings.roi.resolve(&self.capture.bounds());
        let frame = match self.capture.capture(roi) {
            Ok(frame) => frame,
            Err(e) => {
                log::warn!("Scan tick skipped: {}", e);
                state.record_skipped_scan();
                report.results = self.board.results();
                return report;
            }
        };

        let fallback;
        let matcher: &dyn Matcher = match &self.matcher {
            Some(matcher) => matcher.as_ref(),
            None => {
                fallback = TemplateMatcher::new(settings.scan.method);
                &fallback
            }
        };
        report
            .transitions
            .extend(self.board.tick(&frame, matcher, settings.scan.threshold, now));
        for transition in &report.transitions {
            log::info!(
                "Scan target `{}` {} -> {}",
                transition.target_id,
                transition.from,
                transition.to
            );
        }

        report.hits = self
            .board
            .matched()
            .map(|(entry, hit)| (entry.id.clone(), hit))
            .collect();

        if state.feature_enabled(Feature::CopyAreas) {
            for area in library.copy_areas.iter().filter(|a| a.active) {
                match self.capture.capture(area.capture) {
                    Ok(copy) => report.copies.push((area.id.clone(), copy)),
                    Err(e) => log::debug!("Copy area `{}` not captured: {}", area.id, e),
                }
            }
        }

        report.results = self.board.results();
        state.publish_scan(report.results.clone());
        report.frame = Some(frame);
        report
    }

    /// Move every target to inactive, for shutdown
    pub fn shutdown(&mut self) -> ScanReport {
        let mut report = ScanReport {
            transitions: self.board.deactivate_all(Instant::now()),
            ..Default::default()
        };
        report.results = self.board.results();
        self.context.state().publish_scan(report.results.clone());
        report
    }
}
