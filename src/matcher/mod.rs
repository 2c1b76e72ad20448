//! Template matching
//!
//! Locates a [`Template`] inside a captured grayscale frame at native
//! scale. Absence of a match is a normal outcome and is expressed as a
//! score below the threshold, never as an error.

mod correlate;
mod template;

pub use template::Template;

use image::GrayImage;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::region::Point;

/// Best placement of a template inside a frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchScore {
    /// Similarity in `0..=1`
    pub score: f32,
    /// Top-left corner of the placement, frame-local
    pub position: Point,
}

impl MatchScore {
    pub fn new(score: f32, position: Point) -> Self {
        Self { score, position }
    }

    pub fn passes(&self, threshold: f32) -> bool {
        self.score >= threshold
    }
}

/// Correlation measure used by [`TemplateMatcher`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMethod {
    /// Zero-mean normalized cross-correlation, robust to brightness shifts
    #[default]
    Zncc,
    /// Normalized cross-correlation without mean removal
    Ncc,
}

impl FromStr for MatchMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "zncc" | "ccoeff_normed" => Ok(MatchMethod::Zncc),
            "ncc" | "ccorr_normed" => Ok(MatchMethod::Ncc),
            _ => Err(format!("Unknown match method: {}", s)),
        }
    }
}

impl fmt::Display for MatchMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchMethod::Zncc => write!(f, "zncc"),
            MatchMethod::Ncc => write!(f, "ncc"),
        }
    }
}

/// Finds the best placement of a template in a frame
pub trait Matcher: Send + Sync {
    /// Highest scoring placement, or `None` when the template does not fit
    fn best(&self, frame: &GrayImage, template: &Template) -> Option<MatchScore>;

    /// Best placement if it clears `threshold`
    fn find(&self, frame: &GrayImage, template: &Template, threshold: f32) -> Option<MatchScore> {
        self.best(frame, template).filter(|m| m.passes(threshold))
    }
}

/// Correlation based matcher
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateMatcher {
    method: MatchMethod,
}

impl TemplateMatcher {
    pub fn new(method: MatchMethod) -> Self {
        Self { method }
    }

    pub fn method(&self) -> MatchMethod {
        self.method
    }
}

impl Matcher for TemplateMatcher {
    fn best(&self, frame: &GrayImage, template: &Template) -> Option<MatchScore> {
        match self.method {
            MatchMethod::Zncc => correlate::zncc(frame, template),
            MatchMethod::Ncc => correlate::ncc(frame, template),
        }
    }
}

/// Matcher replaying scripted results per template id.
///
/// Each call pops the next scripted result; once a script runs out the
/// last result repeats. Templates without a script never match.
#[derive(Default)]
pub struct ScriptedMatcher {
    scripts: Mutex<HashMap<String, VecDeque<Option<MatchScore>>>>,
    last: Mutex<HashMap<String, Option<MatchScore>>>,
}

impl ScriptedMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue results for a template id
    pub fn with_script(
        self,
        template_id: impl Into<String>,
        results: impl IntoIterator<Item = Option<MatchScore>>,
    ) -> Self {
        self.push(template_id, results);
        self
    }

    /// Append results for a template id
    pub fn push(
        &self,
        template_id: impl Into<String>,
        results: impl IntoIterator<Item = Option<MatchScore>>,
    ) {
        self.scripts
            .lock()
            .entry(template_id.into())
            .or_default()
            .extend(results);
    }
}

impl Matcher for ScriptedMatcher {
    fn best(&self, _frame: &GrayImage, template: &Template) -> Option<MatchScore> {
        let next = self
            .scripts
            .lock()
            .get_mut(template.id())
            .and_then(VecDeque::pop_front);
        let mut last = self.last.lock();
        match next {
            Some(result) => {
                last.insert(template.id().to_string(), result);
                result
            }
            None => last.get(template.id()).copied().flatten(),
        }
    }
}
