//! Scan ticks through the public engine API

use std::path::Path;
use std::sync::Arc;

use image::{imageops, GrayImage, Rgba, RgbaImage};
use poq_core::error::MatchError;
use poq_core::matcher::{MatchScore, ScriptedMatcher};
use poq_core::overlay::HeadlessBackend;
use poq_core::scan::{ScanPhase, TemplateLoader};
use poq_core::settings::RoiSettings;
use poq_core::{
    Engine, EnginePlatform, EntityId, Feature, ImageDesktop, Library, MatchMethod, Matcher, Point,
    Region, Settings, StaticProbe, Template, TemplateMatcher,
};

fn noise(x: u32, y: u32) -> u8 {
    let mut h = x.wrapping_mul(374_761_393) ^ y.wrapping_mul(668_265_263);
    h = (h ^ (h >> 13)).wrapping_mul(1_274_126_177);
    (h ^ (h >> 16)) as u8
}

fn textured_desktop() -> RgbaImage {
    RgbaImage::from_fn(640, 480, |x, y| {
        let v = noise(x, y);
        Rgba([v, v, v, 255])
    })
}

fn library() -> Library {
    Library::from_json(
        r#"{
            "scan_targets": [
                {"id": "onslaught", "image_path": "onslaught.png",
                 "display": {"x": 400, "y": 20, "width": 12, "height": 12}}
            ],
            "copy_areas": [
                {"id": "flasks", "capture": {"x": 0, "y": 400, "width": 60, "height": 30},
                 "display": {"x": 500, "y": 300, "width": 60, "height": 30},
                 "reference": "onslaught", "rule": "show_when_absent"}
            ]
        }"#,
        "",
    )
    .unwrap()
}

fn settings() -> Settings {
    let mut settings = Settings::default();
    settings.roi = RoiSettings::absolute(Region::new(100, 100, 50, 50));
    settings.scan.threshold = 0.85;
    settings.features.set(Feature::Scanning, true);
    settings.features.set(Feature::CopyAreas, true);
    settings
}

fn crop_loader(desktop: &RgbaImage, at: Point, size: u32) -> TemplateLoader {
    let patch = imageops::crop_imm(desktop, at.x as u32, at.y as u32, size, size).to_image();
    let gray: GrayImage = image::DynamicImage::ImageRgba8(patch).to_luma8();
    Arc::new(move |id: &str, _: &Path| -> Result<Template, MatchError> {
        Template::from_gray(id, gray.clone())
    })
}

fn engine(desktop: RgbaImage, windows: HeadlessBackend) -> Engine {
    let _ = env_logger::builder().is_test(true).try_init();
    let platform = EnginePlatform {
        windows: Box::new(windows),
        ..EnginePlatform::headless(
            Box::new(ImageDesktop::new(desktop)),
            Arc::new(StaticProbe::default()),
        )
    };
    Engine::new(settings(), library(), platform).unwrap()
}

#[test]
fn test_exact_copy_found_at_offset() {
    let desktop = textured_desktop();
    let frame = image::DynamicImage::ImageRgba8(desktop.clone()).to_luma8();
    let loader = crop_loader(&desktop, Point::new(120, 110), 12);
    let template = loader("onslaught", Path::new("")).unwrap();

    let best = TemplateMatcher::new(MatchMethod::Zncc)
        .best(&frame, &template)
        .unwrap();
    assert!(best.score >= 0.85, "score {}", best.score);
    assert_eq!(best.position, Point::new(120, 110));
}

#[test]
fn test_real_matcher_shows_mirror() {
    let desktop = textured_desktop();
    let windows = HeadlessBackend::new();
    let loader = crop_loader(&desktop, Point::new(120, 110), 12);
    let mut engine = engine(desktop, windows.clone()).with_template_loader(loader);

    let report = engine.scan_once().unwrap();
    assert_eq!(report.transitions.len(), 1);
    assert_eq!(report.transitions[0].to, ScanPhase::Matched);
    assert_eq!(report.hits[0].1.position, Point::new(120, 110));

    let mirror = EntityId::ScanTarget("onslaught".into());
    assert!(windows.is_visible(&mirror));
    assert_eq!(windows.window(&mirror).unwrap().content, Some((12, 12)));
    assert!(engine.state().matched["onslaught"]);
}

#[test]
fn test_match_then_lose_reports_each_transition_once() {
    let desktop = RgbaImage::from_pixel(640, 480, Rgba([30, 30, 30, 255]));
    let windows = HeadlessBackend::new();
    let loader = crop_loader(&textured_desktop(), Point::new(0, 0), 8);
    let matcher = ScriptedMatcher::new().with_script(
        "onslaught",
        [
            Some(MatchScore::new(0.9, Point::new(20, 10))),
            Some(MatchScore::new(0.9, Point::new(20, 10))),
            Some(MatchScore::new(0.3, Point::new(20, 10))),
        ],
    );
    let mut engine = engine(desktop, windows.clone())
        .with_template_loader(loader)
        .with_matcher(Box::new(matcher));
    let flasks = EntityId::CopyArea("flasks".into());
    assert!(windows.is_visible(&flasks));

    let first = engine.scan_once().unwrap();
    assert_eq!(first.transitions.len(), 1);
    assert_eq!(first.transitions[0].from, ScanPhase::Inactive);
    assert_eq!(first.transitions[0].to, ScanPhase::Matched);
    assert_eq!(first.hits[0].1.position, Point::new(120, 110));
    assert!(!windows.is_visible(&flasks));

    assert!(engine.scan_once().unwrap().transitions.is_empty());

    let third = engine.scan_once().unwrap();
    assert_eq!(third.transitions.len(), 1);
    assert_eq!(third.transitions[0].from, ScanPhase::Matched);
    assert_eq!(third.transitions[0].to, ScanPhase::Polling);
    assert!(!windows.is_visible(&EntityId::ScanTarget("onslaught".into())));
    assert!(windows.is_visible(&flasks));
}

#[test]
fn test_disabling_scanning_hides_mirrors() {
    let desktop = textured_desktop();
    let windows = HeadlessBackend::new();
    let loader = crop_loader(&desktop, Point::new(120, 110), 12);
    let mut engine = engine(desktop, windows.clone()).with_template_loader(loader);
    engine.scan_once();
    let mirror = EntityId::ScanTarget("onslaught".into());
    assert!(windows.is_visible(&mirror));

    engine.set_feature(Feature::Scanning, false);
    assert!(!windows.is_visible(&mirror));
    let report = engine.scan_once().unwrap();
    assert!(report.skipped());
    assert!(!engine.state().matched["onslaught"]);
}
