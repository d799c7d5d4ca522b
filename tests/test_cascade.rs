mod common;

use common::*;
use image::GrayImage;
use platewatch::config::DetectorConfig;
use platewatch::detection::CandidateStrategy;
use platewatch::detection::cascade::group_rectangles;
use platewatch::detection::preprocessing::Preprocessed;
use platewatch::{CandidateRegion, ClassifierDetector, ClassifierStatus, HaarCascade, LprError};

#[test]
fn parses_window_and_stages() {
    let cascade = HaarCascade::parse(&edge_cascade_xml()).unwrap();
    assert_eq!(cascade.window_size(), (4, 4));
    assert_eq!(cascade.stage_count(), 1);
}

#[test]
fn rejects_legacy_layout() {
    let xml = r#"<?xml version="1.0"?>
<opencv_storage>
<haarcascade_plate type_id="opencv-haar-classifier">
  <size>4 4</size>
  <stages>
    <_>
      <trees>
        <_>
          <_>
            <feature>
              <rects>
                <_>0 0 2 4 -1.</_>
                <_>2 0 2 4 1.</_></rects>
              <tilted>0</tilted></feature>
            <threshold>1.</threshold>
            <left_val>0.</left_val>
            <right_val>1.</right_val></_></_></trees>
      <stage_threshold>0.5</stage_threshold>
      <parent>-1</parent>
      <next>-1</next></_></stages></haarcascade_plate>
</opencv_storage>"#;
    let err = HaarCascade::parse(xml).unwrap_err();
    assert!(err.contains("legacy"), "unexpected error: {err}");
}

#[test]
fn rejects_tilted_features() {
    let xml = edge_cascade_xml().replace(
        "2 0 2 4 1.</_></rects>",
        "2 0 2 4 1.</_></rects>\n      <tilted>1</tilted>",
    );
    let err = HaarCascade::parse(&xml).unwrap_err();
    assert!(err.contains("tilted"), "unexpected error: {err}");
}

#[test]
fn rejects_feature_outside_window() {
    let xml = edge_cascade_xml().replace("2 0 2 4 1.", "3 0 2 4 1.");
    assert!(HaarCascade::parse(&xml).is_err());
}

#[test]
fn rejects_rectangle_that_overflows_the_window() {
    let xml = edge_cascade_xml().replace("2 0 2 4 1.", "4294967295 0 2 4 1.");
    assert!(HaarCascade::parse(&xml).is_err());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("overflow.xml");
    std::fs::write(&path, xml).unwrap();
    let config = DetectorConfig {
        cascade_path: Some(path),
        ..DetectorConfig::default()
    };
    let detector = ClassifierDetector::from_config(&config);
    assert!(matches!(detector.status(), ClassifierStatus::Disabled { .. }));
}

#[test]
fn rejects_negative_or_fractional_rectangle_values() {
    for bad in ["-2 0 2 4 1.", "2 0 -2 4 1.", "1.5 0 2 4 1.", "2 0 2 nan 1.", "2 0 2 4 inf"] {
        let xml = edge_cascade_xml().replace("2 0 2 4 1.", bad);
        assert!(HaarCascade::parse(&xml).is_err(), "accepted {bad:?}");
    }
}

#[test]
fn rejects_extreme_leaf_index() {
    let xml = edge_cascade_xml().replace("0 -1 0 1", "0 -2147483648 0 1");
    assert!(HaarCascade::parse(&xml).is_err());
}

#[test]
fn rejects_dangling_leaf_index() {
    let xml = edge_cascade_xml().replace("0 -1 0 1", "0 -2 0 1");
    assert!(HaarCascade::parse(&xml).is_err());
}

#[test]
fn rejects_non_xml() {
    assert!(HaarCascade::parse("not a cascade").is_err());
}

#[test]
fn missing_file_is_model_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = HaarCascade::load(dir.path().join("missing.xml")).unwrap_err();
    assert!(matches!(err, LprError::ModelLoad { .. }));
}

#[test]
fn detects_the_trained_pattern_only() {
    let cascade = HaarCascade::parse(&edge_cascade_xml()).unwrap();

    let hits = cascade.detect_multi_scale(&split_image(0, 255), 1.1, 1, None);
    assert_eq!(hits, vec![CandidateRegion::new(0, 0, 4, 4)]);

    assert!(cascade.detect_multi_scale(&split_image(255, 0), 1.1, 1, None).is_empty());
    assert!(cascade.detect_multi_scale(&split_image(128, 128), 1.1, 1, None).is_empty());
}

#[test]
fn image_smaller_than_window_has_no_hits() {
    let cascade = HaarCascade::parse(&accept_all_cascade_xml()).unwrap();
    let tiny = GrayImage::new(3, 3);
    assert!(cascade.detect_multi_scale(&tiny, 1.1, 0, None).is_empty());
}

#[test]
fn raw_hits_stay_inside_the_image() {
    let cascade = HaarCascade::parse(&accept_all_cascade_xml()).unwrap();
    let img = GrayImage::new(8, 8);
    let hits = cascade.detect_multi_scale(&img, 1.1, 0, None);
    assert!(hits.len() >= 9);
    for hit in hits {
        assert!(hit.x + hit.width <= 8 && hit.y + hit.height <= 8, "{hit:?}");
    }
}

#[test]
fn non_growing_scale_factor_scans_nothing() {
    let cascade = HaarCascade::parse(&accept_all_cascade_xml()).unwrap();
    let img = GrayImage::new(8, 8);
    for factor in [1.0, 0.5, 0.0, -1.1, f32::NAN] {
        assert!(cascade.detect_multi_scale(&img, factor, 0, None).is_empty(), "factor {factor}");
    }
}

#[test]
fn detector_with_non_growing_scale_factor_is_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plate.xml");
    std::fs::write(&path, accept_all_cascade_xml()).unwrap();

    for factor in [1.0, f32::NAN] {
        let config = DetectorConfig {
            cascade_path: Some(path.clone()),
            scale_factor: factor,
            ..DetectorConfig::default()
        };
        let detector = ClassifierDetector::from_config(&config);
        match detector.status() {
            ClassifierStatus::Disabled { reason } => assert!(reason.contains("scale factor"), "{reason}"),
            other => panic!("expected disabled classifier, got {other:?}"),
        }
    }
}

#[test]
fn min_size_skips_small_windows() {
    let cascade = HaarCascade::parse(&accept_all_cascade_xml()).unwrap();
    let img = GrayImage::new(8, 8);
    assert!(cascade.detect_multi_scale(&img, 1.1, 0, Some((100, 100))).is_empty());
}

#[test]
fn grouping_with_zero_threshold_keeps_raw_hits() {
    let rects = vec![
        CandidateRegion::new(10, 10, 50, 20),
        CandidateRegion::new(200, 200, 30, 30),
    ];
    assert_eq!(group_rectangles(&rects, 0, 0.2), rects);
}

#[test]
fn grouping_averages_clusters_and_drops_weak_ones() {
    let rects = vec![
        CandidateRegion::new(10, 10, 50, 20),
        CandidateRegion::new(11, 10, 50, 20),
        CandidateRegion::new(10, 11, 51, 20),
        CandidateRegion::new(200, 200, 30, 30),
    ];
    let grouped = group_rectangles(&rects, 1, 0.2);
    assert_eq!(grouped, vec![CandidateRegion::new(10, 10, 50, 20)]);
}

#[test]
fn grouping_suppresses_nested_clusters() {
    let mut rects = vec![CandidateRegion::new(0, 0, 100, 100); 5];
    rects.push(CandidateRegion::new(40, 40, 20, 20));
    rects.push(CandidateRegion::new(40, 40, 20, 20));
    let grouped = group_rectangles(&rects, 1, 0.2);
    assert_eq!(grouped, vec![CandidateRegion::new(0, 0, 100, 100)]);
}

#[test]
fn detector_without_model_is_disabled() {
    let detector = ClassifierDetector::from_config(&DetectorConfig::default());
    assert!(matches!(detector.status(), ClassifierStatus::Disabled { .. }));
    assert!(!detector.is_enabled());
}

#[test]
fn detector_with_unreadable_model_is_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("broken.xml");
    std::fs::write(&path, "<opencv_storage/>").unwrap();

    let config = DetectorConfig {
        cascade_path: Some(path),
        ..DetectorConfig::default()
    };
    let detector = ClassifierDetector::from_config(&config);
    match detector.status() {
        ClassifierStatus::Disabled { reason } => assert!(reason.contains("stages")),
        other => panic!("expected disabled classifier, got {other:?}"),
    }
}

#[test]
fn detector_loads_model_from_config() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("plate.xml");
    std::fs::write(&path, edge_cascade_xml()).unwrap();

    let config = DetectorConfig {
        cascade_path: Some(path),
        min_neighbors: 1,
        ..DetectorConfig::default()
    };
    let detector = ClassifierDetector::from_config(&config);
    assert_eq!(detector.status(), &ClassifierStatus::Enabled);
    assert_eq!(detector.name(), "Cascade Classifier");

    let gray = split_image(0, 255);
    let preprocessed = Preprocessed {
        edges: GrayImage::new(4, 4),
        gray,
    };
    assert_eq!(
        detector.find_candidates(&preprocessed),
        vec![CandidateRegion::new(0, 0, 4, 4)]
    );
}
