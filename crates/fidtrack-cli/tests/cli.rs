//! End-to-end runs of the binary: render a marker sheet to a file, then
//! detect it back from the image.

use assert_cmd::Command;
use predicates::prelude::*;

fn fidtrack() -> Command {
    Command::cargo_bin("fidtrack").unwrap()
}

#[test]
fn generates_and_detects_a_binary_marker() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker37.png");

    fidtrack()
        .args(["generate", "--id", "37", "--size", "480"])
        .arg("--out")
        .arg(&marker)
        .assert()
        .success();
    assert!(marker.is_file());

    fidtrack()
        .args(["detect", "--binary", "--image"])
        .arg(&marker)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": 37"));
}

#[test]
fn detect_with_camera_writes_poses() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker5.png");
    let camera = dir.path().join("camera.json");
    let results = dir.path().join("markers.json");

    fidtrack()
        .args(["generate", "--id", "5", "--size", "240", "--margin", "60"])
        .arg("--out")
        .arg(&marker)
        .assert()
        .success();

    std::fs::write(
        &camera,
        r#"{
            "intrinsics": { "fx": 400.0, "fy": 400.0, "cx": 180.0, "cy": 180.0 },
            "width": 360,
            "height": 360
        }"#,
    )
    .unwrap();

    fidtrack()
        .args(["detect", "--binary"])
        .arg("--image")
        .arg(&marker)
        .arg("--camera")
        .arg(&camera)
        .arg("--out")
        .arg(&results)
        .assert()
        .success();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&results).unwrap()).unwrap();
    assert_eq!(json["markers"][0]["id"], 5);
    assert!(json["markers"][0]["pose"].is_object());
    assert!(json["markers"][0]["model_view"].is_array());
}

#[test]
fn template_detect_needs_a_pattern() {
    let dir = tempfile::tempdir().unwrap();
    let marker = dir.path().join("marker.png");

    fidtrack()
        .args(["generate", "--id", "0", "--out"])
        .arg(&marker)
        .assert()
        .success();

    fidtrack()
        .args(["detect", "--image"])
        .arg(&marker)
        .assert()
        .failure()
        .stderr(predicate::str::contains("--binary"));
}

#[test]
fn registered_template_round_trips_through_files() {
    let dir = tempfile::tempdir().unwrap();
    let pattern = dir.path().join("pattern.png");
    let marker = dir.path().join("marker.png");

    // A 64x64 diagonal wedge; asymmetric, so only one rotation matches.
    let mut cells = vec![0u8; 64 * 64];
    for y in 0..64usize {
        for x in 0..64usize {
            cells[y * 64 + x] = if x > y { 230 } else { 20 };
        }
    }
    image::GrayImage::from_raw(64, 64, cells)
        .unwrap()
        .save(&pattern)
        .unwrap();

    fidtrack()
        .args(["generate", "--size", "320", "--pattern"])
        .arg(&pattern)
        .arg("--out")
        .arg(&marker)
        .assert()
        .success();

    fidtrack()
        .args(["detect", "--pattern"])
        .arg(&pattern)
        .arg("--image")
        .arg(&marker)
        .assert()
        .success()
        .stdout(predicate::str::contains("\"id\": 0"));
}

#[test]
fn camera_template_prints_valid_json() {
    let output = fidtrack()
        .args(["camera-template", "--width", "1280", "--height", "720"])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let json: serde_json::Value = serde_json::from_slice(&output).unwrap();
    assert_eq!(json["width"], 1280);
    assert_eq!(json["height"], 720);
    assert_eq!(json["intrinsics"]["cx"], 640.0);
}

#[test]
fn out_of_range_binary_id_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    fidtrack()
        .args(["generate", "--id", "512", "--out"])
        .arg(dir.path().join("nope.png"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("0 to 511"));
}
