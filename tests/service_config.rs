use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::Builder;

use face_veil::config::ServiceConfig;

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "FACE_VEIL_CONFIG",
        "FACE_VEIL_ADDR",
        "FACE_VEIL_CAMERA",
        "FACE_VEIL_MODEL",
        "FACE_VEIL_BACKEND",
        "FACE_VEIL_MAX_UPLOAD_BYTES",
    ] {
        std::env::remove_var(key);
    }
}

fn write_config(suffix: &str, contents: &str) -> tempfile::NamedTempFile {
    let mut file = Builder::new()
        .suffix(suffix)
        .tempfile()
        .expect("temp config");
    std::io::Write::write_all(&mut file, contents.as_bytes()).expect("write config");
    file
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.addr, "0.0.0.0:5000");
    assert_eq!(cfg.max_upload_bytes, 200 * 1024 * 1024);
    assert_eq!(cfg.camera.device, "/dev/video0");
    assert_eq!(cfg.detector.backend, "ultraface");
    assert_eq!(cfg.jpeg_quality, 80);
    assert_eq!(cfg.poll_interval, Duration::from_millis(10));
    assert_eq!(cfg.frame_timeout, Duration::from_secs(10));
    assert_eq!(cfg, ServiceConfig::default());
}

#[test]
fn loads_toml_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(
        ".toml",
        r#"
addr = "127.0.0.1:8080"
max_upload_bytes = 1048576

[camera]
device = "/dev/video2"
width = 1280
height = 720
target_fps = 15

[detector]
backend = "none"
model_path = "/opt/models/rfb.onnx"

[stream]
jpeg_quality = 70
poll_interval_ms = 25
frame_timeout_ms = 2500
"#,
    );
    std::env::set_var("FACE_VEIL_CONFIG", file.path());
    std::env::set_var("FACE_VEIL_CAMERA", "stub://lobby");
    std::env::set_var("FACE_VEIL_MAX_UPLOAD_BYTES", "4096");

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.addr, "127.0.0.1:8080");
    assert_eq!(cfg.camera.device, "stub://lobby");
    assert_eq!((cfg.camera.width, cfg.camera.height), (1280, 720));
    assert_eq!(cfg.camera.target_fps, 15);
    assert_eq!(cfg.detector.backend, "none");
    assert_eq!(cfg.detector.model_path, PathBuf::from("/opt/models/rfb.onnx"));
    assert_eq!(cfg.max_upload_bytes, 4096);
    assert_eq!(cfg.jpeg_quality, 70);
    assert_eq!(cfg.poll_interval, Duration::from_millis(25));
    assert_eq!(cfg.frame_timeout, Duration::from_millis(2500));

    clear_env();
}

#[test]
fn loads_json_file_with_partial_sections() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(".json", r#"{ "detector": { "backend": "none" } }"#);
    std::env::set_var("FACE_VEIL_CONFIG", file.path());
    std::env::set_var("FACE_VEIL_BACKEND", "UltraFace");
    std::env::set_var("FACE_VEIL_MODEL", "models/custom.onnx");

    let cfg = ServiceConfig::load().expect("load config");
    assert_eq!(cfg.detector.backend, "ultraface");
    assert_eq!(cfg.detector.model_path, PathBuf::from("models/custom.onnx"));
    assert_eq!(cfg.camera.width, 640);

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let file = write_config(".toml", "[stream]\njpeg_quality = 0\n");
    std::env::set_var("FACE_VEIL_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());
    clear_env();

    let file = write_config(".toml", "[camera]\nwidth = 0\n");
    std::env::set_var("FACE_VEIL_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());
    clear_env();

    let file = write_config(".toml", "[stream]\nframe_timeout_ms = 5\n");
    std::env::set_var("FACE_VEIL_CONFIG", file.path());
    assert!(ServiceConfig::load().is_err());
    clear_env();

    std::env::set_var("FACE_VEIL_MAX_UPLOAD_BYTES", "lots");
    assert!(ServiceConfig::load().is_err());
    std::env::set_var("FACE_VEIL_MAX_UPLOAD_BYTES", "0");
    assert!(ServiceConfig::load().is_err());
    clear_env();

    std::env::set_var("FACE_VEIL_CONFIG", "/nonexistent/face-veil.toml");
    assert!(ServiceConfig::load().is_err());
    clear_env();
}
