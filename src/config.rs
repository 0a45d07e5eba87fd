use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::DetectorSettings;
use crate::frame::DEFAULT_JPEG_QUALITY;
use crate::ingest::CameraSettings;

const DEFAULT_ADDR: &str = "0.0.0.0:5000";
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 200 * 1024 * 1024;
const DEFAULT_POLL_INTERVAL_MS: u64 = 10;
const DEFAULT_FRAME_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Deserialize, Default)]
struct ServiceConfigFile {
    addr: Option<String>,
    max_upload_bytes: Option<u64>,
    camera: Option<CameraConfigFile>,
    detector: Option<DetectorConfigFile>,
    stream: Option<StreamConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraConfigFile {
    device: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
struct StreamConfigFile {
    jpeg_quality: Option<u8>,
    poll_interval_ms: Option<u64>,
    frame_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub addr: String,
    /// Request bodies above this size are rejected with 413.
    pub max_upload_bytes: u64,
    pub camera: CameraSettings,
    pub detector: DetectorSettings,
    pub jpeg_quality: u8,
    pub poll_interval: Duration,
    /// A live stream that waits longer than this for a frame ends.
    pub frame_timeout: Duration,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::from_file(ServiceConfigFile::default())
    }
}

impl ServiceConfig {
    /// Defaults, then the file named by `FACE_VEIL_CONFIG`, then
    /// `FACE_VEIL_*` overrides.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("FACE_VEIL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ServiceConfigFile) -> Self {
        let camera_defaults = CameraSettings::default();
        let camera_file = file.camera.unwrap_or_default();
        let camera = CameraSettings {
            device: camera_file.device.unwrap_or(camera_defaults.device),
            width: camera_file.width.unwrap_or(camera_defaults.width),
            height: camera_file.height.unwrap_or(camera_defaults.height),
            target_fps: camera_file.target_fps.unwrap_or(camera_defaults.target_fps),
        };

        let detector_defaults = DetectorSettings::default();
        let detector_file = file.detector.unwrap_or_default();
        let detector = DetectorSettings {
            backend: detector_file.backend.unwrap_or(detector_defaults.backend),
            model_path: detector_file
                .model_path
                .unwrap_or(detector_defaults.model_path),
        };

        let stream = file.stream.unwrap_or_default();
        Self {
            addr: file.addr.unwrap_or_else(|| DEFAULT_ADDR.to_string()),
            max_upload_bytes: file.max_upload_bytes.unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            camera,
            detector,
            jpeg_quality: stream.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            poll_interval: Duration::from_millis(
                stream.poll_interval_ms.unwrap_or(DEFAULT_POLL_INTERVAL_MS),
            ),
            frame_timeout: Duration::from_millis(
                stream.frame_timeout_ms.unwrap_or(DEFAULT_FRAME_TIMEOUT_MS),
            ),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(addr) = std::env::var("FACE_VEIL_ADDR") {
            if !addr.trim().is_empty() {
                self.addr = addr;
            }
        }
        if let Ok(device) = std::env::var("FACE_VEIL_CAMERA") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(model) = std::env::var("FACE_VEIL_MODEL") {
            if !model.trim().is_empty() {
                self.detector.model_path = PathBuf::from(model);
            }
        }
        if let Ok(backend) = std::env::var("FACE_VEIL_BACKEND") {
            if !backend.trim().is_empty() {
                self.detector.backend = backend.trim().to_lowercase();
            }
        }
        if let Ok(limit) = std::env::var("FACE_VEIL_MAX_UPLOAD_BYTES") {
            self.max_upload_bytes = limit.trim().parse().map_err(|_| {
                anyhow!("FACE_VEIL_MAX_UPLOAD_BYTES must be an integer number of bytes")
            })?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!(
                "jpeg_quality must be between 1 and 100 (got {})",
                self.jpeg_quality
            ));
        }
        if self.max_upload_bytes == 0 {
            return Err(anyhow!("max_upload_bytes must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "camera size must be non-zero (got {}x{})",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.camera.device.trim().is_empty() {
            return Err(anyhow!("camera device must not be empty"));
        }
        if self.poll_interval.is_zero() {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        if self.frame_timeout < self.poll_interval {
            return Err(anyhow!("frame_timeout_ms must not be shorter than poll_interval_ms"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ServiceConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}
