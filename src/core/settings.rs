use crate::device::process::StopTimeouts;
use crate::session::types::{CameraConfig, Size};
use crate::shared::paths::{default_output_dir, ensure_dir, get_storage_dir};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const MAX_CAMERAS: usize = 2;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CameraSettings {
    pub label: String,
    pub camera_index: u32,
    pub preview_size: Size,
    pub record_size: Size,
    pub frame_rate: u32,
    /// Bits per second.
    pub bitrate: u32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self::for_index(0)
    }
}

impl CameraSettings {
    pub fn for_index(camera_index: u32) -> Self {
        Self {
            label: format!("cam{}", camera_index),
            camera_index,
            preview_size: Size::new(640, 360),
            record_size: Size::new(1920, 1080),
            frame_rate: 30,
            bitrate: 10_000_000,
        }
    }

    /// Two-camera preset: both sensors share the bus, so each runs slower.
    pub fn dual_preset(camera_index: u32) -> Self {
        Self {
            frame_rate: 10,
            bitrate: 8_000_000,
            ..Self::for_index(camera_index)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RigSettings {
    pub output_dir: Option<PathBuf>,
    pub remux_tool: String,
    pub poll_interval_ms: u64,
    pub stop_grace_ms: u64,
    pub stop_terminate_ms: u64,
    pub cameras: Vec<CameraSettings>,
}

impl Default for RigSettings {
    fn default() -> Self {
        Self {
            output_dir: None,
            remux_tool: "ffmpeg".to_string(),
            poll_interval_ms: 100,
            stop_grace_ms: 10_000,
            stop_terminate_ms: 5_000,
            cameras: vec![CameraSettings::for_index(0)],
        }
    }
}

impl RigSettings {
    /// Resize the camera list to `count`, switching to the dual preset when
    /// more than one camera is used. Cameras already configured are kept.
    pub fn with_camera_count(mut self, count: usize) -> Result<Self, SettingsError> {
        if count == 0 || count > MAX_CAMERAS {
            return Err(SettingsError::InvalidCameraCount(count));
        }
        if self.cameras.len() == count {
            return Ok(self);
        }

        self.cameras.truncate(count);
        let preset = if count > 1 {
            CameraSettings::dual_preset
        } else {
            CameraSettings::for_index
        };
        while self.cameras.len() < count {
            self.cameras.push(preset(self.cameras.len() as u32));
        }
        if count > 1 {
            let dual = preset(0);
            for camera in &mut self.cameras {
                camera.frame_rate = camera.frame_rate.min(dual.frame_rate);
                camera.bitrate = camera.bitrate.min(dual.bitrate);
            }
        }
        Ok(self)
    }

    /// Check the settings describe a usable rig.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.cameras.is_empty() || self.cameras.len() > MAX_CAMERAS {
            return Err(SettingsError::InvalidCameraCount(self.cameras.len()));
        }
        for camera in &self.cameras {
            if camera.frame_rate == 0 {
                return Err(SettingsError::Invalid(format!(
                    "{}: frame rate must be positive",
                    camera.label
                )));
            }
            if camera.bitrate == 0 {
                return Err(SettingsError::Invalid(format!(
                    "{}: bitrate must be positive",
                    camera.label
                )));
            }
        }
        let mut labels: Vec<&str> = self.cameras.iter().map(|c| c.label.as_str()).collect();
        labels.sort_unstable();
        labels.dedup();
        if labels.len() != self.cameras.len() {
            return Err(SettingsError::Invalid("camera labels must be unique".into()));
        }
        Ok(())
    }

    /// One `CameraConfig` per camera, in rig order.
    pub fn camera_configs(&self) -> Vec<CameraConfig> {
        self.cameras
            .iter()
            .enumerate()
            .map(|(camera_id, camera)| CameraConfig {
                camera_id,
                label: camera.label.clone(),
                camera_index: camera.camera_index,
                preview_size: camera.preview_size,
                record_size: camera.record_size,
                frame_rate: camera.frame_rate,
                bitrate: camera.bitrate,
            })
            .collect()
    }

    pub fn output_dir(&self) -> PathBuf {
        self.output_dir.clone().unwrap_or_else(default_output_dir)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }

    pub fn stop_timeouts(&self) -> StopTimeouts {
        StopTimeouts {
            graceful: Duration::from_millis(self.stop_grace_ms),
            terminate: Duration::from_millis(self.stop_terminate_ms),
        }
    }

    pub fn total_bitrate(&self) -> u64 {
        self.cameras.iter().map(|c| u64::from(c.bitrate)).sum()
    }
}

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings file: {0}")]
    ReadError(#[from] std::io::Error),
    #[error("Failed to parse settings: {0}")]
    ParseError(#[from] serde_json::Error),
    #[error("Unsupported camera count {0} (expected 1 or 2)")]
    InvalidCameraCount(usize),
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

pub fn get_settings_path() -> PathBuf {
    get_storage_dir().join("settings.json")
}

/// Load from the default location, falling back to defaults when the file is
/// missing or unreadable.
pub fn load_settings() -> RigSettings {
    let path = get_settings_path();

    if !path.exists() {
        return RigSettings::default();
    }

    match load_settings_from_file(&path) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::warn!(target: "system", "Ignoring {}: {}", path.display(), e);
            RigSettings::default()
        }
    }
}

pub fn load_settings_from_file(path: &Path) -> Result<RigSettings, SettingsError> {
    let contents = std::fs::read_to_string(path)?;
    let settings = serde_json::from_str(&contents)?;
    Ok(settings)
}

pub fn save_settings(settings: &RigSettings) -> Result<(), SettingsError> {
    save_settings_to_file(settings, &get_settings_path())
}

pub fn save_settings_to_file(settings: &RigSettings, path: &Path) -> Result<(), SettingsError> {
    if let Some(parent) = path.parent() {
        ensure_dir(parent)?;
    }
    let contents = serde_json::to_string_pretty(settings)?;
    std::fs::write(path, contents)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let settings = RigSettings::default();

        assert_eq!(settings.cameras.len(), 1);
        assert_eq!(settings.cameras[0].label, "cam0");
        assert_eq!(settings.cameras[0].preview_size, Size::new(640, 360));
        assert_eq!(settings.cameras[0].record_size, Size::new(1920, 1080));
        assert_eq!(settings.cameras[0].frame_rate, 30);
        assert_eq!(settings.cameras[0].bitrate, 10_000_000);
        assert_eq!(settings.stop_timeouts(), StopTimeouts::default());
        settings.validate().unwrap();
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let settings: RigSettings = serde_json::from_str(
            r#"{ "outputDir": "/media/usb", "cameras": [{ "cameraIndex": 1, "label": "rear" }] }"#,
        )
        .unwrap();

        assert_eq!(settings.output_dir(), PathBuf::from("/media/usb"));
        assert_eq!(settings.remux_tool, "ffmpeg");
        assert_eq!(settings.cameras[0].label, "rear");
        assert_eq!(settings.cameras[0].camera_index, 1);
        assert_eq!(settings.cameras[0].frame_rate, 30);
    }

    #[test]
    fn test_dual_preset() {
        let settings = RigSettings::default().with_camera_count(2).unwrap();

        assert_eq!(settings.cameras.len(), 2);
        assert_eq!(settings.cameras[1].label, "cam1");
        assert_eq!(settings.cameras[1].camera_index, 1);
        for camera in &settings.cameras {
            assert_eq!(camera.frame_rate, 10);
            assert_eq!(camera.bitrate, 8_000_000);
        }
        assert_eq!(settings.total_bitrate(), 16_000_000);
    }

    #[test]
    fn test_invalid_camera_count() {
        assert!(matches!(
            RigSettings::default().with_camera_count(3),
            Err(SettingsError::InvalidCameraCount(3))
        ));
    }

    #[test]
    fn test_validate_rejects_duplicate_labels() {
        let mut settings = RigSettings::default().with_camera_count(2).unwrap();
        settings.cameras[1].label = "cam0".into();

        assert!(matches!(settings.validate(), Err(SettingsError::Invalid(_))));
    }

    #[test]
    fn test_camera_configs_follow_rig_order() {
        let configs = RigSettings::default().with_camera_count(2).unwrap().camera_configs();

        assert_eq!(configs[0].camera_id, 0);
        assert_eq!(configs[1].camera_id, 1);
        assert_eq!(configs[1].label, "cam1");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("nested").join("settings.json");
        let mut settings = RigSettings::default();
        settings.poll_interval_ms = 50;

        save_settings_to_file(&settings, &path).unwrap();
        let loaded = load_settings_from_file(&path).unwrap();

        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_load_reports_parse_errors() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            load_settings_from_file(&path),
            Err(SettingsError::ParseError(_))
        ));
    }
}
