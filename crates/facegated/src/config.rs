use std::path::PathBuf;

use facegate_core::{LbphParams, PipelineSettings};

/// Which face detector the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DetectorKind {
    /// SCRFD ONNX model from `model_dir`.
    Scrfd,
    /// Treat every frame as one face; for pre-cropped uploads.
    WholeFrame,
}

/// Which D-Bus bus the service is published on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusKind {
    Session,
    System,
}

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path (default: /dev/video0).
    pub camera_device: String,
    pub camera_width: u32,
    pub camera_height: u32,
    /// Root of faces/, models/, users.json and access_log.jsonl.
    pub data_dir: PathBuf,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    pub detector: DetectorKind,
    pub bus: BusKind,
    pub settings: PipelineSettings,
}

impl Config {
    /// Load configuration from `FACEGATE_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub(crate) fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Self {
        let data_dir = var("FACEGATE_DATA_DIR").map(PathBuf::from).unwrap_or_else(|| {
            var("XDG_DATA_HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| {
                    let home = var("HOME").unwrap_or_else(|| "/tmp".to_string());
                    PathBuf::from(home).join(".local/share")
                })
                .join("facegate")
        });

        let model_dir = var("FACEGATE_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| data_dir.join("onnx"));

        let detector = match var("FACEGATE_DETECTOR").as_deref() {
            Some("whole-frame") | Some("whole_frame") | Some("none") => DetectorKind::WholeFrame,
            _ => DetectorKind::Scrfd,
        };
        let bus = match var("FACEGATE_BUS").as_deref() {
            Some("system") => BusKind::System,
            _ => BusKind::Session,
        };

        let defaults = PipelineSettings::default();
        let settings = PipelineSettings {
            threshold: parse_or(&var, "FACEGATE_THRESHOLD", defaults.threshold),
            min_face_size: parse_or(&var, "FACEGATE_MIN_FACE_SIZE", defaults.min_face_size),
            quick_match_attempts: parse_or(&var, "FACEGATE_QUICK_MATCH_ATTEMPTS", defaults.quick_match_attempts),
            samples_per_enroll: parse_or(&var, "FACEGATE_SAMPLES_PER_ENROLL", defaults.samples_per_enroll),
            max_capture_frames: parse_or(&var, "FACEGATE_MAX_CAPTURE_FRAMES", defaults.max_capture_frames),
            frames_per_identify: parse_or(&var, "FACEGATE_FRAMES_PER_IDENTIFY", defaults.frames_per_identify),
            lbph: LbphParams::default(),
        };

        Self {
            camera_device: var("FACEGATE_CAMERA_DEVICE").unwrap_or_else(|| "/dev/video0".to_string()),
            camera_width: parse_or(&var, "FACEGATE_CAMERA_WIDTH", 640),
            camera_height: parse_or(&var, "FACEGATE_CAMERA_HEIGHT", 480),
            data_dir,
            model_dir,
            detector,
            bus,
            settings,
        }
    }

    pub fn faces_dir(&self) -> PathBuf {
        self.data_dir.join("faces")
    }

    pub fn models_dir(&self) -> PathBuf {
        self.data_dir.join("models")
    }

    pub fn contacts_path(&self) -> PathBuf {
        self.data_dir.join("users.json")
    }

    pub fn access_log_path(&self) -> PathBuf {
        self.data_dir.join("access_log.jsonl")
    }

    /// Path to the SCRFD detection model.
    pub fn scrfd_model_path(&self) -> String {
        self.model_dir
            .join("det_10g.onnx")
            .to_string_lossy()
            .into_owned()
    }
}

fn parse_or<T: std::str::FromStr>(var: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    match var(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Config {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[("HOME", "/home/alice")]);
        assert_eq!(cfg.camera_device, "/dev/video0");
        assert_eq!(cfg.data_dir, PathBuf::from("/home/alice/.local/share/facegate"));
        assert_eq!(cfg.model_dir, cfg.data_dir.join("onnx"));
        assert_eq!(cfg.detector, DetectorKind::Scrfd);
        assert_eq!(cfg.bus, BusKind::Session);
        assert_eq!(cfg.settings, PipelineSettings::default());
        assert_eq!(cfg.settings.threshold, 75.0);
    }

    #[test]
    fn test_data_dir_precedence() {
        let cfg = config(&[("HOME", "/home/alice"), ("XDG_DATA_HOME", "/xdg")]);
        assert_eq!(cfg.data_dir, PathBuf::from("/xdg/facegate"));

        let cfg = config(&[("XDG_DATA_HOME", "/xdg"), ("FACEGATE_DATA_DIR", "/srv/gate")]);
        assert_eq!(cfg.data_dir, PathBuf::from("/srv/gate"));
        assert_eq!(cfg.faces_dir(), PathBuf::from("/srv/gate/faces"));
        assert_eq!(cfg.models_dir(), PathBuf::from("/srv/gate/models"));
        assert_eq!(cfg.contacts_path(), PathBuf::from("/srv/gate/users.json"));
        assert_eq!(cfg.access_log_path(), PathBuf::from("/srv/gate/access_log.jsonl"));
    }

    #[test]
    fn test_overrides() {
        let cfg = config(&[
            ("FACEGATE_CAMERA_DEVICE", "/dev/video2"),
            ("FACEGATE_THRESHOLD", "60.5"),
            ("FACEGATE_SAMPLES_PER_ENROLL", "10"),
            ("FACEGATE_DETECTOR", "whole-frame"),
            ("FACEGATE_BUS", "system"),
            ("FACEGATE_MODEL_DIR", "/opt/models"),
        ]);
        assert_eq!(cfg.camera_device, "/dev/video2");
        assert_eq!(cfg.settings.threshold, 60.5);
        assert_eq!(cfg.settings.samples_per_enroll, 10);
        assert_eq!(cfg.detector, DetectorKind::WholeFrame);
        assert_eq!(cfg.bus, BusKind::System);
        assert_eq!(cfg.scrfd_model_path(), "/opt/models/det_10g.onnx");
    }

    #[test]
    fn test_unparsable_values_fall_back() {
        let cfg = config(&[("FACEGATE_THRESHOLD", "high"), ("FACEGATE_CAMERA_WIDTH", "-1")]);
        assert_eq!(cfg.settings.threshold, 75.0);
        assert_eq!(cfg.camera_width, 640);
    }
}
