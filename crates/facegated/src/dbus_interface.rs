use facegate_core::GuardPolicy;
use serde::Serialize;
use zbus::interface;

use crate::engine::{Capture, EngineError, EngineHandle};

pub const SERVICE_NAME: &str = "org.facegate.Gate1";
pub const OBJECT_PATH: &str = "/org/facegate/Gate1";

/// D-Bus interface for the facegate daemon.
///
/// Bus name: org.facegate.Gate1
/// Object path: /org/facegate/Gate1
///
/// Every method answers with a JSON document.
pub struct GateService {
    engine: EngineHandle,
}

impl GateService {
    pub fn new(engine: EngineHandle) -> Self {
        Self { engine }
    }
}

fn to_json<T: Serialize>(result: Result<T, EngineError>) -> zbus::fdo::Result<String> {
    let value = result.map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
    serde_json::to_string(&value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Empty strings from D-Bus callers mean "no contact".
fn contact_arg(contact: &str) -> Option<String> {
    let contact = contact.trim();
    (!contact.is_empty()).then(|| contact.to_string())
}

/// Non-positive thresholds select the configured default.
fn threshold_arg(threshold: f64) -> Option<f64> {
    (threshold > 0.0).then_some(threshold)
}

#[interface(name = "org.facegate.Gate1")]
impl GateService {
    /// Enroll `name` from the camera.
    async fn enroll(&self, name: &str, contact: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "enroll requested");
        to_json(
            self.engine
                .enroll(name.to_string(), contact_arg(contact), GuardPolicy::ExistingIdentity, Capture::Camera)
                .await,
        )
    }

    /// Enroll `name` from uploaded base64 images.
    async fn enroll_images(
        &self,
        name: &str,
        contact: &str,
        images: Vec<String>,
    ) -> zbus::fdo::Result<String> {
        tracing::info!(name, images = images.len(), "enroll from images requested");
        to_json(
            self.engine
                .enroll(
                    name.to_string(),
                    contact_arg(contact),
                    GuardPolicy::ExistingIdentity,
                    Capture::Images(images),
                )
                .await,
        )
    }

    /// Register someone an identification just reported as Unknown.
    /// The duplicate guard always runs.
    async fn enroll_unknown(&self, name: &str, contact: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "enroll unknown requested");
        to_json(
            self.engine
                .enroll(name.to_string(), contact_arg(contact), GuardPolicy::Always, Capture::Camera)
                .await,
        )
    }

    /// Rebuild the model from every stored sample.
    async fn train(&self) -> zbus::fdo::Result<String> {
        tracing::info!("train requested");
        to_json(self.engine.train().await)
    }

    /// Identify whoever is in front of the camera.
    async fn identify(&self, threshold: f64) -> zbus::fdo::Result<String> {
        tracing::info!(threshold, "identify requested");
        to_json(self.engine.identify(threshold_arg(threshold), Capture::Camera).await)
    }

    /// Identify the face in one uploaded base64 image.
    async fn identify_image(&self, image: String, threshold: f64) -> zbus::fdo::Result<String> {
        tracing::info!(threshold, "identify image requested");
        to_json(
            self.engine
                .identify(threshold_arg(threshold), Capture::Images(vec![image]))
                .await,
        )
    }

    /// Enrolled identities with their sample counts.
    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        to_json(self.engine.list_identities().await)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(self.engine.status().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_arg() {
        assert_eq!(contact_arg(""), None);
        assert_eq!(contact_arg("  "), None);
        assert_eq!(contact_arg(" a@b.org "), Some("a@b.org".to_string()));
    }

    #[test]
    fn test_threshold_arg() {
        assert_eq!(threshold_arg(0.0), None);
        assert_eq!(threshold_arg(-3.0), None);
        assert_eq!(threshold_arg(60.0), Some(60.0));
    }

    #[test]
    fn test_errors_become_failed() {
        let err = to_json::<()>(Err(EngineError::ChannelClosed)).unwrap_err();
        assert!(matches!(err, zbus::fdo::Error::Failed(ref msg) if msg == "engine thread exited"));
    }
}
