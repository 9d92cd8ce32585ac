use facegate_core::{
    enroll, identify_source, train, DatasetStore, DetectorError, EnrollRequest, EnrollmentOutcome,
    FaceDetector, FrameSource, GuardPolicy, IdentifyReport, IdentityName, ModelStore,
    PipelineError, PipelineSettings, ScrfdDetector, SourceError, StillFrames, StoreError,
    TrainedModel, TrainingSummary, WholeFrameDetector,
};
use facegate_hw::CameraSession;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

use crate::awards::{AccessEntry, AccessLog, AwardSink, LogAwardSink};
use crate::config::{Config, DetectorKind};
use crate::contacts::{ContactBook, ContactError, JsonContactBook};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error("detector error: {0}")]
    Detector(#[from] DetectorError),
    #[error("contact book error: {0}")]
    Contacts(#[from] ContactError),
    #[error("failed to start engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Where an enrollment or identification gets its frames.
#[derive(Debug, Clone)]
pub enum Capture {
    /// A fresh session on the configured camera.
    Camera,
    /// Base64-encoded still images, in order.
    Images(Vec<String>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardStatus {
    Granted,
    Denied,
}

/// Identification report plus what the gate did with it.
#[derive(Debug, Clone, Serialize)]
pub struct IdentifyResponse {
    #[serde(flatten)]
    pub report: IdentifyReport,
    pub award: AwardStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contact: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdentitySummary {
    pub name: String,
    pub samples: usize,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct EngineStatus {
    pub version: &'static str,
    pub detector: &'static str,
    pub camera: String,
    pub data_dir: String,
    pub generation: Option<String>,
    pub identities: usize,
    pub threshold: f64,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        name: String,
        contact: Option<String>,
        guard: GuardPolicy,
        capture: Capture,
        reply: oneshot::Sender<Result<EnrollmentOutcome, EngineError>>,
    },
    Train {
        reply: oneshot::Sender<Result<TrainingSummary, EngineError>>,
    },
    Identify {
        threshold: Option<f64>,
        capture: Capture,
        reply: oneshot::Sender<Result<IdentifyResponse, EngineError>>,
    },
    List {
        reply: oneshot::Sender<Result<Vec<IdentitySummary>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<EngineStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Enroll `name`, capturing from `capture`, and record `contact` on success.
    pub async fn enroll(
        &self,
        name: String,
        contact: Option<String>,
        guard: GuardPolicy,
        capture: Capture,
    ) -> Result<EnrollmentOutcome, EngineError> {
        self.call(|reply| EngineRequest::Enroll {
            name,
            contact,
            guard,
            capture,
            reply,
        })
        .await?
    }

    /// Rebuild the model from the whole dataset.
    pub async fn train(&self) -> Result<TrainingSummary, EngineError> {
        self.call(|reply| EngineRequest::Train { reply }).await?
    }

    /// Identify whoever `capture` shows. `None` uses the configured threshold.
    pub async fn identify(
        &self,
        threshold: Option<f64>,
        capture: Capture,
    ) -> Result<IdentifyResponse, EngineError> {
        self.call(|reply| EngineRequest::Identify {
            threshold,
            capture,
            reply,
        })
        .await?
    }

    pub async fn list_identities(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        self.call(|reply| EngineRequest::List { reply }).await?
    }

    pub async fn status(&self) -> Result<EngineStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Load the detector and stores for `config`, then spawn the engine thread.
///
/// Fails fast at startup if the detector model or contact book is unusable.
/// The camera is only opened per request.
pub fn spawn_engine(config: &Config) -> Result<EngineHandle, EngineError> {
    let detector: Box<dyn FaceDetector + Send> = match config.detector {
        DetectorKind::Scrfd => {
            let path = config.scrfd_model_path();
            let detector = ScrfdDetector::load(&path)?;
            tracing::info!(path = %path, "SCRFD detector loaded");
            Box::new(detector)
        }
        DetectorKind::WholeFrame => {
            tracing::info!("whole-frame detector selected; uploads must be pre-cropped faces");
            Box::new(WholeFrameDetector)
        }
    };
    spawn(Engine::new(config, detector)?)
}

fn spawn(mut engine: Engine) -> Result<EngineHandle, EngineError> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                engine.handle(req);
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx })
}

/// State owned by the engine thread. Every request runs to completion
/// before the next one starts, so training never overlaps identification.
struct Engine {
    detector: Box<dyn FaceDetector + Send>,
    dataset: DatasetStore,
    models: ModelStore,
    settings: PipelineSettings,
    camera_device: String,
    camera_size: (u32, u32),
    data_dir: String,
    detector_kind: DetectorKind,
    contacts: Box<dyn ContactBook + Send>,
    awards: Box<dyn AwardSink + Send>,
    access_log: AccessLog,
    trained: Option<TrainedModel>,
}

impl Engine {
    fn new(config: &Config, detector: Box<dyn FaceDetector + Send>) -> Result<Self, EngineError> {
        Ok(Self {
            detector,
            dataset: DatasetStore::new(config.faces_dir()),
            models: ModelStore::new(config.models_dir()),
            settings: config.settings,
            camera_device: config.camera_device.clone(),
            camera_size: (config.camera_width, config.camera_height),
            data_dir: config.data_dir.display().to_string(),
            detector_kind: config.detector,
            contacts: Box::new(JsonContactBook::open(config.contacts_path())?),
            awards: Box::new(LogAwardSink::default()),
            access_log: AccessLog::new(config.access_log_path()),
            trained: None,
        })
    }

    fn handle(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::Enroll {
                name,
                contact,
                guard,
                capture,
                reply,
            } => {
                let result = self.run_enroll(&name, contact.as_deref(), guard, capture);
                if let Err(e) = &result {
                    tracing::warn!(identity = %name, error = %e, "enrollment failed");
                }
                let _ = reply.send(result);
            }
            EngineRequest::Train { reply } => {
                let result = train(&self.dataset, &self.models, self.settings.lbph)
                    .map(|(trained, summary)| {
                        self.trained = Some(trained);
                        summary
                    })
                    .map_err(EngineError::from);
                let _ = reply.send(result);
            }
            EngineRequest::Identify {
                threshold,
                capture,
                reply,
            } => {
                let result = self.run_identify(threshold, capture);
                if let Err(e) = &result {
                    tracing::warn!(error = %e, "identification failed");
                }
                let _ = reply.send(result);
            }
            EngineRequest::List { reply } => {
                let _ = reply.send(self.list_identities());
            }
            EngineRequest::Status { reply } => {
                let _ = reply.send(self.status());
            }
        }
    }

    fn open_source(&self, capture: Capture) -> Result<Box<dyn FrameSource>, EngineError> {
        Ok(match capture {
            Capture::Camera => {
                let (width, height) = self.camera_size;
                let session = CameraSession::open(&self.camera_device, width, height)
                    .map_err(SourceError::from)?;
                Box::new(session)
            }
            Capture::Images(images) => Box::new(StillFrames::from_base64(&images)?),
        })
    }

    fn run_enroll(
        &mut self,
        name: &str,
        contact: Option<&str>,
        guard: GuardPolicy,
        capture: Capture,
    ) -> Result<EnrollmentOutcome, EngineError> {
        let request = EnrollRequest {
            name: IdentityName::parse(name)?,
            guard,
        };
        let mut source = self.open_source(capture)?;
        let outcome = enroll(
            &request,
            self.detector.as_mut(),
            source.as_mut(),
            &self.dataset,
            &self.models,
            &self.settings,
        )?;
        drop(source);

        match &outcome {
            EnrollmentOutcome::NewEnrollment { name, .. }
            | EnrollmentOutcome::AppendEnrollment { name, .. }
            | EnrollmentOutcome::AlreadyRegistered { name } => {
                self.contacts.upsert(name, contact)?;
            }
            EnrollmentOutcome::RejectedDuplicate { .. } | EnrollmentOutcome::NoFaceCaptured { .. } => {}
        }
        Ok(outcome)
    }

    /// The current generation, reloaded when another run has replaced it.
    fn take_model(&mut self) -> Result<TrainedModel, EngineError> {
        let current = self.models.current_generation()?;
        let cached = self
            .trained
            .take()
            .filter(|t| current.as_deref() == Some(t.generation.as_str()));
        match cached {
            Some(trained) => Ok(trained),
            None => Ok(self.models.load()?),
        }
    }

    fn run_identify(
        &mut self,
        threshold: Option<f64>,
        capture: Capture,
    ) -> Result<IdentifyResponse, EngineError> {
        let threshold = threshold
            .filter(|t| t.is_finite() && *t > 0.0)
            .unwrap_or(self.settings.threshold);
        let trained = self.take_model()?;
        let mut source = self.open_source(capture)?;
        let report = identify_source(
            self.detector.as_mut(),
            source.as_mut(),
            &trained,
            threshold,
            &self.settings,
            self.settings.frames_per_identify,
        );
        self.trained = Some(trained);
        let report = report?;
        drop(source);

        if let Err(e) = self.access_log.append(&AccessEntry::from_decision(&report.primary)) {
            tracing::warn!(path = %self.access_log.path().display(), error = %e, "failed to write access log");
        }

        let (award, contact) = match report.primary.name.as_deref() {
            Some(name) if report.primary.matched => {
                let contact = self.contacts.contact(name);
                self.awards.grant(&report.primary, contact.as_deref());
                (AwardStatus::Granted, contact)
            }
            _ => (AwardStatus::Denied, None),
        };

        Ok(IdentifyResponse {
            report,
            award,
            contact,
        })
    }

    fn list_identities(&self) -> Result<Vec<IdentitySummary>, EngineError> {
        self.dataset
            .list_identities()?
            .into_iter()
            .map(|name| {
                Ok(IdentitySummary {
                    samples: self.dataset.sample_count(&name)?,
                    contact: self.contacts.contact(&name),
                    name,
                })
            })
            .collect()
    }

    fn status(&self) -> EngineStatus {
        let generation = self.models.current_generation().unwrap_or_else(|e| {
            tracing::warn!(error = %e, "cannot read current model generation");
            None
        });
        let identities = self.dataset.list_identities().map(|ids| ids.len()).unwrap_or(0);
        EngineStatus {
            version: env!("CARGO_PKG_VERSION"),
            detector: match self.detector_kind {
                DetectorKind::Scrfd => "scrfd",
                DetectorKind::WholeFrame => "whole-frame",
            },
            camera: self.camera_device.clone(),
            data_dir: self.data_dir.clone(),
            generation,
            identities,
            threshold: self.settings.threshold,
        }
    }
}
