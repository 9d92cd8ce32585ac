//! facegate-core — enrollment, training and identification pipeline.
//!
//! Faces are located by a [`FaceDetector`], normalized to a canonical
//! 200x200 grayscale crop, stored per identity in a [`DatasetStore`], and
//! learned by an LBPH model that is persisted together with its
//! [`LabelMap`] as one atomically published generation.

pub mod dataset;
pub mod detector;
pub mod enrollment;
pub mod error;
pub mod labels;
pub mod lbph;
pub mod matcher;
pub mod model_store;
pub mod normalize;
pub mod pipeline;
pub mod source;
pub mod trainer;
pub mod types;

pub use dataset::DatasetStore;
pub use detector::{DetectorError, FaceDetector, ScrfdDetector, WholeFrameDetector};
pub use enrollment::{enroll, EnrollRequest, EnrollmentOutcome, GuardPolicy};
pub use error::{PipelineError, StoreError};
pub use labels::LabelMap;
pub use lbph::{LbphModel, LbphParams};
pub use matcher::DEFAULT_THRESHOLD;
pub use model_store::{ModelStore, TrainedModel};
pub use normalize::{FaceCrop, CANONICAL_SIZE};
pub use pipeline::{identify_source, PipelineSettings};
pub use source::{FrameSource, SourceError, StillFrames};
pub use trainer::train;
pub use types::{
    BoundingBox, CandidateDecision, Frame, IdentifyReport, IdentityDecision, IdentityName,
    MatchResult, TrainingSummary,
};
