//! Checks that an exported object-detection model exposes the tensor layout a
//! fixed-shape consumer expects, and derives the constants that consumer must
//! be built with.

pub mod batch;
pub mod contract;
pub mod error;
pub mod models;
pub mod pipeline;
pub mod report;
pub mod runtime;
pub mod verifier;

pub use contract::{ExpectedContract, ValueBound};
pub use error::VerifyError;
pub use models::{
    ArtifactDescriptors, DetectionHeadLayout, ElementType, HeadFormat, HeadOrientation,
    InferenceSample, TensorDescriptor, ValueRange,
};
pub use pipeline::{
    ConformanceStep, InspectStep, LayoutStep, SmokeTestStep, VerificationPipeline,
    VerificationStep, VerifyContext,
};
pub use report::{ConsumerSettings, VerificationReport};
pub use runtime::{ArtifactLoader, DimBindings, HostTensor, InferenceArtifact, TensorData};
pub use verifier::{
    ConformanceWarning, SmokeOptions, Verifier, WarningKind, derive_layout,
    derive_layout_oriented,
};
