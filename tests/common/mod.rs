#![allow(dead_code)]

mod fixtures;
pub use fixtures::*;

// Re-export commonly used types from modelcheck for tests
pub use modelcheck::{
    DetectionHeadLayout, ElementType, ExpectedContract, HeadFormat, HeadOrientation,
    VerificationPipeline, VerificationReport, VerifyError, WarningKind, derive_layout,
    derive_layout_oriented,
};
pub use modelcheck::verifier::SmokeOptions;
