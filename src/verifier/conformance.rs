use serde::Serialize;
use std::fmt;

use crate::contract::ExpectedContract;
use crate::models::{ArtifactDescriptors, DetectionHeadLayout, InferenceSample, format_shape};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    OutputShape,
    OutputRank,
    InputShape,
    InputType,
    ValueRange,
    NonFiniteValues,
    IndeterminateLayout,
    TooFewClasses,
    LabelCount,
}

/// A non-fatal mismatch between the artifact and the consumer's expectations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConformanceWarning {
    pub kind: WarningKind,
    pub message: String,
}

impl ConformanceWarning {
    fn new(kind: WarningKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ConformanceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Everything gathered about an artifact that the policy check looks at.
#[derive(Debug, Clone, Copy)]
pub struct Observations<'a> {
    pub descriptors: &'a ArtifactDescriptors,
    pub layout: Option<&'a DetectionHeadLayout>,
    pub sample: Option<&'a InferenceSample>,
    pub labels: Option<&'a [String]>,
}

/// Compares what was observed against the contract. Never fails; every
/// mismatch becomes a warning.
pub fn check_conformance(obs: &Observations<'_>, contract: &ExpectedContract) -> Vec<ConformanceWarning> {
    let mut warnings = Vec::new();

    let output = obs.descriptors.outputs.get(contract.output_index);
    let input = obs.descriptors.inputs.get(contract.input_index);

    if let (Some(output), Some(expected)) = (output, contract.expected_output_shape) {
        let expected_i64: Vec<i64> = expected.iter().map(|&d| d as i64).collect();
        if output.shape != expected_i64 {
            warnings.push(ConformanceWarning::new(
                WarningKind::OutputShape,
                format!(
                    "output `{}` has shape {}, expected {}",
                    output.name,
                    format_shape(&output.shape),
                    format_shape(&expected)
                ),
            ));
        }
        if let Some(sample) = obs.sample {
            let declared = output.concrete_shape();
            if sample.output_shape != expected && declared.as_deref() != Some(&sample.output_shape[..]) {
                warnings.push(ConformanceWarning::new(
                    WarningKind::OutputShape,
                    format!(
                        "smoke-test output `{}` has shape {}, expected {}",
                        sample.output_name,
                        format_shape(&sample.output_shape),
                        format_shape(&expected)
                    ),
                ));
            }
        }
    }

    if let (Some(output), Some(sample)) = (output, obs.sample) {
        if sample.output_rank() != output.rank() {
            warnings.push(ConformanceWarning::new(
                WarningKind::OutputRank,
                format!(
                    "smoke-test output has rank {} but `{}` declares rank {}",
                    sample.output_rank(),
                    output.name,
                    output.rank()
                ),
            ));
        }
    }

    if let Some(input) = input {
        if let Some(expected) = &contract.expected_input_shape {
            let expected_i64: Vec<i64> = expected.iter().map(|&d| d as i64).collect();
            if input.shape != expected_i64 {
                warnings.push(ConformanceWarning::new(
                    WarningKind::InputShape,
                    format!(
                        "input `{}` has shape {}, expected {}",
                        input.name,
                        format_shape(&input.shape),
                        format_shape(expected)
                    ),
                ));
            }
        }
        if let Some(expected) = &contract.expected_input_type {
            if &input.element_type != expected {
                warnings.push(ConformanceWarning::new(
                    WarningKind::InputType,
                    format!(
                        "input `{}` has element type {}, expected {}",
                        input.name, input.element_type, expected
                    ),
                ));
            }
        }
    }

    if let Some(sample) = obs.sample {
        if let (Some(bound), Some(range)) = (contract.value_bound, sample.range) {
            if !range.within(bound.lo, bound.hi) {
                warnings.push(ConformanceWarning::new(
                    WarningKind::ValueRange,
                    format!(
                        "output values span [{:.4}, {:.4}], outside the expected [{}, {}]",
                        range.min, range.max, bound.lo, bound.hi
                    ),
                ));
            }
        }
        if sample.non_finite > 0 {
            warnings.push(ConformanceWarning::new(
                WarningKind::NonFiniteValues,
                format!(
                    "output contains {} non-finite value(s) out of {}",
                    sample.non_finite,
                    sample.output_values.len()
                ),
            ));
        }
    }

    if let Some(layout) = obs.layout {
        if !layout.is_determinate() {
            warnings.push(ConformanceWarning::new(
                WarningKind::IndeterminateLayout,
                format!(
                    "{} features per anchor leave {} class scores after {} geometry fields",
                    layout.features_per_anchor, layout.class_count, layout.fixed_geometry_fields
                ),
            ));
        } else if let Some(min) = contract.min_class_count {
            if layout.class_count < min as i64 {
                warnings.push(ConformanceWarning::new(
                    WarningKind::TooFewClasses,
                    format!(
                        "derived class count {} is below the configured minimum {}; the output may already be decoded",
                        layout.class_count, min
                    ),
                ));
            }
        }

        if let Some(labels) = obs.labels {
            if layout.class_count != labels.len() as i64 {
                warnings.push(ConformanceWarning::new(
                    WarningKind::LabelCount,
                    format!(
                        "model has {} classes but the labels file lists {}",
                        layout.class_count,
                        labels.len()
                    ),
                ));
            }
        }
    }

    warnings
}
