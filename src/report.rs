use serde::Serialize;
use std::fmt::{self, Write as _};
use std::path::PathBuf;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::models::{
    DetectionHeadLayout, HeadOrientation, InferenceSample, TensorDescriptor, format_shape,
};
use crate::verifier::ConformanceWarning;

const RULE: &str = "============================================================";

/// Constants the downstream consumer has to be built with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsumerSettings {
    pub total_classes: i64,
    pub anchor_count: usize,
    pub features_per_anchor: usize,
    pub input_width: Option<usize>,
    pub input_height: Option<usize>,
    pub expected_output: [usize; 3],
}

impl ConsumerSettings {
    pub fn derive(
        layout: &DetectionHeadLayout,
        input: Option<&TensorDescriptor>,
        orientation: HeadOrientation,
    ) -> Self {
        let expected_output = match orientation {
            HeadOrientation::AnchorsMajor => [
                layout.batch_size,
                layout.anchor_count,
                layout.features_per_anchor,
            ],
            HeadOrientation::FeaturesMajor => [
                layout.batch_size,
                layout.features_per_anchor,
                layout.anchor_count,
            ],
        };
        let (input_width, input_height) = input
            .and_then(|d| image_size(&d.shape))
            .map(|(w, h)| (Some(w), Some(h)))
            .unwrap_or((None, None));

        Self {
            total_classes: layout.class_count,
            anchor_count: layout.anchor_count,
            features_per_anchor: layout.features_per_anchor,
            input_width,
            input_height,
            expected_output,
        }
    }
}

/// Width and height of an NHWC or NCHW image input.
fn image_size(shape: &[i64]) -> Option<(usize, usize)> {
    let dims: Vec<usize> = shape
        .iter()
        .map(|&d| usize::try_from(d).ok())
        .collect::<Option<_>>()?;
    match dims.as_slice() {
        [_, h, w, c] if matches!(*c, 1 | 3 | 4) => Some((*w, *h)),
        [_, c, h, w] if matches!(*c, 1 | 3 | 4) => Some((*w, *h)),
        _ => None,
    }
}

/// Everything learned about one artifact.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationReport {
    pub artifact: PathBuf,
    pub checked_at: String,
    pub runtime: String,
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
    pub fixed_geometry_fields: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout: Option<DetectionHeadLayout>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub layout_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke: Option<InferenceSample>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smoke_error: Option<String>,
    pub smoke_skipped: bool,
    pub warnings: Vec<ConformanceWarning>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consumer_settings: Option<ConsumerSettings>,
}

impl VerificationReport {
    pub fn new(artifact: PathBuf, runtime: impl Into<String>, fixed_geometry_fields: usize) -> Self {
        Self {
            artifact,
            checked_at: OffsetDateTime::now_utc()
                .format(&Rfc3339)
                .unwrap_or_default(),
            runtime: runtime.into(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            fixed_geometry_fields,
            layout: None,
            layout_error: None,
            smoke: None,
            smoke_error: None,
            smoke_skipped: false,
            warnings: Vec::new(),
            consumer_settings: None,
        }
    }

    /// True when the smoke test failed. Warnings never make a report fatal.
    pub fn is_fatal(&self) -> bool {
        self.smoke_error.is_some()
    }

    pub fn is_conformant(&self) -> bool {
        !self.is_fatal() && self.warnings.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        // Writing into a String cannot fail.
        let _ = self.write_text(&mut out);
        out
    }

    fn write_text(&self, out: &mut String) -> fmt::Result {
        writeln!(out, "{}", RULE)?;
        writeln!(out, "MODEL INSPECTION RESULTS: {}", self.artifact.display())?;
        writeln!(out, "{}", RULE)?;

        writeln!(out, "\nInputs:")?;
        write_descriptors(out, &self.inputs)?;
        writeln!(out, "\nOutputs:")?;
        write_descriptors(out, &self.outputs)?;

        writeln!(out, "\nAnalysis:")?;
        match (&self.layout, &self.layout_error) {
            (Some(layout), _) => {
                writeln!(out, "  Batch size: {}", layout.batch_size)?;
                writeln!(out, "  Number of anchors: {}", layout.anchor_count)?;
                writeln!(out, "  Features per anchor: {}", layout.features_per_anchor)?;
                writeln!(
                    out,
                    "  Calculated classes: {} (features - {})",
                    layout.class_count, layout.fixed_geometry_fields
                )?;
            }
            (None, Some(err)) => writeln!(out, "  Layout not derived: {}", err)?,
            (None, None) => writeln!(out, "  Layout not derived: no output tensor")?,
        }

        if let Some(settings) = &self.consumer_settings {
            writeln!(out, "\nConsumer settings:")?;
            writeln!(out, "  totalClasses = {}", settings.total_classes)?;
            writeln!(out, "  numAnchors = {}", settings.anchor_count)?;
            writeln!(out, "  featuresPerAnchor = {}", settings.features_per_anchor)?;
            if let (Some(w), Some(h)) = (settings.input_width, settings.input_height) {
                writeln!(out, "  inputSize = {}x{}", w, h)?;
            }
            writeln!(
                out,
                "  Expected output: {}",
                format_shape(&settings.expected_output)
            )?;
        }

        writeln!(out, "\nSmoke test:")?;
        match (&self.smoke, &self.smoke_error) {
            (Some(sample), _) => {
                writeln!(
                    out,
                    "  Input: {} {} {}",
                    sample.input_name,
                    format_shape(&sample.input_shape),
                    sample.input_type
                )?;
                writeln!(out, "  Output shape: {}", format_shape(&sample.output_shape))?;
                match sample.range {
                    Some(range) => {
                        writeln!(out, "  Value range: [{:.4}, {:.4}]", range.min, range.max)?
                    }
                    None => writeln!(out, "  Value range: no finite values")?,
                }
            }
            (None, Some(err)) => writeln!(out, "  FAILED: {}", err)?,
            (None, None) if self.smoke_skipped => writeln!(out, "  skipped")?,
            (None, None) => writeln!(out, "  not run")?,
        }

        if !self.warnings.is_empty() {
            writeln!(out, "\nConformance warnings:")?;
            for warning in &self.warnings {
                writeln!(out, "  - {}", warning)?;
            }
        }

        writeln!(out)?;
        let verdict = if self.is_fatal() {
            "FAILED: smoke test did not complete"
        } else if self.warnings.is_empty() {
            "OK: artifact matches the expected contract"
        } else {
            "WARN: artifact loaded and ran but does not match every expectation"
        };
        writeln!(out, "{}", verdict)?;
        writeln!(out, "{}", RULE)
    }
}

fn write_descriptors(out: &mut String, descriptors: &[TensorDescriptor]) -> fmt::Result {
    if descriptors.is_empty() {
        return writeln!(out, "  (none)");
    }
    for (i, desc) in descriptors.iter().enumerate() {
        writeln!(out, "  [{}] Name: {}", i, desc.name)?;
        writeln!(out, "      Shape: {}", format_shape(&desc.shape))?;
        writeln!(out, "      Type: {}", desc.element_type)?;
    }
    Ok(())
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}
