pub mod conformance;
pub mod synthetic;

use log::debug;
use std::path::Path;
use std::sync::Arc;

use crate::error::{Result, VerifyError};
use crate::models::{
    ArtifactDescriptors, DetectionHeadLayout, HeadFormat, HeadOrientation, InferenceSample,
    TensorDescriptor, ValueRange,
};
use crate::runtime::{ArtifactLoader, DimBindings, InferenceArtifact, RtenLoader};

pub use conformance::{ConformanceWarning, Observations, WarningKind, check_conformance};
pub use synthetic::synthetic_input;

/// Options for the synthetic inference pass.
#[derive(Debug, Clone, Default)]
pub struct SmokeOptions {
    pub output_index: usize,
    pub seed: u64,
    pub bindings: DimBindings,
}

/// Loads artifacts and runs the inspection and smoke-test operations.
///
/// Every call acquires its own interpreter and drops it before returning, so
/// a `Verifier` can be shared freely between threads.
#[derive(Clone)]
pub struct Verifier {
    loader: Arc<dyn ArtifactLoader>,
}

impl Verifier {
    pub fn new(loader: Arc<dyn ArtifactLoader>) -> Self {
        Self { loader }
    }

    pub fn with_rten() -> Self {
        Self::new(Arc::new(RtenLoader))
    }

    pub fn loader(&self) -> &dyn ArtifactLoader {
        self.loader.as_ref()
    }

    /// Loads `path` and resolves its shapes.
    pub fn open(&self, path: &Path, bindings: &DimBindings) -> Result<Box<dyn InferenceArtifact>> {
        if !path.is_file() {
            return Err(VerifyError::ArtifactLoad {
                path: path.to_path_buf(),
                reason: "no such file".to_string(),
            });
        }
        debug!("loading {} with {}", path.display(), self.loader.name());
        let mut artifact = self.loader.load(path)?;
        artifact.resolve_shapes(bindings)?;
        Ok(artifact)
    }

    /// Returns the declared input and output descriptors of `path`.
    pub fn inspect(&self, path: &Path, bindings: &DimBindings) -> Result<ArtifactDescriptors> {
        let artifact = self.open(path, bindings)?;
        Ok(describe(artifact.as_ref()))
    }

    /// Runs one synthetic forward pass on a freshly loaded copy of `path`.
    pub fn smoke_test(
        &self,
        path: &Path,
        input: &TensorDescriptor,
        options: &SmokeOptions,
    ) -> Result<InferenceSample> {
        let mut artifact = self.open(path, &options.bindings)?;
        smoke_test_artifact(artifact.as_mut(), path, input, options)
    }
}

pub fn describe(artifact: &dyn InferenceArtifact) -> ArtifactDescriptors {
    ArtifactDescriptors {
        inputs: artifact.input_descriptors(),
        outputs: artifact.output_descriptors(),
    }
}

/// Summarizes a `[batch, anchors, features]` output.
pub fn derive_layout(output: &TensorDescriptor, fixed_geometry_fields: usize) -> Result<DetectionHeadLayout> {
    derive_layout_oriented(
        output,
        HeadFormat::from_fields(fixed_geometry_fields),
        HeadOrientation::AnchorsMajor,
    )
}

/// Like [`derive_layout`], reading anchors and features from the axes named
/// by `orientation`.
pub fn derive_layout_oriented(
    output: &TensorDescriptor,
    format: HeadFormat,
    orientation: HeadOrientation,
) -> Result<DetectionHeadLayout> {
    let unsupported = || VerifyError::UnsupportedLayout {
        name: output.name.clone(),
        shape: output.shape.clone(),
    };

    let [batch, second, third] = output.shape.as_slice() else {
        return Err(unsupported());
    };
    let (Ok(batch), Ok(second), Ok(third)) = (
        usize::try_from(*batch),
        usize::try_from(*second),
        usize::try_from(*third),
    ) else {
        return Err(unsupported());
    };

    let (anchors, features) = match orientation {
        HeadOrientation::AnchorsMajor => (second, third),
        HeadOrientation::FeaturesMajor => (third, second),
    };
    let fields = format.fixed_geometry_fields();

    Ok(DetectionHeadLayout {
        batch_size: batch,
        anchor_count: anchors,
        features_per_anchor: features,
        class_count: features as i64 - fields as i64,
        fixed_geometry_fields: fields,
    })
}

/// Binds a random tensor to `input`, runs once and reads the requested output.
pub fn smoke_test_artifact(
    artifact: &mut dyn InferenceArtifact,
    path: &Path,
    input: &TensorDescriptor,
    options: &SmokeOptions,
) -> Result<InferenceSample> {
    let declared_inputs = artifact.input_descriptors();
    let slot = declared_inputs.iter().position(|d| d.name == input.name);
    // Errors report the shape the artifact itself declares for the slot.
    let declared = slot
        .map(|i| declared_inputs[i].shape.clone())
        .unwrap_or_else(|| input.shape.clone());
    let inference_error = |bound: Vec<usize>, reason: String| VerifyError::Inference {
        path: path.to_path_buf(),
        declared: declared.clone(),
        bound,
        reason,
    };

    let slot = slot.ok_or_else(|| {
        inference_error(
            Vec::new(),
            format!("input `{}` is not declared by the artifact", input.name),
        )
    })?;

    let shape = input.concrete_shape().ok_or_else(|| {
        inference_error(
            Vec::new(),
            format!(
                "input `{}` has unresolved dimensions ({}); bind them with --bind NAME=VALUE",
                input.name,
                input.unresolved_dims().join(", ")
            ),
        )
    })?;

    let tensor = synthetic_input(&shape, &input.element_type, options.seed).ok_or_else(|| {
        inference_error(
            shape.clone(),
            format!("cannot synthesize {} input data", input.element_type),
        )
    })?;
    let input_type = tensor.element_type();

    debug!(
        "smoke test: binding {:?} {} to input slot {}",
        shape, input_type, slot
    );
    artifact
        .bind_input(slot, tensor)
        .map_err(|e| inference_error(shape.clone(), e.to_string()))?;
    artifact
        .run()
        .map_err(|e| inference_error(shape.clone(), e.to_string()))?;
    let output = artifact
        .read_output(options.output_index)
        .map_err(|e| inference_error(shape.clone(), e.to_string()))?;

    let output_name = artifact
        .output_descriptors()
        .get(options.output_index)
        .map(|d| d.name.clone())
        .unwrap_or_else(|| format!("output{}", options.output_index));

    let values = output.to_f32_vec();
    let range = ValueRange::of(&values);
    let non_finite = values.iter().filter(|v| !v.is_finite()).count();
    debug!(
        "smoke test: output `{}` {:?}, range {:?}",
        output_name, output.shape, range
    );

    Ok(InferenceSample {
        input_name: input.name.clone(),
        input_shape: shape,
        input_type,
        output_name,
        output_shape: output.shape,
        output_values: values,
        range,
        non_finite,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ElementType;

    fn output(shape: Vec<i64>) -> TensorDescriptor {
        TensorDescriptor::new("output0", shape, ElementType::Float32)
    }

    #[test]
    fn yolov5_head_has_eighty_classes() {
        let layout = derive_layout(&output(vec![1, 25200, 85]), 5).unwrap();
        assert_eq!(
            layout,
            DetectionHeadLayout {
                batch_size: 1,
                anchor_count: 25200,
                features_per_anchor: 85,
                class_count: 80,
                fixed_geometry_fields: 5,
            }
        );
        assert!(layout.is_determinate());
    }

    #[test]
    fn class_count_is_features_minus_geometry_fields() {
        for (b, a, f) in [(1, 1, 6), (2, 100, 9), (4, 6300, 84), (1, 8400, 1000)] {
            for fields in [4usize, 5] {
                let layout = derive_layout(&output(vec![b, a, f]), fields).unwrap();
                assert_eq!(layout.batch_size as i64, b);
                assert_eq!(layout.anchor_count as i64, a);
                assert_eq!(layout.class_count, f - fields as i64);
            }
        }
    }

    #[test]
    fn non_rank_three_outputs_are_unsupported() {
        for shape in [vec![], vec![8400], vec![1, 8400], vec![1, 1, 84, 8400]] {
            let err = derive_layout(&output(shape.clone()), 5).unwrap_err();
            match err {
                VerifyError::UnsupportedLayout { shape: got, .. } => assert_eq!(got, shape),
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    #[test]
    fn unresolved_dimension_is_unsupported() {
        let err = derive_layout(&output(vec![-1, 25200, 85]), 5).unwrap_err();
        assert!(matches!(err, VerifyError::UnsupportedLayout { .. }));
    }

    #[test]
    fn too_few_features_give_non_positive_class_count() {
        let layout = derive_layout(&output(vec![1, 300, 4]), 5).unwrap();
        assert_eq!(layout.class_count, -1);
        assert!(!layout.is_determinate());

        let layout = derive_layout(&output(vec![1, 300, 5]), 5).unwrap();
        assert_eq!(layout.class_count, 0);
        assert!(!layout.is_determinate());
    }

    #[test]
    fn decoded_output_yields_single_class() {
        let layout = derive_layout(&output(vec![1, 300, 6]), 5).unwrap();
        assert_eq!(layout.class_count, 1);
    }

    #[test]
    fn features_major_reads_transposed_axes() {
        let layout = derive_layout_oriented(
            &output(vec![1, 84, 8400]),
            HeadFormat::Anchorless,
            HeadOrientation::FeaturesMajor,
        )
        .unwrap();
        assert_eq!(layout.anchor_count, 8400);
        assert_eq!(layout.features_per_anchor, 84);
        assert_eq!(layout.class_count, 80);
    }
}
