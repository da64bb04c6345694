use anyhow::{anyhow, bail};
use modelcheck::error::Result;
use modelcheck::{
    ArtifactLoader, DimBindings, ElementType, ExpectedContract, HostTensor, InferenceArtifact,
    TensorData, TensorDescriptor, Verifier, VerifyContext, VerifyError,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// How the fake fills its output tensor.
#[derive(Debug, Clone, Copy)]
pub enum Fill {
    /// Evenly spaced values from `lo` to `hi`.
    Ramp { lo: f32, hi: f32 },
    /// Ramp over [0, 1] with every tenth value replaced by NaN.
    RampWithNan,
}

/// Descriptor-level description of a model the fake loader can open.
#[derive(Debug, Clone)]
pub struct FakeModel {
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
    pub fill: Fill,
    /// Raised by `run()` when set.
    pub run_error: Option<String>,
    /// Shape actually produced by `run()`, when it differs from the declaration.
    pub produced_shape: Option<Vec<usize>>,
}

impl FakeModel {
    pub fn new(input_shape: Vec<i64>, output_shape: Vec<i64>) -> Self {
        Self {
            inputs: vec![TensorDescriptor::new("images", input_shape, ElementType::Float32)],
            outputs: vec![TensorDescriptor::new("output0", output_shape, ElementType::Float32)],
            fill: Fill::Ramp { lo: 0.0, hi: 1.0 },
            run_error: None,
            produced_shape: None,
        }
    }

    pub fn with_fill(mut self, fill: Fill) -> Self {
        self.fill = fill;
        self
    }

    pub fn with_run_error(mut self, reason: &str) -> Self {
        self.run_error = Some(reason.to_string());
        self
    }

    pub fn with_input_type(mut self, element_type: ElementType) -> Self {
        self.inputs[0].element_type = element_type;
        self
    }

    /// Marks input dimension `index` as symbolic with the given name.
    pub fn with_symbolic_input_dim(mut self, index: usize, name: &str) -> Self {
        let input = &mut self.inputs[0];
        input.dim_names = vec![None; input.shape.len()];
        input.dim_names[index] = Some(name.to_string());
        input.shape[index] = -1;
        self
    }
}

/// Loader that serves [`FakeModel`]s registered per path.
#[derive(Default)]
pub struct FakeLoader {
    models: Mutex<HashMap<PathBuf, FakeModel>>,
    loads: AtomicUsize,
}

impl FakeLoader {
    pub fn register(&self, path: &Path, model: FakeModel) {
        self.models
            .lock()
            .expect("fake loader mutex poisoned")
            .insert(path.to_path_buf(), model);
    }

    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl ArtifactLoader for FakeLoader {
    fn name(&self) -> &str {
        "fake"
    }

    fn extensions(&self) -> &[&str] {
        &["fake"]
    }

    fn load(&self, path: &Path) -> Result<Box<dyn InferenceArtifact>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        let model = self
            .models
            .lock()
            .expect("fake loader mutex poisoned")
            .get(path)
            .cloned()
            .ok_or_else(|| VerifyError::ArtifactLoad {
                path: path.to_path_buf(),
                reason: "not a valid fake artifact".to_string(),
            })?;
        let slots = model.inputs.len();
        Ok(Box::new(FakeArtifact {
            model,
            bound: vec![None; slots],
            output: None,
        }))
    }
}

struct FakeArtifact {
    model: FakeModel,
    bound: Vec<Option<HostTensor>>,
    output: Option<HostTensor>,
}

impl InferenceArtifact for FakeArtifact {
    fn resolve_shapes(&mut self, bindings: &DimBindings) -> Result<()> {
        for desc in self.model.inputs.iter_mut().chain(self.model.outputs.iter_mut()) {
            for (i, name) in desc.dim_names.iter().enumerate() {
                if let Some(size) = name.as_ref().and_then(|n| bindings.get(n)) {
                    desc.shape[i] = *size as i64;
                }
            }
        }
        Ok(())
    }

    fn input_descriptors(&self) -> Vec<TensorDescriptor> {
        self.model.inputs.clone()
    }

    fn output_descriptors(&self) -> Vec<TensorDescriptor> {
        self.model.outputs.clone()
    }

    fn bind_input(&mut self, slot: usize, tensor: HostTensor) -> anyhow::Result<()> {
        let entry = self
            .bound
            .get_mut(slot)
            .ok_or_else(|| anyhow!("input slot {} does not exist", slot))?;
        *entry = Some(tensor);
        Ok(())
    }

    fn run(&mut self) -> anyhow::Result<()> {
        if let Some(reason) = &self.model.run_error {
            bail!("{}", reason);
        }
        for (desc, bound) in self.model.inputs.iter().zip(&self.bound) {
            let bound = bound
                .as_ref()
                .ok_or_else(|| anyhow!("input `{}` was not bound", desc.name))?;
            if desc.concrete_shape().as_deref() != Some(bound.shape.as_slice()) {
                bail!(
                    "shape mismatch for `{}`: expected {:?}, got {:?}",
                    desc.name,
                    desc.shape,
                    bound.shape
                );
            }
        }

        let shape = match &self.model.produced_shape {
            Some(shape) => shape.clone(),
            None => self.model.outputs[0]
                .concrete_shape()
                .ok_or_else(|| anyhow!("output shape is unresolved"))?,
        };
        let len: usize = shape.iter().product();
        let values = fill_values(self.model.fill, len);
        self.output = Some(HostTensor {
            shape,
            data: TensorData::F32(values),
        });
        Ok(())
    }

    fn read_output(&self, slot: usize) -> anyhow::Result<HostTensor> {
        if slot != 0 {
            bail!("output slot {} does not exist", slot);
        }
        self.output
            .clone()
            .ok_or_else(|| anyhow!("model has not been run"))
    }
}

fn fill_values(fill: Fill, len: usize) -> Vec<f32> {
    let step = |i: usize| {
        if len > 1 {
            i as f32 / (len - 1) as f32
        } else {
            0.0
        }
    };
    match fill {
        Fill::Ramp { lo, hi } => (0..len).map(|i| lo + (hi - lo) * step(i)).collect(),
        Fill::RampWithNan => (0..len)
            .map(|i| if i % 10 == 9 { f32::NAN } else { step(i) })
            .collect(),
    }
}

/// Writes a placeholder artifact file so path checks pass.
pub fn write_artifact(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"FAKE").expect("Failed to write fake artifact");
    path
}

/// Creates a temp dir holding one registered fake artifact.
/// Returns the loader, the artifact path and the temp dir (keep it alive).
pub fn fake_artifact(model: FakeModel) -> (Arc<FakeLoader>, PathBuf, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let path = write_artifact(dir.path(), "model.fake");
    let loader = Arc::new(FakeLoader::default());
    loader.register(&path, model);
    (loader, path, dir)
}

pub fn verifier_for(loader: &Arc<FakeLoader>) -> Verifier {
    Verifier::new(loader.clone())
}

pub fn context_for(loader: &Arc<FakeLoader>, contract: ExpectedContract) -> VerifyContext {
    VerifyContext::new(verifier_for(loader), contract)
}

/// YOLOv5 nano export: NHWC float input, anchors-major output.
pub fn yolov5_model() -> FakeModel {
    FakeModel::new(vec![1, 64, 64, 3], vec![1, 25200, 85])
}

/// YOLOv8 nano export: NHWC float input, features-major output.
pub fn yolov8_model() -> FakeModel {
    FakeModel::new(vec![1, 64, 64, 3], vec![1, 84, 8400])
}

/// Real ONNX model: `images[batch, 8, 6]` through a Sigmoid into `output0[batch, 8, 6]`.
///
/// Regenerate with `python3 tests/fixtures/make_sigmoid_head.py`.
pub fn sigmoid_head_path() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sigmoid_head.onnx")
}

pub fn batch_of_one() -> DimBindings {
    let mut bindings = DimBindings::new();
    bindings.insert("batch".to_string(), 1);
    bindings
}
