//! The seam between the verifier and whatever executes the model.
//!
//! An [`ArtifactLoader`] turns a path into an [`InferenceArtifact`], which
//! exposes descriptor inspection and a single-slot bind/run/read cycle.

pub mod rten_backend;

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::models::{ElementType, TensorDescriptor};

pub use rten_backend::RtenLoader;

/// Values for symbolic dimensions, keyed by dimension name (e.g. `batch=1`).
pub type DimBindings = BTreeMap<String, usize>;

/// Raw values of a host-side tensor.
#[derive(Debug, Clone, PartialEq)]
pub enum TensorData {
    F32(Vec<f32>),
    I32(Vec<i32>),
    I8(Vec<i8>),
    U8(Vec<u8>),
}

/// A tensor that lives in host memory, independent of any runtime.
#[derive(Debug, Clone, PartialEq)]
pub struct HostTensor {
    pub shape: Vec<usize>,
    pub data: TensorData,
}

impl HostTensor {
    pub fn element_type(&self) -> ElementType {
        match self.data {
            TensorData::F32(_) => ElementType::Float32,
            TensorData::I32(_) => ElementType::Int32,
            TensorData::I8(_) => ElementType::Int8,
            TensorData::U8(_) => ElementType::UInt8,
        }
    }

    pub fn len(&self) -> usize {
        match &self.data {
            TensorData::F32(v) => v.len(),
            TensorData::I32(v) => v.len(),
            TensorData::I8(v) => v.len(),
            TensorData::U8(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Values widened to `f32`, for range measurement.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(v) => v.clone(),
            TensorData::I32(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::I8(v) => v.iter().map(|&x| x as f32).collect(),
            TensorData::U8(v) => v.iter().map(|&x| x as f32).collect(),
        }
    }
}

/// A loaded model, owned by a single verification call.
pub trait InferenceArtifact {
    /// Binds symbolic dimensions and finalizes shapes. Descriptors are only
    /// trustworthy after this has been called.
    fn resolve_shapes(&mut self, bindings: &DimBindings) -> Result<()>;

    fn input_descriptors(&self) -> Vec<TensorDescriptor>;

    fn output_descriptors(&self) -> Vec<TensorDescriptor>;

    fn bind_input(&mut self, slot: usize, tensor: HostTensor) -> anyhow::Result<()>;

    /// Executes one forward pass with the currently bound inputs.
    fn run(&mut self) -> anyhow::Result<()>;

    fn read_output(&self, slot: usize) -> anyhow::Result<HostTensor>;
}

/// Opens artifacts of one format.
pub trait ArtifactLoader: Send + Sync {
    /// Short name used in log lines and setup errors.
    fn name(&self) -> &str;

    /// File extensions (without the dot) this loader accepts.
    fn extensions(&self) -> &[&str];

    fn load(&self, path: &Path) -> Result<Box<dyn InferenceArtifact>>;

    fn supports(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                self.extensions()
                    .iter()
                    .any(|known| known.eq_ignore_ascii_case(ext))
            })
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn host_tensor_widens_integers() {
        let t = HostTensor {
            shape: vec![1, 3],
            data: TensorData::I8(vec![-128, 0, 127]),
        };
        assert_eq!(t.element_type(), ElementType::Int8);
        assert_eq!(t.len(), 3);
        assert_eq!(t.to_f32_vec(), vec![-128.0, 0.0, 127.0]);
    }

    #[test]
    fn loader_matches_extensions_case_insensitively() {
        let loader = RtenLoader::default();
        assert!(loader.supports(Path::new("assets/models/yolov5n.rten")));
        assert!(loader.supports(Path::new("model.RTEN")));
        assert!(!loader.supports(Path::new("yolov5n.tflite")));
        assert!(!loader.supports(Path::new("no_extension")));
    }
}
