use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail};
use log::{debug, warn};
use rten::{DataType, Dimension, Model, NodeId, Value, ValueOrView, ValueType};
use rten_tensor::Tensor;
use rten_tensor::prelude::*;

use crate::error::{Result, VerifyError};
use crate::models::{ElementType, TensorDescriptor};
use crate::runtime::{ArtifactLoader, DimBindings, HostTensor, InferenceArtifact, TensorData};

/// Loads models with the `rten` runtime.
#[derive(Debug, Default, Clone)]
pub struct RtenLoader;

impl ArtifactLoader for RtenLoader {
    fn name(&self) -> &str {
        "rten"
    }

    fn extensions(&self) -> &[&str] {
        &["rten", "onnx"]
    }

    fn load(&self, path: &Path) -> Result<Box<dyn InferenceArtifact>> {
        let model = Model::load_file(path).map_err(|e| VerifyError::ArtifactLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        debug!(
            "rten: loaded {} ({} inputs, {} outputs)",
            path.display(),
            model.input_ids().len(),
            model.output_ids().len()
        );
        Ok(Box::new(RtenArtifact::new(path.to_path_buf(), model)))
    }
}

pub struct RtenArtifact {
    path: PathBuf,
    model: Model,
    bindings: DimBindings,
    resolved: bool,
    inputs: Vec<Option<Value>>,
    outputs: Vec<Value>,
}

impl RtenArtifact {
    fn new(path: PathBuf, model: Model) -> Self {
        let input_count = model.input_ids().len();
        Self {
            path,
            model,
            bindings: DimBindings::new(),
            resolved: false,
            inputs: (0..input_count).map(|_| None).collect(),
            outputs: Vec::new(),
        }
    }

    fn describe(&self, id: NodeId) -> TensorDescriptor {
        let info = self.model.node_info(id);
        let name = info
            .as_ref()
            .and_then(|i| i.name())
            .unwrap_or("<unnamed>")
            .to_string();
        let element_type = info
            .as_ref()
            .and_then(|i| i.dtype())
            .map(value_type_of)
            .unwrap_or_else(|| ElementType::Other("unknown".to_string()));
        let dims = info.as_ref().and_then(|i| i.shape()).unwrap_or_default();

        let mut shape = Vec::with_capacity(dims.len());
        let mut dim_names = Vec::with_capacity(dims.len());
        for dim in dims {
            match dim {
                Dimension::Fixed(size) => {
                    shape.push(size as i64);
                    dim_names.push(None);
                }
                Dimension::Symbolic(symbol) => {
                    let size = self.bindings.get(&symbol).map(|&v| v as i64).unwrap_or(-1);
                    shape.push(size);
                    dim_names.push(Some(symbol));
                }
            }
        }

        TensorDescriptor {
            name,
            shape,
            element_type,
            dim_names,
        }
    }

    /// Names of every symbolic dimension on the model's inputs and outputs.
    fn symbolic_dims(&self) -> BTreeSet<String> {
        self.model
            .input_ids()
            .iter()
            .chain(self.model.output_ids())
            .filter_map(|&id| self.model.node_info(id).and_then(|info| info.shape()))
            .flatten()
            .filter_map(|dim| match dim {
                Dimension::Symbolic(name) => Some(name),
                Dimension::Fixed(_) => None,
            })
            .collect()
    }
}

impl InferenceArtifact for RtenArtifact {
    fn resolve_shapes(&mut self, bindings: &DimBindings) -> Result<()> {
        // rten has no allocation step; symbolic dims are bound here so later
        // descriptor reads see concrete sizes.
        let symbols = self.symbolic_dims();
        for name in unused_bindings(bindings, &symbols) {
            let known: Vec<&str> = symbols.iter().map(String::as_str).collect();
            warn!(
                "{}: binding `{}` matches no symbolic dimension (model has: {})",
                self.path.display(),
                name,
                if known.is_empty() { "none".to_string() } else { known.join(", ") }
            );
        }
        self.bindings = bindings.clone();
        self.resolved = true;
        Ok(())
    }

    fn input_descriptors(&self) -> Vec<TensorDescriptor> {
        self.model
            .input_ids()
            .iter()
            .map(|&id| self.describe(id))
            .collect()
    }

    fn output_descriptors(&self) -> Vec<TensorDescriptor> {
        self.model
            .output_ids()
            .iter()
            .map(|&id| self.describe(id))
            .collect()
    }

    fn bind_input(&mut self, slot: usize, tensor: HostTensor) -> anyhow::Result<()> {
        let Some(entry) = self.inputs.get_mut(slot) else {
            bail!("input slot {} does not exist", slot);
        };
        *entry = Some(to_value(tensor));
        Ok(())
    }

    fn run(&mut self) -> anyhow::Result<()> {
        if !self.resolved {
            bail!("shapes of {} have not been resolved", self.path.display());
        }
        let input_ids = self.model.input_ids().to_vec();
        let mut inputs: Vec<(NodeId, ValueOrView)> = Vec::with_capacity(input_ids.len());
        for (slot, id) in input_ids.into_iter().enumerate() {
            let value = self.inputs[slot]
                .take()
                .ok_or_else(|| anyhow!("input slot {} was not bound", slot))?;
            inputs.push((id, value.into()));
        }
        let output_ids = self.model.output_ids().to_vec();
        self.outputs = self
            .model
            .run(inputs, &output_ids, None)
            .map_err(|e| anyhow!("{}", e))?;
        Ok(())
    }

    fn read_output(&self, slot: usize) -> anyhow::Result<HostTensor> {
        let value = self
            .outputs
            .get(slot)
            .ok_or_else(|| anyhow!("output slot {} has no value; was the model run?", slot))?;
        from_value(value)
    }
}

/// Binding names that name none of `symbols`, usually a typo.
fn unused_bindings<'a>(bindings: &'a DimBindings, symbols: &BTreeSet<String>) -> Vec<&'a str> {
    bindings
        .keys()
        .filter(|name| !symbols.contains(*name))
        .map(String::as_str)
        .collect()
}

// Sequence values are reported but never treated as tensors.
fn value_type_of(value_type: ValueType) -> ElementType {
    match value_type {
        ValueType::Tensor(dtype) => element_type_of(dtype),
        ValueType::Sequence(dtype) => {
            ElementType::Other(format!("sequence<{}>", element_type_of(dtype)))
        }
        other => ElementType::Other(other.to_string()),
    }
}

fn element_type_of(dtype: DataType) -> ElementType {
    match dtype {
        DataType::Float => ElementType::Float32,
        DataType::Int32 => ElementType::Int32,
        DataType::Int8 => ElementType::Int8,
        DataType::UInt8 => ElementType::UInt8,
        other => ElementType::Other(format!("{:?}", other).to_lowercase()),
    }
}

fn to_value(tensor: HostTensor) -> Value {
    let shape = tensor.shape;
    match tensor.data {
        TensorData::F32(data) => Tensor::from_data(shape.as_slice(), data).into(),
        TensorData::I32(data) => Tensor::from_data(shape.as_slice(), data).into(),
        TensorData::I8(data) => Tensor::from_data(shape.as_slice(), data).into(),
        TensorData::U8(data) => Tensor::from_data(shape.as_slice(), data).into(),
    }
}

fn from_value(value: &Value) -> anyhow::Result<HostTensor> {
    let tensor = match value {
        Value::FloatTensor(t) => HostTensor {
            shape: t.shape().to_vec(),
            data: TensorData::F32(t.to_vec()),
        },
        Value::Int32Tensor(t) => HostTensor {
            shape: t.shape().to_vec(),
            data: TensorData::I32(t.to_vec()),
        },
        Value::Int8Tensor(t) => HostTensor {
            shape: t.shape().to_vec(),
            data: TensorData::I8(t.to_vec()),
        },
        Value::UInt8Tensor(t) => HostTensor {
            shape: t.shape().to_vec(),
            data: TensorData::U8(t.to_vec()),
        },
        _ => bail!("output is not a tensor"),
    };
    Ok(tensor)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixture() -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/sigmoid_head.onnx")
    }

    fn load_fixture() -> RtenArtifact {
        let path = fixture();
        let model = Model::load_file(&path).expect("fixture loads");
        RtenArtifact::new(path, model)
    }

    #[test]
    fn collects_symbolic_dims_of_inputs_and_outputs() {
        let artifact = load_fixture();
        let symbols: Vec<String> = artifact.symbolic_dims().into_iter().collect();
        assert_eq!(symbols, vec!["batch".to_string()]);
    }

    #[test]
    fn mistyped_binding_is_reported_as_unused() {
        let symbols = load_fixture().symbolic_dims();
        let mut bindings = DimBindings::new();
        bindings.insert("bach".to_string(), 1);
        bindings.insert("batch".to_string(), 1);

        assert_eq!(unused_bindings(&bindings, &symbols), vec!["bach"]);
    }

    #[test]
    fn unused_binding_leaves_dimension_unresolved() {
        let mut artifact = load_fixture();
        let mut bindings = DimBindings::new();
        bindings.insert("bach".to_string(), 1);
        artifact.resolve_shapes(&bindings).unwrap();

        assert_eq!(artifact.input_descriptors()[0].shape, vec![-1, 8, 6]);
    }

    #[test]
    fn tensor_value_types_map_to_element_types() {
        assert_eq!(value_type_of(ValueType::Tensor(DataType::Float)), ElementType::Float32);
        assert_eq!(value_type_of(ValueType::Tensor(DataType::UInt8)), ElementType::UInt8);
        assert_eq!(
            value_type_of(ValueType::Sequence(DataType::Float)),
            ElementType::Other("sequence<float32>".to_string())
        );
    }

    #[test]
    fn host_tensors_survive_conversion_to_rten_values() {
        let tensor = HostTensor {
            shape: vec![1, 2, 2],
            data: TensorData::I32(vec![1, 2, 3, 4]),
        };
        let back = from_value(&to_value(tensor.clone())).unwrap();
        assert_eq!(back, tensor);
    }
}
