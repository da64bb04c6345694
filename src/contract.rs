//! What the downstream consumer expects from an artifact.
//!
//! Expectations come from CLI flags, optionally layered over a JSON contract
//! file. Flags always win over the file.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, VerifyError};
use crate::models::{ElementType, HeadFormat, HeadOrientation};
use crate::runtime::DimBindings;

/// Inclusive numeric bound the smoke-test output must fall inside.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ValueBound {
    pub lo: f32,
    pub hi: f32,
}

impl ValueBound {
    pub fn unit() -> Self {
        Self { lo: 0.0, hi: 1.0 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpectedContract {
    pub format: HeadFormat,
    pub orientation: HeadOrientation,
    pub expected_output_shape: Option<[usize; 3]>,
    pub expected_input_shape: Option<Vec<usize>>,
    pub expected_input_type: Option<ElementType>,
    pub value_bound: Option<ValueBound>,
    pub min_class_count: Option<usize>,
    pub labels_path: Option<PathBuf>,
    pub input_index: usize,
    pub output_index: usize,
    pub dim_bindings: DimBindings,
    pub seed: u64,
}

impl Default for ExpectedContract {
    fn default() -> Self {
        Self {
            format: HeadFormat::Objectness,
            orientation: HeadOrientation::AnchorsMajor,
            expected_output_shape: None,
            expected_input_shape: None,
            expected_input_type: None,
            value_bound: Some(ValueBound::unit()),
            min_class_count: None,
            labels_path: None,
            input_index: 0,
            output_index: 0,
            dim_bindings: DimBindings::new(),
            seed: 42,
        }
    }
}

/// On-disk contract. Every field is optional; missing fields keep the
/// defaults of [`ExpectedContract`].
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContractFile {
    pub format: Option<String>,
    pub geometry_fields: Option<usize>,
    pub features_major: Option<bool>,
    pub expected_output: Option<Vec<usize>>,
    pub expected_input: Option<Vec<usize>>,
    pub expected_input_type: Option<String>,
    /// `[lo, hi]`, or `null` to disable the range check.
    #[serde(deserialize_with = "present_or_null")]
    pub value_range: Option<Option<[f32; 2]>>,
    pub min_classes: Option<usize>,
    pub labels: Option<PathBuf>,
    pub input_index: Option<usize>,
    pub output_index: Option<usize>,
    pub bindings: Option<DimBindings>,
    pub seed: Option<u64>,
}

impl ContractFile {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| VerifyError::Contract {
            reason: format!("failed to read {}: {}", path.display(), e),
        })?;
        let mut file: ContractFile =
            serde_json::from_str(&content).map_err(|e| VerifyError::Contract {
                reason: format!("failed to parse {}: {}", path.display(), e),
            })?;
        // Relative label paths are relative to the contract file.
        if let (Some(labels), Some(dir)) = (file.labels.as_ref(), path.parent()) {
            if labels.is_relative() {
                file.labels = Some(dir.join(labels));
            }
        }
        Ok(file)
    }

    /// Applies the file on top of `contract`.
    pub fn apply(self, contract: &mut ExpectedContract) -> Result<()> {
        if let Some(format) = self.format {
            contract.format = format
                .parse()
                .map_err(|reason| VerifyError::Contract { reason })?;
        }
        if let Some(fields) = self.geometry_fields {
            contract.format = HeadFormat::from_fields(fields);
        }
        if let Some(features_major) = self.features_major {
            contract.orientation = if features_major {
                HeadOrientation::FeaturesMajor
            } else {
                HeadOrientation::AnchorsMajor
            };
        }
        if let Some(shape) = self.expected_output {
            contract.expected_output_shape = Some(output_triple(&shape)?);
        }
        if let Some(shape) = self.expected_input {
            contract.expected_input_shape = Some(shape);
        }
        if let Some(ty) = self.expected_input_type {
            contract.expected_input_type = Some(
                ty.parse()
                    .map_err(|reason| VerifyError::Contract { reason })?,
            );
        }
        if let Some(range) = self.value_range {
            contract.value_bound = range.map(|[lo, hi]| ValueBound { lo, hi });
        }
        if let Some(min) = self.min_classes {
            contract.min_class_count = Some(min);
        }
        if let Some(labels) = self.labels {
            contract.labels_path = Some(labels);
        }
        if let Some(index) = self.input_index {
            contract.input_index = index;
        }
        if let Some(index) = self.output_index {
            contract.output_index = index;
        }
        if let Some(bindings) = self.bindings {
            contract.dim_bindings.extend(bindings);
        }
        if let Some(seed) = self.seed {
            contract.seed = seed;
        }
        contract.validate()
    }
}

impl ExpectedContract {
    pub fn validate(&self) -> Result<()> {
        if let Some(bound) = self.value_bound {
            if bound.lo.is_nan() || bound.hi.is_nan() || bound.lo > bound.hi {
                return Err(VerifyError::Contract {
                    reason: format!("value range [{}, {}] is empty", bound.lo, bound.hi),
                });
            }
        }
        Ok(())
    }
}

// Keeps an explicit `null` distinct from a missing field.
fn present_or_null<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Checks that an expected output shape has exactly three dimensions.
pub fn output_triple(shape: &[usize]) -> Result<[usize; 3]> {
    <[usize; 3]>::try_from(shape).map_err(|_| VerifyError::Contract {
        reason: format!(
            "expected output shape must have 3 dimensions, got {}",
            shape.len()
        ),
    })
}

/// Parses a comma separated shape such as `1,84,8400` or `(1, 84, 8400)`.
pub fn parse_shape(s: &str) -> std::result::Result<Vec<usize>, String> {
    let trimmed = s.trim().trim_start_matches(['(', '[']).trim_end_matches([')', ']']);
    if trimmed.trim().is_empty() {
        return Err("shape is empty".to_string());
    }
    trimmed
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<usize>()
                .map_err(|_| format!("invalid dimension `{}` in shape `{}`", part.trim(), s))
        })
        .collect()
}

/// Parses `lo,hi`, or `none` to disable the range check.
pub fn parse_value_bound(s: &str) -> std::result::Result<Option<ValueBound>, String> {
    if s.trim().eq_ignore_ascii_case("none") {
        return Ok(None);
    }
    let parts: Vec<&str> = s.split(',').map(str::trim).collect();
    let [lo, hi] = parts.as_slice() else {
        return Err(format!("value range must be `lo,hi` or `none`, got `{}`", s));
    };
    let lo: f32 = lo.parse().map_err(|_| format!("invalid lower bound `{}`", lo))?;
    let hi: f32 = hi.parse().map_err(|_| format!("invalid upper bound `{}`", hi))?;
    if lo > hi {
        return Err(format!("lower bound {} exceeds upper bound {}", lo, hi));
    }
    Ok(Some(ValueBound { lo, hi }))
}

/// Parses a `NAME=VALUE` dimension binding.
pub fn parse_binding(s: &str) -> std::result::Result<(String, usize), String> {
    let (name, value) = s
        .split_once('=')
        .ok_or_else(|| format!("binding must be NAME=VALUE, got `{}`", s))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("binding `{}` has no dimension name", s));
    }
    let value = value
        .trim()
        .parse::<usize>()
        .map_err(|_| format!("binding `{}` has a non-numeric size", s))?;
    Ok((name.to_string(), value))
}

/// Reads a labels file: one label per line, blank lines ignored.
pub fn read_labels(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path).map_err(|e| VerifyError::Contract {
        reason: format!("failed to read labels {}: {}", path.display(), e),
    })?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}
