use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Element type of a tensor slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementType {
    Float32,
    Int32,
    Int8,
    UInt8,
    Other(String),
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ElementType::Float32 => write!(f, "float32"),
            ElementType::Int32 => write!(f, "int32"),
            ElementType::Int8 => write!(f, "int8"),
            ElementType::UInt8 => write!(f, "uint8"),
            ElementType::Other(name) => write!(f, "{}", name),
        }
    }
}

impl FromStr for ElementType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "float32" | "f32" | "float" => Ok(ElementType::Float32),
            "int32" | "i32" => Ok(ElementType::Int32),
            "int8" | "i8" => Ok(ElementType::Int8),
            "uint8" | "u8" => Ok(ElementType::UInt8),
            other => Err(format!("unknown element type: {}", other)),
        }
    }
}

/// Metadata of one named tensor slot.
///
/// Dimensions the artifact leaves symbolic, and that were not bound during
/// shape resolution, are stored as `-1`. Their symbolic names are kept at the
/// same index in `dim_names`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorDescriptor {
    pub name: String,
    pub shape: Vec<i64>,
    pub element_type: ElementType,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dim_names: Vec<Option<String>>,
}

impl TensorDescriptor {
    pub fn new(name: impl Into<String>, shape: Vec<i64>, element_type: ElementType) -> Self {
        Self {
            name: name.into(),
            shape,
            element_type,
            dim_names: Vec::new(),
        }
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    pub fn is_resolved(&self) -> bool {
        self.shape.iter().all(|&d| d >= 0)
    }

    /// Names of the dimensions that are still unresolved.
    pub fn unresolved_dims(&self) -> Vec<String> {
        self.shape
            .iter()
            .enumerate()
            .filter(|(_, d)| **d < 0)
            .map(|(i, _)| {
                self.dim_names
                    .get(i)
                    .cloned()
                    .flatten()
                    .unwrap_or_else(|| format!("dim{}", i))
            })
            .collect()
    }

    /// The shape as concrete sizes, or `None` while any dimension is unresolved.
    pub fn concrete_shape(&self) -> Option<Vec<usize>> {
        self.shape
            .iter()
            .map(|&d| usize::try_from(d).ok())
            .collect()
    }
}

/// Declared inputs and outputs of an artifact, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ArtifactDescriptors {
    pub inputs: Vec<TensorDescriptor>,
    pub outputs: Vec<TensorDescriptor>,
}

/// Detector family. Fixes how many leading per-anchor fields encode box
/// geometry rather than class scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadFormat {
    /// cx, cy, w, h, objectness, then class scores (YOLOv5 exports).
    #[default]
    Objectness,
    /// cx, cy, w, h, then class scores (YOLOv8 exports).
    Anchorless,
    /// Any other number of leading geometry fields.
    Custom(usize),
}

impl HeadFormat {
    pub fn fixed_geometry_fields(&self) -> usize {
        match self {
            HeadFormat::Objectness => 5,
            HeadFormat::Anchorless => 4,
            HeadFormat::Custom(n) => *n,
        }
    }

    pub fn from_fields(fields: usize) -> Self {
        match fields {
            5 => HeadFormat::Objectness,
            4 => HeadFormat::Anchorless,
            n => HeadFormat::Custom(n),
        }
    }
}

impl FromStr for HeadFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yolov5" | "objectness" => Ok(HeadFormat::Objectness),
            "yolov8" | "anchorless" => Ok(HeadFormat::Anchorless),
            other => other
                .parse::<usize>()
                .map(HeadFormat::from_fields)
                .map_err(|_| format!("unknown head format: {}", other)),
        }
    }
}

/// Which axis of a rank-3 output carries the anchors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeadOrientation {
    /// `[batch, anchors, features]`
    #[default]
    AnchorsMajor,
    /// `[batch, features, anchors]`
    FeaturesMajor,
}

/// Geometry of a flat per-anchor detection output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectionHeadLayout {
    pub batch_size: usize,
    pub anchor_count: usize,
    pub features_per_anchor: usize,
    /// `features_per_anchor - fixed_geometry_fields`; may be zero or negative
    /// when the layout is indeterminate.
    pub class_count: i64,
    pub fixed_geometry_fields: usize,
}

impl DetectionHeadLayout {
    /// True when there is at least one class score per anchor.
    pub fn is_determinate(&self) -> bool {
        self.class_count > 0
    }
}

/// Minimum and maximum over the finite values of a tensor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    /// Returns `None` if there is no finite value to measure.
    pub fn of(values: &[f32]) -> Option<Self> {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        for &v in values.iter().filter(|v| v.is_finite()) {
            min = min.min(v);
            max = max.max(v);
        }
        (min <= max).then_some(Self { min, max })
    }

    pub fn within(&self, lo: f32, hi: f32) -> bool {
        self.min >= lo && self.max <= hi
    }
}

/// Result of the synthetic inference pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceSample {
    pub input_name: String,
    pub input_shape: Vec<usize>,
    pub input_type: ElementType,
    pub output_name: String,
    pub output_shape: Vec<usize>,
    #[serde(skip)]
    pub output_values: Vec<f32>,
    /// `None` when the output holds no finite value at all.
    pub range: Option<ValueRange>,
    /// Number of NaN or infinite output values.
    pub non_finite: usize,
}

impl InferenceSample {
    pub fn output_rank(&self) -> usize {
        self.output_shape.len()
    }
}

/// Formats a shape the way the report prints it, e.g. `[1, 25200, 85]`.
pub fn format_shape<T: fmt::Display>(shape: &[T]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}
