use std::fmt;

use serde::{Deserialize, Serialize};

/// Enumerates scalar element types carried by tensor nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(clippy::upper_case_acronyms)]
pub enum DType {
    I1,
    Si8,
    Ui8,
    Si32,
    Si64,
    F16,
    F32,
    F64,
}

impl DType {
    /// Canonical lowercase name, as recorded in persisted graphs (`"float32"`, `"int32"`, ...).
    pub fn name(self) -> &'static str {
        match self {
            DType::I1 => "bool",
            DType::Si8 => "int8",
            DType::Ui8 => "uint8",
            DType::Si32 => "int32",
            DType::Si64 => "int64",
            DType::F16 => "float16",
            DType::F32 => "float32",
            DType::F64 => "float64",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let dtype = match name {
            "bool" => DType::I1,
            "int8" => DType::Si8,
            "uint8" => DType::Ui8,
            "int32" => DType::Si32,
            "int64" => DType::Si64,
            "float16" => DType::F16,
            "float32" => DType::F32,
            "float64" => DType::F64,
            _ => return None,
        };
        Some(dtype)
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Names a symbolic dynamic dimension (e.g. `?B`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DimSymbol(String);

impl DimSymbol {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Represents a single axis extent in a tensor shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Dimension {
    Static(usize),
    Dynamic(DimSymbol),
}

impl Dimension {
    /// Convenience constructor for symbolic extents.
    pub fn dynamic(name: impl Into<String>) -> Self {
        Self::Dynamic(DimSymbol::new(name))
    }
}

/// Logical tensor shape as an ordered list of dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    dims: Vec<Dimension>,
}

impl Shape {
    pub fn new(dims: impl Into<Vec<Dimension>>) -> Self {
        Self { dims: dims.into() }
    }

    pub fn from_static(dims: &[usize]) -> Self {
        Self::new(dims.iter().copied().map(Dimension::Static).collect::<Vec<_>>())
    }

    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    pub fn dims(&self) -> &[Dimension] {
        &self.dims
    }

    /// Returns static dimensions when all dims are static.
    pub fn static_dims(&self) -> Option<Vec<usize>> {
        let mut dims = Vec::with_capacity(self.dims.len());
        for dim in &self.dims {
            match dim {
                Dimension::Static(value) => dims.push(*value),
                Dimension::Dynamic(_) => return None,
            }
        }
        Some(dims)
    }

    /// Resolves a possibly negative `axis` against this shape's rank.
    ///
    /// Negative axes count from the end; `None` when the axis is out of range.
    pub fn axis_index(&self, axis: i32) -> Option<usize> {
        let rank = i64::try_from(self.rank()).ok()?;
        let axis = i64::from(axis);
        let index = if axis < 0 { axis + rank } else { axis };
        if (0..rank).contains(&index) {
            usize::try_from(index).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dims.is_empty() {
            return f.write_str("scalar");
        }
        for (idx, dim) in self.dims.iter().enumerate() {
            if idx > 0 {
                f.write_str("x")?;
            }
            match dim {
                Dimension::Static(value) => write!(f, "{value}")?,
                Dimension::Dynamic(symbol) => write!(f, "?{}", symbol.as_str())?,
            }
        }
        Ok(())
    }
}

/// Tensor metadata coupling dtype and shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorSpec {
    pub dtype: DType,
    pub shape: Shape,
}

impl TensorSpec {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }
}

/// Affine quantization parameters attached to quantized tensors.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QParams {
    pub scale: f32,
    pub zero_point: i32,
}

/// Static description of a symbolic tensor node: spec plus optional quantization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorMeta {
    pub spec: TensorSpec,
    #[serde(default)]
    pub qparams: Option<QParams>,
}

impl TensorMeta {
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self {
            spec: TensorSpec::new(dtype, shape),
            qparams: None,
        }
    }

    pub fn with_qparams(mut self, qparams: QParams) -> Self {
        self.qparams = Some(qparams);
        self
    }

    pub fn dtype(&self) -> DType {
        self.spec.dtype
    }

    pub fn shape(&self) -> &Shape {
        &self.spec.shape
    }
}

impl fmt::Display for TensorMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tensor<{}, {}>", self.spec.dtype, self.spec.shape)
    }
}
