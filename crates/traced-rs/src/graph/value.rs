//! Concrete values wrapped by constant nodes and inline operands.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::spec::{DType, Shape, TensorMeta};

/// Dense host storage for a materialized tensor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TensorData {
    F32(Vec<f32>),
    Si32(Vec<i32>),
}

impl TensorData {
    pub fn len(&self) -> usize {
        match self {
            TensorData::F32(values) => values.len(),
            TensorData::Si32(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Host tensor with static dims.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostTensor {
    pub dims: Vec<usize>,
    pub data: TensorData,
}

impl HostTensor {
    pub fn from_f32(dims: impl Into<Vec<usize>>, values: Vec<f32>) -> Self {
        Self {
            dims: dims.into(),
            data: TensorData::F32(values),
        }
    }

    pub fn from_i32(dims: impl Into<Vec<usize>>, values: Vec<i32>) -> Self {
        Self {
            dims: dims.into(),
            data: TensorData::Si32(values),
        }
    }

    /// Rank-0 f32 tensor.
    pub fn scalar_f32(value: f32) -> Self {
        Self::from_f32(Vec::new(), vec![value])
    }

    pub fn dtype(&self) -> DType {
        match self.data {
            TensorData::F32(_) => DType::F32,
            TensorData::Si32(_) => DType::Si32,
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn meta(&self) -> TensorMeta {
        TensorMeta::new(self.dtype(), Shape::from_static(&self.dims))
    }

    /// Returns the elements widened to f32.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(values) => values.clone(),
            TensorData::Si32(values) => values.iter().map(|&v| v as f32).collect(),
        }
    }
}

/// Concrete value: scalar, array, or an opaque object-like payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    None,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Tensor(HostTensor),
}

impl Value {
    pub fn is_tensor(&self) -> bool {
        matches!(self, Value::Tensor(_))
    }

    pub fn as_tensor(&self) -> Option<&HostTensor> {
        match self {
            Value::Tensor(tensor) => Some(tensor),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(value) => Some(*value),
            _ => None,
        }
    }

    /// Arithmetic negation of a numeric value. Returns `None` for non-numeric payloads.
    pub fn negated(&self) -> Option<Value> {
        let value = match self {
            Value::Int(v) => Value::Int(v.checked_neg()?),
            Value::Float(v) => Value::Float(-v),
            Value::Tensor(tensor) => {
                let data = match &tensor.data {
                    TensorData::F32(values) => TensorData::F32(values.iter().map(|v| -v).collect()),
                    TensorData::Si32(values) => {
                        TensorData::Si32(values.iter().map(|v| v.wrapping_neg()).collect())
                    }
                };
                Value::Tensor(HostTensor {
                    dims: tensor.dims.clone(),
                    data,
                })
            }
            _ => return None,
        };
        Some(value)
    }

    /// Multiplicative inverse using true division; integers widen to floats.
    pub fn reciprocal(&self) -> Option<Value> {
        let value = match self {
            Value::Int(v) => Value::Float(1.0 / *v as f64),
            Value::Float(v) => Value::Float(1.0 / v),
            Value::Tensor(tensor) => Value::Tensor(HostTensor::from_f32(
                tensor.dims.clone(),
                tensor.to_f32_vec().into_iter().map(|v| 1.0 / v).collect(),
            )),
            _ => return None,
        };
        Some(value)
    }
}

impl From<HostTensor> for Value {
    fn from(tensor: HostTensor) -> Self {
        Value::Tensor(tensor)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_string())
    }
}

const MAX_DISPLAY_ELEMENTS: usize = 8;

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => f.write_str("None"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v:?}"),
            Value::Str(v) => write!(f, "{v:?}"),
            Value::List(items) => {
                f.write_str("[")?;
                for (idx, item) in items.iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Tensor(tensor) => {
                write!(f, "{}", tensor.meta())?;
                f.write_str("[")?;
                let elements: Vec<String> = match &tensor.data {
                    TensorData::F32(values) => values
                        .iter()
                        .take(MAX_DISPLAY_ELEMENTS)
                        .map(|v| format!("{v:?}"))
                        .collect(),
                    TensorData::Si32(values) => values
                        .iter()
                        .take(MAX_DISPLAY_ELEMENTS)
                        .map(|v| v.to_string())
                        .collect(),
                };
                f.write_str(&elements.join(", "))?;
                if tensor.len() > MAX_DISPLAY_ELEMENTS {
                    f.write_str(", ...")?;
                }
                f.write_str("]")
            }
        }
    }
}
