//! Host evaluator for the elementwise and tensor-creation operations that show up
//! in constant folding.
//!
//! Scalars follow numeric promotion: `int op int` stays integral except for true
//! division, anything touching a float is a float. Tensors are f32 or i32; an i32
//! result is kept only for add/sub/mul over integer operands. A one-element
//! operand broadcasts against any shape, otherwise shapes must match.

use std::collections::BTreeMap;

use traced_rs::eval::{EvalError, EvalResult, Evaluator};
use traced_rs::graph::{
    DType, ElemwiseMode, HostTensor, OpDef, Shape, Target, TensorData, Value,
};
use traced_rs::ops::{functional, method};

#[derive(Debug, Default, Clone, Copy)]
pub struct RefEvaluator;

impl RefEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for RefEvaluator {
    fn name(&self) -> &str {
        "ref-cpu"
    }

    fn evaluate(
        &self,
        target: &Target,
        args: &[Value],
        kwargs: &BTreeMap<String, Value>,
    ) -> EvalResult<Vec<Value>> {
        let value = match target {
            Target::CallFunction(func) if func.module == functional::ELEMWISE_MODULE => {
                let lhs = || operand(target, args, kwargs, 0, functional::LHS);
                let rhs = || operand(target, args, kwargs, 1, functional::RHS);
                match func.name.as_str() {
                    "add" => binary(BinaryOp::Add, lhs()?, rhs()?)?,
                    "sub" => binary(BinaryOp::Sub, lhs()?, rhs()?)?,
                    "mul" => binary(BinaryOp::Mul, lhs()?, rhs()?)?,
                    "div" => binary(BinaryOp::Div, lhs()?, rhs()?)?,
                    "pow" => binary(BinaryOp::Pow, lhs()?, rhs()?)?,
                    "neg" => negate(lhs()?)?,
                    _ => return Err(EvalError::unimplemented(target, "unknown elementwise function")),
                }
            }
            Target::CallFunction(func) if func.module == functional::TENSOR_MODULE => {
                match func.name.as_str() {
                    "ones" => filled(target, args, kwargs, 1.0)?,
                    "zeros" => filled(target, args, kwargs, 0.0)?,
                    _ => return Err(EvalError::unimplemented(target, "unknown tensor function")),
                }
            }
            Target::CallMethod(name) => call_method(target, name, args)?,
            Target::Apply(OpDef::Elemwise { mode }) => {
                let input = |index: usize| {
                    args.get(index).ok_or_else(|| {
                        EvalError::argument_mismatch(target, format!("missing operand {index}"))
                    })
                };
                match mode {
                    ElemwiseMode::Add => binary(BinaryOp::Add, input(0)?, input(1)?)?,
                    ElemwiseMode::Sub => binary(BinaryOp::Sub, input(0)?, input(1)?)?,
                    ElemwiseMode::Mul => binary(BinaryOp::Mul, input(0)?, input(1)?)?,
                    ElemwiseMode::TrueDiv => binary(BinaryOp::Div, input(0)?, input(1)?)?,
                    ElemwiseMode::Pow => binary(BinaryOp::Pow, input(0)?, input(1)?)?,
                    ElemwiseMode::Neg => negate(input(0)?)?,
                }
            }
            Target::Apply(OpDef::GetVarShape { axis }) => var_shape(target, args.first(), *axis)?,
            _ => return Err(EvalError::unimplemented(target, "not supported by the reference evaluator")),
        };
        Ok(vec![value])
    }
}

fn operand<'a>(
    target: &Target,
    args: &'a [Value],
    kwargs: &'a BTreeMap<String, Value>,
    index: usize,
    name: &str,
) -> EvalResult<&'a Value> {
    kwargs
        .get(name)
        .or_else(|| args.get(index))
        .ok_or_else(|| EvalError::argument_mismatch(target, format!("missing argument `{name}`")))
}

fn call_method(target: &Target, name: &str, args: &[Value]) -> EvalResult<Value> {
    let receiver = args
        .first()
        .ok_or_else(|| EvalError::argument_mismatch(target, "missing receiver"))?;
    if name == method::NEG {
        return negate(receiver);
    }
    let other = args
        .get(1)
        .ok_or_else(|| EvalError::argument_mismatch(target, "missing right-hand operand"))?;
    let (op, reflected) = match name {
        method::ADD | method::IADD => (BinaryOp::Add, false),
        method::RADD => (BinaryOp::Add, true),
        method::SUB | method::ISUB => (BinaryOp::Sub, false),
        method::RSUB => (BinaryOp::Sub, true),
        method::MUL | method::IMUL => (BinaryOp::Mul, false),
        method::RMUL => (BinaryOp::Mul, true),
        method::TRUEDIV | method::ITRUEDIV => (BinaryOp::Div, false),
        method::RTRUEDIV => (BinaryOp::Div, true),
        method::POW => (BinaryOp::Pow, false),
        _ => return Err(EvalError::unimplemented(target, "unknown tensor method")),
    };
    if reflected {
        binary(op, other, receiver)
    } else {
        binary(op, receiver, other)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

impl BinaryOp {
    fn apply_f64(self, a: f64, b: f64) -> f64 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }

    fn apply_f32(self, a: f32, b: f32) -> f32 {
        match self {
            BinaryOp::Add => a + b,
            BinaryOp::Sub => a - b,
            BinaryOp::Mul => a * b,
            BinaryOp::Div => a / b,
            BinaryOp::Pow => a.powf(b),
        }
    }

    /// Integer result, or `None` when the operation leaves the integers.
    fn apply_i32(self, a: i32, b: i32) -> Option<i32> {
        match self {
            BinaryOp::Add => Some(a.wrapping_add(b)),
            BinaryOp::Sub => Some(a.wrapping_sub(b)),
            BinaryOp::Mul => Some(a.wrapping_mul(b)),
            BinaryOp::Div | BinaryOp::Pow => None,
        }
    }
}

fn scalar_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(v) => Some(*v as f64),
        Value::Float(v) => Some(*v),
        Value::Bool(v) => Some(f64::from(u8::from(*v))),
        _ => None,
    }
}

fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    match (lhs, rhs) {
        (Value::Int(a), Value::Int(b)) => int_scalar(op, *a, *b),
        (Value::Tensor(_), _) | (_, Value::Tensor(_)) => tensor_binary(op, lhs, rhs),
        _ => match (scalar_f64(lhs), scalar_f64(rhs)) {
            (Some(a), Some(b)) => Ok(Value::Float(op.apply_f64(a, b))),
            _ => Err(EvalError::execution(format!(
                "{op:?} is not defined for {lhs} and {rhs}"
            ))),
        },
    }
}

fn int_scalar(op: BinaryOp, a: i64, b: i64) -> EvalResult<Value> {
    let overflow = || EvalError::execution(format!("integer overflow in {a} {op:?} {b}"));
    let value = match op {
        BinaryOp::Add => Value::Int(a.checked_add(b).ok_or_else(overflow)?),
        BinaryOp::Sub => Value::Int(a.checked_sub(b).ok_or_else(overflow)?),
        BinaryOp::Mul => Value::Int(a.checked_mul(b).ok_or_else(overflow)?),
        BinaryOp::Div => Value::Float(a as f64 / b as f64),
        BinaryOp::Pow => match u32::try_from(b) {
            Ok(exp) => Value::Int(a.checked_pow(exp).ok_or_else(overflow)?),
            Err(_) => Value::Float((a as f64).powf(b as f64)),
        },
    };
    Ok(value)
}

/// Operand lowered to dims plus flat data.
struct Dense {
    dims: Vec<usize>,
    data: TensorData,
}

impl Dense {
    fn from_value(value: &Value) -> EvalResult<Self> {
        let dense = match value {
            Value::Tensor(tensor) => Dense {
                dims: tensor.dims.clone(),
                data: tensor.data.clone(),
            },
            Value::Int(v) => Dense {
                dims: Vec::new(),
                data: match i32::try_from(*v) {
                    Ok(v) => TensorData::Si32(vec![v]),
                    Err(_) => TensorData::F32(vec![*v as f32]),
                },
            },
            other => match scalar_f64(other) {
                Some(v) => Dense {
                    dims: Vec::new(),
                    data: TensorData::F32(vec![v as f32]),
                },
                None => {
                    return Err(EvalError::execution(format!(
                        "{other} cannot be used as a tensor operand"
                    )))
                }
            },
        };
        Ok(dense)
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn to_f32(&self) -> Vec<f32> {
        match &self.data {
            TensorData::F32(values) => values.clone(),
            TensorData::Si32(values) => values.iter().map(|&v| v as f32).collect(),
        }
    }
}

fn broadcast_dims(lhs: &Dense, rhs: &Dense) -> EvalResult<Vec<usize>> {
    if lhs.dims == rhs.dims {
        Ok(lhs.dims.clone())
    } else if lhs.len() == 1 {
        Ok(rhs.dims.clone())
    } else if rhs.len() == 1 {
        Ok(lhs.dims.clone())
    } else {
        Err(EvalError::execution(format!(
            "cannot broadcast {:?} against {:?}",
            lhs.dims, rhs.dims
        )))
    }
}

/// Flat stride of an operand over `count` output elements: a one-element operand
/// repeats, anything else must hold exactly `count` elements.
fn broadcast_stride(operand: &Dense, count: usize) -> EvalResult<usize> {
    match operand.len() {
        len if len == count => Ok(1),
        1 => Ok(0),
        len => Err(EvalError::execution(format!(
            "operand with {len} elements does not fill {count} output elements"
        ))),
    }
}

fn tensor_binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> EvalResult<Value> {
    let lhs = Dense::from_value(lhs)?;
    let rhs = Dense::from_value(rhs)?;
    let dims = broadcast_dims(&lhs, &rhs)?;
    let count: usize = dims.iter().product();
    let sa = broadcast_stride(&lhs, count)?;
    let sb = broadcast_stride(&rhs, count)?;

    if let (TensorData::Si32(a), TensorData::Si32(b)) = (&lhs.data, &rhs.data) {
        let values: Option<Vec<i32>> = (0..count)
            .map(|i| op.apply_i32(a[i * sa], b[i * sb]))
            .collect();
        if let Some(values) = values {
            return Ok(Value::Tensor(HostTensor::from_i32(dims, values)));
        }
    }

    let a = lhs.to_f32();
    let b = rhs.to_f32();
    let values = (0..count)
        .map(|i| op.apply_f32(a[i * sa], b[i * sb]))
        .collect();
    Ok(Value::Tensor(HostTensor::from_f32(dims, values)))
}

fn negate(value: &Value) -> EvalResult<Value> {
    value
        .negated()
        .ok_or_else(|| EvalError::execution(format!("cannot negate {value}")))
}

fn filled(
    target: &Target,
    args: &[Value],
    kwargs: &BTreeMap<String, Value>,
    fill: f32,
) -> EvalResult<Value> {
    let shape = operand(target, args, kwargs, 0, "shape")?;
    let dims: Vec<usize> = match shape {
        Value::Int(n) => vec![usize::try_from(*n).map_err(|_| bad_shape(target))?],
        Value::List(items) => items
            .iter()
            .map(|item| {
                item.as_int()
                    .and_then(|n| usize::try_from(n).ok())
                    .ok_or_else(|| bad_shape(target))
            })
            .collect::<EvalResult<_>>()?,
        Value::Tensor(HostTensor {
            data: TensorData::Si32(values),
            ..
        }) => values
            .iter()
            .map(|&n| usize::try_from(n).map_err(|_| bad_shape(target)))
            .collect::<EvalResult<_>>()?,
        _ => return Err(bad_shape(target)),
    };
    let count: usize = dims.iter().product();

    let dtype = match kwargs.get("dtype").or_else(|| args.get(1)) {
        None | Some(Value::None) => DType::F32,
        Some(Value::Str(name)) => DType::from_name(name).ok_or_else(|| {
            EvalError::argument_mismatch(target, format!("unknown dtype `{name}`"))
        })?,
        Some(other) => {
            return Err(EvalError::argument_mismatch(
                target,
                format!("dtype must be a string, got {other}"),
            ))
        }
    };
    let tensor = match dtype {
        DType::F32 => HostTensor::from_f32(dims, vec![fill; count]),
        DType::Si32 => HostTensor::from_i32(dims, vec![fill as i32; count]),
        other => {
            return Err(EvalError::unimplemented(
                target,
                format!("dtype {other} is not supported"),
            ))
        }
    };
    Ok(Value::Tensor(tensor))
}

fn bad_shape(target: &Target) -> EvalError {
    EvalError::argument_mismatch(target, "shape must be a non-negative int, list of ints, or int32 tensor")
}

fn var_shape(target: &Target, input: Option<&Value>, axis: Option<i32>) -> EvalResult<Value> {
    let Some(Value::Tensor(tensor)) = input else {
        return Err(EvalError::argument_mismatch(target, "expected a tensor input"));
    };
    let dims = &tensor.dims;
    let selected: Vec<usize> = match axis {
        None => dims.clone(),
        Some(axis) => {
            let shape = Shape::from_static(dims);
            let index = shape.axis_index(axis).ok_or_else(|| {
                EvalError::execution(format!(
                    "axis {axis} out of range for rank {}",
                    shape.rank()
                ))
            })?;
            vec![dims[index]]
        }
    };
    let extents = selected
        .iter()
        .map(|&dim| {
            i32::try_from(dim)
                .map_err(|_| EvalError::execution(format!("extent {dim} exceeds int32")))
        })
        .collect::<EvalResult<Vec<i32>>>()?;
    Ok(Value::Tensor(HostTensor::from_i32(vec![extents.len()], extents)))
}
