use std::collections::BTreeMap;

use crate::graph::{
    DType, ExprId, Graph, ModuleId, ModuleKey, NodeKind, OpDefKind, Operand, Shape, TensorMeta,
    Value,
};
use crate::ops::functional;

use super::{called_module, LoadError, LoadResult, LoaderRegistry};

/// Value given to `param_dim` on batch-norm modules saved before the attribute existed.
pub const PARAM_DIM_DEFAULT: &str = "dim_1c11";

pub const BATCHNORM_MODULES: [(&str, &str); 3] = [
    ("module.batchnorm", "BatchNorm1d"),
    ("module.batchnorm", "BatchNorm2d"),
    ("module.batchnorm", "SyncBatchNorm"),
];

pub const CONV_BN_MODULES: [(&str, &str); 4] = [
    ("module.conv_bn", "ConvBn2d"),
    ("module.conv_bn", "ConvBnRelu2d"),
    ("module.qat.conv_bn", "ConvBn2d"),
    ("module.qat.conv_bn", "ConvBnRelu2d"),
];

/// Format revision whose `ones`/`zeros` records kept dtype and device positional.
const POSITIONAL_TENSOR_GEN_VERSION: &str = "1.7.0";

const BATCHNORM_LEGACY_OUTPUTS: usize = 5;

pub(super) fn register_builtin(registry: &mut LoaderRegistry) {
    let keys = |table: &[(&str, &str)]| -> Vec<ModuleKey> {
        table
            .iter()
            .map(|&(module, name)| ModuleKey::new(module, name))
            .collect()
    };
    registry.register_module_loader(&keys(&BATCHNORM_MODULES), batchnorm_module_loader);
    registry.register_module_loader(&keys(&CONV_BN_MODULES), conv_bn_module_loader);
    registry.register_opdef_loader(OpDefKind::BatchNorm, batchnorm_opdef_loader);
    registry.register_functional_loader(
        &[functional::ones(), functional::zeros()],
        tensor_gen_loader,
    );
}

fn receiver_module(graph: &Graph, expr: ExprId) -> LoadResult<ModuleId> {
    let e = graph.expr(expr)?;
    called_module(graph, e.args.first())?
        .ok_or_else(|| LoadError::malformed(expr, "module call without a module receiver"))
}

fn default_param_dim(graph: &mut Graph, module: ModuleId) -> LoadResult<bool> {
    let state = graph.modules_mut().get_mut(module)?;
    if state.has_attr("param_dim") {
        return Ok(false);
    }
    state.set_attr("param_dim", Value::from(PARAM_DIM_DEFAULT));
    Ok(true)
}

fn batchnorm_module_loader(graph: &mut Graph, expr: ExprId, version: Option<&str>) -> LoadResult<bool> {
    if version.is_some() {
        return Ok(false);
    }
    let module = receiver_module(graph, expr)?;
    default_param_dim(graph, module)
}

fn conv_bn_module_loader(graph: &mut Graph, expr: ExprId, version: Option<&str>) -> LoadResult<bool> {
    if version.is_some() {
        return Ok(false);
    }
    let module = receiver_module(graph, expr)?;
    let state = graph.modules().get(module)?;
    let Some(&bn) = state.submodules.get("bn") else {
        return Err(LoadError::malformed(
            expr,
            format!("`{}` has no `bn` submodule", state.key),
        ));
    };
    default_param_dim(graph, bn)
}

/// Older batch-norm opdefs had no reserve output; it sits at index 4 of six.
fn batchnorm_opdef_loader(graph: &mut Graph, expr: ExprId, version: Option<&str>) -> LoadResult<bool> {
    if version.is_some() {
        return Ok(false);
    }
    let outputs = graph.expr(expr)?.outputs.clone();
    if outputs.len() == BATCHNORM_LEGACY_OUTPUTS + 1 {
        return Ok(false);
    }
    let Some(&last) = outputs.last().filter(|_| outputs.len() == BATCHNORM_LEGACY_OUTPUTS) else {
        return Err(LoadError::malformed(
            expr,
            format!("batch norm with {} outputs", outputs.len()),
        ));
    };
    let last = graph.node(last)?;
    let template = last.kind.tensor_meta();
    let dtype = template.as_ref().map_or(DType::F32, TensorMeta::dtype);
    let mut meta = TensorMeta::new(dtype, Shape::from_static(&[0]));
    meta.qparams = template.and_then(|meta| meta.qparams);
    let name = format!("{}_reserve", last.name);
    graph.insert_output(expr, BATCHNORM_LEGACY_OUTPUTS - 1, name, NodeKind::Tensor(meta))?;
    Ok(true)
}

/// Normalizes `ones`/`zeros` to `(shape, dtype=.., device=..)`.
fn tensor_gen_loader(graph: &mut Graph, expr: ExprId, version: Option<&str>) -> LoadResult<bool> {
    let e = graph.expr(expr)?;
    let (args, kwargs) = match version {
        Some(POSITIONAL_TENSOR_GEN_VERSION) => match &e.args[..] {
            [_] => return Ok(false),
            [shape, dtype, device] => {
                let kwargs = BTreeMap::from([
                    ("dtype".to_string(), dtype.clone()),
                    ("device".to_string(), device.clone()),
                ]);
                (vec![shape.clone()], kwargs)
            }
            other => {
                return Err(LoadError::malformed(
                    expr,
                    format!("expected 3 positional arguments, found {}", other.len()),
                ))
            }
        },
        Some(_) => return Ok(false),
        None => {
            let shape = e
                .args
                .first()
                .or_else(|| e.kwargs.get("shape"))
                .cloned()
                .ok_or_else(|| LoadError::malformed(expr, "missing shape argument"))?;
            let dtype = e
                .args
                .get(1)
                .or_else(|| e.kwargs.get("dtype"))
                .cloned()
                .unwrap_or_else(|| Operand::Value(Value::from(DType::F32.name())));
            let device = e
                .args
                .get(2)
                .or_else(|| e.kwargs.get("device"))
                .cloned()
                .unwrap_or(Operand::Value(Value::None));
            let kwargs = BTreeMap::from([
                ("dtype".to_string(), dtype),
                ("device".to_string(), device),
            ]);
            (vec![shape], kwargs)
        }
    };
    if e.args == args && e.kwargs == kwargs {
        return Ok(false);
    }
    graph.set_operands(expr, args, kwargs)?;
    Ok(true)
}
