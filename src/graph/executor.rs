// External imports
use log::debug;
use ndarray::{concatenate, s, Array2, Array4, ArrayD, ArrayView2, Axis, Ix2, Ix3, IxDyn, Slice};
use std::collections::HashMap;

// Internal imports
use super::checker::check_graph;
use super::error::{ExecutionError, ValidationError};
use super::ir::{Dim, GraphModel, Initializer, Node, TensorValues, ValueInfo};

/// Runtime value flowing between nodes
#[derive(Debug, Clone)]
enum Value {
    Float(ArrayD<f32>),
    Int64(ArrayD<i64>),
}

type NodeResult<T> = std::result::Result<T, String>;

/// Reference interpreter for validated graphs, used to check that an export
/// computes the same values as the model it was lowered from
pub struct GraphExecutor {
    model: GraphModel,
    constants: HashMap<String, Value>,
}

impl GraphExecutor {
    /// Validate `model` and materialize its initializers
    pub fn new(model: GraphModel) -> Result<Self, ExecutionError> {
        check_graph(&model)?;

        let mut constants = HashMap::new();
        for init in &model.graph.initializers {
            constants.insert(init.name.clone(), initializer_value(init)?);
        }
        Ok(Self { model, constants })
    }

    pub fn model(&self) -> &GraphModel {
        &self.model
    }

    /// Run the graph on named float inputs and return every graph output
    pub fn run(
        &self,
        feeds: &[(&str, ArrayD<f32>)],
    ) -> Result<HashMap<String, ArrayD<f32>>, ExecutionError> {
        let graph = &self.model.graph;
        let mut values: HashMap<String, Value> = self.constants.clone();

        for info in &graph.inputs {
            let array = feeds
                .iter()
                .find(|(name, _)| *name == info.name)
                .map(|(_, array)| array.clone())
                .ok_or_else(|| ExecutionError::MissingInput(info.name.clone()))?;
            check_input_shape(info, &array)?;
            values.insert(info.name.clone(), Value::Float(array));
        }

        for node in &graph.nodes {
            let outputs = run_node(node, &values).map_err(|message| ExecutionError::Node {
                node: node.name.clone(),
                op_type: node.op_type.clone(),
                message,
            })?;
            debug!("Executed {} ({})", node.name, node.op_type);
            for (name, value) in node.outputs.iter().zip(outputs) {
                if !name.is_empty() {
                    values.insert(name.clone(), value);
                }
            }
        }

        let mut results = HashMap::new();
        for info in &graph.outputs {
            match values.remove(&info.name) {
                Some(Value::Float(array)) => {
                    results.insert(info.name.clone(), array);
                }
                _ => return Err(ExecutionError::MissingValue(info.name.clone())),
            }
        }
        Ok(results)
    }
}

fn initializer_value(init: &Initializer) -> Result<Value, ValidationError> {
    let shape: Vec<usize> = init.dims.iter().map(|d| *d as usize).collect();
    let size_error = || ValidationError::InitializerSize {
        name: init.name.clone(),
        dims: init.dims.clone(),
        expected: init.dims.iter().product(),
        actual: init.element_count(),
    };
    match &init.data {
        TensorValues::Float(data) => ArrayD::from_shape_vec(IxDyn(&shape), data.clone())
            .map(Value::Float)
            .map_err(|_| size_error()),
        TensorValues::Int64(data) => ArrayD::from_shape_vec(IxDyn(&shape), data.clone())
            .map(Value::Int64)
            .map_err(|_| size_error()),
    }
}

fn check_input_shape(info: &ValueInfo, array: &ArrayD<f32>) -> Result<(), ExecutionError> {
    let matches = array.ndim() == info.shape.len()
        && info
            .shape
            .iter()
            .zip(array.shape())
            .all(|(dim, actual)| match dim {
                Dim::Value(v) => *v as usize == *actual,
                Dim::Param(_) => *actual >= 1,
            });
    if matches {
        Ok(())
    } else {
        Err(ExecutionError::InputShape {
            name: info.name.clone(),
            actual: array.shape().to_vec(),
            expected: format_shape(&info.shape),
        })
    }
}

fn format_shape(shape: &[Dim]) -> String {
    let dims: Vec<String> = shape
        .iter()
        .map(|d| match d {
            Dim::Value(v) => v.to_string(),
            Dim::Param(p) => p.clone(),
        })
        .collect();
    format!("[{}]", dims.join(", "))
}

fn run_node(node: &Node, values: &HashMap<String, Value>) -> NodeResult<Vec<Value>> {
    let outputs = match node.op_type.as_str() {
        "Identity" => vec![Value::Float(float_input(node, values, 0)?.clone())],
        "Transpose" => vec![Value::Float(transpose(node, values)?)],
        "LSTM" => lstm(node, values)?,
        "Squeeze" => vec![Value::Float(squeeze(node, values)?)],
        "Unsqueeze" => vec![Value::Float(unsqueeze(node, values)?)],
        "Concat" => vec![Value::Float(concat(node, values)?)],
        "Gemm" => vec![Value::Float(gemm(node, values)?)],
        "MatMul" => vec![Value::Float(matmul(node, values)?)],
        "Add" => vec![Value::Float(elementwise(node, values, |a, b| a + b)?)],
        "Mul" => vec![Value::Float(elementwise(node, values, |a, b| a * b)?)],
        "ReduceSum" => vec![Value::Float(reduce_sum(node, values)?)],
        "Split" => split(node, values)?
            .into_iter()
            .map(Value::Float)
            .collect(),
        other => return Err(format!("operator {} is not implemented", other)),
    };
    Ok(outputs)
}

fn float_input<'a>(
    node: &Node,
    values: &'a HashMap<String, Value>,
    index: usize,
) -> NodeResult<&'a ArrayD<f32>> {
    let name = node
        .optional_input(index)
        .ok_or_else(|| format!("input #{} is required", index))?;
    match values.get(name) {
        Some(Value::Float(array)) => Ok(array),
        Some(Value::Int64(_)) => Err(format!("input '{}' must be float", name)),
        None => Err(format!("input '{}' has no value", name)),
    }
}

fn optional_ints(node: &Node, values: &HashMap<String, Value>, index: usize) -> NodeResult<Option<Vec<i64>>> {
    let Some(name) = node.optional_input(index) else {
        return Ok(None);
    };
    match values.get(name) {
        Some(Value::Int64(array)) => Ok(Some(array.iter().copied().collect())),
        Some(Value::Float(_)) => Err(format!("input '{}' must be int64", name)),
        None => Err(format!("input '{}' has no value", name)),
    }
}

/// Resolve a possibly negative axis against `rank`
fn normalize_axis(axis: i64, rank: usize) -> NodeResult<usize> {
    let rank = rank as i64;
    let resolved = if axis < 0 { axis + rank } else { axis };
    if (0..rank).contains(&resolved) {
        Ok(resolved as usize)
    } else {
        Err(format!("axis {} is out of range for rank {}", axis, rank))
    }
}

fn transpose(node: &Node, values: &HashMap<String, Value>) -> NodeResult<ArrayD<f32>> {
    let data = float_input(node, values, 0)?;
    let perm: Vec<usize> = match node.ints_attr("perm") {
        Some(perm) => perm.iter().map(|p| *p as usize).collect(),
        None => (0..data.ndim()).rev().collect(),
    };
    let mut seen = perm.clone();
    seen.sort_unstable();
    if seen != (0..data.ndim()).collect::<Vec<_>>() {
        return Err(format!("perm {:?} is not a permutation of rank {}", perm, data.ndim()));
    }
    Ok(data
        .view()
        .permuted_axes(IxDyn(&perm))
        .as_standard_layout()
        .into_owned())
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Forward LSTM with the standard gate layout i, o, f, c and zero initial
/// state. Produces Y `[T, 1, N, H]`, Y_h and Y_c `[1, N, H]`.
fn lstm(node: &Node, values: &HashMap<String, Value>) -> NodeResult<Vec<Value>> {
    let hidden = node
        .int_attr("hidden_size")
        .ok_or("hidden_size attribute is required")? as usize;
    if let Some(direction) = node.string_attr("direction") {
        if direction != "forward" {
            return Err(format!("direction '{}' is not supported", direction));
        }
    }
    if node.int_attr("layout").unwrap_or(0) != 0 {
        return Err("only layout 0 is supported".into());
    }
    if (4..7).any(|i| node.optional_input(i).is_some()) {
        return Err("sequence_lens and initial states are not supported".into());
    }

    let x = float_input(node, values, 0)?
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| format!("X must be [seq_len, batch, input]: {}", e))?;
    let w = float_input(node, values, 1)?
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| format!("W must be rank 3: {}", e))?;
    let r = float_input(node, values, 2)?
        .view()
        .into_dimensionality::<Ix3>()
        .map_err(|e| format!("R must be rank 3: {}", e))?;

    let (seq_len, batch, input_size) = x.dim();
    if w.dim() != (1, 4 * hidden, input_size) {
        return Err(format!("W has shape {:?}, expected [1, {}, {}]", w.shape(), 4 * hidden, input_size));
    }
    if r.dim() != (1, 4 * hidden, hidden) {
        return Err(format!("R has shape {:?}, expected [1, {}, {}]", r.shape(), 4 * hidden, hidden));
    }
    let w: ArrayView2<f32> = w.index_axis_move(Axis(0), 0);
    let r: ArrayView2<f32> = r.index_axis_move(Axis(0), 0);

    // Wb and Rb are summed once up front
    let bias = match node.optional_input(3) {
        Some(_) => {
            let b = float_input(node, values, 3)?;
            if b.shape() != [1, 8 * hidden] {
                return Err(format!("B has shape {:?}, expected [1, {}]", b.shape(), 8 * hidden));
            }
            let b = b.slice(s![0, ..]);
            &b.slice(s![..4 * hidden]) + &b.slice(s![4 * hidden..])
        }
        None => ndarray::Array1::zeros(4 * hidden),
    };

    let mut h = Array2::<f32>::zeros((batch, hidden));
    let mut c = Array2::<f32>::zeros((batch, hidden));
    let mut y = Array4::<f32>::zeros((seq_len, 1, batch, hidden));

    for t in 0..seq_len {
        let x_t = x.index_axis(Axis(0), t);
        let gates = x_t.dot(&w.t()) + h.dot(&r.t()) + &bias;

        let i = gates.slice(s![.., 0..hidden]).mapv(sigmoid);
        let o = gates.slice(s![.., hidden..2 * hidden]).mapv(sigmoid);
        let f = gates.slice(s![.., 2 * hidden..3 * hidden]).mapv(sigmoid);
        let g = gates.slice(s![.., 3 * hidden..]).mapv(f32::tanh);

        c = &f * &c + &i * &g;
        h = &o * &c.mapv(f32::tanh);
        y.slice_mut(s![t, 0, .., ..]).assign(&h);
    }

    Ok(vec![
        Value::Float(y.into_dyn()),
        Value::Float(h.insert_axis(Axis(0)).into_dyn()),
        Value::Float(c.insert_axis(Axis(0)).into_dyn()),
    ])
}

fn squeeze(node: &Node, values: &HashMap<String, Value>) -> NodeResult<ArrayD<f32>> {
    let data = float_input(node, values, 0)?;
    let rank = data.ndim();
    let mut axes: Vec<usize> = match optional_ints(node, values, 1)? {
        Some(axes) => axes
            .iter()
            .map(|a| normalize_axis(*a, rank))
            .collect::<NodeResult<_>>()?,
        None => (0..rank).filter(|a| data.shape()[*a] == 1).collect(),
    };
    axes.sort_unstable();
    axes.dedup();

    let mut out = data.clone();
    for axis in axes.into_iter().rev() {
        if out.shape()[axis] != 1 {
            return Err(format!("cannot squeeze axis {} of size {}", axis, out.shape()[axis]));
        }
        out = out.index_axis_move(Axis(axis), 0);
    }
    Ok(out)
}

fn unsqueeze(node: &Node, values: &HashMap<String, Value>) -> NodeResult<ArrayD<f32>> {
    let data = float_input(node, values, 0)?;
    let axes = optional_ints(node, values, 1)?.ok_or("axes input is required")?;
    let out_rank = data.ndim() + axes.len();
    let mut axes: Vec<usize> = axes
        .iter()
        .map(|a| normalize_axis(*a, out_rank))
        .collect::<NodeResult<_>>()?;
    axes.sort_unstable();

    let mut out = data.clone();
    for axis in axes {
        out = out.insert_axis(Axis(axis));
    }
    Ok(out)
}

fn concat(node: &Node, values: &HashMap<String, Value>) -> NodeResult<ArrayD<f32>> {
    let arrays: Vec<&ArrayD<f32>> = (0..node.inputs.len())
        .map(|i| float_input(node, values, i))
        .collect::<NodeResult<_>>()?;
    let first = arrays.first().ok_or("at least one input is required")?;
    let axis = normalize_axis(node.int_attr("axis").ok_or("axis attribute is required")?, first.ndim())?;
    let views: Vec<_> = arrays.iter().map(|a| a.view()).collect();
    concatenate(Axis(axis), &views).map_err(|e| format!("cannot concatenate: {}", e))
}

fn gemm(node: &Node, values: &HashMap<String, Value>) -> NodeResult<ArrayD<f32>> {
    let a = float_input(node, values, 0)?
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| format!("A must be rank 2: {}", e))?;
    let b = float_input(node, values, 1)?
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| format!("B must be rank 2: {}", e))?;
    let a = if node.int_attr("transA").unwrap_or(0) != 0 { a.reversed_axes() } else { a };
    let b = if node.int_attr("transB").unwrap_or(0) != 0 { b.reversed_axes() } else { b };
    if a.ncols() != b.nrows() {
        return Err(format!("cannot multiply {:?} by {:?}", a.shape(), b.shape()));
    }
    let alpha = node.float_attr("alpha").unwrap_or(1.0);
    let beta = node.float_attr("beta").unwrap_or(1.0);

    let product = (a.dot(&b) * alpha).into_dyn();
    match node.optional_input(2) {
        Some(_) => {
            let bias = float_input(node, values, 2)? * beta;
            broadcast_with(&product, &bias, |x, y| x + y)
        }
        None => Ok(product),
    }
}

fn matmul(node: &Node, values: &HashMap<String, Value>) -> NodeResult<ArrayD<f32>> {
    let a = as_matrix(float_input(node, values, 0)?)?;
    let b = as_matrix(float_input(node, values, 1)?)?;
    if a.ncols() != b.nrows() {
        return Err(format!("cannot multiply {:?} by {:?}", a.shape(), b.shape()));
    }
    Ok(a.dot(&b).into_dyn())
}

fn as_matrix(array: &ArrayD<f32>) -> NodeResult<ArrayView2<'_, f32>> {
    array
        .view()
        .into_dimensionality::<Ix2>()
        .map_err(|e| format!("only rank-2 MatMul is supported: {}", e))
}

/// Numpy-style broadcast of two shapes
fn broadcast_shape(a: &[usize], b: &[usize]) -> Option<Vec<usize>> {
    let rank = a.len().max(b.len());
    let dim = |shape: &[usize], i: usize| {
        let offset = rank - shape.len();
        if i < offset { 1 } else { shape[i - offset] }
    };
    (0..rank)
        .map(|i| match (dim(a, i), dim(b, i)) {
            (x, y) if x == y => Some(x),
            (1, y) => Some(y),
            (x, 1) => Some(x),
            _ => None,
        })
        .collect()
}

fn broadcast_with(
    a: &ArrayD<f32>,
    b: &ArrayD<f32>,
    op: impl Fn(f32, f32) -> f32,
) -> NodeResult<ArrayD<f32>> {
    let shape = broadcast_shape(a.shape(), b.shape())
        .ok_or_else(|| format!("shapes {:?} and {:?} do not broadcast", a.shape(), b.shape()))?;
    let shape = IxDyn(&shape);
    let (a, b) = match (a.broadcast(shape.clone()), b.broadcast(shape)) {
        (Some(a), Some(b)) => (a, b),
        _ => return Err("broadcast failed".into()),
    };
    let mut out = a.to_owned();
    out.zip_mut_with(&b, |x, y| *x = op(*x, *y));
    Ok(out)
}

fn elementwise(
    node: &Node,
    values: &HashMap<String, Value>,
    op: impl Fn(f32, f32) -> f32,
) -> NodeResult<ArrayD<f32>> {
    broadcast_with(float_input(node, values, 0)?, float_input(node, values, 1)?, op)
}

fn reduce_sum(node: &Node, values: &HashMap<String, Value>) -> NodeResult<ArrayD<f32>> {
    let data = float_input(node, values, 0)?;
    let keepdims = node.int_attr("keepdims").unwrap_or(1) != 0;
    let mut axes: Vec<usize> = match optional_ints(node, values, 1)? {
        Some(axes) if !axes.is_empty() => axes
            .iter()
            .map(|a| normalize_axis(*a, data.ndim()))
            .collect::<NodeResult<_>>()?,
        _ if node.int_attr("noop_with_empty_axes").unwrap_or(0) != 0 => Vec::new(),
        _ => (0..data.ndim()).collect(),
    };
    axes.sort_unstable();
    axes.dedup();

    let mut out = data.clone();
    for axis in axes.into_iter().rev() {
        out = out.sum_axis(Axis(axis));
        if keepdims {
            out = out.insert_axis(Axis(axis));
        }
    }
    Ok(out)
}

fn split(node: &Node, values: &HashMap<String, Value>) -> NodeResult<Vec<ArrayD<f32>>> {
    let data = float_input(node, values, 0)?;
    let axis = normalize_axis(node.int_attr("axis").unwrap_or(0), data.ndim())?;
    let length = data.shape()[axis];
    let parts = node.outputs.len();
    if parts == 0 {
        return Err("at least one output is required".into());
    }

    let sizes: Vec<usize> = match optional_ints(node, values, 1)? {
        Some(sizes) => sizes.iter().map(|s| *s as usize).collect(),
        None if length % parts == 0 => vec![length / parts; parts],
        None => return Err(format!("axis of length {} does not split evenly {} ways", length, parts)),
    };
    if sizes.len() != parts || sizes.iter().sum::<usize>() != length {
        return Err(format!("split sizes {:?} do not cover axis of length {}", sizes, length));
    }

    let mut start = 0;
    let mut out = Vec::with_capacity(parts);
    for size in sizes {
        out.push(
            data.slice_axis(Axis(axis), Slice::from(start..start + size))
                .to_owned(),
        );
        start += size;
    }
    Ok(out)
}
