// External imports
use std::collections::HashSet;

// Internal imports
use super::error::ValidationError;
use super::ir::{Dim, ElementType, GraphModel, Node};
use crate::constants::{
    CONFIG_INPUT, HISTORY_INPUT, IR_VERSION, NUM_FEATURES, OPSET_VERSION, VX_OUTPUT, VY_OUTPUT,
};

/// Operators the execution engine understands, with the opset that
/// introduced the signature used here
const SUPPORTED_OPERATORS: &[(&str, i64)] = &[
    ("Add", 14),
    ("Concat", 13),
    ("Gemm", 13),
    ("Identity", 14),
    ("LSTM", 14),
    ("MatMul", 13),
    ("Mul", 14),
    ("ReduceSum", 13),
    ("Split", 13),
    ("Squeeze", 13),
    ("Transpose", 13),
    ("Unsqueeze", 13),
];

/// Attributes a node cannot run without
const REQUIRED_ATTRIBUTES: &[(&str, &str)] = &[("LSTM", "hidden_size"), ("Concat", "axis")];

/// Reject IR/opset pairs the consuming runtime cannot load
pub fn check_versions(ir_version: i64, opset: i64) -> Result<(), ValidationError> {
    if ir_version != IR_VERSION || opset != OPSET_VERSION {
        return Err(ValidationError::IncompatibleVersion {
            ir_version,
            opset,
            supported_ir: IR_VERSION,
            supported_opset: OPSET_VERSION,
        });
    }
    Ok(())
}

/// Structural check: versions, operator availability, definition order,
/// unique value names, initializer sizes and required attributes
pub fn check_graph(model: &GraphModel) -> Result<(), ValidationError> {
    let opset = model.opset_version().ok_or(ValidationError::MissingOpset)?;
    check_versions(model.ir_version, opset)?;

    let graph = &model.graph;
    let mut defined: HashSet<&str> = HashSet::new();

    for input in &graph.inputs {
        if !defined.insert(input.name.as_str()) {
            return Err(ValidationError::DuplicateValue(input.name.clone()));
        }
    }

    for init in &graph.initializers {
        if !defined.insert(init.name.as_str()) {
            return Err(ValidationError::DuplicateValue(init.name.clone()));
        }
        let expected: i64 = init.dims.iter().product();
        if init.dims.iter().any(|d| *d < 0) || expected as usize != init.element_count() {
            return Err(ValidationError::InitializerSize {
                name: init.name.clone(),
                dims: init.dims.clone(),
                expected,
                actual: init.element_count(),
            });
        }
    }

    for node in &graph.nodes {
        check_operator(node, opset)?;

        for input in node.inputs.iter().filter(|name| !name.is_empty()) {
            if !defined.contains(input.as_str()) {
                return Err(ValidationError::UndefinedValue {
                    node: node.name.clone(),
                    value: input.clone(),
                });
            }
        }
        for output in node.outputs.iter().filter(|name| !name.is_empty()) {
            if !defined.insert(output.as_str()) {
                return Err(ValidationError::DuplicateValue(output.clone()));
            }
        }
    }

    for output in &graph.outputs {
        if !defined.contains(output.name.as_str()) {
            return Err(ValidationError::MissingOutput(output.name.clone()));
        }
    }

    Ok(())
}

fn check_operator(node: &Node, opset: i64) -> Result<(), ValidationError> {
    let available = SUPPORTED_OPERATORS
        .iter()
        .any(|(op, since)| *op == node.op_type && *since <= opset);
    if !available {
        return Err(ValidationError::UnsupportedOperator {
            node: node.name.clone(),
            op_type: node.op_type.clone(),
            opset,
        });
    }

    for (op, attribute) in REQUIRED_ATTRIBUTES {
        if *op == node.op_type && !node.attributes.contains_key(*attribute) {
            return Err(ValidationError::MissingAttribute {
                node: node.name.clone(),
                attribute: attribute.to_string(),
            });
        }
    }
    Ok(())
}

/// Check the interface an inference session binds to: exactly `history` and
/// `config` in, exactly `targetVx` and `targetVy` out, a dynamic sequence
/// axis on `history`, and one float element per config and output tensor
pub fn check_runtime_contract(model: &GraphModel) -> Result<(), ValidationError> {
    let graph = &model.graph;

    let mut input_names: Vec<&str> = graph.inputs.iter().map(|v| v.name.as_str()).collect();
    input_names.sort_unstable();
    let mut expected_inputs = [CONFIG_INPUT, HISTORY_INPUT];
    expected_inputs.sort_unstable();
    if input_names != expected_inputs {
        return Err(ValidationError::Contract(format!(
            "inputs must be exactly {:?}, found {:?}",
            expected_inputs, input_names
        )));
    }

    let mut output_names: Vec<&str> = graph.outputs.iter().map(|v| v.name.as_str()).collect();
    output_names.sort_unstable();
    let mut expected_outputs = [VX_OUTPUT, VY_OUTPUT];
    expected_outputs.sort_unstable();
    if output_names != expected_outputs {
        return Err(ValidationError::Contract(format!(
            "outputs must be exactly {:?}, found {:?}",
            expected_outputs, output_names
        )));
    }

    for value in graph.inputs.iter().chain(graph.outputs.iter()) {
        if value.elem_type != ElementType::Float {
            return Err(ValidationError::Contract(format!(
                "'{}' must be a float tensor",
                value.name
            )));
        }
    }

    // Presence was checked above
    if let Some(history) = graph.input(HISTORY_INPUT) {
        if history.shape.len() != 3 {
            return Err(ValidationError::Contract(format!(
                "'{}' must be rank 3 [batch, seq_len, features], got rank {}",
                HISTORY_INPUT,
                history.shape.len()
            )));
        }
        if !history.shape[1].is_dynamic() {
            return Err(ValidationError::Contract(format!(
                "'{}' must declare a dynamic sequence axis",
                HISTORY_INPUT
            )));
        }
        if history.shape[2] != Dim::Value(NUM_FEATURES as i64) {
            return Err(ValidationError::Contract(format!(
                "'{}' must carry {} features per step",
                HISTORY_INPUT, NUM_FEATURES
            )));
        }
    }

    for name in [CONFIG_INPUT, VX_OUTPUT, VY_OUTPUT] {
        let info = graph.input(name).or_else(|| graph.output(name));
        if info.and_then(|v| v.fixed_element_count()) != Some(1) {
            return Err(ValidationError::Contract(format!(
                "'{}' must hold exactly one element",
                name
            )));
        }
    }

    Ok(())
}
