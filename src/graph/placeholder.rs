// External imports
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// Internal imports
use super::ir::{Attribute, Graph, GraphModel, Initializer, Node, OperatorSet};
use super::{history_input, producer, scalar_value};
use crate::constants::{CONFIG_INPUT, HISTORY_INPUT, IR_VERSION, OPSET_VERSION, VX_OUTPUT, VY_OUTPUT};

/// Stand-in graphs that honor the runtime contract before a trained model
/// exists
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaceholderKind {
    /// Ignores the history and returns fixed velocities
    Constant { vx: f32, vy: f32 },
    /// Sums the history over time, weights the per-feature totals and
    /// scales by the config
    WeightedSum,
}

impl Default for PlaceholderKind {
    fn default() -> Self {
        PlaceholderKind::WeightedSum
    }
}

/// Weights over `[dotX, dotY, mouseX, mouseY]` totals: move along the
/// dot-minus-mouse offset
const VX_WEIGHTS: [f32; 4] = [0.1, 0.0, -0.1, 0.0];
const VY_WEIGHTS: [f32; 4] = [0.0, 0.1, 0.0, -0.1];
const VX_CONFIG_SCALE: f32 = 30.0;
const VY_CONFIG_SCALE: f32 = 25.0;

/// Build a placeholder graph with the same interface as a trained export
pub fn placeholder_graph(kind: &PlaceholderKind) -> GraphModel {
    let (name, nodes, initializers) = match kind {
        PlaceholderKind::Constant { vx, vy } => constant_nodes(*vx, *vy),
        PlaceholderKind::WeightedSum => weighted_sum_nodes(),
    };
    let (producer_name, producer_version) = producer();

    let mut metadata_props = BTreeMap::new();
    metadata_props.insert("placeholder".to_string(), "true".to_string());

    GraphModel {
        ir_version: IR_VERSION,
        opset_import: vec![OperatorSet {
            domain: String::new(),
            version: OPSET_VERSION,
        }],
        producer_name,
        producer_version,
        metadata_props,
        graph: Graph {
            name: name.to_string(),
            nodes,
            initializers,
            inputs: vec![history_input(), scalar_value(CONFIG_INPUT)],
            outputs: vec![scalar_value(VX_OUTPUT), scalar_value(VY_OUTPUT)],
        },
    }
}

fn constant_nodes(vx: f32, vy: f32) -> (&'static str, Vec<Node>, Vec<Initializer>) {
    // Multiplying config by zero keeps the output shape tied to the input
    let nodes = vec![
        Node::new("Mul", "zero_config", &[CONFIG_INPUT, "zero"], &["zeroed"]),
        Node::new("Add", "const_vx", &["zeroed", "vx_value"], &[VX_OUTPUT]),
        Node::new("Add", "const_vy", &["zeroed", "vy_value"], &[VY_OUTPUT]),
    ];
    let initializers = vec![
        Initializer::float("zero", &[], vec![0.0]),
        Initializer::float("vx_value", &[1, 1], vec![vx]),
        Initializer::float("vy_value", &[1, 1], vec![vy]),
    ];
    ("DotEvasionConstant", nodes, initializers)
}

fn weighted_sum_nodes() -> (&'static str, Vec<Node>, Vec<Initializer>) {
    let nodes = vec![
        Node::new("ReduceSum", "sum_over_time", &[HISTORY_INPUT, "time_axis"], &["totals"])
            .with_attr("keepdims", Attribute::Int(0)),
        Node::new("MatMul", "influence_x", &["totals", "vx_weights"], &["influence_x"]),
        Node::new("MatMul", "influence_y", &["totals", "vy_weights"], &["influence_y"]),
        Node::new("Mul", "scale_x", &[CONFIG_INPUT, "vx_scale"], &["speed_x"]),
        Node::new("Mul", "scale_y", &[CONFIG_INPUT, "vy_scale"], &["speed_y"]),
        Node::new("Mul", "velocity_x", &["influence_x", "speed_x"], &[VX_OUTPUT]),
        Node::new("Mul", "velocity_y", &["influence_y", "speed_y"], &[VY_OUTPUT]),
    ];
    let initializers = vec![
        Initializer::int64("time_axis", &[1], vec![1]),
        Initializer::float("vx_weights", &[4, 1], VX_WEIGHTS.to_vec()),
        Initializer::float("vy_weights", &[4, 1], VY_WEIGHTS.to_vec()),
        Initializer::float("vx_scale", &[], vec![VX_CONFIG_SCALE]),
        Initializer::float("vy_scale", &[], vec![VY_CONFIG_SCALE]),
    ];
    ("DotEvasionWeightedSum", nodes, initializers)
}
