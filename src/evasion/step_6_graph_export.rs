// External imports
use burn::nn::Linear;
use burn::tensor::{backend::Backend, Tensor};
use chrono::Utc;
use log::info;
use std::collections::BTreeMap;
use std::path::Path;

// Internal imports
use super::step_3_evasion_model_arch::EvasionLstm;
use crate::constants::{
    CONFIG_INPUT, FEATURE_COLUMNS, HISTORY_INPUT, IR_VERSION, NUM_FEATURES, OPSET_VERSION,
    OUTPUT_SIZE, VX_OUTPUT, VY_OUTPUT,
};
use crate::graph::checker::{check_graph, check_versions};
use crate::graph::error::{ExportError, ValidationError};
use crate::graph::ir::{Attribute, Graph, GraphModel, Initializer, Node, OperatorSet};
use crate::graph::serialization::save_graph;
use crate::graph::{history_input, producer, scalar_value};

/// Target format versions for an export
#[derive(Debug, Clone, PartialEq)]
pub struct ExportOptions {
    pub ir_version: i64,
    pub opset_version: i64,
    pub graph_name: String,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            ir_version: IR_VERSION,
            opset_version: OPSET_VERSION,
            graph_name: "DotEvasionLstm".to_string(),
        }
    }
}

/// Graph gate k (input, output, forget, cell) is read from model gate
/// `GATE_ORDER[k]` (model packs input, forget, cell, output)
const GATE_ORDER: [usize; 4] = [0, 3, 1, 2];

/// Host copy of a linear layer; `weight` is row-major `[d_input, d_output]`
struct DenseParams {
    weight: Vec<f32>,
    bias: Vec<f32>,
    d_input: usize,
    d_output: usize,
}

impl DenseParams {
    fn from_linear<B: Backend>(linear: &Linear<B>) -> Result<Self, ExportError> {
        let weight = linear.weight.val();
        let [d_input, d_output] = weight.dims();
        let weight = tensor_values(weight)?;
        let bias = match &linear.bias {
            Some(bias) => tensor_values(bias.val())?,
            None => vec![0.0; d_output],
        };
        Ok(Self {
            weight,
            bias,
            d_input,
            d_output,
        })
    }

    fn at(&self, input: usize, output: usize) -> f32 {
        self.weight[input * self.d_output + output]
    }
}

fn tensor_values<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, ExportError> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ExportError::Parameters(format!("{:?}", e)))
}

/// Gate projection as `[4 * hidden, d_input]`, rows in graph gate order
fn pack_gate_matrix(dense: &DenseParams, hidden: usize) -> Vec<f32> {
    let mut packed = Vec::with_capacity(4 * hidden * dense.d_input);
    for model_gate in GATE_ORDER {
        for unit in 0..hidden {
            let column = model_gate * hidden + unit;
            packed.extend((0..dense.d_input).map(|row| dense.at(row, column)));
        }
    }
    packed
}

fn pack_gate_bias(bias: &[f32], hidden: usize) -> Vec<f32> {
    GATE_ORDER
        .iter()
        .flat_map(|gate| bias[gate * hidden..(gate + 1) * hidden].iter().copied())
        .collect()
}

/// Lower the evaluation-mode forward pass of `model` to a graph
///
/// The sequence axis of `history` stays symbolic, so the graph accepts any
/// history length ≥ 1. Dropout is not part of the graph.
pub fn build_graph<B: Backend>(
    model: &EvasionLstm<B>,
    options: &ExportOptions,
) -> Result<GraphModel, ExportError> {
    check_versions(options.ir_version, options.opset_version)?;

    let hidden = model.hidden_size();
    let features = model.input_size();
    if features != NUM_FEATURES {
        return Err(ValidationError::Contract(format!(
            "model reads {} features per step, the graph interface carries {}",
            features, NUM_FEATURES
        ))
        .into());
    }

    let input = DenseParams::from_linear(model.lstm().input_weights())?;
    let recurrent = DenseParams::from_linear(model.lstm().hidden_weights())?;
    let head = DenseParams::from_linear(model.output())?;

    let mut lstm_bias = pack_gate_bias(&input.bias, hidden);
    lstm_bias.extend(pack_gate_bias(&recurrent.bias, hidden));

    let (h, f) = (hidden as i64, features as i64);
    let initializers = vec![
        Initializer::float("lstm_W", &[1, 4 * h, f], pack_gate_matrix(&input, hidden)),
        Initializer::float("lstm_R", &[1, 4 * h, h], pack_gate_matrix(&recurrent, hidden)),
        Initializer::float("lstm_B", &[1, 8 * h], lstm_bias),
        Initializer::int64("direction_axis", &[1], vec![0]),
        Initializer::float("head_weight", &[h + 1, OUTPUT_SIZE as i64], head.weight),
        Initializer::float("head_bias", &[OUTPUT_SIZE as i64], head.bias),
        Initializer::int64("velocity_split", &[2], vec![1, 1]),
    ];

    let nodes = vec![
        // [1, seq_len, F] -> [seq_len, 1, F]
        Node::new("Transpose", "to_seq_major", &[HISTORY_INPUT], &["history_seq_major"])
            .with_attr("perm", Attribute::Ints(vec![1, 0, 2])),
        Node::new(
            "LSTM",
            "lstm",
            &["history_seq_major", "lstm_W", "lstm_R", "lstm_B"],
            &["lstm_sequence", "lstm_last_hidden"],
        )
        .with_attr("hidden_size", Attribute::Int(h))
        .with_attr("direction", Attribute::String("forward".to_string())),
        Node::new(
            "Squeeze",
            "drop_direction",
            &["lstm_last_hidden", "direction_axis"],
            &["last_hidden"],
        ),
        Node::new("Concat", "append_config", &["last_hidden", CONFIG_INPUT], &["combined"])
            .with_attr("axis", Attribute::Int(1)),
        Node::new("Gemm", "head", &["combined", "head_weight", "head_bias"], &["velocity"]),
        Node::new("Split", "split_velocity", &["velocity", "velocity_split"], &[VX_OUTPUT, VY_OUTPUT])
            .with_attr("axis", Attribute::Int(1)),
    ];

    let mut metadata_props = BTreeMap::new();
    metadata_props.insert("exported_at".to_string(), Utc::now().to_rfc3339());
    metadata_props.insert("hidden_size".to_string(), hidden.to_string());
    metadata_props.insert("input_features".to_string(), FEATURE_COLUMNS.join(","));
    metadata_props.insert("training_dropout".to_string(), model.dropout().to_string());

    let (producer_name, producer_version) = producer();
    let graph_model = GraphModel {
        ir_version: options.ir_version,
        opset_import: vec![OperatorSet {
            domain: String::new(),
            version: options.opset_version,
        }],
        producer_name,
        producer_version,
        metadata_props,
        graph: Graph {
            name: options.graph_name.clone(),
            nodes,
            initializers,
            inputs: vec![history_input(), scalar_value(CONFIG_INPUT)],
            outputs: vec![scalar_value(VX_OUTPUT), scalar_value(VY_OUTPUT)],
        },
    };
    check_graph(&graph_model)?;
    Ok(graph_model)
}

/// Build the graph for `model` and write it atomically to `path`
pub fn export_graph<B: Backend>(
    model: &EvasionLstm<B>,
    path: impl AsRef<Path>,
    options: &ExportOptions,
) -> Result<GraphModel, ExportError> {
    let graph_model = build_graph(model, options)?;
    save_graph(&graph_model, path.as_ref())?;
    info!(
        "Exported {} nodes / {} initializers (IR {}, opset {})",
        graph_model.graph.nodes.len(),
        graph_model.graph.initializers.len(),
        options.ir_version,
        options.opset_version
    );
    Ok(graph_model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evasion::step_3_evasion_model_arch::ModelConfig;
    use crate::graph::checker::check_runtime_contract;
    use crate::graph::executor::GraphExecutor;
    use burn::tensor::TensorData;
    use burn_ndarray::{NdArray, NdArrayDevice};
    use ndarray::{arr2, Array3};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use tempfile::tempdir;

    fn small_model(seed: u64) -> EvasionLstm<NdArray> {
        let config = ModelConfig {
            hidden_size: 8,
            ..Default::default()
        };
        EvasionLstm::new(&config, &mut StdRng::seed_from_u64(seed), &NdArrayDevice::default())
    }

    #[test]
    fn test_gate_reordering() {
        // One input, hidden size 1: model columns are [i, f, g, o]
        let dense = DenseParams {
            weight: vec![1.0, 2.0, 3.0, 4.0],
            bias: vec![10.0, 20.0, 30.0, 40.0],
            d_input: 1,
            d_output: 4,
        };
        assert_eq!(pack_gate_matrix(&dense, 1), vec![1.0, 4.0, 2.0, 3.0]);
        assert_eq!(pack_gate_bias(&dense.bias, 1), vec![10.0, 40.0, 20.0, 30.0]);
    }

    #[test]
    fn test_incompatible_version_rejected() {
        let model = small_model(0);
        for (ir, opset) in [(8, 14), (9, 13), (10, 18)] {
            let options = ExportOptions {
                ir_version: ir,
                opset_version: opset,
                ..Default::default()
            };
            assert!(matches!(
                build_graph(&model, &options),
                Err(ExportError::Validation(ValidationError::IncompatibleVersion { .. }))
            ));
        }
    }

    #[test]
    fn test_graph_exposes_contract() {
        let graph_model = build_graph(&small_model(1), &ExportOptions::default()).unwrap();
        assert!(check_runtime_contract(&graph_model).is_ok());
        assert_eq!(graph_model.ir_version, IR_VERSION);
        assert_eq!(graph_model.opset_version(), Some(OPSET_VERSION));
        assert!(graph_model.graph.input(HISTORY_INPUT).unwrap().shape[1].is_dynamic());
        assert!(graph_model.metadata_props.contains_key("exported_at"));
    }

    #[test]
    fn test_graph_matches_forward_pass() {
        let model = small_model(2);
        let executor = GraphExecutor::new(build_graph(&model, &ExportOptions::default()).unwrap()).unwrap();
        let device = NdArrayDevice::default();
        let mut rng = StdRng::seed_from_u64(3);

        for seq_len in [1, 10, 50] {
            let values: Vec<f32> = (0..seq_len * NUM_FEATURES)
                .map(|_| rng.random_range(-2.0..2.0))
                .collect();
            let config = 1.7f32;

            let (vx, vy) = model.forward(
                Tensor::from_data(TensorData::new(values.clone(), [1, seq_len, NUM_FEATURES]), &device),
                Tensor::from_data(TensorData::new(vec![config], [1, 1]), &device),
            );
            let expected_vx = vx.into_data().to_vec::<f32>().unwrap()[0];
            let expected_vy = vy.into_data().to_vec::<f32>().unwrap()[0];

            let history = Array3::from_shape_vec((1, seq_len, NUM_FEATURES), values)
                .unwrap()
                .into_dyn();
            let out = executor
                .run(&[(HISTORY_INPUT, history), (CONFIG_INPUT, arr2(&[[config]]).into_dyn())])
                .unwrap();
            let got_vx = *out[VX_OUTPUT].iter().next().unwrap();
            let got_vy = *out[VY_OUTPUT].iter().next().unwrap();

            assert!((got_vx - expected_vx).abs() < 1e-4, "vx {} vs {}", got_vx, expected_vx);
            assert!((got_vy - expected_vy).abs() < 1e-4, "vy {} vs {}", got_vy, expected_vy);
        }
    }

    #[test]
    fn test_export_writes_file_only_when_valid() {
        let dir = tempdir().unwrap();
        let model = small_model(4);

        let bad_path = dir.path().join("bad.onnx");
        let bad = ExportOptions {
            opset_version: 17,
            ..Default::default()
        };
        assert!(export_graph(&model, &bad_path, &bad).is_err());
        assert!(!bad_path.exists());

        let good_path = dir.path().join("model.onnx");
        let written = export_graph(&model, &good_path, &ExportOptions::default()).unwrap();
        let loaded = crate::graph::serialization::load_graph(&good_path).unwrap();
        assert_eq!(loaded, written);
    }
}
