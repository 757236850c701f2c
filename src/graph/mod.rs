//! # Inference Graph
//!
//! Dataflow representation of the evasion model and its ONNX encoding. The
//! module provides:
//!
//! - **ir**: Graph, node, initializer and value-info types
//! - **proto**: ONNX protobuf messages generated at build time
//! - **onnx**: Conversion between the graph types and `ModelProto`
//! - **checker**: Structural validation and the runtime interface contract
//! - **executor**: Reference interpreter over `ndarray`
//! - **placeholder**: Stand-in graphs for use before training
//! - **serialization**: Validated, atomic `.onnx` save and load
//!
//! Every graph exposes `history` `[1, seq_len, 4]` and `config` `[1, 1]` as
//! inputs and `targetVx`, `targetVy` `[1, 1]` as outputs.

pub mod checker;
pub mod error;
pub mod executor;
pub mod ir;
pub mod onnx;
pub mod placeholder;
pub mod serialization;

/// Generated ONNX protobuf types
pub mod proto {
    include!(concat!(env!("OUT_DIR"), "/onnx.rs"));
}

use crate::build_info;
use crate::constants::{HISTORY_INPUT, NUM_FEATURES, SEQ_LEN_DIM};
use ir::{Dim, ValueInfo};

/// `history` input with a dynamic sequence axis
pub fn history_input() -> ValueInfo {
    ValueInfo::float(
        HISTORY_INPUT,
        vec![
            Dim::Value(1),
            Dim::Param(SEQ_LEN_DIM.to_string()),
            Dim::Value(NUM_FEATURES as i64),
        ],
    )
}

/// A `[1, 1]` float value
pub fn scalar_value(name: &str) -> ValueInfo {
    ValueInfo::float(name, vec![Dim::Value(1), Dim::Value(1)])
}

/// Name and version recorded as the graph's producer
pub fn producer() -> (String, String) {
    (
        build_info::PKG_NAME.to_string(),
        build_info::PKG_VERSION.to_string(),
    )
}
