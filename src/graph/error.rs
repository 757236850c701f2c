use std::path::PathBuf;
use thiserror::Error;

/// Structural or contract problems found before a graph is persisted or run
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(
        "incompatible graph version: IR {ir_version} / opset {opset}, \
         the execution engine supports IR {supported_ir} / opset {supported_opset}"
    )]
    IncompatibleVersion {
        ir_version: i64,
        opset: i64,
        supported_ir: i64,
        supported_opset: i64,
    },
    #[error("graph declares no default-domain operator set")]
    MissingOpset,
    #[error("node '{node}' uses operator '{op_type}', which opset {opset} does not provide")]
    UnsupportedOperator {
        node: String,
        op_type: String,
        opset: i64,
    },
    #[error("node '{node}' reads '{value}' before it is defined")]
    UndefinedValue { node: String, value: String },
    #[error("value '{0}' is defined more than once")]
    DuplicateValue(String),
    #[error("graph output '{0}' is never produced")]
    MissingOutput(String),
    #[error("initializer '{name}' holds {actual} values but dims {dims:?} need {expected}")]
    InitializerSize {
        name: String,
        dims: Vec<i64>,
        expected: i64,
        actual: usize,
    },
    #[error("node '{node}' is missing required attribute '{attribute}'")]
    MissingAttribute { node: String, attribute: String },
    #[error("runtime contract violated: {0}")]
    Contract(String),
}

/// Failures while turning a trained model into a persisted graph
#[derive(Debug, Error)]
pub enum ExportError {
    #[error("graph failed validation: {0}")]
    Validation(#[from] ValidationError),
    #[error("failed to read model parameters: {0}")]
    Parameters(String),
    #[error("failed to encode ONNX model: {0}")]
    Encode(String),
    #[error("failed to write graph to {}: {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures while reading a persisted graph
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to read graph from {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode ONNX model: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("unsupported ONNX content: {0}")]
    Format(String),
    #[error("graph failed validation: {0}")]
    Validation(#[from] ValidationError),
}

/// Failures while executing a graph
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("missing input '{0}'")]
    MissingInput(String),
    #[error("input '{name}' has shape {actual:?}, declared {expected}")]
    InputShape {
        name: String,
        actual: Vec<usize>,
        expected: String,
    },
    #[error("node '{node}' ({op_type}): {message}")]
    Node {
        node: String,
        op_type: String,
        message: String,
    },
    #[error("value '{0}' was never computed")]
    MissingValue(String),
    #[error(transparent)]
    Invalid(#[from] ValidationError),
}
