// External imports
use prost::Message;
use std::collections::BTreeMap;

// Internal imports
use super::error::LoadError;
use super::ir::{
    Attribute, Dim, ElementType, Graph, GraphModel, Initializer, Node, OperatorSet, TensorValues,
    ValueInfo,
};
use super::proto::attribute_proto::AttributeType;
use super::proto::tensor_proto::DataType;
use super::proto::tensor_shape_proto::{dimension, Dimension};
use super::proto::{
    type_proto, AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, TensorProto, TensorShapeProto, TypeProto, ValueInfoProto,
};

/// Encode a graph model as ONNX `ModelProto` bytes
pub fn encode_model(model: &GraphModel) -> Vec<u8> {
    to_proto(model).encode_to_vec()
}

/// Decode ONNX `ModelProto` bytes into a graph model
pub fn decode_model(bytes: &[u8]) -> Result<GraphModel, LoadError> {
    let proto = ModelProto::decode(bytes)?;
    from_proto(proto)
}

pub fn to_proto(model: &GraphModel) -> ModelProto {
    ModelProto {
        ir_version: model.ir_version,
        producer_name: model.producer_name.clone(),
        producer_version: model.producer_version.clone(),
        opset_import: model
            .opset_import
            .iter()
            .map(|o| OperatorSetIdProto {
                domain: o.domain.clone(),
                version: o.version,
            })
            .collect(),
        metadata_props: model
            .metadata_props
            .iter()
            .map(|(key, value)| StringStringEntryProto {
                key: key.clone(),
                value: value.clone(),
            })
            .collect(),
        graph: Some(graph_to_proto(&model.graph)),
        ..Default::default()
    }
}

fn graph_to_proto(graph: &Graph) -> GraphProto {
    GraphProto {
        name: graph.name.clone(),
        node: graph.nodes.iter().map(node_to_proto).collect(),
        initializer: graph.initializers.iter().map(initializer_to_proto).collect(),
        input: graph.inputs.iter().map(value_info_to_proto).collect(),
        output: graph.outputs.iter().map(value_info_to_proto).collect(),
        ..Default::default()
    }
}

fn node_to_proto(node: &Node) -> NodeProto {
    NodeProto {
        name: node.name.clone(),
        op_type: node.op_type.clone(),
        input: node.inputs.clone(),
        output: node.outputs.clone(),
        attribute: node
            .attributes
            .iter()
            .map(|(name, value)| attribute_to_proto(name, value))
            .collect(),
        ..Default::default()
    }
}

fn attribute_to_proto(name: &str, value: &Attribute) -> AttributeProto {
    let mut proto = AttributeProto {
        name: name.to_string(),
        ..Default::default()
    };
    match value {
        Attribute::Int(v) => {
            proto.i = *v;
            proto.set_type(AttributeType::Int);
        }
        Attribute::Ints(v) => {
            proto.ints = v.clone();
            proto.set_type(AttributeType::Ints);
        }
        Attribute::Float(v) => {
            proto.f = *v;
            proto.set_type(AttributeType::Float);
        }
        Attribute::Floats(v) => {
            proto.floats = v.clone();
            proto.set_type(AttributeType::Floats);
        }
        Attribute::String(v) => {
            proto.s = v.as_bytes().to_vec();
            proto.set_type(AttributeType::String);
        }
    }
    proto
}

fn initializer_to_proto(init: &Initializer) -> TensorProto {
    let mut proto = TensorProto {
        name: init.name.clone(),
        dims: init.dims.clone(),
        ..Default::default()
    };
    match &init.data {
        TensorValues::Float(values) => {
            proto.float_data = values.clone();
            proto.data_type = DataType::Float as i32;
        }
        TensorValues::Int64(values) => {
            proto.int64_data = values.clone();
            proto.data_type = DataType::Int64 as i32;
        }
    }
    proto
}

fn element_type_code(elem_type: ElementType) -> DataType {
    match elem_type {
        ElementType::Float => DataType::Float,
        ElementType::Int64 => DataType::Int64,
    }
}

fn value_info_to_proto(info: &ValueInfo) -> ValueInfoProto {
    let dim = info
        .shape
        .iter()
        .map(|d| Dimension {
            value: Some(match d {
                Dim::Value(v) => dimension::Value::DimValue(*v),
                Dim::Param(p) => dimension::Value::DimParam(p.clone()),
            }),
            ..Default::default()
        })
        .collect();
    ValueInfoProto {
        name: info.name.clone(),
        r#type: Some(TypeProto {
            value: Some(type_proto::Value::TensorType(type_proto::Tensor {
                elem_type: element_type_code(info.elem_type) as i32,
                shape: Some(TensorShapeProto { dim }),
            })),
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn from_proto(proto: ModelProto) -> Result<GraphModel, LoadError> {
    let graph = proto
        .graph
        .ok_or_else(|| LoadError::Format("model has no graph".to_string()))?;

    Ok(GraphModel {
        ir_version: proto.ir_version,
        opset_import: proto
            .opset_import
            .into_iter()
            .map(|o| OperatorSet {
                domain: o.domain,
                version: o.version,
            })
            .collect(),
        producer_name: proto.producer_name,
        producer_version: proto.producer_version,
        metadata_props: proto
            .metadata_props
            .into_iter()
            .map(|entry| (entry.key, entry.value))
            .collect(),
        graph: graph_from_proto(graph)?,
    })
}

fn graph_from_proto(graph: GraphProto) -> Result<Graph, LoadError> {
    Ok(Graph {
        name: graph.name,
        nodes: graph
            .node
            .into_iter()
            .map(node_from_proto)
            .collect::<Result<_, _>>()?,
        initializers: graph
            .initializer
            .into_iter()
            .map(initializer_from_proto)
            .collect::<Result<_, _>>()?,
        inputs: graph
            .input
            .into_iter()
            .map(value_info_from_proto)
            .collect::<Result<_, _>>()?,
        outputs: graph
            .output
            .into_iter()
            .map(value_info_from_proto)
            .collect::<Result<_, _>>()?,
    })
}

fn node_from_proto(node: NodeProto) -> Result<Node, LoadError> {
    let mut attributes = BTreeMap::new();
    for attr in node.attribute {
        let value = match attr.r#type() {
            AttributeType::Int => Attribute::Int(attr.i),
            AttributeType::Ints => Attribute::Ints(attr.ints),
            AttributeType::Float => Attribute::Float(attr.f),
            AttributeType::Floats => Attribute::Floats(attr.floats),
            AttributeType::String => Attribute::String(
                String::from_utf8(attr.s)
                    .map_err(|e| LoadError::Format(format!("attribute '{}': {}", attr.name, e)))?,
            ),
            other => {
                return Err(LoadError::Format(format!(
                    "node '{}': attribute '{}' has unsupported type {:?}",
                    node.name, attr.name, other
                )))
            }
        };
        attributes.insert(attr.name, value);
    }
    Ok(Node {
        name: node.name,
        op_type: node.op_type,
        inputs: node.input,
        outputs: node.output,
        attributes,
    })
}

fn initializer_from_proto(tensor: TensorProto) -> Result<Initializer, LoadError> {
    let data = match DataType::try_from(tensor.data_type).unwrap_or(DataType::Undefined) {
        DataType::Float if !tensor.raw_data.is_empty() => TensorValues::Float(
            tensor
                .raw_data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
        ),
        DataType::Float => TensorValues::Float(tensor.float_data),
        DataType::Int64 if !tensor.raw_data.is_empty() => TensorValues::Int64(
            tensor
                .raw_data
                .chunks_exact(8)
                .map(|b| i64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]))
                .collect(),
        ),
        DataType::Int64 => TensorValues::Int64(tensor.int64_data),
        other => {
            return Err(LoadError::Format(format!(
                "initializer '{}' has unsupported data type {:?}",
                tensor.name, other
            )))
        }
    };
    Ok(Initializer {
        name: tensor.name,
        dims: tensor.dims,
        data,
    })
}

fn value_info_from_proto(info: ValueInfoProto) -> Result<ValueInfo, LoadError> {
    let tensor = match info.r#type.and_then(|t| t.value) {
        Some(type_proto::Value::TensorType(tensor)) => tensor,
        None => {
            return Err(LoadError::Format(format!(
                "value '{}' is not a tensor",
                info.name
            )))
        }
    };
    let elem_type = match DataType::try_from(tensor.elem_type) {
        Ok(DataType::Float) => ElementType::Float,
        Ok(DataType::Int64) => ElementType::Int64,
        _ => {
            return Err(LoadError::Format(format!(
                "value '{}' has unsupported element type {}",
                info.name, tensor.elem_type
            )))
        }
    };
    let shape = tensor
        .shape
        .map(|s| s.dim)
        .unwrap_or_default()
        .into_iter()
        .map(|d| match d.value {
            Some(dimension::Value::DimValue(v)) => Ok(Dim::Value(v)),
            Some(dimension::Value::DimParam(p)) => Ok(Dim::Param(p)),
            None => Err(LoadError::Format(format!(
                "value '{}' has a dimension with neither size nor name",
                info.name
            ))),
        })
        .collect::<Result<_, _>>()?;
    Ok(ValueInfo {
        name: info.name,
        elem_type,
        shape,
    })
}
