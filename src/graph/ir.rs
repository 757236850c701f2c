// External crates
use std::collections::BTreeMap;

/// Default operator domain
pub const DEFAULT_DOMAIN: &str = "";

/// An inference graph plus the versions it was built against
#[derive(Debug, Clone, PartialEq)]
pub struct GraphModel {
    pub ir_version: i64,
    pub opset_import: Vec<OperatorSet>,
    pub producer_name: String,
    pub producer_version: String,
    pub metadata_props: BTreeMap<String, String>,
    pub graph: Graph,
}

impl GraphModel {
    /// Opset version of the default domain, if declared
    pub fn opset_version(&self) -> Option<i64> {
        self.opset_import
            .iter()
            .find(|o| o.domain == DEFAULT_DOMAIN)
            .map(|o| o.version)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OperatorSet {
    pub domain: String,
    pub version: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Graph {
    pub name: String,
    pub nodes: Vec<Node>,
    pub initializers: Vec<Initializer>,
    pub inputs: Vec<ValueInfo>,
    pub outputs: Vec<ValueInfo>,
}

impl Graph {
    pub fn input(&self, name: &str) -> Option<&ValueInfo> {
        self.inputs.iter().find(|v| v.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&ValueInfo> {
        self.outputs.iter().find(|v| v.name == name)
    }

    pub fn initializer(&self, name: &str) -> Option<&Initializer> {
        self.initializers.iter().find(|i| i.name == name)
    }
}

/// One operator application. An empty input or output name marks an omitted
/// optional slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub op_type: String,
    pub inputs: Vec<String>,
    pub outputs: Vec<String>,
    pub attributes: BTreeMap<String, Attribute>,
}

impl Node {
    pub fn new(op_type: &str, name: &str, inputs: &[&str], outputs: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            op_type: op_type.to_string(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            attributes: BTreeMap::new(),
        }
    }

    pub fn with_attr(mut self, key: &str, value: Attribute) -> Self {
        self.attributes.insert(key.to_string(), value);
        self
    }

    pub fn int_attr(&self, key: &str) -> Option<i64> {
        match self.attributes.get(key) {
            Some(Attribute::Int(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn ints_attr(&self, key: &str) -> Option<&[i64]> {
        match self.attributes.get(key) {
            Some(Attribute::Ints(v)) => Some(v),
            _ => None,
        }
    }

    pub fn float_attr(&self, key: &str) -> Option<f32> {
        match self.attributes.get(key) {
            Some(Attribute::Float(v)) => Some(*v),
            _ => None,
        }
    }

    pub fn string_attr(&self, key: &str) -> Option<&str> {
        match self.attributes.get(key) {
            Some(Attribute::String(v)) => Some(v),
            _ => None,
        }
    }

    /// Input at `index`, treating empty names as absent
    pub fn optional_input(&self, index: usize) -> Option<&str> {
        self.inputs
            .get(index)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Attribute {
    Int(i64),
    Ints(Vec<i64>),
    Float(f32),
    Floats(Vec<f32>),
    String(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    Float,
    Int64,
}

/// Constant tensor stored in the graph
#[derive(Debug, Clone, PartialEq)]
pub struct Initializer {
    pub name: String,
    pub dims: Vec<i64>,
    pub data: TensorValues,
}

impl Initializer {
    pub fn float(name: &str, dims: &[i64], values: Vec<f32>) -> Self {
        Self {
            name: name.to_string(),
            dims: dims.to_vec(),
            data: TensorValues::Float(values),
        }
    }

    pub fn int64(name: &str, dims: &[i64], values: Vec<i64>) -> Self {
        Self {
            name: name.to_string(),
            dims: dims.to_vec(),
            data: TensorValues::Int64(values),
        }
    }

    pub fn element_count(&self) -> usize {
        match &self.data {
            TensorValues::Float(v) => v.len(),
            TensorValues::Int64(v) => v.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TensorValues {
    Float(Vec<f32>),
    Int64(Vec<i64>),
}

/// A dimension is either a fixed size or a symbolic (dynamic) name
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dim {
    Value(i64),
    Param(String),
}

impl Dim {
    pub fn is_dynamic(&self) -> bool {
        matches!(self, Dim::Param(_))
    }
}

/// Name, element type and declared shape of a graph input or output
#[derive(Debug, Clone, PartialEq)]
pub struct ValueInfo {
    pub name: String,
    pub elem_type: ElementType,
    pub shape: Vec<Dim>,
}

impl ValueInfo {
    pub fn float(name: &str, shape: Vec<Dim>) -> Self {
        Self {
            name: name.to_string(),
            elem_type: ElementType::Float,
            shape,
        }
    }

    /// Number of elements when every dimension is fixed
    pub fn fixed_element_count(&self) -> Option<i64> {
        self.shape
            .iter()
            .map(|d| match d {
                Dim::Value(v) => Some(*v),
                Dim::Param(_) => None,
            })
            .product()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_attribute_lookup() {
        let node = Node::new("Concat", "concat", &["a", "b"], &["c"]).with_attr("axis", Attribute::Int(1));
        assert_eq!(node.int_attr("axis"), Some(1));
        assert_eq!(node.ints_attr("axis"), None);
        assert_eq!(node.optional_input(1), Some("b"));
        assert_eq!(node.optional_input(2), None);

        let lstm = Node::new("LSTM", "lstm", &["x", "W", "R", "B", "", "h0"], &["y"]);
        assert_eq!(lstm.optional_input(4), None);
        assert_eq!(lstm.optional_input(5), Some("h0"));
    }

    #[test]
    fn test_fixed_element_count() {
        assert_eq!(ValueInfo::float("c", vec![Dim::Value(1), Dim::Value(1)]).fixed_element_count(), Some(1));
        assert_eq!(
            ValueInfo::float("h", vec![Dim::Value(1), Dim::Param("t".into())]).fixed_element_count(),
            None
        );
    }
}
