//! Model builders shared by the unit tests.

use std::collections::HashMap;
use std::path::Path;

use protobuf::{Enum, EnumOrUnknown, MessageField};

use crate::protos::{
    attribute_proto::AttributeType,
    tensor_proto::{DataLocation, DataType},
    AttributeProto, GraphProto, ModelProto, NodeProto, OperatorSetIdProto,
    StringStringEntryProto, TensorProto,
};

pub(crate) fn entry(key: &str, value: &str) -> StringStringEntryProto {
    let mut entry = StringStringEntryProto::new();
    entry.key = Some(key.to_string());
    entry.value = Some(value.to_string());
    entry
}

pub(crate) fn float_bytes(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub(crate) fn write_file(dir: &Path, name: &str, data: &[u8]) {
    std::fs::write(dir.join(name), data).unwrap();
}

pub(crate) fn external_tensor(
    name: &str,
    location: &str,
    offset: Option<u64>,
    length: Option<u64>,
) -> TensorProto {
    let mut tensor = TensorProto::new();
    tensor.name = Some(name.to_string());
    tensor.data_type = Some(DataType::FLOAT.value());
    tensor.data_location = Some(EnumOrUnknown::new(DataLocation::EXTERNAL));
    tensor.external_data.push(entry("location", location));
    if let Some(offset) = offset {
        tensor.external_data.push(entry("offset", &offset.to_string()));
    }
    if let Some(length) = length {
        tensor.external_data.push(entry("length", &length.to_string()));
    }
    tensor
}

pub(crate) fn inline_tensor(name: &str, values: &[f32]) -> TensorProto {
    let mut tensor = TensorProto::new();
    tensor.name = Some(name.to_string());
    tensor.data_type = Some(DataType::FLOAT.value());
    tensor.dims = vec![values.len() as i64];
    tensor.raw_data = Some(float_bytes(values));
    tensor
}

fn tensor_attribute(name: &str, tensor: TensorProto) -> AttributeProto {
    let mut attribute = AttributeProto::new();
    attribute.name = Some(name.to_string());
    attribute.type_ = Some(EnumOrUnknown::new(AttributeType::TENSOR));
    attribute.t = MessageField::some(tensor);
    attribute
}

fn graph_attribute(name: &str, graph: GraphProto) -> AttributeProto {
    let mut attribute = AttributeProto::new();
    attribute.name = Some(name.to_string());
    attribute.type_ = Some(EnumOrUnknown::new(AttributeType::GRAPH));
    attribute.g = MessageField::some(graph);
    attribute
}

fn node(op_type: &str, inputs: &[&str], outputs: &[&str]) -> NodeProto {
    let mut node = NodeProto::new();
    node.op_type = Some(op_type.to_string());
    node.name = Some(format!("{}_0", op_type.to_lowercase()));
    node.input = inputs.iter().map(|s| s.to_string()).collect();
    node.output = outputs.iter().map(|s| s.to_string()).collect();
    node
}

/// Model with external tensors in the main graph, in a node attribute and in
/// an `If` branch, spread over `weights.bin` and `branch.bin` in `dir`.
///
/// Returns the model and the payload every tensor should end up with.
pub(crate) fn nested_model(dir: &Path) -> (ModelProto, HashMap<String, Vec<u8>>) {
    let weights = float_bytes(&[0.5, 1.5, 2.5, 3.5, 4.5, 5.5]);
    let branch = float_bytes(&[-1.0, -2.0]);
    write_file(dir, "weights.bin", &weights);
    write_file(dir, "branch.bin", &branch);

    let mut then_branch = GraphProto::new();
    then_branch.name = Some("then".to_string());
    then_branch
        .initializer
        .push(external_tensor("branch_w", "branch.bin", None, None));

    let mut if_node = node("If", &["cond"], &["y"]);
    if_node
        .attribute
        .push(graph_attribute("then_branch", then_branch));

    let mut constant = node("Constant", &[], &["c"]);
    constant.attribute.push(tensor_attribute(
        "value",
        external_tensor("const_c", "weights.bin", Some(16), Some(8)),
    ));

    let mut graph = GraphProto::new();
    graph.name = Some("main".to_string());
    graph
        .initializer
        .push(external_tensor("w", "weights.bin", Some(0), Some(16)));
    graph.initializer.push(inline_tensor("bias", &[9.0]));
    graph.node.push(constant);
    graph.node.push(if_node);

    let mut opset = OperatorSetIdProto::new();
    opset.version = Some(17);

    let mut model = ModelProto::new();
    model.ir_version = Some(8);
    model.producer_name = Some("onnx-merge-tests".to_string());
    model.opset_import.push(opset);
    model.graph = MessageField::some(graph);

    let expected = HashMap::from([
        ("w".to_string(), weights[..16].to_vec()),
        ("const_c".to_string(), weights[16..24].to_vec()),
        ("branch_w".to_string(), branch),
        ("bias".to_string(), float_bytes(&[9.0])),
    ]);
    (model, expected)
}
