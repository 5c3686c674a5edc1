use std::fmt;

use log::warn;
use serde::Serialize;

use crate::model::external::{all_tensors, uses_external_data};
use crate::model::shared::ExternalDataInfo;
use crate::protos::ModelProto;

#[derive(Clone, Debug, Serialize)]
pub struct OpsetSummary {
    pub domain: String,
    pub version: i64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ExternalTensorSummary {
    pub name: String,
    #[serde(flatten)]
    pub info: ExternalDataInfo,
}

/// What `inspect` reports about a model.
#[derive(Clone, Debug, Serialize)]
pub struct ModelSummary {
    pub ir_version: i64,
    pub producer_name: String,
    pub producer_version: String,
    pub domain: String,
    pub model_version: i64,
    pub opset_imports: Vec<OpsetSummary>,
    pub graph_name: String,
    pub nodes: usize,
    pub inputs: usize,
    pub outputs: usize,
    pub initializers: usize,
    pub functions: usize,
    pub tensors: usize,
    pub external_tensors: Vec<ExternalTensorSummary>,
    pub external_bytes: u64,
}

impl ModelSummary {
    pub fn from_model(model: &ModelProto) -> Self {
        let tensors = all_tensors(model);
        let external_tensors: Vec<ExternalTensorSummary> = tensors
            .iter()
            .filter(|tensor| uses_external_data(tensor))
            .map(|tensor| {
                let info = match ExternalDataInfo::from_tensor(tensor) {
                    Ok(info) => info,
                    Err(e) => {
                        warn!("{}", e);
                        ExternalDataInfo::default()
                    }
                };
                ExternalTensorSummary {
                    name: tensor.name().to_string(),
                    info,
                }
            })
            .collect();
        let external_bytes = external_tensors
            .iter()
            .filter_map(|tensor| tensor.info.length)
            .sum();

        let graph = model.graph.get_or_default();
        ModelSummary {
            ir_version: model.ir_version(),
            producer_name: model.producer_name().to_string(),
            producer_version: model.producer_version().to_string(),
            domain: model.domain().to_string(),
            model_version: model.model_version(),
            opset_imports: model
                .opset_import
                .iter()
                .map(|opset| OpsetSummary {
                    domain: opset.domain().to_string(),
                    version: opset.version(),
                })
                .collect(),
            graph_name: graph.name().to_string(),
            nodes: graph.node.len(),
            inputs: graph.input.len(),
            outputs: graph.output.len(),
            initializers: graph.initializer.len(),
            functions: model.functions.len(),
            tensors: tensors.len(),
            external_tensors,
            external_bytes,
        }
    }
}

impl fmt::Display for ModelSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ir version:    {}", self.ir_version)?;
        writeln!(
            f,
            "producer:      {} {}",
            self.producer_name, self.producer_version
        )?;
        if !self.domain.is_empty() {
            writeln!(f, "domain:        {} (v{})", self.domain, self.model_version)?;
        }
        let opsets = self
            .opset_imports
            .iter()
            .map(|opset| {
                let domain = if opset.domain.is_empty() {
                    "ai.onnx"
                } else {
                    opset.domain.as_str()
                };
                format!("{}:{}", domain, opset.version)
            })
            .collect::<Vec<_>>()
            .join(", ");
        writeln!(f, "opsets:        {}", opsets)?;
        writeln!(
            f,
            "graph:         {:?} ({} nodes, {} inputs, {} outputs, {} initializers)",
            self.graph_name, self.nodes, self.inputs, self.outputs, self.initializers
        )?;
        writeln!(f, "functions:     {}", self.functions)?;
        writeln!(
            f,
            "tensors:       {} ({} external)",
            self.tensors,
            self.external_tensors.len()
        )?;
        for tensor in &self.external_tensors {
            let range = match (tensor.info.offset, tensor.info.length) {
                (offset, Some(length)) => format!("@{}+{}", offset.unwrap_or(0), length),
                (Some(offset), None) => format!("@{}..", offset),
                (None, None) => String::new(),
            };
            writeln!(f, "  {} -> {}{}", tensor.name, tensor.info.location, range)?;
        }
        if !self.external_tensors.is_empty() {
            writeln!(f, "external size: {} bytes", self.external_bytes)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::fixtures::nested_model;

    #[test]
    fn summarizes_external_references() {
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = nested_model(dir.path());
        let summary = ModelSummary::from_model(&model);

        assert_eq!(summary.ir_version, 8);
        assert_eq!(summary.graph_name, "main");
        assert_eq!(summary.nodes, 2);
        assert_eq!(summary.initializers, 2);
        assert_eq!(summary.tensors, 4);
        assert_eq!(summary.external_tensors.len(), 3);
        // branch_w has no length, so only w and const_c count
        assert_eq!(summary.external_bytes, 24);

        let text = summary.to_string();
        assert!(text.contains("ai.onnx:17"), "{text}");
        assert!(text.contains("w -> weights.bin@0+16"), "{text}");
        assert!(text.contains("branch_w -> branch.bin\n"), "{text}");
    }

    #[test]
    fn serializes_to_json() {
        let dir = tempfile::tempdir().unwrap();
        let (model, _) = nested_model(dir.path());
        let json = serde_json::to_value(ModelSummary::from_model(&model)).unwrap();

        assert_eq!(json["producer_name"], "onnx-merge-tests");
        assert_eq!(json["opset_imports"][0]["version"], 17);
        let external = json["external_tensors"].as_array().unwrap();
        assert_eq!(external.len(), 3);
        assert!(external
            .iter()
            .any(|t| t["name"] == "const_c" && t["offset"] == 16 && t["length"] == 8));
        assert!(external
            .iter()
            .all(|t| t.get("checksum").is_none()));
    }

    #[test]
    fn malformed_reference_is_listed_without_range() {
        use crate::model::fixtures::{entry, external_tensor};
        use crate::protos::GraphProto;
        use protobuf::MessageField;

        let mut tensor = external_tensor("odd", "w.bin", None, None);
        tensor.external_data.push(entry("offset", "-1"));
        let mut graph = GraphProto::new();
        graph.initializer.push(tensor);
        let mut model = ModelProto::new();
        model.graph = MessageField::some(graph);

        let summary = ModelSummary::from_model(&model);
        assert_eq!(summary.external_tensors.len(), 1);
        assert_eq!(summary.external_tensors[0].name, "odd");
        assert_eq!(summary.external_tensors[0].info, ExternalDataInfo::default());
        assert_eq!(summary.external_bytes, 0);
    }

    #[test]
    fn empty_model_has_empty_summary() {
        let summary = ModelSummary::from_model(&ModelProto::new());
        assert_eq!(summary.tensors, 0);
        assert!(summary.external_tensors.is_empty());
        assert!(!summary.to_string().contains("external size"));
    }
}
