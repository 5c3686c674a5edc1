use std::fs;
use std::path::Path;

use log::{debug, info};
use protobuf::Message;

use crate::model::external::load_external_data_for_model;
use crate::model::shared::{
    InlineReport, LoadOptions, MergeError, MergeReport, Result, MAXIMUM_PROTOBUF,
};
use crate::protos::ModelProto;

/// Read and decode an ONNX model, inlining its external data unless
/// `options.load_external_data` is off.
pub fn load_model(path: &Path, options: &LoadOptions) -> Result<ModelProto> {
    load_model_with_report(path, options).map(|(model, _)| model)
}

fn load_model_with_report(path: &Path, options: &LoadOptions) -> Result<(ModelProto, InlineReport)> {
    info!("loading model from {}", path.display());
    let bytes = fs::read(path).map_err(|source| MergeError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let mut model = ModelProto::parse_from_bytes(&bytes).map_err(|source| MergeError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    drop(bytes);

    if let Some(graph) = model.graph.as_ref() {
        debug!(
            "graph {:?}: {} nodes, {} initializers, {} inputs, {} outputs",
            graph.name(),
            graph.node.len(),
            graph.initializer.len(),
            graph.input.len(),
            graph.output.len()
        );
    }

    let report = if options.load_external_data {
        load_external_data_for_model(&mut model, &options.base_dir_for(path))?
    } else {
        InlineReport::default()
    };
    Ok((model, report))
}

/// Encode `model` and write it to `path` as a single file. Returns the
/// number of bytes written.
pub fn save_model(model: &ModelProto, path: &Path) -> Result<u64> {
    let bytes = serialize_model(model, MAXIMUM_PROTOBUF)?;
    fs::write(path, &bytes).map_err(|source| MergeError::Write {
        path: path.to_path_buf(),
        source,
    })?;
    info!("wrote {} bytes to {}", bytes.len(), path.display());
    Ok(bytes.len() as u64)
}

fn serialize_model(model: &ModelProto, limit: u64) -> Result<Vec<u8>> {
    let size = model.compute_size();
    if size >= limit {
        return Err(MergeError::ModelTooLarge { size, limit });
    }
    model.write_to_bytes().map_err(MergeError::Encode)
}

/// Load `input` with all external data inlined and save it to `output`.
pub fn merge_model(input: &Path, output: &Path, options: &LoadOptions) -> Result<MergeReport> {
    let options = LoadOptions {
        load_external_data: true,
        ..options.clone()
    };
    let (model, inlined) = load_model_with_report(input, &options)?;
    let output_bytes = save_model(&model, output)?;
    Ok(MergeReport {
        input: input.to_path_buf(),
        output: output.to_path_buf(),
        inlined,
        output_bytes,
    })
}
