//! Resolution of tensor payloads stored outside the model file.
//!
//! A tensor whose `data_location` is `EXTERNAL` carries `external_data`
//! key/value entries naming a file relative to the model directory plus an
//! optional byte range. Loading reads that range into `raw_data` and turns
//! the tensor back into an ordinary inline one.

use std::collections::HashSet;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Component, Path, PathBuf};

use log::{debug, info};
use protobuf::EnumOrUnknown;
use rayon::prelude::*;

use crate::model::shared::{ExternalDataInfo, InlineReport, MergeError, Result};
use crate::protos::{
    tensor_proto::DataLocation, AttributeProto, GraphProto, ModelProto, NodeProto,
    SparseTensorProto, TensorProto,
};

pub fn uses_external_data(tensor: &TensorProto) -> bool {
    tensor.data_location() == DataLocation::EXTERNAL
}

impl ExternalDataInfo {
    pub fn from_tensor(tensor: &TensorProto) -> Result<Self> {
        let invalid = |reason: String| MergeError::InvalidExternalData {
            tensor: tensor.name().to_string(),
            reason,
        };
        let parse_size = |key: &str, value: &str| {
            value
                .trim()
                .parse::<u64>()
                .map_err(|_| invalid(format!("{key} is not a non-negative integer: {value:?}")))
        };

        let mut info = ExternalDataInfo::default();
        for entry in &tensor.external_data {
            match entry.key() {
                "location" => info.location = entry.value().to_string(),
                "offset" => info.offset = Some(parse_size("offset", entry.value())?),
                "length" => info.length = Some(parse_size("length", entry.value())?),
                "checksum" => info.checksum = Some(entry.value().to_string()),
                "basepath" => info.basepath = Some(entry.value().to_string()),
                key => debug!(
                    "ignoring unknown external data key {:?} on tensor {:?}",
                    key,
                    tensor.name()
                ),
            }
        }
        if info.location.is_empty() {
            return Err(invalid("missing location".to_string()));
        }
        Ok(info)
    }
}

/// Join `info.location` onto `base_dir`, refusing anything that could read
/// outside of it.
pub fn resolve_location(
    base_dir: &Path,
    info: &ExternalDataInfo,
    tensor_name: &str,
) -> Result<PathBuf> {
    let unsafe_location = || MergeError::UnsafeLocation {
        tensor: tensor_name.to_string(),
        location: info.location.clone(),
    };

    let location = Path::new(&info.location);
    if location.is_absolute()
        || location
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(unsafe_location());
    }

    let path = base_dir.join(location);
    if !path.is_file() {
        return Err(MergeError::MissingExternalFile {
            tensor: tensor_name.to_string(),
            path,
        });
    }

    // symlinks inside the model directory may not point out of it
    let canonical_base = base_dir.canonicalize().map_err(|source| MergeError::Read {
        path: base_dir.to_path_buf(),
        source,
    })?;
    let canonical = path.canonicalize().map_err(|source| MergeError::Read {
        path: path.clone(),
        source,
    })?;
    if !canonical.starts_with(&canonical_base) {
        return Err(unsafe_location());
    }
    Ok(path)
}

/// Read the external payload of `tensor` into its `raw_data`.
///
/// A missing or zero `length` reads to the end of the file. Returns the
/// number of bytes read. The external references are left in place.
pub fn load_external_data_for_tensor(tensor: &mut TensorProto, base_dir: &Path) -> Result<u64> {
    let name = tensor.name().to_string();
    let info = ExternalDataInfo::from_tensor(tensor)?;
    let path = resolve_location(base_dir, &info, &name)?;
    let read_err = |source| MergeError::Read {
        path: path.clone(),
        source,
    };

    let mut file = File::open(&path).map_err(read_err)?;
    let available = file.metadata().map_err(read_err)?.len();
    let offset = info.offset.unwrap_or(0);
    let truncated = |required| MergeError::Truncated {
        tensor: name.clone(),
        path: path.clone(),
        required,
        available,
    };

    if offset > available {
        return Err(truncated(offset));
    }
    if offset > 0 {
        file.seek(SeekFrom::Start(offset)).map_err(read_err)?;
    }

    let data = match info.length.filter(|length| *length > 0) {
        Some(length) => {
            let end = offset.saturating_add(length);
            if end > available {
                return Err(truncated(end));
            }
            let mut buf = vec![0u8; length as usize];
            file.read_exact(&mut buf).map_err(read_err)?;
            buf
        }
        None => {
            let mut buf = Vec::with_capacity((available - offset) as usize);
            file.read_to_end(&mut buf).map_err(read_err)?;
            buf
        }
    };

    let read = data.len() as u64;
    tensor.raw_data = Some(data);
    Ok(read)
}

/// Inline every external tensor of `model` and drop its external references.
pub fn load_external_data_for_model(
    model: &mut ModelProto,
    base_dir: &Path,
) -> Result<InlineReport> {
    let mut tensors: Vec<&mut TensorProto> = all_tensors_mut(model)
        .into_iter()
        .filter(|tensor| uses_external_data(tensor))
        .collect();
    if tensors.is_empty() {
        debug!("model has no external data");
        return Ok(InlineReport::default());
    }

    let files = tensors
        .iter()
        .map(|tensor| ExternalDataInfo::from_tensor(tensor).map(|info| normalize_location(&info)))
        .collect::<Result<HashSet<PathBuf>>>()?
        .len();
    info!(
        "loading {} external tensors from {} files in {}",
        tensors.len(),
        files,
        base_dir.display()
    );

    let sizes = tensors
        .par_iter_mut()
        .map(|tensor| -> Result<u64> {
            let read = load_external_data_for_tensor(tensor, base_dir)?;
            tensor.data_location = Some(EnumOrUnknown::new(DataLocation::DEFAULT));
            tensor.external_data.clear();
            debug!("inlined {} bytes into tensor {:?}", read, tensor.name());
            Ok(read)
        })
        .collect::<Result<Vec<u64>>>()?;

    Ok(InlineReport {
        tensors: sizes.len(),
        bytes: sizes.iter().sum(),
        files,
    })
}

/// `location` without `.` components, so `./w.bin` and `w.bin` compare equal.
fn normalize_location(info: &ExternalDataInfo) -> PathBuf {
    Path::new(&info.location)
        .components()
        .filter(|c| !matches!(c, Component::CurDir))
        .collect()
}

/// Every tensor reachable from the model: graph initializers, sparse
/// initializers, attribute tensors, subgraphs, training graphs and function
/// bodies.
pub fn all_tensors_mut(model: &mut ModelProto) -> Vec<&mut TensorProto> {
    let mut out = Vec::new();
    let ModelProto {
        graph,
        training_info,
        functions,
        ..
    } = model;

    if let Some(graph) = graph.as_mut() {
        graph_tensors_mut(graph, &mut out);
    }
    for info in training_info.iter_mut() {
        if let Some(graph) = info.initialization.as_mut() {
            graph_tensors_mut(graph, &mut out);
        }
        if let Some(graph) = info.algorithm.as_mut() {
            graph_tensors_mut(graph, &mut out);
        }
    }
    for function in functions.iter_mut() {
        node_tensors_mut(&mut function.node, &mut out);
    }
    out
}

fn graph_tensors_mut<'a>(graph: &'a mut GraphProto, out: &mut Vec<&'a mut TensorProto>) {
    let GraphProto {
        initializer,
        sparse_initializer,
        node,
        ..
    } = graph;
    out.extend(initializer.iter_mut());
    for sparse in sparse_initializer.iter_mut() {
        sparse_tensors_mut(sparse, out);
    }
    node_tensors_mut(node, out);
}

fn sparse_tensors_mut<'a>(sparse: &'a mut SparseTensorProto, out: &mut Vec<&'a mut TensorProto>) {
    let SparseTensorProto {
        values, indices, ..
    } = sparse;
    out.extend(values.as_mut());
    out.extend(indices.as_mut());
}

fn node_tensors_mut<'a>(nodes: &'a mut [NodeProto], out: &mut Vec<&'a mut TensorProto>) {
    for node in nodes.iter_mut() {
        for attribute in node.attribute.iter_mut() {
            attribute_tensors_mut(attribute, out);
        }
    }
}

fn attribute_tensors_mut<'a>(attribute: &'a mut AttributeProto, out: &mut Vec<&'a mut TensorProto>) {
    let AttributeProto {
        t,
        tensors,
        sparse_tensor,
        sparse_tensors,
        g,
        graphs,
        ..
    } = attribute;
    out.extend(t.as_mut());
    out.extend(tensors.iter_mut());
    if let Some(sparse) = sparse_tensor.as_mut() {
        sparse_tensors_mut(sparse, out);
    }
    for sparse in sparse_tensors.iter_mut() {
        sparse_tensors_mut(sparse, out);
    }
    if let Some(graph) = g.as_mut() {
        graph_tensors_mut(graph, out);
    }
    for graph in graphs.iter_mut() {
        graph_tensors_mut(graph, out);
    }
}

/// Read-only counterpart of [`all_tensors_mut`].
pub fn all_tensors(model: &ModelProto) -> Vec<&TensorProto> {
    let mut out = Vec::new();
    if let Some(graph) = model.graph.as_ref() {
        graph_tensors(graph, &mut out);
    }
    for info in &model.training_info {
        out_graph(info.initialization.as_ref(), &mut out);
        out_graph(info.algorithm.as_ref(), &mut out);
    }
    for function in &model.functions {
        node_tensors(&function.node, &mut out);
    }
    out
}

fn out_graph<'a>(graph: Option<&'a GraphProto>, out: &mut Vec<&'a TensorProto>) {
    if let Some(graph) = graph {
        graph_tensors(graph, out);
    }
}

fn graph_tensors<'a>(graph: &'a GraphProto, out: &mut Vec<&'a TensorProto>) {
    out.extend(graph.initializer.iter());
    for sparse in &graph.sparse_initializer {
        out.extend(sparse.values.as_ref());
        out.extend(sparse.indices.as_ref());
    }
    node_tensors(&graph.node, out);
}

fn node_tensors<'a>(nodes: &'a [NodeProto], out: &mut Vec<&'a TensorProto>) {
    for attribute in nodes.iter().flat_map(|node| node.attribute.iter()) {
        out.extend(attribute.t.as_ref());
        out.extend(attribute.tensors.iter());
        for sparse in attribute
            .sparse_tensor
            .as_ref()
            .into_iter()
            .chain(attribute.sparse_tensors.iter())
        {
            out.extend(sparse.values.as_ref());
            out.extend(sparse.indices.as_ref());
        }
        out_graph(attribute.g.as_ref(), out);
        for graph in &attribute.graphs {
            graph_tensors(graph, out);
        }
    }
}
