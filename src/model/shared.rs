use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;

/// Largest model that can be written as a single protobuf message (2 GiB).
pub const MAXIMUM_PROTOBUF: u64 = 2 * 1024 * 1024 * 1024;

#[derive(Error, Debug)]
pub enum MergeError {
    #[error("failed to read {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse ONNX model {}", .path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: protobuf::Error,
    },

    #[error("failed to serialize ONNX model")]
    Encode(#[source] protobuf::Error),

    #[error("invalid external data on tensor {tensor:?}: {reason}")]
    InvalidExternalData { tensor: String, reason: String },

    #[error("external data location {location:?} of tensor {tensor:?} must be a relative path inside the model directory")]
    UnsafeLocation { tensor: String, location: String },

    #[error("data of tensor {tensor:?} should be stored in {}, but it doesn't exist or is not a file", .path.display())]
    MissingExternalFile { tensor: String, path: PathBuf },

    #[error("external data file {} is {available} bytes, tensor {tensor:?} needs bytes up to {required}", .path.display())]
    Truncated {
        tensor: String,
        path: PathBuf,
        required: u64,
        available: u64,
    },

    #[error("serialized model is {size} bytes, the protobuf limit is {limit} bytes")]
    ModelTooLarge { size: u64, limit: u64 },

    #[cfg(feature = "verify")]
    #[error("onnx runtime rejected the model")]
    Runtime(#[from] ort::Error),
}

pub type Result<T> = std::result::Result<T, MergeError>;

/// Where a tensor's payload lives, parsed from its `external_data` entries.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ExternalDataInfo {
    pub location: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub length: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub basepath: Option<String>,
}

#[derive(Clone, Debug)]
pub struct LoadOptions {
    pub load_external_data: bool,
    pub base_dir: Option<PathBuf>,
}

impl Default for LoadOptions {
    fn default() -> Self {
        LoadOptions {
            load_external_data: true,
            base_dir: None,
        }
    }
}

impl LoadOptions {
    pub fn new(load_external_data: bool) -> Self {
        LoadOptions {
            load_external_data,
            base_dir: None,
        }
    }

    pub fn with_base_dir(mut self, base_dir: Option<PathBuf>) -> Self {
        self.base_dir = base_dir;
        self
    }

    /// Directory external locations are resolved against: the explicit
    /// `base_dir` if set, otherwise the directory holding the model file.
    pub fn base_dir_for(&self, model_path: &Path) -> PathBuf {
        if let Some(base_dir) = &self.base_dir {
            return base_dir.clone();
        }
        match model_path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct InlineReport {
    pub tensors: usize,
    pub bytes: u64,
    pub files: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct MergeReport {
    pub input: PathBuf,
    pub output: PathBuf,
    pub inlined: InlineReport,
    pub output_bytes: u64,
}

impl std::fmt::Display for MergeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "merged {} -> {}: inlined {} tensors ({} bytes from {} files), wrote {} bytes",
            self.input.display(),
            self.output.display(),
            self.inlined.tensors,
            self.inlined.bytes,
            self.inlined.files,
            self.output_bytes
        )
    }
}
