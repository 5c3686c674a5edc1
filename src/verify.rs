use std::path::Path;

use log::info;
use ort::{GraphOptimizationLevel, Session};

use crate::model::shared::Result;

/// Build an ONNX Runtime session from `path` to check the runtime accepts it.
pub fn verify_model_file(path: &Path) -> Result<()> {
    let session = Session::builder()?
        .with_optimization_level(GraphOptimizationLevel::Disable)?
        .commit_from_file(path)?;
    info!(
        "onnx runtime accepted {} ({} inputs, {} outputs)",
        path.display(),
        session.inputs.len(),
        session.outputs.len()
    );
    Ok(())
}
