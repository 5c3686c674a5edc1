mod model;
mod protos;
#[cfg(feature = "verify")]
mod verify;

use crate::model::{
    onnx::{load_model, merge_model},
    shared::LoadOptions,
    summary::ModelSummary,
};

use std::path::PathBuf;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use log::info;

/// Pack an ONNX model and its external data files into a single .onnx file
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Log debug output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Inline all external tensor data and save a self-contained model
    Merge(MergeArgs),
    /// Show a model's metadata and the external data it references
    Inspect(InspectArgs),
}

#[derive(Args, Debug)]
struct MergeArgs {
    /// Model that references external data
    #[arg(env = "ONNX_MERGE_INPUT", default_value = "model.onnx")]
    input: PathBuf,

    /// Where to write the merged model
    #[arg(env = "ONNX_MERGE_OUTPUT", default_value = "model_merged.onnx")]
    output: PathBuf,

    /// Directory external data locations are relative to (defaults to the
    /// input model's directory)
    #[arg(long, env = "ONNX_MERGE_BASE_DIR")]
    base_dir: Option<PathBuf>,

    /// Print the merge report as JSON on stdout
    #[arg(long)]
    json: bool,

    /// Load the merged model with ONNX Runtime afterwards
    #[cfg(feature = "verify")]
    #[arg(long)]
    verify: bool,
}

#[derive(Args, Debug)]
struct InspectArgs {
    /// Model to inspect
    #[arg(env = "ONNX_MERGE_INPUT", default_value = "model.onnx")]
    input: PathBuf,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else if cli.quiet {
        tracing::Level::WARN
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Merge(args) => run_merge(args),
        Command::Inspect(args) => run_inspect(args),
    }
}

fn run_merge(args: MergeArgs) -> anyhow::Result<()> {
    let options = LoadOptions::default().with_base_dir(args.base_dir);
    let report = merge_model(&args.input, &args.output, &options).with_context(|| {
        format!(
            "failed to merge {} into {}",
            args.input.display(),
            args.output.display()
        )
    })?;
    info!("{}", report);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    #[cfg(feature = "verify")]
    if args.verify {
        verify::verify_model_file(&args.output)
            .with_context(|| format!("failed to verify {}", args.output.display()))?;
    }
    Ok(())
}

fn run_inspect(args: InspectArgs) -> anyhow::Result<()> {
    let model = load_model(&args.input, &LoadOptions::new(false))
        .with_context(|| format!("failed to inspect {}", args.input.display()))?;
    let summary = ModelSummary::from_model(&model);
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", summary);
    }
    Ok(())
}
