//! Labelport: annotation dataset conversion and import.
//!
//! Labelport moves object detection datasets between annotation formats
//! through a canonical in-memory representation, reconciles label
//! vocabularies along the way, and merges COCO payloads into an annotation
//! store idempotently, sharding oversized payloads across workers.
//!
//! # Modules
//!
//! - [`ir`]: Canonical record types and the COCO wire payload
//! - [`format`]: Format drivers (ingestors/egestors) and the probe registry
//! - [`validate`]: Structural validation of canonical records
//! - [`reconcile`]: Alias tables and label reconciliation
//! - [`convert`]: The conversion orchestrator
//! - [`chunk`]: Payload splitting for oversized imports
//! - [`import`]: The idempotent shard merge and import orchestrator
//! - [`store`]: The annotation store trait and in-memory backend
//! - [`task`]: Task handles, progress, and aggregation
//! - [`error`]: Error types for labelport operations

pub mod chunk;
pub mod convert;
pub mod error;
pub mod format;
pub mod import;
pub mod ir;
pub mod reconcile;
pub mod store;
pub mod task;
pub mod validate;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

pub use error::LabelportError;

use convert::{run_conversion, ConversionRequest, SourceFormat};
use format::FormatRegistry;

/// The labelport CLI application.
#[derive(Parser)]
#[command(name = "labelport")]
#[command(version, author, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Convert a dataset from one annotation format to another.
    Convert(ConvertArgs),
    /// Report which format driver recognizes a dataset directory.
    Detect(DetectArgs),
}

/// Arguments for the convert subcommand.
#[derive(clap::Args)]
struct ConvertArgs {
    /// Source dataset directory.
    input: PathBuf,

    /// Destination directory for the converted dataset.
    output: PathBuf,

    /// Source format name, or 'auto' to probe.
    #[arg(long = "from", default_value = "auto")]
    from: String,

    /// Destination format name.
    #[arg(long = "to")]
    to: String,

    /// Drop detections whose label is not in the destination vocabulary.
    #[arg(long)]
    select_only_known_labels: bool,

    /// Drop images left without any detections.
    #[arg(long)]
    filter_images_without_labels: bool,
}

/// Arguments for the detect subcommand.
#[derive(clap::Args)]
struct DetectArgs {
    /// Dataset directory to probe.
    input: PathBuf,
}

/// Run the labelport CLI.
///
/// This is the main entry point for the CLI, called from `main.rs`.
pub fn run() -> Result<(), LabelportError> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Convert(args)) => run_convert(args),
        Some(Commands::Detect(args)) => run_detect(args),
        None => {
            println!("labelport {}", env!("CARGO_PKG_VERSION"));
            println!();
            println!("Annotation dataset conversion and import.");
            println!();
            println!("Run 'labelport --help' for usage information.");
            Ok(())
        }
    }
}

/// Execute the convert subcommand.
fn run_convert(args: ConvertArgs) -> Result<(), LabelportError> {
    let registry = FormatRegistry::builtin();
    let dest_format = args.to.clone();
    let request = ConversionRequest {
        source: SourceFormat::parse(&args.from),
        source_path: args.input,
        dest_format: args.to,
        dest_path: args.output,
        select_only_known_labels: args.select_only_known_labels,
        filter_images_without_labels: args.filter_images_without_labels,
    };

    let summary = run_conversion(&registry, &request)?;

    println!(
        "converted {} -> {}: {} of {} images egested",
        summary.source_format, dest_format, summary.egested_images, summary.ingested_images
    );
    if summary.ingest_skipped > 0 {
        println!("  skipped during ingest: {}", summary.ingest_skipped);
    }
    if !summary.validation.is_clean() {
        println!(
            "  validation dropped: {} images, {} detections",
            summary.validation.dropped_images, summary.validation.dropped_detections
        );
    }
    if summary.reconcile.dropped_detections > 0 || summary.reconcile.dropped_images > 0 {
        println!(
            "  reconciliation dropped: {} images, {} detections",
            summary.reconcile.dropped_images, summary.reconcile.dropped_detections
        );
    }
    println!("  wrote {}", summary.artifact.path.display());
    Ok(())
}

/// Execute the detect subcommand.
fn run_detect(args: DetectArgs) -> Result<(), LabelportError> {
    let registry = FormatRegistry::builtin();
    let format = convert::detect_format(&registry, &args.input)?;
    println!("{format}");
    Ok(())
}
