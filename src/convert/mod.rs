//! The conversion orchestrator.
//!
//! Drives one conversion run end to end:
//! select format (named or probed) → format validate → ingest → structural
//! validate → reconcile labels against the *target* egestor's vocabulary →
//! egest. Reconciliation is always against the destination vocabulary,
//! never the source's. Failure at any step is terminal and reported as a
//! single error; per-record problems inside a step are counted, not fatal.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use tracing::info;

use crate::error::LabelportError;
use crate::format::FormatRegistry;
use crate::reconcile::{reconcile_labels, AliasTable, ReconcileCounts};
use crate::validate::{validate_records, ValidationCounts};

/// How the source format is chosen.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SourceFormat {
    /// Use the named driver; unknown names are terminal errors.
    Named(String),
    /// Probe every registered ingestor in priority order.
    Auto,
}

impl SourceFormat {
    pub fn parse(raw: &str) -> Self {
        if raw.eq_ignore_ascii_case("auto") {
            SourceFormat::Auto
        } else {
            SourceFormat::Named(raw.to_string())
        }
    }
}

/// One conversion run's inputs.
#[derive(Clone, Debug)]
pub struct ConversionRequest {
    pub source: SourceFormat,
    pub source_path: PathBuf,
    pub dest_format: String,
    pub dest_path: PathBuf,
    pub select_only_known_labels: bool,
    pub filter_images_without_labels: bool,
}

/// Record of a completed export. Immutable once created.
#[derive(Clone, Debug, PartialEq)]
pub struct ExportArtifact {
    pub id: u64,
    pub dataset_id: Option<u64>,
    pub path: PathBuf,
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
}

static NEXT_ARTIFACT_ID: AtomicU64 = AtomicU64::new(1);

impl ExportArtifact {
    fn new(dataset_id: Option<u64>, path: PathBuf, tags: Vec<String>) -> Self {
        Self {
            id: NEXT_ARTIFACT_ID.fetch_add(1, Ordering::Relaxed),
            dataset_id,
            path,
            tags,
            created_at: Utc::now(),
        }
    }
}

/// What a successful conversion produced, with all loss counters.
#[derive(Clone, Debug)]
pub struct ConversionSummary {
    pub source_format: String,
    pub artifact: ExportArtifact,
    pub ingested_images: usize,
    pub egested_images: usize,
    pub ingest_skipped: usize,
    pub validation: ValidationCounts,
    pub reconcile: ReconcileCounts,
}

/// Run a full conversion.
pub fn run_conversion(
    registry: &FormatRegistry,
    request: &ConversionRequest,
) -> Result<ConversionSummary, LabelportError> {
    let source_path = request.source_path.as_path();

    // SelectFormat
    let source_format = match &request.source {
        SourceFormat::Named(name) => {
            if registry.ingestor(name).is_none() {
                return Err(LabelportError::UnknownFormat(name.clone()));
            }
            name.as_str()
        }
        SourceFormat::Auto => registry.probe(source_path)?,
    };
    let ingestor = registry
        .ingestor(source_format)
        .ok_or_else(|| LabelportError::UnknownFormat(source_format.to_string()))?;
    let egestor = registry
        .egestor(&request.dest_format)
        .ok_or_else(|| LabelportError::UnknownFormat(request.dest_format.clone()))?;

    info!(
        source = source_format,
        dest = %request.dest_format,
        path = %source_path.display(),
        "starting conversion"
    );

    // Validate + Ingest
    ingestor.validate(source_path)?;
    let outcome = ingestor.ingest(source_path)?;
    if outcome.skipped > 0 {
        info!(skipped = outcome.skipped, "ingest skipped unparsable records");
    }
    let ingested_images = outcome.records.len();

    // StructuralValidate
    let (records, validation) =
        validate_records(outcome.records, request.filter_images_without_labels);

    // Reconcile against the destination vocabulary
    let table = AliasTable::from_expected(&egestor.expected_labels())?;
    let (records, reconcile) = reconcile_labels(
        records,
        &table,
        request.select_only_known_labels,
        request.filter_images_without_labels,
    );

    // Egest
    let artifact_path = egestor.egest(&records, &request.dest_path)?;

    let mut tags = vec![request.dest_format.to_uppercase()];
    tags.extend(collect_labels(&records));
    let dataset_id = records.first().and_then(|unit| unit.image.dataset_id);
    let artifact = ExportArtifact::new(dataset_id, artifact_path, tags);

    info!(
        artifact = %artifact.path.display(),
        images = records.len(),
        "conversion finished"
    );

    Ok(ConversionSummary {
        source_format: source_format.to_string(),
        artifact,
        ingested_images,
        egested_images: records.len(),
        ingest_skipped: outcome.skipped,
        validation,
        reconcile,
    })
}

fn collect_labels(records: &[crate::ir::ImageDetection]) -> Vec<String> {
    let mut labels: Vec<String> = records
        .iter()
        .flat_map(|unit| unit.detections.iter().map(|det| det.label.clone()))
        .collect();
    labels.sort();
    labels.dedup();
    labels
}

/// Convenience wrapper for the probe path on an explicit directory.
pub fn detect_format(
    registry: &FormatRegistry,
    path: &Path,
) -> Result<&'static str, LabelportError> {
    registry.probe(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn sample_coco_dir(root: &Path) {
        fs::create_dir_all(root.join("images")).unwrap();
        fs::write(
            root.join("labels.json"),
            r#"{
                "images": [
                    {"id": 1, "width": 100, "height": 100, "file_name": "a.jpg"},
                    {"id": 2, "width": 100, "height": 100, "file_name": "b.jpg"}
                ],
                "categories": [
                    {"id": 1, "name": "person_sitting"},
                    {"id": 2, "name": "unknown_thing"}
                ],
                "annotations": [
                    {"id": 1, "image_id": 1, "category_id": 1, "bbox": [10, 10, 20, 20], "isbbox": true},
                    {"id": 2, "image_id": 1, "category_id": 2, "bbox": [5, 5, 10, 10], "isbbox": true},
                    {"id": 3, "image_id": 2, "category_id": 1, "bbox": [10, 10, 0, 5], "isbbox": true}
                ]
            }"#,
        )
        .unwrap();
    }

    #[test]
    fn auto_detects_and_converts_coco_to_voc() {
        let src = tempfile::tempdir().unwrap();
        let dst = tempfile::tempdir().unwrap();
        sample_coco_dir(src.path());

        let registry = FormatRegistry::builtin();
        let summary = run_conversion(
            &registry,
            &ConversionRequest {
                source: SourceFormat::Auto,
                source_path: src.path().to_path_buf(),
                dest_format: "voc".into(),
                dest_path: dst.path().to_path_buf(),
                select_only_known_labels: true,
                filter_images_without_labels: false,
            },
        )
        .unwrap();

        assert_eq!(summary.source_format, "coco");
        assert_eq!(summary.ingested_images, 2);
        // annotation 3 has a zero-width bbox and is dropped structurally
        assert_eq!(summary.validation.dropped_detections, 1);
        // annotation 2 carries an unknown label and select_only_known drops it
        assert_eq!(summary.reconcile.dropped_detections, 1);
        assert_eq!(summary.egested_images, 2);
        assert!(summary.artifact.path.ends_with("Annotations"));
        assert!(summary.artifact.tags.contains(&"VOC".to_string()));

        let xml = fs::read_to_string(summary.artifact.path.join("a.xml")).unwrap();
        assert!(xml.contains("<name>person</name>"));
    }

    #[test]
    fn unknown_source_format_is_terminal() {
        let registry = FormatRegistry::builtin();
        let err = run_conversion(
            &registry,
            &ConversionRequest {
                source: SourceFormat::Named("kitti".into()),
                source_path: PathBuf::from("/nowhere"),
                dest_format: "coco".into(),
                dest_path: PathBuf::from("/nowhere-else"),
                select_only_known_labels: false,
                filter_images_without_labels: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, LabelportError::UnknownFormat(name) if name == "kitti"));
    }

    #[test]
    fn probe_failure_is_terminal_with_reasons() {
        let empty = tempfile::tempdir().unwrap();
        let registry = FormatRegistry::builtin();
        let err = run_conversion(
            &registry,
            &ConversionRequest {
                source: SourceFormat::Auto,
                source_path: empty.path().to_path_buf(),
                dest_format: "coco".into(),
                dest_path: empty.path().join("out"),
                select_only_known_labels: false,
                filter_images_without_labels: false,
            },
        )
        .unwrap_err();
        assert!(matches!(err, LabelportError::FormatProbeFailed { .. }));
    }

    #[test]
    fn source_format_parse() {
        assert_eq!(SourceFormat::parse("AUTO"), SourceFormat::Auto);
        assert_eq!(
            SourceFormat::parse("voc"),
            SourceFormat::Named("voc".into())
        );
    }
}
