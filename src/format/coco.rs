//! COCO format driver.
//!
//! The on-disk layout is a dataset root containing an `images/` directory
//! and a `labels.json` file in the canonical wire shape. Ingest and egest
//! both go through [`CocoPayload`], so a COCO dataset and an import shard
//! are the same schema.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::warn;

use super::{Egestor, IngestOutcome, Ingestor};
use crate::error::LabelportError;
use crate::ir::payload::CocoPayload;
use crate::ir::ImageDetection;
use crate::reconcile::builtin_aliases;

const LABEL_FILE: &str = "labels.json";

pub struct CocoIngestor;

impl Ingestor for CocoIngestor {
    fn validate(&self, source: &Path) -> Result<(), LabelportError> {
        if !source.join("images").is_dir() {
            return Err(LabelportError::FormatValidation {
                format: "coco",
                path: source.to_path_buf(),
                reason: "expected subdirectory 'images'".into(),
            });
        }
        if !source.join(LABEL_FILE).is_file() {
            return Err(LabelportError::FormatValidation {
                format: "coco",
                path: source.to_path_buf(),
                reason: format!("expected file '{LABEL_FILE}'"),
            });
        }
        Ok(())
    }

    fn ingest(&self, source: &Path) -> Result<IngestOutcome, LabelportError> {
        let payload = CocoPayload::read_file(&source.join(LABEL_FILE))?;
        let (records, skipped) = payload.into_records();
        if skipped > 0 {
            warn!(skipped, "coco ingest skipped annotations with dangling references");
        }
        Ok(IngestOutcome { records, skipped })
    }
}

pub struct CocoEgestor;

impl Egestor for CocoEgestor {
    fn expected_labels(&self) -> BTreeMap<String, Vec<String>> {
        builtin_aliases()
    }

    fn egest(&self, records: &[ImageDetection], dest: &Path) -> Result<PathBuf, LabelportError> {
        let payload = CocoPayload::from_records(records);
        let out = dest.join(LABEL_FILE);
        payload.write_file_atomic(&out)?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DetectionRecord;
    use std::fs;

    fn unit(id: u64, file_name: &str, labels: &[&str]) -> ImageDetection {
        let mut unit = ImageDetection::blank();
        unit.image.id = id;
        unit.image.width = 100;
        unit.image.height = 100;
        unit.image.file_name = file_name.to_string();
        unit.image.path = format!("images/{file_name}");
        for (i, label) in labels.iter().enumerate() {
            let mut det = DetectionRecord::blank();
            det.id = id * 10 + i as u64;
            det.image_id = id;
            det.label = label.to_string();
            det.left = 1.0;
            det.top = 1.0;
            det.right = 20.0;
            det.bottom = 30.0;
            det.is_bbox = true;
            unit.detections.push(det);
        }
        unit
    }

    #[test]
    fn validate_requires_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ingestor = CocoIngestor;
        assert!(ingestor.validate(dir.path()).is_err());

        fs::create_dir(dir.path().join("images")).unwrap();
        assert!(ingestor.validate(dir.path()).is_err());

        fs::write(dir.path().join(LABEL_FILE), "{}").unwrap();
        assert!(ingestor.validate(dir.path()).is_ok());
    }

    #[test]
    fn egest_then_ingest_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![unit(1, "a.jpg", &["person", "car"]), unit(2, "b.jpg", &[])];

        let artifact = CocoEgestor.egest(&records, dir.path()).unwrap();
        assert_eq!(artifact, dir.path().join(LABEL_FILE));

        fs::create_dir(dir.path().join("images")).unwrap();
        let ingestor = CocoIngestor;
        ingestor.validate(dir.path()).unwrap();
        let outcome = ingestor.ingest(dir.path()).unwrap();

        assert_eq!(outcome.skipped, 0);
        assert_eq!(outcome.records.len(), 2);
        let labels: Vec<&str> = outcome.records[0]
            .detections
            .iter()
            .map(|d| d.label.as_str())
            .collect();
        assert_eq!(labels, vec!["person", "car"]);
        assert_eq!(outcome.records[0].detections[0].right, 20.0);
    }

    #[test]
    fn egest_is_rerunnable() {
        let dir = tempfile::tempdir().unwrap();
        let records = vec![unit(1, "a.jpg", &["person"])];
        CocoEgestor.egest(&records, dir.path()).unwrap();
        CocoEgestor.egest(&records, dir.path()).unwrap();
        assert!(dir.path().join(LABEL_FILE).is_file());
        assert!(!dir.path().join("labels.json.tmp").exists());
    }
}
