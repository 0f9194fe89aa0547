//! Oxford Town Centre ground-truth driver (ingest only).
//!
//! Layout: an `images/` directory of per-frame PNGs named
//! `town_centre_<frame>.png` and a single `TownCentre-groundtruth.csv` with
//! one body/head box per row. Only rows with a valid body region become
//! detections; every detection is labelled `pedestrian` and reconciliation
//! maps that into the target vocabulary later.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

use super::{IngestOutcome, Ingestor};
use crate::error::LabelportError;
use crate::ir::{DetectionRecord, ImageDetection};

const LABEL_FILE: &str = "TownCentre-groundtruth.csv";
const BODY_LABEL: &str = "pedestrian";

pub struct TownCentreIngestor;

impl Ingestor for TownCentreIngestor {
    fn validate(&self, source: &Path) -> Result<(), LabelportError> {
        if !source.join("images").is_dir() {
            return Err(LabelportError::FormatValidation {
                format: "towncentre",
                path: source.to_path_buf(),
                reason: "expected subdirectory 'images'".into(),
            });
        }
        if !source.join(LABEL_FILE).is_file() {
            return Err(LabelportError::FormatValidation {
                format: "towncentre",
                path: source.to_path_buf(),
                reason: format!("expected file '{LABEL_FILE}'"),
            });
        }
        Ok(())
    }

    fn ingest(&self, source: &Path) -> Result<IngestOutcome, LabelportError> {
        let (boxes_by_frame, mut skipped) = read_groundtruth(&source.join(LABEL_FILE))?;

        let mut frames: Vec<PathBuf> = WalkDir::new(source.join("images"))
            .max_depth(1)
            .into_iter()
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                entry.file_type().is_file()
                    && entry.path().extension().is_some_and(|ext| ext == "png")
            })
            .map(|entry| entry.into_path())
            .collect();
        frames.sort();

        let mut records = Vec::with_capacity(frames.len());
        let mut next_detection_id: u64 = 0;

        for image_path in frames {
            let Some(frame) = frame_number(&image_path) else {
                warn!(path = %image_path.display(), "skipping frame with unparsable name");
                skipped += 1;
                continue;
            };
            let (width, height) = match imagesize::size(&image_path) {
                Ok(dim) => (dim.width as u32, dim.height as u32),
                Err(err) => {
                    warn!(path = %image_path.display(), %err, "skipping unreadable frame");
                    skipped += 1;
                    continue;
                }
            };

            let mut unit = ImageDetection::blank();
            unit.image.id = frame;
            unit.image.path = image_path.to_string_lossy().into_owned();
            unit.image.width = width;
            unit.image.height = height;
            unit.image.file_name = image_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();

            for bbox in boxes_by_frame.get(&frame).map(Vec::as_slice).unwrap_or(&[]) {
                let mut det = DetectionRecord::blank();
                det.id = next_detection_id;
                next_detection_id += 1;
                det.image_id = frame;
                det.label = BODY_LABEL.to_string();
                det.left = bbox[0];
                det.top = bbox[1];
                det.right = bbox[2];
                det.bottom = bbox[3];
                det.is_bbox = true;
                unit.detections.push(det);
            }

            records.push(unit);
        }

        Ok(IngestOutcome { records, skipped })
    }
}

/// Row layout: person, frame, head-valid, body-valid, 4 head coords,
/// then body left/top/right/bottom at columns 8..=11.
fn read_groundtruth(path: &Path) -> Result<(HashMap<u64, Vec<[f64; 4]>>, usize), LabelportError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)?;

    let mut boxes: HashMap<u64, Vec<[f64; 4]>> = HashMap::new();
    let mut skipped = 0usize;

    for (row_idx, row) in reader.records().enumerate() {
        let row = match row {
            Ok(row) => row,
            Err(err) => {
                warn!(row = row_idx, %err, "skipping unreadable ground-truth row");
                skipped += 1;
                continue;
            }
        };

        match parse_row(&row) {
            Some((frame, bbox)) => boxes.entry(frame).or_default().push(bbox),
            None => {
                // Rows without a valid body region are expected; count only
                // rows we could not read at all.
                if row.get(3).map(str::trim) != Some("0") {
                    skipped += 1;
                }
            }
        }
    }

    Ok((boxes, skipped))
}

fn parse_row(row: &csv::StringRecord) -> Option<(u64, [f64; 4])> {
    if row.get(3)?.trim() != "1" {
        return None;
    }
    let frame: u64 = row.get(1)?.trim().parse::<f64>().ok()? as u64;
    let field = |idx: usize| row.get(idx)?.trim().parse::<f64>().ok();
    Some((frame, [field(8)?, field(9)?, field(10)?, field(11)?]))
}

fn frame_number(path: &Path) -> Option<u64> {
    path.file_stem()?
        .to_str()?
        .rsplit('_')
        .next()?
        .parse()
        .ok()
}
