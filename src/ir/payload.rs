//! The canonical COCO-style wire schema.
//!
//! `{images: [...], categories: [...], annotations: [...]}` is the one
//! serialized shape labelport speaks on disk and between workers: the COCO
//! driver reads and writes it, the chunker slices it, and import shards carry
//! it. Keeping a single typed schema here means a shard is always
//! independently valid under the same shape as a whole dataset.

use std::collections::BTreeMap;
use std::fs;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::model::{DetectionRecord, ImageDetection, ImageRecord, Segmentation};
use crate::error::LabelportError;

/// Top-level wire payload.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CocoPayload {
    #[serde(default)]
    pub images: Vec<CocoImage>,

    #[serde(default)]
    pub categories: Vec<CocoCategory>,

    #[serde(default)]
    pub annotations: Vec<CocoAnnotation>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoImage {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub file_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoCategory {
    pub id: u64,
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supercategory: Option<String>,

    /// Keypoint label names, when this category carries a keypoint skeleton.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keypoints: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skeleton: Vec<[u32; 2]>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CocoAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,

    /// `[x, y, width, height]` with `(x, y)` as the top-left corner.
    #[serde(default)]
    pub bbox: [f64; 4],

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iscrowd: Option<u8>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Segmentation>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keypoints: Vec<f64>,

    #[serde(default)]
    pub isbbox: bool,
}

impl CocoPayload {
    /// Reads a payload from a JSON file.
    pub fn read_file(path: &Path) -> Result<Self, LabelportError> {
        let file = File::open(path).map_err(LabelportError::Io)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|source| LabelportError::PayloadParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses a payload from a JSON string.
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Writes the payload atomically: serialize to `<path>.tmp`, then rename.
    ///
    /// A failed invocation leaves no partial file at `path`; a repeated
    /// invocation simply replaces the previous output.
    pub fn write_file_atomic(&self, path: &Path) -> Result<(), LabelportError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(LabelportError::Io)?;
        }

        let tmp_path = path.with_extension("json.tmp");
        {
            let file = File::create(&tmp_path).map_err(|source| LabelportError::PayloadWrite {
                path: tmp_path.clone(),
                source,
            })?;
            let writer = BufWriter::new(file);
            serde_json::to_writer(writer, self).map_err(LabelportError::PayloadSerialize)?;
        }
        fs::rename(&tmp_path, path).map_err(|source| LabelportError::PayloadWrite {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Builds a payload from canonical records.
    ///
    /// Category ids are assigned 1..n over the sorted set of labels present
    /// in the records; image and annotation ids are carried over unchanged so
    /// round-trips stay stable.
    pub fn from_records(records: &[ImageDetection]) -> Self {
        let mut label_ids: BTreeMap<&str, u64> = BTreeMap::new();
        for unit in records {
            for det in &unit.detections {
                let next = label_ids.len() as u64 + 1;
                label_ids.entry(det.label.as_str()).or_insert(next);
            }
        }

        let categories = label_ids
            .iter()
            .map(|(name, id)| CocoCategory {
                id: *id,
                name: (*name).to_string(),
                supercategory: None,
                keypoints: Vec::new(),
                skeleton: Vec::new(),
            })
            .collect();

        let mut images = Vec::with_capacity(records.len());
        let mut annotations = Vec::new();
        for unit in records {
            images.push(CocoImage {
                id: unit.image.id,
                width: unit.image.width,
                height: unit.image.height,
                file_name: unit.image.file_name.clone(),
                path: Some(unit.image.path.clone()),
                dataset_id: unit.image.dataset_id,
            });

            for det in &unit.detections {
                annotations.push(CocoAnnotation {
                    id: det.id,
                    image_id: unit.image.id,
                    category_id: label_ids[det.label.as_str()],
                    bbox: det.bbox_xywh(),
                    area: Some(det.resolved_area()),
                    iscrowd: Some(u8::from(det.is_crowd)),
                    segmentation: det
                        .segmentation
                        .clone()
                        .filter(|seg| !seg.is_empty())
                        .or_else(|| det.is_bbox.then(|| bbox_polygon(det))),
                    keypoints: det.keypoints.clone(),
                    isbbox: det.is_bbox,
                });
            }
        }

        CocoPayload {
            images,
            categories,
            annotations,
        }
    }

    /// Converts the payload back to canonical records.
    ///
    /// Annotations referencing an unknown image or category are skipped and
    /// counted rather than failing the whole payload.
    pub fn into_records(self) -> (Vec<ImageDetection>, usize) {
        let label_by_id: BTreeMap<u64, String> = self
            .categories
            .into_iter()
            .map(|c| (c.id, c.name))
            .collect();

        let mut detections_by_image: BTreeMap<u64, Vec<DetectionRecord>> = BTreeMap::new();
        let image_ids: std::collections::HashSet<u64> =
            self.images.iter().map(|img| img.id).collect();

        let mut skipped = 0usize;
        for ann in self.annotations {
            let Some(label) = label_by_id.get(&ann.category_id) else {
                skipped += 1;
                continue;
            };
            if !image_ids.contains(&ann.image_id) {
                skipped += 1;
                continue;
            }

            let [x, y, w, h] = ann.bbox;
            detections_by_image
                .entry(ann.image_id)
                .or_default()
                .push(DetectionRecord {
                    id: ann.id,
                    image_id: ann.image_id,
                    label: label.clone(),
                    segmentation: ann.segmentation.filter(|seg| !seg.is_empty()),
                    area: ann.area,
                    top: y,
                    left: x,
                    right: x + w,
                    bottom: y + h,
                    is_crowd: ann.iscrowd.unwrap_or(0) != 0,
                    is_bbox: ann.isbbox,
                    keypoints: ann.keypoints,
                });
        }

        let records = self
            .images
            .into_iter()
            .map(|img| ImageDetection {
                detections: detections_by_image.remove(&img.id).unwrap_or_default(),
                image: ImageRecord {
                    id: img.id,
                    dataset_id: img.dataset_id,
                    path: img.path.unwrap_or_else(|| img.file_name.clone()),
                    segmented_path: None,
                    width: img.width,
                    height: img.height,
                    file_name: img.file_name,
                },
            })
            .collect();

        (records, skipped)
    }
}

/// The bbox corners as a single closed polygon, used when a pure bounding box
/// needs a segmentation for store compatibility.
fn bbox_polygon(det: &DetectionRecord) -> Segmentation {
    Segmentation::Polygons(vec![vec![
        det.left, det.top, det.right, det.top, det.right, det.bottom, det.left, det.bottom,
    ]])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_payload_json() -> &'static str {
        r#"{
            "images": [
                {"id": 1, "width": 640, "height": 480, "file_name": "image001.jpg"}
            ],
            "categories": [
                {"id": 1, "name": "person"}
            ],
            "annotations": [
                {
                    "id": 1,
                    "image_id": 1,
                    "category_id": 1,
                    "bbox": [10.0, 20.0, 90.0, 60.0],
                    "area": 5400.0,
                    "iscrowd": 0,
                    "segmentation": [[10.0, 20.0, 100.0, 20.0, 100.0, 80.0, 10.0, 80.0]],
                    "isbbox": true
                }
            ]
        }"#
    }

    #[test]
    fn payload_to_records_basic() {
        let payload = CocoPayload::from_json_str(sample_payload_json()).expect("parse failed");
        let (records, skipped) = payload.into_records();

        assert_eq!(skipped, 0);
        assert_eq!(records.len(), 1);

        let unit = &records[0];
        assert_eq!(unit.image.file_name, "image001.jpg");
        assert_eq!(unit.detections.len(), 1);

        // COCO [10, 20, 90, 60] becomes edges (10, 20, 100, 80)
        let det = &unit.detections[0];
        assert_eq!(det.label, "person");
        assert_eq!(det.left, 10.0);
        assert_eq!(det.top, 20.0);
        assert_eq!(det.right, 100.0);
        assert_eq!(det.bottom, 80.0);
        assert!(det.is_bbox);
        assert!(!det.is_crowd);
    }

    #[test]
    fn orphan_annotations_are_skipped_and_counted() {
        let json = r#"{
            "images": [{"id": 1, "width": 10, "height": 10, "file_name": "a.jpg"}],
            "categories": [{"id": 1, "name": "cat"}],
            "annotations": [
                {"id": 1, "image_id": 99, "category_id": 1, "bbox": [0,0,1,1]},
                {"id": 2, "image_id": 1, "category_id": 99, "bbox": [0,0,1,1]}
            ]
        }"#;
        let (records, skipped) = CocoPayload::from_json_str(json).unwrap().into_records();
        assert_eq!(skipped, 2);
        assert!(records[0].detections.is_empty());
    }

    #[test]
    fn records_roundtrip_through_payload() {
        let payload = CocoPayload::from_json_str(sample_payload_json()).unwrap();
        let (records, _) = payload.clone().into_records();
        let rebuilt = CocoPayload::from_records(&records);

        assert_eq!(rebuilt.images.len(), 1);
        assert_eq!(rebuilt.categories.len(), 1);
        assert_eq!(rebuilt.annotations.len(), 1);
        assert_eq!(rebuilt.annotations[0].bbox, [10.0, 20.0, 90.0, 60.0]);
        assert_eq!(rebuilt.categories[0].name, "person");
    }

    #[test]
    fn bbox_only_detection_gains_corner_polygon() {
        let mut unit = ImageDetection::blank();
        unit.image.id = 1;
        unit.image.width = 100;
        unit.image.height = 100;
        unit.image.file_name = "x.jpg".into();

        let mut det = DetectionRecord::blank();
        det.id = 1;
        det.image_id = 1;
        det.label = "car".into();
        det.left = 5.0;
        det.top = 5.0;
        det.right = 15.0;
        det.bottom = 25.0;
        det.is_bbox = true;
        unit.detections.push(det);

        let payload = CocoPayload::from_records(&[unit]);
        match &payload.annotations[0].segmentation {
            Some(Segmentation::Polygons(polys)) => {
                assert_eq!(polys.len(), 1);
                assert_eq!(polys[0].len(), 8);
            }
            other => panic!("expected corner polygon, got {other:?}"),
        }
    }

    #[test]
    fn rle_segmentation_roundtrips() {
        let json = r#"{
            "images": [{"id": 1, "width": 4, "height": 4, "file_name": "a.jpg"}],
            "categories": [{"id": 1, "name": "crowd"}],
            "annotations": [{
                "id": 1, "image_id": 1, "category_id": 1,
                "bbox": [0, 0, 4, 4],
                "iscrowd": 1,
                "segmentation": {"counts": [2, 6, 8], "size": [4, 4]}
            }]
        }"#;
        let payload = CocoPayload::from_json_str(json).unwrap();
        let (records, _) = payload.into_records();
        let det = &records[0].detections[0];
        assert!(det.is_crowd);
        assert_eq!(
            det.segmentation,
            Some(Segmentation::Rle {
                counts: vec![2, 6, 8],
                size: [4, 4],
            })
        );
    }
}
