//! Core canonical record types.

use serde::{Deserialize, Serialize};

/// An image as seen during a single conversion or import run.
///
/// `id` is unique within a run only; it is never reused across runs and never
/// refers to a store primary key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub id: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset_id: Option<u64>,

    pub path: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmented_path: Option<String>,

    pub width: u32,
    pub height: u32,
    pub file_name: String,
}

/// Segmentation data attached to a detection.
///
/// Polygons are flat `[x0, y0, x1, y1, ...]` coordinate lists, one list per
/// sub-polygon. RLE carries run lengths over a `[height, width]` grid and is
/// only valid when the owning detection has `is_crowd == true`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Segmentation {
    Polygons(Vec<Vec<f64>>),
    Rle { counts: Vec<u32>, size: [u32; 2] },
}

impl Segmentation {
    /// Whether there is any actual geometry here.
    ///
    /// Readers in the wild emit `[]` and `[[]]` for "no segmentation"; both
    /// count as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Segmentation::Polygons(polys) => polys.iter().all(|p| p.is_empty()),
            Segmentation::Rle { counts, .. } => counts.is_empty(),
        }
    }

    /// Area enclosed by this segmentation.
    ///
    /// Polygons use the shoelace formula summed over sub-polygons; RLE sums
    /// the foreground runs (odd positions, COCO convention).
    pub fn area(&self) -> f64 {
        match self {
            Segmentation::Polygons(polys) => polys.iter().map(|p| polygon_area(p)).sum(),
            Segmentation::Rle { counts, .. } => counts
                .iter()
                .skip(1)
                .step_by(2)
                .map(|&run| run as f64)
                .sum(),
        }
    }
}

fn polygon_area(flat: &[f64]) -> f64 {
    let n = flat.len() / 2;
    if n < 3 {
        return 0.0;
    }
    let mut twice_area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        let (xi, yi) = (flat[2 * i], flat[2 * i + 1]);
        let (xj, yj) = (flat[2 * j], flat[2 * j + 1]);
        twice_area += xi * yj - xj * yi;
    }
    twice_area.abs() / 2.0
}

/// One detection (bounding box, polygon or keypoint annotation) on an image.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectionRecord {
    pub id: u64,

    /// References [`ImageRecord::id`] within the same run.
    pub image_id: u64,

    /// Source-vocabulary label until reconciliation replaces it with the
    /// canonical one.
    pub label: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segmentation: Option<Segmentation>,

    /// Computed from `segmentation` when absent; see [`Self::resolved_area`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub area: Option<f64>,

    pub top: f64,
    pub left: f64,
    pub right: f64,
    pub bottom: f64,

    #[serde(default)]
    pub is_crowd: bool,

    #[serde(default)]
    pub is_bbox: bool,

    /// Flat `[x, y, visibility]` triplets, possibly empty.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keypoints: Vec<f64>,
}

impl DetectionRecord {
    /// A fresh record with every field at a neutral default.
    ///
    /// Drivers start from this and fill in what their format knows, so every
    /// record entering the validator is fully shaped.
    pub fn blank() -> Self {
        Self {
            id: 0,
            image_id: 0,
            label: String::new(),
            segmentation: None,
            area: None,
            top: 0.0,
            left: 0.0,
            right: 0.0,
            bottom: 0.0,
            is_crowd: false,
            is_bbox: false,
            keypoints: Vec::new(),
        }
    }

    /// The declared area, or the area derived from segmentation, or the bbox
    /// area as a last resort.
    pub fn resolved_area(&self) -> f64 {
        if let Some(area) = self.area {
            return area;
        }
        if let Some(seg) = &self.segmentation {
            if !seg.is_empty() {
                return seg.area();
            }
        }
        (self.right - self.left).max(0.0) * (self.bottom - self.top).max(0.0)
    }

    /// Bounding box in `[x, y, width, height]` form.
    pub fn bbox_xywh(&self) -> [f64; 4] {
        [
            self.left,
            self.top,
            self.right - self.left,
            self.bottom - self.top,
        ]
    }
}

/// The unit of conversion and chunking: one image plus its detections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ImageDetection {
    pub image: ImageRecord,

    #[serde(default)]
    pub detections: Vec<DetectionRecord>,
}

impl ImageDetection {
    /// A fresh unit with a neutral image and no detections.
    pub fn blank() -> Self {
        Self {
            image: ImageRecord {
                id: 0,
                dataset_id: None,
                path: String::new(),
                segmented_path: None,
                width: 0,
                height: 0,
                file_name: String::new(),
            },
            detections: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_detection_has_neutral_defaults() {
        let det = DetectionRecord::blank();
        assert_eq!(det.label, "");
        assert!(det.segmentation.is_none());
        assert!(det.area.is_none());
        assert!(!det.is_crowd);
        assert!(!det.is_bbox);
        assert!(det.keypoints.is_empty());
    }

    #[test]
    fn blank_units_are_independent() {
        let mut a = ImageDetection::blank();
        let b = ImageDetection::blank();
        a.image.file_name = "a.jpg".into();
        assert_eq!(b.image.file_name, "");
    }

    #[test]
    fn polygon_area_shoelace() {
        // 10x10 square
        let seg = Segmentation::Polygons(vec![vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0]]);
        assert_eq!(seg.area(), 100.0);
    }

    #[test]
    fn rle_area_sums_foreground_runs() {
        let seg = Segmentation::Rle {
            counts: vec![5, 3, 2, 4],
            size: [4, 4],
        };
        assert_eq!(seg.area(), 7.0);
    }

    #[test]
    fn resolved_area_prefers_declared_value() {
        let mut det = DetectionRecord::blank();
        det.area = Some(42.0);
        det.segmentation = Some(Segmentation::Polygons(vec![vec![
            0.0, 0.0, 4.0, 0.0, 4.0, 4.0, 0.0, 4.0,
        ]]));
        assert_eq!(det.resolved_area(), 42.0);

        det.area = None;
        assert_eq!(det.resolved_area(), 16.0);
    }

    #[test]
    fn resolved_area_falls_back_to_bbox() {
        let mut det = DetectionRecord::blank();
        det.left = 10.0;
        det.top = 10.0;
        det.right = 20.0;
        det.bottom = 15.0;
        assert_eq!(det.resolved_area(), 50.0);
    }

    #[test]
    fn empty_segmentation_variants() {
        assert!(Segmentation::Polygons(vec![]).is_empty());
        assert!(Segmentation::Polygons(vec![vec![]]).is_empty());
        assert!(!Segmentation::Polygons(vec![vec![0.0, 0.0, 1.0, 0.0, 1.0, 1.0]]).is_empty());
    }
}
