//! Structural validation of canonical records.
//!
//! Validation is strictly a filter: it returns a subset of its input and
//! never mutates the geometry of anything it keeps. Everything it drops is
//! counted, and the counts are part of the public result so callers (and
//! tests) can observe losses.

use tracing::{debug, warn};

use crate::ir::ImageDetection;

/// What the validator removed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ValidationCounts {
    /// Whole units dropped because the image itself was malformed.
    pub dropped_images: usize,
    /// Individual detections dropped for geometry violations.
    pub dropped_detections: usize,
}

impl ValidationCounts {
    pub fn is_clean(&self) -> bool {
        self.dropped_images == 0 && self.dropped_detections == 0
    }
}

/// Validate a canonical dataset.
///
/// A unit is dropped entirely when its image fails shape checks (zero
/// width/height, empty file name). Within surviving units, a detection is
/// dropped when its box leaves the image (`right > width`,
/// `bottom > height`), is degenerate (`right <= left`, `bottom <= top`),
/// has a non-finite coordinate, or references a different image than the
/// unit it sits in. A unit that loses all of its detections is still kept
/// unless `filter_images_without_labels` asks otherwise.
pub fn validate_records(
    records: Vec<ImageDetection>,
    filter_images_without_labels: bool,
) -> (Vec<ImageDetection>, ValidationCounts) {
    let mut counts = ValidationCounts::default();
    let mut kept = Vec::with_capacity(records.len());

    for mut unit in records {
        if !image_is_well_formed(&unit) {
            warn!(
                image_id = unit.image.id,
                file_name = %unit.image.file_name,
                "dropping malformed image unit"
            );
            counts.dropped_images += 1;
            continue;
        }

        let before = unit.detections.len();
        let image_id = unit.image.id;
        let width = f64::from(unit.image.width);
        let height = f64::from(unit.image.height);

        unit.detections
            .retain(|det| detection_is_valid(det, image_id, width, height));
        counts.dropped_detections += before - unit.detections.len();

        if unit.detections.is_empty() && filter_images_without_labels {
            counts.dropped_images += 1;
            continue;
        }

        kept.push(unit);
    }

    if !counts.is_clean() {
        debug!(
            dropped_images = counts.dropped_images,
            dropped_detections = counts.dropped_detections,
            "structural validation dropped records"
        );
    }

    (kept, counts)
}

fn image_is_well_formed(unit: &ImageDetection) -> bool {
    unit.image.width > 0 && unit.image.height > 0 && !unit.image.file_name.is_empty()
}

fn detection_is_valid(
    det: &crate::ir::DetectionRecord,
    image_id: u64,
    width: f64,
    height: f64,
) -> bool {
    if det.image_id != image_id {
        return false;
    }
    let coords = [det.left, det.top, det.right, det.bottom];
    if coords.iter().any(|c| !c.is_finite()) {
        return false;
    }
    det.right <= width && det.bottom <= height && det.right > det.left && det.bottom > det.top
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::DetectionRecord;

    fn unit(id: u64, width: u32, height: u32) -> ImageDetection {
        let mut unit = ImageDetection::blank();
        unit.image.id = id;
        unit.image.width = width;
        unit.image.height = height;
        unit.image.file_name = format!("img{id}.jpg");
        unit
    }

    fn det(image_id: u64, left: f64, top: f64, right: f64, bottom: f64) -> DetectionRecord {
        let mut det = DetectionRecord::blank();
        det.image_id = image_id;
        det.label = "person".into();
        det.left = left;
        det.top = top;
        det.right = right;
        det.bottom = bottom;
        det
    }

    #[test]
    fn keeps_valid_records_untouched() {
        let mut u = unit(1, 640, 480);
        u.detections.push(det(1, 10.0, 20.0, 100.0, 200.0));
        let original = u.clone();

        let (kept, counts) = validate_records(vec![u], false);
        assert!(counts.is_clean());
        assert_eq!(kept, vec![original]);
    }

    #[test]
    fn drops_out_of_bounds_and_degenerate_detections() {
        let mut u = unit(1, 100, 100);
        u.detections.push(det(1, 10.0, 10.0, 50.0, 50.0)); // fine
        u.detections.push(det(1, 0.0, 0.0, 150.0, 50.0)); // right > width
        u.detections.push(det(1, 0.0, 0.0, 50.0, 120.0)); // bottom > height
        u.detections.push(det(1, 50.0, 10.0, 50.0, 60.0)); // zero width
        u.detections.push(det(1, 10.0, 60.0, 50.0, 20.0)); // inverted
        u.detections.push(det(1, f64::NAN, 0.0, 10.0, 10.0)); // non-finite

        let (kept, counts) = validate_records(vec![u], false);
        assert_eq!(counts.dropped_detections, 5);
        assert_eq!(kept[0].detections.len(), 1);
        // Survivor geometry untouched
        assert_eq!(kept[0].detections[0].right, 50.0);
    }

    #[test]
    fn zero_width_bbox_scenario() {
        // Three images; image 2 has a detection with bbox [10,10,0,5]
        // (zero width in xywh terms). The validator drops that single
        // detection, keeps the image, and the counter reads exactly 1.
        let mut units = vec![unit(1, 640, 480), unit(2, 640, 480), unit(3, 640, 480)];
        units[0].detections.push(det(1, 5.0, 5.0, 50.0, 50.0));
        units[1].detections.push(det(2, 10.0, 10.0, 10.0, 15.0)); // zero width
        units[1].detections.push(det(2, 20.0, 20.0, 60.0, 70.0));
        units[2].detections.push(det(3, 1.0, 1.0, 9.0, 9.0));

        let (kept, counts) = validate_records(units, false);
        assert_eq!(counts.dropped_detections, 1);
        assert_eq!(counts.dropped_images, 0);
        assert_eq!(kept.len(), 3);
        assert_eq!(kept[1].detections.len(), 1);
        assert_eq!(kept[1].detections[0].left, 20.0);
    }

    #[test]
    fn drops_malformed_image_units() {
        let mut bad = unit(1, 0, 480); // zero width
        bad.detections.push(det(1, 0.0, 0.0, 10.0, 10.0));
        let good = unit(2, 100, 100);

        let (kept, counts) = validate_records(vec![bad, good], false);
        assert_eq!(counts.dropped_images, 1);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].image.id, 2);
    }

    #[test]
    fn drops_detection_with_foreign_image_id() {
        let mut u = unit(1, 100, 100);
        u.detections.push(det(7, 0.0, 0.0, 10.0, 10.0));

        let (kept, counts) = validate_records(vec![u], false);
        assert_eq!(counts.dropped_detections, 1);
        assert!(kept[0].detections.is_empty());
    }

    #[test]
    fn empty_units_filtered_only_on_request() {
        let u = unit(1, 100, 100);

        let (kept, _) = validate_records(vec![u.clone()], false);
        assert_eq!(kept.len(), 1);

        let (kept, counts) = validate_records(vec![u], true);
        assert!(kept.is_empty());
        assert_eq!(counts.dropped_images, 1);
    }
}
