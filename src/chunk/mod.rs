//! Payload chunking for oversized imports.
//!
//! A serialized dataset that exceeds the broker's payload budget is split
//! into shards. Splitting is positional over the image list, not
//! size-balanced per shard: the byte bound is approximate by design, because
//! downstream merge semantics rely on shard granularity being per image
//! group (categories duplicated into each shard, every image's annotations
//! co-located in exactly one shard).

use std::collections::HashMap;

use tracing::{info, warn};

use crate::error::LabelportError;
use crate::ir::payload::{CocoAnnotation, CocoPayload};

/// Payloads above this many serialized bytes get split before dispatch.
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 20_000_000;

/// Target serialized size of a single shard. Kept below the dispatch limit
/// to leave headroom for annotation-heavy image groups.
pub const DEFAULT_SHARD_BYTES: usize = 14_000_000;

/// Split a payload into shards of roughly `max_shard_bytes` each.
///
/// Every image lands in exactly one shard together with all of its
/// annotations; `categories` is cloned verbatim into every shard so each is
/// independently importable. Annotations referencing no image in the payload
/// cannot be routed and are dropped with a warning.
pub fn split_payload(
    payload: &CocoPayload,
    max_shard_bytes: usize,
) -> Result<Vec<CocoPayload>, LabelportError> {
    let total_bytes = payload.to_json_string()?.len();
    let shard_count = total_bytes.div_ceil(max_shard_bytes.max(1)).max(1);

    if shard_count == 1 || payload.images.len() <= 1 {
        return Ok(vec![payload.clone()]);
    }

    let images_per_shard = payload.images.len().div_ceil(shard_count);
    info!(
        total_bytes,
        shard_count,
        images_per_shard,
        "splitting payload into shards"
    );

    let mut annotations_by_image: HashMap<u64, Vec<&CocoAnnotation>> = HashMap::new();
    let mut orphans = 0usize;
    {
        let image_ids: std::collections::HashSet<u64> =
            payload.images.iter().map(|img| img.id).collect();
        for ann in &payload.annotations {
            if image_ids.contains(&ann.image_id) {
                annotations_by_image.entry(ann.image_id).or_default().push(ann);
            } else {
                orphans += 1;
            }
        }
    }
    if orphans > 0 {
        warn!(orphans, "dropping annotations with no image in the payload");
    }

    let shards = payload
        .images
        .chunks(images_per_shard)
        .map(|image_group| CocoPayload {
            images: image_group.to_vec(),
            categories: payload.categories.clone(),
            annotations: image_group
                .iter()
                .flat_map(|img| {
                    annotations_by_image
                        .get(&img.id)
                        .map(Vec::as_slice)
                        .unwrap_or(&[])
                        .iter()
                        .map(|ann| (*ann).clone())
                })
                .collect(),
        })
        .collect();

    Ok(shards)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::payload::{CocoCategory, CocoImage};

    fn payload(image_count: u64, annotations_per_image: u64) -> CocoPayload {
        let mut p = CocoPayload::default();
        p.categories.push(CocoCategory {
            id: 1,
            name: "person".into(),
            supercategory: None,
            keypoints: vec![],
            skeleton: vec![],
        });
        let mut ann_id = 0;
        for img_id in 1..=image_count {
            p.images.push(CocoImage {
                id: img_id,
                width: 100,
                height: 100,
                file_name: format!("img{img_id}.jpg"),
                path: None,
                dataset_id: None,
            });
            for _ in 0..annotations_per_image {
                ann_id += 1;
                p.annotations.push(CocoAnnotation {
                    id: ann_id,
                    image_id: img_id,
                    category_id: 1,
                    bbox: [0.0, 0.0, 10.0, 10.0],
                    area: Some(100.0),
                    iscrowd: Some(0),
                    segmentation: None,
                    keypoints: vec![],
                    isbbox: true,
                });
            }
        }
        p
    }

    #[test]
    fn small_payload_stays_whole() {
        let p = payload(3, 2);
        let shards = split_payload(&p, DEFAULT_SHARD_BYTES).unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0], p);
    }

    #[test]
    fn images_partition_exactly_and_annotations_follow() {
        let p = payload(10, 3);
        let bytes = p.to_json_string().unwrap().len();
        // force ~4 shards
        let shards = split_payload(&p, bytes / 4 + 1).unwrap();
        assert!(shards.len() > 1);

        let mut seen_images = Vec::new();
        let mut seen_annotations = Vec::new();
        for shard in &shards {
            assert_eq!(shard.categories, p.categories);
            for img in &shard.images {
                seen_images.push(img.id);
            }
            for ann in &shard.annotations {
                // annotation rides with its image's shard
                assert!(shard.images.iter().any(|img| img.id == ann.image_id));
                seen_annotations.push(ann.id);
            }
        }

        let expected_images: Vec<u64> = p.images.iter().map(|i| i.id).collect();
        assert_eq!(seen_images, expected_images); // order preserved, once each

        seen_annotations.sort_unstable();
        let mut expected_annotations: Vec<u64> = p.annotations.iter().map(|a| a.id).collect();
        expected_annotations.sort_unstable();
        assert_eq!(seen_annotations, expected_annotations);
    }

    #[test]
    fn orphan_annotations_are_dropped() {
        let mut p = payload(4, 1);
        p.annotations.push(CocoAnnotation {
            id: 999,
            image_id: 42,
            category_id: 1,
            bbox: [0.0; 4],
            area: None,
            iscrowd: None,
            segmentation: None,
            keypoints: vec![],
            isbbox: false,
        });
        let bytes = p.to_json_string().unwrap().len();
        let shards = split_payload(&p, bytes / 2 + 1).unwrap();
        let total: usize = shards.iter().map(|s| s.annotations.len()).sum();
        assert_eq!(total, 4);
    }

    #[test]
    fn single_image_payload_never_splits() {
        let p = payload(1, 50);
        let shards = split_payload(&p, 16).unwrap();
        assert_eq!(shards.len(), 1);
    }
}
