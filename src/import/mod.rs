//! Distributed annotation import.
//!
//! An import takes a serialized COCO payload, splits it into shards when it
//! exceeds the dispatch budget, and merges each shard into the store
//! independently. The merge is idempotent: re-importing the same payload
//! revives soft-deleted rows and refreshes `is_bbox`, but never duplicates
//! an annotation. Shards report progress through their own task handles and
//! fold into the parent via [`AggregateProgress`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::chunk::{split_payload, DEFAULT_MAX_PAYLOAD_BYTES, DEFAULT_SHARD_BYTES};
use crate::error::LabelportError;
use crate::ir::payload::CocoPayload;
use crate::ir::Segmentation;
use crate::store::{AnnotationStore, StoredAnnotation, StoredCategory};
use crate::task::{AggregateProgress, TaskHandle, TaskHub, TaskId, TaskStatus};

/// Budgets controlling when and how a payload is sharded.
#[derive(Clone, Copy, Debug)]
pub struct ImportOptions {
    /// Payloads above this serialized size are split before dispatch.
    pub max_payload_bytes: usize,
    /// Target serialized size of each shard.
    pub shard_bytes: usize,
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            max_payload_bytes: DEFAULT_MAX_PAYLOAD_BYTES,
            shard_bytes: DEFAULT_SHARD_BYTES,
        }
    }
}

/// One shard's slot in the parent's aggregate progress.
#[derive(Clone)]
pub struct ShardSlot {
    aggregate: Arc<AggregateProgress>,
    index: usize,
}

impl ShardSlot {
    pub fn new(aggregate: Arc<AggregateProgress>, index: usize) -> Self {
        Self { aggregate, index }
    }

    fn report(&self, fraction: f32) {
        self.aggregate.update(self.index, fraction);
    }
}

/// Everything a dispatcher needs to run one shard.
pub struct ImportShard {
    pub dataset_id: u64,
    pub payload: CocoPayload,
    pub task: TaskHandle,
    pub slot: ShardSlot,
}

/// Where shards go to run. The local implementation spawns tokio tasks; a
/// remote one would serialize the shard onto a queue.
pub trait ShardDispatcher {
    fn dispatch(&self, shard: ImportShard) -> TaskId;
}

/// What one shard merge did to the store.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ShardReport {
    pub created_categories: usize,
    pub matched_images: usize,
    pub skipped_images: usize,
    pub inserted_annotations: usize,
    pub restored_annotations: usize,
    pub skipped_annotations: usize,
}

/// What `run_import` scheduled. Returned before any shard completes.
#[derive(Clone, Debug)]
pub struct ImportPlan {
    pub parent: TaskHandle,
    pub shard_tasks: Vec<TaskId>,
    pub total_bytes: usize,
}

impl ImportPlan {
    pub fn shard_count(&self) -> usize {
        self.shard_tasks.len()
    }
}

/// Merge one shard into the store.
///
/// Categories are matched by name (case-insensitive) and created when
/// absent. Images are matched by file name within the dataset; a file name
/// with no match skips that image's annotations with a warning, and one
/// with several matches is logged as an error and skipped. Annotations
/// match on the equality key `(image, category, segmentation, keypoints)`;
/// a hit is revived (`deleted` cleared, `is_bbox` refreshed) and a miss is
/// inserted. Annotations carrying neither segmentation nor keypoints are
/// skipped. Matched images get their derived fields recounted from store
/// state at the end, so the merge converges no matter how many times it
/// runs.
pub fn merge_shard(
    store: &dyn AnnotationStore,
    dataset_id: u64,
    payload: &CocoPayload,
    task: &TaskHandle,
    slot: Option<&ShardSlot>,
) -> Result<ShardReport, LabelportError> {
    task.set_status(TaskStatus::Running);
    task.info(format!(
        "importing {} categories, {} images, {} annotations",
        payload.categories.len(),
        payload.images.len(),
        payload.annotations.len()
    ));

    let total_items =
        (payload.categories.len() + payload.images.len() + payload.annotations.len()).max(1);
    let mut processed = 0usize;
    let mut report = ShardReport::default();
    let tick = |task: &TaskHandle, processed: usize| {
        let fraction = processed as f32 / total_items as f32;
        task.set_progress(fraction * 100.0);
        if let Some(slot) = slot {
            slot.report(fraction);
        }
    };

    // Categories: source id -> store id.
    let mut category_ids: HashMap<u64, u64> = HashMap::new();
    for category in &payload.categories {
        let store_id = match store.find_category_by_name(&category.name)? {
            Some(existing) => existing.id,
            None => {
                task.warning(format!("creating category {}", category.name));
                report.created_categories += 1;
                store.insert_category(StoredCategory {
                    id: 0,
                    name: category.name.clone(),
                    keypoint_labels: category.keypoints.clone(),
                    keypoint_edges: category.skeleton.clone(),
                })?
            }
        };
        store.attach_category_to_dataset(dataset_id, store_id)?;
        category_ids.insert(category.id, store_id);
        processed += 1;
        tick(task, processed);
    }

    // Images: source id -> store id, matched by file name.
    let mut image_ids: HashMap<u64, u64> = HashMap::new();
    for image in &payload.images {
        let matches = store.find_images_by_file_name(dataset_id, &image.file_name)?;
        match matches.as_slice() {
            [] => {
                task.warning(format!(
                    "could not find image {}; annotations not imported",
                    image.file_name
                ));
                report.skipped_images += 1;
            }
            [found] => {
                image_ids.insert(image.id, found.id);
                report.matched_images += 1;
            }
            _ => {
                task.error(format!(
                    "multiple images named {} in dataset {dataset_id}; annotations not imported",
                    image.file_name
                ));
                report.skipped_images += 1;
            }
        }
        processed += 1;
        tick(task, processed);
    }

    // Annotations.
    for annotation in &payload.annotations {
        processed += 1;

        let Some(&image_id) = image_ids.get(&annotation.image_id) else {
            report.skipped_annotations += 1;
            tick(task, processed);
            continue;
        };
        let Some(&category_id) = category_ids.get(&annotation.category_id) else {
            task.warning(format!(
                "annotation {} references unknown category {}",
                annotation.id, annotation.category_id
            ));
            report.skipped_annotations += 1;
            tick(task, processed);
            continue;
        };

        let segmentation = annotation
            .segmentation
            .clone()
            .filter(|seg| !seg.is_empty());
        if segmentation.is_none() && annotation.keypoints.is_empty() {
            task.warning(format!(
                "annotation {} has no segmentation or keypoints; skipping",
                annotation.id
            ));
            report.skipped_annotations += 1;
            tick(task, processed);
            continue;
        }

        match store.find_annotation(image_id, category_id, &segmentation, &annotation.keypoints)? {
            Some(existing) => {
                store.restore_annotation(existing.id, annotation.isbbox)?;
                report.restored_annotations += 1;
            }
            None => {
                let area = annotation
                    .area
                    .filter(|a| *a > 0.0)
                    .unwrap_or_else(|| annotation_area(&segmentation, annotation.bbox));
                store.insert_annotation(StoredAnnotation {
                    id: 0,
                    image_id,
                    category_id,
                    segmentation,
                    keypoints: annotation.keypoints.clone(),
                    bbox: annotation.bbox,
                    area,
                    is_bbox: annotation.isbbox,
                    deleted: false,
                })?;
                report.inserted_annotations += 1;
            }
        }
        tick(task, processed);
    }

    // Finalize: refresh derived image fields from store state.
    for &image_id in image_ids.values() {
        let Some(mut image) = store.find_image(image_id)? else {
            continue;
        };
        let count = store.count_annotations(image_id)?;
        image.num_annotations = count;
        image.annotated = count > 0;
        let mut categories = store.annotation_categories(image_id)?;
        categories.extend(image.category_ids.iter().copied());
        categories.sort_unstable();
        categories.dedup();
        image.category_ids = categories;
        store.update_image(image)?;
    }

    task.set_progress(100.0);
    if let Some(slot) = slot {
        slot.report(1.0);
    }
    task.set_status(TaskStatus::Succeeded);
    task.info(format!(
        "shard merged: {} inserted, {} restored, {} skipped",
        report.inserted_annotations, report.restored_annotations, report.skipped_annotations
    ));

    Ok(report)
}

fn annotation_area(segmentation: &Option<Segmentation>, bbox: [f64; 4]) -> f64 {
    segmentation
        .as_ref()
        .map(Segmentation::area)
        .filter(|a| *a > 0.0)
        .unwrap_or(bbox[2] * bbox[3])
}

/// Parse, shard, and dispatch an import without waiting for completion.
pub fn run_import(
    hub: &TaskHub,
    dispatcher: &dyn ShardDispatcher,
    dataset_id: u64,
    dataset_name: &str,
    raw_json: &str,
    options: &ImportOptions,
) -> Result<ImportPlan, LabelportError> {
    let payload = CocoPayload::from_json_str(raw_json)?;
    let total_bytes = raw_json.len();

    let shards = if total_bytes > options.max_payload_bytes {
        split_payload(&payload, options.shard_bytes)?
    } else {
        vec![payload]
    };

    info!(
        dataset = dataset_name,
        total_bytes,
        shards = shards.len(),
        "dispatching annotation import"
    );

    let parent = hub.new_task(
        format!("Import COCO format into {dataset_name}"),
        Some(dataset_id),
        "Annotation Import",
    );
    parent.set_status(TaskStatus::Running);
    let aggregate = AggregateProgress::new(parent.clone(), shards.len());

    let mut shard_tasks = Vec::with_capacity(shards.len());
    for (index, shard_payload) in shards.into_iter().enumerate() {
        let task = hub.new_task(
            format!("Import COCO format into {dataset_name}"),
            Some(dataset_id),
            "Annotation Import",
        );
        debug!(shard = index, task = task.id(), "dispatching shard");
        let id = dispatcher.dispatch(ImportShard {
            dataset_id,
            payload: shard_payload,
            task,
            slot: ShardSlot::new(Arc::clone(&aggregate), index),
        });
        shard_tasks.push(id);
    }

    Ok(ImportPlan {
        parent,
        shard_tasks,
        total_bytes,
    })
}

/// Runs shards on the tokio runtime against a shared store.
pub struct LocalDispatcher {
    store: Arc<dyn AnnotationStore>,
    handles: Mutex<Vec<JoinHandle<Result<ShardReport, LabelportError>>>>,
}

impl LocalDispatcher {
    pub fn new(store: Arc<dyn AnnotationStore>) -> Self {
        Self {
            store,
            handles: Mutex::new(Vec::new()),
        }
    }

    /// Wait for every dispatched shard and collect the reports.
    pub async fn join_all(&self) -> Result<Vec<ShardReport>, LabelportError> {
        let handles: Vec<_> = {
            let mut guard = self.handles.lock().expect("dispatcher handles poisoned");
            guard.drain(..).collect()
        };
        let mut reports = Vec::with_capacity(handles.len());
        for handle in handles {
            let report = handle.await.map_err(|err| {
                crate::store::StoreError::Backend(format!("shard task panicked: {err}"))
            })??;
            reports.push(report);
        }
        Ok(reports)
    }
}

impl ShardDispatcher for LocalDispatcher {
    fn dispatch(&self, shard: ImportShard) -> TaskId {
        let store = Arc::clone(&self.store);
        let id = shard.task.id();
        let handle = tokio::task::spawn_blocking(move || {
            let result = merge_shard(
                store.as_ref(),
                shard.dataset_id,
                &shard.payload,
                &shard.task,
                Some(&shard.slot),
            );
            if let Err(err) = &result {
                shard.task.error(format!("shard merge failed: {err}"));
                shard.task.set_status(TaskStatus::Failed);
                shard.slot.aggregate.parent().set_status(TaskStatus::Failed);
            }
            result
        });
        self.handles
            .lock()
            .expect("dispatcher handles poisoned")
            .push(handle);
        id
    }
}
