//! Persistence seam for annotation imports.
//!
//! The import merge talks to an [`AnnotationStore`] trait rather than a
//! concrete database, so the idempotence rules can be tested against the
//! in-memory backend and a real backend can be swapped in behind the same
//! calls. All lookups the merge depends on are explicit trait methods; the
//! merge never enumerates the store wholesale.

mod memory;

pub use memory::MemoryStore;

use crate::ir::Segmentation;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
}

/// A category row as the store holds it.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredCategory {
    pub id: u64,
    pub name: String,
    pub keypoint_labels: Vec<String>,
    pub keypoint_edges: Vec<[u32; 2]>,
}

/// An image row. `annotated`, `num_annotations`, and `category_ids` are
/// derived fields refreshed by the merge's finalize step.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredImage {
    pub id: u64,
    pub dataset_id: u64,
    pub file_name: String,
    pub annotated: bool,
    pub num_annotations: usize,
    pub category_ids: Vec<u64>,
}

/// An annotation row. Soft-deleted rows stay in the store with
/// `deleted = true` and are revived, never duplicated, by re-imports.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredAnnotation {
    pub id: u64,
    pub image_id: u64,
    pub category_id: u64,
    pub segmentation: Option<Segmentation>,
    pub keypoints: Vec<f64>,
    pub bbox: [f64; 4],
    pub area: f64,
    pub is_bbox: bool,
    pub deleted: bool,
}

/// The store operations the import merge needs.
pub trait AnnotationStore: Send + Sync {
    /// Case-insensitive category lookup by name.
    fn find_category_by_name(&self, name: &str) -> Result<Option<StoredCategory>, StoreError>;

    fn insert_category(&self, category: StoredCategory) -> Result<u64, StoreError>;

    /// Record that a dataset references a category. Idempotent.
    fn attach_category_to_dataset(
        &self,
        dataset_id: u64,
        category_id: u64,
    ) -> Result<(), StoreError>;

    /// All images in the dataset with exactly this file name. More than one
    /// result means the dataset is ambiguous for that name.
    fn find_images_by_file_name(
        &self,
        dataset_id: u64,
        file_name: &str,
    ) -> Result<Vec<StoredImage>, StoreError>;

    fn find_image(&self, id: u64) -> Result<Option<StoredImage>, StoreError>;

    fn update_image(&self, image: StoredImage) -> Result<(), StoreError>;

    /// Look up an annotation by the import equality key:
    /// (image, category, segmentation, keypoints).
    fn find_annotation(
        &self,
        image_id: u64,
        category_id: u64,
        segmentation: &Option<Segmentation>,
        keypoints: &[f64],
    ) -> Result<Option<StoredAnnotation>, StoreError>;

    fn insert_annotation(&self, annotation: StoredAnnotation) -> Result<u64, StoreError>;

    /// Revive a matched annotation: clear `deleted`, set `is_bbox`. Nothing
    /// else on the row changes.
    fn restore_annotation(&self, id: u64, is_bbox: bool) -> Result<(), StoreError>;

    /// Live annotations on an image: `area > 0` and not deleted.
    fn count_annotations(&self, image_id: u64) -> Result<usize, StoreError>;

    /// Distinct category ids among an image's live annotations.
    fn annotation_categories(&self, image_id: u64) -> Result<Vec<u64>, StoreError>;
}
