//! In-memory store backend.
//!
//! Backs the import tests and any caller that wants merge semantics without
//! a database. One mutex over the whole state keeps the row-level invariants
//! simple; imports are shard-parallel but each shard batches its own calls,
//! so contention here is not the bottleneck.

use std::sync::Mutex;

use crate::ir::Segmentation;

use super::{AnnotationStore, StoreError, StoredAnnotation, StoredCategory, StoredImage};

#[derive(Debug, Default)]
struct Inner {
    next_category_id: u64,
    next_annotation_id: u64,
    categories: Vec<StoredCategory>,
    dataset_categories: Vec<(u64, u64)>,
    images: Vec<StoredImage>,
    annotations: Vec<StoredAnnotation>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store mutex poisoned".into()))
    }

    /// Seed an image row, assigning derived fields their defaults.
    pub fn seed_image(&self, id: u64, dataset_id: u64, file_name: &str) {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.images.push(StoredImage {
            id,
            dataset_id,
            file_name: file_name.to_string(),
            annotated: false,
            num_annotations: 0,
            category_ids: Vec::new(),
        });
    }

    pub fn image(&self, id: u64) -> Option<StoredImage> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.images.iter().find(|img| img.id == id).cloned()
    }

    /// Mark an annotation soft-deleted, as the UI's delete action does.
    pub fn soft_delete(&self, id: u64) {
        let mut inner = self.inner.lock().expect("memory store mutex poisoned");
        if let Some(ann) = inner.annotations.iter_mut().find(|ann| ann.id == id) {
            ann.deleted = true;
        }
    }

    pub fn annotations(&self) -> Vec<StoredAnnotation> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.annotations.clone()
    }

    pub fn categories(&self) -> Vec<StoredCategory> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        inner.categories.clone()
    }

    pub fn dataset_categories(&self, dataset_id: u64) -> Vec<u64> {
        let inner = self.inner.lock().expect("memory store mutex poisoned");
        inner
            .dataset_categories
            .iter()
            .filter(|(ds, _)| *ds == dataset_id)
            .map(|(_, cat)| *cat)
            .collect()
    }
}

impl AnnotationStore for MemoryStore {
    fn find_category_by_name(&self, name: &str) -> Result<Option<StoredCategory>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .categories
            .iter()
            .find(|cat| cat.name.eq_ignore_ascii_case(name))
            .cloned())
    }

    fn insert_category(&self, mut category: StoredCategory) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        inner.next_category_id += 1;
        category.id = inner.next_category_id;
        let id = category.id;
        inner.categories.push(category);
        Ok(id)
    }

    fn attach_category_to_dataset(
        &self,
        dataset_id: u64,
        category_id: u64,
    ) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        if !inner.dataset_categories.contains(&(dataset_id, category_id)) {
            inner.dataset_categories.push((dataset_id, category_id));
        }
        Ok(())
    }

    fn find_images_by_file_name(
        &self,
        dataset_id: u64,
        file_name: &str,
    ) -> Result<Vec<StoredImage>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .images
            .iter()
            .filter(|img| img.dataset_id == dataset_id && img.file_name == file_name)
            .cloned()
            .collect())
    }

    fn find_image(&self, id: u64) -> Result<Option<StoredImage>, StoreError> {
        let inner = self.lock()?;
        Ok(inner.images.iter().find(|img| img.id == id).cloned())
    }

    fn update_image(&self, image: StoredImage) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.images.iter_mut().find(|img| img.id == image.id) {
            Some(slot) => {
                *slot = image;
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "update of unknown image {}",
                image.id
            ))),
        }
    }

    fn find_annotation(
        &self,
        image_id: u64,
        category_id: u64,
        segmentation: &Option<Segmentation>,
        keypoints: &[f64],
    ) -> Result<Option<StoredAnnotation>, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .annotations
            .iter()
            .find(|ann| {
                ann.image_id == image_id
                    && ann.category_id == category_id
                    && ann.segmentation == *segmentation
                    && ann.keypoints == keypoints
            })
            .cloned())
    }

    fn insert_annotation(&self, mut annotation: StoredAnnotation) -> Result<u64, StoreError> {
        let mut inner = self.lock()?;
        inner.next_annotation_id += 1;
        annotation.id = inner.next_annotation_id;
        let id = annotation.id;
        inner.annotations.push(annotation);
        Ok(id)
    }

    fn restore_annotation(&self, id: u64, is_bbox: bool) -> Result<(), StoreError> {
        let mut inner = self.lock()?;
        match inner.annotations.iter_mut().find(|ann| ann.id == id) {
            Some(ann) => {
                ann.deleted = false;
                ann.is_bbox = is_bbox;
                Ok(())
            }
            None => Err(StoreError::Backend(format!(
                "restore of unknown annotation {id}"
            ))),
        }
    }

    fn count_annotations(&self, image_id: u64) -> Result<usize, StoreError> {
        let inner = self.lock()?;
        Ok(inner
            .annotations
            .iter()
            .filter(|ann| ann.image_id == image_id && !ann.deleted && ann.area > 0.0)
            .count())
    }

    fn annotation_categories(&self, image_id: u64) -> Result<Vec<u64>, StoreError> {
        let inner = self.lock()?;
        let mut ids: Vec<u64> = inner
            .annotations
            .iter()
            .filter(|ann| ann.image_id == image_id && !ann.deleted && ann.area > 0.0)
            .map(|ann| ann.category_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotation(image_id: u64, category_id: u64) -> StoredAnnotation {
        StoredAnnotation {
            id: 0,
            image_id,
            category_id,
            segmentation: Some(Segmentation::Polygons(vec![vec![
                0.0, 0.0, 10.0, 0.0, 10.0, 10.0,
            ]])),
            keypoints: vec![],
            bbox: [0.0, 0.0, 10.0, 10.0],
            area: 50.0,
            is_bbox: false,
            deleted: false,
        }
    }

    #[test]
    fn category_lookup_is_case_insensitive() {
        let store = MemoryStore::new();
        store
            .insert_category(StoredCategory {
                id: 0,
                name: "Person".into(),
                keypoint_labels: vec![],
                keypoint_edges: vec![],
            })
            .unwrap();

        let found = store.find_category_by_name("person").unwrap().unwrap();
        assert_eq!(found.name, "Person");
        assert!(store.find_category_by_name("bicycle").unwrap().is_none());
    }

    #[test]
    fn annotation_key_matches_on_segmentation_and_keypoints() {
        let store = MemoryStore::new();
        let id = store.insert_annotation(annotation(1, 2)).unwrap();

        let probe = annotation(1, 2);
        let found = store
            .find_annotation(1, 2, &probe.segmentation, &probe.keypoints)
            .unwrap();
        assert_eq!(found.unwrap().id, id);

        // a different polygon is a different annotation
        let other = Some(Segmentation::Polygons(vec![vec![1.0, 1.0, 2.0, 1.0, 2.0, 2.0]]));
        assert!(store.find_annotation(1, 2, &other, &[]).unwrap().is_none());
    }

    #[test]
    fn restore_clears_deleted_and_sets_isbbox_only() {
        let store = MemoryStore::new();
        let mut ann = annotation(1, 1);
        ann.deleted = true;
        let id = store.insert_annotation(ann).unwrap();

        store.restore_annotation(id, true).unwrap();
        let rows = store.annotations();
        assert!(!rows[0].deleted);
        assert!(rows[0].is_bbox);
        assert_eq!(rows[0].area, 50.0);
    }

    #[test]
    fn count_excludes_deleted_and_zero_area() {
        let store = MemoryStore::new();
        store.insert_annotation(annotation(1, 1)).unwrap();
        let mut deleted = annotation(1, 1);
        deleted.deleted = true;
        deleted.segmentation = None;
        store.insert_annotation(deleted).unwrap();
        let mut flat = annotation(1, 2);
        flat.area = 0.0;
        flat.segmentation = None;
        store.insert_annotation(flat).unwrap();

        assert_eq!(store.count_annotations(1).unwrap(), 1);
        assert_eq!(store.annotation_categories(1).unwrap(), vec![1]);
    }

    #[test]
    fn dataset_category_attachment_is_idempotent() {
        let store = MemoryStore::new();
        store.attach_category_to_dataset(1, 7).unwrap();
        store.attach_category_to_dataset(1, 7).unwrap();
        assert_eq!(store.dataset_categories(1), vec![7]);
    }
}
