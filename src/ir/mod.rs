//! Canonical records for labelport.
//!
//! This module defines the format-agnostic representation of one image and
//! its detections. Every format driver parses into these records, and every
//! writer renders out of them, so N formats need only N drivers instead of
//! N×M pairwise converters.
//!
//! # Design Principles
//!
//! 1. **Fully-shaped records**: [`ImageDetection::blank`] and
//!    [`DetectionRecord::blank`] return fresh values with every field set to
//!    a neutral default, so drivers that do not know a field still produce a
//!    complete record and the validator never sees missing data.
//!
//! 2. **Permissive construction**: record types allow "invalid" data to be
//!    represented (zero-area boxes, dangling image ids), so that validation
//!    can count and drop issues rather than panic during parsing.
//!
//! 3. **One wire shape**: [`payload::CocoPayload`] is the single serialized
//!    form shared by the COCO driver, the payload chunker, and import shards.

mod model;
pub mod payload;

pub use model::{DetectionRecord, ImageDetection, ImageRecord, Segmentation};
