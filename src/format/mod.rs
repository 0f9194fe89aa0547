//! Format driver capability contracts and the process-wide registry.
//!
//! A format implements [`Ingestor`] to be readable, [`Egestor`] to be
//! writable, or both. Drivers are wired in exactly once, in
//! [`FormatRegistry::builtin`]; the conversion orchestrator only ever talks
//! to the registry, so adding a format never touches the pipeline.

pub mod coco;
pub mod towncentre;
pub mod voc;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::LabelportError;
use crate::ir::ImageDetection;

/// Result of a full ingest: the canonical records plus the number of
/// individual records the driver had to skip.
///
/// A driver must isolate per-record failures — one unparsable annotation
/// file never aborts the rest of the dataset. It surfaces them here instead.
#[derive(Debug)]
pub struct IngestOutcome {
    pub records: Vec<ImageDetection>,
    pub skipped: usize,
}

/// Capability contract for reading a format from disk.
pub trait Ingestor: Send + Sync {
    /// Cheap structural check (expected subdirectories/files) before a full
    /// parse. Must not mutate any external state.
    fn validate(&self, source: &Path) -> Result<(), LabelportError>;

    /// Full parse into canonical records.
    fn ingest(&self, source: &Path) -> Result<IngestOutcome, LabelportError>;
}

/// Capability contract for writing a format to disk.
pub trait Egestor: Send + Sync {
    /// The vocabulary this format's output is guaranteed to satisfy:
    /// canonical label → accepted aliases.
    fn expected_labels(&self) -> BTreeMap<String, Vec<String>>;

    /// Write records out under `dest`, returning the path of the primary
    /// artifact. Must create destination directories idempotently and be
    /// safe to re-run.
    fn egest(&self, records: &[ImageDetection], dest: &Path) -> Result<PathBuf, LabelportError>;
}

/// Name → driver registry, built once at process start and never mutated.
///
/// Ingestors keep their registration order, which doubles as the probe
/// priority order for auto-detecting an unknown source format.
pub struct FormatRegistry {
    ingestors: Vec<(&'static str, Box<dyn Ingestor>)>,
    egestors: Vec<(&'static str, Box<dyn Egestor>)>,
}

impl FormatRegistry {
    pub fn empty() -> Self {
        Self {
            ingestors: Vec::new(),
            egestors: Vec::new(),
        }
    }

    /// The built-in driver set.
    ///
    /// COCO is probed first: its `labels.json` check is the cheapest and the
    /// most specific, so it cannot shadow the directory-layout formats.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register_ingestor("coco", Box::new(coco::CocoIngestor));
        registry.register_ingestor("voc", Box::new(voc::VocIngestor));
        registry.register_ingestor("towncentre", Box::new(towncentre::TownCentreIngestor));
        registry.register_egestor("coco", Box::new(coco::CocoEgestor));
        registry.register_egestor("voc", Box::new(voc::VocEgestor));
        registry
    }

    pub fn register_ingestor(&mut self, name: &'static str, ingestor: Box<dyn Ingestor>) {
        self.ingestors.push((name, ingestor));
    }

    pub fn register_egestor(&mut self, name: &'static str, egestor: Box<dyn Egestor>) {
        self.egestors.push((name, egestor));
    }

    pub fn ingestor(&self, name: &str) -> Option<&dyn Ingestor> {
        self.ingestors
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, i)| i.as_ref())
    }

    pub fn egestor(&self, name: &str) -> Option<&dyn Egestor> {
        self.egestors
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, e)| e.as_ref())
    }

    pub fn ingestor_names(&self) -> Vec<&'static str> {
        self.ingestors.iter().map(|(n, _)| *n).collect()
    }

    pub fn egestor_names(&self) -> Vec<&'static str> {
        self.egestors.iter().map(|(n, _)| *n).collect()
    }

    /// Try each registered ingestor's `validate` in priority order; the
    /// first success wins. Exhaustion is terminal and reports every
    /// attempt's reason.
    pub fn probe(&self, source: &Path) -> Result<&'static str, LabelportError> {
        let mut attempts = Vec::new();
        for (name, ingestor) in &self.ingestors {
            match ingestor.validate(source) {
                Ok(()) => {
                    debug!(format = name, path = %source.display(), "probe matched");
                    return Ok(*name);
                }
                Err(err) => {
                    debug!(format = name, reason = %err, "probe rejected");
                    attempts.push((*name, err.to_string()));
                }
            }
        }
        Err(LabelportError::FormatProbeFailed {
            path: source.to_path_buf(),
            attempts,
        })
    }
}
